use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;

/// On-disk encoding of a rule document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Json,
    Yaml,
}

impl RuleFormat {
    /// `.yaml`/`.yml` files are YAML, everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => RuleFormat::Yaml,
            _ => RuleFormat::Json,
        }
    }
}

/// The loaded rules, in document order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

#[derive(Deserialize)]
struct RuleDocument {
    #[serde(default)]
    rules: Option<Vec<Rule>>,
}

/// Rule identifier, used for logging only. Authors write either numbers or
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleId::Number(n) => write!(f, "{n}"),
            RuleId::Text(s) => f.write_str(s),
        }
    }
}

/// A rule exactly as authored. Every key is optional so that one malformed
/// rule never prevents its siblings from loading; semantic checks happen in
/// the predicate compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub id: Option<RuleId>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub overall_predicate: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

impl Rule {
    /// `id::description`, for log lines.
    pub fn label(&self) -> String {
        let id = self
            .id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!("{}::{}", id, self.description.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default, alias = "type")]
    pub action: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

// Accepts `value: 10` as readily as `value: "10"`.
fn scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Integer(i64),
        Float(f64),
        Flag(bool),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Text(s) => s,
        Scalar::Integer(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
        Scalar::Flag(b) => b.to_string(),
    }))
}

impl RuleSet {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rule_set = Self::parse(&content, RuleFormat::from_path(path))?;
        log::info!(
            "Loaded {} rule(s) from {}",
            rule_set.rules.len(),
            path.display()
        );
        Ok(rule_set)
    }

    pub fn parse(content: &str, format: RuleFormat) -> Result<Self, ConfigError> {
        let document: RuleDocument = match format {
            RuleFormat::Json => serde_json::from_str(content)?,
            RuleFormat::Yaml => serde_yaml::from_str(content)?,
        };
        let rules = document.rules.ok_or(ConfigError::MissingRules)?;
        Ok(RuleSet { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_JSON: &str = r#"{
        "rules": [
            {
                "id": 1,
                "description": "Invoices from accounting",
                "overall_predicate": "All",
                "conditions": [
                    {"field": "From", "predicate": "Contains", "value": "accounting@example.com"},
                    {"field": "Received", "predicate": "Less than", "value": "30 days"}
                ],
                "actions": [
                    {"action": "Mark as read"},
                    {"action": "Move Message", "folder": "Invoices"}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_json_rules() {
        let rule_set = RuleSet::parse(SAMPLE_JSON, RuleFormat::Json).unwrap();
        assert_eq!(rule_set.len(), 1);

        let rule = &rule_set.rules[0];
        assert_eq!(rule.id, Some(RuleId::Number(1)));
        assert_eq!(rule.overall_predicate.as_deref(), Some("All"));
        assert_eq!(rule.conditions.len(), 2);
        assert_eq!(rule.actions[1].folder.as_deref(), Some("Invoices"));
        assert_eq!(rule.label(), "1::Invoices from accounting");
    }

    #[test]
    fn test_parse_yaml_rules() {
        let yaml = r#"
rules:
  - id: newsletters
    overall_predicate: Any
    conditions:
      - field: Subject
        predicate: Contains
        value: Newsletter
    actions:
      - type: MarkRead
"#;
        let rule_set = RuleSet::parse(yaml, RuleFormat::Yaml).unwrap();
        let rule = &rule_set.rules[0];
        assert_eq!(rule.id, Some(RuleId::Text("newsletters".to_string())));
        assert_eq!(rule.actions[0].action.as_deref(), Some("MarkRead"));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let rule_set =
            RuleSet::parse(r#"{"rules": [{"rule": "some rule"}]}"#, RuleFormat::Json).unwrap();
        assert_eq!(rule_set.len(), 1);
        assert!(rule_set.rules[0].conditions.is_empty());
        assert_eq!(rule_set.rules[0].label(), "-::");
    }

    #[test]
    fn test_numeric_condition_value_is_text() {
        let json = r#"{"rules": [{"conditions": [{"field": "Subject", "predicate": "Equals", "value": 2024}]}]}"#;
        let rule_set = RuleSet::parse(json, RuleFormat::Json).unwrap();
        assert_eq!(
            rule_set.rules[0].conditions[0].value.as_deref(),
            Some("2024")
        );
    }

    #[test]
    fn test_missing_rules_key() {
        let result = RuleSet::parse(r#"{"filters": []}"#, RuleFormat::Json);
        assert!(matches!(result, Err(ConfigError::MissingRules)));
    }

    #[test]
    fn test_malformed_json() {
        let result = RuleSet::parse("{malformed json}", RuleFormat::Json);
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_file_not_found() {
        let result = RuleSet::from_file("/nonexistent/rules.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "rules:\n  - description: from yaml").unwrap();

        let rule_set = RuleSet::from_file(file.path()).unwrap();
        assert_eq!(
            rule_set.rules[0].description.as_deref(),
            Some("from yaml")
        );
        assert_eq!(
            RuleFormat::from_path(Path::new("rules.JSON")),
            RuleFormat::Json
        );
    }
}
