use serde::{Deserialize, Serialize};
use std::path::Path;

/// Run configuration, read from a YAML file. Every key has a default so a
/// partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_rules_path")]
    pub rules_path: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Log what would be done without touching the mailbox.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub gmail: GmailSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmailSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Environment variable holding an OAuth access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Fallback token file: a bare token, or JSON with `token`/`access_token`.
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Extra attempts for label modifications that fail transiently.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_rules_path() -> String {
    "rules.json".to_string()
}

fn default_database_path() -> String {
    "emails.db".to_string()
}

fn default_api_base() -> String {
    "https://gmail.googleapis.com".to_string()
}

fn default_user_id() -> String {
    "me".to_string()
}

fn default_token_env() -> String {
    "GMAIL_ACCESS_TOKEN".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for GmailSettings {
    fn default() -> Self {
        GmailSettings {
            api_base: default_api_base(),
            user_id: default_user_id(),
            token_env: default_token_env(),
            token_file: Some("token.json".to_string()),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rules_path: default_rules_path(),
            database_path: default_database_path(),
            dry_run: false,
            gmail: GmailSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "Configuration file '{}' not found, using default configuration",
                path.display()
            );
            Ok(Settings::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings = serde_yaml::from_str(
            "database_path: /var/lib/inbox-rules/emails.db\ngmail:\n  max_retries: 5\n",
        )
        .unwrap();

        assert_eq!(settings.database_path, "/var/lib/inbox-rules/emails.db");
        assert_eq!(settings.rules_path, "rules.json");
        assert!(!settings.dry_run);
        assert_eq!(settings.gmail.max_retries, 5);
        assert_eq!(settings.gmail.user_id, "me");
        assert_eq!(settings.gmail.token_file, None);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox-rules.yaml");

        let mut settings = Settings::default();
        settings.dry_run = true;
        settings.to_file(&path).unwrap();

        assert_eq!(Settings::from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = Settings::load_or_default("/nonexistent/inbox-rules.yaml").unwrap();
        assert_eq!(settings, Settings::default());
    }
}
