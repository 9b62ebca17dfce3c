use crate::config::{ConditionSpec, Rule};
use crate::error::{DateParseError, QueryBuildError, ValidationWarning};
use crate::store::EmailRecord;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Upper bound on the conditions one rule may compile to. Each condition
/// binds one SQL parameter and SQLite has historically capped those at 999.
pub const MAX_CONDITIONS: usize = 999;

/// Months are approximated as 30 days.
const DAYS_PER_MONTH: i64 = 30;

lazy_static! {
    static ref RELATIVE_DATE: Regex = Regex::new(r"^\s*(\S+)\s+(\S+)\s*$").unwrap();
}

// "Does not Contain", "Does-not-Contain" and "DoesNotContain" all normalize
// to "doesnotcontain".
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// The string-valued email attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    From,
    To,
    Subject,
}

impl TextField {
    pub fn column(self) -> &'static str {
        match self {
            TextField::From => "from_address",
            TextField::To => "to_address",
            TextField::Subject => "subject",
        }
    }

    pub fn value(self, record: &EmailRecord) -> &str {
        match self {
            TextField::From => &record.from_address,
            TextField::To => &record.to_address,
            TextField::Subject => &record.subject,
        }
    }
}

/// A rule condition's field. The variant decides how the condition's value
/// is interpreted and which predicates apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Text(TextField),
    Received,
}

impl FromStr for Field {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "from" => Ok(Field::Text(TextField::From)),
            "to" => Ok(Field::Text(TextField::To)),
            "subject" => Ok(Field::Text(TextField::Subject)),
            "received" => Ok(Field::Received),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOperator {
    Contains,
    DoesNotContain,
    Equals,
    DoesNotEqual,
}

impl FromStr for StringOperator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "contains" => Ok(StringOperator::Contains),
            "doesnotcontain" => Ok(StringOperator::DoesNotContain),
            "equals" => Ok(StringOperator::Equals),
            "doesnotequal" => Ok(StringOperator::DoesNotEqual),
            _ => Err(()),
        }
    }
}

/// `LessThan` selects mail received before the cutoff, `GreaterThan` after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOperator {
    LessThan,
    GreaterThan,
}

impl FromStr for DateOperator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "lessthan" => Ok(DateOperator::LessThan),
            "greaterthan" => Ok(DateOperator::GreaterThan),
            _ => Err(()),
        }
    }
}

/// How a rule folds its conditions together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    #[default]
    All,
    Any,
}

impl FromStr for Combinator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "all" => Ok(Combinator::All),
            "any" => Ok(Combinator::Any),
            _ => Err(()),
        }
    }
}

/// One compiled condition: `operator(email.field, value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Text {
        field: TextField,
        op: StringOperator,
        value: String,
    },
    Received {
        op: DateOperator,
        cutoff: DateTime<Utc>,
    },
}

impl Comparison {
    pub fn matches(&self, record: &EmailRecord) -> bool {
        match self {
            Comparison::Text { field, op, value } => {
                let actual = field.value(record);
                match op {
                    StringOperator::Contains => actual.contains(value.as_str()),
                    StringOperator::DoesNotContain => !actual.contains(value.as_str()),
                    StringOperator::Equals => actual == value,
                    StringOperator::DoesNotEqual => actual != value,
                }
            }
            // Mail without a received date never satisfies a date comparison.
            Comparison::Received { op, cutoff } => match (record.date_received, op) {
                (Some(received), DateOperator::LessThan) => received < *cutoff,
                (Some(received), DateOperator::GreaterThan) => received > *cutoff,
                (None, _) => false,
            },
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Text { field, op, value } => {
                let op = match op {
                    StringOperator::Contains => "contains",
                    StringOperator::DoesNotContain => "does not contain",
                    StringOperator::Equals => "equals",
                    StringOperator::DoesNotEqual => "does not equal",
                };
                write!(f, "{} {} {:?}", field.column(), op, value)
            }
            Comparison::Received { op, cutoff } => {
                let op = match op {
                    DateOperator::LessThan => "before",
                    DateOperator::GreaterThan => "after",
                };
                write!(
                    f,
                    "date_received {} {}",
                    op,
                    cutoff.format("%Y-%m-%d %H:%M:%S UTC")
                )
            }
        }
    }
}

/// A rule's match predicate over stored emails.
///
/// `All` and `Any` are only ever built with at least one comparison; a rule
/// left without usable conditions compiles to `Nothing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Nothing,
    All(Vec<Comparison>),
    Any(Vec<Comparison>),
}

impl Predicate {
    pub fn matches(&self, record: &EmailRecord) -> bool {
        match self {
            Predicate::Nothing => false,
            Predicate::All(comparisons) => comparisons.iter().all(|c| c.matches(record)),
            Predicate::Any(comparisons) => comparisons.iter().any(|c| c.matches(record)),
        }
    }

    pub fn comparisons(&self) -> &[Comparison] {
        match self {
            Predicate::Nothing => &[],
            Predicate::All(comparisons) | Predicate::Any(comparisons) => comparisons,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (comparisons, joiner) = match self {
            Predicate::Nothing => return f.write_str("<nothing>"),
            Predicate::All(comparisons) => (comparisons, " AND "),
            Predicate::Any(comparisons) => (comparisons, " OR "),
        };
        for (i, comparison) in comparisons.iter().enumerate() {
            if i > 0 {
                f.write_str(joiner)?;
            }
            write!(f, "{comparison}")?;
        }
        Ok(())
    }
}

/// Resolve `"<integer> <unit>"` against the current wall clock.
pub fn parse_relative_date(value: &str) -> Result<DateTime<Utc>, DateParseError> {
    parse_relative_date_at(value, Utc::now())
}

/// Resolve `"<integer> <unit>"` relative to `now`. Units are `days` and
/// `months` (30 days each); the result is truncated to whole seconds, the
/// precision emails are stored at.
pub fn parse_relative_date_at(
    value: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, DateParseError> {
    let captures = RELATIVE_DATE
        .captures(value)
        .ok_or_else(|| DateParseError::Malformed(value.to_string()))?;

    let amount: i64 = captures[1]
        .parse()
        .map_err(|_| DateParseError::Malformed(value.to_string()))?;

    let days = match captures[2].to_lowercase().as_str() {
        "day" | "days" => Some(amount),
        "month" | "months" => amount.checked_mul(DAYS_PER_MONTH),
        other => return Err(DateParseError::UnsupportedUnit(other.to_string())),
    };

    days.and_then(Duration::try_days)
        .and_then(|offset| now.checked_sub_signed(offset))
        .map(|cutoff| cutoff.trunc_subsecs(0))
        .ok_or_else(|| DateParseError::OutOfRange(value.to_string()))
}

/// Output of compiling one rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub combinator: Combinator,
    pub predicate: Predicate,
    pub warnings: Vec<ValidationWarning>,
}

/// Turns a rule's conditions into a [`Predicate`].
///
/// Relative dates resolve against the clock at compile time, so the same
/// rule yields a different cutoff on each run. Tests pin the clock with
/// [`PredicateCompiler::at`].
#[derive(Debug, Clone, Default)]
pub struct PredicateCompiler {
    now: Option<DateTime<Utc>>,
}

impl PredicateCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }

    pub fn compile(&self, rule: &Rule) -> Result<CompiledRule, QueryBuildError> {
        let now = self.now.unwrap_or_else(Utc::now);
        let label = rule.label();
        let mut warnings = Vec::new();

        let combinator = match rule.overall_predicate.as_deref() {
            None => Combinator::All,
            Some(text) => text.parse::<Combinator>().unwrap_or_else(|_| {
                let warning = ValidationWarning::UnknownOverallPredicate(text.to_string());
                log::warn!("Rule {label}: {warning}");
                warnings.push(warning);
                Combinator::All
            }),
        };

        let mut comparisons = Vec::with_capacity(rule.conditions.len());
        for (index, condition) in rule.conditions.iter().enumerate() {
            match compile_condition(index, condition, now) {
                Ok(comparison) => {
                    log::debug!("Rule {label}: condition {index} compiled to {comparison}");
                    comparisons.push(comparison);
                }
                Err(warning) => {
                    log::warn!("Rule {label}: skipping {warning}");
                    warnings.push(warning);
                }
            }
        }

        if comparisons.len() > MAX_CONDITIONS {
            return Err(QueryBuildError::TooManyConditions {
                count: comparisons.len(),
                limit: MAX_CONDITIONS,
            });
        }

        let predicate = if comparisons.is_empty() {
            log::warn!("Rule {label}: {}", ValidationWarning::NoConditions);
            warnings.push(ValidationWarning::NoConditions);
            Predicate::Nothing
        } else {
            match combinator {
                Combinator::All => Predicate::All(comparisons),
                Combinator::Any => Predicate::Any(comparisons),
            }
        };

        Ok(CompiledRule {
            combinator,
            predicate,
            warnings,
        })
    }
}

fn compile_condition(
    index: usize,
    condition: &ConditionSpec,
    now: DateTime<Utc>,
) -> Result<Comparison, ValidationWarning> {
    let (field, predicate, value) = match (
        condition.field.as_deref(),
        condition.predicate.as_deref(),
        condition.value.as_deref(),
    ) {
        (Some(field), Some(predicate), Some(value)) => (field, predicate, value),
        (field, predicate, value) => {
            let keys = [("field", field), ("predicate", predicate), ("value", value)]
                .into_iter()
                .filter(|(_, present)| present.is_none())
                .map(|(key, _)| key)
                .collect();
            return Err(ValidationWarning::MissingKey { index, keys });
        }
    };

    let parsed_field: Field = field.parse().map_err(|_| ValidationWarning::UnknownField {
        index,
        field: field.to_string(),
    })?;

    let unsupported = || ValidationWarning::UnsupportedPredicate {
        index,
        field: field.to_string(),
        predicate: predicate.to_string(),
    };

    match parsed_field {
        Field::Text(text_field) => Ok(Comparison::Text {
            field: text_field,
            op: predicate.parse().map_err(|_| unsupported())?,
            value: value.to_string(),
        }),
        Field::Received => {
            let op: DateOperator = predicate.parse().map_err(|_| unsupported())?;
            let cutoff = parse_relative_date_at(value, now)
                .map_err(|reason| ValidationWarning::InvalidDate { index, reason })?;
            Ok(Comparison::Received { op, cutoff })
        }
    }
}
