use crate::error::StoreError;
use crate::predicate::{Comparison, DateOperator, Predicate, StringOperator};
use crate::store::{EmailRecord, StoreSession, DATE_FORMAT};

/// A `WHERE` clause with positional `?` parameters, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<String>,
}

/// Render a predicate for the `emails` table.
///
/// Text comparisons are case-sensitive and literal (`instr`, not `LIKE`),
/// and NULL text columns compare as empty strings, so the result agrees
/// with [`Predicate::matches`].
pub fn to_sql(predicate: &Predicate) -> SqlFilter {
    let (comparisons, joiner) = match predicate {
        Predicate::Nothing => {
            return SqlFilter {
                clause: "0".to_string(),
                params: Vec::new(),
            }
        }
        Predicate::All(comparisons) => (comparisons, " AND "),
        Predicate::Any(comparisons) => (comparisons, " OR "),
    };

    let mut params = Vec::with_capacity(comparisons.len());
    let clauses: Vec<String> = comparisons
        .iter()
        .map(|comparison| comparison_sql(comparison, &mut params))
        .collect();

    SqlFilter {
        clause: format!("({})", clauses.join(joiner)),
        params,
    }
}

fn comparison_sql(comparison: &Comparison, params: &mut Vec<String>) -> String {
    match comparison {
        Comparison::Text { field, op, value } => {
            params.push(value.clone());
            let column = format!("COALESCE({}, '')", field.column());
            match op {
                StringOperator::Contains => format!("instr({column}, ?) > 0"),
                StringOperator::DoesNotContain => format!("instr({column}, ?) = 0"),
                StringOperator::Equals => format!("{column} = ?"),
                StringOperator::DoesNotEqual => format!("{column} <> ?"),
            }
        }
        Comparison::Received { op, cutoff } => {
            params.push(cutoff.format(DATE_FORMAT).to_string());
            match op {
                DateOperator::LessThan => "date_received < ?".to_string(),
                DateOperator::GreaterThan => "date_received > ?".to_string(),
            }
        }
    }
}

/// Runs compiled predicates against an open store session.
pub struct QueryExecutor;

impl QueryExecutor {
    /// Matching records, or whatever the store fails with. No retries.
    pub fn execute(
        session: &mut dyn StoreSession,
        predicate: &Predicate,
    ) -> Result<Vec<EmailRecord>, StoreError> {
        let emails = session.query(predicate)?;
        log::debug!("Query: {predicate}, Email List: {}", emails.len());
        Ok(emails)
    }
}
