pub mod actions;
pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod mail_service;
pub mod predicate;
pub mod query;
pub mod settings;
pub mod store;

#[cfg(test)]
mod testing;

pub use actions::{Action, ActionDispatcher, ActionOutcome};
pub use config::{Rule, RuleSet};
pub use engine::{EngineOptions, RuleEngine, RunReport};
pub use error::{ConfigError, QueryBuildError, RemoteServiceError, StoreError, ValidationWarning};
pub use labels::LabelCache;
pub use mail_service::{GmailClient, MailService};
pub use predicate::{parse_relative_date, Predicate, PredicateCompiler};
pub use settings::Settings;
pub use store::{EmailRecord, RecordStore, SqliteStore};
