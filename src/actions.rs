use crate::config::ActionSpec;
use crate::error::{RemoteServiceError, ValidationWarning};
use crate::labels::LabelCache;
use crate::mail_service::{LabelChange, MailService, UNREAD_LABEL};
use crate::store::EmailRecord;
use std::fmt;

/// A validated rule action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MarkRead,
    MarkUnread,
    Move { folder: String },
}

impl Action {
    /// Validate the authored action at position `index` of its rule.
    /// Accepts both "Mark as read" and "MarkRead" spellings.
    pub fn resolve(index: usize, spec: &ActionSpec) -> Result<Action, ValidationWarning> {
        let name = spec
            .action
            .as_deref()
            .ok_or(ValidationWarning::MissingActionType { index })?;

        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "markasread" | "markread" => Ok(Action::MarkRead),
            "markasunread" | "markunread" => Ok(Action::MarkUnread),
            "movemessage" | "move" => match spec.folder.as_deref().map(str::trim) {
                Some(folder) if !folder.is_empty() => Ok(Action::Move {
                    folder: folder.to_string(),
                }),
                _ => Err(ValidationWarning::MissingFolder { index }),
            },
            _ => Err(ValidationWarning::UnknownAction {
                index,
                action: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MarkRead => f.write_str("mark as read"),
            Action::MarkUnread => f.write_str("mark as unread"),
            Action::Move { folder } => write!(f, "move to {folder}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    LabelNotFound(String),
    DryRun,
}

/// What happened when one action met one record.
#[derive(Debug)]
pub enum ActionOutcome {
    Applied,
    Skipped(SkipReason),
    Failed(RemoteServiceError),
}

/// Applies actions to matched records through the mail service. Every
/// failure stays inside the returned [`ActionOutcome`].
pub struct ActionDispatcher<'a, S> {
    service: &'a S,
    labels: &'a LabelCache,
    dry_run: bool,
}

impl<'a, S: MailService> ActionDispatcher<'a, S> {
    pub fn new(service: &'a S, labels: &'a LabelCache, dry_run: bool) -> Self {
        Self {
            service,
            labels,
            dry_run,
        }
    }

    pub async fn apply(&self, email: &EmailRecord, action: &Action) -> ActionOutcome {
        let change = match action {
            Action::MarkRead => LabelChange::remove(UNREAD_LABEL),
            Action::MarkUnread => LabelChange::add(UNREAD_LABEL),
            Action::Move { folder } => match self.labels.resolve(folder) {
                Some(label_id) => LabelChange::add(label_id),
                None => {
                    log::warn!("Label not found for folder: {folder}, skipping email {email}");
                    return ActionOutcome::Skipped(SkipReason::LabelNotFound(folder.clone()));
                }
            },
        };

        if self.dry_run {
            log::info!("[dry run] Would {action}: {email}");
            return ActionOutcome::Skipped(SkipReason::DryRun);
        }

        match self.service.modify_labels(&email.id, &change).await {
            Ok(()) => {
                log::info!("Email {action}: {email}");
                ActionOutcome::Applied
            }
            Err(e) => {
                log::error!("Error applying '{action}' to email {email}: {e}");
                ActionOutcome::Failed(e)
            }
        }
    }
}
