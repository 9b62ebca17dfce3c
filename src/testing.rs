//! In-process mail service double for tests.

use crate::error::RemoteServiceError;
use crate::mail_service::{Label, LabelChange, MailService};
use std::collections::HashSet;
use std::sync::Mutex;

/// Records every label modification and fails on request.
#[derive(Default)]
pub struct RecordingMailService {
    labels: Vec<Label>,
    fail_listing: bool,
    failing_messages: HashSet<String>,
    list_calls: Mutex<usize>,
    modifications: Mutex<Vec<(String, LabelChange)>>,
}

impl RecordingMailService {
    pub fn with_labels(labels: Vec<Label>) -> Self {
        Self {
            labels,
            ..Default::default()
        }
    }

    pub fn failing_label_list() -> Self {
        Self {
            fail_listing: true,
            ..Default::default()
        }
    }

    /// Make every modification of `message_id` fail.
    pub fn fail_message(mut self, message_id: &str) -> Self {
        self.failing_messages.insert(message_id.to_string());
        self
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    pub fn modifications(&self) -> Vec<(String, LabelChange)> {
        self.modifications.lock().unwrap().clone()
    }
}

impl MailService for RecordingMailService {
    async fn list_labels(&self) -> Result<Vec<Label>, RemoteServiceError> {
        *self.list_calls.lock().unwrap() += 1;
        if self.fail_listing {
            return Err(RemoteServiceError::Status {
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }
        Ok(self.labels.clone())
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        change: &LabelChange,
    ) -> Result<(), RemoteServiceError> {
        if self.failing_messages.contains(message_id) {
            return Err(RemoteServiceError::Other(format!(
                "message {message_id} rejected"
            )));
        }
        self.modifications
            .lock()
            .unwrap()
            .push((message_id.to_string(), change.clone()));
        Ok(())
    }
}
