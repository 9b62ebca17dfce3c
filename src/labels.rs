use crate::mail_service::{Label, MailService};

/// The mail service's label catalog, fetched once per run and owned by that
/// run's engine.
#[derive(Debug, Clone, Default)]
pub struct LabelCache {
    labels: Vec<Label>,
}

impl LabelCache {
    /// Fetch the catalog. A listing failure leaves the cache empty so that
    /// every later lookup misses instead of aborting the run.
    pub async fn load<S: MailService>(service: &S) -> Self {
        match service.list_labels().await {
            Ok(labels) => {
                log::info!("Loaded {} label(s) from mail service", labels.len());
                Self { labels }
            }
            Err(e) => {
                log::error!("Error retrieving labels: {e}");
                Self::default()
            }
        }
    }

    pub fn from_labels(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    /// Id of the label named `name`, ignoring case. First match wins.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        let found = self
            .labels
            .iter()
            .find(|label| label.name.to_lowercase() == wanted)
            .map(|label| label.id.as_str());
        if found.is_none() {
            log::warn!("No label found for folder name: {name}");
        }
        found
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
