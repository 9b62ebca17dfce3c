use crate::error::RemoteServiceError;
use crate::settings::GmailSettings;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// System label whose presence marks a message unread.
pub const UNREAD_LABEL: &str = "UNREAD";

/// A folder/tag as the mail service knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// Labels to add to and remove from one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelChange {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_label_ids: Vec<String>,
}

impl LabelChange {
    pub fn add(label_id: &str) -> Self {
        LabelChange {
            add_label_ids: vec![label_id.to_string()],
            ..Default::default()
        }
    }

    pub fn remove(label_id: &str) -> Self {
        LabelChange {
            remove_label_ids: vec![label_id.to_string()],
            ..Default::default()
        }
    }
}

/// The remote operations the engine needs from a mailbox.
#[allow(async_fn_in_trait)]
pub trait MailService {
    async fn list_labels(&self) -> Result<Vec<Label>, RemoteServiceError>;

    /// Apply `change` to message `message_id`. Idempotent.
    async fn modify_labels(
        &self,
        message_id: &str,
        change: &LabelChange,
    ) -> Result<(), RemoteServiceError>;
}

#[derive(Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Deserialize)]
struct TokenFile {
    #[serde(alias = "access_token")]
    token: String,
}

/// Read the OAuth access token from the configured environment variable,
/// falling back to the token file.
pub fn access_token(settings: &GmailSettings) -> Result<String, RemoteServiceError> {
    if let Ok(token) = std::env::var(&settings.token_env) {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }

    let path = settings.token_file.as_deref().ok_or_else(|| {
        RemoteServiceError::Auth(format!(
            "{} is not set and no token_file is configured",
            settings.token_env
        ))
    })?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| RemoteServiceError::Auth(format!("cannot read {path}: {e}")))?;

    let token = match serde_json::from_str::<TokenFile>(&content) {
        Ok(parsed) => parsed.token,
        Err(_) => content.trim().to_string(),
    };
    if token.is_empty() {
        return Err(RemoteServiceError::Auth(format!("{path} is empty")));
    }
    Ok(token)
}

/// Gmail REST API client.
pub struct GmailClient {
    client: Client,
    api_base: Url,
    user_id: String,
    token: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl GmailClient {
    pub fn new(settings: &GmailSettings) -> Result<Self, RemoteServiceError> {
        let token = access_token(settings)?;
        Self::with_token(settings, token)
    }

    pub fn with_token(settings: &GmailSettings, token: String) -> Result<Self, RemoteServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .user_agent(concat!("inbox-rules/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: Url::parse(&settings.api_base)?,
            user_id: settings.user_id.clone(),
            token,
            max_retries: settings.max_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteServiceError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteServiceError::Endpoint(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(["gmail", "v1", "users", self.user_id.as_str()])
            .extend(segments);
        Ok(url)
    }

    async fn check_status(response: Response) -> Result<Response, RemoteServiceError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RemoteServiceError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send_modify(&self, url: &Url, change: &LabelChange) -> Result<(), RemoteServiceError> {
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .json(change)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

impl MailService for GmailClient {
    async fn list_labels(&self) -> Result<Vec<Label>, RemoteServiceError> {
        let url = self.endpoint(&["labels"])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let list: LabelList = Self::check_status(response).await?.json().await?;
        log::debug!("Retrieved {} label(s)", list.labels.len());
        Ok(list.labels)
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        change: &LabelChange,
    ) -> Result<(), RemoteServiceError> {
        let url = self.endpoint(&["messages", message_id, "modify"])?;
        let mut attempt = 0;
        loop {
            match self.send_modify(&url, change).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "Modifying labels of {message_id} failed ({e}), retry {attempt}/{}",
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned response per connection, returning each request's
    /// head and body once all responses are used.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            requests
        });

        (base, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn settings(api_base: &str) -> GmailSettings {
        GmailSettings {
            api_base: api_base.to_string(),
            token_file: None,
            timeout_seconds: 5,
            max_retries: 2,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_label_change_body() {
        let body = serde_json::to_string(&LabelChange::remove(UNREAD_LABEL)).unwrap();
        assert_eq!(body, r#"{"removeLabelIds":["UNREAD"]}"#);

        let body = serde_json::to_string(&LabelChange::add("Label_7")).unwrap();
        assert_eq!(body, r#"{"addLabelIds":["Label_7"]}"#);
    }

    #[test]
    fn test_endpoint_building() {
        let client =
            GmailClient::with_token(&settings("https://gmail.googleapis.com"), "t".to_string())
                .unwrap();
        let url = client.endpoint(&["messages", "18e0f/a", "modify"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/18e0f%2Fa/modify"
        );
    }

    #[test]
    fn test_access_token_sources() {
        let mut config = settings("https://gmail.googleapis.com");
        config.token_env = "INBOX_RULES_TEST_TOKEN_UNSET".to_string();
        assert!(matches!(
            access_token(&config),
            Err(RemoteServiceError::Auth(_))
        ));

        let mut json = tempfile::NamedTempFile::new().unwrap();
        write!(json, r#"{{"token": "ya29.json", "refresh_token": "r"}}"#).unwrap();
        config.token_file = Some(json.path().display().to_string());
        assert_eq!(access_token(&config).unwrap(), "ya29.json");

        let mut bare = tempfile::NamedTempFile::new().unwrap();
        writeln!(bare, "ya29.bare").unwrap();
        config.token_file = Some(bare.path().display().to_string());
        assert_eq!(access_token(&config).unwrap(), "ya29.bare");

        config.token_env = "INBOX_RULES_TEST_TOKEN_SET".to_string();
        std::env::set_var("INBOX_RULES_TEST_TOKEN_SET", "ya29.env");
        assert_eq!(access_token(&config).unwrap(), "ya29.env");
    }

    #[tokio::test]
    async fn test_list_labels() {
        let (base, server) = serve(vec![(
            200,
            r#"{"labels": [{"id": "INBOX", "name": "INBOX", "type": "system"}, {"id": "Label_1", "name": "Label1"}]}"#,
        )])
        .await;

        let client = GmailClient::with_token(&settings(&base), "secret".to_string()).unwrap();
        let labels = client.list_labels().await.unwrap();

        assert_eq!(labels.len(), 2);
        assert_eq!(labels[1].id, "Label_1");

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /gmail/v1/users/me/labels "));
        assert!(requests[0].to_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn test_modify_retries_transient_failures() {
        let (base, server) = serve(vec![(503, "{}"), (200, "{}")]).await;

        let client = GmailClient::with_token(&settings(&base), "secret".to_string()).unwrap();
        client
            .modify_labels("m1", &LabelChange::remove(UNREAD_LABEL))
            .await
            .unwrap();

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].starts_with("POST /gmail/v1/users/me/messages/m1/modify "));
        assert!(requests[1].ends_with(r#"{"removeLabelIds":["UNREAD"]}"#));
    }

    #[tokio::test]
    async fn test_modify_gives_up_after_retry_budget() {
        let (base, server) = serve(vec![(500, "{}"), (500, "{}"), (500, "{}")]).await;

        let client = GmailClient::with_token(&settings(&base), "secret".to_string()).unwrap();
        let result = client.modify_labels("m1", &LabelChange::add("Label_1")).await;

        assert!(matches!(
            result,
            Err(RemoteServiceError::Status { status: 500, .. })
        ));
        assert_eq!(server.await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_modify_does_not_retry_client_errors() {
        let (base, server) = serve(vec![(404, r#"{"error": "not found"}"#)]).await;

        let client = GmailClient::with_token(&settings(&base), "secret".to_string()).unwrap();
        let result = client.modify_labels("gone", &LabelChange::add("Label_1")).await;

        match result {
            Err(RemoteServiceError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert!(body.contains("not found"));
            }
            other => panic!("Expected 404 status error, got {other:?}"),
        }
        assert_eq!(server.await.unwrap().len(), 1);
    }
}
