//! Session command API client
//!
//! Stateless request/response calls against `{api_url}api/sessions`. The
//! reconciler only needs [`CommandClient`]; the lobby actions (`start_game`,
//! `end_session`) live on [`HttpCommandClient`] for the CLI.

use std::time::Duration;

use async_trait::async_trait;
use boardbank_protocol::{
    CreateSessionRequest, JoinSessionRequest, PlayerColor, Session, StartGameRequest,
};
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::CommandError;

/// Commands the sync core consumes
#[async_trait]
pub trait CommandClient: Send + Sync {
    async fn fetch_session_by_code(&self, code: &str) -> Result<Session, CommandError>;

    async fn create_session(&self, host_name: &str) -> Result<Session, CommandError>;

    async fn join_session(
        &self,
        code: &str,
        player_name: &str,
        color: PlayerColor,
    ) -> Result<Session, CommandError>;
}

#[derive(Clone)]
pub struct HttpCommandClient {
    base_url: Url,
    http_client: HttpClient,
}

/// Error body the server sends with 4xx responses
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl HttpCommandClient {
    /// `api_url` is the server root; requests go to `{api_url}api/...`.
    pub fn new(api_url: &Url, request_timeout: Duration) -> Result<Self, CommandError> {
        let base_url = api_url.join("api/")?;
        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url,
            http_client,
        })
    }

    fn session_url(&self, code: &str, suffix: &str) -> Result<Url, CommandError> {
        Ok(self.base_url.join(&format!("sessions/{code}{suffix}"))?)
    }

    /// Start the game. Only the host may do this.
    pub async fn start_game(&self, code: &str, host_player_id: i64) -> Result<(), CommandError> {
        let url = self.session_url(code, "/start")?;
        debug!(component = "command", event = "command.start_game", url = %url);
        let response = self
            .http_client
            .post(url)
            .json(&StartGameRequest { host_player_id })
            .send()
            .await?;
        check(response).await.map(drop)
    }

    /// Delete the session. Only the host may do this.
    pub async fn end_session(&self, code: &str, host_player_id: i64) -> Result<(), CommandError> {
        let mut url = self.session_url(code, "")?;
        url.query_pairs_mut()
            .append_pair("hostPlayerId", &host_player_id.to_string());
        debug!(component = "command", event = "command.end_session", url = %url);
        let response = self.http_client.delete(url).send().await?;
        check(response).await.map(drop)
    }
}

#[async_trait]
impl CommandClient for HttpCommandClient {
    async fn fetch_session_by_code(&self, code: &str) -> Result<Session, CommandError> {
        let url = self.session_url(code, "")?;
        debug!(component = "command", event = "command.fetch_session", url = %url);
        let response = self.http_client.get(url).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn create_session(&self, host_name: &str) -> Result<Session, CommandError> {
        let url = self.base_url.join("sessions")?;
        debug!(component = "command", event = "command.create_session", url = %url);
        let response = self
            .http_client
            .post(url)
            .json(&CreateSessionRequest {
                host_name: host_name.to_string(),
            })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn join_session(
        &self,
        code: &str,
        player_name: &str,
        color: PlayerColor,
    ) -> Result<Session, CommandError> {
        let url = self.session_url(code, "/join")?;
        debug!(component = "command", event = "command.join_session", url = %url);
        let response = self
            .http_client
            .post(url)
            .json(&JoinSessionRequest {
                player_name: player_name.to_string(),
                color,
            })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Map non-success statuses onto [`CommandError`].
async fn check(response: Response) -> Result<Response, CommandError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(CommandError::NotFound);
    }
    if matches!(status, StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::FORBIDDEN) {
        let text = response.text().await.unwrap_or_default();
        return Err(CommandError::Rejected(rejection_message(status, &text)));
    }
    Err(CommandError::Status(status))
}

fn rejection_message(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error));
    match parsed {
        Some(message) if !message.trim().is_empty() => message,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => format!("server returned {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpCommandClient {
        let api = Url::parse("http://bank.example.com:8080/").expect("url");
        HttpCommandClient::new(&api, Duration::from_secs(1)).expect("client")
    }

    #[test]
    fn builds_session_urls_under_api_prefix() {
        let client = client();
        assert_eq!(
            client.session_url("4821", "").expect("url").as_str(),
            "http://bank.example.com:8080/api/sessions/4821"
        );
        assert_eq!(
            client.session_url("4821", "/join").expect("url").as_str(),
            "http://bank.example.com:8080/api/sessions/4821/join"
        );
    }

    #[test]
    fn keeps_a_path_prefix_on_the_api_url() {
        let api = Url::parse("https://example.com/bank/").expect("url");
        let client = HttpCommandClient::new(&api, Duration::from_secs(1)).expect("client");
        assert_eq!(
            client.session_url("0042", "/start").expect("url").as_str(),
            "https://example.com/bank/api/sessions/0042/start"
        );
    }

    #[test]
    fn rejection_prefers_server_message() {
        assert_eq!(
            rejection_message(StatusCode::BAD_REQUEST, r#"{"message":"Color already taken"}"#),
            "Color already taken"
        );
        assert_eq!(
            rejection_message(StatusCode::CONFLICT, "Game already started"),
            "Game already started"
        );
        assert_eq!(
            rejection_message(StatusCode::FORBIDDEN, ""),
            "server returned 403 Forbidden"
        );
    }
}
