//! reqwest client for the chat service REST API.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::dto::{
    ApiResponse, ChatListDeltaDto, ErrorResponseDto, SendMessageRequestDto, SettingItemDto,
    SettingSyncItemDto, SettingSyncResultDto, SettingsResponseDto, SyncSettingsRequestDto,
    SyncSettingsResponseDto,
};
use super::{ChatDeltaSource, SettingsRemote};
use crate::error::RemoteError;
use crate::messaging::MessageTransport;
use crate::models::{
    ChatListDelta, Message, RemoteSettingValue, SettingKey, SettingSyncRequest, SyncResult,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type UploadReceiver = mpsc::Receiver<std::result::Result<Message, RemoteError>>;

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_message(
        &self,
        path: &str,
        message: &Message,
    ) -> std::result::Result<Message, RemoteError> {
        let response = self
            .client
            .post(self.url(path))
            .header("Accept", "application/json")
            .json(&SendMessageRequestDto { message })
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;
        read_envelope::<Message>(response).await
    }

    /// Upload on a background task; the receiver sees the single server reply.
    fn spawn_upload(&self, path: String, message: Message) -> UploadReceiver {
        let (tx, rx) = mpsc::channel(1);
        let remote = self.clone();
        tokio::spawn(async move {
            let result = remote.post_message(&path, &message).await;
            let _ = tx.send(result).await;
        });
        rx
    }
}

impl ChatDeltaSource for HttpRemote {
    async fn fetch_chat_deltas(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> std::result::Result<ChatListDelta, RemoteError> {
        let mut request = self
            .client
            .get(self.url("/chats/deltas"))
            .header("Accept", "application/json");
        if let Some(since) = since {
            let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
            request = request.query(&[("since", since)]);
        }

        let response = request
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;
        let page = read_envelope::<ChatListDeltaDto>(response).await?;
        Ok(page.into())
    }
}

impl SettingsRemote for HttpRemote {
    async fn sync_one(
        &self,
        request: SettingSyncRequest,
    ) -> std::result::Result<SyncResult, RemoteError> {
        let key = request.key;
        let mut results = self.sync_batch(vec![request]).await?;
        results.remove(&key).ok_or_else(|| {
            tracing::warn!(key = %key, "Sync response did not include the requested key");
            RemoteError::ServerError
        })
    }

    async fn sync_batch(
        &self,
        requests: Vec<SettingSyncRequest>,
    ) -> std::result::Result<HashMap<SettingKey, SyncResult>, RemoteError> {
        let body = SyncSettingsRequestDto {
            settings: requests.iter().map(SettingSyncItemDto::from).collect(),
        };
        let response = self
            .client
            .post(self.url("/settings/sync"))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;

        let payload = read_envelope::<SyncSettingsResponseDto>(response).await?;
        Ok(payload
            .results
            .into_iter()
            .filter_map(SettingSyncResultDto::into_domain)
            .collect())
    }

    async fn fetch_settings(
        &self,
        user_id: &str,
    ) -> std::result::Result<HashMap<SettingKey, RemoteSettingValue>, RemoteError> {
        let response = self
            .client
            .get(self.url("/settings"))
            .header("Accept", "application/json")
            .query(&[("userId", user_id)])
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;

        let payload = read_envelope::<SettingsResponseDto>(response).await?;
        Ok(payload
            .settings
            .into_iter()
            .filter_map(SettingItemDto::into_domain)
            .collect())
    }
}

impl MessageTransport for HttpRemote {
    fn send_message(&self, message: Message) -> UploadReceiver {
        self.spawn_upload("/messages".to_string(), message)
    }

    fn edit_message(&self, message: Message) -> UploadReceiver {
        let path = format!("/messages/{}", message.id);
        self.spawn_upload(path, message)
    }
}

async fn read_envelope<T: DeserializeOwned>(
    response: Response,
) -> std::result::Result<T, RemoteError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|error| map_transport_error(&error))?;

    if !status.is_success() {
        return Err(parse_api_error(status, &body));
    }

    let envelope: ApiResponse<T> = serde_json::from_str(&body).map_err(|error| {
        tracing::warn!(%error, "Malformed response payload");
        RemoteError::ServerError
    })?;
    envelope.into_result()
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: Option<ErrorResponseDto>,
}

/// Prefer the error envelope's code; fall back to the HTTP status.
fn parse_api_error(status: StatusCode, body: &str) -> RemoteError {
    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        return error.into_remote_error();
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND => RemoteError::ChatNotFound,
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimitExceeded,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => RemoteError::ServerUnreachable,
        status if status.is_server_error() => RemoteError::ServerError,
        status => RemoteError::Unknown {
            code: format!("HTTP_{}", status.as_u16()),
            message: compact_text(body),
        },
    }
}

fn map_transport_error(error: &reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else if error.is_connect() {
        RemoteError::ServerUnreachable
    } else if error.is_decode() || error.is_body() {
        RemoteError::ServerError
    } else {
        RemoteError::NetworkNotAvailable
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("api base url must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "api base url must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_base_url_is_normalized() {
        let remote =
            HttpRemote::new("  https://chat.example.com/v1/ ", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(remote.base_url(), "https://chat.example.com/v1");
        assert_eq!(
            remote.url("/chats/deltas"),
            "https://chat.example.com/v1/chats/deltas"
        );
    }

    #[test]
    fn test_base_url_rejects_invalid_values() {
        assert!(HttpRemote::new("", DEFAULT_REQUEST_TIMEOUT).is_err());
        assert!(HttpRemote::new("chat.example.com", DEFAULT_REQUEST_TIMEOUT).is_err());
    }

    #[test]
    fn test_status_codes_map_to_remote_errors() {
        assert_eq!(
            parse_api_error(StatusCode::UNAUTHORIZED, ""),
            RemoteError::Unauthorized
        );
        assert_eq!(
            parse_api_error(StatusCode::TOO_MANY_REQUESTS, ""),
            RemoteError::RateLimitExceeded
        );
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            RemoteError::ServerError
        );
        assert_eq!(
            parse_api_error(StatusCode::NOT_FOUND, ""),
            RemoteError::ChatNotFound
        );
        assert_eq!(
            parse_api_error(StatusCode::IM_A_TEAPOT, " short and stout "),
            RemoteError::Unknown {
                code: "HTTP_418".to_string(),
                message: "short and stout".to_string(),
            }
        );
    }

    #[test]
    fn test_error_envelope_wins_over_status() {
        let body =
            r#"{ "success": false, "error": { "code": "CHAT_NOT_FOUND", "message": "gone" } }"#;
        assert_eq!(
            parse_api_error(StatusCode::NOT_FOUND, body),
            RemoteError::ChatNotFound
        );
    }

    #[test]
    fn test_unknown_status_body_is_truncated() {
        let body = "x".repeat(500);
        let RemoteError::Unknown { message, .. } = parse_api_error(StatusCode::IM_A_TEAPOT, &body)
        else {
            panic!("expected an unknown error");
        };
        assert_eq!(message.chars().count(), 180);
    }
}
