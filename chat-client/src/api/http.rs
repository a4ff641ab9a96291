//! reqwest-backed history API.

use super::{ApiError, ConversationApi};
use async_trait::async_trait;
use chrono::SecondsFormat;
use parley_chat_core::PageRequest;
use parley_chat_types::{ChatMessage, MessageId, Reaction};
use reqwest::{RequestBuilder, Url};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ReactionBody<'a> {
    emoji: &'a str,
}

#[derive(Deserialize)]
struct ReactionsBody {
    #[serde(default)]
    reactions: Vec<Reaction>,
}

/// History API over HTTP with a bearer credential.
pub struct HttpConversationApi {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl HttpConversationApi {
    /// Create a client for `base` (e.g. `http://localhost:5001/api`).
    pub fn new(base: impl Into<String>, token: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base,
            token: token.into(),
        }
    }

    /// `{base}/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| ApiError::Request(format!("invalid api base {}: {}", self.base, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Request(format!("invalid api base {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn page_request(&self, request: &PageRequest) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(&["messages", "conversation", request.peer.as_str()])?;
        let mut builder = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("limit", request.limit.to_string())]);
        if let Some(before) = request.before {
            builder = builder.query(&[(
                "before",
                before.to_rfc3339_opts(SecondsFormat::Millis, true),
            )]);
        }
        Ok(builder)
    }

    fn delete_request(&self, id: &MessageId, for_everyone: bool) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(&["messages", id.as_str()])?;
        let mut builder = self.client.delete(url).bearer_auth(&self.token);
        if for_everyone {
            builder = builder.query(&[("forEveryone", "true")]);
        }
        Ok(builder)
    }

    fn reaction_request(&self, id: &MessageId, emoji: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(&["messages", id.as_str(), "reactions"])?;
        Ok(self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&ReactionBody { emoji }))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .ok()
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

impl std::fmt::Debug for HttpConversationApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConversationApi")
            .field("base", &self.base)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

fn request_error(e: reqwest::Error) -> ApiError {
    ApiError::Request(e.to_string())
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<ChatMessage>, ApiError> {
        tracing::debug!(peer = %request.peer, limit = request.limit, "fetching history page");

        let response = self
            .page_request(request)?
            .send()
            .await
            .map_err(request_error)?;
        let body: PageBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(body.messages)
    }

    async fn delete_message(&self, id: &MessageId, for_everyone: bool) -> Result<(), ApiError> {
        let response = self
            .delete_request(id, for_everyone)?
            .send()
            .await
            .map_err(request_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn toggle_reaction(
        &self,
        id: &MessageId,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ApiError> {
        let response = self
            .reaction_request(id, emoji)?
            .send()
            .await
            .map_err(request_error)?;
        let body: ReactionsBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(body.reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parley_chat_types::UserId;

    fn url_of(builder: RequestBuilder) -> String {
        builder.build().unwrap().url().to_string()
    }

    fn newest(peer: &str) -> PageRequest {
        PageRequest {
            peer: UserId::new(peer),
            before: None,
            limit: 20,
        }
    }

    #[test]
    fn newest_page_url() {
        let api = HttpConversationApi::new("http://localhost:5001/api/", "t");
        assert_eq!(
            url_of(api.page_request(&newest("bob")).unwrap()),
            "http://localhost:5001/api/messages/conversation/bob?limit=20"
        );
    }

    #[test]
    fn older_page_url_carries_cursor() {
        let api = HttpConversationApi::new("http://localhost:5001/api", "t");
        let request = PageRequest {
            before: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            ..newest("bob")
        };
        assert_eq!(
            url_of(api.page_request(&request).unwrap()),
            "http://localhost:5001/api/messages/conversation/bob?limit=20&before=2024-03-01T12%3A00%3A00.000Z"
        );
    }

    #[test]
    fn path_segments_are_encoded() {
        let api = HttpConversationApi::new("http://localhost:5001/api", "t");
        assert_eq!(
            url_of(api.page_request(&newest("a b/c?")).unwrap()),
            "http://localhost:5001/api/messages/conversation/a%20b%2Fc%3F?limit=20"
        );
        assert_eq!(
            url_of(api.delete_request(&MessageId::new("m/1"), false).unwrap()),
            "http://localhost:5001/api/messages/m%2F1"
        );
    }

    #[test]
    fn delete_for_everyone_sets_flag() {
        let api = HttpConversationApi::new("http://localhost:5001/api", "t");
        assert_eq!(
            url_of(api.delete_request(&MessageId::new("m1"), true).unwrap()),
            "http://localhost:5001/api/messages/m1?forEveryone=true"
        );
    }

    #[test]
    fn requests_carry_bearer_token() {
        let api = HttpConversationApi::new("http://localhost:5001/api", "secret");
        let request = api
            .reaction_request(&MessageId::new("m1"), "👍")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/api/messages/m1/reactions");
        assert_eq!(request.headers()["authorization"], "Bearer secret");
    }

    #[test]
    fn invalid_base_is_an_error() {
        let api = HttpConversationApi::new("not a url", "t");
        assert!(matches!(
            api.page_request(&newest("bob")),
            Err(ApiError::Request(_))
        ));
    }

    #[test]
    fn debug_redacts_token() {
        let api = HttpConversationApi::new("http://localhost", "super-secret");
        let debug = format!("{:?}", api);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn page_body_tolerates_missing_messages() {
        let body: PageBody = serde_json::from_str("{}").unwrap();
        assert!(body.messages.is_empty());
    }
}
