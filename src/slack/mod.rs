//! Slack Web API client.
//!
//! A thin typed layer over the handful of Web API methods the gateway calls.
//! One [`Client`] is built per IRC connection; it owns the reqwest client
//! (and thus the connection pool), the token, and the optional auth cookie.
//! The cookie is interposed on requests only when the URL scheme is https.

pub mod rtm;
pub mod types;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

pub use types::*;

/// Upper bound on attempts against a rate-limited Slack API method.
pub const MAX_SLACK_API_ATTEMPTS: usize = 3;

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

#[derive(Debug, Error)]
pub enum Error {
    /// `ok: false` reply; carries Slack's error token.
    #[error("slack API error: {0}")]
    Api(String),
    /// HTTP 429; carries the server-advised delay.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
    #[error("{what}: exceeded {MAX_SLACK_API_ATTEMPTS} attempts with the Slack API")]
    AttemptsExhausted { what: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("fetched {got} of {want} requested records")]
    Incomplete { got: usize, want: usize },
    #[error("operation cancelled")]
    Cancelled,
}

/// Run an idempotent Slack API operation, sleeping out rate limits for the
/// server-advised delay, at most [`MAX_SLACK_API_ATTEMPTS`] attempts.
pub async fn retry_rate_limited<T, F, Fut>(what: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(Error::RateLimited(delay)) => {
                attempt += 1;
                if attempt >= MAX_SLACK_API_ATTEMPTS {
                    return Err(Error::AttemptsExhausted {
                        what: what.to_string(),
                    });
                }
                tracing::warn!(%what, ?delay, attempt, "hit Slack API rate limiter, waiting");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    payload: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseMetadata {
    next_cursor: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsersListPayload {
    members: Vec<User>,
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsersInfoPayload {
    user: Option<User>,
    users: Option<Vec<User>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConversationsListPayload {
    channels: Vec<Conversation>,
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelPayload {
    channel: Conversation,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MembersPayload {
    members: Vec<String>,
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LeavePayload {
    not_in_channel: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessagesPayload {
    messages: Vec<MessageItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmptyPayload {}

/// One page of a cursor-paginated listing.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Empty when this is the last page.
    pub next_cursor: String,
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
    cookie: String,
    debug: bool,
}

impl Client {
    pub fn new(token: &str, cookie: &str, debug: bool) -> Result<Self, Error> {
        Self::with_base_url(token, cookie, debug, DEFAULT_BASE_URL)
    }

    /// Build a client against a non-default endpoint (used by tests).
    pub fn with_base_url(
        token: &str,
        cookie: &str,
        debug: bool,
        base_url: &str,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            cookie: cookie.to_string(),
            debug,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = format!("{}/{}", self.base_url, method);
        let mut req = self.http.post(&url).bearer_auth(&self.token).form(params);
        if !self.cookie.is_empty() {
            // The auth cookie travels only over TLS.
            if url.starts_with("https://") {
                req = req.header(reqwest::header::COOKIE, &self.cookie);
            } else {
                tracing::warn!(%method, "cookie is set but endpoint is not https, skipping");
            }
        }
        if self.debug {
            tracing::debug!(%method, ?params, "slack API request");
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(Error::RateLimited(Duration::from_secs(retry_after)));
        }
        let body = resp.text().await?;
        if self.debug {
            tracing::debug!(%method, %body, "slack API response");
        }
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        if !envelope.ok {
            return Err(Error::Api(
                envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(envelope.payload)
    }

    /// `rtm.connect`: identity, team and the RTM WebSocket URL.
    pub async fn rtm_connect(&self) -> Result<RtmConnectInfo, Error> {
        self.call("rtm.connect", &[]).await
    }

    /// One page of `users.list`. A `limit` of 0 uses Slack's default.
    pub async fn users_list(&self, cursor: &str, limit: usize) -> Result<Page<User>, Error> {
        let mut params = vec![("cursor", cursor.to_string())];
        if limit > 0 {
            params.push(("limit", limit.to_string()));
        }
        let payload: UsersListPayload = self.call("users.list", &params).await?;
        Ok(Page {
            items: payload.members,
            next_cursor: payload.response_metadata.next_cursor,
        })
    }

    /// `users.info` for one or more ids.
    pub async fn users_info(&self, ids: &[String]) -> Result<Vec<User>, Error> {
        let payload: UsersInfoPayload = self
            .call("users.info", &[("users", ids.join(","))])
            .await?;
        Ok(payload
            .users
            .or_else(|| payload.user.map(|u| vec![u]))
            .unwrap_or_default())
    }

    /// `users.info` for a single id.
    pub async fn user_info(&self, id: &str) -> Result<User, Error> {
        let payload: UsersInfoPayload = self.call("users.info", &[("user", id.to_string())]).await?;
        payload
            .user
            .ok_or_else(|| Error::Api("user_not_found".to_string()))
    }

    /// One page of `conversations.list` for the given comma-separated types.
    pub async fn conversations_list(
        &self,
        types: &str,
        cursor: &str,
        limit: usize,
    ) -> Result<Page<Conversation>, Error> {
        let mut params = vec![("types", types.to_string()), ("cursor", cursor.to_string())];
        if limit > 0 {
            params.push(("limit", limit.to_string()));
        }
        let payload: ConversationsListPayload = self.call("conversations.list", &params).await?;
        Ok(Page {
            items: payload.channels,
            next_cursor: payload.response_metadata.next_cursor,
        })
    }

    /// `conversations.info` for a single conversation id.
    pub async fn conversation_info(
        &self,
        id: &str,
        include_num_members: bool,
    ) -> Result<Conversation, Error> {
        let payload: ChannelPayload = self
            .call(
                "conversations.info",
                &[
                    ("channel", id.to_string()),
                    ("include_num_members", include_num_members.to_string()),
                ],
            )
            .await?;
        Ok(payload.channel)
    }

    /// One page of `conversations.members`.
    pub async fn conversation_members(
        &self,
        id: &str,
        cursor: &str,
        limit: usize,
    ) -> Result<Page<String>, Error> {
        let payload: MembersPayload = self
            .call(
                "conversations.members",
                &[
                    ("channel", id.to_string()),
                    ("cursor", cursor.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(Page {
            items: payload.members,
            next_cursor: payload.response_metadata.next_cursor,
        })
    }

    /// `conversations.join` by channel name or id.
    pub async fn conversations_join(&self, channel: &str) -> Result<Conversation, Error> {
        let payload: ChannelPayload = self
            .call("conversations.join", &[("channel", channel.to_string())])
            .await?;
        Ok(payload.channel)
    }

    /// `conversations.leave`. Returns true when we were not in the channel.
    pub async fn conversations_leave(&self, id: &str) -> Result<bool, Error> {
        let payload: LeavePayload = self
            .call("conversations.leave", &[("channel", id.to_string())])
            .await?;
        Ok(payload.not_in_channel)
    }

    /// `conversations.setPurpose`; returns the updated conversation.
    pub async fn set_purpose(&self, id: &str, purpose: &str) -> Result<Conversation, Error> {
        let payload: ChannelPayload = self
            .call(
                "conversations.setPurpose",
                &[
                    ("channel", id.to_string()),
                    ("purpose", purpose.to_string()),
                ],
            )
            .await?;
        Ok(payload.channel)
    }

    /// `conversations.history` around a timestamp.
    pub async fn conversation_history(
        &self,
        channel: &str,
        latest: &str,
        limit: usize,
        inclusive: bool,
    ) -> Result<Vec<MessageItem>, Error> {
        let payload: MessagesPayload = self
            .call(
                "conversations.history",
                &[
                    ("channel", channel.to_string()),
                    ("latest", latest.to_string()),
                    ("limit", limit.to_string()),
                    ("inclusive", inclusive.to_string()),
                ],
            )
            .await?;
        Ok(payload.messages)
    }

    /// `conversations.replies`: the thread rooted at `ts`, opener first.
    pub async fn conversation_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Vec<MessageItem>, Error> {
        let payload: MessagesPayload = self
            .call(
                "conversations.replies",
                &[("channel", channel.to_string()), ("ts", ts.to_string())],
            )
            .await?;
        Ok(payload.messages)
    }

    /// `chat.postMessage` as the authenticated user, optionally into a thread.
    pub async fn post_message(
        &self,
        target: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), Error> {
        let mut params = vec![
            ("channel", target.to_string()),
            ("text", text.to_string()),
            ("as_user", "true".to_string()),
        ];
        if let Some(ts) = thread_ts {
            params.push(("thread_ts", ts.to_string()));
        }
        let _: EmptyPayload = self.call("chat.postMessage", &params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_error_reply() {
        let e: Envelope<EmptyPayload> =
            serde_json::from_str(r#"{"ok": false, "error": "invalid_auth"}"#).unwrap();
        assert!(!e.ok);
        assert_eq!(e.error.as_deref(), Some("invalid_auth"));
    }

    #[test]
    fn envelope_users_list() {
        let e: Envelope<UsersListPayload> = serde_json::from_str(
            r#"{"ok": true, "members": [{"id": "UABCD", "name": "insomniac"}], "response_metadata": {"next_cursor": ""}}"#,
        )
        .unwrap();
        assert!(e.ok);
        assert_eq!(e.payload.members.len(), 1);
        assert_eq!(e.payload.members[0].name, "insomniac");
        assert!(e.payload.response_metadata.next_cursor.is_empty());
    }

    #[tokio::test]
    async fn retry_gives_up_after_bounded_attempts() {
        let mut calls = 0usize;
        let result: Result<(), Error> = retry_rate_limited("test", || {
            calls += 1;
            async { Err(Error::RateLimited(Duration::from_millis(1))) }
        })
        .await;
        assert!(matches!(result, Err(Error::AttemptsExhausted { .. })));
        assert_eq!(calls, MAX_SLACK_API_ATTEMPTS);
    }

    #[tokio::test]
    async fn retry_passes_through_success() {
        let result = retry_rate_limited("test", || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retry_passes_through_other_errors() {
        let result: Result<(), Error> =
            retry_rate_limited("test", || async { Err(Error::Api("oops".to_string())) }).await;
        assert!(matches!(result, Err(Error::Api(_))));
    }
}
