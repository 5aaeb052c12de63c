//! Comment submission.
//!
//! A [`CommentTransport`] makes one publish attempt. [`CommentSink`] is what
//! the rest of the bot talks to; [`LengthRetrySink`] adds the single
//! truncate-and-retry on an upstream length rejection.

use crate::api::ForumApiClient;
use async_trait::async_trait;
use responder_core::{CoreError, ForumApiError};
use serde_json::Value;
use tracing::{error, info, warn};

/// Upstream hard limit the retry text is cut to.
pub const RETRY_MAX_CHARS: usize = 2800;
/// A newline later than this is preferred as the cut point.
pub const RETRY_MIN_BREAK: usize = 2000;
pub const RETRY_NOTICE: &str = "\n\n(The answer was long, so part of it was omitted.)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Posted,
    LengthRejected,
    Rejected(String),
}

#[async_trait]
pub trait CommentTransport: Send + Sync {
    async fn send(&self, post_id: u64, text: &str) -> Result<SubmitOutcome, CoreError>;
}

#[async_trait]
impl<T: CommentTransport + ?Sized> CommentTransport for std::sync::Arc<T> {
    async fn send(&self, post_id: u64, text: &str) -> Result<SubmitOutcome, CoreError> {
        (**self).send(post_id, text).await
    }
}

#[async_trait]
pub trait CommentSink: Send + Sync {
    /// Publishes `text` under the bot's identity. `false` on any failure.
    async fn submit(&self, post_id: u64, text: &str) -> bool;
}

/// Shortens a length-rejected comment for its one retry.
pub fn shorten_for_retry(text: &str) -> String {
    let mut cut: String = text.chars().take(RETRY_MAX_CHARS).collect();
    if let Some(pos) = cut.rfind('\n') {
        if cut[..pos].chars().count() > RETRY_MIN_BREAK {
            cut.truncate(pos);
        }
    }
    cut.push_str(RETRY_NOTICE);
    cut
}

pub struct LengthRetrySink<T> {
    transport: T,
}

impl<T: CommentTransport> LengthRetrySink<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn attempt(&self, post_id: u64, text: &str) -> Option<SubmitOutcome> {
        match self.transport.send(post_id, text).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Comment submission to #{} failed: {}", post_id, e);
                None
            }
        }
    }
}

#[async_trait]
impl<T: CommentTransport> CommentSink for LengthRetrySink<T> {
    async fn submit(&self, post_id: u64, text: &str) -> bool {
        match self.attempt(post_id, text).await {
            Some(SubmitOutcome::Posted) => {
                info!("Comment posted on #{} ({} chars)", post_id, text.chars().count());
                true
            }
            Some(SubmitOutcome::LengthRejected) => {
                let shorter = shorten_for_retry(text);
                warn!(
                    "Comment on #{} rejected for length, retrying with {} chars",
                    post_id,
                    shorter.chars().count()
                );
                match self.attempt(post_id, &shorter).await {
                    Some(SubmitOutcome::Posted) => {
                        info!("Shortened comment posted on #{}", post_id);
                        true
                    }
                    other => {
                        warn!("Shortened comment on #{} not posted: {:?}", post_id, other);
                        false
                    }
                }
            }
            Some(SubmitOutcome::Rejected(reason)) => {
                warn!("Comment on #{} rejected: {}", post_id, reason);
                false
            }
            None => false,
        }
    }
}

/// Logs instead of posting. Always reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunSink;

#[async_trait]
impl CommentSink for DryRunSink {
    async fn submit(&self, post_id: u64, text: &str) -> bool {
        info!(
            "[dry-run] would comment on #{} ({} chars):\n{}",
            post_id,
            text.chars().count(),
            text
        );
        true
    }
}

/// Maps the comment endpoint's JSON reply to an outcome.
pub fn classify_comment_response(body: &str) -> SubmitOutcome {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return SubmitOutcome::Rejected(format!("unreadable response: {}", preview(body)));
    };

    let error = value
        .pointer("/message/error")
        .or_else(|| value.get("error"))
        .filter(|e| !e.is_null());
    let Some(error) = error else {
        return SubmitOutcome::Posted;
    };

    let code = match error.get("code") {
        Some(Value::String(code)) => code.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let message = error
        .get("msg")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("length") || lowered.contains("too long") || message.contains("글자") {
        SubmitOutcome::LengthRejected
    } else {
        SubmitOutcome::Rejected(format!("{code} {message}").trim().to_string())
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

#[async_trait]
impl CommentTransport for ForumApiClient {
    async fn send(&self, post_id: u64, text: &str) -> Result<SubmitOutcome, CoreError> {
        self.rate_limiter.acquire_permit().await;

        let cafe_id = self.cafe_id.to_string();
        let article_id = post_id.to_string();
        let form = [
            ("cafeId", cafe_id.as_str()),
            ("articleId", article_id.as_str()),
            ("content", text),
            ("requestFrom", "A"),
        ];

        let response = self
            .http_client
            .post(&self.comment_url)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 413 {
            return Ok(SubmitOutcome::LengthRejected);
        }
        if status.as_u16() == 401 {
            return Err(CoreError::ForumApi(ForumApiError::SessionRejected {
                reason: format!("comment endpoint returned {status}"),
            }));
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Ok(SubmitOutcome::Rejected(format!("HTTP {status}: {}", preview(&body))));
        }
        Ok(classify_comment_response(&body))
    }
}
