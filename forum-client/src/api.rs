use crate::html;
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, REFERER};
use reqwest::{Client, StatusCode};
use responder_core::{Comment, CoreError, ForumApiError, ForumConfig, Post};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Point lookup of a single post with its comments.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// `Ok(None)` covers deleted, unpublished, not-yet-created and
    /// no-permission posts alike.
    async fn fetch_post(&self, id: u64, board: Option<u64>) -> Result<Option<Post>, CoreError>;
}

#[derive(Debug, Deserialize)]
struct ArticleEnvelope {
    result: Option<ArticleResult>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ArticleResult {
    article: ArticleData,
    #[serde(default)]
    comments: CommentPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticleData {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    writer: WriterData,
    #[serde(default)]
    menu: MenuData,
    #[serde(default = "default_true")]
    is_readable: bool,
    #[serde(default = "default_true")]
    is_write_comment: bool,
    #[serde(default)]
    content_html: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriterData {
    #[serde(default)]
    nick: String,
    #[serde(default)]
    member_level: i64,
}

#[derive(Debug, Default, Deserialize)]
struct MenuData {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommentPage {
    #[serde(default)]
    items: Vec<CommentData>,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    writer: WriterData,
    #[serde(default)]
    content: String,
}

fn default_true() -> bool {
    true
}

impl ArticleResult {
    fn into_post(self, id: u64) -> Post {
        let mut comments: Vec<Comment> = self
            .comments
            .items
            .into_iter()
            .map(|c| Comment {
                id: c.id,
                author: c.writer.nick,
                text: html::clean_comment(&c.content),
            })
            .collect();
        comments.sort_by_key(|c| c.id);

        Post {
            id,
            board_id: self.article.menu.id,
            author: self.article.writer.nick,
            author_tier: self.article.writer.member_level,
            subject: self.article.subject,
            body: html::to_plain_text(&self.article.content_html),
            comments,
            readable: self.article.is_readable,
            commentable: self.article.is_write_comment,
        }
    }
}

/// Parses an article-detail response body. A body without `result` is an
/// absent post.
pub fn parse_article(id: u64, body: &str) -> Result<Option<Post>, CoreError> {
    let envelope: ArticleEnvelope = serde_json::from_str(body).map_err(|e| {
        CoreError::ForumApi(ForumApiError::InvalidResponse {
            details: format!("article {id}: {e}"),
        })
    })?;

    match envelope.result {
        Some(result) => {
            debug!(
                "Article #{} on board {} ({})",
                id, result.article.menu.id, result.article.menu.name
            );
            Ok(Some(result.into_post(id)))
        }
        None => {
            debug!("Article #{} has no result: {:?}", id, envelope.message);
            Ok(None)
        }
    }
}

/// HTTP client for the forum's article-detail and comment endpoints,
/// authenticated with a browser session cookie.
#[derive(Debug)]
pub struct ForumApiClient {
    pub(crate) http_client: Client,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) retry: RetryExecutor,
    pub(crate) cafe_id: u64,
    article_url: String,
    pub(crate) comment_url: String,
}

impl ForumApiClient {
    pub fn new(config: &ForumConfig) -> Result<Self, CoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(config.session_cookie.trim()).map_err(|_| CoreError::InvalidInput {
                message: "session cookie contains invalid header characters".to_string(),
            })?,
        );
        if let Ok(referer) = HeaderValue::from_str(&config.referer) {
            headers.insert(REFERER, referer);
        }

        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(RateLimitConfig::forum()),
            retry: RetryExecutor::new(RetryConfig::forum()),
            cafe_id: config.cafe_id,
            article_url: config.article_url.clone(),
            comment_url: config.comment_url.clone(),
        })
    }

    /// Detail URL for `id`. The board parameter is left out when `None`,
    /// which makes the endpoint answer for any board.
    pub fn article_url(&self, id: u64, board: Option<u64>) -> Result<Url, CoreError> {
        let raw = self
            .article_url
            .replace("{cafe_id}", &self.cafe_id.to_string())
            .replace("{article_id}", &id.to_string());
        let mut url = Url::parse(&raw).map_err(|e| CoreError::InvalidInput {
            message: format!("article url {raw}: {e}"),
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("query", "");
            if let Some(board) = board {
                query.append_pair("menuId", &board.to_string());
            }
            query
                .append_pair("boardType", "L")
                .append_pair("useCafeId", "true")
                .append_pair("requestFrom", "A");
        }
        Ok(url)
    }

    async fn request_article(&self, id: u64, board: Option<u64>) -> Result<Option<Post>, CoreError> {
        let url = self.article_url(id, board)?;
        self.rate_limiter.acquire_permit().await;

        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::ForumApi(ForumApiError::RequestTimeout)
            } else {
                CoreError::Network(e)
            }
        })?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {
                debug!("Article #{} unavailable ({})", id, status);
                return Ok(None);
            }
            StatusCode::UNAUTHORIZED => {
                return Err(CoreError::ForumApi(ForumApiError::SessionRejected {
                    reason: format!("HTTP {status}"),
                }));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!("Rate limited, retry after {} seconds", retry_after);
                return Err(CoreError::ForumApi(ForumApiError::RateLimitExceeded { retry_after }));
            }
            s if s.is_server_error() => {
                return Err(CoreError::ForumApi(ForumApiError::ServerError {
                    status_code: s.as_u16(),
                }));
            }
            other => {
                warn!("Article #{}: unexpected HTTP {}", id, other);
                return Ok(None);
            }
        }

        let body = response.text().await?;
        parse_article(id, &body)
    }

    /// Fetches `article_id` once and reports whether the session works.
    /// Only a rejected session is an error; an absent post still proves the
    /// transport is up.
    pub async fn test_connection(&self, article_id: u64) -> Result<bool, CoreError> {
        info!("Testing forum connection with article #{}", article_id);
        match self.fetch_post(article_id, None).await {
            Ok(Some(post)) => {
                info!(
                    "Forum connection ok: [{}] by {} (board {})",
                    post.subject, post.author, post.board_id
                );
                Ok(true)
            }
            Ok(None) => {
                warn!("Connection test article #{} not visible", article_id);
                Ok(false)
            }
            Err(e @ CoreError::ForumApi(ForumApiError::SessionRejected { .. })) => {
                error!("Forum session rejected: {}", e);
                Err(e)
            }
            Err(e) => {
                warn!("Forum connection test failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl PostSource for ForumApiClient {
    async fn fetch_post(&self, id: u64, board: Option<u64>) -> Result<Option<Post>, CoreError> {
        self.retry
            .execute("fetch_post", || self.request_article(id, board))
            .await
    }
}
