use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Forum API error: {0}")]
    ForumApi(#[from] ForumApiError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<std::time::Duration>,
    },

    #[error("Request failed: {message}")]
    RequestFailed {
        message: String,
        status_code: Option<u16>,
    },
}

#[derive(Error, Debug, Clone)]
pub enum ForumApiError {
    #[error("Session cookie rejected: {reason}")]
    SessionRejected { reason: String },

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("Article not found: {article_id}")]
    ArticleNotFound { article_id: u64 },

    #[error("Comment rejected for article {article_id}: {reason}")]
    CommentRejected { article_id: u64, reason: String },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State file unreadable: {path}")]
    Unreadable { path: String },

    #[error("State file corrupt: {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Failed to persist state to {path}: {reason}")]
    PersistFailed { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API key invalid or missing for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Rate limit exceeded for {provider}. Retry after {retry_after} seconds")]
    RateLimitExceeded { provider: String, retry_after: u64 },

    #[error("Request rejected by {provider} ({status_code}): {message}")]
    RequestRejected {
        provider: String,
        status_code: u16,
        message: String,
    },

    #[error("Provider service unavailable: {provider}")]
    ServiceUnavailable { provider: String },

    #[error("Request timeout for {provider}")]
    RequestTimeout { provider: String },

    #[error("Invalid response format from {provider}")]
    InvalidResponseFormat { provider: String },

    #[error("Every dispatch level failed")]
    DispatchExhausted,
}

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Knowledge source not found: {path}")]
    SourceNotFound { path: String },

    #[error("Failed to read knowledge file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("File is outside the knowledge root or has an unsupported type: {file_name}")]
    PathRejected { file_name: String },

    #[error("Reference service unavailable: {reason}")]
    ServiceUnavailable { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
