use responder_core::{
    ConfigError, CoreError, ErrorExt, ForumApiError, KnowledgeError, LlmError, StateError,
};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let forum_error = CoreError::ForumApi(ForumApiError::RequestTimeout);
    assert_eq!(forum_error.error_code(), "FORUM_API");

    let state_error = CoreError::State(StateError::Unreadable {
        path: "state.json".to_string(),
    });
    assert_eq!(state_error.error_code(), "STATE");

    let llm_error = CoreError::Llm(LlmError::InvalidApiKey {
        provider: "anthropic".to_string(),
    });
    assert_eq!(llm_error.error_code(), "LLM");

    let knowledge_error = CoreError::Knowledge(KnowledgeError::PathRejected {
        file_name: "../secret.md".to_string(),
    });
    assert_eq!(knowledge_error.error_code(), "KNOWLEDGE");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "cafe_id".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");
}

#[test]
fn test_retryable_errors() {
    let retryable_error = CoreError::ForumApi(ForumApiError::ServerError { status_code: 503 });
    assert!(retryable_error.is_retryable());

    let not_found = CoreError::ForumApi(ForumApiError::ArticleNotFound { article_id: 10 });
    assert!(!not_found.is_retryable());

    let non_retryable_error = CoreError::Config(ConfigError::MissingField {
        field: "cafe_id".to_string(),
    });
    assert!(!non_retryable_error.is_retryable());
}

#[test]
fn test_retry_after() {
    let rate_limit_error =
        CoreError::ForumApi(ForumApiError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(
        rate_limit_error.retry_after(),
        Some(Duration::from_secs(60))
    );

    let timeout_error = CoreError::Timeout { seconds: 30 };
    assert_eq!(timeout_error.retry_after(), Some(Duration::from_secs(30)));

    let exhausted = CoreError::Llm(LlmError::DispatchExhausted);
    assert_eq!(exhausted.retry_after(), None);
}

#[test]
fn test_error_messages_carry_context() {
    let rejected = CoreError::ForumApi(ForumApiError::CommentRejected {
        article_id: 53290,
        reason: "too long".to_string(),
    });
    let message = rejected.to_string();
    assert!(message.contains("53290"));
    assert!(message.contains("too long"));
}
