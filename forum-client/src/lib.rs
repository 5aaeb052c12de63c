pub mod api;
pub mod html;
pub mod poster;
pub mod rate_limiter;
pub mod retry;
pub mod scanner;

pub use api::{ForumApiClient, PostSource};
pub use poster::{CommentSink, CommentTransport, DryRunSink, LengthRetrySink, SubmitOutcome};
pub use scanner::{ArticleScanner, ScanOptions};
