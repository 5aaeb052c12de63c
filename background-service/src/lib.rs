pub mod drafter;
pub mod eligibility;
pub mod polling;
pub mod sidecar;
pub mod watch;

#[cfg(test)]
mod test_support;

pub use drafter::{IndexLookup, ReplyDrafter};
pub use eligibility::{is_eligible, Eligibility, EligibilityPolicy};
pub use polling::{CycleReport, PollingLoop, PostOutcome};
pub use sidecar::{ReferenceSidecar, SidecarOptions, SidecarState};
pub use watch::{WatchRegistry, WatchReport};

use forum_client::{CommentSink, PostSource};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// External collaborators shared by the polling and watch flows.
#[derive(Clone)]
pub struct Services {
    pub source: Arc<dyn PostSource>,
    pub sink: Arc<dyn CommentSink>,
    pub drafter: Arc<dyn ReplyDrafter>,
}

/// Sleeps for `duration` unless cancelled first. Returns `false` on
/// cancellation.
pub(crate) async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
