//! New-post discovery by sequential id probing.
//!
//! The forum has no "posts since X" feed, so ids past the last one seen are
//! fetched one by one until a run of misses suggests the end.

use crate::api::PostSource;
use responder_core::{PollingConfig, Post};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub max_scan: u64,
    pub max_consecutive_misses: u32,
    pub probe_delay: Duration,
    /// Only posts on this board are returned. Posts elsewhere still reset the
    /// miss counter.
    pub board: Option<u64>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_scan: 100,
            max_consecutive_misses: 50,
            probe_delay: Duration::from_millis(300),
            board: None,
        }
    }
}

impl From<&PollingConfig> for ScanOptions {
    fn from(config: &PollingConfig) -> Self {
        Self {
            max_scan: config.max_scan,
            max_consecutive_misses: config.max_consecutive_misses,
            probe_delay: Duration::from_millis(config.probe_delay_ms),
            board: None,
        }
    }
}

pub struct ArticleScanner {
    options: ScanOptions,
}

impl ArticleScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Probes `last_scanned_id + 1 ..= last_scanned_id + max_scan` in order
    /// and returns the posts found, ascending by id.
    ///
    /// Fetch errors count as misses. Stops early after
    /// `max_consecutive_misses` misses in a row or on cancellation.
    pub async fn scan(
        &self,
        source: &dyn PostSource,
        last_scanned_id: u64,
        cancel: &CancellationToken,
    ) -> Vec<Post> {
        let mut found = Vec::new();
        let mut consecutive_misses = 0u32;

        for offset in 1..=self.options.max_scan {
            if cancel.is_cancelled() {
                debug!("Scan cancelled at offset {}", offset);
                break;
            }
            let id = last_scanned_id.saturating_add(offset);

            match source.fetch_post(id, None).await {
                Ok(Some(post)) => {
                    consecutive_misses = 0;
                    match self.options.board {
                        Some(board) if post.board_id != board => {
                            debug!("Skipping #{} on board {}", id, post.board_id);
                        }
                        _ => {
                            info!("Found new post #{} (board {})", id, post.board_id);
                            found.push(post);
                        }
                    }
                }
                Ok(None) => {
                    consecutive_misses += 1;
                }
                Err(e) => {
                    warn!("Probe of #{} failed: {}", id, e);
                    consecutive_misses += 1;
                }
            }

            if consecutive_misses >= self.options.max_consecutive_misses {
                info!(
                    "#{}: {} consecutive misses, stopping scan",
                    id, consecutive_misses
                );
                break;
            }

            if offset < self.options.max_scan && !self.options.probe_delay.is_zero() {
                tokio::time::sleep(self.options.probe_delay).await;
            }
        }

        found
    }
}
