//! Follow-up monitoring for posts the bot has answered.
//!
//! An entry lives in [`PollState::watched`] while it has checks left. Every
//! check without an actionable author comment spends one, as does a failed
//! generation; attempting to post a follow-up refills the budget.

use crate::{pause, Services};
use llm_interface::TranscriptEntry;
use responder_core::{PollState, PollingConfig, Post, WatchEntry};
use state_store::StateStore;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchReport {
    pub checked: usize,
    pub followups: usize,
    pub removed: usize,
}

pub struct WatchRegistry {
    max_checks: u32,
    delay: Duration,
    bot_identity: String,
    dry_run: bool,
}

impl WatchRegistry {
    pub fn new(config: &PollingConfig, bot_identity: impl Into<String>, dry_run: bool) -> Self {
        Self {
            max_checks: config.watch_max_checks.max(1),
            delay: Duration::from_millis(config.watch_delay_ms),
            bot_identity: bot_identity.into(),
            dry_run,
        }
    }

    pub fn max_checks(&self) -> u32 {
        self.max_checks
    }

    /// Starts (or restarts) monitoring `post` after an initial reply.
    /// `comment_count` should already include the bot's comment.
    pub fn register(&self, state: &mut PollState, post: &Post, comment_count: usize) {
        info!(
            "Watching #{} for follow-ups from {} ({} comments)",
            post.id, post.author, comment_count
        );
        state.watched.insert(
            post.id,
            WatchEntry::new(
                post.author.clone(),
                post.subject.clone(),
                comment_count,
                self.max_checks,
            ),
        );
    }

    /// Runs one check over every entry in id order, persisting after each.
    pub async fn check_all(
        &self,
        state: &mut PollState,
        store: &StateStore,
        services: &Services,
        cancel: &CancellationToken,
    ) -> WatchReport {
        let mut report = WatchReport::default();
        let ids: Vec<u64> = state.watched.keys().copied().collect();
        if ids.is_empty() {
            return report;
        }
        info!("Checking {} watched posts", ids.len());

        for (i, id) in ids.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if i > 0 && !pause(self.delay, cancel).await {
                break;
            }
            let Some(entry) = state.watched.get(&id).cloned() else {
                continue;
            };

            report.checked += 1;
            match self.check_entry(id, entry, services).await {
                Check::Keep(updated) => {
                    state.watched.insert(id, updated);
                }
                Check::Answered(updated) => {
                    report.followups += 1;
                    state.watched.insert(id, updated);
                }
                Check::Remove => {
                    debug!("Stopped watching #{}", id);
                    state.watched.remove(&id);
                    report.removed += 1;
                }
            }

            if let Err(e) = store.save(state).await {
                warn!("Failed to persist watch update for #{}: {}", id, e);
            }
        }
        report
    }

    async fn check_entry(&self, id: u64, mut entry: WatchEntry, services: &Services) -> Check {
        if entry.checks_remaining == 0 {
            debug!("#{}: watch budget exhausted", id);
            return Check::Remove;
        }

        let post = match services.source.fetch_post(id, None).await {
            Ok(Some(post)) => post,
            Ok(None) => {
                debug!("#{}: not found during watch check", id);
                return spend_check(entry);
            }
            Err(e) => {
                warn!("#{}: watch fetch failed: {}", id, e);
                return spend_check(entry);
            }
        };

        let current = post.comment_count();
        if current <= entry.last_comment_count {
            return spend_check(entry);
        }
        info!(
            "#{}: new comments ({} -> {})",
            id, entry.last_comment_count, current
        );

        let Some(last_bot_id) = post.last_comment_id_by(&self.bot_identity) else {
            info!("#{}: bot comment no longer present, dropping watch", id);
            return Check::Remove;
        };

        let latest = post
            .comments_by(&entry.author)
            .filter(|c| c.id > last_bot_id && !c.text.trim().is_empty())
            .last();
        let Some(latest) = latest else {
            entry.last_comment_count = current;
            return spend_check(entry);
        };

        info!("#{}: follow-up from {} detected", id, entry.author);
        let transcript = self.transcript(&post, &entry.author);
        let reply = services
            .drafter
            .draft_followup(&entry.subject, &post.body, &transcript, &entry.author, &latest.text)
            .await;

        if reply.is_empty() {
            error!("#{}: follow-up generation failed", id);
            entry.last_comment_count = current;
            return spend_check(entry);
        }

        let posted = if services.sink.submit(id, &reply).await {
            info!("#{}: follow-up posted ({} chars)", id, reply.chars().count());
            true
        } else {
            error!("#{}: follow-up submission failed", id);
            false
        };

        entry.last_comment_count = current + usize::from(posted && !self.dry_run);
        entry.checks_remaining = self.max_checks;
        Check::Answered(entry)
    }

    /// Bot and author comments in id order.
    fn transcript(&self, post: &Post, author: &str) -> Vec<TranscriptEntry> {
        post.comments
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .filter_map(|c| {
                let is_bot = !self.bot_identity.is_empty() && c.author == self.bot_identity;
                (is_bot || c.author == author).then(|| TranscriptEntry {
                    author: c.author.clone(),
                    text: c.text.clone(),
                    is_bot,
                })
            })
            .collect()
    }
}

enum Check {
    Keep(WatchEntry),
    /// A follow-up was submitted; the budget is refilled.
    Answered(WatchEntry),
    Remove,
}

fn spend_check(mut entry: WatchEntry) -> Check {
    entry.checks_remaining = entry.checks_remaining.saturating_sub(1);
    if entry.checks_remaining > 0 {
        Check::Keep(entry)
    } else {
        Check::Remove
    }
}
