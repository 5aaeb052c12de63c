//! The main polling cycle.
//!
//! Each cycle scans forward from the cursor, answers eligible posts, and on
//! every N-th cycle runs the watch check. State is persisted after every
//! mutation so a restart resumes exactly where the loop stopped.

use crate::eligibility::{bot_has_commented, is_eligible, Eligibility, EligibilityPolicy};
use crate::watch::{WatchRegistry, WatchReport};
use crate::{pause, Services};
use forum_client::{ArticleScanner, ScanOptions};
use llm_interface::prompt::char_prefix;
use responder_core::{AppConfig, ErrorExt, PollState, Post};
use state_store::StateStore;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    OffBoard,
    Ineligible(Eligibility),
    GenerationFailed,
    SubmitFailed,
    Replied,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub found: usize,
    pub handled: Vec<(u64, PostOutcome)>,
    pub watch: Option<WatchReport>,
}

pub struct PollingLoop {
    services: Services,
    store: StateStore,
    state: PollState,
    scanner: ArticleScanner,
    watches: WatchRegistry,
    policy: EligibilityPolicy,
    board: Option<u64>,
    interval: Duration,
    post_delay: Duration,
    watch_every: u64,
    dry_run: bool,
    cycle: u64,
}

impl PollingLoop {
    pub fn new(
        services: Services,
        store: StateStore,
        state: PollState,
        config: &AppConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            services,
            store,
            state,
            scanner: ArticleScanner::new(ScanOptions::from(&config.polling)),
            watches: WatchRegistry::new(&config.polling, config.forum.bot_identity.clone(), dry_run),
            policy: EligibilityPolicy::from(&config.forum),
            board: (config.forum.board_id != 0).then_some(config.forum.board_id),
            interval: Duration::from_secs(config.polling.interval_secs),
            post_delay: Duration::from_millis(config.polling.post_delay_ms),
            watch_every: config.polling.watch_every_cycles.max(1),
            dry_run,
            cycle: 0,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn into_state(self) -> PollState {
        self.state
    }

    /// Moves the scan cursor to `start_id`. A fresh state accepts any value;
    /// otherwise the cursor only moves forward.
    pub async fn apply_start_id(&mut self, start_id: u64, fresh: bool) {
        if fresh {
            self.state.reset_scan_cursor(start_id);
        } else if !self.state.advance_scanned(start_id) {
            warn!(
                "Start id {} is behind the cursor ({}); keeping the cursor",
                start_id,
                self.state.last_scanned_id()
            );
            return;
        }
        info!("Scan cursor set to {}", start_id);
        self.persist().await;
    }

    /// Runs cycles until `cancel` fires, then persists a final time.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        info!(
            "Polling from #{} every {:?} (dry_run={}, watched={})",
            self.state.last_scanned_id() + 1,
            self.interval,
            self.dry_run,
            self.state.watched.len()
        );

        while !cancel.is_cancelled() {
            let report = self.run_cycle(cancel).await;
            debug!("Cycle {} done: {:?}", self.cycle, report);

            if !pause(self.interval, cancel).await {
                break;
            }
        }

        self.persist().await;
        info!("Polling stopped at #{}", self.state.last_scanned_id());
    }

    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        self.cycle += 1;
        info!(
            "Poll #{} (from #{})",
            self.cycle,
            self.state.last_scanned_id() + 1
        );

        let mut report = CycleReport::default();
        let found = self
            .scanner
            .scan(self.services.source.as_ref(), self.state.last_scanned_id(), cancel)
            .await;
        report.found = found.len();
        let max_found = found.iter().map(|p| p.id).max();

        let fresh: Vec<Post> = found
            .into_iter()
            .filter(|p| !self.state.is_processed(p.id))
            .collect();
        if fresh.is_empty() {
            info!("No new posts");
        }

        for (i, post) in fresh.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if i > 0 && !pause(self.post_delay, cancel).await {
                break;
            }
            let id = post.id;
            let outcome = self.handle_post(post).await;
            info!("#{}: {:?}", id, outcome);

            self.state.mark_processed(id);
            self.state.advance_scanned(id);
            self.persist().await;
            report.handled.push((id, outcome));
        }

        if let Some(max_found) = max_found {
            if !cancel.is_cancelled() && self.state.advance_scanned(max_found) {
                self.persist().await;
            }
        }

        if self.cycle % self.watch_every == 0 && !cancel.is_cancelled() {
            let watch = self
                .watches
                .check_all(&mut self.state, &self.store, &self.services, cancel)
                .await;
            report.watch = Some(watch);
        }
        report
    }

    async fn handle_post(&mut self, post: Post) -> PostOutcome {
        info!(
            "#{} [{}] by {} (tier {})",
            post.id,
            char_prefix(&post.subject, 60),
            post.author,
            post.author_tier
        );

        if let Some(board) = self.board {
            if post.board_id != board {
                debug!("#{}: board {} is not monitored", post.id, post.board_id);
                return PostOutcome::OffBoard;
            }
        }

        let verdict = is_eligible(&post, &self.policy);
        if !verdict.is_eligible() {
            info!("#{}: skipped ({})", post.id, verdict);
            return PostOutcome::Ineligible(verdict);
        }

        self.reply_and_watch(&post).await
    }

    async fn reply_and_watch(&mut self, post: &Post) -> PostOutcome {
        let reply = self
            .services
            .drafter
            .draft_reply(&post.subject, &post.body)
            .await;
        if reply.is_empty() {
            error!("#{}: reply generation failed", post.id);
            return PostOutcome::GenerationFailed;
        }
        info!(
            "#{}: reply drafted ({} chars): {}",
            post.id,
            reply.chars().count(),
            char_prefix(&reply, 300)
        );

        if !self.services.sink.submit(post.id, &reply).await {
            error!("#{}: comment submission failed", post.id);
            return PostOutcome::SubmitFailed;
        }

        let comment_count = self.observed_comment_count(post).await;
        self.watches.register(&mut self.state, post, comment_count);
        PostOutcome::Replied
    }

    /// Comment count after our reply, re-read from the forum when possible.
    async fn observed_comment_count(&self, post: &Post) -> usize {
        let expected = post.comment_count() + usize::from(!self.dry_run);
        match self.services.source.fetch_post(post.id, None).await {
            Ok(Some(fresh)) => fresh.comment_count(),
            Ok(None) => expected,
            Err(e) => {
                warn!("#{}: re-fetch after reply failed: {}", post.id, e);
                expected
            }
        }
    }

    /// Answers specific posts regardless of processed history. Posts the bot
    /// already commented on are skipped.
    pub async fn reprocess(&mut self, ids: &[u64], cancel: &CancellationToken) -> Vec<(u64, PostOutcome)> {
        let mut handled = Vec::new();
        for (i, &id) in ids.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if i > 0 && !pause(self.post_delay, cancel).await {
                break;
            }
            info!("Reprocessing #{}", id);
            let post = match self.services.source.fetch_post(id, None).await {
                Ok(Some(post)) => post,
                Ok(None) => {
                    error!("#{}: not found", id);
                    continue;
                }
                Err(e) => {
                    error!("#{}: fetch failed: {}", id, e);
                    continue;
                }
            };

            if self.state.forget_processed(id) {
                debug!("#{}: removed from processed history", id);
            }
            if bot_has_commented(&post, &self.policy.bot_identity) {
                warn!("#{}: already answered, skipping", id);
                handled.push((id, PostOutcome::Ineligible(Eligibility::AlreadyAnswered)));
                continue;
            }

            let outcome = self.reply_and_watch(&post).await;
            self.state.mark_processed(id);
            self.persist().await;
            handled.push((id, outcome));
        }
        self.persist().await;
        handled
    }

    async fn persist(&mut self) {
        if let Err(e) = self.store.save(&mut self.state).await {
            e.log_error();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use tempfile::TempDir;

    fn polling(dir: &TempDir, services: Services, state: PollState, dry_run: bool) -> PollingLoop {
        let store = StateStore::new(dir.path().join("state.json"));
        PollingLoop::new(services, store, state, &config(), dry_run)
    }

    fn cursor_at(id: u64) -> PollState {
        let mut state = PollState::default();
        state.reset_scan_cursor(id);
        state
    }

    #[tokio::test]
    async fn test_cycle_answers_eligible_posts_and_registers_watch() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([post(101, "alice", Vec::new()), post(103, "carol", Vec::new())]);
        let sink = RecordingSink::accepting(source.clone());
        let services = services(source, sink.clone(), ScriptedDrafter::new("Refunds take 30 days.", ""));
        let mut polling = polling(&dir, services, cursor_at(100), false);

        let report = polling.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.found, 2);
        assert_eq!(
            report.handled,
            vec![(101, PostOutcome::Replied), (103, PostOutcome::Replied)]
        );
        assert_eq!(sink.submitted().len(), 2);

        let state = polling.state();
        assert_eq!(state.last_scanned_id(), 103);
        assert!(state.is_processed(101) && state.is_processed(103));
        // re-fetched count includes the bot's comment
        assert_eq!(state.watched[&101].last_comment_count, 1);
        assert_eq!(state.watched[&101].author, "alice");

        let persisted = StateStore::new(dir.path().join("state.json")).load().await;
        assert_eq!(persisted.state.last_scanned_id(), 103);
        assert_eq!(persisted.state.watched.len(), 2);
    }

    #[tokio::test]
    async fn test_off_board_and_ineligible_posts_are_marked_processed() {
        let dir = TempDir::new().unwrap();
        let mut other_board = post(101, "alice", Vec::new());
        other_board.board_id = BOARD + 1;
        let mut locked = post(102, "bob", Vec::new());
        locked.commentable = false;
        let source = FakeSource::with_posts([other_board, locked]);
        let sink = RecordingSink::accepting(source.clone());
        let services = services(source, sink.clone(), ScriptedDrafter::new("answer", ""));
        let mut polling = polling(&dir, services, cursor_at(100), false);

        let report = polling.run_cycle(&CancellationToken::new()).await;

        assert_eq!(
            report.handled,
            vec![
                (101, PostOutcome::OffBoard),
                (102, PostOutcome::Ineligible(Eligibility::CommentsDisabled)),
            ]
        );
        assert!(sink.submitted().is_empty());
        assert!(polling.state().is_processed(101));
        assert!(polling.state().is_processed(102));
        assert!(polling.state().watched.is_empty());
    }

    #[tokio::test]
    async fn test_generation_and_submit_failures_still_mark_processed() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([post(101, "alice", Vec::new())]);
        let services_empty = services(source.clone(), RecordingSink::accepting(source.clone()), ScriptedDrafter::new("", ""));
        let mut polling_a = polling(&dir, services_empty, cursor_at(100), false);
        let report = polling_a.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.handled, vec![(101, PostOutcome::GenerationFailed)]);
        assert!(polling_a.state().is_processed(101));

        let dir_b = TempDir::new().unwrap();
        let services_rejecting = services(source, RecordingSink::rejecting(), ScriptedDrafter::new("answer", ""));
        let mut polling_b = polling(&dir_b, services_rejecting, cursor_at(100), false);
        let report = polling_b.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.handled, vec![(101, PostOutcome::SubmitFailed)]);
        assert!(polling_b.state().is_processed(101));
        assert!(polling_b.state().watched.is_empty());
    }

    #[tokio::test]
    async fn test_processed_posts_are_not_answered_twice() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([post(101, "alice", Vec::new()), post(102, "bob", Vec::new())]);
        let sink = RecordingSink::accepting(source.clone());
        let services = services(source, sink.clone(), ScriptedDrafter::new("answer", ""));
        let mut state = cursor_at(100);
        state.mark_processed(101);
        let mut polling = polling(&dir, services, state, false);

        let report = polling.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.found, 2);
        assert_eq!(report.handled, vec![(102, PostOutcome::Replied)]);
        assert_eq!(sink.submitted(), vec![(102, "answer".to_string())]);
    }

    #[tokio::test]
    async fn test_dry_run_registers_watch_without_counting_reply() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([post(101, "alice", vec![comment(1, "bob", "+1")])]);
        let services = services(source.clone(), RecordingSink::rejecting(), ScriptedDrafter::new("answer", ""));
        let dry_services = Services {
            sink: std::sync::Arc::new(forum_client::DryRunSink),
            ..services
        };
        let mut polling = polling(&dir, dry_services, cursor_at(100), true);

        let report = polling.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.handled, vec![(101, PostOutcome::Replied)]);
        assert_eq!(polling.state().watched[&101].last_comment_count, 1);
    }

    #[tokio::test]
    async fn test_watch_runs_on_every_nth_cycle() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([]);
        let services = services(source.clone(), RecordingSink::accepting(source), ScriptedDrafter::new("", ""));
        let mut polling = polling(&dir, services, cursor_at(100), false);

        let cancel = CancellationToken::new();
        let mut watch_cycles = Vec::new();
        for cycle in 1..=10 {
            if polling.run_cycle(&cancel).await.watch.is_some() {
                watch_cycles.push(cycle);
            }
        }
        assert_eq!(watch_cycles, vec![5, 10]);
        assert_eq!(polling.state().last_scanned_id(), 100);
    }

    #[tokio::test]
    async fn test_reprocess_forces_answer_and_skips_answered() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([
            post(50, "alice", Vec::new()),
            post(51, "bob", vec![comment(1, BOT, "already done")]),
        ]);
        let sink = RecordingSink::accepting(source.clone());
        let services = services(source, sink.clone(), ScriptedDrafter::new("answer", ""));
        let mut state = cursor_at(100);
        state.mark_processed(50);
        let mut polling = polling(&dir, services, state, false);

        let handled = polling.reprocess(&[50, 51, 52], &CancellationToken::new()).await;

        assert_eq!(
            handled,
            vec![
                (50, PostOutcome::Replied),
                (51, PostOutcome::Ineligible(Eligibility::AlreadyAnswered)),
            ]
        );
        assert_eq!(sink.submitted(), vec![(50, "answer".to_string())]);
        assert!(polling.state().is_processed(50));
        assert!(polling.state().watched.contains_key(&50));
        assert_eq!(polling.state().last_scanned_id(), 100);
    }

    #[tokio::test]
    async fn test_reprocess_keeps_history_when_fetch_fails() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([post(60, "alice", Vec::new())]);
        source.fail(60);
        let sink = RecordingSink::accepting(source.clone());
        let services = services(source, sink.clone(), ScriptedDrafter::new("answer", ""));
        let mut state = cursor_at(100);
        state.mark_processed(60);
        state.mark_processed(61);
        let mut polling = polling(&dir, services, state, false);

        let handled = polling.reprocess(&[60, 61], &CancellationToken::new()).await;

        assert!(handled.is_empty());
        assert!(sink.submitted().is_empty());
        assert!(polling.state().is_processed(60));
        assert!(polling.state().is_processed(61));
    }

    #[tokio::test]
    async fn test_start_id_only_moves_forward_on_existing_state() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([]);
        let services = services(source.clone(), RecordingSink::accepting(source), ScriptedDrafter::new("", ""));
        let mut polling = polling(&dir, services, cursor_at(500), false);

        polling.apply_start_id(400, false).await;
        assert_eq!(polling.state().last_scanned_id(), 500);
        polling.apply_start_id(600, false).await;
        assert_eq!(polling.state().last_scanned_id(), 600);
    }

    #[tokio::test]
    async fn test_start_id_seeds_fresh_state() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([]);
        let services = services(source.clone(), RecordingSink::accepting(source), ScriptedDrafter::new("", ""));
        let mut polling = polling(&dir, services, PollState::default(), false);

        polling.apply_start_id(53_285, true).await;
        assert_eq!(polling.state().last_scanned_id(), 53_285);
        let persisted = StateStore::new(dir.path().join("state.json")).load().await;
        assert_eq!(persisted.state.last_scanned_id(), 53_285);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_persists() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::with_posts([post(101, "alice", Vec::new())]);
        let services = services(source.clone(), RecordingSink::accepting(source), ScriptedDrafter::new("answer", ""));
        let store_path = dir.path().join("state.json");
        let mut config = config();
        config.polling.interval_secs = 3600;
        let mut polling = PollingLoop::new(services, StateStore::new(&store_path), cursor_at(100), &config, false);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), polling.run(&cancel))
            .await
            .expect("loop should stop on cancel");

        let persisted = StateStore::new(&store_path).load().await;
        assert_eq!(persisted.state.last_scanned_id(), 101);
        assert!(persisted.state.last_run.is_some());
    }
}
