//! In-memory collaborators for the loop and watch tests.

use crate::{ReplyDrafter, Services};
use async_trait::async_trait;
use forum_client::{CommentSink, PostSource};
use llm_interface::TranscriptEntry;
use responder_core::{AppConfig, Comment, CoreError, ForumApiError, Post};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

pub const BOT: &str = "helper-bot";
pub const BOARD: u64 = 7;

#[derive(Default)]
pub struct FakeSource {
    posts: Mutex<BTreeMap<u64, Post>>,
    failing: Mutex<BTreeSet<u64>>,
}

impl FakeSource {
    pub fn with_posts(posts: impl IntoIterator<Item = Post>) -> Arc<Self> {
        Arc::new(Self {
            posts: Mutex::new(posts.into_iter().map(|p| (p.id, p)).collect()),
            failing: Mutex::default(),
        })
    }

    pub fn put(&self, post: Post) {
        self.posts.lock().unwrap().insert(post.id, post);
    }

    pub fn fail(&self, id: u64) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn add_comment(&self, id: u64, comment: Comment) {
        if let Some(post) = self.posts.lock().unwrap().get_mut(&id) {
            post.comments.push(comment);
        }
    }
}

#[async_trait]
impl PostSource for FakeSource {
    async fn fetch_post(&self, id: u64, _board: Option<u64>) -> Result<Option<Post>, CoreError> {
        if self.failing.lock().unwrap().contains(&id) {
            return Err(ForumApiError::ServerError { status_code: 503 }.into());
        }
        Ok(self.posts.lock().unwrap().get(&id).cloned())
    }
}

/// Records submissions and, when accepting, appends them to the source as
/// bot comments the way the forum would.
pub struct RecordingSink {
    accept: bool,
    source: Option<Arc<FakeSource>>,
    pub submitted: Mutex<Vec<(u64, String)>>,
}

impl RecordingSink {
    pub fn accepting(source: Arc<FakeSource>) -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            source: Some(source),
            submitted: Mutex::default(),
        })
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            source: None,
            submitted: Mutex::default(),
        })
    }

    pub fn submitted(&self) -> Vec<(u64, String)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommentSink for RecordingSink {
    async fn submit(&self, post_id: u64, text: &str) -> bool {
        self.submitted
            .lock()
            .unwrap()
            .push((post_id, text.to_string()));
        if let (true, Some(source)) = (self.accept, &self.source) {
            let next_id = 1_000 + self.submitted.lock().unwrap().len() as u64;
            source.add_comment(post_id, comment(next_id, BOT, text));
        }
        self.accept
    }
}

pub struct ScriptedDrafter {
    pub reply: String,
    pub followup: String,
    pub followups: Mutex<Vec<(Vec<TranscriptEntry>, String)>>,
}

impl ScriptedDrafter {
    pub fn new(reply: &str, followup: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            followup: followup.to_string(),
            followups: Mutex::default(),
        })
    }
}

#[async_trait]
impl ReplyDrafter for ScriptedDrafter {
    async fn draft_reply(&self, _subject: &str, _body: &str) -> String {
        self.reply.clone()
    }

    async fn draft_followup(
        &self,
        _subject: &str,
        _body: &str,
        transcript: &[TranscriptEntry],
        _commenter: &str,
        comment: &str,
    ) -> String {
        self.followups
            .lock()
            .unwrap()
            .push((transcript.to_vec(), comment.to_string()));
        self.followup.clone()
    }
}

pub fn services(
    source: Arc<FakeSource>,
    sink: Arc<RecordingSink>,
    drafter: Arc<ScriptedDrafter>,
) -> Services {
    Services {
        source,
        sink,
        drafter,
    }
}

pub fn post(id: u64, author: &str, comments: Vec<Comment>) -> Post {
    Post {
        id,
        board_id: BOARD,
        author: author.to_string(),
        author_tier: 1,
        subject: format!("Question {id}"),
        body: "How do I get a refund?".to_string(),
        comments,
        readable: true,
        commentable: true,
    }
}

pub fn comment(id: u64, author: &str, text: &str) -> Comment {
    Comment {
        id,
        author: author.to_string(),
        text: text.to_string(),
    }
}

/// Defaults with every pacing delay removed.
pub fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.forum.board_id = BOARD;
    config.forum.bot_identity = BOT.to_string();
    config.polling.probe_delay_ms = 0;
    config.polling.post_delay_ms = 0;
    config.polling.watch_delay_ms = 0;
    config.polling.interval_secs = 0;
    config.polling.max_scan = 20;
    config.polling.max_consecutive_misses = 5;
    config
}
