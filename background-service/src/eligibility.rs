use responder_core::{ForumConfig, Post};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EligibilityPolicy {
    /// Empty accepts every tier.
    pub allowed_tiers: BTreeSet<i64>,
    pub bot_identity: String,
}

impl From<&ForumConfig> for EligibilityPolicy {
    fn from(config: &ForumConfig) -> Self {
        Self {
            allowed_tiers: config.allowed_tiers.clone(),
            bot_identity: config.bot_identity.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    TierNotAllowed(i64),
    Unreadable,
    CommentsDisabled,
    AlreadyAnswered,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eligibility::Eligible => write!(f, "eligible"),
            Eligibility::TierNotAllowed(tier) => write!(f, "author tier {tier} not allowed"),
            Eligibility::Unreadable => write!(f, "post not readable"),
            Eligibility::CommentsDisabled => write!(f, "comments disabled"),
            Eligibility::AlreadyAnswered => write!(f, "already answered by the bot"),
        }
    }
}

/// Decides whether `post` should get an automated answer.
pub fn is_eligible(post: &Post, policy: &EligibilityPolicy) -> Eligibility {
    if !policy.allowed_tiers.is_empty() && !policy.allowed_tiers.contains(&post.author_tier) {
        return Eligibility::TierNotAllowed(post.author_tier);
    }
    if !post.readable {
        return Eligibility::Unreadable;
    }
    if !post.commentable {
        return Eligibility::CommentsDisabled;
    }
    if bot_has_commented(post, &policy.bot_identity) {
        return Eligibility::AlreadyAnswered;
    }
    Eligibility::Eligible
}

pub(crate) fn bot_has_commented(post: &Post, bot_identity: &str) -> bool {
    !bot_identity.is_empty() && post.comments_by(bot_identity).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use responder_core::Comment;

    fn post() -> Post {
        Post {
            id: 101,
            board_id: 7,
            author: "alice".to_string(),
            author_tier: 1,
            subject: "Refunds".to_string(),
            body: "How do I get a refund?".to_string(),
            comments: Vec::new(),
            readable: true,
            commentable: true,
        }
    }

    fn policy() -> EligibilityPolicy {
        EligibilityPolicy {
            allowed_tiers: BTreeSet::new(),
            bot_identity: "helper-bot".to_string(),
        }
    }

    #[test]
    fn test_plain_post_is_eligible() {
        assert_eq!(is_eligible(&post(), &policy()), Eligibility::Eligible);
    }

    #[test]
    fn test_tier_allow_set() {
        let mut policy = policy();
        policy.allowed_tiers = [2, 3].into_iter().collect();
        assert_eq!(is_eligible(&post(), &policy), Eligibility::TierNotAllowed(1));

        let mut senior = post();
        senior.author_tier = 3;
        assert!(is_eligible(&senior, &policy).is_eligible());
    }

    #[test]
    fn test_flags_reject() {
        let mut hidden = post();
        hidden.readable = false;
        assert_eq!(is_eligible(&hidden, &policy()), Eligibility::Unreadable);

        let mut locked = post();
        locked.commentable = false;
        assert_eq!(is_eligible(&locked, &policy()), Eligibility::CommentsDisabled);
    }

    #[test]
    fn test_self_reply_rejected() {
        let mut answered = post();
        answered.comments.push(Comment {
            id: 5,
            author: "someone".to_string(),
            text: "me too".to_string(),
        });
        assert!(is_eligible(&answered, &policy()).is_eligible());

        answered.comments.push(Comment {
            id: 9,
            author: "helper-bot".to_string(),
            text: "Refunds take 30 days.".to_string(),
        });
        assert_eq!(is_eligible(&answered, &policy()), Eligibility::AlreadyAnswered);
    }

    #[test]
    fn test_empty_bot_identity_never_matches() {
        let mut anonymous = post();
        anonymous.comments.push(Comment {
            id: 1,
            author: String::new(),
            text: "?".to_string(),
        });
        let policy = EligibilityPolicy::default();
        assert!(is_eligible(&anonymous, &policy).is_eligible());
    }
}
