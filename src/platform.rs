//! Platform connector boundary. Everything upstream of the pipeline
//! (search) and downstream (posting replies, reading engagement) goes
//! through this trait so the pipeline never touches a platform API
//! directly.

use async_trait::async_trait;

use crate::error::{ReplyscoutError, Result};
use crate::models::{Engagement, PlatformPost};

/// A search issued against a platform
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub label: String,
    /// Only return posts newer than this platform id, when supported
    pub since_id: Option<String>,
    pub max_results: u32,
}

/// Result of posting a reply
#[derive(Debug, Clone)]
pub struct SentReply {
    /// Platform id of the reply that was created
    pub post_id: String,
}

/// Connector for one social platform
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    /// Platform identifier stored alongside collected posts ("x", "mock", ...)
    fn name(&self) -> &str;

    /// Run a search, newest posts first
    async fn search(&self, query: &SearchQuery) -> Result<Vec<PlatformPost>>;

    /// Post a reply to the given platform post id
    async fn post_reply(&self, in_reply_to: &str, text: &str) -> Result<SentReply>;

    /// Current engagement numbers for a post we created
    async fn fetch_engagement(&self, post_id: &str) -> Result<Engagement>;
}

/// In-memory platform used by tests and dry runs. Searches return
/// scripted posts; replies are recorded, with optional scripted
/// failures.
pub struct MockPlatform {
    posts: std::sync::Mutex<Vec<PlatformPost>>,
    sent: std::sync::Mutex<Vec<(String, String)>>,
    fail_sends: std::sync::atomic::AtomicU32,
    fail_searches: std::sync::atomic::AtomicU32,
    next_id: std::sync::atomic::AtomicU64,
}

impl MockPlatform {
    pub fn new(posts: Vec<PlatformPost>) -> Self {
        Self {
            posts: std::sync::Mutex::new(posts),
            sent: std::sync::Mutex::new(Vec::new()),
            fail_sends: std::sync::atomic::AtomicU32::new(0),
            fail_searches: std::sync::atomic::AtomicU32::new(0),
            next_id: std::sync::atomic::AtomicU64::new(9000),
        }
    }

    /// Make the next `count` post_reply calls fail
    pub fn fail_next_sends(&self, count: u32) {
        self.fail_sends
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make the next `count` search calls fail
    pub fn fail_next_searches(&self, count: u32) {
        self.fail_searches
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    /// Replies recorded so far as (in_reply_to, text)
    pub fn sent_replies(&self) -> Vec<(String, String)> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Add posts that later searches will return
    pub fn add_posts(&self, mut posts: Vec<PlatformPost>) {
        match self.posts.lock() {
            Ok(mut guard) => guard.append(&mut posts),
            Err(poisoned) => poisoned.into_inner().append(&mut posts),
        }
    }
}

#[async_trait]
impl SocialPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PlatformPost>> {
        let remaining = self.fail_searches.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.fail_searches
                .store(remaining - 1, std::sync::atomic::Ordering::SeqCst);
            return Err(ReplyscoutError::Platform(
                "scripted search failure".to_string(),
            ));
        }

        let posts = match self.posts.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let mut matched: Vec<PlatformPost> = posts
            .into_iter()
            .filter(|p| {
                let newer = match &query.since_id {
                    Some(since) => p.id.as_str() > since.as_str(),
                    None => true,
                };
                newer
                    && query
                        .query
                        .split_whitespace()
                        .any(|term| p.text.to_lowercase().contains(&term.to_lowercase()))
            })
            .collect();

        // Newest first, matching real platform search ordering
        matched.sort_by(|a, b| b.id.cmp(&a.id));
        matched.truncate(query.max_results as usize);
        Ok(matched)
    }

    async fn post_reply(&self, in_reply_to: &str, text: &str) -> Result<SentReply> {
        let remaining = self.fail_sends.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.fail_sends
                .store(remaining - 1, std::sync::atomic::Ordering::SeqCst);
            return Err(ReplyscoutError::Platform(
                "scripted send failure".to_string(),
            ));
        }

        match self.sent.lock() {
            Ok(mut guard) => guard.push((in_reply_to.to_string(), text.to_string())),
            Err(poisoned) => poisoned
                .into_inner()
                .push((in_reply_to.to_string(), text.to_string())),
        }

        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(SentReply {
            post_id: format!("mock-reply-{id}"),
        })
    }

    async fn fetch_engagement(&self, _post_id: &str) -> Result<Engagement> {
        Ok(Engagement {
            likes: 2,
            retweets: 0,
            replies: 1,
            views: 40,
        })
    }
}

/// File-backed platform for local runs: searches replay posts from a
/// JSON fixture, and replies are appended to an outbox file instead of
/// going anywhere. The real connector lives outside this crate.
pub struct ReplayPlatform {
    inner: MockPlatform,
    outbox: std::path::PathBuf,
}

impl ReplayPlatform {
    pub fn open(posts_file: &std::path::Path, outbox: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(posts_file)?;
        let posts: Vec<PlatformPost> = serde_json::from_str(&raw)?;
        Ok(Self {
            inner: MockPlatform::new(posts),
            outbox: outbox.to_path_buf(),
        })
    }
}

#[async_trait]
impl SocialPlatform for ReplayPlatform {
    fn name(&self) -> &str {
        "replay"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PlatformPost>> {
        self.inner.search(query).await
    }

    async fn post_reply(&self, in_reply_to: &str, text: &str) -> Result<SentReply> {
        let sent = self.inner.post_reply(in_reply_to, text).await?;
        let line = serde_json::json!({
            "in_reply_to": in_reply_to,
            "text": text,
            "post_id": sent.post_id,
        });
        let mut contents = std::fs::read_to_string(&self.outbox).unwrap_or_default();
        contents.push_str(&line.to_string());
        contents.push('\n');
        std::fs::write(&self.outbox, contents)?;
        Ok(sent)
    }

    async fn fetch_engagement(&self, post_id: &str) -> Result<Engagement> {
        self.inner.fetch_engagement(post_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, Entities};
    use chrono::Utc;

    fn post(id: &str, text: &str) -> PlatformPost {
        PlatformPost {
            id: id.to_string(),
            platform: "mock".to_string(),
            text: text.to_string(),
            author: Author {
                id: format!("author-{id}"),
                username: "someone".to_string(),
                display_name: "Someone".to_string(),
                followers: 100,
                verified: false,
                bio: None,
            },
            metrics: Engagement::default(),
            entities: Entities::default(),
            language: None,
            created_at: Utc::now().naive_utc(),
            reply_to_id: None,
            conversation_id: None,
        }
    }

    #[tokio::test]
    async fn test_search_honors_since_id_and_ordering() {
        let platform = MockPlatform::new(vec![
            post("100", "looking for a crm tool"),
            post("200", "any crm recommendations?"),
            post("300", "unrelated chatter"),
        ]);

        let results = platform
            .search(&SearchQuery {
                query: "crm".to_string(),
                label: "crm".to_string(),
                since_id: Some("100".to_string()),
                max_results: 10,
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "200");
    }

    #[tokio::test]
    async fn test_scripted_send_failures() {
        let platform = MockPlatform::new(vec![]);
        platform.fail_next_sends(1);

        assert!(platform.post_reply("1", "hello").await.is_err());
        let sent = platform.post_reply("1", "hello").await.unwrap();
        assert!(sent.post_id.starts_with("mock-reply-"));
        assert_eq!(platform.sent_replies().len(), 1);
    }
}
