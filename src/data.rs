use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;

use crate::reddit::{self, ListingOptions};

/// Source of listing batches, one request per call.
pub trait FeedService: Send + Sync {
    fn load_batch(&self, category: &str, limit: u32) -> Result<Vec<reddit::Post>>;
}

pub struct RedditFeedService {
    client: Arc<reddit::Client>,
}

impl RedditFeedService {
    pub fn new(client: Arc<reddit::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for RedditFeedService {
    fn load_batch(&self, category: &str, limit: u32) -> Result<Vec<reddit::Post>> {
        let listing = self
            .client
            .hot_listing(category, ListingOptions { limit: Some(limit) })
            .with_context(|| format!("fetch r/{category} hot listing"))?;
        Ok(listing
            .children
            .into_iter()
            .map(|thing| thing.data)
            .collect())
    }
}

enum Scripted {
    Batch(Vec<reddit::Post>),
    Error(String),
}

/// Replays queued batches in order and records which categories were requested.
/// Once the queue runs dry every call fails.
#[derive(Default)]
pub struct MockFeedService {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl MockFeedService {
    pub fn push_batch(&self, posts: Vec<reddit::Post>) {
        self.script.lock().push_back(Scripted::Batch(posts));
    }

    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .push_back(Scripted::Error(message.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl FeedService for MockFeedService {
    fn load_batch(&self, category: &str, _limit: u32) -> Result<Vec<reddit::Post>> {
        self.calls.lock().push(category.to_string());
        match self.script.lock().pop_front() {
            Some(Scripted::Batch(posts)) => Ok(posts),
            Some(Scripted::Error(message)) => Err(anyhow!("mock feed: {}", message)),
            None => Err(anyhow!("mock feed: no batches left")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_replays_script_then_fails() {
        let feed = MockFeedService::default();
        feed.push_batch(vec![reddit::Post {
            title: "a".into(),
            ..reddit::Post::default()
        }]);
        feed.push_error("boom");

        assert_eq!(feed.load_batch("x", 50).unwrap().len(), 1);
        assert!(feed
            .load_batch("y", 50)
            .unwrap_err()
            .to_string()
            .contains("boom"));
        assert!(feed.load_batch("z", 50).is_err());
        assert_eq!(feed.calls(), vec!["x", "y", "z"]);
    }
}
