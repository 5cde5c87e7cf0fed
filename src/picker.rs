use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;

use crate::data::FeedService;
use crate::display::{DisplaySink, ImageEvent};
use crate::reddit::Post;

pub const BATCH_LIMIT: u32 = 50;

pub const LOADING_STATUS: &str = "Fetching meme... Please wait.";
pub const FAILURE_STATUS: &str = "Failed to fetch meme. Check the log for details.";

pub const DEFAULT_CATEGORIES: [&str; 4] = [
    "Jokesuncensored",
    "cursedmemes",
    "holup",
    "darkhumorandmemes",
];

static IMAGE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(jpe?g|png|gif|webp)$").expect("valid image url pattern"));

/// True when `url` is present and ends in a still-image file extension.
pub fn is_eligible_image(url: Option<&str>) -> bool {
    url.map_or(false, |url| IMAGE_URL.is_match(url))
}

#[derive(Debug, thiserror::Error)]
pub enum CategoryError {
    #[error("category list must not be empty")]
    Empty,
    #[error("category name must not be blank")]
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryList(Arc<[String]>);

impl CategoryList {
    pub fn new<I, S>(names: I) -> Result<Self, CategoryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(CategoryError::Empty);
        }
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(CategoryError::Blank);
        }
        Ok(Self(names.into()))
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CategoryList {
    fn default() -> Self {
        Self(DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect())
    }
}

/// How many attempts a single cycle may make before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    Unbounded,
    Limited(u32),
}

impl RetryPolicy {
    fn allows(&self, attempt: u32) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Limited(max) => attempt <= *max,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleEnd {
    Displayed { category: String, post: Post },
    Failed { category: String },
    RetriesExhausted,
    /// The sink dropped the image reaction before reporting a result.
    Detached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub attempts: u32,
    pub end: CycleEnd,
}

impl CycleReport {
    pub fn displayed(&self) -> Option<&Post> {
        match &self.end {
            CycleEnd::Displayed { post, .. } => Some(post),
            _ => None,
        }
    }
}

enum Attempt {
    Done(CycleEnd),
    Retry,
}

pub struct MemePicker {
    categories: CategoryList,
    feed: Arc<dyn FeedService>,
    sink: Arc<dyn DisplaySink>,
    retry: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl MemePicker {
    pub fn new(
        categories: CategoryList,
        feed: Arc<dyn FeedService>,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        Self {
            categories,
            feed,
            sink,
            retry: RetryPolicy::default(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn categories(&self) -> &CategoryList {
        &self.categories
    }

    pub fn select_category(&self) -> &str {
        let mut rng = self.rng.lock();
        self.categories
            .names()
            .choose(&mut *rng)
            .map(String::as_str)
            .unwrap_or(DEFAULT_CATEGORIES[0])
    }

    /// Runs one full cycle, restarting on empty batches and image-load failures.
    /// Blocks until an image is displayed, the fetch fails, or the sink goes away.
    pub fn show_meme(&self) -> CycleReport {
        let mut attempts: u32 = 0;
        loop {
            if !self.retry.allows(attempts.saturating_add(1)) {
                self.sink
                    .set_status(&format!("Gave up after {} attempts.", attempts));
                return CycleReport {
                    attempts,
                    end: CycleEnd::RetriesExhausted,
                };
            }
            attempts = attempts.saturating_add(1);
            match self.attempt(attempts) {
                Attempt::Done(end) => return CycleReport { attempts, end },
                Attempt::Retry => continue,
            }
        }
    }

    fn attempt(&self, attempt: u32) -> Attempt {
        self.sink.set_status(LOADING_STATUS);
        self.sink.hide_image();
        self.sink.set_caption("");

        let category = self.select_category().to_string();
        tracing::debug!(%category, attempt, "picker: fetching batch");

        let batch = match self.feed.load_batch(&category, BATCH_LIMIT) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(%category, error = ?err, "picker: error fetching Reddit data");
                self.sink.set_status(FAILURE_STATUS);
                return Attempt::Done(CycleEnd::Failed { category });
            }
        };

        let eligible: Vec<Post> = batch.into_iter().filter(Post::is_eligible).collect();
        let chosen = {
            let mut rng = self.rng.lock();
            eligible.choose(&mut *rng).cloned()
        };
        let Some(post) = chosen else {
            tracing::info!(%category, attempt, "picker: no image posts in batch");
            self.sink.set_status(&format!(
                "Could not find a recent image meme in r/{}. Trying again.",
                category
            ));
            return Attempt::Retry;
        };

        let url = post.image_url().unwrap_or_default().to_string();
        let events = self.sink.set_image(&url, &post.title);
        self.sink.set_caption(&post.title);

        match events.recv() {
            Ok(ImageEvent::Loaded) => {
                self.sink.set_status("");
                self.sink.show_image();
                tracing::info!(%category, %url, attempt, "picker: meme displayed");
                Attempt::Done(CycleEnd::Displayed { category, post })
            }
            Ok(ImageEvent::Failed(reason)) => {
                tracing::warn!(%category, %url, %reason, "picker: image failed to load");
                self.sink.set_status(&format!(
                    "Error loading image from r/{}. Trying again.",
                    category
                ));
                Attempt::Retry
            }
            Err(_) => Attempt::Done(CycleEnd::Detached),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockFeedService;
    use crate::display::RecordingSink;
    use std::collections::HashMap;

    fn image_post(url: &str, title: &str) -> Post {
        Post {
            title: title.into(),
            url_overridden_by_dest: Some(url.into()),
            is_video: false,
            post_hint: Some("image".into()),
            ..Post::default()
        }
    }

    #[test]
    fn accepts_image_extensions_in_any_case() {
        for url in [
            "https://i.redd.it/a.jpg",
            "https://i.redd.it/a.JPEG",
            "https://i.redd.it/a.Png",
            "https://i.imgur.com/b.gif",
            "https://i.imgur.com/b.WEBP",
        ] {
            assert!(is_eligible_image(Some(url)), "{url}");
        }
    }

    #[test]
    fn rejects_other_urls() {
        for url in [
            "https://v.redd.it/a.mp4",
            "https://example.com/data.json",
            "https://example.com/gallery",
            "https://i.redd.it/a.jpg?width=640",
            "",
        ] {
            assert!(!is_eligible_image(Some(url)), "{url}");
        }
        assert!(!is_eligible_image(None));
    }

    #[test]
    fn empty_category_list_is_rejected() {
        let err = CategoryList::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, CategoryError::Empty));
        assert!(matches!(
            CategoryList::new(["ok", "  "]).unwrap_err(),
            CategoryError::Blank
        ));
    }

    #[test]
    fn category_selection_covers_every_entry() {
        let categories = CategoryList::new(["a", "b", "c", "d"]).unwrap();
        let picker = MemePicker::new(
            categories,
            Arc::new(MockFeedService::default()),
            Arc::new(RecordingSink::default()),
        )
        .with_seed(7);

        let trials = 4000;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..trials {
            *counts.entry(picker.select_category().to_string()).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        for (name, count) in counts {
            assert!(
                (800..=1200).contains(&count),
                "{name} chosen {count} times out of {trials}"
            );
        }
    }

    #[test]
    fn displays_single_eligible_post() {
        let feed = Arc::new(MockFeedService::default());
        feed.push_batch(vec![image_post("http://h/a.png", "T")]);
        let sink = Arc::new(RecordingSink::default());
        let picker = MemePicker::new(CategoryList::new(["X"]).unwrap(), feed.clone(), sink.clone());

        let report = picker.show_meme();

        assert_eq!(report.attempts, 1);
        assert_eq!(report.displayed().map(|p| p.title.as_str()), Some("T"));
        let state = sink.state();
        assert_eq!(state.image_source, "http://h/a.png");
        assert_eq!(state.image_alt, "T");
        assert_eq!(state.caption_text, "T");
        assert_eq!(state.status_text, "");
        assert!(state.image_visible);
        assert_eq!(feed.calls(), vec!["X".to_string()]);
    }

    #[test]
    fn empty_batch_triggers_another_fetch() {
        let feed = Arc::new(MockFeedService::default());
        let mut self_post = image_post("http://h/a.png", "self");
        self_post.post_hint = Some("self".into());
        feed.push_batch(vec![self_post]);
        feed.push_batch(vec![image_post("http://h/b.jpg", "second")]);
        let sink = Arc::new(RecordingSink::default());
        let picker = MemePicker::new(CategoryList::new(["X"]).unwrap(), feed.clone(), sink.clone());

        let report = picker.show_meme();

        assert_eq!(report.attempts, 2);
        assert_eq!(feed.calls().len(), 2);
        assert_eq!(sink.images(), vec!["http://h/b.jpg".to_string()]);
        assert!(sink
            .statuses()
            .contains(&"Could not find a recent image meme in r/X. Trying again.".to_string()));
    }

    #[test]
    fn image_failure_restarts_cycle() {
        let feed = Arc::new(MockFeedService::default());
        feed.push_batch(vec![image_post("http://h/broken.png", "broken")]);
        feed.push_batch(vec![image_post("http://h/fine.png", "fine")]);
        let sink = Arc::new(RecordingSink::default());
        sink.fail_image("http://h/broken.png");
        let picker = MemePicker::new(CategoryList::new(["X"]).unwrap(), feed.clone(), sink.clone());

        let report = picker.show_meme();

        assert_eq!(report.attempts, 2);
        assert!(sink
            .statuses()
            .contains(&"Error loading image from r/X. Trying again.".to_string()));
        let state = sink.state();
        assert_eq!(state.image_source, "http://h/fine.png");
        assert_eq!(state.caption_text, "fine");
        assert!(state.image_visible);
    }

    #[test]
    fn fetch_error_is_terminal() {
        let feed = Arc::new(MockFeedService::default());
        feed.push_error("connection refused");
        feed.push_batch(vec![image_post("http://h/a.png", "never")]);
        let sink = Arc::new(RecordingSink::default());
        let picker = MemePicker::new(CategoryList::new(["X"]).unwrap(), feed.clone(), sink.clone());

        let report = picker.show_meme();

        assert!(matches!(report.end, CycleEnd::Failed { .. }));
        assert_eq!(feed.calls().len(), 1);
        let state = sink.state();
        assert_eq!(state.status_text, FAILURE_STATUS);
        assert!(!state.image_visible);
    }

    #[test]
    fn limited_policy_stops_retrying() {
        let feed = Arc::new(MockFeedService::default());
        for _ in 0..3 {
            feed.push_batch(Vec::new());
        }
        let sink = Arc::new(RecordingSink::default());
        let picker = MemePicker::new(CategoryList::new(["X"]).unwrap(), feed.clone(), sink.clone())
            .with_retry_policy(RetryPolicy::Limited(3));

        let report = picker.show_meme();

        assert_eq!(report.end, CycleEnd::RetriesExhausted);
        assert_eq!(report.attempts, 3);
        assert_eq!(feed.calls().len(), 3);
        assert_eq!(sink.state().status_text, "Gave up after 3 attempts.");
    }

    #[test]
    fn retry_policy_holds_at_counter_ceiling() {
        let last = u32::MAX;
        assert!(RetryPolicy::Unbounded.allows(last.saturating_add(1)));
        assert!(RetryPolicy::Limited(u32::MAX).allows(last.saturating_add(1)));
        assert!(!RetryPolicy::Limited(3).allows(4));
        assert!(RetryPolicy::Limited(3).allows(3));
    }

    #[test]
    fn dropped_reaction_detaches_cycle() {
        let feed = Arc::new(MockFeedService::default());
        feed.push_batch(vec![image_post("http://h/a.png", "T")]);
        let sink = Arc::new(RecordingSink::default());
        sink.drop_image_events();
        let picker = MemePicker::new(CategoryList::new(["X"]).unwrap(), feed.clone(), sink.clone());

        let report = picker.show_meme();

        assert_eq!(report.end, CycleEnd::Detached);
        assert_eq!(feed.calls().len(), 1);
        assert!(!sink.state().image_visible);
    }
}
