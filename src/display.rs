use std::collections::HashSet;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;

/// Outcome of one image load, delivered once per `set_image` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageEvent {
    Loaded,
    Failed(String),
}

/// The observable output slots of a picker session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayState {
    pub status_text: String,
    pub image_source: String,
    pub image_alt: String,
    pub image_visible: bool,
    pub caption_text: String,
}

/// Write-only surface the picker renders into.
///
/// `set_image` must register its load reaction before returning, so the picker can
/// wait on the receiver without missing the event. Dropping the sender without
/// sending tells the picker that nobody is displaying its images anymore.
pub trait DisplaySink: Send + Sync {
    fn set_status(&self, text: &str);
    fn set_caption(&self, text: &str);
    fn set_image(&self, url: &str, alt: &str) -> Receiver<ImageEvent>;
    fn show_image(&self);
    fn hide_image(&self);
}

/// In-memory sink that records every write and resolves image loads immediately.
#[derive(Default)]
pub struct RecordingSink {
    inner: Mutex<Recording>,
}

#[derive(Default)]
struct Recording {
    state: DisplayState,
    statuses: Vec<String>,
    images: Vec<String>,
    failing: HashSet<String>,
    detached: bool,
}

impl RecordingSink {
    pub fn state(&self) -> DisplayState {
        self.inner.lock().state.clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.inner.lock().statuses.clone()
    }

    /// Every URL handed to `set_image`, in order.
    pub fn images(&self) -> Vec<String> {
        self.inner.lock().images.clone()
    }

    pub fn fail_image(&self, url: &str) {
        self.inner.lock().failing.insert(url.to_string());
    }

    pub fn drop_image_events(&self) {
        self.inner.lock().detached = true;
    }
}

impl DisplaySink for RecordingSink {
    fn set_status(&self, text: &str) {
        let mut inner = self.inner.lock();
        inner.state.status_text = text.to_string();
        inner.statuses.push(text.to_string());
    }

    fn set_caption(&self, text: &str) {
        self.inner.lock().state.caption_text = text.to_string();
    }

    fn set_image(&self, url: &str, alt: &str) -> Receiver<ImageEvent> {
        let mut inner = self.inner.lock();
        inner.state.image_source = url.to_string();
        inner.state.image_alt = alt.to_string();
        inner.images.push(url.to_string());

        let (tx, rx) = bounded(1);
        if !inner.detached {
            let event = if inner.failing.contains(url) {
                ImageEvent::Failed(format!("refusing to load {url}"))
            } else {
                ImageEvent::Loaded
            };
            let _ = tx.send(event);
        }
        rx
    }

    fn show_image(&self) {
        self.inner.lock().state.image_visible = true;
    }

    fn hide_image(&self) {
        self.inner.lock().state.image_visible = false;
    }
}
