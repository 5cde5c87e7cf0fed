use std::io::{self, Write};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;

use crate::display::{DisplaySink, DisplayState, ImageEvent};
use crate::media;

/// Line-oriented sink for `--once`: progress goes to stderr, the chosen meme to stdout.
pub struct ConsoleSink<W: Write + Send> {
    media: Arc<media::Manager>,
    state: Mutex<DisplayState>,
    out: Mutex<W>,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout(media: Arc<media::Manager>) -> Self {
        Self::new(media, io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(media: Arc<media::Manager>, out: W) -> Self {
        Self {
            media,
            state: Mutex::new(DisplayState::default()),
            out: Mutex::new(out),
        }
    }

    pub fn state(&self) -> DisplayState {
        self.state.lock().clone()
    }
}

impl<W: Write + Send> DisplaySink for ConsoleSink<W> {
    fn set_status(&self, text: &str) {
        let mut state = self.state.lock();
        if state.status_text != text && !text.is_empty() {
            eprintln!("{text}");
        }
        state.status_text = text.to_string();
    }

    fn set_caption(&self, text: &str) {
        self.state.lock().caption_text = text.to_string();
    }

    fn set_image(&self, url: &str, alt: &str) -> Receiver<ImageEvent> {
        {
            let mut state = self.state.lock();
            state.image_source = url.to_string();
            state.image_alt = alt.to_string();
        }

        let (tx, rx) = bounded(1);
        let loads = self.media.enqueue(media::Request {
            url: url.to_string(),
        });
        thread::spawn(move || {
            let event = match loads.recv() {
                Ok(Ok(_)) => ImageEvent::Loaded,
                Ok(Err(err)) => ImageEvent::Failed(format!("{err:#}")),
                Err(_) => return,
            };
            let _ = tx.send(event);
        });
        rx
    }

    fn show_image(&self) {
        let mut state = self.state.lock();
        state.image_visible = true;
        let mut out = self.out.lock();
        let _ = writeln!(out, "{}\n{}", state.caption_text, state.image_source);
        let _ = out.flush();
    }

    fn hide_image(&self) {
        self.state.lock().image_visible = false;
    }
}
