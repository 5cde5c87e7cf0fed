use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::io::{self, Cursor, Stdout, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::style::Print;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use percent_encoding::percent_decode_str;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use url::Url;

use crate::display::{DisplaySink, DisplayState, ImageEvent};
use crate::media;
use crate::picker::MemePicker;

const KITTY_CHUNK_SIZE: usize = 4096;
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const HALF_BLOCK: &str = "▀";

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);

/// Writes from the picker thread, applied by the event loop in order.
pub enum UiMessage {
    Status(String),
    Caption(String),
    Image {
        url: String,
        alt: String,
        reply: Sender<ImageEvent>,
    },
    Visible(bool),
    CycleFinished,
}

/// `DisplaySink` that forwards every write to the terminal event loop.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<UiMessage>,
}

pub fn channel() -> (ChannelSink, Receiver<UiMessage>) {
    let (tx, rx) = unbounded();
    (ChannelSink { tx }, rx)
}

impl ChannelSink {
    pub fn finish_cycle(&self) {
        let _ = self.tx.send(UiMessage::CycleFinished);
    }
}

impl DisplaySink for ChannelSink {
    fn set_status(&self, text: &str) {
        let _ = self.tx.send(UiMessage::Status(text.to_string()));
    }

    fn set_caption(&self, text: &str) {
        let _ = self.tx.send(UiMessage::Caption(text.to_string()));
    }

    fn set_image(&self, url: &str, alt: &str) -> Receiver<ImageEvent> {
        let (reply, rx) = bounded(1);
        // a closed UI drops `reply` here, which detaches the picker
        let _ = self.tx.send(UiMessage::Image {
            url: url.to_string(),
            alt: alt.to_string(),
            reply,
        });
        rx
    }

    fn show_image(&self) {
        let _ = self.tx.send(UiMessage::Visible(true));
    }

    fn hide_image(&self) {
        let _ = self.tx.send(UiMessage::Visible(false));
    }
}

pub struct Options {
    pub picker: Arc<MemePicker>,
    pub sink: ChannelSink,
    pub messages: Receiver<UiMessage>,
    pub media: Arc<media::Manager>,
    pub config_path: String,
}

struct PendingLoad {
    url: String,
    rx: Receiver<media::LoadResult>,
    reply: Sender<ImageEvent>,
}

struct Picture {
    url: String,
    image: Arc<DynamicImage>,
    kitty: Option<KittyImage>,
    cells: Option<((u16, u16), Vec<Line<'static>>)>,
}

impl Picture {
    fn new(loaded: media::LoadedImage, use_kitty: bool) -> Self {
        let kitty = if use_kitty {
            let id = kitty_image_id(&loaded.url);
            match kitty_transmit_inline(&loaded.bytes, loaded.format, &loaded.image, id) {
                Ok(kitty) => Some(kitty),
                Err(err) => {
                    tracing::warn!(url = %loaded.url, error = ?err, "ui: kitty encode failed, using half blocks");
                    None
                }
            }
        } else {
            None
        };
        Self {
            url: loaded.url,
            image: loaded.image,
            kitty,
            cells: None,
        }
    }

    fn half_blocks(&mut self, cols: u16, rows: u16) -> &[Line<'static>] {
        let stale = self
            .cells
            .as_ref()
            .map_or(true, |(size, _)| *size != (cols, rows));
        if stale {
            self.cells = Some(((cols, rows), half_block_lines(&self.image, cols, rows)));
        }
        self.cells
            .as_ref()
            .map(|(_, lines)| lines.as_slice())
            .unwrap_or_default()
    }
}

struct KittyImage {
    id: u32,
    transmit_chunks: Vec<String>,
    transmitted: bool,
    wrap_tmux: bool,
}

impl KittyImage {
    fn ensure_transmitted<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.transmitted {
            return Ok(());
        }
        for chunk in &self.transmit_chunks {
            writer.write_all(chunk.as_bytes())?;
        }
        writer.flush()?;
        self.transmitted = true;
        Ok(())
    }

    fn placement_sequence(&self, cols: u16, rows: u16) -> String {
        let base = format!(
            "\x1b_Ga=p,q=2,C=1,i={},c={},r={};\x1b\\",
            self.id, cols, rows
        );
        if self.wrap_tmux {
            format!("\x1bPtmux;\x1b{base}\x1b\\")
        } else {
            base
        }
    }

    fn placed(&self) -> PlacedKitty {
        PlacedKitty {
            id: self.id,
            wrap_tmux: self.wrap_tmux,
        }
    }
}

#[derive(Clone, Copy)]
struct PlacedKitty {
    id: u32,
    wrap_tmux: bool,
}

impl PlacedKitty {
    fn delete_sequence(&self) -> String {
        let base = format!("\x1b_Ga=d,q=2,i={};\x1b\\", self.id);
        if self.wrap_tmux {
            format!("\x1bPtmux;\x1b{}\x1b\\", base)
        } else {
            base
        }
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

pub struct Model {
    picker: Arc<MemePicker>,
    sink: ChannelSink,
    messages: Receiver<UiMessage>,
    media: Arc<media::Manager>,
    config_path: String,
    state: DisplayState,
    pending: Vec<PendingLoad>,
    picture: Option<Picture>,
    running_cycles: Arc<AtomicUsize>,
    use_kitty: bool,
    image_area: Option<Rect>,
    placed_kitty: Option<PlacedKitty>,
    needs_kitty_flush: bool,
    needs_redraw: bool,
    spinner: Spinner,
}

impl Model {
    pub fn new(options: Options) -> Self {
        Self {
            picker: options.picker,
            sink: options.sink,
            messages: options.messages,
            media: options.media,
            config_path: options.config_path,
            state: DisplayState::default(),
            pending: Vec::new(),
            picture: None,
            running_cycles: Arc::new(AtomicUsize::new(0)),
            use_kitty: is_kitty_terminal(),
            image_area: None,
            placed_kitty: None,
            needs_kitty_flush: false,
            needs_redraw: true,
            spinner: Spinner::new(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.start_cycle();
        let result = self.event_loop(&mut terminal);

        if let Some(kitty) = self.placed_kitty.take() {
            let _ = terminal.backend_mut().write_all(kitty.delete_sequence().as_bytes());
        }
        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    /// Starts a cycle on its own thread. Overlapping cycles are allowed; whichever
    /// writes last owns the screen.
    fn start_cycle(&mut self) {
        let picker = self.picker.clone();
        let sink = self.sink.clone();
        let running = self.running_cycles.clone();
        running.fetch_add(1, Ordering::SeqCst);
        thread::spawn(move || {
            let report = picker.show_meme();
            tracing::debug!(attempts = report.attempts, end = ?report.end, "ui: cycle finished");
            running.fetch_sub(1, Ordering::SeqCst);
            sink.finish_cycle();
        });
        self.mark_dirty();
    }

    fn is_loading(&self) -> bool {
        self.running_cycles.load(Ordering::SeqCst) > 0
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
        self.needs_kitty_flush = true;
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.flush_inline_image(terminal.backend_mut())?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key.code) {
                            break;
                        }
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.needs_redraw = true;
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    /// Returns true when the app should quit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('n') | KeyCode::Char(' ') => self.start_cycle(),
            KeyCode::Char('o') => self.open_in_browser(),
            _ => {}
        }
        false
    }

    fn open_in_browser(&mut self) {
        let url = self.state.image_source.clone();
        if url.is_empty() {
            return;
        }
        match webbrowser::open(&url) {
            Ok(_) => self.state.status_text = format!("Opened {} in your browser.", image_label(&url)),
            Err(err) => {
                self.state.status_text = format!("Failed to open {}: {err} (URL: {url})", image_label(&url))
            }
        }
        self.mark_dirty();
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.messages.try_recv() {
            self.apply(message);
            changed = true;
        }
        if self.poll_loads() {
            changed = true;
        }
        changed
    }

    fn apply(&mut self, message: UiMessage) {
        match message {
            UiMessage::Status(text) => self.state.status_text = text,
            UiMessage::Caption(text) => self.state.caption_text = text,
            UiMessage::Image { url, alt, reply } => {
                self.state.image_source = url.clone();
                self.state.image_alt = alt;
                let rx = self.media.enqueue(media::Request { url: url.clone() });
                self.pending.push(PendingLoad { url, rx, reply });
            }
            UiMessage::Visible(visible) => self.state.image_visible = visible,
            UiMessage::CycleFinished => {}
        }
    }

    fn poll_loads(&mut self) -> bool {
        let mut changed = false;
        let mut index = 0;
        while index < self.pending.len() {
            let outcome = match self.pending[index].rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    Some(Err(anyhow::anyhow!("media: loader stopped")))
                }
            };
            let Some(result) = outcome else {
                index += 1;
                continue;
            };
            let load = self.pending.swap_remove(index);
            changed = true;
            match result {
                Ok(loaded) => {
                    if loaded.url == self.state.image_source {
                        self.replace_picture(Picture::new(loaded, self.use_kitty));
                    }
                    let _ = load.reply.send(ImageEvent::Loaded);
                }
                Err(err) => {
                    tracing::debug!(url = %load.url, error = ?err, "ui: image load failed");
                    let _ = load.reply.send(ImageEvent::Failed(format!("{err:#}")));
                }
            }
        }
        changed
    }

    fn replace_picture(&mut self, picture: Picture) {
        if self.picture.as_ref().is_some_and(|old| old.url == picture.url) {
            return;
        }
        self.picture = Some(picture);
    }

    fn current_picture(&mut self) -> Option<&mut Picture> {
        let source = &self.state.image_source;
        if !self.state.image_visible {
            return None;
        }
        self.picture.as_mut().filter(|picture| &picture.url == source)
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(2),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.state.status_text)
                .trim()
                .to_string()
        } else {
            self.state.status_text.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_image(frame, layout[1]);

        let caption = Paragraph::new(self.state.caption_text.clone())
            .style(
                Style::default()
                    .fg(COLOR_ACCENT)
                    .bg(COLOR_BG)
                    .add_modifier(Modifier::BOLD),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(caption, layout[2]);

        let footer = Paragraph::new(format!(
            "n/space: another meme · o: open in browser · q: quit · config: {}",
            self.config_path
        ))
        .style(
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .bg(COLOR_PANEL_BG)
                .add_modifier(Modifier::ITALIC),
        )
        .alignment(Alignment::Center);
        frame.render_widget(footer, layout[3]);
    }

    fn draw_image(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let title = if self.state.image_alt.is_empty() {
            " meme ".to_string()
        } else {
            format!(" {} ", image_label(&self.state.image_source))
        };
        let block = Block::default()
            .title(Span::styled(title, Style::default().fg(COLOR_TEXT_SECONDARY)))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1));
        let inner = block.inner(area);
        frame.render_widget(block, area);
        self.image_area = None;

        let Some(picture) = self.current_picture() else {
            return;
        };
        if picture.kitty.is_some() {
            self.image_area = Some(inner);
            return;
        }
        let lines = picture.half_blocks(inner.width, inner.height).to_vec();
        let paragraph = Paragraph::new(Text::from(lines)).alignment(Alignment::Center);
        frame.render_widget(paragraph, inner);
    }

    fn flush_inline_image(&mut self, backend: &mut CrosstermBackend<Stdout>) -> Result<()> {
        if !self.needs_kitty_flush {
            return Ok(());
        }
        self.needs_kitty_flush = false;

        if let Some(previous) = self.placed_kitty.take() {
            backend.write_all(previous.delete_sequence().as_bytes())?;
        }

        let Some(area) = self.image_area else {
            backend.flush()?;
            return Ok(());
        };
        let has_kitty = self
            .current_picture()
            .is_some_and(|picture| picture.kitty.is_some());
        if !has_kitty {
            backend.flush()?;
            return Ok(());
        }

        let (cols, rows) = fit_cells(kitty_source_size(self.picture.as_ref()), area.width, area.height);
        let col = area.x + (area.width.saturating_sub(cols)) / 2;
        let Some(kitty) = self.picture.as_mut().and_then(|picture| picture.kitty.as_mut()) else {
            return Ok(());
        };
        kitty.ensure_transmitted(backend)?;
        let sequence = kitty.placement_sequence(cols, rows);
        crossterm::queue!(backend, MoveTo(col, area.y), Print(sequence))?;
        backend.flush()?;
        self.placed_kitty = Some(kitty.placed());
        Ok(())
    }
}

fn kitty_source_size(picture: Option<&Picture>) -> (u32, u32) {
    picture
        .map(|picture| (picture.image.width(), picture.image.height()))
        .unwrap_or((1, 1))
}

/// Largest cell box that keeps the image aspect ratio, assuming cells are twice as
/// tall as they are wide.
fn fit_cells((width, height): (u32, u32), max_cols: u16, max_rows: u16) -> (u16, u16) {
    if width == 0 || height == 0 || max_cols == 0 || max_rows == 0 {
        return (max_cols.max(1), max_rows.max(1));
    }
    let width = width as f64;
    let height = height as f64 / 2.0;
    let scale = (max_cols as f64 / width).min(max_rows as f64 / height);
    let cols = (width * scale).floor().clamp(1.0, max_cols as f64) as u16;
    let rows = (height * scale).floor().clamp(1.0, max_rows as f64) as u16;
    (cols, rows)
}

/// Renders `image` into `rows` lines of upper-half blocks, two pixels per cell.
fn half_block_lines(image: &DynamicImage, cols: u16, rows: u16) -> Vec<Line<'static>> {
    if cols == 0 || rows == 0 || image.width() == 0 || image.height() == 0 {
        return Vec::new();
    }
    let scaled = image
        .resize(cols as u32, rows as u32 * 2, FilterType::Triangle)
        .to_rgb8();
    let (width, height) = scaled.dimensions();

    let mut lines = Vec::with_capacity(height.div_ceil(2) as usize);
    for y in (0..height).step_by(2) {
        let spans = (0..width)
            .map(|x| {
                let top = scaled.get_pixel(x, y);
                let mut style = Style::default().fg(Color::Rgb(top[0], top[1], top[2]));
                if y + 1 < height {
                    let bottom = scaled.get_pixel(x, y + 1);
                    style = style.bg(Color::Rgb(bottom[0], bottom[1], bottom[2]));
                }
                Span::styled(HALF_BLOCK, style)
            })
            .collect::<Vec<_>>();
        lines.push(Line::from(spans));
    }
    lines
}

fn kitty_image_id(url: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    ((hasher.finish() & 0xFFFF_FFFF) as u32).max(1)
}

fn encode_png_for_kitty<'a>(
    bytes: &'a [u8],
    format: ImageFormat,
    image: &DynamicImage,
) -> Result<Cow<'a, [u8]>> {
    if bytes.is_empty() {
        bail!("image had no bytes");
    }
    if format == ImageFormat::Png {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut png_bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("encode image as png")?;
    Ok(Cow::Owned(png_bytes))
}

fn tmux_passthrough_enabled() -> bool {
    env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
}

fn kitty_transmit_inline(
    bytes: &[u8],
    format: ImageFormat,
    image: &DynamicImage,
    image_id: u32,
) -> Result<KittyImage> {
    let png_data = encode_png_for_kitty(bytes, format, image)?;
    let encoded = general_purpose::STANDARD.encode(png_data.as_ref());
    if encoded.is_empty() {
        bail!("failed to encode image");
    }

    let wrap_tmux = tmux_passthrough_enabled();
    let mut chunks: Vec<String> = Vec::new();
    let mut offset = 0;
    while offset < encoded.len() {
        let end = usize::min(offset + KITTY_CHUNK_SIZE, encoded.len());
        let more = if end < encoded.len() { 1 } else { 0 };
        let mut out = String::new();
        if wrap_tmux {
            out.push_str("\x1bPtmux;\x1b");
        }
        if offset == 0 {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={},f=100,m={more};", image_id));
        } else {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={},m={more};", image_id));
        }
        out.push_str(&encoded[offset..end]);
        out.push_str("\x1b\\");
        if wrap_tmux {
            out.push_str("\x1b\\");
        }
        chunks.push(out);
        offset = end;
    }

    Ok(KittyImage {
        id: image_id,
        transmit_chunks: chunks,
        transmitted: false,
        wrap_tmux,
    })
}

fn image_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(|segment| percent_decode_str(segment).decode_utf8_lossy().to_string())
        })
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "meme".to_string())
}

fn env_truthy(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "YES"))
        .unwrap_or(false)
}

fn running_inside_tmux() -> bool {
    let in_tmux = env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
        || env::var("TMUX_PANE")
            .map(|v| !v.is_empty())
            .unwrap_or(false);

    if in_tmux {
        return true;
    }

    env::var("TERM")
        .map(|term| term.to_ascii_lowercase().contains("tmux"))
        .unwrap_or(false)
}

fn is_kitty_terminal() -> bool {
    if env_truthy("MEMEPICKER_DISABLE_KITTY") {
        return false;
    }
    if env_truthy("MEMEPICKER_FORCE_KITTY") {
        return true;
    }
    if running_inside_tmux() {
        return false;
    }
    if env::var("KITTY_WINDOW_ID")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
    {
        return true;
    }
    if env::var("WEZTERM_PANE")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
    {
        return true;
    }
    env::var("TERM")
        .map(|term| {
            let lower = term.to_lowercase();
            lower.contains("kitty") || lower.contains("wezterm")
        })
        .unwrap_or(false)
}
