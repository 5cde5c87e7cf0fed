use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config;
use crate::console::ConsoleSink;
use crate::data::{FeedService, RedditFeedService};
use crate::logging;
use crate::media;
use crate::picker::{CategoryList, MemePicker};
use crate::reddit;
use crate::ui;

struct Services {
    feed: Arc<dyn FeedService>,
    media: Arc<media::Manager>,
}

fn build_services(cfg: &config::Config) -> Result<Services> {
    let client = reddit::Client::new(reddit::ClientConfig {
        user_agent: cfg.reddit.user_agent.clone(),
        base_url: Some(cfg.reddit.base_url.clone()),
        timeout: Some(cfg.reddit.timeout),
        http_client: None,
    })
    .context("create reddit client")?;
    let feed: Arc<dyn FeedService> = Arc::new(RedditFeedService::new(Arc::new(client)));

    let media = media::Manager::new(media::Config {
        max_size_bytes: cfg.media.max_size_bytes,
        timeout: cfg.media.timeout,
        workers: cfg.media.workers,
        user_agent: cfg.reddit.user_agent.clone(),
        http_client: None,
    })
    .context("start media loader")?;

    Ok(Services {
        feed,
        media: Arc::new(media),
    })
}

/// Interactive terminal session: one meme at start, another on demand.
pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let _log_guard = logging::init(&cfg.log).context("init logging")?;
    tracing::info!(version = crate::VERSION, "meme-picker starting");
    log_ignored_env(&cfg);

    let services = build_services(&cfg)?;
    let (sink, messages) = ui::channel();
    let picker = Arc::new(MemePicker::new(
        CategoryList::default(),
        services.feed.clone(),
        Arc::new(sink.clone()),
    ));

    let options = ui::Options {
        picker,
        sink,
        messages,
        media: services.media.clone(),
        config_path: friendly_path(config::default_path().as_ref()),
    };

    let mut model = ui::Model::new(options);
    let result = model.run();
    drop(model);
    tracing::info!("meme-picker exiting");
    result
}

/// Runs a single cycle without the terminal UI. Returns whether a meme was shown.
pub fn run_once() -> Result<bool> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let _log_guard = logging::init(&cfg.log).context("init logging")?;
    log_ignored_env(&cfg);

    let services = build_services(&cfg)?;
    let sink = Arc::new(ConsoleSink::stdout(services.media.clone()));
    let picker = MemePicker::new(CategoryList::default(), services.feed.clone(), sink);
    let report = picker.show_meme();
    tracing::info!(attempts = report.attempts, end = ?report.end, "single cycle finished");
    Ok(report.displayed().is_some())
}

fn log_ignored_env(cfg: &config::Config) {
    for key in &cfg.ignored_env {
        tracing::debug!(%key, "config: ignoring unknown environment override");
    }
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/meme-picker/config.yaml".to_string()
    }
}
