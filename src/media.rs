use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::{DynamicImage, ImageFormat};
use reqwest::blocking::Client;

#[derive(Debug, Clone)]
pub struct Config {
    pub max_size_bytes: u64,
    pub timeout: Duration,
    pub workers: usize,
    pub user_agent: String,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_size_bytes: 25 * 1024 * 1024,
            timeout: Duration::from_secs(30),
            workers: 2,
            user_agent: format!("meme-picker/{}", crate::VERSION),
            http_client: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media: url required")]
    MissingUrl,
    #[error("media: request failed: {0}")]
    Status(reqwest::StatusCode),
    #[error("media: body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("media: body was empty")]
    Empty,
    #[error("media: unsupported image format")]
    UnsupportedFormat,
}

/// A downloaded image that decoded successfully.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub url: String,
    pub format: ImageFormat,
    pub bytes: Arc<Vec<u8>>,
    pub image: Arc<DynamicImage>,
}

pub type LoadResult = Result<LoadedImage>;

struct Job {
    request: Request,
    tx: Sender<LoadResult>,
}

struct Inner {
    cfg: Config,
    client: Client,
    jobs: Sender<Job>,
    stop: Sender<()>,
}

/// Downloads and decodes images on a small pool of worker threads.
pub struct Manager {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 2;
        }

        let client = if let Some(client) = cfg.http_client.clone() {
            client
        } else {
            Client::builder()
                .timeout(cfg.timeout)
                .user_agent(cfg.user_agent.clone())
                .build()
                .context("media: build http client")?
        };

        let (job_tx, job_rx) = unbounded::<Job>();
        let (stop_tx, stop_rx) = unbounded();
        let inner = Arc::new(Inner {
            cfg,
            client,
            jobs: job_tx,
            stop: stop_tx,
        });

        let mut handles = Vec::new();
        for _ in 0..inner.cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Ok(Self { inner, handles })
    }

    /// Queues a load; the receiver yields exactly one result, or disconnects if the
    /// manager shuts down first.
    pub fn enqueue(&self, request: Request) -> Receiver<LoadResult> {
        let (tx, rx) = unbounded();
        let _ = self.inner.jobs.send(Job { request, tx });
        rx
    }

    fn shutdown(&mut self) {
        // queued jobs are abandoned; only in-flight downloads finish
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            if stop.try_recv().is_ok() {
                break;
            }
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        let url = job.request.url.clone();
        let result = self.fetch(job.request);
        if let Err(err) = &result {
            tracing::debug!(%url, error = ?err, "media: load failed");
        }
        let _ = job.tx.send(result);
    }

    fn fetch(&self, request: Request) -> Result<LoadedImage> {
        if request.url.trim().is_empty() {
            return Err(MediaError::MissingUrl.into());
        }

        let response = self
            .client
            .get(&request.url)
            .send()
            .with_context(|| format!("media: download {}", request.url))?;

        if !response.status().is_success() {
            return Err(MediaError::Status(response.status()).into());
        }

        let limit = self.cfg.max_size_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(MediaError::TooLarge { limit }.into());
        }

        let mut bytes = Vec::new();
        response
            .take(limit + 1)
            .read_to_end(&mut bytes)
            .context("media: body")?;
        if bytes.len() as u64 > limit {
            return Err(MediaError::TooLarge { limit }.into());
        }

        decode(request.url, bytes)
    }
}

/// Checks that `bytes` hold a supported still or animated image and decodes it.
pub fn decode(url: String, bytes: Vec<u8>) -> Result<LoadedImage> {
    if bytes.is_empty() {
        return Err(MediaError::Empty.into());
    }
    let format = match image::guess_format(&bytes) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP)) => {
            format
        }
        _ => return Err(MediaError::UnsupportedFormat.into()),
    };
    let decoded = image::load_from_memory_with_format(&bytes, format)
        .with_context(|| format!("media: decode {}", url))?;
    Ok(LoadedImage {
        url,
        format,
        bytes: Arc::new(bytes),
        image: Arc::new(decoded),
    })
}
