use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::picker;

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com/";

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingOptions {
    pub limit: Option<u32>,
}

impl ListingOptions {
    fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        params
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("reddit: forbidden")]
    Forbidden,
    #[error("reddit: not found")]
    NotFound,
    #[error("reddit: rate limited: {0}")]
    RateLimited(String),
    #[error("reddit: api error {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Unauthenticated client for the public `.json` listing endpoints.
pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("reddit client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base).with_context(|| format!("reddit: parse base url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Currently active ("hot") posts of one subreddit.
    pub fn hot_listing(&self, subreddit: &str, opts: ListingOptions) -> Result<Listing<Post>> {
        let name = subreddit.trim().trim_start_matches("r/");
        if name.is_empty() {
            bail!("reddit: subreddit name required");
        }
        let path = format!("r/{}/hot.json", name);
        self.fetch_listing(&path, opts)
    }

    fn fetch_listing<T>(&self, path: &str, opts: ListingOptions) -> Result<Listing<T>>
    where
        T: DeserializeOwned,
    {
        let params = opts.into_params();
        let resp = self.get(path, &params)?;
        let listing: ListingEnvelope<T> = resp.json().context("reddit: decode listing")?;
        Ok(listing.data)
    }

    fn get(&self, path: &str, params: &[(String, String)]) -> Result<Response> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        tracing::debug!(%url, "reddit: GET");
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/json")
            .send()
            .context("reddit: send request")?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        let err = match status {
            StatusCode::FORBIDDEN => ApiError::Forbidden,
            StatusCode::NOT_FOUND => ApiError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(body),
            _ => ApiError::Status { status, body },
        };
        Err(err.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
    pub children: Vec<Thing<T>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    #[serde(default)]
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub title: String,
    /// Set only when the post links to externally hosted media.
    #[serde(default)]
    pub url_overridden_by_dest: Option<String>,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub post_hint: Option<String>,
}

impl Post {
    pub fn image_url(&self) -> Option<&str> {
        self.url_overridden_by_dest.as_deref()
    }

    /// Direct image link, not a video, and hinted as an image by Reddit.
    pub fn is_eligible(&self) -> bool {
        picker::is_eligible_image(self.image_url())
            && !self.is_video
            && self.post_hint.as_deref() == Some("image")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingEnvelope<T> {
    #[serde(default)]
    kind: String,
    data: Listing<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_post() -> Post {
        Post {
            title: "T".into(),
            url_overridden_by_dest: Some("http://h/a.png".into()),
            is_video: false,
            post_hint: Some("image".into()),
            ..Post::default()
        }
    }

    #[test]
    fn decodes_listing_envelope() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_x",
                "children": [
                    {"kind": "t3", "data": {"title": "a", "is_video": false, "post_hint": "image",
                        "url_overridden_by_dest": "https://i.redd.it/a.jpg", "score": 12}},
                    {"kind": "t3", "data": {"title": "b", "is_video": true}}
                ]
            }
        }"#;
        let envelope: ListingEnvelope<Post> = serde_json::from_str(raw).unwrap();
        let posts: Vec<Post> = envelope.data.children.into_iter().map(|t| t.data).collect();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].image_url(), Some("https://i.redd.it/a.jpg"));
        assert_eq!(posts[1].post_hint, None);
        assert!(posts[1].is_video);
    }

    #[test]
    fn eligibility_requires_all_three_conditions() {
        assert!(image_post().is_eligible());

        let video = Post {
            is_video: true,
            ..image_post()
        };
        assert!(!video.is_eligible());

        let link = Post {
            post_hint: Some("link".into()),
            ..image_post()
        };
        assert!(!link.is_eligible());

        let no_hint = Post {
            post_hint: None,
            ..image_post()
        };
        assert!(!no_hint.is_eligible());

        let mp4 = Post {
            url_overridden_by_dest: Some("http://h/a.mp4".into()),
            ..image_post()
        };
        assert!(!mp4.is_eligible());
    }

    #[test]
    fn rejects_blank_user_agent() {
        let err = Client::new(ClientConfig::default()).err().unwrap();
        assert!(err.to_string().contains("user agent"));
    }

    #[test]
    fn listing_options_emit_limit() {
        let params = ListingOptions { limit: Some(50) }.into_params();
        assert_eq!(params, vec![("limit".to_string(), "50".to_string())]);
        assert!(ListingOptions::default().into_params().is_empty());
    }
}
