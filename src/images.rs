//! Image URL validation
//!
//! Publishing requires image URLs that actually resolve to images. Models
//! invent placeholder links and happily pass along anti-hotlink CDN URLs
//! that will 403 when the publisher fetches them, so every candidate is
//! probed before it reaches the publish tool.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;

const RETRY_DELAY: Duration = Duration::from_secs(1);
const ATTEMPTS: usize = 2;

/// Hosts models make up when they have no real image.
const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "via.placeholder.com",
    "placehold.it",
    "placehold.co",
    "dummyimage.com",
];

/// CDNs with anti-hotlink protection: the probe may succeed from here but
/// the publisher's fetch will be refused.
const BLOCKED_HOSTS: &[&str] = &["zhimg.com", "mmbiz.qpic.cn", "sinaimg.cn", "pstatp.com"];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

/// Filters a candidate URL list down to the ones that look publishable.
#[async_trait]
pub trait ImageChecker: Send + Sync {
    /// Keep only the URLs that resolve to an image, preserving order.
    async fn filter_valid(&self, urls: &[String]) -> Vec<String>;
}

/// Checker that probes each URL over HTTP.
pub struct HttpImageChecker {
    client: reqwest::Client,
}

impl HttpImageChecker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn probe(&self, url: &str) -> bool {
        for attempt in 1..=ATTEMPTS {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status != 200 && status != 206 {
                        tracing::debug!("Image probe {} returned {}", url, status);
                        return false;
                    }
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("");
                    if content_type.starts_with("image/") || has_image_extension(url) {
                        return true;
                    }
                    tracing::debug!("Image probe {} has content-type '{}'", url, content_type);
                    return false;
                }
                Err(e) => {
                    tracing::debug!("Image probe {} attempt {} failed: {}", url, attempt, e);
                    if attempt < ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        false
    }
}

#[async_trait]
impl ImageChecker for HttpImageChecker {
    async fn filter_valid(&self, urls: &[String]) -> Vec<String> {
        let checks = join_all(urls.iter().map(|url| async move {
            if !is_plausible_image_url(url) {
                return (url, false);
            }
            (url, self.probe(url).await)
        }))
        .await;

        let valid: Vec<String> = checks
            .into_iter()
            .filter_map(|(url, ok)| ok.then(|| url.clone()))
            .collect();
        tracing::info!("Image validation: {}/{} URLs usable", valid.len(), urls.len());
        valid
    }
}

/// Cheap static screen run before any network traffic.
pub fn is_plausible_image_url(url: &str) -> bool {
    let trimmed = url.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return false;
    }
    let Ok(parsed) = url::Url::parse(trimmed) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or("");
    if PLACEHOLDER_HOSTS.iter().any(|p| host == *p || host.ends_with(&format!(".{}", p))) {
        return false;
    }
    if BLOCKED_HOSTS.iter().any(|b| host == *b || host.ends_with(&format!(".{}", b))) {
        return false;
    }
    true
}

pub fn has_image_extension(url: &str) -> bool {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_hosts_are_rejected_statically() {
        assert!(!is_plausible_image_url("https://example.com/photo.jpg"));
        assert!(!is_plausible_image_url("https://via.placeholder.com/600x400"));
        assert!(!is_plausible_image_url("https://cdn.example.com/a.png"));
    }

    #[test]
    fn anti_hotlink_hosts_are_rejected_statically() {
        assert!(!is_plausible_image_url("https://pic1.zhimg.com/v2-abc.jpg"));
        assert!(!is_plausible_image_url("https://mmbiz.qpic.cn/mmbiz_png/xyz"));
    }

    #[test]
    fn ordinary_https_urls_pass_the_static_screen() {
        assert!(is_plausible_image_url("https://images.unsplash.com/photo-123"));
        assert!(is_plausible_image_url("http://cdn.site.io/a/b.webp"));
    }

    #[test]
    fn non_http_and_garbage_urls_fail() {
        assert!(!is_plausible_image_url("ftp://host/a.png"));
        assert!(!is_plausible_image_url("not a url"));
        assert!(!is_plausible_image_url(""));
    }

    #[test]
    fn extension_heuristic_ignores_query_strings() {
        assert!(has_image_extension("https://cdn.io/a.JPG"));
        assert!(has_image_extension("https://cdn.io/pics/b.webp?w=800"));
        assert!(!has_image_extension("https://cdn.io/page.html"));
    }
}
