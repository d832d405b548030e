use core::time::Duration;

use crate::config::{CrawlerConfig, RendererConfig};

mod chrome;
mod script;

pub use chrome::ChromeRenderer;
pub use script::ScriptRenderer;

/// Turns a URL into the fully rendered HTML of the page.
pub trait Renderer {
    async fn render(&self, url: &str) -> anyhow::Result<String>;
}

impl<R: Renderer + ?Sized> Renderer for &R {
    #[inline]
    async fn render(&self, url: &str) -> anyhow::Result<String> {
        (**self).render(url).await
    }
}

#[derive(Clone, Debug)]
pub enum AnyRenderer {
    Chrome(ChromeRenderer),
    Script(ScriptRenderer),
}

impl AnyRenderer {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        match &config.renderer {
            RendererConfig::Chrome { headless } => Self::Chrome(ChromeRenderer::new(*headless, config)),
            RendererConfig::Script { program, args } => Self::Script(ScriptRenderer::new(
                program.clone(),
                args.clone(),
                config.timeout(),
            )),
        }
    }
}

impl Renderer for AnyRenderer {
    async fn render(&self, url: &str) -> anyhow::Result<String> {
        match self {
            Self::Chrome(r) => r.render(url).await,
            Self::Script(r) => r.render(url).await,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("page too small: {size} < {min} bytes")]
    TooSmall { size: usize, min: usize },
    #[error("render failed: {0:#}")]
    Render(anyhow::Error),
    #[error("all {attempts} attempts failed for {url}: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

/// Longest pause between two attempts, whatever the backoff works out to.
pub const MAX_WAIT: Duration = Duration::from_secs(3600);

/// Renders a page, retrying with growing pauses until it looks fully loaded.
pub struct Fetcher<R> {
    renderer: R,
    retries: u32,
    delay: Duration,
    backoff: f64,
    min_html_size: usize,
}

impl<R: Renderer> Fetcher<R> {
    pub fn new(renderer: R, config: &CrawlerConfig) -> Self {
        Self {
            renderer,
            retries: config.retries.max(1),
            delay: Duration::from_millis(config.delay_ms),
            backoff: config.backoff,
            min_html_size: config.min_html_size,
        }
    }

    /// Pause after the failed `attempt` (1-based): `delay * backoff^(attempt - 1)`,
    /// capped at [`MAX_WAIT`].
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.delay.as_secs_f64() * self.backoff.powi(exp);
        Duration::try_from_secs_f64(secs).map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
    }

    async fn attempt(&self, url: &str) -> Result<String, FetchError> {
        let html = self.renderer.render(url).await.map_err(FetchError::Render)?;
        if html.len() >= self.min_html_size {
            Ok(html)
        } else {
            Err(FetchError::TooSmall {
                size: html.len(),
                min: self.min_html_size,
            })
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        tracing::info!(target: "fetch", "\x1b[33mfetching\x1b[0m {url} ...");

        let mut attempt = 1;
        loop {
            let err = match self.attempt(url).await {
                Ok(html) => {
                    tracing::info!(target: "fetch", "\x1b[36m{url}\x1b[0m: {} bytes on attempt {attempt}/{}", html.len(), self.retries);
                    return Ok(html);
                }
                Err(err) => err,
            };
            match &err {
                FetchError::TooSmall { .. } => {
                    tracing::warn!(target: "fetch", "{url} attempt {attempt}/{}: {err}", self.retries);
                }
                _ => tracing::error!(target: "fetch", "\x1b[31m{url}\x1b[0m attempt {attempt}/{}: {err}", self.retries),
            }

            if attempt >= self.retries {
                return Err(FetchError::Exhausted {
                    url: url.to_owned(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let wait = self.backoff_delay(attempt);
            tracing::info!(target: "fetch", "retrying in {wait:?}");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;

    struct Scripted {
        replies: Mutex<VecDeque<anyhow::Result<String>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = anyhow::Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Renderer for Scripted {
        async fn render(&self, _url: &str) -> anyhow::Result<String> {
            self.calls.lock().push(Instant::now());
            self.replies.lock().pop_front().unwrap_or_else(|| Err(anyhow::anyhow!("no more replies")))
        }
    }

    fn config(min_html_size: usize) -> CrawlerConfig {
        CrawlerConfig {
            min_html_size,
            ..CrawlerConfig::default()
        }
    }

    fn page(len: usize) -> anyhow::Result<String> {
        Ok("x".repeat(len))
    }

    #[test]
    fn delays_grow_geometrically() {
        let fetcher = Fetcher::new(Scripted::new([]), &config(10));
        assert_eq!(fetcher.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(fetcher.backoff_delay(2), Duration::from_millis(1500));
        assert_eq!(fetcher.backoff_delay(3), Duration::from_millis(2250));
    }

    #[test]
    fn huge_backoff_is_capped() {
        let config = CrawlerConfig {
            retries: 60,
            backoff: 3.0,
            ..config(10)
        };
        let fetcher = Fetcher::new(Scripted::new([]), &config);
        assert_eq!(fetcher.backoff_delay(59), MAX_WAIT);
        assert_eq!(fetcher.backoff_delay(u32::MAX), MAX_WAIT);
        assert_eq!(fetcher.backoff_delay(8), Duration::from_millis(2_187_000));
        assert_eq!(fetcher.backoff_delay(9), MAX_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn big_enough_page_returns_immediately() {
        let renderer = Scripted::new([page(10)]);
        let fetcher = Fetcher::new(&renderer, &config(10));
        assert_eq!(fetcher.fetch("https://example.test/").await.unwrap().len(), 10);
        assert_eq!(renderer.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_small_pages_then_succeeds() {
        let renderer = Scripted::new([page(3), page(9), page(12)]);
        let fetcher = Fetcher::new(&renderer, &config(10));
        let start = Instant::now();
        let html = fetcher.fetch("https://example.test/").await.unwrap();
        assert_eq!(html.len(), 12);

        let calls = renderer.calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_millis(1000));
        assert_eq!(calls[2] - calls[1], Duration::from_millis(1500));
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn render_errors_are_retried() {
        let renderer = Scripted::new([Err(anyhow::anyhow!("chrome crashed")), page(10)]);
        let fetcher = Fetcher::new(&renderer, &config(10));
        assert!(fetcher.fetch("https://example.test/").await.is_ok());
        assert_eq!(renderer.calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_last_attempt_without_trailing_sleep() {
        let renderer = Scripted::new([page(1), page(1), page(1), page(100)]);
        let fetcher = Fetcher::new(&renderer, &config(10));
        let start = Instant::now();
        let err = fetcher.fetch("https://example.test/a").await.unwrap_err();
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
        assert_eq!(renderer.calls.lock().len(), 3);
        match err {
            FetchError::Exhausted { url, attempts, last } => {
                assert_eq!(url, "https://example.test/a");
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::TooSmall { size: 1, min: 10 }));
            }
            other => panic!("unexpected {other}"),
        }
    }
}
