use core::time::Duration;
use std::{ffi::OsStr, time::Instant};

use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::task::spawn_blocking;

use super::Renderer;
use crate::config::CrawlerConfig;

const ARGS: [&str; 7] = [
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--no-first-run",
    "--no-zygote",
    "--disable-gpu",
];

/// Same pattern the damage extractor looks for, checked against the visible text.
const METER_PROBE: &str = r"/[0-9,]{7,}/.test(document.body ? document.body.innerText : '')";

#[derive(Clone, Debug)]
pub struct ChromeRenderer {
    headless: bool,
    proxy: Option<String>,
    user_agent: String,
    timeout: Duration,
    wait_for_data: Duration,
    settle: Duration,
}

/// Polls the page until a meter-sized number shows up or `limit` passes.
fn wait_for_meter(tab: &Tab, limit: Duration) -> bool {
    const PERIOD: Duration = Duration::from_millis(1832 / 4);

    let deadline = Instant::now() + limit;
    loop {
        let found = tab
            .evaluate(METER_PROBE, false)
            .ok()
            .and_then(|r| r.value)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if found {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        std::thread::sleep(PERIOD);
    }
}

impl ChromeRenderer {
    pub fn new(headless: bool, config: &CrawlerConfig) -> Self {
        Self {
            headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            wait_for_data: config.wait_for_data(),
            settle: config.settle(),
        }
    }

    fn launch(&self) -> anyhow::Result<Browser> {
        Browser::new(LaunchOptions {
            args: ARGS.iter().map(OsStr::new).collect(),
            headless: self.headless,
            sandbox: false,
            proxy_server: self.proxy.as_deref(),
            idle_browser_timeout: self.timeout + self.wait_for_data + self.settle,
            ..LaunchOptions::default()
        })
    }

    fn render_blocking(&self, url: &str) -> anyhow::Result<String> {
        // a fresh browser per page, so its initial blank tab can stay behind
        let browser = self.launch()?;
        let tab = browser.new_tab()?;

        tab.set_default_timeout(self.timeout);
        tab.set_user_agent(&self.user_agent, None, None)?;
        tab.navigate_to(url)?.wait_until_navigated()?;

        if wait_for_meter(&tab, self.wait_for_data) {
            tracing::debug!(target: "chrome", "{url}: meter present");
        } else {
            tracing::info!(target: "chrome", "{url}: no meter after {:?}, taking the page as is", self.wait_for_data);
        }

        std::thread::sleep(self.settle);
        tab.get_content()
    }
}

impl Renderer for ChromeRenderer {
    async fn render(&self, url: &str) -> anyhow::Result<String> {
        let this = self.clone();
        let url = url.to_owned();

        spawn_blocking(move || this.render_blocking(&url)).await?
    }
}
