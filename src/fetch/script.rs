use core::time::Duration;
use std::process::Stdio;

use tokio::process::Command;

use super::Renderer;

/// Headroom on top of the page timeout for the browser to start and shut down.
const GRACE: Duration = Duration::from_secs(10);

/// Runs `program args... <url> <timeout_ms>` and takes its stdout as the page.
#[derive(Clone, Debug)]
pub struct ScriptRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    grace: Duration,
}

impl ScriptRenderer {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
            grace: GRACE,
        }
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl Renderer for ScriptRenderer {
    async fn render(&self, url: &str) -> anyhow::Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(url)
            .arg(self.timeout.as_millis().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let limit = self.timeout + self.grace;
        let output = tokio::time::timeout(limit, command.output())
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {limit:?}", self.program))??;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim(),
            );
        }

        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        if html.trim().is_empty() {
            anyhow::bail!("{} printed nothing", self.program);
        }
        Ok(html)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> ScriptRenderer {
        ScriptRenderer::new(
            "sh".to_owned(),
            vec!["-c".to_owned(), script.to_owned(), "sh".to_owned()],
            timeout,
        )
    }

    #[tokio::test]
    async fn passes_url_and_timeout() {
        let r = sh(r#"printf '%s|%s' "$1" "$2""#, Duration::from_secs(60));
        assert_eq!(r.render("https://dundam.xyz/c?x=1").await.unwrap(), "https://dundam.xyz/c?x=1|60000");
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let r = sh("echo boom >&2; exit 3", Duration::from_secs(5));
        let err = r.render("u").await.unwrap_err().to_string();
        assert!(err.contains("boom"), "{err}");
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let r = sh("printf '  \n'", Duration::from_secs(5));
        assert!(r.render("u").await.is_err());
    }

    #[tokio::test]
    async fn hung_script_times_out() {
        let r = sh("sleep 5", Duration::from_millis(100)).with_grace(Duration::from_millis(100));
        let err = r.render("u").await.unwrap_err().to_string();
        assert!(err.contains("timed out"), "{err}");
    }
}
