//! Concrete capability providers wired in by the server binary.
//!
//! The engine only sees the `TextGenerator` and `CodeRunner` traits; these
//! adapters bind them to an Ollama-compatible HTTP endpoint and a local
//! `python3` subprocess.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use conductor_core::capability::{CodeRunner, TextGenerator};

// ---------------------------------------------------------------------------
// HTTP text generator
// ---------------------------------------------------------------------------

/// A [`TextGenerator`] speaking the Ollama `/api/generate` contract.
pub struct HttpTextGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpTextGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("model request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("model endpoint returned {status}: {detail}");
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("model endpoint returned an unexpected body")?;
        Ok(parsed.response)
    }
}

// ---------------------------------------------------------------------------
// Python subprocess runner
// ---------------------------------------------------------------------------

/// A [`CodeRunner`] executing snippets with a local `python3` under a wall
/// time limit.
///
/// This is process-level isolation only; deployments that need stronger
/// sandboxing should put a container-backed implementation behind the same
/// trait.
pub struct PythonCodeRunner {
    interpreter: String,
    timeout: Duration,
}

impl PythonCodeRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            interpreter: "python3".to_owned(),
            timeout,
        }
    }

    /// Override the interpreter binary (tests use `sh`-style stand-ins).
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

#[async_trait]
impl CodeRunner for PythonCodeRunner {
    async fn run(&self, code: &str) -> Result<String> {
        let mut script = tempfile::NamedTempFile::with_suffix(".py")
            .context("failed to create script file")?;
        script
            .write_all(code.as_bytes())
            .context("failed to write script file")?;
        script.flush().context("failed to flush script file")?;

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.interpreter)
                .arg(script.path())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("code execution timed out after {:?}", self.timeout))?
        .with_context(|| format!("failed to spawn {}", self.interpreter))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            bail!(
                "script exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runner_captures_stdout() {
        let runner = PythonCodeRunner::new(Duration::from_secs(10));
        match runner.run("print(21 * 2)").await {
            Ok(output) => assert_eq!(output.trim(), "42"),
            // Hosts without python3 still exercise the spawn-error path.
            Err(e) => assert!(format!("{e:#}").contains("python3")),
        }
    }

    #[tokio::test]
    async fn runner_reports_nonzero_exit() {
        let runner = PythonCodeRunner::new(Duration::from_secs(10));
        if let Err(e) = runner.run("import sys; sys.exit(3)").await {
            let text = format!("{e:#}");
            assert!(text.contains("exited with") || text.contains("python3"));
        } else {
            panic!("nonzero exit should be an error");
        }
    }

    #[tokio::test]
    async fn missing_interpreter_is_an_error() {
        let runner =
            PythonCodeRunner::new(Duration::from_secs(5)).with_interpreter("definitely-not-a-real-binary");
        let err = runner.run("print(1)").await.unwrap_err();
        assert!(format!("{e:#}", e = err).contains("definitely-not-a-real-binary"));
    }
}
