//! Collaborators that turn a reference into raw dashboard text.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use grafop_core::{Error, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use url::Url;

/// Fetches the body of a remote dashboard document.
#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Evaluates jsonnet source with `base_path` on the import path.
#[async_trait]
pub trait TemplateEngine: Send + Sync {
    async fn evaluate(&self, name: &str, source: &str, base_path: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::fatal(format!("building http client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl UrlFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let resp = self.http.get(url.clone()).send().await.map_err(|e| Error::Network(format!("cannot request {}: {}", url, e)))?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Remote { status: status.as_u16(), context: format!("fetching {}", url) });
        }
        resp.text().await.map_err(|e| Error::Network(format!("reading {}: {}", url, e)))
    }
}

/// Runs the `jsonnet` binary with the source on stdin.
#[derive(Debug, Clone)]
pub struct JsonnetCli {
    bin: PathBuf,
    timeout: Duration,
}

impl JsonnetCli {
    pub fn new(bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { bin: bin.into(), timeout }
    }
}

#[async_trait]
impl TemplateEngine for JsonnetCli {
    async fn evaluate(&self, name: &str, source: &str, base_path: &str) -> Result<String> {
        debug!(template = name, bin = %self.bin.display(), "evaluating jsonnet");
        let mut child = Command::new(&self.bin)
            .arg("-J")
            .arg(base_path)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::fatal(format!("spawning {}: {}", self.bin.display(), e)))?;

        // one bound for feeding stdin and collecting output: a child that
        // never reads stdin must not stall the write
        let run = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(source.as_bytes())
                    .await
                    .map_err(|e| Error::fatal(format!("writing jsonnet source for {}: {}", name, e)))?;
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| Error::fatal(format!("running jsonnet for {}: {}", name, e)))
        };
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| Error::Network(format!("jsonnet evaluation of {} timed out", name)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::validation(format!("jsonnet {}: {}", name, stderr.trim())));
        }
        String::from_utf8(output.stdout).map_err(|e| Error::validation(format!("jsonnet {} output: {}", name, e)))
    }
}
