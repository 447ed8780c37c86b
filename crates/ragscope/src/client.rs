use anyhow::Context;
use ragscope_core::model::trace::Trace;
use ragscope_core::query::{ErrorBody, SessionExport, SessionStats};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

pub const DEFAULT_ADDR: &str = "127.0.0.1:4790";

/// Talks to the HTTP facade of a running `ragscope run`.
pub struct ApiClient {
    http: Client,
    base: String,
}

impl ApiClient {
    pub fn connect(addr: Option<String>) -> anyhow::Result<Self> {
        let addr = addr
            .or_else(|| std::env::var("RAGSCOPE_HTTP_ADDR").ok())
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build HTTP client")?;
        Ok(Self { http, base })
    }

    pub async fn session_stats(&self) -> anyhow::Result<SessionStats> {
        let resp = self.send(self.http.get(self.url("/v1/session"))).await?;
        decode(resp).await
    }

    pub async fn trace(&self, trace_id: &str) -> anyhow::Result<Trace> {
        let resp = self
            .send(self.http.get(self.url(&format!("/v1/traces/{trace_id}"))))
            .await?;
        decode(resp).await
    }

    pub async fn export(&self) -> anyhow::Result<SessionExport> {
        let resp = self.send(self.http.get(self.url("/v1/export"))).await?;
        decode(resp).await
    }

    pub async fn reset(&self) -> anyhow::Result<()> {
        self.send(self.http.delete(self.url("/v1/session"))).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> anyhow::Result<Response> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("connect to ragscope at {}", self.base))?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        match resp.json::<ErrorBody>().await {
            Ok(body) => anyhow::bail!("{}: {}", body.kind, body.message),
            Err(_) => anyhow::bail!("request failed with status {status}"),
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> anyhow::Result<T> {
    resp.json::<T>().await.context("decode ragscope response")
}
