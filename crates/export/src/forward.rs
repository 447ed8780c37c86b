use std::io::Write;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use ragscope_core::config::Config;
use ragscope_core::error::{RagscopeError, Result};
use ragscope_core::model::metrics::FlatDocument;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::sink::ExportSink;

pub const TRACES_PATH: &str = "/v1/ragscope/traces";

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub endpoint: String,
    pub compression: ForwardCompression,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ForwardConfig {
    /// `None` unless an export endpoint is configured.
    pub fn from_config(cfg: &Config) -> Option<Self> {
        let endpoint = cfg.export_endpoint.as_ref()?;
        Some(Self {
            endpoint: endpoint.clone(),
            compression: ForwardCompression::parse(&cfg.export_compression),
            headers: cfg.export_headers.clone(),
            timeout: cfg.export_timeout,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardCompression {
    None,
    Gzip,
}

impl ForwardCompression {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "gzip" => Self::Gzip,
            _ => Self::None,
        }
    }
}

/// Posts batches as a JSON array to `{endpoint}/v1/ragscope/traces`.
#[derive(Clone)]
pub struct Forwarder {
    tx: mpsc::Sender<Vec<FlatDocument>>,
}

/// The returned task finishes once every [`Forwarder`] is dropped and the
/// queued batches have been posted.
pub fn build_forwarder(cfg: Option<ForwardConfig>) -> Option<(Forwarder, JoinHandle<()>)> {
    let cfg = cfg?;
    let (tx, mut rx) = mpsc::channel::<Vec<FlatDocument>>(512);

    let task = tokio::spawn(async move {
        let url = format!("{}{TRACES_PATH}", normalize_endpoint(&cfg.endpoint));
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = ?e, "failed to build forward http client; using defaults");
                Client::new()
            });
        let headers = build_http_headers(&cfg.headers);

        while let Some(batch) = rx.recv().await {
            let body = match serde_json::to_vec(&batch) {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode forward batch");
                    continue;
                }
            };
            forward_http_with_retries(&client, &url, &headers, body, cfg.compression).await;
        }
    });

    Some((Forwarder { tx }, task))
}

impl ExportSink for Forwarder {
    fn name(&self) -> &'static str {
        "http"
    }

    fn write_batch(&self, docs: &[FlatDocument]) -> Result<()> {
        self.tx.try_send(docs.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => {
                RagscopeError::Export("forward queue full; batch dropped".to_string())
            }
            TrySendError::Closed(_) => {
                RagscopeError::Export("forwarder stopped; batch dropped".to_string())
            }
        })
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

async fn forward_http_with_retries(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    body: Vec<u8>,
    compression: ForwardCompression,
) {
    let Ok((body, content_encoding)) = maybe_compress_http_body(body, compression) else {
        tracing::warn!(url = %url, "failed to compress forward HTTP payload");
        return;
    };

    for attempt in 0..3u64 {
        let mut req = client
            .post(url)
            .header("content-type", "application/json")
            .headers(headers.clone());
        if let Some(encoding) = content_encoding {
            req = req.header("content-encoding", encoding);
        }
        let result = req.body(body.clone()).send().await;
        if let Ok(resp) = result
            && resp.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(30 * (attempt + 1))).await;
    }
    tracing::warn!(url = %url, "forward HTTP attempt failed after retries");
}

fn build_http_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::try_from(k.as_str());
        let value = HeaderValue::try_from(v.as_str());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => {
                tracing::warn!(header = %k, "ignored invalid forward HTTP header");
            }
        }
    }
    out
}

fn maybe_compress_http_body(
    body: Vec<u8>,
    compression: ForwardCompression,
) -> std::io::Result<(Vec<u8>, Option<&'static str>)> {
    match compression {
        ForwardCompression::None => Ok((body, None)),
        ForwardCompression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            let compressed = encoder.finish()?;
            Ok((compressed, Some("gzip")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::routing::post;
    use flate2::read::GzDecoder;
    use serde_json::{Value, json};

    use super::*;

    #[derive(Clone, Default)]
    struct Received {
        bodies: Arc<Mutex<Vec<(Option<String>, Option<String>, Vec<u8>)>>>,
    }

    async fn capture(State(rx): State<Received>, headers: AxumHeaders, body: Bytes) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        rx.bodies.lock().unwrap().push((
            header("content-encoding"),
            header("x-tenant"),
            body.to_vec(),
        ));
    }

    #[test]
    fn forward_compression_parse_variants() {
        assert_eq!(ForwardCompression::parse("gzip"), ForwardCompression::Gzip);
        assert_eq!(ForwardCompression::parse("GZIP"), ForwardCompression::Gzip);
        assert_eq!(ForwardCompression::parse("none"), ForwardCompression::None);
        assert_eq!(
            ForwardCompression::parse("unexpected"),
            ForwardCompression::None
        );
    }

    #[test]
    fn endpoints_gain_scheme_and_lose_trailing_slash() {
        assert_eq!(normalize_endpoint("127.0.0.1:9000/"), "http://127.0.0.1:9000");
        assert_eq!(normalize_endpoint("https://collector"), "https://collector");
    }

    #[test]
    fn forward_config_requires_endpoint() {
        let mut cfg = Config::default();
        assert!(ForwardConfig::from_config(&cfg).is_none());
        cfg.export_endpoint = Some("http://127.0.0.1:9000".into());
        cfg.export_compression = "gzip".into();
        let fwd = ForwardConfig::from_config(&cfg).unwrap();
        assert_eq!(fwd.compression, ForwardCompression::Gzip);
        assert_eq!(fwd.timeout, cfg.export_timeout);
    }

    #[tokio::test]
    async fn forwarder_posts_gzipped_json_batches() {
        let received = Received::default();
        let app = Router::new()
            .route(TRACES_PATH, post(capture))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (forwarder, task) = build_forwarder(Some(ForwardConfig {
            endpoint: addr.to_string(),
            compression: ForwardCompression::Gzip,
            headers: vec![("x-tenant".into(), "dev".into())],
            timeout: Duration::from_secs(2),
        }))
        .unwrap();

        let mut doc = FlatDocument::new();
        doc.insert("trace_id".into(), json!("trace_1_0"));
        forwarder.write_batch(&[doc]).unwrap();
        drop(forwarder);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        let bodies = received.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        let (encoding, tenant, raw) = &bodies[0];
        assert_eq!(encoding.as_deref(), Some("gzip"));
        assert_eq!(tenant.as_deref(), Some("dev"));
        let mut json_text = String::new();
        GzDecoder::new(raw.as_slice())
            .read_to_string(&mut json_text)
            .unwrap();
        let value: Value = serde_json::from_str(&json_text).unwrap();
        assert_eq!(value, json!([{"trace_id": "trace_1_0"}]));
    }
}
