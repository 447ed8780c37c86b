use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cost::Pricing;
use crate::error::{RagscopeError, Result};
use crate::quality::QualityConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub http_addr: String,
    pub pricing: Pricing,
    pub quality: QualityConfig,
    pub trace_timeout: Duration,
    pub reap_interval: Duration,
    pub export_path: Option<PathBuf>,
    pub export_endpoint: Option<String>,
    pub export_compression: String,
    pub export_headers: Vec<(String, String)>,
    pub export_timeout: Duration,
    pub export_batch_size: usize,
    pub export_flush_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:4790".to_string(),
            pricing: Pricing::default(),
            quality: QualityConfig::default(),
            trace_timeout: Duration::from_secs(5 * 60),
            reap_interval: Duration::from_secs(30),
            export_path: None,
            export_endpoint: None,
            export_compression: "none".to_string(),
            export_headers: Vec::new(),
            export_timeout: Duration::from_secs(10),
            export_batch_size: 64,
            export_flush_ms: 500,
        }
    }
}

impl Config {
    /// Defaults, then the config file, then `RAGSCOPE_*` environment.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("input_cost_per_1k", self.pricing.input_rate_per_1k),
            ("output_cost_per_1k", self.pricing.output_rate_per_1k),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(RagscopeError::Config(format!(
                    "{name} must be a non-negative number, got {rate}"
                )));
            }
        }
        if self.trace_timeout.is_zero() {
            return Err(RagscopeError::Config(
                "trace_timeout must be positive".to_string(),
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(RagscopeError::Config(
                "reap_interval must be positive".to_string(),
            ));
        }
        if self.export_batch_size == 0 {
            return Err(RagscopeError::Config(
                "export_batch_size must be positive".to_string(),
            ));
        }
        self.quality.validate()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    http_addr: Option<String>,
    input_cost_per_1k: Option<f64>,
    output_cost_per_1k: Option<f64>,
    trace_timeout: Option<String>,
    reap_interval: Option<String>,
    quality: Option<QualityConfig>,
    export_path: Option<PathBuf>,
    export_endpoint: Option<String>,
    export_compression: Option<String>,
    export_headers: Option<String>,
    export_timeout: Option<String>,
    export_batch_size: Option<usize>,
    export_flush_ms: Option<u64>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("RAGSCOPE_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("ragscope/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| RagscopeError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| RagscopeError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        http_addr: env::var("RAGSCOPE_HTTP_ADDR").ok(),
        input_cost_per_1k: env_f64("RAGSCOPE_INPUT_COST")?,
        output_cost_per_1k: env_f64("RAGSCOPE_OUTPUT_COST")?,
        trace_timeout: env::var("RAGSCOPE_TRACE_TIMEOUT").ok(),
        reap_interval: env::var("RAGSCOPE_REAP_INTERVAL").ok(),
        quality: None,
        export_path: env::var("RAGSCOPE_EXPORT_PATH").ok().map(PathBuf::from),
        export_endpoint: env::var("RAGSCOPE_EXPORT_ENDPOINT").ok(),
        export_compression: env::var("RAGSCOPE_EXPORT_COMPRESSION").ok(),
        export_headers: env::var("RAGSCOPE_EXPORT_HEADERS").ok(),
        export_timeout: env::var("RAGSCOPE_EXPORT_TIMEOUT").ok(),
        export_batch_size: None,
        export_flush_ms: None,
    })
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match env::var(key) {
        Ok(v) => v
            .parse::<f64>()
            .map(Some)
            .map_err(|e| RagscopeError::Config(format!("bad {key} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.http_addr {
        cfg.http_addr = v;
    }
    if let Some(v) = overrides.input_cost_per_1k {
        cfg.pricing.input_rate_per_1k = v;
    }
    if let Some(v) = overrides.output_cost_per_1k {
        cfg.pricing.output_rate_per_1k = v;
    }
    if let Some(v) = overrides.trace_timeout {
        cfg.trace_timeout = parse_duration(&v, "trace_timeout", source)?;
    }
    if let Some(v) = overrides.reap_interval {
        cfg.reap_interval = parse_duration(&v, "reap_interval", source)?;
    }
    if let Some(v) = overrides.quality {
        cfg.quality = v;
    }
    if let Some(v) = overrides.export_path {
        cfg.export_path = Some(v);
    }
    if let Some(v) = overrides.export_endpoint {
        cfg.export_endpoint = Some(v);
    }
    if let Some(v) = overrides.export_compression {
        cfg.export_compression = v;
    }
    if let Some(v) = overrides.export_headers {
        cfg.export_headers = parse_export_headers(&v).map_err(|e| {
            RagscopeError::Config(format!("bad export_headers in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.export_timeout {
        cfg.export_timeout = parse_duration(&v, "export_timeout", source)?;
    }
    if let Some(v) = overrides.export_batch_size {
        cfg.export_batch_size = v;
    }
    if let Some(v) = overrides.export_flush_ms {
        cfg.export_flush_ms = v;
    }
    Ok(())
}

fn parse_duration(value: &str, field: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        RagscopeError::Config(format!("bad {field} in {source}: {e} (value={value})"))
    })
}

fn parse_export_headers(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(RagscopeError::Config(
                "header entries must use key=value syntax".to_string(),
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(RagscopeError::Config(
                "header key cannot be empty".to_string(),
            ));
        }
        out.push((key.to_string(), value.trim().to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_reference_pricing_and_timeout() {
        let cfg = Config::default();
        assert_eq!(cfg.http_addr, "127.0.0.1:4790");
        assert_eq!(cfg.pricing.input_rate_per_1k, 0.00001);
        assert_eq!(cfg.pricing.output_rate_per_1k, 0.00003);
        assert_eq!(cfg.trace_timeout, Duration::from_secs(300));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_export_headers_accepts_list() {
        let headers = parse_export_headers("x-tenant=dev,authorization=Bearer token").unwrap();
        assert_eq!(
            headers,
            vec![
                ("x-tenant".to_string(), "dev".to_string()),
                ("authorization".to_string(), "Bearer token".to_string())
            ]
        );
    }

    #[test]
    fn parse_export_headers_rejects_bad_entries() {
        assert!(parse_export_headers("x-tenant").is_err());
        assert!(parse_export_headers("=dev").is_err());
    }

    #[test]
    fn file_overrides_parse_quality_table() {
        let raw = r#"
            input_cost_per_1k = 0.5
            trace_timeout = "90s"

            [quality]
            grounding_cutoff = 0.7
            uncertainty_phrases = ["no idea"]
        "#;
        let overrides: ConfigOverrides = toml::from_str(raw).unwrap();
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, overrides, "config file").unwrap();

        assert_eq!(cfg.pricing.input_rate_per_1k, 0.5);
        assert_eq!(cfg.pricing.output_rate_per_1k, 0.00003);
        assert_eq!(cfg.trace_timeout, Duration::from_secs(90));
        assert_eq!(cfg.quality.grounding_cutoff, 0.7);
        assert_eq!(cfg.quality.relevance_cutoff, 0.5);
        assert_eq!(cfg.quality.uncertainty_phrases, vec!["no idea".to_string()]);
        assert!(!cfg.quality.stop_words.is_empty());
    }

    #[test]
    fn apply_overrides_updates_export_fields() {
        let mut cfg = Config::default();
        let file = ConfigOverrides {
            export_endpoint: Some("http://127.0.0.1:9000".to_string()),
            export_compression: Some("gzip".to_string()),
            export_headers: Some("x-tenant=dev".to_string()),
            export_timeout: Some("3s".to_string()),
            export_batch_size: Some(8),
            ..ConfigOverrides::default()
        };

        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert_eq!(
            cfg.export_endpoint,
            Some("http://127.0.0.1:9000".to_string())
        );
        assert_eq!(cfg.export_compression, "gzip");
        assert_eq!(
            cfg.export_headers,
            vec![("x-tenant".to_string(), "dev".to_string())]
        );
        assert_eq!(cfg.export_timeout, Duration::from_secs(3));
        assert_eq!(cfg.export_batch_size, 8);
    }

    #[test]
    fn bad_duration_names_its_source() {
        let mut cfg = Config::default();
        let err = apply_overrides(
            &mut cfg,
            ConfigOverrides {
                reap_interval: Some("often".to_string()),
                ..ConfigOverrides::default()
            },
            "environment",
        )
        .unwrap_err();
        assert!(err.to_string().contains("reap_interval in environment"));
    }

    #[test]
    fn validate_rejects_negative_rates() {
        let mut cfg = Config::default();
        cfg.pricing.output_rate_per_1k = -1.0;
        assert!(matches!(cfg.validate(), Err(RagscopeError::Config(_))));
    }
}
