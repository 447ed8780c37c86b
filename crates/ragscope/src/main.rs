mod client;
mod demo;
mod output;
mod server;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ragscope_core::config::Config;
use ragscope_core::time::parse_duration_str;
use ragscope_export::forward::{ForwardConfig, build_forwarder};
use ragscope_export::{CompletionFeed, ExportPipeline, ExportSink, JsonLinesSink, PipelineConfig};
use ragscope_store::TraceStore;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::client::ApiClient;
use crate::output::{print_export_human, print_metrics_human, print_stats_human, print_trace_human};
use crate::telemetry::{LogFormat, init_cli_tracing, init_run_tracing, shutdown_tracing};

#[derive(Parser, Debug)]
#[command(name = "ragscope")]
#[command(about = "Trace, score and price RAG queries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "Address of a running `ragscope run`")]
    addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Serve the trace API, reap stale traces and export completions")]
    Run {
        #[arg(long)]
        http_addr: Option<String>,
        #[arg(long, help = "Abandon in-progress traces older than this (e.g. 5m)")]
        trace_timeout: Option<String>,
        #[arg(long, help = "Append finalized traces to this JSON-lines file")]
        export_path: Option<PathBuf>,
        #[arg(long, help = "POST finalized traces to this collector")]
        export_endpoint: Option<String>,
    },
    #[command(about = "Show session statistics")]
    Stats,
    #[command(about = "Inspect one trace")]
    Trace { trace_id: String },
    #[command(about = "Dump the session with every trace")]
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    #[command(about = "Clear session history")]
    Reset,
    #[command(about = "Replay sample fintech queries in-process")]
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            http_addr,
            trace_timeout,
            export_path,
            export_endpoint,
        } => {
            let mut cfg = Config::load().context("load config")?;
            if let Some(v) = http_addr {
                cfg.http_addr = v;
            }
            if let Some(v) = trace_timeout {
                cfg.trace_timeout = parse_duration_str(&v)?;
            }
            if let Some(v) = export_path {
                cfg.export_path = Some(v);
            }
            if let Some(v) = export_endpoint {
                cfg.export_endpoint = Some(v);
            }
            cfg.validate()?;
            init_run_tracing(LogFormat::from_env());
            run_server(cfg).await
        }
        Commands::Stats => {
            init_cli_tracing();
            let stats = ApiClient::connect(cli.addr)?.session_stats().await?;
            if cli.json {
                print_json(&stats)
            } else {
                print_stats_human(&stats);
                Ok(())
            }
        }
        Commands::Trace { trace_id } => {
            init_cli_tracing();
            let trace = ApiClient::connect(cli.addr)?.trace(&trace_id).await?;
            if cli.json {
                print_json(&trace)
            } else {
                print_trace_human(&trace);
                Ok(())
            }
        }
        Commands::Export { out } => {
            init_cli_tracing();
            let export = ApiClient::connect(cli.addr)?.export().await?;
            match out {
                Some(path) => {
                    let payload = serde_json::to_vec_pretty(&export)?;
                    std::fs::write(&path, payload)
                        .with_context(|| format!("write export to {}", path.display()))?;
                    eprintln!(
                        "wrote {} traces to {}",
                        export.traces.len(),
                        path.display()
                    );
                    Ok(())
                }
                None if cli.json => print_json(&export),
                None => {
                    print_export_human(&export);
                    Ok(())
                }
            }
        }
        Commands::Reset => {
            init_cli_tracing();
            ApiClient::connect(cli.addr)?.reset().await?;
            if cli.json {
                print_json(&serde_json::json!({"reset": true}))
            } else {
                println!("session reset");
                Ok(())
            }
        }
        Commands::Demo => {
            init_cli_tracing();
            let cfg = Config::load().context("load config")?;
            let report = demo::run_demo(&cfg)?;
            if cli.json {
                return print_json(&report.export);
            }
            for (query, metrics) in &report.traces {
                println!("Q: {query}");
                print_metrics_human(metrics);
                println!();
            }
            print_stats_human(&report.export.session_stats);
            Ok(())
        }
    }
}

async fn run_server(cfg: Config) -> anyhow::Result<()> {
    let store = TraceStore::from_config(&cfg);
    let addr: SocketAddr = cfg
        .http_addr
        .parse()
        .with_context(|| format!("invalid http_addr {}", cfg.http_addr))?;

    eprintln!("ragscope run");
    eprintln!("  http: {addr}");
    eprintln!(
        "  trace timeout: {}",
        humantime::format_duration(cfg.trace_timeout)
    );
    if let Some(path) = &cfg.export_path {
        eprintln!("  export file: {}", path.display());
    }
    if let Some(endpoint) = &cfg.export_endpoint {
        eprintln!("  export endpoint: {endpoint}");
    }

    let reaper = store.spawn_reaper(cfg.trace_timeout, cfg.reap_interval);
    let export = start_export(&cfg, &store)?;
    let http_task = tokio::spawn(server::serve(store.clone(), addr));
    let http_abort = http_task.abort_handle();

    tokio::select! {
        res = http_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    http_abort.abort();
    reaper.abort();
    if let Some(export) = export {
        export.shutdown(cfg.export_timeout).await;
    }
    shutdown_tracing();
    Ok(())
}

struct ExportHandles {
    pipeline: ExportPipeline,
    feed: CompletionFeed,
    forwarder: Option<JoinHandle<()>>,
}

impl ExportHandles {
    /// Exports every completion published so far, then gives queued HTTP
    /// batches one full retry cycle to land.
    async fn shutdown(self, forward_timeout: Duration) {
        self.feed.drain().await;
        self.pipeline.shutdown().await;
        if let Some(task) = self.forwarder
            && tokio::time::timeout(forward_timeout * 3, task).await.is_err()
        {
            tracing::warn!("forwarder still busy at shutdown; pending batches dropped");
        }
    }
}

fn start_export(cfg: &Config, store: &TraceStore) -> anyhow::Result<Option<ExportHandles>> {
    let mut sinks: Vec<Arc<dyn ExportSink>> = Vec::new();
    if let Some(path) = &cfg.export_path {
        sinks.push(Arc::new(JsonLinesSink::open(path)?));
    }
    let mut forwarder = None;
    if let Some((sink, task)) = build_forwarder(ForwardConfig::from_config(cfg)) {
        sinks.push(Arc::new(sink));
        forwarder = Some(task);
    }
    if sinks.is_empty() {
        return Ok(None);
    }

    let pipeline = ExportPipeline::new(sinks, PipelineConfig::from_config(cfg));
    let feed = pipeline.attach(store);
    Ok(Some(ExportHandles {
        pipeline,
        feed,
        forwarder,
    }))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
