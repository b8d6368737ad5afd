//! Pericope 命令行入口
//!
//! 用法: pericope [--config FILE] [--force-regroup] <reference>
//!
//! 对一个章节运行完整分析，进度事件以 NDJSON 逐行写到 stdout，日志写到 stderr。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use futures_util::StreamExt;
use pericope::analysis::{AnalysisOptions, Analyzer, ProgressStep};
use pericope::config::load_config;
use pericope::corpus::{CorpusSource, JsonCorpus};
use pericope::store::SqliteStore;

struct CliArgs {
    config: Option<PathBuf>,
    force_regroup: bool,
    reference: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut force_regroup = false;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config requires a file path")?;
                config = Some(PathBuf::from(path));
            }
            "--force-regroup" => force_regroup = true,
            "--help" | "-h" => {
                bail!("usage: pericope [--config FILE] [--force-regroup] <reference>")
            }
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        bail!("usage: pericope [--config FILE] [--force-regroup] <reference>");
    }
    Ok(CliArgs {
        config,
        force_regroup,
        // 允许不加引号：pericope 1 Samuel 3:1-4
        reference: words.join(" "),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pericope::observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;

    let store = SqliteStore::connect(&cfg.store.database_url, cfg.store.max_connections)
        .await
        .with_context(|| format!("Failed to open store {}", cfg.store.database_url))?;
    let corpus = JsonCorpus::from_path(&cfg.corpus.path);
    corpus
        .load()
        .await
        .with_context(|| format!("Failed to load corpus {}", cfg.corpus.path.display()))?;

    let analyzer = Arc::new(
        Analyzer::from_config(&cfg, Arc::new(store), Arc::new(corpus))
            .context("Failed to create analyzer")?,
    );

    let options = AnalysisOptions {
        force_regroup: args.force_regroup,
    };
    let mut stream = analyzer.run_full_analysis_stream(args.reference.clone(), options);
    let mut failed = false;
    while let Some(event) = stream.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if event.step == ProgressStep::Error {
            failed = true;
        }
    }

    if failed {
        bail!("Analysis of {} failed", args.reference);
    }
    Ok(())
}
