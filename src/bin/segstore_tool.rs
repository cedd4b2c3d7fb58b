//! segstore-tool: offline maintenance for a partition directory.
//!
//! Usage:
//!   segstore-tool inspect <partition-dir>
//!   segstore-tool merge <partition-dir> <config.json> [task.json]
//!   segstore-tool gc <partition-dir>

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};

use segstore::merge::{effective_merge_policy, run_merge, CancelToken, MergeExecutor, MergeTask};
use segstore::metrics::{Metrics, MetricsSink};
use segstore::{EngineConfig, Partition};

const USAGE: &str = "Usage:
  segstore-tool inspect <partition-dir>
  segstore-tool merge <partition-dir> <config.json> [task.json]
  segstore-tool gc <partition-dir>";

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("segstore-tool {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("segstore-tool {}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("{}", USAGE);
        std::process::exit(0);
    }

    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    if let Err(e) = run(&args[1..]) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> anyhow::Result<()> {
    match args {
        [cmd, dir] if cmd == "inspect" => inspect(Path::new(dir)),
        [cmd, dir, config] if cmd == "merge" => merge(Path::new(dir), Path::new(config), None),
        [cmd, dir, config, task] if cmd == "merge" => {
            merge(Path::new(dir), Path::new(config), Some(Path::new(task)))
        }
        [cmd, dir] if cmd == "gc" => gc(Path::new(dir)),
        _ => bail!("invalid arguments\n{}", USAGE),
    }
}

fn open(dir: &Path) -> anyhow::Result<Partition> {
    Partition::open(dir).with_context(|| format!("failed to open partition {}", dir.display()))
}

fn inspect(dir: &Path) -> anyhow::Result<()> {
    let partition = open(dir)?;
    let snapshot = partition.snapshot();
    println!("table:    {}", partition.schema().table_name);
    println!("version:  {}", snapshot.version());
    println!("locator:  {}", snapshot.locator());
    println!(
        "docs:     {} ({} live)",
        snapshot.doc_count(),
        snapshot.live_doc_count()
    );
    println!();
    println!("{:>8} {:>10} {:>10} {:>8}  locator", "segment", "docs", "deleted", "merged");
    for entry in snapshot.entries() {
        let info = entry.segment.info();
        println!(
            "{:>8} {:>10} {:>10} {:>8}  {}",
            entry.segment.id(),
            info.doc_count,
            entry.deleted.len(),
            info.merged,
            info.locator
        );
    }
    Ok(())
}

fn merge(dir: &Path, config_path: &Path, task_path: Option<&Path>) -> anyhow::Result<()> {
    let config = EngineConfig::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let partition = open(dir)?;
    if **partition.schema() != config.schema {
        bail!("config schema does not match partition {}", dir.display());
    }

    let task = match task_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read task {}", path.display()))?;
            Some(MergeTask::parse(&text)?)
        }
        None => None,
    };
    let policy = effective_merge_policy(&config.merge.table_type, &config.merge.params)?;
    let metrics = Arc::new(Metrics::new());
    let executor = MergeExecutor::new(&config, Some(metrics.clone() as Arc<dyn MetricsSink>));

    match run_merge(&partition, &executor, &policy, task, &CancelToken::new())? {
        Some(summary) => {
            println!(
                "merged {:?} -> {:?} (reclaimed {}, version {})",
                summary.inputs, summary.outputs, summary.docs_reclaimed, summary.version
            );
            let removed = partition.collect_garbage()?;
            println!("removed {} retired segment(s)", removed);
        }
        None => println!("nothing to merge"),
    }
    let stats = metrics.snapshot();
    println!(
        "docs_reclaimed={} postings_truncated={} reclaim_missing_attribute={}",
        stats.docs_reclaimed, stats.postings_truncated, stats.reclaim_missing_attribute
    );
    Ok(())
}

fn gc(dir: &Path) -> anyhow::Result<()> {
    let partition = open(dir)?;
    let removed = partition.collect_garbage()?;
    println!("removed {} segment director{}", removed, if removed == 1 { "y" } else { "ies" });
    Ok(())
}
