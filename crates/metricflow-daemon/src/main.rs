// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! metricflowd
//!
//! Runs the metric dispatch pipeline with the built-in output plugins.
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! metricflowd --config metricflow.toml
//!
//! # Generate an example configuration
//! metricflowd gen-config --output metricflow.toml
//!
//! # Try a filter against a sample metric
//! metricflowd check-filter --file filters.conf --filter main \
//!     --metric 'cpu{region="eu"} 0.5'
//! ```

mod config;
mod writers;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{
    load_local_filter, DaemonConfig, NotifierConfig, NotifierKind, OutputFormat, WriterConfig,
    WriterKind,
};
use metricflow::context::{self, PluginContext};
use metricflow::{
    CallbackStatsSnapshot, FilterRegistry, LabelSet, MetricFamily, MetricFamilyList, MetricType,
    Pipeline, Value, WriteOptions, Writer,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use writers::{FilteredWriter, JsonFileWriter, LogNotifier, LogWriter, StdoutWriter};

/// metricflow dispatch daemon
#[derive(Parser, Debug)]
#[command(name = "metricflowd")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Metric dispatch daemon - filters, fan-out queues and output plugins")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Collection interval in seconds, overrides the configuration
    #[arg(short, long)]
    interval: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "metricflow.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file and compile its filters
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run one global filter against a sample metric
    CheckFilter {
        /// Filter file
        #[arg(short, long)]
        file: PathBuf,

        /// Filter name
        #[arg(long)]
        filter: String,

        /// Sample metric, e.g. 'cpu{mode="idle"} 0.5'
        #[arg(short, long)]
        metric: String,
    },
}

/// Shared stop flag signalled from the Ctrl+C handler.
type StopSignal = Arc<(Mutex<bool>, Condvar)>;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(cmd) = cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("info"));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
            Commands::CheckFilter {
                file,
                filter,
                metric,
            } => cmd_check_filter(file, &filter, &metric),
        };
    }

    let mut config = match cli.config {
        Some(ref path) => DaemonConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    if let Some(interval) = cli.interval {
        config.interval_secs = interval;
        config.validate()?;
    }
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

    run(config)
}

fn build_pipeline(config: &DaemonConfig, registry: &FilterRegistry) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new(config.interval(), config.label_set()?);
    pipeline.set_pre_cache_filter(config.pre_cache_filter.as_deref().and_then(|n| registry.get(n)));
    pipeline.set_post_cache_filter(
        config
            .post_cache_filter
            .as_deref()
            .and_then(|n| registry.get(n)),
    );
    pipeline
        .write()
        .set_limits(config.write_queue_limit_high, config.write_queue_limit_low);
    pipeline
        .notify()
        .set_limits(config.notify_queue_limit_high, config.notify_queue_limit_low);

    for writer in &config.writers {
        register_writer(&pipeline, writer)?;
    }
    for notifier in &config.notifiers {
        register_notifier(&pipeline, notifier)?;
    }
    Ok(pipeline)
}

fn register_writer(pipeline: &Pipeline, config: &WriterConfig) -> Result<()> {
    let mut writer: Box<dyn Writer> = match config.kind {
        WriterKind::Stdout => Box::new(StdoutWriter::new(config.format)),
        WriterKind::JsonFile => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("Writer '{}' requires a path", config.full_name()))?;
            Box::new(
                JsonFileWriter::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )
        }
        WriterKind::Log => Box::new(LogWriter::default()),
    };
    if let Some(ref path) = config.filter {
        let filter = load_local_filter(path)?;
        writer = Box::new(FilteredWriter::new(filter, writer));
    }

    let options = WriteOptions {
        flush_interval: config.flush_interval(),
        flush_timeout: None,
    };
    let handle = pipeline.write().register(
        config.kind.as_str(),
        config.name.as_deref().unwrap_or(""),
        writer,
        options,
    )?;
    tracing::info!(writer = %handle.name(), "Registered writer");
    Ok(())
}

fn register_notifier(pipeline: &Pipeline, config: &NotifierConfig) -> Result<()> {
    let notifier = match config.kind {
        NotifierKind::Log => Box::new(LogNotifier),
    };
    let handle =
        pipeline
            .notify()
            .register("log", config.name.as_deref().unwrap_or(""), notifier)?;
    tracing::info!(notifier = %handle.name(), "Registered notifier");
    Ok(())
}

fn run(config: DaemonConfig) -> Result<()> {
    let registry = config.load_filters()?;
    let pipeline = Arc::new(build_pipeline(&config, &registry)?);

    tracing::info!(
        interval = config.interval_secs,
        writers = config.writers.len(),
        notifiers = config.notifiers.len(),
        filters = registry.len(),
        "Starting metricflowd"
    );

    let stop: StopSignal = Arc::new((Mutex::new(false), Condvar::new()));
    ctrlc_handler(Arc::clone(&stop))?;

    let reader = if config.collect_internal_stats {
        let pipeline = Arc::clone(&pipeline);
        let stop = Arc::clone(&stop);
        let interval = config.interval();
        Some(
            thread::Builder::new()
                .name("reader#stats".into())
                .spawn(move || stats_reader(&pipeline, &stop, interval))
                .context("Failed to spawn stats reader")?,
        )
    } else {
        None
    };

    {
        let (lock, cond) = &*stop;
        let mut stopped = lock.lock();
        while !*stopped {
            cond.wait(&mut stopped);
        }
    }

    if let Some(reader) = reader {
        if reader.join().is_err() {
            tracing::error!("Stats reader panicked");
        }
    }
    pipeline.shutdown();

    println!("\nFinal Statistics:");
    println!(
        "  write queue:  {} dispatched, {} dropped",
        pipeline.write().metrics_dispatched(),
        pipeline.write().dropped()
    );
    println!(
        "  notify queue: {} dispatched, {} dropped",
        pipeline.notify().notifications_dispatched(),
        pipeline.notify().dropped()
    );
    print_stats(&pipeline.write().stats());
    print_stats(&pipeline.notify().stats());

    tracing::info!("metricflowd shutdown complete");
    Ok(())
}

/// Dispatch the pipeline's own statistics every interval until stopped.
fn stats_reader(pipeline: &Pipeline, stop: &StopSignal, interval: Duration) {
    let ctx = PluginContext::named("metricflow").with_interval(interval);
    let (lock, cond) = &**stop;
    let mut stopped = lock.lock();
    while !*stopped {
        if !cond.wait_for(&mut stopped, interval).timed_out() {
            continue;
        }
        MutexGuard::unlocked(&mut stopped, || {
            context::scoped(ctx.clone(), || {
                if let Err(e) = pipeline.dispatch_families(pipeline.stats_families(), None, None) {
                    tracing::warn!("Dispatching internal stats failed: {}", e);
                }
            });
        });
    }
}

/// Setup Ctrl+C handler.
fn ctrlc_handler(stop: StopSignal) -> Result<()> {
    ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        let (lock, cond) = &*stop;
        *lock.lock() = true;
        cond.notify_all();
    })
    .context("Failed to install Ctrl+C handler")
}

fn print_stats(stats: &[CallbackStatsSnapshot]) {
    for stat in stats {
        println!(
            "  {}: {} calls, {} failures, {:.3} ms avg",
            stat.plugin,
            stat.calls,
            stat.failures,
            stat.average().as_secs_f64() * 1000.0
        );
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<()> {
    let mut archive = WriterConfig::new(WriterKind::JsonFile);
    archive.name = Some("archive".into());
    archive.path = Some(PathBuf::from("/var/lib/metricflow/metrics.json"));
    archive.flush_interval_secs = Some(0);

    let mut console = WriterConfig::new(WriterKind::Stdout);
    console.format = OutputFormat::Text;

    let config = DaemonConfig {
        write_queue_limit_high: 10_000,
        write_queue_limit_low: Some(5_000),
        filter_files: vec![PathBuf::from("/etc/metricflow/filters.conf")],
        labels: [("instance".to_string(), "localhost".to_string())]
            .into_iter()
            .collect(),
        writers: vec![console, archive],
        notifiers: vec![NotifierConfig {
            kind: NotifierKind::Log,
            name: None,
        }],
        ..Default::default()
    };

    let toml_str = toml::to_string_pretty(&config)?;
    let content = format!(
        r#"# metricflowd configuration
# Generated by metricflowd gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
    let checked = DaemonConfig::from_file(&config_path).and_then(|config| {
        let registry = config.load_filters()?;
        for writer in &config.writers {
            if let Some(ref path) = writer.filter {
                load_local_filter(path)?;
            }
        }
        Ok((config, registry))
    });

    match checked {
        Ok((config, registry)) => {
            println!("Configuration valid!");
            println!();
            println!("Interval: {}s", config.interval_secs);
            println!("Filters: {}", registry.names().join(", "));
            println!("Writers: {}", config.writers.len());
            for writer in &config.writers {
                println!("  - {}", writer.full_name());
            }
            println!("Notifiers: {}", config.notifiers.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_check_filter(file: PathBuf, name: &str, sample: &str) -> Result<()> {
    let mut registry = FilterRegistry::new();
    registry.load_file(&file)?;
    let filter = registry
        .get(name)
        .ok_or_else(|| anyhow!("Filter '{}' not found in {}", name, file.display()))?;

    let mut list = MetricFamilyList::from_family(parse_sample(sample)?);
    filter.process(&mut list, None)?;

    let mut line = String::new();
    for family in list.iter() {
        for metric in &family.metrics {
            line.clear();
            writers::format_metric(&family.name, metric, &mut line);
            println!("{}", line);
        }
    }
    Ok(())
}

/// Parse `name{labels} value` into a single-metric gauge family.
fn parse_sample(text: &str) -> Result<MetricFamily> {
    let text = text.trim();
    let name_end = text
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| anyhow!("Missing value in '{}'", text))?;
    let name = &text[..name_end];
    if name.is_empty() {
        bail!("Missing metric name in '{}'", text);
    }

    let mut rest = &text[name_end..];
    let mut labels = LabelSet::new();
    if rest.starts_with('{') {
        let used = labels.unmarshal(rest)?;
        rest = &rest[used..];
    }
    let value: f64 = rest
        .trim()
        .parse()
        .with_context(|| format!("Invalid value in '{}'", text))?;

    let mut family = MetricFamily::new(name, MetricType::Gauge);
    family.append(Value::Gauge(value), labels)?;
    Ok(family)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        let fam = parse_sample(r#"cpu{mode="idle",host="a"} 0.5"#).expect("parse");
        assert_eq!(fam.name, "cpu");
        assert_eq!(fam.metrics[0].value, Value::Gauge(0.5));
        assert_eq!(fam.metrics[0].labels.get("host"), Some("a"));

        let bare = parse_sample("load 3").expect("parse");
        assert!(bare.metrics[0].labels.is_empty());

        assert!(parse_sample("cpu").is_err());
        assert!(parse_sample("cpu{mode=idle} 1").is_err());
        assert!(parse_sample("{a=\"b\"} 1").is_err());
        assert!(parse_sample("cpu x").is_err());
    }

    #[test]
    fn test_build_pipeline_registers_plugins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut archive = WriterConfig::new(WriterKind::JsonFile);
        archive.path = Some(dir.path().join("out.json"));
        let config = DaemonConfig {
            writers: vec![WriterConfig::new(WriterKind::Log), archive],
            notifiers: vec![NotifierConfig {
                kind: NotifierKind::Log,
                name: Some("main".into()),
            }],
            ..Default::default()
        };
        config.validate().expect("valid");

        let pipeline = build_pipeline(&config, &FilterRegistry::new()).expect("pipeline");
        assert_eq!(pipeline.write().writers(), vec!["log", "json_file"]);
        assert_eq!(pipeline.notify().notifiers(), vec!["log/main"]);
        pipeline.shutdown();
        assert!(pipeline.write().writers().is_empty());
    }

    #[test]
    fn test_gen_config_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metricflow.toml");
        cmd_gen_config(path.clone()).expect("gen-config");

        let config = DaemonConfig::from_file(&path).expect("load");
        assert_eq!(config.writers.len(), 2);
        assert_eq!(config.writers[1].full_name(), "json_file/archive");
        assert_eq!(config.write_queue_limit_low, Some(5_000));
    }
}
