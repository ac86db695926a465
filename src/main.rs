//! keyscope - Redis key-space analyzer
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use keyscope::analysis::flame::FlameAggregator;
use keyscope::analysis::prefix::PrefixTree;
use keyscope::analysis::topk::TopKSelector;
use keyscope::analysis::{ingest_sources, ingest_with, IngestStats, KeySplitter, RunStats};
use keyscope::config::{
    validate_top, AnalysisArgs, AnalysisConfig, CliArgs, Command, LiveArgs, LiveConfig, RedisUrl,
};
use keyscope::error::ScopeError;
use keyscope::filter::FilterPipeline;
use keyscope::live::{
    guarded_delete, resolve_topology, BatchMutator, DeleteOutcome, DeletePlan, Endpoint,
};
use keyscope::progress::{
    format_number, print_delete_summary, print_header, print_summary, ProgressReporter,
};
use keyscope::record::{KeyRecord, RecordSource};
use keyscope::report::{
    create_report, create_work_dir, source_file_name, write_bigkey_csv, write_flame_html,
    write_flame_json, write_prefix_csv, JsonLinesWriter, MemoryCsvWriter,
};
use keyscope::source::{open_sources, BoxedSource};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose)?;
    let quiet = args.quiet;

    match args.command {
        Command::Bigkey { source, top, analysis } => run_bigkey(&source, top, &analysis, quiet),
        Command::Memory { source, analysis } => run_memory(&source, &analysis, quiet),
        Command::Prefix {
            source,
            top,
            max_depth,
            separators,
            analysis,
        } => run_prefix(&source, top, max_depth, separators, &analysis, quiet),
        Command::Flamegraph {
            source,
            separators,
            leaf_threshold,
            trim_min_keys,
            analysis,
        } => run_flamegraph(&source, separators, leaf_threshold, trim_min_keys, &analysis, quiet),
        Command::Export { source, analysis } => run_export(&source, &analysis, quiet),
        Command::Scan {
            url,
            pattern,
            page_size,
            limit,
            live,
        } => run_scan(&url, &pattern, page_size, limit, &live),
        Command::Delete {
            url,
            pattern,
            batch_size,
            page_size,
            live,
        } => run_delete(&url, &pattern, batch_size, page_size, &live, quiet),
    }
}

/// Work directory, progress display and timing of one analysis run
struct AnalysisRun {
    config: AnalysisConfig,
    filters: FilterPipeline,
    work_dir: PathBuf,
    progress: ProgressReporter,
    started: Instant,
    reports: Vec<String>,
}

impl AnalysisRun {
    fn start(command: &str, config: AnalysisConfig) -> Result<Self> {
        let filters = config.filters().context("Invalid filter")?;
        let work_dir = create_work_dir(&config.data_dir, Local::now())
            .context("Failed to create work directory")?;

        let progress = if config.show_progress {
            print_header(
                command,
                &config.source.describe(),
                Some(&work_dir.display().to_string()),
            );
            ProgressReporter::new()
        } else {
            ProgressReporter::hidden()
        };
        if !filters.is_empty() {
            info!(filters = ?filters.describe(), "Filters active");
        }

        Ok(Self {
            config,
            filters,
            work_dir,
            progress,
            started: Instant::now(),
            reports: Vec::new(),
        })
    }

    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Ingest every source, handing each one to `ingest_one`
    fn ingest<F>(&self, ingest_one: F) -> Result<RunStats>
    where
        F: FnMut(BoxedSource) -> Result<IngestStats, ScopeError>,
    {
        self.progress.set_status("Opening sources...");
        let sources = open_sources(&self.config).context("Failed to open sources")?;
        let stats = ingest_sources(sources, self.config.keep_going, ingest_one)
            .context("Analysis failed")?;
        Ok(stats)
    }

    /// Progress callback for one source
    fn ticker<'a>(&'a self, source: &BoxedSource) -> impl FnMut(&KeyRecord) + 'a {
        let name = source.name();
        let mut records = 0u64;
        let mut bytes = 0u64;
        move |record| {
            records += 1;
            bytes += record.size_bytes;
            self.progress.update(&name, records, bytes);
        }
    }

    fn add_report(&mut self, name: &str) {
        self.reports.push(self.work_dir.join(name).display().to_string());
    }

    fn finish(self, stats: &RunStats) {
        self.progress.finish_and_clear();
        for (source, reason) in &stats.failed {
            warn!(source = %source, "Skipped: {}", reason);
        }
        let filtered = self.filters.stats();
        info!(
            sources = stats.sources.len(),
            records = stats.records(),
            filtered_out = filtered.rejected,
            "Analysis finished"
        );
        if self.config.show_progress {
            print_summary(
                stats.sources.len(),
                stats.records(),
                stats.bytes(),
                stats.failed.len(),
                self.started.elapsed(),
                &self.reports,
            );
        }
    }
}

fn run_bigkey(source: &str, top: i64, args: &AnalysisArgs, quiet: bool) -> Result<()> {
    let count = validate_top(top)?;
    let config = AnalysisConfig::from_args(source, args, quiet).context("Invalid configuration")?;
    let mut run = AnalysisRun::start("bigkey", config)?;

    let mut selector = TopKSelector::<KeyRecord>::new(count)?;
    let stats = run.ingest(|source| {
        let tick = run.ticker(&source);
        Ok(ingest_with(source, &run.filters, &mut [&mut selector], tick)?)
    })?;

    let name = "bigkey.csv";
    let file = create_report(run.work_dir(), name).context("Failed to create report")?;
    write_bigkey_csv(file, &selector.into_sorted_vec()).context("Failed to write report")?;
    run.add_report(name);
    run.finish(&stats);
    Ok(())
}

fn run_memory(source: &str, args: &AnalysisArgs, quiet: bool) -> Result<()> {
    let config = AnalysisConfig::from_args(source, args, quiet).context("Invalid configuration")?;
    let mut run = AnalysisRun::start("memory", config)?;

    let mut written = Vec::new();
    let stats = run.ingest(|source| {
        let name = source_file_name(&source.name(), "-memory.csv");
        let mut writer = MemoryCsvWriter::new(create_report(run.work_dir(), &name)?)?;
        let tick = run.ticker(&source);
        // Rows already written stay in the file if the source fails midway
        written.push(name);
        let stats = ingest_with(source, &run.filters, &mut [&mut writer], tick)?;
        writer.finish()?;
        Ok(stats)
    })?;

    for name in &written {
        run.add_report(name);
    }
    run.finish(&stats);
    Ok(())
}

fn run_prefix(
    source: &str,
    top: i64,
    max_depth: Option<usize>,
    separators: Vec<String>,
    args: &AnalysisArgs,
    quiet: bool,
) -> Result<()> {
    let count = validate_top(top)?;
    let splitter = KeySplitter::new(separators)?;
    let config = AnalysisConfig::from_args(source, args, quiet).context("Invalid configuration")?;
    let mut run = AnalysisRun::start("prefix", config)?;

    let mut tree = PrefixTree::new(splitter);
    let stats = run.ingest(|source| {
        let tick = run.ticker(&source);
        Ok(ingest_with(source, &run.filters, &mut [&mut tree], tick)?)
    })?;

    let entries = tree.top_prefixes(count, max_depth)?;
    let name = "prefix.csv";
    let file = create_report(run.work_dir(), name).context("Failed to create report")?;
    write_prefix_csv(file, &entries).context("Failed to write report")?;
    run.add_report(name);
    run.finish(&stats);
    Ok(())
}

fn run_flamegraph(
    source: &str,
    separators: Vec<String>,
    leaf_threshold: u64,
    trim_min_keys: u64,
    args: &AnalysisArgs,
    quiet: bool,
) -> Result<()> {
    let splitter = KeySplitter::new(separators)?;
    let config = AnalysisConfig::from_args(source, args, quiet).context("Invalid configuration")?;
    let mut run = AnalysisRun::start("flamegraph", config)?;

    let mut flame = FlameAggregator::new(splitter);
    let stats = run.ingest(|source| {
        let tick = run.ticker(&source);
        Ok(ingest_with(source, &run.filters, &mut [&mut flame], tick)?)
    })?;

    let tree = flame.into_tree(leaf_threshold, trim_min_keys);
    info!(nodes = tree.node_count(), total = tree.value, "Flame graph built");

    let name = "flamegraph.json";
    let file = create_report(run.work_dir(), name).context("Failed to create report")?;
    write_flame_json(file, &tree).context("Failed to write report")?;
    run.add_report(name);

    let name = "flamegraph.html";
    let file = create_report(run.work_dir(), name).context("Failed to create report")?;
    write_flame_html(file, &tree).context("Failed to write report")?;
    run.add_report(name);
    run.finish(&stats);
    Ok(())
}

fn run_export(source: &str, args: &AnalysisArgs, quiet: bool) -> Result<()> {
    let config = AnalysisConfig::from_args(source, args, quiet).context("Invalid configuration")?;
    let mut run = AnalysisRun::start("export", config)?;

    let name = "export.jsonl";
    let file = create_report(run.work_dir(), name).context("Failed to create report")?;
    let mut writer = JsonLinesWriter::new(file);
    let stats = run.ingest(|source| {
        let tick = run.ticker(&source);
        Ok(ingest_with(source, &run.filters, &mut [&mut writer], tick)?)
    })?;
    let rows = writer.rows();
    writer.finish().context("Failed to write export")?;

    info!(rows, "Export written");
    run.add_report(name);
    run.finish(&stats);
    Ok(())
}

fn run_scan(
    url: &str,
    pattern: &str,
    page_size: usize,
    limit: Option<usize>,
    live: &LiveArgs,
) -> Result<()> {
    let url = RedisUrl::parse(url)?;
    let live = LiveConfig::from_args(live, url.database)?;

    let topology = resolve_topology(&url.addr(), &live.connect, live.force_standalone)
        .context("Failed to resolve topology")?;
    let mut endpoint = Endpoint::connect(&url.addr(), &topology, &live.connect)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut write_error = None;
    let summary = BatchMutator::new(&mut endpoint)
        .scan(pattern, page_size.max(1), limit, |key| {
            if write_error.is_none() {
                if let Err(e) = writeln!(out, "{key}") {
                    write_error = Some(e);
                }
            }
        })
        .context("Scan failed")?;
    if let Some(e) = write_error {
        return Err(e).context("Failed to write keys");
    }
    out.flush()?;

    info!(
        keys = summary.keys,
        pages = summary.pages,
        truncated = summary.truncated,
        "Scan complete"
    );
    Ok(())
}

fn run_delete(
    url: &str,
    pattern: &str,
    batch_size: usize,
    page_size: usize,
    live: &LiveArgs,
    quiet: bool,
) -> Result<()> {
    // Everything is validated before the prompt and before any connection
    let plan = DeletePlan::new(pattern, batch_size)?.with_page_hint(page_size);
    let url = RedisUrl::parse(url)?;
    let live = LiveConfig::from_args(live, url.database)?;
    let addr = url.addr();

    let started = Instant::now();
    let outcome = guarded_delete(
        &plan,
        &url.to_string(),
        io::stdin().lock(),
        io::stdout(),
        || {
            let topology = resolve_topology(&addr, &live.connect, live.force_standalone)?;
            Ok(Endpoint::connect(&addr, &topology, &live.connect)?)
        },
        |report| {
            if !quiet {
                println!(
                    "  batch {}: {} keys, {} deleted (total {})",
                    report.batch,
                    report.keys,
                    report.deleted,
                    format_number(report.total_deleted)
                );
            }
        },
    )
    .context("Delete failed")?;

    match outcome {
        DeleteOutcome::Aborted => println!("Aborted, nothing was deleted."),
        DeleteOutcome::Completed(summary) => {
            if !quiet {
                print_delete_summary(
                    summary.total_scanned,
                    summary.total_deleted,
                    summary.batches_issued,
                    started.elapsed(),
                );
            }
        }
    }
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("keyscope=debug,warn")
    } else {
        EnvFilter::new("keyscope=info,warn")
    };

    // Keys from `scan` go to stdout
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
