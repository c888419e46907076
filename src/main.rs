use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveTime;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use warp_bench::analyze::{analyze_hosts, analyze_requests, HostAnalysis, RequestAnalysis};
use warp_bench::compare::{compare, summarize};
use warp_bench::config::{
    default_client_id, parse_duration_flag, parse_obj_size, parse_server_profile,
    parse_sync_start, BenchConfig, ConnectConfig, DEFAULT_BUCKET,
};
use warp_bench::driver::run_benchmark;
use warp_bench::merge::merge;
use warp_bench::ops::{format_ns, OpType, OperationLog};
use warp_bench::persist::{load_log, save_log};
use warp_bench::segment::{
    active_range, restrict_to_range, segment, segments_csv_rows, SEGMENTS_CSV_HEADER,
};
use warp_bench::{BenchError, MIB};

#[derive(Parser)]
#[command(name = "warp")]
#[command(about = "S3 benchmarking tool", long_about = None, version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectArgs {
    /// Host spec: comma list and/or `{a...b}` ranges, e.g. `10.0.0.{1...4}:9000`
    #[arg(long, env = "WARP_HOST", default_value = "127.0.0.1:9000")]
    host: String,
    #[arg(long, default_value = "changeme")]
    access_key: String,
    #[arg(long, default_value = "changeme")]
    secret_key: String,
    #[arg(long, default_value = "us-east-1")]
    region: String,
    /// Use HTTPS for endpoints without an explicit scheme
    #[arg(long)]
    tls: bool,
    /// Request server-side encryption on uploads
    #[arg(long)]
    encrypt: bool,
    #[arg(long, default_value = DEFAULT_BUCKET)]
    bucket: String,
}

impl ConnectArgs {
    fn into_config(self) -> ConnectConfig {
        ConnectConfig {
            host: self.host,
            access_key: self.access_key,
            secret_key: self.secret_key,
            region: self.region,
            tls: self.tls,
            encrypt: self.encrypt,
            bucket: self.bucket,
        }
    }
}

#[derive(Args)]
struct BenchArgs {
    /// Concurrent workers
    #[arg(long, default_value_t = 10)]
    concurrent: usize,
    /// Measurement window, e.g. `30s`, `5m`
    #[arg(long, default_value = "1m", value_parser = parse_duration_flag)]
    duration: Duration,
    /// Objects uploaded before GET/DELETE/LIST/STAT benchmarks
    #[arg(long, default_value_t = 1000)]
    objects: usize,
    /// Object size, IEC suffixes allowed (`1MiB`)
    #[arg(long = "obj.size", default_value = "1MiB", value_parser = parse_obj_size)]
    obj_size: u64,
    /// DELETE batch size / LIST page size
    #[arg(long, default_value_t = 100)]
    batch: usize,
    /// Disable the per-thread key prefix
    #[arg(long)]
    noprefix: bool,
    /// Skip bucket cleaning before and after the run
    #[arg(long)]
    noclear: bool,
    /// Local `HH:MM` all clients wait for before measuring
    #[arg(long, value_parser = parse_sync_start)]
    syncstart: Option<NaiveTime>,
    /// Stream the operation log to this file
    #[arg(long)]
    benchdata: Option<PathBuf>,
    /// Per-request timeout
    #[arg(long, default_value = "1m", value_parser = parse_duration_flag)]
    request_timeout: Duration,
    /// Profiling hint forwarded to the server admin API
    #[arg(long, value_parser = parse_server_profile)]
    serverprof: Option<String>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Segment duration
    #[arg(long = "analyze.dur", default_value = "1s", value_parser = parse_duration_flag)]
    analyze_dur: Duration,
    /// Write per-segment CSV to this file
    #[arg(long = "analyze.out")]
    analyze_out: Option<PathBuf>,
    /// Include per-request latency tables
    #[arg(long)]
    requests: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark object upload
    Put {
        #[command(flatten)]
        connect: ConnectArgs,
        #[command(flatten)]
        bench: BenchArgs,
        #[command(flatten)]
        analyze: AnalyzeArgs,
    },
    /// Benchmark object download
    Get {
        #[command(flatten)]
        connect: ConnectArgs,
        #[command(flatten)]
        bench: BenchArgs,
        #[command(flatten)]
        analyze: AnalyzeArgs,
        /// Read only the first N bytes of each object
        #[arg(long, value_parser = parse_obj_size)]
        range: Option<u64>,
    },
    /// Benchmark batched object deletion
    Delete {
        #[command(flatten)]
        connect: ConnectArgs,
        #[command(flatten)]
        bench: BenchArgs,
        #[command(flatten)]
        analyze: AnalyzeArgs,
    },
    /// Benchmark object listing
    List {
        #[command(flatten)]
        connect: ConnectArgs,
        #[command(flatten)]
        bench: BenchArgs,
        #[command(flatten)]
        analyze: AnalyzeArgs,
    },
    /// Benchmark object metadata lookups
    Stat {
        #[command(flatten)]
        connect: ConnectArgs,
        #[command(flatten)]
        bench: BenchArgs,
        #[command(flatten)]
        analyze: AnalyzeArgs,
    },
    /// Analyze a saved benchmark log
    Analyze {
        #[command(flatten)]
        analyze: AnalyzeArgs,
        /// Benchmark log file
        file: PathBuf,
    },
    /// Merge logs recorded by several clients
    Merge {
        #[command(flatten)]
        analyze: AnalyzeArgs,
        /// Write the merged log to this file
        #[arg(long)]
        benchdata: Option<PathBuf>,
        /// Benchmark log files, one per client
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,
    },
    /// Compare two benchmark runs
    Cmp {
        #[command(flatten)]
        analyze: AnalyzeArgs,
        before: PathBuf,
        after: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let code: u8 = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("warp: {err:#}");
            let code = err
                .downcast_ref::<BenchError>()
                .map(BenchError::exit_code)
                .unwrap_or(2);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Put { connect, bench, analyze } => {
            run_bench(OpType::Put, connect, bench, analyze, None).await
        }
        Commands::Get { connect, bench, analyze, range } => {
            run_bench(OpType::Get, connect, bench, analyze, range).await
        }
        Commands::Delete { connect, bench, analyze } => {
            run_bench(OpType::Delete, connect, bench, analyze, None).await
        }
        Commands::List { connect, bench, analyze } => {
            run_bench(OpType::List, connect, bench, analyze, None).await
        }
        Commands::Stat { connect, bench, analyze } => {
            run_bench(OpType::Stat, connect, bench, analyze, None).await
        }
        Commands::Analyze { analyze, file } => {
            let log = load_log(&file)?;
            info!(file = %file.display(), operations = log.len(), "loaded benchmark log");
            print_analysis(&log, &analyze)
        }
        Commands::Merge { analyze, benchdata, files } => {
            let logs = files
                .iter()
                .map(|f| load_log(f))
                .collect::<Result<Vec<_>, _>>()?;
            let merged = merge(logs)?;
            info!(
                clients = files.len(),
                operations = merged.len(),
                "merged overlapping client logs"
            );
            if let Some(path) = benchdata {
                save_log(&path, &merged)
                    .with_context(|| format!("writing merged log to {}", path.display()))?;
                info!(file = %path.display(), "wrote merged log");
            }
            print_analysis(&merged, &analyze)
        }
        Commands::Cmp { analyze, before, after } => {
            cmd_cmp(&before, &after, &analyze)
        }
    }
}

async fn run_bench(
    op: OpType,
    connect: ConnectArgs,
    bench: BenchArgs,
    analyze: AnalyzeArgs,
    range: Option<u64>,
) -> anyhow::Result<()> {
    if let Some(profile) = &bench.serverprof {
        // The admin API lives outside this tool; the hint travels with the
        // operator, not the wire.
        info!(serverprof = %profile, "server profiling must be enabled via the server admin API");
    }
    let cfg = BenchConfig {
        connect: connect.into_config(),
        op,
        client_id: default_client_id(),
        concurrent: bench.concurrent,
        duration: bench.duration,
        objects: bench.objects,
        obj_size: bench.obj_size,
        batch: bench.batch,
        noprefix: bench.noprefix,
        noclear: bench.noclear,
        sync_start: bench.syncstart,
        benchdata: bench.benchdata,
        request_timeout: bench.request_timeout,
        range,
        seed: rand::random(),
    };
    let log = run_benchmark(cfg).await?;
    print_analysis(&log, &analyze)
}

fn cmd_cmp(before: &PathBuf, after: &PathBuf, analyze: &AnalyzeArgs) -> anyhow::Result<()> {
    let before_log = load_log(before)?;
    let after_log = load_log(after)?;

    let mut compared = 0;
    for op in before_log.op_types() {
        let Some(b) = summarize(&before_log, op, analyze.analyze_dur) else {
            continue;
        };
        let Some(a) = summarize(&after_log, op, analyze.analyze_dur) else {
            continue;
        };
        let cmp = compare(&b, &a)?;
        compared += 1;

        println!("\n=== {} Comparison ===", op);
        println!(
            "Before: {} threads, {:.0}s active, avg {:.2} {}",
            b.threads, b.active_secs, b.avg_rate, b.rate_unit()
        );
        println!(
            "After:  {} threads, {:.0}s active, avg {:.2} {}",
            a.threads, a.active_secs, a.avg_rate, a.rate_unit()
        );
        for m in &cmp.metrics {
            let rel = m
                .relative()
                .map(|r| format!("{:+.1}%", r * 100.0))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "{:>20}: {:.2} -> {:.2} {} ({:+.2}, {})",
                m.name,
                m.before,
                m.after,
                cmp.rate_unit,
                m.absolute(),
                rel
            );
        }
        if cmp.params.is_empty() {
            println!("Parameters: identical");
        } else {
            for p in &cmp.params {
                println!("Parameter {}: {} -> {}", p.name, p.before, p.after);
            }
        }
    }
    if compared == 0 {
        warn!("the two logs share no analyzable operation type");
    }
    Ok(())
}

fn print_analysis(log: &OperationLog, analyze: &AnalyzeArgs) -> anyhow::Result<()> {
    let mut csv_rows: Vec<String> = Vec::new();

    for op in log.op_types() {
        let ops = log.by_type(op);
        let errors = ops.iter().filter(|o| o.is_error()).count();
        println!("\n=== {} Benchmark Results ===", op);
        println!("Total operations: {}", ops.len());
        println!("Errors: {}", errors);

        let Some(seg) = segment(op, &ops, analyze.analyze_dur, true) else {
            println!("Skipped: no active interval with all threads running");
            continue;
        };
        if seg.is_skipped() {
            println!("Skipped: fewer than two complete segments");
            continue;
        }

        println!(
            "Active range: {} -> {}",
            format_ns(seg.active_start_ns),
            format_ns(seg.active_end_ns)
        );
        let objects_per_op = {
            let total: u64 = ops.iter().map(|o| o.obj_count).sum();
            total as f64 / ops.len() as f64
        };
        if seg.ranked_by_bytes() {
            println!(
                "Throughput: {:.2} MiB/s, {:.2} obj/s over {} segments",
                seg.avg_mb_per_sec(),
                seg.avg_objs_per_sec(),
                seg.segments.len()
            );
            let (f, m, s) = (seg.fastest(), seg.median(), seg.slowest());
            if let (Some(f), Some(m), Some(s)) = (f, m, s) {
                println!(
                    "Segments: fastest {:.2} MiB/s, median {:.2} MiB/s, slowest {:.2} MiB/s",
                    f.mb_per_sec(),
                    m.mb_per_sec(),
                    s.mb_per_sec()
                );
            }
            println!(
                "Data transferred: {:.2} MiB",
                seg.total_bytes() / MIB
            );
        } else {
            println!(
                "Throughput: {:.2} obj/s over {} segments",
                seg.avg_objs_per_sec(),
                seg.segments.len()
            );
            let (f, m, s) = (seg.fastest(), seg.median(), seg.slowest());
            if let (Some(f), Some(m), Some(s)) = (f, m, s) {
                println!(
                    "Segments: fastest {:.2} obj/s, median {:.2} obj/s, slowest {:.2} obj/s",
                    f.objs_per_sec(),
                    m.objs_per_sec(),
                    s.objs_per_sec()
                );
            }
        }
        if seg.total_errors() > 0 {
            println!("Segment errors: {}", seg.total_errors());
        }

        if analyze.requests {
            if let Some(range) = active_range(&ops, true) {
                let active = restrict_to_range(&ops, range);
                if let Some(analysis) = analyze_requests(&active) {
                    print_requests(&analysis);
                }
                for host in analyze_hosts(&active) {
                    print_host(&host);
                }
            }
        }

        csv_rows.extend(segments_csv_rows(&seg, objects_per_op));
    }

    if let Some(path) = &analyze.analyze_out {
        let mut out = String::from(SEGMENTS_CSV_HEADER);
        out.push('\n');
        for row in &csv_rows {
            out.push_str(row);
            out.push('\n');
        }
        std::fs::write(path, out)
            .with_context(|| format!("writing segment CSV to {}", path.display()))?;
        info!(file = %path.display(), rows = csv_rows.len(), "wrote segment CSV");
    }
    Ok(())
}

fn print_requests(analysis: &RequestAnalysis) {
    match analysis {
        RequestAnalysis::SingleSized {
            count,
            size,
            durations,
            ttfb,
        } => {
            println!("\nRequests ({} x {} bytes):", count, size);
            println!(
                "Duration: avg {} ms, median {} ms, 90th {} ms, 99th {} ms, min {} ms, max {} ms",
                durations.avg_ms,
                durations.median_ms,
                durations.p90_ms,
                durations.p99_ms,
                durations.min_ms,
                durations.max_ms
            );
            if let Some(t) = ttfb {
                println!(
                    "TTFB: avg {} ms, median {} ms, min {} ms, max {} ms",
                    t.avg_ms, t.median_ms, t.min_ms, t.max_ms
                );
            }
        }
        RequestAnalysis::MultiSized { buckets } => {
            println!("\nRequests by size:");
            for b in buckets {
                println!(
                    "[{} - {}] {} requests, avg size {} B, avg duration {} ms",
                    b.min_size, b.max_size, b.count, b.avg_size, b.avg_duration_ms
                );
                println!(
                    "  Throughput: avg {:.2} MiB/s, median {:.2} MiB/s, 90th {:.2} MiB/s, 99th {:.2} MiB/s, min {:.2} MiB/s, max {:.2} MiB/s",
                    b.throughput.avg_bps / MIB,
                    b.throughput.median_bps / MIB,
                    b.throughput.p90_bps / MIB,
                    b.throughput.p99_bps / MIB,
                    b.throughput.min_bps / MIB,
                    b.throughput.max_bps / MIB
                );
                if let Some(t) = &b.ttfb {
                    println!(
                        "  TTFB: avg {} ms, median {} ms, min {} ms, max {} ms",
                        t.avg_ms, t.median_ms, t.min_ms, t.max_ms
                    );
                }
            }
        }
    }
}

fn print_host(host: &HostAnalysis) {
    println!("\nEndpoint {} ({} requests):", host.endpoint, host.count);
    print_requests(&host.analysis);
}
