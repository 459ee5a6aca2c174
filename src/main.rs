use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pystone_bench::config::{
    DEFAULT_BIND, DEFAULT_LOG_LEVEL, DEFAULT_LOOPS, DEFAULT_RUNS, MAX_RUNS, MONITOR_INTERVAL_MS,
};
use pystone_bench::monitor::{summarize, HardwareMonitor, MonitorSummary};
use pystone_bench::report::{results_table, suite_table, SessionReport, SuiteReport};
use pystone_bench::suite::{run_suite, SuiteConfig};
use pystone_bench::sys_info::SystemSnapshot;
use pystone_bench::{global_worker, run_session, server, SessionEvent, SessionPlan};

/// Pystone CPU benchmark
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the log level
    #[arg(short, long, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark in the foreground
    Run {
        /// Iterations per run
        #[arg(short, long, default_value_t = DEFAULT_LOOPS, value_parser = clap::value_parser!(u64).range(1..))]
        iterations: u64,

        /// Number of consecutive runs
        #[arg(short, long, default_value_t = DEFAULT_RUNS, value_parser = clap::value_parser!(u32).range(1..=MAX_RUNS as i64))]
        runs: u32,

        /// Export results to this file (.csv for CSV, anything else for JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sample CPU, memory, disk and network usage while running
        #[arg(short, long)]
        monitor: bool,
    },

    /// Run the CPU, memory and disk test suite
    Suite {
        /// Export results to this file (.csv for CSV, anything else for JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP engine
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,
    },

    /// Print host information
    Sysinfo {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}")
            .context("Failed to create progress bar template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

fn stop_on_ctrl_c() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let ctrl_c_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested");
            ctrl_c_stop.store(true, Ordering::SeqCst);
        }
    });
    stop
}

fn print_hardware(summary: &MonitorSummary) {
    println!("\n--- Hardware ({} samples) ---", summary.samples);
    println!("CPU: avg {:.1}%, max {:.1}%", summary.cpu_avg, summary.cpu_max);
    println!("Memory: avg {:.1}%, max {:.1}%", summary.memory_avg, summary.memory_max);
    println!(
        "Disk: {:.2} MB read, {:.2} MB written",
        summary.total_disk_read_mb, summary.total_disk_write_mb
    );
    if let Some(temp) = summary.cpu_temp_max {
        println!("CPU temperature: max {temp:.1} C");
    }
}

async fn run_benchmark(
    iterations: u64,
    runs: u32,
    output: Option<PathBuf>,
    monitor: bool,
) -> Result<()> {
    let plan = SessionPlan::new(iterations, runs)?;
    let stop = stop_on_ctrl_c();
    let monitor = if monitor {
        Some(HardwareMonitor::start(Duration::from_millis(MONITOR_INTERVAL_MS))?)
    } else {
        None
    };

    let pb = progress_bar()?;
    let results = run_session(global_worker(), plan, stop, |event| match event {
        SessionEvent::RunStarted { run, runs } => {
            pb.set_message(format!("Running benchmark {run} of {runs}..."));
        }
        SessionEvent::Progress {
            run,
            runs,
            progress,
            overall_percent,
        } => {
            pb.set_position(u64::from(overall_percent));
            pb.set_message(format!(
                "Run {run} of {runs}: {} of {} iterations",
                progress.current, progress.total
            ));
        }
        SessionEvent::RunCompleted(record) => {
            pb.println(format!(
                "Run {}: {:.2} seconds ({:.2} pystones/second)",
                record.run, record.elapsed_time, record.throughput
            ));
        }
    })
    .await
    .context("Benchmark failed")?;
    pb.finish_and_clear();
    let hardware = monitor.map(HardwareMonitor::finish).and_then(|s| summarize(&s));

    print!("{}", results_table(&results));
    if results.cancelled {
        println!("Benchmark stopped by user");
    }
    if let Some(summary) = &hardware {
        print_hardware(summary);
    }

    if let Some(path) = output {
        let system = tokio::task::spawn_blocking(SystemSnapshot::capture)
            .await
            .context("Failed to collect system information")?;
        SessionReport::new(&results, Some(system))
            .with_hardware(hardware)
            .export(&path)
            .with_context(|| format!("Failed to export results to {}", path.display()))?;
        println!("Results saved to {}", path.display());
    }
    Ok(())
}

async fn run_test_suite(output: Option<PathBuf>) -> Result<()> {
    let stop = stop_on_ctrl_c();
    let suite = tokio::task::spawn_blocking(move || {
        run_suite(&SuiteConfig::default(), &stop, |result| {
            println!("{}: {:.2} {}", result.name, result.score, result.unit);
        })
    })
    .await
    .context("Suite thread panicked")?
    .context("Benchmark suite failed")?;

    print!("\n{}", suite_table(&suite));
    if suite.cancelled {
        println!("Benchmark suite stopped by user");
    }
    if let Some(path) = output {
        SuiteReport::new(&suite)
            .export(&path)
            .with_context(|| format!("Failed to export results to {}", path.display()))?;
        println!("Results saved to {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            iterations,
            runs,
            output,
            monitor,
        } => run_benchmark(iterations, runs, output, monitor).await?,
        Commands::Suite { output } => run_test_suite(output).await?,
        Commands::Serve { bind } => server::serve(&bind)
            .await
            .with_context(|| format!("Engine failed on {bind}"))?,
        Commands::Sysinfo { json } => {
            let snapshot = SystemSnapshot::capture();
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{snapshot}");
            }
        }
    }

    Ok(())
}
