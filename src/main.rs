//! observe-demo entry point.
//!
//! Drives instrumented operations against in-memory backends and prints
//! what they emitted.
//!
//! ## CLI Subcommands
//!
//! - `observe-demo` or `observe-demo run [workers] [iterations]` - run workers (default)
//! - `observe-demo plan` - print configured histogram boundaries
//! - `observe-demo config` - print effective configuration as JSON

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use observe_core::config::{self as observe_config, ObserveConfig};
use observe_core::telemetry::{init_logging, MemoryTracer, MetricsStore, TracingLogger};
use observe_core::{Context, MetricRegistry, ObservationFactory, ObservationOptions};

#[derive(Debug, Error)]
enum DemoError {
    #[error("upstream rejected request {0}")]
    Rejected(usize),
}

struct Operations {
    function: Arc<ObservationFactory>,
    dependency: Arc<ObservationFactory>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("run");
    let config = observe_config::load();

    match command {
        "run" | "" => {
            let workers = parse_arg(&args, 2, 4);
            let iterations = parse_arg(&args, 3, 25);
            run(&config, workers, iterations).await
        }
        "plan" => match config.histogram.boundaries() {
            Ok(bounds) => {
                for (i, b) in bounds.iter().enumerate() {
                    println!("{i:>3}  {b:.6}s");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Invalid histogram plan: {}", e);
                ExitCode::FAILURE
            }
        },
        "config" => match serde_json::to_string_pretty(&config.effective_config()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to render configuration: {}", e);
                ExitCode::FAILURE
            }
        },
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("observe-demo {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn parse_arg(args: &[String], index: usize, default: usize) -> usize {
    args.get(index)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
        .max(1)
}

fn print_usage() {
    println!("Usage: observe-demo [run [workers] [iterations] | plan | config | help | version]");
    println!();
    println!("Configuration is read from OBSERVE_* environment variables.");
}

async fn run(config: &ObserveConfig, workers: usize, iterations: usize) -> ExitCode {
    if let Err(e) = init_logging(&config.log) {
        eprintln!("Logging disabled: {}", e);
    }

    let store = Arc::new(MetricsStore::new());
    let registry = Arc::new(MetricRegistry::new(store.clone()));
    let tracer = Arc::new(MemoryTracer::new());
    let logger = Arc::new(TracingLogger::new());

    let build = |name: &str| {
        ObservationFactory::builder(name)
            .config(config)
            .registry(registry.clone())
            .tracer(tracer.clone())
            .logger(logger.clone())
            .build()
    };
    let ops = match (build("serious/function"), build("dep")) {
        (Ok(function), Ok(dependency)) => Arc::new(Operations { function, dependency }),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Cannot register metrics: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(workers, iterations, "Starting demo workers");

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let ops = ops.clone();
        handles.push(tokio::spawn(async move {
            let mut failures = 0usize;
            for i in 0..iterations {
                if serious_function(&ops, worker * iterations + i).await.is_err() {
                    failures += 1;
                }
            }
            failures
        }));
    }

    let mut failures = 0;
    for handle in handles {
        match handle.await {
            Ok(n) => failures += n,
            Err(e) => tracing::error!(error = %e, "Worker task failed"),
        }
    }

    tracing::info!(
        failures,
        spans = tracer.finished().len(),
        registrations = registry.registrations(),
        "Demo finished"
    );

    match serde_json::to_string_pretty(&store.snapshot()) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render metrics: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serious_function(ops: &Operations, request: usize) -> Result<(), DemoError> {
    let (_ctx, mut obs) = ops.function.start(&Context::background());
    obs.add_field("request", request);
    tokio::time::sleep(Duration::from_millis((request % 7) as u64)).await;
    obs.log(Level::INFO, format_args!("handling request {request}"));

    let result = if request % 5 == 4 {
        Err(DemoError::Rejected(request))
    } else {
        dependency(ops, &obs.context()).await;
        Ok(())
    };
    obs.end_result(&result);
    result
}

async fn dependency(ops: &Operations, ctx: &Context) {
    let (_ctx, obs) = ops
        .dependency
        .new_observation(ctx, ObservationOptions::new().propagate_fields());
    tokio::time::sleep(Duration::from_millis(2)).await;
    obs.end_ok();
}
