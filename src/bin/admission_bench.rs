// src/bin/admission_bench.rs

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use admission_control::clock::{Clock, SystemClock};
use admission_control::config::{AdmissionConfig, RedisConfig};
use admission_control::storage::{CounterStore, RemoteCounterBackend};
use admission_control::{Admission, Policy, PolicyRegistry};

const BENCH_SCOPE: &str = "bench";

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "admission_bench",
    about = "Concurrent load against the admission limiter"
)]
struct Opt {
    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Maximum number of requests allowed per identity and window
    #[structopt(short, long, default_value = "1000")]
    max_requests: u64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Burst allowance on top of the ceiling
    #[structopt(long, default_value = "0")]
    burst_requests: u64,

    /// Number of concurrent users to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per user
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Every user hits the same identity, stressing a single counter
    #[structopt(long)]
    shared_identity: bool,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    allowed: u64,
    burst: u64,
    denied: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "admission_bench={},admission_control={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let admission = build_admission(&opt).await?;
    run_benchmark(admission, opt).await
}

async fn build_admission(opt: &Opt) -> admission_control::Result<Admission> {
    let policy = Policy::new(
        BENCH_SCOPE,
        opt.max_requests,
        Duration::from_secs(opt.window_seconds),
    )
    .with_burst(opt.burst_requests, Duration::from_secs(5))
    .allow_anonymous();
    let registry = PolicyRegistry::builder().register(policy).build()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match opt.storage.as_str() {
        "redis" => {
            let config = AdmissionConfig {
                remote_enabled: true,
                redis: RedisConfig {
                    url: opt.redis_url.clone(),
                    connection_timeout: Duration::from_secs(5),
                    ..RedisConfig::default()
                },
                ..AdmissionConfig::default()
            };
            let backend = RemoteCounterBackend::new(config.redis.clone())?;
            if let Err(e) = backend.ping().await {
                error!("Failed to connect to Redis: {}", e);
                return Err(e);
            }
            let remote: Arc<dyn CounterStore> = Arc::new(backend);
            Admission::with_remote(registry, remote, clock, config)
        }
        _ => Admission::local_only(registry, clock),
    }
}

async fn run_benchmark(
    admission: Admission,
    opt: Opt,
) -> Result<(), Box<dyn std::error::Error>> {
    // Namespaces identities so repeated runs against a shared Redis never collide
    let run_id = Uuid::new_v4().simple().to_string();
    let name = format!(
        "Fixed Window ({}{})",
        opt.storage,
        if opt.shared_identity { ", shared identity" } else { "" }
    );

    println!("\nRunning benchmark: {}", name);
    println!("======================={}", "=".repeat(name.len()));

    let mut total_duration = Duration::from_secs(0);
    let mut total = Tally::default();
    let admission = Arc::new(admission);
    let total_requests = (opt.num_users * opt.requests_per_user) as u64;

    for iteration in 0..opt.iterations {
        info!("Starting iteration {} of {}", iteration + 1, opt.iterations);

        let progress = ProgressBar::new(total_requests);
        progress.set_style(
            ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec})",
            )?
            .progress_chars("=>-"),
        );
        progress.set_prefix(format!("iteration {}", iteration + 1));

        let barrier = Arc::new(Barrier::new(opt.num_users));
        let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
        let start_time = Instant::now();

        let handles = (0..opt.num_users).map(|user_id| {
            let admission = Arc::clone(&admission);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            let identity = if opt.shared_identity {
                format!("bench:{}:{}:shared", run_id, iteration)
            } else {
                format!("bench:{}:{}:user_{}", run_id, iteration, user_id)
            };
            let requests_per_user = opt.requests_per_user;

            tokio::spawn(async move {
                barrier.wait().await;

                let mut tally = Tally::default();
                for _ in 0..requests_per_user {
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };
                    match admission.check(&identity, BENCH_SCOPE).await {
                        Ok(decision) if decision.allowed => {
                            tally.allowed += 1;
                            if decision.used_burst {
                                tally.burst += 1;
                            }
                        }
                        Ok(_) => tally.denied += 1,
                        Err(e) => {
                            error!("Check failed: {}", e);
                            tally.denied += 1;
                        }
                    }
                    progress.inc(1);

                    // Jitter so users interleave instead of running in lockstep
                    let pause = rand::rng().random_range(0..50);
                    if pause == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                tally
            })
        });

        let mut iteration_tally = Tally::default();
        for result in join_all(handles).await {
            let tally = result?;
            iteration_tally.allowed += tally.allowed;
            iteration_tally.burst += tally.burst;
            iteration_tally.denied += tally.denied;
        }

        let elapsed = start_time.elapsed();
        progress.finish_and_clear();
        total_duration += elapsed;
        total.allowed += iteration_tally.allowed;
        total.burst += iteration_tally.burst;
        total.denied += iteration_tally.denied;

        println!(
            "Iteration {}: {} allowed ({} burst), {} denied in {:?} ({:.0} req/s)",
            iteration + 1,
            iteration_tally.allowed,
            iteration_tally.burst,
            iteration_tally.denied,
            elapsed,
            total_requests as f64 / elapsed.as_secs_f64()
        );
    }

    let iterations = opt.iterations.max(1) as u32;
    let requests = total.allowed + total.denied;

    println!("\nSummary:");
    println!("--------");
    println!("Total requests: {}", requests);
    println!("Allowed: {} ({} from burst allowance)", total.allowed, total.burst);
    println!("Denied: {}", total.denied);
    println!("Average iteration time: {:?}", total_duration / iterations);
    println!(
        "Throughput: {:.0} req/s",
        requests as f64 / total_duration.as_secs_f64().max(f64::EPSILON)
    );
    let metrics = admission.metrics();
    println!(
        "Shared-store fallbacks: {}",
        metrics.fallbacks_total("error")
            + metrics.fallbacks_total("timeout")
            + metrics.fallbacks_total("circuit_open")
    );

    Ok(())
}
