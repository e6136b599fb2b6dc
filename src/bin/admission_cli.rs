// src/bin/admission_cli.rs

use prettytable::{row, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use admission_control::clock::{Clock, SystemClock};
use admission_control::config::{AdmissionConfig, RedisConfig};
use admission_control::storage::{CounterStore, RemoteCounterBackend};
use admission_control::{Admission, Decision, Policy, PolicyRegistry};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "admission_cli",
    about = "Replay a request stream against one admission policy"
)]
struct Opt {
    /// Policy scope, e.g. auth:login or api:time-entries
    #[structopt(short, long, default_value = "auth:login")]
    scope: String,

    /// Caller identity the requests are counted against
    #[structopt(short, long, default_value = "ip:127.0.0.1")]
    identity: String,

    /// Override the scope's request ceiling (uses the built-in policy when absent)
    #[structopt(short, long)]
    max_requests: Option<u64>,

    /// Window length in seconds, with --max-requests
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Burst allowance on top of the ceiling, with --max-requests
    #[structopt(long, default_value = "0")]
    burst_requests: u64,

    /// Burst window in seconds
    #[structopt(long, default_value = "5")]
    burst_window_seconds: u64,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Time between requests in milliseconds (steady mode)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Count in Redis instead of process-local counters
    #[structopt(long)]
    redis: bool,

    /// Redis URL (with --redis)
    #[structopt(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "admission_cli={},admission_control={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let registry = registry_for(&opt)?;
    let admission = build_admission(&opt, registry).await?;
    let policy = admission.registry().resolve(&opt.scope)?;

    info!(
        scope = %policy.scope,
        max_requests = policy.max_requests,
        window_ms = policy.window_ms(),
        backend = admission.limiter().store().name(),
        "Starting {} simulation",
        opt.simulation
    );

    let interval = match opt.simulation.as_str() {
        "steady" => Some(Duration::from_millis(opt.request_interval_ms)),
        _ => None,
    };
    run_simulation(&opt, &admission, interval).await
}

/// Built-in table, or a single custom policy when --max-requests is given
fn registry_for(opt: &Opt) -> admission_control::Result<PolicyRegistry> {
    match opt.max_requests {
        Some(max_requests) => PolicyRegistry::builder()
            .register(
                Policy::new(
                    opt.scope.clone(),
                    max_requests,
                    Duration::from_secs(opt.window_seconds),
                )
                .with_burst(
                    opt.burst_requests,
                    Duration::from_secs(opt.burst_window_seconds),
                )
                .allow_anonymous(),
            )
            .build(),
        None => PolicyRegistry::with_defaults(),
    }
}

async fn build_admission(
    opt: &Opt,
    registry: PolicyRegistry,
) -> admission_control::Result<Admission> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if !opt.redis {
        return Admission::local_only(registry, clock);
    }

    let config = AdmissionConfig {
        remote_enabled: true,
        redis: RedisConfig {
            url: opt.redis_url.clone(),
            ..RedisConfig::default()
        },
        ..AdmissionConfig::default()
    };
    let backend = RemoteCounterBackend::new(config.redis.clone())?;
    if let Err(e) = backend.ping().await {
        warn!(error = %e, "Redis unreachable, the run will fall back to local counters");
    }
    let remote: Arc<dyn CounterStore> = Arc::new(backend);

    Admission::with_remote(registry, remote, clock, config)
}

async fn run_simulation(
    opt: &Opt,
    admission: &Admission,
    interval: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let clock = SystemClock;
    let mut table = Table::new();
    table.add_row(row![
        "#",
        "Result",
        "Burst",
        "Remaining",
        "Reset (epoch s)",
        "Retry-After (s)"
    ]);

    let mut allowed = 0;
    let mut burst = 0;
    let mut denied = 0;
    let start_time = Instant::now();

    for i in 0..opt.num_requests {
        let request_time = Instant::now();
        let decision: Decision = admission.check(&opt.identity, &opt.scope).await?;

        let retry_after = if decision.allowed {
            allowed += 1;
            if decision.used_burst {
                burst += 1;
            }
            "-".to_string()
        } else {
            denied += 1;
            decision.retry_after_secs(clock.now_ms()).to_string()
        };

        let number = i + 1;
        let result = if decision.allowed { "ALLOWED" } else { "DENIED" };
        let from_burst = if decision.used_burst { "yes" } else { "" };
        let reset = decision.reset_epoch_secs();
        table.add_row(row![
            number,
            result,
            from_burst,
            decision.remaining,
            reset,
            retry_after
        ]);

        if let Some(interval) = interval {
            let elapsed = request_time.elapsed();
            if elapsed < interval {
                time::sleep(interval - elapsed).await;
            }
        }
    }

    let elapsed = start_time.elapsed();

    table.printstd();
    println!("\nSimulation Results:");
    println!("-------------------");
    println!("Total requests: {}", opt.num_requests);
    println!("Allowed: {} ({} from burst allowance)", allowed, burst);
    println!("Denied: {}", denied);
    println!("Time elapsed: {:?}", elapsed);

    Ok(())
}
