use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyed_throttle::{
    Clock, ContinuousTokenBucket, EscalatingThrottler, FixedWindowTokenBucket, LimiterPolicy,
    ManualClock,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "keyed-throttle", about = "Inspect and simulate keyed rate limit policies")]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a policy file and print it normalized
    Validate {
        #[arg(long)]
        policy: PathBuf,
    },
    /// Replay a burst of requests for one key against a policy
    Simulate {
        #[arg(long)]
        policy: PathBuf,
        #[arg(long, default_value = "user")]
        key: String,
        #[arg(long, default_value_t = 10)]
        requests: u32,
        /// Simulated time between requests
        #[arg(long, default_value_t = 100)]
        spacing_ms: u64,
        /// Tokens per request for bucket policies
        #[arg(long, default_value_t = 1)]
        cost: u32,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("keyed_throttle={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Validate { policy } => {
            let policy = load_policy(&policy)?;
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
        Command::Simulate {
            policy,
            key,
            requests,
            spacing_ms,
            cost,
        } => {
            let policy = load_policy(&policy)?;
            tracing::info!(
                kind = policy.kind(),
                key = %key,
                requests,
                spacing_ms,
                "starting simulation"
            );
            simulate(policy, &key, requests, Duration::from_millis(spacing_ms), cost)?;
        }
    }

    Ok(())
}

fn load_policy(path: &Path) -> Result<LimiterPolicy> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file {}", path.display()))?;
    LimiterPolicy::from_json(&raw)
        .with_context(|| format!("Invalid policy in {}", path.display()))
}

/// One simulated request and the limiter's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outcome {
    at_ms: u64,
    allowed: bool,
}

fn simulate(
    policy: LimiterPolicy,
    key: &str,
    requests: u32,
    spacing: Duration,
    cost: u32,
) -> Result<()> {
    let outcomes = run_simulation(policy, key, requests, spacing, cost)?;

    for (request, outcome) in outcomes.iter().enumerate() {
        println!(
            "t=+{}ms key={} request={} allowed={}",
            outcome.at_ms,
            key,
            request + 1,
            outcome.allowed
        );
    }

    let allowed = outcomes.iter().filter(|outcome| outcome.allowed).count();
    println!("{allowed}/{requests} requests allowed");
    Ok(())
}

/// Drive the policy's limiter with a manual clock, `spacing` apart.
fn run_simulation(
    policy: LimiterPolicy,
    key: &str,
    requests: u32,
    spacing: Duration,
    cost: u32,
) -> Result<Vec<Outcome>> {
    let clock = ManualClock::new(0);

    let mut decide: Box<dyn FnMut() -> bool + '_> = match policy {
        LimiterPolicy::Continuous(config) => {
            let mut limiter =
                ContinuousTokenBucket::<String, _>::with_config(config, clock.clone())?;
            Box::new(move || limiter.check(key, cost))
        }
        LimiterPolicy::FixedWindow(config) => {
            let mut limiter =
                FixedWindowTokenBucket::<String, _>::with_config(config, clock.clone())?;
            Box::new(move || limiter.check(key, cost))
        }
        LimiterPolicy::Escalating(config) => {
            let mut throttler =
                EscalatingThrottler::<String, _>::with_config(config, clock.clone())?;
            // Every permitted attempt counts as a failure, so backoff keeps growing
            Box::new(move || {
                let allowed = throttler.check(key);
                if allowed {
                    throttler.increment(key);
                }
                allowed
            })
        }
    };

    let mut outcomes = Vec::with_capacity(requests as usize);
    for request in 0..requests {
        if request > 0 {
            clock.advance(spacing);
        }
        outcomes.push(Outcome {
            at_ms: clock.now_ms(),
            allowed: decide(),
        });
    }
    Ok(outcomes)
}
