//! resilience-sim
//!
//! Drives a simulated flaky dependency through a circuit breaker, a retry and
//! a timeout built from one policy set, then prints what happened.
//!
//! ```text
//! call ──▶ circuit breaker ──▶ retry ──▶ timeout ──▶ simulated dependency
//!                │                │          │
//!                └────────────────┴──────────┴──▶ Tally (instrumentation)
//! ```

use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use resilience_kit::config::{load_config, validate_config, BackoffKind, ResilienceConfig};
use resilience_kit::observability::{init_logging, Instrumentation, TracingLogger};
use resilience_kit::resilience::{Collaborators, RetryOutcome, TimeoutOutcome};
use resilience_kit::{CallError, CallResult, Context, ResilienceKit};

#[derive(Parser, Debug)]
#[command(name = "resilience-sim", version, about = "Exercise a resilience policy set against a simulated dependency")]
struct Args {
    /// Policy file (TOML). Without it a fast demo policy is used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of guarded calls to make.
    #[arg(long, default_value_t = 200)]
    calls: u32,

    /// Probability that a dependency invocation fails.
    #[arg(long, default_value_t = 0.3)]
    failure_rate: f64,

    /// Normal dependency latency in milliseconds.
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,

    /// Probability that an invocation takes twice the time limit.
    #[arg(long, default_value_t = 0.05)]
    slow_rate: f64,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

/// In-memory record of every instrumentation callback.
#[derive(Default)]
struct Tally {
    inner: Mutex<TallyCounts>,
}

#[derive(Debug, Default, Clone, Serialize)]
struct TallyCounts {
    retry_outcomes: BTreeMap<&'static str, u64>,
    retry_attempts: u64,
    timeout_outcomes: BTreeMap<&'static str, u64>,
    circuit_breaker_results: BTreeMap<&'static str, u64>,
}

impl Tally {
    fn snapshot(&self) -> TallyCounts {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update(&self, f: impl FnOnce(&mut TallyCounts)) {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl Instrumentation for Tally {
    fn record_retry_call(&self, _name: &str, attempts: u32, outcome: RetryOutcome) {
        self.update(|t| {
            *t.retry_outcomes.entry(outcome.as_str()).or_default() += 1;
            t.retry_attempts += u64::from(attempts);
        });
    }

    fn record_timeout_call(&self, _name: &str, outcome: TimeoutOutcome) {
        self.update(|t| *t.timeout_outcomes.entry(outcome.as_str()).or_default() += 1);
    }

    fn record_circuit_breaker_call(&self, _name: &str, error: Option<&CallError>) {
        let result = match error {
            None => "success",
            Some(err) if err.is_rejected() => "rejected",
            Some(_) => "failure",
        };
        self.update(|t| *t.circuit_breaker_results.entry(result).or_default() += 1);
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    policy: String,
    calls: u32,
    succeeded: u32,
    failed: u32,
    rejected: u32,
    final_state: &'static str,
    elapsed_ms: u128,
    #[serde(flatten)]
    tally: TallyCounts,
}

/// Flaky dependency behaviour.
#[derive(Debug, Clone, Copy)]
struct Dependency {
    failure_rate: f64,
    slow_rate: f64,
    latency: Duration,
    slow_latency: Duration,
}

impl Dependency {
    async fn call(self, ctx: Context) -> CallResult<()> {
        let latency = if fastrand::f64() < self.slow_rate {
            self.slow_latency
        } else {
            self.latency
        };
        ctx.sleep(latency).await?;
        if fastrand::f64() < self.failure_rate {
            return Err(CallError::failed("simulated dependency failure"));
        }
        Ok(())
    }
}

/// Short waits so a run finishes in seconds.
fn demo_config() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.name = "simulated-dependency".to_string();
    config.retry.max_retries = 2;
    config.retry.backoff.kind = BackoffKind::Constant;
    config.retry.backoff.delay_ms = 10;
    config.circuit_breaker.wait_open_ms = 250;
    config.circuit_breaker.reset_interval_ms = 2_000;
    config.timeout.time_limit_ms = 50;
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging("resilience_sim=info,resilience_kit=info")?;

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let config = demo_config();
            if let Err(errors) = validate_config(&config) {
                return Err(format!("demo policy is invalid: {errors:?}").into());
            }
            config
        }
    };

    tracing::info!(
        policy = %config.name,
        calls = args.calls,
        failure_rate = args.failure_rate,
        slow_rate = args.slow_rate,
        time_limit_ms = config.timeout.time_limit_ms,
        "Starting simulation"
    );

    let tally = Arc::new(Tally::default());
    let kit = ResilienceKit::from_config(
        &config,
        Collaborators {
            logger: Some(Arc::new(TracingLogger)),
            instrumentation: Some(tally.clone()),
        },
    );

    let time_limit = Duration::from_millis(config.timeout.time_limit_ms);
    let dependency = Dependency {
        failure_rate: args.failure_rate,
        slow_rate: args.slow_rate,
        latency: Duration::from_millis(args.latency_ms),
        slow_latency: time_limit.saturating_mul(2),
    };

    let (ctx, cancel) = Context::background().with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping simulation");
            cancel.cancel();
        }
    });

    let started = tokio::time::Instant::now();
    let (mut calls, mut succeeded, mut failed, mut rejected) = (0, 0, 0, 0);

    for _ in 0..args.calls {
        if ctx.is_done() {
            break;
        }
        calls += 1;

        let result = kit
            .circuit_breaker()
            .execute(&ctx, || {
                kit.retry().execute(&ctx, || {
                    kit.timeout().execute(&ctx, |call_ctx| dependency.call(call_ctx))
                })
            })
            .await;

        match result {
            Ok(()) => succeeded += 1,
            Err(err) if err.is_rejected() => {
                rejected += 1;
                // Give the breaker a chance to reach its probe window.
                let _ = ctx.sleep(dependency.latency).await;
            }
            Err(err) => {
                tracing::debug!(error = %err, "Guarded call failed");
                failed += 1;
            }
        }
    }

    let summary = Summary {
        policy: config.name.clone(),
        calls,
        succeeded,
        failed,
        rejected,
        final_state: kit.circuit_breaker().state().as_str(),
        elapsed_ms: started.elapsed().as_millis(),
        tally: tally.snapshot(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

fn print_summary(summary: &Summary) {
    println!("policy            {}", summary.policy);
    println!("calls             {}", summary.calls);
    println!("  succeeded       {}", summary.succeeded);
    println!("  failed          {}", summary.failed);
    println!("  rejected        {}", summary.rejected);
    println!("breaker state     {}", summary.final_state);
    println!("elapsed           {} ms", summary.elapsed_ms);
    println!("invocations       {}", summary.tally.retry_attempts);
    for (label, counts) in [
        ("retry", &summary.tally.retry_outcomes),
        ("timeout", &summary.tally.timeout_outcomes),
        ("circuit breaker", &summary.tally.circuit_breaker_results),
    ] {
        let rendered: Vec<String> = counts.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!("{label:<17} {}", rendered.join(" "));
    }
}
