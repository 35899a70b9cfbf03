//! marketgate - inspect and drive the quota-governed API cache
//!
//! A thin command-line front end over the library: cache statistics and
//! maintenance, cached lookups, and fetch-through calls to either upstream.

use std::process::ExitCode;

use clap::Parser;
use serde_json::{json, Map, Value};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use marketgate::cli::{parse_target, Cli, Command, FetchTarget, Source};
use marketgate::context::Context;

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.resolve_config()?;
    let ctx = Context::new(config)?;

    match cli.command {
        Command::Stats => print_json(&json!({
            "cache": ctx.cache.stats(),
            "daily_budget": ctx.daily_budget.snapshot(),
            "burst_limiter": ctx.burst_limiter.stats(),
        })),
        Command::Cleanup => print_json(&serde_json::to_value(ctx.cache.cleanup())?),
        Command::Clear { namespace } => {
            ctx.cache.clear(namespace.as_deref());
            match namespace {
                Some(ns) => println!("Cleared memory entries in namespace '{}'", ns),
                None => println!("Cleared all cache tiers"),
            }
            Ok(())
        }
        Command::Get { namespace, key } => {
            print_json(&serde_json::to_value(ctx.cache.get(&namespace, &key))?)
        }
        Command::Fetch {
            source,
            namespace,
            targets,
        } => {
            let targets = targets
                .iter()
                .map(|t| parse_target(t))
                .collect::<Result<Vec<FetchTarget>, _>>()?;
            let client = match source {
                Source::Daily => ctx.daily_client(),
                Source::Burst => ctx.burst_client(),
            };

            // Sweep while the batch is in flight
            let sweeper = ctx.spawn_sweeper();
            let results = futures::future::join_all(
                targets
                    .iter()
                    .map(|t| client.cached_fetch(&namespace, &t.key, &t.url)),
            )
            .await;
            sweeper.shutdown().await;

            let mut served = Map::new();
            let mut failures = 0;
            for (target, result) in targets.iter().zip(results) {
                match result {
                    Ok(value) => {
                        served.insert(target.key.clone(), serde_json::to_value(value)?);
                    }
                    Err(e) => {
                        failures += 1;
                        eprintln!("{}: {}", target.key, e);
                    }
                }
            }
            print_json(&Value::Object(served))?;

            if failures > 0 {
                return Err(format!("{} of {} fetches failed", failures, targets.len()).into());
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is best effort; a second init or missing terminal is not fatal
    let _ = TermLogger::init(
        cli.log_level(),
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
