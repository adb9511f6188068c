use std::path::PathBuf;
use std::sync::Arc;

use advisor_swarm::{AdvisorService, SwarmConfig};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Advisor board over a multi-provider LLM router", long_about = None)]
struct Args {
    /// Path to a TOML config file; environment defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Put a question to the full advisor board
    Ask {
        question: String,

        /// Emit the full result as JSON instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Probe every configured backend
    Health,
    /// Show per-backend call metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = SwarmConfig::load(args.config.as_deref())?;
    let service = AdvisorService::from_config(&config)?;

    match args.command {
        Command::Ask { question, json } => {
            let progress: advisor_swarm::ProgressFn = Arc::new(|states| {
                let busy = states.values().filter(|s| !s.is_terminal()).count();
                info!(busy, total = states.len(), "board progress");
            });
            let result = service.run_swarm(&question, Some(progress)).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Run {}", result.run_id);
                println!();
                for agent in &result.agent_results {
                    println!(
                        "  {:<12} {:<10} {:>3}%  {}",
                        agent.persona,
                        agent.verdict.to_string(),
                        agent.confidence,
                        agent.summary
                    );
                }
                println!();
                println!("Consensus: {} ({}%)", result.consensus, result.confidence);
                println!("{}", result.recommendation);
                println!(
                    "Total: {} ms, ${:.4}",
                    result.total_duration_ms, result.total_cost_usd
                );
            }
        }
        Command::Health => {
            let health = service.health().await;
            let mut names: Vec<_> = health.keys().collect();
            names.sort();
            for name in names {
                let entry = &health[name];
                match &entry.error {
                    Some(error) => {
                        println!("  {:<12} unavailable ({:>4}ms): {}", name, entry.latency_ms, error)
                    }
                    None => println!("  {:<12} available   ({:>4}ms)", name, entry.latency_ms),
                }
            }
        }
        Command::Metrics => {
            for metrics in service.metrics() {
                println!(
                    "  {:<12} requests={} ok={} failed={} avg_latency={}ms cost=${:.4}",
                    metrics.provider,
                    metrics.total_requests,
                    metrics.successes,
                    metrics.failures,
                    metrics.avg_latency_ms,
                    metrics.total_cost_usd
                );
            }
        }
    }

    service.close().await;
    Ok(())
}
