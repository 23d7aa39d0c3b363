use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkpost::agent::local::builtin_tools;
use inkpost::agent::plan::research_plan;
use inkpost::agent::{StepLimits, StepRunner};
use inkpost::config::{AppConfig, ProvidersConfig};
use inkpost::images::HttpImageChecker;
use inkpost::llm::OpenAiClient;
use inkpost::mcp::{PoolLimits, SharedPool};

#[derive(Parser)]
#[command(name = "inkpost")]
#[command(about = "Tool-calling content bot: research, write and publish posts via MCP providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a topic and publish a post about it
    Run {
        /// Topic to research and write about
        topic: String,
        /// Print the full plan report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discover candidate topics in a domain
    Topics {
        /// Domain to scan for trending topics
        domain: String,
        /// Seed discovery from a page URL instead of searching the domain
        #[arg(long)]
        url: Option<String>,
    },
    /// List tools exposed by the configured providers
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let providers = ProvidersConfig::load()?
        .context("no providers.json found; configure at least one MCP provider")?;

    let pool = SharedPool::initialize(
        &providers,
        config.rotation.clone(),
        PoolLimits {
            init_timeout: Duration::from_secs(config.agent.provider_init_timeout_secs),
        },
        builtin_tools(),
    )
    .await?;

    let runner = StepRunner::new(
        Arc::new(OpenAiClient::new(&config.llm)),
        pool.clone(),
        Arc::new(HttpImageChecker::new(Duration::from_secs(
            config.agent.image_timeout_secs,
        ))),
        StepLimits {
            max_iterations: config.agent.max_iterations,
            ..StepLimits::default()
        },
    );

    let result = run_command(cli.command, &runner, &pool).await;
    SharedPool::shutdown().await;
    result
}

async fn run_command(
    command: Commands,
    runner: &StepRunner,
    pool: &Arc<inkpost::mcp::ProviderPool>,
) -> Result<()> {
    match command {
        Commands::Run { topic, json } => {
            let plan = research_plan(&topic);
            let report = runner.run_plan(&plan).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.success {
                println!("Published.");
                if let Some(published) = &report.published {
                    println!("  title:  {}", published.title);
                    println!("  tags:   {}", published.tags.join(", "));
                    println!("  images: {}", published.images.len());
                }
            } else {
                println!("Failed: {}", report.error.as_deref().unwrap_or("unknown error"));
            }
            if !report.success {
                std::process::exit(1);
            }
        }
        Commands::Topics { domain, url } => {
            let topics = match url {
                Some(url) => runner.topics_from_url(&url).await?,
                None => runner.discover_topics(&domain).await?,
            };
            if topics.is_empty() {
                println!("No topics found.");
            }
            for topic in topics {
                println!("- {}", topic.title);
                if !topic.summary.is_empty() {
                    println!("    {}", topic.summary);
                }
            }
        }
        Commands::Tools => {
            for tool in pool.get_available_tools().await {
                let description = tool.description.unwrap_or_default();
                println!("[{}] {} - {}", tool.provider, tool.name, description);
            }
        }
    }
    Ok(())
}
