//! Campaign Engine: segment customers with a rule and run a campaign
//! against them from the command line.

mod dataset;
mod dry_run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use campaign_cdp::InMemoryCustomerStore;
use campaign_core::config::AppConfig;
use campaign_delivery::InMemoryDeliveryLog;
use campaign_management::{CampaignObjective, CreateCampaignRequest, Orchestrator};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use crate::dataset::Dataset;
use crate::dry_run::DryRunSender;

#[derive(Parser, Debug)]
#[command(name = "campaign-engine")]
#[command(about = "Rule-based audience segmentation and campaign delivery")]
#[command(version)]
struct Cli {
    /// Config file (TOML); environment variables still take precedence
    #[arg(long, env = "CAMPAIGN_ENGINE_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_ENGINE__NODE_ID")]
    node_id: Option<String>,

    /// Retries per member after the first attempt (overrides config)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Concurrent deliveries (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count the audience a rule selects
    Preview {
        /// JSON dataset of customers and orders
        #[arg(long)]
        data: PathBuf,
        /// Segmentation rule, e.g. "spend > 10000 AND visits < 3"
        #[arg(long)]
        rule: String,
    },
    /// Create a campaign and deliver it with a dry-run sender
    Run {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        rule: String,
        #[arg(long, default_value = "cli-campaign")]
        name: String,
        /// promotion, loyalty or win_back; picks a suggested message
        #[arg(long, value_parser = parse_objective)]
        objective: Option<CampaignObjective>,
        /// Message body; may use {{name}} and {{email}}
        #[arg(long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "campaign_engine=info,campaign_management=info,campaign_delivery=info".into()
            }),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(max_retries) = cli.max_retries {
        config.delivery.max_retries = max_retries;
    }
    if let Some(concurrency) = cli.concurrency {
        config.delivery.concurrency_limit = concurrency;
    }

    info!(
        node_id = %config.node_id,
        max_retries = config.delivery.max_retries,
        concurrency = config.delivery.concurrency_limit,
        "Configuration loaded"
    );

    match cli.command {
        Command::Preview { data, rule } => {
            let orchestrator = build(&config, &data)?;
            let rule = orchestrator.parse_rule(&rule)?;
            let count = orchestrator.preview_audience(&rule)?;
            println!("{}", json!({ "rule": rule.to_string(), "count": count }));
        }
        Command::Run {
            data,
            rule,
            name,
            objective,
            message,
        } => {
            let orchestrator = build(&config, &data)?;
            let campaign = orchestrator.create_campaign(CreateCampaignRequest {
                name,
                rule,
                objective,
                message,
            })?;
            info!(
                campaign_id = %campaign.id,
                audience = campaign.audience_size(),
                "Campaign ready"
            );

            let preview = match campaign.audience.iter().next() {
                Some(member) => orchestrator.render_message(&campaign.id, member)?,
                None => None,
            };
            if let Some(text) = &preview {
                info!(campaign_id = %campaign.id, message = %text, "Message preview");
            }

            if campaign.audience.is_empty() {
                println!("{}", serde_json::to_string(&campaign)?);
                return Ok(());
            }

            let handle = orchestrator.start_delivery(&campaign.id)?;
            let status = tokio::select! {
                status = handle.wait() => status,
                _ = tokio::signal::ctrl_c() => {
                    info!(campaign_id = %campaign.id, "Interrupted, cancelling delivery");
                    orchestrator.cancel_delivery(&campaign.id)?;
                    handle.wait().await
                }
            };

            let campaign = orchestrator.get_campaign(&campaign.id)?;
            let entries = orchestrator.list_log_entries(&campaign.id)?;
            info!(campaign_id = %campaign.id, status = %status, entries = entries.len(), "Campaign finished");
            println!(
                "{}",
                json!({
                    "campaign": campaign,
                    "message_preview": preview,
                    "log_entries": entries.len(),
                })
            );
        }
    }

    Ok(())
}

fn parse_objective(name: &str) -> Result<CampaignObjective, String> {
    CampaignObjective::from_name(name)
        .ok_or_else(|| format!("unknown objective '{}' (promotion, loyalty, win_back)", name))
}

fn build(config: &AppConfig, data: &std::path::Path) -> anyhow::Result<Orchestrator> {
    let customers = Arc::new(InMemoryCustomerStore::new());
    Dataset::from_file(data)?.load_into(&customers)?;

    Orchestrator::new(
        config,
        customers,
        Arc::new(InMemoryDeliveryLog::new()),
        Arc::new(DryRunSender),
    )
    .context("building orchestrator")
}
