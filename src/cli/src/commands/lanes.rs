//! Broker lane commands.

use anyhow::Result;
use clap::Subcommand;
use raptor_core::broker::Lane;
use raptor_core::config::Config;
use serde::Serialize;
use tabled::Tabled;

use crate::backends;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum LaneCommands {
    /// Provision every lane and show queue depths
    List,

    /// Delete the lane exchanges and close the broker session
    Teardown {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Serialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct LaneRow {
    #[tabled(rename = "Lane")]
    lane: String,
    #[tabled(rename = "Exchange")]
    exchange: String,
    #[tabled(rename = "Queue")]
    queue: String,
    #[tabled(rename = "Depth")]
    depth: u64,
    #[tabled(rename = "Dead letters")]
    dead_letters: u64,
    #[tabled(rename = "Description")]
    description: String,
}

pub async fn execute(cmd: LaneCommands, config: &Config, format: OutputFormat) -> Result<()> {
    match cmd {
        LaneCommands::List => {
            let session = backends::session(config).await?;

            let mut rows = Vec::new();
            for lane in Lane::all() {
                let lane_config = session.lane_config(lane);
                rows.push(LaneRow {
                    lane: lane.to_string(),
                    exchange: lane_config.exchange.name.clone(),
                    queue: lane_config.name.clone(),
                    depth: session.broker().queue_depth(&lane_config.name).await?,
                    dead_letters: session.broker().queue_depth(&lane_config.dead_letter.name).await?,
                    description: lane.description().to_string(),
                });
            }
            session.disconnect().await?;

            output::print_list(&rows, format)?;
        }

        LaneCommands::Teardown { force } => {
            if !force {
                output::print_info(
                    "This deletes every lane exchange; queued messages become unroutable. Use --force to confirm.",
                );
                return Ok(());
            }

            let session = backends::session(config).await?;
            session.shutdown().await?;
            output::print_success("Lane exchanges deleted");
        }
    }

    Ok(())
}
