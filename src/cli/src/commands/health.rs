//! Health check command.
//!
//! Pings the broker and the ledger and reports each.

use anyhow::{bail, Result};
use raptor_core::broker::Broker;
use raptor_core::config::Config;
use raptor_core::telemetry::SensitiveFieldRedactor;
use serde::Serialize;
use tabled::Tabled;

use crate::backends;
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct ComponentHealth {
    #[tabled(rename = "Component")]
    name: &'static str,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl ComponentHealth {
    fn healthy(&self) -> bool {
        self.status == "ok"
    }
}

fn status_of<E: std::fmt::Display>(result: Result<(), E>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    }
}

pub async fn execute(config: &Config, format: OutputFormat) -> Result<()> {
    let redactor = SensitiveFieldRedactor::global();

    let broker_status = match backends::broker(config).await {
        Ok(broker) => {
            let status = status_of(broker.ping().await);
            if let Err(e) = broker.close_connection().await {
                output::print_warning(&format!("Broker connection did not close cleanly: {}", e));
            }
            status
        }
        Err(e) => format!("{:#}", e),
    };

    let ledger_status = match backends::ledger(config).await {
        Ok(ledger) => status_of(ledger.ping().await),
        Err(e) => format!("{:#}", e),
    };

    let components = vec![
        ComponentHealth {
            name: "broker",
            url: redactor.redact_url(&config.broker.url),
            status: broker_status,
        },
        ComponentHealth {
            name: "ledger",
            url: redactor.redact_url(&config.ledger.url),
            status: ledger_status,
        },
    ];

    output::print_list(&components, format)?;

    if components.iter().all(ComponentHealth::healthy) {
        if let OutputFormat::Table = format {
            output::print_success("All systems operational");
        }
        Ok(())
    } else {
        bail!("One or more components are unhealthy")
    }
}
