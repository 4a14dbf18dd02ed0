use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use upnp_gateway::{init_logging, Protocol, UpnpConfig, UpnpController, VERSION};

#[derive(Parser, Debug)]
#[command(author, version, about = "UPnP gateway discovery and port forwarding", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find the gateway and print local and external addresses
    Discover {
        /// Skip SSDP and only look up the public IP over HTTP
        #[arg(long)]
        no_upnp: bool,
    },

    /// Forward a port on the gateway to this host
    Forward {
        #[arg(short, long)]
        port: u16,

        /// TCP or UDP
        #[arg(long, default_value = "TCP")]
        protocol: Protocol,

        /// Mapping description shown by the router
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Remove a forwarding rule from the gateway
    Delete {
        #[arg(short, long)]
        port: u16,

        /// TCP or UDP
        #[arg(long, default_value = "TCP")]
        protocol: Protocol,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);
    tracing::debug!("upnp-gateway v{}", VERSION);

    let config = load_config(args.config.as_deref())?;
    let controller = UpnpController::new(config.clone())?;

    println!("Local IP: {}", controller.local_ip());

    match args.command {
        Command::Discover { no_upnp } => {
            discover(&controller, !no_upnp).await?;
            if !no_upnp {
                match controller.endpoint() {
                    Some(endpoint) => {
                        println!("Gateway: {}", endpoint.description_url);
                        println!("Control URL: {}", endpoint.control_url);
                        println!("Event URL: {}", endpoint.event_url);
                    }
                    None => println!("Gateway: not found"),
                }
            }
            match controller.external_ip() {
                Some(ip) => println!("External IP: {}", ip),
                None => println!("External IP: unknown"),
            }
        }
        Command::Forward { port, protocol, description } => {
            discover(&controller, true).await?;
            let description = description.unwrap_or(config.mapping_description);
            if controller.forward_port(port, protocol, &description).await {
                println!("Requested forwarding of {}/{} to {}", port, protocol, controller.local_ip());
            } else {
                println!("No UPnP gateway available, nothing forwarded");
            }
        }
        Command::Delete { port, protocol } => {
            discover(&controller, true).await?;
            if controller.delete_forwarding_rule(port, protocol).await {
                println!("Requested removal of {}/{}", port, protocol);
            } else {
                println!("No UPnP gateway available, nothing removed");
            }
        }
    }

    controller.shutdown();
    Ok(())
}

async fn discover(controller: &UpnpController, use_upnp: bool) -> Result<()> {
    controller
        .discover(use_upnp)
        .await
        .context("discovery was cancelled")
}

/// Explicit `--config`, else `<config dir>/upnp-gateway/config.json`, else defaults
fn load_config(explicit: Option<&std::path::Path>) -> Result<UpnpConfig> {
    if let Some(path) = explicit {
        return UpnpConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    if let Some(path) = dirs::config_dir().map(|dir| dir.join("upnp-gateway").join("config.json")) {
        if path.exists() {
            tracing::debug!("Using config {}", path.display());
            return UpnpConfig::from_file(&path)
                .with_context(|| format!("Failed to load config {}", path.display()));
        }
    }

    Ok(UpnpConfig::default())
}
