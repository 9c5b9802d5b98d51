//! Run a WiZ bridge from a JSON configuration file.
//!
//! The file is rewritten whenever new bulbs announce themselves, so that
//! they keep their generated names across restarts.
//!
//! Run with: cargo run --example bridge_demo -- --config wiz.json

use std::ops::ControlFlow;
use std::path::PathBuf;

use clap::Parser;
use wiz_bridge::{Bridge, BridgeConfig, read_document, write_document};

#[derive(Parser)]
#[command(name = "bridge-demo")]
#[command(about = "Bridge a home controller to WiZ bulbs", long_about = None)]
struct Cli {
    /// Configuration file holding the device list
    #[arg(short, long, default_value = "wiz.json")]
    config: PathBuf,

    /// Port the bulbs report to
    #[arg(long, default_value = "38900")]
    listen_port: u16,

    /// Port the bulbs listen on
    #[arg(long, default_value = "38899")]
    device_port: u16,

    /// Switch a device on at startup: INDEX or INDEX:SECONDS for a pulse
    #[arg(long)]
    on: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let document = read_document(&cli.config)?;
    let config = BridgeConfig {
        listen_port: cli.listen_port,
        device_port: cli.device_port,
        ..BridgeConfig::default()
    };
    let mut bridge = Bridge::initialize(config, &document).await?;

    if let Some(target) = &cli.on {
        let (index, pulse) = match target.split_once(':') {
            Some((index, pulse)) => (index.parse::<usize>()?, pulse.parse::<u64>()?),
            None => (target.parse::<usize>()?, 0),
        };
        bridge.set(index, true, pulse).await?;
    }

    let path = cli.config.clone();
    bridge
        .run_with(|manager| {
            for event in manager.log_mut().drain_events() {
                println!(
                    "{} {} {} {}",
                    event.category, event.name, event.action, event.detail
                );
            }
            if manager.changed() {
                let saved = manager
                    .live_config()
                    .to_value()
                    .and_then(|doc| write_document(&path, &doc));
                if let Err(e) = saved {
                    eprintln!("cannot save {}: {e}", path.display());
                }
            }
            ControlFlow::Continue(())
        })
        .await;
    Ok(())
}
