mod bluetooth;
mod config;
mod device;
mod error;
mod protocol;

use std::time::Duration;

use anyhow::{Context, Result};
use bluer::Address;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use bluetooth::{scanner, BluezConnector, CancelHandle, DeviceSession};
use config::AppConfig;
use device::anc::Mode;
use device::{AncControl, ToggleOutcome};

#[derive(Parser)]
#[command(
    name = "anctoggle",
    about = "Toggle noise cancellation on Huawei FreeBuds over Bluetooth SPP"
)]
struct Cli {
    /// Device name or Bluetooth address (overrides the config file)
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Select a mode: off, noise-cancel or awareness
    Set { mode: Mode },
    /// Advance through off -> noise-cancel -> awareness
    Toggle {
        #[arg(long, default_value_t = 1)]
        times: u32,
    },
    /// Keep the link open: Enter toggles, c cancels, r resets, s shows status, q quits
    Interactive,
    /// Print the frame for a mode without touching the radio
    Frame { mode: Mode },
    /// List paired devices
    Devices,
    /// Show or save the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Save,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let crate_level = if cli.verbose {
        "anctoggle=debug"
    } else {
        "anctoggle=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(crate_level.parse()?)
        .add_directive("bluer=info".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = AppConfig::load();
    if let Some(device) = cli.device {
        if device.parse::<Address>().is_ok() {
            config.device_address = Some(device);
        } else {
            config.device_name = device;
            config.device_address = None;
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.action, config))
}

async fn run(action: Action, config: AppConfig) -> Result<()> {
    match action {
        Action::Frame { mode } => {
            let command = mode.command();
            let bytes = command.to_bytes();
            let spaced: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            println!("{} ({}): {}", mode, command, spaced.join(" "));
            Ok(())
        }
        Action::Devices => {
            let devices = scanner::list_paired_devices()
                .await
                .context("Failed to list paired devices")?;
            for dev in devices {
                println!(
                    "{}  {}{}{}",
                    dev.address,
                    dev.name,
                    if dev.connected { "  [connected]" } else { "" },
                    if dev.has_serial_port() { "  [spp]" } else { "" },
                );
            }
            Ok(())
        }
        Action::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", AppConfig::path().display());
                print!("{}", config.to_toml()?);
                Ok(())
            }
            ConfigAction::Save => {
                let path = config.save()?;
                println!("Saved {}", path.display());
                Ok(())
            }
        },
        Action::Set { mode } => {
            let control = start_control(&config);
            let outcome = control.set_mode(mode).await;
            report(&outcome);
            control.close().await;
            outcome.result.map_err(Into::into)
        }
        Action::Toggle { times } => {
            let control = start_control(&config);
            let mut last = Ok(());
            for _ in 0..times.max(1) {
                let outcome = control.toggle_mode().await;
                report(&outcome);
                last = outcome.result;
            }
            control.close().await;
            last.map_err(Into::into)
        }
        Action::Interactive => run_interactive(start_control(&config), &config).await,
    }
}

fn start_control(config: &AppConfig) -> AncControl {
    let connector = BluezConnector::new(
        config.rfcomm_channels.clone(),
        Duration::from_millis(config.connect_timeout_ms),
    );
    info!("Using device: {}", config.device_identifier());
    let session = DeviceSession::spawn(
        Box::new(connector),
        config.device_identifier(),
        config.session_config(),
    );
    AncControl::new(session)
}

fn report(outcome: &ToggleOutcome) {
    match &outcome.result {
        Ok(()) => println!("{}: sent", outcome.mode.label()),
        Err(e) => println!("{}: not sent ({})", outcome.mode.label(), e),
    }
}

async fn run_interactive(control: AncControl, config: &AppConfig) -> Result<()> {
    println!("Enter: toggle   c: cancel last   r: reset   s: status   q: quit");

    if let Err(e) = control.connect(config.device_identifier()).await {
        // Not fatal: each toggle reconnects on its own
        println!("Not connected yet: {}", e);
    }

    let mut states = control.subscribe();
    let state_task = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("[link] {:?}", state);
        }
    });

    let mut last_queued: Option<CancelHandle> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" | "t" => {
                let (mode, pending) = control.begin_toggle().await;
                println!("{}: queued", mode.label());
                last_queued = Some(pending.cancel_handle());
                let control = control.clone();
                tokio::spawn(async move {
                    let result = control.finish(pending).await;
                    report(&ToggleOutcome { mode, result });
                });
            }
            "c" => match last_queued.take() {
                // The mode stays toggled; only the frame is dropped
                Some(handle) => handle.cancel(),
                None => println!("Nothing queued"),
            },
            "r" => {
                control.reset_session().await;
                println!("Session reset");
            }
            "s" => {
                println!(
                    "mode={} link={:?} last_send={:?}",
                    control.current_mode().await,
                    control.connection_state(),
                    control.last_delivery()
                );
            }
            "q" => break,
            other => error!("Unknown input: {}", other),
        }
    }

    control.close().await;
    state_task.abort();
    Ok(())
}
