use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use heatpilot::config::ConfigStore;
use heatpilot::daemon::{ControlLoop, CycleOutcome};
use heatpilot::directory::{self, DirectoryStore};
use heatpilot::gateway::LogGateway;
use heatpilot::hub::HubClient;
use heatpilot::{Config, Daemon};

/// Heatpilot - boiler setpoint control from radiator valve demand
#[derive(Parser)]
#[command(name = "heatpilot", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/heatpilot/config.toml)
    #[arg(short, long, env = "HEATPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop (default)
    Run,
    /// Discover valves on the hub and persist the directory
    Discover,
    /// Run a single control cycle and print the result
    Poll,
    /// Delete the persisted device directory
    Rescan,
    /// Print the effective configuration with secrets masked
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,heatpilot=info",
        1 => "info,heatpilot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let store = ConfigStore::open(path)?;
            let daemon = Daemon::new(store, Arc::new(LogGateway::new())).await?;
            daemon.run().await?;
            Ok(())
        }
        Command::Discover => cmd_discover(&Config::load(path)?).await,
        Command::Poll => cmd_poll(ConfigStore::open(path)?).await,
        Command::Rescan => cmd_rescan(&Config::load(path)?),
        Command::ShowConfig => {
            print!("{}", Config::load(path)?.to_redacted_toml()?);
            Ok(())
        }
    }
}

/// Discover valves and persist the directory
async fn cmd_discover(config: &Config) -> anyhow::Result<()> {
    let client = HubClient::http(config.hub.request_timeout)?;
    let mut session = client
        .login(
            &config.hub.address,
            config.hub.username.as_deref(),
            config.hub.password.as_deref(),
        )
        .await?;

    let result = directory::discover(&client, &mut session, &config.hub.valve_device_type).await;
    client.logout(&mut session).await;
    let dir = result?;

    DirectoryStore::new(config.directory_path()).save(&dir)?;

    println!("{} valve(s) of type {}:", dir.len(), dir.device_type);
    for device in dir.devices() {
        println!(
            "  {:<10} {:<16} {}",
            device.interface,
            device.address,
            device.room_name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Run one cycle against the log gateway
async fn cmd_poll(store: ConfigStore) -> anyhow::Result<()> {
    let timeout = store.snapshot().await.hub.request_timeout;
    let client = HubClient::http(timeout)?;
    let mut control = ControlLoop::new(store, client, Arc::new(LogGateway::new())).await;

    let outcome = control.run_cycle().await;
    control.shutdown().await;

    match outcome? {
        CycleOutcome::Completed {
            demand,
            setpoint,
            held,
        } => {
            if demand.is_valid() {
                println!(
                    "valves: {}/{}  avg: {:.1}%  max: {:.1}% ({})",
                    demand.count,
                    demand.polled,
                    demand.average_percent,
                    demand.max_percent,
                    demand.max_room.as_deref().unwrap_or("-")
                );
            } else {
                println!("valves: 0/{}  no level reported", demand.polled);
            }
            let note = if held { " (held)" } else { "" };
            println!("setpoint: {setpoint:.1} °C{note}");
        }
        CycleOutcome::Offline => println!("network offline"),
        CycleOutcome::AwaitingCredentials => println!("waiting for new hub credentials"),
    }
    Ok(())
}

/// Delete the persisted device directory
fn cmd_rescan(config: &Config) -> anyhow::Result<()> {
    let store = DirectoryStore::new(config.directory_path());
    store.invalidate()?;
    println!("Device directory cleared: {}", store.path().display());
    Ok(())
}
