use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cruxwatch::{
    Config, NetworkManager, Outcome, config,
    manager::AddDeviceRequest,
    network::{SnmpCredentials, SshCredentials},
    traps::TrapListener,
};

/// Network element inventory: SNMP discovery and command execution through gateway NEs
#[derive(Parser)]
#[command(name = "cruxwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Logical network to operate on
    #[arg(short, long, global = true, env = "CRUXWATCH_NETWORK", default_value = "default")]
    network: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a device after checking that an SSH login succeeds
    Add {
        name: String,
        ip: String,
        #[arg(long, default_value = "huawei")]
        vendor: String,
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "CRUXWATCH_SSH_PASSWORD")]
        password: String,
        /// Privileged / enable secret
        #[arg(long)]
        secret: Option<String>,
        #[arg(long)]
        site: Option<String>,
    },
    /// Set SNMPv3 credentials on a device and poll it
    Snmp {
        device: String,
        #[arg(short, long)]
        username: String,
        #[arg(long, default_value = "SHA")]
        auth_protocol: String,
        #[arg(long, env = "CRUXWATCH_SNMP_AUTH_PASSWORD")]
        auth_password: String,
        #[arg(long, default_value = "AES128")]
        priv_protocol: String,
        #[arg(long, env = "CRUXWATCH_SNMP_PRIV_PASSWORD")]
        priv_password: String,
        /// New management IP
        #[arg(long)]
        ip: Option<String>,
    },
    /// Discover the neighbors of a seed device
    Discover { seed: String },
    /// Poll identity and interfaces of a device
    Poll { device: String },
    /// Run a command on a device, through its gateway
    Exec {
        device: String,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Fetch the running configuration of a device
    Config { device: String },
    /// Probe every device of the network and update statuses
    Status,
    /// Print the topology snapshot of the network
    Topology,
    /// Listen for SNMP traps and print them as JSON lines
    Traps,
}

fn print<T: Serialize>(outcome: &Outcome<T>) -> ExitCode {
    match serde_json::to_string_pretty(outcome) {
        Ok(text) => println!("{text}"),
        Err(e) => error!("Cannot render result: {e}"),
    }
    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Persist the network after an operation that changed it.
async fn print_and_save<T: Serialize>(
    manager: &NetworkManager,
    network: &str,
    outcome: Outcome<T>,
) -> ExitCode {
    if outcome.is_success() {
        if let Outcome::Failure { error } = manager.save_network(network).await {
            warn!("Network {network} not saved: {error}");
        }
    }
    print(&outcome)
}

async fn listen_for_traps(config: &Config) -> ExitCode {
    let mut listener = match TrapListener::bind(config.trap_bind, config.trap_queue_capacity).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Cannot bind trap listener on {}: {e}", config.trap_bind);
            return ExitCode::FAILURE;
        }
    };
    loop {
        tokio::select! {
            event = listener.next() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("Cannot render trap: {e}"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping trap listener");
                break;
            }
        }
    }
    listener.stop();
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config::log_directive(|key| std::env::var(key).ok()).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    let config = Config::from_env();

    if let Commands::Traps = cli.command {
        return listen_for_traps(&config).await;
    }

    let network = cli.network;
    let manager = NetworkManager::from_config(config);
    if let Outcome::Failure { error } = manager.load_network(&network).await {
        info!("Starting network {network} from scratch ({error})");
    }

    match cli.command {
        Commands::Add {
            name,
            ip,
            vendor,
            username,
            password,
            secret,
            site,
        } => {
            let mut ssh = SshCredentials::new(&username, &password);
            ssh.secret = secret;
            let request = AddDeviceRequest {
                name,
                vendor,
                ip,
                network_name: network.clone(),
                site_name: site,
                ssh,
            };
            print_and_save(&manager, &network, manager.add_device(request).await).await
        }
        Commands::Snmp {
            device,
            username,
            auth_protocol,
            auth_password,
            priv_protocol,
            priv_password,
            ip,
        } => {
            let snmp = SnmpCredentials::new(
                &username,
                &auth_protocol,
                &auth_password,
                &priv_protocol,
                &priv_password,
            );
            let outcome = manager.set_snmp(&device, snmp, ip.as_deref()).await;
            print_and_save(&manager, &network, outcome).await
        }
        Commands::Discover { seed } => {
            print_and_save(&manager, &network, manager.discover(&seed).await).await
        }
        Commands::Poll { device } => {
            print_and_save(&manager, &network, manager.poll(&device).await).await
        }
        Commands::Exec { device, command } => {
            print(&manager.execute(&device, &command.join(" ")).await)
        }
        Commands::Config { device } => print(&manager.query_config(&device).await),
        Commands::Status => {
            let outcome = manager.check_statuses(Some(&network)).await;
            print_and_save(&manager, &network, outcome).await
        }
        Commands::Topology => print(&manager.topology(&network).await),
        Commands::Traps => ExitCode::SUCCESS,
    }
}
