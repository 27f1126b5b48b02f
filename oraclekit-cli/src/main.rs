//! `oraclekit`: drives the OracleKit client from a terminal.

mod host;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use oraclekit_core::token::{decode_auth_token, verify_auth_token};
use oraclekit_core::{OracleClient, OracleConfig, Stage};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oraclekit")]
#[command(about = "Device identity, auth tokens and supply polling for the PBG oracle")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the encrypted store and the device secret
    #[arg(long, env = "ORACLEKIT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, env = "ORACLEKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Polling endpoint, overrides the configuration file
    #[arg(long, env = "ORACLEKIT_ENDPOINT")]
    endpoint: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Deployment stage (mainnet, beta, preprod)
    #[arg(long)]
    stage: Option<Stage>,

    /// Platform identifier used to derive the device id
    #[arg(long, env = "ORACLEKIT_DEVICE_ID")]
    device_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or load the device keypair
    Init,

    /// Print the device id
    DeviceId,

    /// Mint a fresh authentication token
    Token,

    /// Decode a token without verifying it
    DecodeToken {
        /// Hex token
        token: String,
    },

    /// Verify a token against a public key
    Verify {
        /// Hex token
        token: String,

        /// Hex Ed25519 public key; defaults to this device's key
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Poll the endpoint until interrupted
    Poll {
        /// Run a single iteration and exit
        #[arg(long)]
        once: bool,
    },

    /// Request stage secrets; all stages if none is given
    Authorize {
        /// Stage to authorize
        #[arg(long = "for")]
        target: Option<Stage>,
    },

    /// Show stored stage secrets
    Secrets {
        /// Stage to show
        target: Stage,
    },

    /// Regenerate the storage master key, discarding every stored secret
    Rotate,
}

impl Cli {
    fn oracle_config(&self) -> eyre::Result<OracleConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("reading {}", path.display()))?;
                OracleConfig::from_json(&json)?
            }
            None => OracleConfig::default(),
        };
        if let Some(endpoint) = &self.endpoint {
            config.endpoint.clone_from(endpoint);
        }
        if let Some(interval_ms) = self.interval_ms {
            config.poll_interval_ms = interval_ms;
        }
        if let Some(stage) = self.stage {
            config.stage = stage;
        }
        Ok(config)
    }
}

fn init_tracing() -> eyre::Result<()> {
    tracing_log::LogTracer::init()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("oraclekit=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| eyre::eyre!(err))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match &cli.command {
        Commands::DecodeToken { token } => return print_claims(token),
        Commands::Verify {
            token,
            public_key: Some(public_key),
        } => {
            let claims = verify_auth_token(token.clone(), hex::decode(public_key)?)?;
            println!("valid token for device {}", claims.device_id);
            return Ok(());
        }
        _ => {}
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(host::default_data_dir);
    let client = host::open_client(cli.oracle_config()?, &data_dir, cli.device_id.clone())?;
    tracing::debug!(data_dir = %data_dir.display(), "client opened");
    run(&client, cli.command).await
}

async fn run(client: &OracleClient, command: Commands) -> eyre::Result<()> {
    match command {
        Commands::Init => {
            client.ensure_identity()?;
            println!("public key: {}", hex::encode(client.public_key()?));
            println!("device id:  {}", client.device_id()?);
        }
        Commands::DeviceId => println!("{}", client.device_id()?),
        Commands::Token => println!("{}", client.mint_token()?),
        Commands::DecodeToken { token } => print_claims(&token)?,
        Commands::Verify { token, .. } => {
            let claims = verify_auth_token(token, client.public_key()?)?;
            println!("valid token for device {}", claims.device_id);
        }
        Commands::Poll { once: true } => {
            client.ensure_identity()?;
            println!("{}", client.poll_once().await);
        }
        Commands::Poll { once: false } => poll(client).await?,
        Commands::Authorize { target: Some(stage) } => {
            let authorized = client.authorize_stage(stage).await?;
            println!("{stage}: {}", if authorized { "authorized" } else { "not authorized" });
        }
        Commands::Authorize { target: None } => {
            let stages = client.authorize_all_stages().await?;
            if stages.is_empty() {
                println!("not authorized for any stage");
            }
            for stage in stages {
                println!("{stage}: authorized");
            }
        }
        Commands::Secrets { target } => match client.stage_secrets(target)? {
            Some(secrets) => println!("blockfrost api key: {}", secrets.blockfrost_api_key),
            None => println!("no secrets stored for {target}"),
        },
        Commands::Rotate => {
            client.rotate_master_key()?;
            println!("master key rotated; run `oraclekit init` to create a new identity");
        }
    }
    Ok(())
}

fn print_claims(token: &str) -> eyre::Result<()> {
    let claims = decode_auth_token(token.to_string())?;
    println!("nonce:     {}", claims.nonce);
    println!("device id: {}", claims.device_id);
    Ok(())
}

async fn poll(client: &OracleClient) -> eyre::Result<()> {
    let mut updates = client.status().subscribe();
    if !client.start().await? {
        eyre::bail!("polling is already running");
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(status) = updates.borrow_and_update().clone() {
                    println!("{status}");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupted, stopping");
                break;
            }
        }
    }

    client.stop();
    client.stopped().await;
    Ok(())
}
