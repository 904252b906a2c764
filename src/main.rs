use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use tinytftp::config::AppConfig;
use tinytftp::tftp::client::{Client, ClientConfig};
use tinytftp::tftp::server::{self, Config, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "tinytftp", version, about = "A small TFTP server and client")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory over TFTP until Ctrl+C
    Serve {
        /// IP address to bind
        #[arg(short, long)]
        ip: Option<IpAddr>,

        /// UDP port (default 69)
        #[arg(short, long)]
        port: Option<u16>,

        /// Root directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Refuse write requests
        #[arg(long)]
        read_only: bool,

        /// Refuse write requests for files that already exist
        #[arg(long)]
        no_overwrite: bool,

        /// Configuration file (default: ./tinytftp.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Download a file
    Get {
        /// Server address, `IP` or `IP:PORT`
        server: String,
        /// File name on the server
        remote: String,
        /// Local path (default: the remote file name)
        local: Option<PathBuf>,
    },

    /// Upload a file
    Put {
        /// Server address, `IP` or `IP:PORT`
        server: String,
        /// Local file
        local: PathBuf,
        /// File name on the server (default: the local file name)
        remote: Option<String>,
    },
}

fn init_logger(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:<5}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn client_for(server: &str) -> Result<Client> {
    let (ip, port) = match server.parse::<std::net::SocketAddr>() {
        Ok(addr) => (addr.ip(), addr.port()),
        Err(_) => {
            let ip: IpAddr = server
                .parse()
                .with_context(|| format!("Invalid server address: {}", server))?;
            (ip, DEFAULT_PORT)
        }
    };
    Client::new(ClientConfig::new(ip, port))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Commands::Serve {
            ip,
            port,
            dir,
            read_only,
            no_overwrite,
            config,
        } => {
            let mut settings = Config::with_defaults();
            if let Some(tftp) = AppConfig::discover(config.as_deref())?.and_then(|file| file.tftp) {
                settings = settings.merge_file(&tftp)?;
            }
            let settings = settings.merge_cli(ip, port, dir, read_only, no_overwrite);

            let count = server::run(settings).await?;
            log::info!("{} file(s) transferred", count);
        }
        Commands::Get {
            server,
            remote,
            local,
        } => {
            let local = local.unwrap_or_else(|| PathBuf::from(&remote));
            let bytes = client_for(&server)?.get(&remote, &local).await?;
            log::info!("Received {} bytes", bytes);
        }
        Commands::Put {
            server,
            local,
            remote,
        } => {
            let remote = match remote {
                Some(remote) => remote,
                None => local
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .context("Cannot derive a remote file name, pass REMOTE")?,
            };
            let bytes = client_for(&server)?.put(&local, &remote).await?;
            log::info!("Sent {} bytes", bytes);
        }
    }

    Ok(())
}
