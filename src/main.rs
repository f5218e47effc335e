use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

use duftp::{
    client::Sender,
    config::{self, Config},
    server::{self, ServerOptions},
    storage,
    transport::{self, Listener, TransportKind},
};

#[derive(Parser, Debug)]
#[command(name = "duftp", version, about = "Stop-and-wait single file transfer", long_about = None)]
struct Cli {
    /// Config file [default: config.json in the user state directory]
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a file to a server
    Client {
        /// Server address [default: 127.0.0.1]
        #[arg(short = 'a', long)]
        addr: Option<String>,
        /// Server port; invalid values fall back to the default [default: 2080]
        #[arg(short, long)]
        port: Option<String>,
        /// File to send, looked up in the send directory [default: test.c]
        #[arg(short, long)]
        file: Option<String>,
        /// Directory holding files to send [default: ./outfile]
        #[arg(long)]
        send_dir: Option<PathBuf>,
        #[arg(long, value_enum)]
        transport: Option<TransportKind>,
        /// Give up when the server does not answer within this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Receive files into the receive directory
    Server {
        /// Port to listen on; invalid values fall back to the default [default: 2080]
        #[arg(short, long)]
        port: Option<String>,
        /// Directory received files are written to [default: ./infile]
        #[arg(long)]
        recv_dir: Option<PathBuf>,
        #[arg(long, value_enum)]
        transport: Option<TransportKind>,
        /// Drop a session when the client is silent this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg: Config = config::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Client { addr, port, file, send_dir, transport: transport_flag, timeout } => {
            let addr = addr.unwrap_or(cfg.server_addr);
            let port = config::resolve_port(port.as_deref(), cfg.port);
            let path = send_dir.unwrap_or(cfg.send_dir).join(file.unwrap_or(cfg.file_name));
            let kind = transport_flag.unwrap_or(cfg.transport);
            let timeout = timeout.or(cfg.timeout_secs).map(Duration::from_secs);

            log::info!("client mode: {addr}:{port} over {kind:?}, file {}", path.display());
            let channel = transport::connect(kind, &addr, port).await?;
            let mut channel = channel.with_timeout(timeout);
            let report = Sender::new()
                .send_file(&mut channel, &path)
                .await
                .with_context(|| format!("transfer of {} failed", path.display()))?;
            println!("{}  {} ({} bytes)", storage::hex(&report.sha256), report.file_name, report.bytes_sent);
        }
        Commands::Server { port, recv_dir, transport: transport_flag, timeout } => {
            let port = config::resolve_port(port.as_deref(), cfg.port);
            let recv_dir = recv_dir.unwrap_or(cfg.recv_dir);
            let kind = transport_flag.unwrap_or(cfg.transport);
            let timeout = timeout.or(cfg.timeout_secs).map(Duration::from_secs);
            if !recv_dir.is_dir() {
                log::warn!("receive directory {} does not exist; transfers will be refused", recv_dir.display());
            }

            log::info!("server mode: port {port} over {kind:?}");
            let listener = Listener::bind(kind, port).await?;
            server::serve(listener, ServerOptions { recv_dir, timeout }).await?;
        }
    }
    Ok(())
}
