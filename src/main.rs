use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use qrdrop::common::config::{apply_overrides, config_path, load_config_from, ConfigOverrides};
use qrdrop::common::{AppConfig, TlsVersion};
use qrdrop::output;
use qrdrop::send::Payload;
use qrdrop::server::address::{self, HttpIpLookup};
use qrdrop::server::progress::{LogRenderer, ProgressTracker, TerminalRenderer};
use qrdrop::server::{CtrlC, KeyPress, Session, ShutdownReason, TransferMode};
use qrdrop::ui::{browser, qr};
use std::io::IsTerminal;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

// Clap reads this struct and creates the CLI
#[derive(Parser)]
#[command(name = "qrdrop")]
#[command(about = "Transfer files over the local network by scanning a QR code")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Print the network interfaces usable with --interface and exit
    #[arg(long)]
    list_interfaces: bool,

    /// Include loopback addresses in --list-interfaces
    #[arg(long, requires = "list_interfaces")]
    all: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to load instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve files for download
    Send {
        #[arg(required = true, help = "Files or directories to send")]
        paths: Vec<PathBuf>,

        /// Zip the payload even when it is a single file
        #[arg(short, long)]
        zip: bool,

        #[command(flatten)]
        server: ServerArgs,
    },
    /// Accept uploads into a directory
    Receive {
        /// Directory to store uploads in
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        server: ServerArgs,
    },
}

#[derive(Args)]
struct ServerArgs {
    /// Network interface: auto, any, an interface name or an IP
    #[arg(short, long)]
    interface: Option<String>,
    /// Explicit bind address, overrides the interface
    #[arg(long)]
    bind: Option<IpAddr>,
    /// Port to listen on (0 picks a free one)
    #[arg(short, long)]
    port: Option<u16>,
    /// Fixed URL path instead of a random token
    #[arg(long)]
    path: Option<String>,
    /// Hostname to advertise in the URL
    #[arg(long)]
    fqdn: Option<String>,
    /// Keep serving after the transfer completes
    #[arg(short, long)]
    keep_alive: bool,
    /// Serve over HTTPS
    #[arg(short, long)]
    secure: bool,
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
    /// Lowest TLS version to accept (tls1.2 or tls1.3)
    #[arg(long)]
    tls_min_version: Option<TlsVersion>,
    /// Service used to discover the public IP when binding to all interfaces
    #[arg(long)]
    external_ip_url: Option<String>,
    /// Seconds to let in-flight requests finish on shutdown
    #[arg(long = "grace")]
    shutdown_grace_secs: Option<u64>,
    /// Open the QR code page in a browser
    #[arg(short, long)]
    browser: bool,
    /// Invert QR colors for light terminals
    #[arg(short, long)]
    reversed: bool,
}

impl ServerArgs {
    fn overrides(&self, output: Option<PathBuf>) -> ConfigOverrides {
        ConfigOverrides {
            interface: self.interface.clone(),
            bind: self.bind,
            port: self.port,
            path: self.path.clone(),
            fqdn: self.fqdn.clone(),
            output,
            keep_alive: self.keep_alive,
            secure: self.secure || self.tls_cert.is_some(),
            tls_cert: self.tls_cert.clone(),
            tls_key: self.tls_key.clone(),
            tls_min_version: self.tls_min_version,
            external_ip_url: self.external_ip_url.clone(),
            shutdown_grace_secs: self.shutdown_grace_secs,
            browser: self.browser,
            reversed: self.reversed,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = qrdrop::logging::init_logging(cli.verbose) {
        eprintln!("{e}");
    }

    if cli.list_interfaces {
        match address::list_interfaces(cli.all) {
            Ok(interfaces) => println!("{}", output::interface_list(&interfaces)),
            Err(e) => {
                eprintln!("{}", output::error_message(&format!("{e:#}")));
                std::process::exit(1);
            }
        }
        return;
    }

    match run(cli).await {
        Ok(ShutdownReason::Fatal(_)) => std::process::exit(1),
        Ok(_) => {}
        Err(e) => {
            eprintln!("{}", output::error_message(&format!("{e:#}")));
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<ShutdownReason> {
    let Some(command) = cli.command else {
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingSubcommand,
                "a subcommand is required: send or receive",
            )
            .exit();
    };

    let config_file = cli.config.unwrap_or_else(config_path);
    let loaded = load_config_from(&config_file)?;

    let (config, mode) = match command {
        Commands::Send { paths, zip, server } => {
            let config = apply_overrides(loaded, &server.overrides(None));
            let payload = tokio::task::spawn_blocking(move || Payload::resolve(&paths, zip))
                .await
                .context("Payload preparation panicked")??;
            (config, TransferMode::Send(payload))
        }
        Commands::Receive { output, server } => {
            let config = apply_overrides(loaded, &server.overrides(output));
            let output_dir = match &config.output {
                Some(dir) => dir.clone(),
                None => std::env::current_dir().context("Cannot determine current directory")?,
            };
            (config, TransferMode::Receive { output_dir })
        }
    };

    let session = start_session(&config, mode).await?;
    run_session(&config, session).await
}

async fn start_session(config: &AppConfig, mode: TransferMode) -> Result<Session> {
    let renderer: Arc<dyn qrdrop::server::progress::ProgressRenderer> =
        if std::io::stderr().is_terminal() {
            Arc::new(TerminalRenderer::default())
        } else {
            Arc::new(LogRenderer)
        };
    let progress = ProgressTracker::new(renderer);
    let lookup = HttpIpLookup::new(config.external_ip_url.clone());

    let spinner = output::spinner("Starting server...");
    match Session::start_with_progress(config, mode, &lookup, progress).await {
        Ok(session) => {
            output::finish_spinner_success(
                &spinner,
                &format!("Server ready on port {}", session.port()),
            );
            Ok(session)
        }
        Err(e) => {
            output::finish_spinner_error(&spinner, "Failed to start server");
            Err(e)
        }
    }
}

async fn run_session(config: &AppConfig, mut session: Session) -> Result<ShutdownReason> {
    let url = session.primary_url().to_string();
    let keyboard = std::io::stdin().is_terminal();

    println!("{}", qr::generate_qr(&url, config.reversed)?);
    println!(
        "{}",
        output::session_banner(&url, !session.expects_parallel(), keyboard)
    );

    if config.browser {
        browser::open(&format!("{}/qr", session.urls().base));
    }

    session.attach(Box::new(CtrlC));
    if keyboard {
        session.attach(Box::new(KeyPress));
    }

    let reason = session.wait().await?;
    println!("{}", output::outcome_message(&reason));
    Ok(reason)
}
