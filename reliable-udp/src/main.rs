//! Entry point for `reliable-udp`.
//!
//! Parses CLI arguments and dispatches into **server**, **client** or
//! **router** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing) and the
//! httpfs glue.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use reliable_udp::config::{TransportConfig, DEFAULT_FIN_RETRIES};
use reliable_udp::httpfs::{FileStore, Request, Response};
use reliable_udp::router::{Router, RouterConfig};
use reliable_udp::session::{ipv4, Delivery, Session};

/// Reliable request/response transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct Tuning {
    /// Seed for the RTT estimate, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    initial_rtt_ms: u64,
    /// FIN re-sends before a receive settles for a partial blob.
    #[arg(long, default_value_t = DEFAULT_FIN_RETRIES)]
    fin_retries: u32,
}

impl Tuning {
    fn config(&self) -> TransportConfig {
        TransportConfig::default()
            .with_initial_rtt(Duration::from_millis(self.initial_rtt_ms))
            .with_fin_retries(self.fin_retries)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Verb {
    Get,
    Post,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve a directory over httpfs, one client at a time.
    Server {
        /// Local address to bind (e.g. 127.0.0.1:8007).
        #[arg(short, long, default_value = "127.0.0.1:8007")]
        bind: SocketAddr,
        /// Directory to serve.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Accept connections only when relayed by this router.
        #[arg(short, long)]
        router: Option<SocketAddr>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Send one httpfs request and print the response.
    Client {
        /// Server address (e.g. 127.0.0.1:8007).
        #[arg(short, long)]
        server: SocketAddr,
        /// Router to relay through.
        #[arg(short, long)]
        router: Option<SocketAddr>,
        verb: Verb,
        /// Resource path, e.g. `/` or `/notes.txt`.
        path: String,
        /// Request body for POST.
        #[arg(short, long)]
        data: Option<String>,
        /// Extra header as `Name: value`; may repeat.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Print the status line and headers as well as the body.
        #[arg(short, long)]
        verbose: bool,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Run the fault-injecting relay.
    Router {
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
        /// Probability of dropping a datagram.
        #[arg(long, default_value_t = 0.0)]
        drop: f64,
        /// Probability of forwarding a datagram twice.
        #[arg(long, default_value_t = 0.0)]
        duplicate: f64,
        /// Probability of delaying a datagram.
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,
        /// Longest delay for a reordered datagram, in milliseconds.
        #[arg(long, default_value_t = 50)]
        max_delay_ms: u64,
        /// Probability of corrupting a datagram.
        #[arg(long, default_value_t = 0.0)]
        corrupt: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    match Cli::parse().mode {
        Mode::Server {
            bind,
            dir,
            router,
            tuning,
        } => serve(bind, dir, router, tuning.config()).await,
        Mode::Client {
            server,
            router,
            verb,
            path,
            data,
            headers,
            verbose,
            tuning,
        } => {
            let mut request = match verb {
                Verb::Get => Request::get(path),
                Verb::Post => Request::post(path, data.unwrap_or_default()),
            };
            for header in headers {
                let Some((name, value)) = header.split_once(':') else {
                    bail!("header {header:?} is not `Name: value`");
                };
                request = request.with_header(name.trim(), value.trim());
            }
            fetch(server, router, request, verbose, tuning.config()).await
        }
        Mode::Router {
            bind,
            drop,
            duplicate,
            reorder,
            max_delay_ms,
            corrupt,
            seed,
        } => {
            let config = RouterConfig::default()
                .with_drop_rate(drop)
                .with_duplicate_rate(duplicate)
                .with_reordering(reorder, Duration::from_millis(max_delay_ms))
                .with_corrupt_rate(corrupt)
                .with_seed(seed);
            let router = Router::bind(bind, config)
                .await
                .with_context(|| format!("binding router on {bind}"))?;
            router.run().await.context("router socket failed")
        }
    }
}

async fn serve(
    bind: SocketAddr,
    dir: PathBuf,
    router: Option<SocketAddr>,
    config: TransportConfig,
) -> Result<()> {
    let store = FileStore::new(dir);
    let mut session = Session::bind(bind, config)
        .await
        .with_context(|| format!("binding server on {bind}"))?;
    if let Some(router) = router {
        session = session.with_relay(router);
    }
    info!(
        "serving {} on {}",
        store.root().display(),
        session.local_addr()
    );

    let policy = session.config().receive_policy();
    loop {
        let request = match session.receive(policy).await {
            Ok(Delivery::Complete(bytes)) => bytes,
            Ok(Delivery::Partial(bytes)) => {
                warn!("dropping incomplete request ({} byte(s))", bytes.len());
                continue;
            }
            Err(e) => {
                warn!("receive failed: {e}");
                continue;
            }
        };
        let response = match Request::parse(&request) {
            Ok(request) => store.handle(&request),
            Err(e) => {
                warn!("bad request: {e}");
                Response::status(400)
            }
        };
        if let Err(e) = session.reply(&response.to_bytes()).await {
            warn!("reply failed: {e}");
        }
    }
}

async fn fetch(
    server: SocketAddr,
    router: Option<SocketAddr>,
    request: Request,
    verbose: bool,
    config: TransportConfig,
) -> Result<()> {
    let peer = ipv4(server)?;
    let mut session = Session::bind("0.0.0.0:0".parse()?, config).await?;
    if let Some(router) = router {
        session = session.with_relay(router);
    }
    let policy = session.config().receive_policy();
    let delivery = session
        .request(peer, &request.to_bytes(), policy)
        .await
        .with_context(|| format!("{} {} to {server}", request.method, request.path))?;
    if !delivery.is_complete() {
        warn!("response incomplete; printing what arrived");
    }

    let response = Response::parse(delivery.bytes()).context("parsing response")?;
    if verbose {
        println!("HTTP/1.0 {} {}", response.status, response.reason);
        for (name, value) in &response.headers {
            println!("{name}: {value}");
        }
        println!();
    }
    print!("{}", String::from_utf8_lossy(&response.body));
    Ok(())
}
