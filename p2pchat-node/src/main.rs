// p2pchat node: TCP listener, outbound RPC channels and the operator prompt.

mod app;
mod cli;
mod config;
mod prompt;
mod transport;

use std::net::SocketAddr;

use anyhow::{bail, Context};
use clap::Parser;
use p2pchat_core::{ChatNode, LocalIdentity};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    cli.apply(&mut cfg);
    init_tracing(&cfg.log_level);

    let fingerprint = cfg.resolve_fingerprint()?;
    let handle = cfg.resolve_handle();

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async move {
        let listener = TcpListener::bind((cfg.listen_ip, cfg.listen_port))
            .await
            .with_context(|| format!("binding {}:{}", cfg.listen_ip, cfg.listen_port))?;
        let SocketAddr::V4(bound) = listener.local_addr()? else {
            bail!("listener is not bound to an IPv4 address");
        };
        let identity = LocalIdentity::new(fingerprint, handle, cfg.advertised_endpoint(bound)?);
        println!("Listening on {bound} as {identity}");
        println!("Type /help for commands.");

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(transport::accept_loop(listener, tx.clone()));
        tokio::spawn(prompt::read_lines(tx.clone()));
        App::new(ChatNode::new(identity), tx)
            .run(rx, shutdown_signal())
            .await
    });
    // Stdin reads block a runtime thread; don't wait for them.
    rt.shutdown_background();
    result
}

/// `RUST_LOG` wins; otherwise `level`, raised to debug when `P2P_DEBUG` is set.
fn init_tracing(level: &str) {
    let default = if std::env::var_os("P2P_DEBUG").is_some() {
        "debug"
    } else {
        level
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
