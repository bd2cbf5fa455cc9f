//! Command-line arguments. Flags override config file and environment.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

/// Peer-to-peer chat node
#[derive(Debug, Parser)]
#[command(name = "p2pchat")]
#[command(version)]
#[command(about = "Peer-to-peer chat node", long_about = None)]
pub struct Cli {
    /// Local fingerprint (1-65535); random if omitted
    pub fingerprint: Option<u16>,

    /// Handle shown to peers
    #[arg(long)]
    pub handle: Option<String>,

    /// TCP port to listen on
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Address peers should use to reach this node (ip:port)
    #[arg(long, value_name = "IP:PORT")]
    pub advertise: Option<String>,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) {
        if let Some(fp) = self.fingerprint {
            config.fingerprint = Some(fp);
        }
        if let Some(h) = &self.handle {
            config.handle = Some(h.clone());
        }
        if let Some(p) = self.listen_port {
            config.listen_port = p;
        }
        if let Some(a) = &self.advertise {
            config.advertise_addr = Some(a.clone());
        }
        if let Some(l) = &self.log_level {
            config.log_level = l.clone();
        }
    }
}
