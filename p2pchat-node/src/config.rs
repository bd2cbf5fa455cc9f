//! Load config from file and environment.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use p2pchat_core::{address, Endpoint, Fingerprint};
use serde::Deserialize;

/// Node configuration. File: ~/.config/p2pchat/config.toml or /etc/p2pchat/config.toml.
/// Env overrides: P2PCHAT_LISTEN_PORT, P2PCHAT_ADVERTISE_ADDR, P2PCHAT_HANDLE, P2PCHAT_FINGERPRINT.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener bind address (default 0.0.0.0).
    #[serde(default = "default_listen_ip")]
    pub listen_ip: Ipv4Addr,
    /// Listener port (default 0, any free port).
    #[serde(default)]
    pub listen_port: u16,
    /// `ip:port` peers should use to reach us.
    #[serde(default)]
    pub advertise_addr: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<u16>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            listen_port: 0,
            advertise_addr: None,
            handle: None,
            fingerprint: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Apply `P2PCHAT_*` overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = var("P2PCHAT_LISTEN_PORT") {
            self.listen_port = s
                .parse()
                .with_context(|| format!("P2PCHAT_LISTEN_PORT={s:?} is not a port"))?;
        }
        if let Some(s) = var("P2PCHAT_ADVERTISE_ADDR") {
            self.advertise_addr = Some(s);
        }
        if let Some(s) = var("P2PCHAT_HANDLE") {
            self.handle = Some(s);
        }
        if let Some(s) = var("P2PCHAT_FINGERPRINT") {
            self.fingerprint = Some(
                s.parse()
                    .with_context(|| format!("P2PCHAT_FINGERPRINT={s:?} is not a fingerprint"))?,
            );
        }
        Ok(())
    }

    /// Configured handle, else the login name, else `anonymous`.
    pub fn resolve_handle(&self) -> String {
        self.handle
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| "anonymous".to_string())
    }

    /// Configured fingerprint, or a random one when none is set.
    pub fn resolve_fingerprint(&self) -> anyhow::Result<Fingerprint> {
        match self.fingerprint {
            None => Ok(Fingerprint::random()),
            Some(v) => match Fingerprint::new(v) {
                Some(fp) => Ok(fp),
                None => bail!("fingerprint must be between 1 and 65535"),
            },
        }
    }

    /// Address announced in handshakes. Without an explicit setting, the bound address,
    /// with an unspecified IP replaced by loopback.
    pub fn advertised_endpoint(&self, bound: SocketAddrV4) -> anyhow::Result<Endpoint> {
        if let Some(addr) = &self.advertise_addr {
            return address::parse(addr)
                .with_context(|| format!("invalid advertise address {addr:?}"));
        }
        let ip = if bound.ip().is_unspecified() {
            Ipv4Addr::LOCALHOST
        } else {
            *bound.ip()
        };
        Ok(Endpoint::new(ip, bound.port()))
    }
}

/// Load config: defaults, then `explicit` or the first config file found, then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(path) => read_file(path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => read_file(&path)?,
            None => Config::default(),
        },
    };
    c.apply_env(|name| std::env::var(name).ok())?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/p2pchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/p2pchat/config.toml"));
    out
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.listen_ip, Ipv4Addr::UNSPECIFIED);
        assert_eq!(c.log_level, "info");
    }

    #[test]
    fn parses_all_fields() {
        let c: Config = toml::from_str(
            r#"
            listen_ip = "127.0.0.1"
            listen_port = 7000
            advertise_addr = "192.168.1.4:7000"
            handle = "alice"
            fingerprint = 42
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(c.listen_ip, Ipv4Addr::LOCALHOST);
        assert_eq!(c.listen_port, 7000);
        assert_eq!(c.advertise_addr.as_deref(), Some("192.168.1.4:7000"));
        assert_eq!(c.handle.as_deref(), Some("alice"));
        assert_eq!(c.fingerprint, Some(42));
        assert_eq!(c.log_level, "debug");
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("P2PCHAT_LISTEN_PORT", "7001"),
            ("P2PCHAT_HANDLE", "bob"),
            ("P2PCHAT_FINGERPRINT", "7"),
        ]
        .into_iter()
        .collect();
        let mut c: Config = toml::from_str("listen_port = 7000\nhandle = \"alice\"").unwrap();
        c.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.listen_port, 7001);
        assert_eq!(c.handle.as_deref(), Some("bob"));
        assert_eq!(c.fingerprint, Some(7));
        assert_eq!(c.advertise_addr, None);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut c = Config::default();
        let err = c.apply_env(|k| (k == "P2PCHAT_LISTEN_PORT").then(|| "lots".to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn fingerprint_resolution() {
        let mut c = Config::default();
        assert!(c.resolve_fingerprint().unwrap().get() >= 1);
        c.fingerprint = Some(9);
        assert_eq!(c.resolve_fingerprint().unwrap().get(), 9);
        c.fingerprint = Some(0);
        assert!(c.resolve_fingerprint().is_err());
    }

    #[test]
    fn explicit_handle_wins() {
        let c = Config {
            handle: Some("carol".into()),
            ..Config::default()
        };
        assert_eq!(c.resolve_handle(), "carol");
        assert!(!Config::default().resolve_handle().is_empty());
    }

    #[test]
    fn advertise_defaults_to_loopback_for_wildcard_bind() {
        let c = Config::default();
        let ep = c
            .advertised_endpoint(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5555))
            .unwrap();
        assert_eq!(ep.to_string(), "127.0.0.1:5555");

        let ep = c
            .advertised_endpoint(SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 5555))
            .unwrap();
        assert_eq!(ep.to_string(), "10.1.2.3:5555");

        let c = Config {
            advertise_addr: Some("192.168.0.9:6000".into()),
            ..Config::default()
        };
        let ep = c
            .advertised_endpoint(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5555))
            .unwrap();
        assert_eq!(ep.to_string(), "192.168.0.9:6000");

        let c = Config {
            advertise_addr: Some("somewhere".into()),
            ..Config::default()
        };
        assert!(c
            .advertised_endpoint(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5555))
            .is_err());
    }
}
