use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::transport::TransportKind;

pub const DEFAULT_PORT: u16 = 2080;
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1";
pub const DEFAULT_FILE_NAME: &str = "test.c";

/// Defaults for both roles. Read from `config.json` in the state directory
/// when present; command line flags override every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub server_addr: String,
    pub file_name: String,
    pub send_dir: PathBuf,
    pub recv_dir: PathBuf,
    pub transport: TransportKind,
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            send_dir: PathBuf::from("./outfile"),
            recv_dir: PathBuf::from("./infile"),
            transport: TransportKind::Tcp,
            timeout_secs: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let dir = crate::identity::state_dir()?;
    Ok(dir.join("config.json"))
}

/// Load from `path`, or from the state directory when `path` is `None`.
/// A missing file yields the built-in defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let p = match path {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };
    if !p.exists() { return Ok(Config::default()); }
    let data = fs::read(&p).with_context(|| format!("read {p:?}"))?;
    let mut cfg: Config = serde_json::from_slice(&data).with_context(|| format!("parse {p:?}"))?;
    if cfg.port == 0 {
        log::warn!("port 0 in {p:?} is not usable, using {DEFAULT_PORT}");
        cfg.port = DEFAULT_PORT;
    }
    Ok(cfg)
}

/// Parse a port given on the command line, falling back to `default` with a
/// warning when it is not a usable port number.
pub fn resolve_port(raw: Option<&str>, default: u16) -> u16 {
    let Some(raw) = raw else { return default };
    match raw.trim().parse::<u16>() {
        Ok(p) if p != 0 => p,
        _ => {
            log::warn!("invalid port {raw:?}, using {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load(Some(&dir.path().join("config.json"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.port, 2080);
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("config.json");
        fs::write(&p, r#"{ "port": 9000, "transport": "quic", "timeout_secs": 5 }"#).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.transport, TransportKind::Quic);
        assert_eq!(cfg.timeout_secs, Some(5));
        assert_eq!(cfg.recv_dir, PathBuf::from("./infile"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("config.json");
        fs::write(&p, "{ port: ").unwrap();
        assert!(load(Some(&p)).is_err());
    }

    #[test]
    fn bad_ports_fall_back() {
        assert_eq!(resolve_port(None, 2080), 2080);
        assert_eq!(resolve_port(Some("9001"), 2080), 9001);
        assert_eq!(resolve_port(Some("0"), 2080), 2080);
        assert_eq!(resolve_port(Some("70000"), 2080), 2080);
        assert_eq!(resolve_port(Some("abc"), 2080), 2080);
    }
}
