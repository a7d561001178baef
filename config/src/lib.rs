//! Loads proxy configuration — listen port, upstream matchmaking host, and the bot
//! roster — from a TOML or JSON file, following the same `config`-crate builder
//! pattern used elsewhere for layered configuration.
//!
//! Two environment variables override the file once it's loaded:
//! - `AUTHPROXY_PORT` overrides `listen_port`.
//! - `AUTHPROXY_ROSTER_PATH` overrides `roster_path`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use slippi_authproxy_shared_types::BotIdentity;

fn default_port() -> u16 {
    8788
}

fn default_mm_port() -> u16 {
    43113
}

fn default_verify_tls() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_port")]
    listen_port: u16,

    mm_host: String,

    #[serde(default = "default_mm_port")]
    mm_port: u16,

    api_base_url: String,
    app_version: String,

    #[serde(default = "default_verify_tls")]
    verify_tls: bool,

    #[serde(default)]
    roster_path: Option<PathBuf>,

    #[serde(default)]
    roster: Vec<BotIdentity>,
}

/// A roster file's on-disk shape: a named list so the `config` crate's map-rooted
/// sources can deserialize it directly.
#[derive(Debug, Deserialize)]
struct RosterFile {
    bots: Vec<BotIdentity>,
}

/// Fully resolved configuration for one proxy process.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_port: u16,
    pub mm_host: String,
    pub mm_port: u16,
    pub api_base_url: String,
    pub app_version: String,
    pub verify_tls: bool,
    pub roster: Vec<BotIdentity>,
}

impl ProxyConfig {
    /// Loads configuration from `path` (TOML or JSON, inferred from the extension),
    /// then applies the `AUTHPROXY_PORT` / `AUTHPROXY_ROSTER_PATH` environment
    /// overrides.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix("AUTHPROXY").try_parsing(true).separator("_"));

        let raw: RawConfig = builder.build()?.try_deserialize()?;

        let roster_path = std::env::var("AUTHPROXY_ROSTER_PATH").ok().map(PathBuf::from).or(raw.roster_path);

        let roster = match roster_path {
            Some(roster_path) => Self::load_roster(&roster_path)?,
            None => raw.roster,
        };

        if roster.is_empty() {
            eyre::bail!("no bot identities configured: set `roster` inline or `roster_path` to a roster file");
        }

        Ok(Self {
            listen_port: raw.listen_port,
            mm_host: raw.mm_host,
            mm_port: raw.mm_port,
            api_base_url: raw.api_base_url,
            app_version: raw.app_version,
            verify_tls: raw.verify_tls,
            roster,
        })
    }

    fn load_roster(path: &Path) -> eyre::Result<Vec<BotIdentity>> {
        let file: RosterFile = config::Config::builder().add_source(config::File::from(path)).build()?.try_deserialize()?;

        Ok(file.bots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_resolves_inline_roster() {
        let mut file = tempfile_with_contents(
            r#"
            mm_host = "mm.example.test"
            api_base_url = "https://example.test/version"
            app_version = "3.5.1"

            [[roster]]
            uid = "uid-1"
            play_key = "key-1"
            connect_code = "BOT#001"
            "#,
        );

        let config = ProxyConfig::load(file.path()).expect("config should load");
        assert_eq!(config.listen_port, default_port());
        assert_eq!(config.roster.len(), 1);
        assert_eq!(config.roster[0].connect_code, "BOT#001");

        file.flush().ok();
    }

    #[test]
    fn load_rejects_an_empty_roster() {
        let file = tempfile_with_contents(
            r#"
            mm_host = "mm.example.test"
            api_base_url = "https://example.test/version"
            app_version = "3.5.1"
            "#,
        );

        assert!(ProxyConfig::load(file.path()).is_err());
    }

    fn tempfile_with_contents(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().expect("failed to create tempfile");
        file.write_all(contents.as_bytes()).expect("failed to write tempfile");
        file
    }
}
