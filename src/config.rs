use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Immutable server configuration, loaded once from the environment.
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | `VIBE_ROOT` | `~/.vibe` | Workspace root; immediate children are projects |
/// | `VIBE_DB` | `<root>/index.db` | SQLite index database path |
/// | `VIBE_PORT` | `8080` | HTTP listen port |
/// | `VIBE_AUTH_TOKEN` | unset | Bearer token; requests are unauthenticated when unset |
/// | `VIBE_READ_ONLY` | `0` | Reject all write operations when truthy |
/// | `VIBE_WEBHOOKS_ENABLED` | `1` | Outgoing webhook delivery on/off |
/// | `VIBE_SESSION_UTC` | `0` | Session log dates/timestamps in UTC instead of local time |
/// | `VIBE_SYNC_INTERVAL` | `0` | Background index sync interval in seconds; 0 disables |
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub port: u16,
    pub auth_token: Option<String>,
    pub read_only: bool,
    pub webhooks_enabled: bool,
    pub session_utc: bool,
    pub sync_interval: Option<Duration>,
}

/// Minimum length for the bearer token, matching the webhook secret policy.
const MIN_TOKEN_LEN: usize = 32;

impl Config {
    pub fn from_env() -> Result<Config> {
        let root = match std::env::var_os("VIBE_ROOT") {
            Some(v) => PathBuf::from(v),
            None => default_root(),
        };

        let db_path = match std::env::var_os("VIBE_DB") {
            Some(v) => PathBuf::from(v),
            None => root.join("index.db"),
        };

        let port_str = std::env::var("VIBE_PORT").unwrap_or_else(|_| "8080".to_string());
        let port: u16 = port_str
            .parse()
            .with_context(|| format!("invalid VIBE_PORT value '{}'", port_str))?;
        if port == 0 {
            bail!("VIBE_PORT must be between 1 and 65535");
        }

        let auth_token = match std::env::var("VIBE_AUTH_TOKEN") {
            Ok(t) if t.is_empty() => None,
            Ok(t) => {
                if t.len() < MIN_TOKEN_LEN {
                    bail!(
                        "VIBE_AUTH_TOKEN must be at least {} characters",
                        MIN_TOKEN_LEN
                    );
                }
                Some(t)
            }
            Err(_) => None,
        };

        let sync_secs: u64 = match std::env::var("VIBE_SYNC_INTERVAL") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("invalid VIBE_SYNC_INTERVAL value '{}'", v))?,
            Err(_) => 0,
        };

        Ok(Config {
            root,
            db_path,
            port,
            auth_token,
            read_only: env_flag("VIBE_READ_ONLY", false),
            webhooks_enabled: env_flag("VIBE_WEBHOOKS_ENABLED", true),
            session_utc: env_flag("VIBE_SESSION_UTC", false),
            sync_interval: (sync_secs > 0).then(|| Duration::from_secs(sync_secs)),
        })
    }

    /// A configuration rooted at an explicit directory, used by tests and
    /// embedders that bypass the environment.
    pub fn for_root(root: impl Into<PathBuf>) -> Config {
        let root = root.into();
        let db_path = root.join("index.db");
        Config {
            root,
            db_path,
            port: 8080,
            auth_token: None,
            read_only: false,
            webhooks_enabled: true,
            session_utc: false,
            sync_interval: None,
        }
    }
}

fn default_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".vibe"),
        None => PathBuf::from(".vibe"),
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_root_derives_db_path() {
        let config = Config::for_root("/tmp/vibe-test");
        assert_eq!(config.db_path, PathBuf::from("/tmp/vibe-test/index.db"));
        assert!(!config.read_only);
        assert!(config.webhooks_enabled);
    }
}
