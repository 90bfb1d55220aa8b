//! Connection preferences as entered by the user.
//!
//! Ports and the connect timeout are kept as the strings the user typed so a
//! form can round-trip them unchanged. [`ConnectPreferences::validate`]
//! checks them and [`ConnectPreferences::to_connect_options`] converts them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use webmesh_config::ProfileConfig;

use crate::ipc::ConnectOptions;

pub const DEFAULT_INTERFACE_NAME: &str = "webmesh0";
pub const DEFAULT_WIREGUARD_PORT: &str = "51820";
pub const DEFAULT_RAFT_PORT: &str = "9443";
pub const DEFAULT_GRPC_PORT: &str = "8443";
pub const DEFAULT_CONNECT_TIMEOUT: &str = "30s";

/// Errors from preference validation and persistence.
#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("{field} is not a valid port: {value}")]
    InvalidPort { field: &'static str, value: String },

    #[error("Connect timeout is invalid: {0}")]
    InvalidTimeout(String),

    #[error("Configuration file is invalid: {0}")]
    ConfigFile(String),

    #[error("failed to read preferences: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse preferences: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Whether the platform needs a userspace TUN device. Kernel WireGuard
/// interfaces exist only on Linux and FreeBSD.
pub fn requires_tun() -> bool {
    !cfg!(any(target_os = "linux", target_os = "freebsd"))
}

/// `~/.webmesh/config.toml`, or a relative path when no home is set.
pub fn default_config_path() -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
    home.map(PathBuf::from)
        .unwrap_or_default()
        .join(".webmesh")
        .join("config.toml")
}

/// User-editable connection preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectPreferences {
    pub config_file: PathBuf,
    pub interface_name: String,
    pub force_tun: bool,
    pub wireguard_port: String,
    pub raft_port: String,
    pub grpc_port: String,
    pub disable_ipv4: bool,
    pub disable_ipv6: bool,
    pub local_dns: bool,
    pub local_dns_port: String,
    pub connect_timeout: String,
}

impl Default for ConnectPreferences {
    fn default() -> Self {
        Self {
            config_file: default_config_path(),
            interface_name: DEFAULT_INTERFACE_NAME.to_string(),
            force_tun: requires_tun(),
            wireguard_port: DEFAULT_WIREGUARD_PORT.to_string(),
            raft_port: DEFAULT_RAFT_PORT.to_string(),
            grpc_port: DEFAULT_GRPC_PORT.to_string(),
            disable_ipv4: false,
            disable_ipv6: false,
            local_dns: false,
            local_dns_port: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT.to_string(),
        }
    }
}

impl ConnectPreferences {
    /// Load preferences from a TOML file; missing fields take defaults.
    pub async fn load(path: &Path) -> Result<Self, PreferencesError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&content)?)
    }

    pub async fn save(&self, path: &Path) -> Result<(), PreferencesError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        debug!(path = %path.display(), "saved preferences");
        Ok(())
    }

    /// Check the config file, ports, and timeout, in that order.
    ///
    /// A config file that does not exist yet is created empty so the user
    /// can start adding profiles to it.
    pub async fn validate(&self) -> Result<(), PreferencesError> {
        self.ensure_config_file().await?;
        self.validate_fields()
    }

    /// Port and timeout checks only; touches nothing on disk.
    pub fn validate_fields(&self) -> Result<(), PreferencesError> {
        for (field, value) in [
            ("WireGuard port", &self.wireguard_port),
            ("Raft port", &self.raft_port),
            ("gRPC port", &self.grpc_port),
        ] {
            parse_port(field, value)?;
        }
        if self.local_dns {
            parse_port("Local DNS port", &self.local_dns_port)?;
        }
        parse_duration(&self.connect_timeout).map_err(PreferencesError::InvalidTimeout)?;
        Ok(())
    }

    async fn ensure_config_file(&self) -> Result<(), PreferencesError> {
        if self.config_file.as_os_str().is_empty() {
            return Err(PreferencesError::Required("A configuration file"));
        }
        let exists = tokio::fs::try_exists(&self.config_file)
            .await
            .map_err(|e| PreferencesError::ConfigFile(e.to_string()))?;
        if !exists {
            ProfileConfig::default()
                .write_to(&self.config_file)
                .await
                .map_err(|e| PreferencesError::ConfigFile(e.to_string()))?;
            info!(path = %self.config_file.display(), "created empty profile config");
        }
        Ok(())
    }

    /// Connect options for `profile`. The timeout is truncated to whole
    /// seconds.
    pub fn to_connect_options(&self, profile: &str) -> Result<ConnectOptions, PreferencesError> {
        let timeout =
            parse_duration(&self.connect_timeout).map_err(PreferencesError::InvalidTimeout)?;
        Ok(ConnectOptions {
            profile: profile.to_string(),
            interface_name: self.interface_name.clone(),
            force_tun: self.force_tun,
            listen_port: parse_port("WireGuard port", &self.wireguard_port)?,
            raft_port: parse_port("Raft port", &self.raft_port)?,
            grpc_port: parse_port("gRPC port", &self.grpc_port)?,
            no_ipv4: self.disable_ipv4,
            no_ipv6: self.disable_ipv6,
            local_dns: self.local_dns,
            local_dns_port: if self.local_dns {
                parse_port("Local DNS port", &self.local_dns_port)?
            } else {
                0
            },
            connect_timeout: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        })
    }
}

fn parse_port(field: &'static str, value: &str) -> Result<u16, PreferencesError> {
    if value.is_empty() {
        return Err(PreferencesError::Required(field));
    }
    value.parse().map_err(|_| PreferencesError::InvalidPort {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration such as `"30s"`, `"1m30s"`, `"1.5h"`, or `"250ms"`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, and `h`; a bare `"0"` is
/// accepted. Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s.starts_with('-') {
        return Err(format!("negative duration {input:?}"));
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (num, tail) = rest.split_at(num_len);
        if num.is_empty() || num == "." {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = num
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {input:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };
        total += value * scale;
        rest = tail;
    }

    Duration::try_from_secs_f64(total).map_err(|_| format!("invalid duration {input:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "30", "s", "10x", "-5s", "1..5s", "abc"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_defaults_validate() {
        let prefs = ConnectPreferences::default();
        prefs.validate_fields().unwrap();
        assert_eq!(prefs.interface_name, "webmesh0");
        assert_eq!(prefs.force_tun, requires_tun());
    }

    #[test]
    fn test_invalid_port_message() {
        let prefs = ConnectPreferences {
            wireguard_port: "x".to_string(),
            ..Default::default()
        };
        let err = prefs.validate_fields().unwrap_err();
        assert_eq!(err.to_string(), "WireGuard port is not a valid port: x");

        let prefs = ConnectPreferences {
            grpc_port: "70000".to_string(),
            ..Default::default()
        };
        assert_eq!(
            prefs.validate_fields().unwrap_err().to_string(),
            "gRPC port is not a valid port: 70000"
        );
    }

    #[test]
    fn test_empty_port_required() {
        let prefs = ConnectPreferences {
            raft_port: String::new(),
            ..Default::default()
        };
        assert_eq!(
            prefs.validate_fields().unwrap_err().to_string(),
            "Raft port is required"
        );
    }

    #[test]
    fn test_invalid_timeout() {
        let prefs = ConnectPreferences {
            connect_timeout: "soon".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            prefs.validate_fields(),
            Err(PreferencesError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_to_connect_options() {
        let prefs = ConnectPreferences {
            connect_timeout: "1m30.9s".to_string(),
            disable_ipv6: true,
            local_dns: true,
            local_dns_port: "5353".to_string(),
            ..Default::default()
        };
        let opts = prefs.to_connect_options("home").unwrap();
        assert_eq!(opts.profile, "home");
        assert_eq!(opts.listen_port, 51820);
        assert_eq!(opts.raft_port, 9443);
        assert_eq!(opts.grpc_port, 8443);
        assert!(opts.no_ipv6);
        assert_eq!(opts.local_dns_port, 5353);
        assert_eq!(opts.connect_timeout, 90);
    }

    #[tokio::test]
    async fn test_validate_creates_missing_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        let prefs = ConnectPreferences {
            config_file: path.clone(),
            ..Default::default()
        };
        prefs.validate().await.unwrap();
        let created = ProfileConfig::load(&path).await.unwrap();
        assert!(created.contexts.is_empty());
    }

    #[tokio::test]
    async fn test_validate_requires_config_file() {
        let prefs = ConnectPreferences {
            config_file: PathBuf::new(),
            ..Default::default()
        };
        assert_eq!(
            prefs.validate().await.unwrap_err().to_string(),
            "A configuration file is required"
        );
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("prefs.toml");
        let prefs = ConnectPreferences {
            interface_name: "wm1".to_string(),
            raft_port: "9444".to_string(),
            ..Default::default()
        };
        prefs.save(&path).await.unwrap();
        assert_eq!(ConnectPreferences::load(&path).await.unwrap(), prefs);
    }
}
