#![deny(unsafe_code)]

//! Connection profile configuration for the webmesh client.
//!
//! A profile file lists the clusters a user can join, the credentials they
//! join with, and named contexts pairing one cluster with one user. The
//! helper daemon and the in-process client both resolve a context name into
//! a [`ResolvedProfile`] at connect time; neither ever persists credentials
//! on its own.
//!
//! ## TOML Example
//!
//! ```toml
//! current_context = "home"
//!
//! [[clusters]]
//! name = "home-lab"
//! server = "mesh.example.com:8443"
//! tls_verify_chain_only = true
//!
//! [[users]]
//! name = "alice"
//!
//! [users.basic_auth]
//! username = "alice"
//! password = "hunter2"
//!
//! [[contexts]]
//! name = "home"
//! cluster = "home-lab"
//! user = "alice"
//! ```

/// Credential material (basic, LDAP, mutual TLS).
pub mod credentials;

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use credentials::{BasicAuth, ClientCertificate, LdapAuth};

/// Errors that can occur while loading, validating, or resolving profiles.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("no profile given and no current context is set")]
    NoProfile,

    #[error("profile {0:?} not found")]
    ProfileNotFound(String),

    #[error("cluster {cluster:?} for profile {profile:?} not found")]
    ClusterNotFound { profile: String, cluster: String },

    #[error("user {user:?} for profile {profile:?} not found")]
    UserNotFound { profile: String, user: String },
}

/// A mesh cluster endpoint and its TLS policy.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique cluster name.
    pub name: String,

    /// Join address of a mesh server (`host:port`).
    pub server: String,

    /// Connect without TLS at all.
    #[serde(default)]
    pub insecure: bool,

    /// Use TLS but skip certificate verification entirely.
    #[serde(default)]
    pub tls_skip_verify: bool,

    /// Verify the certificate chain but not the server name.
    #[serde(default)]
    pub tls_verify_chain_only: bool,

    /// PEM-encoded CA bundle used to verify the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// A named set of credentials.
///
/// A well-formed user sets at most one credential type. When several are
/// present the connection factory picks basic, then LDAP, then mutual TLS.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct User {
    /// Unique user name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldap_auth: Option<LdapAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<ClientCertificate>,
}

/// A profile: one cluster paired with (optionally) one user.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Profile name shown to the user.
    pub name: String,

    /// Name of the cluster in [`ProfileConfig::clusters`].
    pub cluster: String,

    /// Name of the user in [`ProfileConfig::users`]. Empty for anonymous joins.
    #[serde(default)]
    pub user: String,
}

/// Top-level profile file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Profile used when a connect request does not name one.
    #[serde(default)]
    pub current_context: String,

    #[serde(default)]
    pub clusters: Vec<Cluster>,

    #[serde(default)]
    pub users: Vec<User>,

    #[serde(default)]
    pub contexts: Vec<Context>,
}

/// A context with its cluster and user looked up.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub cluster: Cluster,
    pub user: Option<User>,
}

impl ProfileConfig {
    /// Load a profile file from the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse a profile file from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: ProfileConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the profile file to `path`, creating parent directories.
    ///
    /// A directory created here is `0700` on Unix and the file is left
    /// `0600` since it carries credentials.
    pub async fn write_to(&self, path: &Path) -> Result<(), ConfigError> {
        use tokio::io::AsyncWriteExt;

        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !tokio::fs::try_exists(parent).await? {
                tokio::fs::create_dir_all(parent).await?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                        .await?;
                }
            }
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(path).await?;
        // An existing file keeps its mode on open; tighten it before writing.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        tracing::debug!(path = %path.display(), "wrote profile configuration");
        Ok(())
    }

    /// Validate names and cluster addresses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unique("cluster", self.clusters.iter().map(|c| c.name.as_str()))?;
        check_unique("user", self.users.iter().map(|u| u.name.as_str()))?;
        check_unique("context", self.contexts.iter().map(|c| c.name.as_str()))?;

        for cluster in &self.clusters {
            if cluster.server.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "cluster {:?} must set a server address",
                    cluster.name
                )));
            }
        }
        for context in &self.contexts {
            if context.cluster.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "context {:?} must name a cluster",
                    context.name
                )));
            }
        }
        if !self.current_context.is_empty() && self.get_context(&self.current_context).is_none() {
            return Err(ConfigError::Validation(format!(
                "current_context {:?} does not name a context",
                self.current_context
            )));
        }
        Ok(())
    }

    pub fn get_context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn get_cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn get_user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Names of all profiles, in file order.
    pub fn profile_names(&self) -> Vec<String> {
        self.contexts.iter().map(|c| c.name.clone()).collect()
    }

    /// Resolve a profile name into its cluster and user.
    ///
    /// An empty name selects [`current_context`](Self::current_context).
    pub fn resolve(&self, profile: &str) -> Result<ResolvedProfile, ConfigError> {
        let name = if profile.is_empty() {
            if self.current_context.is_empty() {
                return Err(ConfigError::NoProfile);
            }
            self.current_context.as_str()
        } else {
            profile
        };

        let context = self
            .get_context(name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))?;

        let cluster = self
            .get_cluster(&context.cluster)
            .cloned()
            .ok_or_else(|| ConfigError::ClusterNotFound {
                profile: name.to_string(),
                cluster: context.cluster.clone(),
            })?;

        let user = if context.user.is_empty() {
            None
        } else {
            Some(
                self.get_user(&context.user)
                    .cloned()
                    .ok_or_else(|| ConfigError::UserNotFound {
                        profile: name.to_string(),
                        user: context.user.clone(),
                    })?,
            )
        };

        Ok(ResolvedProfile {
            name: name.to_string(),
            cluster,
            user,
        })
    }
}

fn check_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(ConfigError::Validation(format!("{kind} name must not be empty")));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Validation(format!(
                "duplicate {kind} name {name:?}"
            )));
        }
    }
    Ok(())
}
