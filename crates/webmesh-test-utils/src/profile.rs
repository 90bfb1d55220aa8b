//! Profile file builders for tests.
//!
//! Use [`TestProfileBuilder`] to assemble a [`ProfileConfig`] and, when a
//! test needs a real file (the daemon loads profiles by path), write it into
//! a temp directory with [`TestProfileBuilder::write`].

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use webmesh_config::{BasicAuth, Cluster, Context, ProfileConfig, User};

/// Fluent builder for [`ProfileConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let profile = TestProfileBuilder::new()
///     .cluster("lab", "mesh.example.com:8443")
///     .basic_user("alice", "hunter2")
///     .context("home", "lab", "alice")
///     .current("home")
///     .write();
/// ```
pub struct TestProfileBuilder {
    config: ProfileConfig,
}

impl TestProfileBuilder {
    pub fn new() -> Self {
        Self {
            config: ProfileConfig::default(),
        }
    }

    /// One cluster, one anonymous profile `home`, selected as current.
    pub fn single() -> Self {
        Self::new()
            .cluster("lab", "mesh.example.com:8443")
            .context("home", "lab", "")
            .current("home")
    }

    pub fn cluster(mut self, name: &str, server: &str) -> Self {
        self.config.clusters.push(Cluster {
            name: name.to_string(),
            server: server.to_string(),
            ..Default::default()
        });
        self
    }

    /// Mark the most recently added cluster as plaintext.
    pub fn insecure(mut self) -> Self {
        if let Some(cluster) = self.config.clusters.last_mut() {
            cluster.insecure = true;
        }
        self
    }

    pub fn basic_user(mut self, name: &str, password: &str) -> Self {
        self.config.users.push(User {
            name: name.to_string(),
            basic_auth: Some(BasicAuth {
                username: name.to_string(),
                password: password.to_string(),
            }),
            ldap_auth: None,
            client_certificate: None,
        });
        self
    }

    pub fn context(mut self, name: &str, cluster: &str, user: &str) -> Self {
        self.config.contexts.push(Context {
            name: name.to_string(),
            cluster: cluster.to_string(),
            user: user.to_string(),
        });
        self
    }

    pub fn current(mut self, name: &str) -> Self {
        self.config.current_context = name.to_string();
        self
    }

    pub fn build(self) -> ProfileConfig {
        self.config
    }

    /// Write the profile to `webmesh.toml` in a fresh temp directory.
    pub fn write(self) -> TestProfile {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("webmesh.toml");
        let content = toml::to_string_pretty(&self.config).expect("failed to serialize test profile");
        std::fs::write(&path, content).expect("failed to write test profile");
        TestProfile {
            config: self.config,
            path,
            _dir: dir,
        }
    }
}

impl Default for TestProfileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A profile file on disk; the directory is removed on drop.
pub struct TestProfile {
    pub config: ProfileConfig,
    pub path: PathBuf,
    _dir: TempDir,
}

impl TestProfile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as the string carried in a connect request.
    pub fn path_string(&self) -> String {
        self.path.display().to_string()
    }
}
