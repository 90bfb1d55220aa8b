//! Local socket transport between the client and the privileged daemon.
//!
//! On Unix this is a domain socket whose access is governed by its mode and
//! group: `0770` with group `webmesh` by default, `0777` in insecure mode.
//! On Windows it is a named pipe.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// Default socket path.
#[cfg(unix)]
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/webmesh/webmesh.sock";

/// Default named pipe path.
#[cfg(windows)]
pub const DEFAULT_SOCKET_PATH: &str = r"\\.\pipe\webmesh.sock";

/// Group granted access to the socket and its directory when it exists.
pub const SOCKET_GROUP: &str = "webmesh";

/// Errors from setting up the daemon socket.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("create socket directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("chmod socket directory {path}: {source}")]
    ChmodDir { path: PathBuf, source: io::Error },

    #[error("remove stale socket {path}: {source}")]
    RemoveStale { path: PathBuf, source: io::Error },

    #[error("bind {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },

    #[cfg(unix)]
    #[error("look up group {SOCKET_GROUP}: {0}")]
    GroupLookup(#[source] nix::Error),

    #[cfg(unix)]
    #[error("chown {path}: {source}")]
    Chown { path: PathBuf, source: nix::Error },
}

/// Path the client and daemon agree on, honouring an explicit override.
pub fn socket_path(custom: Option<&Path>) -> PathBuf {
    custom
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Whether a daemon socket is present at `path`.
#[cfg(unix)]
pub fn socket_exists(path: &Path) -> bool {
    path.exists()
}

/// Whether a daemon pipe is present at `path`.
#[cfg(windows)]
pub fn socket_exists(path: &Path) -> bool {
    tokio::net::windows::named_pipe::ClientOptions::new()
        .open(path)
        .is_ok()
}

#[cfg(unix)]
pub use unix::{SocketListener, SocketStream, dial, listen};

#[cfg(windows)]
pub use windows::{SocketListener, SocketStream, dial, listen};

#[cfg(unix)]
mod unix {
    use super::*;

    use std::os::unix::fs::PermissionsExt;

    use nix::sys::stat::{Mode, umask};
    use nix::unistd::{Gid, Group, chown};
    use tokio::net::{UnixListener, UnixStream};

    pub type SocketListener = UnixListener;
    pub type SocketStream = UnixStream;

    const DIR_MODE: u32 = 0o750;

    const SECURE_UMASK: u32 = 0o007;
    const INSECURE_UMASK: u32 = 0o000;

    /// The umask is process-wide; binds that change it take turns.
    static UMASK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// Bind the daemon socket at `path`.
    ///
    /// The parent directory is created if needed and forced to `0750`. Both
    /// the directory and (unless `insecure`) the socket are handed to the
    /// `webmesh` group when that group exists. A stale socket file is removed
    /// first. The process umask is changed only for the duration of the bind.
    pub fn listen(path: &Path, insecure: bool) -> Result<SocketListener, SocketError> {
        let group = webmesh_group()?;

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| SocketError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(DIR_MODE)).map_err(
                |source| SocketError::ChmodDir {
                    path: dir.to_path_buf(),
                    source,
                },
            )?;
            if let Some(gid) = group {
                chown_group(dir, gid)?;
            }
        }

        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(SocketError::RemoveStale {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        let mask = if insecure { INSECURE_UMASK } else { SECURE_UMASK };
        let bound = {
            let _guard = UMASK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            let previous = umask(Mode::from_bits_truncate(mask));
            let bound = UnixListener::bind(path);
            umask(previous);
            bound
        };
        let listener = bound.map_err(|source| SocketError::Bind {
            path: path.to_path_buf(),
            source,
        })?;

        if !insecure {
            if let Some(gid) = group {
                chown_group(path, gid)?;
            }
        }

        info!(path = %path.display(), insecure, group = group.is_some(), "daemon socket bound");
        Ok(listener)
    }

    /// Connect to the daemon socket.
    pub async fn dial(path: &Path) -> io::Result<SocketStream> {
        UnixStream::connect(path).await
    }

    fn webmesh_group() -> Result<Option<Gid>, SocketError> {
        Group::from_name(SOCKET_GROUP)
            .map(|g| g.map(|g| g.gid))
            .map_err(SocketError::GroupLookup)
    }

    fn chown_group(path: &Path, gid: Gid) -> Result<(), SocketError> {
        chown(path, None, Some(gid)).map_err(|source| SocketError::Chown {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(windows)]
mod windows {
    use super::*;

    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    pub type SocketStream = NamedPipeClient;

    /// Accepts named-pipe clients, keeping one idle server instance ready.
    pub struct SocketListener {
        path: PathBuf,
        next: NamedPipeServer,
    }

    /// Create the first pipe instance at `path`. Pipe ACLs are left to the
    /// system default, so `insecure` has no effect here.
    pub fn listen(path: &Path, insecure: bool) -> Result<SocketListener, SocketError> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(path)
            .map_err(|source| SocketError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), insecure, "daemon pipe created");
        Ok(SocketListener {
            path: path.to_path_buf(),
            next,
        })
    }

    /// Connect to the daemon pipe.
    pub async fn dial(path: &Path) -> io::Result<SocketStream> {
        ClientOptions::new().open(path)
    }

    impl axum::serve::Listener for SocketListener {
        type Io = NamedPipeServer;
        type Addr = PathBuf;

        async fn accept(&mut self) -> (Self::Io, Self::Addr) {
            loop {
                if let Err(e) = self.next.connect().await {
                    tracing::warn!(error = %e, "pipe connect failed");
                    continue;
                }
                match ServerOptions::new().create(&self.path) {
                    Ok(fresh) => {
                        let connected = std::mem::replace(&mut self.next, fresh);
                        return (connected, self.path.clone());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "create pipe instance failed");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        }

        fn local_addr(&self) -> io::Result<Self::Addr> {
            Ok(self.path.clone())
        }
    }
}
