//! Privilege detection and client mode selection.
//!
//! A client runs the mesh in-process only when it already has the
//! privileges the daemon would otherwise lend it and no daemon socket is
//! present. Every other combination relays through the daemon.

use std::path::Path;

use tracing::debug;

/// Answers "may this process create network interfaces itself?".
pub trait PrivilegeCheck: Send + Sync {
    /// Human-readable name of the check.
    fn name(&self) -> &str;

    fn is_privileged(&self) -> bool;
}

/// Privileged when the effective user is root.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixRoot;

impl PrivilegeCheck for PosixRoot {
    fn name(&self) -> &str {
        "posix-root"
    }

    #[cfg(unix)]
    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    fn is_privileged(&self) -> bool {
        false
    }
}

/// Privileged when running as the Windows `SYSTEM` account.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsSystemAccount;

impl WindowsSystemAccount {
    const ACCOUNT: &'static str = "SYSTEM";
}

impl PrivilegeCheck for WindowsSystemAccount {
    fn name(&self) -> &str {
        "windows-system"
    }

    fn is_privileged(&self) -> bool {
        std::env::var("USERNAME").is_ok_and(|name| name.eq_ignore_ascii_case(Self::ACCOUNT))
    }
}

/// The check matching the build target.
pub fn platform_privilege_check() -> Box<dyn PrivilegeCheck> {
    if cfg!(windows) {
        Box::new(WindowsSystemAccount)
    } else {
        Box::new(PosixRoot)
    }
}

/// Where mesh operations execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// The client owns the session itself.
    InProcess,
    /// Every call is forwarded to the daemon socket.
    Relay,
}

impl ClientMode {
    /// In-process only when privileged and no daemon socket exists.
    pub fn select(check: &dyn PrivilegeCheck, socket_path: &Path) -> Self {
        let privileged = check.is_privileged();
        let socket_present = crate::ipc::socket::socket_exists(socket_path);
        let mode = if privileged && !socket_present {
            ClientMode::InProcess
        } else {
            ClientMode::Relay
        };
        debug!(
            check = check.name(),
            privileged,
            socket_present,
            ?mode,
            "selected client mode"
        );
        mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    impl PrivilegeCheck for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn is_privileged(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_mode_privileged_without_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("webmesh.sock");
        assert_eq!(ClientMode::select(&Fixed(true), &path), ClientMode::InProcess);
    }

    #[test]
    fn test_mode_unprivileged_without_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("webmesh.sock");
        assert_eq!(ClientMode::select(&Fixed(false), &path), ClientMode::Relay);
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_privileged_with_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("webmesh.sock");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(ClientMode::select(&Fixed(true), &path), ClientMode::Relay);
        assert_eq!(ClientMode::select(&Fixed(false), &path), ClientMode::Relay);
    }

    #[test]
    fn test_platform_check_name() {
        let check = platform_privilege_check();
        if cfg!(windows) {
            assert_eq!(check.name(), "windows-system");
        } else {
            assert_eq!(check.name(), "posix-root");
        }
    }
}
