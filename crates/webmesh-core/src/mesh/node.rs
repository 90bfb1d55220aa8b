//! Mesh engine backed by an external `webmesh-node` process.
//!
//! Engine options are rendered as node command-line flags. Secrets (CA
//! bundle, passwords, client keys) travel through the child's environment
//! so they never show up in the process table.
//!
//! | Phase | Implementation |
//! |-------|----------------|
//! | open | spawn the node binary |
//! | ready | poll the node's local gRPC port until it accepts |
//! | close | SIGTERM, bounded wait, then kill |
//! | metrics | `/sys/class/net/<iface>/statistics` |

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::options::{Credentials, EngineOptions, RAFT_SHUTDOWN_TIMEOUT, TlsPolicy};
use super::{EngineError, EngineProvider, MeshEngine, NetworkInterface};
use crate::BoxFuture;
use crate::ipc::InterfaceMetrics;

/// Node binary looked up on `PATH` when none is configured.
pub const DEFAULT_NODE_BINARY: &str = "webmesh-node";

/// Interface name used when the caller leaves it empty.
pub const DEFAULT_INTERFACE_NAME: &str = "webmesh0";

/// gRPC port the node listens on when the caller leaves it at zero.
pub const DEFAULT_GRPC_PORT: u16 = 8443;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Provider that runs each engine as a child process.
#[derive(Debug, Clone)]
pub struct NodeProcessProvider {
    binary: PathBuf,
    sysfs_net: PathBuf,
}

impl NodeProcessProvider {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            sysfs_net: PathBuf::from("/sys/class/net"),
        }
    }

    /// Read interface statistics from a different root (for tests).
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_net = root.into();
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for NodeProcessProvider {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_BINARY)
    }
}

impl EngineProvider for NodeProcessProvider {
    fn name(&self) -> &str {
        "node-process"
    }

    fn new_engine(&self, options: EngineOptions) -> Result<Box<dyn MeshEngine>, EngineError> {
        if options.mesh.join_address.is_empty() {
            return Err(EngineError::Options("join address must not be empty".to_string()));
        }
        let interface_name = if options.wireguard.interface_name.is_empty() {
            DEFAULT_INTERFACE_NAME.to_string()
        } else {
            options.wireguard.interface_name.clone()
        };
        let grpc_port = match options.mesh.grpc_port {
            0 => DEFAULT_GRPC_PORT,
            port => port,
        };

        Ok(Box::new(NodeProcessEngine {
            binary: self.binary.clone(),
            args: build_args(&options, &interface_name),
            env: build_env(&options),
            grpc_port,
            child: Mutex::new(None),
            interface: SysfsInterface {
                root: self.sysfs_net.clone(),
                name: interface_name,
            },
        }))
    }
}

/// Render engine options as node flags.
pub fn build_args(options: &EngineOptions, interface_name: &str) -> Vec<String> {
    let mut args = vec![
        format!("--raft.listen-address={}", options.raft.listen_address),
        format!("--raft.shutdown-timeout={}s", options.raft.shutdown_timeout.as_secs()),
        format!("--mesh.join-address={}", options.mesh.join_address),
        format!("--mesh.join-timeout={}s", options.mesh.join_timeout.as_secs()),
        format!("--wireguard.interface-name={interface_name}"),
        format!(
            "--wireguard.persistent-keepalive={}s",
            options.wireguard.persistent_keepalive.as_secs()
        ),
    ];

    if options.raft.in_memory {
        args.push("--raft.in-memory".to_string());
    }
    if options.raft.leave_on_shutdown {
        args.push("--raft.leave-on-shutdown".to_string());
    }
    if options.mesh.grpc_port != 0 {
        args.push(format!("--grpc.listen-address=:{}", options.mesh.grpc_port));
    }
    if options.mesh.no_ipv4 {
        args.push("--mesh.no-ipv4".to_string());
    }
    if options.mesh.no_ipv6 {
        args.push("--mesh.no-ipv6".to_string());
    }
    if options.wireguard.listen_port != 0 {
        args.push(format!("--wireguard.listen-port={}", options.wireguard.listen_port));
    }
    if options.wireguard.force_tun {
        args.push("--wireguard.force-tun".to_string());
    }

    match &options.tls {
        TlsPolicy::Insecure => args.push("--tls.insecure".to_string()),
        TlsPolicy::SkipVerify => args.push("--tls.insecure-skip-verify".to_string()),
        TlsPolicy::VerifyChainOnly { .. } => args.push("--tls.verify-chain-only".to_string()),
        TlsPolicy::Verify { .. } => {}
    }

    match &options.credentials {
        Some(Credentials::Basic(auth)) => {
            args.push(format!("--auth.basic.username={}", auth.username));
        }
        Some(Credentials::Ldap(auth)) => {
            args.push(format!("--auth.ldap.username={}", auth.username));
        }
        Some(Credentials::MutualTls(_)) => args.push("--auth.mtls".to_string()),
        None => {}
    }

    if let Some(port) = options.local_dns_port {
        args.push("--services.meshdns.enabled".to_string());
        args.push(format!("--services.meshdns.listen-udp=:{port}"));
    }

    args
}

/// Secret material passed through the child's environment.
pub fn build_env(options: &EngineOptions) -> Vec<(String, String)> {
    let mut env = Vec::new();
    match &options.tls {
        TlsPolicy::Verify { ca_data: Some(ca) } | TlsPolicy::VerifyChainOnly { ca_data: Some(ca) } => {
            env.push(("WEBMESH_TLS_CA_DATA".to_string(), ca.clone()));
        }
        _ => {}
    }
    match &options.credentials {
        Some(Credentials::Basic(auth)) => {
            env.push(("WEBMESH_AUTH_BASIC_PASSWORD".to_string(), auth.password.clone()));
        }
        Some(Credentials::Ldap(auth)) => {
            env.push(("WEBMESH_AUTH_LDAP_PASSWORD".to_string(), auth.password.clone()));
        }
        Some(Credentials::MutualTls(cert)) => {
            env.push(("WEBMESH_AUTH_MTLS_CERT_DATA".to_string(), cert.certificate_data.clone()));
            env.push(("WEBMESH_AUTH_MTLS_KEY_DATA".to_string(), cert.key_data.clone()));
        }
        None => {}
    }
    env
}

struct NodeProcessEngine {
    binary: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    grpc_port: u16,
    child: Mutex<Option<Child>>,
    interface: SysfsInterface,
}

impl MeshEngine for NodeProcessEngine {
    fn open(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let mut child = self.child.lock().await;
            if child.is_some() {
                return Err(EngineError::Engine("node process already running".to_string()));
            }
            debug!(binary = %self.binary.display(), args = ?self.args, "spawning mesh node");
            let spawned = Command::new(&self.binary)
                .args(&self.args)
                .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()?;
            info!(pid = ?spawned.id(), "mesh node started");
            *child = Some(spawned);
            Ok(())
        })
    }

    fn ready(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            loop {
                if tokio::net::TcpStream::connect(("127.0.0.1", self.grpc_port))
                    .await
                    .is_ok()
                {
                    return;
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let Some(mut child) = self.child.lock().await.take() else {
                return Ok(());
            };
            terminate(&child);
            let grace = RAFT_SHUTDOWN_TIMEOUT + KILL_GRACE;
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    info!(%status, "mesh node exited");
                    Ok(())
                }
                Err(_) => {
                    warn!(grace_secs = grace.as_secs(), "mesh node did not exit, killing");
                    child.kill().await?;
                    Err(EngineError::Engine(format!(
                        "node did not leave the mesh within {grace:?}"
                    )))
                }
            }
        })
    }

    fn interface(&self) -> &dyn NetworkInterface {
        &self.interface
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(pid, error = %e, "failed to signal mesh node");
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

/// Reads Linux interface counters from sysfs.
struct SysfsInterface {
    root: PathBuf,
    name: String,
}

impl SysfsInterface {
    async fn read_counter(&self, counter: &str) -> Result<u64, EngineError> {
        let path = self.root.join(&self.name).join("statistics").join(counter);
        let raw = tokio::fs::read_to_string(&path).await?;
        raw.trim()
            .parse()
            .map_err(|e| EngineError::Engine(format!("parse {}: {e}", path.display())))
    }
}

impl NetworkInterface for SysfsInterface {
    fn metrics(&self) -> BoxFuture<'_, Result<InterfaceMetrics, EngineError>> {
        Box::pin(async move {
            Ok(InterfaceMetrics {
                device_name: self.name.clone(),
                total_transmit_bytes: self.read_counter("tx_bytes").await?,
                total_receive_bytes: self.read_counter("rx_bytes").await?,
            })
        })
    }
}
