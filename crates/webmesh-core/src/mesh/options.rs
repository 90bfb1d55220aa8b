//! Translation of connect options and a resolved profile into engine options.
//!
//! This is the only place profile credentials are attached to an outgoing
//! engine configuration.

use std::time::Duration;

use webmesh_config::{BasicAuth, ClientCertificate, Cluster, LdapAuth, ResolvedProfile};

use crate::ipc::ConnectOptions;

/// Raft shutdown bound handed to the engine.
pub const RAFT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// WireGuard persistent keepalive interval.
pub const PERSISTENT_KEEPALIVE: Duration = Duration::from_secs(10);

/// Consensus settings. The client joins as a non-voting, in-memory member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftOptions {
    pub listen_address: String,
    pub in_memory: bool,
    pub leave_on_shutdown: bool,
    pub shutdown_timeout: Duration,
}

/// Mesh join settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshOptions {
    pub join_address: String,
    pub grpc_port: u16,
    pub no_ipv4: bool,
    pub no_ipv6: bool,
    pub join_timeout: Duration,
}

/// WireGuard interface settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireGuardOptions {
    pub interface_name: String,
    pub listen_port: u16,
    pub force_tun: bool,
    pub persistent_keepalive: Duration,
}

/// How the engine authenticates the cluster's TLS endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Plaintext transport.
    Insecure,
    /// TLS without any certificate verification.
    SkipVerify,
    /// Verify the chain, ignore the server name.
    VerifyChainOnly { ca_data: Option<String> },
    /// Full verification, optionally pinned to a CA bundle.
    Verify { ca_data: Option<String> },
}

impl TlsPolicy {
    /// Map a cluster's flags to a policy. `insecure` wins over
    /// `tls_skip_verify`, which wins over `tls_verify_chain_only`.
    pub fn from_cluster(cluster: &Cluster) -> Self {
        let ca_data = cluster.certificate_authority_data.clone();
        if cluster.insecure {
            TlsPolicy::Insecure
        } else if cluster.tls_skip_verify {
            TlsPolicy::SkipVerify
        } else if cluster.tls_verify_chain_only {
            TlsPolicy::VerifyChainOnly { ca_data }
        } else {
            TlsPolicy::Verify { ca_data }
        }
    }
}

/// Credentials presented when joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic(BasicAuth),
    Ldap(LdapAuth),
    MutualTls(ClientCertificate),
}

impl Credentials {
    /// Pick one credential from a user: basic, then LDAP, then mutual TLS.
    pub fn select(
        basic: Option<&BasicAuth>,
        ldap: Option<&LdapAuth>,
        mtls: Option<&ClientCertificate>,
    ) -> Option<Self> {
        if let Some(basic) = basic {
            return Some(Credentials::Basic(basic.clone()));
        }
        if let Some(ldap) = ldap {
            return Some(Credentials::Ldap(ldap.clone()));
        }
        mtls.map(|cert| Credentials::MutualTls(cert.clone()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Basic(_) => "basic",
            Credentials::Ldap(_) => "ldap",
            Credentials::MutualTls(_) => "mtls",
        }
    }
}

/// Complete engine configuration for one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Profile the options were built from, for logging.
    pub profile: String,
    pub raft: RaftOptions,
    pub mesh: MeshOptions,
    pub wireguard: WireGuardOptions,
    pub tls: TlsPolicy,
    pub credentials: Option<Credentials>,
    /// Port of the local MeshDNS server, when requested.
    pub local_dns_port: Option<u16>,
}

impl EngineOptions {
    /// Build engine options from connect options and a resolved profile.
    pub fn build(profile: &ResolvedProfile, opts: &ConnectOptions) -> Self {
        let credentials = profile.user.as_ref().and_then(|user| {
            Credentials::select(
                user.basic_auth.as_ref(),
                user.ldap_auth.as_ref(),
                user.client_certificate.as_ref(),
            )
        });

        Self {
            profile: profile.name.clone(),
            raft: RaftOptions {
                listen_address: format!(":{}", opts.raft_port),
                in_memory: true,
                leave_on_shutdown: true,
                shutdown_timeout: RAFT_SHUTDOWN_TIMEOUT,
            },
            mesh: MeshOptions {
                join_address: profile.cluster.server.clone(),
                grpc_port: opts.grpc_port,
                no_ipv4: opts.no_ipv4,
                no_ipv6: opts.no_ipv6,
                join_timeout: opts.connect_timeout(),
            },
            wireguard: WireGuardOptions {
                interface_name: opts.interface_name.clone(),
                listen_port: opts.listen_port,
                force_tun: opts.force_tun,
                persistent_keepalive: PERSISTENT_KEEPALIVE,
            },
            tls: TlsPolicy::from_cluster(&profile.cluster),
            credentials,
            local_dns_port: opts.local_dns.then_some(opts.local_dns_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use webmesh_config::User;

    fn profile(user: Option<User>) -> ResolvedProfile {
        ResolvedProfile {
            name: "home".to_string(),
            cluster: Cluster {
                name: "lab".to_string(),
                server: "mesh.example.com:8443".to_string(),
                ..Default::default()
            },
            user,
        }
    }

    fn basic() -> BasicAuth {
        BasicAuth {
            username: "alice".to_string(),
            password: "pw".to_string(),
        }
    }

    fn ldap() -> LdapAuth {
        LdapAuth {
            username: "alice".to_string(),
            password: "ldap-pw".to_string(),
        }
    }

    fn cert() -> ClientCertificate {
        ClientCertificate {
            certificate_data: "cert".to_string(),
            key_data: "key".to_string(),
        }
    }

    #[test]
    fn test_build_maps_ports_and_flags() {
        let opts = ConnectOptions {
            profile: "home".to_string(),
            interface_name: "wm0".to_string(),
            force_tun: true,
            listen_port: 51820,
            raft_port: 9443,
            grpc_port: 8443,
            no_ipv6: true,
            ..Default::default()
        };
        let engine = EngineOptions::build(&profile(None), &opts);

        assert_eq!(engine.raft.listen_address, ":9443");
        assert!(engine.raft.in_memory);
        assert!(engine.raft.leave_on_shutdown);
        assert_eq!(engine.raft.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(engine.mesh.join_address, "mesh.example.com:8443");
        assert_eq!(engine.mesh.grpc_port, 8443);
        assert!(engine.mesh.no_ipv6);
        assert!(!engine.mesh.no_ipv4);
        assert_eq!(engine.mesh.join_timeout, Duration::from_secs(30));
        assert_eq!(engine.wireguard.interface_name, "wm0");
        assert_eq!(engine.wireguard.listen_port, 51820);
        assert!(engine.wireguard.force_tun);
        assert_eq!(engine.wireguard.persistent_keepalive, Duration::from_secs(10));
        assert_eq!(engine.credentials, None);
        assert_eq!(engine.local_dns_port, None);
    }

    #[test]
    fn test_local_dns_port_only_when_enabled() {
        let opts = ConnectOptions {
            local_dns: true,
            local_dns_port: 5353,
            ..Default::default()
        };
        let engine = EngineOptions::build(&profile(None), &opts);
        assert_eq!(engine.local_dns_port, Some(5353));

        let opts = ConnectOptions {
            local_dns_port: 5353,
            ..Default::default()
        };
        let engine = EngineOptions::build(&profile(None), &opts);
        assert_eq!(engine.local_dns_port, None);
    }

    #[test]
    fn test_tls_policy_precedence() {
        let mut cluster = Cluster {
            insecure: true,
            tls_skip_verify: true,
            tls_verify_chain_only: true,
            certificate_authority_data: Some("ca".to_string()),
            ..Default::default()
        };
        assert_eq!(TlsPolicy::from_cluster(&cluster), TlsPolicy::Insecure);

        cluster.insecure = false;
        assert_eq!(TlsPolicy::from_cluster(&cluster), TlsPolicy::SkipVerify);

        cluster.tls_skip_verify = false;
        assert_eq!(
            TlsPolicy::from_cluster(&cluster),
            TlsPolicy::VerifyChainOnly {
                ca_data: Some("ca".to_string())
            }
        );

        cluster.tls_verify_chain_only = false;
        assert_eq!(
            TlsPolicy::from_cluster(&cluster),
            TlsPolicy::Verify {
                ca_data: Some("ca".to_string())
            }
        );
    }

    #[test]
    fn test_credentials_basic_wins() {
        let creds = Credentials::select(Some(&basic()), Some(&ldap()), Some(&cert())).unwrap();
        assert_eq!(creds.kind(), "basic");
    }

    #[test]
    fn test_credentials_ldap_over_mtls() {
        let creds = Credentials::select(None, Some(&ldap()), Some(&cert())).unwrap();
        assert_eq!(creds, Credentials::Ldap(ldap()));
    }

    #[test]
    fn test_credentials_mtls_last() {
        let creds = Credentials::select(None, None, Some(&cert())).unwrap();
        assert_eq!(creds.kind(), "mtls");
        assert!(Credentials::select(None, None, None).is_none());
    }

    #[test]
    fn test_build_attaches_user_credentials() {
        let user = User {
            name: "alice".to_string(),
            basic_auth: None,
            ldap_auth: Some(ldap()),
            client_certificate: Some(cert()),
        };
        let engine = EngineOptions::build(&profile(Some(user)), &ConnectOptions::default());
        assert_eq!(engine.credentials, Some(Credentials::Ldap(ldap())));
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let engine = EngineOptions {
            credentials: Some(Credentials::Basic(basic())),
            ..EngineOptions::build(&profile(None), &ConnectOptions::default())
        };
        let debug = format!("{engine:?}");
        assert!(!debug.contains("\"pw\""));
    }
}
