//! User credential material attached to a profile.
//!
//! Every type here zeroizes its secret fields on drop and redacts them in
//! `Debug` output, so credentials can be logged alongside the rest of a
//! profile without leaking.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

const REDACTED: &str = "[REDACTED]";

/// Username/password credentials for basic authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// Username/password credentials checked against an LDAP directory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct LdapAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LdapAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapAuth")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// PEM-encoded client certificate and private key for mutual TLS.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ClientCertificate {
    pub certificate_data: String,
    pub key_data: String,
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("certificate_data", &format_args!("<{} bytes>", self.certificate_data.len()))
            .field("key_data", &REDACTED)
            .finish()
    }
}
