//! Driver Config Builders
//!
//! Pure functions turning VDOConfig and VsphereCloudConfig inputs into the
//! artifacts the drivers read: the CPI cloud config and credentials secret,
//! and the CSI INI configuration. Output is deterministic so stored
//! artifacts can be compared byte-for-byte to detect drift.

pub mod cpi;
pub mod csi;

pub use cpi::*;
pub use csi::*;

use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;

/// Secret key holding the vCenter user
pub const USERNAME_KEY: &str = "username";

/// Secret key holding the vCenter password
pub const PASSWORD_KEY: &str = "password";

/// vCenter credentials read from a VsphereCloudConfig's secret
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `username` / `password` from a secret's data
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let field = |key: &str| -> Result<String> {
            let value = secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .ok_or_else(|| {
                    Error::Validation(format!("secret {} has no {} key", name, key))
                })?;
            String::from_utf8(value.0.clone()).map_err(|_| {
                Error::Validation(format!("secret {} key {} is not valid UTF-8", name, key))
            })
        };

        Ok(Self {
            username: field(USERNAME_KEY)?,
            password: field(PASSWORD_KEY)?,
        })
    }
}

/// Wrap a string as secret bytes
pub(crate) fn bytes(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}
