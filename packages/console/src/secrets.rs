// ABOUTME: Process-wide cache for the bridge's service credentials
// ABOUTME: Token and cluster CA read from fixed paths exactly once, never refreshed

use std::path::PathBuf;

use tokio::sync::OnceCell;

use crate::error::AttachError;

const TOKEN_PATH: &str = "/var/run/secrets/sandpit.io/serviceaccount/token";
const CA_PATH: &str = "/var/run/secrets/sandpit.io/serviceaccount/ca.crt";

/// Filesystem locations of the mounted service credentials.
#[derive(Debug, Clone)]
pub struct SecretPaths {
    pub token: PathBuf,
    pub ca: PathBuf,
}

impl Default for SecretPaths {
    fn default() -> Self {
        Self {
            token: PathBuf::from(TOKEN_PATH),
            ca: PathBuf::from(CA_PATH),
        }
    }
}

/// Credentials the bridge presents to the platform on every outbound
/// connection.
#[derive(Debug, Clone)]
pub struct ServiceSecrets {
    pub token: String,
    pub ca_pem: Vec<u8>,
}

/// Lazily loads the secrets on first use and serves the cached copy
/// afterwards. Concurrent first users race into a single load.
pub struct SecretCache {
    paths: SecretPaths,
    cell: OnceCell<ServiceSecrets>,
}

impl SecretCache {
    pub fn new(paths: SecretPaths) -> Self {
        Self {
            paths,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&ServiceSecrets, AttachError> {
        self.cell
            .get_or_try_init(|| async {
                let token = tokio::fs::read_to_string(&self.paths.token)
                    .await
                    .map_err(AttachError::Secrets)?;
                let ca_pem = tokio::fs::read(&self.paths.ca)
                    .await
                    .map_err(AttachError::Secrets)?;
                Ok(ServiceSecrets {
                    token: token.trim().to_string(),
                    ca_pem,
                })
            })
            .await
    }
}

impl Default for SecretCache {
    fn default() -> Self {
        Self::new(SecretPaths::default())
    }
}
