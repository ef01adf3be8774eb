// ABOUTME: Outbound console dialer behind the attach bridge
// ABOUTME: Opens upgraded byte streams to the platform; tests use in-memory fakes

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use reqwest::header;
use reqwest::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::AttachError;
use crate::identity::ServiceIdentity;
use crate::secrets::ServiceSecrets;

/// Raw bidirectional byte stream to a remote console.
pub trait ConsoleStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ConsoleStream for T {}

pub type BoxedStream = Box<dyn ConsoleStream>;

/// Interactive exec session on one process of a container workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub namespace: String,
    pub workload: String,
    pub process: String,
    pub command: Vec<String>,
    pub tty: bool,
}

/// Dials consoles on behalf of the bridge. The two methods mirror the two
/// framed attach paths: process exec and machine console.
#[async_trait]
pub trait RemoteConsole: Send + Sync {
    async fn exec(
        &self,
        target: &ExecTarget,
        secrets: &ServiceSecrets,
    ) -> Result<BoxedStream, AttachError>;

    async fn console(
        &self,
        path: &str,
        secrets: &ServiceSecrets,
    ) -> Result<BoxedStream, AttachError>;
}

/// Production dialer connecting through the platform API over a transport
/// that trusts the cluster CA.
pub struct PlatformConsole {
    base: reqwest::Url,
    identity: ServiceIdentity,
    client: OnceCell<reqwest::Client>,
}

impl PlatformConsole {
    pub fn new(base: reqwest::Url, identity: ServiceIdentity) -> Self {
        Self {
            base,
            identity,
            client: OnceCell::new(),
        }
    }

    fn client(&self, secrets: &ServiceSecrets) -> Result<&reqwest::Client, AttachError> {
        self.client.get_or_try_init(|| {
            let ca = reqwest::Certificate::from_pem(&secrets.ca_pem)
                .map_err(|err| AttachError::Remote(err.to_string()))?;
            reqwest::Client::builder()
                .use_rustls_tls()
                .add_root_certificate(ca)
                .build()
                .map_err(|err| AttachError::Remote(err.to_string()))
        })
    }

    async fn open(
        &self,
        path: &str,
        query: &[(&str, String)],
        secrets: &ServiceSecrets,
    ) -> Result<BoxedStream, AttachError> {
        let url = self
            .base
            .join(path)
            .map_err(|err| AttachError::Remote(err.to_string()))?;
        debug!(%url, "Opening remote console");

        let response = self
            .client(secrets)?
            .post(url)
            .query(query)
            .headers(self.identity.headers(secrets))
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .send()
            .await
            .map_err(|err| AttachError::Remote(err.to_string()))?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(AttachError::Remote(format!(
                "remote refused console upgrade: {}",
                response.status()
            )));
        }

        let upgraded = response
            .upgrade()
            .await
            .map_err(|err| AttachError::Remote(err.to_string()))?;
        Ok(Box::new(upgraded))
    }
}

#[async_trait]
impl RemoteConsole for PlatformConsole {
    async fn exec(
        &self,
        target: &ExecTarget,
        secrets: &ServiceSecrets,
    ) -> Result<BoxedStream, AttachError> {
        let path = format!(
            "/apis/workload.sandpit.io/v1/namespaces/{}/containerworkloads/{}/exec",
            target.namespace, target.workload
        );
        let mut query: Vec<(&str, String)> = vec![
            ("process", target.process.clone()),
            ("stdin", "true".to_string()),
            ("stdout", "true".to_string()),
            ("tty", target.tty.to_string()),
        ];
        for arg in &target.command {
            query.push(("command", arg.clone()));
        }
        self.open(&path, &query, secrets).await
    }

    async fn console(
        &self,
        path: &str,
        secrets: &ServiceSecrets,
    ) -> Result<BoxedStream, AttachError> {
        self.open(path, &[], secrets).await
    }
}
