// ABOUTME: Upgrade-aware reverse proxy for virtual-machine consoles
// ABOUTME: Stamps identity headers and enforces the per-connection byte ceiling

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use hyper_util::rt::TokioIo;
use once_cell::sync::OnceCell;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::AttachError;
use crate::identity::ServiceIdentity;
use crate::secrets::ServiceSecrets;
use crate::throttle::{ByteThrottle, PER_CONNECTION_BYTES_PER_SEC};

pub struct ConsoleProxy {
    base: reqwest::Url,
    identity: ServiceIdentity,
    bytes_per_sec: u32,
    client: OnceCell<reqwest::Client>,
}

impl ConsoleProxy {
    pub fn new(base: reqwest::Url, identity: ServiceIdentity) -> Self {
        Self {
            base,
            identity,
            bytes_per_sec: PER_CONNECTION_BYTES_PER_SEC,
            client: OnceCell::new(),
        }
    }

    pub fn with_bytes_per_sec(mut self, bytes_per_sec: u32) -> Self {
        self.bytes_per_sec = bytes_per_sec;
        self
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

    /// Forwards the raw request to the remote console endpoint. Upgrade
    /// requests are relayed protocol-transparently; both the upgraded byte
    /// stream and plain response bodies are throttled.
    pub async fn forward(
        &self,
        path: &str,
        secrets: &ServiceSecrets,
        mut request: Request,
    ) -> Result<Response, AttachError> {
        let url = self
            .base
            .join(path)
            .map_err(|err| AttachError::Remote(err.to_string()))?;
        let client = self.client(secrets)?;

        let method = request.method().clone();
        let mut headers = forwardable_headers(request.headers());
        headers.extend(self.identity.headers(secrets));

        if !wants_upgrade(request.headers()) {
            let body = reqwest::Body::wrap_stream(request.into_body().into_data_stream());
            let response = client
                .request(method, url)
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|err| AttachError::Remote(err.to_string()))?;
            return Ok(self.plain_response(response));
        }

        let protocol = request.headers().get(header::UPGRADE).cloned();
        let on_upgrade = hyper::upgrade::on(&mut request);

        let mut outbound = client
            .request(method, url)
            .headers(headers)
            .header(header::CONNECTION, "Upgrade");
        if let Some(protocol) = &protocol {
            outbound = outbound.header(header::UPGRADE, protocol.clone());
        }
        let response = outbound
            .send()
            .await
            .map_err(|err| AttachError::Remote(err.to_string()))?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            debug!(status = %response.status(), "Remote refused console upgrade");
            return Ok(self.plain_response(response));
        }

        let mut builder = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
        for name in [
            header::CONNECTION,
            header::UPGRADE,
            header::SEC_WEBSOCKET_ACCEPT,
        ] {
            if let Some(value) = response.headers().get(&name) {
                builder = builder.header(name, value.clone());
            }
        }

        let bytes_per_sec = self.bytes_per_sec;
        tokio::spawn(async move {
            let remote = match response.upgrade().await {
                Ok(upgraded) => upgraded,
                Err(err) => {
                    warn!(error = %err, "Failed to upgrade remote console connection");
                    return;
                }
            };
            let inbound = match on_upgrade.await {
                Ok(upgraded) => TokioIo::new(upgraded),
                Err(err) => {
                    warn!(error = %err, "Failed to upgrade inbound connection");
                    return;
                }
            };
            if let Err(err) =
                throttled_copy(inbound, remote, ByteThrottle::new(bytes_per_sec)).await
            {
                debug!(error = %err, "Proxied console ended");
            }
        });

        builder
            .body(Body::empty())
            .map_err(|err| AttachError::Remote(err.to_string()))
    }

    fn plain_response(&self, response: reqwest::Response) -> Response {
        let status = response.status();
        let headers = forwardable_headers(response.headers());
        let throttle = Arc::new(ByteThrottle::new(self.bytes_per_sec));
        let stream = response.bytes_stream().then(move |chunk| {
            let throttle = throttle.clone();
            async move {
                if let Ok(data) = &chunk {
                    throttle.acquire(data.len()).await;
                }
                chunk
            }
        });

        let mut out = Response::new(Body::from_stream(stream));
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        out
    }
}

fn wants_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers.contains_key(header::UPGRADE);
    let connection = headers
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    upgrade && connection
}

/// Copies headers worth relaying, dropping hop-by-hop and identity headers
/// the bridge replaces.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if name == header::HOST
            || name == header::CONNECTION
            || name == header::UPGRADE
            || name == header::AUTHORIZATION
            || name == header::CONTENT_LENGTH
            || name == header::TRANSFER_ENCODING
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Bidirectional copy where the first side to finish closes the pair. Every
/// chunk is charged against the throttle before it is written.
async fn throttled_copy<A, B>(a: A, b: B, throttle: ByteThrottle) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let forward = {
        let throttle = &throttle;
        async move {
            let mut buf = [0u8; 2048];
            loop {
                let n = a_read.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                throttle.acquire(n).await;
                b_write.write_all(&buf[..n]).await?;
            }
            b_write.shutdown().await
        }
    };

    let backward = {
        let throttle = &throttle;
        async move {
            let mut buf = [0u8; 2048];
            loop {
                let n = b_read.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                throttle.acquire(n).await;
                a_write.write_all(&buf[..n]).await?;
            }
            a_write.shutdown().await
        }
    };

    tokio::select! {
        result = forward => result,
        result = backward => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_wants_upgrade_needs_both_headers() {
        let mut headers = HeaderMap::new();
        assert!(!wants_upgrade(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(!wants_upgrade(&headers));

        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(wants_upgrade(&headers));
    }

    #[test]
    fn test_forwardable_headers_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("bridge.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer user-token"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );

        let out = forwardable_headers(&headers);
        assert!(!out.contains_key(header::HOST));
        assert!(!out.contains_key(header::CONNECTION));
        assert!(!out.contains_key(header::AUTHORIZATION));
        assert!(out.contains_key(header::ACCEPT));
        assert!(out.contains_key(header::SEC_WEBSOCKET_KEY));
    }

    #[tokio::test]
    async fn test_throttled_copy_first_finisher_closes() {
        let (a_local, mut a_far) = tokio::io::duplex(256);
        let (b_local, mut b_far) = tokio::io::duplex(256);
        let task = tokio::spawn(throttled_copy(a_local, b_local, ByteThrottle::new(4096)));

        a_far.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 8];
        let n = b_far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        b_far.write_all(b"world").await.unwrap();
        let n = a_far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");

        // Closing one side finishes the copy and closes the other.
        drop(a_far);
        task.await.unwrap().unwrap();
        assert_eq!(b_far.read(&mut buf).await.unwrap(), 0);
    }
}
