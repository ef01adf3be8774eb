// ABOUTME: Service identity the bridge impersonates on proxied requests
// ABOUTME: Builds the bearer and impersonation headers for outbound calls

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::secrets::ServiceSecrets;

pub const HEADER_REMOTE_USER: HeaderName = HeaderName::from_static("x-remote-user");
pub const HEADER_REMOTE_GROUP: HeaderName = HeaderName::from_static("x-remote-group");
pub const REMOTE_GROUP: &str = "system:serviceaccounts";

/// The service account the bridge runs as.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub namespace: String,
    pub name: String,
}

impl ServiceIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn user(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.name)
    }

    /// Headers stamped on every outbound console connection.
    pub fn headers(&self, secrets: &ServiceSecrets) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", secrets.token)) {
            headers.insert(header::AUTHORIZATION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.user()) {
            headers.insert(HEADER_REMOTE_USER, value);
        }
        headers.insert(HEADER_REMOTE_GROUP, HeaderValue::from_static(REMOTE_GROUP));
        headers
    }
}
