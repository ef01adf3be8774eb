// ABOUTME: Console attach service for sandboxes
// ABOUTME: Resolves a sandbox to its backend console and bridges the byte streams

pub mod bridge;
pub mod client;
pub mod directory;
pub mod error;
pub mod identity;
pub mod proxy;
pub mod remote;
pub mod secrets;
pub mod throttle;

pub use bridge::{pump, resolve_target, AttachBridge, AttachTarget, ATTACH_COMMAND};
pub use client::{connect_with_retry, RETRY_INTERVAL};
pub use directory::{SandboxDirectory, StoreDirectory};
pub use error::AttachError;
pub use identity::ServiceIdentity;
pub use proxy::ConsoleProxy;
pub use remote::{BoxedStream, ExecTarget, PlatformConsole, RemoteConsole};
pub use secrets::{SecretCache, SecretPaths, ServiceSecrets};
pub use throttle::{ByteThrottle, PER_CONNECTION_BYTES_PER_SEC};
