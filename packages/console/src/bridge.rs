// ABOUTME: Attach entry point: sandbox lookup, readiness check, backend dispatch
// ABOUTME: Framed WebSocket pumping for exec/console, raw proxying for VM consoles

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use sandpit_api::{
    get_condition, ConditionStatus, ContainerWorkload, SandboxKind, ANNOTATION_DEFAULT_PROCESS,
    CONDITION_READY,
};

use crate::directory::SandboxDirectory;
use crate::error::AttachError;
use crate::proxy::ConsoleProxy;
use crate::remote::{ExecTarget, RemoteConsole};
use crate::secrets::SecretCache;

/// Fixed command an exec attach runs in the workload.
pub const ATTACH_COMMAND: &str = "/bin/bash";

/// Where an attach for a given sandbox connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachTarget {
    /// Interactive exec into a container workload process.
    Exec(ExecTarget),
    /// Framed console on a machine instance, addressed by path.
    Console { path: String },
    /// Raw reverse proxy to a virtual-machine console endpoint.
    Proxy { path: String },
}

/// Resolves the sandbox to its console target. Fails before any outbound
/// connection is made: absent sandboxes, not-ready sandboxes, and sandboxes
/// without a detected kind never reach a backend.
pub async fn resolve_target(
    directory: &dyn SandboxDirectory,
    namespace: &str,
    name: &str,
) -> Result<AttachTarget, AttachError> {
    let Some(sandbox) = directory.sandbox(namespace, name).await? else {
        return Err(AttachError::NotFound {
            name: name.to_string(),
        });
    };

    let ready = get_condition(&sandbox.status.conditions, CONDITION_READY)
        .map(|c| c.status == ConditionStatus::True)
        .unwrap_or(false);
    if !ready {
        return Err(AttachError::NotReady {
            name: name.to_string(),
        });
    }

    let Some(kind) = sandbox.status.kind else {
        return Err(AttachError::UnknownKind {
            name: name.to_string(),
        });
    };

    let compute = sandbox.compute_name();
    match kind {
        SandboxKind::Container => {
            let Some(workload) = directory.workload(namespace, &compute).await? else {
                return Err(AttachError::NotFound { name: compute });
            };
            let process = select_process(&workload).ok_or_else(|| {
                AttachError::Remote(format!("workload {compute:?} has no processes"))
            })?;
            Ok(AttachTarget::Exec(ExecTarget {
                namespace: namespace.to_string(),
                workload: compute,
                process,
                command: vec![ATTACH_COMMAND.to_string()],
                tty: true,
            }))
        }
        SandboxKind::MachineInstance => {
            if directory.machine_instance(namespace, &compute).await?.is_none() {
                return Err(AttachError::NotFound { name: compute });
            }
            Ok(AttachTarget::Console {
                path: machine_console_path(namespace, &compute),
            })
        }
        SandboxKind::VirtualMachine => {
            if directory.virtual_machine(namespace, &compute).await?.is_none() {
                return Err(AttachError::NotFound { name: compute });
            }
            Ok(AttachTarget::Proxy {
                path: vm_console_path(namespace, &compute),
            })
        }
    }
}

/// The annotated process wins when it exists; otherwise the first declared
/// process is attached.
fn select_process(workload: &ContainerWorkload) -> Option<String> {
    if let Some(wanted) = workload.metadata.annotations.get(ANNOTATION_DEFAULT_PROCESS) {
        if let Some(process) = workload.spec.processes.iter().find(|p| &p.name == wanted) {
            return Some(process.name.clone());
        }
    }
    workload.spec.processes.first().map(|p| p.name.clone())
}

fn machine_console_path(namespace: &str, name: &str) -> String {
    format!("/apis/instance.sandpit.io/v1/namespaces/{namespace}/machineinstances/{name}/console")
}

fn vm_console_path(namespace: &str, name: &str) -> String {
    format!("/apis/machine.sandpit.io/v1/namespaces/{namespace}/virtualmachines/{name}/console")
}

pub struct AttachBridge {
    directory: Arc<dyn SandboxDirectory>,
    remote: Arc<dyn RemoteConsole>,
    proxy: ConsoleProxy,
    secrets: Arc<SecretCache>,
}

impl AttachBridge {
    pub fn new(
        directory: Arc<dyn SandboxDirectory>,
        remote: Arc<dyn RemoteConsole>,
        proxy: ConsoleProxy,
        secrets: Arc<SecretCache>,
    ) -> Self {
        Self {
            directory,
            remote,
            proxy,
            secrets,
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(
                "/namespaces/{namespace}/sandboxes/{name}/attach",
                any(attach_handler),
            )
            .with_state(self)
    }

    pub async fn dispatch(
        &self,
        namespace: &str,
        name: &str,
        request: Request,
    ) -> Result<Response, AttachError> {
        let target = resolve_target(self.directory.as_ref(), namespace, name).await?;
        let secrets = self.secrets.get().await?.clone();

        match target {
            AttachTarget::Exec(exec) => {
                let ws = require_upgrade(request).await?;
                let stream = self.remote.exec(&exec, &secrets).await?;
                Ok(ws.on_upgrade(move |socket| run_pump(socket, stream)))
            }
            AttachTarget::Console { path } => {
                let ws = require_upgrade(request).await?;
                let stream = self.remote.console(&path, &secrets).await?;
                Ok(ws.on_upgrade(move |socket| run_pump(socket, stream)))
            }
            AttachTarget::Proxy { path } => self.proxy.forward(&path, &secrets, request).await,
        }
    }
}

async fn attach_handler(
    State(bridge): State<Arc<AttachBridge>>,
    Path((namespace, name)): Path<(String, String)>,
    request: Request,
) -> Response {
    match bridge.dispatch(&namespace, &name, request).await {
        Ok(response) => response,
        Err(err) => {
            debug!(namespace, name, error = %err, "Attach rejected");
            err.into_response()
        }
    }
}

/// The framed paths demand a WebSocket client; anything else is a plain 400.
async fn require_upgrade(request: Request) -> Result<WebSocketUpgrade, AttachError> {
    let (mut parts, _body) = request.into_parts();
    WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .map_err(|_| AttachError::UpgradeRequired)
}

async fn run_pump<S>(socket: WebSocket, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    if let Err(err) = pump(socket, stream).await {
        warn!(error = %err, "Attach stream ended abnormally");
    }
}

/// Pumps WebSocket frames to the remote stream and remote bytes back as
/// binary frames. The first side to finish ends the session; dropping the
/// halves closes both connections so neither read blocks forever. A client
/// close frame or remote EOF ends quietly; transport errors surface.
pub async fn pump<T, E, S>(socket: T, stream: S) -> Result<(), AttachError>
where
    T: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut remote_read, mut remote_write) = tokio::io::split(stream);
    let (mut frames_out, mut frames_in) = socket.split();

    let inbound = async move {
        while let Some(frame) = frames_in.next().await {
            let frame = frame.map_err(|err| AttachError::Remote(err.to_string()))?;
            match frame {
                Message::Binary(data) => remote_write.write_all(&data).await?,
                Message::Text(text) => remote_write.write_all(text.as_bytes()).await?,
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok::<(), AttachError>(())
    };

    let outbound = async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let n = remote_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            frames_out
                .send(Message::Binary(Bytes::copy_from_slice(&buf[..n])))
                .await
                .map_err(|err| AttachError::Remote(err.to_string()))?;
        }
        Ok::<(), AttachError>(())
    };

    tokio::select! {
        result = inbound => result,
        result = outbound => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use async_trait::async_trait;
    use axum::body::Body;
    use futures::channel::mpsc::{self, SendError, UnboundedReceiver, UnboundedSender};
    use pretty_assertions::assert_eq;

    use sandpit_api::{
        Api, ConditionBuilder, MachineInstance, MemoryStore, ObjectMeta, RawStore, Sandbox,
        SandboxKind, VirtualMachine,
    };
    use sandpit_api::workloads::{ContainerProcess, ContainerWorkloadSpec};

    use crate::directory::StoreDirectory;
    use crate::identity::ServiceIdentity;
    use crate::remote::BoxedStream;
    use crate::secrets::SecretCache;

    fn ready_sandbox(kind: Option<SandboxKind>) -> Sandbox {
        let mut metadata = ObjectMeta::named("demo", "team-a");
        metadata.uid = "u-1".to_string();
        let mut sandbox = Sandbox {
            metadata,
            ..Default::default()
        };
        sandbox.status.kind = kind;
        sandbox.status.conditions.push(
            ConditionBuilder::new(CONDITION_READY)
                .status(ConditionStatus::True)
                .reason("Ready")
                .build(),
        );
        sandbox
    }

    fn workload(processes: &[&str]) -> ContainerWorkload {
        ContainerWorkload {
            metadata: ObjectMeta::named("sandbox-u-1", "team-a"),
            spec: ContainerWorkloadSpec {
                processes: processes
                    .iter()
                    .map(|name| ContainerProcess {
                        name: name.to_string(),
                        image: "ubuntu:24.04".to_string(),
                        ..Default::default()
                    })
                    .collect(),
                volumes: Vec::new(),
            },
            ..Default::default()
        }
    }

    async fn directory(store: &Arc<MemoryStore>) -> StoreDirectory {
        StoreDirectory::new(store.clone() as Arc<dyn RawStore>)
    }

    #[tokio::test]
    async fn test_resolve_container_prefers_annotated_process() {
        let store = Arc::new(MemoryStore::new());
        Api::<Sandbox>::new(store.clone())
            .create(&ready_sandbox(Some(SandboxKind::Container)))
            .await
            .unwrap();
        let mut wl = workload(&["init", "shell"]);
        wl.metadata.annotations.insert(
            ANNOTATION_DEFAULT_PROCESS.to_string(),
            "shell".to_string(),
        );
        Api::<ContainerWorkload>::new(store.clone())
            .create(&wl)
            .await
            .unwrap();

        let target = resolve_target(&directory(&store).await, "team-a", "demo")
            .await
            .unwrap();
        assert_eq!(
            target,
            AttachTarget::Exec(ExecTarget {
                namespace: "team-a".to_string(),
                workload: "sandbox-u-1".to_string(),
                process: "shell".to_string(),
                command: vec![ATTACH_COMMAND.to_string()],
                tty: true,
            })
        );
    }

    #[tokio::test]
    async fn test_resolve_container_falls_back_to_first_process() {
        let store = Arc::new(MemoryStore::new());
        Api::<Sandbox>::new(store.clone())
            .create(&ready_sandbox(Some(SandboxKind::Container)))
            .await
            .unwrap();
        let mut wl = workload(&["init", "shell"]);
        wl.metadata.annotations.insert(
            ANNOTATION_DEFAULT_PROCESS.to_string(),
            "no-such-process".to_string(),
        );
        Api::<ContainerWorkload>::new(store.clone())
            .create(&wl)
            .await
            .unwrap();

        let target = resolve_target(&directory(&store).await, "team-a", "demo")
            .await
            .unwrap();
        let AttachTarget::Exec(exec) = target else {
            panic!("expected exec target");
        };
        assert_eq!(exec.process, "init");
    }

    #[tokio::test]
    async fn test_resolve_machine_instance_console_path() {
        let store = Arc::new(MemoryStore::new());
        Api::<Sandbox>::new(store.clone())
            .create(&ready_sandbox(Some(SandboxKind::MachineInstance)))
            .await
            .unwrap();
        Api::<MachineInstance>::new(store.clone())
            .create(&MachineInstance {
                metadata: ObjectMeta::named("sandbox-u-1", "team-a"),
                ..Default::default()
            })
            .await
            .unwrap();

        let target = resolve_target(&directory(&store).await, "team-a", "demo")
            .await
            .unwrap();
        assert_eq!(
            target,
            AttachTarget::Console {
                path: "/apis/instance.sandpit.io/v1/namespaces/team-a/machineinstances/sandbox-u-1/console".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_virtual_machine_proxy_path() {
        let store = Arc::new(MemoryStore::new());
        Api::<Sandbox>::new(store.clone())
            .create(&ready_sandbox(Some(SandboxKind::VirtualMachine)))
            .await
            .unwrap();
        Api::<VirtualMachine>::new(store.clone())
            .create(&VirtualMachine {
                metadata: ObjectMeta::named("sandbox-u-1", "team-a"),
                ..Default::default()
            })
            .await
            .unwrap();

        let target = resolve_target(&directory(&store).await, "team-a", "demo")
            .await
            .unwrap();
        assert_eq!(
            target,
            AttachTarget::Proxy {
                path: "/apis/machine.sandpit.io/v1/namespaces/team-a/virtualmachines/sandbox-u-1/console".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_sandbox_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = resolve_target(&directory(&store).await, "team-a", "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, AttachError::NotFound { name } if name == "ghost"));
    }

    #[tokio::test]
    async fn test_resolve_not_ready_sandbox_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut sandbox = ready_sandbox(Some(SandboxKind::Container));
        sandbox.status.conditions[0].status = ConditionStatus::False;
        Api::<Sandbox>::new(store.clone())
            .create(&sandbox)
            .await
            .unwrap();

        let err = resolve_target(&directory(&store).await, "team-a", "demo")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, AttachError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_resolve_without_detected_kind_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        Api::<Sandbox>::new(store.clone())
            .create(&ready_sandbox(None))
            .await
            .unwrap();

        let err = resolve_target(&directory(&store).await, "team-a", "demo")
            .await
            .unwrap_err();
        assert!(matches!(err, AttachError::UnknownKind { .. }));
    }

    #[tokio::test]
    async fn test_resolve_missing_compute_object_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        Api::<Sandbox>::new(store.clone())
            .create(&ready_sandbox(Some(SandboxKind::Container)))
            .await
            .unwrap();

        let err = resolve_target(&directory(&store).await, "team-a", "demo")
            .await
            .unwrap_err();
        assert!(matches!(err, AttachError::NotFound { name } if name == "sandbox-u-1"));
    }

    #[derive(Default)]
    struct RecordingRemote {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteConsole for RecordingRemote {
        async fn exec(
            &self,
            _target: &ExecTarget,
            _secrets: &crate::secrets::ServiceSecrets,
        ) -> Result<BoxedStream, AttachError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AttachError::Remote("unused".to_string()))
        }

        async fn console(
            &self,
            _path: &str,
            _secrets: &crate::secrets::ServiceSecrets,
        ) -> Result<BoxedStream, AttachError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AttachError::Remote("unused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_makes_no_outbound_connection_when_not_ready() {
        let store = Arc::new(MemoryStore::new());
        let mut sandbox = ready_sandbox(Some(SandboxKind::Container));
        sandbox.status.conditions[0].status = ConditionStatus::False;
        Api::<Sandbox>::new(store.clone())
            .create(&sandbox)
            .await
            .unwrap();

        let remote = Arc::new(RecordingRemote::default());
        let identity = ServiceIdentity::new("sandpit-system", "sandpit-console");
        let bridge = AttachBridge::new(
            Arc::new(StoreDirectory::new(store as Arc<dyn RawStore>)),
            remote.clone(),
            ConsoleProxy::new(
                reqwest::Url::parse("https://platform.internal").unwrap(),
                identity,
            ),
            Arc::new(SecretCache::default()),
        );

        let request = Request::builder().body(Body::empty()).unwrap();
        let err = bridge.dispatch("team-a", "demo", request).await.unwrap_err();
        assert!(matches!(err, AttachError::NotReady { .. }));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    // In-memory stand-in for a client WebSocket; frames pushed into `incoming`
    // arrive on the Stream side, frames the pump sends land in `outgoing`.
    struct FakeSocket {
        incoming: UnboundedReceiver<Result<Message, SendError>>,
        outgoing: UnboundedSender<Message>,
    }

    fn fake_socket() -> (
        FakeSocket,
        UnboundedSender<Result<Message, SendError>>,
        UnboundedReceiver<Message>,
    ) {
        let (frame_tx, incoming) = mpsc::unbounded();
        let (outgoing, frame_rx) = mpsc::unbounded();
        (FakeSocket { incoming, outgoing }, frame_tx, frame_rx)
    }

    impl Stream for FakeSocket {
        type Item = Result<Message, SendError>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.get_mut().incoming).poll_next(cx)
        }
    }

    impl Sink<Message> for FakeSocket {
        type Error = SendError;

        fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), SendError>> {
            Pin::new(&mut self.get_mut().outgoing).poll_ready(cx)
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), SendError> {
            Pin::new(&mut self.get_mut().outgoing).start_send(item)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), SendError>> {
            Pin::new(&mut self.get_mut().outgoing).poll_flush(cx)
        }

        fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), SendError>> {
            Pin::new(&mut self.get_mut().outgoing).poll_close(cx)
        }
    }

    #[tokio::test]
    async fn test_pump_bridges_frames_both_ways() {
        let (socket, frame_tx, mut frame_rx) = fake_socket();
        let (stream, mut far) = tokio::io::duplex(256);
        let task = tokio::spawn(pump(socket, stream));

        frame_tx
            .unbounded_send(Ok(Message::Binary(Bytes::from_static(b"ls\n"))))
            .unwrap();
        let mut buf = [0u8; 8];
        let n = far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ls\n");

        far.write_all(b"bin etc").await.unwrap();
        let frame = frame_rx.next().await.unwrap();
        assert_eq!(frame, Message::Binary(Bytes::from_static(b"bin etc")));

        frame_tx
            .unbounded_send(Ok(Message::Close(None)))
            .unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pump_writes_text_frames_as_bytes() {
        let (socket, frame_tx, _frame_rx) = fake_socket();
        let (stream, mut far) = tokio::io::duplex(256);
        let task = tokio::spawn(pump(socket, stream));

        frame_tx
            .unbounded_send(Ok(Message::Text("echo hi".into())))
            .unwrap();
        let mut buf = [0u8; 16];
        let n = far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"echo hi");

        drop(frame_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pump_ends_quietly_on_remote_eof() {
        let (socket, _frame_tx, _frame_rx) = fake_socket();
        let (stream, far) = tokio::io::duplex(256);
        let task = tokio::spawn(pump(socket, stream));

        drop(far);
        task.await.unwrap().unwrap();
    }
}
