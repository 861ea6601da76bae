//! Async channel to one extension process.
//!
//! `ProcessChannel` owns the child process for one provider binary and
//! multiplexes every resource operation for that namespace over its stdio.
//! A broken pipe fails every operation still routed through the channel;
//! the child is killed when the channel drops.

use super::dispatch::BinaryExtensionReference;
use super::protocol::{
    ExtensionResponse, HostRequest, OperationKind, OperationUpdate, ProvisioningState,
    PROTOCOL_VERSION,
};
use crate::core::compilation::lock;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// One resource operation handed to a channel.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub resource: String,
    pub resource_type: String,
    pub api_version: String,
    pub operation: OperationKind,
    pub properties: Value,
}

/// Transport seam between the orchestrator and an extension. Updates for a
/// submitted operation are streamed over the provided sender; every
/// submission gets at least one terminal update, from the extension or from
/// the channel's own failure path.
#[async_trait]
pub trait ExtensionChannel: Send + Sync {
    async fn initialize(&self) -> Result<(), String>;
    async fn submit(
        &self,
        request: OperationRequest,
        updates: mpsc::Sender<OperationUpdate>,
    ) -> Result<(), String>;
    async fn cancel(&self, resource: &str) -> Result<(), String>;
    async fn shutdown(&self) -> Result<(), String>;
}

type Routes = Arc<Mutex<FxHashMap<String, mpsc::Sender<OperationUpdate>>>>;

/// Channel over a spawned provider binary speaking JSON lines on stdio.
pub struct ProcessChannel {
    namespace: String,
    stdin: AsyncMutex<ChildStdin>,
    routes: Routes,
    init: AsyncMutex<Option<oneshot::Receiver<u32>>>,
    _child: Child,
}

impl ProcessChannel {
    /// Start the provider binary. The child is reaped via kill-on-drop, so
    /// an orchestrator bailing out early never leaks processes.
    pub fn spawn(reference: &BinaryExtensionReference) -> Result<Self, String> {
        let mut child = Command::new(&reference.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                format!(
                    "cannot start extension '{}' ({}): {}",
                    reference.namespace,
                    reference.binary.display(),
                    e
                )
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| format!("extension '{}': no stdin pipe", reference.namespace))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| format!("extension '{}': no stdout pipe", reference.namespace))?;

        let routes: Routes = Arc::new(Mutex::new(FxHashMap::default()));
        let (init_tx, init_rx) = oneshot::channel();
        spawn_reader(stdout, Arc::clone(&routes), init_tx);

        Ok(Self {
            namespace: reference.namespace.clone(),
            stdin: AsyncMutex::new(stdin),
            routes,
            init: AsyncMutex::new(Some(init_rx)),
            _child: child,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn write_line(&self, request: &HostRequest) -> Result<(), String> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| format!("extension '{}': encode failed: {}", self.namespace, e))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("extension '{}': channel write failed: {}", self.namespace, e))?;
        stdin
            .flush()
            .await
            .map_err(|e| format!("extension '{}': channel write failed: {}", self.namespace, e))
    }
}

/// Route incoming lines until EOF, then fail whatever is still in flight.
fn spawn_reader(stdout: ChildStdout, routes: Routes, init_tx: oneshot::Sender<u32>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut init_tx = Some(init_tx);
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(response) = serde_json::from_str::<ExtensionResponse>(&line) else {
                continue;
            };
            match response {
                ExtensionResponse::Initialized { version } => {
                    if let Some(tx) = init_tx.take() {
                        let _ = tx.send(version);
                    }
                }
                ExtensionResponse::Update {
                    resource,
                    state,
                    properties,
                    error,
                } => {
                    // Clone the sender out so the lock never spans an await
                    let sender = lock(&routes).get(&resource).cloned();
                    if let Some(sender) = sender {
                        let _ = sender
                            .send(OperationUpdate {
                                state,
                                properties,
                                error,
                            })
                            .await;
                    }
                    if state.is_terminal() {
                        lock(&routes).remove(&resource);
                    }
                }
            }
        }

        let pending: Vec<_> = lock(&routes).drain().collect();
        for (_, sender) in pending {
            let _ = sender
                .send(OperationUpdate {
                    state: ProvisioningState::Failed,
                    properties: None,
                    error: Some("extension channel closed".to_string()),
                })
                .await;
        }
    });
}

#[async_trait]
impl ExtensionChannel for ProcessChannel {
    async fn initialize(&self) -> Result<(), String> {
        self.write_line(&HostRequest::Initialize {
            version: PROTOCOL_VERSION,
        })
        .await?;
        let rx = self
            .init
            .lock()
            .await
            .take()
            .ok_or_else(|| format!("extension '{}': already initialized", self.namespace))?;
        match tokio::time::timeout(INITIALIZE_TIMEOUT, rx).await {
            Ok(Ok(_version)) => Ok(()),
            Ok(Err(_)) => Err(format!(
                "extension '{}': process exited during initialization",
                self.namespace
            )),
            Err(_) => Err(format!(
                "extension '{}': initialization timed out",
                self.namespace
            )),
        }
    }

    async fn submit(
        &self,
        request: OperationRequest,
        updates: mpsc::Sender<OperationUpdate>,
    ) -> Result<(), String> {
        lock(&self.routes).insert(request.resource.clone(), updates);
        let wire = HostRequest::Submit {
            resource: request.resource.clone(),
            resource_type: request.resource_type,
            api_version: request.api_version,
            operation: request.operation,
            properties: request.properties,
        };
        if let Err(e) = self.write_line(&wire).await {
            lock(&self.routes).remove(&request.resource);
            return Err(e);
        }
        Ok(())
    }

    async fn cancel(&self, resource: &str) -> Result<(), String> {
        self.write_line(&HostRequest::Cancel {
            resource: resource.to_string(),
        })
        .await
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.write_line(&HostRequest::Shutdown).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    /// Write a fake provider script and return its reference.
    fn fake_extension(dir: &tempfile::TempDir, body: &str) -> BinaryExtensionReference {
        let path = dir.path().join("provider.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{}", body).unwrap();
        drop(file);
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        BinaryExtensionReference {
            namespace: "Test.Ns".to_string(),
            binary: path,
        }
    }

    const ECHO_PROVIDER: &str = r#"
while read line; do
  case "$line" in
    *initialize*) echo '{"kind":"initialized","version":1}' ;;
    *submit*)
      echo '{"kind":"update","resource":"dns","state":"running"}'
      echo '{"kind":"update","resource":"dns","state":"succeeded","properties":{"nameServers":["ns1"]}}'
      ;;
    *shutdown*) exit 0 ;;
  esac
done
"#;

    fn dns_request() -> OperationRequest {
        OperationRequest {
            resource: "dns".to_string(),
            resource_type: "Microsoft.Network/dnsZones".to_string(),
            api_version: "2018-05-01".to_string(),
            operation: OperationKind::Create,
            properties: serde_json::json!({ "name": "name" }),
        }
    }

    #[tokio::test]
    async fn test_channel_initialize_submit_stream() {
        let dir = tempfile::tempdir().unwrap();
        let channel = ProcessChannel::spawn(&fake_extension(&dir, ECHO_PROVIDER)).unwrap();
        channel.initialize().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        channel.submit(dns_request(), tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.state, ProvisioningState::Running);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.state, ProvisioningState::Succeeded);
        assert_eq!(
            second.properties.unwrap()["nameServers"][0],
            serde_json::json!("ns1")
        );

        channel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_spawn_missing_binary_is_err() {
        let reference = BinaryExtensionReference {
            namespace: "Test.Ns".to_string(),
            binary: PathBuf::from("/nonexistent/provider"),
        };
        assert!(ProcessChannel::spawn(&reference).is_err());
    }

    #[tokio::test]
    async fn test_channel_eof_fails_pending_operations() {
        // Initializes, then dies on the first submit without answering
        let dir = tempfile::tempdir().unwrap();
        let body = r#"
while read line; do
  case "$line" in
    *initialize*) echo '{"kind":"initialized","version":1}' ;;
    *submit*) exit 1 ;;
  esac
done
"#;
        let channel = ProcessChannel::spawn(&fake_extension(&dir, body)).unwrap();
        channel.initialize().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        channel.submit(dns_request(), tx).await.unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.state, ProvisioningState::Failed);
        assert!(update.error.unwrap().contains("channel closed"));
    }

    #[tokio::test]
    async fn test_channel_initialize_failure_when_process_exits() {
        let dir = tempfile::tempdir().unwrap();
        let channel = ProcessChannel::spawn(&fake_extension(&dir, "exit 1")).unwrap();
        let err = channel.initialize().await.unwrap_err();
        assert!(err.contains("Test.Ns"));
    }
}
