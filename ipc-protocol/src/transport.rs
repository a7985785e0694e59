use eval_core::{
    error::{EvalError, Result},
    ipc_messages::{TaskCommand, TaskEvent},
};
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    net::{UnixListener, UnixStream},
};

use crate::framing::{read_frame, write_frame};

/// Process-wide listener bound to a local stream socket, producing one
/// [`Session`] per accepted connection.
///
/// Binding removes a stale socket file left behind by a crashed prior
/// process — a fresh listener always wins over a dead one.
pub struct IpcTransport {
    listener: UnixListener,
}

impl IpcTransport {
    /// Bind a new transport at `socket_path`, replacing any stale socket
    /// file at that path.
    pub fn bind(socket_path: &str) -> Result<Self> {
        let path = std::path::Path::new(socket_path);
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| EvalError::Configuration(format!("failed to remove stale socket at {socket_path}: {e}")))?;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EvalError::Configuration(format!("failed to create socket directory {parent:?}: {e}"))
                })?;
            }
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| EvalError::Configuration(format!("failed to bind socket at {socket_path}: {e}")))?;

        Ok(Self { listener })
    }

    /// Accept the next connection. Callers apply their own handshake
    /// timeout around this call (the transport imposes none itself).
    pub async fn accept(&self) -> Result<Session> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| EvalError::Transient(format!("accept failed: {e}")))?;
        Ok(Session::new(stream))
    }
}

/// One accepted IPC connection, bound to one task.
///
/// `send`/`receive` preserve order within the session; no ordering is
/// implied across sessions. `close` is idempotent.
pub struct Session {
    read_half: Option<ReadHalf<UnixStream>>,
    write_half: Option<WriteHalf<UnixStream>>,
}

impl Session {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            read_half: Some(read_half),
            write_half: Some(write_half),
        }
    }

    /// Enqueue one outbound command.
    pub async fn send(&mut self, command: &TaskCommand) -> Result<()> {
        let writer = self
            .write_half
            .as_mut()
            .ok_or_else(|| EvalError::Protocol("session already closed".to_string()))?;

        let payload = serde_json::to_vec(command)
            .map_err(|e| EvalError::Internal(format!("failed to serialize TaskCommand: {e}")))?;
        write_frame(writer, &payload).await
    }

    /// Receive the next inbound event. Returns `Ok(None)` on clean
    /// disconnect. A malformed or unrecognized payload is a fatal protocol
    /// error for this session; the caller is expected to close it.
    pub async fn receive(&mut self) -> Result<Option<TaskEvent>> {
        let reader = self
            .read_half
            .as_mut()
            .ok_or_else(|| EvalError::Protocol("session already closed".to_string()))?;

        let Some(payload) = read_frame(reader).await? else {
            return Ok(None);
        };

        let event: TaskEvent = serde_json::from_slice(&payload).map_err(|e| {
            EvalError::Protocol(format!("malformed TaskEvent payload: {e}"))
        })?;
        Ok(Some(event))
    }

    /// Graceful half-close then full close. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.write_half.take() {
            let _ = writer.shutdown().await;
        }
        self.read_half.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eval_core::ipc_messages::{TaskCommand, TaskEvent};

    fn socket_path() -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval-test.sock");
        std::mem::forget(dir);
        path.to_string_lossy().into_owned()
    }

    /// Drives the agent side of a session using raw framing, since
    /// [`Session`] only models the orchestrator's send-command/receive-event
    /// direction.
    async fn agent_send_event(stream: &mut UnixStream, event: &TaskEvent) {
        let payload = serde_json::to_vec(event).unwrap();
        write_frame(stream, &payload).await.unwrap();
    }

    async fn agent_receive_command(stream: &mut UnixStream) -> TaskCommand {
        let payload = read_frame(stream).await.unwrap().unwrap();
        serde_json::from_slice(&payload).unwrap()
    }

    #[tokio::test]
    async fn accept_send_receive_round_trip() {
        let path = socket_path();
        let transport = IpcTransport::bind(&path).unwrap();

        let client_path = path.clone();
        let client = tokio::spawn(async move {
            let mut stream = UnixStream::connect(&client_path).await.unwrap();
            agent_send_event(
                &mut stream,
                &TaskEvent::TaskStarted {
                    roo_task_id: "agent-1".to_string(),
                },
            )
            .await;
            let command = agent_receive_command(&mut stream).await;
            assert!(matches!(command, TaskCommand::CloseTask {}));
        });

        let mut server_session = transport.accept().await.unwrap();
        let event = server_session.receive().await.unwrap().unwrap();
        assert!(matches!(event, TaskEvent::TaskStarted { .. }));
        server_session.send(&TaskCommand::CloseTask {}).await.unwrap();

        client.await.unwrap();
    }

    #[tokio::test]
    async fn receive_returns_none_on_clean_disconnect() {
        let path = socket_path();
        let transport = IpcTransport::bind(&path).unwrap();

        let client_path = path.clone();
        tokio::spawn(async move {
            let _stream = UnixStream::connect(&client_path).await.unwrap();
        });

        let mut session = transport.accept().await.unwrap();
        assert!(session.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_payload_is_a_protocol_error() {
        let path = socket_path();
        let transport = IpcTransport::bind(&path).unwrap();

        let client_path = path.clone();
        tokio::spawn(async move {
            let mut stream = UnixStream::connect(&client_path).await.unwrap();
            write_frame(&mut stream, b"not json").await.unwrap();
        });

        let mut session = transport.accept().await.unwrap();
        let err = session.receive().await.unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let path = socket_path();
        let transport = IpcTransport::bind(&path).unwrap();

        let client_path = path.clone();
        tokio::spawn(async move {
            let _stream = UnixStream::connect(&client_path).await.unwrap();
        });

        let mut session = transport.accept().await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_file() {
        let path = socket_path();
        let _first = IpcTransport::bind(&path).unwrap();
        let second = IpcTransport::bind(&path);
        assert!(second.is_ok());
    }
}
