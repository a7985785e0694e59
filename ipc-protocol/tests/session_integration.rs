use eval_core::ipc_messages::{TaskCommand, TaskEvent};
use ipc_protocol::{read_frame, write_frame, IpcTransport};
use tokio::net::UnixStream;

fn socket_path() -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eval-integration.sock");
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn full_handshake_then_close_sequence() {
    let path = socket_path();
    let transport = IpcTransport::bind(&path).unwrap();

    let client_path = path.clone();
    let client = tokio::spawn(async move {
        let mut stream = UnixStream::connect(&client_path).await.unwrap();

        let command_payload = read_frame(&mut stream).await.unwrap().unwrap();
        let command: TaskCommand = serde_json::from_slice(&command_payload).unwrap();
        let (task_id, otlp_endpoint) = match command {
            TaskCommand::SetTaskContext {
                task_id,
                otlp_endpoint,
                ..
            } => (task_id, otlp_endpoint),
            other => panic!("expected SetTaskContext, got {other:?}"),
        };
        assert_eq!(task_id, 42);
        assert!(!otlp_endpoint.is_empty());

        let confirmation = serde_json::to_vec(&TaskEvent::TaskContextConfirmation {
            success: true,
            error: None,
        })
        .unwrap();
        write_frame(&mut stream, &confirmation).await.unwrap();

        let close_payload = read_frame(&mut stream).await.unwrap().unwrap();
        let close: TaskCommand = serde_json::from_slice(&close_payload).unwrap();
        assert!(matches!(close, TaskCommand::CloseTask {}));
    });

    let mut session = transport.accept().await.unwrap();
    session
        .send(&TaskCommand::SetTaskContext {
            task_id: 42,
            roo_task_id: "agent-xyz".to_string(),
            run_id: 7,
            mcp_server: "filesystem".to_string(),
            user_intent: "solve two-fer".to_string(),
            otlp_endpoint: "http://127.0.0.1:4318".to_string(),
        })
        .await
        .unwrap();

    let confirmation = session.receive().await.unwrap().unwrap();
    assert_eq!(
        confirmation,
        TaskEvent::TaskContextConfirmation {
            success: true,
            error: None
        }
    );

    session.send(&TaskCommand::CloseTask {}).await.unwrap();
    session.close().await.unwrap();

    client.await.unwrap();
}

#[tokio::test]
async fn unknown_message_type_is_a_protocol_error_for_that_session() {
    let path = socket_path();
    let transport = IpcTransport::bind(&path).unwrap();

    let client_path = path.clone();
    tokio::spawn(async move {
        let mut stream = UnixStream::connect(&client_path).await.unwrap();
        let payload = serde_json::to_vec(&serde_json::json!({"type": "NotReal"})).unwrap();
        write_frame(&mut stream, &payload).await.unwrap();
    });

    let mut session = transport.accept().await.unwrap();
    let err = session.receive().await.unwrap_err();
    assert!(err.is_protocol());
}
