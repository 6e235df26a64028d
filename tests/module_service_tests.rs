use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use modserve::config::{ExecConfig, StorageConfig};
use modserve::engine::{Executor, ASYNC_MARKER};
use modserve::error::WorkerError;
use modserve::fault::{fault_channel, FaultReceiver};
use modserve::grpc::{GrpcServer, ModuleServiceImpl, BUSY_MESSAGE};
use modserve::proto::module_service_client::ModuleServiceClient;
use modserve::proto::module_service_server::ModuleService;
use modserve::storage::MemoryStorage;
use modserve::wire::{Empty, InvocationRequest};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::{Code, Request};

fn shell(script: &str) -> ExecConfig {
    ExecConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        timeout: Duration::from_secs(10),
        ..ExecConfig::default()
    }
}

fn service(exec: ExecConfig) -> (ModuleServiceImpl, FaultReceiver) {
    let (faults, rx) = fault_channel();
    let executor = Executor::new(
        "acme/echo",
        exec,
        StorageConfig::default(),
        Arc::new(MemoryStorage::new()),
        faults.clone(),
    );
    (ModuleServiceImpl::new(executor, faults, 1024 * 1024), rx)
}

fn request(id: u64, stdin: &[u8]) -> InvocationRequest {
    InvocationRequest {
        id,
        module: "acme/echo".to_string(),
        stdin: stdin.to_vec(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_second_concurrent_invoke_is_rejected_busy() {
    let (service, _rx) = service(shell("sleep 1; cat"));
    let service = Arc::new(service);

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.invoke(Request::new(request(1, b"first"))).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = service.invoke(Request::new(request(2, b"second"))).await;
    let status = second.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(status.message(), BUSY_MESSAGE);

    let reply = first.await.unwrap().unwrap().into_inner();
    assert_eq!(reply.id, 1);
    assert_eq!(reply.exitcode, 0);
    assert_eq!(reply.stdout, b"first");
}

#[tokio::test]
async fn test_abandoned_call_keeps_gate_closed_until_command_exits() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls");
    let (service, _rx) = service(shell(&format!(
        "echo start >> {log}; sleep 1; echo end >> {log}",
        log = log.display()
    )));

    // Caller gives up long before the command finishes.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(300),
        service.invoke(Request::new(request(1, b""))),
    )
    .await;
    assert!(abandoned.is_err());

    let status = service
        .invoke(Request::new(request(2, b"")))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(status.message(), BUSY_MESSAGE);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "start\nend\n");

    let reply = service
        .invoke(Request::new(request(3, b"")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.id, 3);
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "start\nend\nstart\nend\n");
}

#[tokio::test]
async fn test_fire_and_forget_releases_gate_with_reply() {
    let (service, _rx) = service(shell(&format!(
        r#"[ -n "${ASYNC_MARKER}" ] && sleep 1; cat"#
    )));
    let mut req = request(4, b"");
    req.env.insert(ASYNC_MARKER.to_string(), "1".to_string());

    service.invoke(Request::new(req)).await.unwrap();

    let reply = service
        .invoke(Request::new(request(5, b"next")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.stdout, b"next");
}

#[tokio::test]
async fn test_gate_reopens_after_invoke() {
    let (service, _rx) = service(shell("cat"));

    for id in 0..3 {
        let reply = service
            .invoke(Request::new(request(id, b"x")))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.id, id);
    }
}

#[tokio::test]
async fn test_failing_command_is_a_normal_reply() {
    let (service, _rx) = service(shell("echo bad >&2; exit 2"));

    let reply = service
        .invoke(Request::new(request(5, b"")))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(reply.exitcode, 2);
    assert_eq!(reply.stderr, b"acme/echo: bad\n");
}

#[tokio::test]
async fn test_wedged_invoke_is_internal_and_reported() {
    let mut exec = shell("trap '' TERM; sleep 3");
    exec.timeout = Duration::from_millis(100);
    exec.kill_grace = Duration::from_secs(30);
    exec.watchdog_grace = Duration::from_millis(200);
    let (service, mut rx) = service(exec);

    let status = service
        .invoke(Request::new(request(6, b"")))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert!(matches!(rx.try_recv(), Ok(WorkerError::Wedged)));
}

#[tokio::test]
async fn test_ping_returns_pong() {
    let (service, _rx) = service(shell("cat"));

    let pong = service.ping(Request::new(Empty {})).await.unwrap().into_inner();

    assert_eq!(pong.val, "pong");
}

async fn connect(addr: SocketAddr) -> ModuleServiceClient<Channel> {
    let uri = format!("http://{addr}");
    for _ in 0..50 {
        if let Ok(client) = ModuleServiceClient::connect(uri.clone()).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server at {addr} did not come up");
}

#[tokio::test]
async fn test_grpc_round_trip_and_shutdown() {
    let addr: SocketAddr = "127.0.0.1:18651".parse().unwrap();
    let (service, _rx) = service(shell("cat"));
    let shutdown = CancellationToken::new();
    let server = GrpcServer::new(addr, service, None, 1024 * 1024);
    let handle = tokio::spawn(server.run(shutdown.clone()));

    let mut client = connect(addr).await;

    let pong = client.ping(Empty {}).await.unwrap().into_inner();
    assert_eq!(pong.val, "pong");

    let reply = client
        .invoke(request(42, b"hello"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.id, 42);
    assert_eq!(reply.exitcode, 0);
    assert_eq!(reply.stdout, b"hello");

    drop(client);
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();
}
