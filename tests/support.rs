#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::task::JoinHandle;

use sunrpc::protocol::rpc::{ClientConfig, RpcClient, RpcServer, TransportPreference};
use sunrpc::tcp::{RpcListener, RpcTcpListener};
use sunrpc::udp::RpcUdpListener;

pub const ECHO_PROGRAM: u32 = 0x4000_0e40;
pub const ECHO_VERSION: u32 = 1;

/// Returns its string argument.
pub const PROC_ECHO: u32 = 6;
/// Returns the sum of a `u32` array.
pub const PROC_SUM: u32 = 7;
/// Always fails.
pub const PROC_FAIL: u32 = 8;
/// Sleeps for the given number of milliseconds, then returns.
pub const PROC_SLEEP: u32 = 9;
/// Returns the length of its opaque argument.
pub const PROC_LENGTH: u32 = 10;
/// A procedure number nothing is registered under.
pub const PROC_MISSING: u32 = 42;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Echo program without portmapper registration.
pub fn echo_server() -> Arc<RpcServer> {
    let server = RpcServer::new(ECHO_PROGRAM, ECHO_VERSION);
    server.set_registry(None);
    server.register_with_name(PROC_ECHO, |text: String| async move { anyhow::Ok(text) }, "ECHO");
    server.register_with_name(
        PROC_SUM,
        |values: Vec<u32>| async move { anyhow::Ok(values.iter().sum::<u32>()) },
        "SUM",
    );
    server.register_with_name(
        PROC_FAIL,
        |_: ()| async move { Err::<(), _>(anyhow::anyhow!("procedure failed on purpose")) },
        "FAIL",
    );
    server.register_with_name(
        PROC_SLEEP,
        |millis: u32| async move {
            tokio::time::sleep(Duration::from_millis(u64::from(millis))).await;
            anyhow::Ok(())
        },
        "SLEEP",
    );
    server.register_with_name(
        PROC_LENGTH,
        |data: Vec<u8>| async move { anyhow::Ok(u32::try_from(data.len())?) },
        "LENGTH",
    );
    Arc::new(server)
}

/// Serves `server` over TCP on an ephemeral loopback port.
pub async fn spawn_tcp(server: Arc<RpcServer>) -> (u16, JoinHandle<std::io::Result<()>>) {
    let listener = RpcTcpListener::bind("127.0.0.1:0", server).await.expect("bind tcp listener");
    let port = listener.get_listen_port();
    let handle = tokio::spawn(async move { listener.handle_forever().await });
    (port, handle)
}

/// Serves `server` over UDP on `addr`.
pub async fn spawn_udp(
    server: Arc<RpcServer>,
    addr: &str,
) -> (u16, JoinHandle<std::io::Result<()>>) {
    let listener = RpcUdpListener::bind(addr, server).await.expect("bind udp listener");
    let port = listener.get_listen_port();
    let handle = tokio::spawn(async move { listener.handle_forever().await });
    (port, handle)
}

pub fn client_config(transport: TransportPreference) -> ClientConfig {
    ClientConfig { transport, timeout: Duration::from_secs(2), ..ClientConfig::default() }
}

pub fn echo_client(port: u16, transport: TransportPreference) -> RpcClient {
    RpcClient::new(
        format!("127.0.0.1:{port}"),
        ECHO_PROGRAM,
        ECHO_VERSION,
        client_config(transport),
    )
}
