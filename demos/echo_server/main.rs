use std::env;
use std::sync::Arc;

use sunrpc::xdr::rpc::Credential;
use sunrpc::RpcServer;

/// Port number on which the echo server will listen, over TCP and UDP
const HOSTPORT: u32 = 11112;

/// Program number from the transient range (0x40000000 - 0x5fffffff)
const ECHO_PROGRAM: u32 = 0x4000_0e40;
const ECHO_VERSION: u32 = 1;

/// Demo RPC server with two procedures:
/// * 1 echoes its string argument
/// * 2 returns the length of its opaque argument, AUTH_UNIX callers only
///
/// Pass `--no-portmap` when no portmapper runs on this host.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let server = Arc::new(RpcServer::new(ECHO_PROGRAM, ECHO_VERSION));
    if env::args().any(|arg| arg == "--no-portmap") {
        server.set_registry(None);
    }

    server.register_with_name(1, |text: String| async move { anyhow::Ok(text) }, "ECHO");
    server.register_with_name(
        2,
        |data: Vec<u8>| async move { anyhow::Ok(u32::try_from(data.len())?) },
        "LENGTH",
    );
    server.set_authentication_hook(|proc, cred| proc != 2 || matches!(cred, Credential::Unix(_)));

    let addr = format!("0.0.0.0:{HOSTPORT}");
    println!("Starting echo server (program {ECHO_PROGRAM:#x}) on {addr}");

    let (tcp, udp) = tokio::join!(server.serve_tcp(&addr), server.serve_udp(&addr));
    tcp.unwrap();
    udp.unwrap();
}
