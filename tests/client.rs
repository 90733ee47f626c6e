use std::io::Cursor;
use std::time::Duration;

mod support;

use tokio::net::TcpListener;
use tokio::time::timeout;

use sunrpc::protocol::rpc::{
    decode_reply, read_record, write_record, ClientConfig, RpcClient, RpcError, Transport,
    TransportPreference, MAX_UDP_DATAGRAM,
};
use sunrpc::tcp::RpcListener;
use sunrpc::udp::RpcUdpListener;
use sunrpc::xdr::rpc::{
    call_message, garbage_args_reply_message, make_success_reply, rpc_msg, rpc_vers_mismatch,
};
use sunrpc::xdr::{deserialize, to_bytes};

use support::{
    echo_client, echo_server, init_logging, spawn_tcp, spawn_udp, ECHO_PROGRAM, ECHO_VERSION,
    PROC_ECHO, PROC_FAIL, PROC_MISSING, PROC_SLEEP, PROC_SUM,
};

#[tokio::test]
async fn tcp_round_trip() {
    init_logging();
    let (port, _handle) = spawn_tcp(echo_server()).await;
    let client = echo_client(port, TransportPreference::TcpOnly);

    let echoed: String = client.call(PROC_ECHO, "hello").await.expect("echo");
    assert_eq!(echoed, "hello");
    let sum: u32 = client.call(PROC_SUM, &vec![40_u32, 2]).await.expect("sum");
    assert_eq!(sum, 42);
    assert_eq!(client.transport().await, Some(Transport::Tcp));
}

#[tokio::test]
async fn udp_round_trip() {
    init_logging();
    let (port, _handle) = spawn_udp(echo_server(), "127.0.0.1:0").await;
    let client = echo_client(port, TransportPreference::UdpOnly);

    let echoed: String = client.call(PROC_ECHO, "over udp").await.expect("echo");
    assert_eq!(echoed, "over udp");
    assert_eq!(client.transport().await, Some(Transport::Udp));
}

#[tokio::test]
async fn udp_listener_accepts_large_datagrams() {
    init_logging();
    let listener =
        RpcUdpListener::bind("127.0.0.1:0", echo_server()).await.expect("bind udp listener");
    assert!(listener.recv_buffer_size().expect("receive buffer size") >= MAX_UDP_DATAGRAM);
    let port = listener.get_listen_port();
    tokio::spawn(async move { listener.handle_forever().await });

    let client = echo_client(port, TransportPreference::UdpOnly);
    let text = "u".repeat(60_000);
    let echoed: String = client.call(PROC_ECHO, text.as_str()).await.expect("echo");
    assert_eq!(echoed, text);
}

#[tokio::test]
async fn udp_concurrent_dispatch_round_trip() {
    init_logging();
    let listener = RpcUdpListener::bind("127.0.0.1:0", echo_server())
        .await
        .expect("bind udp listener")
        .with_concurrent_dispatch(true);
    let port = listener.get_listen_port();
    tokio::spawn(async move { listener.handle_forever().await });

    let client = echo_client(port, TransportPreference::UdpOnly);
    for i in 0..8_u32 {
        let sum: u32 = client.call(PROC_SUM, &vec![i, i]).await.expect("sum");
        assert_eq!(sum, 2 * i);
    }
}

#[tokio::test]
async fn null_call_and_explicit_reconnect() {
    init_logging();
    let (port, _handle) = spawn_tcp(echo_server()).await;
    let client = echo_client(port, TransportPreference::TcpOnly);

    client.reconnect().await.expect("reconnect");
    let () = client.call(0, &()).await.expect("null right after reconnect");
    let () = client.call(0, &()).await.expect("null over the wire");
    assert_eq!(client.transport().await, Some(Transport::Tcp));
}

#[tokio::test]
async fn semantic_errors_keep_the_connection() {
    init_logging();
    let (port, _handle) = spawn_tcp(echo_server()).await;
    let client = echo_client(port, TransportPreference::TcpOnly);

    let err = client.call::<_, ()>(PROC_MISSING, &()).await.expect_err("unknown procedure");
    assert!(matches!(err, RpcError::ProcUnavail), "unexpected error: {err:?}");
    assert!(!err.is_retryable());
    assert_eq!(client.transport().await, Some(Transport::Tcp));

    let err = client
        .call_program::<_, ()>(ECHO_PROGRAM + 1, ECHO_VERSION, 0, &())
        .await
        .expect_err("unknown program");
    assert!(matches!(err, RpcError::ProgUnavail), "unexpected error: {err:?}");

    let err = client
        .call_program::<_, ()>(ECHO_PROGRAM, ECHO_VERSION + 1, 0, &())
        .await
        .expect_err("unknown version");
    assert!(matches!(err, RpcError::ProgMismatch { low: 1, high: 1 }), "unexpected error: {err:?}");
    assert_eq!(client.transport().await, Some(Transport::Tcp));

    let echoed: String = client.call(PROC_ECHO, "still here").await.expect("echo");
    assert_eq!(echoed, "still here");
}

#[tokio::test]
async fn system_error_drops_the_connection() {
    init_logging();
    let (port, _handle) = spawn_tcp(echo_server()).await;
    let client = echo_client(port, TransportPreference::TcpOnly);

    let err = client.call::<_, ()>(PROC_FAIL, &()).await.expect_err("failing procedure");
    assert!(matches!(err, RpcError::SystemErr), "unexpected error: {err:?}");
    assert_eq!(client.transport().await, None);

    let echoed: String = client.call(PROC_ECHO, "again").await.expect("echo after reconnect");
    assert_eq!(echoed, "again");
}

#[tokio::test]
async fn falls_back_to_udp_when_tcp_probe_fails() {
    init_logging();

    // UDP echo server and a TCP listener that hangs up on everyone, same port
    let mut attempts = 0;
    let (udp, tcp) = loop {
        attempts += 1;
        let udp = RpcUdpListener::bind("127.0.0.1:0", echo_server()).await.expect("bind udp");
        match TcpListener::bind(("127.0.0.1", udp.get_listen_port())).await {
            Ok(tcp) => break (udp, tcp),
            Err(e) if attempts < 8 => eprintln!("tcp port taken, retrying: {e}"),
            Err(e) => panic!("cannot pair tcp and udp ports: {e}"),
        }
    };
    let port = udp.get_listen_port();
    tokio::spawn(async move { udp.handle_forever().await });
    tokio::spawn(async move {
        while let Ok((socket, _)) = tcp.accept().await {
            drop(socket);
        }
    });

    let client = echo_client(port, TransportPreference::TcpThenUdp);
    let echoed: String = client.call(PROC_ECHO, "fallback").await.expect("echo");
    assert_eq!(echoed, "fallback");
    assert_eq!(client.transport().await, Some(Transport::Udp));
}

#[tokio::test]
async fn cannot_connect_without_server() {
    init_logging();
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        probe.local_addr().expect("local addr").port()
    };
    let client = echo_client(port, TransportPreference::TcpOnly);

    let err = client.call::<_, ()>(0, &()).await.expect_err("nothing listens");
    assert!(matches!(err, RpcError::CannotConnect), "unexpected error: {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn slow_reply_times_out() {
    init_logging();
    let (port, _handle) = spawn_tcp(echo_server()).await;
    let config = ClientConfig {
        transport: TransportPreference::TcpOnly,
        timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    };
    let client = RpcClient::new(format!("127.0.0.1:{port}"), ECHO_PROGRAM, ECHO_VERSION, config);

    let err = client.call::<_, ()>(PROC_SLEEP, &2_000_u32).await.expect_err("too slow");
    assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_millis(200)));
    assert_eq!(client.transport().await, None);
}

#[tokio::test]
async fn slow_connection_does_not_block_others() {
    init_logging();
    let (port, _handle) = spawn_tcp(echo_server()).await;
    let slow = echo_client(port, TransportPreference::TcpOnly);
    let fast = echo_client(port, TransportPreference::TcpOnly);

    let sleeper = tokio::spawn(async move { slow.call::<_, ()>(PROC_SLEEP, &1_000_u32).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let echoed: String = timeout(Duration::from_millis(500), fast.call(PROC_ECHO, "quick"))
        .await
        .expect("fast call blocked")
        .expect("echo");
    assert_eq!(echoed, "quick");
    sleeper.await.expect("join").expect("sleep");
}

#[tokio::test]
async fn mismatched_xid_is_rejected() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    // answers the probe correctly, then replies with the wrong xid
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut answered = 0_u32;
        while let Ok(record) = read_record(&mut socket, 1024).await {
            let call = deserialize::<rpc_msg>(&mut Cursor::new(record)).expect("call");
            let xid = if answered == 0 { call.xid } else { call.xid.wrapping_add(1) };
            let reply = to_bytes(&make_success_reply(xid)).expect("reply");
            write_record(&mut socket, &reply).await.expect("write reply");
            answered += 1;
        }
    });

    let client = echo_client(port, TransportPreference::TcpOnly);
    let err = client.call::<_, ()>(PROC_ECHO, "x").await.expect_err("wrong xid");
    match err {
        RpcError::InvalidXid { expected, got } => assert_eq!(got, expected.wrapping_add(1)),
        err => panic!("unexpected error: {err:?}"),
    }
    assert_eq!(client.transport().await, None);
}

#[test]
fn decode_reply_checks_xid_and_type() {
    let reply = to_bytes(&make_success_reply(6)).expect("reply");
    let err = decode_reply::<()>(5, &reply).expect_err("xid 6 is not 5");
    assert!(matches!(err, RpcError::InvalidXid { expected: 5, got: 6 }));
    assert!(err.breaks_connection());

    let call = to_bytes(&call_message(5, 1, 1, 0, Default::default())).expect("call");
    let err = decode_reply::<()>(5, &call).expect_err("a call is not a reply");
    assert!(matches!(err, RpcError::InvalidReplyType));
}

#[test]
fn decode_reply_maps_rejections() {
    let reply = to_bytes(&rpc_vers_mismatch(3)).expect("reply");
    let err = decode_reply::<()>(3, &reply).expect_err("rpc version mismatch");
    assert!(matches!(err, RpcError::RpcMismatch { low: 2, high: 2 }), "unexpected error: {err:?}");
    assert!(!err.breaks_connection());

    let reply = to_bytes(&garbage_args_reply_message(4)).expect("reply");
    let err = decode_reply::<()>(4, &reply).expect_err("garbage args");
    assert!(matches!(err, RpcError::GarbageArgs), "unexpected error: {err:?}");
    assert!(!err.breaks_connection());
}

#[test]
fn unknown_reply_status_breaks_the_connection() {
    // xid 5, REPLY, MSG_DENIED, reject stat 2
    let denied = words(&[5, 1, 1, 2]);
    let err = decode_reply::<()>(5, &denied).expect_err("unknown reject stat");
    assert!(matches!(err, RpcError::MalformedHeader(_)), "unexpected error: {err:?}");
    assert!(err.breaks_connection());

    // xid 6, REPLY, MSG_ACCEPTED, null verifier, accept stat 7
    let accepted = words(&[6, 1, 0, 0, 0, 7]);
    let err = decode_reply::<()>(6, &accepted).expect_err("unknown accept stat");
    assert!(matches!(err, RpcError::MalformedHeader(_)), "unexpected error: {err:?}");
    assert!(err.breaks_connection());
}

fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_be_bytes()).collect()
}

#[tokio::test]
async fn garbage_args_keep_the_connection() {
    init_logging();
    let (port, _handle) = spawn_tcp(echo_server()).await;
    let client = echo_client(port, TransportPreference::TcpOnly);

    // a string length with no string behind it
    let err = client.call::<_, String>(PROC_ECHO, &64_u32).await.expect_err("garbage args");
    assert!(matches!(err, RpcError::GarbageArgs), "unexpected error: {err:?}");
    assert_eq!(client.transport().await, Some(Transport::Tcp));

    let echoed: String = client.call(PROC_ECHO, "fine").await.expect("echo");
    assert_eq!(echoed, "fine");
}

#[tokio::test]
async fn oversized_record_closes_the_connection() {
    init_logging();
    let server = echo_server();
    server.set_max_record_len(128);
    let (port, _handle) = spawn_tcp(server).await;
    let client = echo_client(port, TransportPreference::TcpOnly);

    let err = client
        .call::<_, String>(PROC_ECHO, "x".repeat(512).as_str())
        .await
        .expect_err("too big");
    assert!(err.is_retryable(), "unexpected error: {err:?}");
    let echoed: String = client.call(PROC_ECHO, "small").await.expect("echo");
    assert_eq!(echoed, "small");
}

#[tokio::test]
async fn close_is_idempotent() {
    init_logging();
    let (port, _handle) = spawn_tcp(echo_server()).await;
    let client = echo_client(port, TransportPreference::TcpOnly);

    client.close().await;
    let echoed: String = client.call(PROC_ECHO, "one").await.expect("echo");
    assert_eq!(echoed, "one");
    client.close().await;
    client.close().await;
    assert_eq!(client.transport().await, None);
    let echoed: String = client.call(PROC_ECHO, "two").await.expect("echo after close");
    assert_eq!(echoed, "two");
}

#[tokio::test]
async fn server_close_stops_listener_and_connections() {
    init_logging();
    let server = echo_server();
    let (port, handle) = spawn_tcp(server.clone()).await;
    let client = echo_client(port, TransportPreference::TcpOnly);
    let echoed: String = client.call(PROC_ECHO, "before").await.expect("echo");
    assert_eq!(echoed, "before");

    server.close();
    assert!(server.is_closed());
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("listener did not stop")
        .expect("join")
        .expect("listener result");

    let err = client.call::<_, String>(PROC_ECHO, "after").await.expect_err("server closed");
    assert!(err.is_retryable(), "unexpected error: {err:?}");
}
