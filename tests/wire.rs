use sunrpc::protocol::rpc::{
    build_marker, encode_record, parse_marker, read_record, write_record, RpcError,
    MAX_RPC_RECORD_LENGTH,
};

fn marked(marker: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = marker.to_be_bytes().to_vec();
    buf.extend_from_slice(payload);
    buf
}

#[test]
fn builds_record_markers() {
    assert_eq!(build_marker(0, false), 0);
    assert_eq!(build_marker(0, true), 0x8000_0000);
    assert_eq!(build_marker(140190, false), 0x0002_239E);
    assert_eq!(build_marker(140190, true), 0x8002_239E);
    assert_eq!(build_marker(0x7FFF_FFFF, false), 0x7FFF_FFFF);
    assert_eq!(build_marker(0x7FFF_FFFF, true), 0xFFFF_FFFF);
}

#[test]
fn parses_record_markers() {
    assert_eq!(parse_marker(0), (0, false));
    assert_eq!(parse_marker(0x8000_0000), (0, true));
    assert_eq!(parse_marker(0x0002_239E), (140190, false));
    assert_eq!(parse_marker(0x8002_239E), (140190, true));
    assert_eq!(parse_marker(0x7FFF_FFFF), (0x7FFF_FFFF, false));
    assert_eq!(parse_marker(0xFFFF_FFFF), (0x7FFF_FFFF, true));
}

#[test]
fn encoded_record_is_marker_then_payload() {
    let record = encode_record(b"hello").expect("encode record");
    assert_eq!(record, marked(0x8000_0005, b"hello"));
}

#[tokio::test]
async fn reads_single_fragment_record() {
    let buf = marked(0x8000_0008, &[1, 2, 3, 4, 5, 6, 7, 8]);
    let record =
        read_record(&mut buf.as_slice(), MAX_RPC_RECORD_LENGTH).await.expect("read record");
    assert_eq!(record, vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[tokio::test]
async fn reads_back_to_back_records() {
    let mut buf = marked(0x8000_0004, b"abcd");
    buf.extend(marked(0x8000_0004, b"efgh"));
    let mut stream = buf.as_slice();

    let first = read_record(&mut stream, MAX_RPC_RECORD_LENGTH).await.expect("first record");
    let second = read_record(&mut stream, MAX_RPC_RECORD_LENGTH).await.expect("second record");
    assert_eq!(first, b"abcd");
    assert_eq!(second, b"efgh");
    assert!(stream.is_empty());
}

#[tokio::test]
async fn rejects_fragmented_record_without_consuming_it() {
    let buf = marked(0x0000_0004, b"abcd");
    let mut stream = buf.as_slice();

    let err = read_record(&mut stream, MAX_RPC_RECORD_LENGTH).await.expect_err("fragmented");
    assert!(matches!(err, RpcError::Fragmented), "unexpected error: {err:?}");
    assert_eq!(stream, b"abcd");
}

#[tokio::test]
async fn rejects_oversized_record() {
    let oversized = MAX_RPC_RECORD_LENGTH + 1;
    let buf = build_marker(oversized as u32, true).to_be_bytes();

    let err = read_record(&mut buf.as_slice(), MAX_RPC_RECORD_LENGTH).await.expect_err("oversize");
    assert!(err.to_string().contains("exceeds max"), "unexpected error: {err:?}");
    assert!(matches!(
        err,
        RpcError::RecordTooLarge { len, max } if len == oversized && max == MAX_RPC_RECORD_LENGTH
    ));
}

#[tokio::test]
async fn rejects_empty_record() {
    let buf = build_marker(0, true).to_be_bytes();
    let err = read_record(&mut buf.as_slice(), MAX_RPC_RECORD_LENGTH).await.expect_err("empty");
    assert!(matches!(err, RpcError::EmptyRecord), "unexpected error: {err:?}");
}

#[tokio::test]
async fn truncated_record_is_a_transport_error() {
    let buf = marked(0x8000_0010, b"short");
    let err = read_record(&mut buf.as_slice(), MAX_RPC_RECORD_LENGTH).await.expect_err("truncated");
    assert!(matches!(err, RpcError::Io(_)), "unexpected error: {err:?}");
    assert!(err.breaks_connection());
}

#[tokio::test]
async fn written_record_reads_back() {
    let (mut client, mut server) = tokio::io::duplex(64);
    write_record(&mut client, b"payload!").await.expect("write record");

    let record = read_record(&mut server, MAX_RPC_RECORD_LENGTH).await.expect("read record");
    assert_eq!(record, b"payload!");
}
