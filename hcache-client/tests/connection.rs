use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use hcache_client::{
    parse_response, ConnectionError, ConnectionPool, PoolConfig, RespValue, SetCondition,
};

type Handler = fn(usize, Vec<Vec<u8>>) -> Vec<u8>;

/// Accepts one connection and answers `expected_commands` requests.
async fn spawn_server(expected_commands: usize, handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = BytesMut::with_capacity(1024);
        for idx in 0..expected_commands {
            let args = read_command(&mut stream, &mut buf).await.expect("read command");
            let reply = handler(idx, args);
            stream.write_all(&reply).await.expect("write reply");
        }
    });

    addr
}

// Commands are RESP arrays of bulk strings, the same shape the parser reads.
async fn read_command(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Vec<Vec<u8>>> {
    loop {
        let parsed = parse_response(buf)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;
        if let Some(value) = parsed {
            return match value {
                RespValue::Array(items) => Ok(items
                    .into_iter()
                    .map(|item| match item {
                        RespValue::Bulk(Some(data)) => data,
                        _ => Vec::new(),
                    })
                    .collect()),
                _ => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array")),
            };
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        }
    }
}

fn config(addr: String) -> PoolConfig {
    PoolConfig {
        addr,
        max_connections: 1,
        connect_timeout: Some(Duration::from_secs(1)),
    }
}

#[tokio::test]
async fn set_get_roundtrip_over_tcp() {
    let addr = spawn_server(3, |idx, args| match idx {
        0 => {
            assert_eq!(args[0], b"SET");
            assert_eq!(args[1], b"app:user:42");
            assert_eq!(args[2], b"Alice");
            assert_eq!(args[3], b"EX");
            assert_eq!(args[4], b"900");
            assert_eq!(args.len(), 5);
            b"+OK\r\n".to_vec()
        }
        1 => {
            assert_eq!(args, vec![b"GET".to_vec(), b"app:user:42".to_vec()]);
            b"$5\r\nAlice\r\n".to_vec()
        }
        _ => {
            assert_eq!(args, vec![b"GET".to_vec(), b"missing".to_vec()]);
            b"$-1\r\n".to_vec()
        }
    })
    .await;

    let pool = ConnectionPool::connect_tcp(config(addr)).await.expect("pool");
    let conn = pool.get_connection().await.expect("connection");
    let written = conn
        .set_with_ttl(b"app:user:42", b"Alice", Duration::from_secs(900), SetCondition::Always)
        .await
        .expect("set");
    assert!(written);
    assert_eq!(conn.get(b"app:user:42").await.expect("get"), Some(b"Alice".to_vec()));
    assert_eq!(conn.get(b"missing").await.expect("get"), None);
    assert_eq!(conn.outstanding(), 0);
}

#[tokio::test]
async fn create_only_set_and_multi_delete() {
    let addr = spawn_server(2, |idx, args| {
        if idx == 0 {
            assert_eq!(args.last().map(Vec::as_slice), Some(&b"NX"[..]));
            b"$-1\r\n".to_vec()
        } else {
            assert_eq!(args[0], b"DEL");
            assert_eq!(args.len(), 3);
            b":1\r\n".to_vec()
        }
    })
    .await;

    let pool = ConnectionPool::connect_tcp(config(addr)).await.expect("pool");
    let conn = pool.get_connection().await.expect("connection");
    let written = conn
        .set_with_ttl(b"k", b"v", Duration::from_secs(60), SetCondition::IfAbsent)
        .await
        .expect("set");
    assert!(!written);
    assert_eq!(conn.delete(&[b"a", b"b"]).await.expect("del"), 1);
}

#[tokio::test]
async fn server_error_is_reported_without_closing() {
    let addr = spawn_server(2, |idx, _| {
        if idx == 0 {
            b"-ERR wrong type\r\n".to_vec()
        } else {
            b"+PONG\r\n".to_vec()
        }
    })
    .await;

    let pool = ConnectionPool::connect_tcp(config(addr)).await.expect("pool");
    let conn = pool.get_connection().await.expect("connection");
    match conn.get(b"k").await {
        Err(ConnectionError::Server { message }) => assert_eq!(message, "ERR wrong type"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(conn.ping().await.expect("ping"), b"PONG".to_vec());
}

#[tokio::test]
async fn peer_close_reconnects_on_next_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        drop(stream);
        let (mut stream, _) = listener.accept().await.expect("accept again");
        let mut buf = BytesMut::new();
        read_command(&mut stream, &mut buf).await.expect("read command");
        stream.write_all(b"+PONG\r\n").await.expect("write reply");
    });

    let pool = ConnectionPool::connect_tcp(config(addr)).await.expect("pool");
    let conn = pool.get_connection().await.expect("connection");
    assert!(matches!(conn.get(b"k").await, Err(ConnectionError::Io(_))));
    assert_eq!(conn.ping().await.expect("ping after reconnect"), b"PONG".to_vec());
}

/// Serves every accepted connection; the first command overall is answered late.
async fn spawn_slow_first_server(first_delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let delayed = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let delayed = Arc::clone(&delayed);
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                while read_command(&mut stream, &mut buf).await.is_ok() {
                    if !delayed.swap(true, Ordering::SeqCst) {
                        tokio::time::sleep(first_delay).await;
                    }
                    if stream.write_all(b"$1\r\nv\r\n").await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

#[tokio::test]
async fn caller_timeout_does_not_break_the_pool() {
    let addr = spawn_slow_first_server(Duration::from_millis(200)).await;
    let pool = ConnectionPool::connect_tcp(PoolConfig {
        max_connections: 2,
        ..config(addr)
    })
    .await
    .expect("pool");

    let conn = pool.get_connection().await.expect("connection");
    let timed_out = tokio::time::timeout(Duration::from_millis(20), conn.get(b"k")).await;
    assert!(timed_out.is_err());
    drop(conn);

    for _ in 0..10 {
        let conn = pool.get_connection().await.expect("connection");
        assert_eq!(conn.get(b"k").await.expect("get"), Some(b"v".to_vec()));
    }
}

#[tokio::test]
async fn disposed_connection_stays_closed() {
    let addr = spawn_slow_first_server(Duration::ZERO).await;
    let pool = ConnectionPool::connect_tcp(config(addr)).await.expect("pool");
    let conn = pool.get_connection().await.expect("connection");
    assert_eq!(conn.get(b"k").await.expect("get"), Some(b"v".to_vec()));

    pool.close().await;
    assert!(matches!(conn.get(b"k").await, Err(ConnectionError::Disposed)));
}

#[tokio::test]
async fn unreachable_address_fails_initialization() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let result = ConnectionPool::connect_tcp(config(addr)).await;
    assert!(matches!(result, Err(ConnectionError::Io(_))));
}

#[tokio::test]
async fn empty_address_is_invalid() {
    let result = ConnectionPool::connect_tcp(config(String::new())).await;
    assert!(matches!(result, Err(ConnectionError::InvalidAddress(_))));
}
