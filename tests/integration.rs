//! End-to-end tests: a real server on a loopback port driven by the client.

use bytes::Bytes;
use ordkv::client::{Client, ClientError};
use ordkv::commands::CommandEngine;
use ordkv::server::Server;
use ordkv::storage::{FsyncPolicy, Store};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

async fn start(store: Store) -> TestServer {
    let engine = Arc::new(CommandEngine::standard(Arc::new(store)));
    let server = Server::bind("127.0.0.1:0", engine).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run(async move {
        let _ = rx.await;
    }));

    TestServer {
        addr,
        _shutdown: tx,
    }
}

async fn client(server: &TestServer) -> Client {
    Client::connect(server.addr).await.unwrap()
}

/// Opens the store at `path` once the previous server has let go of it.
async fn reopen(path: &Path) -> Store {
    for _ in 0..100 {
        match Store::open(path, FsyncPolicy::Always) {
            Ok(store) => return store,
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("database at {} is still held open", path.display());
}

fn strings(items: Vec<Bytes>) -> Vec<String> {
    items
        .into_iter()
        .map(|b| String::from_utf8(b.to_vec()).unwrap())
        .collect()
}

fn server_error<T: std::fmt::Debug>(result: Result<T, ClientError>) -> String {
    match result {
        Err(ClientError::Server(message)) => message,
        other => panic!("expected a server error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_set_get_and_missing_key() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    c.set("name", "ariz").await.unwrap();
    assert_eq!(c.get("name").await.unwrap(), Bytes::from("ariz"));

    let message = server_error(c.get("nope").await);
    assert_eq!(message, "ERR no such key");

    // The connection survives an error reply
    c.ping().await.unwrap();
}

#[tokio::test]
async fn test_getset_mset_rename() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    assert_eq!(c.getset("k", "one").await.unwrap(), Bytes::new());
    assert_eq!(c.getset("k", "two").await.unwrap(), Bytes::from("one"));

    c.mset(&[("a", "1"), ("b", "2"), ("c", "3")]).await.unwrap();
    assert_eq!(c.get("b").await.unwrap(), Bytes::from("2"));

    c.rename("a", "z").await.unwrap();
    assert_eq!(c.exists(&["a"]).await.unwrap(), 0);
    assert_eq!(c.get("z").await.unwrap(), Bytes::from("1"));

    server_error(c.rename("missing", "other").await);
}

#[tokio::test]
async fn test_del_and_exists_counts() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    c.mset(&[("a", "1"), ("b", "2")]).await.unwrap();
    assert_eq!(c.exists(&["a", "b", "x", "a"]).await.unwrap(), 3);
    assert_eq!(c.del(&["a", "x"]).await.unwrap(), 1);
    assert_eq!(c.exists(&["a", "b"]).await.unwrap(), 1);

    assert_eq!(server_error(c.del(&[""]).await), "ERR empty key");
    assert_eq!(server_error(c.exists(&["b", ""]).await), "ERR empty key");
    assert_eq!(c.exists(&["b"]).await.unwrap(), 1);
}

#[tokio::test]
async fn test_large_values() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    let value = Bytes::from(vec![b'x'; 4 * 1024 * 1024]);
    c.set("big", value.clone()).await.unwrap();
    assert_eq!(c.strlen("big").await.unwrap(), value.len() as i64);
    assert_eq!(c.get("big").await.unwrap(), value);

    // The connection is still usable afterwards
    c.ping().await.unwrap();
}

#[tokio::test]
async fn test_append_strlen_incr() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    assert_eq!(c.append("log", "abc").await.unwrap(), 3);
    assert_eq!(c.append("log", "de").await.unwrap(), 5);
    assert_eq!(c.strlen("log").await.unwrap(), 5);
    assert_eq!(c.strlen("missing").await.unwrap(), 0);

    assert_eq!(c.incr("n").await.unwrap(), 1);
    assert_eq!(c.incrby("n", 41).await.unwrap(), 42);
    assert_eq!(c.incrby("n", -50).await.unwrap(), -8);

    let message = server_error(c.incr("log").await);
    assert_eq!(message, "ERR value is not an integer or out of range");
}

#[tokio::test]
async fn test_bits() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    assert_eq!(c.setbit("bits", 7, true).await.unwrap(), 0);
    assert_eq!(c.setbit("bits", 7, true).await.unwrap(), 1);
    assert_eq!(c.getbit("bits", 7).await.unwrap(), 1);
    assert_eq!(c.getbit("bits", 6).await.unwrap(), 0);
    assert_eq!(c.getbit("bits", 1000).await.unwrap(), 0);
    assert_eq!(c.get("bits").await.unwrap(), Bytes::from_static(&[0x01]));

    c.set("text", "foobar").await.unwrap();
    assert_eq!(c.bitcount("text").await.unwrap(), 26);
    assert_eq!(c.bitcount_range("text", 0, 0).await.unwrap(), 4);
    assert_eq!(c.bitcount_range("text", 1, 1).await.unwrap(), 6);
    assert_eq!(c.bitcount_range("text", -2, -1).await.unwrap(), 7);
    assert_eq!(c.bitcount("missing").await.unwrap(), 0);
}

#[tokio::test]
async fn test_range_scans() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    for key in ["a", "aa", "b", "c", "ca"] {
        c.set(key, format!("v-{}", key)).await.unwrap();
    }

    assert_eq!(strings(c.keys("a", "c", -1).await.unwrap()), ["aa", "b", "c"]);
    assert_eq!(strings(c.rkeys("a", "c", -1).await.unwrap()), ["c", "b", "aa"]);
    assert_eq!(strings(c.keys("a", "c", 2).await.unwrap()), ["aa", "b"]);
    assert!(c.keys("a", "c", 0).await.unwrap().is_empty());
    assert_eq!(
        strings(c.keys("", "", -1).await.unwrap()),
        ["a", "aa", "b", "c", "ca"]
    );
    assert_eq!(strings(c.keys("c", "", -1).await.unwrap()), ["ca"]);
    assert!(c.keys("c", "a", -1).await.unwrap().is_empty());

    let pairs = c.scan("", "b", -1).await.unwrap();
    assert_eq!(
        pairs,
        vec![
            (Bytes::from("a"), Bytes::from("v-a")),
            (Bytes::from("aa"), Bytes::from("v-aa")),
            (Bytes::from("b"), Bytes::from("v-b")),
        ]
    );

    let pairs = c.rscan("b", "", 1).await.unwrap();
    assert_eq!(pairs, vec![(Bytes::from("ca"), Bytes::from("v-ca"))]);
}

#[tokio::test]
async fn test_server_commands() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    assert_eq!(c.echo("hello").await.unwrap(), Bytes::from("hello"));

    let now = c.time().await.unwrap();
    let skew = SystemTime::now()
        .duration_since(now)
        .unwrap_or_else(|e| e.duration());
    assert!(skew < Duration::from_secs(5));

    c.set("k", "v").await.unwrap();
    let info = c.info().await.unwrap();
    assert!(info.contains("# Keyspace"));
    assert!(info.contains("keys:1"));

    let message = server_error(c.execute(["FLUSHALL"]).await);
    assert!(message.starts_with("ERR unknown command"));

    let message = server_error(c.execute(["GET"]).await);
    assert_eq!(message, "ERR wrong number of arguments for 'get' command");
}

#[tokio::test]
async fn test_commands_are_case_insensitive() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut c = client(&server).await;

    c.execute(["sEt", "k", "v"]).await.unwrap();
    let reply = c.execute(["get", "k"]).await.unwrap();
    assert_eq!(reply.as_bulk(), Some(&Bytes::from("v")));
}

#[tokio::test]
async fn test_quit_closes_connection() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut raw = TcpStream::connect(server.addr).await.unwrap();

    raw.write_all(b"*1\r\n$4\r\nQUIT\r\n*1\r\n$4\r\nPING\r\n")
        .await
        .unwrap();

    let mut received = Vec::new();
    raw.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"+OK\r\n");

    // Through the client as well
    let c = client(&server).await;
    c.quit().await.unwrap();
}

#[tokio::test]
async fn test_pipelined_and_inline_requests() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut raw = TcpStream::connect(server.addr).await.unwrap();

    raw.write_all(b"SET k v\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\nQUIT\r\n")
        .await
        .unwrap();

    let mut received = Vec::new();
    raw.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"+OK\r\n$1\r\nv\r\n+OK\r\n");
}

#[tokio::test]
async fn test_protocol_error_closes_connection() {
    let server = start(Store::in_memory().unwrap()).await;
    let mut raw = TcpStream::connect(server.addr).await.unwrap();

    raw.write_all(b"*1\r\n!oops\r\n").await.unwrap();

    let mut received = Vec::new();
    raw.read_to_end(&mut received).await.unwrap();
    assert!(received.starts_with(b"-ERR protocol error"));
}

#[tokio::test]
async fn test_concurrent_increments() {
    let server = start(Store::in_memory().unwrap()).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut c = Client::connect(addr).await.unwrap();
            for _ in 0..50 {
                c.incr("counter").await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut c = client(&server).await;
    assert_eq!(c.get("counter").await.unwrap(), Bytes::from("400"));
}

#[tokio::test]
async fn test_data_survives_restart() {
    let dir = tempdir().unwrap();

    {
        let server = start(Store::open(dir.path(), FsyncPolicy::Always).unwrap()).await;
        let mut c = client(&server).await;
        c.mset(&[("a", "1"), ("b", "2")]).await.unwrap();
        c.incrby("n", 7).await.unwrap();
        c.del(&["a"]).await.unwrap();
        c.quit().await.unwrap();
    }

    let server = start(reopen(dir.path()).await).await;
    let mut c = client(&server).await;
    assert_eq!(strings(c.keys("", "", -1).await.unwrap()), ["b", "n"]);
    assert_eq!(c.get("n").await.unwrap(), Bytes::from("7"));
}
