//! End-to-end scenarios exercising the socket server, dispatcher, and
//! registry together over a real TCP loopback connection.

use std::sync::Arc;
use std::time::Duration;

use bolt_server::{ConnectionRegistry, MessageDispatcher, SocketServer};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server() -> (Arc<SocketServer>, Arc<MessageDispatcher>, std::net::SocketAddr) {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(registry.clone()));
    let server = Arc::new(SocketServer::new(registry));

    let dispatcher_for_frames = dispatcher.clone();
    server
        .register_handler(Arc::new(move |frame: Vec<u8>| {
            let dispatcher = dispatcher_for_frames.clone();
            tokio::spawn(async move {
                dispatcher.on_inbound(&frame).await;
            });
        }))
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let run_server = server.clone();
    tokio::spawn(async move {
        let _ = run_server.listen_on(listener).await;
    });

    (server, dispatcher, addr)
}

async fn connect_and_handshake(addr: std::net::SocketAddr, topics: &str, hostname: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let handshake = format!("{topics}:{hostname}\n");
    stream.write_all(handshake.as_bytes()).await.unwrap();
    stream
}

async fn read_one_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a frame")
        .unwrap();
    line.trim_end().to_string()
}

fn schema() -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("msg".to_string(), Value::String(String::new()));
    m
}

#[tokio::test]
async fn single_topic_echo_delivers_bound_payload() {
    let (_server, dispatcher, addr) = spawn_server().await;

    let client = connect_and_handshake(addr, "Test", "hostA").await;
    let (read_half, _write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    // Give the server a moment to process the handshake and register the client.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(dispatcher
        .register_message("ping", schema(), vec!["Test".to_string()])
        .await);

    let mut params = Map::new();
    params.insert("msg".to_string(), Value::String("hi".to_string()));
    let id = dispatcher.send_message("ping", params, |_| {}).await.unwrap();

    let line = read_one_line(&mut reader).await;
    let frame: bolt_server::message::WireFrame = serde_json::from_str(&line).unwrap();
    assert_eq!(frame.id, id.as_str());
    assert_eq!(frame.payload.get("msg"), Some(&Value::String("hi".to_string())));
}

#[tokio::test]
async fn unknown_parameter_is_rejected_before_any_send() {
    let (_server, dispatcher, addr) = spawn_server().await;
    let _client = connect_and_handshake(addr, "Test", "hostA").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    dispatcher
        .register_message("ping", schema(), vec!["Test".to_string()])
        .await;

    let mut params = Map::new();
    params.insert("other".to_string(), Value::from(1));
    let err = dispatcher
        .send_message("ping", params, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, bolt_server::BoltError::ParamMismatch(k) if k == "other"));
}

#[tokio::test]
async fn multi_topic_fan_out_reaches_every_subscriber_in_order() {
    let (_server, dispatcher, addr) = spawn_server().await;

    let client1 = connect_and_handshake(addr, "X", "h1").await;
    let client2 = connect_and_handshake(addr, "X,Y", "h2").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (r1, _w1) = client1.into_split();
    let (r2, _w2) = client2.into_split();
    let mut reader1 = BufReader::new(r1);
    let mut reader2 = BufReader::new(r2);

    dispatcher
        .register_message("m", schema(), vec!["X".to_string()])
        .await;

    let mut params = Map::new();
    params.insert("msg".to_string(), Value::String("broadcast".to_string()));
    dispatcher.send_message("m", params, |_| {}).await.unwrap();

    let line1 = read_one_line(&mut reader1).await;
    let line2 = read_one_line(&mut reader2).await;
    assert!(line1.contains("broadcast"));
    assert!(line2.contains("broadcast"));
}

#[tokio::test]
async fn topic_removal_requires_force_while_subscribed() {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(registry.clone()));
    let server = Arc::new(SocketServer::new(registry.clone()));

    let dispatcher_for_frames = dispatcher.clone();
    server
        .register_handler(Arc::new(move |frame: Vec<u8>| {
            let dispatcher = dispatcher_for_frames.clone();
            tokio::spawn(async move {
                dispatcher.on_inbound(&frame).await;
            });
        }))
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let run_server = server.clone();
    tokio::spawn(async move {
        let _ = run_server.listen_on(listener).await;
    });

    let _client = connect_and_handshake(addr, "Test", "hostA").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = registry.remove_topic("Test", false).await.unwrap_err();
    assert!(matches!(err, bolt_server::BoltError::TopicBusy(t) if t == "Test"));

    registry.remove_topic("Test", true).await.unwrap();
    assert!(registry.clients("Test").await.is_none());
}
