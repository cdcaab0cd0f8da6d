#![cfg(feature = "axum")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use futures::StreamExt;
use rust_sse_broker::{
    Broker, BrokerOptions, EventId, FiniteReplayProvider, Message, SseServer, SseServerOptions,
    SubscribeTopics,
};
use rust_sse_wire::{Event, Parser};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start(router: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, last_event_id: Option<&str>) -> reqwest::Response {
    let client = reqwest::Client::new();
    let mut request = client
        .get(format!("http://{addr}/events"))
        .header("Accept", "text/event-stream");
    if let Some(id) = last_event_id {
        request = request.header("Last-Event-ID", id);
    }
    request.send().await.expect("failed to connect")
}

/// Reads the response body until `count` events were parsed.
async fn collect_events(response: reqwest::Response, count: usize) -> Vec<Event> {
    let mut stream = response.bytes_stream();
    let mut parser = Parser::new();
    let mut events = Vec::new();
    while events.len() < count {
        let chunk = timeout(RECV_TIMEOUT, stream.next())
            .await
            .expect("timed out reading the event stream")
            .expect("stream ended early")
            .expect("transport error");
        events.extend(parser.feed(&chunk).unwrap());
    }
    events
}

fn msg(id: &str, text: &str) -> Message {
    Message::new().with_text(text).with_id(EventId::must(id))
}

#[tokio::test]
async fn streams_published_events_with_the_required_headers() {
    let broker = Arc::new(Broker::default());
    let server = Arc::new(SseServer::new(
        Arc::clone(&broker),
        SseServerOptions {
            allow_origin: Some("*".to_string()),
            ..Default::default()
        },
    ));
    let addr = start(server.routes("/events")).await;

    let response = connect(addr, None).await;
    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(
        headers.get("content-type").map(|v| v.as_bytes()),
        Some(b"text/event-stream" as &[u8])
    );
    assert_eq!(
        headers.get("cache-control").map(|v| v.as_bytes()),
        Some(b"no-cache" as &[u8])
    );
    assert_eq!(
        headers.get("access-control-allow-origin").map(|v| v.as_bytes()),
        Some(b"*" as &[u8])
    );

    broker.publish(msg("1", "hello")).await.unwrap();
    broker.publish(msg("2", "world")).await.unwrap();

    let events = collect_events(response, 2).await;
    assert_eq!(events[0].data, "hello");
    assert_eq!(events[0].last_event_id, EventId::must("1"));
    assert_eq!(events[1].data, "world");
    assert_eq!(events[1].last_event_id, EventId::must("2"));
}

#[tokio::test]
async fn the_last_event_id_header_triggers_replay() {
    let broker = Arc::new(Broker::new(BrokerOptions {
        replay_provider: Box::new(FiniteReplayProvider::new(8)),
        ..Default::default()
    }));
    for id in 1..=3 {
        broker
            .publish(msg(&id.to_string(), &format!("event {id}")))
            .await
            .unwrap();
    }

    let server = Arc::new(SseServer::new(
        Arc::clone(&broker),
        SseServerOptions {
            connection_buffer_size: 16,
            ..Default::default()
        },
    ));
    let addr = start(server.routes("/events")).await;

    let response = connect(addr, Some("1")).await;
    let events = collect_events(response, 2).await;
    assert_eq!(events[0].last_event_id, EventId::must("2"));
    assert_eq!(events[1].last_event_id, EventId::must("3"));
}

#[tokio::test]
async fn a_stopped_broker_yields_a_500() {
    let broker = Arc::new(Broker::default());
    broker.stop().unwrap();
    let server = Arc::new(SseServer::new(broker, SseServerOptions::default()));
    let addr = start(server.routes("/events")).await;

    let response = connect(addr, None).await;
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "provider is closed");
}

#[tokio::test]
async fn keep_alive_comments_are_sent_while_idle() {
    let broker = Arc::new(Broker::default());
    let server = Arc::new(SseServer::new(
        broker,
        SseServerOptions {
            ping_interval: Some(Duration::from_millis(30)),
            ..Default::default()
        },
    ));
    let addr = start(server.routes("/events")).await;

    let response = connect(addr, None).await;
    let mut stream = response.bytes_stream();
    let chunk = timeout(RECV_TIMEOUT, stream.next())
        .await
        .expect("timed out waiting for a keep-alive")
        .unwrap()
        .unwrap();
    assert!(chunk.starts_with(b":keep-alive\n"));
}

#[tokio::test]
async fn a_gone_client_is_unsubscribed() {
    let (disconnected_tx, mut disconnected_rx) = mpsc::unbounded_channel();
    let broker = Arc::new(Broker::default());
    let server = Arc::new(SseServer::new(
        Arc::clone(&broker),
        SseServerOptions {
            on_disconnect: Some(Arc::new(move |_info| {
                let _ = disconnected_tx.send(());
            })),
            ..Default::default()
        },
    ));
    let addr = start(server.routes("/events")).await;

    let response = connect(addr, None).await;
    drop(response);

    // publishing forces a write to the dead connection, which is how the
    // pump learns the client is gone
    let disconnected = async {
        loop {
            if broker.publish(msg("1", "probe")).await.is_err() {
                break;
            }
            if disconnected_rx.try_recv().is_ok() {
                break;
            }
            sleep(Duration::from_millis(25)).await;
        }
    };
    timeout(RECV_TIMEOUT, disconnected)
        .await
        .expect("the disconnect callback never fired");
}

#[tokio::test]
async fn topics_come_from_the_request_extension() {
    let broker = Arc::new(Broker::default());
    let server = Arc::new(SseServer::new(Arc::clone(&broker), SseServerOptions::default()));

    async fn pick_topic(mut request: Request, next: Next) -> Response {
        request
            .extensions_mut()
            .insert(SubscribeTopics(vec!["updates".to_string()]));
        next.run(request).await
    }

    let router = server
        .routes("/events")
        .layer(middleware::from_fn(pick_topic));
    let addr = start(router).await;

    let response = connect(addr, None).await;
    broker
        .publish(msg("1", "for the default topic"))
        .await
        .unwrap();
    broker
        .publish(msg("2", "for updates").with_topic("updates"))
        .await
        .unwrap();

    let events = collect_events(response, 1).await;
    assert_eq!(events[0].data, "for updates");
}
