use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::{Bytes, BytesMut};
use futures::stream;
use http::header::{
    HeaderMap, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE,
};
use http::StatusCode;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use rust_sse_wire::{EventId, Message};
use thiserror::Error;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval};
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::subscription::Subscription;

const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";
const DUPLEX_BUFFER_SIZE: usize = 8192;

// Keep-alive cadence unless configured otherwise (12 seconds)
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(12);

/// Callback invoked when a connection subscribes or goes away.
pub type ConnectionCallback = Arc<dyn Fn(&ConnectionInfo) + Send + Sync>;

/// Callback invoked when writing to a client fails mid-stream.
pub type WriteErrorCallback = Arc<dyn Fn(&io::Error) + Send + Sync>;

/// What the server knows about one SSE connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub last_event_id: EventId,
    pub topics: Vec<String>,
}

/// Request-extension fallback for the last seen event id, consulted when
/// the request carries no `Last-Event-ID` header. Middleware that restores
/// ids from elsewhere (a query parameter, a cookie) inserts it.
#[derive(Debug, Clone)]
pub struct LastEventIdFallback(pub EventId);

/// Request-extension carrying the topics to subscribe a connection to.
/// Absent means the default topic.
#[derive(Debug, Clone)]
pub struct SubscribeTopics(pub Vec<String>);

/// Configuration for an [`SseServer`].
pub struct SseServerOptions {
    /// Capacity of each connection's message channel. Zero (the default)
    /// means an effectively unbuffered connection that backpressures the
    /// broker; raise it past the expected replay depth to keep replay from
    /// stalling live delivery.
    pub connection_buffer_size: usize,
    /// Interval between keep-alive comment frames, which double as the
    /// only reliable disconnect probe for idle streams. `None` disables
    /// them.
    pub ping_interval: Option<Duration>,
    /// Value for `Access-Control-Allow-Origin`, omitted when `None`.
    pub allow_origin: Option<String>,
    pub on_connect: Option<ConnectionCallback>,
    pub on_disconnect: Option<ConnectionCallback>,
    pub on_write_error: Option<WriteErrorCallback>,
}

impl Default for SseServerOptions {
    fn default() -> Self {
        Self {
            connection_buffer_size: 0,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            allow_origin: None,
            on_connect: None,
            on_disconnect: None,
            on_write_error: None,
        }
    }
}

/// Upgrades HTTP requests into SSE streams fed from a [`Broker`].
///
/// Each connection gets its own channel, subscribed to the topics named by
/// the request (see [`SubscribeTopics`]), and a pump task that serializes
/// broker messages onto the response body, flushing after every event.
pub struct SseServer {
    broker: Arc<Broker>,
    options: SseServerOptions,
}

impl SseServer {
    pub fn new(broker: Arc<Broker>, options: SseServerOptions) -> Self {
        Self { broker, options }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// An axum router serving the SSE stream on `endpoint`.
    pub fn routes(self: Arc<Self>, endpoint: &str) -> Router {
        Router::new()
            .route(endpoint, get(handle_sse))
            .with_state(self)
    }

    /// Serves one SSE connection.
    ///
    /// Resolves the last seen event id (header first, then the
    /// [`LastEventIdFallback`] extension) and the topics, subscribes to the
    /// broker and returns the streaming response. Subscribe failures map
    /// to a 500 with the error's message.
    pub async fn serve(&self, request: Request) -> Result<Response, SseServerError> {
        let (parts, _body) = request.into_parts();

        let last_event_id = last_event_id_from(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<LastEventIdFallback>()
                    .map(|f| f.0.clone())
            })
            .unwrap_or_default();
        let topics = parts
            .extensions
            .get::<SubscribeTopics>()
            .map(|t| t.0.clone())
            .unwrap_or_default();

        let (sender, receiver) = mpsc::channel(self.options.connection_buffer_size.max(1));
        let token = CancellationToken::new();
        let subscription = Subscription::new(sender, last_event_id.clone(), topics);
        let info = ConnectionInfo {
            last_event_id,
            topics: subscription.topics.clone(),
        };

        // the pump drains the channel while replay fills it, so it must be
        // running before subscribe is awaited
        let (writer, reader) = duplex(DUPLEX_BUFFER_SIZE);
        let pump = ConnectionPump {
            receiver,
            token: token.clone(),
            ping_interval: self.options.ping_interval,
            on_write_error: self.options.on_write_error.clone(),
        };
        let on_disconnect = self.options.on_disconnect.clone();
        let pump_info = info.clone();
        tokio::spawn(async move {
            pump.run(writer).await;
            if let Some(callback) = on_disconnect {
                callback(&pump_info);
            }
        });

        if let Err(err) = self.broker.subscribe(token.clone(), subscription).await {
            token.cancel();
            return Err(SseServerError::Subscribe(err));
        }
        if let Some(callback) = &self.options.on_connect {
            callback(&info);
        }
        tracing::debug!(topics = ?info.topics, "sse connection subscribed");

        self.response(reader)
    }

    fn response(&self, reader: impl AsyncRead + Unpin + Send + Sync + 'static) -> Result<Response, SseServerError> {
        let body_stream = stream::unfold(reader, |mut reader| async move {
            let mut buf = BytesMut::with_capacity(DUPLEX_BUFFER_SIZE);
            match reader.read_buf(&mut buf).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(Frame::data(buf.freeze())), reader)),
                Err(err) => Some((Err(err), reader)),
            }
        });
        let body: http_body_util::combinators::BoxBody<Bytes, io::Error> =
            BodyExt::boxed(StreamBody::new(body_stream));

        let mut response = http::Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive");
        if let Some(origin) = &self.options.allow_origin {
            response = response.header(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        response
            .body(Body::new(body))
            .map_err(|err| SseServerError::Http(err.to_string()))
    }
}

async fn handle_sse(State(server): State<Arc<SseServer>>, request: Request) -> Response {
    match server.serve(request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn last_event_id_from(headers: &HeaderMap) -> Option<EventId> {
    let value = headers.get(LAST_EVENT_ID_HEADER)?.to_str().ok()?;
    if value.is_empty() {
        return None;
    }
    // header values cannot carry line terminators, so this cannot fail
    EventId::new(value).ok()
}

/// Errors surfaced to HTTP clients by [`SseServer::serve`].
#[derive(Debug, Error)]
pub enum SseServerError {
    #[error("{0}")]
    Subscribe(BrokerError),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl IntoResponse for SseServerError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Pumps broker messages into a byte sink, flushing after every event so
/// frames reach the client immediately.
///
/// The sink only needs to be an `AsyncWrite`; in the axum path it is one
/// half of a duplex pipe whose other half backs the response body. The
/// pump ends when the channel closes (unsubscribe or broker shutdown) or a
/// write fails (client gone); either way it cancels the subscription token
/// so the broker cleans up.
struct ConnectionPump {
    receiver: mpsc::Receiver<Arc<Message>>,
    token: CancellationToken,
    ping_interval: Option<Duration>,
    on_write_error: Option<WriteErrorCallback>,
}

impl ConnectionPump {
    async fn run<W: AsyncWrite + Unpin>(mut self, mut sink: W) {
        let keep_alive = {
            let mut ping = Message::new();
            ping.comment("keep-alive");
            ping.to_bytes()
        };
        let mut ping = self
            .ping_interval
            .filter(|d| !d.is_zero())
            .map(|d| interval_at(Instant::now() + d, d));

        loop {
            let frame = tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(message) => message.to_bytes(),
                    None => break,
                },
                _ = ping_tick(&mut ping) => keep_alive.clone(),
            };
            let result = async {
                sink.write_all(&frame).await?;
                sink.flush().await
            }
            .await;
            if let Err(err) = result {
                if let Some(callback) = &self.on_write_error {
                    callback(&err);
                }
                tracing::debug!(error = %err, "sse write failed, dropping connection");
                break;
            }
        }
        self.token.cancel();
    }
}

async fn ping_tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
