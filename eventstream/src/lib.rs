//! Server-Sent-Events subscription with automatic reconnection.
//!
//! The stream resumes with `Last-Event-ID` after a disconnect, honors the
//! server-provided `retry:` interval, and doubles its backoff on every
//! consecutive failure until an event gets through. Events and errors are
//! delivered on separate channels; errors are informational and never stop
//! the stream.

use core::time::Duration;

use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    StreamExt as _,
};
use log::debug;
use reqwest::{
    header::{ACCEPT, CACHE_CONTROL},
    redirect::Policy,
    Client, Response, StatusCode,
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};

mod decode;

pub use decode::Decoder;

pub const DEFAULT_RETRY: Duration = Duration::from_secs(3);
pub const MAX_REDIRECTS: usize = 10;

const LAST_EVENT_ID: &str = "Last-Event-ID";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("subscription rejected with status {code}: {message}")]
    Subscription { code: u16, message: String },
    #[error("stream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("stream ended")]
    Disconnected,
}

/// Builds an HTTP client with the redirect behavior the subscription
/// contract requires. `reqwest` re-sends non-sensitive request headers on
/// every hop, so `Accept` and `Last-Event-ID` survive redirects.
pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .redirect(Policy::limited(MAX_REDIRECTS))
        .build()
}

pub struct EventStream {
    pub events: UnboundedReceiver<EventRecord>,
    pub errors: UnboundedReceiver<StreamError>,
    shutdown: watch::Sender<bool>,
    reader: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Opens the subscription and spawns the reader task.
    /// `last_event_id`, when present, asks the server to replay missed events.
    #[must_use]
    pub fn subscribe(client: Client, url: String, last_event_id: Option<String>) -> Self {
        let (events_tx, events) = unbounded();
        let (errors_tx, errors) = unbounded();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reader = tokio::spawn(run_stream(
            client,
            url,
            last_event_id,
            events_tx,
            errors_tx,
            shutdown_rx,
        ));

        Self {
            events,
            errors,
            shutdown,
            reader: Some(reader),
        }
    }

    /// Cancels the in-flight request, waits for the reader task to drain and
    /// closes both output channels. Safe to call more than once.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);

        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }
}

async fn run_stream(
    client: Client,
    url: String,
    mut last_event_id: Option<String>,
    events_tx: UnboundedSender<EventRecord>,
    errors_tx: UnboundedSender<StreamError>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut retry = DEFAULT_RETRY;
    let mut backoff = retry;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match connect(&client, &url, last_event_id.as_deref()).await {
            Ok(response) => {
                let mut decoder = Decoder::new();
                let mut chunks = response.bytes_stream();

                loop {
                    let chunk = tokio::select! {
                        chunk = chunks.next() => chunk,
                        _ = shutdown.changed() => return,
                    };

                    match chunk {
                        Some(Ok(bytes)) => {
                            for record in decoder.push(&bytes) {
                                if let Some(value) = record.retry {
                                    retry = value;
                                }

                                if let Some(id) = &record.id {
                                    last_event_id = Some(id.clone());
                                }

                                // Receiving anything proves the connection is
                                // healthy again.
                                backoff = retry;

                                if events_tx.unbounded_send(record).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(error)) => {
                            let _ = errors_tx.unbounded_send(StreamError::Transport(error));
                            break;
                        }
                        None => {
                            let _ = errors_tx.unbounded_send(StreamError::Disconnected);
                            break;
                        }
                    }
                }
            }
            Err(error) => {
                let _ = errors_tx.unbounded_send(error);
            }
        }

        debug!("event stream disconnected, reconnecting in {backoff:?}");

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => return,
        }

        backoff = backoff.saturating_mul(2);
    }
}

async fn connect(
    client: &Client,
    url: &str,
    last_event_id: Option<&str>,
) -> Result<Response, StreamError> {
    let mut request = client
        .get(url)
        .header(CACHE_CONTROL, "no-cache")
        .header(ACCEPT, "text/event-stream");

    if let Some(id) = last_event_id {
        request = request.header(LAST_EVENT_ID, id);
    }

    let response = request.send().await?;
    let status = response.status();

    if status != StatusCode::OK {
        let message = response.text().await.unwrap_or_default();

        return Err(StreamError::Subscription {
            code: status.as_u16(),
            message,
        });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use httpmock::{Method, MockServer};

    use super::*;

    #[tokio::test]
    async fn resumes_with_last_event_id_after_disconnect() {
        let server = MockServer::start();

        // The initial connection delivers two events, the second one lowering
        // the retry interval, then the server closes the connection.
        server.mock(|when, then| {
            when.method(Method::GET)
                .path("/events")
                .header("accept", "text/event-stream")
                .matches(|request| {
                    !request
                        .headers
                        .iter()
                        .flatten()
                        .any(|(name, _)| name.eq_ignore_ascii_case(LAST_EVENT_ID))
                });
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("id: 1\ndata: first\n\nid: 2\nretry: 100\ndata: second\n\n");
        });

        let resumed = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/events")
                .header(LAST_EVENT_ID, "2");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("id: 3\ndata: third\n\n");
        });

        let client = build_client().expect("client should build");
        let mut stream =
            EventStream::subscribe(client, server.url("/events"), None);

        let first = stream.events.next().await.expect("first event");
        assert_eq!(first.data, "first");

        let second = stream.events.next().await.expect("second event");
        assert_eq!(second.id.as_deref(), Some("2"));
        assert_eq!(second.retry, Some(Duration::from_millis(100)));

        // The reconnect happens after the server-provided retry interval and
        // must carry the id of the last seen event.
        let third = stream.events.next().await.expect("resumed event");
        assert_eq!(third.data, "third");

        resumed.assert_hits(1);

        stream.close().await;
    }

    #[tokio::test]
    async fn rejected_subscription_reports_on_error_channel() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path("/events");
            then.status(503).body("overloaded");
        });

        let client = build_client().expect("client should build");
        let mut stream = EventStream::subscribe(client, server.url("/events"), None);

        match stream.errors.next().await.expect("error") {
            StreamError::Subscription { code, message } => {
                assert_eq!(code, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        stream.close().await;
        stream.close().await;
    }

    #[tokio::test]
    async fn follows_redirects_with_headers() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path("/moved");
            then.status(307)
                .header("location", server.url("/events"))
                .body("");
        });

        server.mock(|when, then| {
            when.method(Method::GET)
                .path("/events")
                .header("accept", "text/event-stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("id: 1\ndata: redirected\n\n");
        });

        let client = build_client().expect("client should build");
        let mut stream = EventStream::subscribe(client, server.url("/moved"), None);

        let event = stream.events.next().await.expect("event");
        assert_eq!(event.data, "redirected");

        stream.close().await;
    }
}
