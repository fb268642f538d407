//! One live connection to a tool server
//!
//! A [`ServerLink`] multiplexes any number of concurrent requests over a
//! single byte stream. Each request registers a oneshot channel under a fresh
//! correlation id; a background reader task routes every response line to
//! the matching channel. Requests never wait on each other, only on the
//! short write of their own frame.
//!
//! When the stream ends the reader marks the link closed and fails every
//! pending request. Dropping the link aborts the reader and kills the child
//! process, if any.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::dialer::{BoxedReader, BoxedWriter, Connection};
use crate::protocol::{ErrorBody, Method, Request, Response, encode_frame};

/// How a request on a link ended, short of success
#[derive(Debug)]
pub enum LinkError {
    /// The connection is gone
    Closed(String),
    /// The deadline expired
    Timeout,
    /// The server answered with a structured error
    Remote(ErrorBody),
    /// The server's answer could not be understood
    Malformed(String),
}

type Reply = Result<Value, LinkError>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Multiplexed connection to one tool server
pub struct ServerLink {
    server_id: String,
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl ServerLink {
    /// Wrap an established connection and start its reader task.
    pub fn start(server_id: &str, connection: Connection) -> Self {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            server_id.to_string(),
            connection.reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        Self {
            server_id: server_id.to_string(),
            writer: tokio::sync::Mutex::new(connection.writer),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
            child: Mutex::new(connection.child),
        }
    }

    /// Whether the connection has been lost or closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send one request and wait for its response until `deadline`.
    ///
    /// Cancelling the returned future (or hitting the deadline) abandons only
    /// this request; a late response for it is discarded by the reader.
    pub async fn request(&self, method: Method, params: Value, deadline: Instant) -> Reply {
        if self.is_closed() {
            return Err(LinkError::Closed("connection already closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(&Request { id, method, params })
            .map_err(|e| LinkError::Malformed(format!("cannot encode request: {e}")))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        // Nothing has been written while waiting for the writer
        let Ok(mut writer) = tokio::time::timeout_at(deadline, self.writer.lock()).await else {
            return Err(LinkError::Timeout);
        };
        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout_at(deadline, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.mark_closed();
                return Err(LinkError::Closed(format!("write failed: {e}")));
            }
            Err(_) => {
                // A half-written frame would corrupt the stream for everyone
                self.mark_closed();
                return Err(LinkError::Timeout);
            }
        }
        drop(writer);
        tracing::trace!(server = %self.server_id, id, %method, "request sent");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(LinkError::Closed("connection lost".to_string())),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    /// Close the stream and stop the server process.
    pub async fn close(&self) {
        self.mark_closed();
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        self.reader.abort();
        let child = lock(&self.child).take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(server = %self.server_id, error = %e, "kill failed");
            }
        }
        tracing::debug!(server = %self.server_id, "link closed");
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for ServerLink {
    fn drop(&mut self) {
        self.reader.abort();
        // `kill_on_drop` reaps the child when the handle goes away
        lock(&self.child).take();
    }
}

/// Removes a request's pending entry however the request ends.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_loop(server_id: String, reader: BoxedReader, pending: Pending, closed: Arc<AtomicBool>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => dispatch(&server_id, &pending, &line),
            Ok(None) => {
                tracing::debug!(server = %server_id, "server closed the stream");
                break;
            }
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "read failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders fails every outstanding request
    let abandoned = std::mem::take(&mut *lock(&pending));
    if !abandoned.is_empty() {
        tracing::warn!(server = %server_id, in_flight = abandoned.len(), "connection lost with requests in flight");
    }
}

fn dispatch(server_id: &str, pending: &Pending, line: &str) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(server = %server_id, error = %e, "ignoring non-JSON line");
            return;
        }
    };
    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        tracing::warn!(server = %server_id, "ignoring frame without id");
        return;
    };
    let Some(tx) = lock(pending).remove(&id) else {
        tracing::debug!(server = %server_id, id, "discarding response for abandoned request");
        return;
    };

    let reply = match serde_json::from_value::<Response>(value) {
        Ok(Response {
            error: Some(error), ..
        }) => Err(LinkError::Remote(error)),
        Ok(Response {
            result: Some(result),
            ..
        }) => Ok(result),
        Ok(_) => Err(LinkError::Malformed(
            "response carries neither result nor error".to_string(),
        )),
        Err(e) => Err(LinkError::Malformed(e.to_string())),
    };
    // The requester may have given up in the meantime
    let _ = tx.send(reply);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn link_pair() -> (ServerLink, DuplexStream) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let (reader, writer) = tokio::io::split(client);
        let link = ServerLink::start(
            "test",
            Connection {
                reader: Box::new(reader),
                writer: Box::new(writer),
                child: None,
            },
        );
        (link, server)
    }

    fn in_a_second() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }

    #[tokio::test]
    async fn test_responses_routed_by_id() {
        let (link, server) = link_pair();
        let (read, mut write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            let first: Request = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let second: Request = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            // Answer in reverse order
            for request in [second, first] {
                let frame = encode_frame(&Response::success(request.id, request.params)).unwrap();
                write.write_all(&frame).await.unwrap();
            }
        });

        let (a, b) = tokio::join!(
            link.request(Method::CallTool, json!({"n": 1}), in_a_second()),
            link.request(Method::CallTool, json!({"n": 2}), in_a_second()),
        );
        assert_eq!(a.unwrap(), json!({"n": 1}));
        assert_eq!(b.unwrap(), json!({"n": 2}));
        assert!(lock(&link.pending).is_empty());
    }

    #[tokio::test]
    async fn test_deadline_cleans_up_pending() {
        let (link, _server) = link_pair();
        let deadline = Instant::now() + Duration::from_millis(30);
        let result = link.request(Method::ListTools, Value::Null, deadline).await;
        assert!(matches!(result, Err(LinkError::Timeout)));
        assert!(lock(&link.pending).is_empty());
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn test_deadline_waiting_for_writer_keeps_link_open() {
        let (link, server) = link_pair();
        let held = link.writer.lock().await;
        let deadline = Instant::now() + Duration::from_millis(30);
        let result = link.request(Method::ListTools, Value::Null, deadline).await;
        assert!(matches!(result, Err(LinkError::Timeout)));
        assert!(!link.is_closed());
        assert!(lock(&link.pending).is_empty());
        drop(held);

        // The stream is intact, so the next request goes through
        let (read, mut write) = tokio::io::split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            let request: Request = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let frame = encode_frame(&Response::success(request.id, json!({"ok": true}))).unwrap();
            write.write_all(&frame).await.unwrap();
        });
        let reply = link.request(Method::ListTools, Value::Null, in_a_second()).await;
        assert_eq!(reply.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_stream_end_fails_pending_and_closes() {
        let (link, server) = link_pair();
        let pending = link.request(Method::ListTools, Value::Null, in_a_second());
        let close = async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(server);
        };
        let (result, ()) = tokio::join!(pending, close);
        assert!(matches!(result, Err(LinkError::Closed(_))));
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn test_structured_error_and_malformed_response() {
        let (link, server) = link_pair();
        let (read, mut write) = tokio::io::split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            let first: Request = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let frame = encode_frame(&Response::failure(
                first.id,
                crate::protocol::ErrorCode::NotFound,
                "no such vpc",
            ))
            .unwrap();
            write.write_all(&frame).await.unwrap();
            let second: Request = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            write
                .write_all(format!("{{\"id\":{}}}\n", second.id).as_bytes())
                .await
                .unwrap();
        });

        let first = link.request(Method::CallTool, Value::Null, in_a_second()).await;
        match first {
            Err(LinkError::Remote(body)) => assert_eq!(body.message, "no such vpc"),
            other => panic!("unexpected {other:?}"),
        }
        let second = link.request(Method::CallTool, Value::Null, in_a_second()).await;
        assert!(matches!(second, Err(LinkError::Malformed(_))));
    }
}
