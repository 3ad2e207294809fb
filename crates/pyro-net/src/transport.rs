//! Transport abstractions for Pyro connections
//!
//! Provides AsyncReader/AsyncWriter traits for framed script text, and the
//! background reader that pairs responses with the requests that caused
//! them.

use async_trait::async_trait;
use pyro_core::{PyroError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, warn};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read a complete message from the transport
    /// Messages are length-prefixed: 4-byte little-endian length + UTF-8 text
    async fn read_message(&mut self) -> Result<Vec<u8>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send + Sync {
    /// Write a complete message to the transport
    /// Messages are length-prefixed: 4-byte little-endian length + UTF-8 text
    async fn write_message(&mut self, data: &[u8]) -> Result<()>;
}

/// Response slot for one outstanding request; `None` when nobody waits
pub type ResponseSlot = Option<oneshot::Sender<Result<String>>>;

/// Responses arrive in request order, so slots are served front first
#[derive(Clone, Default)]
pub struct Pending(Arc<Mutex<VecDeque<ResponseSlot>>>);

impl Pending {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, slot: ResponseSlot) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(slot);
    }

    fn pop(&self) -> Option<ResponseSlot> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Fail every outstanding request
    fn fail_all(&self, reason: &str) {
        let drained: Vec<ResponseSlot> = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for slot in drained.into_iter().flatten() {
            let _ = slot.send(Err(PyroError::IpcError(reason.to_string())));
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lossy preview of a message for logs
pub fn preview(data: &[u8]) -> String {
    String::from_utf8_lossy(data).chars().take(200).collect()
}

/// Background reader task for an outbound connection
///
/// This task:
/// - Receives responses from the remote via the transport
/// - Hands each response to `on_response` (history, events)
/// - Completes the oldest pending request with it
///
/// It exits when the remote disconnects or `closed` flips, failing every
/// request still waiting.
pub async fn reader_task<R, F>(
    mut reader: R,
    pending: Pending,
    mut closed: watch::Receiver<bool>,
    mut on_response: F,
) where
    R: AsyncReader,
    F: FnMut(&str) + Send,
{
    loop {
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    debug!("Connection closed locally, reader task exiting");
                    pending.fail_all("Connection closed");
                    break;
                }
            }

            msg_result = reader.read_message() => {
                match msg_result {
                    Ok(data) => {
                        debug!("[Remote→Pyro] len={} text={}", data.len(), preview(&data));
                        let text = String::from_utf8_lossy(&data).into_owned();
                        on_response(&text);

                        match pending.pop() {
                            Some(Some(response_tx)) => {
                                let _ = response_tx.send(Ok(text));
                            }
                            Some(None) => {}
                            None => warn!("Received response but no pending request"),
                        }
                    }
                    Err(e) => {
                        error!("Reader task failed: {}", e);
                        pending.fail_all("Connection lost");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct Scripted(VecDeque<Result<Vec<u8>>>);

    #[async_trait]
    impl AsyncReader for Scripted {
        async fn read_message(&mut self) -> Result<Vec<u8>> {
            match self.0.pop_front() {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_responses_complete_requests_in_order() {
        let reader = Scripted(VecDeque::from(vec![
            Ok(b"1".to_vec()),
            Ok(b"1 2".to_vec()),
            Ok(b"1 2 3".to_vec()),
            Err(PyroError::IpcError("eof".into())),
        ]));
        let pending = Pending::new();
        let (first_tx, first_rx) = oneshot::channel();
        let (third_tx, third_rx) = oneshot::channel();
        pending.push(Some(first_tx));
        pending.push(None);
        pending.push(Some(third_tx));

        let (seen_tx, seen_rx) = mpsc::channel();
        let (_closed_tx, closed_rx) = watch::channel(false);
        reader_task(reader, pending.clone(), closed_rx, move |text| {
            seen_tx.send(text.to_string()).unwrap();
        })
        .await;

        assert_eq!(first_rx.await.unwrap().unwrap(), "1");
        assert_eq!(third_rx.await.unwrap().unwrap(), "1 2 3");
        assert_eq!(seen_rx.try_iter().collect::<Vec<_>>(), vec!["1", "1 2", "1 2 3"]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_waiting_requests() {
        let pending = Pending::new();
        let (tx, rx) = oneshot::channel();
        pending.push(Some(tx));
        let (closed_tx, closed_rx) = watch::channel(false);

        let task = tokio::spawn(reader_task(
            Scripted(VecDeque::new()),
            pending,
            closed_rx,
            |_| {},
        ));
        closed_tx.send_replace(true);
        task.await.unwrap();

        assert!(matches!(rx.await.unwrap(), Err(PyroError::IpcError(_))));
    }
}
