//! Process-wide connection coordinator
//!
//! The peer owns the table of live connections, keyed by [`ConnectionId`].
//! Inbound connections are registered by the server on accept and served
//! there; outbound connections are opened by [`Peer::connect`] and carry
//! the scripts this process sends to remotes.

use crate::client::{Client, ConnectionId, Direction};
use crate::config::ServerConfig;
use crate::events::{Listeners, ResponseEvent};
use crate::tcp::{TcpReadWrapper, TcpWriteWrapper};
use crate::transport::{AsyncWriter, Pending, ResponseSlot, preview, reader_task};
use pyro_core::language::pi;
use pyro_core::{Continuation, PyroError, Registry, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, oneshot, watch};
use tracing::{debug, info, warn};

/// Sending half of an outbound connection
pub(crate) struct Remote {
    writer: AsyncMutex<Box<dyn AsyncWriter>>,
    pending: Pending,
}

struct Entry {
    client: Client,
    remote: Option<Arc<Remote>>,
    close: watch::Sender<bool>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<ConnectionId, Entry>,
    entered: Option<ConnectionId>,
}

/// Tracks live connections and addresses remotes
pub struct Peer {
    registry: Arc<Registry>,
    history_limit: usize,
    connect_timeout: Duration,
    table: Mutex<Table>,
    next_id: AtomicU64,
    connected: Listeners<Client>,
    received_response: Listeners<ResponseEvent>,
    disconnected: Listeners<Client>,
}

impl Peer {
    pub fn new(registry: Arc<Registry>, config: &ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            history_limit: config.history_limit,
            connect_timeout: config.connect_timeout(),
            table: Mutex::new(Table::default()),
            next_id: AtomicU64::new(1),
            connected: Listeners::new(),
            received_response: Listeners::new(),
            disconnected: Listeners::new(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Raised when a connection is added, in either direction
    pub fn on_connected(&self) -> &Listeners<Client> {
        &self.connected
    }

    /// Raised for every response read from an outbound connection
    pub fn on_received_response(&self) -> &Listeners<ResponseEvent> {
        &self.received_response
    }

    /// Raised once when a connection leaves the table
    pub fn on_disconnected(&self) -> &Listeners<Client> {
        &self.disconnected
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection to the table
    ///
    /// Returns its id and the receiver that flips when the connection is
    /// closed locally.
    pub(crate) fn new_connection(
        &self,
        addr: SocketAddr,
        direction: Direction,
        remote: Option<Arc<Remote>>,
    ) -> (ConnectionId, watch::Receiver<bool>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let client = Client::new(id, addr, direction, self.history_limit);
        let (close, closed) = watch::channel(false);
        self.table().entries.insert(
            id,
            Entry {
                client: client.clone(),
                remote,
                close,
            },
        );
        info!("Client {} connected ({:?}, {})", id, direction, addr);
        self.connected.emit(&client);
        (id, closed)
    }

    /// Drop a connection from the table and raise `on_disconnected`
    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Client> {
        let client = {
            let mut table = self.table();
            let entry = table.entries.remove(&id)?;
            if table.entered == Some(id) {
                table.entered = None;
            }
            entry.close.send_replace(true);
            entry.client
        };
        info!("Client {} disconnected", id);
        self.disconnected.emit(&client);
        Some(client)
    }

    /// Close a connection from this side
    pub fn close(&self, id: ConnectionId) -> bool {
        self.remove(id).is_some()
    }

    /// Close every connection
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.table().entries.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }

    /// Snapshot of one client
    pub fn client(&self, id: ConnectionId) -> Option<Client> {
        self.table().entries.get(&id).map(|e| e.client.clone())
    }

    /// Snapshot of every client, ordered by id
    pub fn clients(&self) -> Vec<Client> {
        let mut clients: Vec<Client> = self
            .table()
            .entries
            .values()
            .map(|e| e.client.clone())
            .collect();
        clients.sort_by_key(Client::id);
        clients
    }

    pub(crate) fn record_received(&self, id: ConnectionId, text: &str) {
        if let Some(entry) = self.table().entries.get_mut(&id) {
            entry.client.record_received(text);
        }
    }

    pub(crate) fn record_sent(&self, id: ConnectionId, text: &str) {
        if let Some(entry) = self.table().entries.get_mut(&id) {
            entry.client.record_sent(text);
        }
    }

    fn response_received(&self, id: ConnectionId, text: &str) {
        self.record_received(id, text);
        self.received_response.emit(&ResponseEvent {
            client: id,
            text: text.to_string(),
        });
    }

    /// Open an outbound connection to a Pyro server
    pub async fn connect(self: &Arc<Self>, host: &str, port: u16) -> Result<ConnectionId> {
        let addr = format!("{}:{}", host, port);
        info!("Connecting to {}", addr);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| PyroError::IpcError(format!("Connection timeout to {}", addr)))?
            .map_err(|e| PyroError::IpcError(format!("Failed to connect to {}: {}", addr, e)))?;

        // Disable Nagle's algorithm for low latency
        stream
            .set_nodelay(true)
            .map_err(|e| PyroError::IpcError(format!("Failed to set TCP_NODELAY: {}", e)))?;
        let remote_addr = stream
            .peer_addr()
            .map_err(|e| PyroError::IpcError(format!("Failed to read peer address: {}", e)))?;

        let (read_half, write_half) = stream.into_split();
        let writer: Box<dyn AsyncWriter> = Box::new(TcpWriteWrapper(write_half));
        let remote = Arc::new(Remote {
            writer: AsyncMutex::new(writer),
            pending: Pending::new(),
        });
        let pending = remote.pending.clone();
        let (id, closed) = self.new_connection(remote_addr, Direction::Outbound, Some(remote));

        let peer = Arc::downgrade(self);
        tokio::spawn(async move {
            let responses = peer.clone();
            reader_task(TcpReadWrapper(read_half), pending, closed, move |text| {
                if let Some(peer) = responses.upgrade() {
                    peer.response_received(id, text);
                }
            })
            .await;
            if let Some(peer) = peer.upgrade() {
                peer.remove(id);
            }
        });

        Ok(id)
    }

    /// Make `id`, or the newest outbound connection, the target of `execute`
    pub fn enter(&self, id: Option<ConnectionId>) -> Result<ConnectionId> {
        let mut table = self.table();
        let target = match id {
            Some(id) => match table.entries.get(&id) {
                Some(entry) if entry.remote.is_some() => id,
                Some(_) => {
                    return Err(PyroError::NotConnected(format!(
                        "{} is an inbound connection",
                        id
                    )));
                }
                None => return Err(PyroError::NotConnected(format!("no connection {}", id))),
            },
            None => table
                .entries
                .iter()
                .filter(|(_, entry)| entry.remote.is_some())
                .map(|(id, _)| *id)
                .max()
                .ok_or_else(|| PyroError::NotConnected("no outbound connection to enter".into()))?,
        };
        table.entered = Some(target);
        info!("Entered {}", target);
        Ok(target)
    }

    /// Return to local execution; yields the connection that was entered
    pub fn leave(&self) -> Option<ConnectionId> {
        let left = self.table().entered.take();
        if let Some(id) = left {
            info!("Left {}", id);
        }
        left
    }

    pub fn entered(&self) -> Option<ConnectionId> {
        self.table().entered
    }

    fn entered_or_err(&self) -> Result<ConnectionId> {
        self.entered()
            .ok_or_else(|| PyroError::NotConnected("no remote entered".into()))
    }

    fn remote(&self, id: ConnectionId) -> Result<Arc<Remote>> {
        match self.table().entries.get(&id) {
            Some(Entry {
                remote: Some(remote),
                ..
            }) => Ok(remote.clone()),
            Some(_) => Err(PyroError::NotConnected(format!(
                "{} is an inbound connection",
                id
            ))),
            None => Err(PyroError::NotConnected(format!("no connection {}", id))),
        }
    }

    /// Send script text to the entered remote without waiting
    pub async fn execute(&self, text: &str) -> Result<()> {
        let id = self.entered_or_err()?;
        self.execute_on(id, text).await
    }

    /// Send a continuation to the entered remote without waiting
    pub async fn continue_(&self, continuation: &Continuation) -> Result<()> {
        let id = self.entered_or_err()?;
        self.continue_on(id, continuation).await
    }

    /// Send script text to `id`; the response arrives as an event
    pub async fn execute_on(&self, id: ConnectionId, text: &str) -> Result<()> {
        self.send(id, text, None).await
    }

    /// Send a continuation to `id` as Pi text
    pub async fn continue_on(&self, id: ConnectionId, continuation: &Continuation) -> Result<()> {
        let text = pi::render(&self.registry, continuation);
        self.execute_on(id, &text).await
    }

    /// Send script text to `id` and wait for the encoded stack it returns
    pub async fn request(&self, id: ConnectionId, text: &str) -> Result<String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(id, text, Some(response_tx)).await?;
        response_rx
            .await
            .map_err(|_| PyroError::IpcError("Reader task died waiting for response".into()))?
    }

    async fn send(&self, id: ConnectionId, text: &str, slot: ResponseSlot) -> Result<()> {
        let remote = self.remote(id)?;
        {
            // Slots are queued under the writer lock so they match send order
            let mut writer = remote.writer.lock().await;
            remote.pending.push(slot);
            debug!("[Pyro→{}] len={} text={}", id, text.len(), preview(text.as_bytes()));
            if let Err(e) = writer.write_message(text.as_bytes()).await {
                warn!("Send to {} failed: {}", id, e);
                drop(writer);
                self.remove(id);
                return Err(e);
            }
        }
        self.record_sent(id, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::{read_frame, write_frame};
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    /// Replies to each frame with its text reversed
    async fn reversing_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Ok(data) = read_frame(&mut stream).await {
                let mut reply = data.clone();
                reply.reverse();
                if write_frame(&mut stream, &reply).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    fn peer() -> Arc<Peer> {
        Peer::new(Arc::new(Registry::new()), &ServerConfig::local())
    }

    #[tokio::test]
    async fn test_enter_requires_outbound_connection() {
        let peer = peer();
        assert!(matches!(peer.enter(None), Err(PyroError::NotConnected(_))));
        assert!(matches!(
            peer.enter(Some(ConnectionId(9))),
            Err(PyroError::NotConnected(_))
        ));
        assert!(matches!(
            peer.execute("1").await,
            Err(PyroError::NotConnected(_))
        ));
        assert_eq!(peer.leave(), None);
    }

    #[tokio::test]
    async fn test_request_pairs_responses_and_records_history() {
        let addr = reversing_server().await;
        let peer = peer();
        let responses = Arc::new(StdMutex::new(Vec::new()));
        let seen = responses.clone();
        let _subscription = peer.on_received_response().subscribe(move |event| {
            seen.lock().unwrap().push(event.text.clone());
        });

        let id = peer.connect("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(peer.enter(None).unwrap(), id);

        peer.execute("abc").await.unwrap();
        assert_eq!(peer.request(id, "123").await.unwrap(), "321");

        let client = peer.client(id).unwrap();
        assert_eq!(client.direction(), Direction::Outbound);
        assert_eq!(client.sent().collect::<Vec<_>>(), vec!["abc", "123"]);
        assert_eq!(client.received().collect::<Vec<_>>(), vec!["cba", "321"]);
        assert_eq!(*responses.lock().unwrap(), vec!["cba", "321"]);
    }

    #[tokio::test]
    async fn test_close_removes_client_once() {
        let addr = reversing_server().await;
        let peer = peer();
        let gone = Arc::new(StdMutex::new(Vec::new()));
        let seen = gone.clone();
        let _subscription = peer.on_disconnected().subscribe(move |client| {
            seen.lock().unwrap().push(client.id());
        });

        let id = peer.connect("127.0.0.1", addr.port()).await.unwrap();
        peer.enter(Some(id)).unwrap();
        assert!(peer.close(id));
        assert!(!peer.close(id));
        assert_eq!(peer.entered(), None);
        assert!(peer.clients().is_empty());
        assert!(matches!(
            peer.request(id, "x").await,
            Err(PyroError::NotConnected(_))
        ));

        tokio::task::yield_now().await;
        assert_eq!(*gone.lock().unwrap(), vec![id]);
    }
}
