//! The peer's view of one connection

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;

/// Stable identity of a connection for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Accepted by our server; the remote sends scripts
    Inbound,
    /// Opened by `Peer::connect`; we send scripts
    Outbound,
}

/// A connected remote and the text exchanged with it
///
/// Histories are bounded; the oldest entries are dropped first.
#[derive(Debug, Clone)]
pub struct Client {
    id: ConnectionId,
    addr: SocketAddr,
    direction: Direction,
    sent: VecDeque<String>,
    received: VecDeque<String>,
    history_limit: usize,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr, direction: Direction, history_limit: usize) -> Self {
        Self {
            id,
            addr,
            direction,
            sent: VecDeque::new(),
            received: VecDeque::new(),
            history_limit,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Text sent to the remote, oldest first
    pub fn sent(&self) -> impl Iterator<Item = &str> {
        self.sent.iter().map(String::as_str)
    }

    /// Text received from the remote, oldest first
    pub fn received(&self) -> impl Iterator<Item = &str> {
        self.received.iter().map(String::as_str)
    }

    pub fn last_received(&self) -> Option<&str> {
        self.received.back().map(String::as_str)
    }

    pub(crate) fn record_sent(&mut self, text: &str) {
        push_bounded(&mut self.sent, text, self.history_limit);
    }

    pub(crate) fn record_received(&mut self, text: &str) {
        push_bounded(&mut self.received, text, self.history_limit);
    }
}

fn push_bounded(history: &mut VecDeque<String>, text: &str, limit: usize) {
    if limit == 0 {
        return;
    }
    while history.len() >= limit {
        history.pop_front();
    }
    history.push_back(text.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let mut client = Client::new(ConnectionId(3), addr, Direction::Inbound, 2);
        for text in ["1", "2", "3"] {
            client.record_received(text);
        }
        client.record_sent("1 2 3");

        assert_eq!(client.received().collect::<Vec<_>>(), vec!["2", "3"]);
        assert_eq!(client.sent().collect::<Vec<_>>(), vec!["1 2 3"]);
        assert_eq!(client.last_received(), Some("3"));
        assert_eq!(client.id().to_string(), "#3");
    }

    #[test]
    fn test_zero_limit_keeps_nothing() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut client = Client::new(ConnectionId(1), addr, Direction::Outbound, 0);
        client.record_sent("x");
        assert_eq!(client.sent().count(), 0);
    }
}
