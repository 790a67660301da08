//! WebSocket subscription hub.
//!
//! The hub owns the set of live client connections and their topic index.
//! Each connection's outbound queue is a bounded channel owned by that
//! connection's writer task; publishers never block. A connection that
//! refuses to drain past queue capacity is dropped (slow-consumer policy).

mod connection;
mod message;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock as StdRwLock,
    },
};

use tokio::sync::mpsc;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use connection::*;
pub use message::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The connection registry and topic router.
pub struct Hub {
    connections: StdRwLock<HashMap<u64, Arc<ConnectionHandle>>>,
    next_id: AtomicU64,
    accepting: AtomicBool,
    queue_capacity: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Hub {
    /// Creates a hub whose per-connection queues hold `queue_capacity`
    /// envelopes.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: StdRwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            accepting: AtomicBool::new(true),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Registers a new connection, returning its handle and the receiving
    /// end of its outbound queue. Returns `None` while shutting down.
    pub fn register(&self) -> Option<(Arc<ConnectionHandle>, mpsc::Receiver<ServerMessage>)> {
        if !self.accepting.load(Ordering::Acquire) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, rx) = ConnectionHandle::new(id, self.queue_capacity);
        let handle = Arc::new(handle);
        self.connections
            .write()
            .expect("hub registry poisoned")
            .insert(id, handle.clone());
        tracing::info!(connection = id, total = self.connection_count(), "client connected");
        Some((handle, rx))
    }

    /// Removes a connection from the registry.
    pub fn unregister(&self, id: u64) {
        let removed = self
            .connections
            .write()
            .expect("hub registry poisoned")
            .remove(&id);
        if let Some(handle) = removed {
            handle.close();
            tracing::info!(connection = id, total = self.connection_count(), "client disconnected");
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().expect("hub registry poisoned").len()
    }

    /// Publishes an envelope to every connection subscribed to `topic`.
    ///
    /// Delivery is per-connection FIFO through the bounded queue. A full
    /// queue drops that connection rather than stalling the publisher.
    pub fn publish(&self, topic: Topic, message: &ServerMessage) {
        let targets: Vec<Arc<ConnectionHandle>> = {
            let connections = self.connections.read().expect("hub registry poisoned");
            connections
                .values()
                .filter(|handle| handle.wants(topic))
                .cloned()
                .collect()
        };

        for handle in targets {
            if handle.try_send(message.clone()).is_err() {
                tracing::warn!(connection = handle.id(), "slow consumer, dropping connection");
                self.unregister(handle.id());
            }
        }
    }

    /// Sends an envelope to one connection, applying the same slow-consumer
    /// policy.
    pub fn send_to(&self, handle: &ConnectionHandle, message: ServerMessage) {
        if handle.try_send(message).is_err() {
            tracing::warn!(connection = handle.id(), "slow consumer, dropping connection");
            self.unregister(handle.id());
        }
    }

    /// Whether new connections are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Refuses new connections and closes the existing ones.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        let connections: Vec<Arc<ConnectionHandle>> = {
            let map = self.connections.read().expect("hub registry poisoned");
            map.values().cloned().collect()
        };
        for handle in connections {
            handle.drain();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> ServerMessage {
        ServerMessage::Pong
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let hub = Hub::new(8);
        let (handle, mut rx) = hub.register().unwrap();
        handle.subscribe(Topic::Sites);

        hub.publish(Topic::Sites, &ServerMessage::Error { message: "one".to_string() });
        hub.publish(Topic::Sites, &ServerMessage::Error { message: "two".to_string() });

        match rx.recv().await.unwrap() {
            ServerMessage::Error { message } => assert_eq!(message, "one"),
            other => panic!("unexpected {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ServerMessage::Error { message } => assert_eq!(message, "two"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_not_delivered() {
        let hub = Hub::new(8);
        let (handle, mut rx) = hub.register().unwrap();
        handle.subscribe(Topic::Graph);

        hub.publish(Topic::Sites, &pong());
        hub.publish(Topic::Graph, &pong());

        // Only the graph envelope arrives.
        assert!(matches!(rx.recv().await, Some(ServerMessage::Pong)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fresh_connection_receives_all_topics() {
        let hub = Hub::new(8);
        let (_handle, mut rx) = hub.register().unwrap();
        hub.publish(Topic::Sites, &pong());
        hub.publish(Topic::Graph, &pong());
        assert!(matches!(rx.recv().await, Some(ServerMessage::Pong)));
        assert!(matches!(rx.recv().await, Some(ServerMessage::Pong)));
    }

    #[tokio::test]
    async fn test_slow_consumer_is_dropped_others_continue() {
        let hub = Hub::new(2);
        let (_slow, slow_rx) = hub.register().unwrap();
        let (_live, mut live_rx) = hub.register().unwrap();
        // The slow consumer never drains.
        std::mem::forget(slow_rx);

        for _ in 0..4 {
            hub.publish(Topic::Sites, &pong());
        }

        assert_eq!(hub.connection_count(), 1);
        // The healthy subscriber still receives envelopes.
        assert!(matches!(live_rx.recv().await, Some(ServerMessage::Pong)));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_connections() {
        let hub = Hub::new(8);
        let (handle, _rx) = hub.register().unwrap();
        hub.shutdown();
        assert!(hub.register().is_none());
        assert_eq!(handle.state(), ConnectionState::Draining);
    }
}
