use std::{
    collections::HashSet,
    sync::Mutex as StdMutex,
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ServerMessage, Topic};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Lifecycle of a hub connection.
///
/// `Connecting → Open → {Draining, Closed}`. Draining accepts no new
/// envelopes; in-flight writes complete within a bounded deadline before
/// the connection closes. Abrupt disconnects go straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, WebSocket upgrade not finished.
    Connecting,
    /// Fully established.
    Open,
    /// Close intent seen; flushing the queue.
    Draining,
    /// Gone. No replay buffer is kept.
    Closed,
}

/// One client connection as the hub sees it.
///
/// The outbound queue's receiving end is owned by the connection's writer
/// task; the hub only holds this handle.
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::Sender<ServerMessage>,
    /// `None` means the client never subscribed explicitly and receives
    /// every topic.
    topics: StdMutex<Option<HashSet<Topic>>>,
    state: StdMutex<ConnectionState>,
    cancel: CancellationToken,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ConnectionHandle {
    pub(super) fn new(id: u64, queue_capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        (
            Self {
                id,
                tx,
                topics: StdMutex::new(None),
                state: StdMutex::new(ConnectionState::Connecting),
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    /// The connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state poisoned")
    }

    /// Marks the connection open after the upgrade completes.
    pub fn mark_open(&self) {
        let mut state = self.state.lock().expect("connection state poisoned");
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
        }
    }

    /// Enters `Draining`: no new envelopes are accepted.
    pub fn drain(&self) {
        let mut state = self.state.lock().expect("connection state poisoned");
        if matches!(*state, ConnectionState::Connecting | ConnectionState::Open) {
            *state = ConnectionState::Draining;
        }
        self.cancel.cancel();
    }

    /// Marks the connection closed and wakes its writer.
    pub fn close(&self) {
        *self.state.lock().expect("connection state poisoned") = ConnectionState::Closed;
        self.cancel.cancel();
    }

    /// Token cancelled when the connection should wind down.
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Adds an explicit topic subscription.
    pub fn subscribe(&self, topic: Topic) {
        let mut topics = self.topics.lock().expect("topic set poisoned");
        topics.get_or_insert_with(HashSet::new).insert(topic);
    }

    /// Removes a topic subscription. An implicit receive-everything
    /// connection first materializes the full set.
    pub fn unsubscribe(&self, topic: Topic) {
        let mut topics = self.topics.lock().expect("topic set poisoned");
        let set = topics.get_or_insert_with(|| Topic::ALL.iter().copied().collect());
        set.remove(&topic);
    }

    /// Whether envelopes for `topic` should be delivered here.
    pub fn wants(&self, topic: Topic) -> bool {
        if self.state() != ConnectionState::Open && self.state() != ConnectionState::Connecting {
            return false;
        }
        let topics = self.topics.lock().expect("topic set poisoned");
        match topics.as_ref() {
            None => true,
            Some(set) => set.contains(&topic),
        }
    }

    /// Enqueues an envelope without blocking. Errors mean the queue is full
    /// (slow consumer) or the writer is gone.
    pub fn try_send(&self, message: ServerMessage) -> Result<(), ()> {
        if self.state() == ConnectionState::Draining || self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.tx.try_send(message).map_err(|_| ())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
