use crate::{Inbound, Outbound, Result};
use tokio::sync::mpsc::UnboundedSender;

/// Connection lifecycle as seen by the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Asynchronous notifications produced by a channel backend.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Opened,
    Message(Inbound),
    Closed,
    Error(String),
}

/// Where a channel delivers its notifications (the `on-message`/`on-close`/`on-error` hooks).
pub type EventSink = UnboundedSender<LinkEvent>;

/// A duplex message link to the remote hand.
///
/// Implementations must not block in `send`; writes are queued or performed
/// inline. Exactly one owner calls `send`.
pub trait DuplexChannel: Send {
    /// Start connecting. Lifecycle and inbound messages are pushed into `events`.
    fn open(&mut self, events: EventSink) -> Result<()>;

    fn state(&self) -> LinkState;

    /// Write one record. Returns `LinkError::NotOpen` unless the state is `Open`.
    fn send(&mut self, msg: &Outbound) -> Result<()>;

    /// Close the link. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }
}
