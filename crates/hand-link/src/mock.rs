//! In-process channel for tests and dry runs.

use crate::{
    decode_inbound, Command, DuplexChannel, EventSink, Inbound, JointAngles, LinkError, LinkEvent,
    LinkState, Outbound, Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

/// One record accepted by the mock writer.
#[derive(Clone, Debug)]
pub struct SentRecord {
    pub at: Instant,
    pub msg: Outbound,
}

struct Shared {
    state: LinkState,
    auto_open: bool,
    events: Option<EventSink>,
    sent: Vec<SentRecord>,
    close_calls: u32,
}

impl Shared {
    fn emit(&self, event: LinkEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Writer half handed to the control loop.
pub struct MockChannel {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side handle: inspects what was written and plays the remote peer.
#[derive(Clone)]
pub struct MockRemote {
    shared: Arc<Mutex<Shared>>,
}

impl MockChannel {
    /// A channel that reports `Opened` as soon as `open` is called.
    pub fn pair() -> (MockChannel, MockRemote) {
        Self::with_auto_open(true)
    }

    /// A channel that stays `Connecting` until `MockRemote::accept` is called.
    pub fn pair_manual() -> (MockChannel, MockRemote) {
        Self::with_auto_open(false)
    }

    fn with_auto_open(auto_open: bool) -> (MockChannel, MockRemote) {
        let shared = Arc::new(Mutex::new(Shared {
            state: LinkState::Idle,
            auto_open,
            events: None,
            sent: Vec::new(),
            close_calls: 0,
        }));
        (
            MockChannel {
                shared: shared.clone(),
            },
            MockRemote { shared },
        )
    }
}

impl DuplexChannel for MockChannel {
    fn open(&mut self, events: EventSink) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.events.is_some() {
            return Err(LinkError::AlreadyOpened);
        }
        shared.events = Some(events);
        if shared.auto_open {
            shared.state = LinkState::Open;
            shared.emit(LinkEvent::Opened);
        } else {
            shared.state = LinkState::Connecting;
        }
        Ok(())
    }

    fn state(&self) -> LinkState {
        self.shared.lock().state
    }

    fn send(&mut self, msg: &Outbound) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.state != LinkState::Open {
            return Err(LinkError::NotOpen);
        }
        shared.sent.push(SentRecord {
            at: Instant::now(),
            msg: msg.clone(),
        });
        Ok(())
    }

    fn close(&mut self) {
        let mut shared = self.shared.lock();
        shared.close_calls += 1;
        if shared.state != LinkState::Closed {
            shared.state = LinkState::Closed;
            shared.emit(LinkEvent::Closed);
        }
    }
}

impl MockRemote {
    /// Complete a pending connection.
    pub fn accept(&self) {
        let mut shared = self.shared.lock();
        shared.state = LinkState::Open;
        shared.emit(LinkEvent::Opened);
    }

    /// Simulate the peer dropping the connection.
    pub fn drop_link(&self) {
        let mut shared = self.shared.lock();
        shared.state = LinkState::Closed;
        shared.emit(LinkEvent::Closed);
    }

    pub fn fail(&self, reason: &str) {
        self.shared.lock().emit(LinkEvent::Error(reason.to_string()));
    }

    pub fn push(&self, msg: Inbound) {
        self.shared.lock().emit(LinkEvent::Message(msg));
    }

    /// Deliver raw text as the peer would; malformed text never reaches the sink.
    pub fn push_raw(&self, text: &str) {
        if let Some(msg) = decode_inbound(text) {
            self.push(msg);
        }
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.shared.lock().sent.clone()
    }

    pub fn sent_angles(&self) -> Vec<(Instant, JointAngles)> {
        self.shared
            .lock()
            .sent
            .iter()
            .filter_map(|r| match &r.msg {
                Outbound::Angles { angles } => Some((r.at, *angles)),
                _ => None,
            })
            .collect()
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.shared
            .lock()
            .sent
            .iter()
            .filter_map(|r| match &r.msg {
                Outbound::Command(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.shared.lock().sent.clear();
    }

    pub fn close_calls(&self) -> u32 {
        self.shared.lock().close_calls
    }

    pub fn state(&self) -> LinkState {
        self.shared.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_mock_lifecycle() {
        let (mut chan, remote) = MockChannel::pair_manual();
        let (tx, mut rx) = mpsc::unbounded_channel();
        chan.open(tx).unwrap();
        assert_eq!(chan.state(), LinkState::Connecting);
        assert!(matches!(
            chan.send(&Outbound::hello()),
            Err(LinkError::NotOpen)
        ));

        remote.accept();
        assert_eq!(rx.recv().await, Some(LinkEvent::Opened));
        chan.send(&Outbound::hello()).unwrap();
        assert_eq!(remote.sent().len(), 1);

        remote.push_raw("garbage");
        remote.push_raw(r#"{"ok":true}"#);
        assert_eq!(rx.recv().await, Some(LinkEvent::Message(Inbound::Ack(crate::Ack::ok()))));

        chan.close();
        chan.close();
        assert_eq!(rx.recv().await, Some(LinkEvent::Closed));
        assert_eq!(remote.close_calls(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let (mut chan, _remote) = MockChannel::pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        chan.open(tx.clone()).unwrap();
        assert!(matches!(chan.open(tx), Err(LinkError::AlreadyOpened)));
    }
}
