//! Newline-delimited JSON over TCP.
//!
//! One background task owns the socket. `send` only enqueues an encoded line, so
//! the caller never blocks on the network.

use crate::{decode_inbound, DuplexChannel, EventSink, LinkError, LinkEvent, LinkState, Outbound, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct TcpChannel {
    addr: String,
    state: Arc<Mutex<LinkState>>,
    events: Option<EventSink>,
    writer: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl TcpChannel {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            state: Arc::new(Mutex::new(LinkState::Idle)),
            events: None,
            writer: None,
            task: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl DuplexChannel for TcpChannel {
    fn open(&mut self, events: EventSink) -> Result<()> {
        if self.task.is_some() {
            return Err(LinkError::AlreadyOpened);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| LinkError::Io(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.lock() = LinkState::Connecting;
        tracing::info!("connecting to {}", self.addr);
        self.task = Some(runtime.spawn(run_connection(
            self.addr.clone(),
            self.state.clone(),
            events.clone(),
            rx,
        )));
        self.writer = Some(tx);
        self.events = Some(events);
        Ok(())
    }

    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn send(&mut self, msg: &Outbound) -> Result<()> {
        if self.state() != LinkState::Open {
            return Err(LinkError::NotOpen);
        }
        let line = msg.to_json()?;
        let writer = self.writer.as_ref().ok_or(LinkError::NotOpen)?;
        writer
            .send(line)
            .map_err(|_| LinkError::Io("connection task stopped".to_string()))
    }

    fn close(&mut self) {
        self.writer.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let mut state = self.state.lock();
        if *state != LinkState::Closed {
            *state = LinkState::Closed;
            if let Some(events) = &self.events {
                let _ = events.send(LinkEvent::Closed);
            }
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_connection(
    addr: String,
    state: Arc<Mutex<LinkState>>,
    events: EventSink,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) {
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            *state.lock() = LinkState::Closed;
            let _ = events.send(LinkEvent::Error(format!("connect {addr}: {e}")));
            let _ = events.send(LinkEvent::Closed);
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    *state.lock() = LinkState::Open;
    let _ = events.send(LinkEvent::Opened);

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    if let Some(msg) = decode_inbound(&text) {
                        let _ = events.send(LinkEvent::Message(msg));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = events.send(LinkEvent::Error(e.to_string()));
                    break;
                }
            },
            out = outgoing.recv() => match out {
                Some(mut line) => {
                    line.push('\n');
                    if let Err(e) = write_half.write_all(line.as_bytes()).await {
                        let _ = events.send(LinkEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => break,
            },
        }
    }

    *state.lock() = LinkState::Closed;
    let _ = events.send(LinkEvent::Closed);
}
