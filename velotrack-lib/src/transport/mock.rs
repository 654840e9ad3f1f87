//! In-memory transport with scripted, timed replies.
//!
//! A [`Responder`] decides what the fake device sends back when the port is
//! opened and whenever the host writes. Replies are delivered on the tokio
//! clock, so tests running with a paused clock see exact timings.

use super::Transport;
use crate::command::Command;
use crate::error::SerialErrorKind;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Something the fake device does some time after a trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Bytes { after: Duration, data: Bytes },
    Error { after: Duration, kind: SerialErrorKind },
}

impl Reply {
    pub fn bytes(after: Duration, data: impl Into<Bytes>) -> Self {
        Reply::Bytes {
            after,
            data: data.into(),
        }
    }

    /// Bytes available as soon as the trigger happens
    pub fn now(data: impl Into<Bytes>) -> Self {
        Self::bytes(Duration::ZERO, data)
    }

    pub fn error(after: Duration, kind: SerialErrorKind) -> Self {
        Reply::Error { after, kind }
    }

    fn after(&self) -> Duration {
        match self {
            Reply::Bytes { after, .. } | Reply::Error { after, .. } => *after,
        }
    }
}

/// Behaviour of the device at the other end of a [`MockTransport`].
pub trait Responder: Send {
    fn on_open(&mut self) -> Vec<Reply> {
        Vec::new()
    }

    fn on_write(&mut self, data: &[u8]) -> Vec<Reply>;
}

/// Responder answering each command byte with a fixed list of replies.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponder {
    open: Vec<Reply>,
    commands: HashMap<u8, Vec<Reply>>,
}

impl ScriptedResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, replies: Vec<Reply>) -> Self {
        self.open = replies;
        self
    }

    pub fn on_command(mut self, command: Command, replies: Vec<Reply>) -> Self {
        self.commands.insert(command.into(), replies);
        self
    }
}

impl Responder for ScriptedResponder {
    fn on_open(&mut self) -> Vec<Reply> {
        self.open.clone()
    }

    fn on_write(&mut self, data: &[u8]) -> Vec<Reply> {
        data.iter()
            .filter_map(|byte| self.commands.get(byte))
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    port_name: Option<String>,
    open_count: usize,
    open_error: Option<SerialErrorKind>,
    write_error: Option<SerialErrorKind>,
    data_terminal_ready: bool,
    written: BytesMut,
    discarded: usize,
    inbound: VecDeque<(Instant, Reply)>,
}

impl MockState {
    fn schedule(&mut self, replies: Vec<Reply>) {
        let now = Instant::now();
        for reply in replies {
            let at = now + reply.after();
            let index = self.inbound.partition_point(|(queued, _)| *queued <= at);
            self.inbound.insert(index, (at, reply));
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<MockState>,
    arrival: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Inspection and injection handle for a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockHandle {
    /// All bytes written by the host so far
    pub fn written(&self) -> Vec<u8> {
        self.shared.lock().written.to_vec()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    pub fn port_name(&self) -> Option<String> {
        self.shared.lock().port_name.clone()
    }

    pub fn open_count(&self) -> usize {
        self.shared.lock().open_count
    }

    pub fn data_terminal_ready(&self) -> bool {
        self.shared.lock().data_terminal_ready
    }

    /// Number of pending replies dropped by `discard_input`
    pub fn discarded(&self) -> usize {
        self.shared.lock().discarded
    }

    /// Make the next `open` fail with `kind`
    pub fn fail_next_open(&self, kind: SerialErrorKind) {
        self.shared.lock().open_error = Some(kind);
    }

    /// Make the next `write` fail with `kind`; nothing is sent
    pub fn fail_next_write(&self, kind: SerialErrorKind) {
        self.shared.lock().write_error = Some(kind);
    }

    /// Deliver unsolicited replies, timed from now
    pub fn inject(&self, replies: Vec<Reply>) {
        self.shared.lock().schedule(replies);
        self.shared.arrival.notify_one();
    }
}

/// [`Transport`] backed by a [`Responder`] instead of hardware.
pub struct MockTransport {
    shared: Arc<Shared>,
    responder: Box<dyn Responder>,
}

impl MockTransport {
    pub fn new(responder: impl Responder + 'static) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            responder: Box::new(responder),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self, port_name: &str) -> Result<(), SerialErrorKind> {
        let mut state = self.shared.lock();
        if let Some(kind) = state.open_error.take() {
            return Err(kind);
        }
        if state.open {
            return Err(SerialErrorKind::AlreadyOpen);
        }
        state.open = true;
        state.open_count += 1;
        state.port_name = Some(port_name.to_string());
        state.schedule(self.responder.on_open());
        debug!(port = port_name, "Mock port opened");
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.shared.lock();
        state.open = false;
        state.data_terminal_ready = false;
        state.port_name = None;
        state.inbound.clear();
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    fn set_data_terminal_ready(&mut self, level: bool) -> Result<(), SerialErrorKind> {
        let mut state = self.shared.lock();
        if !state.open {
            return Err(SerialErrorKind::NotOpen);
        }
        state.data_terminal_ready = level;
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), SerialErrorKind> {
        let mut state = self.shared.lock();
        if !state.open {
            return Err(SerialErrorKind::NotOpen);
        }
        let now = Instant::now();
        let before = state.inbound.len();
        state.inbound.retain(|(at, _)| *at > now);
        state.discarded += before - state.inbound.len();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), SerialErrorKind> {
        let mut state = self.shared.lock();
        if !state.open {
            return Err(SerialErrorKind::NotOpen);
        }
        if let Some(kind) = state.write_error.take() {
            return Err(kind);
        }
        state.written.extend_from_slice(data);
        state.schedule(self.responder.on_write(data));
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Bytes, SerialErrorKind> {
        loop {
            let next = {
                let state = self.shared.lock();
                if !state.open {
                    return Err(SerialErrorKind::NotOpen);
                }
                state.inbound.front().map(|(at, _)| *at)
            };

            let Some(at) = next else {
                self.shared.arrival.notified().await;
                continue;
            };
            tokio::time::sleep_until(at).await;

            let mut state = self.shared.lock();
            let now = Instant::now();
            if !state.inbound.front().is_some_and(|(first, _)| *first <= now) {
                continue;
            }

            let mut chunk = match state.inbound.pop_front() {
                Some((_, Reply::Error { kind, .. })) => return Err(kind),
                Some((_, Reply::Bytes { data, .. })) => BytesMut::from(data.as_ref()),
                None => continue,
            };
            // Coalesce everything that has arrived, like a driver buffer would.
            while state
                .inbound
                .front()
                .is_some_and(|(at, reply)| *at <= now && matches!(reply, Reply::Bytes { .. }))
            {
                if let Some((_, Reply::Bytes { data, .. })) = state.inbound.pop_front() {
                    chunk.extend_from_slice(&data);
                }
            }
            return Ok(chunk.freeze());
        }
    }
}
