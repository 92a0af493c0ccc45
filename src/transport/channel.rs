use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Connection readiness as seen by writers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            _ => ChannelState::Closed,
        }
    }
}

/// Atomic cell holding a `ChannelState`, readable from any thread.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Outbound half of the game-server connection.
///
/// Writers consult `state()` before each write. The connection lifecycle is
/// owned by the implementation; writers never trigger reconnects.
pub trait Channel: Send + Sync {
    fn state(&self) -> ChannelState;

    /// Write one text message. Errors mean the message was not delivered.
    fn send_text(&self, text: &str) -> Result<()>;
}

impl<C: Channel + ?Sized> Channel for Arc<C> {
    fn state(&self) -> ChannelState {
        (**self).state()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        (**self).send_text(text)
    }
}

/// In-process channel that records everything written while open.
///
/// Used for dry runs (`memory://`) and tests.
#[derive(Debug)]
pub struct MemoryChannel {
    state: StateCell,
    sent: Mutex<Vec<String>>,
}

impl MemoryChannel {
    pub fn new(state: ChannelState) -> Self {
        Self {
            state: StateCell::new(state),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn open() -> Self {
        Self::new(ChannelState::Open)
    }

    pub fn set_state(&self, state: ChannelState) {
        self.state.set(state);
    }

    /// Messages written so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn take_sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .map(|mut sent| std::mem::take(&mut *sent))
            .unwrap_or_default()
    }
}

impl Channel for MemoryChannel {
    fn state(&self) -> ChannelState {
        self.state.get()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        if self.state.get() != ChannelState::Open {
            return Err(anyhow!("memory channel is not open"));
        }
        log::trace!("memory channel <- {}", text);
        self.sent
            .lock()
            .map_err(|_| anyhow!("memory channel lock poisoned"))?
            .push(text.to_string());
        Ok(())
    }
}
