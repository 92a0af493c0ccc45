use anyhow::{anyhow, bail, Context, Result};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tungstenite::{Message, WebSocket};

use super::channel::{Channel, ChannelState, StateCell};
use super::endpoint::{parse_ws_endpoint, WsEndpoint};

const STOP_POLL: Duration = Duration::from_millis(20);

#[derive(Clone, Debug)]
pub struct WsConfig {
    pub url: String,
    pub connect_timeout: Duration,
    /// `None` means a single connection attempt; the channel stays closed afterwards.
    pub reconnect_interval: Option<Duration>,
    /// Idle sleep between inbound reads.
    pub poll_interval: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            connect_timeout: Duration::from_secs(3),
            reconnect_interval: Some(Duration::from_secs(2)),
            poll_interval: Duration::from_millis(5),
        }
    }
}

struct Shared {
    state: StateCell,
    socket: Mutex<Option<WebSocket<TcpStream>>>,
    stop: AtomicBool,
}

/// WebSocket connection to the game server.
///
/// A supervisor thread owns the connection lifecycle: it connects, drains
/// and discards inbound messages, and reconnects at the configured interval.
/// Writers only ever see the current state and a write call.
pub struct WsChannel {
    endpoint: WsEndpoint,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WsChannel {
    /// Start connecting to `config.url`. Returns immediately in `Connecting`.
    pub fn connect(config: WsConfig) -> Result<Self> {
        let endpoint = parse_ws_endpoint(&config.url)?;
        let shared = Arc::new(Shared {
            state: StateCell::new(ChannelState::Connecting),
            socket: Mutex::new(None),
            stop: AtomicBool::new(false),
        });

        let supervisor = {
            let shared = Arc::clone(&shared);
            let endpoint = endpoint.clone();
            std::thread::Builder::new()
                .name("ws-supervisor".to_string())
                .spawn(move || supervise(&shared, &endpoint, &config))
                .context("spawn websocket supervisor")?
        };

        Ok(Self {
            endpoint,
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    pub fn endpoint(&self) -> &WsEndpoint {
        &self.endpoint
    }

    /// Block until the channel reaches `want` or `timeout` elapses.
    pub fn wait_for_state(&self, want: ChannelState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.state.get() == want {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub fn close(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let handle = match self.supervisor.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("websocket supervisor panicked");
            }
        }
        self.shared.state.set(ChannelState::Closed);
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl Channel for WsChannel {
    fn state(&self) -> ChannelState {
        self.shared.state.get()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        let mut guard = self
            .shared
            .socket
            .lock()
            .map_err(|_| anyhow!("websocket lock poisoned"))?;
        let ws = match guard.as_mut() {
            Some(ws) if self.shared.state.get() == ChannelState::Open => ws,
            _ => bail!("websocket to {} is not open", self.endpoint),
        };
        match ws.send(Message::text(text)) {
            Ok(()) => Ok(()),
            // Queued; the supervisor flushes on its next pass.
            Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(anyhow!("websocket write to {} failed: {}", self.endpoint, e)),
        }
    }
}

// ----------------------------------------------------------------------------
// Supervisor
// ----------------------------------------------------------------------------

fn supervise(shared: &Shared, endpoint: &WsEndpoint, config: &WsConfig) {
    let mut failing = false;
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        shared.state.set(ChannelState::Connecting);

        match open_socket(endpoint, config.connect_timeout) {
            Ok(ws) => {
                log::info!("connected to game server at {}", endpoint);
                failing = false;
                if let Ok(mut guard) = shared.socket.lock() {
                    *guard = Some(ws);
                }
                shared.state.set(ChannelState::Open);
                pump(shared, endpoint, config.poll_interval);
            }
            Err(e) => {
                if failing {
                    log::debug!("game server still unreachable: {:#}", e);
                } else {
                    log::warn!("cannot reach game server: {:#}", e);
                    failing = true;
                }
            }
        }

        shared.state.set(ChannelState::Closed);
        if let Ok(mut guard) = shared.socket.lock() {
            *guard = None;
        }

        match config.reconnect_interval {
            Some(interval) => sleep_unless_stopped(&shared.stop, interval),
            None => break,
        }
    }
    shared.state.set(ChannelState::Closed);
}

fn open_socket(endpoint: &WsEndpoint, timeout: Duration) -> Result<WebSocket<TcpStream>> {
    let mut last_err = None;
    let mut stream = None;
    for addr in endpoint.socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let stream = match (stream, last_err) {
        (Some(stream), _) => stream,
        (None, Some(e)) => return Err(e).with_context(|| format!("connect {}", endpoint)),
        (None, None) => bail!("no address to connect for {}", endpoint),
    };

    stream.set_nodelay(true).ok();
    stream
        .set_read_timeout(Some(timeout))
        .context("set handshake timeout")?;
    let (ws, _response) = tungstenite::client(endpoint.url.as_str(), stream)
        .map_err(|e| anyhow!("websocket handshake with {} failed: {}", endpoint, e))?;
    ws.get_ref()
        .set_nonblocking(true)
        .context("set websocket nonblocking")?;
    Ok(ws)
}

/// Drain inbound frames until the connection ends or a stop is requested.
fn pump(shared: &Shared, endpoint: &WsEndpoint, poll_interval: Duration) {
    loop {
        let mut guard = match shared.socket.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let Some(ws) = guard.as_mut() else {
            return;
        };

        if shared.stop.load(Ordering::SeqCst) {
            ws.close(None).ok();
            ws.flush().ok();
            log::info!("closed connection to {}", endpoint);
            return;
        }

        match ws.read() {
            Ok(Message::Close(frame)) => {
                ws.flush().ok();
                log::info!("game server closed the connection: {:?}", frame);
                return;
            }
            Ok(message) => {
                log::debug!("ignoring inbound message ({} bytes)", message.len());
            }
            Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::WouldBlock => {
                match ws.flush() {
                    Ok(()) => {}
                    Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => {
                        log::warn!("websocket flush to {} failed: {}", endpoint, e);
                        return;
                    }
                }
                drop(guard);
                std::thread::sleep(poll_interval);
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                log::info!("connection to {} closed", endpoint);
                return;
            }
            Err(e) => {
                log::warn!("websocket to {} failed: {}", endpoint, e);
                return;
            }
        }
    }
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(STOP_POLL.min(deadline - now));
    }
}
