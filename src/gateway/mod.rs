//! Gateway protocol engine.
//!
//! A supervisor task owns the connection lifecycle: discover the gateway
//! URL, open the transport, drive the opcode state machine, and reconnect
//! with exponential backoff until the session is closed or permanently
//! failed. Dispatch events are forwarded to the session's dispatch task;
//! the engine itself only tracks connection-level state.

pub mod close_code;
pub mod opcode;
pub mod payload;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::Error;
use crate::event::Event;
use crate::limiter::FixedWindow;
use crate::rest::RestClient;
use crate::session::Shared;

pub use close_code::CloseCode;
pub use opcode::Opcode;
pub use payload::{GatewayPayload, Hello, Identify, Properties, Ready, Resume};
pub use transport::{Transport, TransportEvent, TransportReader, TransportWriter};

/// Frames admitted per connection per limiter window, across all opcodes.
pub const GATEWAY_LIMIT_SEND: u32 = 120;

/// Length of the gateway send window.
pub const GATEWAY_LIMIT_PERIOD: Duration = Duration::from_secs(60);

/// Status updates admitted per limiter window.
pub const STATUS_LIMIT_SEND: u32 = 5;

/// How long to wait for Hello before forcing a reconnect.
const HELLO_TIMEOUT: Duration = Duration::from_secs(15);

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Outbound requests routed through the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Send an opcode frame through the gate.
    Send { op: Opcode, d: Value },
    /// Close the connection with code 1000 and stop reconnecting.
    Close,
}

/// Handle to a running gateway supervisor.
pub(crate) struct GatewayHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    /// Queue an opcode frame for the connection task.
    pub(crate) fn send(&self, op: Opcode, d: Value) -> crate::error::Result<()> {
        self.cmd_tx
            .send(Command::Send { op, d })
            .map_err(|_| Error::Closed)
    }

    /// Ask the supervisor to shut down, waiting briefly for a clean close.
    pub(crate) async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(Command::Close);
        if tokio::time::timeout(Duration::from_secs(5), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

/// Spawn the gateway supervisor for a session.
pub(crate) fn spawn(
    config: ClientConfig,
    rest: Arc<RestClient>,
    shared: Arc<Shared>,
    events: mpsc::Sender<Event>,
) -> GatewayHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(supervise(config, rest, shared, events, cmd_rx));
    GatewayHandle { cmd_tx, task }
}

/// Why one connection ended, deciding the supervisor's next move.
enum Exit {
    /// Caller-requested shutdown; stop.
    Shutdown,
    /// Permanent failure; stop and record the error.
    Fatal(Error),
    /// Protocol-driven resume (op 7, zombied heartbeat, sequence
    /// regression); reconnect immediately.
    Resume,
    /// Transport loss or server close; reconnect after backoff.
    Backoff { resume: bool },
}

/// Connection-level protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Identifying,
    Resuming,
    Live,
}

async fn supervise(
    config: ClientConfig,
    rest: Arc<RestClient>,
    shared: Arc<Shared>,
    events: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut backoff = BACKOFF_INITIAL;

    loop {
        if shared.is_closed() {
            break;
        }

        let base_url = match rest.gateway_url().await {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "gateway discovery failed");
                if wait_or_close(&mut cmd_rx, backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
                continue;
            }
        };

        let ws_url = format!(
            "{}/?v={}&encoding=json",
            base_url, config.gateway_version
        );
        let resuming = shared.session_id().is_some();
        info!(url = %ws_url, resuming, "connecting to gateway");

        let transport = match Transport::connect(&ws_url).await {
            Ok(transport) => {
                backoff = BACKOFF_INITIAL;
                transport
            }
            Err(err) => {
                error!(error = %err, "gateway connect failed");
                if wait_or_close(&mut cmd_rx, backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
                continue;
            }
        };
        let (mut writer, mut reader) = transport.split();

        match run_connection(
            &config,
            &shared,
            &events,
            &mut cmd_rx,
            &mut writer,
            &mut reader,
        )
        .await
        {
            Exit::Shutdown => break,
            Exit::Fatal(err) => {
                error!(error = %err, "gateway failure is permanent, not reconnecting");
                shared.fail(err);
                break;
            }
            Exit::Resume => {
                debug!("reconnecting immediately to resume");
            }
            Exit::Backoff { resume } => {
                if !resume {
                    shared.clear_resume();
                }
                if wait_or_close(&mut cmd_rx, backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }

    debug!("gateway supervisor stopped");
}

/// Sleep for `duration`, returning early with `true` if a close arrives.
async fn wait_or_close(cmd_rx: &mut mpsc::UnboundedReceiver<Command>, duration: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => return false,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(Command::Close) => return true,
                Some(Command::Send { op, .. }) => {
                    warn!(op = ?op, "dropping gateway send while disconnected");
                }
            },
        }
    }
}

fn envelope(op: Opcode, d: Value) -> String {
    json!({ "op": op as u8, "d": d }).to_string()
}

/// Outbound frame gate: the connection-wide window plus the tighter
/// status-update ceiling.
struct SendGate {
    frames: FixedWindow,
    status: FixedWindow,
}

impl SendGate {
    fn new() -> Self {
        Self {
            frames: FixedWindow::new(GATEWAY_LIMIT_SEND, GATEWAY_LIMIT_PERIOD),
            status: FixedWindow::new(STATUS_LIMIT_SEND, GATEWAY_LIMIT_PERIOD),
        }
    }

    fn admit(&mut self, op: Opcode) -> bool {
        if op == Opcode::StatusUpdate && !self.status.try_acquire() {
            warn!("status update ceiling reached, dropping frame");
            return false;
        }
        if self.frames.try_acquire() {
            true
        } else {
            warn!(op = ?op, "gateway send limit reached, dropping frame");
            false
        }
    }
}

async fn run_connection(
    config: &ClientConfig,
    shared: &Shared,
    events: &mpsc::Sender<Event>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    writer: &mut TransportWriter,
    reader: &mut TransportReader,
) -> Exit {
    // Hello, or give up on this connection.
    let hello = match tokio::time::timeout(HELLO_TIMEOUT, await_hello(reader)).await {
        Err(_) => {
            warn!("no Hello within {HELLO_TIMEOUT:?}, forcing reconnect");
            let _ = writer.close(4000).await;
            return Exit::Backoff { resume: true };
        }
        Ok(Err(err)) => {
            error!(error = %err, "transport failed before Hello");
            return Exit::Backoff { resume: true };
        }
        Ok(Ok(HelloWait::Closed { code })) => return exit_for_close(code),
        Ok(Ok(HelloWait::Hello(hello))) => hello,
    };

    let interval = Duration::from_millis(hello.heartbeat_interval.max(1));
    debug!(interval_ms = hello.heartbeat_interval, trace = ?hello.trace, "received Hello");

    // The first heartbeat fires after a random fraction of the interval.
    let start = tokio::time::Instant::now() + interval.mul_f64(entropy_fraction());
    let mut heartbeat = tokio::time::interval_at(start, interval);

    let mut gate = SendGate::new();
    let mut awaiting_ack = false;

    let mut phase = if let Some(session_id) = shared.session_id() {
        let resume = Resume {
            token: config.token.clone(),
            session_id,
            seq: shared.seq(),
        };
        info!(seq = ?resume.seq, "resuming session");
        let d = serde_json::to_value(&resume).unwrap_or(Value::Null);
        if gate.admit(Opcode::Resume) {
            if let Err(err) = writer.send_text(envelope(Opcode::Resume, d)).await {
                error!(error = %err, "failed to send Resume");
                return Exit::Backoff { resume: true };
            }
        }
        Phase::Resuming
    } else {
        let identify = Identify::from_config(config);
        info!(shard = ?identify.shard, "identifying");
        let d = serde_json::to_value(&identify).unwrap_or(Value::Null);
        if gate.admit(Opcode::Identify) {
            if let Err(err) = writer.send_text(envelope(Opcode::Identify, d)).await {
                error!(error = %err, "failed to send Identify");
                return Exit::Backoff { resume: true };
            }
        }
        Phase::Identifying
    };

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_ack {
                    warn!("heartbeat not acknowledged, closing zombie connection");
                    let _ = writer.close(4000).await;
                    return Exit::Resume;
                }
                let payload = envelope(Opcode::Heartbeat, json!(shared.seq()));
                if gate.admit(Opcode::Heartbeat) {
                    if let Err(err) = writer.send_text(payload).await {
                        error!(error = %err, "failed to send heartbeat");
                        return Exit::Backoff { resume: true };
                    }
                    awaiting_ack = true;
                    trace!(seq = ?shared.seq(), "heartbeat sent");
                }
            }

            cmd = cmd_rx.recv() => match cmd {
                None | Some(Command::Close) => {
                    let _ = writer.close(1000).await;
                    return Exit::Shutdown;
                }
                Some(Command::Send { op, d }) => {
                    if gate.admit(op) {
                        if let Err(err) = writer.send_text(envelope(op, d)).await {
                            error!(error = %err, op = ?op, "failed to send frame");
                            return Exit::Backoff { resume: true };
                        }
                    }
                }
            },

            received = reader.next() => {
                let event = match received {
                    Ok(event) => event,
                    Err(err) => {
                        error!(error = %err, "gateway transport error");
                        return Exit::Backoff { resume: true };
                    }
                };
                match event {
                    TransportEvent::Disconnected => {
                        info!("gateway stream ended");
                        return Exit::Backoff { resume: true };
                    }
                    TransportEvent::Closed { code, reason } => {
                        info!(code, reason = %reason, "gateway closed the connection");
                        return exit_for_close(code);
                    }
                    TransportEvent::Text(text) => {
                        let payload: GatewayPayload = match serde_json::from_str(&text) {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(error = %err, "undecodable gateway payload");
                                continue;
                            }
                        };
                        if let Some(exit) = handle_payload(
                            payload, config, shared, events, writer,
                            &mut gate, &mut awaiting_ack, &mut phase,
                        )
                        .await
                        {
                            return exit;
                        }
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_payload(
    payload: GatewayPayload,
    config: &ClientConfig,
    shared: &Shared,
    events: &mpsc::Sender<Event>,
    writer: &mut TransportWriter,
    gate: &mut SendGate,
    awaiting_ack: &mut bool,
    phase: &mut Phase,
) -> Option<Exit> {
    let op = match Opcode::try_from(payload.op) {
        Ok(op) => op,
        Err(op) => {
            debug!(op, "unhandled opcode");
            return None;
        }
    };

    match op {
        Opcode::Dispatch => {
            let name = payload.t.unwrap_or_default();

            if let Some(seq) = payload.s {
                if shared.advance_seq(seq).is_err() {
                    error!(seq, "sequence regressed, forcing resume");
                    let _ = writer.close(4000).await;
                    return Some(Exit::Resume);
                }
            }

            match name.as_str() {
                "READY" => {
                    let session_id = payload
                        .d
                        .as_ref()
                        .and_then(|d| d["session_id"].as_str())
                        .unwrap_or_default()
                        .to_string();
                    shared.set_session_id(session_id.clone());
                    info!(session_id = %session_id, phase = ?phase, "gateway ready");
                    *phase = Phase::Live;
                }
                "RESUMED" => {
                    info!("session resumed");
                    *phase = Phase::Live;
                }
                _ => {}
            }

            let event = Event::from_dispatch(name, payload.s, payload.d.unwrap_or(Value::Null));
            if events.send(event).await.is_err() {
                info!("event receiver dropped, closing gateway");
                let _ = writer.close(1000).await;
                return Some(Exit::Shutdown);
            }
        }
        Opcode::Heartbeat => {
            // The server may request an immediate heartbeat.
            let payload = envelope(Opcode::Heartbeat, json!(shared.seq()));
            if gate.admit(Opcode::Heartbeat) {
                if let Err(err) = writer.send_text(payload).await {
                    error!(error = %err, "failed to answer heartbeat request");
                    return Some(Exit::Backoff { resume: true });
                }
            }
        }
        Opcode::HeartbeatAck => {
            *awaiting_ack = false;
            trace!("heartbeat acknowledged");
        }
        Opcode::Reconnect => {
            info!("server requested reconnect");
            let _ = writer.close(4000).await;
            return Some(Exit::Resume);
        }
        Opcode::InvalidSession => {
            warn!(resumable = ?payload.d, "session invalidated, re-identifying");
            shared.clear_resume();
            let wait = Duration::from_secs_f64(1.0 + entropy_fraction() * 4.0);
            tokio::time::sleep(wait).await;

            let identify = Identify::from_config(config);
            let d = serde_json::to_value(&identify).unwrap_or(Value::Null);
            if gate.admit(Opcode::Identify) {
                if let Err(err) = writer.send_text(envelope(Opcode::Identify, d)).await {
                    error!(error = %err, "failed to re-identify");
                    return Some(Exit::Backoff { resume: false });
                }
            }
            *awaiting_ack = false;
            *phase = Phase::Identifying;
        }
        Opcode::Hello => {
            debug!("unexpected Hello after handshake");
        }
        other => {
            debug!(op = ?other, "ignoring outbound-only opcode from server");
        }
    }

    None
}

enum HelloWait {
    Hello(Hello),
    Closed { code: u16 },
}

async fn await_hello(reader: &mut TransportReader) -> crate::error::Result<HelloWait> {
    loop {
        match reader.next().await? {
            TransportEvent::Text(text) => {
                let payload: GatewayPayload = serde_json::from_str(&text)?;
                if payload.op == Opcode::Hello as u8 {
                    let hello: Hello =
                        serde_json::from_value(payload.d.unwrap_or(Value::Null))?;
                    return Ok(HelloWait::Hello(hello));
                }
                debug!(op = payload.op, "frame before Hello ignored");
            }
            TransportEvent::Closed { code, .. } => return Ok(HelloWait::Closed { code }),
            TransportEvent::Disconnected => {
                return Err(Error::Transport("connection ended before Hello".into()));
            }
        }
    }
}

fn exit_for_close(code: u16) -> Exit {
    match CloseCode::from_u16(code).and_then(CloseCode::as_fatal_error) {
        Some(err) => Exit::Fatal(err),
        None => Exit::Backoff { resume: true },
    }
}

/// Pseudo-random fraction in `[0, 1)` for heartbeat jitter and
/// invalid-session waits.
fn entropy_fraction() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let mut hasher = DefaultHasher::new();
    nanos.hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    f64::from(u32::try_from(hasher.finish() % 10_000).unwrap_or(0)) / 10_000.0
}
