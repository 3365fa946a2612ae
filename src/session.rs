//! Session lifecycle: create, wire the tasks together, tear down.
//!
//! The session owns the gateway supervisor; the supervisor holds only the
//! shared connection variables and a channel back to the dispatch task, so
//! teardown is ordered: close the gateway first, then the session drops.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::ClientConfig;
use crate::dispatch::{self, Handlers};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::gateway::{self, GatewayHandle, Opcode};
use crate::models::User;
use crate::rest::{Body, Response, RestClient, SendOptions, Verb};
use crate::state::SessionState;

/// Connection variables shared between the gateway tasks and the session.
pub(crate) struct Shared {
    /// Last observed sequence; -1 encodes "none yet".
    seq: AtomicI64,
    session_id: Mutex<Option<String>>,
    closed: AtomicBool,
    failure: Mutex<Option<Error>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            seq: AtomicI64::new(-1),
            session_id: Mutex::new(None),
            closed: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn seq(&self) -> Option<u64> {
        let seq = self.seq.load(Ordering::Acquire);
        u64::try_from(seq).ok()
    }

    /// Record a dispatch sequence. Values are monotonically non-decreasing;
    /// a regression is a protocol error reported to the caller.
    pub(crate) fn advance_seq(&self, seq: u64) -> std::result::Result<(), u64> {
        let Ok(next) = i64::try_from(seq) else {
            return Err(seq);
        };
        let prior = self.seq.fetch_max(next, Ordering::AcqRel);
        if next < prior {
            Err(seq)
        } else {
            Ok(())
        }
    }

    pub(crate) fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub(crate) fn set_session_id(&self, session_id: String) {
        *self.session_id.lock() = Some(session_id);
    }

    /// Forget the resume state so the next connection identifies afresh.
    pub(crate) fn clear_resume(&self) {
        *self.session_id.lock() = None;
        self.seq.store(-1, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn fail(&self, err: Error) {
        *self.failure.lock() = Some(err);
        self.closed.store(true, Ordering::Release);
    }
}

/// A live (or permanently failed) gateway session.
pub struct Session {
    config: ClientConfig,
    rest: Arc<RestClient>,
    state: RwLock<SessionState>,
    shared: Arc<Shared>,
    gateway: Mutex<Option<GatewayHandle>>,
}

impl Session {
    /// Open a session: verify the credential, run `setup` so callbacks are
    /// registered before Identify, then start the gateway tasks.
    ///
    /// # Errors
    ///
    /// REST-layer errors from the credential check, or `Error::Http` when
    /// the dispatcher cannot be built.
    pub async fn connect<F>(config: ClientConfig, setup: F) -> Result<Arc<Self>>
    where
        F: FnOnce(&mut Handlers),
    {
        let rest = Arc::new(RestClient::new(&config)?);

        let user = rest.get_current_user().await?;
        info!(user_id = %user.id, username = %user.username, "credential verified");

        let session = Arc::new(Self {
            config,
            rest,
            state: RwLock::new(SessionState::new()),
            shared: Arc::new(Shared::new()),
            gateway: Mutex::new(None),
        });

        let mut handlers = Handlers::new();
        setup(&mut handlers);

        let (events_tx, events_rx) = mpsc::channel::<Event>(256);
        let handle = gateway::spawn(
            session.config.clone(),
            Arc::clone(&session.rest),
            Arc::clone(&session.shared),
            events_tx,
        );
        *session.gateway.lock() = Some(handle);

        tokio::spawn(dispatch::run(Arc::clone(&session), events_rx, handlers));

        Ok(session)
    }

    /// Close the gateway with code 1000 and release the session's tasks.
    /// Later operations return `Error::Closed`.
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the session was already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        let handle = self.gateway.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        info!("session disconnected");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Read access to the mirrored state.
    pub fn state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read()
    }

    /// The REST dispatcher bound to this session's credential.
    #[must_use]
    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// The bot's own user, once READY has arrived.
    #[must_use]
    pub fn self_user(&self) -> Option<User> {
        self.state.read().self_user.clone()
    }

    /// Last observed dispatch sequence.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.shared.seq()
    }

    /// Gateway-assigned session id, once READY has arrived.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id()
    }

    /// Whether the session has been disconnected or permanently failed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Take the permanent failure that closed the session, if any.
    #[must_use]
    pub fn take_failure(&self) -> Option<Error> {
        self.shared.failure.lock().take()
    }

    /// Raw REST access with the session's closed-state check.
    ///
    /// # Errors
    ///
    /// `Error::Closed` on a disconnected session, otherwise whatever the
    /// dispatcher surfaces.
    pub async fn send(
        &self,
        verb: Verb,
        resource: &str,
        body: Body,
        opts: SendOptions,
    ) -> Result<Response> {
        self.ensure_open()?;
        self.rest.send(verb, resource, body, opts).await
    }

    /// Post a plain text message to a channel.
    ///
    /// # Errors
    ///
    /// `Error::Closed` on a disconnected session, otherwise whatever the
    /// dispatcher surfaces.
    pub async fn send_message(&self, channel_id: &str, content: &str) -> Result<Response> {
        self.ensure_open()?;
        self.rest.create_message(channel_id, content).await
    }

    /// Update the bot's presence (op 3). Gated at 5 per 60 seconds.
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the gateway is gone.
    pub fn set_status(&self, game_name: Option<&str>, idle_since: Option<u64>) -> Result<()> {
        self.ensure_open()?;
        let d = json!({
            "idle_since": idle_since,
            "game": game_name.map(|name| json!({ "name": name })),
        });
        self.gateway_send(Opcode::StatusUpdate, d)
    }

    /// Ask the gateway for a guild's offline members (op 8).
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the gateway is gone.
    pub fn request_guild_members(&self, guild_id: &str, query: &str, limit: u32) -> Result<()> {
        self.ensure_open()?;
        let d = json!({ "guild_id": guild_id, "query": query, "limit": limit });
        self.gateway_send(Opcode::RequestGuildMembers, d)
    }

    /// Join, move between, or leave voice channels (op 4). Voice media
    /// itself is out of scope; this only updates the control-plane state.
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the gateway is gone.
    pub fn update_voice_state(
        &self,
        guild_id: &str,
        channel_id: Option<&str>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let d = json!({
            "guild_id": guild_id,
            "channel_id": channel_id,
            "self_mute": self_mute,
            "self_deaf": self_deaf,
        });
        self.gateway_send(Opcode::VoiceStateUpdate, d)
    }

    fn gateway_send(&self, op: Opcode, d: Value) -> Result<()> {
        self.gateway
            .lock()
            .as_ref()
            .ok_or(Error::Closed)?
            .send(op, d)
    }

    pub(crate) fn apply_event(&self, event: &Event) {
        self.state.write().apply(event);
    }

    /// Build a session with no gateway attached, for dispatch-loop tests.
    #[cfg(test)]
    pub(crate) fn detached(config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            rest: Arc::new(RestClient::new(&config).expect("rest client")),
            config,
            state: RwLock::new(SessionState::new()),
            shared: Arc::new(Shared::new()),
            gateway: Mutex::new(None),
        })
    }
}
