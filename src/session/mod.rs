//! # Asynchronous Session Lifecycle
//!
//! A session walks one messaging client through create → connect →
//! subscribe or publish → disconnect → destroy. Requests are issued without
//! blocking and their completions come back later as [`Event`]s, which the
//! [`SessionController`] consumes on the callback context.
//!
//! ## States
//!
//! ```text
//! Created ─▶ Connecting ─▶ Connected ─┬▶ Subscribing ─▶ Ready ─┐
//!               ▲                     └▶ Publishing ──────────┤
//!               │                                             ▼
//!          Reconnecting ◀── connection lost        Disconnecting ─▶ Disconnected
//!
//!                 any non-terminal state ─▶ Failed
//! ```
//!
//! ## Modes
//!
//! One controller covers both program shapes through [`Mode`]: publish a
//! single message and leave, or subscribe to one or more filters and forward
//! everything that arrives until the operator quits.
//!
//! [`Event`]: crate::client::Event

use core::fmt;
use heapless::String;

use crate::client::{EventSink, MessagingClient};
use crate::message::SubscriptionSet;
use crate::sink::MessagePublisher;

mod controller;
mod error;
mod router;


pub use controller::SessionController;
pub use error::{RouterError, SessionError};
pub use router::{CallbackRouter, Continuation, MAX_OUTSTANDING, Operation};

/// Maximum broker address length.
pub const MAX_ADDRESS_LEN: usize = 128;

/// Maximum client identifier length.
pub const MAX_CLIENT_ID_LEN: usize = 64;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Client created, nothing issued yet.
    Created,
    /// Connect request outstanding.
    Connecting,
    /// Connect handshake completed.
    Connected,
    /// Subscribe request outstanding.
    Subscribing,
    /// Publish request outstanding or just confirmed.
    Publishing,
    /// Subscribed; inbound messages are being forwarded.
    Ready,
    /// Connection lost; a new connect is about to be issued.
    Reconnecting,
    /// Disconnect request outstanding.
    Disconnecting,
    /// Disconnect completed. Terminal.
    Disconnected,
    /// Unrecoverable failure. Terminal.
    Failed,
}

impl SessionState {
    /// Short identifier for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "Created",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Subscribing => "Subscribing",
            SessionState::Publishing => "Publishing",
            SessionState::Ready => "Ready",
            SessionState::Reconnecting => "Reconnecting",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::Disconnected => "Disconnected",
            SessionState::Failed => "Failed",
        }
    }

    /// `Disconnected` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }

    /// States in which a connection loss triggers a reconnect.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Connected
                | SessionState::Subscribing
                | SessionState::Publishing
                | SessionState::Ready
                | SessionState::Reconnecting
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the session does once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Send one message, then disconnect.
    Publish(MessagePublisher),
    /// Subscribe to every filter of the set and forward arrivals.
    Subscribe(SubscriptionSet),
}

impl Mode {
    /// Whether this is a subscribe-mode session.
    pub fn is_subscribe(&self) -> bool {
        matches!(self, Mode::Subscribe(_))
    }
}

/// Who the session connects as, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Broker address, `host:port`.
    pub address: String<MAX_ADDRESS_LEN>,
    /// Client identifier presented to the broker.
    pub client_id: String<MAX_CLIENT_ID_LEN>,
}

impl SessionIdentity {
    /// Copies address and client id, rejecting empty or oversized values.
    pub fn new(address: &str, client_id: &str) -> Result<Self, SessionError> {
        if address.is_empty() || client_id.is_empty() {
            return Err(SessionError::InvalidIdentity);
        }
        let mut identity = Self {
            address: String::new(),
            client_id: String::new(),
        };
        identity
            .address
            .push_str(address)
            .map_err(|_| SessionError::InvalidIdentity)?;
        identity
            .client_id
            .push_str(client_id)
            .map_err(|_| SessionError::InvalidIdentity)?;
        Ok(identity)
    }
}

/// A client handle together with its identity and lifecycle state.
///
/// The session owns the handle exclusively. [`Session::destroy`] consumes
/// the session, so the handle is released exactly once and nothing can be
/// issued on it afterwards.
#[derive(Debug)]
pub struct Session<C> {
    identity: SessionIdentity,
    state: SessionState,
    client: C,
}

impl<C: MessagingClient> Session<C> {
    /// Creates the client and registers `sink` for its callbacks.
    ///
    /// Either step failing is a setup failure; the half-built client is
    /// destroyed before returning.
    pub fn create<S>(identity: SessionIdentity, sink: S) -> Result<Self, SessionError>
    where
        S: EventSink + 'static,
    {
        let mut client =
            C::create(&identity.address, &identity.client_id).map_err(SessionError::Setup)?;
        if let Err(code) = client.set_callbacks(sink) {
            client.destroy();
            return Err(SessionError::Setup(code));
        }
        Ok(Self::from_client(identity, client))
    }

    /// Wraps an already configured client.
    pub fn from_client(identity: SessionIdentity, client: C) -> Self {
        Self {
            identity,
            state: SessionState::Created,
            client,
        }
    }

    /// Releases the client handle.
    pub fn destroy(self) {
        self.client.destroy();
    }
}

impl<C> Session<C> {
    /// Address and client id.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Shared access to the client handle.
    pub fn client(&self) -> &C {
        &self.client
    }

    pub(crate) fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("Session {}: {} -> {}", self.identity.client_id, self.state, state);
            self.state = state;
        }
    }
}
