//! Contract with the external messaging client library.
//!
//! The session core never speaks the wire protocol itself. It drives a
//! [`MessagingClient`], which accepts requests and reports their outcome later,
//! from its own execution context, by posting [`Event`]s to the
//! [`EventSink`] registered through [`MessagingClient::set_callbacks`].
//!
//! Every request method returns at once:
//!
//! - `Ok(())`: the request was issued and exactly one
//!   [`Event::Completed`] carrying the same [`RequestId`] will follow.
//! - `Err(code)`: the request was refused and no completion will follow.
//!
//! # Events
//!
//! ```text
//!   library context            event queue              callback context
//! ┌──────────────────┐    ┌──────────────────┐    ┌────────────────────────┐
//! │ completions      │───▶│ Event::Completed │───▶│ CallbackRouter         │
//! │ connection loss  │───▶│ ConnectionLost   │───▶│   └▶ SessionController │
//! │ inbound messages │───▶│ MessageArrived   │───▶│        └▶ MessageSink  │
//! └──────────────────┘    └──────────────────┘    └────────────────────────┘
//!                               ▲
//!           operator input ─────┘ QuitRequested, InputClosed
//! ```

use core::fmt;
use heapless::String;

use crate::message::{InboundMessage, OutboundMessage, QoS, SubscriptionSet};

/// Adapter over the `rumqttc` crate.
#[cfg(feature = "rumqttc")]
pub mod mqtt;

/// Maximum length of a connection-loss cause kept in an [`Event`].
pub const MAX_CAUSE_LEN: usize = 128;

/// Identifier binding a completion to the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token identifying a confirmed delivery; the packet identifier for QoS 1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeliveryToken(pub u16);

/// Numeric return code reported by the library.
///
/// Positive values are broker reason codes (CONNACK return codes, `128` for a
/// refused subscription); negative values are library-side failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FailureCode(pub i32);

impl FailureCode {
    /// Unspecified failure.
    pub const FAILURE: FailureCode = FailureCode(-1);
    /// The client is not connected.
    pub const DISCONNECTED: FailureCode = FailureCode(-3);
    /// The library cannot accept more requests right now.
    pub const MAX_BUFFERED: FailureCode = FailureCode(-12);
    /// The broker address could not be understood.
    pub const BAD_ADDRESS: FailureCode = FailureCode(-14);
    /// The broker refused at least one subscription filter.
    pub const SUBSCRIPTION_REFUSED: FailureCode = FailureCode(128);
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result carried by a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// The request succeeded. Publishes carry their delivery token.
    Success {
        /// Delivery token, present for publish completions.
        token: Option<DeliveryToken>,
    },
    /// The request failed with a library or broker code.
    Failure {
        /// Reported return code.
        code: FailureCode,
    },
}

/// Completion of one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Completion {
    /// The request this completes.
    pub request: RequestId,
    /// How it ended.
    pub outcome: Outcome,
}

impl Completion {
    /// Successful completion without a token.
    pub fn success(request: RequestId) -> Self {
        Self {
            request,
            outcome: Outcome::Success { token: None },
        }
    }

    /// Successful publish completion.
    pub fn delivered(request: RequestId, token: DeliveryToken) -> Self {
        Self {
            request,
            outcome: Outcome::Success { token: Some(token) },
        }
    }

    /// Failed completion.
    pub fn failure(request: RequestId, code: FailureCode) -> Self {
        Self {
            request,
            outcome: Outcome::Failure { code },
        }
    }
}

/// Everything the callback context reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An issued request finished.
    Completed(Completion),
    /// The connection dropped; the cause is included when known.
    ConnectionLost {
        /// Human-readable cause, truncated to [`MAX_CAUSE_LEN`].
        cause: Option<String<MAX_CAUSE_LEN>>,
    },
    /// A message arrived on a subscribed filter.
    MessageArrived(InboundMessage),
    /// The operator asked for a graceful shutdown.
    QuitRequested,
    /// Operator input ended without a quit line. Acts as a quit request that
    /// waits for the session to be ready again.
    InputClosed,
}

impl Event {
    /// Builds a [`Event::ConnectionLost`], truncating the cause on a char boundary.
    pub fn connection_lost(cause: Option<&str>) -> Self {
        let cause = cause.map(|text| {
            let mut owned = String::new();
            for ch in text.chars() {
                if owned.push(ch).is_err() {
                    break;
                }
            }
            owned
        });
        Event::ConnectionLost { cause }
    }
}

/// Receiver of the events a client produces.
///
/// Implementations must not block: posting happens on the library's own
/// context. The return value reports whether anyone is still listening.
pub trait EventSink: Send {
    /// Queues one event for the callback context.
    fn post(&self, event: Event) -> bool;
}

#[cfg(feature = "std")]
impl EventSink for std::sync::mpsc::Sender<Event> {
    fn post(&self, event: Event) -> bool {
        self.send(event).is_ok()
    }
}

#[cfg(feature = "std")]
impl EventSink for std::sync::mpsc::SyncSender<Event> {
    fn post(&self, event: Event) -> bool {
        self.try_send(event).is_ok()
    }
}

/// Connect handshake parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectOptions {
    /// Keep-alive interval in seconds.
    pub keep_alive_seconds: u16,
    /// Whether the broker should discard previous session state.
    pub clean_session: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            keep_alive_seconds: 20,
            clean_session: true,
        }
    }
}

/// A non-blocking, callback-completion messaging client.
///
/// The handle is exclusively owned by one session and released by
/// [`destroy`](MessagingClient::destroy), which consumes it.
pub trait MessagingClient: Sized {
    /// Creates a client for `address` identified as `client_id`.
    ///
    /// No network activity happens here.
    fn create(address: &str, client_id: &str) -> Result<Self, FailureCode>;

    /// Registers where connection loss, arrivals and completions are posted.
    fn set_callbacks<S>(&mut self, sink: S) -> Result<(), FailureCode>
    where
        S: EventSink + 'static;

    /// Starts the connect handshake.
    fn connect(&mut self, request: RequestId, options: &ConnectOptions)
    -> Result<(), FailureCode>;

    /// Subscribes to a single filter.
    fn subscribe(&mut self, request: RequestId, topic: &str, qos: QoS)
    -> Result<(), FailureCode>;

    /// Subscribes to every filter of `set` in one request.
    fn subscribe_many(
        &mut self,
        request: RequestId,
        set: &SubscriptionSet,
    ) -> Result<(), FailureCode>;

    /// Sends one message.
    fn publish(&mut self, request: RequestId, message: &OutboundMessage)
    -> Result<(), FailureCode>;

    /// Starts a graceful disconnect.
    fn disconnect(&mut self, request: RequestId) -> Result<(), FailureCode>;

    /// Releases the handle and everything the library holds for it.
    fn destroy(self);
}
