//! Where arriving messages go, and what a publish-mode session sends.

use crate::client::{DeliveryToken, FailureCode, MessagingClient, RequestId};
use crate::message::{InboundMessage, OutboundMessage};

#[cfg(feature = "std")]
use std::io::Write;

/// Consumer of inbound messages, called on the callback context.
///
/// The message is only borrowed for the duration of the call and released by
/// the session afterwards. Return `false` if the message was not consumed;
/// the session logs it and carries on.
pub trait MessageSink {
    /// Consumes one arriving message.
    fn deliver(&mut self, message: &InboundMessage) -> bool;
}

/// Drops every message. Used by publish-mode sessions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscardSink;

impl MessageSink for DiscardSink {
    fn deliver(&mut self, _message: &InboundMessage) -> bool {
        true
    }
}

/// Keeps every message in arrival order.
#[cfg(feature = "std")]
impl MessageSink for std::vec::Vec<InboundMessage> {
    fn deliver(&mut self, message: &InboundMessage) -> bool {
        self.push(message.clone());
        true
    }
}

/// Prints each message as `Message: { topic: "<topic>", data: "<payload>" }`.
///
/// The payload is written as text; invalid UTF-8 is replaced.
///
/// ```rust
/// use libmqtt_session::message::{InboundMessage, QoS};
/// use libmqtt_session::sink::{MessageSink, PrintSink};
///
/// let mut sink = PrintSink::new(Vec::new());
/// let message = InboundMessage::new("hello", b"hi there", QoS::AtLeastOnce, false, 1).unwrap();
/// assert!(sink.deliver(&message));
/// assert_eq!(
///     String::from_utf8(sink.into_inner()).unwrap(),
///     "Message: { topic: \"hello\", data: \"hi there\" }\n"
/// );
/// ```
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct PrintSink<W> {
    out: W,
}

#[cfg(feature = "std")]
impl PrintSink<std::io::Stdout> {
    /// Prints to standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[cfg(feature = "std")]
impl<W: Write> PrintSink<W> {
    /// Prints to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(feature = "std")]
impl<W: Write> MessageSink for PrintSink<W> {
    fn deliver(&mut self, message: &InboundMessage) -> bool {
        let data = std::string::String::from_utf8_lossy(&message.payload);
        let written = writeln!(
            self.out,
            "Message: {{ topic: \"{}\", data: \"{}\" }}",
            message.topic, data
        )
        .and_then(|_| self.out.flush());
        if let Err(e) = written {
            log::warn!("Could not print message on {}: {}", message.topic, e);
        }
        true
    }
}

/// The message a publish-mode session sends, and its delivery progress.
///
/// The message is handed to the client once per connection until the broker
/// confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePublisher {
    message: OutboundMessage,
    attempts: u32,
    confirmed: bool,
    token: Option<DeliveryToken>,
}

impl MessagePublisher {
    /// Wraps the message to send.
    pub fn new(message: OutboundMessage) -> Self {
        Self {
            message,
            attempts: 0,
            confirmed: false,
            token: None,
        }
    }

    /// The message.
    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }

    /// How many times the message was handed to a client.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the broker confirmed delivery.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Delivery token of the confirmed publish, if the client reported one.
    pub fn token(&self) -> Option<DeliveryToken> {
        self.token
    }

    /// Hands the message to `client` under `request`.
    pub fn submit<C: MessagingClient>(
        &mut self,
        client: &mut C,
        request: RequestId,
    ) -> Result<(), FailureCode> {
        self.attempts += 1;
        log::debug!(
            "Publishing {} byte(s) to \"{}\" (attempt {})",
            self.message.payload().len(),
            self.message.topic(),
            self.attempts
        );
        client.publish(request, &self.message)
    }

    /// Records the broker's confirmation.
    pub fn confirm(&mut self, token: Option<DeliveryToken>) {
        self.confirmed = true;
        self.token = token;
    }
}
