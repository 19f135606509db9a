//! Messages and subscriptions exchanged with the broker.
//!
//! All types here use fixed-capacity `heapless` storage so the data model
//! stays usable without an allocator. Capacities follow the limits of the
//! programs this crate drives: topics up to [`MAX_TOPIC_LEN`] bytes, payloads
//! up to [`MAX_PAYLOAD_LEN`] bytes and at most [`MAX_TOPICS`] filters in one
//! subscription request.

use core::fmt;
use heapless::{String, Vec};

/// Maximum length of a topic name or topic filter, in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Maximum payload size, in bytes.
///
/// Matches the 10 KiB default packet limit of common MQTT client libraries,
/// so anything such a library accepts from the broker also fits here.
pub const MAX_PAYLOAD_LEN: usize = 10 * 1024;

/// Maximum number of filters in a [`SubscriptionSet`].
pub const MAX_TOPICS: usize = 8;

/// A topic name or topic filter.
pub type Topic = String<MAX_TOPIC_LEN>;

/// Message payload bytes.
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// Quality of Service levels for MQTT messages.
///
/// ```rust
/// use libmqtt_session::message::QoS;
///
/// assert_eq!(QoS::AtLeastOnce.level(), 1);
/// assert_eq!(QoS::from_level(2), Some(QoS::ExactlyOnce));
/// assert_eq!(QoS::from_level(3), None);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

impl QoS {
    /// Numeric level as carried on the wire.
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Converts a numeric level, rejecting anything above 2.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }
}

/// Errors raised while building messages or subscription sets.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MessageError {
    /// The topic was empty.
    EmptyTopic,
    /// The topic exceeds [`MAX_TOPIC_LEN`].
    TopicTooLong,
    /// The payload exceeds [`MAX_PAYLOAD_LEN`].
    PayloadTooLarge,
    /// A subscription set needs at least one filter.
    EmptySubscriptionSet,
    /// More than [`MAX_TOPICS`] filters were given.
    TooManyTopics,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::EmptyTopic => f.write_str("topic is empty"),
            MessageError::TopicTooLong => {
                write!(f, "topic is longer than {MAX_TOPIC_LEN} bytes")
            }
            MessageError::PayloadTooLarge => {
                write!(f, "payload is larger than {MAX_PAYLOAD_LEN} bytes")
            }
            MessageError::EmptySubscriptionSet => f.write_str("subscription set is empty"),
            MessageError::TooManyTopics => {
                write!(f, "subscription set holds more than {MAX_TOPICS} filters")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MessageError {}

#[cfg(feature = "defmt")]
impl defmt::Format for MessageError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            MessageError::EmptyTopic => defmt::write!(f, "EmptyTopic"),
            MessageError::TopicTooLong => defmt::write!(f, "TopicTooLong"),
            MessageError::PayloadTooLarge => defmt::write!(f, "PayloadTooLarge"),
            MessageError::EmptySubscriptionSet => defmt::write!(f, "EmptySubscriptionSet"),
            MessageError::TooManyTopics => defmt::write!(f, "TooManyTopics"),
        }
    }
}

pub(crate) fn topic_from(topic: &str) -> Result<Topic, MessageError> {
    if topic.is_empty() {
        return Err(MessageError::EmptyTopic);
    }
    let mut owned = Topic::new();
    owned
        .push_str(topic)
        .map_err(|_| MessageError::TopicTooLong)?;
    Ok(owned)
}

pub(crate) fn payload_from(payload: &[u8]) -> Result<Payload, MessageError> {
    Payload::from_slice(payload).map_err(|_| MessageError::PayloadTooLarge)
}

/// The single message a publish-mode session sends.
///
/// Immutable once built; the session hands it to the client once per
/// connection until the broker confirms delivery.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OutboundMessage {
    topic: Topic,
    payload: Payload,
    qos: QoS,
    retained: bool,
}

impl OutboundMessage {
    /// Builds a message, validating topic and payload sizes.
    ///
    /// ```rust
    /// use libmqtt_session::message::{OutboundMessage, QoS};
    ///
    /// let msg = OutboundMessage::new("hello", b"This is a test message", QoS::AtLeastOnce, false)
    ///     .unwrap();
    /// assert_eq!(msg.topic(), "hello");
    /// assert!(!msg.retained());
    /// ```
    pub fn new(
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            topic: topic_from(topic)?,
            payload: payload_from(payload)?,
            qos,
            retained,
        })
    }

    /// Destination topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Requested quality of service.
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Whether the broker should retain the message.
    pub fn retained(&self) -> bool {
        self.retained
    }
}

/// A message delivered by the broker on one of the subscribed filters.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: Topic,
    /// Payload bytes, unmodified.
    pub payload: Payload,
    /// Quality of service the message arrived with.
    pub qos: QoS,
    /// Whether the broker flagged it as a retained message.
    pub retained: bool,
    /// Broker-assigned packet identifier; only meaningful per topic.
    pub sequence: u16,
}

impl InboundMessage {
    /// Copies an arriving message into owned storage.
    pub fn new(
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
        sequence: u16,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            topic: topic_from(topic)?,
            payload: payload_from(payload)?,
            qos,
            retained,
            sequence,
        })
    }
}

/// One topic filter with the maximum QoS requested for it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Subscription {
    /// Topic filter, wildcards allowed.
    pub filter: Topic,
    /// Requested quality of service.
    pub qos: QoS,
}

/// Ordered, non-empty list of filters subscribed in a single request.
///
/// ```rust
/// use libmqtt_session::message::{QoS, SubscriptionSet};
///
/// let set = SubscriptionSet::new(&[
///     ("hello", QoS::AtLeastOnce),
///     ("world", QoS::AtLeastOnce),
///     ("hello/world", QoS::AtLeastOnce),
/// ])
/// .unwrap();
/// assert_eq!(set.len(), 3);
/// assert!(!set.is_single());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubscriptionSet {
    entries: Vec<Subscription, MAX_TOPICS>,
}

impl SubscriptionSet {
    /// Builds a set from `(filter, qos)` pairs, keeping their order.
    pub fn new(entries: &[(&str, QoS)]) -> Result<Self, MessageError> {
        if entries.is_empty() {
            return Err(MessageError::EmptySubscriptionSet);
        }
        if entries.len() > MAX_TOPICS {
            return Err(MessageError::TooManyTopics);
        }

        let mut set = Vec::new();
        for (filter, qos) in entries {
            let subscription = Subscription {
                filter: topic_from(filter)?,
                qos: *qos,
            };
            // Length was checked against capacity above.
            let _ = set.push(subscription);
        }
        Ok(Self { entries: set })
    }

    /// Builds a set that applies the same QoS to every filter.
    pub fn uniform(filters: &[&str], qos: QoS) -> Result<Self, MessageError> {
        let mut pairs: Vec<(&str, QoS), MAX_TOPICS> = Vec::new();
        for filter in filters {
            pairs
                .push((*filter, qos))
                .map_err(|_| MessageError::TooManyTopics)?;
        }
        Self::new(&pairs)
    }

    /// Single-filter set.
    pub fn single(filter: &str, qos: QoS) -> Result<Self, MessageError> {
        Self::new(&[(filter, qos)])
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; kept for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the set holds exactly one filter.
    pub fn is_single(&self) -> bool {
        self.entries.len() == 1
    }

    /// First filter of the set.
    pub fn first(&self) -> &Subscription {
        // Construction guarantees at least one entry.
        &self.entries[0]
    }

    /// Filters in subscription order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }
}
