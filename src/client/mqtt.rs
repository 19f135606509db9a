//! [`MessagingClient`] over the synchronous `rumqttc` client.
//!
//! `rumqttc` splits a connection into a [`Client`] (request handle) and a
//! [`Connection`] that must be iterated to move packets. The adapter owns a
//! driver thread that iterates the connection and turns notifications into
//! completions:
//!
//! | request      | completes on                                       |
//! |--------------|----------------------------------------------------|
//! | connect      | `ConnAck`, or the connection error                 |
//! | subscribe    | `SubAck` (any refused filter → code `128`)         |
//! | publish      | QoS 0: sent; QoS 1: `PubAck`; QoS 2: `PubComp`     |
//! | disconnect   | outgoing `Disconnect`                              |
//!
//! The driver only iterates after a connect request. On a connection error
//! it stops and waits for the next connect, so a reconnect is always an
//! explicit request of the session. Publishes `rumqttc` queued for replay
//! after the error are discarded at that point: the session re-issues its
//! own request once connected, and the message must not go out twice.
//!
//! Inbound packets are capped at [`MAX_PAYLOAD_LEN`] bytes, so every
//! publish the library accepts fits an [`InboundMessage`]. Messages on topics
//! longer than [`MAX_TOPIC_LEN`](crate::message::MAX_TOPIC_LEN) are dropped
//! with a warning.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event as MqttEvent, EventLoop,
    MqttOptions, Outgoing, Packet, QoS as MqttQoS, SubscribeFilter, SubscribeReasonCode,
};

use super::{
    Completion, ConnectOptions, DeliveryToken, Event, EventSink, FailureCode, MessagingClient,
    RequestId,
};
use crate::message::{
    InboundMessage, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN, OutboundMessage, QoS, SubscriptionSet,
};

/// Port used when the address does not name one.
pub const DEFAULT_PORT: u16 = 1883;

/// Capacity of the request channel between handle and driver.
const REQUEST_CAPACITY: usize = 16;

/// Largest packet accepted from the broker. A publish within it always has a
/// payload of at most [`MAX_PAYLOAD_LEN`] bytes.
const INCOMING_PACKET_LIMIT: usize = MAX_PAYLOAD_LEN;

/// Largest packet sent: a full payload on a full-length topic with a packet id.
const OUTGOING_PACKET_LIMIT: usize = MAX_PAYLOAD_LEN + MAX_TOPIC_LEN + 4;

fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: MqttQoS) -> QoS {
    match qos {
        MqttQoS::AtMostOnce => QoS::AtMostOnce,
        MqttQoS::AtLeastOnce => QoS::AtLeastOnce,
        MqttQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn refusal_code(code: &ConnectReturnCode) -> FailureCode {
    match code {
        ConnectReturnCode::Success => FailureCode(0),
        ConnectReturnCode::RefusedProtocolVersion => FailureCode(1),
        ConnectReturnCode::BadClientId => FailureCode(2),
        ConnectReturnCode::ServiceUnavailable => FailureCode(3),
        ConnectReturnCode::BadUserNamePassword => FailureCode(4),
        ConnectReturnCode::NotAuthorized => FailureCode(5),
        #[allow(unreachable_patterns)]
        _ => FailureCode::FAILURE,
    }
}

/// Splits `host:port`, with an optional `tcp://` or `mqtt://` prefix.
///
/// ```rust
/// use libmqtt_session::client::mqtt::parse_address;
///
/// assert_eq!(parse_address("tcp://localhost:1884"), Some(("localhost".into(), 1884)));
/// assert_eq!(parse_address("broker"), Some(("broker".into(), 1883)));
/// assert_eq!(parse_address("broker:port"), None);
/// ```
pub fn parse_address(address: &str) -> Option<(String, u16)> {
    let address = address
        .strip_prefix("tcp://")
        .or_else(|| address.strip_prefix("mqtt://"))
        .unwrap_or(address);
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (address, DEFAULT_PORT),
    };
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Connect(RequestId),
    Subscribe {
        request: RequestId,
        pkid: Option<u16>,
    },
    Publish {
        request: RequestId,
        qos: QoS,
        pkid: Option<u16>,
    },
    Disconnect(RequestId),
}

#[derive(Default)]
struct DriverState {
    pending: Option<Pending>,
    sink: Option<Box<dyn EventSink>>,
    connected: bool,
    destroyed: bool,
}

impl DriverState {
    fn post(&self, event: Event) {
        if self.destroyed {
            return;
        }
        match &self.sink {
            Some(sink) => {
                if !sink.post(event) {
                    debug!("Event queue closed");
                }
            }
            None => warn!("No callbacks registered; dropping {:?}", event),
        }
    }

    fn complete(&mut self, completion: Completion) {
        self.pending = None;
        self.post(Event::Completed(completion));
    }
}

type Shared = Arc<Mutex<DriverState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, DriverState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

enum DriverCommand {
    Poll,
}

/// Client handle backed by `rumqttc`.
pub struct MqttClient {
    host: String,
    port: u16,
    client_id: String,
    client: Option<Client>,
    commands: Option<Sender<DriverCommand>>,
    driver: Option<JoinHandle<()>>,
    shared: Shared,
}

impl core::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MqttClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("started", &self.client.is_some())
            .finish()
    }
}

impl MqttClient {
    /// Broker host and port this client connects to.
    pub fn broker(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    fn start(&mut self, options: &ConnectOptions) -> Result<(), FailureCode> {
        let mut mqtt_options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        mqtt_options.set_keep_alive(Duration::from_secs(u64::from(options.keep_alive_seconds)));
        mqtt_options.set_clean_session(options.clean_session);
        mqtt_options.set_max_packet_size(INCOMING_PACKET_LIMIT, OUTGOING_PACKET_LIMIT);

        let (client, connection) = Client::new(mqtt_options, REQUEST_CAPACITY);
        let (commands, inbox) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let driver = thread::Builder::new()
            .name("mqtt-driver".into())
            .spawn(move || drive(connection, inbox, shared))
            .map_err(|e| {
                error!("Failed to start MQTT driver: {}", e);
                FailureCode::FAILURE
            })?;

        self.client = Some(client);
        self.commands = Some(commands);
        self.driver = Some(driver);
        Ok(())
    }

    fn poll(&self) -> Result<(), FailureCode> {
        self.commands
            .as_ref()
            .ok_or(FailureCode::FAILURE)?
            .send(DriverCommand::Poll)
            .map_err(|_| FailureCode::FAILURE)
    }

    fn issue<F>(&self, pending: Pending, send: F) -> Result<(), FailureCode>
    where
        F: FnOnce(&Client) -> Result<(), rumqttc::ClientError>,
    {
        let client = self.client.as_ref().ok_or(FailureCode::DISCONNECTED)?;
        {
            let mut state = lock(&self.shared);
            if !state.connected {
                return Err(FailureCode::DISCONNECTED);
            }
            state.pending = Some(pending);
        }
        send(client).map_err(|e| {
            warn!("Request refused: {}", e);
            lock(&self.shared).pending = None;
            FailureCode::MAX_BUFFERED
        })
    }
}

impl MessagingClient for MqttClient {
    fn create(address: &str, client_id: &str) -> Result<Self, FailureCode> {
        let (host, port) = parse_address(address).ok_or(FailureCode::BAD_ADDRESS)?;
        if client_id.is_empty() {
            return Err(FailureCode::FAILURE);
        }
        Ok(Self {
            host,
            port,
            client_id: client_id.to_string(),
            client: None,
            commands: None,
            driver: None,
            shared: Shared::default(),
        })
    }

    fn set_callbacks<S>(&mut self, sink: S) -> Result<(), FailureCode>
    where
        S: EventSink + 'static,
    {
        lock(&self.shared).sink = Some(Box::new(sink));
        Ok(())
    }

    fn connect(&mut self, request: RequestId, options: &ConnectOptions) -> Result<(), FailureCode> {
        lock(&self.shared).pending = Some(Pending::Connect(request));
        if self.client.is_none() {
            if let Err(code) = self.start(options) {
                lock(&self.shared).pending = None;
                return Err(code);
            }
        }
        info!("Connecting to {}:{}", self.host, self.port);
        self.poll().inspect_err(|_| lock(&self.shared).pending = None)
    }

    fn subscribe(&mut self, request: RequestId, topic: &str, qos: QoS) -> Result<(), FailureCode> {
        let pending = Pending::Subscribe { request, pkid: None };
        self.issue(pending, |client| client.try_subscribe(topic, to_mqtt_qos(qos)))
    }

    fn subscribe_many(
        &mut self,
        request: RequestId,
        set: &SubscriptionSet,
    ) -> Result<(), FailureCode> {
        let filters: Vec<SubscribeFilter> = set
            .iter()
            .map(|s| SubscribeFilter::new(s.filter.as_str().to_string(), to_mqtt_qos(s.qos)))
            .collect();
        let pending = Pending::Subscribe { request, pkid: None };
        self.issue(pending, move |client| client.try_subscribe_many(filters))
    }

    fn publish(&mut self, request: RequestId, message: &OutboundMessage) -> Result<(), FailureCode> {
        let pending = Pending::Publish {
            request,
            qos: message.qos(),
            pkid: None,
        };
        self.issue(pending, |client| {
            client.try_publish(
                message.topic(),
                to_mqtt_qos(message.qos()),
                message.retained(),
                message.payload().to_vec(),
            )
        })
    }

    fn disconnect(&mut self, request: RequestId) -> Result<(), FailureCode> {
        self.issue(Pending::Disconnect(request), |client| client.try_disconnect())
    }

    fn destroy(mut self) {
        let connected = {
            let mut state = lock(&self.shared);
            state.destroyed = true;
            state.sink = None;
            state.connected
        };

        // A connected driver keeps iterating until it sends a disconnect.
        let mut stoppable = !connected;
        if let Some(client) = self.client.take() {
            if connected {
                stoppable = client.try_disconnect().is_ok();
            }
        }
        drop(self.commands.take());

        if let Some(driver) = self.driver.take() {
            if stoppable {
                if driver.join().is_err() {
                    error!("MQTT driver panicked");
                }
            } else {
                warn!("Detaching MQTT driver");
            }
        }
        debug!("Released client {}", self.client_id);
    }
}

fn drive(mut connection: Connection, inbox: Receiver<DriverCommand>, shared: Shared) {
    let mut interrupted = false;
    while let Ok(DriverCommand::Poll) = inbox.recv() {
        if core::mem::take(&mut interrupted) {
            let discarded = discard_replay(&mut connection.eventloop);
            if discarded > 0 {
                debug!("Discarded {} request(s) queued for replay", discarded);
            }
        }
        for notification in connection.iter() {
            match notification {
                Ok(event) => {
                    if !on_event(&shared, event) {
                        break;
                    }
                }
                Err(e) => {
                    on_error(&shared, &e);
                    interrupted = true;
                    break;
                }
            }
        }
        if lock(&shared).destroyed {
            break;
        }
    }
    debug!("MQTT driver stopped");
}

/// Drops requests the event loop would resend on its next connection.
fn discard_replay(eventloop: &mut EventLoop) -> usize {
    let discarded = eventloop.pending.len();
    eventloop.pending.clear();
    discarded
}

fn on_event(shared: &Shared, event: MqttEvent) -> bool {
    trace!("MQTT event: {:?}", event);
    let mut state = lock(shared);
    match event {
        MqttEvent::Incoming(Packet::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                state.connected = true;
                if let Some(Pending::Connect(request)) = state.pending {
                    state.complete(Completion::success(request));
                }
            } else if let Some(Pending::Connect(request)) = state.pending {
                state.complete(Completion::failure(request, refusal_code(&ack.code)));
                return false;
            }
        }
        MqttEvent::Outgoing(Outgoing::Subscribe(pkid)) => {
            if let Some(Pending::Subscribe { pkid: slot, .. }) = state.pending.as_mut() {
                *slot = Some(pkid);
            }
        }
        MqttEvent::Incoming(Packet::SubAck(ack)) => {
            if let Some(Pending::Subscribe { request, pkid }) = state.pending {
                if pkid.is_none_or(|pkid| pkid == ack.pkid) {
                    let refused = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    let completion = if refused {
                        Completion::failure(request, FailureCode::SUBSCRIPTION_REFUSED)
                    } else {
                        Completion::success(request)
                    };
                    state.complete(completion);
                }
            }
        }
        MqttEvent::Outgoing(Outgoing::Publish(pkid)) => {
            let sent = match state.pending.as_mut() {
                Some(Pending::Publish {
                    request,
                    qos: QoS::AtMostOnce,
                    ..
                }) => Some(*request),
                Some(Pending::Publish { pkid: slot, .. }) => {
                    *slot = Some(pkid);
                    None
                }
                _ => None,
            };
            if let Some(request) = sent {
                state.complete(Completion::delivered(request, DeliveryToken(pkid)));
            }
        }
        MqttEvent::Incoming(Packet::PubAck(ack)) => {
            acknowledge(&mut state, QoS::AtLeastOnce, ack.pkid);
        }
        MqttEvent::Incoming(Packet::PubComp(comp)) => {
            acknowledge(&mut state, QoS::ExactlyOnce, comp.pkid);
        }
        MqttEvent::Incoming(Packet::Publish(publish)) => {
            match InboundMessage::new(
                &publish.topic,
                &publish.payload,
                from_mqtt_qos(publish.qos),
                publish.retain,
                publish.pkid,
            ) {
                Ok(message) => state.post(Event::MessageArrived(message)),
                Err(e) => warn!("Dropping message on {}: {}", publish.topic, e),
            }
        }
        MqttEvent::Incoming(Packet::Disconnect) => {
            warn!("Broker sent disconnect");
        }
        MqttEvent::Outgoing(Outgoing::Disconnect) => {
            state.connected = false;
            if let Some(Pending::Disconnect(request)) = state.pending {
                state.complete(Completion::success(request));
            }
            return false;
        }
        _ => {}
    }
    true
}

fn acknowledge(state: &mut DriverState, qos: QoS, pkid: u16) {
    if let Some(Pending::Publish {
        request,
        qos: pending_qos,
        pkid: Some(sent),
    }) = state.pending
    {
        if pending_qos == qos && sent == pkid {
            state.complete(Completion::delivered(request, DeliveryToken(pkid)));
        }
    }
}

fn on_error(shared: &Shared, error: &ConnectionError) {
    let mut state = lock(shared);
    let was_connected = core::mem::replace(&mut state.connected, false);
    if state.destroyed {
        return;
    }

    match state.pending {
        Some(Pending::Connect(request)) => {
            let code = match error {
                ConnectionError::ConnectionRefused(code) => refusal_code(code),
                _ => FailureCode::FAILURE,
            };
            warn!("Connect failed: {}", error);
            state.complete(Completion::failure(request, code));
        }
        Some(Pending::Disconnect(request)) => {
            state.complete(Completion::failure(request, FailureCode::DISCONNECTED));
        }
        pending => {
            state.pending = None;
            if was_connected || pending.is_some() {
                state.post(Event::connection_lost(Some(&error.to_string())));
            } else {
                debug!("Connection error while idle: {}", error);
            }
        }
    }
}
