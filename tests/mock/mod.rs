//! Scriptable in-memory messaging client shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use libmqtt_session::client::{
    Completion, ConnectOptions, DeliveryToken, Event, EventSink, FailureCode, MessagingClient,
    RequestId,
};
use libmqtt_session::message::{InboundMessage, OutboundMessage, QoS, SubscriptionSet};

/// Address that makes `create` fail.
pub const UNREACHABLE: &str = "unreachable";

/// How the mock answers one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reply {
    /// Accept and complete successfully.
    #[default]
    Succeed,
    /// Accept, then complete with this failure code.
    Fail(i32),
    /// Refuse synchronously with this code.
    Refuse(i32),
    /// Accept and never complete.
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetCallbacks,
    Connect(RequestId),
    Subscribe(RequestId, String, QoS),
    SubscribeMany(RequestId, Vec<String>),
    Publish(RequestId, String, Vec<u8>),
    Disconnect(RequestId),
    Destroy,
}

impl Call {
    pub fn request(&self) -> Option<RequestId> {
        match self {
            Call::Connect(id)
            | Call::Subscribe(id, ..)
            | Call::SubscribeMany(id, _)
            | Call::Publish(id, ..)
            | Call::Disconnect(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_subscribe_or_publish(&self) -> bool {
        matches!(
            self,
            Call::Subscribe(..) | Call::SubscribeMany(..) | Call::Publish(..)
        )
    }
}

/// Shared record of one client: what it was asked and how it answers.
#[derive(Debug, Default)]
pub struct Broker {
    /// Post completions automatically.
    pub auto: bool,
    /// Replies to successive connect attempts; `Succeed` once exhausted.
    pub connect: VecDeque<Reply>,
    pub subscribe: Reply,
    pub publish: Reply,
    pub disconnect: Reply,
    /// Posted once, right after the first successful subscribe completion.
    pub after_subscribe: Vec<Event>,
    pub calls: Vec<Call>,
}

impl Broker {
    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| matches(call)).count()
    }

    pub fn connects(&self) -> usize {
        self.count(|call| matches!(call, Call::Connect(_)))
    }

    pub fn last_request(&self) -> RequestId {
        self.calls
            .iter()
            .rev()
            .find_map(Call::request)
            .expect("no request recorded")
    }
}

pub type SharedBroker = Arc<Mutex<Broker>>;

static REGISTRY: Mutex<Vec<(String, SharedBroker)>> = Mutex::new(Vec::new());

/// Registers the broker a client named `client_id` will use.
pub fn register(client_id: &str, broker: Broker) -> SharedBroker {
    let shared = Arc::new(Mutex::new(broker));
    let mut registry = REGISTRY.lock().unwrap();
    registry.retain(|(id, _)| id != client_id);
    registry.push((client_id.to_string(), Arc::clone(&shared)));
    shared
}

fn lookup(client_id: &str) -> Option<SharedBroker> {
    REGISTRY
        .lock()
        .unwrap()
        .iter()
        .find(|(id, _)| id == client_id)
        .map(|(_, shared)| Arc::clone(shared))
}

pub fn lock(shared: &SharedBroker) -> MutexGuard<'_, Broker> {
    shared.lock().unwrap()
}

pub struct MockClient {
    broker: SharedBroker,
    sink: Option<Box<dyn EventSink>>,
}

impl MockClient {
    /// Client recording into `broker`, for sessions built with `Session::from_client`.
    pub fn attached(broker: &SharedBroker) -> Self {
        Self {
            broker: Arc::clone(broker),
            sink: None,
        }
    }

    fn post(&self, event: Event) {
        if let Some(sink) = &self.sink {
            sink.post(event);
        }
    }

    fn answer(
        &mut self,
        call: Call,
        reply: impl FnOnce(&mut Broker) -> Reply,
    ) -> Result<(), FailureCode> {
        let request = call.request().expect("request call");
        let is_subscribe = matches!(call, Call::Subscribe(..) | Call::SubscribeMany(..));
        let is_publish = matches!(call, Call::Publish(..));

        let (reply, follow_up) = {
            let mut broker = lock(&self.broker);
            broker.calls.push(call);
            let reply = reply(&mut broker);
            if !broker.auto {
                // Manual brokers only refuse; completions come from the test.
                return match reply {
                    Reply::Refuse(code) => Err(FailureCode(code)),
                    _ => Ok(()),
                };
            }
            let follow_up = if is_subscribe && reply == Reply::Succeed {
                std::mem::take(&mut broker.after_subscribe)
            } else {
                Vec::new()
            };
            (reply, follow_up)
        };

        match reply {
            Reply::Refuse(code) => return Err(FailureCode(code)),
            Reply::Silent => return Ok(()),
            Reply::Succeed if is_publish => {
                self.post(Event::Completed(Completion::delivered(request, DeliveryToken(1))));
            }
            Reply::Succeed => self.post(Event::Completed(Completion::success(request))),
            Reply::Fail(code) => {
                self.post(Event::Completed(Completion::failure(request, FailureCode(code))));
            }
        }
        for event in follow_up {
            self.post(event);
        }
        Ok(())
    }
}

impl MessagingClient for MockClient {
    fn create(address: &str, client_id: &str) -> Result<Self, FailureCode> {
        if address == UNREACHABLE {
            return Err(FailureCode::BAD_ADDRESS);
        }
        let broker = lookup(client_id).unwrap_or_else(|| register(client_id, Broker::default()));
        Ok(Self {
            broker,
            sink: None,
        })
    }

    fn set_callbacks<S>(&mut self, sink: S) -> Result<(), FailureCode>
    where
        S: EventSink + 'static,
    {
        lock(&self.broker).calls.push(Call::SetCallbacks);
        self.sink = Some(Box::new(sink));
        Ok(())
    }

    fn connect(&mut self, request: RequestId, _options: &ConnectOptions) -> Result<(), FailureCode> {
        self.answer(Call::Connect(request), |broker| {
            broker.connect.pop_front().unwrap_or_default()
        })
    }

    fn subscribe(&mut self, request: RequestId, topic: &str, qos: QoS) -> Result<(), FailureCode> {
        self.answer(Call::Subscribe(request, topic.to_string(), qos), |broker| {
            broker.subscribe
        })
    }

    fn subscribe_many(
        &mut self,
        request: RequestId,
        set: &SubscriptionSet,
    ) -> Result<(), FailureCode> {
        let filters = set.iter().map(|s| s.filter.to_string()).collect();
        self.answer(Call::SubscribeMany(request, filters), |broker| broker.subscribe)
    }

    fn publish(&mut self, request: RequestId, message: &OutboundMessage) -> Result<(), FailureCode> {
        let call = Call::Publish(request, message.topic().to_string(), message.payload().to_vec());
        self.answer(call, |broker| broker.publish)
    }

    fn disconnect(&mut self, request: RequestId) -> Result<(), FailureCode> {
        self.answer(Call::Disconnect(request), |broker| broker.disconnect)
    }

    fn destroy(self) {
        lock(&self.broker).calls.push(Call::Destroy);
    }
}

/// Inbound message as the library would hand it over.
pub fn inbound(topic: &str, payload: &[u8]) -> InboundMessage {
    InboundMessage::new(topic, payload, QoS::AtLeastOnce, false, 1).unwrap()
}
