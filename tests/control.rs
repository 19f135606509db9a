use std::io::{BufReader, Cursor, Read};
use std::time::Duration;

use libmqtt_session::client::Event;
use libmqtt_session::config::SessionConfig;
use libmqtt_session::control::{ControlLoop, ExitStatus};
use libmqtt_session::message::{InboundMessage, OutboundMessage, QoS, SubscriptionSet};
use libmqtt_session::session::{Mode, SessionError, SessionState};
use libmqtt_session::sink::{DiscardSink, MessagePublisher, MessageSink};

mod mock;

use mock::{Broker, Call, MockClient, Reply, UNREACHABLE, inbound, lock, register};

fn control(client_id: &str) -> ControlLoop {
    let config = SessionConfig::new("localhost:1883", client_id).unwrap();
    ControlLoop::new(&config)
        .unwrap()
        .with_poll_interval(Duration::from_millis(5))
}

fn auto() -> Broker {
    Broker {
        auto: true,
        ..Broker::default()
    }
}

/// Input that blocks until the test's writer side hangs up.
struct Blocking(std::sync::mpsc::Receiver<u8>);

impl Read for Blocking {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.recv() {
            Ok(byte) if !buf.is_empty() => {
                buf[0] = byte;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[test]
fn test_publish_scenario_exits_cleanly() {
    let broker = register("control-publish", auto());
    let message =
        OutboundMessage::new("hello", b"This is a test message", QoS::AtLeastOnce, false).unwrap();

    let report = control("control-publish").run::<MockClient, _, _>(
        Mode::Publish(MessagePublisher::new(message)),
        DiscardSink,
        std::io::empty(),
    );

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.state, SessionState::Disconnected);
    assert!(report.flags.finished);
    assert!(report.flags.disconnected);
    assert!(report.sink.is_some());

    let broker = lock(&broker);
    let kinds: Vec<&str> = broker
        .calls
        .iter()
        .map(|call| match call {
            Call::SetCallbacks => "callbacks",
            Call::Connect(_) => "connect",
            Call::Publish(..) => "publish",
            Call::Disconnect(_) => "disconnect",
            Call::Destroy => "destroy",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        ["callbacks", "connect", "publish", "disconnect", "destroy"]
    );
}

#[test]
fn test_subscribe_scenario_forwards_and_quits() {
    let mut script = auto();
    script.after_subscribe = vec![Event::MessageArrived(inbound("hello", b"ping"))];
    let broker = register("control-subscribe", script);

    let report = control("control-subscribe").run::<MockClient, _, _>(
        Mode::Subscribe(SubscriptionSet::single("hello", QoS::AtLeastOnce).unwrap()),
        Vec::<InboundMessage>::new(),
        Cursor::new("Q\n"),
    );

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.state, SessionState::Disconnected);
    assert!(report.flags.disconnected);
    assert_eq!(report.times_ready, 1);

    let received = report.sink.expect("sink returned after destroy");
    assert_eq!(received, vec![inbound("hello", b"ping")]);

    let broker = lock(&broker);
    assert_eq!(broker.count(|call| matches!(call, Call::Disconnect(_))), 1);
    assert_eq!(broker.calls.last(), Some(&Call::Destroy));
}

#[test]
fn test_end_of_input_requests_quit() {
    register("control-eof", auto());
    let report = control("control-eof").run::<MockClient, _, _>(
        Mode::Subscribe(
            SubscriptionSet::uniform(&["hello", "world", "hello/world"], QoS::AtLeastOnce)
                .unwrap(),
        ),
        Vec::<InboundMessage>::new(),
        std::io::empty(),
    );
    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.state, SessionState::Disconnected);
}

#[test]
fn test_other_input_lines_are_ignored() {
    let broker = register("control-lines", auto());
    let (feed, bytes) = std::sync::mpsc::channel::<u8>();
    let input = BufReader::new(Blocking(bytes));

    let operator = std::thread::spawn(move || {
        for byte in b"hello\n" {
            feed.send(*byte).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        for byte in b"q\n" {
            feed.send(*byte).unwrap();
        }
    });

    let report = control("control-lines").run::<MockClient, _, _>(
        Mode::Subscribe(SubscriptionSet::single("hello", QoS::AtLeastOnce).unwrap()),
        Vec::<InboundMessage>::new(),
        input,
    );
    operator.join().unwrap();

    assert_eq!(report.state, SessionState::Disconnected);
    assert_eq!(lock(&broker).count(|call| matches!(call, Call::Disconnect(_))), 1);
}

#[test]
fn test_reconnect_after_loss_then_quit() {
    let mut script = auto();
    script.after_subscribe = vec![Event::connection_lost(Some("broker restarted"))];
    let broker = register("control-reconnect", script);
    let (feed, bytes) = std::sync::mpsc::channel::<u8>();

    // Quit only once the reconnect has long settled.
    let operator = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        for byte in b"Q\n" {
            feed.send(*byte).unwrap();
        }
    });

    let report = control("control-reconnect").run::<MockClient, _, _>(
        Mode::Subscribe(SubscriptionSet::single("hello", QoS::AtLeastOnce).unwrap()),
        Vec::<InboundMessage>::new(),
        BufReader::new(Blocking(bytes)),
    );
    operator.join().unwrap();

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.state, SessionState::Disconnected);
    let broker = lock(&broker);
    assert_eq!(broker.connects(), 2);
    assert_eq!(
        broker.count(|call| matches!(call, Call::Subscribe(..))),
        2
    );
}

#[test]
fn test_end_of_input_during_reconnect_still_quits() {
    let mut script = auto();
    script.after_subscribe = vec![Event::connection_lost(Some("broker restarted"))];
    let broker = register("control-eof-reconnect", script);

    let report = control("control-eof-reconnect").run::<MockClient, _, _>(
        Mode::Subscribe(SubscriptionSet::single("hello", QoS::AtLeastOnce).unwrap()),
        Vec::<InboundMessage>::new(),
        std::io::empty(),
    );

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.state, SessionState::Disconnected);
    assert_eq!(report.times_ready, 2);
    let broker = lock(&broker);
    assert_eq!(broker.connects(), 2);
    assert_eq!(broker.count(|call| matches!(call, Call::Disconnect(_))), 1);
}

/// Sink that panics on the first message.
struct Exploding;

impl MessageSink for Exploding {
    fn deliver(&mut self, _message: &InboundMessage) -> bool {
        panic!("sink failed");
    }
}

#[test]
fn test_dispatcher_panic_ends_run_with_failure() {
    let mut script = auto();
    script.after_subscribe = vec![Event::MessageArrived(inbound("hello", b"ping"))];
    register("control-panic", script);

    let report = control("control-panic").run::<MockClient, _, _>(
        Mode::Subscribe(SubscriptionSet::single("hello", QoS::AtLeastOnce).unwrap()),
        Exploding,
        std::io::empty(),
    );

    assert_eq!(report.status, ExitStatus::Failure);
    assert_eq!(report.error, Some(SessionError::Dispatch));
    assert!(report.sink.is_none());
}

#[test]
fn test_subscribe_many_failure_exits_with_failure() {
    let mut script = auto();
    script.subscribe = Reply::Fail(128);
    let broker = register("control-suback", script);

    let report = control("control-suback").run::<MockClient, _, _>(
        Mode::Subscribe(
            SubscriptionSet::uniform(&["hello", "world", "hello/world"], QoS::AtLeastOnce)
                .unwrap(),
        ),
        Vec::<InboundMessage>::new(),
        Cursor::new("Q\n"),
    );

    assert_eq!(report.status, ExitStatus::Failure);
    assert_eq!(report.state, SessionState::Failed);
    assert!(report.flags.finished);
    assert!(!report.flags.disconnected);
    assert!(matches!(report.error, Some(SessionError::Subscribe(_))));

    let broker = lock(&broker);
    assert_eq!(broker.count(|call| matches!(call, Call::Disconnect(_))), 0);
    assert_eq!(broker.calls.last(), Some(&Call::Destroy));
}

#[test]
fn test_connect_failure_exits_with_failure() {
    let mut script = auto();
    script.connect.push_back(Reply::Fail(5));
    let broker = register("control-connack", script);

    let message = OutboundMessage::new("hello", b"x", QoS::AtLeastOnce, false).unwrap();
    let report = control("control-connack").run::<MockClient, _, _>(
        Mode::Publish(MessagePublisher::new(message)),
        DiscardSink,
        std::io::empty(),
    );

    assert_eq!(report.status, ExitStatus::Failure);
    assert!(report.flags.finished);
    assert_eq!(lock(&broker).count(Call::is_subscribe_or_publish), 0);
}

#[test]
fn test_setup_failure_reports_without_session() {
    let config = SessionConfig::new(UNREACHABLE, "control-setup").unwrap();
    let report = ControlLoop::new(&config).unwrap().run::<MockClient, _, _>(
        Mode::Subscribe(SubscriptionSet::single("hello", QoS::AtLeastOnce).unwrap()),
        DiscardSink,
        std::io::empty(),
    );

    assert_eq!(report.status, ExitStatus::Failure);
    assert!(matches!(report.error, Some(SessionError::Setup(_))));
    assert!(report.sink.is_none());
}
