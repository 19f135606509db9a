//! Publishes one message to `hello` and disconnects once it is confirmed.

use std::io;
use std::process::ExitCode;

use libmqtt_session::client::mqtt::MqttClient;
use libmqtt_session::config::SessionConfig;
use libmqtt_session::control::{ControlLoop, ExitStatus};
use libmqtt_session::message::{OutboundMessage, QoS};
use libmqtt_session::session::Mode;
use libmqtt_session::sink::{DiscardSink, MessagePublisher};
use log::{error, info};

const TOPIC: &str = "hello";
const PAYLOAD: &[u8] = b"This is a test message";
const QOS: QoS = QoS::AtLeastOnce;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match SessionConfig::from_env(SessionConfig::publisher()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitStatus::Failure.into();
        }
    };
    let control = match ControlLoop::new(&config) {
        Ok(control) => control,
        Err(e) => {
            error!("{}", e);
            return ExitStatus::Failure.into();
        }
    };
    let message = match OutboundMessage::new(TOPIC, PAYLOAD, QOS, false) {
        Ok(message) => message,
        Err(e) => {
            error!("Invalid message: {}", e);
            return ExitStatus::Failure.into();
        }
    };

    info!("Using client ID {}", config.client_id);
    let report = control.run::<MqttClient, _, _>(
        Mode::Publish(MessagePublisher::new(message)),
        DiscardSink,
        io::empty(),
    );
    report.status.into()
}
