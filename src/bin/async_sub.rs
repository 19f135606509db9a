//! Subscribes to `hello` and prints every message until `Q<Enter>`.

use std::io::{self, BufReader};
use std::process::ExitCode;

use libmqtt_session::client::mqtt::MqttClient;
use libmqtt_session::config::SessionConfig;
use libmqtt_session::control::{ControlLoop, ExitStatus};
use libmqtt_session::message::{QoS, SubscriptionSet};
use libmqtt_session::session::Mode;
use libmqtt_session::sink::PrintSink;
use log::{error, info};

const TOPIC: &str = "hello";
const QOS: QoS = QoS::AtLeastOnce;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match SessionConfig::from_env(SessionConfig::subscriber()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitStatus::Failure.into();
        }
    };
    let (control, topics) = match (
        ControlLoop::new(&config),
        SubscriptionSet::single(TOPIC, QOS),
    ) {
        (Ok(control), Ok(topics)) => (control, topics),
        (Err(e), _) => {
            error!("{}", e);
            return ExitStatus::Failure.into();
        }
        (_, Err(e)) => {
            error!("Invalid subscription: {}", e);
            return ExitStatus::Failure.into();
        }
    };

    info!("Using client ID {}", config.client_id);
    let report = control.run::<MqttClient, _, _>(
        Mode::Subscribe(topics),
        PrintSink::stdout(),
        BufReader::new(io::stdin()),
    );
    report.status.into()
}
