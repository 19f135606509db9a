//! # libmqtt-session - Asynchronous MQTT Session Lifecycle
//!
//! Drives a non-blocking, callback-completion MQTT client through a full
//! session: create, connect, subscribe or publish, disconnect, destroy.
//! Completions and connection events are handled by an explicit state
//! machine; the program's main thread only waits on shared status flags.
//!
//! ## Features
//!
//! ### Session core (`no_std`)
//! - **Messages**: fixed-capacity topics, payloads and subscription sets
//! - **Status flags**: `finished` / `subscribed` / `disconnected` with
//!   acquire/release ordering
//! - **Callback router**: request identifiers bound to one-shot continuations
//! - **Session controller**: the lifecycle state machine, including one
//!   reconnect on connection loss
//!
//! ### Runtime (`std`)
//! - **Control loop**: callback dispatcher thread, operator quit on `Q`,
//!   bounded waits, exit status
//! - **Configuration**: presets, JSON file and environment overrides
//! - **`rumqttc` adapter**: a [`MessagingClient`](client::MessagingClient)
//!   over the `rumqttc` synchronous client
//!
//! ## Usage
//!
//! ```rust,no_run
//! use libmqtt_session::client::mqtt::MqttClient;
//! use libmqtt_session::config::SessionConfig;
//! use libmqtt_session::control::ControlLoop;
//! use libmqtt_session::message::{QoS, SubscriptionSet};
//! use libmqtt_session::session::Mode;
//! use libmqtt_session::sink::PrintSink;
//!
//! let config = SessionConfig::subscriber();
//! let topics = SubscriptionSet::uniform(&["hello", "world"], QoS::AtLeastOnce).unwrap();
//! let report = ControlLoop::new(&config).unwrap().run::<MqttClient, _, _>(
//!     Mode::Subscribe(topics),
//!     PrintSink::stdout(),
//!     std::io::BufReader::new(std::io::stdin()),
//! );
//! std::process::exit(i32::from(report.status.code()));
//! ```
//!
//! ## Feature Flags
//!
//! - `std`: control loop, configuration loading, printing sink (default)
//! - `rumqttc`: the `rumqttc` client adapter; implies `std` (default)
//! - `defmt`: `defmt::Format` for the public data types

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// Client contract, events and the `rumqttc` adapter.
pub mod client;

/// Session configuration and its sources.
pub mod config;

/// Control loop of a program: dispatcher, operator input, exit status.
#[cfg(feature = "std")]
pub mod control;

/// Messages, topics and subscription sets.
pub mod message;

/// Session state machine and completion routing.
pub mod session;

/// Message sinks and the publish-mode message holder.
pub mod sink;

/// Status flags shared by the callback context and the control loop.
pub mod status;
