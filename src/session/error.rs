//! Error types for session operations

use core::fmt;

use super::SessionState;
use super::router::Operation;
use crate::client::{FailureCode, RequestId};

/// Failures of the session lifecycle.
///
/// Every variant is handled inside the callback context by a state
/// transition; callers see them as return values or through
/// [`SessionController::last_error`](super::SessionController::last_error).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SessionError {
    /// Creating the client or registering its callbacks failed.
    Setup(FailureCode),
    /// The connect handshake failed or could not be started.
    Connect(FailureCode),
    /// The subscription request failed or could not be started.
    Subscribe(FailureCode),
    /// The message could not be sent. Not fatal: the session disconnects.
    Send(FailureCode),
    /// The disconnect failed. The session is terminated regardless.
    Disconnect(FailureCode),
    /// The connection dropped and could not be re-established.
    ConnectionLost,
    /// Another request is still outstanding.
    Busy(Operation),
    /// The operation is not allowed in the current state.
    InvalidState {
        /// Operation that was refused.
        operation: Operation,
        /// State the session was in.
        state: SessionState,
    },
    /// Address or client id empty or too long.
    InvalidIdentity,
    /// The callback context could not be started or stopped unexpectedly.
    Dispatch,
}

impl SessionError {
    /// Return code attached to the failure, if any.
    pub fn code(&self) -> Option<FailureCode> {
        match self {
            SessionError::Setup(code)
            | SessionError::Connect(code)
            | SessionError::Subscribe(code)
            | SessionError::Send(code)
            | SessionError::Disconnect(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Setup(code) => {
                write!(f, "Could not set up client. Return code: {code}")
            }
            SessionError::Connect(code) => {
                write!(f, "Could not connect to broker. Return code: {code}")
            }
            SessionError::Subscribe(code) => {
                write!(f, "Could not subscribe to all requested topics. Return code: {code}")
            }
            SessionError::Send(code) => {
                write!(f, "Could not send message. Return code: {code}")
            }
            SessionError::Disconnect(code) => {
                write!(f, "Could not disconnect gracefully. Return code: {code}")
            }
            SessionError::ConnectionLost => f.write_str("Connection lost"),
            SessionError::Busy(operation) => {
                write!(f, "Cannot issue {operation}: another request is outstanding")
            }
            SessionError::InvalidState { operation, state } => {
                write!(f, "Cannot issue {operation} in state {state}")
            }
            SessionError::InvalidIdentity => f.write_str("Invalid broker address or client id"),
            SessionError::Dispatch => f.write_str("Callback dispatcher failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SessionError {}

#[cfg(feature = "defmt")]
impl defmt::Format for SessionError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            SessionError::Setup(code) => defmt::write!(f, "Setup({})", code.0),
            SessionError::Connect(code) => defmt::write!(f, "Connect({})", code.0),
            SessionError::Subscribe(code) => defmt::write!(f, "Subscribe({})", code.0),
            SessionError::Send(code) => defmt::write!(f, "Send({})", code.0),
            SessionError::Disconnect(code) => defmt::write!(f, "Disconnect({})", code.0),
            SessionError::ConnectionLost => defmt::write!(f, "ConnectionLost"),
            SessionError::Busy(operation) => defmt::write!(f, "Busy({})", operation),
            SessionError::InvalidState { operation, state } => {
                defmt::write!(f, "InvalidState({}, {})", operation, state)
            }
            SessionError::InvalidIdentity => defmt::write!(f, "InvalidIdentity"),
            SessionError::Dispatch => defmt::write!(f, "Dispatch"),
        }
    }
}

/// Errors raised by the [`CallbackRouter`](super::CallbackRouter).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouterError {
    /// No continuation is registered for this request: it was never issued,
    /// was abandoned, or already completed.
    UnknownRequest(RequestId),
    /// The dispatch table is full.
    Full,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::UnknownRequest(request) => {
                write!(f, "no continuation registered for request {request}")
            }
            RouterError::Full => f.write_str("too many outstanding requests"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RouterError {}
