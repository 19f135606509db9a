//! Completion dispatch for outstanding requests.
//!
//! Every request the controller issues is registered here first. The router
//! hands out the [`RequestId`] the client echoes back in its completion and,
//! when the completion arrives, removes the entry and names the continuation
//! to run. Removal on routing means a continuation fires at most once;
//! completions for abandoned or unknown requests are rejected.

use core::fmt;
use heapless::LinearMap;

use super::error::RouterError;
use crate::client::{Completion, DeliveryToken, FailureCode, Outcome, RequestId};

/// Capacity of the dispatch table.
pub const MAX_OUTSTANDING: usize = 4;

/// Kind of request a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    /// Connect handshake.
    Connect,
    /// Subscription request.
    Subscribe,
    /// Message publication.
    Publish,
    /// Graceful disconnect.
    Disconnect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Connect => "connect",
            Operation::Subscribe => "subscribe",
            Operation::Publish => "publish",
            Operation::Disconnect => "disconnect",
        })
    }
}

/// Handler selected for a routed completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Continuation {
    /// `ConnectSuccess`.
    Connected,
    /// `ConnectFailure`.
    ConnectFailed(FailureCode),
    /// `SubscribeSuccess`.
    Subscribed,
    /// `SubscribeFailure`.
    SubscribeFailed(FailureCode),
    /// `SendSuccess`.
    Delivered(Option<DeliveryToken>),
    /// `SendFailure`.
    SendFailed(FailureCode),
    /// `DisconnectSuccess`.
    Disconnected,
    /// `DisconnectFailure`.
    DisconnectFailed(FailureCode),
}

impl Continuation {
    fn select(operation: Operation, outcome: Outcome) -> Self {
        match (operation, outcome) {
            (Operation::Connect, Outcome::Success { .. }) => Continuation::Connected,
            (Operation::Connect, Outcome::Failure { code }) => Continuation::ConnectFailed(code),
            (Operation::Subscribe, Outcome::Success { .. }) => Continuation::Subscribed,
            (Operation::Subscribe, Outcome::Failure { code }) => {
                Continuation::SubscribeFailed(code)
            }
            (Operation::Publish, Outcome::Success { token }) => Continuation::Delivered(token),
            (Operation::Publish, Outcome::Failure { code }) => Continuation::SendFailed(code),
            (Operation::Disconnect, Outcome::Success { .. }) => Continuation::Disconnected,
            (Operation::Disconnect, Outcome::Failure { code }) => {
                Continuation::DisconnectFailed(code)
            }
        }
    }
}

/// Table of outstanding requests keyed by [`RequestId`].
#[derive(Debug, Default)]
pub struct CallbackRouter {
    next_request: u32,
    pending: LinearMap<RequestId, Operation, MAX_OUTSTANDING>,
}

impl CallbackRouter {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request about to be issued and returns its identifier.
    pub fn register(&mut self, operation: Operation) -> Result<RequestId, RouterError> {
        let request = RequestId(self.next_request);
        self.pending
            .insert(request, operation)
            .map_err(|_| RouterError::Full)?;
        self.next_request = self.next_request.wrapping_add(1);
        Ok(request)
    }

    /// Drops the entry of a request the client refused synchronously.
    pub fn withdraw(&mut self, request: RequestId) -> Option<Operation> {
        self.pending.remove(&request)
    }

    /// Forgets every outstanding request. Late completions for them will be
    /// rejected by [`route`](Self::route).
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }

    /// Resolves a completion to its continuation, consuming the entry.
    pub fn route(&mut self, completion: &Completion) -> Result<Continuation, RouterError> {
        let operation = self
            .pending
            .remove(&completion.request)
            .ok_or(RouterError::UnknownRequest(completion.request))?;
        Ok(Continuation::select(operation, completion.outcome))
    }

    /// Operation registered under `request`, if still outstanding.
    pub fn operation(&self, request: RequestId) -> Option<Operation> {
        self.pending.get(&request).copied()
    }

    /// Number of outstanding requests.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}
