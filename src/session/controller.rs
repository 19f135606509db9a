//! The session state machine.

use log::{debug, error, info, warn};

use super::error::SessionError;
use super::router::{CallbackRouter, Continuation, Operation};
use super::{Mode, Session, SessionState};
use crate::client::{
    Completion, ConnectOptions, DeliveryToken, Event, FailureCode, MessagingClient, RequestId,
};
use crate::message::InboundMessage;
use crate::sink::MessageSink;
use crate::status::StatusFlags;

/// Drives one [`Session`] from connect to disconnect.
///
/// The controller is the only writer of session state. All of its handlers
/// run on the callback context, one event at a time, in the order the events
/// were posted. Progress is published to the control loop through the
/// borrowed [`StatusFlags`].
///
/// At most one request is outstanding at any time. A connection loss abandons
/// it, clears `subscribed` and issues exactly one reconnect; completions that
/// belong to abandoned requests are dropped.
pub struct SessionController<'a, C, K> {
    session: Session<C>,
    mode: Mode,
    options: ConnectOptions,
    router: CallbackRouter,
    sink: K,
    flags: &'a StatusFlags,
    last_error: Option<SessionError>,
    reconnects: u32,
    quit_on_ready: bool,
}

impl<'a, C, K> SessionController<'a, C, K>
where
    C: MessagingClient,
    K: MessageSink,
{
    /// Wraps a freshly created session. Nothing is issued yet.
    pub fn new(
        session: Session<C>,
        mode: Mode,
        options: ConnectOptions,
        sink: K,
        flags: &'a StatusFlags,
    ) -> Self {
        Self {
            session,
            mode,
            options,
            router: CallbackRouter::new(),
            sink,
            flags,
            last_error: None,
            reconnects: 0,
            quit_on_ready: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Publish or subscribe configuration, including publish progress.
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Flags shared with the control loop.
    pub fn flags(&self) -> &'a StatusFlags {
        self.flags
    }

    /// Most recent failure, fatal or not.
    pub fn last_error(&self) -> Option<SessionError> {
        self.last_error
    }

    /// Requests issued and not yet completed or abandoned.
    pub fn outstanding_requests(&self) -> usize {
        self.router.outstanding()
    }

    /// Connection losses that triggered a reconnect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnects
    }

    /// The underlying session.
    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    /// The message sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Whether the session ended without a fatal failure.
    pub fn succeeded(&self) -> bool {
        self.state() != SessionState::Failed
    }

    /// Issues the connect request.
    ///
    /// Valid in `Created` and `Reconnecting`. A synchronous refusal fails the
    /// session: state `Failed`, `finished` raised.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if !matches!(state, SessionState::Created | SessionState::Reconnecting) {
            return Err(SessionError::InvalidState {
                operation: Operation::Connect,
                state,
            });
        }

        let request = self.register(Operation::Connect)?;
        self.session.set_state(SessionState::Connecting);
        info!(
            "Connecting to {} as {}",
            self.session.identity().address,
            self.session.identity().client_id
        );

        let options = self.options;
        if let Err(code) = self.session.client_mut().connect(request, &options) {
            self.router.withdraw(request);
            let error = SessionError::Connect(code);
            self.fail(error);
            return Err(error);
        }
        Ok(())
    }

    /// Handles one event from the queue.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Completed(completion) => self.on_completion(completion),
            Event::ConnectionLost { cause } => self.on_connection_lost(cause.as_deref()),
            Event::MessageArrived(message) => self.on_message(message),
            Event::QuitRequested => {
                let _ = self.request_quit();
            }
            Event::InputClosed => self.on_input_closed(),
        }
    }

    /// Routes a completion to its continuation.
    pub fn on_completion(&mut self, completion: Completion) {
        let continuation = match self.router.route(&completion) {
            Ok(continuation) => continuation,
            Err(e) => {
                debug!("Dropping completion in state {}: {}", self.state(), e);
                return;
            }
        };

        match continuation {
            Continuation::Connected => self.on_connected(),
            Continuation::ConnectFailed(code) => self.fail(SessionError::Connect(code)),
            Continuation::Subscribed => self.on_subscribed(),
            Continuation::SubscribeFailed(code) => self.fail(SessionError::Subscribe(code)),
            Continuation::Delivered(token) => self.on_delivered(token),
            Continuation::SendFailed(code) => self.on_send_failed(code),
            Continuation::Disconnected => self.on_disconnected(None),
            Continuation::DisconnectFailed(code) => {
                self.on_disconnected(Some(SessionError::Disconnect(code)))
            }
        }
    }

    /// Reacts to the connection dropping.
    ///
    /// In a live state the outstanding request is abandoned, `subscribed` is
    /// cleared and one reconnect is issued. Elsewhere the loss is ignored.
    pub fn on_connection_lost(&mut self, cause: Option<&str>) {
        let state = self.state();
        if !state.is_live() {
            debug!("Ignoring connection loss in state {}", state);
            return;
        }

        match cause {
            Some(cause) => warn!("Connection lost. Cause: {}", cause),
            None => warn!("Connection lost."),
        }

        let abandoned = self.router.abandon_all();
        if abandoned > 0 {
            debug!("Abandoned {} outstanding request(s)", abandoned);
        }
        self.flags.clear_subscribed();
        self.session.set_state(SessionState::Reconnecting);
        self.reconnects += 1;

        info!("Reconnecting...");
        // A refused reconnect already failed the session.
        let _ = self.connect();
    }

    /// Forwards an arriving message to the sink in subscribe mode.
    pub fn on_message(&mut self, message: InboundMessage) {
        if !self.mode.is_subscribe() {
            debug!("Ignoring message on {} in publish mode", message.topic);
            return;
        }
        if !self.sink.deliver(&message) {
            warn!("Message on {} was not consumed", message.topic);
        }
    }

    /// Operator quit. Honoured only by a subscribe-mode session in `Ready`.
    pub fn request_quit(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if self.mode.is_subscribe() && state == SessionState::Ready {
            return self.disconnect();
        }
        warn!("Ignoring quit request in state {}", state);
        Err(SessionError::InvalidState {
            operation: Operation::Disconnect,
            state,
        })
    }

    /// End of operator input in subscribe mode.
    ///
    /// Disconnects right away in `Ready`. While the session is still on its
    /// way to `Ready`, for instance reconnecting, the quit is remembered and
    /// carried out as soon as the subscription completes.
    pub fn on_input_closed(&mut self) {
        let state = self.state();
        if !self.mode.is_subscribe() || !state.is_live() {
            debug!("Ignoring end of input in state {}", state);
            return;
        }
        if state == SessionState::Ready {
            let _ = self.disconnect();
        } else {
            info!("Input closed; quitting once subscribed again");
            self.quit_on_ready = true;
        }
    }

    /// Issues the disconnect request.
    ///
    /// Valid in `Connected`, `Publishing` and `Ready`. A synchronous refusal
    /// terminates the session as `Failed` with both `disconnected` and
    /// `finished` raised.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if !matches!(
            state,
            SessionState::Connected | SessionState::Publishing | SessionState::Ready
        ) {
            return Err(SessionError::InvalidState {
                operation: Operation::Disconnect,
                state,
            });
        }

        let request = self.register(Operation::Disconnect)?;
        self.session.set_state(SessionState::Disconnecting);
        info!("Disconnecting.");

        if let Err(code) = self.session.client_mut().disconnect(request) {
            self.router.withdraw(request);
            let error = SessionError::Disconnect(code);
            self.flags.set_disconnected();
            self.fail(error);
            return Err(error);
        }
        Ok(())
    }

    /// Fails the session from outside the callback context.
    ///
    /// Used when events can no longer be dispatched; afterwards the
    /// controller can be destroyed. A terminated session is left as it is.
    pub fn abort(&mut self, error: SessionError) {
        if !self.state().is_terminal() {
            self.fail(error);
        }
    }

    /// Releases the client handle once the session terminated.
    ///
    /// Gives the controller back untouched if neither `finished` nor
    /// `disconnected` has been raised yet. On success the sink is returned.
    pub fn destroy(self) -> Result<K, Self> {
        if !(self.flags.is_finished() || self.flags.is_disconnected()) {
            return Err(self);
        }
        let Self { session, sink, .. } = self;
        session.destroy();
        debug!("Client destroyed.");
        Ok(sink)
    }

    fn register(&mut self, operation: Operation) -> Result<RequestId, SessionError> {
        reserve(&mut self.router, operation)
    }

    fn on_connected(&mut self) {
        self.session.set_state(SessionState::Connected);
        info!("Successfully connected.");

        if self.flags.is_finished() {
            debug!("Session already finished; issuing nothing further");
            return;
        }

        match &self.mode {
            Mode::Subscribe(_) => self.subscribe(),
            Mode::Publish(publisher) if publisher.is_confirmed() => {
                let _ = self.disconnect();
            }
            Mode::Publish(_) => self.publish(),
        }
    }

    pub(super) fn subscribe(&mut self) {
        let Mode::Subscribe(set) = &self.mode else {
            let state = self.state();
            return self.fail(SessionError::InvalidState {
                operation: Operation::Subscribe,
                state,
            });
        };
        let request = match reserve(&mut self.router, Operation::Subscribe) {
            Ok(request) => request,
            Err(e) => return self.fail(e),
        };
        self.session.set_state(SessionState::Subscribing);

        for subscription in set.iter() {
            info!(
                "Subscribing to topic \"{}\" for client {} using QoS {}",
                subscription.filter,
                self.session.identity().client_id,
                subscription.qos.level()
            );
        }

        let client = self.session.client_mut();
        let issued = if set.is_single() {
            let only = set.first();
            client.subscribe(request, &only.filter, only.qos)
        } else {
            client.subscribe_many(request, set)
        };

        if let Err(code) = issued {
            self.router.withdraw(request);
            self.fail(SessionError::Subscribe(code));
        }
    }

    fn on_subscribed(&mut self) {
        self.session.set_state(SessionState::Ready);
        self.flags.set_subscribed();
        info!("Subscribed to requested topics.");

        if core::mem::take(&mut self.quit_on_ready) {
            info!("Quitting on closed input.");
            let _ = self.disconnect();
        }
    }

    pub(super) fn publish(&mut self) {
        let Mode::Publish(publisher) = &mut self.mode else {
            let state = self.state();
            return self.fail(SessionError::InvalidState {
                operation: Operation::Publish,
                state,
            });
        };
        let request = match reserve(&mut self.router, Operation::Publish) {
            Ok(request) => request,
            Err(e) => return self.fail(e),
        };
        self.session.set_state(SessionState::Publishing);

        if let Err(code) = publisher.submit(self.session.client_mut(), request) {
            self.router.withdraw(request);
            self.on_send_failed(code);
        }
    }

    fn on_delivered(&mut self, token: Option<DeliveryToken>) {
        if let Mode::Publish(publisher) = &mut self.mode {
            publisher.confirm(token);
        }
        match token {
            Some(token) => info!("Message with token value {} delivery confirmed.", token.0),
            None => info!("Message delivery confirmed."),
        }
        let _ = self.disconnect();
    }

    fn on_send_failed(&mut self, code: FailureCode) {
        let error = SessionError::Send(code);
        error!("{}", error);
        self.last_error = Some(error);
        let _ = self.disconnect();
    }

    fn on_disconnected(&mut self, failure: Option<SessionError>) {
        match failure {
            Some(error) => {
                error!("{}", error);
                self.last_error = Some(error);
            }
            None => info!("Successful disconnection."),
        }
        self.session.set_state(SessionState::Disconnected);
        self.flags.set_disconnected();
        self.flags.set_finished();
    }

    fn fail(&mut self, error: SessionError) {
        error!("{}", error);
        self.last_error = Some(error);
        self.router.abandon_all();
        self.session.set_state(SessionState::Failed);
        self.flags.set_finished();
    }
}

/// Registers a request, keeping at most one outstanding.
fn reserve(router: &mut CallbackRouter, operation: Operation) -> Result<RequestId, SessionError> {
    if router.outstanding() > 0 {
        return Err(SessionError::Busy(operation));
    }
    router
        .register(operation)
        .map_err(|_| SessionError::Busy(operation))
}

impl<C, K> core::fmt::Debug for SessionController<'_, C, K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.session.state())
            .field("mode", &self.mode)
            .field("outstanding", &self.router.outstanding())
            .field("flags", self.flags)
            .field("last_error", &self.last_error)
            .finish()
    }
}
