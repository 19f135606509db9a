//! The control loop of a program.
//!
//! [`ControlLoop::run`] owns the whole life of one session:
//!
//! 1. create the client and register the event queue as its callback target;
//! 2. issue the connect request;
//! 3. hand the [`SessionController`] to a dispatcher thread, which becomes
//!    the callback context and drains the event queue;
//! 4. in subscribe mode, wait for `subscribed`, then let operator input
//!    request the quit;
//! 5. wait for `finished` and destroy the client.
//!
//! Waiting never spins: the control thread sleeps on the [`StatusFlags`]
//! signal and re-checks at least once per poll interval.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::client::{ConnectOptions, Event, EventSink, MessagingClient};
use crate::config::SessionConfig;
use crate::session::{Mode, Session, SessionController, SessionError, SessionIdentity, SessionState};
use crate::sink::MessageSink;
use crate::status::{FlagSnapshot, StatusFlags};

/// Default bound on the control loop's sleeps.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Process outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The session ended normally, including after a send failure.
    Success,
    /// Setup failed or the session ended in `Failed`.
    Failure,
}

impl ExitStatus {
    /// Numeric process exit code.
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct SessionReport<K> {
    /// Process outcome.
    pub status: ExitStatus,
    /// State the session ended in.
    pub state: SessionState,
    /// Flags as last observed.
    pub flags: FlagSnapshot,
    /// Last failure recorded by the session.
    pub error: Option<SessionError>,
    /// Times the session reached `Ready`.
    pub times_ready: u32,
    /// The message sink, returned once the client was destroyed.
    pub sink: Option<K>,
}

impl<K> SessionReport<K> {
    fn aborted(error: SessionError) -> Self {
        Self {
            status: ExitStatus::Failure,
            state: SessionState::Failed,
            flags: FlagSnapshot::default(),
            error: Some(error),
            times_ready: 0,
            sink: None,
        }
    }
}

/// Whether an operator input line asks to quit.
///
/// ```rust
/// use libmqtt_session::control::is_quit_line;
///
/// assert!(is_quit_line("Q"));
/// assert!(is_quit_line("quit"));
/// assert!(!is_quit_line(" q"));
/// ```
pub fn is_quit_line(line: &str) -> bool {
    line.starts_with(['Q', 'q'])
}

/// Drives one session from creation to destruction.
#[derive(Debug, Clone)]
pub struct ControlLoop {
    identity: SessionIdentity,
    options: ConnectOptions,
    poll_interval: Duration,
}

impl ControlLoop {
    /// Builds a control loop from a resolved configuration.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        Ok(Self {
            identity: config.identity()?,
            options: config.connect_options(),
            poll_interval: config.poll_interval(),
        })
    }

    /// Overrides the poll bound.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs the session to completion.
    ///
    /// `input` is read on a detached thread once the subscription is ready;
    /// a line starting with `Q` or `q` requests the quit. End of input quits
    /// as soon as the session is ready, waiting out a reconnect if needed.
    /// Publish-mode sessions never read it.
    pub fn run<C, K, R>(&self, mode: Mode, sink: K, input: R) -> SessionReport<K>
    where
        C: MessagingClient + Send,
        K: MessageSink + Send,
        R: BufRead + Send + 'static,
    {
        let flags = StatusFlags::new();
        let (events, queue) = mpsc::channel::<Event>();

        let session = match Session::<C>::create(self.identity.clone(), events.clone()) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create client: {}", e);
                return SessionReport::aborted(e);
            }
        };
        info!(
            "Created client {} for {}",
            self.identity.client_id, self.identity.address
        );

        let subscribe = mode.is_subscribe();
        let mut controller = SessionController::new(session, mode, self.options, sink, &flags);
        if controller.connect().is_err() {
            return finish(controller);
        }

        let slot = Mutex::new(Some(controller));
        let dispatched = thread::scope(|scope| {
            let slot = &slot;
            let dispatcher = thread::Builder::new()
                .name("session-callbacks".into())
                .spawn_scoped(scope, move || take(slot).map(|c| dispatch(c, queue)));
            let dispatcher = match dispatcher {
                Ok(handle) => handle,
                Err(e) => {
                    error!("Failed to start callback dispatcher: {}", e);
                    return None;
                }
            };

            if subscribe
                && wait_for(&flags, |s| s.subscribed || s.finished, self.poll_interval, &dispatcher)
                && !flags.is_finished()
            {
                info!("Press Q<Enter> to quit");
                watch_input(input, events.clone());
            }

            wait_for(&flags, |s| s.finished, self.poll_interval, &dispatcher);
            debug!("Session finished: {:?}", flags);

            match dispatcher.join() {
                Ok(controller) => controller,
                Err(_) => {
                    error!("Callback dispatcher panicked");
                    None
                }
            }
        });

        // A dispatcher that never started leaves the controller in its slot.
        match dispatched.or_else(|| take(&slot)) {
            Some(mut controller) => {
                controller.abort(SessionError::Dispatch);
                finish(controller)
            }
            None => SessionReport {
                flags: flags.snapshot(),
                times_ready: flags.times_ready(),
                ..SessionReport::aborted(SessionError::Dispatch)
            },
        }
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Waits for `condition` while the dispatcher is running.
///
/// Returns whether the condition held; `false` means the dispatcher stopped
/// first.
fn wait_for<T, F>(
    flags: &StatusFlags,
    condition: F,
    poll: Duration,
    dispatcher: &ScopedJoinHandle<'_, T>,
) -> bool
where
    F: Fn(&FlagSnapshot) -> bool,
{
    loop {
        if flags.wait_until_timeout(&condition, poll, poll) {
            return true;
        }
        if dispatcher.is_finished() {
            return condition(&flags.snapshot());
        }
    }
}

/// Callback context: applies queued events until the session terminates.
fn dispatch<'a, C, K>(
    mut controller: SessionController<'a, C, K>,
    queue: Receiver<Event>,
) -> SessionController<'a, C, K>
where
    C: MessagingClient,
    K: MessageSink,
{
    while !controller.state().is_terminal() {
        match queue.recv() {
            Ok(event) => controller.handle(event),
            Err(_) => {
                warn!("Event queue closed in state {}", controller.state());
                break;
            }
        }
    }
    controller
}

/// Reads operator input on a detached thread and posts quit requests.
fn watch_input<R>(input: R, events: Sender<Event>)
where
    R: BufRead + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("operator-input".into())
        .spawn(move || {
            let mut requested = false;
            for line in input.lines() {
                match line {
                    Ok(line) if is_quit_line(&line) => {
                        requested = true;
                        if !events.post(Event::QuitRequested) {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Stopped reading input: {}", e);
                        break;
                    }
                }
            }
            debug!("End of input");
            if !requested {
                events.post(Event::InputClosed);
            }
        });
    if let Err(e) = spawned {
        error!("Failed to start input reader: {}", e);
    }
}

fn finish<C, K>(controller: SessionController<'_, C, K>) -> SessionReport<K>
where
    C: MessagingClient,
    K: MessageSink,
{
    let state = controller.state();
    let error = controller.last_error();
    let flags = controller.flags();
    let status = if controller.succeeded() {
        ExitStatus::Success
    } else {
        ExitStatus::Failure
    };

    let sink = match controller.destroy() {
        Ok(sink) => {
            info!("Client destroyed");
            Some(sink)
        }
        Err(controller) => {
            error!("Session did not terminate (state {})", controller.state());
            None
        }
    };

    SessionReport {
        status,
        state,
        flags: flags.snapshot(),
        error,
        times_ready: flags.times_ready(),
        sink,
    }
}
