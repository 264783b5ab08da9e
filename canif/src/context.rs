//! Callback context
//!
//! Every callback receives a [`Context`] describing the event being processed. The context is
//! also the only way to manipulate timers and to install another callback for the event source,
//! so timers can be created and changed from dispatcher context only.

use canif_core::{EventKind, SenderHandle};
use embassy_time::Duration;

use crate::dispatcher::EventSourceIndex;
use crate::timer::{millis, TimerError, TimerHandle, Timers};

/// Event handler
///
/// `A` is the application state passed to every dispatcher call, see
/// [`crate::dispatcher::Dispatcher::main`].
pub type Callback<A> = fn(&mut Context<'_, A>);

pub(crate) struct Event<'c> {
    pub kind: EventKind,
    pub source: EventSourceIndex,
    pub user_data: usize,
    pub timer: Option<TimerHandle>,
    pub timer_data: usize,
    pub port: Option<usize>,
    pub sender: Option<SenderHandle>,
    pub data: &'c [u8],
}

pub struct Context<'c, A> {
    event: Event<'c>,
    timers: Timers<'c, A>,
    source_callback: Option<&'c mut Callback<A>>,
    app: &'c mut A,
}

impl<'c, A> Context<'c, A> {
    pub(crate) fn new(
        event: Event<'c>,
        timers: Timers<'c, A>,
        source_callback: Option<&'c mut Callback<A>>,
        app: &'c mut A,
    ) -> Self {
        Self {
            event,
            timers,
            source_callback,
            app,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind
    }

    /// The event source the event belongs to
    ///
    /// For timer events, it is the source whose callback created the timer.
    pub fn event_source(&self) -> EventSourceIndex {
        self.event.source
    }

    /// Index of the external event source. Panics for internal sources.
    pub fn external_source_index(&self) -> usize {
        match self.event.source {
            EventSourceIndex::External(index) => usize::from(index),
            EventSourceIndex::Internal(_) => panic!("not an external event source"),
        }
    }

    /// Index of the internal event source. Panics for external sources.
    pub fn internal_source_index(&self) -> usize {
        match self.event.source {
            EventSourceIndex::Internal(index) => usize::from(index),
            EventSourceIndex::External(_) => panic!("not an internal event source"),
        }
    }

    /// User data registered with the event source
    pub fn event_source_data(&self) -> usize {
        self.event.user_data
    }

    /// Payload of an external event. Empty for all other events.
    pub fn event_data(&self) -> &[u8] {
        self.event.data
    }

    /// Index of the dispatcher port the event was read from
    pub fn port_index(&self) -> Option<usize> {
        self.event.port
    }

    /// Sender handle of an external event source
    pub fn sender_handle(&self) -> Option<SenderHandle> {
        self.event.sender
    }

    /// The elapsed timer, for timer events
    pub fn timer_handle(&self) -> Option<TimerHandle> {
        self.event.timer
    }

    /// User data the elapsed timer was created with, for timer events
    ///
    /// Lets timers of several objects share one callback, see
    /// [`Context::create_periodic_timer_with_data`].
    pub fn timer_context_data(&self) -> Option<usize> {
        self.event.timer.map(|_| self.event.timer_data)
    }

    /// The timer whose callback is executing. Panics outside timer events.
    pub fn own_timer_handle(&self) -> TimerHandle {
        match self.event.timer {
            Some(handle) => handle,
            None => panic!("{:?} is not a timer event", self.event.kind),
        }
    }

    /// Dispatcher time in milliseconds, wrapping
    pub fn now_ms(&self) -> i32 {
        self.timers.now()
    }

    pub fn app(&self) -> &A {
        &*self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut *self.app
    }

    /// Payload and application state at once, for handing the payload to the application
    pub fn event_data_and_app_mut(&mut self) -> (&[u8], &mut A) {
        (self.event.data, &mut *self.app)
    }

    /// Replaces the callback of the current event source and returns the old one
    ///
    /// In a timer event, the callback of the elapsed timer is replaced instead.
    /// Internal event sources have no callback of their own beyond their initialization.
    pub fn install_callback(&mut self, callback: Callback<A>) -> Callback<A> {
        match (self.event.timer, self.source_callback.as_deref_mut()) {
            (Some(timer), _) => self.timers.swap_callback(timer, callback),
            (None, Some(current)) => core::mem::replace(current, callback),
            (None, None) => panic!("internal event sources have no callback to replace"),
        }
    }

    /// Creates a timer elapsing every `period`, first after `period`
    ///
    /// A period shorter than the dispatcher tick is extended to the tick.
    pub fn create_periodic_timer(
        &mut self,
        period: Duration,
        callback: Callback<A>,
    ) -> Result<TimerHandle, TimerError> {
        self.create_periodic_timer_with_data(period, Duration::from_ticks(0), callback, 0)
    }

    /// Creates a timer elapsing every `period`, first after `period + shift`
    pub fn create_periodic_timer_shifted(
        &mut self,
        period: Duration,
        shift: Duration,
        callback: Callback<A>,
    ) -> Result<TimerHandle, TimerError> {
        self.create_periodic_timer_with_data(period, shift, callback, 0)
    }

    /// Creates a shifted periodic timer carrying `user_data`, see
    /// [`Context::timer_context_data`]
    pub fn create_periodic_timer_with_data(
        &mut self,
        period: Duration,
        shift: Duration,
        callback: Callback<A>,
        user_data: usize,
    ) -> Result<TimerHandle, TimerError> {
        let owner = self.event.source;
        self.timers
            .create_periodic(millis(period)?, millis(shift)?, callback, owner, user_data)
    }

    /// Creates a timer elapsing once after `delay`
    ///
    /// A zero delay creates a suspended timer, to be started by a retrigger.
    /// With `kill_at_due_time`, the timer is destroyed after it elapsed; the delay must be
    /// greater than zero.
    pub fn create_single_shot_timer(
        &mut self,
        delay: Duration,
        callback: Callback<A>,
        kill_at_due_time: bool,
    ) -> Result<TimerHandle, TimerError> {
        self.create_single_shot_timer_with_data(delay, callback, kill_at_due_time, 0)
    }

    /// Creates a single-shot timer carrying `user_data`, see [`Context::timer_context_data`]
    pub fn create_single_shot_timer_with_data(
        &mut self,
        delay: Duration,
        callback: Callback<A>,
        kill_at_due_time: bool,
        user_data: usize,
    ) -> Result<TimerHandle, TimerError> {
        let owner = self.event.source;
        self.timers.create_single_shot(
            millis(delay)?,
            kill_at_due_time,
            callback,
            owner,
            user_data,
        )
    }

    pub fn kill_timer(&mut self, handle: TimerHandle) {
        self.timers.kill(handle)
    }

    /// Stops a single-shot timer. A timer created with `kill_at_due_time` is killed.
    pub fn suspend_single_shot_timer(&mut self, handle: TimerHandle) {
        self.timers.suspend(handle)
    }

    /// Lets a single-shot timer elapse `delay` from now, whatever its state was
    ///
    /// A running auto-kill timer is postponed. Retriggering it from its own callback has no
    /// effect, it is destroyed after the callback returns.
    pub fn retrigger_single_shot_timer(
        &mut self,
        handle: TimerHandle,
        delay: Duration,
    ) -> Result<(), TimerError> {
        self.timers.retrigger(handle, millis(delay)?)
    }

    pub fn is_timer_running(&mut self, handle: TimerHandle) -> bool {
        self.timers.is_running(handle)
    }
}
