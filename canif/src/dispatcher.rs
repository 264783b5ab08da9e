//! Dispatcher engine
//!
//! A dispatcher is one independently clocked instance of the event processing loop. The
//! integration calls [`Dispatcher::main`] once per tick period. Each call
//! 1. drains the dispatcher's ports in port order, delivering each event to the current
//!    callback of the external event source it maps to,
//! 2. fires the due timers in creation order,
//! 3. advances the dispatcher clock by one tick.
//!
//! The number of events read from a port per call is limited to the events present at the
//! start of the call. Events posted by callbacks are processed by the next call.
//!
//! Dispatchers share nothing. They may run in different threads or interrupt priorities
//! without further synchronization, see [`crate::system::DispatcherSystem::dispatchers_mut`].

use canif_core::{EventKind, ExternalKind, SenderHandle};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;

use crate::context::{Callback, Context, Event};
use crate::handle_map::{HandleMap, MapError};
use crate::pool::{MemoryPool, OutOfMemory};
use crate::port::{DynamicReceiver, ExternalEvent};
use crate::timer::{millis, Slot, TimerSet};

/// Stable index of an event source within its dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventSourceIndex {
    External(u16),
    Internal(u16),
}

impl EventSourceIndex {
    pub const fn is_external(&self) -> bool {
        matches!(self, EventSourceIndex::External(_))
    }

    pub const fn index(&self) -> usize {
        match self {
            EventSourceIndex::External(index) | EventSourceIndex::Internal(index) => {
                *index as usize
            }
        }
    }
}

/// Static configuration of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DispatcherConfig {
    /// Time between two calls of [`Dispatcher::main`]
    pub tick: Duration,
    pub max_timers: usize,
    pub max_external_sources: usize,
    pub max_internal_sources: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CreateError {
    InvalidConfig,
    InvalidIndex,
    AlreadyCreated,
    /// The configuration requests more event sources than the system has left
    SourceBudgetExceeded,
    OutOfMemory(OutOfMemory),
}

impl From<OutOfMemory> for CreateError {
    fn from(value: OutOfMemory) -> Self {
        CreateError::OutOfMemory(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationError {
    InvalidDispatcher,
    NoSourceSlotLeft,
    HandleMap(MapError),
}

impl From<MapError> for RegistrationError {
    fn from(value: MapError) -> Self {
        RegistrationError::HandleMap(value)
    }
}

pub(crate) struct ExternalSource<A> {
    callback: Callback<A>,
    user_data: usize,
    kind: ExternalKind,
    sender: SenderHandle,
}

struct SourceTable<'a, T> {
    entries: &'a mut [Option<T>],
    len: usize,
}

impl<'a, T> SourceTable<'a, T> {
    fn new<M: RawMutex>(pool: &MemoryPool<'a, M>, capacity: usize) -> Result<Self, OutOfMemory> {
        Ok(Self {
            entries: pool.alloc_slice_with(capacity, |_| None)?,
            len: 0,
        })
    }

    fn next_index(&self) -> Result<u16, RegistrationError> {
        if self.len < self.entries.len() {
            u16::try_from(self.len).map_err(|_| RegistrationError::NoSourceSlotLeft)
        } else {
            Err(RegistrationError::NoSourceSlotLeft)
        }
    }

    fn push(&mut self, entry: T) -> &mut T {
        let slot = &mut self.entries[self.len];
        self.len += 1;
        slot.insert(entry)
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)?.as_ref()
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index)?.as_mut()
    }
}

pub struct Dispatcher<'a, A> {
    ports: &'a mut [&'a mut dyn DynamicReceiver],
    handle_map: &'a mut (dyn HandleMap + Send),
    external: SourceTable<'a, ExternalSource<A>>,
    internal: SourceTable<'a, usize>,
    timers: TimerSet<'a, A>,
    unresolved_events: u32,
}

impl<'a, A> Dispatcher<'a, A> {
    pub(crate) fn new<M: RawMutex>(
        pool: &MemoryPool<'a, M>,
        config: &DispatcherConfig,
        ports: impl IntoIterator<Item = &'a mut dyn DynamicReceiver, IntoIter: ExactSizeIterator>,
        handle_map: &'a mut (dyn HandleMap + Send),
    ) -> Result<Self, CreateError> {
        let tick = millis(config.tick).map_err(|_| CreateError::InvalidConfig)?;
        if tick <= 0 || config.max_timers > usize::from(u16::MAX) {
            return Err(CreateError::InvalidConfig);
        }

        let mut ports = ports.into_iter();
        let ports = pool.alloc_slice_with(ports.len(), |_| unwrap!(ports.next()))?;
        let external = SourceTable::new(pool, config.max_external_sources)?;
        let internal = SourceTable::new(pool, config.max_internal_sources)?;
        let slots = pool.alloc_slice_with(config.max_timers, |_| Slot::vacant())?;

        Ok(Self {
            ports,
            handle_map,
            external,
            internal,
            timers: TimerSet::new(slots, tick),
            unresolved_events: 0,
        })
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.timers.tick() as u64)
    }

    /// Dispatcher time in milliseconds, wrapping
    ///
    /// Starts at zero and advances by the tick period at the end of every [`Dispatcher::main`].
    pub fn now_ms(&self) -> i32 {
        self.timers.now()
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn external_source_count(&self) -> usize {
        self.external.len
    }

    pub fn internal_source_count(&self) -> usize {
        self.internal.len
    }

    /// Number of dequeued events that did not map to an external event source, saturating
    pub fn unresolved_events(&self) -> u32 {
        self.unresolved_events
    }

    /// Kind and sender handle an external event source was registered with
    pub fn external_source_key(&self, index: usize) -> Option<(ExternalKind, SenderHandle)> {
        self.external
            .get(index)
            .map(|source| (source.kind, source.sender))
    }

    pub(crate) fn register_external(
        &mut self,
        kind: ExternalKind,
        sender: SenderHandle,
        init: Callback<A>,
        user_data: usize,
        app: &mut A,
    ) -> Result<EventSourceIndex, RegistrationError> {
        let index = self.external.next_index()?;
        self.handle_map.record(kind, sender, u32::from(index))?;
        let source = self.external.push(ExternalSource {
            callback: init,
            user_data,
            kind,
            sender,
        });

        let source_index = EventSourceIndex::External(index);
        let event = Event {
            kind: EventKind::ExternalSourceInit,
            source: source_index,
            user_data,
            timer: None,
            timer_data: 0,
            port: None,
            sender: Some(sender),
            data: &[],
        };
        let mut context = Context::new(event, self.timers.view(), Some(&mut source.callback), app);
        init(&mut context);
        Ok(source_index)
    }

    pub(crate) fn register_internal(
        &mut self,
        init: Callback<A>,
        user_data: usize,
        app: &mut A,
    ) -> Result<EventSourceIndex, RegistrationError> {
        let index = self.internal.next_index()?;
        self.internal.push(user_data);

        let source_index = EventSourceIndex::Internal(index);
        let event = Event {
            kind: EventKind::InternalSourceInit,
            source: source_index,
            user_data,
            timer: None,
            timer_data: 0,
            port: None,
            sender: None,
            data: &[],
        };
        let mut context = Context::new(event, self.timers.view(), None, app);
        init(&mut context);
        Ok(source_index)
    }

    fn dispatch(&mut self, port: usize, event: &ExternalEvent, app: &mut A) {
        let check_sender = self.handle_map.uses_sender_handle(event.kind);
        let external = &self.external;
        // The resolved source must have been registered for this very event
        let index = self
            .handle_map
            .resolve(event.kind, event.sender)
            .and_then(|index| u16::try_from(index).ok())
            .filter(|&index| {
                external.get(usize::from(index)).is_some_and(|source| {
                    source.kind == event.kind && (!check_sender || source.sender == event.sender)
                })
            });
        let Some(index) = index else {
            error!(
                "Event of kind {} from sender {} does not map to an event source",
                event.kind.into_u8(),
                event.sender.into_u32()
            );
            self.unresolved_events = self.unresolved_events.saturating_add(1);
            debug_assert!(false, "unmapped external event");
            return;
        };

        let source = unwrap!(self.external.get_mut(usize::from(index)));
        let callback = source.callback;
        let event = Event {
            kind: EventKind::External(event.kind),
            source: EventSourceIndex::External(index),
            user_data: source.user_data,
            timer: None,
            timer_data: 0,
            port: Some(port),
            sender: Some(event.sender),
            data: &event.data,
        };
        let mut context = Context::new(event, self.timers.view(), Some(&mut source.callback), app);
        callback(&mut context);
    }

    /// Runs one tick of the dispatcher
    ///
    /// `app` is handed to every callback invoked during the tick, see [`Context::app_mut`].
    pub fn main(&mut self, app: &mut A) {
        for port in 0..self.ports.len() {
            let pending = self.ports[port].pending();
            for _ in 0..pending {
                let Some(event) = self.ports[port].read() else {
                    break;
                };
                self.dispatch(port, &event, app);
            }
        }

        let external = &self.external;
        let internal = &self.internal;
        self.timers.view().advance(|timers, elapsed| {
            let user_data = match elapsed.owner {
                EventSourceIndex::External(index) => {
                    unwrap!(external.get(usize::from(index))).user_data
                }
                EventSourceIndex::Internal(index) => *unwrap!(internal.get(usize::from(index))),
            };
            let event = Event {
                kind: EventKind::TimerElapsed,
                source: elapsed.owner,
                user_data,
                timer: Some(elapsed.handle),
                timer_data: elapsed.user_data,
                port: None,
                sender: None,
                data: &[],
            };
            let mut context = Context::new(event, timers, None, &mut *app);
            (elapsed.callback)(&mut context);
        });
    }
}
