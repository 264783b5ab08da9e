//! Dispatcher system
//!
//! The system owns all dispatchers of an integration. It is created once at startup, followed
//! by the creation of its dispatchers and the registration of all event sources. The
//! registration of an event source synchronously invokes its initialization callback, which
//! typically creates the timers of the source.
//!
//! ```
//! use core::mem::MaybeUninit;
//! use canif::context::Context;
//! use canif::dispatcher::DispatcherConfig;
//! use canif::driver::time::Duration;
//! use canif::handle_map::IdentityMap;
//! use canif::pool::MemoryPool;
//! use canif::system::DispatcherSystem;
//! use embassy_sync::blocking_mutex::raw::NoopRawMutex;
//! use static_cell::StaticCell;
//!
//! #[derive(Default)]
//! struct App {
//!     ticks: u32,
//! }
//!
//! fn on_init(ctx: &mut Context<'_, App>) {
//!     ctx.create_periodic_timer(Duration::from_millis(10), on_tick).unwrap();
//! }
//!
//! fn on_tick(ctx: &mut Context<'_, App>) {
//!     ctx.app_mut().ticks += 1;
//! }
//!
//! static HEAP: StaticCell<[MaybeUninit<u8>; 1024]> = StaticCell::new();
//! static MAP: StaticCell<IdentityMap> = StaticCell::new();
//!
//! let pool = MemoryPool::<NoopRawMutex>::new(HEAP.init([MaybeUninit::uninit(); 1024]));
//! let mut system = DispatcherSystem::new(&pool, 1, 0, 1).unwrap();
//! let config = DispatcherConfig {
//!     tick: Duration::from_millis(10),
//!     max_timers: 1,
//!     max_external_sources: 0,
//!     max_internal_sources: 1,
//! };
//! system
//!     .create_dispatcher(&pool, 0, &config, [], MAP.init(IdentityMap))
//!     .unwrap();
//!
//! let mut app = App::default();
//! system.register_internal_event_source(0, on_init, 0, &mut app).unwrap();
//! for _ in 0..5 {
//!     system.dispatcher_main(0, &mut app);
//! }
//! assert_eq!(app.ticks, 4);
//! ```

use canif_core::{ExternalKind, SenderHandle};
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::context::Callback;
use crate::dispatcher::{
    CreateError, Dispatcher, DispatcherConfig, EventSourceIndex, RegistrationError,
};
use crate::handle_map::HandleMap;
use crate::pool::MemoryPool;
use crate::port::DynamicReceiver;

pub struct DispatcherSystem<'a, A> {
    dispatchers: &'a mut [Option<Dispatcher<'a, A>>],
    external_budget: usize,
    internal_budget: usize,
}

impl<'a, A> DispatcherSystem<'a, A> {
    /// Creates a system of `dispatcher_count` dispatchers sharing the given event source budget
    pub fn new<M: RawMutex>(
        pool: &MemoryPool<'a, M>,
        dispatcher_count: usize,
        max_external_sources: usize,
        max_internal_sources: usize,
    ) -> Result<Self, CreateError> {
        let total_sources = max_external_sources.checked_add(max_internal_sources);
        if dispatcher_count == 0 || matches!(total_sources, None | Some(0)) {
            error!("Dispatcher system needs at least one dispatcher and one event source");
            return Err(CreateError::InvalidConfig);
        }
        let dispatchers = pool.alloc_slice_with(dispatcher_count, |_| None)?;
        pool.log_usage("Dispatcher system created");
        Ok(Self {
            dispatchers,
            external_budget: max_external_sources,
            internal_budget: max_internal_sources,
        })
    }

    /// Creates the dispatcher with the given index
    ///
    /// The dispatcher reads events from `ports` in the given order and resolves them to
    /// event sources with `handle_map`.
    pub fn create_dispatcher<M: RawMutex>(
        &mut self,
        pool: &MemoryPool<'a, M>,
        index: usize,
        config: &DispatcherConfig,
        ports: impl IntoIterator<Item = &'a mut dyn DynamicReceiver, IntoIter: ExactSizeIterator>,
        handle_map: &'a mut (dyn HandleMap + Send),
    ) -> Result<(), CreateError> {
        let slot = self
            .dispatchers
            .get_mut(index)
            .ok_or(CreateError::InvalidIndex)?;
        if slot.is_some() {
            return Err(CreateError::AlreadyCreated);
        }
        if config.max_external_sources > self.external_budget
            || config.max_internal_sources > self.internal_budget
        {
            warn!("Dispatcher {} exceeds the event source budget", index);
            return Err(CreateError::SourceBudgetExceeded);
        }

        *slot = Some(Dispatcher::new(pool, config, ports, handle_map)?);
        self.external_budget -= config.max_external_sources;
        self.internal_budget -= config.max_internal_sources;
        info!(
            "Dispatcher {} created: tick {} ms, {} timers",
            index,
            config.tick.as_millis(),
            config.max_timers
        );
        pool.log_usage("Dispatcher created");
        Ok(())
    }

    pub fn dispatcher_count(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn dispatcher(&self, index: usize) -> Option<&Dispatcher<'a, A>> {
        self.dispatchers.get(index)?.as_ref()
    }

    pub fn dispatcher_mut(&mut self, index: usize) -> Option<&mut Dispatcher<'a, A>> {
        self.dispatchers.get_mut(index)?.as_mut()
    }

    /// Created dispatchers, for running them from different contexts
    ///
    /// ```ignore
    /// let mut dispatchers = system.dispatchers_mut();
    /// let fast = dispatchers.next().unwrap();
    /// let slow = dispatchers.next().unwrap();
    /// std::thread::scope(|s| {
    ///     s.spawn(|| fast.main(&mut fast_app));
    ///     s.spawn(|| slow.main(&mut slow_app));
    /// });
    /// ```
    pub fn dispatchers_mut(&mut self) -> impl Iterator<Item = &mut Dispatcher<'a, A>> {
        self.dispatchers.iter_mut().filter_map(Option::as_mut)
    }

    /// Registers an event source fed by the dispatcher ports
    ///
    /// Events of `kind` posted with `sender` are delivered to the callback of the new source.
    /// `init` is invoked before the function returns, with an
    /// [`canif_core::EventKind::ExternalSourceInit`] event, and is the initial callback.
    pub fn register_external_event_source(
        &mut self,
        dispatcher: usize,
        kind: ExternalKind,
        sender: SenderHandle,
        init: Callback<A>,
        user_data: usize,
        app: &mut A,
    ) -> Result<EventSourceIndex, RegistrationError> {
        let result = self
            .dispatcher_mut(dispatcher)
            .ok_or(RegistrationError::InvalidDispatcher)?
            .register_external(kind, sender, init, user_data, app);
        match result {
            Ok(index) => trace!(
                "Dispatcher {}: external source {} registered",
                dispatcher,
                index.index()
            ),
            Err(err) => error!(
                "Dispatcher {}: external source registration failed: {:?}",
                dispatcher,
                err
            ),
        }
        result
    }

    /// Registers an event source that is driven by its timers only
    ///
    /// `init` is invoked before the function returns, with an
    /// [`canif_core::EventKind::InternalSourceInit`] event.
    pub fn register_internal_event_source(
        &mut self,
        dispatcher: usize,
        init: Callback<A>,
        user_data: usize,
        app: &mut A,
    ) -> Result<EventSourceIndex, RegistrationError> {
        let result = self
            .dispatcher_mut(dispatcher)
            .ok_or(RegistrationError::InvalidDispatcher)?
            .register_internal(init, user_data, app);
        if let Err(err) = result {
            error!(
                "Dispatcher {}: internal source registration failed: {:?}",
                dispatcher,
                err
            );
        }
        result
    }

    /// Runs one tick of the given dispatcher. Panics if the dispatcher was not created.
    pub fn dispatcher_main(&mut self, dispatcher: usize, app: &mut A) {
        match self.dispatcher_mut(dispatcher) {
            Some(dispatcher) => dispatcher.main(app),
            None => panic!("dispatcher {} does not exist", dispatcher),
        }
    }
}
