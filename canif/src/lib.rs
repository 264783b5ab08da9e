//! # canif
//!
//! This library provides a static, tick-driven event dispatcher for the CAN interface of
//! embedded control software in no_std environments. All objects are created once at startup
//! from a user-provided memory region. There is no dynamic memory allocation afterwards.
//!
//! The dispatcher is a cooperative scheduler: each instance is clocked by one periodic call of
//! its main function, which delivers queued external events and elapsed timers to
//! plain function callbacks. On top of it, the [`runtime`] module implements the transmission
//! timing patterns of CAN frames: cyclic and event-triggered sending, reception timeout
//! supervision and end-to-end validation.
//!
//! ## Architecture
//!
//! ```text
//!  producer contexts                          dispatcher contexts
//!
//! ┌──────────────┐   ┌────────┐   ┌────────────────────────────────────┐
//! │ CAN RX ISR   ├──►│ Port 0 ├──►│ Dispatcher 0 (10 ms)               │
//! │ EventSender  │   └────────┘   │ ┌────────────┐  ┌────────────────┐ │
//! │              │   ┌────────┐   │ │ Handle map ├─►│ Event sources  │ │
//! │              ├──►│ Port 1 ├─┐ │ └────────────┘  └───────┬────────┘ │
//! └──────────────┘   └────────┘ │ │ ┌────────────┐          │          │
//!                               │ │ │   Timers   │◄─────────┘          │
//!                               │ │ └────────────┘                     │
//!                               │ └────────────────────────────────────┘
//!                               │ ┌────────────────────────────────────┐
//!                               └►│ Dispatcher 1 (100 ms)              │
//!                                 └────────────────────────────────────┘
//! ```
//! Components:
//! * _Memory pool_ is a bump allocator over a static region. All other objects are allocated
//!   from it during startup.
//! * _Port_ is a bounded queue of external events between one producer context and one
//!   dispatcher. Posting never blocks. A full port drops the event and counts the loss.
//! * _Event sender_ bundles the producer ends of the ports one producer context feeds.
//! * _Dispatcher_ owns its ports, event sources and timers. The integration calls its main
//!   function once per tick period.
//! * _Handle map_ translates the producer's sender handle of an event into the index of the
//!   event source it belongs to.
//! * _Event source_ is a callback with user data. External sources receive events from the
//!   ports. Internal sources exist to own timers.
//! * _Dispatcher system_ holds all dispatchers of an integration and registers the event
//!   sources.
//!
//! ## Concurrency model
//!
//! Dispatchers share no mutable state. Each one can run in its own thread or at its own
//! interrupt priority. Callbacks run in the context of their dispatcher and must not block.
//! Timers are created and manipulated from callbacks of their dispatcher only.
//!
//! A port is the only object shared between contexts. It is a lock-free single-producer
//! single-consumer ring, so producers may run in interrupts of any priority. The memory pool
//! is guarded by a blocking mutex. With `NoopRawMutex`, allocation must happen in a single
//! context, which is the typical startup sequence.
//!
//! ## Time
//!
//! Every dispatcher counts time in wrapping milliseconds, starting at zero. The clock advances
//! by the tick period at the end of each main function call. Timer spans are rounded to whole
//! milliseconds; a periodic timer never elapses more often than once per tick.
#![no_std]

pub use canif_core as core;
pub use canif_driver as driver;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod context;
pub mod dispatcher;
pub mod e2e;
pub mod handle_map;
pub mod pool;
pub mod port;
pub mod runtime;
pub mod sender;
pub mod system;
pub mod timer;
