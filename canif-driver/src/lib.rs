//! canif driver interface
//!
//! The crate provides an interface between a CAN device driver and the canif dispatcher.
//! Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. Dispatcher users should depend on
//! the `canif` crate instead.
//!
//! The interface has two directions:
//! * Outbound frames leave the dispatcher through a [`sender::FrameSender`] implemented
//!   by the driver. The call must not block; a full mailbox is reported as
//!   [`sender::SendError::BufferFull`].
//! * Inbound frames and bus state changes enter the dispatcher as events posted into
//!   a port from the driver's reception context. The driver holds the producer end
//!   of the port (`canif::port::PortSender`), which never blocks either.
//!
//! Frame payloads are carried as [`frame::Data`], a fixed-capacity vector of a
//! CAN-FD-compatible length.

#![no_std]

pub mod frame;
pub mod sender;

pub mod time {
    pub use embassy_time::Duration;
}
