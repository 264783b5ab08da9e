//! Mapping of sender handles to event source indices
//!
//! A producer posts events tagged with its kind and a platform-specific sender handle, e.g. the
//! index of the CAN mailbox that received a frame. The dispatcher needs the index of the event
//! source the event belongs to. A handle map is filled at registration time and queried for
//! every dequeued event.
//!
//! Provided implementations:
//! * [`OffsetMap`] stores one constant per kind. The integration must register the sources of a
//!   kind in the order of their sender handles. O(1), no per-handle storage.
//! * [`TableMap`] stores one table entry per possible sender handle. No ordering constraint.
//! * [`IdentityMap`] uses the sender handle as the index. No storage at all.
//!
//! The same trait maps events to ports in the [`crate::sender::EventSender`].

use canif_core::{ExternalKind, SenderHandle};

mod offset;
mod table;

pub use offset::OffsetMap;
pub use table::{HandleRange, TableMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MapError {
    /// The kind is not covered by the map
    UnknownKind,
    /// The sender handle is not covered by the map for this kind
    HandleOutOfRange,
    /// The value cannot be stored by the map
    ValueOutOfRange,
    /// The pair contradicts an earlier registration
    Inconsistent,
}

pub trait HandleMap {
    /// Records a key-value pair. Called once per registered event source.
    fn record(&mut self, kind: ExternalKind, sender: SenderHandle, value: u32)
        -> Result<(), MapError>;

    /// Returns the value recorded for the pair. `None` for pairs that were never recorded,
    /// where the map can tell.
    fn resolve(&self, kind: ExternalKind, sender: SenderHandle) -> Option<u32>;

    /// Whether events of the kind are told apart by their sender handle
    ///
    /// Kinds without sender handles map all their events to a single value.
    fn uses_sender_handle(&self, _kind: ExternalKind) -> bool {
        true
    }
}

/// Maps every sender handle to itself
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMap;

impl HandleMap for IdentityMap {
    fn record(
        &mut self,
        _kind: ExternalKind,
        sender: SenderHandle,
        value: u32,
    ) -> Result<(), MapError> {
        if sender.into_u32() == value {
            Ok(())
        } else {
            Err(MapError::Inconsistent)
        }
    }

    fn resolve(&self, _kind: ExternalKind, sender: SenderHandle) -> Option<u32> {
        Some(sender.into_u32())
    }
}
