//! CAN interface core data types
//!
//! This crate provides basic data type definitions used by other canif crates.
//! Users should not depend on this crate directly. Use `canif::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Kind of an event posted by a producer outside the dispatcher
///
/// External kinds are small numbers so that handle maps can keep per-kind tables.
/// The first values are reserved for the CAN runtime; integrations add their own kinds
/// starting at [`ExternalKind::FIRST_CUSTOM`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExternalKind(u8);

impl ExternalKind {
    /// A CAN frame has been received
    pub const FRAME_RECEPTION: ExternalKind = ExternalKind(0);
    /// A bus entered the bus-off state
    pub const BUS_OFF: ExternalKind = ExternalKind(1);
    /// A bus recovered from the bus-off state
    pub const RECOVERED_FROM_BUS_OFF: ExternalKind = ExternalKind(2);
    pub const FIRST_CUSTOM: ExternalKind = ExternalKind(3);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<ExternalKind> for u8 {
    fn from(value: ExternalKind) -> Self {
        value.into_u8()
    }
}

impl From<ExternalKind> for usize {
    fn from(value: ExternalKind) -> Self {
        u8::from(value).into()
    }
}

/// Kind of an event delivered to a callback
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    /// Synchronous notification at registration of an external event source
    ExternalSourceInit,
    /// Synchronous notification at registration of an internal event source
    InternalSourceInit,
    /// A timer of the event source elapsed
    TimerElapsed,
    /// An event dequeued from one of the dispatcher's ports
    External(ExternalKind),
}

impl EventKind {
    pub const fn is_init(&self) -> bool {
        matches!(self, EventKind::ExternalSourceInit | EventKind::InternalSourceInit)
    }
}

/// Platform-specific identification of an event's producer, e.g. a mailbox index
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SenderHandle(u32);

impl SenderHandle {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for SenderHandle {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<SenderHandle> for u32 {
    fn from(value: SenderHandle) -> Self {
        value.into_u32()
    }
}

/// Index of a CAN bus
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusIndex(u8);

impl BusIndex {
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<BusIndex> for usize {
    fn from(value: BusIndex) -> Self {
        value.0.into()
    }
}

/// State change reported by a CAN driver
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    Off,
    Recovered,
}

impl BusState {
    pub const fn event_kind(self) -> ExternalKind {
        match self {
            BusState::Off => ExternalKind::BUS_OFF,
            BusState::Recovered => ExternalKind::RECOVERED_FROM_BUS_OFF,
        }
    }

    pub const fn from_event_kind(kind: ExternalKind) -> Option<Self> {
        match kind {
            ExternalKind::BUS_OFF => Some(BusState::Off),
            ExternalKind::RECOVERED_FROM_BUS_OFF => Some(BusState::Recovered),
            _ => None,
        }
    }
}

/// Transmission timing pattern of an outbound frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendMode {
    /// Sent every cycle regardless of the data
    Regular,
    /// Sent on data change, not more often than the minimum distance
    Event,
    /// Sent on data change, not more often than the minimum distance and
    /// not less often than the cycle time
    Mixed,
}

/// Transmission status of a frame
///
/// A set of error bits. The value 0 ([`TransmissionStatus::OKAY`]) means no pending error.
/// [`TransmissionStatus::NEVER_RECEIVED`] and [`TransmissionStatus::ERR_SEND_BUFFER_FULL`]
/// share a bit: the former applies to inbound frames, the latter to outbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransmissionStatus(u8);

impl TransmissionStatus {
    pub const OKAY: Self = Self(0);
    pub const NEVER_RECEIVED: Self = Self(1);
    pub const ERR_SEND_BUFFER_FULL: Self = Self(1);
    pub const ERR_TIMEOUT: Self = Self(2);
    pub const ERR_CHECKSUM: Self = Self(4);
    pub const ERR_SEQUENCE: Self = Self(8);
    pub const ERR_DLC: Self = Self(16);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn into_bits(self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0
    }

    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0
    }

    pub const fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other)
        } else {
            self.remove(other)
        }
    }

    pub const fn is_okay(&self) -> bool {
        self.0 == Self::OKAY.0
    }
}

impl Default for TransmissionStatus {
    fn default() -> Self {
        TransmissionStatus::OKAY
    }
}

impl core::ops::BitOr<TransmissionStatus> for TransmissionStatus {
    type Output = Self;
    fn bitor(self, rhs: TransmissionStatus) -> Self::Output {
        TransmissionStatus(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign<TransmissionStatus> for TransmissionStatus {
    fn bitor_assign(&mut self, rhs: TransmissionStatus) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd<TransmissionStatus> for TransmissionStatus {
    type Output = Self;
    fn bitand(self, rhs: TransmissionStatus) -> Self::Output {
        TransmissionStatus(self.0 & rhs.0)
    }
}

impl core::ops::Not for TransmissionStatus {
    type Output = Self;
    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_set_and_clear() {
        let mut status = TransmissionStatus::NEVER_RECEIVED;
        assert!(!status.is_okay());

        status.insert(TransmissionStatus::ERR_TIMEOUT | TransmissionStatus::ERR_DLC);
        assert!(status.contains(TransmissionStatus::ERR_TIMEOUT));
        assert!(status.contains(TransmissionStatus::ERR_DLC));
        assert!(!status.intersects(TransmissionStatus::ERR_CHECKSUM));

        status.remove(TransmissionStatus::NEVER_RECEIVED | TransmissionStatus::ERR_TIMEOUT);
        assert_eq!(status, TransmissionStatus::ERR_DLC);

        status.set(TransmissionStatus::ERR_DLC, false);
        assert!(status.is_okay());
    }

    #[test]
    fn test_status_shared_bit() {
        assert_eq!(
            TransmissionStatus::NEVER_RECEIVED,
            TransmissionStatus::ERR_SEND_BUFFER_FULL
        );
        assert_eq!(TransmissionStatus::ERR_DLC.into_bits(), 16);
    }

    #[test]
    fn test_bus_state_kinds() {
        for state in [BusState::Off, BusState::Recovered] {
            assert_eq!(BusState::from_event_kind(state.event_kind()), Some(state));
        }
        assert_eq!(BusState::from_event_kind(ExternalKind::FRAME_RECEPTION), None);
        assert!(ExternalKind::FIRST_CUSTOM > ExternalKind::RECOVERED_FROM_BUS_OFF);
    }
}
