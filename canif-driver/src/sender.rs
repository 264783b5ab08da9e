//! Transmission primitive provided by the driver

use canif_core::BusIndex;

/// Reason a frame could not be handed over to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// No free transmit mailbox or queue slot
    BufferFull,
    /// The bus is in the bus-off state
    BusOff,
}

/// Handle of an outbound frame as known to the driver, e.g. a mailbox or CAN ID table index
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHandle(u32);

impl FrameHandle {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

/// Non-blocking frame transmission
///
/// The dispatcher calls it from its own context. The implementation copies the
/// bytes; the slice is not valid after the call returns.
pub trait FrameSender {
    fn send_frame(&mut self, bus: BusIndex, frame: FrameHandle, bytes: &[u8])
        -> Result<(), SendError>;
}

impl<T: FrameSender + ?Sized> FrameSender for &mut T {
    fn send_frame(
        &mut self,
        bus: BusIndex,
        frame: FrameHandle,
        bytes: &[u8],
    ) -> Result<(), SendError> {
        (**self).send_frame(bus, frame, bytes)
    }
}
