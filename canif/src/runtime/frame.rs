use canif_core::{BusIndex, SendMode, SenderHandle, TransmissionStatus};
use canif_driver::frame::DataLength;
use canif_driver::sender::FrameHandle;
use embassy_time::Duration;

use crate::timer::TimerHandle;

/// Index of a frame in the frame table of a [`super::CanRuntime`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameIndex(u16);

impl FrameIndex {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Recovers the index stored as event source data
    pub(crate) fn from_source_data(data: usize) -> Self {
        Self(unwrap!(u16::try_from(data).ok()))
    }
}

impl From<FrameIndex> for usize {
    fn from(value: FrameIndex) -> Self {
        value.index()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Received through the given mailbox, the sender handle of its reception events
    Inbound { mailbox: SenderHandle },
    /// Sent through the driver with the given handle
    Outbound { handle: FrameHandle },
}

/// Static properties of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameDescriptor {
    pub bus: BusIndex,
    pub direction: Direction,
    pub send_mode: SendMode,
    pub size: DataLength,
    /// Nominal cycle time. Unused for event frames.
    pub cycle: Duration,
    /// Minimum time between two transmissions of an event or mixed frame
    pub min_distance: Duration,
}

impl FrameDescriptor {
    pub const fn inbound(
        bus: BusIndex,
        mailbox: SenderHandle,
        size: DataLength,
        send_mode: SendMode,
        cycle: Duration,
    ) -> Self {
        Self {
            bus,
            direction: Direction::Inbound { mailbox },
            send_mode,
            size,
            cycle,
            min_distance: Duration::from_ticks(0),
        }
    }

    pub const fn outbound(
        bus: BusIndex,
        handle: FrameHandle,
        size: DataLength,
        send_mode: SendMode,
        cycle: Duration,
        min_distance: Duration,
    ) -> Self {
        Self {
            bus,
            direction: Direction::Outbound { handle },
            send_mode,
            size,
            cycle,
            min_distance,
        }
    }

    pub const fn is_inbound(&self) -> bool {
        matches!(self.direction, Direction::Inbound { .. })
    }
}

/// Timers a frame runs on, depending on its direction and send mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameTimers {
    /// Not registered yet, or an inbound event frame
    None,
    RxTimeout(TimerHandle),
    TxRegular(TimerHandle),
    TxEvent {
        due_check: TimerHandle,
    },
    TxMixed {
        due_check: TimerHandle,
        timeout: TimerHandle,
    },
}

/// Run-time state of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameState {
    pub(super) status: TransmissionStatus,
    pub(super) event: bool,
    pub(super) transmitted: u32,
    pub(super) timers: FrameTimers,
}

impl FrameState {
    pub(super) const fn new(inbound: bool) -> Self {
        Self {
            status: if inbound {
                TransmissionStatus::NEVER_RECEIVED
            } else {
                TransmissionStatus::OKAY
            },
            event: false,
            transmitted: 0,
            timers: FrameTimers::None,
        }
    }

    pub fn status(&self) -> TransmissionStatus {
        self.status
    }

    /// Requests the transmission of an event or mixed frame
    ///
    /// The frame is sent at the next due check that respects the minimum distance.
    pub fn signal_event(&mut self) {
        self.event = true;
    }

    pub fn is_event_pending(&self) -> bool {
        self.event
    }

    pub(super) fn take_event(&mut self) -> bool {
        core::mem::take(&mut self.event)
    }

    /// Frames received, or successfully handed over to the driver, saturating
    pub fn transmitted_frames(&self) -> u32 {
        self.transmitted
    }

    pub fn timers(&self) -> FrameTimers {
        self.timers
    }
}
