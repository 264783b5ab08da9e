//! CAN frame timing patterns on top of the dispatcher
//!
//! The runtime owns the frame table of one dispatcher and implements the transmission
//! timing of every frame with dispatcher timers:
//!
//! | Direction | Send mode | Behavior                                                         |
//! |-----------|-----------|------------------------------------------------------------------|
//! | inbound   | regular   | timeout supervision, `ERR_TIMEOUT` after `3 * cycle + 1 ms`      |
//! | inbound   | event     | no supervision                                                   |
//! | outbound  | regular   | sent every cycle                                                 |
//! | outbound  | event     | sent on [`FrameState::signal_event`], at most every min distance |
//! | outbound  | mixed     | as event, but at least every cycle                               |
//!
//! Inbound mixed frames are supervised like regular ones.
//!
//! Event and mixed frames poll their event flag with a 1 ms due check. Timers elapse at tick
//! boundaries only, so the flag is effectively polled once per dispatcher tick: every 10 ms
//! on a 10 ms dispatcher.
//!
//! The application state `A` handed to [`crate::dispatcher::Dispatcher::main`] must give access
//! to the runtime of the dispatcher through [`AsMut`]. The runtime itself qualifies. Each frame
//! is registered as one event source with [`register_frame`]: inbound frames as external sources
//! fed by reception events, outbound frames as internal sources. Bus state events are handled
//! by the sources [`register_bus`] creates.

use canif_core::{
    BusIndex, BusState, EventKind, ExternalKind, SendMode, SenderHandle, TransmissionStatus,
};
use canif_driver::frame::Data;
use canif_driver::sender::FrameSender;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;

use crate::context::Context;
use crate::dispatcher::{EventSourceIndex, RegistrationError};
use crate::pool::{MemoryPool, OutOfMemory};
use crate::system::DispatcherSystem;

mod frame;
pub(crate) mod statistics;

pub use frame::{Direction, FrameDescriptor, FrameIndex, FrameState, FrameTimers};
pub use statistics::Statistics;

use statistics::count;

/// Polling period of event and mixed frames, rounded up to the tick by the timers
const DUE_CHECK: Duration = Duration::from_millis(1);

/// Time after the last reception an inbound frame is considered lost
pub fn rx_timeout(cycle: Duration) -> Duration {
    cycle * 3 + Duration::from_millis(1)
}

/// Outcome of the end-to-end validation of a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Validation {
    pub checksum_ok: bool,
    pub sequence_ok: bool,
}

impl Validation {
    pub const OK: Validation = Validation {
        checksum_ok: true,
        sequence_ok: true,
    };
}

/// Conversion between frame payloads and application signals
pub trait FrameCodec {
    /// Fills the payload of an outbound frame, including its protection
    fn pack(&mut self, frame: FrameIndex, bytes: &mut [u8]);

    /// Validates and unpacks the payload of an inbound frame
    ///
    /// Called only for payloads of the configured size. `status` is the frame status
    /// before the reception, see [`crate::e2e::needs_resync`].
    fn unpack_and_validate(
        &mut self,
        frame: FrameIndex,
        bytes: &[u8],
        status: TransmissionStatus,
    ) -> Validation;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RuntimeError {
    OutOfMemory(OutOfMemory),
    TooManyFrames,
    /// A regular or mixed outbound frame has a cycle below 1 ms
    InvalidCycle(FrameIndex),
}

impl From<OutOfMemory> for RuntimeError {
    fn from(value: OutOfMemory) -> Self {
        RuntimeError::OutOfMemory(value)
    }
}

pub struct CanRuntime<'a> {
    frames: &'a [FrameDescriptor],
    states: &'a mut [FrameState],
    sender: &'a mut (dyn FrameSender + Send),
    codec: &'a mut (dyn FrameCodec + Send),
    statistics: Statistics,
    bus_off: u32,
}

impl<'a> CanRuntime<'a> {
    pub fn new<M: RawMutex>(
        pool: &MemoryPool<'a, M>,
        frames: &'a [FrameDescriptor],
        sender: &'a mut (dyn FrameSender + Send),
        codec: &'a mut (dyn FrameCodec + Send),
    ) -> Result<Self, RuntimeError> {
        if frames.len() > usize::from(u16::MAX) {
            return Err(RuntimeError::TooManyFrames);
        }
        for (index, frame) in frames.iter().enumerate() {
            let cyclic = !frame.is_inbound() && frame.send_mode != SendMode::Event;
            if cyclic && frame.cycle.as_millis() == 0 {
                error!("Frame {}: cycle time below 1 ms", index);
                return Err(RuntimeError::InvalidCycle(FrameIndex::new(index as u16)));
            }
        }

        let states =
            pool.alloc_slice_with(frames.len(), |i| FrameState::new(frames[i].is_inbound()))?;
        Ok(Self {
            frames,
            states,
            sender,
            codec,
            statistics: Statistics::default(),
            bus_off: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> impl Iterator<Item = FrameIndex> {
        (0..self.frames.len() as u16).map(FrameIndex::new)
    }

    /// Panics if the index is not in the frame table
    pub fn descriptor(&self, frame: FrameIndex) -> &FrameDescriptor {
        &self.frames[frame.index()]
    }

    pub fn state(&self, frame: FrameIndex) -> &FrameState {
        &self.states[frame.index()]
    }

    pub fn state_mut(&mut self, frame: FrameIndex) -> &mut FrameState {
        &mut self.states[frame.index()]
    }

    pub fn signal_event(&mut self, frame: FrameIndex) {
        self.state_mut(frame).signal_event()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn is_bus_off(&self, bus: BusIndex) -> bool {
        1u32.checked_shl(u32::from(bus.into_u8()))
            .is_some_and(|bit| self.bus_off & bit != 0)
    }

    pub fn codec_mut(&mut self) -> &mut (dyn FrameCodec + Send) {
        &mut *self.codec
    }

    fn receive(&mut self, frame: FrameIndex, bytes: &[u8]) {
        let descriptor = &self.frames[frame.index()];
        let state = &mut self.states[frame.index()];
        let previous = state.status;
        state
            .status
            .remove(TransmissionStatus::NEVER_RECEIVED | TransmissionStatus::ERR_TIMEOUT);

        if bytes.len() == descriptor.size.as_usize() {
            state.status.remove(TransmissionStatus::ERR_DLC);
            let validation = self.codec.unpack_and_validate(frame, bytes, previous);
            state
                .status
                .set(TransmissionStatus::ERR_CHECKSUM, !validation.checksum_ok);
            if validation.checksum_ok {
                state
                    .status
                    .set(TransmissionStatus::ERR_SEQUENCE, !validation.sequence_ok);
            }
        } else {
            warn!(
                "Frame {}: {} bytes received, {} expected",
                frame.index(),
                bytes.len(),
                descriptor.size.as_usize()
            );
            state.status.insert(TransmissionStatus::ERR_DLC);
            state
                .status
                .remove(TransmissionStatus::ERR_CHECKSUM | TransmissionStatus::ERR_SEQUENCE);
        }
        count(&mut state.transmitted);
    }

    fn time_out(&mut self, frame: FrameIndex) {
        self.states[frame.index()]
            .status
            .insert(TransmissionStatus::ERR_TIMEOUT);
        count(&mut self.statistics.rx_timeouts);
        debug!("Frame {}: reception timeout", frame.index());
    }

    fn transmit(&mut self, frame: FrameIndex) {
        let descriptor = &self.frames[frame.index()];
        let Direction::Outbound { handle } = descriptor.direction else {
            panic!("frame {} is not an outbound frame", frame.index());
        };
        let mut data = Data::new_zeros(descriptor.size);
        self.codec.pack(frame, &mut data);

        let state = &mut self.states[frame.index()];
        match self.sender.send_frame(descriptor.bus, handle, &data) {
            Ok(()) => {
                state.status.remove(TransmissionStatus::ERR_SEND_BUFFER_FULL);
                count(&mut state.transmitted);
            }
            Err(err) => {
                trace!("Frame {}: send failed: {:?}", frame.index(), err);
                state.status.insert(TransmissionStatus::ERR_SEND_BUFFER_FULL);
                count(&mut self.statistics.tx_send_buffer_full);
            }
        }
        count(&mut self.statistics.tx_frames);
    }

    fn change_bus_state(&mut self, bus: BusIndex, state: BusState) {
        let bit = 1u32.checked_shl(u32::from(bus.into_u8())).unwrap_or(0);
        match state {
            BusState::Off => {
                warn!("Bus {} is off", bus.into_u8());
                self.bus_off |= bit;
                count(&mut self.statistics.bus_off);
            }
            BusState::Recovered => {
                info!("Bus {} recovered", bus.into_u8());
                self.bus_off &= !bit;
            }
        }
    }
}

impl<'a> AsMut<CanRuntime<'a>> for CanRuntime<'a> {
    fn as_mut(&mut self) -> &mut CanRuntime<'a> {
        self
    }
}

fn frame_of<A>(ctx: &Context<'_, A>) -> FrameIndex {
    FrameIndex::from_source_data(ctx.event_source_data())
}

/// Registers a frame of the runtime as an event source of a dispatcher
///
/// The runtime passed as `app` must be the one the dispatcher runs with.
pub fn register_frame<'r, A: AsMut<CanRuntime<'r>>>(
    system: &mut DispatcherSystem<'_, A>,
    dispatcher: usize,
    frame: FrameIndex,
    app: &mut A,
) -> Result<EventSourceIndex, RegistrationError> {
    let direction = app.as_mut().descriptor(frame).direction;
    match direction {
        Direction::Inbound { mailbox } => system.register_external_event_source(
            dispatcher,
            ExternalKind::FRAME_RECEPTION,
            mailbox,
            on_init_inbound_frame::<A>,
            frame.index(),
            app,
        ),
        Direction::Outbound { .. } => system.register_internal_event_source(
            dispatcher,
            on_init_outbound_frame::<A>,
            frame.index(),
            app,
        ),
    }
}

/// Registers the event sources handling the state changes of a bus
///
/// Bus state events carry the bus index as sender handle, see
/// [`crate::sender::EventSender::notify_bus_state_change`].
pub fn register_bus<'r, A: AsMut<CanRuntime<'r>>>(
    system: &mut DispatcherSystem<'_, A>,
    dispatcher: usize,
    bus: BusIndex,
    app: &mut A,
) -> Result<(), RegistrationError> {
    for state in [BusState::Off, BusState::Recovered] {
        system.register_external_event_source(
            dispatcher,
            state.event_kind(),
            SenderHandle::new(bus.into_u8().into()),
            on_init_bus_state::<A>,
            usize::from(bus),
            app,
        )?;
    }
    Ok(())
}

fn on_init_inbound_frame<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    let frame = frame_of(ctx);
    ctx.install_callback(on_frame_reception::<A>);

    let descriptor = *ctx.app_mut().as_mut().descriptor(frame);
    let mut timers = FrameTimers::None;
    if descriptor.send_mode != SendMode::Event {
        let timeout = rx_timeout(descriptor.cycle);
        match ctx.create_single_shot_timer(timeout, on_frame_timeout::<A>, false) {
            Ok(timer) => timers = FrameTimers::RxTimeout(timer),
            Err(err) => error!("Frame {}: no timeout timer: {:?}", frame.index(), err),
        }
    }
    let state = ctx.app_mut().as_mut().state_mut(frame);
    state.status = TransmissionStatus::NEVER_RECEIVED;
    state.timers = timers;
}

fn on_frame_reception<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    let frame = frame_of(ctx);
    let (data, app) = ctx.event_data_and_app_mut();
    let runtime = app.as_mut();
    runtime.receive(frame, data);

    if let FrameTimers::RxTimeout(timer) = runtime.state(frame).timers {
        let timeout = rx_timeout(runtime.descriptor(frame).cycle);
        unwrap!(ctx.retrigger_single_shot_timer(timer, timeout));
    }
}

fn on_frame_timeout<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    let frame = frame_of(ctx);
    ctx.app_mut().as_mut().time_out(frame);
}

fn on_init_outbound_frame<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    let frame = frame_of(ctx);
    let descriptor = *ctx.app_mut().as_mut().descriptor(frame);

    let timers = match descriptor.send_mode {
        SendMode::Regular => ctx
            .create_periodic_timer(descriptor.cycle, on_regular_due::<A>)
            .map(FrameTimers::TxRegular),
        SendMode::Event => ctx
            .create_single_shot_timer(DUE_CHECK, on_due_check_event_frame::<A>, false)
            .map(|due_check| FrameTimers::TxEvent { due_check }),
        SendMode::Mixed => ctx
            .create_single_shot_timer(DUE_CHECK, on_due_check_mixed_frame::<A>, false)
            .and_then(|due_check| {
                ctx.create_single_shot_timer(
                    descriptor.cycle,
                    on_due_check_mixed_frame::<A>,
                    false,
                )
                .map(|timeout| FrameTimers::TxMixed { due_check, timeout })
            }),
    };
    let timers = timers.unwrap_or_else(|err| {
        error!("Frame {}: no send timer: {:?}", frame.index(), err);
        FrameTimers::None
    });

    let state = ctx.app_mut().as_mut().state_mut(frame);
    state.status = TransmissionStatus::OKAY;
    state.timers = timers;
}

fn on_regular_due<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    let frame = frame_of(ctx);
    ctx.app_mut().as_mut().transmit(frame);
}

fn on_due_check_event_frame<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    let frame = frame_of(ctx);
    let runtime = ctx.app_mut().as_mut();
    let delay = if runtime.state_mut(frame).take_event() {
        runtime.transmit(frame);
        runtime.descriptor(frame).min_distance.max(DUE_CHECK)
    } else {
        DUE_CHECK
    };
    let own = ctx.own_timer_handle();
    unwrap!(ctx.retrigger_single_shot_timer(own, delay));
}

/// Shared by the due check and the timeout timer of a mixed frame
fn on_due_check_mixed_frame<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    let frame = frame_of(ctx);
    let elapsed = ctx.own_timer_handle();
    let runtime = ctx.app_mut().as_mut();
    let FrameTimers::TxMixed { due_check, timeout } = runtime.state(frame).timers else {
        unreachable!()
    };
    let descriptor = *runtime.descriptor(frame);

    let event = runtime.state_mut(frame).take_event();
    let delay = if event || elapsed == timeout {
        runtime.transmit(frame);
        unwrap!(ctx.retrigger_single_shot_timer(timeout, descriptor.cycle));
        descriptor.min_distance.max(DUE_CHECK)
    } else {
        DUE_CHECK
    };
    unwrap!(ctx.retrigger_single_shot_timer(due_check, delay));
}

fn on_init_bus_state<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    ctx.install_callback(on_bus_state_change::<A>);
}

fn on_bus_state_change<'r, A: AsMut<CanRuntime<'r>>>(ctx: &mut Context<'_, A>) {
    let EventKind::External(kind) = ctx.kind() else {
        return;
    };
    let Some(state) = BusState::from_event_kind(kind) else {
        return;
    };
    let bus = BusIndex::new(unwrap!(u8::try_from(ctx.event_source_data()).ok()));
    ctx.app_mut().as_mut().change_bus_state(bus, state);
}
