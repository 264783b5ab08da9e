//! Producer side of the dispatcher ports
//!
//! An [`EventSender`] bundles the producer ends of the ports one producer context feeds,
//! typically all ports filled by one CAN reception interrupt. Events are routed to a port
//! through an optional handle map recording `(kind, sender) -> port index`. Without a map,
//! the sender must own exactly one port.

use canif_core::{BusIndex, BusState, ExternalKind, SenderHandle};
use canif_driver::frame::Data;
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::handle_map::HandleMap;
use crate::pool::{MemoryPool, OutOfMemory};
use crate::port::{DynamicSender, ExternalEvent};
use crate::runtime::statistics::count;
use crate::runtime::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PostError {
    /// The event does not map to a port of the sender
    NoRoute,
    /// The payload length is not a valid frame length
    InvalidLength,
    /// The port queue is full, the event was dropped
    QueueFull,
}

pub struct EventSender<'a> {
    ports: &'a mut [&'a mut dyn DynamicSender],
    port_map: Option<&'a mut (dyn HandleMap + Send)>,
    statistics: Statistics,
}

impl<'a> EventSender<'a> {
    pub fn new<M: RawMutex>(
        pool: &MemoryPool<'a, M>,
        ports: impl IntoIterator<Item = &'a mut dyn DynamicSender, IntoIter: ExactSizeIterator>,
        port_map: Option<&'a mut (dyn HandleMap + Send)>,
    ) -> Result<Self, OutOfMemory> {
        let mut ports = ports.into_iter();
        let ports = pool.alloc_slice_with(ports.len(), |_| unwrap!(ports.next()))?;
        Ok(Self {
            ports,
            port_map,
            statistics: Statistics::default(),
        })
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    fn route(&self, kind: ExternalKind, sender: SenderHandle) -> Option<usize> {
        match &self.port_map {
            Some(map) => map
                .resolve(kind, sender)
                .and_then(|port| usize::try_from(port).ok())
                .filter(|&port| port < self.ports.len()),
            None if self.ports.len() == 1 => Some(0),
            None => None,
        }
    }

    /// Posts an event to the port it maps to
    pub fn post_event(
        &mut self,
        kind: ExternalKind,
        sender: SenderHandle,
        data: Data,
    ) -> Result<(), PostError> {
        let Some(port) = self.route(kind, sender) else {
            warn!(
                "No port for event of kind {} from sender {}",
                kind.into_u8(),
                sender.into_u32()
            );
            return Err(PostError::NoRoute);
        };
        self.post_event_to_port(port, kind, sender, data)
    }

    /// Posts an event to the given port, bypassing the port map
    pub fn post_event_to_port(
        &mut self,
        port: usize,
        kind: ExternalKind,
        sender: SenderHandle,
        data: Data,
    ) -> Result<(), PostError> {
        let port = self.ports.get_mut(port).ok_or(PostError::NoRoute)?;
        port.post(ExternalEvent::new(kind, sender, data))
            .map_err(|_| PostError::QueueFull)
    }

    /// Number of events a port rejected because its queue was full, saturating
    pub fn blocked_events(&self, port: usize) -> u32 {
        self.ports[port].lost_events()
    }

    /// Posts a received frame
    ///
    /// Counts the frame and, if the port is full, the lost frame in [`Self::statistics`].
    pub fn post_frame(&mut self, mailbox: SenderHandle, bytes: &[u8]) -> Result<(), PostError> {
        count(&mut self.statistics.rx_frames);
        let data = Data::new(bytes).map_err(|_| PostError::InvalidLength)?;
        let result = self.post_event(ExternalKind::FRAME_RECEPTION, mailbox, data);
        if result == Err(PostError::QueueFull) {
            count(&mut self.statistics.rx_queue_full);
        }
        result
    }

    /// Posts a bus state change, addressed to the event sources registered for the bus
    pub fn notify_bus_state_change(
        &mut self,
        bus: BusIndex,
        state: BusState,
    ) -> Result<(), PostError> {
        let sender = SenderHandle::new(bus.into_u8().into());
        self.post_event(state.event_kind(), sender, Data::EMPTY)
    }

    /// Reception counters of this producer context
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::handle_map::{HandleRange, TableMap};
    use crate::port::{Port, PortReceiver};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::boxed::Box;
    use std::mem::MaybeUninit;

    fn new_pool() -> MemoryPool<'static, NoopRawMutex> {
        let heap: &'static mut [MaybeUninit<u8>] =
            Box::leak(std::vec![MaybeUninit::<u8>::uninit(); 512].into_boxed_slice());
        MemoryPool::new(heap)
    }

    fn new_port<const N: usize>() -> (&'static mut dyn DynamicSender, PortReceiver<'static, N>) {
        let port: &'static mut Port<N> = Box::leak(Box::new(Port::new()));
        let (sender, receiver) = port.split();
        (Box::leak(Box::new(sender)), receiver)
    }

    #[test]
    fn test_single_port_without_map() {
        let pool = new_pool();
        let (port, mut receiver) = new_port::<4>();
        let mut sender = EventSender::new(&pool, [port], None).unwrap();

        let kind = ExternalKind::FIRST_CUSTOM;
        for i in 0..5 {
            let result = sender.post_event(kind, SenderHandle::new(i), Data::EMPTY);
            assert_eq!(result.is_ok(), i < 3);
        }
        assert_eq!(sender.blocked_events(0), 2);
        assert_eq!(receiver.read().map(|e| e.sender), Some(SenderHandle::new(0)));
    }

    #[test]
    fn test_routing_through_port_map() {
        let pool = new_pool();
        let (fast, mut fast_rx) = new_port::<4>();
        let (slow, mut slow_rx) = new_port::<4>();
        let kinds = [HandleRange::new(0, 4), HandleRange::new(0, 2)];
        let map: &'static mut TableMap<'static> = Box::leak(Box::new(TableMap::new(&pool, &kinds).unwrap()));
        let kind = ExternalKind::FRAME_RECEPTION;
        map.record(kind, SenderHandle::new(0), 0).unwrap();
        map.record(kind, SenderHandle::new(1), 1).unwrap();
        map.record(ExternalKind::BUS_OFF, SenderHandle::new(0), 1).unwrap();

        let mut sender = EventSender::new(&pool, [fast, slow], Some(map)).unwrap();
        sender.post_frame(SenderHandle::new(0), &[1, 2]).unwrap();
        sender.post_frame(SenderHandle::new(1), &[3]).unwrap();
        sender
            .notify_bus_state_change(BusIndex::new(0), BusState::Off)
            .unwrap();
        assert_eq!(
            sender.post_frame(SenderHandle::new(2), &[]),
            Err(PostError::NoRoute)
        );
        assert_eq!(sender.post_frame(SenderHandle::new(0), &[0; 9]), Err(PostError::InvalidLength));

        assert_eq!(&*fast_rx.read().unwrap().data, &[1, 2]);
        assert_eq!(fast_rx.read(), None);
        assert_eq!(&*slow_rx.read().unwrap().data, &[3]);
        assert_eq!(slow_rx.read().unwrap().kind, ExternalKind::BUS_OFF);
        assert_eq!(sender.statistics().rx_frames, 4);
        assert_eq!(sender.statistics().rx_queue_full, 0);
    }

    #[test]
    fn test_rx_queue_full_statistics() {
        let pool = new_pool();
        let (port, _receiver) = new_port::<2>();
        let mut sender = EventSender::new(&pool, [port], None).unwrap();
        for _ in 0..3 {
            let _ = sender.post_frame(SenderHandle::new(0), &[0; 8]);
        }
        assert_eq!(sender.statistics().rx_frames, 3);
        assert_eq!(sender.statistics().rx_queue_full, 2);
        assert_eq!(sender.blocked_events(0), 2);
    }

    #[test]
    fn test_multiple_ports_need_a_map() {
        let pool = new_pool();
        let (a, _) = new_port::<2>();
        let (b, _) = new_port::<2>();
        let mut sender = EventSender::new(&pool, [a, b], None).unwrap();
        let kind = ExternalKind::FIRST_CUSTOM;
        assert_eq!(
            sender.post_event(kind, SenderHandle::new(0), Data::EMPTY),
            Err(PostError::NoRoute)
        );
        assert!(sender
            .post_event_to_port(1, kind, SenderHandle::new(0), Data::EMPTY)
            .is_ok());
    }
}
