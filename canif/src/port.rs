//! Bounded event queues between producer contexts and a dispatcher
//!
//! A port connects exactly one producer, e.g. a CAN reception interrupt, with one dispatcher.
//! The queue is a lock-free single-producer single-consumer ring. Posting never blocks: an
//! event that does not fit is dropped and counted.
//!
//! ```
//! use canif::core::{ExternalKind, SenderHandle};
//! use canif::driver::frame::Data;
//! use canif::port::{ExternalEvent, Port};
//! use static_cell::StaticCell;
//!
//! static PORT: StaticCell<Port<8>> = StaticCell::new();
//!
//! let (mut sender, mut receiver) = PORT.init(Port::new()).split();
//! let event = ExternalEvent::new(
//!     ExternalKind::FRAME_RECEPTION,
//!     SenderHandle::new(3),
//!     Data::new(&[1, 2]).unwrap(),
//! );
//! assert!(sender.post(event).is_ok());
//! assert_eq!(receiver.read(), Some(event));
//! ```

use canif_core::{ExternalKind, SenderHandle};
use canif_driver::frame::Data;
use core::sync::atomic::{AtomicU32, Ordering};
use heapless::spsc::{Consumer, Producer, Queue};

/// Event posted by a producer outside the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExternalEvent {
    pub kind: ExternalKind,
    pub sender: SenderHandle,
    pub data: Data,
}

impl ExternalEvent {
    pub fn new(kind: ExternalKind, sender: SenderHandle, data: Data) -> Self {
        Self { kind, sender, data }
    }
}

/// Statically allocated port storage
///
/// The port holds up to `N - 1` events.
pub struct Port<const N: usize> {
    queue: Queue<ExternalEvent, N>,
    lost: AtomicU32,
}

impl<const N: usize> Port<N> {
    pub const CAPACITY: usize = N - 1;

    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            lost: AtomicU32::new(0),
        }
    }

    /// Splits the port into the producer and the consumer end
    pub fn split(&mut self) -> (PortSender<'_, N>, PortReceiver<'_, N>) {
        let (producer, consumer) = self.queue.split();
        let lost = &self.lost;
        (
            PortSender { producer, lost },
            PortReceiver { consumer, lost },
        )
    }
}

impl<const N: usize> Default for Port<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn increment_saturating(counter: &AtomicU32) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1));
}

/// Producer end of a port
pub struct PortSender<'a, const N: usize> {
    producer: Producer<'a, ExternalEvent, N>,
    lost: &'a AtomicU32,
}

impl<const N: usize> PortSender<'_, N> {
    /// Enqueues an event. A full queue rejects the event and counts the loss.
    pub fn post(&mut self, event: ExternalEvent) -> Result<(), ExternalEvent> {
        self.producer.enqueue(event).inspect_err(|_| {
            increment_saturating(self.lost);
        })
    }

    /// Number of events rejected so far, saturating
    pub fn lost_events(&self) -> u32 {
        self.lost.load(Ordering::Relaxed)
    }
}

/// Consumer end of a port
pub struct PortReceiver<'a, const N: usize> {
    consumer: Consumer<'a, ExternalEvent, N>,
    lost: &'a AtomicU32,
}

impl<const N: usize> PortReceiver<'_, N> {
    pub fn read(&mut self) -> Option<ExternalEvent> {
        self.consumer.dequeue()
    }

    pub fn pending(&self) -> usize {
        self.consumer.len()
    }

    pub fn lost_events(&self) -> u32 {
        self.lost.load(Ordering::Relaxed)
    }
}

/// Type-erased producer end, see [`PortSender`]
pub trait DynamicSender: Send {
    fn post(&mut self, event: ExternalEvent) -> Result<(), ExternalEvent>;
    fn lost_events(&self) -> u32;
}

impl<const N: usize> DynamicSender for PortSender<'_, N> {
    fn post(&mut self, event: ExternalEvent) -> Result<(), ExternalEvent> {
        PortSender::post(self, event)
    }

    fn lost_events(&self) -> u32 {
        PortSender::lost_events(self)
    }
}

/// Type-erased consumer end, see [`PortReceiver`]
pub trait DynamicReceiver: Send {
    fn read(&mut self) -> Option<ExternalEvent>;
    fn pending(&self) -> usize;
}

impl<const N: usize> DynamicReceiver for PortReceiver<'_, N> {
    fn read(&mut self) -> Option<ExternalEvent> {
        PortReceiver::read(self)
    }

    fn pending(&self) -> usize {
        PortReceiver::pending(self)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::boxed::Box;

    fn event(sender: u32) -> ExternalEvent {
        ExternalEvent::new(
            ExternalKind::FRAME_RECEPTION,
            SenderHandle::new(sender),
            Data::new(&[sender as u8]).unwrap(),
        )
    }

    #[test]
    fn test_fifo_order() {
        let port: &'static mut Port<4> = Box::leak(Box::new(Port::new()));
        let (mut sender, mut receiver) = port.split();

        for i in 0..3 {
            sender.post(event(i)).unwrap();
        }
        assert_eq!(receiver.pending(), 3);
        for i in 0..3 {
            assert_eq!(receiver.read(), Some(event(i)));
        }
        assert_eq!(receiver.read(), None);
    }

    #[test]
    fn test_queue_full_accounting() {
        const N: usize = 8;
        let port: &'static mut Port<N> = Box::leak(Box::new(Port::new()));
        let (mut sender, mut receiver) = port.split();

        let posts = 20;
        let accepted = (0..posts).filter(|&i| sender.post(event(i)).is_ok()).count();
        assert_eq!(accepted, Port::<N>::CAPACITY);
        assert_eq!(sender.lost_events() as usize, posts as usize - Port::<N>::CAPACITY);
        assert_eq!(receiver.lost_events(), sender.lost_events());

        // Consumed events are gone for good
        let mut received = 0;
        while let Some(ev) = receiver.read() {
            assert_eq!(ev, event(received));
            received += 1;
        }
        assert_eq!(received as usize, Port::<N>::CAPACITY);
        assert_eq!(receiver.read(), None);
    }

    #[test]
    fn test_concurrent_producer() {
        let port: &'static mut Port<16> = Box::leak(Box::new(Port::new()));
        let (mut sender, mut receiver) = port.split();

        let producer = std::thread::spawn(move || {
            for i in 0..1000 {
                while sender.post(event(i)).is_err() {
                    std::thread::yield_now();
                }
            }
            sender.lost_events()
        });

        let mut next = 0;
        while next < 1000 {
            if let Some(ev) = receiver.read() {
                assert_eq!(ev.sender, SenderHandle::new(next));
                next += 1;
            }
        }
        let lost = producer.join().unwrap();
        assert_eq!(receiver.lost_events(), lost);
    }
}
