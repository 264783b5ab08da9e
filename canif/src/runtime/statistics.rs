/// Event counters of the CAN interface
///
/// All counters saturate. Each context owns its own set: the reception counters are
/// maintained by the [`crate::sender::EventSender`] in the producer context, the others by
/// the [`super::CanRuntime`] of a dispatcher. [`Statistics::merge`] combines them for
/// reporting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    /// Frames posted by the reception context
    pub rx_frames: u32,
    /// Send attempts, successful or not
    pub tx_frames: u32,
    pub rx_timeouts: u32,
    /// Received frames lost because the port was full
    pub rx_queue_full: u32,
    /// Send attempts rejected by the driver
    pub tx_send_buffer_full: u32,
    /// Transitions into the bus-off state
    pub bus_off: u32,
}

impl Statistics {
    pub fn merge(&self, other: &Statistics) -> Statistics {
        Statistics {
            rx_frames: self.rx_frames.saturating_add(other.rx_frames),
            tx_frames: self.tx_frames.saturating_add(other.tx_frames),
            rx_timeouts: self.rx_timeouts.saturating_add(other.rx_timeouts),
            rx_queue_full: self.rx_queue_full.saturating_add(other.rx_queue_full),
            tx_send_buffer_full: self
                .tx_send_buffer_full
                .saturating_add(other.tx_send_buffer_full),
            bus_off: self.bus_off.saturating_add(other.bus_off),
        }
    }
}

pub(crate) fn count(counter: &mut u32) {
    *counter = counter.saturating_add(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_saturate() {
        let mut counter = u32::MAX - 1;
        count(&mut counter);
        count(&mut counter);
        assert_eq!(counter, u32::MAX);

        let producer = Statistics {
            rx_frames: u32::MAX,
            rx_queue_full: 3,
            ..Default::default()
        };
        let dispatcher = Statistics {
            rx_frames: 1,
            tx_frames: 7,
            ..Default::default()
        };
        let total = producer.merge(&dispatcher);
        assert_eq!(total.rx_frames, u32::MAX);
        assert_eq!(total.rx_queue_full, 3);
        assert_eq!(total.tx_frames, 7);
    }
}
