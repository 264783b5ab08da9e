//! End-to-end protection helpers for frame codecs
//!
//! Frames may carry an 8-bit checksum and a cyclic sequence counter. The checksum
//! byte is chosen such that the wrapping sum of a start value and all payload bytes,
//! checksum included, is 255. The start value is usually derived from the CAN ID, so that
//! frames with equal payload but different IDs yield different checksums.
//!
//! ```
//! use canif::e2e::{protect, validate};
//!
//! let mut payload = [0x12, 0x34, 0x00, 0x56];
//! protect(17, &mut payload, 2);
//! assert!(validate(17, &payload));
//! payload[3] ^= 1;
//! assert!(!validate(17, &payload));
//! ```

use canif_core::TransmissionStatus;

/// Wrapping sum of `start` and all bytes
pub fn checksum(start: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(start, |sum, &byte| sum.wrapping_add(byte))
}

/// Writes the checksum byte at `index`. Panics if `index` is out of bounds.
pub fn protect(start: u8, bytes: &mut [u8], index: usize) {
    bytes[index] = 0;
    bytes[index] = 255u8.wrapping_sub(checksum(start, bytes));
}

pub fn validate(start: u8, bytes: &[u8]) -> bool {
    checksum(start, bytes) == 255
}

/// Whether a receiver should accept any sequence counter value as the new reference
///
/// This is the case as long as the frame has never been received correctly, after a timeout
/// and after any other error but a sequence error.
pub fn needs_resync(status: TransmissionStatus) -> bool {
    status.intersects(!TransmissionStatus::ERR_SEQUENCE)
}

/// Cyclic sequence counter
///
/// The counter runs from `from` to `to` and wraps back to `from`. It counts down if `to` is
/// below `from`. A sender uses [`SequenceCounter::next`], a receiver
/// [`SequenceCounter::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceCounter {
    from: u8,
    to: u8,
    last: u8,
}

impl SequenceCounter {
    pub const fn new(from: u8, to: u8) -> Self {
        Self { from, to, last: to }
    }

    pub const fn last(&self) -> u8 {
        self.last
    }

    const fn successor(&self, value: u8) -> Option<u8> {
        if value == self.to {
            Some(self.from)
        } else if self.from < self.to && value < self.to {
            Some(value + 1)
        } else if self.from > self.to && value > self.to {
            Some(value - 1)
        } else {
            None
        }
    }

    /// Advances the counter and returns the value for the next outbound frame
    pub fn next(&mut self) -> u8 {
        self.last = self.successor(self.last).unwrap_or(self.from);
        self.last
    }

    /// Checks a received value against the last one and takes it as the new reference
    ///
    /// With `resync`, every value is accepted.
    pub fn validate(&mut self, value: u8, resync: bool) -> bool {
        let okay = resync || self.successor(self.last) == Some(value);
        self.last = value;
        okay
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec;

    #[test]
    fn test_checksum() {
        let mut payload = [0u8; 8];
        for start in [0u8, 1, 0x80, 0xFF] {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte = (i as u8).wrapping_mul(37).wrapping_add(start);
            }
            protect(start, &mut payload, 0);
            assert!(validate(start, &payload));
            assert!(!validate(start.wrapping_add(1), &payload));
        }
        assert!(validate(255, &[]));
        assert_eq!(checksum(250, &[3, 4]), 1);
    }

    #[test]
    fn test_counter_sequence() {
        let mut up = SequenceCounter::new(1, 4);
        let values: Vec<_> = (0..6).map(|_| up.next()).collect();
        assert_eq!(values, [1, 2, 3, 4, 1, 2]);

        let mut down = SequenceCounter::new(14, 12);
        let values: Vec<_> = (0..4).map(|_| down.next()).collect();
        assert_eq!(values, [14, 13, 12, 14]);
    }

    #[test]
    fn test_validation() {
        let mut rx = SequenceCounter::new(0, 14);
        assert!(rx.validate(9, true));
        assert!(rx.validate(10, false));
        // Lost frame
        assert!(!rx.validate(12, false));
        // The erroneous value is the new reference
        assert!(rx.validate(13, false));
        assert!(rx.validate(14, false));
        assert!(rx.validate(0, false));
        assert!(!rx.validate(0, false));

        let mut rx = SequenceCounter::new(3, 1);
        assert!(rx.validate(2, true));
        assert!(rx.validate(1, false));
        assert!(rx.validate(3, false));
        assert!(!rx.validate(1, false));
    }

    #[test]
    fn test_resync_condition() {
        assert!(needs_resync(TransmissionStatus::NEVER_RECEIVED));
        assert!(needs_resync(
            TransmissionStatus::ERR_TIMEOUT | TransmissionStatus::ERR_SEQUENCE
        ));
        assert!(!needs_resync(TransmissionStatus::ERR_SEQUENCE));
        assert!(!needs_resync(TransmissionStatus::OKAY));
    }
}
