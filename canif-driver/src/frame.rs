//! Frame payload

/// CAN-FD-compatible payload length
///
/// The 4-bit data length code (DLC) of CAN-FD frames selects one of sixteen lengths.
/// Classic CAN frames use the codes 0 to 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataLength(u8);

impl DataLength {
    pub const MAX: usize = 64;
    pub const CLASSIC_MAX: usize = 8;

    const FD_LENGTHS: [u8; 7] = [12, 16, 20, 24, 32, 48, 64];

    /// Returns the length if it is representable by a DLC code
    pub const fn new(value: usize) -> Option<Self> {
        if value <= Self::CLASSIC_MAX {
            return Some(Self(value as u8));
        }
        let mut i = 0;
        while i < Self::FD_LENGTHS.len() {
            if Self::FD_LENGTHS[i] as usize == value {
                return Some(Self(value as u8));
            }
            i += 1;
        }
        None
    }

    pub const fn from_dlc(code: u8) -> Option<Self> {
        match code {
            0..=8 => Some(Self(code)),
            9..=15 => Some(Self(Self::FD_LENGTHS[(code - 9) as usize])),
            _ => None,
        }
    }

    pub const fn dlc(&self) -> u8 {
        if self.0 as usize <= Self::CLASSIC_MAX {
            return self.0;
        }
        let mut i = 0;
        while Self::FD_LENGTHS[i] != self.0 {
            i += 1;
        }
        9 + i as u8
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<DataLength> for usize {
    fn from(value: DataLength) -> Self {
        value.as_usize()
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLength;

/// Frame payload of a DLC-compatible length
///
/// Doubles as the payload of any event posted into a dispatcher port; events
/// without payload carry an empty vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    length: DataLength,
    bytes: [u8; DataLength::MAX],
}

impl Data {
    pub const EMPTY: Data = Data {
        length: DataLength(0),
        bytes: [0; DataLength::MAX],
    };

    /// Copies a slice of a DLC-compatible length.
    pub fn new(data: &[u8]) -> Result<Self, InvalidLength> {
        let length = DataLength::new(data.len()).ok_or(InvalidLength)?;
        let mut bytes = [0; DataLength::MAX];
        bytes[..data.len()].copy_from_slice(data);

        Ok(Self { length, bytes })
    }

    pub fn new_zeros(length: DataLength) -> Self {
        Self {
            length,
            bytes: [0; DataLength::MAX],
        }
    }

    pub fn length(&self) -> DataLength {
        self.length
    }
}

impl Default for Data {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl core::ops::Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes[..usize::from(self.length)]
    }
}

impl core::ops::DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes[..usize::from(self.length)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlc_codes() {
        for code in 0u8..16 {
            let length = DataLength::from_dlc(code).unwrap();
            assert_eq!(length.dlc(), code);
            assert_eq!(DataLength::new(length.as_usize()), Some(length));
        }
        assert!(DataLength::from_dlc(16).is_none());
        assert_eq!(DataLength::from_dlc(15).unwrap().as_usize(), 64);
    }

    #[test]
    fn test_invalid_lengths() {
        for len in [9usize, 11, 13, 33, 63, 65] {
            assert!(DataLength::new(len).is_none(), "{len}");
        }
        assert!(Data::new(&[0; 10]).is_err());
    }

    #[test]
    fn test_data_view() {
        let mut data = Data::new(&[1, 2, 3]).unwrap();
        assert_eq!(&data[..], &[1, 2, 3]);
        data[0] = 7;
        assert_eq!(&data[..], &[7, 2, 3]);
        assert!(Data::EMPTY.is_empty());
        assert_eq!(Data::new_zeros(DataLength::new(8).unwrap()).len(), 8);
    }
}
