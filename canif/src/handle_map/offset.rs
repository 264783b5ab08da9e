use canif_core::{ExternalKind, SenderHandle};
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::{HandleMap, MapError};
use crate::pool::{MemoryPool, OutOfMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapConstant {
    /// The kind does not use sender handles: all its events go to a single value
    Simple(Option<u32>),
    /// Value = sender handle + offset
    Offset(Option<i64>),
}

/// Handle map with one offset per kind
///
/// Kinds that use sender handles map them with a constant offset, which is established
/// by the first registration. The integration must assign sender handles in the order
/// the event sources are registered. Kinds that do not use sender handles map to the
/// single value they were registered with.
pub struct OffsetMap<'a> {
    constants: &'a mut [MapConstant],
}

impl<'a> OffsetMap<'a> {
    /// Creates a map for kinds `0..sender_handle_in_use.len()`
    pub fn new<M: RawMutex>(
        pool: &MemoryPool<'a, M>,
        sender_handle_in_use: &[bool],
    ) -> Result<Self, OutOfMemory> {
        let constants = pool.alloc_slice_with(sender_handle_in_use.len(), |kind| {
            if sender_handle_in_use[kind] {
                MapConstant::Offset(None)
            } else {
                MapConstant::Simple(None)
            }
        })?;
        Ok(Self { constants })
    }

    fn constant(&mut self, kind: ExternalKind) -> Result<&mut MapConstant, MapError> {
        self.constants
            .get_mut(usize::from(kind))
            .ok_or(MapError::UnknownKind)
    }
}

impl HandleMap for OffsetMap<'_> {
    fn record(
        &mut self,
        kind: ExternalKind,
        sender: SenderHandle,
        value: u32,
    ) -> Result<(), MapError> {
        let constant = self.constant(kind)?;
        let new = match *constant {
            MapConstant::Simple(_) => MapConstant::Simple(Some(value)),
            MapConstant::Offset(_) => MapConstant::Offset(Some(
                i64::from(value) - i64::from(sender.into_u32()),
            )),
        };

        match *constant {
            MapConstant::Simple(None) | MapConstant::Offset(None) => {
                *constant = new;
                Ok(())
            }
            established if established == new => Ok(()),
            _ => {
                warn!(
                    "Handle map: kind {} handle {} contradicts the established mapping",
                    kind.into_u8(),
                    sender.into_u32()
                );
                Err(MapError::Inconsistent)
            }
        }
    }

    fn resolve(&self, kind: ExternalKind, sender: SenderHandle) -> Option<u32> {
        match *self.constants.get(usize::from(kind))? {
            MapConstant::Simple(value) => value,
            MapConstant::Offset(offset) => {
                u32::try_from(i64::from(sender.into_u32()) + offset?).ok()
            }
        }
    }

    fn uses_sender_handle(&self, kind: ExternalKind) -> bool {
        !matches!(
            self.constants.get(usize::from(kind)),
            Some(MapConstant::Simple(_))
        )
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::mem::MaybeUninit;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::boxed::Box;

    const RECEPTION: ExternalKind = ExternalKind::FRAME_RECEPTION;
    const BUS_OFF: ExternalKind = ExternalKind::BUS_OFF;

    fn new_pool() -> MemoryPool<'static, NoopRawMutex> {
        MemoryPool::new(Box::leak(Box::new([MaybeUninit::<u8>::uninit(); 256])))
    }

    #[test]
    fn test_offset_bijection() {
        let pool = new_pool();
        let mut map = OffsetMap::new(&pool, &[true, false]).unwrap();

        for i in 0..10u32 {
            assert_eq!(map.record(RECEPTION, SenderHandle::new(20 + i), 3 + i), Ok(()));
        }
        // Query order does not matter
        for i in (0..10u32).rev() {
            assert_eq!(map.resolve(RECEPTION, SenderHandle::new(20 + i)), Some(3 + i));
        }
    }

    #[test]
    fn test_negative_offset() {
        let pool = new_pool();
        let mut map = OffsetMap::new(&pool, &[true]).unwrap();
        assert_eq!(map.record(RECEPTION, SenderHandle::new(0), 7), Ok(()));
        assert_eq!(map.record(RECEPTION, SenderHandle::new(1), 8), Ok(()));
        assert_eq!(map.resolve(RECEPTION, SenderHandle::new(1)), Some(8));

        let mut map = OffsetMap::new(&pool, &[true]).unwrap();
        assert_eq!(map.record(RECEPTION, SenderHandle::new(7), 0), Ok(()));
        assert_eq!(map.resolve(RECEPTION, SenderHandle::new(3)), None);
    }

    #[test]
    fn test_out_of_order_registration() {
        let pool = new_pool();
        let mut map = OffsetMap::new(&pool, &[true]).unwrap();
        assert_eq!(map.record(RECEPTION, SenderHandle::new(1), 0), Ok(()));
        assert_eq!(
            map.record(RECEPTION, SenderHandle::new(0), 1),
            Err(MapError::Inconsistent)
        );
        assert_eq!(map.resolve(RECEPTION, SenderHandle::new(1)), Some(0));
    }

    #[test]
    fn test_simple_mapping() {
        let pool = new_pool();
        let mut map = OffsetMap::new(&pool, &[true, false]).unwrap();
        assert_eq!(map.resolve(BUS_OFF, SenderHandle::new(0)), None);

        assert_eq!(map.record(BUS_OFF, SenderHandle::new(0), 4), Ok(()));
        assert_eq!(map.record(BUS_OFF, SenderHandle::new(1), 4), Ok(()));
        assert_eq!(
            map.record(BUS_OFF, SenderHandle::new(0), 5),
            Err(MapError::Inconsistent)
        );
        assert_eq!(map.resolve(BUS_OFF, SenderHandle::new(123)), Some(4));
        assert!(!map.uses_sender_handle(BUS_OFF));
        assert!(map.uses_sender_handle(RECEPTION));
        assert_eq!(
            map.record(ExternalKind::FIRST_CUSTOM, SenderHandle::new(0), 0),
            Err(MapError::UnknownKind)
        );
    }
}
