use canif_core::{ExternalKind, SenderHandle};
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::{HandleMap, MapError};
use crate::pool::{MemoryPool, OutOfMemory};

const INVALID: u16 = u16::MAX;

/// Half-open range of sender handles used by one kind of event
///
/// An empty range declares a kind without sender handles. All its events map to
/// a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleRange {
    pub start: u32,
    pub end: u32,
}

impl HandleRange {
    pub const NONE: HandleRange = HandleRange { start: 0, end: 0 };

    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Instance {
    range: HandleRange,
    table_offset: usize,
    simple_value: u16,
}

/// Handle map with an explicit lookup table
///
/// Each kind owns a section of one shared table covering its sender handle range.
/// Values must be below `u16::MAX`.
pub struct TableMap<'a> {
    instances: &'a mut [Instance],
    table: &'a mut [u16],
}

impl<'a> TableMap<'a> {
    /// Creates a map for kinds `0..ranges.len()`
    pub fn new<M: RawMutex>(
        pool: &MemoryPool<'a, M>,
        ranges: &[HandleRange],
    ) -> Result<Self, OutOfMemory> {
        let mut table_offset = 0;
        let instances = pool.alloc_slice_with(ranges.len(), |kind| {
            let instance = Instance {
                range: ranges[kind],
                table_offset,
                simple_value: INVALID,
            };
            table_offset += ranges[kind].len();
            instance
        })?;
        let table = pool.alloc_slice_with(table_offset, |_| INVALID)?;
        Ok(Self { instances, table })
    }

    fn entry(&self, kind: ExternalKind, sender: SenderHandle) -> Result<usize, MapError> {
        let instance = self
            .instances
            .get(usize::from(kind))
            .ok_or(MapError::UnknownKind)?;
        let handle = sender.into_u32();
        if (instance.range.start..instance.range.end).contains(&handle) {
            Ok(instance.table_offset + (handle - instance.range.start) as usize)
        } else {
            Err(MapError::HandleOutOfRange)
        }
    }
}

impl HandleMap for TableMap<'_> {
    fn record(
        &mut self,
        kind: ExternalKind,
        sender: SenderHandle,
        value: u32,
    ) -> Result<(), MapError> {
        let value = u16::try_from(value)
            .ok()
            .filter(|&value| value != INVALID)
            .ok_or(MapError::ValueOutOfRange)?;

        let is_simple = self
            .instances
            .get(usize::from(kind))
            .ok_or(MapError::UnknownKind)?
            .range
            .is_empty();
        let slot = if is_simple {
            &mut self.instances[usize::from(kind)].simple_value
        } else {
            let entry = self.entry(kind, sender)?;
            &mut self.table[entry]
        };

        if *slot == INVALID || *slot == value {
            *slot = value;
            Ok(())
        } else {
            warn!(
                "Handle map: kind {} handle {} is already mapped to {}",
                kind.into_u8(),
                sender.into_u32(),
                *slot
            );
            Err(MapError::Inconsistent)
        }
    }

    fn resolve(&self, kind: ExternalKind, sender: SenderHandle) -> Option<u32> {
        let instance = self.instances.get(usize::from(kind))?;
        let value = if instance.range.is_empty() {
            instance.simple_value
        } else {
            self.table[self.entry(kind, sender).ok()?]
        };
        (value != INVALID).then_some(u32::from(value))
    }

    fn uses_sender_handle(&self, kind: ExternalKind) -> bool {
        self.instances
            .get(usize::from(kind))
            .is_none_or(|instance| !instance.range.is_empty())
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
        MemoryPool::new(Box::leak(Box::new([MaybeUninit::<u8>::uninit(); 512])))
    }

    #[test]
    fn test_table_bijection() {
        let pool = new_pool();
        let mut map =
            TableMap::new(&pool, &[HandleRange::new(100, 116), HandleRange::NONE]).unwrap();

        // Registration order is unrelated to the handle order
        let handles = [107u32, 100, 115, 103, 111, 101];
        for (value, &handle) in handles.iter().enumerate() {
            assert_eq!(
                map.record(RECEPTION, SenderHandle::new(handle), value as u32),
                Ok(())
            );
        }
        for (value, &handle) in handles.iter().enumerate().rev() {
            assert_eq!(
                map.resolve(RECEPTION, SenderHandle::new(handle)),
                Some(value as u32)
            );
        }
        assert_eq!(map.resolve(RECEPTION, SenderHandle::new(102)), None);
        assert_eq!(map.resolve(RECEPTION, SenderHandle::new(116)), None);
    }

    #[test]
    fn test_table_errors() {
        let pool = new_pool();
        let mut map = TableMap::new(&pool, &[HandleRange::new(0, 4)]).unwrap();
        assert_eq!(
            map.record(RECEPTION, SenderHandle::new(4), 0),
            Err(MapError::HandleOutOfRange)
        );
        assert_eq!(
            map.record(RECEPTION, SenderHandle::new(0), u32::from(u16::MAX)),
            Err(MapError::ValueOutOfRange)
        );
        assert_eq!(map.record(RECEPTION, SenderHandle::new(0), 2), Ok(()));
        assert_eq!(map.record(RECEPTION, SenderHandle::new(0), 2), Ok(()));
        assert_eq!(
            map.record(RECEPTION, SenderHandle::new(0), 3),
            Err(MapError::Inconsistent)
        );
        assert_eq!(
            map.record(BUS_OFF, SenderHandle::new(0), 0),
            Err(MapError::UnknownKind)
        );
    }

    #[test]
    fn test_kind_without_handles() {
        let pool = new_pool();
        let mut map =
            TableMap::new(&pool, &[HandleRange::new(0, 2), HandleRange::NONE]).unwrap();
        assert_eq!(map.record(BUS_OFF, SenderHandle::new(0), 9), Ok(()));
        assert_eq!(map.resolve(BUS_OFF, SenderHandle::new(42)), Some(9));
        assert_eq!(map.resolve(RECEPTION, SenderHandle::new(1)), None);
        assert!(map.uses_sender_handle(RECEPTION));
        assert!(!map.uses_sender_handle(BUS_OFF));
    }
}
