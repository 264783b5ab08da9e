//! Memory pool for objects created at system initialization
//!
//! The pool is a bump allocator over a user-provided memory region. Objects allocated from
//! the pool live as long as the region and are never dropped. There is no way to free memory:
//! the intended usage is to create all dispatcher objects once during startup and to size
//! the region for exactly this demand.
//!
//! The pool is guarded by a blocking mutex. `NoopRawMutex` suits the common case of a
//! single-threaded initialization phase. `CriticalSectionRawMutex` allows allocation from
//! several task contexts.
//!
//! ```
//! use core::mem::MaybeUninit;
//! use canif::pool::MemoryPool;
//! use embassy_sync::blocking_mutex::raw::NoopRawMutex;
//! use static_cell::StaticCell;
//!
//! static HEAP: StaticCell<[MaybeUninit<u8>; 256]> = StaticCell::new();
//!
//! let pool = MemoryPool::<NoopRawMutex>::new(HEAP.init([MaybeUninit::uninit(); 256]));
//! let counters = pool.alloc_slice_with(4, |_| 0u32).unwrap();
//! counters[3] = 7;
//! assert_eq!(pool.chunk_count(), 1);
//! assert!(pool.allocated_bytes() >= 16);
//! ```

use core::alloc::Layout;
use core::cell::RefCell;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfMemory {
    pub requested: usize,
    pub available: usize,
}

struct Arena<'a> {
    base: NonNull<u8>,
    size: usize,
    used: usize,
    chunks: usize,
    _memory: PhantomData<&'a mut [MaybeUninit<u8>]>,
}

// Safety: The arena owns a unique borrow of its memory region and never accesses
// the regions it has handed out.
unsafe impl Send for Arena<'_> {}

impl<'a> Arena<'a> {
    fn new(memory: &'a mut [MaybeUninit<u8>]) -> Self {
        let size = memory.len();
        // Safety: a slice pointer is never null
        let base = unsafe { NonNull::new_unchecked(memory.as_mut_ptr().cast::<u8>()) };
        Self {
            base,
            size,
            used: 0,
            chunks: 0,
            _memory: PhantomData,
        }
    }

    fn reserve(&mut self, layout: Layout) -> Result<NonNull<u8>, OutOfMemory> {
        let available = self.size - self.used;
        let error = OutOfMemory {
            requested: layout.size(),
            available,
        };

        // Safety: `used` never exceeds the region size
        let cursor = unsafe { self.base.as_ptr().add(self.used) };
        let padding = cursor.align_offset(layout.align());
        let end = padding
            .checked_add(layout.size())
            .filter(|&len| len <= available)
            .ok_or(error)?;

        let start = self.used + padding;
        self.used += end;
        self.chunks += 1;
        // Safety: `start` is within the region or one past its end
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) })
    }
}

/// Bump allocator over a borrowed memory region
pub struct MemoryPool<'a, M: RawMutex> {
    arena: Mutex<M, RefCell<Arena<'a>>>,
}

impl<'a, M: RawMutex> MemoryPool<'a, M> {
    pub fn new(memory: &'a mut [MaybeUninit<u8>]) -> Self {
        Self {
            arena: Mutex::new(RefCell::new(Arena::new(memory))),
        }
    }

    fn reserve(&self, layout: Layout) -> Result<NonNull<u8>, OutOfMemory> {
        let result = self
            .arena
            .lock(|arena| arena.borrow_mut().reserve(layout));
        if let Err(err) = result {
            error!(
                "Memory pool exhausted: {} bytes requested, {} available",
                err.requested,
                err.available
            );
        }
        result
    }

    /// Moves a value into the pool
    pub fn alloc<T>(&self, value: T) -> Result<&'a mut T, OutOfMemory> {
        let ptr = self.reserve(Layout::new::<T>())?.cast::<T>();
        // Safety: the reserved region is aligned and sized for `T` and is not
        // handed out again during 'a
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Allocates a slice with elements initialized by `f(index)`
    pub fn alloc_slice_with<T>(
        &self,
        len: usize,
        mut f: impl FnMut(usize) -> T,
    ) -> Result<&'a mut [T], OutOfMemory> {
        let layout = Layout::array::<T>(len).map_err(|_| OutOfMemory {
            requested: usize::MAX,
            available: self.available_bytes(),
        })?;
        let ptr = self.reserve(layout)?.cast::<T>();
        // Safety: the reserved region is aligned and sized for `len` elements of `T` and is
        // not handed out again during 'a. Every element is written before the slice is formed.
        unsafe {
            for i in 0..len {
                ptr.as_ptr().add(i).write(f(i));
            }
            Ok(core::slice::from_raw_parts_mut(ptr.as_ptr(), len))
        }
    }

    /// Number of bytes consumed so far, alignment padding included
    pub fn allocated_bytes(&self) -> usize {
        self.arena.lock(|arena| arena.borrow().used)
    }

    pub fn available_bytes(&self) -> usize {
        self.arena.lock(|arena| {
            let arena = arena.borrow();
            arena.size - arena.used
        })
    }

    /// Number of successful allocations
    pub fn chunk_count(&self) -> usize {
        self.arena.lock(|arena| arena.borrow().chunks)
    }

    pub(crate) fn log_usage(&self, what: &str) {
        debug!(
            "{}: {} bytes allocated in {} chunks, {} bytes left",
            what,
            self.allocated_bytes(),
            self.chunk_count(),
            self.available_bytes()
        );
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
    use std::boxed::Box;

    #[repr(C, align(8))]
    struct Heap<const N: usize>([MaybeUninit<u8>; N]);

    fn new_heap<const N: usize>() -> &'static mut [MaybeUninit<u8>] {
        &mut Box::leak(Box::new(Heap::<N>([MaybeUninit::uninit(); N]))).0
    }

    #[test]
    fn test_alignment_padding() {
        let pool = MemoryPool::<NoopRawMutex>::new(new_heap::<32>());
        let byte = pool.alloc(0xAAu8).unwrap();
        let word = pool.alloc(0x1234_5678u32).unwrap();
        assert_eq!(*byte, 0xAA);
        assert_eq!(*word, 0x1234_5678);
        assert_eq!(word as *mut u32 as usize % 4, 0);
        assert_eq!(pool.allocated_bytes(), 8);
        assert_eq!(pool.available_bytes(), 24);
        assert_eq!(pool.chunk_count(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let pool = MemoryPool::<NoopRawMutex>::new(new_heap::<16>());
        let slice = pool.alloc_slice_with(3, |i| i as u32).unwrap();
        assert_eq!(slice, &[0, 1, 2]);

        let err = pool.alloc(0u64).unwrap_err();
        assert_eq!(err.requested, 8);
        assert_eq!(err.available, 4);
        // A failed request does not consume memory
        assert_eq!(pool.alloc(5u32).map(|v| *v), Ok(5));
        assert_eq!(pool.available_bytes(), 0);
        assert_eq!(pool.chunk_count(), 2);
    }

    #[test]
    fn test_shared_pool() {
        let pool: &'static MemoryPool<CriticalSectionRawMutex> =
            Box::leak(Box::new(MemoryPool::new(new_heap::<1024>())));

        let handles: std::vec::Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(move || {
                    for i in 0..16u32 {
                        let value = pool.alloc(i).unwrap();
                        assert_eq!(*value, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.allocated_bytes(), 4 * 16 * 4);
        assert_eq!(pool.chunk_count(), 64);
    }
}
