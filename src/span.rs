//! Fat handle over a contiguous run of `T`, either borrowed from outside the
//! arena or owned by one of its allocations. Mirrors the pointer+length+flag
//! span type used throughout `examples/original_source/pool.h`, expressed as a
//! sum type rather than a boolean ownership flag.

use std::mem::size_of;

use crate::arena::{Arena, AllocationIndex};
use crate::error::AllocError;

/// Ownership of the memory backing a [`Span`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Borrowed from memory the span does not own; resizing or freeing it is
    /// an error.
    External,
    /// Backed by an arena allocation; `resize` and `free` operate on it.
    PoolManaged(AllocationIndex),
}

/// A `(pointer, length, provenance)` view over `[T]`, backed either by the
/// arena or by caller-owned memory.
pub struct Span<T> {
    ptr: *mut T,
    len: usize,
    provenance: Provenance,
}

impl<T: Copy> Span<T> {
    /// An empty span with no backing memory at all.
    pub fn empty() -> Span<T> {
        Span { ptr: std::ptr::null_mut(), len: 0, provenance: Provenance::External }
    }

    /// Wrap a borrowed slice. The span never outlives the borrow in practice,
    /// but nothing in the type enforces that here — callers are expected to
    /// respect the arena's lifetime discipline (see the crate's concurrency
    /// notes).
    pub fn external(slice: &[T]) -> Span<T> {
        Span {
            ptr: slice.as_ptr() as *mut T,
            len: slice.len(),
            provenance: Provenance::External,
        }
    }

    /// Allocate room for `n` elements from `arena` and return a pool-managed
    /// span over the (uninitialized) result.
    pub fn alloc_from_pool(n: usize, arena: &mut Arena) -> Result<Span<T>, AllocError> {
        let bytes = n
            .checked_mul(size_of::<T>())
            .and_then(|b| u32::try_from(b).ok())
            .ok_or(AllocError::InvalidIndex(u32::MAX))?;
        let idx = arena.allocate(bytes)?;
        let ptr = arena.get_mut(idx)?.as_mut_ptr() as *mut T;
        Ok(Span { ptr, len: n, provenance: Provenance::PoolManaged(idx) })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn as_slice(&self) -> &[T] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        if self.len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    pub fn get(&self, i: usize) -> Option<&T> {
        self.as_slice().get(i)
    }

    pub fn back(&self) -> Option<&T> {
        self.as_slice().last()
    }

    /// Grow or shrink a pool-managed span in place, re-reading the pointer
    /// from the arena in case the backing page range moved. Shrinking always
    /// succeeds; growing a bump-allocated (non page-range) span fails, same
    /// as `Arena::reallocate`. Resizing an `External` span is an error.
    pub fn resize(&mut self, new_len: usize, arena: &mut Arena) -> Result<(), AllocError> {
        let idx = match self.provenance {
            Provenance::PoolManaged(idx) => idx,
            Provenance::External => return Err(AllocError::NotPoolManaged),
        };
        let bytes = u32::try_from(new_len * size_of::<T>()).map_err(|_| AllocError::InvalidIndex(u32::MAX))?;
        let new_idx = arena.reallocate(idx, bytes)?;
        self.ptr = arena.get_mut(new_idx)?.as_mut_ptr() as *mut T;
        self.len = new_len;
        self.provenance = Provenance::PoolManaged(new_idx);
        Ok(())
    }

    /// Freeing an `External` span is an error; freeing a `PoolManaged` span is
    /// a no-op today since the arena never frees individual allocations
    /// early, but the call is still checked so callers notice a misuse of
    /// borrowed memory.
    pub fn free(self) -> Result<(), AllocError> {
        match self.provenance {
            Provenance::PoolManaged(_) => Ok(()),
            Provenance::External => Err(AllocError::NotPoolManaged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_span_views_borrowed_slice() {
        let data = [1u32, 2, 3, 4];
        let span = Span::external(&data);
        assert_eq!(span.as_slice(), &data);
        assert!(span.free().is_err());
    }

    #[test]
    fn pool_managed_span_roundtrips_writes() {
        let mut arena = Arena::init().unwrap();
        let mut span: Span<u64> = Span::alloc_from_pool(4, &mut arena).unwrap();
        span.as_mut_slice().copy_from_slice(&[10, 20, 30, 40]);
        assert_eq!(span.as_slice(), &[10, 20, 30, 40]);
        assert_eq!(span.back(), Some(&40));
        assert!(span.free().is_ok());
    }

    #[test]
    fn shrinking_a_pool_span_succeeds() {
        let mut arena = Arena::init().unwrap();
        let mut span: Span<u64> = Span::alloc_from_pool(8, &mut arena).unwrap();
        span.resize(2, &mut arena).unwrap();
        assert_eq!(span.len(), 2);
    }
}
