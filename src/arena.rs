//! Page-based bump allocator backing the decoded variable-length containers
//! (tag lists, ref arrays, interned spans) that [`crate::span::Span`] hands
//! out. Modeled on the allocation-record bookkeeping in
//! `examples/original_source/pool.c`, built on anonymous [`memmap2`] pages the
//! same way as the rest of this crate's page-range handling.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use memmap2::MmapMut;

use crate::error::AllocError;

fn align16(n: usize) -> usize {
    (n + 15) & !15
}

fn map_anon(len: usize) -> Result<MmapMut, AllocError> {
    MmapMut::map_anon(len).map_err(|source| AllocError::Mmap { requested: len, source })
}

/// A stable handle naming one [`AllocationRecord`]. Index 0 is reserved for
/// the record describing the records array itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AllocationIndex(pub u32);

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AllocationRecord {
    start_memory: usize,
    size_requested: u32,
    size_allocated: u32,
    used: u8,
    page_range_start: u8,
    _pad: [u8; 6],
}

/// Page-backed bump allocator with a growable allocation-record array and
/// stable index handles.
pub struct Arena {
    page_size: usize,
    /// Pages (or page ranges) backing bump-allocated and page-range data.
    /// Record 0 describes `records_map`, not an entry in this vec.
    data_pages: Vec<MmapMut>,
    records_map: MmapMut,
    records_len: u32,
    records_capacity: u32,
    allocation_area_start: *mut u8,
    size_left_on_current_page: usize,
    total_allocated: u64,
    wasted_bytes: u64,
}

impl Arena {
    /// Query the OS page size, map one initial data page, and map an initial
    /// records page whose first entry describes itself.
    pub fn init() -> Result<Self, AllocError> {
        Self::with_page_size(page_size::get())
    }

    /// Like [`Arena::init`] but with an explicit page size, so tests can
    /// exercise multi-page growth without mapping megabytes of real pages.
    pub fn with_page_size(page_size: usize) -> Result<Self, AllocError> {
        let data_page = map_anon(page_size)?;

        let record_size = size_of::<AllocationRecord>();
        let initial_capacity = (page_size / record_size).max(4) as u32;
        let records_map = map_anon(page_size)?;

        let mut arena = Self {
            page_size,
            allocation_area_start: data_page.as_ptr() as *mut u8,
            data_pages: vec![data_page],
            records_map,
            records_len: 0,
            records_capacity: initial_capacity,
            size_left_on_current_page: page_size,
            total_allocated: 0,
            wasted_bytes: 0,
        };

        let records_bytes = initial_capacity as usize * record_size;
        let rec0 = AllocationRecord {
            start_memory: arena.records_map.as_ptr() as usize,
            size_requested: records_bytes as u32,
            size_allocated: page_size as u32,
            used: 1,
            page_range_start: 1,
            _pad: [0; 6],
        };
        arena.records_mut()[0] = rec0;
        arena.records_len = 1;

        Ok(arena)
    }

    fn records_bytes_len(&self) -> usize {
        self.records_capacity as usize * size_of::<AllocationRecord>()
    }

    fn records(&self) -> &[AllocationRecord] {
        let len = self.records_bytes_len();
        bytemuck::cast_slice(&self.records_map[..len])
    }

    fn records_mut(&mut self) -> &mut [AllocationRecord] {
        let len = self.records_bytes_len();
        bytemuck::cast_slice_mut(&mut self.records_map[..len])
    }

    fn record(&self, idx: AllocationIndex) -> Result<AllocationRecord, AllocError> {
        self.records()
            .get(idx.0 as usize)
            .copied()
            .filter(|r| r.used != 0)
            .ok_or(AllocError::InvalidIndex(idx.0))
    }

    /// Grow the records array itself with a 1.6x growth factor,
    /// keeping record 0 pointed at the new page.
    fn grow_records(&mut self) -> Result<(), AllocError> {
        let record_size = size_of::<AllocationRecord>();
        let new_capacity = ((self.records_capacity as f64 * 1.6).ceil() as u32)
            .max(self.records_capacity + 1);
        let wanted_bytes = new_capacity as usize * record_size;
        let pages_needed = (wanted_bytes + self.page_size - 1) / self.page_size;
        let new_bytes = pages_needed * self.page_size;

        let mut new_map = map_anon(new_bytes)?;
        let old_bytes = self.records_map.len();
        let copy_len = old_bytes.min(new_bytes);
        new_map[..copy_len].copy_from_slice(&self.records_map[..copy_len]);

        self.records_map = new_map;
        self.records_capacity = (new_bytes / record_size) as u32;

        let rec0 = AllocationRecord {
            start_memory: self.records_map.as_ptr() as usize,
            size_requested: (self.records_len as usize * record_size) as u32,
            size_allocated: new_bytes as u32,
            used: 1,
            page_range_start: 1,
            _pad: [0; 6],
        };
        self.records_mut()[0] = rec0;
        Ok(())
    }

    /// Allocate a 16-byte-aligned block and return a stable handle to it.
    pub fn allocate(&mut self, requested: u32) -> Result<AllocationIndex, AllocError> {
        let aligned = align16(requested as usize);

        if self.records_len == self.records_capacity {
            self.grow_records()?;
        }

        let (start_memory, size_allocated, page_range_start) = if aligned
            <= self.size_left_on_current_page
        {
            let start = self.allocation_area_start as usize;
            self.allocation_area_start = unsafe { self.allocation_area_start.add(aligned) };
            self.size_left_on_current_page -= aligned;
            (start, aligned, false)
        } else if requested as usize >= self.page_size {
            // Conservative by design: an exact multiple of the page size still
            // maps one extra page. See DESIGN.md (Open Question: Align16 pages
            // formula).
            let n_pages = (requested as usize + self.page_size) / self.page_size;
            let size_allocated = n_pages * self.page_size;
            let map = map_anon(size_allocated)?;
            let start = map.as_ptr() as usize;
            self.data_pages.push(map);
            (start, size_allocated, true)
        } else {
            let map = map_anon(self.page_size * 2)?;
            let start = map.as_ptr() as usize;
            self.size_left_on_current_page = self.page_size * 2 - aligned;
            self.allocation_area_start = unsafe { (start as *mut u8).add(aligned) };
            self.data_pages.push(map);
            (start, aligned, false)
        };

        let idx = self.records_len;
        self.records_mut()[idx as usize] = AllocationRecord {
            start_memory,
            size_requested: requested,
            size_allocated: size_allocated as u32,
            used: 1,
            page_range_start: page_range_start as u8,
            _pad: [0; 6],
        };
        self.records_len += 1;

        self.total_allocated += size_allocated as u64;
        self.wasted_bytes += (size_allocated - requested as usize) as u64;

        Ok(AllocationIndex(idx))
    }

    /// Shrink in place, or grow a page-range allocation (possibly moving it).
    /// Bump-allocated records can only shrink; growing one returns
    /// [`AllocError::CannotGrowInPlace`] so the caller allocates fresh and
    /// copies, per spec.
    pub fn reallocate(
        &mut self,
        idx: AllocationIndex,
        new_requested: u32,
    ) -> Result<AllocationIndex, AllocError> {
        let mut rec = self.record(idx)?;

        if new_requested <= rec.size_allocated {
            self.wasted_bytes -= (rec.size_allocated - rec.size_requested) as u64;
            rec.size_requested = new_requested;
            self.wasted_bytes += (rec.size_allocated - new_requested) as u64;
            self.records_mut()[idx.0 as usize] = rec;
            return Ok(idx);
        }

        if rec.page_range_start == 0 {
            return Err(AllocError::CannotGrowInPlace(idx.0));
        }

        let n_pages = (new_requested as usize + self.page_size) / self.page_size;
        let new_size_allocated = n_pages * self.page_size;
        let new_ptr = self.remap_page_range(
            idx,
            rec.start_memory,
            rec.size_allocated as usize,
            new_size_allocated,
        )?;

        self.wasted_bytes -= (rec.size_allocated - rec.size_requested) as u64;
        self.total_allocated += (new_size_allocated - rec.size_allocated as usize) as u64;
        rec.start_memory = new_ptr;
        rec.size_requested = new_requested;
        rec.size_allocated = new_size_allocated as u32;
        self.wasted_bytes += (new_size_allocated - new_requested as usize) as u64;
        self.records_mut()[idx.0 as usize] = rec;

        Ok(idx)
    }

    fn remap_page_range(
        &mut self,
        idx: AllocationIndex,
        old_ptr: usize,
        old_len: usize,
        new_len: usize,
    ) -> Result<usize, AllocError> {
        let pos = self
            .data_pages
            .iter()
            .position(|m| m.as_ptr() as usize == old_ptr)
            .ok_or(AllocError::InvalidIndex(idx.0))?;

        #[cfg(target_os = "linux")]
        {
            if self.data_pages[pos]
                .remap(new_len, memmap2::RemapOptions::new().may_move(true))
                .is_ok()
            {
                return Ok(self.data_pages[pos].as_ptr() as usize);
            }
        }

        let mut new_map = map_anon(new_len).map_err(|_| AllocError::Remap {
            index: idx.0,
            old: old_len,
            new: new_len,
            source: std::io::Error::other("remap fallback mapping failed"),
        })?;
        let copy_len = old_len.min(new_len);
        new_map[..copy_len].copy_from_slice(&self.data_pages[pos][..copy_len]);
        let new_ptr = new_map.as_ptr() as usize;
        self.data_pages[pos] = new_map;
        Ok(new_ptr)
    }

    pub(crate) fn get(&self, idx: AllocationIndex) -> Result<&[u8], AllocError> {
        let rec = self.record(idx)?;
        let ptr = rec.start_memory as *const u8;
        Ok(unsafe { std::slice::from_raw_parts(ptr, rec.size_requested as usize) })
    }

    pub(crate) fn get_mut(&mut self, idx: AllocationIndex) -> Result<&mut [u8], AllocError> {
        let rec = self.record(idx)?;
        let ptr = rec.start_memory as *mut u8;
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, rec.size_requested as usize) })
    }

    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.wasted_bytes
    }
}
