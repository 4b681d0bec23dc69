//! Simulated linear memory
//!
//! A growable byte array with a bump allocator that remembers every region
//! it handed out, so tests can tell which buffers were never freed.

use funcbridge::wasm_runtime::memory::{read_bytes, read_cstr, write_bytes, write_cstr};
use funcbridge::{BridgeError, BridgeResult, GuestPtr};
use tracing::{debug, warn};

/// Memory region descriptor
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub start: GuestPtr,
    pub size: u32,
    pub allocated: bool,
}

impl MemoryRegion {
    pub fn new(start: GuestPtr, size: u32) -> Self {
        Self {
            start,
            size,
            allocated: true,
        }
    }

    pub fn contains(&self, addr: GuestPtr) -> bool {
        addr.addr() >= self.start.addr() && addr.addr() < self.start.addr() + self.size
    }
}

/// Linear memory of a scripted module
pub struct SimulatedMemory {
    data: Vec<u8>,
    pages: u32,
    max_pages: Option<u32>,
    regions: Vec<MemoryRegion>,
    heap_base: u32,
    invalid_frees: usize,
}

impl SimulatedMemory {
    pub const PAGE_SIZE: u32 = 65536;

    pub fn new(initial_pages: u32, max_pages: Option<u32>) -> Self {
        let size = initial_pages as usize * Self::PAGE_SIZE as usize;
        Self {
            data: vec![0u8; size],
            pages: initial_pages,
            max_pages,
            regions: Vec::new(),
            // keep address 0 and the low page unused, like a real heap
            heap_base: 1024,
            invalid_frees: 0,
        }
    }

    pub fn size(&self) -> u32 {
        self.pages * Self::PAGE_SIZE
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Grow by `delta` pages, returning the previous page count
    pub fn grow(&mut self, delta: u32) -> BridgeResult<u32> {
        let new_pages = self
            .pages
            .checked_add(delta)
            .ok_or(BridgeError::Allocation {
                size: delta.saturating_mul(Self::PAGE_SIZE),
            })?;

        if let Some(max) = self.max_pages
            && new_pages > max
        {
            return Err(BridgeError::Allocation {
                size: delta.saturating_mul(Self::PAGE_SIZE),
            });
        }

        let old_pages = self.pages;
        self.data.resize(new_pages as usize * Self::PAGE_SIZE as usize, 0);
        self.pages = new_pages;
        debug!("Memory grown from {} to {} pages", old_pages, new_pages);
        Ok(old_pages)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn read(&self, ptr: GuestPtr, len: u32) -> BridgeResult<&[u8]> {
        read_bytes(&self.data, ptr, len)
    }

    pub fn write(&mut self, ptr: GuestPtr, bytes: &[u8]) -> BridgeResult<()> {
        write_bytes(&mut self.data, ptr, bytes)
    }

    pub fn read_cstr(&self, ptr: GuestPtr) -> BridgeResult<String> {
        read_cstr(&self.data, ptr)
    }

    pub fn write_cstr(&mut self, text: &str, ptr: GuestPtr, max_bytes: u32) -> BridgeResult<u32> {
        write_cstr(&mut self.data, text, ptr, max_bytes)
    }

    /// Allocate `size` bytes, 8-byte aligned, growing memory as needed
    pub fn alloc(&mut self, size: u32) -> BridgeResult<GuestPtr> {
        let aligned_size = size
            .checked_add(7)
            .map(|s| s & !7)
            .ok_or(BridgeError::Allocation { size })?;
        let end = self
            .heap_base
            .checked_add(aligned_size)
            .ok_or(BridgeError::Allocation { size })?;

        if end > self.size() {
            let needed_pages = end.div_ceil(Self::PAGE_SIZE);
            self.grow(needed_pages - self.pages)?;
        }

        let ptr = GuestPtr::new(self.heap_base);
        self.heap_base = end;
        self.regions.push(MemoryRegion::new(ptr, aligned_size));
        debug!("Allocated {} bytes at {:?}", aligned_size, ptr);
        Ok(ptr)
    }

    /// Allocate a buffer holding `bytes` verbatim
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> BridgeResult<GuestPtr> {
        let size = u32::try_from(bytes.len()).map_err(|_| BridgeError::Allocation {
            size: u32::MAX,
        })?;
        let ptr = self.alloc(size)?;
        self.write(ptr, bytes)?;
        Ok(ptr)
    }

    /// Allocate a NUL-terminated copy of `text`
    pub fn alloc_cstr(&mut self, text: &str) -> BridgeResult<GuestPtr> {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        self.alloc_bytes(&bytes)
    }

    /// Release a region; space is never reused
    pub fn free(&mut self, ptr: GuestPtr) {
        match self
            .regions
            .iter_mut()
            .find(|r| r.start == ptr && r.allocated)
        {
            Some(region) => {
                region.allocated = false;
                debug!("Freed {} bytes at {:?}", region.size, ptr);
            }
            None => {
                warn!("Attempted to free unallocated memory at {:?}", ptr);
                self.invalid_frees += 1;
            }
        }
    }

    /// Regions allocated and not yet freed
    pub fn live_allocations(&self) -> usize {
        self.regions.iter().filter(|r| r.allocated).count()
    }

    pub fn total_allocations(&self) -> usize {
        self.regions.len()
    }

    /// Frees of addresses that were never allocated, or freed twice
    pub fn invalid_frees(&self) -> usize {
        self.invalid_frees
    }

    pub fn region_at(&self, addr: GuestPtr) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }
}

impl Default for SimulatedMemory {
    fn default() -> Self {
        Self::new(1, Some(256))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_aligned_and_tracked() {
        let mut memory = SimulatedMemory::default();
        let a = memory.alloc(5).unwrap();
        let b = memory.alloc(1).unwrap();
        assert_eq!(b.addr() - a.addr(), 8);
        assert_eq!(memory.live_allocations(), 2);

        memory.free(a);
        assert_eq!(memory.live_allocations(), 1);
        memory.free(a);
        assert_eq!(memory.invalid_frees(), 1);
        assert!(memory.region_at(b).is_some());
    }

    #[test]
    fn test_alloc_grows_memory() {
        let mut memory = SimulatedMemory::new(1, Some(4));
        memory.alloc(100_000).unwrap();
        assert_eq!(memory.pages(), 2);
        assert!(memory.alloc(4 * SimulatedMemory::PAGE_SIZE).is_err());
    }

    #[test]
    fn test_cstr_round_trip() {
        let mut memory = SimulatedMemory::default();
        let ptr = memory.alloc_cstr("{\"status\":\"ok\"}").unwrap();
        assert_eq!(memory.read_cstr(ptr).unwrap(), "{\"status\":\"ok\"}");
    }
}
