//! Linear memory helpers
//!
//! Bounds-checked access to a module's linear memory viewed as a byte slice.
//! Strings crossing the boundary are NUL-terminated UTF-8, the convention
//! used by the compiler's `malloc`/`func_compile`/`version` exports.

use crate::error::{BridgeError, BridgeResult};

/// Guest pointer type (32-bit address in WASM linear memory)
///
/// Opaque outside of the module adapters: bridge logic only passes it from
/// one capability call to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestPtr(u32);

impl GuestPtr {
    pub fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Reinterpret a wasm `i32` value as an address
    pub fn from_wasm(raw: i32) -> Self {
        Self(raw as u32)
    }

    pub fn to_wasm(self) -> i32 {
        self.0 as i32
    }

    pub fn addr(self) -> u32 {
        self.0
    }

    pub fn offset(&self, bytes: u32) -> Self {
        Self(self.0.saturating_add(bytes))
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Read `len` bytes at `ptr`
pub fn read_bytes(mem: &[u8], ptr: GuestPtr, len: u32) -> BridgeResult<&[u8]> {
    let start = ptr.as_usize();
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= mem.len())
        .ok_or(BridgeError::MemoryOutOfBounds {
            offset: ptr.addr(),
            size: len,
        })?;
    Ok(&mem[start..end])
}

/// Write `data` at `ptr`
pub fn write_bytes(mem: &mut [u8], ptr: GuestPtr, data: &[u8]) -> BridgeResult<()> {
    let start = ptr.as_usize();
    let end = start
        .checked_add(data.len())
        .filter(|end| *end <= mem.len())
        .ok_or(BridgeError::MemoryOutOfBounds {
            offset: ptr.addr(),
            size: data.len() as u32,
        })?;
    mem[start..end].copy_from_slice(data);
    Ok(())
}

/// Decode the NUL-terminated UTF-8 string starting at `ptr`
pub fn read_cstr(mem: &[u8], ptr: GuestPtr) -> BridgeResult<String> {
    if ptr.is_null() {
        return Err(BridgeError::Decoding("null string pointer".to_string()));
    }
    let tail = mem.get(ptr.as_usize()..).ok_or(BridgeError::MemoryOutOfBounds {
        offset: ptr.addr(),
        size: 1,
    })?;
    let len = tail.iter().position(|b| *b == 0).ok_or_else(|| {
        BridgeError::Decoding(format!("unterminated string at {:#x}", ptr.addr()))
    })?;
    String::from_utf8(tail[..len].to_vec())
        .map_err(|e| BridgeError::Decoding(format!("invalid UTF-8: {}", e)))
}

/// Write `text` at `ptr` as NUL-terminated UTF-8 using at most `max_bytes`
/// bytes, terminator included
///
/// Text that does not fit is cut at the last full character, so the written
/// prefix always stays valid UTF-8. Returns the number of text bytes written.
pub fn write_cstr(
    mem: &mut [u8],
    text: &str,
    ptr: GuestPtr,
    max_bytes: u32,
) -> BridgeResult<u32> {
    if max_bytes == 0 {
        return Ok(0);
    }
    let budget = (max_bytes - 1) as usize;
    let mut cut = text.len().min(budget);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    write_bytes(mem, ptr, &text.as_bytes()[..cut])?;
    write_bytes(mem, ptr.offset(cut as u32), &[0])?;
    Ok(cut as u32)
}

/// Read a little-endian `u32`
pub fn read_u32(mem: &[u8], ptr: GuestPtr) -> BridgeResult<u32> {
    let bytes = read_bytes(mem, ptr, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn write_u32(mem: &mut [u8], ptr: GuestPtr, value: u32) -> BridgeResult<()> {
    write_bytes(mem, ptr, &value.to_le_bytes())
}

pub fn write_u64(mem: &mut [u8], ptr: GuestPtr, value: u64) -> BridgeResult<()> {
    write_bytes(mem, ptr, &value.to_le_bytes())
}
