// Wed Jan 15 2026 - Alex

use crate::container::{Address, ContainerError, ContainerResult, Protection};
use std::fmt;

#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub name: String,
    pub start: Address,
    pub size: u64,
    pub protection: Protection,
    pub holds_code: bool,
    pub holds_strings: bool,
}

impl MemoryRegion {
    pub fn end(&self) -> Address {
        self.start + self.size
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr.is_within_range(self.start, self.end())
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} - {}] {}", self.name, self.start, self.end(), self.protection)
    }
}

/// Read access to the virtual address space of a loaded image.
pub trait MemoryReader: Send + Sync {
    fn read_bytes(&self, addr: Address, len: usize) -> ContainerResult<&[u8]>;

    fn base_address(&self) -> Address;

    fn regions(&self) -> Vec<MemoryRegion>;

    fn read_u32(&self, addr: Address) -> ContainerResult<u32> {
        let raw = self.read_bytes(addr, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_i32(&self, addr: Address) -> ContainerResult<i32> {
        self.read_u32(addr).map(|v| v as i32)
    }

    fn read_u64(&self, addr: Address) -> ContainerResult<u64> {
        let raw = self.read_bytes(addr, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a NUL-terminated string, giving up after `max_len` bytes.
    fn read_c_string(&self, addr: Address, max_len: usize) -> ContainerResult<String> {
        let mut out = Vec::new();
        let mut cursor = addr;
        while out.len() < max_len {
            let byte = self.read_bytes(cursor, 1)?[0];
            if byte == 0 {
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            out.push(byte);
            cursor = cursor + 1;
        }
        Err(ContainerError::malformed(format!("unterminated string at {}", addr)))
    }

    fn is_executable(&self, addr: Address) -> bool {
        self.regions().iter().any(|r| r.holds_code && r.contains(addr))
    }
}

/// A flat byte image mapped at a fixed base, treated as code.
pub struct FlatImage {
    base: Address,
    bytes: Vec<u8>,
}

impl FlatImage {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self { base: Address::new(base), bytes }
    }

    pub fn from_words(base: u64, words: &[u32]) -> Self {
        Self::new(base, words.iter().flat_map(|w| w.to_le_bytes()).collect())
    }
}

impl MemoryReader for FlatImage {
    fn read_bytes(&self, addr: Address, len: usize) -> ContainerResult<&[u8]> {
        if addr < self.base {
            return Err(ContainerError::AddressNotMapped(addr.as_u64()));
        }
        let start = (addr.as_u64() - self.base.as_u64()) as usize;
        start
            .checked_add(len)
            .and_then(|end| self.bytes.get(start..end))
            .ok_or(ContainerError::AddressNotMapped(addr.as_u64()))
    }

    fn base_address(&self) -> Address {
        self.base
    }

    fn regions(&self) -> Vec<MemoryRegion> {
        vec![MemoryRegion {
            name: "flat".to_string(),
            start: self.base,
            size: self.bytes.len() as u64,
            protection: Protection::READ | Protection::EXECUTE,
            holds_code: true,
            holds_strings: false,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_image_reads() {
        let image = FlatImage::new(0x1000, b"\x01\x00\x00\x00hi\0".to_vec());
        assert_eq!(image.read_u32(Address::new(0x1000)).unwrap(), 1);
        assert_eq!(image.read_c_string(Address::new(0x1004), 16).unwrap(), "hi");
        assert!(image.read_u64(Address::new(0x1000)).is_err());
        assert!(matches!(
            image.read_bytes(Address::new(0xfff), 1),
            Err(ContainerError::AddressNotMapped(0xfff))
        ));
        assert!(image.is_executable(Address::new(0x1002)));
    }
}
