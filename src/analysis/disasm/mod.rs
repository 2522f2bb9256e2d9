// Wed Jan 15 2026 - Alex

pub mod cache;
pub mod scan;

pub use cache::{CacheEntry, CacheStats, DisassemblyCache};
pub use scan::QuickString;

use crate::analysis::arm64::{Arm64Decoder, Instruction};
use crate::analysis::function::DetectedFunction;
use crate::container::{Address, ContainerError, ContainerResult, MemoryReader};
use std::sync::Arc;
use std::time::Duration;

/// On-demand decoder over a loaded image. Nothing is decoded until asked
/// for, and every decoded window is memoised in a bounded LRU cache.
pub struct LazyDisassembler {
    reader: Arc<dyn MemoryReader>,
    decoder: Arm64Decoder,
    cache: DisassemblyCache,
}

impl LazyDisassembler {
    pub fn new(reader: Arc<dyn MemoryReader>, capacity: usize) -> Self {
        Self { reader, decoder: Arm64Decoder::new(), cache: DisassemblyCache::new(capacity) }
    }

    pub fn reader(&self) -> &Arc<dyn MemoryReader> {
        &self.reader
    }

    pub fn disassemble_at(&self, addr: u64) -> ContainerResult<Instruction> {
        let addr = addr & !3;
        let end = addr.checked_add(4).ok_or(ContainerError::AddressNotMapped(addr))?;
        let key = (addr, end);
        if let Some(cached) = self.cache.get(key) {
            if let Some(instr) = cached.first() {
                return Ok(instr.clone());
            }
        }

        let raw = self.reader.read_u32(Address::new(addr))?;
        let instr = self.decoder.decode(addr, raw);
        self.cache.insert(key, Arc::from(vec![instr.clone()]));
        Ok(instr)
    }

    /// Decodes the window `[start, end)`; `start` is aligned down to a word.
    pub fn disassemble_range(&self, start: u64, end: u64) -> ContainerResult<Arc<[Instruction]>> {
        let start = start & !3;
        let end = end.max(start);
        let key = (start, end);
        if let Some(cached) = self.cache.get(key) {
            return Ok(cached);
        }

        let len = ((end - start) as usize) & !3;
        let bytes = if len == 0 { &[][..] } else { self.reader.read_bytes(Address::new(start), len)? };
        let instructions: Arc<[Instruction]> = bytes
            .chunks_exact(4)
            .enumerate()
            .map(|(i, chunk)| {
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                self.decoder.decode(start + (i as u64) * 4, raw)
            })
            .collect::<Vec<_>>()
            .into();

        log::trace!("Decoded {} instructions at 0x{:x}", instructions.len(), start);
        self.cache.insert(key, instructions.clone());
        Ok(instructions)
    }

    pub fn disassemble_function(&self, function: &DetectedFunction) -> ContainerResult<Arc<[Instruction]>> {
        self.disassemble_range(function.start, function.end)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let evicted = self.cache.evict_stale(max_age);
        if evicted > 0 {
            log::debug!("Evicted {} stale disassembly ranges", evicted);
        }
        evicted
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &DisassemblyCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::FlatImage;

    const BASE: u64 = 0x1_0000_0000;

    fn disassembler() -> LazyDisassembler {
        let image = FlatImage::from_words(BASE, &[0xa9bf7bfd, 0x910003fd, 0x94000002, 0xa8c17bfd, 0xd65f03c0]);
        LazyDisassembler::new(Arc::new(image), 16)
    }

    #[test]
    fn test_range_is_decoded_once_then_served_from_cache() {
        let disasm = disassembler();
        let first = disasm.disassemble_range(BASE, BASE + 0x14).unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first[2].text(), "bl 0x100000010");
        assert!(first[4].is_return());

        let second = disasm.disassemble_range(BASE, BASE + 0x14).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = disasm.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_single_instruction_and_unmapped_address() {
        let disasm = disassembler();
        let instr = disasm.disassemble_at(BASE + 5).unwrap();
        assert_eq!(instr.address, BASE + 4);
        assert_eq!(instr.text(), "mov x29, sp");
        assert!(disasm.disassemble_at(BASE + 0x100).is_err());
        assert!(disasm.disassemble_range(BASE, BASE + 0x100).is_err());
    }

    #[test]
    fn test_last_word_of_address_space() {
        let disasm = disassembler();
        assert!(matches!(disasm.disassemble_at(u64::MAX), Err(ContainerError::AddressNotMapped(_))));
        assert!(disasm.disassemble_range(u64::MAX - 7, u64::MAX).is_err());
        assert_eq!(disasm.cache_stats().size, 0);
    }

    #[test]
    fn test_function_window_and_clear() {
        let disasm = disassembler();
        let function = DetectedFunction::new(BASE, BASE + 0x14);
        assert_eq!(disasm.disassemble_function(&function).unwrap().len(), 5);
        assert_eq!(disasm.disassemble_range(BASE, BASE).unwrap().len(), 0);
        disasm.clear_cache();
        assert_eq!(disasm.cache_stats().size, 0);
    }
}
