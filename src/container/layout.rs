// Tue Jan 13 2026 - Alex

//! Bounds-checked walk over the Mach-O header and load-command table.
//!
//! Everything here runs before any structured parsing so that a truncated
//! or hostile buffer is rejected with `MalformedContainer` instead of
//! reaching code that assumes the declared sizes are honest.

use crate::container::{ContainerError, ContainerResult};
use std::ops::Range;

pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_MAGIC: u32 = 0xfeed_face;
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;

pub const LC_SYMTAB: u32 = 0x2;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_FUNCTION_STARTS: u32 = 0x26;

pub const HEADER_SIZE: usize = 32;
pub const SEGMENT_COMMAND_SIZE: usize = 72;
pub const SECTION_SIZE: usize = 80;
pub const NLIST_SIZE: usize = 16;
const FAT_HEADER_SIZE: usize = 8;
const FAT_ARCH_SIZE: usize = 20;

const SECTION_TYPE_MASK: u32 = 0xff;
const S_ZEROFILL: u32 = 0x1;
const S_GB_ZEROFILL: u32 = 0xc;
const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;

pub fn is_zerofill(flags: u32) -> bool {
    matches!(
        flags & SECTION_TYPE_MASK,
        S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
    )
}

/// Little-endian reads that fail instead of panicking.
#[derive(Clone, Copy)]
pub struct ByteView<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn slice(&self, offset: usize, len: usize) -> ContainerResult<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(ContainerError::OutOfBounds { offset: offset as u64, len })
    }

    pub fn u32_le(&self, offset: usize) -> ContainerResult<u32> {
        let raw = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn u32_be(&self, offset: usize) -> ContainerResult<u32> {
        let raw = self.slice(offset, 4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn u64_le(&self, offset: usize) -> ContainerResult<u64> {
        let raw = self.slice(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }
}

#[derive(Debug, Clone)]
pub struct RawSegment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub nsects: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SymtabInfo {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

/// What the walk learned about the image; goblin fills in the rest.
#[derive(Debug, Clone, Default)]
pub struct LoadCommandTable {
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub file_type: u32,
    pub ncmds: u32,
    pub segments: Vec<RawSegment>,
    pub symtab: Option<SymtabInfo>,
    pub function_starts: Option<Range<usize>>,
}

pub fn fixed_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn checked_range(offset: u64, size: u64, len: usize, what: &str) -> ContainerResult<Range<usize>> {
    let end = offset
        .checked_add(size)
        .ok_or_else(|| ContainerError::malformed(format!("{} range overflows", what)))?;
    if end > len as u64 {
        return Err(ContainerError::malformed(format!(
            "{} [0x{:x}, 0x{:x}) exceeds buffer of 0x{:x} bytes",
            what, offset, end, len
        )));
    }
    Ok(offset as usize..end as usize)
}

/// Rejects a virtual address range whose end does not fit in 64 bits.
pub fn checked_span(addr: u64, size: u64, what: &str) -> ContainerResult<u64> {
    addr.checked_add(size)
        .ok_or_else(|| ContainerError::malformed(format!("{} at 0x{:x} (+0x{:x}) wraps the address space", what, addr, size)))
}

/// Picks the arm64 image out of a universal binary, or the whole buffer
/// when it is already thin.
pub fn select_arm64_slice(bytes: &[u8]) -> ContainerResult<Range<usize>> {
    let view = ByteView::new(bytes);
    let magic = view
        .u32_be(0)
        .map_err(|_| ContainerError::malformed("buffer too small for a magic number"))?;
    if magic != FAT_MAGIC {
        return Ok(0..bytes.len());
    }

    let nfat = view
        .u32_be(4)
        .map_err(|_| ContainerError::malformed("truncated fat header"))? as usize;
    let table_len = nfat
        .checked_mul(FAT_ARCH_SIZE)
        .and_then(|n| n.checked_add(FAT_HEADER_SIZE))
        .ok_or_else(|| ContainerError::malformed("fat arch count overflows"))?;
    if table_len > bytes.len() {
        return Err(ContainerError::malformed(format!(
            "fat header declares {} architectures but buffer holds 0x{:x} bytes",
            nfat,
            bytes.len()
        )));
    }

    let mut seen = Vec::with_capacity(nfat);
    for i in 0..nfat {
        let entry = FAT_HEADER_SIZE + i * FAT_ARCH_SIZE;
        let cputype = view.u32_be(entry)?;
        let offset = view.u32_be(entry + 8)? as u64;
        let size = view.u32_be(entry + 12)? as u64;
        if cputype == CPU_TYPE_ARM64 {
            log::debug!("Selected arm64 slice at 0x{:x} ({} bytes)", offset, size);
            return checked_range(offset, size, bytes.len(), "fat arm64 slice");
        }
        seen.push(cputype);
    }

    Err(ContainerError::UnsupportedArchitecture(seen.first().copied().unwrap_or(0)))
}

/// Validates the header and every load command against the buffer length.
pub fn walk(image: &[u8]) -> ContainerResult<LoadCommandTable> {
    let view = ByteView::new(image);
    if image.len() < HEADER_SIZE {
        return Err(ContainerError::malformed(format!(
            "buffer of {} bytes is smaller than a mach_header_64",
            image.len()
        )));
    }

    let magic = view.u32_le(0)?;
    match magic {
        MH_MAGIC_64 => {}
        MH_MAGIC => return Err(ContainerError::malformed("32-bit Mach-O images are not supported")),
        other => return Err(ContainerError::malformed(format!("unrecognized magic 0x{:08x}", other))),
    }

    let mut table = LoadCommandTable {
        cpu_type: view.u32_le(4)?,
        cpu_subtype: view.u32_le(8)?,
        file_type: view.u32_le(12)?,
        ncmds: view.u32_le(16)?,
        ..Default::default()
    };
    if table.cpu_type != CPU_TYPE_ARM64 {
        return Err(ContainerError::UnsupportedArchitecture(table.cpu_type));
    }

    let sizeofcmds = view.u32_le(20)? as usize;
    let cmds_end = HEADER_SIZE
        .checked_add(sizeofcmds)
        .filter(|end| *end <= image.len())
        .ok_or_else(|| ContainerError::malformed(format!("sizeofcmds 0x{:x} exceeds buffer", sizeofcmds)))?;

    let mut offset = HEADER_SIZE;
    for index in 0..table.ncmds {
        if offset + 8 > cmds_end {
            return Err(ContainerError::malformed(format!(
                "load command {} of {} starts past the command table",
                index, table.ncmds
            )));
        }
        let cmd = view.u32_le(offset)?;
        let cmdsize = view.u32_le(offset + 4)? as usize;
        if cmdsize < 8 || offset + cmdsize > cmds_end {
            return Err(ContainerError::malformed(format!(
                "load command {} (0x{:x}) has invalid size 0x{:x}",
                index, cmd, cmdsize
            )));
        }

        match cmd {
            LC_SEGMENT_64 => table.segments.push(walk_segment(&view, offset, cmdsize)?),
            LC_SYMTAB => table.symtab = Some(walk_symtab(&view, offset, cmdsize)?),
            LC_FUNCTION_STARTS => {
                if cmdsize < 16 {
                    return Err(ContainerError::malformed("LC_FUNCTION_STARTS is truncated"));
                }
                let dataoff = view.u32_le(offset + 8)? as u64;
                let datasize = view.u32_le(offset + 12)? as u64;
                table.function_starts =
                    Some(checked_range(dataoff, datasize, image.len(), "function starts")?);
            }
            _ => {}
        }

        offset += cmdsize;
    }

    Ok(table)
}

fn walk_segment(view: &ByteView<'_>, offset: usize, cmdsize: usize) -> ContainerResult<RawSegment> {
    if cmdsize < SEGMENT_COMMAND_SIZE {
        return Err(ContainerError::malformed("LC_SEGMENT_64 is truncated"));
    }
    let segment = RawSegment {
        name: fixed_name(view.slice(offset + 8, 16)?),
        vmaddr: view.u64_le(offset + 24)?,
        vmsize: view.u64_le(offset + 32)?,
        fileoff: view.u64_le(offset + 40)?,
        filesize: view.u64_le(offset + 48)?,
        nsects: view.u32_le(offset + 64)?,
    };
    checked_range(segment.fileoff, segment.filesize, view.len(), &segment.name)?;
    checked_span(segment.vmaddr, segment.vmsize, &segment.name)?;

    let sections_len = (segment.nsects as usize)
        .checked_mul(SECTION_SIZE)
        .and_then(|n| n.checked_add(SEGMENT_COMMAND_SIZE))
        .ok_or_else(|| ContainerError::malformed("section count overflows"))?;
    if sections_len > cmdsize {
        return Err(ContainerError::malformed(format!(
            "segment {} declares {} sections but its command holds only 0x{:x} bytes",
            segment.name, segment.nsects, cmdsize
        )));
    }

    for i in 0..segment.nsects as usize {
        let sect = offset + SEGMENT_COMMAND_SIZE + i * SECTION_SIZE;
        let addr = view.u64_le(sect + 32)?;
        let size = view.u64_le(sect + 40)?;
        let fileoff = view.u32_le(sect + 48)? as u64;
        let flags = view.u32_le(sect + 64)?;
        let name = format!("{},{}", segment.name, fixed_name(view.slice(sect, 16)?));
        checked_span(addr, size, &name)?;
        if is_zerofill(flags) || size == 0 {
            continue;
        }
        checked_range(fileoff, size, view.len(), &name)?;
    }

    Ok(segment)
}

fn walk_symtab(view: &ByteView<'_>, offset: usize, cmdsize: usize) -> ContainerResult<SymtabInfo> {
    if cmdsize < 24 {
        return Err(ContainerError::malformed("LC_SYMTAB is truncated"));
    }
    let info = SymtabInfo {
        symoff: view.u32_le(offset + 8)?,
        nsyms: view.u32_le(offset + 12)?,
        stroff: view.u32_le(offset + 16)?,
        strsize: view.u32_le(offset + 20)?,
    };
    let symbols_len = (info.nsyms as u64) * NLIST_SIZE as u64;
    checked_range(info.symoff as u64, symbols_len, view.len(), "symbol table")?;
    checked_range(info.stroff as u64, info.strsize as u64, view.len(), "string table")?;
    Ok(info)
}

pub fn read_uleb128(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        if shift < 64 {
            result |= ((byte & 0x7f) as u64) << shift;
        }
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift > 70 {
            return None;
        }
    }
}

/// Decodes the ULEB128 delta list of `LC_FUNCTION_STARTS`.
pub fn decode_function_starts(data: &[u8], text_vmaddr: u64) -> Vec<u64> {
    let mut starts = Vec::new();
    let mut pos = 0;
    let mut address = text_vmaddr;
    while let Some(delta) = read_uleb128(data, &mut pos) {
        if delta == 0 {
            break;
        }
        address = address.wrapping_add(delta);
        starts.push(address);
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{put_u64, section_header_offset, MachOBuilder};

    fn image() -> Vec<u8> {
        MachOBuilder::new()
            .text(0x1_0000_1000, &[0xd65f03c0u32])
            .symbol("_main", 0x1_0000_1000, true)
            .build()
    }

    #[test]
    fn test_walk_accepts_well_formed_image() {
        let table = walk(&image()).unwrap();
        assert_eq!(table.cpu_type, CPU_TYPE_ARM64);
        assert!(table.segments.iter().any(|s| s.name == "__TEXT"));
        assert_eq!(table.symtab.unwrap().nsyms, 1);
    }

    #[test]
    fn test_every_truncation_is_rejected_without_panicking() {
        let bytes = image();
        let table = walk(&bytes).unwrap();
        let needed = table
            .segments
            .iter()
            .map(|s| (s.fileoff + s.filesize) as usize)
            .max()
            .unwrap();
        for len in 0..needed.min(bytes.len()) {
            assert!(
                matches!(walk(&bytes[..len]), Err(ContainerError::MalformedContainer(_))),
                "truncation to {} bytes was accepted",
                len
            );
        }
    }

    #[test]
    fn test_corrupted_magic() {
        let mut bytes = image();
        bytes[0] ^= 0xff;
        assert!(matches!(walk(&bytes), Err(ContainerError::MalformedContainer(_))));
    }

    #[test]
    fn test_oversized_section_count() {
        let mut bytes = image();
        // nsects of the first LC_SEGMENT_64 (__TEXT).
        let nsects_at = HEADER_SIZE + 64;
        bytes[nsects_at..nsects_at + 4].copy_from_slice(&0x0fff_ffffu32.to_le_bytes());
        assert!(matches!(walk(&bytes), Err(ContainerError::MalformedContainer(_))));
    }

    #[test]
    fn test_wrapping_section_address() {
        let mut bytes = MachOBuilder::new()
            .text(0x1_0000_1000, &[0xd65f03c0u32])
            .section("__DATA", "__cfstring", 0x1_0000_4000, vec![0u8; 32])
            .build();
        let header = section_header_offset(&bytes, "__cfstring").unwrap();
        put_u64(&mut bytes, header + 32, 0xffff_ffff_ffff_fff0);
        assert!(matches!(walk(&bytes), Err(ContainerError::MalformedContainer(_))));
        assert!(checked_span(u64::MAX - 0x10, 0x10, "end").is_ok());
        assert!(checked_span(u64::MAX - 0x10, 0x11, "end").is_err());
    }

    #[test]
    fn test_wrong_cpu_type() {
        let mut bytes = image();
        bytes[4..8].copy_from_slice(&0x0100_0007u32.to_le_bytes());
        assert!(matches!(walk(&bytes), Err(ContainerError::UnsupportedArchitecture(0x0100_0007))));
    }

    #[test]
    fn test_fat_slice_selection() {
        let thin = image();
        let mut fat = Vec::new();
        fat.extend_from_slice(&FAT_MAGIC.to_be_bytes());
        fat.extend_from_slice(&2u32.to_be_bytes());
        for (cpu, offset, size) in [(0x0100_0007u32, 0x1000u32, 0u32), (CPU_TYPE_ARM64, 0x1000, thin.len() as u32)] {
            fat.extend_from_slice(&cpu.to_be_bytes());
            fat.extend_from_slice(&0u32.to_be_bytes());
            fat.extend_from_slice(&offset.to_be_bytes());
            fat.extend_from_slice(&size.to_be_bytes());
            fat.extend_from_slice(&14u32.to_be_bytes());
        }
        fat.resize(0x1000, 0);
        fat.extend_from_slice(&thin);

        let range = select_arm64_slice(&fat).unwrap();
        assert_eq!(range, 0x1000..0x1000 + thin.len());

        fat.truncate(0x1800);
        assert!(matches!(select_arm64_slice(&fat), Err(ContainerError::MalformedContainer(_))));
    }

    #[test]
    fn test_function_starts_deltas() {
        let data = [0x80, 0x20, 0x10, 0x08, 0x00, 0x55];
        let starts = decode_function_starts(&data, 0x1_0000_0000);
        assert_eq!(starts, vec![0x1_0000_1000, 0x1_0000_1010, 0x1_0000_1018]);
    }
}
