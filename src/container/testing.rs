// Tue Jan 13 2026 - Alex

//! Synthetic Mach-O images for unit tests.
//!
//! File offsets mirror virtual addresses (`offset = addr - IMAGE_BASE`), so
//! tests can place section contents at the addresses they want to assert on.

use crate::container::layout::{
    CPU_TYPE_ARM64, HEADER_SIZE, LC_FUNCTION_STARTS, LC_SEGMENT_64, LC_SYMTAB, MH_MAGIC_64,
    NLIST_SIZE, SECTION_SIZE, SEGMENT_COMMAND_SIZE,
};

pub const IMAGE_BASE: u64 = 0x1_0000_0000;
const PAGE: u64 = 0x1000;

struct SectionSpec {
    segment: String,
    name: String,
    addr: u64,
    bytes: Vec<u8>,
    flags: u32,
}

pub struct MachOBuilder {
    sections: Vec<SectionSpec>,
    symbols: Vec<(String, u64, bool)>,
    function_starts: Vec<u64>,
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Offset of the `section_64` header named `sectname` in a built image.
pub fn section_header_offset(image: &[u8], sectname: &str) -> Option<usize> {
    let ncmds = u32::from_le_bytes(image[16..20].try_into().ok()?) as usize;
    let mut cmd = HEADER_SIZE;
    for _ in 0..ncmds {
        let kind = u32::from_le_bytes(image[cmd..cmd + 4].try_into().ok()?);
        let cmdsize = u32::from_le_bytes(image[cmd + 4..cmd + 8].try_into().ok()?) as usize;
        if kind == LC_SEGMENT_64 {
            let nsects = u32::from_le_bytes(image[cmd + 64..cmd + 68].try_into().ok()?) as usize;
            for i in 0..nsects {
                let at = cmd + SEGMENT_COMMAND_SIZE + i * SECTION_SIZE;
                let raw = &image[at..at + 16];
                let len = raw.iter().position(|&b| b == 0).unwrap_or(16);
                if &raw[..len] == sectname.as_bytes() {
                    return Some(at);
                }
            }
        }
        cmd += cmdsize;
    }
    None
}

fn put_name(buf: &mut [u8], offset: usize, name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(16);
    buf[offset..offset + len].copy_from_slice(&bytes[..len]);
}

fn round_up(value: u64) -> u64 {
    (value + PAGE - 1) & !(PAGE - 1)
}

impl MachOBuilder {
    pub fn new() -> Self {
        Self { sections: Vec::new(), symbols: Vec::new(), function_starts: Vec::new() }
    }

    pub fn text(self, addr: u64, words: &[u32]) -> Self {
        self.section_with_flags("__TEXT", "__text", addr, words_to_bytes(words), 0x8000_0400)
    }

    pub fn cstrings(self, addr: u64, strings: &[&str]) -> Self {
        let mut bytes = Vec::new();
        for s in strings {
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
        }
        self.section_with_flags("__TEXT", "__cstring", addr, bytes, 0x2)
    }

    pub fn section(self, segment: &str, name: &str, addr: u64, bytes: Vec<u8>) -> Self {
        self.section_with_flags(segment, name, addr, bytes, 0)
    }

    pub fn section_with_flags(mut self, segment: &str, name: &str, addr: u64, bytes: Vec<u8>, flags: u32) -> Self {
        self.sections.push(SectionSpec {
            segment: segment.to_string(),
            name: name.to_string(),
            addr,
            bytes,
            flags,
        });
        self
    }

    pub fn symbol(mut self, name: &str, addr: u64, external: bool) -> Self {
        self.symbols.push((name.to_string(), addr, external));
        self
    }

    pub fn function_starts(mut self, starts: &[u64]) -> Self {
        self.function_starts.extend_from_slice(starts);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        // Segment order: __TEXT first, then by first appearance.
        let mut segment_names: Vec<&str> = vec!["__TEXT"];
        for s in &self.sections {
            if !segment_names.contains(&s.segment.as_str()) {
                segment_names.push(&s.segment);
            }
        }

        struct Layout<'a> {
            name: &'a str,
            vmaddr: u64,
            size: u64,
            prot: u32,
            sections: Vec<&'a SectionSpec>,
        }

        let mut layouts = Vec::new();
        for name in &segment_names {
            let sections: Vec<&SectionSpec> = self.sections.iter().filter(|s| s.segment == *name).collect();
            let vmaddr = if *name == "__TEXT" {
                IMAGE_BASE
            } else {
                sections.iter().map(|s| s.addr).min().unwrap_or(IMAGE_BASE) & !(PAGE - 1)
            };
            let end = sections
                .iter()
                .map(|s| s.addr + s.bytes.len() as u64)
                .max()
                .unwrap_or(vmaddr + PAGE);
            let prot = if *name == "__TEXT" { 5 } else { 3 };
            layouts.push(Layout { name, vmaddr, size: round_up(end.max(vmaddr + 1)) - vmaddr, prot, sections });
        }

        let data_end = layouts.iter().map(|l| l.vmaddr + l.size - IMAGE_BASE).max().unwrap_or(PAGE);

        // __LINKEDIT contents.
        let mut starts = self.function_starts.clone();
        starts.sort_unstable();
        let mut starts_blob = Vec::new();
        let mut previous = IMAGE_BASE;
        for start in &starts {
            let mut delta = start - previous;
            previous = *start;
            loop {
                let mut byte = (delta & 0x7f) as u8;
                delta >>= 7;
                if delta != 0 {
                    byte |= 0x80;
                }
                starts_blob.push(byte);
                if delta == 0 {
                    break;
                }
            }
        }
        if !starts.is_empty() {
            starts_blob.push(0);
        }
        while starts_blob.len() % 8 != 0 {
            starts_blob.push(0);
        }

        let ordered_sections: Vec<&SectionSpec> = layouts.iter().flat_map(|l| l.sections.iter().copied()).collect();
        let mut strtab = vec![0u8];
        let mut nlists = Vec::new();
        for (name, addr, external) in &self.symbols {
            let strx = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            let sect = ordered_sections
                .iter()
                .position(|s| *addr >= s.addr && *addr < s.addr + s.bytes.len() as u64)
                .map(|i| i + 1)
                .unwrap_or(1) as u8;
            let mut entry = [0u8; NLIST_SIZE];
            put_u32(&mut entry, 0, strx);
            entry[4] = 0x0e | if *external { 1 } else { 0 };
            entry[5] = sect;
            put_u64(&mut entry, 8, *addr);
            nlists.extend_from_slice(&entry);
        }

        let linkedit_off = data_end;
        let starts_off = linkedit_off;
        let symoff = starts_off + starts_blob.len() as u64;
        let stroff = symoff + nlists.len() as u64;
        let linkedit_size = round_up(stroff + strtab.len() as u64) - linkedit_off;
        let total = (linkedit_off + linkedit_size) as usize;

        let mut buf = vec![0u8; total];
        let mut cmd = HEADER_SIZE;
        let mut ncmds = 0u32;

        for layout in &layouts {
            let cmdsize = SEGMENT_COMMAND_SIZE + layout.sections.len() * SECTION_SIZE;
            put_u32(&mut buf, cmd, LC_SEGMENT_64);
            put_u32(&mut buf, cmd + 4, cmdsize as u32);
            put_name(&mut buf, cmd + 8, layout.name);
            put_u64(&mut buf, cmd + 24, layout.vmaddr);
            put_u64(&mut buf, cmd + 32, layout.size);
            put_u64(&mut buf, cmd + 40, layout.vmaddr - IMAGE_BASE);
            put_u64(&mut buf, cmd + 48, layout.size);
            put_u32(&mut buf, cmd + 56, layout.prot);
            put_u32(&mut buf, cmd + 60, layout.prot);
            put_u32(&mut buf, cmd + 64, layout.sections.len() as u32);
            for (i, section) in layout.sections.iter().enumerate() {
                let at = cmd + SEGMENT_COMMAND_SIZE + i * SECTION_SIZE;
                let offset = section.addr - IMAGE_BASE;
                put_name(&mut buf, at, &section.name);
                put_name(&mut buf, at + 16, &section.segment);
                put_u64(&mut buf, at + 32, section.addr);
                put_u64(&mut buf, at + 40, section.bytes.len() as u64);
                put_u32(&mut buf, at + 48, offset as u32);
                put_u32(&mut buf, at + 52, 2);
                put_u32(&mut buf, at + 64, section.flags);
                let start = offset as usize;
                buf[start..start + section.bytes.len()].copy_from_slice(&section.bytes);
            }
            cmd += cmdsize;
            ncmds += 1;
        }

        put_u32(&mut buf, cmd, LC_SEGMENT_64);
        put_u32(&mut buf, cmd + 4, SEGMENT_COMMAND_SIZE as u32);
        put_name(&mut buf, cmd + 8, "__LINKEDIT");
        put_u64(&mut buf, cmd + 24, IMAGE_BASE + linkedit_off);
        put_u64(&mut buf, cmd + 32, linkedit_size);
        put_u64(&mut buf, cmd + 40, linkedit_off);
        put_u64(&mut buf, cmd + 48, linkedit_size);
        put_u32(&mut buf, cmd + 56, 1);
        put_u32(&mut buf, cmd + 60, 1);
        cmd += SEGMENT_COMMAND_SIZE;
        ncmds += 1;

        put_u32(&mut buf, cmd, LC_SYMTAB);
        put_u32(&mut buf, cmd + 4, 24);
        put_u32(&mut buf, cmd + 8, symoff as u32);
        put_u32(&mut buf, cmd + 12, self.symbols.len() as u32);
        put_u32(&mut buf, cmd + 16, stroff as u32);
        put_u32(&mut buf, cmd + 20, strtab.len() as u32);
        cmd += 24;
        ncmds += 1;

        if !starts.is_empty() {
            put_u32(&mut buf, cmd, LC_FUNCTION_STARTS);
            put_u32(&mut buf, cmd + 4, 16);
            put_u32(&mut buf, cmd + 8, starts_off as u32);
            put_u32(&mut buf, cmd + 12, starts_blob.len() as u32);
            cmd += 16;
            ncmds += 1;
        }

        let sizeofcmds = cmd - HEADER_SIZE;
        assert!(
            ordered_sections.iter().all(|s| (s.addr - IMAGE_BASE) as usize >= cmd),
            "load commands overlap section data"
        );

        put_u32(&mut buf, 0, MH_MAGIC_64);
        put_u32(&mut buf, 4, CPU_TYPE_ARM64);
        put_u32(&mut buf, 8, 0);
        put_u32(&mut buf, 12, 2);
        put_u32(&mut buf, 16, ncmds);
        put_u32(&mut buf, 20, sizeofcmds as u32);

        let s = starts_off as usize;
        buf[s..s + starts_blob.len()].copy_from_slice(&starts_blob);
        let s = symoff as usize;
        buf[s..s + nlists.len()].copy_from_slice(&nlists);
        let s = stroff as usize;
        buf[s..s + strtab.len()].copy_from_slice(&strtab);

        buf
    }
}
