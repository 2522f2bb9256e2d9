// Tue Jan 13 2026 - Alex

use crate::container::layout::{self, fixed_name, LoadCommandTable};
use crate::container::{
    Address, ContainerData, ContainerError, ContainerResult, MemoryReader, MemoryRegion, Protection,
    Section, Segment, StringLiteral, Symbol, SymbolKind,
};
use goblin::mach::MachO;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

const N_STAB: u8 = 0xe0;
const N_TYPE: u8 = 0x0e;
const N_EXT: u8 = 0x01;
const N_UNDF: u8 = 0x0;
const N_ABS: u8 = 0x2;
const N_SECT: u8 = 0xe;

const CFSTRING_SIZE: u64 = 32;
const TAGGED_POINTER_MASK: u64 = 0x0000_000f_ffff_ffff;
const MAX_STRING_LEN: usize = 4096;

const STRING_SECTIONS: &[&str] = &[
    "__cstring",
    "__objc_methname",
    "__objc_classname",
    "__objc_methtype",
    "__oslogstring",
];

/// Indices into `MachOContainer::sections` for the Objective-C runtime tables.
#[derive(Debug, Clone, Default)]
pub struct ObjCSectionTable {
    pub class_list: Option<usize>,
    pub category_list: Option<usize>,
    pub protocol_list: Option<usize>,
    pub selector_refs: Option<usize>,
    pub class_refs: Option<usize>,
    pub super_refs: Option<usize>,
    pub image_info: Option<usize>,
}

impl ObjCSectionTable {
    fn assign(&mut self, name: &str, index: usize) {
        let slot = match name {
            "__objc_classlist" => &mut self.class_list,
            "__objc_catlist" => &mut self.category_list,
            "__objc_protolist" => &mut self.protocol_list,
            "__objc_selrefs" => &mut self.selector_refs,
            "__objc_classrefs" => &mut self.class_refs,
            "__objc_superrefs" => &mut self.super_refs,
            "__objc_imageinfo" => &mut self.image_info,
            _ => return,
        };
        slot.get_or_insert(index);
    }

    pub fn is_empty(&self) -> bool {
        self.class_list.is_none() && self.category_list.is_none() && self.protocol_list.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub cpu_subtype: u32,
    pub file_type: u32,
    pub slide: i64,
    pub segments: usize,
    pub sections: usize,
    pub symbols: usize,
    pub strings: usize,
    pub function_starts: usize,
    pub memory_mapped: bool,
}

/// A parsed, immutable arm64 Mach-O image.
pub struct MachOContainer {
    data: ContainerData,
    slice: Range<usize>,
    slide: u64,
    cpu_subtype: u32,
    file_type: u32,
    segments: Vec<Segment>,
    sections: Vec<Section>,
    symbols: Vec<Symbol>,
    symbols_by_address: BTreeMap<u64, usize>,
    strings: BTreeMap<u64, StringLiteral>,
    function_starts: Vec<u64>,
    objc_sections: ObjCSectionTable,
}

struct ParsedImage {
    table: LoadCommandTable,
    slide: u64,
    segments: Vec<Segment>,
    sections: Vec<Section>,
    symbols: Vec<Symbol>,
    function_starts: Vec<u64>,
}

impl MachOContainer {
    pub fn load<P: AsRef<Path>>(path: P, base_address: Option<u64>, use_mmap: bool) -> ContainerResult<Self> {
        let data = ContainerData::open(path.as_ref(), use_mmap)?;
        log::debug!("Loaded {} ({} bytes, mapped: {})", path.as_ref().display(), data.len(), data.is_mapped());
        Self::parse(data, base_address)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> ContainerResult<Self> {
        Self::parse(ContainerData::Owned(bytes), None)
    }

    /// Validates and parses `data`. When `base_address` is given, every
    /// address is slid so that `__TEXT` starts there.
    pub fn parse(data: impl Into<ContainerData>, base_address: Option<u64>) -> ContainerResult<Self> {
        let data = data.into();
        let slice = layout::select_arm64_slice(&data)?;
        let image = data
            .get(slice.clone())
            .ok_or_else(|| ContainerError::malformed("architecture slice outside buffer"))?;

        let parsed = Self::parse_image(image, base_address)?;
        let mut container = Self {
            slice,
            slide: parsed.slide,
            cpu_subtype: parsed.table.cpu_subtype,
            file_type: parsed.table.file_type,
            segments: parsed.segments,
            sections: parsed.sections,
            symbols: parsed.symbols,
            symbols_by_address: BTreeMap::new(),
            strings: BTreeMap::new(),
            function_starts: parsed.function_starts,
            objc_sections: ObjCSectionTable::default(),
            data,
        };
        container.index_symbols();
        container.index_strings();
        container.index_objc_sections();

        log::debug!(
            "Parsed Mach-O: {} segments, {} sections, {} symbols, {} strings, {} function starts",
            container.segments.len(),
            container.sections.len(),
            container.symbols.len(),
            container.strings.len(),
            container.function_starts.len()
        );
        Ok(container)
    }

    fn parse_image(image: &[u8], base_address: Option<u64>) -> ContainerResult<ParsedImage> {
        let table = layout::walk(image)?;
        let macho = MachO::parse(image, 0)
            .map_err(|e| ContainerError::malformed(format!("Failed to parse Mach-O: {}", e)))?;

        let text_vmaddr = table
            .segments
            .iter()
            .find(|s| s.name == "__TEXT")
            .map(|s| s.vmaddr)
            .unwrap_or(0);
        let slide = base_address.map(|base| base.wrapping_sub(text_vmaddr)).unwrap_or(0);

        let mut segments = Vec::new();
        let mut sections = Vec::new();
        for segment in &macho.segments {
            let segname = fixed_name(&segment.segname);
            let vmaddr = segment.vmaddr.wrapping_add(slide);
            layout::checked_span(vmaddr, segment.vmsize, &segname)?;
            segments.push(Segment {
                name: segname.clone(),
                vmaddr,
                vmsize: segment.vmsize,
                fileoff: segment.fileoff,
                filesize: segment.filesize,
                protection: Protection::from_vm_prot(segment.initprot),
            });

            let parsed = segment.sections().map_err(|e| {
                ContainerError::malformed(format!("Bad section table in {}: {}", segname, e))
            })?;
            for (section, _data) in parsed {
                let name = fixed_name(&section.sectname);
                let addr = section.addr.wrapping_add(slide);
                layout::checked_span(addr, section.size, &format!("{},{}", segname, name))?;
                sections.push(Section {
                    segment: segname.clone(),
                    name,
                    addr,
                    size: section.size,
                    offset: section.offset as u64,
                    flags: section.flags,
                    ordinal: sections.len() + 1,
                });
            }
        }

        let mut symbols = Vec::new();
        for entry in macho.symbols() {
            let (name, nlist) = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable symbol: {}", e);
                    continue;
                }
            };
            if nlist.n_type & N_STAB != 0 || name.is_empty() {
                continue;
            }
            let kind = match nlist.n_type & N_TYPE {
                N_UNDF => SymbolKind::Undefined,
                N_ABS => SymbolKind::Absolute,
                N_SECT => {
                    let executable = nlist
                        .n_sect
                        .checked_sub(1)
                        .and_then(|i| sections.get(i))
                        .map(Section::is_executable)
                        .unwrap_or(false);
                    if executable {
                        SymbolKind::Function
                    } else {
                        SymbolKind::Data
                    }
                }
                _ => continue,
            };
            let address = if kind == SymbolKind::Undefined { 0 } else { nlist.n_value.wrapping_add(slide) };
            symbols.push(Symbol {
                name: name.to_string(),
                address,
                kind,
                n_type: nlist.n_type,
                n_sect: nlist.n_sect,
                is_external: nlist.n_type & N_EXT != 0,
            });
        }

        let function_starts = table
            .function_starts
            .clone()
            .and_then(|range| image.get(range))
            .map(|data| {
                layout::decode_function_starts(data, text_vmaddr)
                    .into_iter()
                    .map(|addr| addr.wrapping_add(slide))
                    .collect()
            })
            .unwrap_or_default();

        Ok(ParsedImage { table, slide, segments, sections, symbols, function_starts })
    }

    fn index_symbols(&mut self) {
        for (index, symbol) in self.symbols.iter().enumerate() {
            if !symbol.is_defined() {
                continue;
            }
            let slot = self.symbols_by_address.entry(symbol.address).or_insert(index);
            let current = &self.symbols[*slot];
            if !current.is_external && symbol.is_external {
                *slot = index;
            }
        }
    }

    fn index_strings(&mut self) {
        let mut strings: BTreeMap<u64, StringLiteral> = BTreeMap::new();
        for section in &self.sections {
            if !(section.is_cstring_literals() || STRING_SECTIONS.contains(&section.name.as_str())) {
                continue;
            }
            let Ok(bytes) = self.section_data(section) else {
                continue;
            };
            let mut start = 0;
            for (i, &byte) in bytes.iter().enumerate() {
                if byte != 0 {
                    continue;
                }
                if i > start {
                    if let Some(addr) = section.addr.checked_add(start as u64) {
                        strings.insert(addr, StringLiteral::c_string(&bytes[start..i]));
                    }
                }
                start = i + 1;
            }
        }

        // CFString literals point at their backing C string.
        let cfstrings: Vec<Section> = self.sections.iter().filter(|s| s.name == "__cfstring").cloned().collect();
        for section in &cfstrings {
            let mut record = section.addr;
            loop {
                let (Some(record_end), Some(data_field)) = (record.checked_add(CFSTRING_SIZE), record.checked_add(16))
                else {
                    break;
                };
                if record_end > section.end() {
                    break;
                }
                let target = self
                    .read_u64(Address::new(data_field))
                    .ok()
                    .and_then(|raw| self.resolve_pointer(raw));
                if let Some(text) = target.and_then(|addr| strings.get(&addr)).map(|s| s.text.clone()) {
                    strings.insert(record, StringLiteral::cf_string(text, CFSTRING_SIZE));
                }
                record = record_end;
            }
        }

        self.strings = strings;
    }

    fn index_objc_sections(&mut self) {
        let mut table = ObjCSectionTable::default();
        for (index, section) in self.sections.iter().enumerate() {
            if section.segment.starts_with("__DATA") {
                table.assign(&section.name, index);
            }
        }
        self.objc_sections = table;
    }

    fn image(&self) -> &[u8] {
        self.data.get(self.slice.clone()).unwrap_or(&[])
    }

    pub fn slide(&self) -> i64 {
        self.slide as i64
    }

    pub fn cpu_subtype(&self) -> u32 {
        self.cpu_subtype
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn strings(&self) -> &BTreeMap<u64, StringLiteral> {
        &self.strings
    }

    pub fn function_starts(&self) -> &[u64] {
        &self.function_starts
    }

    pub fn objc_sections(&self) -> &ObjCSectionTable {
        &self.objc_sections
    }

    pub fn executable_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_executable() && !s.is_zerofill())
    }

    pub fn text_base(&self) -> u64 {
        self.segment_named("__TEXT").map(|s| s.vmaddr).unwrap_or(0)
    }

    pub fn segment_named(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn segment_containing(&self, addr: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.vmsize > 0 && s.contains(addr))
    }

    pub fn section_named(&self, segment: &str, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.segment == segment && s.name == name)
    }

    pub fn section_containing(&self, addr: u64) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(addr))
    }

    pub fn section_data(&self, section: &Section) -> ContainerResult<&[u8]> {
        if section.is_zerofill() {
            return Ok(&[]);
        }
        let start = section.offset as usize;
        start
            .checked_add(section.size as usize)
            .and_then(|end| self.image().get(start..end))
            .ok_or(ContainerError::OutOfBounds { offset: section.offset, len: section.size as usize })
    }

    /// Exact-address symbol lookup; external symbols win over local aliases.
    pub fn symbol_at(&self, addr: u64) -> Option<&Symbol> {
        self.symbols_by_address.get(&addr).map(|&i| &self.symbols[i])
    }

    pub fn symbol_named(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name || s.display_name() == name)
    }

    /// Nearest defined symbol at or below `addr`.
    pub fn symbol_before(&self, addr: u64) -> Option<&Symbol> {
        self.symbols_by_address.range(..=addr).next_back().map(|(_, &i)| &self.symbols[i])
    }

    pub fn string_at(&self, addr: u64) -> Option<&str> {
        self.strings.get(&addr).map(|s| s.text.as_str())
    }

    pub fn file_offset_for(&self, addr: u64) -> ContainerResult<u64> {
        self.segments
            .iter()
            .find(|s| s.filesize > 0 && s.maps_file_bytes(addr))
            .and_then(|s| s.fileoff.checked_add(addr - s.vmaddr))
            .ok_or(ContainerError::AddressNotMapped(addr))
    }

    pub fn address_for_file_offset(&self, offset: u64) -> ContainerResult<u64> {
        self.segments
            .iter()
            .find(|s| s.filesize > 0 && offset >= s.fileoff && offset - s.fileoff < s.filesize)
            .and_then(|s| s.vmaddr.checked_add(offset - s.fileoff))
            .ok_or(ContainerError::AddressNotMapped(offset))
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.segments.iter().any(|s| s.filesize > 0 && s.maps_file_bytes(addr))
    }

    /// Turns a pointer stored in the file into a slid address, stripping
    /// chained-fixup tag bits when the raw value is not itself mapped.
    pub fn resolve_pointer(&self, raw: u64) -> Option<u64> {
        if raw == 0 {
            return None;
        }
        let unslid_text = self.text_base().wrapping_sub(self.slide);
        let target = raw & TAGGED_POINTER_MASK;
        [raw, target, unslid_text.wrapping_add(target)]
            .into_iter()
            .map(|candidate| candidate.wrapping_add(self.slide))
            .find(|&addr| self.is_mapped(addr))
    }

    pub fn read_pointer(&self, addr: u64) -> Option<u64> {
        self.read_u64(Address::new(addr)).ok().and_then(|raw| self.resolve_pointer(raw))
    }

    pub fn read_string(&self, addr: u64) -> Option<String> {
        if let Some(s) = self.string_at(addr) {
            return Some(s.to_string());
        }
        self.read_c_string(Address::new(addr), MAX_STRING_LEN).ok()
    }

    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            cpu_subtype: self.cpu_subtype,
            file_type: self.file_type,
            slide: self.slide(),
            segments: self.segments.len(),
            sections: self.sections.len(),
            symbols: self.symbols.len(),
            strings: self.strings.len(),
            function_starts: self.function_starts.len(),
            memory_mapped: self.data.is_mapped(),
        }
    }
}

impl MemoryReader for MachOContainer {
    fn read_bytes(&self, addr: Address, len: usize) -> ContainerResult<&[u8]> {
        let raw = addr.as_u64();
        let segment = self
            .segments
            .iter()
            .find(|s| s.filesize > 0 && s.maps_file_bytes(raw))
            .ok_or(ContainerError::AddressNotMapped(raw))?;
        let within = raw - segment.vmaddr;
        if within.saturating_add(len as u64) > segment.filesize {
            return Err(ContainerError::AddressNotMapped(raw));
        }
        let start = segment.fileoff.saturating_add(within) as usize;
        start
            .checked_add(len)
            .and_then(|end| self.image().get(start..end))
            .ok_or(ContainerError::OutOfBounds { offset: start as u64, len })
    }

    fn base_address(&self) -> Address {
        Address::new(self.text_base())
    }

    fn regions(&self) -> Vec<MemoryRegion> {
        self.sections
            .iter()
            .filter(|s| !s.is_zerofill() && s.size > 0)
            .map(|s| MemoryRegion {
                name: s.qualified_name(),
                start: Address::new(s.addr),
                size: s.size,
                protection: self
                    .segment_containing(s.addr)
                    .map(|seg| seg.protection)
                    .unwrap_or(Protection::READ),
                holds_code: s.is_executable(),
                holds_strings: s.is_cstring_literals() || STRING_SECTIONS.contains(&s.name.as_str()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{put_u64, section_header_offset, MachOBuilder, IMAGE_BASE};
    use crate::container::StringKind;

    const TEXT: u64 = IMAGE_BASE + 0x1000;
    const CSTRING: u64 = IMAGE_BASE + 0x2000;
    const CFSTRING: u64 = IMAGE_BASE + 0x4000;

    fn sample() -> Vec<u8> {
        let mut cfstring = vec![0u8; 32];
        // Tagged rebase pointer whose low bits are the unslid target.
        put_u64(&mut cfstring, 16, 0x8010_0000_0000_0000 | (CSTRING + 6));
        put_u64(&mut cfstring, 24, 5);
        MachOBuilder::new()
            .text(TEXT, &[0xd503201f, 0xd65f03c0, 0xd65f03c0])
            .cstrings(CSTRING, &["hello", "world"])
            .section("__DATA", "__cfstring", CFSTRING, cfstring)
            .symbol("_main", TEXT, true)
            .symbol("_helper", TEXT + 4, false)
            .symbol("_alias", TEXT, false)
            .function_starts(&[TEXT, TEXT + 4])
            .build()
    }

    #[test]
    fn test_parse_and_lookups() {
        let container = MachOContainer::from_bytes(sample()).unwrap();
        assert_eq!(container.text_base(), IMAGE_BASE);
        assert_eq!(container.symbol_at(TEXT).unwrap().name, "_main");
        assert!(container.symbol_at(TEXT + 4).unwrap().is_function());
        assert_eq!(container.symbol_before(TEXT + 8).unwrap().name, "_helper");
        assert_eq!(container.string_at(CSTRING), Some("hello"));
        assert_eq!(container.string_at(CSTRING + 6), Some("world"));
        assert_eq!(container.string_at(CFSTRING), Some("world"));
        assert_eq!(container.section_containing(TEXT + 2).unwrap().name, "__text");
        assert!(container.section_named("__TEXT", "__cstring").is_some());
        assert_eq!(container.function_starts(), &[TEXT, TEXT + 4]);
    }

    #[test]
    fn test_address_translation() {
        let container = MachOContainer::from_bytes(sample()).unwrap();
        assert_eq!(container.file_offset_for(TEXT).unwrap(), 0x1000);
        assert_eq!(container.address_for_file_offset(0x1000).unwrap(), TEXT);
        assert!(matches!(
            container.file_offset_for(0x4000),
            Err(ContainerError::AddressNotMapped(0x4000))
        ));
        assert!(matches!(
            container.address_for_file_offset(0x7fff_ffff),
            Err(ContainerError::AddressNotMapped(_))
        ));
    }

    #[test]
    fn test_base_address_slides_everything() {
        let container = MachOContainer::parse(sample(), Some(0x2_0000_0000)).unwrap();
        let slid = TEXT + 0x1_0000_0000;
        assert_eq!(container.slide(), 0x1_0000_0000);
        assert_eq!(container.symbol_at(slid).unwrap().name, "_main");
        assert_eq!(container.read_u32(Address::new(slid)).unwrap(), 0xd503201f);
        assert_eq!(container.string_at(CFSTRING + 0x1_0000_0000), Some("world"));
        assert_eq!(container.file_offset_for(slid).unwrap(), 0x1000);
    }

    #[test]
    fn test_ranges_past_the_top_of_memory_are_malformed() {
        let mut bytes = sample();
        let header = section_header_offset(&bytes, "__cfstring").unwrap();
        put_u64(&mut bytes, header + 32, 0xffff_ffff_ffff_fff0);
        assert!(matches!(MachOContainer::from_bytes(bytes), Err(ContainerError::MalformedContainer(_))));

        let slid = MachOContainer::parse(sample(), Some(0xffff_ffff_ffff_f000));
        assert!(matches!(slid, Err(ContainerError::MalformedContainer(_))));
    }

    #[test]
    fn test_string_kinds() {
        let container = MachOContainer::from_bytes(sample()).unwrap();
        let hello = &container.strings()[&CSTRING];
        assert_eq!(hello.kind, StringKind::CString);
        assert_eq!(hello.byte_len, 5);
        let record = &container.strings()[&CFSTRING];
        assert_eq!(record.kind, StringKind::CFString);
        assert_eq!(record.suffix_at(0), Some("world"));
        assert_eq!(record.suffix_at(0x10), None);
    }

    #[test]
    fn test_reads_stop_at_segment_end() {
        let container = MachOContainer::from_bytes(sample()).unwrap();
        let text = container.segment_named("__TEXT").unwrap().clone();
        assert!(container.read_bytes(Address::new(text.vmaddr + text.filesize - 4), 4).is_ok());
        assert!(container.read_bytes(Address::new(text.vmaddr + text.filesize - 4), 8).is_err());
    }

    #[test]
    fn test_truncated_buffer_is_malformed() {
        let bytes = sample();
        for len in [0, 3, 31, 64, 0x800, bytes.len() - 1] {
            let result = MachOContainer::from_bytes(bytes[..len].to_vec());
            assert!(
                matches!(result, Err(ContainerError::MalformedContainer(_))),
                "length {} was not rejected",
                len
            );
        }
    }

    #[test]
    fn test_regions_flag_code_and_strings() {
        let container = MachOContainer::from_bytes(sample()).unwrap();
        let regions = container.regions();
        assert!(regions.iter().any(|r| r.holds_code && r.name == "__TEXT,__text"));
        assert!(regions.iter().any(|r| r.holds_strings && r.name == "__TEXT,__cstring"));
        assert!(container.is_executable(Address::new(TEXT)));
        assert!(!container.is_executable(Address::new(CSTRING)));
    }
}
