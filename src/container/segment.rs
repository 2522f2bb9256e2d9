// Tue Jan 13 2026 - Alex

use crate::container::layout::is_zerofill;
use crate::container::Protection;
use serde::Serialize;

const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;
const S_CSTRING_LITERALS: u32 = 0x2;

#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub protection: Protection,
}

impl Segment {
    pub fn end(&self) -> u64 {
        self.vmaddr.saturating_add(self.vmsize)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.vmaddr && addr < self.end()
    }

    /// True when `addr` is backed by file bytes rather than zero fill.
    pub fn maps_file_bytes(&self, addr: u64) -> bool {
        addr >= self.vmaddr && addr - self.vmaddr < self.filesize
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub segment: String,
    pub name: String,
    pub addr: u64,
    pub size: u64,
    /// File offset relative to the selected architecture slice.
    pub offset: u64,
    pub flags: u32,
    /// One-based ordinal, as referenced by `n_sect`.
    pub ordinal: usize,
}

impl Section {
    pub fn end(&self) -> u64 {
        self.addr.saturating_add(self.size)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.end()
    }

    pub fn is_executable(&self) -> bool {
        self.flags & (S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS) != 0
            || (self.segment == "__TEXT" && self.name == "__text")
    }

    pub fn is_zerofill(&self) -> bool {
        is_zerofill(self.flags)
    }

    pub fn is_cstring_literals(&self) -> bool {
        self.flags & 0xff == S_CSTRING_LITERALS
    }

    pub fn qualified_name(&self) -> String {
        format!("{},{}", self.segment, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    Function,
    Data,
    Undefined,
    Absolute,
}

#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub kind: SymbolKind,
    pub n_type: u8,
    pub n_sect: usize,
    pub is_external: bool,
}

impl Symbol {
    pub fn is_function(&self) -> bool {
        self.kind == SymbolKind::Function
    }

    pub fn is_defined(&self) -> bool {
        self.kind != SymbolKind::Undefined
    }

    /// Drops the leading underscore C symbols carry in Mach-O.
    pub fn display_name(&self) -> &str {
        self.name.strip_prefix('_').filter(|s| !s.is_empty()).unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StringKind {
    /// NUL-terminated bytes in a literal section.
    CString,
    /// A `__cfstring` record whose text lives elsewhere.
    CFString,
}

/// A literal indexed at the address a pointer would hold.
#[derive(Debug, Clone, Serialize)]
pub struct StringLiteral {
    pub text: String,
    pub kind: StringKind,
    /// Bytes the literal occupies at its own address.
    pub byte_len: u64,
    /// Set when invalid UTF-8 was replaced, so byte offsets no longer map onto `text`.
    pub lossy: bool,
}

impl StringLiteral {
    pub fn c_string(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let lossy = matches!(text, std::borrow::Cow::Owned(_));
        Self { text: text.into_owned(), kind: StringKind::CString, byte_len: raw.len() as u64, lossy }
    }

    pub fn cf_string(text: String, record_size: u64) -> Self {
        Self { text, kind: StringKind::CFString, byte_len: record_size, lossy: false }
    }

    /// Text a pointer `offset` bytes into this literal refers to.
    pub fn suffix_at(&self, offset: u64) -> Option<&str> {
        if offset == 0 {
            return Some(&self.text);
        }
        if self.kind != StringKind::CString || self.lossy || offset >= self.byte_len {
            return None;
        }
        self.text.get(usize::try_from(offset).ok()?..)
    }
}
