// Tue Jan 13 2026 - Alex

use crate::container::{MachOContainer, StringLiteral};
use std::collections::BTreeMap;

/// Address-indexed literals used to substitute quoted text for pointers.
#[derive(Debug, Clone, Default)]
pub struct StringMap {
    strings: BTreeMap<u64, StringLiteral>,
}

impl StringMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_container(container: &MachOContainer) -> Self {
        Self { strings: container.strings().clone() }
    }

    /// Adds a C string literal at `address`.
    pub fn insert(&mut self, address: u64, text: impl Into<String>) {
        self.insert_literal(address, StringLiteral::c_string(text.into().as_bytes()));
    }

    pub fn insert_literal(&mut self, address: u64, literal: StringLiteral) {
        self.strings.insert(address, literal);
    }

    pub fn get(&self, address: u64) -> Option<&str> {
        self.strings.get(&address).map(|s| s.text.as_str())
    }

    /// Literal covering `address`, sliced from that point, so pointers
    /// into the middle of a C string still resolve. Offsets count bytes
    /// of the literal as stored; CFString records only match at their start.
    pub fn containing(&self, address: u64) -> Option<&str> {
        let (&start, literal) = self.strings.range(..=address).next_back()?;
        literal.suffix_at(address - start)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interior_pointers_resolve() {
        let mut map = StringMap::new();
        map.insert(0x100, "hello world");
        map.insert(0x200, "bye");

        assert_eq!(map.get(0x100), Some("hello world"));
        assert_eq!(map.get(0x106), None);
        assert_eq!(map.containing(0x106), Some("world"));
        assert_eq!(map.containing(0x10b), None);
        assert_eq!(map.containing(0x50), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_cfstring_records_only_match_at_their_start() {
        let mut map = StringMap::new();
        map.insert_literal(0x300, StringLiteral::cf_string("a rather long backing string".into(), 32));

        assert_eq!(map.containing(0x300), Some("a rather long backing string"));
        assert_eq!(map.containing(0x310), None);
        assert_eq!(map.containing(0x31f), None);
    }

    #[test]
    fn test_offsets_follow_stored_bytes() {
        let mut map = StringMap::new();
        // "caf\u{e9}!" is six bytes; 0x404 is inside the two-byte character.
        map.insert(0x400, "caf\u{e9}!");
        map.insert_literal(0x500, StringLiteral::c_string(b"ab\xffcd"));

        assert_eq!(map.containing(0x403), Some("\u{e9}!"));
        assert_eq!(map.containing(0x404), None);
        assert_eq!(map.containing(0x405), Some("!"));
        assert_eq!(map.get(0x500), Some("ab\u{fffd}cd"));
        assert_eq!(map.containing(0x503), None);
    }
}
