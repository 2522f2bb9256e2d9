// Wed Jan 15 2026 - Alex

use crate::xref::{CrossReference, NavigationHistory, XrefKind};
use ahash::{AHashMap, AHashSet};
use serde::Serialize;

/// Bidirectional index of cross references. References live in one arena;
/// both directions hold indices into it and are updated together.
#[derive(Debug, Clone, Default)]
pub struct XrefManager {
    xrefs: Vec<CrossReference>,
    outgoing: AHashMap<u64, Vec<usize>>,
    incoming: AHashMap<u64, Vec<usize>>,
    seen: AHashSet<(u64, u64, XrefKind)>,
    history: NavigationHistory,
}

impl XrefManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `xref` into both indexes. Returns false for a duplicate
    /// `(from, to, kind)` triple.
    pub fn add(&mut self, xref: CrossReference) -> bool {
        if !self.seen.insert((xref.from, xref.to, xref.kind)) {
            return false;
        }
        let index = self.xrefs.len();
        self.outgoing.entry(xref.from).or_default().push(index);
        self.incoming.entry(xref.to).or_default().push(index);
        self.xrefs.push(xref);
        true
    }

    pub fn add_xref(&mut self, from: u64, to: u64, kind: XrefKind) -> bool {
        self.add(CrossReference::new(from, to, kind))
    }

    pub fn extend<I: IntoIterator<Item = CrossReference>>(&mut self, xrefs: I) -> usize {
        let mut added = 0;
        for xref in xrefs {
            if self.add(xref) {
                added += 1;
            }
        }
        added
    }

    pub fn xrefs_to(&self, addr: u64) -> Vec<&CrossReference> {
        self.collect(self.incoming.get(&addr))
    }

    pub fn xrefs_from(&self, addr: u64) -> Vec<&CrossReference> {
        self.collect(self.outgoing.get(&addr))
    }

    /// References whose source lies in `[start, end)`.
    pub fn xrefs_from_range(&self, start: u64, end: u64) -> Vec<&CrossReference> {
        let mut found: Vec<&CrossReference> = self.xrefs.iter().filter(|x| x.from >= start && x.from < end).collect();
        found.sort_by_key(|x| (x.from, x.to));
        found
    }

    fn collect(&self, indices: Option<&Vec<usize>>) -> Vec<&CrossReference> {
        indices
            .map(|indices| indices.iter().filter_map(|&i| self.xrefs.get(i)).collect())
            .unwrap_or_default()
    }

    pub fn xrefs_of_kind(&self, kind: XrefKind) -> impl Iterator<Item = &CrossReference> {
        self.xrefs.iter().filter(move |x| x.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CrossReference> {
        self.xrefs.iter()
    }

    pub fn len(&self) -> usize {
        self.xrefs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xrefs.is_empty()
    }

    pub fn clear(&mut self) {
        self.xrefs.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.seen.clear();
    }

    pub fn stats(&self) -> XrefStats {
        let mut stats = XrefStats { total: self.xrefs.len(), ..XrefStats::default() };
        for xref in &self.xrefs {
            match xref.kind {
                XrefKind::Call => stats.calls += 1,
                XrefKind::Jump => stats.jumps += 1,
                XrefKind::DataRead => stats.data_reads += 1,
                XrefKind::DataWrite => stats.data_writes += 1,
                XrefKind::StringRef => stats.string_refs += 1,
                XrefKind::CodeRef => stats.code_refs += 1,
            }
        }
        stats.targets = self.incoming.len();
        stats
    }

    pub fn history(&self) -> &NavigationHistory {
        &self.history
    }

    pub fn navigate_to(&mut self, addr: u64) {
        self.history.navigate_to(addr);
    }

    pub fn go_back(&mut self) -> Option<u64> {
        self.history.go_back()
    }

    pub fn go_forward(&mut self) -> Option<u64> {
        self.history.go_forward()
    }

    pub fn can_go_back(&self) -> bool {
        self.history.can_go_back()
    }

    pub fn can_go_forward(&self) -> bool {
        self.history.can_go_forward()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct XrefStats {
    pub total: usize,
    pub targets: usize,
    pub calls: usize,
    pub jumps: usize,
    pub data_reads: usize,
    pub data_writes: usize,
    pub string_refs: usize,
    pub code_refs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_insert_is_visible_in_both_directions() {
        let mut manager = XrefManager::new();
        let pairs = [
            (0x1000, 0x2000, XrefKind::Call),
            (0x1004, 0x2000, XrefKind::Call),
            (0x1008, 0x3000, XrefKind::StringRef),
            (0x1008, 0x1010, XrefKind::Jump),
            (0x100c, 0x4000, XrefKind::DataWrite),
        ];
        for &(from, to, kind) in &pairs {
            assert!(manager.add_xref(from, to, kind));
        }
        for &(from, to, kind) in &pairs {
            assert!(manager.xrefs_from(from).iter().any(|x| x.to == to && x.kind == kind));
            assert!(manager.xrefs_to(to).iter().any(|x| x.from == from && x.kind == kind));
        }
        assert_eq!(manager.xrefs_to(0x2000).len(), 2);
        assert_eq!(manager.xrefs_from(0x1008).len(), 2);
        assert!(manager.xrefs_to(0x9999).is_empty());
    }

    #[test]
    fn test_duplicates_are_ignored_and_stats_count_kinds() {
        let mut manager = XrefManager::new();
        assert!(manager.add_xref(0x10, 0x20, XrefKind::Call));
        assert!(!manager.add_xref(0x10, 0x20, XrefKind::Call));
        assert!(manager.add_xref(0x10, 0x20, XrefKind::CodeRef));
        manager.add_xref(0x14, 0x30, XrefKind::DataRead);

        let stats = manager.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.code_refs, 1);
        assert_eq!(stats.data_reads, 1);
        assert_eq!(stats.targets, 2);
        assert_eq!(manager.xrefs_of_kind(XrefKind::Call).count(), 1);
        assert_eq!(manager.xrefs_from_range(0x10, 0x14).len(), 2);
    }

    #[test]
    fn test_display_name_uses_function_offset() {
        let xref = CrossReference::new(0x1010, 0x2000, XrefKind::Call)
            .within_function("_main", 0x1000)
            .with_instruction("bl 0x2000");
        assert_eq!(xref.display_name(), "_main+0x10");
        assert_eq!(xref.to_string(), "_main+0x10 -> 0x2000 [call]  bl 0x2000");
        assert_eq!(CrossReference::new(0x10, 0x20, XrefKind::Jump).display_name(), "0x10");
    }

    #[test]
    fn test_navigation_through_manager() {
        let mut manager = XrefManager::new();
        manager.navigate_to(0x1000);
        manager.navigate_to(0x2000);
        assert_eq!(manager.go_back(), Some(0x1000));
        manager.navigate_to(0x3000);
        assert!(!manager.can_go_forward());
        assert!(manager.can_go_back());
    }
}
