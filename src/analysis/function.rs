// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::{Instruction, Opcode};
use crate::analysis::context::AnalysisContext;
use crate::analysis::dataflow::{RegisterTracker, TrackedAccess};
use crate::analysis::disasm::LazyDisassembler;
use crate::analysis::error::AnalysisResult;
use crate::config::Config;
use crate::container::{MachOContainer, Section};
use crate::objc::{MethodImplementation, ObjCMetadata};
use crate::utils::logging::ScopedTimer;
use crate::xref::{CrossReference, XrefKind, XrefManager};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Where a function start came from, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FunctionSource {
    Symbol,
    ObjC,
    FunctionStarts,
    Heuristic,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedFunction {
    pub start: u64,
    pub end: u64,
    pub name: Option<String>,
    pub instruction_count: usize,
    pub is_objc_method: bool,
    pub objc_class: Option<String>,
    pub objc_method: Option<String>,
    pub calls_to: Vec<u64>,
    pub called_from: Vec<u64>,
    pub string_refs: Vec<u64>,
    /// No closing return or tail branch was found, or the span was clamped.
    pub low_confidence: bool,
    pub source: FunctionSource,
}

impl DetectedFunction {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
            name: None,
            instruction_count: ((end.saturating_sub(start)) / 4) as usize,
            is_objc_method: false,
            objc_class: None,
            objc_method: None,
            calls_to: Vec::new(),
            called_from: Vec::new(),
            string_refs: Vec::new(),
            low_confidence: false,
            source: FunctionSource::Heuristic,
        }
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("sub_{:x}", self.start),
        }
    }
}

/// Everything the boundary pass produces for one binary.
#[derive(Debug, Clone, Default)]
pub struct FunctionAnalysis {
    pub functions: Vec<DetectedFunction>,
    pub xrefs: XrefManager,
}

struct StartCandidate {
    source: FunctionSource,
    name: Option<String>,
    objc: Option<MethodImplementation>,
}

pub struct FunctionAnalyzer<'a> {
    container: &'a MachOContainer,
    disassembler: &'a LazyDisassembler,
    objc: &'a ObjCMetadata,
    config: &'a Config,
}

impl<'a> FunctionAnalyzer<'a> {
    pub fn new(
        container: &'a MachOContainer,
        disassembler: &'a LazyDisassembler,
        objc: &'a ObjCMetadata,
        config: &'a Config,
    ) -> Self {
        Self { container, disassembler, objc, config }
    }

    pub fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult<FunctionAnalysis> {
        let _timer = ScopedTimer::new("function analysis");

        let mut functions = self.detect_functions(ctx)?;
        let scanned = self.scan_all(&functions, ctx)?;

        let mut xrefs = XrefManager::new();
        let index_by_start: HashMap<u64, usize> = functions.iter().enumerate().map(|(i, f)| (f.start, i)).collect();
        let mut incoming: Vec<(usize, u64)> = Vec::new();

        for (i, refs) in scanned.into_iter().enumerate() {
            let function = &mut functions[i];
            for xref in refs {
                match xref.kind {
                    XrefKind::Call => {
                        if !function.calls_to.contains(&xref.to) {
                            function.calls_to.push(xref.to);
                        }
                        if let Some(&callee) = index_by_start.get(&xref.to) {
                            incoming.push((callee, function.start));
                        }
                    }
                    XrefKind::StringRef if !function.string_refs.contains(&xref.to) => {
                        function.string_refs.push(xref.to);
                    }
                    _ => {}
                }
                xrefs.add(xref);
            }
        }

        for (callee, caller) in incoming {
            let called_from = &mut functions[callee].called_from;
            if !called_from.contains(&caller) {
                called_from.push(caller);
            }
        }

        log::info!("Detected {} functions, {} cross-references", functions.len(), xrefs.len());
        Ok(FunctionAnalysis { functions, xrefs })
    }

    /// Boundary pass: authoritative starts first, heuristic starts only in
    /// the gaps those leave, each function running to the next start.
    pub fn detect_functions(&self, ctx: &AnalysisContext) -> AnalysisResult<Vec<DetectedFunction>> {
        let sections: Vec<&Section> = self.container.executable_sections().collect();
        let mut candidates = self.authoritative_starts(&sections);

        if self.config.heuristic_functions {
            let accepted = self.heuristic_starts(&sections, &candidates);
            log::debug!("Accepted {} heuristic function starts", accepted.len());
            for start in accepted {
                candidates.insert(start, StartCandidate { source: FunctionSource::Heuristic, name: None, objc: None });
            }
        }

        let starts: Vec<u64> = candidates.keys().copied().collect();
        let mut functions = Vec::with_capacity(starts.len());

        for (i, &start) in starts.iter().enumerate() {
            ctx.checkpoint()?;
            let Some(section) = sections.iter().find(|s| s.contains(start)) else { continue };
            let next = starts.get(i + 1).copied().filter(|&n| n < section.end()).unwrap_or(section.end());
            let limit = start.saturating_add(self.config.max_function_size);
            let end = next.min(limit);

            let mut function = DetectedFunction::new(start, end);
            if let Some(candidate) = candidates.remove(&start) {
                function.source = candidate.source;
                function.name = candidate.name;
                if let Some(imp) = candidate.objc {
                    function.is_objc_method = true;
                    if function.name.is_none() {
                        function.name = Some(imp.display_name());
                    }
                    function.objc_class = Some(imp.class_name);
                    function.objc_method = Some(imp.method.selector);
                }
            }

            let instructions = self.disassembler.disassemble_range(start, end)?;
            function.instruction_count = instructions.len();
            function.low_confidence = end < next || closing_end(&instructions, start, end).is_none();
            if function.low_confidence {
                log::warn!("Low-confidence boundary for {} at 0x{:x}", function.display_name(), start);
            }

            functions.push(function);
            ctx.report(i + 1, starts.len());
        }

        Ok(functions)
    }

    fn authoritative_starts(&self, sections: &[&Section]) -> BTreeMap<u64, StartCandidate> {
        let in_code = |addr: u64| sections.iter().any(|s| s.contains(addr));
        let mut candidates: BTreeMap<u64, StartCandidate> = BTreeMap::new();

        for &start in self.container.function_starts().iter().filter(|&&a| in_code(a)) {
            candidates.insert(start, StartCandidate { source: FunctionSource::FunctionStarts, name: None, objc: None });
        }

        for imp in self.objc.implementations().into_iter().filter(|m| in_code(m.method.implementation)) {
            let entry = candidates.entry(imp.method.implementation).or_insert(StartCandidate {
                source: FunctionSource::ObjC,
                name: None,
                objc: None,
            });
            entry.source = entry.source.min(FunctionSource::ObjC);
            if entry.objc.is_none() {
                entry.objc = Some(imp);
            }
        }

        for symbol in self.container.symbols().iter().filter(|s| s.is_function() && in_code(s.address)) {
            let entry = candidates.entry(symbol.address).or_insert(StartCandidate {
                source: FunctionSource::Symbol,
                name: None,
                objc: None,
            });
            entry.source = FunctionSource::Symbol;
            if entry.name.is_none() {
                entry.name = Some(symbol.display_name().to_string());
            }
        }

        log::debug!("Found {} authoritative function starts", candidates.len());
        candidates
    }

    /// Prologue-scan hits that do not fall inside the body of an
    /// authoritative function. A body ends at its closing return or tail
    /// branch; whatever follows up to the next start is a gap.
    fn heuristic_starts(&self, sections: &[&Section], known: &BTreeMap<u64, StartCandidate>) -> Vec<u64> {
        let starts: Vec<u64> = known.keys().copied().collect();
        let body_end = |addr: u64| -> Option<u64> {
            let idx = starts.partition_point(|&s| s <= addr).checked_sub(1)?;
            let start = starts[idx];
            let section = sections.iter().find(|s| s.contains(start))?;
            let next = starts.get(idx + 1).copied().unwrap_or(section.end()).min(section.end());
            let instructions = self.disassembler.disassemble_range(start, next).ok()?;
            Some(closing_end(&instructions, start, next).unwrap_or(next))
        };

        self.disassembler
            .find_function_starts()
            .into_iter()
            .filter(|start| sections.iter().any(|s| s.contains(*start)) && !known.contains_key(start))
            .filter(|&start| body_end(start).map_or(true, |end| start >= end))
            .collect()
    }

    fn scan_all(&self, functions: &[DetectedFunction], ctx: &AnalysisContext) -> AnalysisResult<Vec<Vec<CrossReference>>> {
        let total = functions.len();
        let done = AtomicUsize::new(0);
        let work = |function: &DetectedFunction| -> AnalysisResult<Vec<CrossReference>> {
            ctx.checkpoint()?;
            let refs = self.scan_function(function)?;
            ctx.report(done.fetch_add(1, Ordering::Relaxed) + 1, total);
            Ok(refs)
        };

        if !self.config.parallel {
            return functions.iter().map(work).collect();
        }

        match rayon::ThreadPoolBuilder::new().num_threads(self.config.max_threads).build() {
            Ok(pool) => pool.install(|| functions.par_iter().map(work).collect()),
            Err(e) => {
                log::warn!("Falling back to the global thread pool: {}", e);
                functions.par_iter().map(work).collect()
            }
        }
    }

    /// Every reference one function makes, in instruction order.
    pub fn scan_function(&self, function: &DetectedFunction) -> AnalysisResult<Vec<CrossReference>> {
        let instructions = self.disassembler.disassemble_function(function)?;
        let name = function.display_name();
        let mut tracker = RegisterTracker::new();
        let mut refs = Vec::new();

        for instr in instructions.iter() {
            let mut push = |to: u64, kind: XrefKind| {
                refs.push(
                    CrossReference::new(instr.address, to, kind)
                        .with_instruction(instr.text())
                        .within_function(name.clone(), function.start),
                );
            };

            if let Some(target) = instr.branch_target() {
                push(target, if instr.is_call() { XrefKind::Call } else { XrefKind::Jump });
            } else if instr.opcode == Opcode::BLR {
                if let Some(target) = instr.register_operand(0).and_then(|r| tracker.value(r)) {
                    push(target, XrefKind::Call);
                }
            }

            match tracker.step(instr) {
                Some(TrackedAccess::Computed(addr)) => {
                    if let Some(kind) = self.classify_computed(addr) {
                        push(addr, kind);
                    }
                }
                Some(TrackedAccess::Load(addr)) if self.container.is_mapped(addr) => {
                    let kind = if self.container.string_at(addr).is_some() { XrefKind::StringRef } else { XrefKind::DataRead };
                    push(addr, kind);
                }
                Some(TrackedAccess::Store(addr)) if self.container.is_mapped(addr) => push(addr, XrefKind::DataWrite),
                _ => {}
            }
        }

        Ok(refs)
    }

    fn classify_computed(&self, addr: u64) -> Option<XrefKind> {
        if self.container.string_at(addr).is_some() {
            return Some(XrefKind::StringRef);
        }
        let section = self.container.section_containing(addr)?;
        Some(if section.is_executable() { XrefKind::CodeRef } else { XrefKind::DataRead })
    }
}

/// Address just past the instruction that closes a function body: the
/// first return or unconditional branch not jumped over by an earlier
/// forward branch.
pub fn closing_end(instructions: &[Instruction], start: u64, end: u64) -> Option<u64> {
    let mut furthest = start;
    for instr in instructions {
        if let Some(target) = instr.branch_target() {
            if !instr.is_call() && target > instr.address && target < end {
                furthest = furthest.max(target);
            }
        }
        if instr.is_terminal() && instr.address >= furthest {
            return Some(instr.address + 4);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{MachOBuilder, IMAGE_BASE};
    use crate::container::MemoryReader;
    use std::sync::Arc;

    const TEXT: u64 = IMAGE_BASE + 0x1000;
    const CSTRING: u64 = IMAGE_BASE + 0x2000;

    fn code() -> Vec<u32> {
        vec![
            // _main @ 0x1000
            0xa9bf7bfd, // stp x29, x30, [sp, #-0x10]!
            0x910003fd, // mov x29, sp
            0xb0000000, // adrp x0, #0x1000
            0x91000000, // add x0, x0, #0
            0x94000004, // bl 0x1020
            0xa8c17bfd, // ldp x29, x30, [sp], #0x10
            0xd65f03c0, // ret
            0xd503201f, // nop
            // helper, no symbol @ 0x1020
            0xa9bf7bfd, // stp x29, x30, [sp, #-0x10]!
            0xb4000040, // cbz x0, +8
            0x94000002, // bl 0x1030
            0xa8c17bfd, // ldp x29, x30, [sp], #0x10
            // _leaf @ 0x1030
            0xd65f03c0, // ret
        ]
    }

    fn container() -> Arc<MachOContainer> {
        let bytes = MachOBuilder::new()
            .text(TEXT, &code())
            .cstrings(CSTRING, &["hello"])
            .symbol("_main", TEXT, true)
            .symbol("_leaf", TEXT + 0x30, true)
            .build();
        Arc::new(MachOContainer::from_bytes(bytes).unwrap())
    }

    fn analyze(container: &Arc<MachOContainer>, config: &Config) -> FunctionAnalysis {
        let reader: Arc<dyn MemoryReader> = container.clone();
        let disasm = LazyDisassembler::new(reader, 64);
        let objc = ObjCMetadata::default();
        FunctionAnalyzer::new(container, &disasm, &objc, config).analyze(&AnalysisContext::new()).unwrap()
    }

    #[test]
    fn test_symbols_and_gap_heuristic() {
        let container = container();
        let result = analyze(&container, &Config::default().with_parallel(false));
        let starts: Vec<u64> = result.functions.iter().map(|f| f.start).collect();
        assert_eq!(starts, vec![TEXT, TEXT + 0x20, TEXT + 0x30]);

        let main = &result.functions[0];
        assert_eq!(main.name.as_deref(), Some("main"));
        assert_eq!(main.end, TEXT + 0x20);
        assert_eq!(main.instruction_count, 8);
        assert_eq!(main.source, FunctionSource::Symbol);
        assert!(!main.low_confidence);

        let helper = &result.functions[1];
        assert_eq!(helper.display_name(), format!("sub_{:x}", TEXT + 0x20));
        assert_eq!(helper.source, FunctionSource::Heuristic);
        assert!(helper.low_confidence);
    }

    #[test]
    fn test_call_graph_and_string_refs() {
        let container = container();
        let result = analyze(&container, &Config::default());
        let main = &result.functions[0];
        assert_eq!(main.calls_to, vec![TEXT + 0x20]);
        assert_eq!(main.string_refs, vec![CSTRING]);
        assert_eq!(result.functions[1].called_from, vec![TEXT]);
        assert_eq!(result.functions[2].called_from, vec![TEXT + 0x20]);

        let to_string = result.xrefs.xrefs_to(CSTRING);
        assert_eq!(to_string.len(), 1);
        assert_eq!(to_string[0].kind, XrefKind::StringRef);
        assert_eq!(to_string[0].from, TEXT + 0xc);
        assert_eq!(to_string[0].display_name(), "main+0xc");

        let jumps: Vec<_> = result.xrefs.xrefs_of_kind(XrefKind::Jump).collect();
        assert_eq!(jumps.len(), 1);
        assert_eq!(jumps[0].to, TEXT + 0x2c);
    }

    #[test]
    fn test_heuristics_disabled_and_cancellation() {
        let container = container();
        let result = analyze(&container, &Config::default().with_heuristic_functions(false));
        assert_eq!(result.functions.len(), 2);
        assert_eq!(result.functions[0].end, TEXT + 0x30);

        let reader: Arc<dyn MemoryReader> = container.clone();
        let disasm = LazyDisassembler::new(reader, 64);
        let objc = ObjCMetadata::default();
        let config = Config::default();
        let ctx = AnalysisContext::new();
        ctx.cancel();
        let err = FunctionAnalyzer::new(&container, &disasm, &objc, &config).analyze(&ctx);
        assert!(matches!(err, Err(crate::analysis::error::AnalysisError::Cancelled)));
    }

    #[test]
    fn test_closing_end_skips_forward_branches() {
        let instrs = crate::analysis::arm64::decode_all(
            &crate::container::testing::words_to_bytes(&[0xb4000040, 0xd65f03c0, 0xd65f03c0, 0xd503201f]),
            0x1000,
        );
        assert_eq!(closing_end(&instrs, 0x1000, 0x1010), Some(0x100c));
        assert_eq!(closing_end(&instrs[..1], 0x1000, 0x1004), None);
    }
}
