// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::Instruction;
use crate::analysis::cfg::{CfgBuilder, ControlFlowGraph};
use crate::analysis::context::AnalysisContext;
use crate::analysis::disasm::{CacheStats, LazyDisassembler};
use crate::analysis::error::{AnalysisError, AnalysisResult};
use crate::analysis::function::{DetectedFunction, FunctionAnalysis, FunctionAnalyzer};
use crate::analysis::stack::StackFrameTracker;
use crate::config::Config;
use crate::container::{ContainerSummary, MachOContainer, MemoryReader};
use crate::decompiler::{PseudoCodeGenerator, StringMap};
use crate::objc::{ObjCAnalyzer, ObjCMetadata};
use crate::symbol::{ResolvedAddress, SymbolResolver};
use crate::xref::{CrossReference, XrefManager, XrefStats};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub container: ContainerSummary,
    pub functions: usize,
    pub low_confidence_functions: usize,
    pub objc_classes: usize,
    pub objc_methods: usize,
    pub strings: usize,
    pub xrefs: XrefStats,
    pub cache: CacheStats,
}

/// One binary under analysis: the parsed container plus every table
/// derived from it. Each session owns its own disassembly cache.
pub struct AnalysisSession {
    container: Arc<MachOContainer>,
    disassembler: LazyDisassembler,
    objc: Arc<ObjCMetadata>,
    resolver: SymbolResolver,
    strings: StringMap,
    analysis: FunctionAnalysis,
    analyzed: bool,
    config: Config,
}

impl AnalysisSession {
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> AnalysisResult<Self> {
        let container = MachOContainer::load(path, config.base_address, config.use_mmap)?;
        Ok(Self::new(container, config))
    }

    /// Wraps a parsed container and recovers its Objective-C metadata.
    pub fn new(container: MachOContainer, config: Config) -> Self {
        let container = Arc::new(container);
        let objc = Arc::new(ObjCAnalyzer::new(&container).analyze());
        let reader: Arc<dyn MemoryReader> = container.clone();
        let disassembler = LazyDisassembler::new(reader, config.cache_capacity);
        let resolver = SymbolResolver::new(container.clone(), objc.clone());
        let strings = StringMap::from_container(&container);

        log::debug!(
            "Session ready: {} sections, {} symbols, {} ObjC classes",
            container.sections().len(),
            container.symbols().len(),
            objc.classes.len()
        );

        Self {
            container,
            disassembler,
            objc,
            resolver,
            strings,
            analysis: FunctionAnalysis::default(),
            analyzed: false,
            config,
        }
    }

    /// Detects functions and cross-references. Running it again replaces
    /// the previous results; a cancelled run leaves them untouched.
    pub fn analyze(&mut self, ctx: &AnalysisContext) -> AnalysisResult<&FunctionAnalysis> {
        let mut analysis =
            FunctionAnalyzer::new(&self.container, &self.disassembler, &self.objc, &self.config).analyze(ctx)?;
        analysis.functions.sort_by_key(|f| f.start);

        if self.resolver.has_functions() {
            self.resolver = SymbolResolver::new(self.container.clone(), self.objc.clone());
        }
        self.resolver.set_functions(&analysis.functions);
        self.analysis = analysis;
        self.analyzed = true;
        Ok(&self.analysis)
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed
    }

    pub fn container(&self) -> &MachOContainer {
        &self.container
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn objc(&self) -> &ObjCMetadata {
        &self.objc
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    pub fn strings(&self) -> &StringMap {
        &self.strings
    }

    pub fn disassembler(&self) -> &LazyDisassembler {
        &self.disassembler
    }

    pub fn functions(&self) -> &[DetectedFunction] {
        &self.analysis.functions
    }

    pub fn xrefs(&self) -> &XrefManager {
        &self.analysis.xrefs
    }

    /// Mutable index access for navigation history.
    pub fn xrefs_mut(&mut self) -> &mut XrefManager {
        &mut self.analysis.xrefs
    }

    /// Function whose span covers `addr`.
    pub fn function_at(&self, addr: u64) -> Option<&DetectedFunction> {
        let functions = &self.analysis.functions;
        let idx = functions.partition_point(|f| f.start <= addr).checked_sub(1)?;
        functions.get(idx).filter(|f| f.contains(addr))
    }

    pub fn function_named(&self, name: &str) -> Option<&DetectedFunction> {
        let bare = name.strip_prefix('_').unwrap_or(name);
        self.analysis
            .functions
            .iter()
            .find(|f| f.name.as_deref().map_or(false, |n| n == name || n == bare) || f.display_name() == name)
    }

    pub fn xrefs_to(&self, addr: u64) -> Vec<&CrossReference> {
        self.analysis.xrefs.xrefs_to(addr)
    }

    pub fn xrefs_from(&self, addr: u64) -> Vec<&CrossReference> {
        self.analysis.xrefs.xrefs_from(addr)
    }

    pub fn symbol_at(&self, addr: u64) -> ResolvedAddress {
        self.resolver.resolve_address(addr)
    }

    fn require_function(&self, addr: u64) -> AnalysisResult<&DetectedFunction> {
        self.function_at(addr).ok_or(AnalysisError::FunctionNotFound(addr))
    }

    pub fn disassemble_function(&self, addr: u64) -> AnalysisResult<Arc<[Instruction]>> {
        let function = self.require_function(addr)?;
        Ok(self.disassembler.disassemble_function(function)?)
    }

    pub fn cfg_for(&self, addr: u64) -> AnalysisResult<ControlFlowGraph> {
        let function = self.require_function(addr)?;
        let instructions = self.disassembler.disassemble_function(function)?;
        Ok(CfgBuilder::build(function.display_name(), &instructions))
    }

    pub fn stack_frame_for(&self, addr: u64) -> AnalysisResult<StackFrameTracker> {
        let instructions = self.disassemble_function(addr)?;
        Ok(StackFrameTracker::analyze(&instructions))
    }

    pub fn pseudo_code_for(&self, addr: u64) -> AnalysisResult<String> {
        let function = self.require_function(addr)?;
        let instructions = self.disassembler.disassemble_function(function)?;
        Ok(PseudoCodeGenerator::new(&self.resolver, &self.strings).generate_function(function, &instructions))
    }

    pub fn pseudo_code_for_range(&self, start: u64, end: u64) -> AnalysisResult<String> {
        let instructions = self.disassembler.disassemble_range(start, end)?;
        Ok(PseudoCodeGenerator::new(&self.resolver, &self.strings).pseudo_code_for_range(&instructions))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.disassembler.cache_stats()
    }

    /// Drops cache entries idle for longer than the configured age.
    pub fn evict_stale(&self) -> usize {
        self.disassembler.evict_stale(self.config.stale_after())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            container: self.container.summary(),
            functions: self.analysis.functions.len(),
            low_confidence_functions: self.analysis.functions.iter().filter(|f| f.low_confidence).count(),
            objc_classes: self.objc.classes.len(),
            objc_methods: self.objc.method_count(),
            strings: self.strings.len(),
            xrefs: self.analysis.xrefs.stats(),
            cache: self.cache_stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{MachOBuilder, IMAGE_BASE};
    use crate::xref::XrefKind;

    const TEXT: u64 = IMAGE_BASE + 0x1000;
    const CSTRING: u64 = IMAGE_BASE + 0x2000;

    fn session() -> AnalysisSession {
        let code = [
            0xa9bf7bfd, // stp x29, x30, [sp, #-0x10]!
            0x910003fd, // mov x29, sp
            0xb0000000, // adrp x0, CSTRING page
            0x91000000, // add x0, x0, #0
            0x94000004, // bl 0x1020
            0xa8c17bfd, // ldp x29, x30, [sp], #0x10
            0xd65f03c0, // ret
            0xd503201f, // nop
            0xd65f03c0, // _puts: ret
        ];
        let bytes = MachOBuilder::new()
            .text(TEXT, &code)
            .cstrings(CSTRING, &["hello"])
            .symbol("_main", TEXT, true)
            .symbol("_puts", TEXT + 0x20, true)
            .build();
        let container = MachOContainer::from_bytes(bytes).unwrap();
        AnalysisSession::new(container, Config::default().with_parallel(false).with_cache_capacity(16))
    }

    #[test]
    fn test_point_queries_after_analysis() {
        let mut session = session();
        assert!(!session.is_analyzed());
        assert!(session.function_at(TEXT).is_none());

        session.analyze(&AnalysisContext::new()).unwrap();
        assert!(session.is_analyzed());
        assert_eq!(session.functions().len(), 2);
        assert_eq!(session.function_at(TEXT + 0x8).unwrap().display_name(), "main");
        assert_eq!(session.function_named("_puts").unwrap().start, TEXT + 0x20);

        let incoming = session.xrefs_to(TEXT + 0x20);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].kind, XrefKind::Call);
        assert_eq!(session.xrefs_from(TEXT + 0x10).len(), 1);
        assert_eq!(session.symbol_at(TEXT + 0x20).name, "puts");
        assert_eq!(session.summary().functions, 2);
    }

    #[test]
    fn test_pseudo_code_and_cfg() {
        let mut session = session();
        session.analyze(&AnalysisContext::new()).unwrap();

        let code = session.pseudo_code_for(TEXT).unwrap();
        assert!(code.contains("x0 = \"hello\";"), "{}", code);
        assert!(code.contains("puts(x0);"), "{}", code);

        let cfg = session.cfg_for(TEXT).unwrap();
        assert_eq!(cfg.function_name, "main");
        assert_eq!(cfg.len(), 2);

        assert!(session.stack_frame_for(TEXT).unwrap().has_fp());
    }

    #[test]
    fn test_missing_function_and_cache_reuse() {
        let mut session = session();
        session.analyze(&AnalysisContext::new()).unwrap();

        assert!(matches!(session.pseudo_code_for(0x42), Err(AnalysisError::FunctionNotFound(0x42))));

        let first = session.disassemble_function(TEXT).unwrap();
        let before = session.cache_stats();
        let second = session.disassemble_function(TEXT).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(session.cache_stats().hits, before.hits + 1);
    }

    #[test]
    fn test_cancelled_analysis_keeps_previous_state() {
        let mut session = session();
        let ctx = AnalysisContext::new();
        ctx.cancel();
        assert!(matches!(session.analyze(&ctx), Err(AnalysisError::Cancelled)));
        assert!(!session.is_analyzed());
        assert!(session.functions().is_empty());
    }
}
