// Tue Jan 13 2026 - Alex

pub mod analysis;
pub mod config;
pub mod container;
pub mod decompiler;
pub mod objc;
pub mod output;
pub mod session;
pub mod symbol;
pub mod utils;
pub mod xref;

pub use analysis::{AnalysisContext, AnalysisError, AnalysisResult, ControlFlowGraph, Instruction};
pub use config::Config;
pub use container::{ContainerError, MachOContainer, MemoryReader};
pub use decompiler::PseudoCodeGenerator;
pub use objc::ObjCMetadata;
pub use output::DotExporter;
pub use session::{AnalysisSession, SessionSummary};
pub use symbol::SymbolResolver;
pub use xref::{XrefManager, NavigationHistory};
