// Tue Jan 13 2026 - Alex

pub mod arm64;
pub mod cfg;
pub mod context;
pub mod dataflow;
pub mod disasm;
pub mod error;
pub mod function;
pub mod stack;

pub use arm64::{decode, decode_all, decode_word, Arm64Decoder, Instruction, InstructionCategory};
pub use cfg::{BasicBlock, BlockKind, CfgBuilder, CfgEdge, ControlFlowGraph, EdgeKind, Loop};
pub use context::AnalysisContext;
pub use dataflow::{RegisterTracker, TrackedAccess};
pub use disasm::{CacheStats, DisassemblyCache, LazyDisassembler};
pub use error::{AnalysisError, AnalysisResult};
pub use function::{DetectedFunction, FunctionAnalysis, FunctionAnalyzer, FunctionSource};
pub use stack::{PrologueKind, StackFrameTracker, StackVariable};
