// Tue Jan 13 2026 - Alex

pub mod analyzer;
pub mod types;

pub use analyzer::ObjCAnalyzer;
pub use types::{
    MethodImplementation, ObjCCategory, ObjCClass, ObjCIvar, ObjCMetadata, ObjCMethod, ObjCProperty, ObjCProtocol,
};
