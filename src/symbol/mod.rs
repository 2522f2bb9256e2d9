// Tue Jan 13 2026 - Alex

pub mod resolver;

pub use resolver::{quote_string, ResolvedAddress, ResolvedType, SymbolResolver};
