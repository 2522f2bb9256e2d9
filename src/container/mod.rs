// Tue Jan 13 2026 - Alex

pub mod address;
pub mod error;
pub mod layout;
pub mod macho;
pub mod mmap;
pub mod protection;
pub mod reader;
pub mod segment;

#[cfg(test)]
pub mod testing;

pub use address::Address;
pub use error::{ContainerError, ContainerResult};
pub use macho::{ContainerSummary, MachOContainer, ObjCSectionTable};
pub use mmap::ContainerData;
pub use protection::Protection;
pub use reader::{FlatImage, MemoryReader, MemoryRegion};
pub use segment::{Section, Segment, StringKind, StringLiteral, Symbol, SymbolKind};
