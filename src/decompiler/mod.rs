// Tue Jan 13 2026 - Alex

pub mod pseudo;
pub mod strings;

pub use pseudo::PseudoCodeGenerator;
pub use strings::StringMap;
