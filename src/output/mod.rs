// Tue Jan 13 2026 - Alex

pub mod dot;

pub use dot::DotExporter;
