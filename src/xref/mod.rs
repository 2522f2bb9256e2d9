// Tue Jan 13 2026 - Alex

pub mod manager;
pub mod navigation;
pub mod reference;

pub use manager::{XrefManager, XrefStats};
pub use navigation::NavigationHistory;
pub use reference::{CrossReference, XrefKind};
