// Tue Jan 13 2026 - Alex

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum XrefKind {
    Call,
    Jump,
    DataRead,
    DataWrite,
    StringRef,
    CodeRef,
}

impl XrefKind {
    pub const ALL: [XrefKind; 6] = [
        XrefKind::Call,
        XrefKind::Jump,
        XrefKind::DataRead,
        XrefKind::DataWrite,
        XrefKind::StringRef,
        XrefKind::CodeRef,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            XrefKind::Call => "call",
            XrefKind::Jump => "jump",
            XrefKind::DataRead => "data-read",
            XrefKind::DataWrite => "data-write",
            XrefKind::StringRef => "string-ref",
            XrefKind::CodeRef => "code-ref",
        }
    }

    pub fn is_code_flow(&self) -> bool {
        matches!(self, XrefKind::Call | XrefKind::Jump)
    }
}

impl fmt::Display for XrefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A directed reference discovered at one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossReference {
    pub from: u64,
    pub to: u64,
    pub kind: XrefKind,
    pub instruction: Option<String>,
    pub function_name: Option<String>,
    pub function_offset: Option<u64>,
}

impl CrossReference {
    pub fn new(from: u64, to: u64, kind: XrefKind) -> Self {
        Self { from, to, kind, instruction: None, function_name: None, function_offset: None }
    }

    pub fn with_instruction(mut self, text: impl Into<String>) -> Self {
        self.instruction = Some(text.into());
        self
    }

    pub fn within_function(mut self, name: impl Into<String>, start: u64) -> Self {
        self.function_name = Some(name.into());
        self.function_offset = Some(self.from.wrapping_sub(start));
        self
    }

    pub fn is_call(&self) -> bool {
        self.kind == XrefKind::Call
    }

    /// `name+0x10` when the owning function is known, the raw source address otherwise.
    pub fn display_name(&self) -> String {
        match (&self.function_name, self.function_offset) {
            (Some(name), Some(0)) => name.clone(),
            (Some(name), Some(offset)) => format!("{}+0x{:x}", name, offset),
            _ => format!("0x{:x}", self.from),
        }
    }
}

impl fmt::Display for CrossReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> 0x{:x} [{}]", self.display_name(), self.to, self.kind)?;
        if let Some(text) = &self.instruction {
            write!(f, "  {}", text)?;
        }
        Ok(())
    }
}
