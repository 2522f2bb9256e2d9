// Tue Jan 13 2026 - Alex

use crate::analysis::function::DetectedFunction;
use crate::container::MachOContainer;
use crate::objc::{MethodImplementation, ObjCMetadata};
use ahash::AHashMap;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const STRING_PREVIEW: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResolvedType {
    Function,
    String,
    ObjCMethod,
    ObjCClass,
    ObjCSelector,
    Data,
    Unknown,
}

impl fmt::Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolvedType::Function => "function",
            ResolvedType::String => "string",
            ResolvedType::ObjCMethod => "objc-method",
            ResolvedType::ObjCClass => "objc-class",
            ResolvedType::ObjCSelector => "objc-selector",
            ResolvedType::Data => "data",
            ResolvedType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAddress {
    pub address: u64,
    pub kind: ResolvedType,
    pub name: String,
    pub comment: Option<String>,
    pub class_name: Option<String>,
    pub method_name: Option<String>,
}

impl ResolvedAddress {
    fn new(address: u64, kind: ResolvedType, name: impl Into<String>) -> Self {
        Self { address, kind, name: name.into(), comment: None, class_name: None, method_name: None }
    }

    fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn with_objc(mut self, class_name: &str, method_name: &str) -> Self {
        self.class_name = Some(class_name.to_string());
        self.method_name = Some(method_name.to_string());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.kind != ResolvedType::Unknown
    }
}

#[derive(Debug, Clone)]
struct FunctionSpan {
    end: u64,
    name: String,
    objc: Option<(String, String)>,
}

/// Quotes and escapes a string for inline display, cutting long text.
pub fn quote_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(STRING_PREVIEW) + 2);
    out.push('"');
    for (i, c) in text.chars().enumerate() {
        if i == STRING_PREVIEW {
            out.push_str("...");
            break;
        }
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Names addresses. The function table is installed once after boundary
/// analysis and read without locking afterwards.
pub struct SymbolResolver {
    container: Arc<MachOContainer>,
    objc: Arc<ObjCMetadata>,
    implementations: AHashMap<u64, MethodImplementation>,
    functions: OnceCell<BTreeMap<u64, FunctionSpan>>,
}

impl SymbolResolver {
    pub fn new(container: Arc<MachOContainer>, objc: Arc<ObjCMetadata>) -> Self {
        let implementations = objc
            .implementations()
            .into_iter()
            .map(|imp| (imp.method.implementation, imp))
            .collect();
        Self { container, objc, implementations, functions: OnceCell::new() }
    }

    /// Installs the function table; returns false if one is already set.
    pub fn set_functions(&self, functions: &[DetectedFunction]) -> bool {
        let table = functions
            .iter()
            .map(|f| {
                let objc = match (&f.objc_class, &f.objc_method) {
                    (Some(class), Some(method)) => Some((class.clone(), method.clone())),
                    _ => None,
                };
                (f.start, FunctionSpan { end: f.end, name: f.display_name(), objc })
            })
            .collect();
        self.functions.set(table).is_ok()
    }

    pub fn has_functions(&self) -> bool {
        self.functions.get().is_some()
    }

    fn function_containing(&self, addr: u64) -> Option<(u64, &FunctionSpan)> {
        self.functions
            .get()?
            .range(..=addr)
            .next_back()
            .filter(|(_, span)| addr < span.end)
            .map(|(&start, span)| (start, span))
    }

    pub fn resolve_address(&self, addr: u64) -> ResolvedAddress {
        if let Some(span) = self.functions.get().and_then(|table| table.get(&addr)) {
            let resolved = ResolvedAddress::new(addr, ResolvedType::Function, span.name.clone());
            return match &span.objc {
                Some((class, method)) => resolved.with_objc(class, method),
                None => resolved,
            };
        }

        if let Some(imp) = self.implementations.get(&addr) {
            return ResolvedAddress::new(addr, ResolvedType::ObjCMethod, imp.display_name())
                .with_objc(&imp.class_name, &imp.method.selector);
        }

        if let Some(text) = self.container.string_at(addr) {
            return ResolvedAddress::new(addr, ResolvedType::String, text).with_comment(quote_string(text));
        }

        if let Some(symbol) = self.container.symbol_at(addr) {
            let kind = if symbol.is_function() { ResolvedType::Function } else { ResolvedType::Data };
            return ResolvedAddress::new(addr, kind, symbol.display_name());
        }

        if let Some(class) = self.objc.class_at(addr) {
            return ResolvedAddress::new(addr, ResolvedType::ObjCClass, class.name.clone());
        }
        if let Some(class) = self.objc.class_ref_at(addr) {
            return ResolvedAddress::new(addr, ResolvedType::ObjCClass, class)
                .with_comment(format!("classref {}", class));
        }
        if let Some(selector) = self.objc.selector_at(addr) {
            return ResolvedAddress::new(addr, ResolvedType::ObjCSelector, selector)
                .with_comment(format!("@selector({})", selector));
        }

        if let Some(section) = self.container.section_containing(addr) {
            if !section.is_executable() {
                return ResolvedAddress::new(addr, ResolvedType::Data, format!("data_{:x}", addr))
                    .with_comment(format!("{}+0x{:x}", section.qualified_name(), addr - section.addr));
            }
        }

        ResolvedAddress::new(addr, ResolvedType::Unknown, format!("0x{:x}", addr))
    }

    /// Resolved name, or `sub_`/`data_` by whether the address is code.
    pub fn format_address(&self, addr: u64) -> String {
        let resolved = self.resolve_address(addr);
        match resolved.kind {
            ResolvedType::Unknown if self.is_code(addr) => format!("sub_{:x}", addr),
            ResolvedType::Unknown => format!("data_{:x}", addr),
            _ => resolved.name,
        }
    }

    fn is_code(&self, addr: u64) -> bool {
        self.function_containing(addr).is_some()
            || self.container.section_containing(addr).map_or(false, |s| s.is_executable())
    }

    /// `name+0xoff` for an address inside a known function.
    pub fn function_name_at(&self, addr: u64) -> Option<String> {
        self.function_containing(addr).map(|(start, span)| {
            if start == addr {
                span.name.clone()
            } else {
                format!("{}+0x{:x}", span.name, addr - start)
            }
        })
    }

    /// Short annotation for a disassembly listing, if anything useful is known.
    pub fn comment_for_address(&self, addr: u64) -> Option<String> {
        let resolved = self.resolve_address(addr);
        match resolved.kind {
            ResolvedType::String | ResolvedType::ObjCSelector => resolved.comment,
            ResolvedType::Unknown => self.function_name_at(addr),
            _ => Some(resolved.name),
        }
    }

    pub fn string_at(&self, addr: u64) -> Option<&str> {
        self.container.string_at(addr)
    }

    pub fn selector_at(&self, addr: u64) -> Option<&str> {
        self.objc.selector_at(addr)
    }

    pub fn objc(&self) -> &ObjCMetadata {
        &self.objc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{MachOBuilder, IMAGE_BASE};
    use crate::objc::{ObjCClass, ObjCMethod};

    const TEXT: u64 = IMAGE_BASE + 0x1000;
    const CSTRING: u64 = IMAGE_BASE + 0x2000;
    const DATA: u64 = IMAGE_BASE + 0x4000;

    fn resolver() -> SymbolResolver {
        let bytes = MachOBuilder::new()
            .text(TEXT, &[0xd65f03c0; 16])
            .cstrings(CSTRING, &["hello\n"])
            .section("__DATA", "__data", DATA, vec![0u8; 0x40])
            .symbol("_main", TEXT, true)
            .symbol("_counter", DATA + 0x8, false)
            .build();
        let container = Arc::new(MachOContainer::from_bytes(bytes).unwrap());

        let mut objc = ObjCMetadata::default();
        objc.classes.insert(
            "Widget".to_string(),
            ObjCClass {
                name: "Widget".to_string(),
                address: DATA + 0x20,
                instance_methods: vec![ObjCMethod {
                    selector: "draw".to_string(),
                    types: "v16@0:8".to_string(),
                    implementation: TEXT + 0x10,
                    is_class_method: false,
                }],
                ..ObjCClass::default()
            },
        );
        objc.selector_refs.insert(DATA + 0x30, "draw".to_string());
        SymbolResolver::new(container, Arc::new(objc))
    }

    fn function(start: u64, end: u64, name: Option<&str>) -> DetectedFunction {
        let mut f = DetectedFunction::new(start, end);
        f.name = name.map(str::to_string);
        f
    }

    #[test]
    fn test_resolution_priority() {
        let resolver = resolver();
        assert!(resolver.set_functions(&[function(TEXT, TEXT + 0x10, Some("main")), function(TEXT + 0x20, TEXT + 0x30, None)]));
        assert!(!resolver.set_functions(&[]));

        let main = resolver.resolve_address(TEXT);
        assert_eq!(main.kind, ResolvedType::Function);
        assert_eq!(main.name, "main");

        let imp = resolver.resolve_address(TEXT + 0x10);
        assert_eq!(imp.kind, ResolvedType::ObjCMethod);
        assert_eq!(imp.name, "-[Widget draw]");
        assert_eq!(imp.class_name.as_deref(), Some("Widget"));

        let string = resolver.resolve_address(CSTRING);
        assert_eq!(string.kind, ResolvedType::String);
        assert_eq!(string.comment.as_deref(), Some("\"hello\\n\""));

        assert_eq!(resolver.resolve_address(DATA + 0x8).name, "counter");
        assert_eq!(resolver.resolve_address(DATA + 0x20).kind, ResolvedType::ObjCClass);
        assert_eq!(resolver.resolve_address(DATA + 0x30).kind, ResolvedType::ObjCSelector);

        let data = resolver.resolve_address(DATA + 0x10);
        assert_eq!(data.kind, ResolvedType::Data);
        assert_eq!(data.comment.as_deref(), Some("__DATA,__data+0x10"));

        assert_eq!(resolver.resolve_address(0x42).kind, ResolvedType::Unknown);
    }

    #[test]
    fn test_format_address_fallbacks() {
        let resolver = resolver();
        resolver.set_functions(&[function(TEXT + 0x20, TEXT + 0x30, None)]);
        assert_eq!(resolver.format_address(TEXT + 0x20), format!("sub_{:x}", TEXT + 0x20));
        assert_eq!(resolver.format_address(TEXT + 0x24), format!("sub_{:x}", TEXT + 0x24));
        assert_eq!(resolver.format_address(DATA + 0x10), format!("data_{:x}", DATA + 0x10));
        assert_eq!(resolver.format_address(0x42), "data_42");
        assert_eq!(resolver.function_name_at(TEXT + 0x28).as_deref(), Some(&*format!("sub_{:x}+0x8", TEXT + 0x20)));
        assert_eq!(resolver.comment_for_address(CSTRING).as_deref(), Some("\"hello\\n\""));
    }

    #[test]
    fn test_quote_string_truncates() {
        let long = "a".repeat(100);
        let quoted = quote_string(&long);
        assert!(quoted.ends_with("...\""));
        assert_eq!(quoted.len(), STRING_PREVIEW + 5);
    }
}
