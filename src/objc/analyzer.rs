// Tue Jan 13 2026 - Alex

use crate::container::{Address, MachOContainer, MemoryReader, Section};
use crate::objc::{ObjCCategory, ObjCClass, ObjCIvar, ObjCMetadata, ObjCMethod, ObjCProperty, ObjCProtocol};
use std::collections::BTreeMap;

const POINTER_SIZE: u64 = 8;
const MAX_LIST_COUNT: u32 = 0x4000;
const CLASS_DATA_MASK: u64 = !7;
const RO_META: u32 = 1;

const METHOD_LIST_RELATIVE: u32 = 0x8000_0000;
const METHOD_LIST_ENTSIZE_MASK: u32 = 0xfffc;
const RELATIVE_METHOD_SIZE: u64 = 12;
const CLASSIC_METHOD_SIZE: u64 = 24;
const IVAR_SIZE: u64 = 32;
const PROPERTY_SIZE: u64 = 16;

const CLASS_SYMBOL_PREFIX: &str = "_OBJC_CLASS_$_";

// class_t
const CLASS_ISA: u64 = 0;
const CLASS_SUPERCLASS: u64 = 8;
const CLASS_DATA: u64 = 32;

// class_ro_t
const RO_FLAGS: u64 = 0;
const RO_INSTANCE_SIZE: u64 = 8;
const RO_NAME: u64 = 24;
const RO_METHODS: u64 = 32;
const RO_PROTOCOLS: u64 = 40;
const RO_IVARS: u64 = 48;
const RO_PROPERTIES: u64 = 64;

// category_t
const CAT_NAME: u64 = 0;
const CAT_CLASS: u64 = 8;
const CAT_INSTANCE_METHODS: u64 = 16;
const CAT_CLASS_METHODS: u64 = 24;
const CAT_PROTOCOLS: u64 = 32;
const CAT_PROPERTIES: u64 = 40;

// protocol_t
const PROTO_NAME: u64 = 8;
const PROTO_PROTOCOLS: u64 = 16;
const PROTO_INSTANCE_METHODS: u64 = 24;
const PROTO_CLASS_METHODS: u64 = 32;
const PROTO_OPTIONAL_INSTANCE_METHODS: u64 = 40;
const PROTO_OPTIONAL_CLASS_METHODS: u64 = 48;

fn field(base: u64, offset: u64) -> Option<u64> {
    base.checked_add(offset)
}

/// Entry `index` of a list whose entries start after an 8-byte header.
fn list_entry(list: u64, index: u64, entsize: u64) -> Option<u64> {
    index.checked_mul(entsize)?.checked_add(8).and_then(|offset| field(list, offset))
}

/// Walks the `__objc_*` sections of a parsed container. Unreadable or
/// inconsistent records are skipped; the walk never fails as a whole.
pub struct ObjCAnalyzer<'a> {
    container: &'a MachOContainer,
}

impl<'a> ObjCAnalyzer<'a> {
    pub fn new(container: &'a MachOContainer) -> Self {
        Self { container }
    }

    pub fn analyze(&self) -> ObjCMetadata {
        let mut metadata = ObjCMetadata::default();
        let table = self.container.objc_sections();
        if table.is_empty() {
            log::debug!("No Objective-C metadata sections");
            return metadata;
        }

        for slot in self.pointer_slots(table.class_list) {
            match self.container.read_pointer(slot).and_then(|class| self.parse_class(class)) {
                Some(class) => {
                    metadata.classes.insert(class.name.clone(), class);
                }
                None => log::debug!("Skipping unreadable class at slot 0x{:x}", slot),
            }
        }

        for slot in self.pointer_slots(table.category_list) {
            if let Some(category) = self.container.read_pointer(slot).and_then(|cat| self.parse_category(cat)) {
                metadata.categories.push(category);
            }
        }

        for slot in self.pointer_slots(table.protocol_list) {
            if let Some(protocol) = self.container.read_pointer(slot).and_then(|p| self.parse_protocol(p)) {
                metadata.protocols.push(protocol);
            }
        }

        metadata.selector_refs = self.selector_refs(table.selector_refs);
        metadata.class_refs = self.class_refs(table.class_refs);

        log::debug!(
            "Objective-C: {} classes, {} categories, {} protocols, {} selector refs",
            metadata.classes.len(),
            metadata.categories.len(),
            metadata.protocols.len(),
            metadata.selector_refs.len()
        );
        metadata
    }

    fn section(&self, index: Option<usize>) -> Option<&'a Section> {
        index.and_then(|i| self.container.sections().get(i))
    }

    /// Addresses of each pointer-sized slot in a list section.
    fn pointer_slots(&self, index: Option<usize>) -> Vec<u64> {
        match self.section(index) {
            Some(section) => (0..section.size / POINTER_SIZE)
                .map_while(|i| field(section.addr, i * POINTER_SIZE))
                .collect(),
            None => Vec::new(),
        }
    }

    fn u32_at(&self, base: u64, offset: u64) -> Option<u32> {
        self.container.read_u32(Address::new(field(base, offset)?)).ok()
    }

    fn i32_at(&self, base: u64, offset: u64) -> Option<i32> {
        self.container.read_i32(Address::new(field(base, offset)?)).ok()
    }

    fn pointer_at(&self, base: u64, offset: u64) -> Option<u64> {
        self.container.read_pointer(field(base, offset)?)
    }

    fn string_at_pointer(&self, base: u64, offset: u64) -> Option<String> {
        self.pointer_at(base, offset).and_then(|target| self.container.read_string(target))
    }

    fn parse_class(&self, class_addr: u64) -> Option<ObjCClass> {
        let ro = self.class_ro(class_addr)?;
        let name = self.string_at_pointer(ro, RO_NAME)?;

        let mut class = ObjCClass {
            name,
            superclass: self.superclass_name(class_addr),
            address: class_addr,
            instance_size: self.u32_at(ro, RO_INSTANCE_SIZE).unwrap_or(0),
            ..ObjCClass::default()
        };

        class.instance_methods = self.method_list(self.pointer_at(ro, RO_METHODS), false);
        class.ivars = self.ivar_list(self.pointer_at(ro, RO_IVARS));
        class.properties = self.property_list(self.pointer_at(ro, RO_PROPERTIES));
        class.protocols = self.protocol_names(self.pointer_at(ro, RO_PROTOCOLS));

        if let Some(meta_ro) = self.pointer_at(class_addr, CLASS_ISA).and_then(|meta| self.class_ro(meta)) {
            let is_meta = self.u32_at(meta_ro, RO_FLAGS).map_or(false, |flags| flags & RO_META != 0);
            if is_meta {
                class.class_methods = self.method_list(self.pointer_at(meta_ro, RO_METHODS), true);
            }
        }

        log::trace!("Class {} at 0x{:x}", class.name, class_addr);
        Some(class)
    }

    fn class_ro(&self, class_addr: u64) -> Option<u64> {
        let raw = self.container.read_u64(Address::new(field(class_addr, CLASS_DATA)?)).ok()?;
        self.container.resolve_pointer(raw & CLASS_DATA_MASK)
    }

    /// Name of the class a `class_t` points at, falling back to an
    /// `_OBJC_CLASS_$_` symbol when the target is not a local class.
    fn class_name_of(&self, class_addr: u64) -> Option<String> {
        if let Some(name) = self.class_ro(class_addr).and_then(|ro| self.string_at_pointer(ro, RO_NAME)) {
            return Some(name);
        }
        self.container
            .symbol_at(class_addr)
            .and_then(|sym| sym.name.strip_prefix(CLASS_SYMBOL_PREFIX))
            .map(str::to_string)
    }

    fn superclass_name(&self, class_addr: u64) -> Option<String> {
        let slot = field(class_addr, CLASS_SUPERCLASS)?;
        if let Some(name) = self.pointer_at(slot, 0).and_then(|superclass| self.class_name_of(superclass)) {
            return Some(name);
        }
        self.container
            .symbol_at(slot)
            .and_then(|sym| sym.name.strip_prefix(CLASS_SYMBOL_PREFIX))
            .map(str::to_string)
    }

    fn list_header(&self, list: u64) -> Option<(u32, u32)> {
        let entsize_and_flags = self.u32_at(list, 0)?;
        let count = self.u32_at(list, 4)?;
        if count > MAX_LIST_COUNT {
            log::debug!("Implausible list count {} at 0x{:x}", count, list);
            return None;
        }
        Some((entsize_and_flags, count))
    }

    fn method_list(&self, list: Option<u64>, is_class_method: bool) -> Vec<ObjCMethod> {
        let Some(list) = list else { return Vec::new() };
        let Some((flags, count)) = self.list_header(list) else { return Vec::new() };

        let relative = flags & METHOD_LIST_RELATIVE != 0;
        let entsize = (flags & METHOD_LIST_ENTSIZE_MASK) as u64;
        let minimum = if relative { RELATIVE_METHOD_SIZE } else { CLASSIC_METHOD_SIZE };
        if entsize < minimum {
            log::debug!("Bad method entry size {} at 0x{:x}", entsize, list);
            return Vec::new();
        }

        (0..count as u64)
            .filter_map(|i| {
                let entry = list_entry(list, i, entsize)?;
                if relative {
                    self.relative_method(entry, is_class_method)
                } else {
                    self.classic_method(entry, is_class_method)
                }
            })
            .collect()
    }

    fn classic_method(&self, entry: u64, is_class_method: bool) -> Option<ObjCMethod> {
        Some(ObjCMethod {
            selector: self.string_at_pointer(entry, 0)?,
            types: self.string_at_pointer(entry, 8).unwrap_or_default(),
            implementation: self.pointer_at(entry, 16).unwrap_or(0),
            is_class_method,
        })
    }

    /// Entries are three `i32` offsets relative to each field; the name
    /// offset lands on a selector reference.
    fn relative_method(&self, entry: u64, is_class_method: bool) -> Option<ObjCMethod> {
        let target = |at: u64| self.i32_at(at, 0).map(|offset| at.wrapping_add(offset as i64 as u64));

        let selref = target(entry)?;
        let selector = self
            .string_at_pointer(selref, 0)
            .or_else(|| self.container.read_string(selref))?;
        let types = field(entry, 4).and_then(target).and_then(|t| self.container.read_string(t)).unwrap_or_default();
        let imp_field = field(entry, 8)?;
        let implementation = match self.i32_at(imp_field, 0) {
            Some(0) | None => 0,
            Some(offset) => imp_field.wrapping_add(offset as i64 as u64),
        };
        Some(ObjCMethod { selector, types, implementation, is_class_method })
    }

    fn ivar_list(&self, list: Option<u64>) -> Vec<ObjCIvar> {
        let Some(list) = list else { return Vec::new() };
        let Some((flags, count)) = self.list_header(list) else { return Vec::new() };
        let entsize = (flags & METHOD_LIST_ENTSIZE_MASK) as u64;
        if entsize < IVAR_SIZE {
            return Vec::new();
        }

        (0..count as u64)
            .filter_map(|i| {
                let entry = list_entry(list, i, entsize)?;
                Some(ObjCIvar {
                    offset: self.pointer_at(entry, 0).and_then(|slot| self.u32_at(slot, 0)).unwrap_or(0),
                    name: self.string_at_pointer(entry, 8)?,
                    type_encoding: self.string_at_pointer(entry, 16).unwrap_or_default(),
                    size: self.u32_at(entry, 28).unwrap_or(0),
                })
            })
            .collect()
    }

    fn property_list(&self, list: Option<u64>) -> Vec<ObjCProperty> {
        let Some(list) = list else { return Vec::new() };
        let Some((flags, count)) = self.list_header(list) else { return Vec::new() };
        let entsize = (flags & METHOD_LIST_ENTSIZE_MASK) as u64;
        if entsize < PROPERTY_SIZE {
            return Vec::new();
        }

        (0..count as u64)
            .filter_map(|i| {
                let entry = list_entry(list, i, entsize)?;
                Some(ObjCProperty {
                    name: self.string_at_pointer(entry, 0)?,
                    attributes: self.string_at_pointer(entry, 8).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// `protocol_list_t`: a 64-bit count followed by `protocol_t` pointers.
    fn protocol_names(&self, list: Option<u64>) -> Vec<String> {
        let Some(list) = list else { return Vec::new() };
        let Ok(count) = self.container.read_u64(Address::new(list)) else { return Vec::new() };
        if count > MAX_LIST_COUNT as u64 {
            return Vec::new();
        }
        (0..count)
            .filter_map(|i| list_entry(list, i, POINTER_SIZE).and_then(|slot| self.pointer_at(slot, 0)))
            .filter_map(|proto| self.string_at_pointer(proto, PROTO_NAME))
            .collect()
    }

    fn parse_protocol(&self, addr: u64) -> Option<ObjCProtocol> {
        let name = self.string_at_pointer(addr, PROTO_NAME)?;
        let mut required = self.method_list(self.pointer_at(addr, PROTO_INSTANCE_METHODS), false);
        required.extend(self.method_list(self.pointer_at(addr, PROTO_CLASS_METHODS), true));
        let mut optional = self.method_list(self.pointer_at(addr, PROTO_OPTIONAL_INSTANCE_METHODS), false);
        optional.extend(self.method_list(self.pointer_at(addr, PROTO_OPTIONAL_CLASS_METHODS), true));

        Some(ObjCProtocol {
            name,
            required_methods: required,
            optional_methods: optional,
            protocols: self.protocol_names(self.pointer_at(addr, PROTO_PROTOCOLS)),
            address: addr,
        })
    }

    fn parse_category(&self, addr: u64) -> Option<ObjCCategory> {
        let name = self.string_at_pointer(addr, CAT_NAME)?;
        let class_name = match self.pointer_at(addr, CAT_CLASS) {
            Some(class) => self.class_name_of(class),
            None => self
                .container
                .symbol_at(field(addr, CAT_CLASS)?)
                .and_then(|sym| sym.name.strip_prefix(CLASS_SYMBOL_PREFIX))
                .map(str::to_string),
        };

        Some(ObjCCategory {
            name,
            class_name,
            instance_methods: self.method_list(self.pointer_at(addr, CAT_INSTANCE_METHODS), false),
            class_methods: self.method_list(self.pointer_at(addr, CAT_CLASS_METHODS), true),
            properties: self.property_list(self.pointer_at(addr, CAT_PROPERTIES)),
            protocols: self.protocol_names(self.pointer_at(addr, CAT_PROTOCOLS)),
            address: addr,
        })
    }

    fn selector_refs(&self, index: Option<usize>) -> BTreeMap<u64, String> {
        self.pointer_slots(index)
            .into_iter()
            .filter_map(|slot| self.string_at_pointer(slot, 0).map(|sel| (slot, sel)))
            .collect()
    }

    fn class_refs(&self, index: Option<usize>) -> BTreeMap<u64, String> {
        self.pointer_slots(index)
            .into_iter()
            .filter_map(|slot| {
                let name = match self.pointer_at(slot, 0) {
                    Some(class) => self.class_name_of(class),
                    None => None,
                };
                name.map(|name| (slot, name))
            })
            .collect()
    }
}
