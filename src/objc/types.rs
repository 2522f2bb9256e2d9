// Tue Jan 13 2026 - Alex

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjCMethod {
    pub selector: String,
    pub types: String,
    pub implementation: u64,
    pub is_class_method: bool,
}

impl ObjCMethod {
    /// `-[Class selector]` / `+[Class selector]`
    pub fn display_name(&self, class_name: &str) -> String {
        let prefix = if self.is_class_method { '+' } else { '-' };
        format!("{}[{} {}]", prefix, class_name, self.selector)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjCProperty {
    pub name: String,
    pub attributes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjCIvar {
    pub name: String,
    pub type_encoding: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjCClass {
    pub name: String,
    /// Name only; resolve with `ObjCMetadata::superclass_of`.
    pub superclass: Option<String>,
    pub instance_methods: Vec<ObjCMethod>,
    pub class_methods: Vec<ObjCMethod>,
    pub properties: Vec<ObjCProperty>,
    pub ivars: Vec<ObjCIvar>,
    pub protocols: Vec<String>,
    pub address: u64,
    pub instance_size: u32,
}

impl ObjCClass {
    pub fn methods(&self) -> impl Iterator<Item = &ObjCMethod> {
        self.instance_methods.iter().chain(self.class_methods.iter())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjCProtocol {
    pub name: String,
    pub required_methods: Vec<ObjCMethod>,
    pub optional_methods: Vec<ObjCMethod>,
    pub protocols: Vec<String>,
    pub address: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjCCategory {
    pub name: String,
    pub class_name: Option<String>,
    pub instance_methods: Vec<ObjCMethod>,
    pub class_methods: Vec<ObjCMethod>,
    pub properties: Vec<ObjCProperty>,
    pub protocols: Vec<String>,
    pub address: u64,
}

impl ObjCCategory {
    /// Name used in method display names: `Class(Category)`.
    pub fn qualified_name(&self) -> String {
        format!("{}({})", self.class_name.as_deref().unwrap_or("?"), self.name)
    }
}

/// A method implementation together with the class (or `Class(Category)`) owning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodImplementation {
    pub class_name: String,
    pub method: ObjCMethod,
}

impl MethodImplementation {
    pub fn display_name(&self) -> String {
        self.method.display_name(&self.class_name)
    }
}

/// Everything recovered from the Objective-C runtime sections of one image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjCMetadata {
    pub classes: IndexMap<String, ObjCClass>,
    pub protocols: Vec<ObjCProtocol>,
    pub categories: Vec<ObjCCategory>,
    /// `__objc_selrefs` slot address -> selector.
    pub selector_refs: BTreeMap<u64, String>,
    /// `__objc_classrefs` slot address -> class name.
    pub class_refs: BTreeMap<u64, String>,
}

impl ObjCMetadata {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.protocols.is_empty() && self.categories.is_empty()
    }

    pub fn class_named(&self, name: &str) -> Option<&ObjCClass> {
        self.classes.get(name)
    }

    pub fn class_at(&self, address: u64) -> Option<&ObjCClass> {
        self.classes.values().find(|c| c.address == address)
    }

    pub fn superclass_of(&self, class: &ObjCClass) -> Option<&ObjCClass> {
        class.superclass.as_deref().and_then(|name| self.class_named(name))
    }

    /// Superclass names from the immediate parent upwards, stopping at the
    /// first name that is not defined in this image.
    pub fn superclass_chain(&self, class: &ObjCClass) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = class.superclass.clone();
        while let Some(name) = current {
            if chain.contains(&name) || name == class.name {
                break;
            }
            current = self.class_named(&name).and_then(|c| c.superclass.clone());
            chain.push(name);
        }
        chain
    }

    /// Case-insensitive substring search over class names.
    pub fn search_classes(&self, query: &str) -> Vec<&ObjCClass> {
        let query = query.to_lowercase();
        self.classes.values().filter(|c| c.name.to_lowercase().contains(&query)).collect()
    }

    /// Case-insensitive substring search over selectors of classes and categories.
    pub fn search_methods(&self, query: &str) -> Vec<MethodImplementation> {
        let query = query.to_lowercase();
        self.implementations()
            .into_iter()
            .filter(|m| m.method.selector.to_lowercase().contains(&query))
            .collect()
    }

    /// Every method with a non-zero implementation address.
    pub fn implementations(&self) -> Vec<MethodImplementation> {
        let mut out = Vec::new();
        for class in self.classes.values() {
            for method in class.methods() {
                out.push(MethodImplementation { class_name: class.name.clone(), method: method.clone() });
            }
        }
        for category in &self.categories {
            let owner = category.qualified_name();
            for method in category.instance_methods.iter().chain(category.class_methods.iter()) {
                out.push(MethodImplementation { class_name: owner.clone(), method: method.clone() });
            }
        }
        out.retain(|m| m.method.implementation != 0);
        out
    }

    pub fn method_at_implementation(&self, address: u64) -> Option<MethodImplementation> {
        self.implementations().into_iter().find(|m| m.method.implementation == address)
    }

    pub fn selector_at(&self, address: u64) -> Option<&str> {
        self.selector_refs.get(&address).map(String::as_str)
    }

    pub fn class_ref_at(&self, address: u64) -> Option<&str> {
        self.class_refs.get(&address).map(String::as_str)
    }

    pub fn method_count(&self) -> usize {
        self.classes.values().map(|c| c.instance_methods.len() + c.class_methods.len()).sum::<usize>()
            + self
                .categories
                .iter()
                .map(|c| c.instance_methods.len() + c.class_methods.len())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(selector: &str, imp: u64, is_class_method: bool) -> ObjCMethod {
        ObjCMethod { selector: selector.to_string(), types: String::new(), implementation: imp, is_class_method }
    }

    #[test]
    fn test_lookup_and_search() {
        let mut metadata = ObjCMetadata::default();
        metadata.classes.insert(
            "AppDelegate".to_string(),
            ObjCClass {
                name: "AppDelegate".to_string(),
                superclass: Some("UIResponder".to_string()),
                instance_methods: vec![method("application:didFinishLaunchingWithOptions:", 0x1000, false)],
                class_methods: vec![method("shared", 0x1100, true)],
                ..ObjCClass::default()
            },
        );
        metadata.categories.push(ObjCCategory {
            name: "Extras".to_string(),
            class_name: Some("NSString".to_string()),
            instance_methods: vec![method("reversed", 0x1200, false)],
            ..ObjCCategory::default()
        });

        let class = metadata.class_named("AppDelegate").unwrap();
        assert!(metadata.superclass_of(class).is_none());
        assert_eq!(metadata.superclass_chain(class), vec!["UIResponder".to_string()]);
        assert_eq!(metadata.search_classes("delegate").len(), 1);
        assert_eq!(metadata.search_methods("REVERSED")[0].display_name(), "-[NSString(Extras) reversed]");
        assert_eq!(metadata.method_at_implementation(0x1100).unwrap().display_name(), "+[AppDelegate shared]");
        assert!(metadata.method_at_implementation(0x9999).is_none());
        assert_eq!(metadata.method_count(), 3);
    }
}
