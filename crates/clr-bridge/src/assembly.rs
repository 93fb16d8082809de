//! Assembly Registry
//!
//! The bridge never discovers or loads host code itself. It asks an
//! [`AssemblyRegistry`] which namespaces exist, which types a qualified name
//! denotes, and to load assemblies on demand. [`StaticAssemblyRegistry`] is
//! an in-memory implementation over declared assemblies, for embedders
//! without a reflection-capable host and for tests.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexSet;
use rustc_hash::FxHashSet;
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::host::HostTypeRef;

/// Description of a loaded assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyInfo {
    /// Full display name, e.g. `Acme.Core, Version=1.0.0.0`
    pub name: SmolStr,
    /// Location on disk, if known
    pub location: Option<PathBuf>,
    /// Namespaces the assembly contributes to
    pub namespaces: Vec<SmolStr>,
}

impl AssemblyInfo {
    /// The name up to the first comma
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }
}

/// Text of an assembly display name before the first comma
pub fn short_name(full_name: &str) -> &str {
    full_name.split(',').next().unwrap_or(full_name).trim()
}

/// Host-side assembly discovery, loading and namespace enumeration.
///
/// Loading methods may block on I/O; the bridge calls them with the guest
/// execution lock released and must not be re-entered from them.
pub trait AssemblyRegistry {
    /// Check whether a loaded assembly exports namespace `name`
    fn is_valid_namespace(&self, name: &str) -> bool;

    /// Find a type by namespace-qualified name among loaded assemblies
    fn lookup_type(&self, qualified_name: &str) -> Option<HostTypeRef>;

    /// Try to load assemblies named after the segments of `qualified_name`.
    ///
    /// Returns `true` if anything new was loaded.
    fn load_implicit(&mut self, qualified_name: &str) -> bool;

    /// Load the assembly stored at `path`
    fn load_assembly_by_path(&mut self, path: &str) -> Option<AssemblyInfo>;

    /// Load an assembly by name
    fn load_assembly(&mut self, name: &str) -> Option<AssemblyInfo>;

    /// Locate an assembly file without loading it
    fn find_assembly(&self, name: &str) -> Option<PathBuf>;

    /// Full names of all loaded assemblies
    fn list_assemblies(&self) -> Vec<SmolStr>;

    /// Refresh the assembly search path
    fn update_path(&mut self);

    /// Type names and child namespace segments directly inside `namespace`
    fn names_in(&self, namespace: &str) -> Vec<SmolStr>;

    /// The mangled generic type name (``List`1``) in `namespace` whose base
    /// name is `name`, if one exists.
    fn generic_name_for_base_name(&self, namespace: &str, name: &str) -> Option<SmolStr> {
        let prefix = format!("{}`", name);
        self.names_in(namespace).into_iter().find(|candidate| {
            candidate
                .strip_prefix(prefix.as_str())
                .is_some_and(|arity| !arity.is_empty() && arity.chars().all(|c| c.is_ascii_digit()))
        })
    }
}

// ============================================================================
// Static Registry
// ============================================================================

/// An assembly declared to a [`StaticAssemblyRegistry`]
#[derive(Debug, Clone)]
pub struct StaticAssembly {
    name: SmolStr,
    location: Option<PathBuf>,
    types: Vec<HostTypeRef>,
}

impl StaticAssembly {
    /// Declare an assembly by full display name
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            location: None,
            types: Vec::new(),
        }
    }

    /// Set the file location
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Add a type
    pub fn with_type(mut self, ty: HostTypeRef) -> Self {
        self.types.push(ty);
        self
    }

    /// Full display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name before the first comma
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }

    /// Every namespace the assembly contributes, including parent namespaces
    pub fn namespaces(&self) -> IndexSet<SmolStr> {
        let mut namespaces = IndexSet::new();
        for ty in &self.types {
            let namespace = ty.namespace();
            if namespace.is_empty() {
                continue;
            }
            for (i, _) in namespace.match_indices('.') {
                namespaces.insert(SmolStr::new(&namespace[..i]));
            }
            namespaces.insert(SmolStr::new(namespace));
        }
        namespaces
    }

    fn info(&self) -> AssemblyInfo {
        AssemblyInfo {
            name: self.name.clone(),
            location: self.location.clone(),
            namespaces: self.namespaces().into_iter().collect(),
        }
    }
}

/// Counters of registry calls, shared with whoever holds the handle
#[derive(Debug, Default)]
pub struct RegistryCalls {
    is_valid_namespace: Cell<usize>,
    lookup_type: Cell<usize>,
    load_implicit: Cell<usize>,
    load_assembly: Cell<usize>,
    update_path: Cell<usize>,
    names_in: Cell<usize>,
}

impl RegistryCalls {
    fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }

    /// Calls to `is_valid_namespace`
    pub fn is_valid_namespace(&self) -> usize {
        self.is_valid_namespace.get()
    }

    /// Calls to `lookup_type`
    pub fn lookup_type(&self) -> usize {
        self.lookup_type.get()
    }

    /// Calls to `load_implicit`
    pub fn load_implicit(&self) -> usize {
        self.load_implicit.get()
    }

    /// Calls to `load_assembly` and `load_assembly_by_path`
    pub fn load_assembly(&self) -> usize {
        self.load_assembly.get()
    }

    /// Calls to `update_path`
    pub fn update_path(&self) -> usize {
        self.update_path.get()
    }

    /// Calls to `names_in`
    pub fn names_in(&self) -> usize {
        self.names_in.get()
    }

    /// Calls to any lookup or loading method
    pub fn total(&self) -> usize {
        self.is_valid_namespace()
            + self.lookup_type()
            + self.load_implicit()
            + self.load_assembly()
            + self.update_path()
            + self.names_in()
    }
}

/// In-memory [`AssemblyRegistry`].
///
/// Assemblies added with [`with_pending`](Self::with_pending) are known but
/// not loaded: their namespaces and types stay invisible until an explicit
/// or implicit load.
#[derive(Debug, Default)]
pub struct StaticAssemblyRegistry {
    loaded: Vec<StaticAssembly>,
    pending: Vec<StaticAssembly>,
    namespaces: FxHashSet<SmolStr>,
    probed: FxHashSet<SmolStr>,
    calls: Rc<RegistryCalls>,
}

impl StaticAssemblyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an already loaded assembly
    pub fn with_loaded(mut self, assembly: StaticAssembly) -> Self {
        self.mark_loaded(assembly);
        self
    }

    /// Add an assembly that can be loaded later
    pub fn with_pending(mut self, assembly: StaticAssembly) -> Self {
        self.pending.push(assembly);
        self
    }

    /// Shared call counters
    pub fn calls(&self) -> Rc<RegistryCalls> {
        Rc::clone(&self.calls)
    }

    /// Check whether an assembly (by short name) is loaded
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|a| a.short_name() == name)
    }

    fn mark_loaded(&mut self, assembly: StaticAssembly) -> AssemblyInfo {
        info!(assembly = assembly.name(), "assembly loaded");
        self.namespaces.extend(assembly.namespaces());
        let info = assembly.info();
        self.loaded.push(assembly);
        info
    }

    fn load_pending_where(&mut self, pred: impl Fn(&StaticAssembly) -> bool) -> Option<AssemblyInfo> {
        if let Some(assembly) = self.loaded.iter().find(|a| pred(*a)) {
            return Some(assembly.info());
        }
        let index = self.pending.iter().position(|a| pred(a))?;
        let assembly = self.pending.remove(index);
        Some(self.mark_loaded(assembly))
    }
}

impl AssemblyRegistry for StaticAssemblyRegistry {
    fn is_valid_namespace(&self, name: &str) -> bool {
        RegistryCalls::bump(&self.calls.is_valid_namespace);
        self.namespaces.contains(name)
    }

    fn lookup_type(&self, qualified_name: &str) -> Option<HostTypeRef> {
        RegistryCalls::bump(&self.calls.lookup_type);
        self.loaded
            .iter()
            .flat_map(|a| a.types.iter())
            .find(|ty| ty.full_name() == qualified_name)
            .cloned()
    }

    fn load_implicit(&mut self, qualified_name: &str) -> bool {
        RegistryCalls::bump(&self.calls.load_implicit);

        let mut prefixes: Vec<&str> = qualified_name
            .match_indices('.')
            .map(|(i, _)| &qualified_name[..i])
            .collect();
        prefixes.push(qualified_name);

        let mut loaded_any = false;
        for prefix in prefixes {
            if !self.probed.insert(SmolStr::new(prefix)) {
                continue;
            }
            if let Some(index) = self.pending.iter().position(|a| a.short_name() == prefix) {
                let assembly = self.pending.remove(index);
                debug!(name = qualified_name, assembly = assembly.name(), "implicit load");
                self.mark_loaded(assembly);
                loaded_any = true;
            }
        }
        loaded_any
    }

    fn load_assembly_by_path(&mut self, path: &str) -> Option<AssemblyInfo> {
        RegistryCalls::bump(&self.calls.load_assembly);
        let path = Path::new(path);
        self.load_pending_where(|a| a.location.as_deref() == Some(path))
    }

    fn load_assembly(&mut self, name: &str) -> Option<AssemblyInfo> {
        RegistryCalls::bump(&self.calls.load_assembly);
        self.load_pending_where(|a| a.short_name() == name || a.name() == name)
    }

    fn find_assembly(&self, name: &str) -> Option<PathBuf> {
        self.loaded
            .iter()
            .chain(self.pending.iter())
            .find(|a| a.short_name() == name)
            .and_then(|a| a.location.clone())
    }

    fn list_assemblies(&self) -> Vec<SmolStr> {
        self.loaded.iter().map(|a| a.name.clone()).collect()
    }

    fn update_path(&mut self) {
        RegistryCalls::bump(&self.calls.update_path);
    }

    fn names_in(&self, namespace: &str) -> Vec<SmolStr> {
        RegistryCalls::bump(&self.calls.names_in);

        let mut names = IndexSet::new();
        for ty in self.loaded.iter().flat_map(|a| a.types.iter()) {
            if ty.namespace() == namespace {
                names.insert(SmolStr::new(ty.name()));
            }
        }

        for ns in &self.namespaces {
            let tail = if namespace.is_empty() {
                Some(ns.as_str())
            } else {
                ns.strip_prefix(namespace).and_then(|t| t.strip_prefix('.'))
            };
            if let Some(segment) = tail.filter(|t| !t.is_empty() && !t.contains('.')) {
                names.insert(SmolStr::new(segment));
            }
        }
        names.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostType;
    use pretty_assertions::assert_eq;

    fn registry() -> StaticAssemblyRegistry {
        StaticAssemblyRegistry::new()
            .with_loaded(
                StaticAssembly::new("System.Collections, Version=4.0.0.0")
                    .with_type(HostType::builder("System.Collections.Generic", "List`1").build())
                    .with_type(HostType::builder("System.Collections.Generic", "Comparer").build()),
            )
            .with_pending(
                StaticAssembly::new("Acme.Widgets, Version=1.0.0.0")
                    .with_location("/opt/acme/Acme.Widgets.dll")
                    .with_type(HostType::builder("Acme.Widgets", "Gadget").build()),
            )
    }

    #[test]
    fn test_parent_namespaces_are_valid() {
        let registry = registry();
        assert!(registry.is_valid_namespace("System"));
        assert!(registry.is_valid_namespace("System.Collections.Generic"));
        assert!(!registry.is_valid_namespace("Acme"));
    }

    #[test]
    fn test_load_implicit_probes_prefixes_once() {
        let mut registry = registry();
        assert!(registry.lookup_type("Acme.Widgets.Gadget").is_none());

        assert!(registry.load_implicit("Acme.Widgets.Gadget"));
        assert!(registry.is_loaded("Acme.Widgets"));
        assert!(registry.lookup_type("Acme.Widgets.Gadget").is_some());

        assert!(!registry.load_implicit("Acme.Widgets.Gadget"));
        assert_eq!(registry.calls().load_implicit(), 2);
    }

    #[test]
    fn test_load_by_path_and_name() {
        let mut registry = registry();
        assert!(registry.load_assembly_by_path("/nowhere/Acme.Widgets.dll").is_none());

        let info = registry.load_assembly_by_path("/opt/acme/Acme.Widgets.dll").unwrap();
        assert_eq!(info.short_name(), "Acme.Widgets");
        assert_eq!(info.namespaces, vec![SmolStr::new("Acme"), SmolStr::new("Acme.Widgets")]);

        // Loading again reports the already loaded assembly
        assert_eq!(registry.load_assembly("Acme.Widgets"), Some(info));
    }

    #[test]
    fn test_names_in_lists_types_and_child_namespaces() {
        let registry = registry();
        let mut names = registry.names_in("System.Collections");
        names.sort();
        assert_eq!(names, vec![SmolStr::new("Generic")]);

        let mut generic = registry.names_in("System.Collections.Generic");
        generic.sort();
        assert_eq!(generic, vec![SmolStr::new("Comparer"), SmolStr::new("List`1")]);

        assert_eq!(registry.names_in(""), vec![SmolStr::new("System")]);
    }

    #[test]
    fn test_generic_name_for_base_name() {
        let registry = registry();
        assert_eq!(
            registry.generic_name_for_base_name("System.Collections.Generic", "List"),
            Some(SmolStr::new("List`1"))
        );
        assert_eq!(
            registry.generic_name_for_base_name("System.Collections.Generic", "Comparer"),
            None
        );
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("Acme.Core, Version=1.0.0.0, Culture=neutral"), "Acme.Core");
        assert_eq!(short_name("Acme.Core"), "Acme.Core");
    }
}
