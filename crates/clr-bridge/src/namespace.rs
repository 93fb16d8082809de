//! Namespace Projection
//!
//! A [`NamespaceNode`] presents one host namespace to the guest runtime as
//! a module. Child namespaces and types are resolved on first access and
//! cached, both in the node's attribute cache and in its backing dict:
//! once a name has resolved it is never resolved again, and every later
//! access returns the same guest object.
//!
//! Resolution of `name` inside namespace `ns` proceeds as follows:
//!
//! 1. a cached entry is returned as is;
//! 2. `ns.name` naming a namespace yields a child node;
//! 3. `ns.name` naming a public type yields its wrapper, a non-public type
//!    yields nothing (and nothing is cached);
//! 4. otherwise assemblies named after `ns.name` are loaded implicitly and
//!    steps 2-3 are retried once;
//! 5. otherwise, when allowed, a generic type whose base name is `name`
//!    (``List`` for ``List`1``) is resolved without further fallback and
//!    cached under `name` as well.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::bridge::Bridge;
use crate::classes::ClassManager;
use crate::error::{BridgeError, BridgeResult};
use crate::extension::{self, ExtensionType};
use crate::guest::{GuestHandle, GuestTypeRef, GuestValue};

/// Outcome of one resolution pass against loaded assemblies
enum Lookup {
    Found(GuestHandle),
    Hidden,
    Missing,
}

/// Lazily populated module standing for one host namespace
#[derive(Debug)]
pub struct NamespaceNode {
    module_name: SmolStr,
    namespace: SmolStr,
    cache: RefCell<IndexMap<SmolStr, GuestHandle>>,
}

impl NamespaceNode {
    /// Create the record for namespace `namespace`, exposed as `module_name`
    pub fn new(module_name: impl Into<SmolStr>, namespace: impl Into<SmolStr>) -> Self {
        Self {
            module_name: module_name.into(),
            namespace: namespace.into(),
            cache: RefCell::new(IndexMap::new()),
        }
    }

    /// Allocate a node for `namespace` as a guest object of `ty`.
    ///
    /// The backing dict is seeded with module metadata. Returns the handle
    /// with one caller-owned reference.
    pub fn create(
        bridge: &mut Bridge,
        ty: &GuestTypeRef,
        node: Rc<dyn ExtensionType>,
        module_name: &str,
    ) -> BridgeResult<GuestHandle> {
        if module_name.is_empty() {
            return Err(BridgeError::config("module name must not be empty"));
        }

        let handle = extension::register(bridge, ty, node)?;
        bridge.heap_mut().ensure_dict(handle)?;
        if let Some(dict) = bridge.heap_mut().dict_mut(handle) {
            dict.insert("__name__".into(), GuestValue::str(module_name));
            dict.insert("__file__".into(), GuestValue::None);
            dict.insert("__doc__".into(), GuestValue::None);
        }
        Ok(handle)
    }

    /// Allocate a child node for namespace `qualified_name`
    fn create_child(bridge: &mut Bridge, qualified_name: &str) -> BridgeResult<GuestHandle> {
        let ty = bridge.types().namespace.clone();
        let node = Rc::new(Self::new(qualified_name, qualified_name));
        Self::create(bridge, &ty, node, qualified_name)
    }

    /// Module name
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Host namespace (empty for the root)
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of cached attributes
    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Check whether `name` has been resolved and cached
    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.borrow().contains_key(name)
    }

    fn qualify(&self, name: &str) -> SmolStr {
        if self.namespace.is_empty() {
            SmolStr::new(name)
        } else {
            SmolStr::new(format!("{}.{}", self.namespace, name))
        }
    }

    /// Resolve `name` to a child namespace node or type wrapper.
    ///
    /// Returns a handle borrowed from this node's cache, or `None` if the
    /// name does not resolve. Failed lookups are not remembered.
    pub fn get_attribute(
        &self,
        bridge: &mut Bridge,
        this: GuestHandle,
        name: &str,
        allow_generic_fallback: bool,
    ) -> BridgeResult<Option<GuestHandle>> {
        let cached = self.cache.borrow().get(name).copied();
        if let Some(handle) = cached {
            trace!(module = %self.module_name, name, "cache hit");
            return Ok(Some(handle));
        }

        let qualified_name = self.qualify(name);
        debug!(module = %self.module_name, name = %qualified_name, "resolving");

        let mut lookup = self.resolve_loaded(bridge, this, name, &qualified_name)?;
        if matches!(lookup, Lookup::Missing) && bridge.load_implicit(&qualified_name) {
            lookup = self.resolve_loaded(bridge, this, name, &qualified_name)?;
        }

        match lookup {
            Lookup::Found(handle) => return Ok(Some(handle)),
            Lookup::Hidden => return Ok(None),
            Lookup::Missing => {}
        }

        if allow_generic_fallback {
            let generic = bridge
                .assemblies()
                .generic_name_for_base_name(&self.namespace, name);
            if let Some(generic) = generic {
                if let Some(handle) = self.get_attribute(bridge, this, &generic, false)? {
                    debug!(name = %qualified_name, generic = %generic, "resolved generic base name");
                    bridge.incref(handle)?;
                    self.store_attribute(bridge, this, name, handle)?;
                    return Ok(Some(handle));
                }
            }
        }

        Ok(None)
    }

    fn resolve_loaded(
        &self,
        bridge: &mut Bridge,
        this: GuestHandle,
        name: &str,
        qualified_name: &str,
    ) -> BridgeResult<Lookup> {
        if bridge.assemblies().is_valid_namespace(qualified_name) {
            let child = Self::create_child(bridge, qualified_name)?;
            self.store_attribute(bridge, this, name, child)?;
            if bridge.preload() {
                let record = bridge.record(child);
                if let Some(node) = record.as_ref().and_then(|r| r.downcast_ref::<NamespaceNode>()) {
                    node.load_names(bridge, child)?;
                }
            }
            return Ok(Lookup::Found(child));
        }

        let Some(ty) = bridge.assemblies().lookup_type(qualified_name) else {
            return Ok(Lookup::Missing);
        };
        if !ty.is_public() {
            debug!(name = %qualified_name, "type is not public");
            return Ok(Lookup::Hidden);
        }

        let class = ClassManager::exposed_class(bridge, &ty)?;
        bridge.incref(class)?;
        self.store_attribute(bridge, this, name, class)?;
        Ok(Lookup::Found(class))
    }

    /// Record a resolved attribute in the backing dict and the cache.
    ///
    /// Takes over one reference to `handle`.
    fn store_attribute(
        &self,
        bridge: &mut Bridge,
        this: GuestHandle,
        name: &str,
        handle: GuestHandle,
    ) -> BridgeResult<()> {
        let previous = bridge
            .heap_mut()
            .dict_mut(this)
            .ok_or_else(|| BridgeError::invalid_handle(format!("namespace dict of {}", this)))?
            .insert(SmolStr::new(name), GuestValue::Object(handle));
        self.cache.borrow_mut().insert(SmolStr::new(name), handle);

        if let Some(previous) = previous {
            bridge.release(previous)?;
        }
        Ok(())
    }

    /// Resolve every name currently known in this namespace.
    ///
    /// Can be called again after more assemblies are loaded; names already
    /// cached are skipped.
    pub fn load_names(&self, bridge: &mut Bridge, this: GuestHandle) -> BridgeResult<()> {
        let names = bridge.assemblies().names_in(&self.namespace);
        for name in names {
            if self.is_cached(&name) {
                continue;
            }
            self.get_attribute(bridge, this, &name, true)?;
        }
        Ok(())
    }

    /// Module attribute protocol shared by every namespace-backed object:
    /// backing dict, then `__dict__`, then resolution.
    pub(crate) fn module_getattr(
        &self,
        bridge: &mut Bridge,
        this: GuestHandle,
        name: &str,
    ) -> BridgeResult<Option<GuestValue>> {
        if let Some(value) = extension::generic_get_attribute(bridge, this, name)? {
            return Ok(Some(value));
        }

        if name == "__dict__" {
            let snapshot = bridge.heap().dict(this).cloned().unwrap_or_default();
            let value = GuestValue::Dict(snapshot);
            bridge.incref_value(&value)?;
            return Ok(Some(value));
        }

        match self.get_attribute(bridge, this, name, true)? {
            Some(handle) => {
                bridge.incref(handle)?;
                Ok(Some(GuestValue::Object(handle)))
            }
            None => Ok(None),
        }
    }
}

impl ExtensionType for NamespaceNode {
    fn type_name(&self) -> &str {
        "ModuleObject"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attribute(
        &self,
        bridge: &mut Bridge,
        this: GuestHandle,
        name: &str,
    ) -> BridgeResult<GuestValue> {
        self.module_getattr(bridge, this, name)?
            .ok_or_else(|| BridgeError::not_found(name))
    }

    fn repr(&self, _bridge: &Bridge, _this: GuestHandle) -> String {
        format!("<module '{}'>", self.module_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{StaticAssembly, StaticAssemblyRegistry};
    use crate::config::BridgeConfig;
    use crate::host::HostType;
    use pretty_assertions::assert_eq;

    fn bridge() -> Bridge {
        let registry = StaticAssemblyRegistry::new().with_loaded(
            StaticAssembly::new("Acme.Core")
                .with_type(HostType::builder("Acme", "Widget").build())
                .with_type(HostType::builder("Acme", "Secret").non_public().build()),
        );
        Bridge::new(BridgeConfig::default(), registry).unwrap()
    }

    fn acme(bridge: &mut Bridge) -> GuestHandle {
        let root = bridge.root().unwrap();
        bridge.getattr(root, "Acme").unwrap().as_object().unwrap()
    }

    #[test]
    fn test_child_namespace_metadata() {
        let mut bridge = bridge();
        let acme = acme(&mut bridge);

        assert_eq!(bridge.getattr(acme, "__name__").unwrap(), GuestValue::str("Acme"));
        assert_eq!(bridge.getattr(acme, "__file__").unwrap(), GuestValue::None);
        assert_eq!(bridge.repr(acme).unwrap(), "<module 'Acme'>");
    }

    #[test]
    fn test_dict_snapshot_contains_resolved_names() {
        let mut bridge = bridge();
        let acme = acme(&mut bridge);
        let widget = bridge.getattr(acme, "Widget").unwrap();

        let GuestValue::Dict(dict) = bridge.getattr(acme, "__dict__").unwrap() else {
            panic!("__dict__ is not a dict");
        };
        assert_eq!(dict.get("Widget"), Some(&widget));
        assert!(dict.contains_key("__name__"));
    }

    #[test]
    fn test_non_public_type_is_not_cached() {
        let mut bridge = bridge();
        let acme = acme(&mut bridge);

        let err = bridge.getattr(acme, "Secret").unwrap_err();
        assert_eq!(err, BridgeError::not_found("Secret"));
        assert!(bridge.heap().dict_get(acme, "Secret").is_none());
    }

    #[test]
    fn test_setattr_is_rejected() {
        let mut bridge = bridge();
        let acme = acme(&mut bridge);
        let err = bridge.setattr(acme, "Widget", &GuestValue::Int(1)).unwrap_err();
        assert_eq!(err, BridgeError::type_error(extension::INVALID_SETATTR));
    }
}
