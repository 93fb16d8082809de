//! Guest Type Descriptors
//!
//! Every guest heap object is allocated from a [`GuestType`]. The bridge
//! only needs a small part of a real type object: a name, a few flags that
//! steer allocation, and the base list that drives the guest's
//! `isinstance`-style checks (module recognition, exception raising).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use smol_str::SmolStr;

/// Shared reference to a guest type descriptor
pub type GuestTypeRef = Rc<GuestType>;

bitflags! {
    /// Allocation-relevant properties of a guest type.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct TypeFlags: u32 {
        /// Type was derived in guest code; instances carry their own attribute table
        const SUBCLASS = 1 << 0;
        /// Type cannot be instantiated
        const ABSTRACT = 1 << 1;
        /// Type may be used as a base type by guest code
        const BASETYPE = 1 << 2;
        /// Instances always get an attribute table at allocation
        const HAS_DICT = 1 << 3;
    }
}

/// A guest runtime type descriptor.
pub struct GuestType {
    name: SmolStr,
    flags: TypeFlags,
    bases: RefCell<Vec<GuestTypeRef>>,
}

impl GuestType {
    /// Create a root type with no bases
    pub fn new(name: impl Into<SmolStr>, flags: TypeFlags) -> GuestTypeRef {
        Rc::new(Self {
            name: name.into(),
            flags,
            bases: RefCell::new(Vec::new()),
        })
    }

    /// Create a type with the given bases
    pub fn with_bases(
        name: impl Into<SmolStr>,
        flags: TypeFlags,
        bases: impl IntoIterator<Item = GuestTypeRef>,
    ) -> GuestTypeRef {
        Rc::new(Self {
            name: name.into(),
            flags,
            bases: RefCell::new(bases.into_iter().collect()),
        })
    }

    /// Derive a guest-side subclass of `base`
    pub fn derive(base: &GuestTypeRef, name: impl Into<SmolStr>) -> GuestTypeRef {
        let flags = (base.flags & !TypeFlags::ABSTRACT) | TypeFlags::SUBCLASS;
        Self::with_bases(name, flags, [base.clone()])
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type flags
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// Check a flag
    pub fn has_flag(&self, flag: TypeFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Check whether this type is, or transitively derives from, a type named `name`
    pub fn is_subtype_of(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        self.bases.borrow().iter().any(|base| base.is_subtype_of(name))
    }

    /// Append `base` to the base list unless it is already reachable.
    ///
    /// Returns `true` if the base list changed.
    pub fn extend_bases(&self, base: &GuestTypeRef) -> bool {
        if self.is_subtype_of(base.name()) {
            return false;
        }
        self.bases.borrow_mut().push(base.clone());
        true
    }

    /// Names of the direct bases
    pub fn base_names(&self) -> Vec<SmolStr> {
        self.bases.borrow().iter().map(|b| b.name.clone()).collect()
    }
}

impl fmt::Debug for GuestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestType")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("bases", &self.base_names())
            .finish()
    }
}

// ============================================================================
// Builtin Types
// ============================================================================

/// Name of the guest runtime's module type
pub const MODULE_TYPE: &str = "module";

/// Name of the guest runtime's exception root
pub const BASE_EXCEPTION_TYPE: &str = "BaseException";

/// The guest types the bridge allocates its own objects from.
#[derive(Debug, Clone)]
pub struct BuiltinTypes {
    /// `object`
    pub object: GuestTypeRef,
    /// The guest's native module type
    pub module: GuestTypeRef,
    /// The guest's exception root
    pub base_exception: GuestTypeRef,
    /// Metatype of host type wrappers
    pub metatype: GuestTypeRef,
    /// Namespace nodes
    pub namespace: GuestTypeRef,
    /// The root namespace node
    pub root: GuestTypeRef,
    /// `__overloads__` descriptors
    pub constructors: GuestTypeRef,
    /// Explicit constructor overload projections
    pub ctor_mapper: GuestTypeRef,
    /// Exception-compatible wrappers of host exception types
    pub exception_class: GuestTypeRef,
    /// Bound functions exposed by the root
    pub builtin_function: GuestTypeRef,
}

impl BuiltinTypes {
    /// Create a fresh set of builtin types
    pub fn new() -> Self {
        let object = GuestType::new("object", TypeFlags::BASETYPE);
        let module = GuestType::with_bases(MODULE_TYPE, TypeFlags::HAS_DICT, [object.clone()]);
        let base_exception = GuestType::with_bases(
            BASE_EXCEPTION_TYPE,
            TypeFlags::BASETYPE | TypeFlags::HAS_DICT,
            [object.clone()],
        );
        let metatype = GuestType::with_bases("CLR Metatype", TypeFlags::empty(), [object.clone()]);
        let namespace =
            GuestType::with_bases("ModuleObject", TypeFlags::HAS_DICT, [object.clone()]);
        let root = GuestType::with_bases("CLRModule", TypeFlags::HAS_DICT, [namespace.clone()]);
        let constructors =
            GuestType::with_bases("Constructors", TypeFlags::empty(), [object.clone()]);
        let ctor_mapper = GuestType::with_bases("CtorMapper", TypeFlags::empty(), [object.clone()]);
        let exception_class = GuestType::with_bases(
            "CLR ExceptionClass",
            TypeFlags::HAS_DICT,
            [base_exception.clone(), metatype.clone()],
        );
        let builtin_function =
            GuestType::with_bases("builtin_function_or_method", TypeFlags::empty(), [object.clone()]);

        Self {
            object,
            module,
            base_exception,
            metatype,
            namespace,
            root,
            constructors,
            ctor_mapper,
            exception_class,
            builtin_function,
        }
    }
}

impl Default for BuiltinTypes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtype_is_transitive() {
        let types = BuiltinTypes::new();
        assert!(types.root.is_subtype_of("ModuleObject"));
        assert!(types.root.is_subtype_of("object"));
        assert!(!types.root.is_subtype_of(MODULE_TYPE));
    }

    #[test]
    fn test_extend_bases_once() {
        let types = BuiltinTypes::new();
        assert!(types.root.extend_bases(&types.module));
        assert!(!types.root.extend_bases(&types.module));
        assert!(types.root.is_subtype_of(MODULE_TYPE));
        assert_eq!(types.root.base_names().len(), 2);
    }

    #[test]
    fn test_derive_sets_subclass_flag() {
        let base = GuestType::new("Acme.Widgets.Shape", TypeFlags::ABSTRACT | TypeFlags::BASETYPE);
        let derived = GuestType::derive(&base, "Circle");
        assert!(derived.has_flag(TypeFlags::SUBCLASS));
        assert!(!derived.has_flag(TypeFlags::ABSTRACT));
        assert!(derived.is_subtype_of("Acme.Widgets.Shape"));
    }
}
