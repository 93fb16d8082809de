//! Type Wrappers
//!
//! The [`ClassManager`] reflects each host type into the guest runtime
//! exactly once. A reflected type consists of
//!
//! - a guest type descriptor used to allocate instances
//!   ([`ManagedObjectBinding`](crate::ManagedObjectBinding)s),
//! - a [`TypeWrapper`] guest object: the class as guest code sees it,
//!   carrying `__overloads__`, `__name__` and `__module__`,
//! - for host exception types, an [`ExceptionWrapper`] whose guest type
//!   derives from the guest's exception root so it can be raised and caught.
//!
//! The manager owns one reference to every wrapper it creates; handles
//! returned by its lookups are borrowed.

use std::any::Any;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::bridge::Bridge;
use crate::constructors::{self, Constructors};
use crate::error::{BridgeError, BridgeResult};
use crate::extension::{self, ExtensionType};
use crate::guest::{CallArgs, GuestHandle, GuestType, GuestTypeRef, GuestValue, TypeFlags};
use crate::host::{HostTypeRef, EXCEPTION_TYPE};
use crate::marshal;
use crate::overload::OverloadResolver;

#[derive(Debug, Clone)]
struct ClassEntry {
    wrapper: GuestHandle,
    instance_type: GuestTypeRef,
    exception_wrapper: Option<GuestHandle>,
}

/// Cache of reflected host types, keyed by full name
#[derive(Debug, Default)]
pub struct ClassManager {
    classes: FxHashMap<SmolStr, ClassEntry>,
}

impl ClassManager {
    /// Create an empty class manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reflected types
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if no type has been reflected yet
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Guest instance type of an already reflected host type
    pub fn instance_type(&self, full_name: &str) -> Option<GuestTypeRef> {
        self.classes.get(full_name).map(|e| e.instance_type.clone())
    }

    /// Type wrapper of an already reflected host type (borrowed)
    pub fn wrapper(&self, full_name: &str) -> Option<GuestHandle> {
        self.classes.get(full_name).map(|e| e.wrapper)
    }

    /// Reflect `ty`, creating its wrapper on first use.
    ///
    /// The returned handle is borrowed from the manager.
    pub fn get_class(bridge: &mut Bridge, ty: &HostTypeRef) -> BridgeResult<GuestHandle> {
        if let Some(wrapper) = bridge.classes().wrapper(ty.full_name()) {
            return Ok(wrapper);
        }

        let instance_type = Self::create_instance_type(bridge, ty)?;
        let types = bridge.types().clone();

        let ctors = Rc::new(Constructors::new(ty.clone(), instance_type.clone()));
        let ctors_handle = extension::register(bridge, &types.constructors, ctors.clone())?;

        let record = Rc::new(TypeWrapper {
            host_type: ty.clone(),
            instance_type: instance_type.clone(),
            constructors: ctors,
        });
        let wrapper = match extension::register(bridge, &types.metatype, record) {
            Ok(handle) => handle,
            Err(err) => {
                bridge.decref(ctors_handle)?;
                return Err(err);
            }
        };

        bridge.heap_mut().ensure_dict(wrapper)?;
        if let Some(dict) = bridge.heap_mut().dict_mut(wrapper) {
            dict.insert("__overloads__".into(), GuestValue::Object(ctors_handle));
            dict.insert("__name__".into(), GuestValue::str(ty.name()));
            dict.insert("__module__".into(), GuestValue::str(ty.namespace()));
            dict.insert("__doc__".into(), GuestValue::None);
        }

        debug!(host_type = ty.full_name(), wrapper = %wrapper, "reflected host type");
        bridge.classes_mut().classes.insert(
            SmolStr::new(ty.full_name()),
            ClassEntry {
                wrapper,
                instance_type,
                exception_wrapper: None,
            },
        );
        Ok(wrapper)
    }

    /// Exception-compatible wrapper of a host exception type (borrowed)
    pub fn exception_wrapper(bridge: &mut Bridge, ty: &HostTypeRef) -> BridgeResult<GuestHandle> {
        let class = Self::get_class(bridge, ty)?;
        if let Some(wrapper) = bridge
            .classes()
            .classes
            .get(ty.full_name())
            .and_then(|e| e.exception_wrapper)
        {
            return Ok(wrapper);
        }

        bridge.incref(class)?;
        let record = Rc::new(ExceptionWrapper {
            class,
            host_type: ty.clone(),
        });
        let exception_class = bridge.types().exception_class.clone();
        let wrapper = match extension::register(bridge, &exception_class, record) {
            Ok(handle) => handle,
            Err(err) => {
                bridge.decref(class)?;
                return Err(err);
            }
        };

        if let Some(entry) = bridge.classes_mut().classes.get_mut(ty.full_name()) {
            entry.exception_wrapper = Some(wrapper);
        }
        Ok(wrapper)
    }

    /// The guest object a namespace exposes for `ty` (borrowed).
    ///
    /// Host exception types are replaced by their exception wrapper when
    /// exception wrapping is enabled.
    pub fn exposed_class(bridge: &mut Bridge, ty: &HostTypeRef) -> BridgeResult<GuestHandle> {
        if bridge.config().wrap_exceptions && ty.is_exception() {
            Self::exception_wrapper(bridge, ty)
        } else {
            Self::get_class(bridge, ty)
        }
    }

    fn create_instance_type(bridge: &mut Bridge, ty: &HostTypeRef) -> BridgeResult<GuestTypeRef> {
        let mut bases = Vec::new();
        match ty.base() {
            Some(base) => {
                Self::get_class(bridge, base)?;
                let base_type = bridge
                    .classes()
                    .instance_type(base.full_name())
                    .ok_or_else(|| BridgeError::allocation(base.full_name(), "base type not reflected"))?;
                bases.push(base_type);
            }
            None => bases.push(bridge.types().object.clone()),
        }
        if ty.full_name() == EXCEPTION_TYPE {
            bases.push(bridge.types().base_exception.clone());
        }

        let mut flags = TypeFlags::BASETYPE;
        if ty.is_abstract() {
            flags |= TypeFlags::ABSTRACT;
        }
        Ok(GuestType::with_bases(ty.full_name(), flags, bases))
    }
}

/// Host type behind a type wrapper or exception wrapper record
pub fn class_host_type(record: &dyn ExtensionType) -> Option<HostTypeRef> {
    if let Some(wrapper) = record.downcast_ref::<TypeWrapper>() {
        return Some(wrapper.host_type.clone());
    }
    record
        .downcast_ref::<ExceptionWrapper>()
        .map(|w| w.host_type.clone())
}

// ============================================================================
// TypeWrapper
// ============================================================================

/// A host type as seen by guest code
#[derive(Debug)]
pub struct TypeWrapper {
    host_type: HostTypeRef,
    instance_type: GuestTypeRef,
    constructors: Rc<Constructors>,
}

impl TypeWrapper {
    /// Reflected host type
    pub fn host_type(&self) -> &HostTypeRef {
        &self.host_type
    }

    /// Guest type of instances
    pub fn instance_type(&self) -> &GuestTypeRef {
        &self.instance_type
    }
}

impl ExtensionType for TypeWrapper {
    fn type_name(&self) -> &str {
        "CLR Metatype"
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
        let value = bridge
            .heap()
            .dict_get(this, name)
            .cloned()
            .ok_or_else(|| BridgeError::not_found(name))?;

        if let GuestValue::Object(handle) = value {
            if let Some(record) = bridge.record(handle) {
                if let Some(bound) = record.descriptor_get(bridge, handle, this)? {
                    return Ok(bound);
                }
            }
        }

        bridge.incref_value(&value)?;
        Ok(value)
    }

    /// Construct an instance, picking the constructor from the arguments
    fn call(
        &self,
        bridge: &mut Bridge,
        _this: GuestHandle,
        args: &CallArgs,
    ) -> BridgeResult<GuestValue> {
        constructors::ensure_instantiable(&self.instance_type)?;

        let overloads = self.constructors.overloads();
        let (positional, keywords) = marshal::shapes_of(bridge, args);
        let binding = OverloadResolver::resolve(overloads, &positional, &keywords)?;

        let ctor = &overloads.candidates()[binding.candidate];
        constructors::construct(
            bridge,
            &self.host_type,
            &self.instance_type,
            ctor,
            &binding.sources,
            args,
        )
    }

    fn repr(&self, _bridge: &Bridge, _this: GuestHandle) -> String {
        format!("<class '{}'>", self.host_type.full_name())
    }
}

// ============================================================================
// ExceptionWrapper
// ============================================================================

/// Exception-compatible stand-in for a host exception type
#[derive(Debug)]
pub struct ExceptionWrapper {
    class: GuestHandle,
    host_type: HostTypeRef,
}

impl ExceptionWrapper {
    /// The wrapped type wrapper
    pub fn class(&self) -> GuestHandle {
        self.class
    }
}

impl ExtensionType for ExceptionWrapper {
    fn type_name(&self) -> &str {
        "CLR ExceptionClass"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attribute(
        &self,
        bridge: &mut Bridge,
        _this: GuestHandle,
        name: &str,
    ) -> BridgeResult<GuestValue> {
        bridge.getattr(self.class, name)
    }

    fn call(
        &self,
        bridge: &mut Bridge,
        _this: GuestHandle,
        args: &CallArgs,
    ) -> BridgeResult<GuestValue> {
        bridge.call(self.class, args)
    }

    fn repr(&self, _bridge: &Bridge, _this: GuestHandle) -> String {
        format!("<class '{}'>", self.host_type.full_name())
    }

    fn deallocate(&self, bridge: &mut Bridge, this: GuestHandle) {
        if let Err(err) = bridge.decref(self.class) {
            warn!(handle = %this, error = %err, "exception wrapper lost its class");
        }
    }
}
