//! Constructor Projection
//!
//! A host type's constructors are exposed to guest code through the
//! `__overloads__` attribute of its type wrapper:
//!
//! ```text
//! Gadget.__overloads__[Int32, Int32](3, 4)
//! ```
//!
//! [`Constructors`] is the descriptor stored under that attribute. Every
//! read yields a fresh [`CtorMapper`], so a selection made at one call site
//! is never seen by another. A mapper moves through
//!
//! ```text
//! Unselected --[types]--> Selected --(args)--> Invoked
//! ```
//!
//! and calling it while unselected is a usage error: it never falls back to
//! argument-based resolution.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use crate::binding::ManagedObjectBinding;
use crate::bridge::Bridge;
use crate::classes;
use crate::error::{BridgeError, BridgeResult};
use crate::extension::{self, ExtensionType};
use crate::guest::{CallArgs, GuestHandle, GuestTypeRef, GuestValue, TypeFlags};
use crate::host::{Constructor, HostInstance, HostTypeRef};
use crate::marshal;
use crate::overload::{ArgSource, OverloadResolver, OverloadSet};

const TYPES_EXPECTED: &str = "type(s) expected";
const NO_SIGNATURE_MATCH: &str = "No match found for signature";
const NO_ARGUMENT_MATCH: &str = "No method matches given arguments";
const SELECTION_REQUIRED: &str = "Use subscript notation: Class.__overloads__[CLR_Type_list]";

/// Fail early for types the guest runtime cannot allocate
pub(crate) fn ensure_instantiable(instance_type: &GuestTypeRef) -> BridgeResult<()> {
    if instance_type.has_flag(TypeFlags::ABSTRACT) {
        return Err(BridgeError::allocation(instance_type.name(), "type is abstract"));
    }
    Ok(())
}

/// Run `ctor` and bind the new host object as an `instance_type` instance
pub(crate) fn construct(
    bridge: &mut Bridge,
    host_type: &HostTypeRef,
    instance_type: &GuestTypeRef,
    ctor: &Constructor,
    sources: &[ArgSource],
    args: &CallArgs,
) -> BridgeResult<GuestValue> {
    ensure_instantiable(instance_type)?;
    let host_args = marshal::marshal_arguments(bridge, ctor.signature(), sources, args)?;

    let value = ctor
        .invoke(&host_args)
        .map_err(|e| BridgeError::invocation(e.exception_type, e.message))?;
    let instance = HostInstance::new(host_type.clone(), value);

    let handle = ManagedObjectBinding::create(bridge, instance, instance_type)?;
    Ok(GuestValue::Object(handle))
}

// ============================================================================
// Constructors Descriptor
// ============================================================================

/// The `__overloads__` descriptor of one host type
#[derive(Debug)]
pub struct Constructors {
    host_type: HostTypeRef,
    instance_type: GuestTypeRef,
    overloads: OverloadSet<Constructor>,
}

impl Constructors {
    /// Create the descriptor record for `host_type`
    pub fn new(host_type: HostTypeRef, instance_type: GuestTypeRef) -> Self {
        let overloads = OverloadSet::new(host_type.name(), host_type.constructors().to_vec());
        Self {
            host_type,
            instance_type,
            overloads,
        }
    }

    /// The constructor overload set
    pub fn overloads(&self) -> &OverloadSet<Constructor> {
        &self.overloads
    }

    /// Create a fresh, unselected projection
    pub fn new_mapper(&self, bridge: &mut Bridge) -> BridgeResult<GuestHandle> {
        let mapper = CtorMapper {
            host_type: self.host_type.clone(),
            instance_type: self.instance_type.clone(),
            overloads: self.overloads.clone(),
            selected: Cell::new(None),
        };
        let ty = bridge.types().ctor_mapper.clone();
        extension::register(bridge, &ty, Rc::new(mapper))
    }
}

impl ExtensionType for Constructors {
    fn type_name(&self) -> &str {
        "Constructors"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn descriptor_get(
        &self,
        bridge: &mut Bridge,
        _this: GuestHandle,
        _owner: GuestHandle,
    ) -> BridgeResult<Option<GuestValue>> {
        let mapper = self.new_mapper(bridge)?;
        Ok(Some(GuestValue::Object(mapper)))
    }
}

// ============================================================================
// CtorMapper
// ============================================================================

/// Explicit constructor selection by type list
#[derive(Debug)]
pub struct CtorMapper {
    host_type: HostTypeRef,
    instance_type: GuestTypeRef,
    overloads: OverloadSet<Constructor>,
    selected: Cell<Option<usize>>,
}

impl CtorMapper {
    /// Index of the selected constructor, if any
    pub fn selected(&self) -> Option<usize> {
        self.selected.get()
    }

    /// Host type being constructed
    pub fn host_type(&self) -> &HostTypeRef {
        &self.host_type
    }

    fn key_types(bridge: &Bridge, key: &GuestValue) -> BridgeResult<Vec<HostTypeRef>> {
        let as_type = |value: &GuestValue| {
            value
                .as_object()
                .and_then(|h| bridge.record(h))
                .and_then(|record| classes::class_host_type(record.as_ref()))
                .ok_or_else(|| BridgeError::type_error(TYPES_EXPECTED))
        };

        match key {
            GuestValue::Tuple(items) => items.iter().map(as_type).collect(),
            single => Ok(vec![as_type(single)?]),
        }
    }
}

impl ExtensionType for CtorMapper {
    fn type_name(&self) -> &str {
        "CtorMapper"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscript(
        &self,
        bridge: &mut Bridge,
        this: GuestHandle,
        key: &GuestValue,
    ) -> BridgeResult<GuestValue> {
        let types = Self::key_types(bridge, key)?;

        let index = OverloadResolver::match_by_signature(&self.overloads, &types)
            .ok_or_else(|| BridgeError::no_match(self.overloads.name(), NO_SIGNATURE_MATCH))?;
        self.selected.set(Some(index));

        debug!(
            host_type = self.host_type.full_name(),
            signature = %self.overloads.candidates()[index].signature(),
            "constructor selected"
        );
        bridge.incref(this)?;
        Ok(GuestValue::Object(this))
    }

    fn call(
        &self,
        bridge: &mut Bridge,
        _this: GuestHandle,
        args: &CallArgs,
    ) -> BridgeResult<GuestValue> {
        let ctor = self
            .selected
            .get()
            .and_then(|index| self.overloads.get(index))
            .ok_or_else(|| BridgeError::usage(SELECTION_REQUIRED))?;

        let (positional, keywords) = marshal::shapes_of(bridge, args);
        let (sources, _) = OverloadResolver::bind(ctor.signature(), &positional, &keywords)
            .ok_or_else(|| BridgeError::no_match(self.overloads.name(), NO_ARGUMENT_MATCH))?;

        construct(bridge, &self.host_type, &self.instance_type, ctor, &sources, args)
    }

    fn repr(&self, _bridge: &Bridge, this: GuestHandle) -> String {
        match self.selected.get().and_then(|i| self.overloads.get(i)) {
            Some(ctor) => format!(
                "<constructor {}{} at {}>",
                self.host_type.full_name(),
                ctor.signature(),
                this
            ),
            None => format!("<constructors of {} at {}>", self.host_type.full_name(), this),
        }
    }
}
