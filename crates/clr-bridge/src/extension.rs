//! Native-Implemented Guest Types
//!
//! Every guest object the bridge creates is paired with a native record
//! implementing [`ExtensionType`]. The record lives in the bridge's
//! [`HandleRegistry`](crate::HandleRegistry); the guest object carries the
//! record's token in its magic slot. Guest slot calls (attribute access,
//! call, subscript, repr, deallocation) are dispatched by the
//! [`Bridge`] to the record found through that token.
//!
//! A capability a record does not override produces the guest's standard
//! "unsupported operation" error.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::guest::{CallArgs, GuestHandle, GuestTypeRef, GuestValue};

/// Message raised for attribute assignment on read-only extension objects
pub const INVALID_SETATTR: &str = "Invalid attempt to set attribute";

/// Shared handle to a native record stored in the registry
pub type NativeRecord = Rc<dyn ExtensionType>;

/// Contract of a native-implemented guest type.
///
/// Methods receive the bridge mutably so they can allocate, resolve and
/// release guest objects; the record itself uses interior mutability for
/// its own state.
pub trait ExtensionType: fmt::Debug {
    /// Guest-visible type name
    fn type_name(&self) -> &str;

    /// Upcast for downcasting to the concrete record type
    fn as_any(&self) -> &dyn Any;

    /// `tp_getattro`: returns a value owning one reference per handle.
    ///
    /// The default looks in the instance attribute table.
    fn get_attribute(
        &self,
        bridge: &mut Bridge,
        this: GuestHandle,
        name: &str,
    ) -> BridgeResult<GuestValue> {
        generic_get_attribute(bridge, this, name)?.ok_or_else(|| BridgeError::not_found(name))
    }

    /// `tp_setattro`: the value is borrowed; implementations take their own reference
    fn set_attribute(
        &self,
        _bridge: &mut Bridge,
        _this: GuestHandle,
        _name: &str,
        _value: &GuestValue,
    ) -> BridgeResult<()> {
        Err(BridgeError::type_error(INVALID_SETATTR))
    }

    /// `tp_call`
    fn call(
        &self,
        _bridge: &mut Bridge,
        _this: GuestHandle,
        _args: &CallArgs,
    ) -> BridgeResult<GuestValue> {
        Err(BridgeError::unsupported(self.type_name(), "calls"))
    }

    /// `mp_subscript`
    fn subscript(
        &self,
        _bridge: &mut Bridge,
        _this: GuestHandle,
        _key: &GuestValue,
    ) -> BridgeResult<GuestValue> {
        Err(BridgeError::unsupported(self.type_name(), "subscripting"))
    }

    /// `tp_descr_get`: produce the value seen when this object is read as
    /// an attribute of `owner`. `None` means the object is not a descriptor.
    fn descriptor_get(
        &self,
        _bridge: &mut Bridge,
        _this: GuestHandle,
        _owner: GuestHandle,
    ) -> BridgeResult<Option<GuestValue>> {
        Ok(None)
    }

    /// `tp_repr`
    fn repr(&self, _bridge: &Bridge, this: GuestHandle) -> String {
        format!("<{} object at {}>", self.type_name(), this)
    }

    /// `tp_dealloc`: runs once, after the record has left the registry and
    /// before the guest object's memory is reclaimed.
    fn deallocate(&self, _bridge: &mut Bridge, _this: GuestHandle) {}
}

impl<'a> dyn ExtensionType + 'a {
    /// Downcast to a concrete record type
    pub fn downcast_ref<T: ExtensionType + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Instance-dictionary attribute lookup shared by every extension type.
///
/// Returns `None` on a miss; a hit is returned with a new reference.
pub fn generic_get_attribute(
    bridge: &mut Bridge,
    this: GuestHandle,
    name: &str,
) -> BridgeResult<Option<GuestValue>> {
    let Some(value) = bridge.heap().dict_get(this, name).cloned() else {
        return Ok(None);
    };
    bridge.incref_value(&value)?;
    Ok(Some(value))
}

/// Allocate a guest object of `ty` and pair it with `record`.
///
/// Returns the handle with one caller-owned reference. If the record cannot
/// be registered the freshly allocated object is released again, so no
/// half-initialized object or dangling token survives a failure.
pub(crate) fn register(
    bridge: &mut Bridge,
    ty: &GuestTypeRef,
    record: NativeRecord,
) -> BridgeResult<GuestHandle> {
    let handle = bridge.heap_mut().alloc(ty)?;
    attach(bridge, handle, record)?;
    Ok(handle)
}

/// Pair an already allocated guest object with `record`.
///
/// On failure the object is freed without running any hook.
pub(crate) fn attach(
    bridge: &mut Bridge,
    handle: GuestHandle,
    record: NativeRecord,
) -> BridgeResult<()> {
    let token = match bridge.registry_mut().alloc(record) {
        Ok(token) => token,
        Err(err) => {
            warn!(handle = %handle, error = %err, "registration failed, releasing guest object");
            bridge.heap_mut().free(handle);
            return Err(err);
        }
    };

    if let Err(err) = bridge.heap_mut().set_magic(handle, token) {
        bridge.registry_mut().free(token);
        return Err(err);
    }
    Ok(())
}
