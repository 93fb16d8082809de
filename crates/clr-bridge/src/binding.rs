//! Managed Object Binding
//!
//! A [`ManagedObjectBinding`] wraps one host object instance inside one
//! guest object. It owns the strong host reference for exactly as long as
//! the guest object lives: the reference is taken in [`create`] and given
//! up in the deallocation hook, never earlier and never twice.
//!
//! [`create`]: ManagedObjectBinding::create

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::extension::{self, ExtensionType};
use crate::guest::{GuestHandle, GuestTypeRef, TypeFlags};
use crate::host::{HostRef, HostTypeRef};

/// Native record of a guest object that reflects a host instance
#[derive(Debug)]
pub struct ManagedObjectBinding {
    instance: RefCell<Option<HostRef>>,
    host_type: HostTypeRef,
    guest_type: GuestTypeRef,
}

impl ManagedObjectBinding {
    /// Wrap `instance` in a new guest object of type `ty`.
    ///
    /// Types derived in guest code get an instance attribute table; an
    /// existing table is kept. The returned handle carries one reference
    /// owned by the caller.
    pub fn create(
        bridge: &mut Bridge,
        instance: HostRef,
        ty: &GuestTypeRef,
    ) -> BridgeResult<GuestHandle> {
        let handle = bridge.heap_mut().alloc(ty)?;

        if ty.has_flag(TypeFlags::SUBCLASS) {
            if let Err(err) = bridge.heap_mut().ensure_dict(handle) {
                bridge.heap_mut().free(handle);
                return Err(err);
            }
        }

        let host_type = instance.host_type().clone();
        let record = Rc::new(Self {
            instance: RefCell::new(Some(instance)),
            host_type,
            guest_type: ty.clone(),
        });
        extension::attach(bridge, handle, record)?;

        debug!(handle = %handle, guest_type = ty.name(), "bound host instance");
        Ok(handle)
    }

    /// The wrapped host instance.
    ///
    /// Fails once the binding has been deallocated.
    pub fn instance(&self) -> BridgeResult<HostRef> {
        self.instance
            .borrow()
            .clone()
            .ok_or_else(|| BridgeError::invalid_handle("host instance already released"))
    }

    /// Runtime host type of the wrapped instance
    pub fn host_type(&self) -> &HostTypeRef {
        &self.host_type
    }

    /// Guest type the instance was bound as
    pub fn guest_type(&self) -> &GuestTypeRef {
        &self.guest_type
    }

    /// Check whether the host reference has been given up
    pub fn is_released(&self) -> bool {
        self.instance.borrow().is_none()
    }
}

impl ExtensionType for ManagedObjectBinding {
    fn type_name(&self) -> &str {
        self.guest_type.name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self, _bridge: &Bridge, this: GuestHandle) -> String {
        format!("<{} object at {}>", self.host_type.full_name(), this)
    }

    fn deallocate(&self, _bridge: &mut Bridge, this: GuestHandle) {
        match self.instance.borrow_mut().take() {
            Some(instance) => {
                debug!(handle = %this, host_type = instance.host_type().full_name(), "released host instance");
                drop(instance);
            }
            None => warn!(handle = %this, "binding already torn down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{StaticAssembly, StaticAssemblyRegistry};
    use crate::config::BridgeConfig;
    use crate::host::{HostInstance, HostType};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn bridge_with(ty: &HostTypeRef) -> Bridge {
        let registry = StaticAssemblyRegistry::new()
            .with_loaded(StaticAssembly::new("Acme.Core").with_type(ty.clone()));
        Bridge::new(BridgeConfig::default(), registry).unwrap()
    }

    #[test]
    fn test_second_teardown_is_a_no_op() {
        let ty = HostType::builder("Acme", "Widget").build();
        let mut bridge = bridge_with(&ty);
        let instance = HostInstance::new(ty, Box::new(7_i64));
        let observer = Arc::clone(&instance);

        let handle = bridge.wrap_instance(instance).unwrap().as_object().unwrap();
        assert_eq!(Arc::strong_count(&observer), 2);

        let record = bridge.record(handle).unwrap();
        record.deallocate(&mut bridge, handle);
        assert_eq!(Arc::strong_count(&observer), 1);

        record.deallocate(&mut bridge, handle);
        assert_eq!(Arc::strong_count(&observer), 1);

        let binding = record.downcast_ref::<ManagedObjectBinding>().unwrap();
        assert!(binding.is_released());
        assert!(binding.instance().is_err());
    }
}
