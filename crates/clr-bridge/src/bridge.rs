//! Bridge Context
//!
//! [`Bridge`] ties the guest heap, the handle registry, the class manager,
//! the assembly registry and the root module together, and is the single
//! entry point through which the embedding guest runtime reaches native
//! records.
//!
//! ## Reference Ownership
//!
//! Values returned by bridge operations own one reference per guest handle
//! they contain; give them back with [`Bridge::release`]. Values passed in
//! (call arguments, subscript keys, assigned values) are borrowed.
//!
//! ## Slot Entry Points
//!
//! The `slot_*` methods follow the guest runtime's calling protocol: on
//! failure they set the guest error indicator and return `None`.

use std::fmt;
use std::path::PathBuf;

use smol_str::SmolStr;
use tracing::{debug, trace, warn};

use crate::assembly::AssemblyRegistry;
use crate::binding::ManagedObjectBinding;
use crate::classes::ClassManager;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, GuestException};
use crate::extension::NativeRecord;
use crate::guest::{
    BuiltinTypes, CallArgs, GuestHandle, GuestHeap, GuestTypeRef, GuestValue, BASE_EXCEPTION_TYPE,
    MODULE_TYPE,
};
use crate::host::{HostRef, HostTypeRef};
use crate::lock::{self, LockGuard};
use crate::registry::{HandleRegistry, RegistryStats};
use crate::root::{self, BridgeRoot};

/// The object bridge
pub struct Bridge {
    config: BridgeConfig,
    heap: GuestHeap,
    registry: HandleRegistry<NativeRecord>,
    classes: ClassManager,
    assemblies: Box<dyn AssemblyRegistry>,
    types: BuiltinTypes,
    root: Option<GuestHandle>,
    lock: LockGuard,
}

impl Bridge {
    /// Start a bridge over `assemblies`.
    ///
    /// Marks the guest runtime initialized, takes the execution lock for
    /// the bridge's lifetime and creates the root module.
    pub fn new(
        config: BridgeConfig,
        assemblies: impl AssemblyRegistry + 'static,
    ) -> BridgeResult<Self> {
        config.validate()?;
        lock::initialize_runtime();
        let lock = LockGuard::acquire()?;

        let heap = match config.max_objects {
            Some(max) => GuestHeap::with_capacity_limit(max),
            None => GuestHeap::new(),
        };
        let registry = match config.max_handles {
            Some(max) => HandleRegistry::with_capacity_limit(max),
            None => HandleRegistry::new(),
        };

        let mut bridge = Self {
            config,
            heap,
            registry,
            classes: ClassManager::new(),
            assemblies: Box::new(assemblies),
            types: BuiltinTypes::new(),
            root: None,
            lock,
        };

        let root = BridgeRoot::create(&mut bridge)?;
        bridge.root = Some(root);
        debug!(root = %root, "bridge started");
        Ok(bridge)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Guest heap
    pub fn heap(&self) -> &GuestHeap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut GuestHeap {
        &mut self.heap
    }

    /// Native record registry
    pub fn registry(&self) -> &HandleRegistry<NativeRecord> {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut HandleRegistry<NativeRecord> {
        &mut self.registry
    }

    /// Reflected host types
    pub fn classes(&self) -> &ClassManager {
        &self.classes
    }

    pub(crate) fn classes_mut(&mut self) -> &mut ClassManager {
        &mut self.classes
    }

    /// Builtin guest types
    pub fn types(&self) -> &BuiltinTypes {
        &self.types
    }

    /// Assembly registry
    pub fn assemblies(&self) -> &dyn AssemblyRegistry {
        self.assemblies.as_ref()
    }

    /// The root module (borrowed handle)
    pub fn root(&self) -> BridgeResult<GuestHandle> {
        self.root.ok_or(BridgeError::RuntimeNotInitialized)
    }

    /// Import the root module: the root with a new reference
    pub fn import_root(&mut self) -> BridgeResult<GuestValue> {
        let root = self.root()?;
        self.incref(root)?;
        Ok(GuestValue::Object(root))
    }

    /// Native record paired with a guest object
    pub fn record(&self, handle: GuestHandle) -> Option<NativeRecord> {
        let token = self.heap.magic(handle)?;
        self.registry.get(token).cloned()
    }

    fn dispatch(&self, handle: GuestHandle, operation: &'static str) -> BridgeResult<NativeRecord> {
        if let Some(record) = self.record(handle) {
            return Ok(record);
        }
        match self.heap.type_of(handle) {
            Some(ty) => Err(BridgeError::unsupported(ty.name(), operation)),
            None => Err(BridgeError::invalid_handle(format!("{} on {}", operation, handle))),
        }
    }

    // ========================================================================
    // Object Protocol
    // ========================================================================

    /// `getattr(obj, name)`
    pub fn getattr(&mut self, handle: GuestHandle, name: &str) -> BridgeResult<GuestValue> {
        trace!(handle = %handle, name, "getattr");
        if self.record(handle).is_none() && self.heap.is_live(handle) {
            return crate::extension::generic_get_attribute(self, handle, name)?
                .ok_or_else(|| BridgeError::not_found(name));
        }
        let record = self.dispatch(handle, "attribute access")?;
        record.get_attribute(self, handle, name)
    }

    /// `getattr(obj, key)` with an arbitrary guest key
    pub fn getattr_value(&mut self, handle: GuestHandle, key: &GuestValue) -> BridgeResult<GuestValue> {
        let name = key
            .as_str()
            .ok_or_else(|| BridgeError::type_error("string expected"))?;
        self.getattr(handle, name)
    }

    /// `setattr(obj, name, value)`
    pub fn setattr(
        &mut self,
        handle: GuestHandle,
        name: &str,
        value: &GuestValue,
    ) -> BridgeResult<()> {
        let record = self.dispatch(handle, "attribute assignment")?;
        record.set_attribute(self, handle, name, value)
    }

    /// `obj(*args, **kwargs)`
    pub fn call(&mut self, handle: GuestHandle, args: &CallArgs) -> BridgeResult<GuestValue> {
        let record = self.dispatch(handle, "calls")?;
        record.call(self, handle, args)
    }

    /// `obj[key]`
    pub fn subscript(&mut self, handle: GuestHandle, key: &GuestValue) -> BridgeResult<GuestValue> {
        let record = self.dispatch(handle, "subscripting")?;
        record.subscript(self, handle, key)
    }

    /// `repr(obj)`
    pub fn repr(&self, handle: GuestHandle) -> BridgeResult<String> {
        let record = self.dispatch(handle, "repr")?;
        Ok(record.repr(self, handle))
    }

    /// Check whether the object passes the guest runtime's module check
    pub fn is_module(&self, handle: GuestHandle) -> bool {
        self.heap
            .type_of(handle)
            .is_some_and(|ty| ty.is_subtype_of(MODULE_TYPE))
    }

    /// Check whether the object can be raised as a guest exception class
    pub fn is_exception_class(&self, handle: GuestHandle) -> bool {
        self.heap
            .type_of(handle)
            .is_some_and(|ty| ty.is_subtype_of(BASE_EXCEPTION_TYPE))
    }

    // ========================================================================
    // Reference Counting
    // ========================================================================

    /// Take a new reference
    pub fn incref(&mut self, handle: GuestHandle) -> BridgeResult<()> {
        self.heap.incref(handle)
    }

    /// Take a new reference to every handle in `value`
    pub fn incref_value(&mut self, value: &GuestValue) -> BridgeResult<()> {
        let mut handles = Vec::new();
        value.collect_handles(&mut handles);
        for handle in handles {
            self.heap.incref(handle)?;
        }
        Ok(())
    }

    /// Drop a reference, deallocating the object when it was the last one
    pub fn decref(&mut self, handle: GuestHandle) -> BridgeResult<()> {
        let mut pending = vec![handle];
        while let Some(handle) = pending.pop() {
            if self.heap.decref(handle)? {
                self.deallocate(handle, &mut pending);
            }
        }
        Ok(())
    }

    /// Give back every reference held by `value`
    pub fn release(&mut self, value: GuestValue) -> BridgeResult<()> {
        let mut handles = Vec::new();
        value.collect_handles(&mut handles);
        for handle in handles {
            self.decref(handle)?;
        }
        Ok(())
    }

    /// Run the deallocation hook and reclaim the object's memory.
    ///
    /// Handles referenced from the object's attribute table are queued on
    /// `pending` for their own decref.
    fn deallocate(&mut self, handle: GuestHandle, pending: &mut Vec<GuestHandle>) {
        trace!(handle = %handle, "deallocating");

        if let Some(token) = self.heap.take_magic(handle) {
            match self.registry.free(token) {
                Some(record) => record.deallocate(self, handle),
                None => warn!(handle = %handle, token = %token, "native record already freed"),
            }
        }

        if let Some(freed) = self.heap.free(handle) {
            for value in freed.dict.iter().flat_map(|dict| dict.values()) {
                value.collect_handles(pending);
            }
        }
    }

    // ========================================================================
    // Host Objects
    // ========================================================================

    /// Guest object reflecting `instance`, typed by its own host type
    pub fn wrap_instance(&mut self, instance: HostRef) -> BridgeResult<GuestValue> {
        let host_type = instance.host_type().clone();
        ClassManager::get_class(self, &host_type)?;
        let ty = self
            .classes
            .instance_type(host_type.full_name())
            .ok_or_else(|| BridgeError::allocation(host_type.full_name(), "type not reflected"))?;
        self.wrap_instance_as(instance, &ty)
    }

    /// Guest object reflecting `instance` as an instance of `ty`
    pub fn wrap_instance_as(
        &mut self,
        instance: HostRef,
        ty: &GuestTypeRef,
    ) -> BridgeResult<GuestValue> {
        let handle = ManagedObjectBinding::create(self, instance, ty)?;
        Ok(GuestValue::Object(handle))
    }

    /// Host instance behind a bound guest object
    pub fn host_instance(&self, handle: GuestHandle) -> BridgeResult<HostRef> {
        let record = self.dispatch(handle, "host conversion")?;
        let binding = record.downcast_ref::<ManagedObjectBinding>().ok_or_else(|| {
            BridgeError::type_error(format!(
                "'{}' object is not a host instance",
                record.type_name()
            ))
        })?;
        binding.instance()
    }

    /// Guest class object for `ty`, with a new reference
    pub fn class_object(&mut self, ty: &HostTypeRef) -> BridgeResult<GuestValue> {
        let class = ClassManager::exposed_class(self, ty)?;
        self.incref(class)?;
        Ok(GuestValue::Object(class))
    }

    // ========================================================================
    // Root Module
    // ========================================================================

    /// Current value of the root's `preload` flag
    pub fn preload(&self) -> bool {
        self.root
            .is_some_and(|handle| root::read_preload(self, handle))
    }

    /// Set the root's `preload` flag
    pub fn set_preload(&mut self, preload: bool) -> BridgeResult<()> {
        let handle = self.root()?;
        root::write_preload(self, handle, &GuestValue::Bool(preload))
    }

    /// `clr.AddReference(name)`: returns the loaded assembly's full name
    pub fn add_reference(&mut self, name: &str) -> BridgeResult<SmolStr> {
        let handle = self.root()?;
        Ok(root::add_reference(self, handle, name)?.name)
    }

    /// `clr.FindAssembly(name)`
    pub fn find_assembly(&mut self, name: &str) -> Option<PathBuf> {
        self.with_assemblies_unlocked(|assemblies| assemblies.find_assembly(name))
    }

    /// `clr.ListAssemblies(verbose)`
    pub fn list_assemblies(&self, verbose: bool) -> Vec<SmolStr> {
        root::assembly_names(self.assemblies.list_assemblies(), verbose)
    }

    /// Implicitly load assemblies for `qualified_name`
    pub(crate) fn load_implicit(&mut self, qualified_name: &str) -> bool {
        self.with_assemblies_unlocked(|assemblies| assemblies.load_implicit(qualified_name))
    }

    /// Run blocking assembly registry work, releasing the execution lock
    /// for its duration when configured to.
    pub(crate) fn with_assemblies_unlocked<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce(&mut dyn AssemblyRegistry) -> T,
    {
        let assemblies = self.assemblies.as_mut();
        if self.config.release_lock_for_io {
            self.lock.allow_threads(|| f(assemblies))
        } else {
            f(assemblies)
        }
    }

    // ========================================================================
    // Slot Entry Points
    // ========================================================================

    /// Convert a failed result into the guest error indicator
    pub fn slot<T>(&mut self, result: BridgeResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(error = %err, "raising guest exception");
                self.heap.set_error(err.guest_exception());
                None
            }
        }
    }

    /// `tp_getattro`
    pub fn slot_getattr(&mut self, handle: GuestHandle, key: &GuestValue) -> Option<GuestValue> {
        let result = self.getattr_value(handle, key);
        self.slot(result)
    }

    /// `tp_setattro`
    pub fn slot_setattr(
        &mut self,
        handle: GuestHandle,
        key: &GuestValue,
        value: &GuestValue,
    ) -> Option<()> {
        let result = key
            .as_str()
            .ok_or_else(|| BridgeError::type_error("string expected"))
            .and_then(|name| self.setattr(handle, name, value));
        self.slot(result)
    }

    /// `tp_call`
    pub fn slot_call(&mut self, handle: GuestHandle, args: &CallArgs) -> Option<GuestValue> {
        let result = self.call(handle, args);
        self.slot(result)
    }

    /// `mp_subscript`
    pub fn slot_subscript(&mut self, handle: GuestHandle, key: &GuestValue) -> Option<GuestValue> {
        let result = self.subscript(handle, key);
        self.slot(result)
    }

    /// `tp_repr`
    pub fn slot_repr(&mut self, handle: GuestHandle) -> Option<String> {
        let result = self.repr(handle);
        self.slot(result)
    }

    /// Take the pending guest exception
    pub fn take_error(&mut self) -> Option<GuestException> {
        self.heap.take_error()
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Current usage statistics
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            live_objects: self.heap.live_objects(),
            registry: self.registry.stats(),
            reflected_types: self.classes.len(),
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("root", &self.root)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Bridge usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Live guest objects
    pub live_objects: usize,
    /// Native record registry usage
    pub registry: RegistryStats,
    /// Host types reflected so far
    pub reflected_types: usize,
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bridge Stats: objects={}, types={}, {}",
            self.live_objects, self.reflected_types, self.registry
        )
    }
}
