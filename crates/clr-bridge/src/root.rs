//! Root Module
//!
//! [`BridgeRoot`] is the namespace node guest code imports first (`clr` by
//! default). It resolves top-level namespaces like any other node, and in
//! addition exposes a fixed table of members:
//!
//! - `AddReference(name)`: load an assembly by path or name
//! - `FindAssembly(name)`: locate an assembly without loading it
//! - `ListAssemblies(verbose)`: names of the loaded assemblies
//! - `preload`: read/write flag for eager namespace population
//!
//! The root's guest type is made to pass the guest runtime's module check
//! the first time a root is created. Guest type objects belong to one
//! [`Bridge`], so the patch is applied once per bridge; creating another
//! root on the same bridge leaves the base list untouched.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::assembly::{short_name, AssemblyInfo};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::extension::{self, ExtensionType, INVALID_SETATTR};
use crate::guest::{CallArgs, GuestHandle, GuestValue};
use crate::namespace::NamespaceNode;

/// Name of the root's preload flag in its backing dict
pub const PRELOAD: &str = "preload";

/// Body of a function exposed on the root
pub type RootFunction = fn(&mut Bridge, GuestHandle, &CallArgs) -> BridgeResult<GuestValue>;

/// Getter of a property exposed on the root
pub type PropertyGetter = fn(&Bridge, GuestHandle) -> GuestValue;

/// Setter of a property exposed on the root
pub type PropertySetter = fn(&mut Bridge, GuestHandle, &GuestValue) -> BridgeResult<()>;

/// One entry of the root's member table
#[derive(Clone, Copy)]
pub enum ExposedMember {
    /// Callable, bound to the root on attribute access
    Function(RootFunction),
    /// Value read through `get`; writable when `set` is present
    Property {
        get: PropertyGetter,
        set: Option<PropertySetter>,
    },
}

impl fmt::Debug for ExposedMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposedMember::Function(_) => write!(f, "Function"),
            ExposedMember::Property { set, .. } => f
                .debug_struct("Property")
                .field("writable", &set.is_some())
                .finish(),
        }
    }
}

fn member_table() -> IndexMap<SmolStr, ExposedMember> {
    let mut members = IndexMap::new();
    members.insert("AddReference".into(), ExposedMember::Function(add_reference_fn));
    members.insert("FindAssembly".into(), ExposedMember::Function(find_assembly_fn));
    members.insert("ListAssemblies".into(), ExposedMember::Function(list_assemblies_fn));
    members.insert(
        PRELOAD.into(),
        ExposedMember::Property {
            get: preload_getter,
            set: Some(write_preload),
        },
    );
    members
}

// ============================================================================
// BridgeRoot
// ============================================================================

/// The root namespace node
#[derive(Debug)]
pub struct BridgeRoot {
    node: NamespaceNode,
    members: IndexMap<SmolStr, ExposedMember>,
}

impl BridgeRoot {
    /// Create the root module object.
    ///
    /// Returns the handle with one reference, owned by the bridge.
    pub(crate) fn create(bridge: &mut Bridge) -> BridgeResult<GuestHandle> {
        let module_name = bridge.config().root_module_name.clone();
        let types = bridge.types().clone();

        if types.root.extend_bases(&types.module) {
            info!(module = %module_name, "root type patched to pass module checks");
        }

        let root = Rc::new(Self {
            node: NamespaceNode::new(module_name.clone(), ""),
            members: member_table(),
        });
        let handle = NamespaceNode::create(bridge, &types.root, root, &module_name)?;

        let preload = bridge.config().initial_preload();
        write_preload(bridge, handle, &GuestValue::Bool(preload))?;
        debug!(module = %module_name, preload, "root module created");
        Ok(handle)
    }

    /// The underlying namespace node
    pub fn node(&self) -> &NamespaceNode {
        &self.node
    }

    /// Names of the exposed members, in registration order
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(|k| k.as_str())
    }
}

impl ExtensionType for BridgeRoot {
    fn type_name(&self) -> &str {
        "CLRModule"
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
        if let Some(value) = extension::generic_get_attribute(bridge, this, name)? {
            return Ok(value);
        }

        match self.members.get(name) {
            Some(ExposedMember::Function(function)) => {
                let bound = BuiltinFunction::create(bridge, this, name, *function)?;
                return Ok(GuestValue::Object(bound));
            }
            Some(ExposedMember::Property { get, .. }) => return Ok(get(bridge, this)),
            None => {}
        }

        self.node
            .module_getattr(bridge, this, name)?
            .ok_or_else(|| BridgeError::not_found(name))
    }

    fn set_attribute(
        &self,
        bridge: &mut Bridge,
        this: GuestHandle,
        name: &str,
        value: &GuestValue,
    ) -> BridgeResult<()> {
        match self.members.get(name) {
            Some(ExposedMember::Property { set: Some(set), .. }) => set(bridge, this, value),
            _ => Err(BridgeError::type_error(INVALID_SETATTR)),
        }
    }

    fn repr(&self, _bridge: &Bridge, _this: GuestHandle) -> String {
        format!("<module '{}'>", self.node.module_name())
    }
}

// ============================================================================
// Preload Flag
// ============================================================================

/// Read the preload flag; a missing entry reads as `false`
pub(crate) fn read_preload(bridge: &Bridge, root: GuestHandle) -> bool {
    bridge
        .heap()
        .dict_get(root, PRELOAD)
        .is_some_and(GuestValue::is_truthy)
}

fn preload_getter(bridge: &Bridge, root: GuestHandle) -> GuestValue {
    GuestValue::Bool(read_preload(bridge, root))
}

/// Store the truthiness of `value` as the preload flag
pub(crate) fn write_preload(
    bridge: &mut Bridge,
    root: GuestHandle,
    value: &GuestValue,
) -> BridgeResult<()> {
    let flag = GuestValue::Bool(value.is_truthy());
    let previous = bridge
        .heap_mut()
        .dict_mut(root)
        .ok_or_else(|| BridgeError::invalid_handle(format!("root dict of {}", root)))?
        .insert(SmolStr::new(PRELOAD), flag);
    if let Some(previous) = previous {
        bridge.release(previous)?;
    }
    Ok(())
}

// ============================================================================
// Exposed Functions
// ============================================================================

/// The single argument of a one-parameter root function
fn single_argument<'a>(
    args: &'a CallArgs,
    function: &str,
    param: &str,
) -> BridgeResult<Option<&'a GuestValue>> {
    if args.len() > 1 {
        return Err(BridgeError::type_error(format!(
            "{}() takes at most 1 argument ({} given)",
            function,
            args.len()
        )));
    }
    if let Some((name, _)) = args.keywords.first() {
        if name != param {
            return Err(BridgeError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, name
            )));
        }
    }
    Ok(args.positional.first().or_else(|| args.keywords.get(param)))
}

fn string_argument<'a>(args: &'a CallArgs, function: &str) -> BridgeResult<&'a str> {
    single_argument(args, function, "name")?
        .and_then(GuestValue::as_str)
        .ok_or_else(|| BridgeError::type_error(format!("{}() argument must be a string", function)))
}

fn add_reference_fn(
    bridge: &mut Bridge,
    root: GuestHandle,
    args: &CallArgs,
) -> BridgeResult<GuestValue> {
    let name = string_argument(args, "AddReference")?;
    let info = add_reference(bridge, root, name)?;
    Ok(GuestValue::Str(info.name))
}

fn find_assembly_fn(
    bridge: &mut Bridge,
    _root: GuestHandle,
    args: &CallArgs,
) -> BridgeResult<GuestValue> {
    let name = string_argument(args, "FindAssembly")?;
    Ok(match bridge.find_assembly(name) {
        Some(path) => GuestValue::str(path.to_string_lossy().into_owned()),
        None => GuestValue::None,
    })
}

fn list_assemblies_fn(
    bridge: &mut Bridge,
    _root: GuestHandle,
    args: &CallArgs,
) -> BridgeResult<GuestValue> {
    let verbose = single_argument(args, "ListAssemblies", "verbose")?
        .is_some_and(GuestValue::is_truthy);
    let names = bridge
        .list_assemblies(verbose)
        .into_iter()
        .map(GuestValue::Str)
        .collect();
    Ok(GuestValue::Tuple(names))
}

/// Load an assembly and make its top-level namespaces visible on the root.
///
/// Tries, in order, a path refresh, loading by path, and loading by name.
pub(crate) fn add_reference(
    bridge: &mut Bridge,
    root: GuestHandle,
    name: &str,
) -> BridgeResult<AssemblyInfo> {
    let info = bridge
        .with_assemblies_unlocked(|assemblies| {
            assemblies.update_path();
            assemblies
                .load_assembly_by_path(name)
                .or_else(|| assemblies.load_assembly(name))
        })
        .ok_or_else(|| BridgeError::import(name))?;
    info!(assembly = %info.name, "reference added");

    let record = bridge
        .record(root)
        .ok_or_else(|| BridgeError::invalid_handle(format!("root {}", root)))?;
    let root_node = record
        .downcast_ref::<BridgeRoot>()
        .map(BridgeRoot::node)
        .ok_or_else(|| BridgeError::invalid_handle(format!("root {}", root)))?;

    for namespace in &info.namespaces {
        let first = namespace.split('.').next().unwrap_or(namespace.as_str());
        root_node.get_attribute(bridge, root, first, true)?;
    }
    if read_preload(bridge, root) {
        root_node.load_names(bridge, root)?;
    }
    Ok(info)
}

/// Short or full names of the loaded assemblies
pub(crate) fn assembly_names(names: Vec<SmolStr>, verbose: bool) -> Vec<SmolStr> {
    if verbose {
        names
    } else {
        names.iter().map(|n| SmolStr::new(short_name(n))).collect()
    }
}

// ============================================================================
// BuiltinFunction
// ============================================================================

/// A root function bound to its module, as returned by attribute access
pub struct BuiltinFunction {
    owner: GuestHandle,
    name: SmolStr,
    function: RootFunction,
}

impl BuiltinFunction {
    /// Bind `function` to `owner`; the new object holds a reference to it
    fn create(
        bridge: &mut Bridge,
        owner: GuestHandle,
        name: &str,
        function: RootFunction,
    ) -> BridgeResult<GuestHandle> {
        bridge.incref(owner)?;
        let record = Rc::new(Self {
            owner,
            name: SmolStr::new(name),
            function,
        });
        let ty = bridge.types().builtin_function.clone();
        match extension::register(bridge, &ty, record) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                bridge.decref(owner)?;
                Err(err)
            }
        }
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

impl ExtensionType for BuiltinFunction {
    fn type_name(&self) -> &str {
        "builtin_function_or_method"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(
        &self,
        bridge: &mut Bridge,
        _this: GuestHandle,
        args: &CallArgs,
    ) -> BridgeResult<GuestValue> {
        (self.function)(bridge, self.owner, args)
    }

    fn repr(&self, _bridge: &Bridge, _this: GuestHandle) -> String {
        format!("<built-in method {} of module object at {}>", self.name, self.owner)
    }

    fn deallocate(&self, bridge: &mut Bridge, this: GuestHandle) {
        if let Err(err) = bridge.decref(self.owner) {
            warn!(handle = %this, error = %err, "bound function lost its module");
        }
    }
}
