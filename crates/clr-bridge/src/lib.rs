//! # CLR Bridge
//!
//! Object bridge between a refcounted guest interpreter and a garbage-collected
//! reflection host.
//!
//! Guest code imports a root module and walks host namespaces as if they were
//! guest modules; host types appear as guest classes, host instances as guest
//! objects, and host constructors as callables with overload resolution.
//!
//! ## Overview
//!
//! This crate provides:
//! - A handle registry pairing guest objects with native records, so no host
//!   reference is ever smuggled through the guest heap
//! - Guest objects bound to host instances, released exactly once
//! - Lazily populated, cached namespace modules with implicit assembly loading
//! - Constructor overload resolution, implicit by argument and explicit by
//!   signature (`Class.__overloads__[Int32, String](...)`)
//! - The root module with `AddReference`, `FindAssembly`, `ListAssemblies` and
//!   the `preload` flag
//! - Execution-lock management around blocking assembly I/O
//!
//! ## Ownership Model
//!
//! Every guest value returned from the [`Bridge`] owns one reference per
//! object handle it contains; arguments passed in are borrowed. Native
//! records never outlive their guest object: the registry entry is freed in
//! the object's deallocation, before its memory is reclaimed.
//!
//! ## Example
//!
//! ```
//! use clr_bridge::{Bridge, BridgeConfig, CallArgs, GuestValue, HostType, StaticAssembly,
//!     StaticAssemblyRegistry};
//!
//! let registry = StaticAssemblyRegistry::new()
//!     .with_loaded(StaticAssembly::new("Acme.Core").with_type(HostType::builder("Acme", "Widget").build()));
//! let mut bridge = Bridge::new(BridgeConfig::default(), registry).unwrap();
//!
//! let clr = bridge.root().unwrap();
//! let acme = bridge.getattr(clr, "Acme").unwrap();
//! let widget = bridge.getattr(acme.as_object().unwrap(), "Widget").unwrap();
//! assert_eq!(bridge.repr(widget.as_object().unwrap()).unwrap(), "<class 'Acme.Widget'>");
//! ```
//!
//! ## Module Structure
//!
//! - [`bridge`]: The bridge context and guest slot entry points
//! - [`registry`]: Handle registry for native records
//! - [`extension`]: Native-implemented guest type contract
//! - [`binding`]: Guest objects bound to host instances
//! - [`classes`]: Reflected host classes and exception wrappers
//! - [`constructors`]: `__overloads__` descriptor and explicit constructor selection
//! - [`overload`]: Overload resolution
//! - [`marshal`]: Guest-to-host argument conversion
//! - [`namespace`]: Lazily populated namespace modules
//! - [`root`]: The root module
//! - [`assembly`]: Assembly registry interface
//! - [`host`]: Host reflection model
//! - [`guest`]: Guest runtime model
//! - [`lock`]: Execution lock management
//! - [`config`]: Bridge configuration
//! - [`error`]: Error types

pub mod assembly;
pub mod binding;
pub mod bridge;
pub mod classes;
pub mod config;
pub mod constructors;
pub mod error;
pub mod extension;
pub mod guest;
pub mod host;
pub mod lock;
pub mod marshal;
pub mod namespace;
pub mod overload;
pub mod registry;
pub mod root;

// Re-export main types for convenience
pub use assembly::{AssemblyInfo, AssemblyRegistry, StaticAssembly, StaticAssemblyRegistry};
pub use binding::ManagedObjectBinding;
pub use bridge::{Bridge, BridgeStats};
pub use classes::{ClassManager, ExceptionWrapper, TypeWrapper};
pub use config::BridgeConfig;
pub use constructors::{Constructors, CtorMapper};
pub use error::{BridgeDiagnostic, BridgeError, BridgeResult, GuestException, GuestExceptionKind};
pub use extension::{ExtensionType, NativeRecord};
pub use guest::{CallArgs, GuestHandle, GuestValue};
pub use host::{
    Constructor, HostArg, HostError, HostInstance, HostRef, HostType, HostTypeRef, Parameter,
    Primitive, Signature, TypeKind,
};
pub use lock::{LockGuard, LockState};
pub use namespace::NamespaceNode;
pub use overload::{ArgShape, OverloadResolver, OverloadSet, Resolution};
pub use registry::{HandleRegistry, RegistryToken};
pub use root::BridgeRoot;
