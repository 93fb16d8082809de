//! Host Runtime Model
//!
//! The bridge's view of the managed host runtime: reflection metadata for
//! types and constructors, and strong references to host object instances.
//!
//! ## Ownership
//!
//! A [`HostRef`] is a strong, traced reference: holding one keeps the host
//! instance alive. The bridge never hands a `HostRef` to guest code; it is
//! owned by a [`ManagedObjectBinding`](crate::ManagedObjectBinding) and
//! dropped exactly once, by the guest deallocation hook.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;
use thiserror::Error;

/// Shared reference to host type metadata
pub type HostTypeRef = Arc<HostType>;

/// Strong reference to a host object instance
pub type HostRef = Arc<HostInstance>;

/// The raw value produced by a host constructor
pub type HostValue = Box<dyn Any + Send + Sync>;

/// A host constructor body
pub type CtorThunk = Arc<dyn Fn(&[HostArg]) -> Result<HostValue, HostError> + Send + Sync>;

// ============================================================================
// Primitive Types
// ============================================================================

/// Host types with special argument-conversion rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.Byte`
    Byte,
    /// `System.Int16`
    Int16,
    /// `System.Int32`
    Int32,
    /// `System.Int64`
    Int64,
    /// `System.Single`
    Single,
    /// `System.Double`
    Double,
    /// `System.Decimal`
    Decimal,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.Type`
    Type,
}

impl Primitive {
    /// Simple type name in the `System` namespace
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Boolean => "Boolean",
            Primitive::Char => "Char",
            Primitive::Byte => "Byte",
            Primitive::Int16 => "Int16",
            Primitive::Int32 => "Int32",
            Primitive::Int64 => "Int64",
            Primitive::Single => "Single",
            Primitive::Double => "Double",
            Primitive::Decimal => "Decimal",
            Primitive::String => "String",
            Primitive::Object => "Object",
            Primitive::Type => "Type",
        }
    }

    /// Check for an integral type
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Primitive::Byte | Primitive::Int16 | Primitive::Int32 | Primitive::Int64
        )
    }

    /// Check for a floating point or decimal type
    pub fn is_real(&self) -> bool {
        matches!(self, Primitive::Single | Primitive::Double | Primitive::Decimal)
    }

    /// Check for a value type (cannot hold null)
    pub fn is_value_type(&self) -> bool {
        !matches!(self, Primitive::String | Primitive::Object | Primitive::Type)
    }

    /// Inclusive integer range, for integral types
    pub fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            Primitive::Byte => Some((u8::MIN as i64, u8::MAX as i64)),
            Primitive::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Primitive::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Primitive::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

// ============================================================================
// Host Types
// ============================================================================

/// Visibility of a host type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Visible to guest code
    Public,
    /// Hidden from namespace lookup
    NonPublic,
}

/// Kind of a host type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Reference type
    Class,
    /// Value type
    Struct,
    /// Interface, never constructible
    Interface,
    /// Enumeration
    Enum,
    /// Delegate type
    Delegate,
}

/// Full name of the host exception root
pub const EXCEPTION_TYPE: &str = "System.Exception";

/// Reflection metadata for one host type
pub struct HostType {
    namespace: SmolStr,
    name: SmolStr,
    full_name: SmolStr,
    visibility: Visibility,
    kind: TypeKind,
    primitive: Option<Primitive>,
    base: Option<HostTypeRef>,
    interfaces: Vec<HostTypeRef>,
    is_abstract: bool,
    constructors: Vec<Constructor>,
}

impl HostType {
    /// Start building a type `namespace.name`
    pub fn builder(namespace: impl Into<SmolStr>, name: impl Into<SmolStr>) -> HostTypeBuilder {
        HostTypeBuilder::new(namespace, name)
    }

    /// Metadata for a primitive `System` type
    pub fn primitive(primitive: Primitive) -> HostTypeRef {
        let kind = if primitive.is_value_type() {
            TypeKind::Struct
        } else {
            TypeKind::Class
        };
        let mut builder = HostTypeBuilder::new("System", primitive.name()).kind(kind);
        builder.primitive = Some(primitive);
        builder.build()
    }

    /// Namespace (may be empty)
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Simple name, including any generic arity suffix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace-qualified name
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Check whether the type is visible outside its assembly
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Type kind
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Primitive conversion class, if any
    pub fn primitive_kind(&self) -> Option<Primitive> {
        self.primitive
    }

    /// Base type
    pub fn base(&self) -> Option<&HostTypeRef> {
        self.base.as_ref()
    }

    /// Implemented interfaces
    pub fn interfaces(&self) -> &[HostTypeRef] {
        &self.interfaces
    }

    /// Check whether instances cannot be created directly
    pub fn is_abstract(&self) -> bool {
        self.is_abstract || self.kind == TypeKind::Interface
    }

    /// Check whether the type cannot hold null
    pub fn is_value_type(&self) -> bool {
        match self.primitive {
            Some(p) => p.is_value_type(),
            None => matches!(self.kind, TypeKind::Struct | TypeKind::Enum),
        }
    }

    /// Check whether the type is, or derives from, `System.Exception`
    pub fn is_exception(&self) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty.full_name == EXCEPTION_TYPE {
                return true;
            }
            current = ty.base.as_deref();
        }
        false
    }

    /// Declared constructors in declaration order
    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    /// Inheritance distance from this type to `target`.
    ///
    /// `Some(0)` for the same type, one step per base class; an interface
    /// counts one step past the class that implements it.
    pub fn distance_to(&self, target: &HostType) -> Option<u32> {
        let mut depth = 0;
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == target {
                return Some(depth);
            }
            if ty.interfaces.iter().any(|i| i.as_ref() == target) {
                return Some(depth + 1);
            }
            depth += 1;
            current = ty.base.as_deref();
        }
        None
    }
}

impl PartialEq for HostType {
    fn eq(&self, other: &Self) -> bool {
        self.full_name == other.full_name
    }
}

impl Eq for HostType {}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostType")
            .field("full_name", &self.full_name)
            .field("kind", &self.kind)
            .field("visibility", &self.visibility)
            .field("constructors", &self.constructors.len())
            .finish()
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name)
    }
}

/// Builder for [`HostType`] metadata
pub struct HostTypeBuilder {
    namespace: SmolStr,
    name: SmolStr,
    visibility: Visibility,
    kind: TypeKind,
    primitive: Option<Primitive>,
    base: Option<HostTypeRef>,
    interfaces: Vec<HostTypeRef>,
    is_abstract: bool,
    constructors: Vec<Constructor>,
}

impl HostTypeBuilder {
    /// Create a public class builder
    pub fn new(namespace: impl Into<SmolStr>, name: impl Into<SmolStr>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            visibility: Visibility::Public,
            kind: TypeKind::Class,
            primitive: None,
            base: None,
            interfaces: Vec::new(),
            is_abstract: false,
            constructors: Vec::new(),
        }
    }

    /// Set the type kind
    pub fn kind(mut self, kind: TypeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark the type as non-public
    pub fn non_public(mut self) -> Self {
        self.visibility = Visibility::NonPublic;
        self
    }

    /// Mark the type as abstract
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Set the base type
    pub fn base(mut self, base: HostTypeRef) -> Self {
        self.base = Some(base);
        self
    }

    /// Add an implemented interface
    pub fn interface(mut self, interface: HostTypeRef) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Add a constructor
    pub fn constructor<F>(mut self, params: Vec<Parameter>, body: F) -> Self
    where
        F: Fn(&[HostArg]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        self.constructors.push(Constructor::new(params, body));
        self
    }

    /// Finish the type
    pub fn build(self) -> HostTypeRef {
        let full_name = if self.namespace.is_empty() {
            self.name.clone()
        } else {
            SmolStr::new(format!("{}.{}", self.namespace, self.name))
        };

        Arc::new(HostType {
            namespace: self.namespace,
            name: self.name,
            full_name,
            visibility: self.visibility,
            kind: self.kind,
            primitive: self.primitive,
            base: self.base,
            interfaces: self.interfaces,
            is_abstract: self.is_abstract,
            constructors: self.constructors,
        })
    }
}

// ============================================================================
// Signatures and Constructors
// ============================================================================

/// One formal parameter of a host callable
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Parameter name (used for keyword binding)
    pub name: SmolStr,
    /// Declared parameter type
    pub ty: HostTypeRef,
    /// Value used when the argument is omitted
    pub default: Option<HostArg>,
}

impl Parameter {
    /// Create a required parameter
    pub fn new(name: impl Into<SmolStr>, ty: HostTypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    /// Create an optional parameter
    pub fn optional(name: impl Into<SmolStr>, ty: HostTypeRef, default: HostArg) -> Self {
        Self {
            name: name.into(),
            ty,
            default: Some(default),
        }
    }
}

/// Parameter list of a host callable
#[derive(Debug, Clone, Default)]
pub struct Signature {
    params: Vec<Parameter>,
}

impl Signature {
    /// Create a signature
    pub fn new(params: Vec<Parameter>) -> Self {
        Self { params }
    }

    /// Parameters in order
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Number of parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Exact, order-sensitive comparison of parameter types
    pub fn matches_types(&self, types: &[HostTypeRef]) -> bool {
        self.params.len() == types.len()
            && self
                .params
                .iter()
                .zip(types)
                .all(|(param, ty)| param.ty.as_ref() == ty.as_ref())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param.ty.full_name())?;
        }
        write!(f, ")")
    }
}

/// A host constructor: signature plus invocation thunk
#[derive(Clone)]
pub struct Constructor {
    signature: Signature,
    thunk: CtorThunk,
}

impl Constructor {
    /// Create a constructor
    pub fn new<F>(params: Vec<Parameter>, body: F) -> Self
    where
        F: Fn(&[HostArg]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        Self {
            signature: Signature::new(params),
            thunk: Arc::new(body),
        }
    }

    /// The constructor's signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Run the constructor body
    pub fn invoke(&self, args: &[HostArg]) -> Result<HostValue, HostError> {
        (self.thunk)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor{}", self.signature)
    }
}

// ============================================================================
// Instances and Arguments
// ============================================================================

/// A live host object together with its runtime type
pub struct HostInstance {
    ty: HostTypeRef,
    value: HostValue,
}

impl HostInstance {
    /// Create a strong reference to a new host instance
    pub fn new(ty: HostTypeRef, value: HostValue) -> HostRef {
        Arc::new(Self { ty, value })
    }

    /// Runtime type
    pub fn host_type(&self) -> &HostTypeRef {
        &self.ty
    }

    /// Borrow the underlying value as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for HostInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} instance>", self.ty.full_name())
    }
}

/// A marshaled argument passed to a host callable
#[derive(Debug, Clone)]
pub enum HostArg {
    /// Null reference
    Null,
    /// Boolean value
    Bool(bool),
    /// Single character
    Char(char),
    /// Any integral value
    Int(i64),
    /// Any floating-point value
    Float(f64),
    /// String value
    Str(SmolStr),
    /// Reference to a host instance
    Object(HostRef),
    /// Reference to a host type
    Type(HostTypeRef),
}

impl HostArg {
    /// Try to extract as an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostArg::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to extract as a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            HostArg::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to extract as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostArg::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to extract as a host object
    pub fn as_object(&self) -> Option<&HostRef> {
        match self {
            HostArg::Object(o) => Some(o),
            _ => None,
        }
    }
}

/// An exception thrown by host code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{exception_type}: {message}")]
pub struct HostError {
    /// Host exception type name
    pub exception_type: SmolStr,
    /// Exception message
    pub message: String,
}

impl HostError {
    /// Create a host error
    pub fn new(exception_type: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_primitive_metadata() {
        let int32 = HostType::primitive(Primitive::Int32);
        assert_eq!(int32.full_name(), "System.Int32");
        assert!(int32.is_value_type());
        assert_eq!(int32.as_ref(), HostType::primitive(Primitive::Int32).as_ref());

        let string = HostType::primitive(Primitive::String);
        assert!(!string.is_value_type());
    }

    #[test]
    fn test_exception_detection() {
        let exception = HostType::builder("System", "Exception").build();
        let custom = HostType::builder("Acme", "WidgetError").base(exception).build();
        assert!(custom.is_exception());
        assert!(!HostType::primitive(Primitive::String).is_exception());
    }

    #[test]
    fn test_distance_to_base_and_interface() {
        let disposable = HostType::builder("System", "IDisposable")
            .kind(TypeKind::Interface)
            .build();
        let base = HostType::builder("Acme", "Base").build();
        let derived = HostType::builder("Acme", "Derived")
            .base(base.clone())
            .interface(disposable.clone())
            .build();

        assert_eq!(derived.distance_to(&derived), Some(0));
        assert_eq!(derived.distance_to(&base), Some(1));
        assert_eq!(derived.distance_to(&disposable), Some(1));
        assert_eq!(base.distance_to(&derived), None);
        assert!(disposable.is_abstract());
    }

    #[test]
    fn test_signature_display_and_match() {
        let int32 = HostType::primitive(Primitive::Int32);
        let sig = Signature::new(vec![
            Parameter::new("width", int32.clone()),
            Parameter::new("height", int32.clone()),
        ]);
        assert_eq!(sig.to_string(), "(System.Int32, System.Int32)");
        assert!(sig.matches_types(&[int32.clone(), int32.clone()]));
        assert!(!sig.matches_types(&[int32]));
    }

    #[test]
    fn test_instance_downcast() {
        let ty = HostType::builder("Acme", "Counter").build();
        let instance = HostInstance::new(ty, Box::new(41u32));
        assert_eq!(instance.downcast_ref::<u32>(), Some(&41));
        assert!(instance.downcast_ref::<String>().is_none());
        assert_eq!(format!("{:?}", instance), "<Acme.Counter instance>");
    }
}
