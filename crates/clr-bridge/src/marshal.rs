//! Argument Marshaling
//!
//! Conversion of guest call arguments into what the overload resolver and
//! the host runtime consume: [`ArgShape`]s for scoring, [`HostArg`]s for the
//! actual invocation.

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::binding::ManagedObjectBinding;
use crate::bridge::Bridge;
use crate::classes;
use crate::error::{BridgeError, BridgeResult};
use crate::guest::{CallArgs, GuestHandle, GuestValue};
use crate::host::{HostArg, HostTypeRef, Parameter, Primitive, Signature};
use crate::overload::{ArgShape, ArgSource};

/// What a guest heap object stands for on the host side
enum HostView {
    Instance(crate::host::HostRef),
    Type(HostTypeRef),
    Foreign(SmolStr),
}

fn host_view(bridge: &Bridge, handle: GuestHandle) -> BridgeResult<HostView> {
    let Some(record) = bridge.record(handle) else {
        let name = bridge
            .heap()
            .type_of(handle)
            .map(|ty| SmolStr::new(ty.name()))
            .ok_or_else(|| BridgeError::invalid_handle(format!("argument {}", handle)))?;
        return Ok(HostView::Foreign(name));
    };

    if let Some(binding) = record.downcast_ref::<ManagedObjectBinding>() {
        return Ok(HostView::Instance(binding.instance()?));
    }
    if let Some(ty) = classes::class_host_type(record.as_ref()) {
        return Ok(HostView::Type(ty));
    }
    Ok(HostView::Foreign(SmolStr::new(record.type_name())))
}

/// Describe one guest argument for overload resolution
pub fn shape_of(bridge: &Bridge, value: &GuestValue) -> ArgShape {
    match value {
        GuestValue::None => ArgShape::Null,
        GuestValue::Bool(_) => ArgShape::Bool,
        GuestValue::Int(n) => ArgShape::Int(*n),
        GuestValue::Float(_) => ArgShape::Float,
        GuestValue::Str(s) => ArgShape::Str {
            chars: s.chars().count(),
        },
        GuestValue::Tuple(_) | GuestValue::Dict(_) => ArgShape::Opaque(value.type_name().into()),
        GuestValue::Object(handle) => match host_view(bridge, *handle) {
            Ok(HostView::Instance(instance)) => ArgShape::Host(instance.host_type().clone()),
            Ok(HostView::Type(_)) => ArgShape::Type,
            Ok(HostView::Foreign(name)) => ArgShape::Opaque(name),
            Err(_) => ArgShape::Opaque("object".into()),
        },
    }
}

/// Describe every argument of a call
pub fn shapes_of(bridge: &Bridge, args: &CallArgs) -> (Vec<ArgShape>, IndexMap<SmolStr, ArgShape>) {
    let positional = args.positional.iter().map(|v| shape_of(bridge, v)).collect();
    let keywords = args
        .keywords
        .iter()
        .map(|(name, v)| (name.clone(), shape_of(bridge, v)))
        .collect();
    (positional, keywords)
}

/// Convert one guest value to the host argument for `param`
pub fn to_host_arg(bridge: &Bridge, value: &GuestValue, param: &Parameter) -> BridgeResult<HostArg> {
    let target = &param.ty;
    let primitive = target.primitive_kind();
    let mismatch = |reason: &str| {
        BridgeError::conversion(value.type_name(), target.full_name(), reason.to_string())
    };

    match value {
        GuestValue::None if !target.is_value_type() => Ok(HostArg::Null),
        GuestValue::None => Err(mismatch("value type cannot be null")),

        GuestValue::Bool(b) => match primitive {
            Some(Primitive::Boolean | Primitive::Object) => Ok(HostArg::Bool(*b)),
            _ => Err(mismatch("expected bool")),
        },

        GuestValue::Int(n) => match primitive {
            Some(p) if p.is_real() => Ok(HostArg::Float(*n as f64)),
            Some(Primitive::Object) => Ok(HostArg::Int(*n)),
            Some(p) => match p.integer_range() {
                Some((min, max)) if (min..=max).contains(n) => Ok(HostArg::Int(*n)),
                Some(_) => Err(mismatch("value out of range")),
                None => Err(mismatch("expected integer type")),
            },
            None => Err(mismatch("expected integer type")),
        },

        GuestValue::Float(f) => match primitive {
            Some(p) if p.is_real() => Ok(HostArg::Float(*f)),
            Some(Primitive::Object) => Ok(HostArg::Float(*f)),
            _ => Err(mismatch("expected floating point type")),
        },

        GuestValue::Str(s) => match primitive {
            Some(Primitive::String | Primitive::Object) => Ok(HostArg::Str(s.clone())),
            Some(Primitive::Char) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(HostArg::Char(c)),
                    _ => Err(mismatch("expected a single character")),
                }
            }
            _ => Err(mismatch("expected string type")),
        },

        GuestValue::Tuple(_) | GuestValue::Dict(_) => Err(mismatch("no conversion available")),

        GuestValue::Object(handle) => match host_view(bridge, *handle)? {
            HostView::Instance(instance) => {
                if primitive == Some(Primitive::Object)
                    || instance.host_type().distance_to(target).is_some()
                {
                    Ok(HostArg::Object(instance))
                } else {
                    Err(mismatch("incompatible host type"))
                }
            }
            HostView::Type(ty) => match primitive {
                Some(Primitive::Type | Primitive::Object) => Ok(HostArg::Type(ty)),
                _ => Err(mismatch("expected a type")),
            },
            HostView::Foreign(name) => Err(BridgeError::conversion(
                name,
                target.full_name(),
                "guest object has no host counterpart",
            )),
        },
    }
}

/// Build the host argument list for `signature` from a resolved binding
pub fn marshal_arguments(
    bridge: &Bridge,
    signature: &Signature,
    sources: &[ArgSource],
    args: &CallArgs,
) -> BridgeResult<Vec<HostArg>> {
    signature
        .params()
        .iter()
        .zip(sources)
        .map(|(param, source)| match source {
            ArgSource::Positional(i) => to_host_arg(bridge, &args.positional[*i], param),
            ArgSource::Keyword(i) => {
                let (_, value) = args
                    .keywords
                    .get_index(*i)
                    .ok_or_else(|| BridgeError::type_error(format!("missing argument '{}'", param.name)))?;
                to_host_arg(bridge, value, param)
            }
            ArgSource::Default => param
                .default
                .clone()
                .ok_or_else(|| BridgeError::type_error(format!("missing argument '{}'", param.name))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::assembly::StaticAssemblyRegistry;
    use crate::host::HostType;

    fn bridge() -> Bridge {
        Bridge::new(BridgeConfig::default(), StaticAssemblyRegistry::new()).unwrap()
    }

    #[test]
    fn test_narrow_integer_range_check() {
        let bridge = bridge();
        let param = Parameter::new("b", HostType::primitive(Primitive::Byte));

        assert!(matches!(
            to_host_arg(&bridge, &GuestValue::Int(255), &param),
            Ok(HostArg::Int(255))
        ));
        let err = to_host_arg(&bridge, &GuestValue::Int(256), &param).unwrap_err();
        assert!(matches!(err, BridgeError::Conversion { .. }));
    }

    #[test]
    fn test_single_character_to_char() {
        let bridge = bridge();
        let param = Parameter::new("c", HostType::primitive(Primitive::Char));

        assert!(matches!(
            to_host_arg(&bridge, &GuestValue::str("x"), &param),
            Ok(HostArg::Char('x'))
        ));
        assert!(to_host_arg(&bridge, &GuestValue::str("xy"), &param).is_err());
    }

    #[test]
    fn test_null_only_for_reference_types() {
        let bridge = bridge();
        let string = Parameter::new("s", HostType::primitive(Primitive::String));
        let int32 = Parameter::new("n", HostType::primitive(Primitive::Int32));

        assert!(matches!(to_host_arg(&bridge, &GuestValue::None, &string), Ok(HostArg::Null)));
        assert!(to_host_arg(&bridge, &GuestValue::None, &int32).is_err());
    }

    #[test]
    fn test_shapes_of_call() {
        let bridge = bridge();
        let args = CallArgs::positional([GuestValue::Int(3), GuestValue::str("ab")])
            .with_keyword("flag", GuestValue::Bool(true));

        let (positional, keywords) = shapes_of(&bridge, &args);
        assert_eq!(positional, vec![ArgShape::Int(3), ArgShape::Str { chars: 2 }]);
        assert_eq!(keywords.get("flag"), Some(&ArgShape::Bool));
    }
}
