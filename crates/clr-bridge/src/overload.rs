//! Overload Resolution
//!
//! Maps a guest call onto one concrete host signature. Two modes exist and
//! they deliberately break ties differently:
//!
//! - **By signature** ([`OverloadResolver::match_by_signature`]): an explicit
//!   type list must equal a candidate's parameter types exactly, in order.
//!   The first match in declaration order wins.
//! - **By arguments** ([`OverloadResolver::match_by_arguments`]): every
//!   candidate the arguments can bind to is scored by conversion cost and
//!   the cheapest one wins. Equal best scores are reported as ambiguous.
//!
//! Resolution works on [`ArgShape`]s, a description of each guest argument
//! that is independent of the guest heap. Turning guest values into shapes
//! and host arguments lives in [`crate::marshal`].

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::trace;

use crate::error::{BridgeError, BridgeResult};
use crate::host::{Constructor, HostType, HostTypeRef, Primitive, Signature};

/// Anything that can take part in overload resolution
pub trait Candidate {
    /// The candidate's parameter list
    fn signature(&self) -> &Signature;
}

impl Candidate for Constructor {
    fn signature(&self) -> &Signature {
        Constructor::signature(self)
    }
}

impl Candidate for Signature {
    fn signature(&self) -> &Signature {
        self
    }
}

/// A named, immutable set of candidate signatures
#[derive(Debug)]
pub struct OverloadSet<C> {
    name: SmolStr,
    candidates: Arc<[C]>,
}

impl<C> Clone for OverloadSet<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            candidates: Arc::clone(&self.candidates),
        }
    }
}

impl<C: Candidate> OverloadSet<C> {
    /// Create an overload set
    pub fn new(name: impl Into<SmolStr>, candidates: impl Into<Arc<[C]>>) -> Self {
        Self {
            name: name.into(),
            candidates: candidates.into(),
        }
    }

    /// Name used in error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Candidates in declaration order
    pub fn candidates(&self) -> &[C] {
        &self.candidates
    }

    /// Candidate at `index`
    pub fn get(&self, index: usize) -> Option<&C> {
        self.candidates.get(index)
    }

    /// Number of candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Check if the set has no candidates
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Rendered signature of the candidate at `index`
    fn describe(&self, index: usize) -> String {
        self.candidates[index].signature().to_string()
    }
}

// ============================================================================
// Argument Shapes
// ============================================================================

/// What the resolver needs to know about one guest argument
#[derive(Debug, Clone, PartialEq)]
pub enum ArgShape {
    /// `None`
    Null,
    /// `bool`
    Bool,
    /// `int`, with its value for range checks
    Int(i64),
    /// `float`
    Float,
    /// `str`, with its length in characters
    Str { chars: usize },
    /// A guest object wrapping a host instance of this type
    Host(HostTypeRef),
    /// A host type wrapper
    Type,
    /// Any other guest value, by guest type name
    Opaque(SmolStr),
}

impl fmt::Display for ArgShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgShape::Null => write!(f, "NoneType"),
            ArgShape::Bool => write!(f, "bool"),
            ArgShape::Int(_) => write!(f, "int"),
            ArgShape::Float => write!(f, "float"),
            ArgShape::Str { .. } => write!(f, "str"),
            ArgShape::Host(ty) => write!(f, "{}", ty.full_name()),
            ArgShape::Type => write!(f, "type"),
            ArgShape::Opaque(name) => write!(f, "{}", name),
        }
    }
}

/// Cost of passing a `System.Object` parameter anything at all
const OBJECT_COST: u32 = 8;

/// Cost of leaving an optional parameter to its default
const DEFAULT_COST: u32 = 1;

/// Cost of converting an argument of `shape` to `param`, or `None` if the
/// argument is not assignable.
pub fn conversion_cost(shape: &ArgShape, param: &HostType) -> Option<u32> {
    let primitive = param.primitive_kind();

    if primitive == Some(Primitive::Object) {
        return Some(match shape {
            ArgShape::Null => 1,
            _ => OBJECT_COST,
        });
    }

    match shape {
        ArgShape::Null => (!param.is_value_type()).then_some(1),
        ArgShape::Bool => (primitive == Some(Primitive::Boolean)).then_some(0),
        ArgShape::Int(value) => {
            let p = primitive?;
            if let Some((min, max)) = p.integer_range() {
                (min..=max).contains(value).then_some(1)
            } else if p.is_real() {
                Some(2)
            } else {
                None
            }
        }
        ArgShape::Float => match primitive? {
            Primitive::Double => Some(0),
            Primitive::Single | Primitive::Decimal => Some(1),
            _ => None,
        },
        ArgShape::Str { chars } => match primitive? {
            Primitive::String => Some(0),
            Primitive::Char if *chars == 1 => Some(1),
            _ => None,
        },
        ArgShape::Host(ty) => ty.distance_to(param),
        ArgShape::Type => (primitive == Some(Primitive::Type)).then_some(0),
        ArgShape::Opaque(_) => None,
    }
}

// ============================================================================
// Resolution Results
// ============================================================================

/// Where the value of one parameter comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSource {
    /// Positional argument at this index
    Positional(usize),
    /// Keyword argument at this index of the keyword map
    Keyword(usize),
    /// The parameter's declared default
    Default,
}

/// Arguments bound to one candidate's parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgBinding {
    /// Index of the candidate in its overload set
    pub candidate: usize,
    /// One source per parameter, in parameter order
    pub sources: Vec<ArgSource>,
    /// Total conversion cost
    pub cost: u32,
}

/// Outcome of argument-based resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one best candidate
    Found(ArgBinding),
    /// Several candidates tie for the best score
    Ambiguous(Vec<usize>),
    /// No candidate accepts the arguments
    NotFound,
}

// ============================================================================
// Resolver
// ============================================================================

/// Overload resolution engine
#[derive(Debug, Clone, Copy, Default)]
pub struct OverloadResolver;

impl OverloadResolver {
    /// Find the first candidate whose parameter types equal `types` exactly
    pub fn match_by_signature<C: Candidate>(
        set: &OverloadSet<C>,
        types: &[HostTypeRef],
    ) -> Option<usize> {
        set.candidates()
            .iter()
            .position(|candidate| candidate.signature().matches_types(types))
    }

    /// Bind arguments to one signature.
    ///
    /// Returns `None` if an argument is missing, surplus or not assignable.
    pub fn bind(
        signature: &Signature,
        positional: &[ArgShape],
        keywords: &IndexMap<SmolStr, ArgShape>,
    ) -> Option<(Vec<ArgSource>, u32)> {
        let params = signature.params();
        if positional.len() > params.len() {
            return None;
        }

        let mut used_keywords = 0;
        let mut sources = Vec::with_capacity(params.len());
        let mut cost = 0;

        for (i, param) in params.iter().enumerate() {
            let keyword = keywords.get_full(param.name.as_str());

            let (source, shape) = if i < positional.len() {
                if keyword.is_some() {
                    // Supplied both positionally and by name
                    return None;
                }
                (ArgSource::Positional(i), Some(&positional[i]))
            } else if let Some((index, _, shape)) = keyword {
                used_keywords += 1;
                (ArgSource::Keyword(index), Some(shape))
            } else if param.default.is_some() {
                (ArgSource::Default, None)
            } else {
                return None;
            };

            cost += match shape {
                Some(shape) => conversion_cost(shape, &param.ty)?,
                None => DEFAULT_COST,
            };
            sources.push(source);
        }

        if used_keywords != keywords.len() {
            return None;
        }
        Some((sources, cost))
    }

    /// Pick the cheapest candidate the arguments bind to
    pub fn match_by_arguments<C: Candidate>(
        set: &OverloadSet<C>,
        positional: &[ArgShape],
        keywords: &IndexMap<SmolStr, ArgShape>,
    ) -> Resolution {
        let mut best: Option<ArgBinding> = None;
        let mut tied: Vec<usize> = Vec::new();

        for (index, candidate) in set.candidates().iter().enumerate() {
            let Some((sources, cost)) = Self::bind(candidate.signature(), positional, keywords)
            else {
                continue;
            };
            trace!(overloads = set.name(), candidate = index, cost, "candidate applicable");

            match best.as_ref().map(|b| b.cost) {
                Some(best_cost) if cost > best_cost => {}
                Some(best_cost) if cost == best_cost => tied.push(index),
                _ => {
                    tied = vec![index];
                    best = Some(ArgBinding {
                        candidate: index,
                        sources,
                        cost,
                    });
                }
            }
        }

        match best {
            None => Resolution::NotFound,
            Some(_) if tied.len() > 1 => Resolution::Ambiguous(tied),
            Some(binding) => Resolution::Found(binding),
        }
    }

    /// Argument-based resolution with failures turned into errors
    pub fn resolve<C: Candidate>(
        set: &OverloadSet<C>,
        positional: &[ArgShape],
        keywords: &IndexMap<SmolStr, ArgShape>,
    ) -> BridgeResult<ArgBinding> {
        match Self::match_by_arguments(set, positional, keywords) {
            Resolution::Found(binding) => Ok(binding),
            Resolution::Ambiguous(indices) => Err(BridgeError::ambiguous(
                set.name(),
                indices.into_iter().map(|i| set.describe(i)).collect(),
            )),
            Resolution::NotFound => Err(BridgeError::no_match(
                set.name(),
                "No method matches given arguments",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Parameter;
    use pretty_assertions::assert_eq;

    fn sig(types: &[Primitive]) -> Signature {
        Signature::new(
            types
                .iter()
                .enumerate()
                .map(|(i, p)| Parameter::new(format!("arg{}", i), HostType::primitive(*p)))
                .collect(),
        )
    }

    fn f_set() -> OverloadSet<Signature> {
        OverloadSet::new(
            "f",
            vec![
                sig(&[Primitive::Int32]),
                sig(&[Primitive::String]),
                sig(&[Primitive::Int32, Primitive::Int32]),
            ],
        )
    }

    fn no_keywords() -> IndexMap<SmolStr, ArgShape> {
        IndexMap::new()
    }

    #[test]
    fn test_match_by_signature_exact() {
        let set = f_set();
        let int32 = HostType::primitive(Primitive::Int32);
        let boolean = HostType::primitive(Primitive::Boolean);

        assert_eq!(
            OverloadResolver::match_by_signature(&set, &[int32.clone(), int32.clone()]),
            Some(2)
        );
        assert_eq!(OverloadResolver::match_by_signature(&set, &[int32]), Some(0));
        assert_eq!(OverloadResolver::match_by_signature(&set, &[boolean]), None);
        assert_eq!(OverloadResolver::match_by_signature(&set, &[]), None);
    }

    #[test]
    fn test_match_by_signature_first_wins() {
        let set = OverloadSet::new("dup", vec![sig(&[Primitive::Int32]), sig(&[Primitive::Int32])]);
        let int32 = HostType::primitive(Primitive::Int32);
        assert_eq!(OverloadResolver::match_by_signature(&set, &[int32]), Some(0));
    }

    #[test]
    fn test_match_by_arguments_picks_by_type() {
        let set = f_set();

        let by_str = OverloadResolver::match_by_arguments(&set, &[ArgShape::Str { chars: 3 }], &no_keywords());
        assert!(matches!(by_str, Resolution::Found(ArgBinding { candidate: 1, .. })));

        let by_pair = OverloadResolver::match_by_arguments(
            &set,
            &[ArgShape::Int(1), ArgShape::Int(2)],
            &no_keywords(),
        );
        assert!(matches!(by_pair, Resolution::Found(ArgBinding { candidate: 2, .. })));

        let none = OverloadResolver::match_by_arguments(&set, &[ArgShape::Bool], &no_keywords());
        assert_eq!(none, Resolution::NotFound);
    }

    #[test]
    fn test_numeric_widening_is_ambiguous() {
        let set = OverloadSet::new("g", vec![sig(&[Primitive::Int32]), sig(&[Primitive::Int64])]);
        let result = OverloadResolver::match_by_arguments(&set, &[ArgShape::Int(7)], &no_keywords());
        assert_eq!(result, Resolution::Ambiguous(vec![0, 1]));

        let err = OverloadResolver::resolve(&set, &[ArgShape::Int(7)], &no_keywords()).unwrap_err();
        assert_eq!(
            err,
            BridgeError::ambiguous("g", vec!["(System.Int32)".into(), "(System.Int64)".into()])
        );
    }

    #[test]
    fn test_out_of_range_int_disambiguates() {
        let set = OverloadSet::new("g", vec![sig(&[Primitive::Int32]), sig(&[Primitive::Int64])]);
        let big = ArgShape::Int(1 << 40);
        let result = OverloadResolver::match_by_arguments(&set, &[big], &no_keywords());
        assert!(matches!(result, Resolution::Found(ArgBinding { candidate: 1, .. })));
    }

    #[test]
    fn test_exact_float_beats_widening() {
        let set = OverloadSet::new("h", vec![sig(&[Primitive::Single]), sig(&[Primitive::Double])]);
        let result = OverloadResolver::match_by_arguments(&set, &[ArgShape::Float], &no_keywords());
        assert!(matches!(result, Resolution::Found(ArgBinding { candidate: 1, cost: 0, .. })));
    }

    #[test]
    fn test_keywords_and_defaults() {
        let int32 = HostType::primitive(Primitive::Int32);
        let set = OverloadSet::new(
            "resize",
            vec![Signature::new(vec![
                Parameter::new("width", int32.clone()),
                Parameter::optional("height", int32, crate::host::HostArg::Int(1)),
            ])],
        );

        let mut keywords = IndexMap::new();
        keywords.insert(SmolStr::new("height"), ArgShape::Int(4));
        let named = OverloadResolver::resolve(&set, &[ArgShape::Int(2)], &keywords).unwrap();
        assert_eq!(named.sources, vec![ArgSource::Positional(0), ArgSource::Keyword(0)]);

        let defaulted = OverloadResolver::resolve(&set, &[ArgShape::Int(2)], &no_keywords()).unwrap();
        assert_eq!(defaulted.sources, vec![ArgSource::Positional(0), ArgSource::Default]);

        let mut unknown = IndexMap::new();
        unknown.insert(SmolStr::new("depth"), ArgShape::Int(4));
        assert!(OverloadResolver::resolve(&set, &[ArgShape::Int(2)], &unknown).is_err());

        let mut duplicate = IndexMap::new();
        duplicate.insert(SmolStr::new("width"), ArgShape::Int(4));
        assert!(OverloadResolver::resolve(&set, &[ArgShape::Int(2)], &duplicate).is_err());
    }

    #[test]
    fn test_host_argument_prefers_nearest_type() {
        let base = HostType::builder("Acme", "Base").build();
        let derived = HostType::builder("Acme", "Derived").base(base.clone()).build();
        let set = OverloadSet::new(
            "accept",
            vec![
                Signature::new(vec![Parameter::new("x", base)]),
                Signature::new(vec![Parameter::new("x", derived.clone())]),
            ],
        );

        let result =
            OverloadResolver::match_by_arguments(&set, &[ArgShape::Host(derived)], &no_keywords());
        assert!(matches!(result, Resolution::Found(ArgBinding { candidate: 1, .. })));
    }

    #[test]
    fn test_object_parameter_accepts_anything_last() {
        let set = OverloadSet::new("put", vec![sig(&[Primitive::Object]), sig(&[Primitive::String])]);

        let as_string =
            OverloadResolver::match_by_arguments(&set, &[ArgShape::Str { chars: 1 }], &no_keywords());
        assert!(matches!(as_string, Resolution::Found(ArgBinding { candidate: 1, .. })));

        let as_object = OverloadResolver::match_by_arguments(&set, &[ArgShape::Bool], &no_keywords());
        assert!(matches!(as_object, Resolution::Found(ArgBinding { candidate: 0, .. })));
    }
}
