//! Type system for Cflat
//!
//! Five types: the error-recovery bottom `Any`, 64-bit integers, nominal
//! structs, pointers, and function types. `Any` compares equal to every
//! type so that one bad subexpression doesn't cascade into a wall of
//! follow-on diagnostics.

use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A Cflat type.
///
/// `PartialEq` is deliberately hand-written: `Any` is universal, so type
/// equality is reflexive and symmetric but *not* transitive. That rules out
/// `Eq` (and hashing on types), which nothing in the compiler needs.
#[derive(Debug, Clone)]
pub enum Type {
    /// Bottom type produced by the checker for malformed subexpressions.
    Any,
    /// 64-bit signed integer.
    Int,
    /// Nominal struct type; fields live in the struct environment.
    Struct(String),
    /// Pointer to any type (including function types).
    Ptr(Box<Type>),
    /// Function type. `ret` of `None` means "no return value".
    Fn {
        params: Vec<Type>,
        ret: Option<Box<Type>>,
    },
}

impl Type {
    pub fn ptr(inner: Type) -> Type {
        Type::Ptr(Box::new(inner))
    }

    /// Pointer to `Any`, the type of `nil`.
    pub fn nil_ptr() -> Type {
        Type::ptr(Type::Any)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn is_fn(&self) -> bool {
        matches!(self, Type::Fn { .. })
    }

    /// The pointee, if this is a pointer type.
    pub fn deref(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// Render in the tagged constructor style used by the IR printers:
    /// `Int`, `Ptr(Int)`, `Struct(S)`, `Fn(prms = [Int], ret = _)`.
    pub fn tagged(&self) -> TaggedType<'_> {
        TaggedType(self)
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Any, _) | (_, Type::Any) => true,
            (Type::Int, Type::Int) => true,
            (Type::Struct(a), Type::Struct(b)) => a == b,
            (Type::Ptr(a), Type::Ptr(b)) => a == b,
            (
                Type::Fn {
                    params: pa,
                    ret: ra,
                },
                Type::Fn {
                    params: pb,
                    ret: rb,
                },
            ) => {
                pa.len() == pb.len()
                    && pa.iter().zip(pb).all(|(a, b)| a == b)
                    && match (ra, rb) {
                        (Some(a), Some(b)) => a == b,
                        (None, None) => true,
                        _ => false,
                    }
            }
            _ => false,
        }
    }
}

/// Source-syntax rendering, used by diagnostics: `int`, `&int`, `S`,
/// `(int, &S) -> int`, and `_` for both `Any` and an absent return.
impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "_"),
            Type::Int => write!(f, "int"),
            Type::Struct(name) => write!(f, "{}", name),
            Type::Ptr(inner) => write!(f, "&{}", inner),
            Type::Fn { params, ret } => {
                write!(f, "(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ") -> ")?;
                match ret {
                    Some(ret) => write!(f, "{}", ret),
                    None => write!(f, "_"),
                }
            }
        }
    }
}

/// See [`Type::tagged`].
pub struct TaggedType<'a>(&'a Type);

impl fmt::Display for TaggedType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Type::Any => write!(f, "_"),
            Type::Int => write!(f, "Int"),
            Type::Struct(name) => write!(f, "Struct({})", name),
            Type::Ptr(inner) => write!(f, "Ptr({})", inner.tagged()),
            Type::Fn { params, ret } => {
                write!(f, "Fn(prms = [")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param.tagged())?;
                }
                write!(f, "], ret = ")?;
                match ret {
                    Some(ret) => write!(f, "{})", ret.tagged()),
                    None => write!(f, "_)"),
                }
            }
        }
    }
}

// The interchange encoding is a string for leaf types and a single-key
// object for constructed ones: "Int", {"Ptr": T}, {"Struct": "S"},
// {"Fn": {"params": [T...], "ret": T|null}}. serde derive can't produce
// the string-or-object split, so both directions are written out.

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Type::Any => serializer.serialize_str("_"),
            Type::Int => serializer.serialize_str("Int"),
            Type::Struct(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Struct", name)?;
                map.end()
            }
            Type::Ptr(inner) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ptr", inner)?;
                map.end()
            }
            Type::Fn { params, ret } => {
                struct FnBody<'a> {
                    params: &'a [Type],
                    ret: &'a Option<Box<Type>>,
                }
                impl Serialize for FnBody<'_> {
                    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                        let mut body = serializer.serialize_struct("Fn", 2)?;
                        body.serialize_field("params", self.params)?;
                        body.serialize_field("ret", self.ret)?;
                        body.end()
                    }
                }
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn", &FnBody { params, ret })?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        type_from_value(&value).map_err(D::Error::custom)
    }
}

fn type_from_value(value: &serde_json::Value) -> Result<Type, String> {
    use serde_json::Value;
    match value {
        Value::String(s) => match s.as_str() {
            "Int" => Ok(Type::Int),
            "_" => Ok(Type::Any),
            other => Err(format!("unknown type name {:?}", other)),
        },
        Value::Object(map) => {
            if let Some(inner) = map.get("Ptr") {
                return Ok(Type::ptr(type_from_value(inner)?));
            }
            if let Some(name) = map.get("Struct") {
                let name = name
                    .as_str()
                    .ok_or_else(|| "Struct type name must be a string".to_string())?;
                return Ok(Type::Struct(name.to_string()));
            }
            if let Some(body) = map.get("Fn") {
                let params = body
                    .get("params")
                    .and_then(|p| p.as_array())
                    .ok_or_else(|| "Fn type missing params array".to_string())?
                    .iter()
                    .map(type_from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                let ret = match body.get("ret") {
                    None | Some(Value::Null) => None,
                    Some(ret) => Some(Box::new(type_from_value(ret)?)),
                };
                return Ok(Type::Fn { params, ret });
            }
            Err(format!("unknown type object: {}", value))
        }
        _ => Err(format!("invalid type encoding: {}", value)),
    }
}
