//! Dynamically-typed values for generic calls.
//!
//! Generic calls carry their parameters and result as [`Any`] values so a
//! caller can invoke a procedure knowing only its name, for example from an
//! interactive console. The callee converts the received list into the
//! procedure's parameter tuple with [`FromAnyParams`]; a conversion failure
//! is reported to the caller instead of reaching the procedure.
//!
//! Numeric conversions follow a small set of rules: signed and unsigned
//! integers convert into each other when the value is in range, and both
//! convert into floats. Nothing converts into `bool`, `String` or a blob
//! except a value of exactly that kind.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically-typed value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Any {
    /// No value. Returned by procedures without a result.
    #[default]
    None,
    /// Boolean.
    Bool(bool),
    /// Signed 32-bit integer.
    Integer(i32),
    /// Unsigned 32-bit integer.
    UnsignedInteger(u32),
    /// 32-bit float.
    Float(f32),
    /// UTF-8 text.
    String(String),
    /// Raw bytes, carried as a CBOR byte string.
    Blob(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Any {
    /// Check if this is [`Any::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Short name of the contained kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::UnsignedInteger(_) => "unsigned",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Blob(_) => "blob",
        }
    }

    /// Borrow the text of a [`Any::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::UnsignedInteger(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Blob(v) => write!(f, "<blob {} bytes>", v.len()),
        }
    }
}

/// Conversion out of an [`Any`].
pub trait FromAny: Sized {
    /// Convert, or `None` if the kinds are incompatible.
    fn from_any(value: Any) -> Option<Self>;
}

/// Conversion into an [`Any`].
pub trait IntoAny {
    /// Wrap `self` as a dynamically-typed value.
    fn into_any(self) -> Any;
}

/// Conversion of a generic parameter list into a parameter tuple.
pub trait FromAnyParams: Sized {
    /// Convert, or `None` if the count or any element kind does not match.
    fn from_any_params(values: Vec<Any>) -> Option<Self>;
}

/// Conversion of a parameter tuple into a generic parameter list.
pub trait IntoAnyParams {
    /// Flatten `self` into one [`Any`] per parameter.
    fn into_any_params(self) -> Vec<Any>;
}

impl FromAny for Any {
    fn from_any(value: Any) -> Option<Self> {
        Some(value)
    }
}

impl FromAny for bool {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl FromAny for i32 {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::Integer(v) => Some(v),
            Any::UnsignedInteger(v) => Self::try_from(v).ok(),
            _ => None,
        }
    }
}

impl FromAny for u32 {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::UnsignedInteger(v) => Some(v),
            Any::Integer(v) => Self::try_from(v).ok(),
            _ => None,
        }
    }
}

impl FromAny for i64 {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::Integer(v) => Some(Self::from(v)),
            Any::UnsignedInteger(v) => Some(Self::from(v)),
            _ => None,
        }
    }
}

impl FromAny for u64 {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::UnsignedInteger(v) => Some(Self::from(v)),
            Any::Integer(v) => Self::try_from(v).ok(),
            _ => None,
        }
    }
}

impl FromAny for f32 {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::Float(v) => Some(v),
            Any::Integer(v) => Some(v as Self),
            Any::UnsignedInteger(v) => Some(v as Self),
            _ => None,
        }
    }
}

impl FromAny for f64 {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::Float(v) => Some(Self::from(v)),
            Any::Integer(v) => Some(Self::from(v)),
            Any::UnsignedInteger(v) => Some(Self::from(v)),
            _ => None,
        }
    }
}

impl FromAny for String {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::String(v) => Some(v),
            _ => None,
        }
    }
}

impl FromAny for Vec<u8> {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::Blob(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: FromAny> FromAny for Option<T> {
    fn from_any(value: Any) -> Option<Self> {
        match value {
            Any::None => Some(None),
            other => T::from_any(other).map(Some),
        }
    }
}

impl IntoAny for Any {
    fn into_any(self) -> Any {
        self
    }
}

impl IntoAny for () {
    fn into_any(self) -> Any {
        Any::None
    }
}

impl IntoAny for bool {
    fn into_any(self) -> Any {
        Any::Bool(self)
    }
}

impl IntoAny for i32 {
    fn into_any(self) -> Any {
        Any::Integer(self)
    }
}

impl IntoAny for u32 {
    fn into_any(self) -> Any {
        Any::UnsignedInteger(self)
    }
}

impl IntoAny for f32 {
    fn into_any(self) -> Any {
        Any::Float(self)
    }
}

impl IntoAny for String {
    fn into_any(self) -> Any {
        Any::String(self)
    }
}

impl IntoAny for &str {
    fn into_any(self) -> Any {
        Any::String(self.to_string())
    }
}

impl IntoAny for Vec<u8> {
    fn into_any(self) -> Any {
        Any::Blob(self)
    }
}

impl<T: IntoAny> IntoAny for Option<T> {
    fn into_any(self) -> Any {
        self.map_or(Any::None, IntoAny::into_any)
    }
}

impl FromAnyParams for () {
    fn from_any_params(values: Vec<Any>) -> Option<Self> {
        values.is_empty().then_some(())
    }
}

impl IntoAnyParams for () {
    fn into_any_params(self) -> Vec<Any> {
        Vec::new()
    }
}

impl FromAnyParams for Vec<Any> {
    fn from_any_params(values: Vec<Any>) -> Option<Self> {
        Some(values)
    }
}

impl IntoAnyParams for Vec<Any> {
    fn into_any_params(self) -> Vec<Any> {
        self
    }
}

macro_rules! tuple_params {
    ($($len:literal => ($($name:ident)+))+) => {$(
        impl<$($name: FromAny),+> FromAnyParams for ($($name,)+) {
            fn from_any_params(values: Vec<Any>) -> Option<Self> {
                if values.len() != $len {
                    return None;
                }
                let mut values = values.into_iter();
                Some(($($name::from_any(values.next()?)?,)+))
            }
        }

        impl<$($name: IntoAny),+> IntoAnyParams for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_any_params(self) -> Vec<Any> {
                let ($($name,)+) = self;
                vec![$($name.into_any()),+]
            }
        }
    )+};
}

tuple_params! {
    1 => (A)
    2 => (A B)
    3 => (A B C)
    4 => (A B C D)
    5 => (A B C D E)
    6 => (A B C D E F)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::payload;

    #[test]
    fn blob_is_a_byte_string_on_the_wire() {
        let mut out = bytes::BytesMut::new();
        payload::write(&Any::Blob(vec![1, 2, 3]), &mut out).unwrap();

        // Major type 2, length 3.
        assert!(out.windows(4).any(|w| w == [0x43, 1, 2, 3]));
        // Not an array of unsigned integers.
        assert!(!out.windows(4).any(|w| w == [0x83, 1, 2, 3]));

        let mut input = &out[..];
        assert_eq!(payload::read::<Any>(&mut input).unwrap(), Any::Blob(vec![1, 2, 3]));
        assert!(input.is_empty());
    }

    #[test]
    fn tuple_conversion_matches_kinds() {
        let values = vec![Any::Integer(1), Any::String("two".into()), Any::Float(3.0)];
        let params = <(i32, String, f32)>::from_any_params(values).unwrap();
        assert_eq!(params, (1, "two".to_string(), 3.0));
    }

    #[test]
    fn tuple_conversion_rejects_wrong_count() {
        assert!(<(i32, i32)>::from_any_params(vec![Any::Integer(1)]).is_none());
        assert!(<(i32,)>::from_any_params(vec![Any::Integer(1), Any::Integer(2)]).is_none());
        assert!(<()>::from_any_params(vec![Any::None]).is_none());
    }

    #[test]
    fn tuple_conversion_rejects_wrong_kind() {
        assert!(<(String,)>::from_any_params(vec![Any::Integer(1)]).is_none());
        assert!(<(bool,)>::from_any_params(vec![Any::UnsignedInteger(1)]).is_none());
        assert!(<(Vec<u8>,)>::from_any_params(vec![Any::String("x".into())]).is_none());
    }

    #[test]
    fn negative_integer_does_not_become_unsigned() {
        assert_eq!(u32::from_any(Any::Integer(-1)), None);
        assert_eq!(u32::from_any(Any::Integer(7)), Some(7));
        assert_eq!(i32::from_any(Any::UnsignedInteger(u32::MAX)), None);
    }

    #[test]
    fn option_maps_none() {
        assert_eq!(Option::<i32>::from_any(Any::None), Some(None));
        assert_eq!(Option::<i32>::from_any(Any::Integer(4)), Some(Some(4)));
        assert_eq!(Some("x").into_any(), Any::String("x".into()));
        assert_eq!(None::<i32>.into_any(), Any::None);
    }

    #[test]
    fn into_params_flattens_tuple() {
        let values = (true, 5u32, "hi").into_any_params();
        assert_eq!(
            values,
            vec![Any::Bool(true), Any::UnsignedInteger(5), Any::String("hi".into())]
        );
    }

    #[test]
    fn display_matches_console_output() {
        assert_eq!(Any::None.to_string(), "");
        assert_eq!(Any::String("srv".into()).to_string(), "srv");
        assert_eq!(Any::Blob(vec![1, 2, 3]).to_string(), "<blob 3 bytes>");
    }

    proptest! {
        #[test]
        fn integers_widen_to_float(v in any::<i32>()) {
            prop_assert_eq!(f32::from_any(Any::Integer(v)), Some(v as f32));
            prop_assert_eq!(i64::from_any(Any::Integer(v)), Some(i64::from(v)));
        }

        #[test]
        fn unsigned_narrows_only_in_range(v in any::<u32>()) {
            let expected = i32::try_from(v).ok();
            prop_assert_eq!(i32::from_any(Any::UnsignedInteger(v)), expected);
        }
    }
}
