// types.rs — Value-type lattice for tokens
//
// Two orders over `TokenType` live here:
//
// * The value-type lattice (`lub`, `leq`, `compare`) used for genuine model
//   values: port types, parameter types, arithmetic results.
// * The code lattice (`merge_local`) used when control flow joins two
//   assignments to a generated local. It is narrower: anything that is not
//   identical (or an array of mergeable elements) becomes `Unknown`.
//
// `Unknown` is the absorbing top of both orders. "No information yet" is not
// a type; analyses represent it by absence from their maps.
//
// Preconditions: none (pure functions).
// Postconditions: `lub` is commutative, idempotent and an upper bound.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::Type;

/// Static type of a runtime token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenType {
    Boolean,
    UnsignedByte,
    Int,
    Long,
    Double,
    Complex,
    Fix,
    String,
    Array(Box<TokenType>),
    Matrix(Box<TokenType>),
    Record(BTreeMap<String, TokenType>),
    Function { arity: usize },
    /// Known to be a token, but of no more specific type.
    General,
    /// Nothing is known statically.
    Unknown,
}

// ── Comparison results (values shared with the runtime TypeLattice) ─────────

pub const SAME: i32 = 0;
pub const LOWER: i32 = -1;
pub const HIGHER: i32 = 1;
pub const INCOMPARABLE: i32 = 2;

// ── Scalar chains ───────────────────────────────────────────────────────────

/// Strict ancestors of a scalar type, in ascending (linear extension) order.
/// ubyte → int → long; int → double → complex; every scalar → string → general.
fn scalar_ancestors(t: &TokenType) -> &'static [TokenType] {
    use TokenType::*;
    match t {
        UnsignedByte => &[Int, Long, Double, Complex, String, General],
        Int => &[Long, Double, Complex, String, General],
        Long => &[String, General],
        Double => &[Complex, String, General],
        Complex | Fix | Boolean => &[String, General],
        String => &[General],
        _ => &[],
    }
}

impl TokenType {
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            TokenType::Boolean
                | TokenType::UnsignedByte
                | TokenType::Int
                | TokenType::Long
                | TokenType::Double
                | TokenType::Complex
                | TokenType::Fix
                | TokenType::String
        )
    }

    /// Numeric kinds that have a primitive machine representation.
    pub fn is_native_numeric(&self) -> bool {
        matches!(self, TokenType::Int | TokenType::Long | TokenType::Double)
    }

    /// True when the type pins down one concrete runtime class.
    pub fn is_concrete(&self) -> bool {
        match self {
            TokenType::Unknown | TokenType::General => false,
            TokenType::Array(e) | TokenType::Matrix(e) => e.is_concrete() || **e == TokenType::General,
            _ => true,
        }
    }

    pub fn element(&self) -> Option<&TokenType> {
        match self {
            TokenType::Array(e) | TokenType::Matrix(e) => Some(e),
            _ => None,
        }
    }

    /// Partial order of the value-type lattice.
    pub fn leq(&self, other: &TokenType) -> bool {
        use TokenType::*;
        if self == other || *other == Unknown {
            return true;
        }
        match (self, other) {
            (Unknown, _) => false,
            (_, General) => true,
            (General, _) => false,
            (Array(a), Array(b)) | (Matrix(a), Matrix(b)) => a.leq(b),
            (Record(a), Record(b)) => b
                .iter()
                .all(|(label, tb)| a.get(label).is_some_and(|ta| ta.leq(tb))),
            (a, b) if a.is_scalar() => scalar_ancestors(a).contains(b),
            _ => false,
        }
    }

    /// Least upper bound in the value-type lattice.
    pub fn lub(&self, other: &TokenType) -> TokenType {
        use TokenType::*;
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (Unknown, _) | (_, Unknown) => Unknown,
            (General, _) | (_, General) => General,
            (Array(a), Array(b)) => Array(Box::new(a.lub(b))),
            (Matrix(a), Matrix(b)) => Matrix(Box::new(a.lub(b))),
            (Record(a), Record(b)) => Record(
                a.iter()
                    .filter_map(|(label, ta)| b.get(label).map(|tb| (label.clone(), ta.lub(tb))))
                    .collect(),
            ),
            (a, b) if a.is_scalar() && b.is_scalar() => {
                if a.leq(b) {
                    return b.clone();
                }
                if b.leq(a) {
                    return a.clone();
                }
                scalar_ancestors(a)
                    .iter()
                    .find(|candidate| b.leq(candidate))
                    .cloned()
                    .unwrap_or(General)
            }
            _ => General,
        }
    }

    /// Lattice comparison with the runtime `TypeLattice.compare` encoding.
    pub fn compare(&self, other: &TokenType) -> i32 {
        if self == other {
            SAME
        } else if self.leq(other) {
            LOWER
        } else if other.leq(self) {
            HIGHER
        } else {
            INCOMPARABLE
        }
    }

    /// Join for generated-code locals at control-flow merges.
    pub fn merge_local(&self, other: &TokenType) -> TokenType {
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (TokenType::Array(a), TokenType::Array(b)) => {
                TokenType::Array(Box::new(a.merge_local(b)))
            }
            _ => TokenType::Unknown,
        }
    }

    // ── Runtime class mapping ──────────────────────────────────────────────

    /// The runtime token class that carries values of this type.
    pub fn token_class(&self) -> &'static str {
        use crate::framework::data;
        match self {
            TokenType::Boolean => data::BOOLEAN_TOKEN,
            TokenType::UnsignedByte => data::UNSIGNED_BYTE_TOKEN,
            TokenType::Int => data::INT_TOKEN,
            TokenType::Long => data::LONG_TOKEN,
            TokenType::Double => data::DOUBLE_TOKEN,
            TokenType::Complex => data::COMPLEX_TOKEN,
            TokenType::Fix => data::FIX_TOKEN,
            TokenType::String => data::STRING_TOKEN,
            TokenType::Array(_) => data::ARRAY_TOKEN,
            TokenType::Matrix(e) => match **e {
                TokenType::Boolean => data::BOOLEAN_MATRIX_TOKEN,
                TokenType::Int => data::INT_MATRIX_TOKEN,
                TokenType::Long => data::LONG_MATRIX_TOKEN,
                TokenType::Complex => data::COMPLEX_MATRIX_TOKEN,
                TokenType::Fix => data::FIX_MATRIX_TOKEN,
                _ => data::DOUBLE_MATRIX_TOKEN,
            },
            TokenType::Record(_) => data::RECORD_TOKEN,
            TokenType::Function { .. } => data::FUNCTION_TOKEN,
            TokenType::General | TokenType::Unknown => data::TOKEN,
        }
    }

    /// Inverse of `token_class` for classes that determine a type on their own.
    pub fn from_token_class(class: &str) -> Option<TokenType> {
        use crate::framework::data;
        let t = match class {
            data::BOOLEAN_TOKEN => TokenType::Boolean,
            data::UNSIGNED_BYTE_TOKEN => TokenType::UnsignedByte,
            data::INT_TOKEN => TokenType::Int,
            data::LONG_TOKEN => TokenType::Long,
            data::DOUBLE_TOKEN => TokenType::Double,
            data::COMPLEX_TOKEN => TokenType::Complex,
            data::FIX_TOKEN => TokenType::Fix,
            data::STRING_TOKEN => TokenType::String,
            data::BOOLEAN_MATRIX_TOKEN => TokenType::Matrix(Box::new(TokenType::Boolean)),
            data::INT_MATRIX_TOKEN => TokenType::Matrix(Box::new(TokenType::Int)),
            data::LONG_MATRIX_TOKEN => TokenType::Matrix(Box::new(TokenType::Long)),
            data::DOUBLE_MATRIX_TOKEN => TokenType::Matrix(Box::new(TokenType::Double)),
            data::COMPLEX_MATRIX_TOKEN => TokenType::Matrix(Box::new(TokenType::Complex)),
            data::FIX_MATRIX_TOKEN => TokenType::Matrix(Box::new(TokenType::Fix)),
            _ => return None,
        };
        Some(t)
    }

    /// Primitive IR type for unboxed values of this type, if any.
    pub fn native_type(&self) -> Option<Type> {
        match self {
            TokenType::Boolean => Some(Type::Boolean),
            TokenType::UnsignedByte | TokenType::Int => Some(Type::Int),
            TokenType::Long => Some(Type::Long),
            TokenType::Double => Some(Type::Double),
            TokenType::String => Some(Type::String),
            _ => None,
        }
    }

    /// Accessor method on the token class returning the native value.
    pub fn native_accessor(&self) -> Option<&'static str> {
        match self {
            TokenType::Boolean => Some("booleanValue"),
            TokenType::UnsignedByte | TokenType::Int => Some("intValue"),
            TokenType::Long => Some("longValue"),
            TokenType::Double => Some("doubleValue"),
            TokenType::String => Some("stringValue"),
            _ => None,
        }
    }

    /// Parse a declared type name as written in model descriptions.
    pub fn parse_name(name: &str) -> Option<TokenType> {
        let name = name.trim();
        if let Some(inner) = name.strip_prefix("array<").and_then(|s| s.strip_suffix('>')) {
            return TokenType::parse_name(inner).map(|t| TokenType::Array(Box::new(t)));
        }
        if let Some(inner) = name.strip_prefix("matrix<").and_then(|s| s.strip_suffix('>')) {
            return TokenType::parse_name(inner).map(|t| TokenType::Matrix(Box::new(t)));
        }
        let t = match name {
            "boolean" => TokenType::Boolean,
            "unsignedByte" | "ubyte" => TokenType::UnsignedByte,
            "int" => TokenType::Int,
            "long" => TokenType::Long,
            "double" => TokenType::Double,
            "complex" => TokenType::Complex,
            "fixedpoint" | "fix" => TokenType::Fix,
            "string" => TokenType::String,
            "general" => TokenType::General,
            "unknown" => TokenType::Unknown,
            _ => return None,
        };
        Some(t)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Boolean => write!(f, "boolean"),
            TokenType::UnsignedByte => write!(f, "unsignedByte"),
            TokenType::Int => write!(f, "int"),
            TokenType::Long => write!(f, "long"),
            TokenType::Double => write!(f, "double"),
            TokenType::Complex => write!(f, "complex"),
            TokenType::Fix => write!(f, "fixedpoint"),
            TokenType::String => write!(f, "string"),
            TokenType::Array(e) => write!(f, "array<{e}>"),
            TokenType::Matrix(e) => write!(f, "matrix<{e}>"),
            TokenType::Record(fields) => {
                write!(f, "{{")?;
                for (i, (label, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{label} = {t}")?;
                }
                write!(f, "}}")
            }
            TokenType::Function { arity } => write!(f, "function/{arity}"),
            TokenType::General => write!(f, "general"),
            TokenType::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenType::*;

    #[test]
    fn int_double_join_is_double() {
        assert_eq!(Int.lub(&Double), Double);
        assert_eq!(Double.lub(&Int), Double);
    }

    #[test]
    fn chain_lub() {
        assert_eq!(UnsignedByte.lub(&Int), Int);
        assert_eq!(Int.lub(&Long), Long);
        assert_eq!(Double.lub(&Complex), Complex);
        assert_eq!(UnsignedByte.lub(&Double), Double);
    }

    #[test]
    fn cross_chain_lub_is_string() {
        assert_eq!(Long.lub(&Double), String);
        assert_eq!(Boolean.lub(&Int), String);
    }

    #[test]
    fn unknown_absorbs() {
        assert_eq!(Int.lub(&Unknown), Unknown);
        assert_eq!(Unknown.lub(&General), Unknown);
    }

    #[test]
    fn structured_lub() {
        assert_eq!(
            Array(Box::new(Int)).lub(&Array(Box::new(Double))),
            Array(Box::new(Double))
        );
        assert_eq!(Array(Box::new(Int)).lub(&Int), General);
        let a: BTreeMap<_, _> = [("x".to_string(), Int), ("y".to_string(), Boolean)].into();
        let b: BTreeMap<_, _> = [("x".to_string(), Double)].into();
        let expected: BTreeMap<_, _> = [("x".to_string(), Double)].into();
        assert_eq!(Record(a).lub(&Record(b)), Record(expected));
    }

    #[test]
    fn compare_encoding() {
        assert_eq!(Int.compare(&Int), SAME);
        assert_eq!(Int.compare(&Double), LOWER);
        assert_eq!(Double.compare(&Int), HIGHER);
        assert_eq!(Long.compare(&Double), INCOMPARABLE);
    }

    #[test]
    fn local_merge_is_narrow() {
        assert_eq!(Int.merge_local(&Int), Int);
        assert_eq!(Int.merge_local(&Double), Unknown);
        assert_eq!(
            Array(Box::new(Int)).merge_local(&Array(Box::new(Int))),
            Array(Box::new(Int))
        );
    }

    #[test]
    fn parse_names() {
        assert_eq!(TokenType::parse_name("int"), Some(Int));
        assert_eq!(
            TokenType::parse_name("array<double>"),
            Some(Array(Box::new(Double)))
        );
        assert_eq!(TokenType::parse_name("widget"), None);
    }

    #[test]
    fn token_class_roundtrip_for_scalars() {
        for t in [Boolean, UnsignedByte, Int, Long, Double, Complex, Fix, String] {
            assert_eq!(TokenType::from_token_class(t.token_class()), Some(t));
        }
    }
}
