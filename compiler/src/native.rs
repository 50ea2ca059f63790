// native.rs — Closed registry of native functions callable from expressions
//
// Expressions call functions such as `sin(x)` or methods such as
// `a.length()`. Each call is resolved against this fixed table, keyed by
// name, call kind and the static types of the arguments. An entry names the
// native target, the per-argument conversion from token to native value, the
// conversion of the native result back into a token, and optionally a
// compile-time evaluator used by the constant evaluator.
//
// Preconditions: none.
// Postconditions: `lookup` returns the first entry, in table order, whose
//   parameters accept every argument type.
// Failure modes: no match returns `None`; callers treat it as fatal.
// Side effects: `SignatureCache` memoizes lookups.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::framework::data;
use crate::ir::Type;
use crate::token::{Token, TokenResult};
use crate::types::TokenType;

// ── Data types ──────────────────────────────────────────────────────────────

/// Whether the call was written `f(x, y)` or `x.f(y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Function,
    Method,
}

/// Native representation of one argument or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeKind {
    Boolean,
    Int,
    Long,
    Double,
    String,
    Complex,
    Fix,
    BooleanMatrix,
    IntMatrix,
    LongMatrix,
    DoubleMatrix,
    ComplexMatrix,
    FixMatrix,
    /// `Token[]` obtained through `arrayValue()`.
    TokenArray,
    /// An `ArrayToken` passed unchanged.
    Array,
    /// Any token passed unchanged.
    Token,
}

impl NativeKind {
    fn scalar_accepts(self, t: &TokenType) -> bool {
        use TokenType as T;
        match self {
            NativeKind::Boolean => *t == T::Boolean,
            NativeKind::Int => matches!(t, T::Int | T::UnsignedByte),
            NativeKind::Long => matches!(t, T::Int | T::UnsignedByte | T::Long),
            NativeKind::Double => matches!(t, T::Int | T::UnsignedByte | T::Double),
            NativeKind::String => *t == T::String,
            NativeKind::Complex => matches!(t, T::Int | T::UnsignedByte | T::Double | T::Complex),
            NativeKind::Fix => *t == T::Fix,
            _ => false,
        }
    }

    fn matrix_element(self) -> Option<NativeKind> {
        match self {
            NativeKind::BooleanMatrix => Some(NativeKind::Boolean),
            NativeKind::IntMatrix => Some(NativeKind::Int),
            NativeKind::LongMatrix => Some(NativeKind::Long),
            NativeKind::DoubleMatrix => Some(NativeKind::Double),
            NativeKind::ComplexMatrix => Some(NativeKind::Complex),
            NativeKind::FixMatrix => Some(NativeKind::Fix),
            _ => None,
        }
    }

    /// True when a token of static type `t` converts to this kind.
    pub fn accepts(self, t: &TokenType) -> bool {
        if let Some(elem) = self.matrix_element() {
            return matches!(t, TokenType::Matrix(e) if elem.scalar_accepts(e));
        }
        match self {
            NativeKind::TokenArray | NativeKind::Array => matches!(t, TokenType::Array(_)),
            NativeKind::Token => true,
            scalar => scalar.scalar_accepts(t),
        }
    }

    /// IR type of the native value.
    pub fn ir_type(self) -> Type {
        if let Some(elem) = self.matrix_element() {
            return Type::array_of(Type::array_of(elem.ir_type()));
        }
        match self {
            NativeKind::Boolean => Type::Boolean,
            NativeKind::Int => Type::Int,
            NativeKind::Long => Type::Long,
            NativeKind::Double => Type::Double,
            NativeKind::String => Type::String,
            NativeKind::Complex => Type::object(data::COMPLEX),
            NativeKind::Fix => Type::object(data::FIX_POINT),
            NativeKind::TokenArray => Type::array_of(Type::object(data::TOKEN)),
            NativeKind::Array => Type::object(data::ARRAY_TOKEN),
            _ => Type::object(data::TOKEN),
        }
    }

    /// Accessor turning a token into this native kind; `None` passes the token.
    pub fn accessor(self) -> Option<&'static str> {
        let name = match self {
            NativeKind::Boolean => "booleanValue",
            NativeKind::Int => "intValue",
            NativeKind::Long => "longValue",
            NativeKind::Double => "doubleValue",
            NativeKind::String => "stringValue",
            NativeKind::Complex => "complexValue",
            NativeKind::Fix => "fixValue",
            NativeKind::BooleanMatrix => "booleanMatrix",
            NativeKind::IntMatrix => "intMatrix",
            NativeKind::LongMatrix => "longMatrix",
            NativeKind::DoubleMatrix => "doubleMatrix",
            NativeKind::ComplexMatrix => "complexMatrix",
            NativeKind::FixMatrix => "fixMatrix",
            NativeKind::TokenArray => "arrayValue",
            NativeKind::Array | NativeKind::Token => return None,
        };
        Some(name)
    }

    /// Token class wrapping a native result; `None` when it already is a token.
    pub fn wrapper(self) -> Option<&'static str> {
        let class = match self {
            NativeKind::Boolean => data::BOOLEAN_TOKEN,
            NativeKind::Int => data::INT_TOKEN,
            NativeKind::Long => data::LONG_TOKEN,
            NativeKind::Double => data::DOUBLE_TOKEN,
            NativeKind::String => data::STRING_TOKEN,
            NativeKind::Complex => data::COMPLEX_TOKEN,
            NativeKind::Fix => data::FIX_TOKEN,
            NativeKind::BooleanMatrix => data::BOOLEAN_MATRIX_TOKEN,
            NativeKind::IntMatrix => data::INT_MATRIX_TOKEN,
            NativeKind::LongMatrix => data::LONG_MATRIX_TOKEN,
            NativeKind::DoubleMatrix => data::DOUBLE_MATRIX_TOKEN,
            NativeKind::ComplexMatrix => data::COMPLEX_MATRIX_TOKEN,
            NativeKind::FixMatrix => data::FIX_MATRIX_TOKEN,
            NativeKind::TokenArray => data::ARRAY_TOKEN,
            NativeKind::Array | NativeKind::Token => return None,
        };
        Some(class)
    }

    /// Static token type of a wrapped result of this kind.
    pub fn token_type(self) -> TokenType {
        if let Some(elem) = self.matrix_element() {
            return TokenType::Matrix(Box::new(elem.token_type()));
        }
        match self {
            NativeKind::Boolean => TokenType::Boolean,
            NativeKind::Int => TokenType::Int,
            NativeKind::Long => TokenType::Long,
            NativeKind::Double => TokenType::Double,
            NativeKind::String => TokenType::String,
            NativeKind::Complex => TokenType::Complex,
            NativeKind::Fix => TokenType::Fix,
            NativeKind::TokenArray | NativeKind::Array => {
                TokenType::Array(Box::new(TokenType::General))
            }
            _ => TokenType::General,
        }
    }
}

/// Where the call goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Static {
        class: &'static str,
        method: &'static str,
    },
    /// Virtual call on the first argument (the receiver).
    Virtual { method: &'static str },
}

/// How the static result type is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    /// The wrapped result kind.
    Fixed,
    /// Least upper bound of the argument types.
    JoinArgs,
    /// Element type of the first (array) argument.
    ElementOfFirst,
    /// Array of the second argument's type.
    ArrayOfSecond,
}

/// Compile-time evaluation of an entry.
#[derive(Clone, Copy)]
pub enum Eval {
    /// No compile-time value; only code generation is possible.
    None,
    Double1(fn(f64) -> f64),
    Double2(fn(f64, f64) -> f64),
    Custom(fn(&[Token]) -> TokenResult),
}

pub struct NativeFunction {
    pub name: &'static str,
    pub call: CallKind,
    pub params: &'static [NativeKind],
    pub ret: NativeKind,
    pub result: ResultType,
    pub target: Target,
    pub eval: Eval,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:?}) -> {:?}", self.name, self.params, self.ret)
    }
}

impl NativeFunction {
    /// Static token type of the call's result for the given argument types.
    pub fn result_type(&self, args: &[TokenType]) -> TokenType {
        match self.result {
            ResultType::Fixed => self.ret.token_type(),
            ResultType::JoinArgs => args
                .iter()
                .skip(1)
                .fold(args.first().cloned().unwrap_or(TokenType::Unknown), |acc, t| {
                    acc.lub(t)
                }),
            ResultType::ElementOfFirst => args
                .first()
                .and_then(|t| t.element())
                .cloned()
                .unwrap_or(TokenType::General),
            ResultType::ArrayOfSecond => TokenType::Array(Box::new(
                args.get(1).cloned().unwrap_or(TokenType::General),
            )),
        }
    }

    /// Evaluate at compile time.
    pub fn evaluate(&self, args: &[Token]) -> TokenResult {
        match self.eval {
            Eval::None => Err(format!("{} has no compile-time value", self.name)),
            Eval::Double1(f) => {
                let x = double_arg(self.name, args, 0)?;
                Ok(Token::Double(f(x)))
            }
            Eval::Double2(f) => {
                let x = double_arg(self.name, args, 0)?;
                let y = double_arg(self.name, args, 1)?;
                Ok(Token::Double(f(x, y)))
            }
            Eval::Custom(f) => f(args),
        }
    }

    fn accepts(&self, call: CallKind, args: &[TokenType]) -> bool {
        self.call == call
            && self.params.len() == args.len()
            && self.params.iter().zip(args).all(|(p, a)| p.accepts(a))
    }
}

fn double_arg(name: &str, args: &[Token], i: usize) -> Result<f64, String> {
    args.get(i)
        .and_then(Token::as_double)
        .ok_or_else(|| format!("{name}: argument {i} is not numeric"))
}

// ── Evaluators ──────────────────────────────────────────────────────────────

fn eval_identity_abs(args: &[Token]) -> TokenResult {
    match args {
        [x] => x.absolute(),
        _ => Err("abs expects one argument".into()),
    }
}

fn eval_round(args: &[Token]) -> TokenResult {
    let x = double_arg("round", args, 0)?;
    Ok(Token::Long((x + 0.5).floor() as i64))
}

fn eval_min(args: &[Token]) -> TokenResult {
    match args {
        [a, b] => {
            let less = b.is_less_than(a)?;
            let pick = if less.as_bool() == Some(true) { b } else { a };
            pick.convert(&a.token_type().lub(&b.token_type()))
        }
        _ => Err("min expects two arguments".into()),
    }
}

fn eval_max(args: &[Token]) -> TokenResult {
    match args {
        [a, b] => {
            let less = a.is_less_than(b)?;
            let pick = if less.as_bool() == Some(true) { b } else { a };
            pick.convert(&a.token_type().lub(&b.token_type()))
        }
        _ => Err("max expects two arguments".into()),
    }
}

fn eval_sum(args: &[Token]) -> TokenResult {
    match args {
        [Token::Array { values, .. }] => {
            let mut iter = values.iter();
            let Some(first) = iter.next() else {
                return Ok(Token::Int(0));
            };
            iter.try_fold(first.clone(), |acc, v| acc.add(v))
        }
        _ => Err("sum expects an array".into()),
    }
}

/// Largest array or matrix a constant expression may build.
pub const MAX_ELEMENTS: usize = 1 << 20;

/// Element count of a `rows x cols` value, or why it cannot be built.
fn element_count(what: &str, rows: i32, cols: i32) -> Result<usize, String> {
    let (Ok(r), Ok(c)) = (usize::try_from(rows), usize::try_from(cols)) else {
        return Err(format!("{what}: negative dimension"));
    };
    match r.checked_mul(c) {
        Some(n) if n <= MAX_ELEMENTS => Ok(n),
        _ => Err(format!(
            "{what}: {rows} x {cols} exceeds {MAX_ELEMENTS} elements"
        )),
    }
}

fn eval_repeat(args: &[Token]) -> TokenResult {
    match args {
        [n, value] => {
            let n = n.as_int().ok_or("repeat: count is not an int")?;
            if n < 0 {
                return Err(format!("repeat: negative count {n}"));
            }
            let n = element_count("repeat", n, 1)?;
            Ok(Token::array(vec![value.clone(); n]))
        }
        _ => Err("repeat expects two arguments".into()),
    }
}

fn eval_zero_matrix(args: &[Token]) -> TokenResult {
    match args {
        [rows, cols] => {
            let rows = rows.as_int().ok_or("zeroMatrix: rows is not an int")?;
            let cols = cols.as_int().ok_or("zeroMatrix: cols is not an int")?;
            let n = element_count("zeroMatrix", rows, cols)?;
            Ok(Token::Matrix {
                elem: TokenType::Double,
                rows: rows as usize,
                cols: cols as usize,
                values: vec![Token::Double(0.0); n],
            })
        }
        _ => Err("zeroMatrix expects two arguments".into()),
    }
}

fn eval_conjugate(args: &[Token]) -> TokenResult {
    match args {
        [x] => match x.convert(&TokenType::Complex)? {
            Token::Complex { re, im } => Ok(Token::Complex { re, im: -im }),
            other => Err(format!("conjugate: not complex: {other}")),
        },
        _ => Err("conjugate expects one argument".into()),
    }
}

fn eval_length(args: &[Token]) -> TokenResult {
    match args {
        [x] => x.length(),
        _ => Err("length expects a receiver".into()),
    }
}

fn eval_to_string(args: &[Token]) -> TokenResult {
    match args {
        [x] => Ok(Token::String(x.to_string())),
        _ => Err("toString expects a receiver".into()),
    }
}

fn eval_add(args: &[Token]) -> TokenResult {
    match args {
        [a, b] => a.add(b),
        _ => Err("add expects one argument".into()),
    }
}

fn eval_subtract(args: &[Token]) -> TokenResult {
    match args {
        [a, b] => a.subtract(b),
        _ => Err("subtract expects one argument".into()),
    }
}

fn eval_multiply(args: &[Token]) -> TokenResult {
    match args {
        [a, b] => a.multiply(b),
        _ => Err("multiply expects one argument".into()),
    }
}

fn eval_divide(args: &[Token]) -> TokenResult {
    match args {
        [a, b] => a.divide(b),
        _ => Err("divide expects one argument".into()),
    }
}

// ── The table ───────────────────────────────────────────────────────────────

use NativeKind as K;

const fn math1(name: &'static str, f: fn(f64) -> f64) -> NativeFunction {
    NativeFunction {
        name,
        call: CallKind::Function,
        params: &[K::Double],
        ret: K::Double,
        result: ResultType::Fixed,
        target: Target::Static {
            class: data::MATH,
            method: name,
        },
        eval: Eval::Double1(f),
    }
}

const fn function(
    name: &'static str,
    params: &'static [NativeKind],
    ret: NativeKind,
    class: &'static str,
    eval: Eval,
) -> NativeFunction {
    NativeFunction {
        name,
        call: CallKind::Function,
        params,
        ret,
        result: ResultType::Fixed,
        target: Target::Static {
            class,
            method: name,
        },
        eval,
    }
}

const fn method(
    name: &'static str,
    params: &'static [NativeKind],
    ret: NativeKind,
    result: ResultType,
    eval: Eval,
) -> NativeFunction {
    NativeFunction {
        name,
        call: CallKind::Method,
        params,
        ret,
        result,
        target: Target::Virtual { method: name },
        eval,
    }
}

static REGISTRY: &[NativeFunction] = &[
    math1("sin", f64::sin),
    math1("cos", f64::cos),
    math1("tan", f64::tan),
    math1("asin", f64::asin),
    math1("acos", f64::acos),
    math1("atan", f64::atan),
    math1("exp", f64::exp),
    math1("log", f64::ln),
    math1("log10", f64::log10),
    math1("sqrt", f64::sqrt),
    math1("floor", f64::floor),
    math1("ceil", f64::ceil),
    function(
        "atan2",
        &[K::Double, K::Double],
        K::Double,
        data::MATH,
        Eval::Double2(f64::atan2),
    ),
    function(
        "pow",
        &[K::Double, K::Double],
        K::Double,
        data::MATH,
        Eval::Double2(f64::powf),
    ),
    function("abs", &[K::Int], K::Int, data::MATH, Eval::Custom(eval_identity_abs)),
    function("abs", &[K::Long], K::Long, data::MATH, Eval::Custom(eval_identity_abs)),
    function(
        "abs",
        &[K::Double],
        K::Double,
        data::MATH,
        Eval::Custom(eval_identity_abs),
    ),
    function("round", &[K::Double], K::Long, data::MATH, Eval::Custom(eval_round)),
    function("min", &[K::Int, K::Int], K::Int, data::MATH, Eval::Custom(eval_min)),
    function("min", &[K::Long, K::Long], K::Long, data::MATH, Eval::Custom(eval_min)),
    function(
        "min",
        &[K::Double, K::Double],
        K::Double,
        data::MATH,
        Eval::Custom(eval_min),
    ),
    function("max", &[K::Int, K::Int], K::Int, data::MATH, Eval::Custom(eval_max)),
    function("max", &[K::Long, K::Long], K::Long, data::MATH, Eval::Custom(eval_max)),
    function(
        "max",
        &[K::Double, K::Double],
        K::Double,
        data::MATH,
        Eval::Custom(eval_max),
    ),
    function(
        "conjugate",
        &[K::Complex],
        K::Complex,
        data::UTILITY_FUNCTIONS,
        Eval::Custom(eval_conjugate),
    ),
    function(
        "fix",
        &[K::Double, K::Int, K::Int],
        K::Fix,
        data::UTILITY_FUNCTIONS,
        Eval::None,
    ),
    function(
        "zeroMatrix",
        &[K::Int, K::Int],
        K::DoubleMatrix,
        data::UTILITY_FUNCTIONS,
        Eval::Custom(eval_zero_matrix),
    ),
    function(
        "transpose",
        &[K::DoubleMatrix],
        K::DoubleMatrix,
        data::UTILITY_FUNCTIONS,
        Eval::None,
    ),
    NativeFunction {
        name: "sum",
        call: CallKind::Function,
        params: &[K::TokenArray],
        ret: K::Token,
        result: ResultType::ElementOfFirst,
        target: Target::Static {
            class: data::UTILITY_FUNCTIONS,
            method: "sum",
        },
        eval: Eval::Custom(eval_sum),
    },
    NativeFunction {
        name: "repeat",
        call: CallKind::Function,
        params: &[K::Int, K::Token],
        ret: K::Array,
        result: ResultType::ArrayOfSecond,
        target: Target::Static {
            class: data::UTILITY_FUNCTIONS,
            method: "repeat",
        },
        eval: Eval::Custom(eval_repeat),
    },
    method(
        "length",
        &[K::Array],
        K::Int,
        ResultType::Fixed,
        Eval::Custom(eval_length),
    ),
    method(
        "toString",
        &[K::Token],
        K::String,
        ResultType::Fixed,
        Eval::Custom(eval_to_string),
    ),
    method(
        "add",
        &[K::Token, K::Token],
        K::Token,
        ResultType::JoinArgs,
        Eval::Custom(eval_add),
    ),
    method(
        "subtract",
        &[K::Token, K::Token],
        K::Token,
        ResultType::JoinArgs,
        Eval::Custom(eval_subtract),
    ),
    method(
        "multiply",
        &[K::Token, K::Token],
        K::Token,
        ResultType::JoinArgs,
        Eval::Custom(eval_multiply),
    ),
    method(
        "divide",
        &[K::Token, K::Token],
        K::Token,
        ResultType::JoinArgs,
        Eval::Custom(eval_divide),
    ),
];

// ── Public API ──────────────────────────────────────────────────────────────

/// Find the first entry accepting `args`.
pub fn lookup(name: &str, call: CallKind, args: &[TokenType]) -> Option<&'static NativeFunction> {
    REGISTRY
        .iter()
        .find(|f| f.name == name && f.accepts(call, args))
}

/// True if any entry carries this name, regardless of signature.
pub fn is_known(name: &str) -> bool {
    REGISTRY.iter().any(|f| f.name == name)
}

/// Calls that escape to a run-time interpreter. Never specializable.
pub fn is_interpreter_escape(name: &str) -> bool {
    matches!(name, "eval" | "matlab")
}

/// Built-in named constants.
pub fn constant(name: &str) -> Option<Token> {
    let t = match name {
        "PI" | "pi" => Token::Double(std::f64::consts::PI),
        "E" | "e" => Token::Double(std::f64::consts::E),
        "i" | "j" => Token::Complex { re: 0.0, im: 1.0 },
        "Infinity" => Token::Double(f64::INFINITY),
        "NaN" => Token::Double(f64::NAN),
        "MaxInt" => Token::Int(i32::MAX),
        "MinInt" => Token::Int(i32::MIN),
        _ => return None,
    };
    Some(t)
}

/// Stable textual rendering of the whole table, for provenance hashing.
pub fn fingerprint() -> String {
    let mut out = String::new();
    for f in REGISTRY {
        let _ = writeln!(out, "{:?} {:?} {:?}", f.call, f, f.target);
    }
    out
}

/// Memoizing front end to `lookup`, keyed by (name, argument types, call kind).
#[derive(Debug, Default)]
pub struct SignatureCache {
    entries: HashMap<(String, Vec<TokenType>, CallKind), Option<&'static NativeFunction>>,
    pub hits: usize,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &mut self,
        name: &str,
        call: CallKind,
        args: &[TokenType],
    ) -> Option<&'static NativeFunction> {
        let key = (name.to_string(), args.to_vec(), call);
        if let Some(found) = self.entries.get(&key) {
            self.hits += 1;
            return *found;
        }
        let found = lookup(name, call, args);
        self.entries.insert(key, found);
        found
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_argument_widens_to_double_entry() {
        let f = lookup("sin", CallKind::Function, &[TokenType::Int]).unwrap();
        assert_eq!(f.params, &[K::Double]);
        assert_eq!(f.result_type(&[TokenType::Int]), TokenType::Double);
    }

    #[test]
    fn most_specific_overload_wins() {
        let f = lookup("abs", CallKind::Function, &[TokenType::Int]).unwrap();
        assert_eq!(f.ret, K::Int);
        let f = lookup("abs", CallKind::Function, &[TokenType::Double]).unwrap();
        assert_eq!(f.ret, K::Double);
    }

    #[test]
    fn unknown_argument_matches_nothing_numeric() {
        assert!(lookup("sqrt", CallKind::Function, &[TokenType::Unknown]).is_none());
        assert!(lookup("sqrt", CallKind::Function, &[TokenType::String]).is_none());
    }

    #[test]
    fn oversized_constructions_are_errors() {
        let huge = eval_zero_matrix(&[Token::Int(65536), Token::Int(65536)]).unwrap_err();
        assert!(huge.contains("zeroMatrix"), "{huge}");
        assert!(eval_zero_matrix(&[Token::Int(-1), Token::Int(2)]).is_err());
        assert!(eval_repeat(&[Token::Int(2_000_000_000), Token::Int(1)]).is_err());

        let Token::Matrix { rows, cols, values, .. } =
            eval_zero_matrix(&[Token::Int(2), Token::Int(3)]).unwrap()
        else {
            panic!("expected a matrix")
        };
        assert_eq!((rows, cols, values.len()), (2, 3, 6));
        assert_eq!(
            eval_repeat(&[Token::Int(3), Token::Int(7)]).unwrap(),
            Token::array(vec![Token::Int(7); 3])
        );
    }

    #[test]
    fn call_kind_is_part_of_the_key() {
        let arr = TokenType::Array(Box::new(TokenType::Int));
        assert!(lookup("length", CallKind::Method, &[arr.clone()]).is_some());
        assert!(lookup("length", CallKind::Function, &[arr]).is_none());
    }

    #[test]
    fn evaluators() {
        let f = lookup("max", CallKind::Function, &[TokenType::Int, TokenType::Int]).unwrap();
        assert_eq!(f.evaluate(&[Token::Int(3), Token::Int(7)]), Ok(Token::Int(7)));
        let f = lookup("round", CallKind::Function, &[TokenType::Double]).unwrap();
        assert_eq!(f.evaluate(&[Token::Double(2.5)]), Ok(Token::Long(3)));
        let arr = TokenType::Array(Box::new(TokenType::Int));
        let f = lookup("sum", CallKind::Function, &[arr.clone()]).unwrap();
        assert_eq!(f.result_type(&[arr]), TokenType::Int);
        assert_eq!(
            f.evaluate(&[Token::array(vec![Token::Int(1), Token::Int(2)])]),
            Ok(Token::Int(3))
        );
    }

    #[test]
    fn cache_counts_hits() {
        let mut cache = SignatureCache::new();
        let args = [TokenType::Double];
        assert!(cache.resolve("cos", CallKind::Function, &args).is_some());
        assert!(cache.resolve("cos", CallKind::Function, &args).is_some());
        assert_eq!(cache.hits, 1);
    }

    #[test]
    fn interpreter_escapes() {
        assert!(is_interpreter_escape("eval"));
        assert!(is_interpreter_escape("matlab"));
        assert!(!is_interpreter_escape("sin"));
    }
}
