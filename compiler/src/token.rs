// token.rs — Compile-time model of runtime tokens
//
// A `Token` is the value a parameter evaluates to. The specializer needs
// concrete values to tag immutable value-holder fields, to fold accessor
// calls on constant tokens, and to check that constant folding agrees with
// the runtime arithmetic. Operations follow the value-type lattice: operands
// are converted to their least upper bound before the operation is applied.
//
// Preconditions: none.
// Postconditions: every successful operation returns a token whose type is
//   the lattice join of the operand types (or boolean for comparisons).
// Failure modes: type combinations without a defined conversion and integer
//   division by zero return `Err(message)`.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::ast::Expr;
use crate::types::TokenType;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Boolean(bool),
    UnsignedByte(u8),
    Int(i32),
    Long(i64),
    Double(f64),
    Complex { re: f64, im: f64 },
    String(String),
    Array {
        elem: TokenType,
        values: Vec<Token>,
    },
    Matrix {
        elem: TokenType,
        rows: usize,
        cols: usize,
        values: Vec<Token>,
    },
    Record(BTreeMap<String, Token>),
    Function {
        params: Vec<(String, Option<TokenType>)>,
        body: Box<Expr>,
        captured: BTreeMap<String, Token>,
    },
}

pub type TokenResult = Result<Token, String>;

impl Token {
    pub fn token_type(&self) -> TokenType {
        match self {
            Token::Boolean(_) => TokenType::Boolean,
            Token::UnsignedByte(_) => TokenType::UnsignedByte,
            Token::Int(_) => TokenType::Int,
            Token::Long(_) => TokenType::Long,
            Token::Double(_) => TokenType::Double,
            Token::Complex { .. } => TokenType::Complex,
            Token::String(_) => TokenType::String,
            Token::Array { elem, .. } => TokenType::Array(Box::new(elem.clone())),
            Token::Matrix { elem, .. } => TokenType::Matrix(Box::new(elem.clone())),
            Token::Record(fields) => TokenType::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.token_type()))
                    .collect(),
            ),
            Token::Function { params, .. } => TokenType::Function {
                arity: params.len(),
            },
        }
    }

    /// Build an array token; the element type is the join of the elements.
    pub fn array(values: Vec<Token>) -> Token {
        let elem = join_types(values.iter().map(|v| v.token_type()));
        let values = convert_all(values, &elem);
        Token::Array { elem, values }
    }

    pub fn matrix(rows: usize, cols: usize, values: Vec<Token>) -> Token {
        let elem = join_types(values.iter().map(|v| v.token_type()));
        let values = convert_all(values, &elem);
        Token::Matrix {
            elem,
            rows,
            cols,
            values,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Token::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Token::UnsignedByte(v) => Some(*v as i32),
            Token::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Token::UnsignedByte(v) => Some(*v as i64),
            Token::Int(v) => Some(*v as i64),
            Token::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Token::UnsignedByte(v) => Some(*v as f64),
            Token::Int(v) => Some(*v as f64),
            Token::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Widen to `to`. Only lossless conversions along the lattice succeed.
    pub fn convert(&self, to: &TokenType) -> TokenResult {
        let from = self.token_type();
        if &from == to || *to == TokenType::General || *to == TokenType::Unknown {
            return Ok(self.clone());
        }
        if !from.leq(to) {
            return Err(format!("cannot convert {} to {}", from, to));
        }
        let converted = match (self, to) {
            (_, TokenType::Int) => self.as_int().map(Token::Int),
            (_, TokenType::Long) => self.as_long().map(Token::Long),
            (_, TokenType::Double) => self.as_double().map(Token::Double),
            (Token::Complex { .. }, TokenType::Complex) => Some(self.clone()),
            (_, TokenType::Complex) => self.as_double().map(|re| Token::Complex { re, im: 0.0 }),
            (Token::String(_), TokenType::String) => Some(self.clone()),
            (_, TokenType::String) => Some(Token::String(self.to_string())),
            (Token::Array { values, .. }, TokenType::Array(e)) => {
                let values: Result<Vec<_>, _> = values.iter().map(|v| v.convert(e)).collect();
                return Ok(Token::Array {
                    elem: (**e).clone(),
                    values: values?,
                });
            }
            (
                Token::Matrix {
                    rows, cols, values, ..
                },
                TokenType::Matrix(e),
            ) => {
                let values: Result<Vec<_>, _> = values.iter().map(|v| v.convert(e)).collect();
                return Ok(Token::Matrix {
                    elem: (**e).clone(),
                    rows: *rows,
                    cols: *cols,
                    values: values?,
                });
            }
            _ => None,
        };
        converted.ok_or_else(|| format!("cannot convert {} to {}", from, to))
    }

    // ── Arithmetic ──────────────────────────────────────────────────────────

    pub fn add(&self, other: &Token) -> TokenResult {
        self.arith(other, ArithOp::Add)
    }

    pub fn subtract(&self, other: &Token) -> TokenResult {
        self.arith(other, ArithOp::Sub)
    }

    pub fn multiply(&self, other: &Token) -> TokenResult {
        self.arith(other, ArithOp::Mul)
    }

    pub fn divide(&self, other: &Token) -> TokenResult {
        self.arith(other, ArithOp::Div)
    }

    pub fn modulo(&self, other: &Token) -> TokenResult {
        self.arith(other, ArithOp::Mod)
    }

    fn arith(&self, other: &Token, op: ArithOp) -> TokenResult {
        match (self, other) {
            (Token::Array { values: a, .. }, Token::Array { values: b, .. }) => {
                if a.len() != b.len() {
                    return Err(format!(
                        "array lengths differ in {}: {} vs {}",
                        op.name(),
                        a.len(),
                        b.len()
                    ));
                }
                let values: Result<Vec<_>, _> =
                    a.iter().zip(b).map(|(x, y)| x.arith(y, op)).collect();
                Ok(Token::array(values?))
            }
            (Token::Array { values, .. }, s) if s.token_type().is_scalar() => {
                let values: Result<Vec<_>, _> = values.iter().map(|x| x.arith(s, op)).collect();
                Ok(Token::array(values?))
            }
            (s, Token::Array { values, .. }) if s.token_type().is_scalar() => {
                let values: Result<Vec<_>, _> = values.iter().map(|y| s.arith(y, op)).collect();
                Ok(Token::array(values?))
            }
            (
                Token::Matrix {
                    rows: r1,
                    cols: c1,
                    values: a,
                    ..
                },
                Token::Matrix {
                    rows: r2,
                    cols: c2,
                    values: b,
                    ..
                },
            ) if matches!(op, ArithOp::Add | ArithOp::Sub) => {
                if (r1, c1) != (r2, c2) {
                    return Err(format!("matrix dimensions differ in {}", op.name()));
                }
                let values: Result<Vec<_>, _> =
                    a.iter().zip(b).map(|(x, y)| x.arith(y, op)).collect();
                Ok(Token::matrix(*r1, *c1, values?))
            }
            _ => self.scalar_arith(other, op),
        }
    }

    fn scalar_arith(&self, other: &Token, op: ArithOp) -> TokenResult {
        let ty = self.token_type().lub(&other.token_type());
        let a = self.convert(&ty)?;
        let b = other.convert(&ty)?;
        let result = match (&a, &b) {
            (Token::UnsignedByte(x), Token::UnsignedByte(y)) => {
                let (x, y) = (*x, *y);
                Token::UnsignedByte(match op {
                    ArithOp::Add => x.wrapping_add(y),
                    ArithOp::Sub => x.wrapping_sub(y),
                    ArithOp::Mul => x.wrapping_mul(y),
                    ArithOp::Div => x.checked_div(y).ok_or("division by zero")?,
                    ArithOp::Mod => x.checked_rem(y).ok_or("division by zero")?,
                })
            }
            (Token::Int(x), Token::Int(y)) => {
                let (x, y) = (*x, *y);
                Token::Int(match op {
                    ArithOp::Add => x.wrapping_add(y),
                    ArithOp::Sub => x.wrapping_sub(y),
                    ArithOp::Mul => x.wrapping_mul(y),
                    ArithOp::Div => x.checked_div(y).ok_or("division by zero")?,
                    ArithOp::Mod => x.checked_rem(y).ok_or("division by zero")?,
                })
            }
            (Token::Long(x), Token::Long(y)) => {
                let (x, y) = (*x, *y);
                Token::Long(match op {
                    ArithOp::Add => x.wrapping_add(y),
                    ArithOp::Sub => x.wrapping_sub(y),
                    ArithOp::Mul => x.wrapping_mul(y),
                    ArithOp::Div => x.checked_div(y).ok_or("division by zero")?,
                    ArithOp::Mod => x.checked_rem(y).ok_or("division by zero")?,
                })
            }
            (Token::Double(x), Token::Double(y)) => Token::Double(match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
                ArithOp::Mod => x % y,
            }),
            (Token::Complex { re: a, im: b }, Token::Complex { re: c, im: d }) => {
                let (a, b, c, d) = (*a, *b, *c, *d);
                match op {
                    ArithOp::Add => Token::Complex { re: a + c, im: b + d },
                    ArithOp::Sub => Token::Complex { re: a - c, im: b - d },
                    ArithOp::Mul => Token::Complex {
                        re: a * c - b * d,
                        im: a * d + b * c,
                    },
                    ArithOp::Div => {
                        let denom = c * c + d * d;
                        Token::Complex {
                            re: (a * c + b * d) / denom,
                            im: (b * c - a * d) / denom,
                        }
                    }
                    ArithOp::Mod => return Err("modulo is not defined on complex".into()),
                }
            }
            (Token::String(x), Token::String(y)) if op == ArithOp::Add => {
                Token::String(format!("{x}{y}"))
            }
            _ => {
                return Err(format!(
                    "{} is not defined between {} and {}",
                    op.name(),
                    self.token_type(),
                    other.token_type()
                ))
            }
        };
        Ok(result)
    }

    pub fn negate(&self) -> TokenResult {
        match self {
            Token::UnsignedByte(v) => Ok(Token::UnsignedByte(v.wrapping_neg())),
            Token::Int(v) => Ok(Token::Int(v.wrapping_neg())),
            Token::Long(v) => Ok(Token::Long(v.wrapping_neg())),
            Token::Double(v) => Ok(Token::Double(-v)),
            Token::Complex { re, im } => Ok(Token::Complex { re: -re, im: -im }),
            Token::Array { values, .. } => {
                let values: Result<Vec<_>, _> = values.iter().map(|v| v.negate()).collect();
                Ok(Token::array(values?))
            }
            _ => Err(format!("negation is not defined on {}", self.token_type())),
        }
    }

    /// Raise to a non-negative integer power.
    pub fn pow(&self, times: i32) -> TokenResult {
        if times < 0 {
            return match self.as_double() {
                Some(d) => Ok(Token::Double(d.powi(times))),
                None => Err("negative exponent on a non-numeric token".into()),
            };
        }
        let mut result = self.one()?;
        for _ in 0..times {
            result = result.multiply(self)?;
        }
        Ok(result)
    }

    pub fn one(&self) -> TokenResult {
        match self.token_type() {
            TokenType::UnsignedByte => Ok(Token::UnsignedByte(1)),
            TokenType::Int => Ok(Token::Int(1)),
            TokenType::Long => Ok(Token::Long(1)),
            TokenType::Double => Ok(Token::Double(1.0)),
            TokenType::Complex => Ok(Token::Complex { re: 1.0, im: 0.0 }),
            t => Err(format!("one is not defined on {}", t)),
        }
    }

    pub fn zero(&self) -> TokenResult {
        self.one()?.subtract(&self.one()?)
    }

    /// Magnitude; complex tokens become doubles.
    pub fn absolute(&self) -> TokenResult {
        match self {
            Token::UnsignedByte(_) => Ok(self.clone()),
            Token::Int(v) => Ok(Token::Int(v.wrapping_abs())),
            Token::Long(v) => Ok(Token::Long(v.wrapping_abs())),
            Token::Double(v) => Ok(Token::Double(v.abs())),
            Token::Complex { re, im } => Ok(Token::Double(re.hypot(*im))),
            _ => Err(format!("absolute is not defined on {}", self.token_type())),
        }
    }

    // ── Comparison and logic ────────────────────────────────────────────────

    pub fn is_equal_to(&self, other: &Token) -> TokenResult {
        let ty = self.token_type().lub(&other.token_type());
        let equal = match (self.convert(&ty), other.convert(&ty)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        Ok(Token::Boolean(equal))
    }

    pub fn is_less_than(&self, other: &Token) -> TokenResult {
        let ty = self.token_type().lub(&other.token_type());
        let a = self.convert(&ty)?;
        let b = other.convert(&ty)?;
        let less = match (&a, &b) {
            (Token::UnsignedByte(x), Token::UnsignedByte(y)) => x < y,
            (Token::Int(x), Token::Int(y)) => x < y,
            (Token::Long(x), Token::Long(y)) => x < y,
            (Token::Double(x), Token::Double(y)) => x < y,
            _ => return Err(format!("ordering is not defined on {}", ty)),
        };
        Ok(Token::Boolean(less))
    }

    pub fn not(&self) -> TokenResult {
        match self {
            Token::Boolean(b) => Ok(Token::Boolean(!b)),
            _ => Err(format!("logical not is not defined on {}", self.token_type())),
        }
    }

    pub fn bitwise(&self, other: &Token, op: BitOp) -> TokenResult {
        let ty = self.token_type().lub(&other.token_type());
        match (self.convert(&ty)?, other.convert(&ty)?) {
            (Token::Boolean(x), Token::Boolean(y)) => Ok(Token::Boolean(op.apply_bool(x, y))),
            (Token::UnsignedByte(x), Token::UnsignedByte(y)) => Ok(Token::UnsignedByte(
                op.apply_i64(x as i64, y as i64) as u8,
            )),
            (Token::Int(x), Token::Int(y)) => {
                Ok(Token::Int(op.apply_i64(x as i64, y as i64) as i32))
            }
            (Token::Long(x), Token::Long(y)) => Ok(Token::Long(op.apply_i64(x, y))),
            _ => Err(format!("bitwise operations are not defined on {}", ty)),
        }
    }

    pub fn bitwise_not(&self) -> TokenResult {
        match self {
            Token::UnsignedByte(v) => Ok(Token::UnsignedByte(!v)),
            Token::Int(v) => Ok(Token::Int(!v)),
            Token::Long(v) => Ok(Token::Long(!v)),
            _ => Err(format!("bitwise not is not defined on {}", self.token_type())),
        }
    }

    pub fn shift(&self, bits: i32, op: ShiftOp) -> TokenResult {
        let bits = bits as u32;
        match self {
            Token::Int(v) => Ok(Token::Int(match op {
                ShiftOp::Left => v.wrapping_shl(bits),
                ShiftOp::Right => v.wrapping_shr(bits),
                ShiftOp::LogicalRight => ((*v as u32).wrapping_shr(bits)) as i32,
            })),
            Token::Long(v) => Ok(Token::Long(match op {
                ShiftOp::Left => v.wrapping_shl(bits),
                ShiftOp::Right => v.wrapping_shr(bits),
                ShiftOp::LogicalRight => ((*v as u64).wrapping_shr(bits)) as i64,
            })),
            Token::UnsignedByte(v) => Ok(Token::UnsignedByte(match op {
                ShiftOp::Left => v.wrapping_shl(bits),
                ShiftOp::Right | ShiftOp::LogicalRight => v.wrapping_shr(bits),
            })),
            _ => Err(format!("shift is not defined on {}", self.token_type())),
        }
    }

    // ── Structured access ───────────────────────────────────────────────────

    pub fn element(&self, index: i32) -> TokenResult {
        match self {
            Token::Array { values, .. } => usize::try_from(index)
                .ok()
                .and_then(|i| values.get(i).cloned())
                .ok_or_else(|| format!("array index {index} out of bounds")),
            _ => Err(format!("cannot index {}", self.token_type())),
        }
    }

    pub fn matrix_element(&self, row: i32, col: i32) -> TokenResult {
        match self {
            Token::Matrix {
                rows, cols, values, ..
            } => {
                let (r, c) = (row as usize, col as usize);
                if row < 0 || col < 0 || r >= *rows || c >= *cols {
                    return Err(format!("matrix index ({row}, {col}) out of bounds"));
                }
                Ok(values[r * cols + c].clone())
            }
            _ => Err(format!("cannot index {} as a matrix", self.token_type())),
        }
    }

    pub fn record_get(&self, label: &str) -> TokenResult {
        match self {
            Token::Record(fields) => fields
                .get(label)
                .cloned()
                .ok_or_else(|| format!("record has no field '{label}'")),
            _ => Err(format!("{} is not a record", self.token_type())),
        }
    }

    pub fn length(&self) -> TokenResult {
        match self {
            Token::Array { values, .. } => Ok(Token::Int(values.len() as i32)),
            Token::String(s) => Ok(Token::Int(s.chars().count() as i32)),
            _ => Err(format!("length is not defined on {}", self.token_type())),
        }
    }
}

fn join_types(types: impl Iterator<Item = TokenType>) -> TokenType {
    types
        .reduce(|a, b| a.lub(&b))
        .unwrap_or(TokenType::General)
}

fn convert_all(values: Vec<Token>, to: &TokenType) -> Vec<Token> {
    values
        .into_iter()
        .map(|v| v.convert(to).unwrap_or(v))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "subtract",
            ArithOp::Mul => "multiply",
            ArithOp::Div => "divide",
            ArithOp::Mod => "modulo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
}

impl BitOp {
    fn apply_bool(self, x: bool, y: bool) -> bool {
        match self {
            BitOp::And => x & y,
            BitOp::Or => x | y,
            BitOp::Xor => x ^ y,
        }
    }

    fn apply_i64(self, x: i64, y: i64) -> i64 {
        match self {
            BitOp::And => x & y,
            BitOp::Or => x | y,
            BitOp::Xor => x ^ y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Left,
    Right,
    LogicalRight,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Boolean(b) => write!(f, "{b}"),
            Token::UnsignedByte(v) => write!(f, "{v}ub"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Long(v) => write!(f, "{v}L"),
            Token::Double(v) => write!(f, "{v:?}"),
            Token::Complex { re, im } => {
                if *im < 0.0 {
                    write!(f, "{re:?} - {:?}i", -im)
                } else {
                    write!(f, "{re:?} + {im:?}i")
                }
            }
            Token::String(s) => write!(f, "{s:?}"),
            Token::Array { values, .. } => {
                write!(f, "{{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
            Token::Matrix {
                rows, cols, values, ..
            } => {
                write!(f, "[")?;
                for r in 0..*rows {
                    if r > 0 {
                        write!(f, "; ")?;
                    }
                    for c in 0..*cols {
                        if c > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", values[r * cols + c])?;
                    }
                }
                write!(f, "]")
            }
            Token::Record(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
            Token::Function { params, .. } => {
                let names: Vec<&str> = params.iter().map(|(n, _)| n.as_str()).collect();
                write!(f, "(function({}) ...)", names.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_arithmetic_widens() {
        assert_eq!(
            Token::Int(2).multiply(&Token::Double(1.5)),
            Ok(Token::Double(3.0))
        );
        assert_eq!(Token::Int(2).add(&Token::Long(3)), Ok(Token::Long(5)));
    }

    #[test]
    fn integer_division_by_zero_fails() {
        assert!(Token::Int(1).divide(&Token::Int(0)).is_err());
        assert_eq!(Token::Int(7).divide(&Token::Int(2)), Ok(Token::Int(3)));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            Token::String("a".into()).add(&Token::Int(1)),
            Ok(Token::String("a1".into()))
        );
    }

    #[test]
    fn array_broadcast() {
        let a = Token::array(vec![Token::Int(1), Token::Int(2)]);
        assert_eq!(
            a.multiply(&Token::Int(3)),
            Ok(Token::array(vec![Token::Int(3), Token::Int(6)]))
        );
    }

    #[test]
    fn array_elements_are_joined() {
        let a = Token::array(vec![Token::Int(1), Token::Double(2.5)]);
        assert_eq!(a.token_type(), TokenType::Array(Box::new(TokenType::Double)));
        assert_eq!(a.element(0), Ok(Token::Double(1.0)));
    }

    #[test]
    fn complex_absolute_is_double() {
        let c = Token::Complex { re: 3.0, im: 4.0 };
        assert_eq!(c.absolute(), Ok(Token::Double(5.0)));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Token::Int(5).to_string(), "5");
        assert_eq!(Token::Long(5).to_string(), "5L");
        assert_eq!(Token::Double(2.0).to_string(), "2.0");
        assert_eq!(
            Token::matrix(2, 2, vec![Token::Int(1), Token::Int(2), Token::Int(3), Token::Int(4)])
                .to_string(),
            "[1, 2; 3, 4]"
        );
    }

    #[test]
    fn pow_and_shift() {
        assert_eq!(Token::Int(3).pow(3), Ok(Token::Int(27)));
        assert_eq!(Token::Int(1).shift(4, ShiftOp::Left), Ok(Token::Int(16)));
        assert_eq!(Token::Int(-1).shift(28, ShiftOp::LogicalRight), Ok(Token::Int(15)));
    }
}
