// Lexer for attribute expressions.
//
// Tokenizes the expression language used by parameter and actor
// expressions. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters and out-of-range literals produce
//   `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in expression text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(LexToken, Span)>,
    pub errors: Vec<LexError>,
}

/// Expression token types.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum LexToken {
    // ── Keywords ──
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("function")]
    Function,

    // ── Operators ──
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("#")]
    Hash,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token(">>>")]
    Ushr,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(".")]
    Dot,
    #[token("=")]
    Assign,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // ── Literals ──
    //
    // Suffixed integers must win over a bare integer followed by an
    // identifier; logos picks the longest match.
    #[regex(r"[0-9]+ub", parse_ubyte)]
    UnsignedByte(u8),

    #[regex(r"[0-9]+[lL]", parse_long)]
    Long(i64),

    #[regex(r"[0-9]+", parse_int)]
    Int(i32),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", parse_double)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", parse_double)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", parse_double)]
    Double(f64),

    /// String literal with `\"`, `\\`, `\n` and `\t` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    Str(String),

    // ── Identifier ──
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl fmt::Display for LexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexToken::True => write!(f, "true"),
            LexToken::False => write!(f, "false"),
            LexToken::Function => write!(f, "function"),
            LexToken::Plus => write!(f, "+"),
            LexToken::Minus => write!(f, "-"),
            LexToken::Star => write!(f, "*"),
            LexToken::Slash => write!(f, "/"),
            LexToken::Percent => write!(f, "%"),
            LexToken::Caret => write!(f, "^"),
            LexToken::AndAnd => write!(f, "&&"),
            LexToken::OrOr => write!(f, "||"),
            LexToken::Amp => write!(f, "&"),
            LexToken::Pipe => write!(f, "|"),
            LexToken::Hash => write!(f, "#"),
            LexToken::Tilde => write!(f, "~"),
            LexToken::Bang => write!(f, "!"),
            LexToken::EqEq => write!(f, "=="),
            LexToken::NotEq => write!(f, "!="),
            LexToken::Lt => write!(f, "<"),
            LexToken::Le => write!(f, "<="),
            LexToken::Gt => write!(f, ">"),
            LexToken::Ge => write!(f, ">="),
            LexToken::Shl => write!(f, "<<"),
            LexToken::Shr => write!(f, ">>"),
            LexToken::Ushr => write!(f, ">>>"),
            LexToken::Question => write!(f, "?"),
            LexToken::Colon => write!(f, ":"),
            LexToken::Comma => write!(f, ","),
            LexToken::Semi => write!(f, ";"),
            LexToken::Dot => write!(f, "."),
            LexToken::Assign => write!(f, "="),
            LexToken::LParen => write!(f, "("),
            LexToken::RParen => write!(f, ")"),
            LexToken::LBrace => write!(f, "{{"),
            LexToken::RBrace => write!(f, "}}"),
            LexToken::LBracket => write!(f, "["),
            LexToken::RBracket => write!(f, "]"),
            LexToken::UnsignedByte(v) => write!(f, "{v}ub"),
            LexToken::Long(v) => write!(f, "{v}L"),
            LexToken::Int(v) => write!(f, "{v}"),
            LexToken::Double(v) => write!(f, "{v:?}"),
            LexToken::Str(s) => write!(f, "{s:?}"),
            LexToken::Ident(s) => write!(f, "{s}"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, LexToken>) -> Option<i32> {
    lex.slice().parse().ok()
}

fn parse_long(lex: &mut logos::Lexer<'_, LexToken>) -> Option<i64> {
    let slice = lex.slice();
    slice[..slice.len() - 1].parse().ok()
}

fn parse_ubyte(lex: &mut logos::Lexer<'_, LexToken>) -> Option<u8> {
    let slice = lex.slice();
    slice[..slice.len() - 2].parse().ok()
}

fn parse_double(lex: &mut logos::Lexer<'_, LexToken>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, LexToken>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex an expression into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = LexToken::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<LexToken> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            lex_ok("5 5L 5ub 2.5 1e3 .5"),
            vec![
                LexToken::Int(5),
                LexToken::Long(5),
                LexToken::UnsignedByte(5),
                LexToken::Double(2.5),
                LexToken::Double(1000.0),
                LexToken::Double(0.5),
            ]
        );
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            lex_ok("a >>> b >> c > d && e & f"),
            vec![
                LexToken::Ident("a".into()),
                LexToken::Ushr,
                LexToken::Ident("b".into()),
                LexToken::Shr,
                LexToken::Ident("c".into()),
                LexToken::Gt,
                LexToken::Ident("d".into()),
                LexToken::AndAnd,
                LexToken::Ident("e".into()),
                LexToken::Amp,
                LexToken::Ident("f".into()),
            ]
        );
    }

    #[test]
    fn keywords_vs_identifiers() {
        assert_eq!(
            lex_ok("true truth function functions"),
            vec![
                LexToken::True,
                LexToken::Ident("truth".into()),
                LexToken::Function,
                LexToken::Ident("functions".into()),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            lex_ok(r#""a\"b\n""#),
            vec![LexToken::Str("a\"b\n".into())]
        );
    }

    #[test]
    fn int_overflow_is_an_error() {
        let result = lex("99999999999");
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn unknown_character_recovers() {
        let result = lex("1 @ 2");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.tokens.len(), 2);
    }
}
