// Parser for attribute expressions.
//
// Parses a token stream (from the lexer) into an expression tree. Uses
// chumsky combinators. Precedence, loosest first:
//   ?:  ||  &&  |  #  &  relational  shift  sum  product  unary  power  postfix
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an expression plus any parse errors.
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::LexToken;
use crate::types::TokenType;

/// Result of parsing: expression plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub expr: Option<Expr>,
    pub errors: Vec<Rich<'static, LexToken, SimpleSpan>>,
}

/// Parse an expression string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = expr_parser().then_ignore(end());
    let (expr, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, LexToken, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        expr,
        errors: all_errors,
    }
}

/// Parse an expression, folding every error into one message.
pub fn parse_expression(source: &str) -> Result<Expr, String> {
    let result = parse(source);
    if !result.errors.is_empty() {
        let messages: Vec<String> = result
            .errors
            .iter()
            .map(|e| format!("{} at {}..{}", e, e.span().start, e.span().end))
            .collect();
        return Err(messages.join("; "));
    }
    result
        .expr
        .ok_or_else(|| format!("could not parse {source:?}"))
}

// ── Grammar ──

/// Postfix operations applied left to right after an atom.
enum Postfix {
    Call(Vec<Expr>),
    Method(String, Vec<Expr>),
    Member(String),
}

fn chain(first: Expr, rest: Vec<Expr>, build: impl FnOnce(Vec<Expr>) -> Expr) -> Expr {
    if rest.is_empty() {
        return first;
    }
    let mut operands = Vec::with_capacity(rest.len() + 1);
    operands.push(first);
    operands.extend(rest);
    build(operands)
}

fn negate(operand: Expr) -> Expr {
    match operand {
        Expr::Literal(Literal::Int(v)) => Expr::Literal(Literal::Int(-v)),
        Expr::Literal(Literal::Long(v)) => Expr::Literal(Literal::Long(-v)),
        Expr::Literal(Literal::Double(v)) => Expr::Literal(Literal::Double(-v)),
        other => Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(other),
        },
    }
}

fn expr_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, LexToken, SimpleSpan>>> + Clone
where
    I: ValueInput<'tokens, Token = LexToken, Span = SimpleSpan>,
{
    recursive(|expr| {
        let ident = select! { LexToken::Ident(name) => name };

        // ── Leaves ──

        let literal = select! {
            LexToken::Int(v) => Expr::Literal(Literal::Int(v)),
            LexToken::Long(v) => Expr::Literal(Literal::Long(v)),
            LexToken::UnsignedByte(v) => Expr::Literal(Literal::UnsignedByte(v)),
            LexToken::Double(v) => Expr::Literal(Literal::Double(v)),
            LexToken::Str(s) => Expr::Literal(Literal::String(s)),
            LexToken::True => Expr::Literal(Literal::Boolean(true)),
            LexToken::False => Expr::Literal(Literal::Boolean(false)),
        };

        let args = expr
            .clone()
            .separated_by(just(LexToken::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(LexToken::LParen), just(LexToken::RParen));

        // ── Structured literals ──

        let record = ident
            .clone()
            .then_ignore(just(LexToken::Assign))
            .then(expr.clone())
            .separated_by(just(LexToken::Comma))
            .at_least(1)
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(LexToken::LBrace), just(LexToken::RBrace))
            .map(Expr::Record);

        let array = expr
            .clone()
            .separated_by(just(LexToken::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(LexToken::LBrace), just(LexToken::RBrace))
            .map(Expr::Array);

        let matrix_row = expr
            .clone()
            .separated_by(just(LexToken::Comma))
            .at_least(1)
            .collect::<Vec<_>>();

        let matrix = matrix_row
            .separated_by(just(LexToken::Semi))
            .at_least(1)
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(LexToken::LBracket), just(LexToken::RBracket))
            .try_map(|rows: Vec<Vec<Expr>>, span| {
                let cols = rows.first().map(Vec::len).unwrap_or(0);
                if rows.iter().all(|r| r.len() == cols) {
                    Ok(Expr::Matrix(rows))
                } else {
                    Err(Rich::custom(span, "matrix rows have different lengths"))
                }
            });

        // ── Function literal: function(x, y: int) body ──

        let type_name = ident.clone().try_map(|name: String, span| {
            TokenType::parse_name(&name)
                .ok_or_else(|| Rich::custom(span, format!("unknown type '{name}'")))
        });

        let param = ident
            .clone()
            .then(just(LexToken::Colon).ignore_then(type_name).or_not());

        let function = just(LexToken::Function)
            .ignore_then(
                param
                    .separated_by(just(LexToken::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(just(LexToken::LParen), just(LexToken::RParen)),
            )
            .then(expr.clone())
            .map(|(params, body)| Expr::Function {
                params,
                body: Box::new(body),
            });

        let atom = choice((
            literal,
            function,
            record,
            array,
            matrix,
            ident.clone().map(Expr::Ident),
            expr.clone()
                .delimited_by(just(LexToken::LParen), just(LexToken::RParen)),
        ))
        .boxed();

        // ── Postfix: f(args), x.name(args), x.name ──

        let suffix = choice((
            args.clone().map(Postfix::Call),
            just(LexToken::Dot)
                .ignore_then(ident.clone())
                .then(args.or_not())
                .map(|(name, args)| match args {
                    Some(args) => Postfix::Method(name, args),
                    None => Postfix::Member(name),
                }),
        ));

        let postfix = atom
            .foldl(suffix.repeated(), |base, s| match s {
                Postfix::Call(args) => Expr::Apply {
                    func: Box::new(base),
                    args,
                },
                Postfix::Method(name, args) => Expr::MethodCall {
                    base: Box::new(base),
                    name,
                    args,
                },
                Postfix::Member(name) => Expr::Member {
                    base: Box::new(base),
                    name,
                },
            })
            .boxed();

        // ── Power: base ^ [-]exponent ──

        let exponent = just(LexToken::Minus)
            .or_not()
            .then(postfix.clone())
            .map(|(minus, e)| if minus.is_some() { negate(e) } else { e });

        let power = postfix
            .foldl(
                just(LexToken::Caret).ignore_then(exponent).repeated(),
                |base, exponent| Expr::Power {
                    base: Box::new(base),
                    exponent: Box::new(exponent),
                },
            )
            .boxed();

        // ── Unary ──

        let unary = choice((
            just(LexToken::Minus).to(UnaryOp::Negate),
            just(LexToken::Bang).to(UnaryOp::Not),
            just(LexToken::Tilde).to(UnaryOp::BitwiseNot),
        ))
        .repeated()
        .foldr(power, |op, operand| match op {
            UnaryOp::Negate => negate(operand),
            op => Expr::Unary {
                op,
                operand: Box::new(operand),
            },
        })
        .boxed();

        // ── Product / sum ──

        let product_op = choice((
            just(LexToken::Star).to(ProductOp::Multiply),
            just(LexToken::Slash).to(ProductOp::Divide),
            just(LexToken::Percent).to(ProductOp::Modulo),
        ));

        let product = unary
            .clone()
            .then(product_op.then(unary).repeated().collect::<Vec<_>>())
            .map(|(first, rest)| {
                if rest.is_empty() {
                    first
                } else {
                    Expr::Product {
                        first: Box::new(first),
                        rest,
                    }
                }
            })
            .boxed();

        let sum_op = choice((
            just(LexToken::Plus).to(SumOp::Add),
            just(LexToken::Minus).to(SumOp::Subtract),
        ));

        let sum = product
            .clone()
            .then(sum_op.then(product).repeated().collect::<Vec<_>>())
            .map(|(first, rest)| {
                if rest.is_empty() {
                    first
                } else {
                    Expr::Sum {
                        first: Box::new(first),
                        rest,
                    }
                }
            })
            .boxed();

        // ── Shift ──

        let shift_op = choice((
            just(LexToken::Shl).to(ShiftKind::Left),
            just(LexToken::Shr).to(ShiftKind::Right),
            just(LexToken::Ushr).to(ShiftKind::LogicalRight),
        ));

        let shift = sum
            .clone()
            .foldl(shift_op.then(sum).repeated(), |lhs, (op, rhs)| Expr::Shift {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            })
            .boxed();

        // ── Relational (non-associative) ──

        let rel_op = choice((
            just(LexToken::EqEq).to(RelOp::Eq),
            just(LexToken::NotEq).to(RelOp::Ne),
            just(LexToken::Le).to(RelOp::Le),
            just(LexToken::Ge).to(RelOp::Ge),
            just(LexToken::Lt).to(RelOp::Lt),
            just(LexToken::Gt).to(RelOp::Gt),
        ));

        let relational = shift
            .clone()
            .then(rel_op.then(shift).or_not())
            .map(|(lhs, rhs)| match rhs {
                None => lhs,
                Some((op, rhs)) => Expr::Relational {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            })
            .boxed();

        // ── Bitwise: & binds tighter than #, which binds tighter than | ──

        let bit_and = relational
            .clone()
            .then(
                just(LexToken::Amp)
                    .ignore_then(relational)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| {
                chain(first, rest, |operands| Expr::Bitwise {
                    op: BitwiseOp::And,
                    operands,
                })
            })
            .boxed();

        let bit_xor = bit_and
            .clone()
            .then(
                just(LexToken::Hash)
                    .ignore_then(bit_and)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| {
                chain(first, rest, |operands| Expr::Bitwise {
                    op: BitwiseOp::Xor,
                    operands,
                })
            })
            .boxed();

        let bit_or = bit_xor
            .clone()
            .then(
                just(LexToken::Pipe)
                    .ignore_then(bit_xor)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| {
                chain(first, rest, |operands| Expr::Bitwise {
                    op: BitwiseOp::Or,
                    operands,
                })
            })
            .boxed();

        // ── Logical ──

        let logical_and = bit_or
            .clone()
            .then(
                just(LexToken::AndAnd)
                    .ignore_then(bit_or)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| {
                chain(first, rest, |operands| Expr::Logical {
                    op: LogicOp::And,
                    operands,
                })
            })
            .boxed();

        let logical_or = logical_and
            .clone()
            .then(
                just(LexToken::OrOr)
                    .ignore_then(logical_and)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| {
                chain(first, rest, |operands| Expr::Logical {
                    op: LogicOp::Or,
                    operands,
                })
            })
            .boxed();

        // ── Conditional ──

        logical_or
            .then(
                just(LexToken::Question)
                    .ignore_then(expr.clone())
                    .then_ignore(just(LexToken::Colon))
                    .then(expr)
                    .or_not(),
            )
            .map(|(cond, branches)| match branches {
                None => cond,
                Some((then, otherwise)) => Expr::Cond {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
            })
    })
}

// ── Tests ──
