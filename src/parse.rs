//! Parsing of the textual expression syntax.
//!
//! # Grammar
//!
//! ```bnf
//! exp     ::= "lambda" params? ":" exp | compare
//! params  ::= ident ("," ident)*
//! compare ::= bitor (cmpop bitor)?
//! bitor   ::= bitxor ("|" bitxor)*
//! bitxor  ::= bitand ("^" bitand)*
//! bitand  ::= arith ("&" arith)*
//! arith   ::= term (("+" | "-") term)*
//! term    ::= call (("*" | "//" | "/" | "%") call)*
//! call    ::= atom ("(" (exp ("," exp)* ","?)? ")")*
//! atom    ::= number | string | "True" | "False" | ident | "(" exp ")"
//! cmpop   ::= "==" | "!=" | "<=" | ">=" | "<" | ">"
//! ```
//!
//! Binary operators associate to the left and comparisons do not chain. A
//! leading `-` is only accepted on numeric literals.

use std::rc::Rc;

use winnow::{
    ascii::{digit0, digit1, multispace0},
    combinator::{alt, cut_err, delimited, not, opt, preceded, repeat, separated, terminated},
    error::{ContextError, ParseError, StrContext, StrContextValue},
    prelude::*,
    token::{none_of, one_of, take_while},
};

use crate::base::{BinOp, Exp, Literal};
use crate::error::Error;

pub fn parse(input: &str) -> Result<Rc<Exp>, ParseError<&str, ContextError>> {
    delimited(multispace0, exp, multispace0).parse(input)
}

/// Parse one expression, reporting failures as [`Error::Syntax`].
pub fn parse_exp(input: &str) -> crate::Result<Rc<Exp>> {
    parse(input).map_err(|err| Error::Syntax {
        offset: err.offset(),
        message: err.inner().to_string(),
    })
}

fn exp(input: &mut &str) -> PResult<Rc<Exp>> {
    alt((lambda, compare)).parse_next(input)
}

fn lambda(input: &mut &str) -> PResult<Rc<Exp>> {
    keyword("lambda").parse_next(input)?;
    let params: Vec<String> = separated(
        0..,
        preceded(multispace0, identifier.map(str::to_owned)),
        preceded(multispace0, ','),
    )
    .verify(|params: &Vec<String>| {
        params
            .iter()
            .enumerate()
            .all(|(i, p)| !params[..i].contains(p))
    })
    .context(StrContext::Label("parameter list"))
    .parse_next(input)?;
    cut_err(preceded(multispace0, ':'))
        .context(StrContext::Expected(StrContextValue::CharLiteral(':')))
        .parse_next(input)?;
    let body = cut_err(preceded(multispace0, exp)).parse_next(input)?;
    Ok(Exp::lambda(params, body))
}

fn compare(input: &mut &str) -> PResult<Rc<Exp>> {
    let left = bit_or.parse_next(input)?;
    let right = opt((
        preceded(multispace0, compare_op),
        cut_err(preceded(multispace0, bit_or)),
    ))
    .parse_next(input)?;
    Ok(match right {
        Some((op, right)) => Exp::binop(op, left, right),
        None => left,
    })
}

fn compare_op(input: &mut &str) -> PResult<BinOp> {
    alt((
        "==".value(BinOp::Eq),
        "!=".value(BinOp::NotEq),
        "<=".value(BinOp::LtE),
        ">=".value(BinOp::GtE),
        '<'.value(BinOp::Lt),
        '>'.value(BinOp::Gt),
    ))
    .parse_next(input)
}

fn bit_or(input: &mut &str) -> PResult<Rc<Exp>> {
    left_assoc(input, bit_xor, '|'.value(BinOp::BitOr))
}

fn bit_xor(input: &mut &str) -> PResult<Rc<Exp>> {
    left_assoc(input, bit_and, '^'.value(BinOp::BitXor))
}

fn bit_and(input: &mut &str) -> PResult<Rc<Exp>> {
    left_assoc(input, arith, '&'.value(BinOp::BitAnd))
}

fn arith(input: &mut &str) -> PResult<Rc<Exp>> {
    left_assoc(
        input,
        term,
        alt(('+'.value(BinOp::Add), '-'.value(BinOp::Sub))),
    )
}

fn term(input: &mut &str) -> PResult<Rc<Exp>> {
    left_assoc(
        input,
        call,
        alt((
            "//".value(BinOp::FloorDiv),
            '*'.value(BinOp::Mul),
            '/'.value(BinOp::Div),
            '%'.value(BinOp::Mod),
        )),
    )
}

fn left_assoc<'i>(
    input: &mut &'i str,
    mut operand: impl Parser<&'i str, Rc<Exp>, ContextError>,
    op: impl Parser<&'i str, BinOp, ContextError>,
) -> PResult<Rc<Exp>> {
    let first = operand.parse_next(input)?;
    let rest: Vec<(BinOp, Rc<Exp>)> = repeat(
        0..,
        (
            preceded(multispace0, op),
            cut_err(preceded(multispace0, operand)),
        ),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |left, (op, right)| Exp::binop(op, left, right)))
}

fn call(input: &mut &str) -> PResult<Rc<Exp>> {
    let func = atom.parse_next(input)?;
    let calls: Vec<Vec<Rc<Exp>>> = repeat(0.., preceded(multispace0, arguments)).parse_next(input)?;
    Ok(calls.into_iter().fold(func, Exp::call))
}

fn arguments(input: &mut &str) -> PResult<Vec<Rc<Exp>>> {
    let args: Option<Vec<Rc<Exp>>> = delimited(
        '(',
        opt(terminated(
            separated(1.., preceded(multispace0, exp), preceded(multispace0, ',')),
            opt(preceded(multispace0, ',')),
        )),
        cut_err(preceded(multispace0, ')'))
            .context(StrContext::Expected(StrContextValue::CharLiteral(')'))),
    )
    .context(StrContext::Label("arguments"))
    .parse_next(input)?;
    Ok(args.unwrap_or_default())
}

fn atom(input: &mut &str) -> PResult<Rc<Exp>> {
    alt((
        number.map(Exp::lit),
        string.map(|s| Exp::lit(Literal::Str(s.into()))),
        identifier
            .verify(|id: &str| id != "lambda")
            .map(|id| match id {
                "True" => Exp::lit(Literal::Bool(true)),
                "False" => Exp::lit(Literal::Bool(false)),
                _ => Exp::name(id),
            }),
        delimited(
            '(',
            preceded(multispace0, exp),
            cut_err(preceded(multispace0, ')'))
                .context(StrContext::Expected(StrContextValue::CharLiteral(')'))),
        ),
    ))
    .context(StrContext::Label("expression"))
    .parse_next(input)
}

fn number(input: &mut &str) -> PResult<Literal> {
    alt((
        float_text
            .try_map(|text: &str| text.parse::<f64>())
            .map(Literal::Float),
        int_text
            .try_map(|text: &str| text.parse::<i64>())
            .map(Literal::Int),
    ))
    .context(StrContext::Label("number"))
    .parse_next(input)
}

fn int_text<'i>(input: &mut &'i str) -> PResult<&'i str> {
    let start = *input;
    (opt('-'), digit1).parse_next(input)?;
    Ok(consumed(start, *input))
}

fn float_text<'i>(input: &mut &'i str) -> PResult<&'i str> {
    let start = *input;
    (
        opt('-'),
        digit1,
        alt(((('.', digit0), opt(exponent)).void(), exponent)),
    )
        .parse_next(input)?;
    Ok(consumed(start, *input))
}

fn exponent(input: &mut &str) -> PResult<()> {
    (one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)
        .void()
        .parse_next(input)
}

fn consumed<'i>(start: &'i str, rest: &str) -> &'i str {
    &start[..start.len() - rest.len()]
}

fn string(input: &mut &str) -> PResult<String> {
    let quote = one_of(['\'', '"']).parse_next(input)?;
    let body: String = repeat(0.., alt((preceded('\\', escape), none_of([quote, '\\']))))
        .parse_next(input)?;
    cut_err(quote)
        .context(StrContext::Expected(StrContextValue::CharLiteral(quote)))
        .parse_next(input)?;
    Ok(body)
}

fn escape(input: &mut &str) -> PResult<char> {
    alt((
        'n'.value('\n'),
        't'.value('\t'),
        '\\',
        '\'',
        '"',
    ))
    .parse_next(input)
}

fn identifier<'i>(input: &mut &'i str) -> PResult<&'i str> {
    let start = *input;
    (
        one_of(|ch: char| ch.is_ascii_alphabetic() || ch == '_'),
        take_while(0.., |ch: char| ch.is_ascii_alphanumeric() || ch == '_'),
    )
        .parse_next(input)?;
    Ok(consumed(start, *input))
}

fn keyword<'i>(kw: &'static str) -> impl Parser<&'i str, &'i str, ContextError> {
    terminated(
        kw,
        not(one_of(|ch: char| ch.is_ascii_alphanumeric() || ch == '_')),
    )
}
