//! parlance-parser: parseur d’expressions Parlance
//!
//! Branches :
//! - `parlance-lexer` pour la tokenisation
//! - `parlance-core` pour `Span` et le trait `Signatures` (contrôle d’arité)
//! - `parlance-ast` pour l’arbre cible
//!
//! Algorithme : shunting-yard (file de sortie, pile d’opérateurs, pile de
//! compteurs d’arguments), puis réduction de la forme postfixe en arbre.
//!
//! Précédences (plus fort en haut) :
//! ```text
//! not, - unaire      30   droite
//! * / %              20   gauche
//! + -                15   gauche
//! < <= > >=          10   gauche
//! == !=               5   gauche
//! and                 4   gauche
//! or                  3   gauche
//! xor                 2   gauche
//! ```
//!
//! ```
//! use parlance_parser::parse_expression;
//!
//! let e = parse_expression("1 + 2 * 3", None).unwrap();
//! assert_eq!(e.to_string(), "(1 + (2 * 3))");
//! ```

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

/* ─────────────────────────── Imports / alloc ─────────────────────────── */

#[cfg(not(feature = "std"))]
extern crate alloc;

use core::fmt;

#[cfg(feature = "std")]
use std::{borrow::ToOwned, boxed::Box, format, string::String, vec::Vec};

#[cfg(not(feature = "std"))]
use alloc::{borrow::ToOwned, boxed::Box, format, string::String, vec::Vec};

use parlance_ast::{self as ast, BinaryOp, Expr, Literal, UnaryOp};
use parlance_core::{Arity, Signatures, SourceId, Span};
use parlance_lexer::{Keyword, Lexer, Token, TokenKind};
use smallvec::SmallVec;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreur de parsing avec span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Localisation (absente pour les erreurs de réduction globale).
    pub span: Option<Span>,
    /// Message humain.
    pub message: String,
}

impl ParseError {
    fn new(span: Option<Span>, message: impl Into<String>) -> Self {
        Self { span, message: message.into() }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(sp) => write!(f, "{} @{}..{}", self.message, sp.start.0, sp.end.0),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseError {}

/// Résultat du parseur.
pub type PResult<T> = core::result::Result<T, ParseError>;

/* ─────────────────────────── Opérateurs ─────────────────────────── */

/// Associativité d’un opérateur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    /// `a - b - c` = `(a - b) - c`
    Left,
    /// `not not a` = `not (not a)`
    Right,
}

/// Opérateur vu par le shunting-yard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Opérateur binaire.
    Binary(BinaryOp),
    /// Opérateur unaire préfixe.
    Unary(UnaryOp),
}

impl Operator {
    /// Précédence (plus grand = plus lié).
    pub const fn precedence(self) -> u8 {
        match self {
            Operator::Unary(_) => 30,
            Operator::Binary(op) => match op {
                BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 20,
                BinaryOp::Add | BinaryOp::Sub => 15,
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 10,
                BinaryOp::Eq | BinaryOp::Ne => 5,
                BinaryOp::And => 4,
                BinaryOp::Or => 3,
                BinaryOp::Xor => 2,
            },
        }
    }

    /// Associativité.
    pub const fn associativity(self) -> Associativity {
        match self {
            Operator::Unary(_) => Associativity::Right,
            Operator::Binary(_) => Associativity::Left,
        }
    }

    /// Nombre d’opérandes.
    pub const fn arity(self) -> usize {
        match self {
            Operator::Unary(_) => 1,
            Operator::Binary(_) => 2,
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Operator::Unary(UnaryOp::Neg) => "-",
            Operator::Unary(UnaryOp::Not) => "not",
            Operator::Binary(op) => op.symbol(),
        }
    }
}

/* ─────────────────────────── Shunting-yard ─────────────────────────── */

/// Élément de la file de sortie (forme postfixe).
#[derive(Debug)]
enum Postfix {
    Operand(Expr),
    Op(Operator, Span),
    Call { name: String, args: usize, span: Span },
}

/// Entrée de la pile d’opérateurs.
#[derive(Debug, Clone)]
enum Pending {
    Op(Operator, Span),
    Open(Span),
    Function(String, Span),
}

/// Catégorie du jeton précédent (décide du moins unaire et des virgules).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Operand,
    Operator,
    Open,
    Close,
    Comma,
    Function,
}

/// Parseur d’expressions, éventuellement adossé à un registre de signatures.
#[derive(Clone, Copy, Default)]
pub struct ExpressionParser<'s> {
    signatures: Option<&'s dyn Signatures>,
    source: SourceId,
}

impl fmt::Debug for ExpressionParser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionParser")
            .field("checks_arity", &self.signatures.is_some())
            .field("source", &self.source)
            .finish()
    }
}

impl<'s> ExpressionParser<'s> {
    /// Parseur sans contrôle d’arité.
    pub const fn new() -> Self { Self { signatures: None, source: SourceId(0) } }

    /// Active le contrôle d’arité contre `signatures`.
    #[must_use]
    pub const fn with_signatures(mut self, signatures: &'s dyn Signatures) -> Self {
        self.signatures = Some(signatures);
        self
    }

    /// Source propagée dans les spans.
    #[must_use]
    pub const fn with_source(mut self, source: SourceId) -> Self {
        self.source = source;
        self
    }

    /// Tokenise puis parse `src`.
    pub fn parse_str(&self, src: &str) -> PResult<Expr> {
        let tokens = Lexer::new(src, self.source)
            .tokenize()
            .map_err(|e| ParseError::new(Some(e.span), format!("{e}")))?;
        self.parse_tokens(&tokens)
    }

    /// Parse une suite de jetons (un `Eof` final est toléré).
    pub fn parse_tokens(&self, tokens: &[Token<'_>]) -> PResult<Expr> {
        let postfix = self.to_postfix(tokens)?;
        #[cfg(feature = "tracing")]
        tracing::trace!(items = postfix.len(), "postfix ready");
        self.reduce(postfix)
    }

    fn to_postfix(&self, tokens: &[Token<'_>]) -> PResult<Vec<Postfix>> {
        let mut output: Vec<Postfix> = Vec::with_capacity(tokens.len());
        let mut stack: SmallVec<[Pending; 8]> = SmallVec::new();
        let mut arg_counts: SmallVec<[usize; 4]> = SmallVec::new();
        let mut prev = Prev::Start;

        let mut iter = tokens.iter().peekable();
        while let Some(tok) = iter.next() {
            let span = tok.span;
            match &tok.value {
                TokenKind::Eof => break,

                TokenKind::Number(n) => {
                    output.push(Postfix::Operand(Expr::Literal(Literal::Number(*n))));
                    prev = Prev::Operand;
                }
                TokenKind::Str(s) => {
                    output.push(Postfix::Operand(Expr::Literal(Literal::Str(s.clone()))));
                    prev = Prev::Operand;
                }
                TokenKind::Kw(kw) => {
                    let lit = match kw {
                        Keyword::True => Literal::Bool(true),
                        Keyword::False => Literal::Bool(false),
                        Keyword::Null => Literal::Null,
                    };
                    output.push(Postfix::Operand(Expr::Literal(lit)));
                    prev = Prev::Operand;
                }
                TokenKind::Variable(name) => {
                    output.push(Postfix::Operand(Expr::Variable((*name).to_owned())));
                    prev = Prev::Operand;
                }

                TokenKind::Ident(name) => {
                    if !matches!(iter.peek().map(|t| &t.value), Some(TokenKind::LParen)) {
                        return Err(ParseError::new(Some(span), format!("expected `(` after function name `{name}`")));
                    }
                    stack.push(Pending::Function((*name).to_owned(), span));
                    arg_counts.push(0);
                    prev = Prev::Function;
                }

                TokenKind::LParen => {
                    stack.push(Pending::Open(span));
                    prev = Prev::Open;
                }

                TokenKind::Comma => {
                    if matches!(prev, Prev::Open | Prev::Comma) {
                        return Err(ParseError::new(Some(span), "expected expression before `,`"));
                    }
                    flush_to_open(&mut stack, &mut output)
                        .ok_or_else(|| ParseError::new(Some(span), "unbalanced parentheses: `,` outside a call"))?;
                    // la parenthèse ouvrante doit appartenir à un appel
                    let in_call = stack.len() >= 2 && matches!(stack[stack.len() - 2], Pending::Function(..));
                    if !in_call {
                        return Err(ParseError::new(Some(span), "unexpected `,` outside a function call"));
                    }
                    if matches!(iter.peek().map(|t| &t.value), Some(TokenKind::RParen | TokenKind::Comma)) {
                        return Err(ParseError::new(Some(span), "expected expression after `,`"));
                    }
                    if let Some(top) = arg_counts.last_mut() {
                        *top += 1;
                    }
                    prev = Prev::Comma;
                }

                TokenKind::RParen => {
                    if prev == Prev::Comma {
                        return Err(ParseError::new(Some(span), "expected expression before `)`"));
                    }
                    flush_to_open(&mut stack, &mut output)
                        .ok_or_else(|| ParseError::new(Some(span), "unbalanced parentheses: unexpected `)`"))?;
                    stack.pop();
                    if let Some(Pending::Function(name, fspan)) = stack.last().cloned() {
                        stack.pop();
                        let counted = arg_counts.pop().unwrap_or(0);
                        let args = if prev == Prev::Open { counted } else { counted + 1 };
                        output.push(Postfix::Call { name, args, span: fspan.join(span) });
                    }
                    prev = Prev::Close;
                }

                other => {
                    let op = operator_for(other, prev).ok_or_else(|| {
                        ParseError::new(Some(span), format!("unexpected token {other:?}"))
                    })?;
                    while let Some(Pending::Op(top, top_span)) = stack.last() {
                        let pops = match op.associativity() {
                            Associativity::Left => op.precedence() <= top.precedence(),
                            Associativity::Right => op.precedence() < top.precedence(),
                        };
                        if !pops {
                            break;
                        }
                        output.push(Postfix::Op(*top, *top_span));
                        stack.pop();
                    }
                    stack.push(Pending::Op(op, span));
                    prev = Prev::Operator;
                }
            }
        }

        while let Some(entry) = stack.pop() {
            match entry {
                Pending::Op(op, span) => output.push(Postfix::Op(op, span)),
                Pending::Open(span) | Pending::Function(_, span) => {
                    return Err(ParseError::new(Some(span), "unbalanced parentheses: missing `)`"));
                }
            }
        }

        if output.is_empty() {
            return Err(ParseError::new(None, "no expression found"));
        }
        Ok(output)
    }

    fn reduce(&self, postfix: Vec<Postfix>) -> PResult<Expr> {
        let mut values: Vec<Expr> = Vec::with_capacity(postfix.len());
        for item in postfix {
            match item {
                Postfix::Operand(e) => values.push(e),
                Postfix::Op(op, span) => {
                    if values.len() < op.arity() {
                        return Err(ParseError::new(
                            Some(span),
                            format!("operator `{}` expects {} operand(s)", op.symbol(), op.arity()),
                        ));
                    }
                    let expr = match op {
                        Operator::Unary(u) => {
                            let operand = pop(&mut values);
                            Expr::Unary { op: u, expr: Box::new(operand) }
                        }
                        Operator::Binary(b) => {
                            let right = pop(&mut values);
                            let left = pop(&mut values);
                            Expr::Binary { left: Box::new(left), op: b, right: Box::new(right) }
                        }
                    };
                    values.push(expr);
                }
                Postfix::Call { name, args, span } => {
                    if let Some(sigs) = self.signatures {
                        match sigs.arity_of(&name) {
                            None => return Err(ParseError::new(Some(span), format!("unknown function `{name}`"))),
                            Some(arity @ Arity::Fixed(expected)) if !arity.accepts(args) => {
                                return Err(ParseError::new(
                                    Some(span),
                                    format!("function `{name}` expects {expected} argument(s), got {args}"),
                                ));
                            }
                            Some(_) => {}
                        }
                    }
                    if values.len() < args {
                        return Err(ParseError::new(Some(span), format!("not enough arguments for `{name}`")));
                    }
                    let call_args = values.split_off(values.len() - args);
                    values.push(ast::Expr::Call { name, args: call_args });
                }
            }
        }
        if values.len() != 1 {
            return Err(ParseError::new(
                None,
                format!("expression did not reduce to a single value ({} left)", values.len()),
            ));
        }
        Ok(pop(&mut values))
    }
}

/// Dépile jusqu’à la parenthèse ouvrante (laissée en place). `None` si absente.
fn flush_to_open(stack: &mut SmallVec<[Pending; 8]>, output: &mut Vec<Postfix>) -> Option<()> {
    loop {
        match stack.last()? {
            Pending::Open(_) => return Some(()),
            Pending::Op(op, span) => {
                output.push(Postfix::Op(*op, *span));
                stack.pop();
            }
            Pending::Function(..) => return None,
        }
    }
}

fn operator_for(kind: &TokenKind<'_>, prev: Prev) -> Option<Operator> {
    let prefix_position = matches!(prev, Prev::Start | Prev::Operator | Prev::Open | Prev::Comma);
    Some(match kind {
        TokenKind::Minus if prefix_position => Operator::Unary(UnaryOp::Neg),
        TokenKind::Not => Operator::Unary(UnaryOp::Not),
        TokenKind::Minus => Operator::Binary(BinaryOp::Sub),
        TokenKind::Plus => Operator::Binary(BinaryOp::Add),
        TokenKind::Star => Operator::Binary(BinaryOp::Mul),
        TokenKind::Slash => Operator::Binary(BinaryOp::Div),
        TokenKind::Percent => Operator::Binary(BinaryOp::Mod),
        TokenKind::EqEq | TokenKind::Assign => Operator::Binary(BinaryOp::Eq),
        TokenKind::Ne => Operator::Binary(BinaryOp::Ne),
        TokenKind::Lt => Operator::Binary(BinaryOp::Lt),
        TokenKind::Le => Operator::Binary(BinaryOp::Le),
        TokenKind::Gt => Operator::Binary(BinaryOp::Gt),
        TokenKind::Ge => Operator::Binary(BinaryOp::Ge),
        TokenKind::And => Operator::Binary(BinaryOp::And),
        TokenKind::Or => Operator::Binary(BinaryOp::Or),
        TokenKind::Xor => Operator::Binary(BinaryOp::Xor),
        _ => return None,
    })
}

// Invariant : l’appelant a vérifié la profondeur de pile.
fn pop(values: &mut Vec<Expr>) -> Expr {
    values.pop().unwrap_or(Expr::Literal(Literal::Null))
}

/* ─────────────────────────── Raccourcis ─────────────────────────── */

/// Parse `src`, avec contrôle d’arité si `signatures` est fourni.
pub fn parse_expression(src: &str, signatures: Option<&dyn Signatures>) -> PResult<Expr> {
    let parser = match signatures {
        Some(s) => ExpressionParser::new().with_signatures(s),
        None => ExpressionParser::new(),
    };
    parser.parse_str(src)
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Sigs;
    impl Signatures for Sigs {
        fn arity_of(&self, name: &str) -> Option<Arity> {
            match name {
                "pair" => Some(Arity::Fixed(2)),
                "one" => Some(Arity::Fixed(1)),
                "none" => Some(Arity::Fixed(0)),
                "format" => Some(Arity::Variadic),
                _ => None,
            }
        }
    }

    fn parse_ok(src: &str) -> String {
        parse_expression(src, Some(&Sigs)).expect("parse ok").to_string()
    }

    fn parse_err(src: &str) -> ParseError {
        parse_expression(src, Some(&Sigs)).expect_err("parse error")
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(parse_ok("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(parse_ok("1 * 2 + 3"), "((1 * 2) + 3)");
        assert_eq!(parse_ok("(1 + 2) * 3"), "((1 + 2) * 3)");
    }

    #[test]
    fn leading_minus_is_unary() {
        assert_eq!(parse_ok("-1 + 2"), "((-1) + 2)");
        assert_eq!(parse_ok("2 * -3"), "(2 * (-3))");
        assert_eq!(parse_ok("(-$x)"), "(-$x)");
        assert_eq!(parse_ok("2 - 3"), "(2 - 3)");
        assert_eq!(parse_ok("pair(-1, -2)"), "pair((-1), (-2))");
    }

    #[test]
    fn left_associativity_and_unary_chains() {
        assert_eq!(parse_ok("10 - 4 - 3"), "((10 - 4) - 3)");
        assert_eq!(parse_ok("not not true"), "(not (not true))");
        assert_eq!(parse_ok("- - 1"), "(-(-1))");
    }

    #[test]
    fn logical_ladder() {
        assert_eq!(
            parse_ok("$a or $b and $c xor $d"),
            "(($a or ($b and $c)) xor $d)"
        );
        assert_eq!(parse_ok("$gold >= 10 && !$broke"), "(($gold >= 10) and (not $broke))");
        assert_eq!(parse_ok("$x = 1 + 1"), "($x == (1 + 1))");
        assert_eq!(parse_ok("1 < 2 == true"), "((1 < 2) == true)");
    }

    #[test]
    fn calls_count_arguments() {
        assert_eq!(parse_ok("none()"), "none()");
        assert_eq!(parse_ok("one(1 + 2)"), "one((1 + 2))");
        assert_eq!(parse_ok("pair(one(1), (2 + 3) * 4)"), "pair(one(1), ((2 + 3) * 4))");
        assert_eq!(parse_ok("format(\"{0}{1}{2}\", 1, 2, 3)"), "format(\"{0}{1}{2}\", 1, 2, 3)");
        assert_eq!(parse_ok("format()"), "format()");
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        assert!(parse_err("pair(1)").message.contains("expects 2 argument(s), got 1"));
        assert!(parse_err("pair(1, 2, 3)").message.contains("got 3"));
        assert!(parse_err("missing(1)").message.contains("unknown function"));
        // sans registre, pas de contrôle
        assert!(parse_expression("pair(1)", None).is_ok());
    }

    #[test]
    fn malformed_input() {
        assert!(parse_err("(1 + 2").message.contains("unbalanced"));
        assert!(parse_err("1 + 2)").message.contains("unbalanced"));
        assert!(parse_err("pair(, 1)").message.contains("expected expression"));
        assert!(parse_err("pair(1, )").message.contains("expected expression"));
        assert!(parse_err("1, 2").message.contains("unbalanced"));
        assert!(parse_err("(1, 2)").message.contains("outside a function call"));
        assert!(parse_err("1 +").message.contains("expects 2 operand"));
        assert!(parse_err("1 2").message.contains("did not reduce"));
        assert!(parse_err("pair").message.contains("expected `(`"));
        assert_eq!(parse_err("").message, "no expression found");
        assert!(parse_err("\"open").message.contains("unterminated"));
    }

    #[test]
    fn errors_point_at_the_offending_token() {
        let err = parse_err("1 + 2)");
        assert_eq!(err.span.map(|s| s.start.0), Some(5));
    }

    #[test]
    fn errors_carry_the_source_id() {
        let err = ExpressionParser::new().with_source(SourceId(3)).parse_str("1 + 2)").unwrap_err();
        assert_eq!(err.span.map(|s| s.source), Some(SourceId(3)));
        let err = ExpressionParser::new().with_source(SourceId(4)).parse_str("\"open").unwrap_err();
        assert_eq!(err.span.map(|s| s.source), Some(SourceId(4)));
    }

    proptest::proptest! {
        #[test]
        fn sum_of_products_groups_products(a in 0u32..100, b in 0u32..100, c in 0u32..100, d in 0u32..100) {
            let src = format!("{a} * {b} + {c} * {d}");
            let expected = format!("(({a} * {b}) + ({c} * {d}))");
            proptest::prop_assert_eq!(parse_ok(&src), expected);
        }

        #[test]
        fn subtraction_chains_fold_left(xs in proptest::collection::vec(0u32..50, 2..6)) {
            let src = xs.iter().map(u32::to_string).collect::<Vec<_>>().join(" - ");
            let mut expected = xs[0].to_string();
            for x in &xs[1..] {
                expected = format!("({expected} - {x})");
            }
            proptest::prop_assert_eq!(parse_ok(&src), expected);
        }
    }
}
