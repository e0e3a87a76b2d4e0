//! parlance-lexer: analyse lexicale des expressions Parlance
//!
//! Faits saillants :
//! - `Lexer` : nombres décimaux, chaînes `"…"` avec échappements, variables `$nom.avec.points`,
//!   identifiants de fonctions (`round`, `Number.Add`), mots-clés `true`/`false`/`null`
//! - Opérateurs symboliques (`== != < <= > >= && || ^ !`) **et** littéraux
//!   (`and or xor not is eq neq gt lt gte lte`), normalisés vers un même `TokenKind`
//! - `Span`/`Spanned`/`SourceId` + **LineMap** pour `(ligne, colonne)`
//! - Erreurs avec `Display` propre + spans précis
//!
//! Exemple éclair :
//! ```
//! use parlance_core::SourceId;
//! use parlance_lexer::{Lexer, TokenKind};
//!
//! let toks = Lexer::new("$gold >= 10 and not $broke", SourceId(0)).tokenize().unwrap();
//! assert!(matches!(toks[0].value, TokenKind::Variable("$gold")));
//! assert!(matches!(toks[2].value, TokenKind::Number(n) if n == 10.0));
//! ```

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt;

#[cfg(feature = "std")]
use std::{string::String, vec::Vec};

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};
#[cfg(not(feature = "std"))]
extern crate alloc;

use parlance_core::{Pos, SourceId, Span, Spanned};

/* ─────────────────────────── LineMap ─────────────────────────── */

/// Table des lignes pour (byte offset) → (ligne, colonne).
#[derive(Debug, Clone)]
pub struct LineMap {
    /// Offsets des débuts de lignes (toujours contient 0).
    pub line_starts: Vec<u32>,
}

impl LineMap {
    /// Construit la table à partir d’un `&str`.
    pub fn new(src: &str) -> Self {
        let mut ls = Vec::with_capacity(8);
        ls.push(0);
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                ls.push(to_u32(i) + 1);
            }
        }
        Self { line_starts: ls }
    }

    /// Convertit un `Pos` en (ligne, colonne), 1-based.
    pub fn line_col(&self, pos: Pos) -> (u32, u32) {
        let off = pos.0;
        let idx = match self.line_starts.binary_search(&off) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[idx];
        (to_u32(idx) + 1, off.saturating_sub(line_start) + 1)
    }
}

/* ─────────────────────────── Tokens ─────────────────────────── */

/// Mots-clés littéraux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
}

/// Genre de jeton lexical.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    /// Fin de l’entrée.
    Eof,
    /// Littéral nombre.
    Number(f64),
    /// Littéral chaîne (décodée).
    Str(String),
    /// Variable, `$` inclus.
    Variable(&'a str),
    /// Identifiant de fonction.
    Ident(&'a str),
    /// Mot-clé.
    Kw(Keyword),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `=` (traité comme `==` dans une expression)
    Assign,
    /// `==`, `is`, `eq`
    EqEq,
    /// `!=`, `neq`
    Ne,
    /// `<`, `lt`
    Lt,
    /// `<=`, `lte`
    Le,
    /// `>`, `gt`
    Gt,
    /// `>=`, `gte`
    Ge,
    /// `&&`, `and`
    And,
    /// `||`, `or`
    Or,
    /// `^`, `xor`
    Xor,
    /// `!`, `not`
    Not,
}

/// Jeton avec span.
pub type Token<'a> = Spanned<TokenKind<'a>>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Genre d’erreur lexicale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexErrorKind {
    /// Caractère inattendu.
    UnexpectedChar(char),
    /// Chaîne non terminée.
    UnterminatedString,
    /// Séquence d’échappement invalide.
    InvalidEscape,
    /// Littéral numérique invalide.
    InvalidNumber,
    /// `$` sans nom.
    EmptyVariable,
}

/// Erreur lexicale avec localisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// Localisation.
    pub span: Span,
    /// Genre d’erreur.
    pub kind: LexErrorKind,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LexErrorKind::UnexpectedChar(c) => write!(f, "unexpected character: {c:?}"),
            LexErrorKind::UnterminatedString => write!(f, "unterminated string literal"),
            LexErrorKind::InvalidEscape => write!(f, "invalid escape sequence"),
            LexErrorKind::InvalidNumber => write!(f, "invalid number literal"),
            LexErrorKind::EmptyVariable => write!(f, "expected a variable name after `$`"),
        }
    }
}
#[cfg(feature = "std")]
impl std::error::Error for LexError {}

/* ─────────────────────────── Lexer ─────────────────────────── */

/// Analyseur lexical (itératif).
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    /// Position courante en bytes.
    off: usize,
    /// Id de la source.
    source: SourceId,
    /// Table des lignes (exposée pour diagnostics).
    pub lines: LineMap,
}

impl<'a> Lexer<'a> {
    /// Crée un lexer.
    pub fn new(src: &'a str, source: SourceId) -> Self {
        Self { src, bytes: src.as_bytes(), off: 0, source, lines: LineMap::new(src) }
    }

    /// Prochain jeton ; émet `Eof` en fin d’entrée.
    pub fn next_token(&mut self) -> Result<Token<'a>, LexError> {
        self.skip_ws();
        let start = self.off;
        let Some(c) = self.bump_char() else {
            return Ok(Spanned { value: TokenKind::Eof, span: self.span_from(start) });
        };

        let kind = match c {
            ch if is_ident_start(ch) => {
                self.consume_while(|b| is_ident_continue(b as char));
                word_token(&self.src[start..self.off])
            }
            '$' => {
                self.consume_while(|b| is_ident_continue(b as char));
                if self.off == start + 1 {
                    return Err(self.err_from(start, LexErrorKind::EmptyVariable));
                }
                TokenKind::Variable(&self.src[start..self.off])
            }
            ch if ch.is_ascii_digit() => self.lex_number(start)?,
            '"' => TokenKind::Str(self.lex_string(start)?),

            '=' => if self.eat('=') { TokenKind::EqEq } else { TokenKind::Assign },
            '!' => if self.eat('=') { TokenKind::Ne } else { TokenKind::Not },
            '<' => if self.eat('=') { TokenKind::Le } else { TokenKind::Lt },
            '>' => if self.eat('=') { TokenKind::Ge } else { TokenKind::Gt },
            '&' => if self.eat('&') { TokenKind::And } else { return Err(self.err_from(start, LexErrorKind::UnexpectedChar('&'))); },
            '|' => if self.eat('|') { TokenKind::Or } else { return Err(self.err_from(start, LexErrorKind::UnexpectedChar('|'))); },

            '^' => TokenKind::Xor,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,

            other => return Err(self.err_from(start, LexErrorKind::UnexpectedChar(other))),
        };

        #[cfg(feature = "trace")]
        log::trace!("token {kind:?} @ {start}..{}", self.off);

        Ok(Spanned { value: kind, span: self.span_from(start) })
    }

    /// Tokenise toute la source (ajoute `Eof` final).
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut out = Vec::new();
        loop {
            let t = self.next_token()?;
            let is_eof = matches!(t.value, TokenKind::Eof);
            out.push(t);
            if is_eof {
                break;
            }
        }
        Ok(out)
    }

    /* ────────── Primitives internes ────────── */

    #[inline] fn peek_char(&self) -> Option<char> { self.src[self.off..].chars().next() }
    #[inline] fn bump_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.off += c.len_utf8();
        Some(c)
    }
    #[inline] fn eat(&mut self, ch: char) -> bool { if self.peek_char() == Some(ch) { self.off += ch.len_utf8(); true } else { false } }

    fn consume_while(&mut self, mut p: impl FnMut(u8) -> bool) {
        while let Some(&b) = self.bytes.get(self.off) {
            if p(b) { self.off += 1; } else { break; }
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() { self.off += c.len_utf8(); } else { break; }
        }
    }

    fn lex_string(&mut self, start_quote: usize) -> Result<String, LexError> {
        let mut out = String::new();
        loop {
            let c = self.bump_char().ok_or_else(|| self.err_from(start_quote, LexErrorKind::UnterminatedString))?;
            match c {
                '"' => break,
                '\\' => {
                    let esc = self.bump_char().ok_or_else(|| self.err_from(start_quote, LexErrorKind::UnterminatedString))?;
                    match esc {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        _ => return Err(self.err_from(self.off.saturating_sub(2), LexErrorKind::InvalidEscape)),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn lex_number(&mut self, start: usize) -> Result<TokenKind<'a>, LexError> {
        self.consume_while(|b| b.is_ascii_digit());
        if self.peek_char() == Some('.') && self.bytes.get(self.off + 1).is_some_and(u8::is_ascii_digit) {
            self.off += 1;
            self.consume_while(|b| b.is_ascii_digit());
        }
        if self.peek_char().is_some_and(is_ident_start) {
            return Err(self.err_from(start, LexErrorKind::InvalidNumber));
        }
        self.src[start..self.off]
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.err_from(start, LexErrorKind::InvalidNumber))
    }

    /* ────────── Spans / erreurs ────────── */

    #[inline] fn span_from(&self, start: usize) -> Span {
        Span { source: self.source, start: Pos(to_u32(start)), end: Pos(to_u32(self.off)) }
    }
    #[inline] fn err_from(&self, start: usize, kind: LexErrorKind) -> LexError { LexError { span: self.span_from(start), kind } }
}

/* ─────────────────────────── Helpers ─────────────────────────── */

#[inline]
const fn is_ident_start(c: char) -> bool { c == '_' || c.is_ascii_alphabetic() }

#[inline]
const fn is_ident_continue(c: char) -> bool { c == '_' || c == '.' || c.is_ascii_alphanumeric() }

#[inline]
fn to_u32(n: usize) -> u32 { u32::try_from(n).unwrap_or(u32::MAX) }

fn word_token(s: &str) -> TokenKind<'_> {
    match s {
        "true" => TokenKind::Kw(Keyword::True),
        "false" => TokenKind::Kw(Keyword::False),
        "null" => TokenKind::Kw(Keyword::Null),
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "xor" => TokenKind::Xor,
        "not" => TokenKind::Not,
        "is" | "eq" => TokenKind::EqEq,
        "neq" => TokenKind::Ne,
        "gt" => TokenKind::Gt,
        "lt" => TokenKind::Lt,
        "gte" => TokenKind::Ge,
        "lte" => TokenKind::Le,
        _ => TokenKind::Ident(s),
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn toks(src: &str) -> Vec<TokenKind<'_>> {
        Lexer::new(src, SourceId(0)).tokenize().unwrap().into_iter().map(|t| t.value).collect()
    }

    #[test]
    fn literals_and_names() {
        use TokenKind::*;
        let v = toks(r#"12 3.5 "hi \"you\"" $gold $Parlance.Internal.x round_places true false null"#);
        assert_eq!(
            v,
            vec![
                Number(12.0),
                Number(3.5),
                Str("hi \"you\"".into()),
                Variable("$gold"),
                Variable("$Parlance.Internal.x"),
                Ident("round_places"),
                Kw(Keyword::True),
                Kw(Keyword::False),
                Kw(Keyword::Null),
                Eof,
            ]
        );
    }

    #[test]
    fn symbolic_and_word_operators_agree() {
        use TokenKind::*;
        assert_eq!(toks("== != < <= > >= && || ^ !"), toks("is neq lt lte gt gte and or xor not"));
        assert_eq!(toks("eq = + - * / % ( ) ,"), vec![EqEq, Assign, Plus, Minus, Star, Slash, Percent, LParen, RParen, Comma, Eof]);
    }

    #[test]
    fn errors_carry_spans() {
        let err = Lexer::new("1 + \"open", SourceId(0)).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.span.start, Pos(4));

        let err = Lexer::new("$ + 1", SourceId(0)).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::EmptyVariable);

        let err = Lexer::new("3 # 4", SourceId(0)).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('#'));

        let err = Lexer::new("12abc", SourceId(0)).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidNumber);
    }

    #[test]
    fn linemap_basic() {
        let lm = LineMap::new("a\nbb\nccc");
        assert_eq!(lm.line_col(Pos(0)), (1, 1));
        assert_eq!(lm.line_col(Pos(2)), (2, 1));
        assert_eq!(lm.line_col(Pos(6)), (3, 2));
    }

    proptest::proptest! {
        #[test]
        fn integers_lex_to_numbers(n in 0u32..1_000_000) {
            let src = n.to_string();
            let v = toks(&src);
            proptest::prop_assert_eq!(v, vec![TokenKind::Number(f64::from(n)), TokenKind::Eof]);
        }
    }
}
