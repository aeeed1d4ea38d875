//! Token kinds and the `Token` record produced by the lexer.

use std::fmt;

/// Closed set of lexical categories. No catch-all variant: anything
/// that doesn't match becomes `Illegal`.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Illegal(char),
    Eof,

    Ident,
    Int(i64),
    Float(f64),
    Str(String),

    /// A raw `#name rest-of-line` preprocessor directive, already
    /// classified by name (`Info`/`Include`/`Define`) or left generic.
    Directive,
    Info,
    Include,
    Define,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
    Bang,

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,

    // Keywords (matched case-insensitively, canonically lowercase)
    KwInt,
    KwStr,
    KwReal,
    KwIf,
    KwElse,
    KwFor,
    KwWhile,
    KwDo,
    KwSwitch,
    KwCase,
    KwDefault,
    KwBreak,
    KwContinue,
    KwReturn,
    KwFunction,
    KwMes,
    KwStep,
    KwEndStep,
    KwDelMe,
    KwDelUs,
    KwDelAll,

    // Event names
    EventTime,
    EventMidiTime,
    EventMidiEnd,
    EventKey,
    EventClick,
    EventRbDown,
    EventRbDblClick,
    EventUser,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One lexical token: a kind, the exact source slice it came from, and
/// its 1-indexed source position.
///
/// Invariants: `line >= 1`, `column >= 1`; `column` resets to 1 after
/// each `\n`.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

/// Looks up the canonical keyword/event `TokenKind` for an identifier,
/// case-insensitively. Returns `None` for ordinary identifiers.
pub fn lookup_keyword(ident: &str) -> Option<TokenKind> {
    let lower = ident.to_ascii_lowercase();
    Some(match lower.as_str() {
        "int" => TokenKind::KwInt,
        "str" => TokenKind::KwStr,
        "real" => TokenKind::KwReal,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "for" => TokenKind::KwFor,
        "while" => TokenKind::KwWhile,
        "do" => TokenKind::KwDo,
        "switch" => TokenKind::KwSwitch,
        "case" => TokenKind::KwCase,
        "default" => TokenKind::KwDefault,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "return" => TokenKind::KwReturn,
        "function" => TokenKind::KwFunction,
        "mes" => TokenKind::KwMes,
        "step" => TokenKind::KwStep,
        "end_step" => TokenKind::KwEndStep,
        "del_me" => TokenKind::KwDelMe,
        "del_us" => TokenKind::KwDelUs,
        "del_all" => TokenKind::KwDelAll,
        "time" => TokenKind::EventTime,
        "midi_time" => TokenKind::EventMidiTime,
        "midi_end" => TokenKind::EventMidiEnd,
        "key" => TokenKind::EventKey,
        "click" => TokenKind::EventClick,
        "rbdown" => TokenKind::EventRbDown,
        "rbdblclk" => TokenKind::EventRbDblClick,
        "user" => TokenKind::EventUser,
        _ => return None,
    })
}

/// The canonical event-name string the compiler stamps into
/// `RegisterEventHandler` opcodes.
pub fn event_name(kind: &TokenKind) -> Option<&'static str> {
    Some(match kind {
        TokenKind::EventTime => "TIME",
        TokenKind::EventMidiTime => "MIDI_TIME",
        TokenKind::EventMidiEnd => "MIDI_END",
        TokenKind::EventKey => "KEY",
        TokenKind::EventClick => "CLICK",
        TokenKind::EventRbDown => "RBDOWN",
        TokenKind::EventRbDblClick => "RBDBLCLK",
        TokenKind::EventUser => "USER",
        _ => return None,
    })
}
