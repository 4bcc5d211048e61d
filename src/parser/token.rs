//! Токены и позиции для парсера шейдеров.

use serde::{Deserialize, Serialize};

/// Позиция в исходном коде (байтовые смещения в развёрнутом тексте).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Начальная позиция (байт).
    pub start: usize,
    /// Конечная позиция (байт).
    pub end: usize,
}

impl Span {
    /// Создать новый Span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Объединить два Span.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Значение с позицией.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

/// Токены языка шейдеров.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Идентификатор (включая имена типов)
    Ident(String),
    /// Целый литерал
    IntLit(u64),
    /// Беззнаковый литерал (`1u`)
    UintLit(u64),
    /// Литерал с плавающей точкой
    FloatLit(f64),
    /// `true` / `false`
    BoolLit(bool),

    // Ключевые слова
    Const,
    Uniform,
    In,
    Out,
    InOut,
    Attribute,
    Varying,
    Layout,
    Precision,
    Highp,
    Mediump,
    Lowp,
    Flat,
    Smooth,
    NoPerspective,
    Centroid,
    Invariant,
    If,
    Else,
    For,
    While,
    Do,
    Break,
    Continue,
    Return,
    Discard,
    Struct,

    // Пунктуация
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Colon,
    Semicolon,
    Question,

    // Операторы
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    Inc,
    Dec,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    XorXor,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,

    /// Конец файла
    Eof,
}

impl Token {
    /// Квалификатор точности (игнорируется).
    pub fn is_precision(&self) -> bool {
        matches!(self, Token::Highp | Token::Mediump | Token::Lowp)
    }

    /// Квалификатор интерполяции или `invariant`.
    pub fn is_interpolation(&self) -> bool {
        matches!(
            self,
            Token::Flat | Token::Smooth | Token::NoPerspective | Token::Centroid | Token::Invariant
        )
    }

    /// Начинает ли токен объявление (квалификатор хранения или layout).
    pub fn starts_declaration(&self) -> bool {
        matches!(
            self,
            Token::Const
                | Token::Uniform
                | Token::In
                | Token::Out
                | Token::InOut
                | Token::Attribute
                | Token::Varying
                | Token::Layout
        ) || self.is_precision()
            || self.is_interpolation()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Token::Ident(s) => return write!(f, "{}", s),
            Token::IntLit(n) => return write!(f, "{}", n),
            Token::UintLit(n) => return write!(f, "{}u", n),
            Token::FloatLit(n) => return write!(f, "{}", n),
            Token::BoolLit(b) => return write!(f, "{}", b),
            Token::Const => "const",
            Token::Uniform => "uniform",
            Token::In => "in",
            Token::Out => "out",
            Token::InOut => "inout",
            Token::Attribute => "attribute",
            Token::Varying => "varying",
            Token::Layout => "layout",
            Token::Precision => "precision",
            Token::Highp => "highp",
            Token::Mediump => "mediump",
            Token::Lowp => "lowp",
            Token::Flat => "flat",
            Token::Smooth => "smooth",
            Token::NoPerspective => "noperspective",
            Token::Centroid => "centroid",
            Token::Invariant => "invariant",
            Token::If => "if",
            Token::Else => "else",
            Token::For => "for",
            Token::While => "while",
            Token::Do => "do",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Return => "return",
            Token::Discard => "discard",
            Token::Struct => "struct",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Question => "?",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::AmpAssign => "&=",
            Token::PipeAssign => "|=",
            Token::CaretAssign => "^=",
            Token::ShlAssign => "<<=",
            Token::ShrAssign => ">>=",
            Token::Inc => "++",
            Token::Dec => "--",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::XorXor => "^^",
            Token::Bang => "!",
            Token::Tilde => "~",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::Eof => "end of file",
        };
        f.write_str(text)
    }
}
