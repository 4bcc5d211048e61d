//! Лексер шейдерного языка (после препроцессора).

use logos::Logos;

use super::error::ParseError;
use super::token::{Span, Spanned, Token};

/// Внутренние токены для logos.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")] // Комментарии уже убраны препроцессором
enum LogosToken {
    // Ключевые слова (до идентификаторов!)
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("const")]
    Const,
    #[token("uniform")]
    Uniform,
    #[token("in")]
    In,
    #[token("out")]
    Out,
    #[token("inout")]
    InOut,
    #[token("attribute")]
    Attribute,
    #[token("varying")]
    Varying,
    #[token("layout")]
    Layout,
    #[token("precision")]
    Precision,
    #[token("highp")]
    Highp,
    #[token("mediump")]
    Mediump,
    #[token("lowp")]
    Lowp,
    #[token("flat")]
    Flat,
    #[token("smooth")]
    Smooth,
    #[token("noperspective")]
    NoPerspective,
    #[token("centroid")]
    Centroid,
    #[token("invariant")]
    Invariant,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,
    #[token("discard")]
    Discard,
    #[token("struct")]
    Struct,

    // Float: `1.`, `1.5`, `.5`, `1e3`, с необязательным суффиксом f
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fF]?", parse_float)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fF]?", parse_float)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fF]?", parse_float)]
    Float(f64),

    // Десятичные и восьмеричные целые
    #[regex(r"[0-9]+", |lex| parse_decimal(lex.slice()))]
    Int(u64),
    #[regex(r"[0-9]+[uU]", |lex| parse_decimal(strip_suffix(lex.slice())))]
    Uint(u64),

    // Шестнадцатеричные
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| u64::from_str_radix(&lex.slice()[2..], 16).ok())]
    HexInt(u64),
    #[regex(r"0[xX][0-9a-fA-F]+[uU]", |lex| u64::from_str_radix(&strip_suffix(lex.slice())[2..], 16).ok())]
    HexUint(u64),

    // Составные операторы (многосимвольные сначала!)
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("++")]
    Inc,
    #[token("--")]
    Dec,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("^^")]
    XorXor,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,

    // Односимвольные
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("?")]
    Question,
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
    #[token("=")]
    Assign,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,

    // Идентификатор (имена типов тоже идентификаторы)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn strip_suffix(s: &str) -> &str {
    &s[..s.len() - 1]
}

fn parse_float(lex: &mut logos::Lexer<LogosToken>) -> Option<f64> {
    lex.slice().trim_end_matches(['f', 'F']).parse::<f64>().ok()
}

/// Десятичное или восьмеричное (ведущий ноль) число.
fn parse_decimal(s: &str) -> Option<u64> {
    if s.len() > 1 && s.starts_with('0') {
        u64::from_str_radix(&s[1..], 8).ok()
    } else {
        s.parse::<u64>().ok()
    }
}

/// Лексер шейдерного языка.
pub struct Lexer<'a> {
    logos: logos::Lexer<'a, LogosToken>,
    source: &'a str,
    peeked: Option<Spanned<Token>>,
}

impl<'a> Lexer<'a> {
    /// Создать новый лексер.
    pub fn new(source: &'a str) -> Self {
        Self {
            logos: LogosToken::lexer(source),
            source,
            peeked: None,
        }
    }

    /// Получить следующий токен.
    pub fn next_token(&mut self) -> Result<Spanned<Token>, ParseError> {
        if let Some(token) = self.peeked.take() {
            return Ok(token);
        }

        self.read_token()
    }

    /// Посмотреть на следующий токен без его потребления.
    pub fn peek_token(&mut self) -> Result<&Spanned<Token>, ParseError> {
        let token = match self.peeked.take() {
            Some(token) => token,
            None => self.read_token()?,
        };
        Ok(self.peeked.insert(token))
    }

    /// Разобрать весь вход в вектор токенов (последний: `Eof`).
    pub fn tokenize(mut self) -> Result<Vec<Spanned<Token>>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.value == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Прочитать токен из logos.
    fn read_token(&mut self) -> Result<Spanned<Token>, ParseError> {
        match self.logos.next() {
            Some(Ok(logos_token)) => {
                let span = Span::new(self.logos.span().start, self.logos.span().end);
                let token = self.convert_token(logos_token);
                Ok(Spanned::new(token, span))
            }
            Some(Err(())) => {
                let span = Span::new(self.logos.span().start, self.logos.span().end);
                let slice = self.logos.slice();
                if slice.starts_with(|c: char| c.is_ascii_digit()) {
                    Err(ParseError::invalid_literal(
                        span,
                        format!("'{}' is not a valid number", slice),
                    ))
                } else {
                    Err(ParseError::LexerError { span })
                }
            }
            None => {
                let pos = self.source.len();
                Ok(Spanned::new(Token::Eof, Span::new(pos, pos)))
            }
        }
    }

    /// Конвертировать внутренний токен logos в публичный Token.
    fn convert_token(&self, logos_token: LogosToken) -> Token {
        match logos_token {
            LogosToken::True => Token::BoolLit(true),
            LogosToken::False => Token::BoolLit(false),
            LogosToken::Const => Token::Const,
            LogosToken::Uniform => Token::Uniform,
            LogosToken::In => Token::In,
            LogosToken::Out => Token::Out,
            LogosToken::InOut => Token::InOut,
            LogosToken::Attribute => Token::Attribute,
            LogosToken::Varying => Token::Varying,
            LogosToken::Layout => Token::Layout,
            LogosToken::Precision => Token::Precision,
            LogosToken::Highp => Token::Highp,
            LogosToken::Mediump => Token::Mediump,
            LogosToken::Lowp => Token::Lowp,
            LogosToken::Flat => Token::Flat,
            LogosToken::Smooth => Token::Smooth,
            LogosToken::NoPerspective => Token::NoPerspective,
            LogosToken::Centroid => Token::Centroid,
            LogosToken::Invariant => Token::Invariant,
            LogosToken::If => Token::If,
            LogosToken::Else => Token::Else,
            LogosToken::For => Token::For,
            LogosToken::While => Token::While,
            LogosToken::Do => Token::Do,
            LogosToken::Break => Token::Break,
            LogosToken::Continue => Token::Continue,
            LogosToken::Return => Token::Return,
            LogosToken::Discard => Token::Discard,
            LogosToken::Struct => Token::Struct,
            LogosToken::Float(f) => Token::FloatLit(f),
            LogosToken::Int(n) | LogosToken::HexInt(n) => Token::IntLit(n),
            LogosToken::Uint(n) | LogosToken::HexUint(n) => Token::UintLit(n),
            LogosToken::ShlAssign => Token::ShlAssign,
            LogosToken::ShrAssign => Token::ShrAssign,
            LogosToken::PlusAssign => Token::PlusAssign,
            LogosToken::MinusAssign => Token::MinusAssign,
            LogosToken::StarAssign => Token::StarAssign,
            LogosToken::SlashAssign => Token::SlashAssign,
            LogosToken::PercentAssign => Token::PercentAssign,
            LogosToken::AmpAssign => Token::AmpAssign,
            LogosToken::PipeAssign => Token::PipeAssign,
            LogosToken::CaretAssign => Token::CaretAssign,
            LogosToken::Inc => Token::Inc,
            LogosToken::Dec => Token::Dec,
            LogosToken::Le => Token::Le,
            LogosToken::Ge => Token::Ge,
            LogosToken::EqEq => Token::EqEq,
            LogosToken::NotEq => Token::NotEq,
            LogosToken::AndAnd => Token::AndAnd,
            LogosToken::OrOr => Token::OrOr,
            LogosToken::XorXor => Token::XorXor,
            LogosToken::Shl => Token::Shl,
            LogosToken::Shr => Token::Shr,
            LogosToken::LParen => Token::LParen,
            LogosToken::RParen => Token::RParen,
            LogosToken::LBracket => Token::LBracket,
            LogosToken::RBracket => Token::RBracket,
            LogosToken::LBrace => Token::LBrace,
            LogosToken::RBrace => Token::RBrace,
            LogosToken::Dot => Token::Dot,
            LogosToken::Comma => Token::Comma,
            LogosToken::Colon => Token::Colon,
            LogosToken::Semicolon => Token::Semicolon,
            LogosToken::Question => Token::Question,
            LogosToken::Plus => Token::Plus,
            LogosToken::Minus => Token::Minus,
            LogosToken::Star => Token::Star,
            LogosToken::Slash => Token::Slash,
            LogosToken::Percent => Token::Percent,
            LogosToken::Assign => Token::Assign,
            LogosToken::Lt => Token::Lt,
            LogosToken::Gt => Token::Gt,
            LogosToken::Bang => Token::Bang,
            LogosToken::Tilde => Token::Tilde,
            LogosToken::Amp => Token::Amp,
            LogosToken::Pipe => Token::Pipe,
            LogosToken::Caret => Token::Caret,
            LogosToken::Ident(s) => Token::Ident(s),
        }
    }

    /// Получить текущую позицию.
    pub fn position(&self) -> usize {
        self.logos.span().start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn test_lexer_basic() {
        let mut lexer = Lexer::new("uniform vec4 u_tint;");

        assert_eq!(lexer.next_token().unwrap().value, Token::Uniform);
        assert_eq!(
            lexer.peek_token().unwrap().value,
            Token::Ident("vec4".to_string())
        );
        assert_eq!(
            lexer.next_token().unwrap().value,
            Token::Ident("vec4".to_string())
        );
        assert_eq!(
            lexer.next_token().unwrap().value,
            Token::Ident("u_tint".to_string())
        );
        assert_eq!(lexer.next_token().unwrap().value, Token::Semicolon);
        assert_eq!(lexer.next_token().unwrap().value, Token::Eof);
    }

    #[test]
    fn test_lexer_numbers() {
        assert_eq!(
            kinds("1 2u 0x1F 010 1.5 .5 2. 1e3 3.0f"),
            vec![
                Token::IntLit(1),
                Token::UintLit(2),
                Token::IntLit(31),
                Token::IntLit(8),
                Token::FloatLit(1.5),
                Token::FloatLit(0.5),
                Token::FloatLit(2.0),
                Token::FloatLit(1000.0),
                Token::FloatLit(3.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_operators() {
        assert_eq!(
            kinds("a <<= b >> c ^^ d++"),
            vec![
                Token::Ident("a".to_string()),
                Token::ShlAssign,
                Token::Ident("b".to_string()),
                Token::Shr,
                Token::Ident("c".to_string()),
                Token::XorXor,
                Token::Ident("d".to_string()),
                Token::Inc,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(
            kinds("constant input"),
            vec![
                Token::Ident("constant".to_string()),
                Token::Ident("input".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_rejects_bad_octal() {
        let err = Lexer::new("09").tokenize().unwrap_err();
        assert!(matches!(err, ParseError::InvalidLiteral { .. }));
        let err = Lexer::new("@").tokenize().unwrap_err();
        assert!(matches!(err, ParseError::LexerError { .. }));
    }
}
