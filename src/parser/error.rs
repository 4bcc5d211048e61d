//! Ошибки парсера.

use super::token::{Span, Token};
use thiserror::Error;

/// Ошибка парсинга или семантической проверки.
///
/// Синтаксические ошибки сначала несут только [`Span`] в развёрнутом
/// тексте; на границе парсера они переводятся в [`ParseError::Located`]
/// с именем файла и строкой через карту строк препроцессора.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Неожиданный токен.
    #[error("syntax error, expected {expected}, found '{found}'")]
    UnexpectedToken {
        span: Span,
        expected: String,
        found: String,
    },

    /// Неожиданный конец ввода.
    #[error("unexpected end of input: {message}")]
    UnexpectedEof { span: Span, message: String },

    /// Неверный литерал.
    #[error("invalid literal: {message}")]
    InvalidLiteral { span: Span, message: String },

    /// Ошибка лексера.
    #[error("unexpected character")]
    LexerError { span: Span },

    /// Неподдерживаемая конструкция языка.
    #[error("'{construct}' is not supported")]
    Unsupported { span: Span, construct: String },

    /// Ошибка с привязкой к файлу и строке.
    #[error("ERROR: {file}:{line}: {message}")]
    Located {
        file: String,
        line: u32,
        message: String,
    },
}

impl ParseError {
    /// Создать ошибку "неожиданный токен".
    pub fn unexpected_token(span: Span, expected: impl Into<String>, found: &Token) -> Self {
        Self::UnexpectedToken {
            span,
            expected: expected.into(),
            found: found.to_string(),
        }
    }

    /// Создать ошибку "неожиданный конец".
    pub fn unexpected_eof(span: Span, message: impl Into<String>) -> Self {
        Self::UnexpectedEof {
            span,
            message: message.into(),
        }
    }

    pub fn invalid_literal(span: Span, message: impl Into<String>) -> Self {
        Self::InvalidLiteral {
            span,
            message: message.into(),
        }
    }

    pub fn unsupported(span: Span, construct: impl Into<String>) -> Self {
        Self::Unsupported {
            span,
            construct: construct.into(),
        }
    }

    /// Ошибка в известном файле и строке.
    pub fn at(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self::Located {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    /// Получить позицию ошибки (для [`ParseError::Located`]: пустой Span).
    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::UnexpectedEof { span, .. } => *span,
            Self::InvalidLiteral { span, .. } => *span,
            Self::LexerError { span } => *span,
            Self::Unsupported { span, .. } => *span,
            Self::Located { .. } => Span::default(),
        }
    }

    /// Строка в исходном файле, если ошибка уже привязана.
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::Located { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Текст сообщения без префикса `ERROR: file:line:`.
    pub fn message(&self) -> String {
        match self {
            Self::Located { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_located_format() {
        let err = ParseError::at("shader.frag", 7, "'x' : undeclared identifier");
        assert_eq!(
            err.to_string(),
            "ERROR: shader.frag:7: 'x' : undeclared identifier"
        );
        assert_eq!(err.line(), Some(7));
        assert_eq!(err.message(), "'x' : undeclared identifier");
    }

    #[test]
    fn test_unexpected_token_keeps_span() {
        let err = ParseError::unexpected_token(Span::new(3, 4), "';'", &Token::RBrace);
        assert_eq!(err.span(), Span::new(3, 4));
        assert_eq!(err.to_string(), "syntax error, expected ';', found '}'");
    }
}
