//! Определения ошибок конвейера компиляции шейдеров.

use thiserror::Error;

use crate::parser::ParseError;

/// Основной тип `Result` для библиотеки.
pub type ShaderResult<T> = Result<T, ShaderError>;

/// Перечисление всех фатальных ошибок конвейера.
///
/// Каждая стадия либо возвращает полностью корректный объект, либо одну
/// из этих ошибок; частичные результаты между стадиями не передаются.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Include not found: '{name}' (included from {from}:{line})")]
    IncludeNotFound {
        name: String,
        from: String,
        line: u32,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to link program: {0}")]
    Link(String),

    #[error("Failed to map IO: {0}")]
    Map(String),

    #[error("Reflection error: {0}")]
    Reflection(String),

    #[error("Lowering error: {0}")]
    Lowering(String),

    #[error("Optimizer reported a fatal error: {0}")]
    OptimizationFatal(String),

    #[error("Emission error: {0}")]
    Emission(String),

    #[error("Serialization IO error: {0}")]
    SerializationIo(#[from] std::io::Error),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl ShaderError {
    /// Короткое имя категории ошибки (для логов и отчётов).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IncludeNotFound { .. } => "include",
            Self::Parse(_) => "parse",
            Self::Link(_) => "link",
            Self::Map(_) => "map",
            Self::Reflection(_) => "reflection",
            Self::Lowering(_) => "lowering",
            Self::OptimizationFatal(_) => "optimizer",
            Self::Emission(_) => "emission",
            Self::SerializationIo(_) => "io",
            Self::InvalidOptions(_) => "options",
        }
    }
}
