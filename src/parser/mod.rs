//! Синтаксический фронтенд: препроцессор, лексер и парсер.
//!
//! # Пример
//!
//! ```rust,ignore
//! use glsl_xc::parser::{parse_translation_unit, SourceUnit};
//! use glsl_xc::{MemoryIncluder, DiagnosticLog, Stage};
//!
//! let unit = SourceUnit::new(Stage::Fragment, "a.frag", "void main(){}");
//! let mut includer = MemoryIncluder::new();
//! let mut log = DiagnosticLog::new();
//! let tu = parse_translation_unit(&unit, &mut includer, &mut log).unwrap();
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;
pub mod preprocessor;
pub mod token;

pub use ast::TranslationUnit;
pub use error::ParseError;
pub use lexer::Lexer;
pub use parser::Parser;
pub use preprocessor::{LineMap, Preprocessed, Preprocessor, DEFAULT_VERSION};
pub use token::{Span, Spanned, Token};

use crate::diagnostic::DiagnosticSink;
use crate::error::ShaderResult;
use crate::includer::Includer;
use crate::stage::Stage;

/// Директива, которую компилятор всегда вставляет перед исходником.
pub const INCLUDE_PREAMBLE: &str = "#extension GL_GOOGLE_include_directive : require\n";

/// Исходный текст одной стадии.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub stage: Stage,
    pub file_path: String,
    pub text: String,
    /// Директивы, вставляемые компилятором перед текстом.
    pub preamble: String,
}

impl SourceUnit {
    pub fn new(stage: Stage, file_path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            stage,
            file_path: file_path.into(),
            text: text.into(),
            preamble: INCLUDE_PREAMBLE.to_string(),
        }
    }

    /// Добавить `#define` в преамбулу.
    pub fn with_defines(mut self, defines: &[(String, String)]) -> Self {
        for (name, value) in defines {
            self.preamble.push_str(&format!("#define {} {}\n", name, value));
        }
        self
    }
}

/// Развернуть и разобрать единицу трансляции.
///
/// Синтаксические ошибки возвращаются уже привязанными к файлу и строке.
pub fn parse_translation_unit(
    unit: &SourceUnit,
    includer: &mut dyn Includer,
    sink: &mut dyn DiagnosticSink,
) -> ShaderResult<TranslationUnit> {
    let expanded =
        Preprocessor::new(includer, sink).run(&unit.preamble, &unit.text, &unit.file_path)?;

    let items = Parser::new(&expanded.text)
        .and_then(|mut parser| parser.parse_items())
        .map_err(|e| expanded.line_map.locate_error(e))?;

    log::debug!(
        "parsed {} ({} stage): {} top-level items",
        unit.file_path,
        unit.stage,
        items.len()
    );

    Ok(TranslationUnit {
        file: unit.file_path.clone(),
        version: expanded.version,
        es: expanded.es,
        extensions: expanded.extensions,
        items,
        line_map: expanded.line_map,
    })
}
