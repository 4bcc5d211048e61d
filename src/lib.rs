//! # glsl-xc
//!
//! Кросс-компилятор шейдеров: разбор и проверка исходника стадии,
//! компоновка, рефлексия uniform, понижение в переносимый байткод,
//! оптимизация и генерация текста целевого диалекта. Результат:
//! бинарный артефакт с таблицей uniform и сгенерированным текстом.
//!
//! ## Основные модули
//!
//! - [`parser`] - препроцессор и синтаксический разбор
//! - [`sema`] - семантическая проверка, построение [`ir`]
//! - [`linker`] - компоновка и назначение location
//! - [`reflect`] - таблица uniform с непрерывными регистрами
//! - [`lower`], [`bytecode`] - переносимый байткод
//! - [`optimizer`] - проходы легализации и оптимизации
//! - [`emit`] - генерация текста под версию и профиль
//! - [`artifact`] - бинарный формат результата
//! - [`pipeline`] - точка входа [`compile`]
//!
//! ## Пример
//!
//! ```rust,ignore
//! use glsl_xc::{compile, CompileOptions, DiagnosticLog, Stage};
//!
//! let options = CompileOptions::new(Stage::Fragment, "tint.frag");
//! let mut log = DiagnosticLog::new();
//! let artifact = compile(
//!     "uniform vec4 u_tint; uniform sampler2D s_albedo; void main(){}",
//!     &options,
//!     &mut log,
//! )?;
//! let bytes = artifact.to_bytes()?;
//! ```

// === Основные модули ===
pub mod diagnostic;
pub mod error;
pub mod includer;
pub mod ops;
pub mod parser;
pub mod stage;
pub mod types;

// === Проверка и промежуточное представление ===
pub mod builtins;
pub mod ir;
pub mod limits;
pub mod sema;

// === Компоновка и рефлексия ===
pub mod linker;
pub mod reflect;

// === Байткод и бэкенд ===
pub mod bytecode;
pub mod emit;
pub mod lower;
pub mod optimizer;

// === Результат и точка входа ===
pub mod artifact;
pub mod pipeline;

// === Re-exports для удобства ===
pub use artifact::CompiledArtifact;
pub use bytecode::Module;
pub use diagnostic::{Diagnostic, DiagnosticLog, DiagnosticSink, LogSink, Severity};
pub use error::{ShaderError, ShaderResult};
pub use includer::{FileIncluder, Includer, MemoryIncluder};
pub use pipeline::{
    compile, compile_shader, compile_with, finalize, initialize, CompileOptions, ProcessGuard,
    TargetProfile,
};
pub use reflect::{UniformDescriptor, UniformTable, UniformType};
pub use stage::Stage;
