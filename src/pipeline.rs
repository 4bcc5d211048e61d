//! Точка входа компиляции и жизненный цикл процесса.
//!
//! ```text
//! source -> parse_program -> link -> reflect -> lower -> optimize -> emit
//!        -> CompiledArtifact
//! ```
//!
//! Каждый запрос владеет своим includer-ом и промежуточными объектами;
//! общие между запросами только неизменяемые таблицы, которые строит
//! [`initialize`].

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::artifact::CompiledArtifact;
use crate::builtins;
use crate::diagnostic::{Diagnostic, DiagnosticSink};
use crate::emit;
use crate::error::{ShaderError, ShaderResult};
use crate::includer::{FileIncluder, Includer};
use crate::linker::link;
use crate::lower::lower;
use crate::optimizer::optimize;
use crate::parser::SourceUnit;
use crate::reflect::reflect;
use crate::sema::parse_program;
use crate::stage::Stage;

/// Бит встраиваемого профиля в упакованной версии.
pub const ES_PROFILE_BIT: u32 = 0x8000_0000;

/// Версия целевого диалекта и профиль.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetProfile {
    pub version: u32,
    pub es: bool,
}

impl TargetProfile {
    pub fn new(version: u32, es: bool) -> Self {
        Self { version, es }
    }

    /// Разобрать версию со старшим битом профиля.
    pub fn from_packed(packed: u32) -> Self {
        Self {
            version: packed & !ES_PROFILE_BIT,
            es: packed & ES_PROFILE_BIT != 0,
        }
    }

    pub fn packed(self) -> u32 {
        if self.es {
            self.version | ES_PROFILE_BIT
        } else {
            self.version
        }
    }
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self::new(300, true)
    }
}

impl fmt::Display for TargetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.es {
            write!(f, "{} es", self.version)
        } else {
            write!(f, "{}", self.version)
        }
    }
}

/// Параметры одного запроса компиляции.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub stage: Stage,
    pub file_path: String,
    pub include_dirs: Vec<PathBuf>,
    pub target: TargetProfile,
    pub optimize: bool,
    /// Пары `NAME VALUE`, добавляемые как `#define`.
    pub defines: Vec<(String, String)>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            stage: Stage::Vertex,
            file_path: "shader.glsl".to_string(),
            include_dirs: Vec::new(),
            target: TargetProfile::default(),
            optimize: true,
            defines: Vec::new(),
        }
    }
}

impl CompileOptions {
    pub fn new(stage: Stage, file_path: impl Into<String>) -> Self {
        Self {
            stage,
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    fn check(&self) -> ShaderResult<()> {
        emit::Target::new(self.target.version, self.target.es).map_err(ShaderError::InvalidOptions)?;
        if let Some((name, _)) = self
            .defines
            .iter()
            .find(|(name, _)| name.is_empty() || name.contains(char::is_whitespace))
        {
            return Err(ShaderError::InvalidOptions(format!(
                "invalid define name '{}'",
                name
            )));
        }
        Ok(())
    }
}

/// Скомпилировать исходник с поиском include по `options.include_dirs`.
pub fn compile(
    source: &str,
    options: &CompileOptions,
    sink: &mut dyn DiagnosticSink,
) -> ShaderResult<CompiledArtifact> {
    let mut includer = FileIncluder::new(options.include_dirs.clone());
    compile_with(source, options, &mut includer, sink)
}

/// То же, что [`compile`], но с внешним includer-ом.
pub fn compile_with(
    source: &str,
    options: &CompileOptions,
    includer: &mut dyn Includer,
    sink: &mut dyn DiagnosticSink,
) -> ShaderResult<CompiledArtifact> {
    match run_stages(source, options, includer, sink) {
        Ok(artifact) => Ok(artifact),
        Err(e) => {
            // компоновщик и оптимизатор сообщают о своих ошибках сами
            if !matches!(
                e,
                ShaderError::Link(_) | ShaderError::Map(_) | ShaderError::OptimizationFatal(_)
            ) {
                let line = match &e {
                    ShaderError::Parse(parse) => parse.line().unwrap_or(0),
                    ShaderError::IncludeNotFound { line, .. } => *line,
                    _ => 0,
                };
                sink.report(Diagnostic::error(options.file_path.clone(), line, e.to_string()));
            }
            log::debug!("compile of {} failed at {} stage", options.file_path, e.kind());
            Err(e)
        }
    }
}

fn run_stages(
    source: &str,
    options: &CompileOptions,
    includer: &mut dyn Includer,
    sink: &mut dyn DiagnosticSink,
) -> ShaderResult<CompiledArtifact> {
    options.check()?;
    log::debug!(
        "compiling {} as {} shader for {} (optimize = {})",
        options.file_path,
        options.stage,
        options.target,
        options.optimize
    );

    let unit = SourceUnit::new(options.stage, options.file_path.clone(), source)
        .with_defines(&options.defines);
    let parsed = parse_program(&unit, includer, sink)?;
    let linked = link(vec![parsed], sink)?;

    let (uniforms, linked) = reflect(linked)?;

    let module = lower(&linked)?;
    let module = optimize(module, options.optimize, &options.file_path, sink)?;
    let source = emit::emit(&module, options.target.version, options.target.es)?;

    log::debug!(
        "compiled {}: {} uniforms, {} bytes of source",
        options.file_path,
        uniforms.len(),
        source.len()
    );
    Ok(CompiledArtifact::new(uniforms, source))
}

// === Жизненный цикл процесса ===

static ACTIVE: AtomicUsize = AtomicUsize::new(0);

/// Подготовить общие таблицы. Вызовы считаются; парный [`finalize`]
/// уменьшает счётчик.
pub fn initialize() {
    if ACTIVE.fetch_add(1, Ordering::SeqCst) == 0 {
        let functions = builtins::function_index().len();
        log::debug!("compiler initialized ({} builtin functions)", functions);
    }
}

/// Завершить парный [`initialize`]. Лишние вызовы игнорируются.
pub fn finalize() {
    let released = ACTIVE.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    if released == Ok(1) {
        log::debug!("compiler finalized");
    }
}

/// Число активных [`initialize`] без парного [`finalize`].
pub fn active_sessions() -> usize {
    ACTIVE.load(Ordering::SeqCst)
}

/// Держит процесс инициализированным до конца области видимости.
#[derive(Debug)]
pub struct ProcessGuard(());

impl ProcessGuard {
    pub fn new() -> Self {
        initialize();
        ProcessGuard(())
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        finalize();
    }
}

/// Скомпилировать один шейдер внутри пары initialize/finalize и записать
/// артефакт в `writer`.
pub fn compile_shader<W: std::io::Write>(
    source: &str,
    options: &CompileOptions,
    writer: &mut W,
    sink: &mut dyn DiagnosticSink,
) -> ShaderResult<()> {
    let _guard = ProcessGuard::new();
    let artifact = compile(source, options, sink)?;
    artifact.write_to(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticLog;
    use crate::includer::MemoryIncluder;
    use crate::reflect::UniformType;

    #[test]
    fn test_packed_profile() {
        let es = TargetProfile::from_packed(300 | ES_PROFILE_BIT);
        assert_eq!(es, TargetProfile::new(300, true));
        assert_eq!(es.packed(), 0x8000_012C);
        assert_eq!(es.to_string(), "300 es");
        let desktop = TargetProfile::from_packed(430);
        assert!(!desktop.es);
        assert_eq!(desktop.to_string(), "430");
    }

    #[test]
    fn test_compile_fragment() {
        let mut options = CompileOptions::new(Stage::Fragment, "tint.frag");
        options.target = TargetProfile::new(310, true);
        let mut log = DiagnosticLog::new();
        let artifact = compile(
            "uniform vec4 u_tint; uniform sampler2D s_albedo; void main(){}",
            &options,
            &mut log,
        )
        .unwrap();
        let names: Vec<(&str, UniformType)> = artifact
            .uniforms
            .iter()
            .map(|u| (u.name.as_str(), u.ty))
            .collect();
        assert_eq!(
            names,
            [("u_tint", UniformType::Vec4), ("s_albedo", UniformType::Sampler)]
        );
        assert!(artifact.source.starts_with("#version 310 es\n"));
    }

    #[test]
    fn test_defines_reach_the_preprocessor() {
        let mut options = CompileOptions::new(Stage::Fragment, "defs.frag");
        options.defines = vec![("USE_TINT".to_string(), "1".to_string())];
        let src = "#ifdef USE_TINT\nuniform vec4 u_tint;\n#endif\nvoid main(){}";
        let mut log = DiagnosticLog::new();
        let artifact = compile_with(src, &options, &mut MemoryIncluder::new(), &mut log).unwrap();
        assert_eq!(artifact.uniforms.len(), 1);
    }

    #[test]
    fn test_invalid_options() {
        let mut options = CompileOptions::new(Stage::Vertex, "bad.vert");
        options.target = TargetProfile::new(999, false);
        let mut log = DiagnosticLog::new();
        let result = compile("void main(){}", &options, &mut log);
        assert!(matches!(result, Err(ShaderError::InvalidOptions(_))));
    }

    #[test]
    fn test_options_from_json() {
        let options: CompileOptions =
            serde_json::from_str(r#"{"stage":"Fragment","optimize":false}"#).unwrap();
        assert_eq!(options.stage, Stage::Fragment);
        assert!(!options.optimize);
        assert_eq!(options.target, TargetProfile::default());
    }

    #[test]
    fn test_guard_keeps_process_initialized() {
        let _guard = ProcessGuard::new();
        assert!(active_sessions() >= 1);
        assert!(!builtins::function_index().is_empty());
    }

    #[test]
    fn test_compile_shader_writes_artifact() {
        let options = CompileOptions::new(Stage::Vertex, "pos.vert");
        let mut out = Vec::new();
        let mut log = DiagnosticLog::new();
        compile_shader(
            "#version 300 es\nuniform mat4 u_mvp; in vec4 a_pos; void main(){ gl_Position = u_mvp * a_pos; }",
            &options,
            &mut out,
            &mut log,
        )
        .unwrap();
        let artifact = CompiledArtifact::read_from(&out).unwrap();
        assert_eq!(artifact.uniforms.get("u_mvp").unwrap().ty, UniformType::Mat4);
    }
}
