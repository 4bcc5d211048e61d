//! Оптимизатор байткода: упорядоченный список именованных проходов и
//! общая проверка после них.
//!
//! ```text
//! Module -> decode -> [легализация] -> [производительность]? -> assemble -> validate
//! ```
//!
//! Сообщения движка проходов и находки валидатора идут в канал
//! диагностики. Компиляция прерывается только если проход вернул ошибку
//! или изменился список декораций.

pub mod passes;
pub mod validate;

use crate::bytecode::{Header, Instruction, Module, Opcode};
use crate::diagnostic::{Diagnostic, DiagnosticSink, Severity};
use crate::error::{ShaderError, ShaderResult};

pub use passes::{Pass, LEGALIZATION, PERFORMANCE};

/// Декорация, привязанная к имени цели (идентификаторы могут меняться).
type DecorationRecord = (Option<String>, u32, u32);

/// Прогнать проходы над модулем.
///
/// `source`: имя модуля в диагностике.
pub fn optimize(
    module: Module,
    optimize: bool,
    source: &str,
    sink: &mut dyn DiagnosticSink,
) -> ShaderResult<Module> {
    let fatal = |sink: &mut dyn DiagnosticSink, severity: Severity, message: String| {
        sink.report(Diagnostic::new(severity, source, 0, message.clone()));
        ShaderError::OptimizationFatal(message)
    };

    let (header, mut code) = match module.header().and_then(|h| Ok((h, module.instructions()?))) {
        Ok(decoded) => decoded,
        Err(e) => return Err(fatal(sink, Severity::Fatal, format!("cannot decode module: {}", e))),
    };
    let decorations = decoration_list(&code);

    let schedule: Vec<&Pass> = LEGALIZATION
        .iter()
        .chain(PERFORMANCE.iter().filter(|_| optimize))
        .collect();
    for pass in schedule {
        log::debug!("running pass {} on {}", pass.name, source);
        sink.report(Diagnostic::new(
            Severity::Debug,
            source,
            0,
            format!("running pass {}", pass.name),
        ));
        if let Err(message) = (pass.run)(&mut code) {
            return Err(fatal(
                sink,
                Severity::Fatal,
                format!("{}: {}", pass.name, message),
            ));
        }
    }

    if decoration_list(&code) != decorations {
        return Err(fatal(
            sink,
            Severity::InternalError,
            "binding and location decorations changed during optimization".to_string(),
        ));
    }

    let bound = code.iter().filter_map(Instruction::result).max().unwrap_or(0) + 1;
    let header = Header { bound, ..header };
    let module = Module::assemble(&header, &code)
        .map_err(|e| fatal(sink, Severity::Fatal, format!("cannot assemble module: {}", e)))?;

    let findings = validate::validate(&module);
    for finding in &findings {
        sink.report(Diagnostic::new(
            Severity::Error,
            source,
            finding.index as u32,
            finding.message.clone(),
        ));
    }
    log::debug!(
        "optimized {} (optimize = {}): {} words, {} validator findings",
        source,
        optimize,
        module.len(),
        findings.len()
    );
    Ok(module)
}

/// Упорядоченный список декораций с именами целей вместо идентификаторов.
fn decoration_list(code: &[Instruction]) -> Vec<DecorationRecord> {
    let name_of = |target: u32| {
        code.iter()
            .filter(|i| i.opcode == Opcode::Name && i.operands.first() == Some(&target))
            .find_map(Instruction::string)
    };
    code.iter()
        .filter(|i| i.opcode == Opcode::Decorate)
        .map(|i| (name_of(i.operands[0]), i.operands[1], i.operands[2]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Decoration, Header};
    use crate::diagnostic::DiagnosticLog;
    use crate::includer::MemoryIncluder;
    use crate::linker::link;
    use crate::parser::SourceUnit;
    use crate::reflect::reflect;
    use crate::sema::parse_program;
    use crate::stage::Stage;

    const SOURCE: &str = "
        uniform vec4 u_tint;
        out vec4 o_color;
        float unused(float x) { return x * 2.0; }
        float scale() { return 2.0 * 3.0; }
        void main() {
            float k = scale();
            o_color = u_tint * k;
        }";

    fn lowered(src: &str) -> Module {
        let unit = SourceUnit::new(Stage::Fragment, "opt.frag", src);
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        let parsed = parse_program(&unit, &mut includer, &mut log).unwrap();
        let linked = link(vec![parsed], &mut log).unwrap();
        let (_, linked) = reflect(linked).unwrap();
        crate::lower::lower(&linked).unwrap()
    }

    fn count(module: &Module, opcode: Opcode) -> usize {
        module
            .instructions()
            .unwrap()
            .iter()
            .filter(|i| i.opcode == opcode)
            .count()
    }

    #[test]
    fn test_legalization_always_runs() {
        let mut log = DiagnosticLog::new();
        let module = optimize(lowered(SOURCE), false, "opt.frag", &mut log).unwrap();
        assert_eq!(count(&module, Opcode::Function), 2);
        assert!(!log.has_errors());
        let passes: Vec<&str> = log
            .entries()
            .iter()
            .filter(|d| d.severity == Severity::Debug)
            .map(|d| d.message.as_str())
            .collect();
        assert_eq!(
            passes,
            [
                "running pass eliminate-dead-functions",
                "running pass remove-unreachable-code"
            ]
        );
        // без оптимизации умножение констант остаётся
        assert_eq!(count(&module, Opcode::Binary), 2);
    }

    #[test]
    fn test_performance_passes_fold_and_compact() {
        let mut log = DiagnosticLog::new();
        let module = optimize(lowered(SOURCE), true, "opt.frag", &mut log).unwrap();
        assert!(!log.has_errors(), "{}", log.info_log());
        assert_eq!(count(&module, Opcode::Binary), 1);
        let code = module.instructions().unwrap();
        assert!(code
            .iter()
            .any(|i| i.opcode == Opcode::Constant && i.operands[2] == 6.0f32.to_bits()));
        let defined = code.iter().filter(|i| i.result().is_some()).count() as u32;
        assert_eq!(module.header().unwrap().bound, defined + 1);
        assert!(code.iter().all(|i| i.string().as_deref() != Some("k")));
    }

    #[test]
    fn test_decorations_are_preserved() {
        let module = lowered(SOURCE);
        let before = decoration_list(&module.instructions().unwrap());
        let mut log = DiagnosticLog::new();
        let optimized = optimize(module, true, "opt.frag", &mut log).unwrap();
        let after = decoration_list(&optimized.instructions().unwrap());
        assert_eq!(before, after);
        assert!(after.contains(&(
            Some("u_tint".to_string()),
            Decoration::Location as u32,
            0
        )));
    }

    #[test]
    fn test_undecodable_module_is_fatal() {
        let mut log = DiagnosticLog::new();
        let result = optimize(Module::empty(), true, "bad", &mut log);
        assert!(matches!(result, Err(ShaderError::OptimizationFatal(_))));
        assert_eq!(log.entries()[0].severity, Severity::Fatal);
    }

    #[test]
    fn test_validator_findings_do_not_fail_the_module() {
        let code = vec![
            Instruction::new(Opcode::EntryPoint, vec![3]),
            Instruction::new(Opcode::Decorate, vec![3, 0, 0]),
            Instruction::new(Opcode::TypeVoid, vec![1]),
            Instruction::new(Opcode::TypeFunction, vec![2, 1]),
            Instruction::new(Opcode::Function, vec![1, 3, 2]),
            Instruction::new(Opcode::Return, vec![]),
            Instruction::new(Opcode::FunctionEnd, vec![]),
        ];
        let module = Module::assemble(&Header::new(Stage::Fragment, 4), &code).unwrap();
        let mut log = DiagnosticLog::new();
        assert!(optimize(module, false, "odd.frag", &mut log).is_ok());
        let error = log.first_error().unwrap();
        assert_eq!(error.severity, Severity::Error);
        assert!(error.message.contains("not a variable"), "{}", error.message);
        assert!(log.entries().iter().all(|d| !d.severity.is_fatal_class()));
    }

    #[test]
    fn test_missing_entry_point_fails_pass() {
        let code = vec![Instruction::new(Opcode::TypeVoid, vec![1])];
        let module = Module::assemble(&Header::new(Stage::Vertex, 2), &code).unwrap();
        let mut log = DiagnosticLog::new();
        let err = optimize(module, false, "bad", &mut log).unwrap_err();
        assert!(err.to_string().contains("eliminate-dead-functions"));
    }
}
