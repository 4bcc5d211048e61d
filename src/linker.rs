//! Компоновка единиц трансляции одной стадии.
//!
//! Два шага, оба обязательны:
//! 1. слияние глобальных переменных и функций, проверка точки входа,
//!    неразрешённых вызовов и рекурсии (`ShaderError::Link`);
//! 2. назначение location интерфейсным переменным (`ShaderError::Map`).

use std::collections::HashSet;

use crate::diagnostic::{Diagnostic, DiagnosticLog, DiagnosticSink};
use crate::error::{ShaderError, ShaderResult};
use crate::ir::{Program, Storage};
use crate::sema::ParsedProgram;

/// Программа стадии после компоновки и назначения location.
#[derive(Debug, Clone)]
pub struct LinkedProgram {
    pub program: Program,
    pub log: DiagnosticLog,
}

/// Скомпоновать одну или несколько единиц трансляции.
pub fn link(units: Vec<ParsedProgram>, sink: &mut dyn DiagnosticSink) -> ShaderResult<LinkedProgram> {
    let mut log = DiagnosticLog::new();
    for unit in &units {
        for entry in unit.log.entries() {
            log.report(entry.clone());
        }
    }

    let programs: Vec<Program> = units.into_iter().map(|u| u.program).collect();
    let mut program = match merge(programs) {
        Ok(program) => program,
        Err((file, line, message)) => {
            let diagnostic = Diagnostic::error(file, line, message.clone());
            sink.report(diagnostic);
            return Err(ShaderError::Link(message));
        }
    };

    if let Err(message) = map_io(&mut program) {
        sink.report(Diagnostic::error(program.file.clone(), 0, message.clone()));
        return Err(ShaderError::Map(message));
    }

    log::debug!(
        "linked {} ({}): {} globals, {} functions",
        program.file,
        program.stage,
        program.globals.len(),
        program.functions.len()
    );
    Ok(LinkedProgram { program, log })
}

/// Ошибка компоновки: файл, строка, сообщение.
type LinkFailure = (String, u32, String);

fn merge(programs: Vec<Program>) -> Result<Program, LinkFailure> {
    let mut iter = programs.into_iter();
    let Some(mut merged) = iter.next() else {
        return Err((String::new(), 0, "no translation units to link".to_string()));
    };

    for unit in iter {
        if unit.stage != merged.stage {
            return Err((
                unit.file.clone(),
                0,
                format!(
                    "stage mismatch: expected {}, found {}",
                    merged.stage, unit.stage
                ),
            ));
        }
        if unit.es != merged.es {
            return Err((
                unit.file.clone(),
                0,
                "cannot mix ES and desktop profiles".to_string(),
            ));
        }
        merged.version = merged.version.max(unit.version);

        match (merged.local_size, unit.local_size) {
            (Some(a), Some(b)) if a != b => {
                return Err((
                    unit.file.clone(),
                    0,
                    format!(
                        "local_size mismatch: {}x{}x{} vs {}x{}x{}",
                        a[0], a[1], a[2], b[0], b[1], b[2]
                    ),
                ))
            }
            (None, Some(b)) => merged.local_size = Some(b),
            _ => {}
        }

        for global in unit.globals {
            let Some(existing) = merged.global_mut(&global.name) else {
                merged.globals.push(global);
                continue;
            };
            if existing.ty != global.ty || existing.storage != global.storage {
                return Err((
                    unit.file.clone(),
                    global.line,
                    format!(
                        "'{}' : type or storage mismatch between units ('{}' vs '{}')",
                        global.name, existing.ty, global.ty
                    ),
                ));
            }
            for (mine, theirs, what) in [
                (&mut existing.location, global.location, "location"),
                (&mut existing.binding, global.binding, "binding"),
            ] {
                match (*mine, theirs) {
                    (Some(a), Some(b)) if a != b => {
                        return Err((
                            unit.file.clone(),
                            global.line,
                            format!("'{}' : {} mismatch between units ({} vs {})", global.name, what, a, b),
                        ))
                    }
                    (None, Some(b)) => *mine = Some(b),
                    _ => {}
                }
            }
            if let Some(init) = global.init {
                if existing.init.is_some() {
                    return Err((
                        unit.file.clone(),
                        global.line,
                        format!("'{}' : multiple initializers", global.name),
                    ));
                }
                existing.init = Some(init);
            }
        }

        for function in unit.functions {
            let Some(existing) = merged
                .functions
                .iter_mut()
                .find(|f| f.mangled == function.mangled)
            else {
                merged.functions.push(function);
                continue;
            };
            if existing.return_type != function.return_type {
                return Err((
                    unit.file.clone(),
                    function.line,
                    format!(
                        "'{}' : overloaded functions must have the same return type",
                        function.name
                    ),
                ));
            }
            if function.body.is_some() {
                if existing.body.is_some() {
                    return Err((
                        unit.file.clone(),
                        function.line,
                        format!("'{}' : function already has a body", function.mangled),
                    ));
                }
                *existing = function;
            }
        }
    }

    check_entry_point(&merged)?;
    check_call_graph(&merged)?;
    Ok(merged)
}

fn check_entry_point(program: &Program) -> Result<(), LinkFailure> {
    let bodies = program
        .functions
        .iter()
        .filter(|f| f.is_entry_point() && f.body.is_some())
        .count();
    match bodies {
        1 => Ok(()),
        0 => Err((
            program.file.clone(),
            0,
            "Missing entry point: Each stage requires one entry point".to_string(),
        )),
        _ => Err((
            program.file.clone(),
            0,
            "'main' : function already has a body".to_string(),
        )),
    }
}

/// Проверить граф вызовов: у каждой вызываемой функции есть тело,
/// рекурсии нет. Обход начинается с `main`, затем с остальных функций.
fn check_call_graph(program: &Program) -> Result<(), LinkFailure> {
    let mut finished: HashSet<String> = HashSet::new();
    let roots = program
        .entry_point()
        .into_iter()
        .chain(program.functions.iter().filter(|f| f.body.is_some()));

    for root in roots {
        if finished.contains(&root.mangled) {
            continue;
        }
        // Стек обхода: (функция, её вызовы, индекс следующего вызова).
        let mut path: Vec<(String, Vec<String>, usize)> =
            vec![(root.mangled.clone(), Program::callees(root), 0)];

        while let Some((current, callees, next)) = path.last_mut() {
            let Some(callee) = callees.get(*next).cloned() else {
                finished.insert(current.clone());
                path.pop();
                continue;
            };
            *next += 1;
            let caller = current.clone();

            if path.iter().any(|(name, ..)| *name == callee) {
                return Err((
                    program.file.clone(),
                    0,
                    format!("Recursion detected: {} calling {}", caller, callee),
                ));
            }
            if finished.contains(&callee) {
                continue;
            }
            let target = program.function(&callee).filter(|f| f.body.is_some());
            let Some(target) = target else {
                let line = program.function(&caller).map_or(0, |f| f.line);
                return Err((
                    program.file.clone(),
                    line,
                    format!("No function definition (body) found: {}", callee),
                ));
            };
            path.push((callee, Program::callees(target), 0));
        }
    }
    Ok(())
}

// === Назначение location ===

/// Занятый диапазон location `[start, end)`.
#[derive(Debug, Clone)]
struct Range {
    start: u32,
    end: u32,
    name: String,
}

impl Range {
    fn overlaps(&self, start: u32, end: u32) -> bool {
        start < self.end && self.start < end
    }
}

/// Назначить location входам и выходам стадии.
///
/// Явные location сохраняются; остальные переменные получают наименьший
/// свободный диапазон в порядке объявления. Каждая переменная занимает
/// `slots(type) * count` location. Встроенные переменные пропускаются.
pub fn map_io(program: &mut Program) -> Result<(), String> {
    for storage in [Storage::Input, Storage::Output] {
        let mut used: Vec<Range> = Vec::new();

        for g in program
            .globals
            .iter()
            .filter(|g| g.storage == storage && g.builtin.is_none())
        {
            let Some(start) = g.location else { continue };
            let end = start
                .checked_add(g.ty.location_slots())
                .ok_or_else(|| format!("'{}' : location {} is out of range", g.name, start))?;
            if let Some(other) = used.iter().find(|r| r.overlaps(start, end)) {
                return Err(format!(
                    "'{}' : location {} overlaps with '{}'",
                    g.name, start, other.name
                ));
            }
            used.push(Range {
                start,
                end,
                name: g.name.clone(),
            });
        }

        for g in program
            .globals
            .iter_mut()
            .filter(|g| g.storage == storage && g.builtin.is_none() && g.location.is_none())
        {
            let slots = g.ty.location_slots();
            let mut start = 0u32;
            loop {
                let end = start
                    .checked_add(slots)
                    .ok_or_else(|| format!("'{}' : no free location range", g.name))?;
                match used.iter().find(|r| r.overlaps(start, end)) {
                    Some(blocking) => start = blocking.end,
                    None => {
                        g.location = Some(start);
                        used.push(Range {
                            start,
                            end,
                            name: g.name.clone(),
                        });
                        break;
                    }
                }
            }
        }
    }

    let mut bindings: Vec<(u32, &str)> = Vec::new();
    for g in program.uniforms() {
        let Some(binding) = g.binding else { continue };
        if let Some((_, other)) = bindings.iter().find(|(b, _)| *b == binding) {
            return Err(format!(
                "'{}' : binding {} is already used by '{}'",
                g.name, binding, other
            ));
        }
        bindings.push((binding, g.name.as_str()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::includer::MemoryIncluder;
    use crate::parser::SourceUnit;
    use crate::sema::parse_program;
    use crate::stage::Stage;

    fn parsed(stage: Stage, file: &str, src: &str) -> ParsedProgram {
        let unit = SourceUnit::new(stage, file, src);
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        parse_program(&unit, &mut includer, &mut log).unwrap()
    }

    fn link_sources(stage: Stage, sources: &[&str]) -> ShaderResult<LinkedProgram> {
        let units = sources
            .iter()
            .enumerate()
            .map(|(i, src)| parsed(stage, &format!("unit{}.glsl", i), src))
            .collect();
        let mut log = DiagnosticLog::new();
        link(units, &mut log)
    }

    #[test]
    fn test_prototype_resolves_across_units() {
        let linked = link_sources(
            Stage::Fragment,
            &[
                "float helper(float x);\nvoid main(){ float y = helper(1.0); }",
                "float helper(float x){ return x * 2.0; }",
            ],
        )
        .unwrap();
        let helper = linked.program.function("helper(float)").unwrap();
        assert!(helper.body.is_some());
    }

    #[test]
    fn test_unresolved_call() {
        let err = link_sources(
            Stage::Fragment,
            &["float helper(float x);\nvoid main(){ float y = helper(1.0); }"],
        )
        .unwrap_err();
        assert!(matches!(err, ShaderError::Link(ref m) if m.contains("helper(float)")), "{}", err);
    }

    #[test]
    fn test_missing_main() {
        let err = link_sources(Stage::Fragment, &["uniform vec4 u;"]).unwrap_err();
        assert!(matches!(err, ShaderError::Link(ref m) if m.contains("Missing entry point")));
    }

    #[test]
    fn test_duplicate_body() {
        let err = link_sources(
            Stage::Fragment,
            &["void f(){}\nvoid main(){ f(); }", "void f(){}"],
        )
        .unwrap_err();
        assert!(matches!(err, ShaderError::Link(ref m) if m.contains("already has a body")));
    }

    #[test]
    fn test_uniform_type_mismatch() {
        let err = link_sources(
            Stage::Fragment,
            &["uniform vec4 u;\nvoid main(){}", "uniform mat4 u;"],
        )
        .unwrap_err();
        assert!(matches!(err, ShaderError::Link(ref m) if m.contains("mismatch")));
    }

    #[test]
    fn test_recursion_is_rejected() {
        let err = link_sources(
            Stage::Fragment,
            &["float f(float x);\nfloat g(float x){ return f(x); }\nfloat f(float x){ return g(x); }\nvoid main(){ float y = f(1.0); }"],
        )
        .unwrap_err();
        assert!(matches!(err, ShaderError::Link(ref m) if m.starts_with("Recursion detected")), "{}", err);
    }

    #[test]
    fn test_stage_mismatch() {
        let units = vec![
            parsed(Stage::Vertex, "a.vert", "void main(){}"),
            parsed(Stage::Fragment, "b.frag", "uniform vec4 u;"),
        ];
        let mut log = DiagnosticLog::new();
        let err = link(units, &mut log).unwrap_err();
        assert!(matches!(err, ShaderError::Link(_)));
        assert!(log.has_errors());
    }

    #[test]
    fn test_auto_locations_fill_gaps() {
        let linked = link_sources(
            Stage::Vertex,
            &["#version 330\nin vec4 a;\nlayout(location = 1) in vec4 b;\nin mat3 c;\nin vec2 d;\nvoid main(){ gl_Position = a + b + vec4(c[0], d.x); }"],
        )
        .unwrap();
        let loc = |name: &str| linked.program.global(name).unwrap().location;
        assert_eq!(loc("a"), Some(0));
        assert_eq!(loc("b"), Some(1));
        assert_eq!(loc("c"), Some(2));
        assert_eq!(loc("d"), Some(5));
        assert_eq!(loc("gl_Position"), None);
    }

    #[test]
    fn test_overlapping_locations_fail_mapping() {
        let err = link_sources(
            Stage::Fragment,
            &["#version 330\nlayout(location = 0) out vec4 a;\nlayout(location = 0) out vec4 b;\nvoid main(){ a = vec4(0.0); b = a; }"],
        )
        .unwrap_err();
        assert!(matches!(err, ShaderError::Map(ref m) if m.contains("overlaps")), "{}", err);
    }

    #[test]
    fn test_duplicate_binding_fails_mapping() {
        let err = link_sources(
            Stage::Fragment,
            &["#version 430\nlayout(binding = 0) uniform sampler2D a;\nlayout(binding = 0) uniform sampler2D b;\nvoid main(){}"],
        )
        .unwrap_err();
        assert!(matches!(err, ShaderError::Map(_)));
    }
}
