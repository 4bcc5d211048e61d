//! Проходы оптимизатора: чистые преобразования списка инструкций.
//!
//! Легализация выполняется всегда, остальные проходы: только в
//! оптимизированной сборке. Декорации ни один проход не меняет.

use std::collections::{HashMap, HashSet};

use crate::bytecode::{Instruction, Opcode, StorageClass};
use crate::ops::{BinaryOp, UnaryOp};
use crate::sema::consteval;
use crate::types::{ConstValue, ScalarKind};

pub type PassResult = Result<(), String>;

/// Именованный проход.
#[derive(Clone, Copy)]
pub struct Pass {
    pub name: &'static str,
    pub run: fn(&mut Vec<Instruction>) -> PassResult,
}

/// Обязательные проходы.
pub const LEGALIZATION: &[Pass] = &[
    Pass {
        name: "eliminate-dead-functions",
        run: eliminate_dead_functions,
    },
    Pass {
        name: "remove-unreachable-code",
        run: remove_unreachable_code,
    },
];

/// Проходы оптимизированной сборки.
pub const PERFORMANCE: &[Pass] = &[
    Pass {
        name: "fold-constants",
        run: fold_constants,
    },
    Pass {
        name: "eliminate-dead-code",
        run: eliminate_dead_code,
    },
    Pass {
        name: "strip-local-names",
        run: strip_local_names,
    },
    Pass {
        name: "compact-ids",
        run: compact_ids,
    },
];

// === Общие помощники ===

/// Диапазон функции `[start, end]` (включительно) и её идентификатор.
fn function_ranges(code: &[Instruction]) -> Result<Vec<(usize, usize, u32)>, String> {
    let mut ranges = Vec::new();
    let mut open: Option<(usize, u32)> = None;
    for (index, inst) in code.iter().enumerate() {
        match inst.opcode {
            Opcode::Function => {
                let id = inst.result().ok_or("function without a result id")?;
                if open.replace((index, id)).is_some() {
                    return Err(format!("nested function at instruction {}", index));
                }
            }
            Opcode::FunctionEnd => {
                let (start, id) = open
                    .take()
                    .ok_or_else(|| format!("stray FunctionEnd at instruction {}", index))?;
                ranges.push((start, index, id));
            }
            _ => {}
        }
    }
    if open.is_some() {
        return Err("unterminated function".to_string());
    }
    Ok(ranges)
}

/// Удалить `Name`/`Decorate`, чьи цели больше не определены.
fn prune_annotations(code: &mut Vec<Instruction>) {
    let defined: HashSet<u32> = code.iter().filter_map(Instruction::result).collect();
    code.retain(|inst| match inst.opcode {
        Opcode::Name | Opcode::Decorate => inst
            .operands
            .first()
            .map_or(false, |target| defined.contains(target)),
        _ => true,
    });
}

fn max_id(code: &[Instruction]) -> u32 {
    code.iter().filter_map(Instruction::result).max().unwrap_or(0)
}

// === Легализация ===

/// Удалить функции, недостижимые из точки входа.
pub fn eliminate_dead_functions(code: &mut Vec<Instruction>) -> PassResult {
    let entry = code
        .iter()
        .find(|i| i.opcode == Opcode::EntryPoint)
        .and_then(|i| i.operands.first().copied())
        .ok_or("module has no entry point")?;
    let ranges = function_ranges(code)?;

    let mut calls: HashMap<u32, Vec<u32>> = HashMap::new();
    for (start, end, id) in &ranges {
        let callees = code[*start..=*end]
            .iter()
            .filter(|i| i.opcode == Opcode::FunctionCall)
            .filter_map(|i| i.operands.get(2).copied())
            .collect();
        calls.insert(*id, callees);
    }

    let mut live = HashSet::from([entry]);
    let mut work = vec![entry];
    while let Some(id) = work.pop() {
        for callee in calls.get(&id).into_iter().flatten() {
            if live.insert(*callee) {
                work.push(*callee);
            }
        }
    }

    let mut removed = 0;
    for (start, end, id) in ranges.into_iter().rev() {
        if !live.contains(&id) {
            code.drain(start..=end);
            removed += 1;
        }
    }
    if removed > 0 {
        prune_annotations(code);
        log::trace!("removed {} unreachable functions", removed);
    }
    Ok(())
}

/// Удалить инструкции после терминатора до конца структурного блока.
pub fn remove_unreachable_code(code: &mut Vec<Instruction>) -> PassResult {
    let before = code.len();
    let mut out = Vec::with_capacity(before);
    let mut skipping = false;
    let mut depth = 0usize;

    for inst in code.drain(..) {
        if skipping {
            match inst.opcode {
                Opcode::If | Opcode::Loop => depth += 1,
                Opcode::EndIf | Opcode::EndLoop if depth > 0 => depth -= 1,
                Opcode::Else
                | Opcode::EndIf
                | Opcode::LoopCondition
                | Opcode::LoopContinue
                | Opcode::EndLoop
                | Opcode::FunctionEnd
                    if depth == 0 =>
                {
                    skipping = false;
                    out.push(inst);
                }
                _ => {}
            }
            continue;
        }
        let terminator = inst.opcode.is_terminator();
        out.push(inst);
        if terminator {
            skipping = true;
            depth = 0;
        }
    }

    *code = out;
    if code.len() != before {
        prune_annotations(code);
        log::trace!("removed {} unreachable instructions", before - code.len());
    }
    Ok(())
}

// === Производительность ===

/// Свернуть скалярные операции над константами.
pub fn fold_constants(code: &mut Vec<Instruction>) -> PassResult {
    let mut scalar_types: HashMap<u32, ScalarKind> = HashMap::new();
    let mut constants: HashMap<u32, ConstValue> = HashMap::new();
    let mut interned: HashMap<(u32, u32), u32> = HashMap::new();
    let mut replaced: HashMap<u32, u32> = HashMap::new();
    let mut added = Vec::new();
    let mut next_id = max_id(code) + 1;
    let mut out = Vec::with_capacity(code.len());

    for mut inst in code.drain(..) {
        if !replaced.is_empty() {
            let result = inst.result();
            inst.remap_ids(&mut |id| {
                if Some(id) == result {
                    id
                } else {
                    replaced.get(&id).copied().unwrap_or(id)
                }
            });
        }

        match inst.opcode {
            Opcode::TypeBool => {
                scalar_types.insert(inst.operands[0], ScalarKind::Bool);
            }
            Opcode::TypeFloat => {
                scalar_types.insert(inst.operands[0], ScalarKind::Float);
            }
            Opcode::TypeInt => {
                let kind = if inst.operands[1] != 0 {
                    ScalarKind::Int
                } else {
                    ScalarKind::Uint
                };
                scalar_types.insert(inst.operands[0], kind);
            }
            Opcode::Constant => {
                let (ty, id, bits) = (inst.operands[0], inst.operands[1], inst.operands[2]);
                if let Some(kind) = scalar_types.get(&ty) {
                    constants.insert(id, ConstValue::from_bits(*kind, bits));
                    interned.entry((ty, bits)).or_insert(id);
                }
            }
            _ => {}
        }

        let folded = match inst.opcode {
            Opcode::Binary => BinaryOp::from_code(inst.operands[2]).and_then(|op| {
                let lhs = constants.get(&inst.operands[3])?;
                let rhs = constants.get(&inst.operands[4])?;
                consteval::binary(op, *lhs, *rhs)
            }),
            Opcode::Unary => UnaryOp::from_code(inst.operands[2])
                .and_then(|op| consteval::unary(op, *constants.get(&inst.operands[3])?)),
            Opcode::Construct if inst.operands.len() == 3 => {
                let kind = scalar_types.get(&inst.operands[0]);
                let value = constants.get(&inst.operands[2]);
                kind.zip(value).map(|(kind, value)| value.cast(*kind))
            }
            Opcode::Select => match constants.get(&inst.operands[2]) {
                Some(ConstValue::Bool(cond)) => {
                    let chosen = if *cond {
                        inst.operands[3]
                    } else {
                        inst.operands[4]
                    };
                    replaced.insert(inst.operands[1], chosen);
                    continue;
                }
                _ => None,
            },
            _ => None,
        };

        let Some(value) = folded else {
            out.push(inst);
            continue;
        };
        let ty = inst.operands[0];
        if scalar_types.get(&ty) != Some(&value.kind()) {
            out.push(inst);
            continue;
        }
        let id = *interned.entry((ty, value.to_bits())).or_insert_with(|| {
            let id = next_id;
            next_id += 1;
            added.push(Instruction::new(Opcode::Constant, vec![ty, id, value.to_bits()]));
            id
        });
        constants.insert(id, value);
        replaced.insert(inst.operands[1], id);
    }

    if !added.is_empty() {
        let at = out
            .iter()
            .position(|i| i.opcode == Opcode::Function)
            .unwrap_or(out.len());
        let count = added.len();
        out.splice(at..at, added);
        log::trace!("folded {} values into {} new constants", replaced.len(), count);
    }
    *code = out;
    Ok(())
}

/// Удалить неиспользуемые чистые вычисления и локальные переменные,
/// в которые только пишут.
pub fn eliminate_dead_code(code: &mut Vec<Instruction>) -> PassResult {
    let mut total = 0;
    loop {
        let mut uses: HashMap<u32, usize> = HashMap::new();
        let mut store_targets: HashMap<u32, usize> = HashMap::new();
        for inst in code.iter().filter(|i| i.opcode != Opcode::Name) {
            for id in inst.references() {
                *uses.entry(id).or_insert(0) += 1;
            }
            if inst.opcode == Opcode::Store {
                *store_targets.entry(inst.operands[0]).or_insert(0) += 1;
            }
        }

        let is_local = |inst: &Instruction| {
            inst.opcode == Opcode::Variable
                && inst.operands.get(2).copied() == Some(StorageClass::Function as u32)
        };
        let dead_locals: HashSet<u32> = code
            .iter()
            .filter(|i| is_local(i))
            .filter_map(Instruction::result)
            .filter(|id| {
                uses.get(id).copied().unwrap_or(0) == store_targets.get(id).copied().unwrap_or(0)
            })
            .collect();

        let before = code.len();
        code.retain(|inst| {
            if inst.opcode == Opcode::Store {
                return !dead_locals.contains(&inst.operands[0]);
            }
            let Some(id) = inst.result() else {
                return true;
            };
            if is_local(inst) {
                return !dead_locals.contains(&id);
            }
            !(inst.opcode.is_pure() && uses.get(&id).copied().unwrap_or(0) == 0)
        });
        let removed = before - code.len();
        if removed == 0 {
            break;
        }
        total += removed;
    }
    if total > 0 {
        prune_annotations(code);
        log::trace!("removed {} dead instructions", total);
    }
    Ok(())
}

/// Убрать отладочные имена локальных переменных и параметров.
pub fn strip_local_names(code: &mut Vec<Instruction>) -> PassResult {
    let mut locals = HashSet::new();
    for (start, end, _) in function_ranges(code)? {
        locals.extend(
            code[start..=end]
                .iter()
                .filter(|i| matches!(i.opcode, Opcode::Variable | Opcode::FunctionParameter))
                .filter_map(Instruction::result),
        );
    }
    code.retain(|inst| {
        !(inst.opcode == Opcode::Name
            && inst
                .operands
                .first()
                .map_or(false, |target| locals.contains(target)))
    });
    Ok(())
}

/// Перенумеровать идентификаторы подряд в порядке определения.
pub fn compact_ids(code: &mut Vec<Instruction>) -> PassResult {
    let mut map = HashMap::new();
    for inst in code.iter() {
        if let Some(id) = inst.result() {
            let next = map.len() as u32 + 1;
            if map.insert(id, next).is_some() {
                return Err(format!("%{} is defined more than once", id));
            }
        }
    }
    for inst in code.iter_mut() {
        inst.remap_ids(&mut |id| map.get(&id).copied().unwrap_or(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(opcode: Opcode, operands: &[u32]) -> Instruction {
        Instruction::new(opcode, operands.to_vec())
    }

    /// `main` и неиспользуемая `helper`; в `main`: `x = 2 + 3`.
    fn sample() -> Vec<Instruction> {
        vec![
            inst(Opcode::EntryPoint, &[4]),
            Instruction::name(4, "main"),
            Instruction::name(5, "helper"),
            Instruction::name(8, "x"),
            inst(Opcode::TypeVoid, &[1]),
            inst(Opcode::TypeFunction, &[2, 1]),
            inst(Opcode::TypeInt, &[3, 1]),
            inst(Opcode::Constant, &[3, 6, 2]),
            inst(Opcode::Constant, &[3, 7, 3]),
            inst(Opcode::TypePointer, &[9, 4, 3]),
            inst(Opcode::Function, &[1, 5, 2]),
            inst(Opcode::Return, &[]),
            inst(Opcode::FunctionEnd, &[]),
            inst(Opcode::Function, &[1, 4, 2]),
            inst(Opcode::Variable, &[9, 8, 4]),
            inst(Opcode::Binary, &[3, 10, BinaryOp::Add.code(), 6, 7]),
            inst(Opcode::Store, &[8, 10]),
            inst(Opcode::Return, &[]),
            inst(Opcode::Kill, &[]),
            inst(Opcode::FunctionEnd, &[]),
        ]
    }

    fn count(code: &[Instruction], opcode: Opcode) -> usize {
        code.iter().filter(|i| i.opcode == opcode).count()
    }

    #[test]
    fn test_eliminate_dead_functions() {
        let mut code = sample();
        eliminate_dead_functions(&mut code).unwrap();
        assert_eq!(count(&code, Opcode::Function), 1);
        assert!(code.iter().all(|i| i.string().as_deref() != Some("helper")));
    }

    #[test]
    fn test_remove_unreachable_code() {
        let mut code = sample();
        remove_unreachable_code(&mut code).unwrap();
        assert_eq!(count(&code, Opcode::Kill), 0);
        assert_eq!(code.last().map(|i| i.opcode), Some(Opcode::FunctionEnd));
    }

    #[test]
    fn test_unreachable_nested_block_is_skipped() {
        let mut code = vec![
            inst(Opcode::Loop, &[0]),
            inst(Opcode::Break, &[]),
            inst(Opcode::If, &[1]),
            inst(Opcode::Continue, &[]),
            inst(Opcode::EndIf, &[]),
            inst(Opcode::LoopContinue, &[]),
            inst(Opcode::EndLoop, &[]),
        ];
        remove_unreachable_code(&mut code).unwrap();
        let ops: Vec<Opcode> = code.iter().map(|i| i.opcode).collect();
        assert_eq!(
            ops,
            [Opcode::Loop, Opcode::Break, Opcode::LoopContinue, Opcode::EndLoop]
        );
    }

    #[test]
    fn test_fold_constants() {
        let mut code = sample();
        fold_constants(&mut code).unwrap();
        assert_eq!(count(&code, Opcode::Binary), 0);
        let five = code
            .iter()
            .find(|i| i.opcode == Opcode::Constant && i.operands[2] == 5)
            .and_then(Instruction::result)
            .unwrap();
        let store = code.iter().find(|i| i.opcode == Opcode::Store).unwrap();
        assert_eq!(store.operands, [8, five]);
        let first_function = code.iter().position(|i| i.opcode == Opcode::Function).unwrap();
        let constant = code
            .iter()
            .position(|i| i.result() == Some(five))
            .unwrap();
        assert!(constant < first_function);
    }

    #[test]
    fn test_eliminate_dead_code_removes_write_only_local() {
        let mut code = sample();
        eliminate_dead_code(&mut code).unwrap();
        assert_eq!(count(&code, Opcode::Store), 0);
        assert_eq!(count(&code, Opcode::Binary), 0);
        assert_eq!(count(&code, Opcode::Variable), 0);
        assert!(code.iter().all(|i| i.string().as_deref() != Some("x")));
    }

    #[test]
    fn test_strip_local_names_keeps_functions() {
        let mut code = sample();
        strip_local_names(&mut code).unwrap();
        assert!(code.iter().all(|i| i.string().as_deref() != Some("x")));
        assert!(code.iter().any(|i| i.string().as_deref() == Some("main")));
    }

    #[test]
    fn test_compact_ids() {
        let mut code = sample();
        eliminate_dead_functions(&mut code).unwrap();
        compact_ids(&mut code).unwrap();
        assert_eq!(max_id(&code), 9);
        let entry = code[0].operands[0];
        let main = code
            .iter()
            .find(|i| i.opcode == Opcode::Function)
            .and_then(Instruction::result);
        assert_eq!(Some(entry), main);
    }
}
