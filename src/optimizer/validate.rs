//! Валидатор модуля байткода.
//!
//! Проверяет заголовок, определение идентификаторов до использования,
//! типы результатов, вложенность структурного управления, указатели в
//! `Load`/`Store` и цели декораций. Находки возвращаются списком; решение
//! о серьёзности принимает вызывающий.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::bytecode::{Decoration, Header, Instruction, Module, Opcode, StorageClass};

/// Одна находка валидатора.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Индекс инструкции (0: заголовок).
    pub index: usize,
    pub message: String,
}

impl Finding {
    fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instruction {}: {}", self.index, self.message)
    }
}

pub fn validate(module: &Module) -> Vec<Finding> {
    let header = match module.header() {
        Ok(header) => header,
        Err(e) => return vec![Finding::new(0, e.to_string())],
    };
    match module.instructions() {
        Ok(instructions) => validate_instructions(&header, &instructions),
        Err(e) => vec![Finding::new(0, e.to_string())],
    }
}

pub fn validate_instructions(header: &Header, instructions: &[Instruction]) -> Vec<Finding> {
    let mut validator = Validator {
        header,
        instructions,
        definitions: HashMap::new(),
        findings: Vec::new(),
    };
    validator.collect_definitions();
    validator.check_order();
    validator.findings
}

/// Открытая структурная конструкция.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Construct {
    If,
    Else,
    /// Цикл до `LoopContinue`.
    Loop,
    /// Блок продолжения цикла.
    Continuing,
}

struct Validator<'a> {
    header: &'a Header,
    instructions: &'a [Instruction],
    /// Идентификатор -> индекс определяющей инструкции.
    definitions: HashMap<u32, usize>,
    findings: Vec<Finding>,
}

impl<'a> Validator<'a> {
    fn report(&mut self, index: usize, message: impl Into<String>) {
        self.findings.push(Finding::new(index, message));
    }

    fn definition(&self, id: u32) -> Option<&'a Instruction> {
        let instructions = self.instructions;
        self.definitions.get(&id).map(|i| &instructions[*i])
    }

    fn collect_definitions(&mut self) {
        for (index, inst) in self.instructions.iter().enumerate() {
            let Some(id) = inst.result() else {
                continue;
            };
            if id == 0 || id >= self.header.bound {
                self.report(index, format!("%{} is outside the id bound {}", id, self.header.bound));
            }
            if self.definitions.insert(id, index).is_some() {
                self.report(index, format!("%{} is defined more than once", id));
            }
        }
    }

    fn is_type(&self, id: u32) -> bool {
        self.definition(id).map_or(false, |d| d.opcode.is_type())
    }

    fn is_pointer_type(&self, id: u32) -> bool {
        self.definition(id)
            .map_or(false, |d| d.opcode == Opcode::TypePointer)
    }

    /// Значение-указатель: переменная, параметр или цепочка доступа.
    fn is_pointer(&self, id: u32) -> bool {
        self.definition(id).map_or(false, |d| {
            matches!(
                d.opcode,
                Opcode::Variable | Opcode::FunctionParameter | Opcode::AccessChain
            )
        })
    }

    fn check_order(&mut self) {
        let instructions = self.instructions;
        let mut defined: HashSet<u32> = HashSet::new();
        let mut in_function = false;
        let mut stack: Vec<Construct> = Vec::new();
        let mut entry_points = 0;

        for (index, inst) in instructions.iter().enumerate() {
            match inst.opcode {
                Opcode::Name | Opcode::EntryPoint | Opcode::Decorate => {
                    self.check_annotation(index, inst);
                    if inst.opcode == Opcode::EntryPoint {
                        entry_points += 1;
                    }
                    continue;
                }
                _ => {}
            }

            for id in inst.references() {
                if !defined.contains(&id) {
                    self.report(
                        index,
                        format!("{} uses %{} before its definition", inst.opcode.name(), id),
                    );
                }
            }

            if let Some(ty) = inst.result_type() {
                if !self.is_type(ty) {
                    self.report(index, format!("result type %{} is not a type", ty));
                } else if matches!(
                    inst.opcode,
                    Opcode::Variable | Opcode::FunctionParameter | Opcode::AccessChain
                ) && !self.is_pointer_type(ty)
                {
                    self.report(
                        index,
                        format!("{} must have a pointer result type", inst.opcode.name()),
                    );
                }
            }

            self.check_operands(index, inst, in_function);
            self.check_structure(index, inst, &mut in_function, &mut stack);

            if let Some(id) = inst.result() {
                defined.insert(id);
            }
        }

        if in_function {
            self.report(instructions.len(), "function is not terminated by FunctionEnd");
        }
        if entry_points != 1 {
            self.report(0, format!("expected one entry point, found {}", entry_points));
        }
    }

    fn check_annotation(&mut self, index: usize, inst: &Instruction) {
        let target = inst.operands.first().copied().unwrap_or(0);
        let Some(definition) = self.definition(target) else {
            self.report(index, format!("{} targets undefined %{}", inst.opcode.name(), target));
            return;
        };
        match inst.opcode {
            Opcode::EntryPoint if definition.opcode != Opcode::Function => {
                self.report(index, "entry point is not a function");
            }
            Opcode::Decorate => {
                if definition.opcode != Opcode::Variable {
                    self.report(index, format!("decoration target %{} is not a variable", target));
                }
                let kind = inst.operands.get(1).copied().unwrap_or(u32::MAX);
                if Decoration::from_u32(kind).is_none() {
                    self.report(index, format!("unknown decoration {}", kind));
                }
            }
            Opcode::Name if inst.string().is_none() => {
                self.report(index, "malformed name string");
            }
            _ => {}
        }
    }

    fn check_operands(&mut self, index: usize, inst: &Instruction, in_function: bool) {
        match inst.opcode {
            Opcode::Variable => {
                let storage = inst.operands.get(2).copied().and_then(StorageClass::from_u32);
                match storage {
                    None => self.report(index, "invalid storage class"),
                    Some(StorageClass::Function) if !in_function => {
                        self.report(index, "function-local variable outside a function");
                    }
                    Some(StorageClass::Function) => {}
                    Some(_) if in_function => {
                        self.report(index, "global variable inside a function");
                    }
                    Some(_) => {}
                }
            }
            Opcode::Load => {
                if !self.is_pointer(inst.operands[2]) {
                    self.report(index, format!("Load from non-pointer %{}", inst.operands[2]));
                }
            }
            Opcode::Store => {
                if !self.is_pointer(inst.operands[0]) {
                    self.report(index, format!("Store to non-pointer %{}", inst.operands[0]));
                }
            }
            Opcode::AccessChain => {
                if !self.is_pointer(inst.operands[2]) {
                    self.report(index, "access chain base is not a pointer");
                }
            }
            Opcode::FunctionCall => {
                let callee = inst.operands[2];
                if self.definition(callee).map(|d| d.opcode) != Some(Opcode::Function) {
                    self.report(index, format!("call target %{} is not a function", callee));
                }
            }
            _ => {}
        }
    }

    fn check_structure(
        &mut self,
        index: usize,
        inst: &Instruction,
        in_function: &mut bool,
        stack: &mut Vec<Construct>,
    ) {
        let op = inst.opcode;
        let declaration = op.is_type() || matches!(op, Opcode::Constant | Opcode::ConstantComposite);
        if declaration && *in_function {
            self.report(index, format!("{} inside a function body", op.name()));
            return;
        }

        match op {
            Opcode::Function => {
                if *in_function {
                    self.report(index, "nested function definition");
                }
                *in_function = true;
                stack.clear();
                return;
            }
            Opcode::FunctionEnd => {
                if !*in_function {
                    self.report(index, "FunctionEnd outside a function");
                }
                if !stack.is_empty() {
                    self.report(index, "unterminated control construct at function end");
                }
                *in_function = false;
                stack.clear();
                return;
            }
            _ => {}
        }

        let body_only = !declaration
            && !matches!(op, Opcode::Variable | Opcode::Source | Opcode::LocalSize | Opcode::Nop);
        if body_only && !*in_function {
            self.report(index, format!("{} outside a function body", op.name()));
            return;
        }

        match op {
            Opcode::If => stack.push(Construct::If),
            Opcode::Else => match stack.last_mut() {
                Some(top @ Construct::If) => *top = Construct::Else,
                _ => self.report(index, "Else without a matching If"),
            },
            Opcode::EndIf => match stack.pop() {
                Some(Construct::If) | Some(Construct::Else) => {}
                _ => self.report(index, "EndIf without a matching If"),
            },
            Opcode::Loop => stack.push(Construct::Loop),
            Opcode::LoopCondition => match stack.last() {
                Some(Construct::Loop) | Some(Construct::Continuing) => {}
                _ => self.report(index, "LoopCondition outside a loop"),
            },
            Opcode::LoopContinue => match stack.last_mut() {
                Some(top @ Construct::Loop) => *top = Construct::Continuing,
                _ => self.report(index, "LoopContinue without a matching Loop"),
            },
            Opcode::EndLoop => match stack.pop() {
                Some(Construct::Continuing) => {}
                _ => self.report(index, "EndLoop without a continue block"),
            },
            Opcode::Break | Opcode::Continue => {
                let in_loop = stack
                    .iter()
                    .any(|c| matches!(c, Construct::Loop | Construct::Continuing));
                if !in_loop {
                    self.report(index, format!("{} outside a loop", op.name()));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;

    fn check(instructions: Vec<Instruction>, bound: u32) -> Vec<Finding> {
        validate_instructions(&Header::new(Stage::Fragment, bound), &instructions)
    }

    fn minimal() -> Vec<Instruction> {
        vec![
            Instruction::new(Opcode::EntryPoint, vec![3]),
            Instruction::new(Opcode::TypeVoid, vec![1]),
            Instruction::new(Opcode::TypeFunction, vec![2, 1]),
            Instruction::new(Opcode::Function, vec![1, 3, 2]),
            Instruction::new(Opcode::Return, vec![]),
            Instruction::new(Opcode::FunctionEnd, vec![]),
        ]
    }

    #[test]
    fn test_minimal_module_is_valid() {
        assert_eq!(check(minimal(), 4), []);
    }

    #[test]
    fn test_use_before_definition() {
        let mut code = minimal();
        code.insert(4, Instruction::new(Opcode::ReturnValue, vec![9]));
        let findings = check(code, 10);
        assert!(findings[0].message.contains("%9 before its definition"));
    }

    #[test]
    fn test_unbalanced_structure() {
        let mut code = minimal();
        code.insert(1, Instruction::new(Opcode::TypeBool, vec![4]));
        code.insert(2, Instruction::new(Opcode::Constant, vec![4, 5, 1]));
        code.insert(6, Instruction::new(Opcode::If, vec![5]));
        let findings = check(code, 6);
        assert!(findings
            .iter()
            .any(|f| f.message.contains("unterminated control construct")));
    }

    #[test]
    fn test_store_needs_pointer() {
        let mut code = minimal();
        code.insert(1, Instruction::new(Opcode::TypeBool, vec![4]));
        code.insert(2, Instruction::new(Opcode::Constant, vec![4, 5, 1]));
        code.insert(6, Instruction::new(Opcode::Store, vec![5, 5]));
        let findings = check(code, 6);
        assert!(findings.iter().any(|f| f.message.contains("Store to non-pointer")));
    }

    #[test]
    fn test_break_outside_loop() {
        let mut code = minimal();
        code.insert(4, Instruction::new(Opcode::Break, vec![]));
        let findings = check(code, 4);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("Break outside a loop"));
    }

    #[test]
    fn test_decoration_target_must_be_variable() {
        let mut code = minimal();
        code.insert(1, Instruction::new(Opcode::Decorate, vec![3, 0, 0]));
        let findings = check(code, 4);
        assert!(findings[0].message.contains("not a variable"));
    }
}
