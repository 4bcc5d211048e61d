//! Таблица символов с вложенными областями видимости.

use std::collections::HashMap;

use crate::ir::VarRef;
use crate::types::{ConstValue, Type};

/// Что обозначает имя.
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    /// Переменная (глобальная, локальная или параметр).
    Variable { var: VarRef, ty: Type },
    /// Свёрнутая скалярная константа.
    Constant(ConstValue),
}

/// Вид переменной: определяет, разрешена ли запись.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Plain,
    Const,
    Uniform,
    Input,
}

impl VariableKind {
    pub fn is_read_only(self) -> bool {
        self != VariableKind::Plain
    }

    /// Пояснение для ошибки записи.
    pub fn write_error(self) -> &'static str {
        match self {
            VariableKind::Plain => "",
            VariableKind::Const => "can't modify a const",
            VariableKind::Uniform => "can't modify a uniform",
            VariableKind::Input => "can't modify shader input",
        }
    }
}

/// Стек областей видимости.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl ScopeStack {
    /// Стек с одной (глобальной) областью.
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Объявить имя в текущей области. `false`: имя уже занято здесь.
    pub fn declare(&mut self, name: &str, symbol: Symbol) -> bool {
        let Some(scope) = self.scopes.last_mut() else {
            return false;
        };
        if scope.contains_key(name) {
            return false;
        }
        scope.insert(name.to_string(), symbol);
        true
    }

    /// Найти имя, начиная с самой внутренней области.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Объявлено ли имя в текущей области.
    pub fn declared_here(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map_or(false, |scope| scope.contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_redeclaration() {
        let mut scopes = ScopeStack::new();
        assert!(scopes.declare("x", Symbol::Constant(ConstValue::Int(1))));
        assert!(!scopes.declare("x", Symbol::Constant(ConstValue::Int(2))));

        scopes.push();
        assert!(!scopes.declared_here("x"));
        assert!(scopes.declare("x", Symbol::Constant(ConstValue::Int(3))));
        assert_eq!(scopes.lookup("x"), Some(&Symbol::Constant(ConstValue::Int(3))));
        scopes.pop();

        assert_eq!(scopes.lookup("x"), Some(&Symbol::Constant(ConstValue::Int(1))));
        assert_eq!(scopes.depth(), 1);
        scopes.pop();
        assert_eq!(scopes.depth(), 1);
    }
}
