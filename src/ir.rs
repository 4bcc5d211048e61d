//! Проверенное промежуточное представление программы.
//!
//! Все выражения несут вычисленный тип, неявные преобразования уже
//! вставлены как конструкторы, вызовы разрешены до искажённых имён.
//! Глобальные переменные адресуются по имени: имена уникальны в
//! программе и переживают слияние единиц трансляции.

use crate::builtins::{BuiltinFn, BuiltinVar};
use crate::ops::{BinaryOp, UnaryOp};
use crate::parser::ast::{Interpolation, ParamQualifier};
use crate::stage::Stage;
use crate::types::{ConstValue, Type};

// === Переменные ===

/// Класс хранения глобальной переменной.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    Uniform,
    Input,
    Output,
    /// Обычная глобальная переменная модуля.
    Private,
}

impl Storage {
    pub fn is_interface(self) -> bool {
        matches!(self, Storage::Input | Storage::Output)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub name: String,
    pub ty: Type,
    pub storage: Storage,
    pub location: Option<u32>,
    pub binding: Option<u32>,
    pub interpolation: Option<Interpolation>,
    pub invariant: bool,
    pub builtin: Option<BuiltinVar>,
    /// Инициализатор; записывается в начале `main`.
    pub init: Option<Expr>,
    pub read_only: bool,
    /// Строка объявления (для диагностики).
    pub line: u32,
}

impl GlobalVar {
    pub fn new(name: impl Into<String>, ty: Type, storage: Storage) -> Self {
        Self {
            name: name.into(),
            ty,
            storage,
            location: None,
            binding: None,
            interpolation: None,
            invariant: false,
            builtin: None,
            init: None,
            read_only: matches!(storage, Storage::Uniform | Storage::Input),
            line: 0,
        }
    }

    /// Глобальная переменная для встроенной `gl_*`.
    pub fn builtin(var: BuiltinVar) -> Self {
        let storage = if var.is_output() {
            Storage::Output
        } else {
            Storage::Input
        };
        Self {
            builtin: Some(var),
            ..Self::new(var.name(), var.ty(), storage)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub qualifier: ParamQualifier,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub ty: Type,
    pub read_only: bool,
}

/// Ссылка на переменную.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarRef {
    Global(String),
    Local(u32),
    Param(u32),
}

// === Функции ===

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Искажённое имя `name(t1,t2)`; уникально в программе.
    pub mangled: String,
    pub return_type: Type,
    pub params: Vec<Param>,
    pub locals: Vec<Local>,
    /// `None`: только прототип.
    pub body: Option<Vec<Stmt>>,
    pub line: u32,
}

impl Function {
    pub fn is_entry_point(&self) -> bool {
        self.name == "main"
    }

    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|p| p.ty.clone()).collect()
    }
}

/// Искажённое имя функции по типам параметров.
pub fn mangle(name: &str, params: &[Type]) -> String {
    let list: Vec<String> = params.iter().map(|t| t.to_string()).collect();
    format!("{}({})", name, list.join(","))
}

// === Операторы ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// `while` / `for`: условие до тела.
    HeadTested,
    /// `do ... while`: условие после тела.
    TailTested,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Declare {
        local: u32,
        init: Option<Expr>,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    Loop {
        kind: LoopKind,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Discard,
    Block(Vec<Stmt>),
}

// === Выражения ===

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(ConstValue),
    Var(VarRef),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncDec {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Select {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Конструктор типа `ty`.
    Construct(Vec<Expr>),
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Builtin {
        func: BuiltinFn,
        args: Vec<Expr>,
    },
    Swizzle {
        base: Box<Expr>,
        components: Vec<u8>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Self { kind, ty }
    }

    pub fn constant(value: ConstValue) -> Self {
        Self::new(ExprKind::Const(value), value.ty())
    }

    pub fn as_const(&self) -> Option<ConstValue> {
        match self.kind {
            ExprKind::Const(value) => Some(value),
            _ => None,
        }
    }

    /// Корневая переменная цепочки доступа (`a[i].xy` -> `a`).
    pub fn root_var(&self) -> Option<&VarRef> {
        match &self.kind {
            ExprKind::Var(var) => Some(var),
            ExprKind::Swizzle { base, .. } | ExprKind::Index { base, .. } => base.root_var(),
            _ => None,
        }
    }

    /// Цепочка доступа к памяти (переменная, индекс, swizzle).
    pub fn is_access_chain(&self) -> bool {
        self.root_var().is_some()
    }

    /// Есть ли у вычисления побочные эффекты.
    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            ExprKind::Const(_) | ExprKind::Var(_) => false,
            ExprKind::Assign { .. } | ExprKind::IncDec { .. } | ExprKind::Call { .. } => true,
            ExprKind::Binary { lhs, rhs, .. } => lhs.has_side_effects() || rhs.has_side_effects(),
            ExprKind::Unary { operand, .. } => operand.has_side_effects(),
            ExprKind::Select {
                cond,
                then_expr,
                else_expr,
            } => {
                cond.has_side_effects()
                    || then_expr.has_side_effects()
                    || else_expr.has_side_effects()
            }
            ExprKind::Construct(args) | ExprKind::Builtin { args, .. } => {
                args.iter().any(Expr::has_side_effects)
            }
            ExprKind::Swizzle { base, .. } => base.has_side_effects(),
            ExprKind::Index { base, index } => base.has_side_effects() || index.has_side_effects(),
        }
    }

    /// Обойти выражение и все подвыражения.
    pub fn visit(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Const(_) | ExprKind::Var(_) => {}
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            ExprKind::Unary { operand, .. } => operand.visit(f),
            ExprKind::Assign { target, value, .. } => {
                target.visit(f);
                value.visit(f);
            }
            ExprKind::IncDec { target, .. } => target.visit(f),
            ExprKind::Select {
                cond,
                then_expr,
                else_expr,
            } => {
                cond.visit(f);
                then_expr.visit(f);
                else_expr.visit(f);
            }
            ExprKind::Construct(args)
            | ExprKind::Builtin { args, .. }
            | ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.visit(f);
                }
            }
            ExprKind::Swizzle { base, .. } => base.visit(f),
            ExprKind::Index { base, index } => {
                base.visit(f);
                index.visit(f);
            }
        }
    }
}

impl Stmt {
    /// Обойти все выражения оператора (рекурсивно).
    pub fn visit_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Stmt::Expr(e) | Stmt::Return(Some(e)) => e.visit(f),
            Stmt::Declare { init, .. } => {
                if let Some(e) = init {
                    e.visit(f);
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.visit(f);
                for s in then_branch.iter().chain(else_branch) {
                    s.visit_exprs(f);
                }
            }
            Stmt::Loop {
                cond, step, body, ..
            } => {
                if let Some(c) = cond {
                    c.visit(f);
                }
                if let Some(s) = step {
                    s.visit(f);
                }
                for s in body {
                    s.visit_exprs(f);
                }
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    s.visit_exprs(f);
                }
            }
            Stmt::Break | Stmt::Continue | Stmt::Return(None) | Stmt::Discard => {}
        }
    }
}

// === Программа ===

/// Проверенная программа одной стадии.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub stage: Stage,
    pub file: String,
    pub version: u32,
    pub es: bool,
    pub globals: Vec<GlobalVar>,
    pub functions: Vec<Function>,
    /// Размер рабочей группы (только compute).
    pub local_size: Option<[u32; 3]>,
}

impl Program {
    pub fn new(stage: Stage, file: impl Into<String>) -> Self {
        Self {
            stage,
            file: file.into(),
            version: crate::parser::DEFAULT_VERSION,
            es: true,
            globals: Vec::new(),
            functions: Vec::new(),
            local_size: None,
        }
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVar> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn global_mut(&mut self, name: &str) -> Option<&mut GlobalVar> {
        self.globals.iter_mut().find(|g| g.name == name)
    }

    /// Uniform-переменные в порядке объявления.
    pub fn uniforms(&self) -> impl Iterator<Item = &GlobalVar> {
        self.globals
            .iter()
            .filter(|g| g.storage == Storage::Uniform)
    }

    pub fn function(&self, mangled: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.mangled == mangled)
    }

    /// Определение `main` (с телом).
    pub fn entry_point(&self) -> Option<&Function> {
        self.functions
            .iter()
            .find(|f| f.is_entry_point() && f.body.is_some())
    }

    /// Искажённые имена функций, вызываемых из тела.
    pub fn callees(function: &Function) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for stmt in function.body.iter().flatten() {
            stmt.visit_exprs(&mut |e| {
                if let ExprKind::Call { function, .. } = &e.kind {
                    if !out.contains(function) {
                        out.push(function.clone());
                    }
                }
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, ty: Type) -> Expr {
        Expr::new(ExprKind::Var(VarRef::Global(name.to_string())), ty)
    }

    #[test]
    fn test_mangle() {
        assert_eq!(mangle("main", &[]), "main()");
        assert_eq!(
            mangle("f", &[Type::FLOAT, Type::Array(Box::new(Type::vec(2)), 3)]),
            "f(float,vec2[3])"
        );
    }

    #[test]
    fn test_access_chain_root() {
        let chain = Expr::new(
            ExprKind::Swizzle {
                base: Box::new(Expr::new(
                    ExprKind::Index {
                        base: Box::new(var("a", Type::Array(Box::new(Type::vec(4)), 2))),
                        index: Box::new(Expr::constant(ConstValue::Int(1))),
                    },
                    Type::vec(4),
                )),
                components: vec![0, 1],
            },
            Type::vec(2),
        );
        assert_eq!(chain.root_var(), Some(&VarRef::Global("a".to_string())));
        assert!(!chain.has_side_effects());
    }

    #[test]
    fn test_side_effects() {
        let assign = Expr::new(
            ExprKind::Assign {
                op: None,
                target: Box::new(var("x", Type::FLOAT)),
                value: Box::new(Expr::constant(ConstValue::Float(1.0))),
            },
            Type::FLOAT,
        );
        let sum = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(assign),
                rhs: Box::new(var("y", Type::FLOAT)),
            },
            Type::FLOAT,
        );
        assert!(sum.has_side_effects());
    }

    #[test]
    fn test_builtin_global_storage() {
        let g = GlobalVar::builtin(BuiltinVar::Position);
        assert_eq!(g.storage, Storage::Output);
        assert_eq!(g.name, "gl_Position");
        assert!(!g.read_only);
        let g = GlobalVar::builtin(BuiltinVar::FragCoord);
        assert_eq!(g.storage, Storage::Input);
        assert!(g.read_only);
    }
}
