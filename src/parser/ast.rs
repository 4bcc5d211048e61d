//! Синтаксическое дерево единицы трансляции.
//!
//! Типы здесь ещё не проверены: имена типов хранятся строками, размеры
//! массивов: выражениями. Семантический анализ превращает дерево в IR.

use super::preprocessor::{Extension, LineMap};
use super::token::Span;
use crate::ops::{BinaryOp, UnaryOp};

/// Разобранная единица трансляции.
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub file: String,
    pub version: u32,
    pub es: bool,
    pub extensions: Vec<Extension>,
    pub items: Vec<ExternalDecl>,
    pub line_map: LineMap,
}

impl TranslationUnit {
    /// Файл и строка для позиции узла.
    pub fn locate(&self, span: Span) -> (&str, u32) {
        self.line_map.locate(span.start)
    }
}

/// Объявление верхнего уровня.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalDecl {
    Variables(Declaration),
    Function(FunctionDef),
    Prototype(FunctionProto),
    /// `layout(local_size_x = ...) in;`
    LocalSize(Vec<LayoutEntry>, Span),
}

// === Квалификаторы ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageQualifier {
    Const,
    Uniform,
    In,
    Out,
    InOut,
    Attribute,
    Varying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Flat,
    Smooth,
    NoPerspective,
    Centroid,
}

/// Элемент `layout(...)`: `location = 3`, `binding = 0`, `local_size_x = 8`.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutEntry {
    pub name: String,
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Qualifiers {
    pub storage: Option<StorageQualifier>,
    pub layout: Vec<LayoutEntry>,
    pub interpolation: Option<Interpolation>,
    pub invariant: bool,
}

impl Qualifiers {
    pub fn layout_value(&self, name: &str) -> Option<&LayoutEntry> {
        self.layout.iter().rev().find(|entry| entry.name == name)
    }
}

// === Объявления ===

/// Имя типа как оно записано в исходнике.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSpec {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub array_sizes: Vec<Expr>,
    pub init: Option<Expr>,
    pub span: Span,
}

/// `qualifiers type a[2] = ..., b;`
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub qualifiers: Qualifiers,
    pub ty: TypeSpec,
    pub declarators: Vec<Declarator>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamQualifier {
    #[default]
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub qualifier: ParamQualifier,
    pub is_const: bool,
    pub ty: TypeSpec,
    pub name: Option<String>,
    pub array_sizes: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionProto {
    pub return_type: TypeSpec,
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub proto: FunctionProto,
    pub body: Vec<Stmt>,
    pub span: Span,
}

// === Операторы ===

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Declaration(Declaration),
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Discard,
    Empty,
}

// === Выражения ===

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Битовый образ целого литерала (`0xFFFFFFFF` допустим).
    IntLit(u32),
    UintLit(u32),
    FloatLit(f32),
    BoolLit(bool),
    Ident(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `a = b` (op == None) или составное присваивание `a += b`.
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncDec {
        increment: bool,
        prefix: bool,
        operand: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Вызов функции или конструктор (если имя: тип).
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `.xyz` или другое обращение к полю.
    Field {
        base: Box<Expr>,
        name: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
}
