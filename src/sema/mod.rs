//! Семантический анализ: синтаксическое дерево -> проверенный IR.
//!
//! Валидатор собирает все ошибки единицы трансляции в журнал
//! диагностики и только после полного обхода решает, успешна ли проверка.
//! Если ошибка есть, единица отклоняется с `ParseError` по первой из них.
//!
//! Проверки:
//! - необъявленные имена, повторные объявления в одной области;
//! - типы операндов, присваиваний, возвращаемых значений;
//! - арность конструкторов, корректность swizzle;
//! - запись в константы, uniform, входы стадии и не-l-value;
//! - `break`/`continue` вне цикла, `discard` вне фрагментной стадии;
//! - сигнатура `main`, размеры массивов, перегрузки;
//! - лимиты ресурсов стадии.

pub mod consteval;
pub mod scope;

use crate::builtins::{BuiltinFn, BuiltinVar};
use crate::diagnostic::{Diagnostic, DiagnosticLog, DiagnosticSink};
use crate::error::ShaderResult;
use crate::includer::Includer;
use crate::ir::{
    mangle, Expr, ExprKind, Function, GlobalVar, Local, LoopKind, Param, Program, Stmt,
    Storage, VarRef,
};
use crate::limits::StageLimits;
use crate::ops::{BinaryOp, UnaryOp};
use crate::parser::ast::{
    self, Declaration, Declarator, ExternalDecl, FunctionDef, FunctionProto, Interpolation,
    LayoutEntry, ParamQualifier, StmtKind, StorageQualifier, TypeSpec,
};
use crate::parser::{parse_translation_unit, ParseError, SourceUnit, Span, TranslationUnit};
use crate::stage::Stage;
use crate::types::{ConstValue, SamplerDim, SamplerType, ScalarKind, Type};

use scope::{ScopeStack, Symbol, VariableKind};

/// Проверенная программа одной единицы трансляции.
#[derive(Debug, Clone)]
pub struct ParsedProgram {
    pub program: Program,
    pub log: DiagnosticLog,
}

/// Разобрать и проверить исходник стадии.
pub fn parse_program(
    unit: &SourceUnit,
    includer: &mut dyn Includer,
    sink: &mut dyn DiagnosticSink,
) -> ShaderResult<ParsedProgram> {
    let tu = parse_translation_unit(unit, includer, sink)?;
    validate(&tu, unit.stage, sink)
}

/// Проверить разобранную единицу трансляции и построить IR.
pub fn validate(
    unit: &TranslationUnit,
    stage: Stage,
    sink: &mut dyn DiagnosticSink,
) -> ShaderResult<ParsedProgram> {
    let (program, log) = Validator::new(unit, stage).run();
    log.forward_to(sink);

    if let Some(first) = log.first_error() {
        log::debug!(
            "validation of {} failed with {} diagnostics",
            unit.file,
            log.len()
        );
        return Err(ParseError::at(&first.source, first.line, &first.message).into());
    }

    log::debug!(
        "validated {}: {} globals, {} functions",
        unit.file,
        program.globals.len(),
        program.functions.len()
    );
    Ok(ParsedProgram { program, log })
}

// === Служебные типы ===

/// Ошибка проверки, ещё не привязанная к строке.
#[derive(Debug)]
struct SemaError {
    span: Span,
    message: String,
}

type Checked<T> = Result<T, SemaError>;

fn fail<T>(span: Span, message: impl Into<String>) -> Checked<T> {
    Err(SemaError {
        span,
        message: message.into(),
    })
}

/// Сигнатура пользовательской функции.
#[derive(Debug, Clone)]
struct Signature {
    name: String,
    mangled: String,
    params: Vec<(Type, ParamQualifier)>,
    return_type: Type,
    defined: bool,
}

/// Состояние проверки тела функции.
#[derive(Debug)]
struct FunctionContext {
    return_type: Type,
    params: Vec<Param>,
    locals: Vec<Local>,
    loop_depth: u32,
}

struct Validator<'a> {
    unit: &'a TranslationUnit,
    stage: Stage,
    limits: StageLimits,
    program: Program,
    scopes: ScopeStack,
    signatures: Vec<Signature>,
    function: Option<FunctionContext>,
    log: DiagnosticLog,
}

impl<'a> Validator<'a> {
    fn new(unit: &'a TranslationUnit, stage: Stage) -> Self {
        let mut program = Program::new(stage, unit.file.clone());
        program.version = unit.version;
        program.es = unit.es;
        Self {
            unit,
            stage,
            limits: stage.limits(),
            program,
            scopes: ScopeStack::new(),
            signatures: Vec::new(),
            function: None,
            log: DiagnosticLog::new(),
        }
    }

    fn run(mut self) -> (Program, DiagnosticLog) {
        let unit = self.unit;
        for item in &unit.items {
            let result = match item {
                ExternalDecl::Variables(decl) => {
                    self.global_declaration(decl);
                    Ok(())
                }
                ExternalDecl::Prototype(proto) => self.prototype(proto),
                ExternalDecl::Function(def) => self.define_function(def),
                ExternalDecl::LocalSize(entries, span) => self.local_size(entries, *span),
            };
            if let Err(e) = result {
                self.report(e);
            }
        }

        self.check_resource_limits();
        if self.stage == Stage::Compute && self.program.local_size.is_none() {
            self.program.local_size = Some([1, 1, 1]);
        }
        (self.program, self.log)
    }

    // === Диагностика ===

    fn line(&self, span: Span) -> u32 {
        self.unit.locate(span).1
    }

    fn report(&mut self, error: SemaError) {
        let (file, line) = self.unit.locate(error.span);
        self.log.report(Diagnostic::error(file, line, error.message));
    }

    fn warn(&mut self, span: Span, message: String) {
        let (file, line) = self.unit.locate(span);
        self.log.report(Diagnostic::warning(file, line, message));
    }

    /// Версия без устаревших `attribute`/`varying`.
    fn is_modern(&self) -> bool {
        if self.unit.es {
            self.unit.version >= 300
        } else {
            self.unit.version >= 130
        }
    }

    // === Типы ===

    fn resolve_type(&mut self, spec: &TypeSpec, array_sizes: &[ast::Expr]) -> Checked<Type> {
        let Some(mut ty) = Type::from_name(&spec.name) else {
            return fail(spec.span, format!("'{}' : no such type", spec.name));
        };
        for size in array_sizes.iter().rev() {
            if ty.is_void() {
                return fail(spec.span, "'void' : illegal use of type 'void'");
            }
            let value = self.expr(size)?;
            let Some(n) = consteval::positive_size(&value) else {
                return fail(
                    size.span,
                    "'array size' : must be a positive integer constant expression",
                );
            };
            ty = Type::Array(Box::new(ty), n);
        }
        Ok(ty)
    }

    fn layout_int(&mut self, entry: &LayoutEntry) -> Checked<u32> {
        let Some(value) = &entry.value else {
            return fail(entry.span, format!("'{}' : needs a literal integer", entry.name));
        };
        let value = self.expr(value)?;
        consteval::eval(&value)
            .filter(|v| v.kind().is_integer())
            .and_then(ConstValue::as_integer)
            .and_then(|v| u32::try_from(v).ok())
            .map_or_else(
                || fail(entry.span, format!("'{}' : needs a literal integer", entry.name)),
                Ok,
            )
    }

    // === Глобальные объявления ===

    fn global_declaration(&mut self, decl: &Declaration) {
        for declarator in &decl.declarators {
            if let Err(e) = self.global_declarator(decl, declarator) {
                self.report(e);
            }
        }
    }

    fn check_new_name(&self, name: &str, span: Span) -> Checked<()> {
        if name.starts_with("gl_") {
            return fail(span, format!("'{}' : identifiers starting with \"gl_\" are reserved", name));
        }
        if self.scopes.declared_here(name) {
            return fail(span, format!("'{}' : redefinition", name));
        }
        Ok(())
    }

    fn global_declarator(&mut self, decl: &Declaration, d: &Declarator) -> Checked<()> {
        let ty = self.resolve_type(&decl.ty, &d.array_sizes)?;
        if ty.is_void() {
            return fail(d.span, format!("'{}' : illegal use of type 'void'", d.name));
        }
        self.check_new_name(&d.name, d.span)?;

        let q = &decl.qualifiers;
        let storage = match q.storage {
            None => Storage::Private,
            Some(StorageQualifier::Const) => return self.global_const(&d.name, ty, d),
            Some(StorageQualifier::Uniform) => Storage::Uniform,
            Some(StorageQualifier::In) | Some(StorageQualifier::Out)
                if self.stage == Stage::Compute =>
            {
                return fail(
                    d.span,
                    format!("'{}' : global in/out variables are not allowed in compute shaders", d.name),
                );
            }
            Some(StorageQualifier::In) => Storage::Input,
            Some(StorageQualifier::Out) => Storage::Output,
            Some(StorageQualifier::Attribute) => {
                if self.stage != Stage::Vertex {
                    return fail(d.span, "'attribute' : supported in vertex shaders only");
                }
                if self.is_modern() {
                    self.warn(d.span, "'attribute' : deprecated, use 'in'".to_string());
                }
                Storage::Input
            }
            Some(StorageQualifier::Varying) => {
                if self.is_modern() {
                    self.warn(d.span, "'varying' : deprecated, use 'in'/'out'".to_string());
                }
                match self.stage {
                    Stage::Vertex => Storage::Output,
                    Stage::Fragment => Storage::Input,
                    Stage::Compute => {
                        return fail(d.span, "'varying' : not supported in compute shaders")
                    }
                }
            }
            Some(StorageQualifier::InOut) => {
                return fail(d.span, "'inout' : not allowed on global variables")
            }
        };

        let base = ty.cumulative().0.clone();
        if base.is_sampler() && storage != Storage::Uniform {
            return fail(d.span, format!("'{}' : sampler types must be uniform", base));
        }
        if storage.is_interface() {
            if base.is_bool_gen() {
                return fail(
                    d.span,
                    format!("'{}' : bool types are not allowed on shader inputs/outputs", d.name),
                );
            }
            if self.stage == Stage::Fragment
                && storage == Storage::Input
                && base.is_integer()
                && q.interpolation != Some(Interpolation::Flat)
            {
                return fail(
                    d.span,
                    format!("'{}' : integer fragment inputs must be qualified as 'flat'", d.name),
                );
            }
            if self.stage == Stage::Vertex && storage == Storage::Input && ty.is_array() {
                return fail(d.span, format!("'{}' : vertex inputs cannot be arrays", d.name));
            }
        } else if q.interpolation.is_some() {
            return fail(
                d.span,
                "'interpolation' : can only be applied to shader inputs and outputs",
            );
        }
        if q.invariant && storage != Storage::Output {
            return fail(d.span, "'invariant' : can only be applied to outputs");
        }

        let mut var = GlobalVar::new(d.name.clone(), ty.clone(), storage);
        var.line = self.line(d.span);
        var.interpolation = q.interpolation;
        var.invariant = q.invariant;

        for entry in &q.layout {
            match entry.name.as_str() {
                "location" => {
                    if !storage.is_interface() && storage != Storage::Uniform {
                        return fail(entry.span, "'location' : requires an input, output or uniform");
                    }
                    var.location = Some(self.layout_int(entry)?);
                }
                "binding" => {
                    if storage != Storage::Uniform {
                        return fail(entry.span, "'binding' : requires a uniform");
                    }
                    var.binding = Some(self.layout_int(entry)?);
                }
                "local_size_x" | "local_size_y" | "local_size_z" => {
                    return fail(
                        entry.span,
                        format!("'{}' : can only be used on a standalone 'in' declaration", entry.name),
                    );
                }
                other => {
                    return fail(entry.span, format!("'{}' : unrecognized layout identifier", other));
                }
            }
        }

        if let Some(init) = &d.init {
            if storage != Storage::Private {
                return fail(
                    init.span,
                    format!("'{}' : cannot initialize this type of qualifier", d.name),
                );
            }
            let value = self.expr(init)?;
            var.init = Some(self.coerce(value, &ty, init.span, "=")?);
        }

        self.scopes.declare(
            &d.name,
            Symbol::Variable {
                var: VarRef::Global(d.name.clone()),
                ty,
            },
        );
        self.program.globals.push(var);
        Ok(())
    }

    /// `const` верхнего уровня: скаляр сворачивается, остальное остаётся
    /// глобальной переменной только для чтения.
    fn global_const(&mut self, name: &str, ty: Type, d: &Declarator) -> Checked<()> {
        let value = self.const_initializer(name, &ty, d)?;
        if let Some(folded) = consteval::eval(&value) {
            self.scopes.declare(name, Symbol::Constant(folded));
            return Ok(());
        }
        let mut var = GlobalVar::new(name, ty.clone(), Storage::Private);
        var.read_only = true;
        var.line = self.line(d.span);
        var.init = Some(value);
        self.scopes.declare(
            name,
            Symbol::Variable {
                var: VarRef::Global(name.to_string()),
                ty,
            },
        );
        self.program.globals.push(var);
        Ok(())
    }

    fn const_initializer(&mut self, name: &str, ty: &Type, d: &Declarator) -> Checked<Expr> {
        let Some(init) = &d.init else {
            return fail(
                d.span,
                format!("'{}' : variables with qualifier 'const' must be initialized", name),
            );
        };
        let value = self.expr(init)?;
        let value = self.coerce(value, ty, init.span, "=")?;
        if !consteval::is_constant(&value) {
            return fail(
                init.span,
                format!("'=' : assigning non-constant to 'const {}'", ty),
            );
        }
        Ok(value)
    }

    fn local_size(&mut self, entries: &[LayoutEntry], span: Span) -> Checked<()> {
        if self.stage != Stage::Compute {
            return fail(span, "'local_size' : only valid in compute shaders");
        }
        let mut size = self.program.local_size.unwrap_or([1, 1, 1]);
        for entry in entries {
            let axis = match entry.name.as_str() {
                "local_size_x" => 0,
                "local_size_y" => 1,
                "local_size_z" => 2,
                other => {
                    return fail(entry.span, format!("'{}' : unrecognized layout identifier", other))
                }
            };
            let value = self.layout_int(entry)?;
            if value == 0 {
                return fail(entry.span, format!("'{}' : must be at least 1", entry.name));
            }
            size[axis] = value;
        }
        if let Some(previous) = self.program.local_size {
            if previous != size {
                return fail(span, "'local_size' : cannot change previously set size");
            }
        }
        if let Some(max) = self.limits.max_work_group_size {
            if size.iter().zip(max.iter()).any(|(v, m)| v > m) {
                return fail(
                    span,
                    format!(
                        "'local_size' : too large ({}x{}x{}, max {}x{}x{})",
                        size[0], size[1], size[2], max[0], max[1], max[2]
                    ),
                );
            }
        }
        self.program.local_size = Some(size);
        Ok(())
    }

    // === Функции ===

    fn declare_function(&mut self, proto: &FunctionProto) -> Checked<usize> {
        let return_type = self.resolve_type(&proto.return_type, &[])?;
        if return_type.is_sampler() {
            return fail(proto.span, format!("'{}' : functions cannot return samplers", proto.name));
        }

        let mut params = Vec::with_capacity(proto.params.len());
        for p in &proto.params {
            let ty = self.resolve_type(&p.ty, &p.array_sizes)?;
            if ty.is_void() {
                return fail(p.span, "'void' : illegal use of type 'void'");
            }
            if ty.is_sampler() && p.qualifier != ParamQualifier::In {
                return fail(p.span, "'sampler' : samplers cannot be output parameters");
            }
            params.push((ty, p.qualifier));
        }

        let name = &proto.name;
        if BuiltinFn::lookup(name).is_some() {
            return fail(proto.span, format!("'{}' : cannot redefine a built-in function", name));
        }
        if Type::from_name(name).is_some() || name.starts_with("gl_") {
            return fail(proto.span, format!("'{}' : illegal function name", name));
        }
        if name == "main" {
            if !params.is_empty() {
                return fail(proto.span, "'main' : function cannot take any parameter(s)");
            }
            if !return_type.is_void() {
                return fail(proto.span, "'main' : main function cannot return a value");
            }
        }

        let types: Vec<Type> = params.iter().map(|(t, _)| t.clone()).collect();
        let mangled = mangle(name, &types);
        if let Some(index) = self.signatures.iter().position(|s| s.mangled == mangled) {
            let existing = &self.signatures[index];
            if existing.return_type != return_type {
                return fail(
                    proto.span,
                    format!("'{}' : overloaded functions must have the same return type", name),
                );
            }
            let same_qualifiers = existing
                .params
                .iter()
                .zip(&params)
                .all(|((_, a), (_, b))| a == b);
            if !same_qualifiers {
                return fail(
                    proto.span,
                    format!("'{}' : overloaded functions must have the same parameter qualifiers", name),
                );
            }
            return Ok(index);
        }
        if self.scopes.lookup(name).is_some() {
            return fail(proto.span, format!("'{}' : redefinition", name));
        }

        self.signatures.push(Signature {
            name: name.clone(),
            mangled,
            params,
            return_type,
            defined: false,
        });
        Ok(self.signatures.len() - 1)
    }

    fn prototype(&mut self, proto: &FunctionProto) -> Checked<()> {
        let index = self.declare_function(proto)?;
        let sig = self.signatures[index].clone();
        if self.program.function(&sig.mangled).is_none() {
            let params = proto
                .params
                .iter()
                .zip(&sig.params)
                .map(|(p, (ty, qualifier))| Param {
                    name: p.name.clone().unwrap_or_default(),
                    ty: ty.clone(),
                    qualifier: *qualifier,
                    read_only: p.is_const,
                })
                .collect();
            let line = self.line(proto.span);
            self.program.functions.push(Function {
                name: sig.name,
                mangled: sig.mangled,
                return_type: sig.return_type,
                params,
                locals: Vec::new(),
                body: None,
                line,
            });
        }
        Ok(())
    }

    fn define_function(&mut self, def: &FunctionDef) -> Checked<()> {
        let index = self.declare_function(&def.proto)?;
        if self.signatures[index].defined {
            return fail(
                def.proto.span,
                format!("'{}' : function already has a body", def.proto.name),
            );
        }
        self.signatures[index].defined = true;
        let sig = self.signatures[index].clone();

        let params: Vec<Param> = def
            .proto
            .params
            .iter()
            .zip(&sig.params)
            .map(|(p, (ty, qualifier))| Param {
                name: p.name.clone().unwrap_or_default(),
                ty: ty.clone(),
                qualifier: *qualifier,
                read_only: p.is_const,
            })
            .collect();

        self.scopes.push();
        for (i, (p, decl)) in params.iter().zip(&def.proto.params).enumerate() {
            if p.name.is_empty() {
                continue;
            }
            if !self.scopes.declare(
                &p.name,
                Symbol::Variable {
                    var: VarRef::Param(i as u32),
                    ty: p.ty.clone(),
                },
            ) {
                self.report(SemaError {
                    span: decl.span,
                    message: format!("'{}' : redefinition", p.name),
                });
            }
        }

        self.function = Some(FunctionContext {
            return_type: sig.return_type.clone(),
            params: params.clone(),
            locals: Vec::new(),
            loop_depth: 0,
        });
        // Тело разделяет область видимости с параметрами.
        let body = self.statements(&def.body);
        let context = self.function.take();
        self.scopes.pop();

        let function = Function {
            name: sig.name,
            mangled: sig.mangled.clone(),
            return_type: sig.return_type,
            params,
            locals: context.map(|c| c.locals).unwrap_or_default(),
            body: Some(body),
            line: self.line(def.span),
        };
        match self
            .program
            .functions
            .iter_mut()
            .find(|f| f.mangled == sig.mangled)
        {
            Some(existing) => *existing = function,
            None => self.program.functions.push(function),
        }
        Ok(())
    }

    // === Операторы ===

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.scopes.push();
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn in_loop<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        if let Some(ctx) = self.function.as_mut() {
            ctx.loop_depth += 1;
        }
        let result = f(self);
        if let Some(ctx) = self.function.as_mut() {
            ctx.loop_depth -= 1;
        }
        result
    }

    fn loop_depth(&self) -> u32 {
        self.function.as_ref().map_or(0, |ctx| ctx.loop_depth)
    }

    /// Последовательность операторов; ошибки копятся, обход продолжается.
    fn statements(&mut self, stmts: &[ast::Stmt]) -> Vec<Stmt> {
        let mut out = Vec::new();
        for stmt in stmts {
            match self.statement(stmt) {
                Ok(mut lowered) => out.append(&mut lowered),
                Err(e) => self.report(e),
            }
        }
        out
    }

    /// Вложенный оператор (ветвь, тело цикла) в собственной области.
    fn sub_statement(&mut self, stmt: &ast::Stmt) -> Vec<Stmt> {
        let lowered = self.scoped(|v| v.statement(stmt));
        match lowered {
            Ok(mut stmts) => {
                if let [Stmt::Block(inner)] = stmts.as_mut_slice() {
                    return std::mem::take(inner);
                }
                stmts
            }
            Err(e) => {
                self.report(e);
                Vec::new()
            }
        }
    }

    fn statement(&mut self, stmt: &ast::Stmt) -> Checked<Vec<Stmt>> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.statement_inner(stmt))
    }

    fn statement_inner(&mut self, stmt: &ast::Stmt) -> Checked<Vec<Stmt>> {
        let span = stmt.span;
        let lowered = match &stmt.kind {
            StmtKind::Empty => Vec::new(),
            StmtKind::Declaration(decl) => self.local_declaration(decl)?,
            StmtKind::Expr(e) => vec![Stmt::Expr(self.expr(e)?)],
            StmtKind::Block(stmts) => {
                vec![Stmt::Block(self.scoped(|v| v.statements(stmts)))]
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.condition(cond, "if")?;
                let then_branch = self.sub_statement(then_branch);
                let else_branch = else_branch
                    .as_ref()
                    .map(|s| self.sub_statement(s))
                    .unwrap_or_default();
                vec![Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                }]
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.scoped(|v| v.for_loop(init.as_deref(), cond.as_ref(), step.as_ref(), body))?,
            StmtKind::While { cond, body } => {
                let cond = self.condition(cond, "while")?;
                let body = self.in_loop(|v| v.sub_statement(body));
                vec![Stmt::Loop {
                    kind: LoopKind::HeadTested,
                    cond: Some(cond),
                    step: None,
                    body,
                }]
            }
            StmtKind::DoWhile { body, cond } => {
                let body = self.in_loop(|v| v.sub_statement(body));
                let cond = self.condition(cond, "do-while")?;
                vec![Stmt::Loop {
                    kind: LoopKind::TailTested,
                    cond: Some(cond),
                    step: None,
                    body,
                }]
            }
            StmtKind::Return(value) => vec![self.return_statement(value.as_ref(), span)?],
            StmtKind::Break => {
                if self.loop_depth() == 0 {
                    return fail(span, "'break' : break statement only allowed in loops");
                }
                vec![Stmt::Break]
            }
            StmtKind::Continue => {
                if self.loop_depth() == 0 {
                    return fail(span, "'continue' : continue statement only allowed in loops");
                }
                vec![Stmt::Continue]
            }
            StmtKind::Discard => {
                if self.stage != Stage::Fragment {
                    return fail(
                        span,
                        format!("'discard' : not supported in this stage: {}", self.stage),
                    );
                }
                vec![Stmt::Discard]
            }
        };
        Ok(lowered)
    }

    fn for_loop(
        &mut self,
        init: Option<&ast::Stmt>,
        cond: Option<&ast::Expr>,
        step: Option<&ast::Expr>,
        body: &ast::Stmt,
    ) -> Checked<Vec<Stmt>> {
        let mut out = match init {
            Some(init) => self.statement(init)?,
            None => Vec::new(),
        };
        let cond = cond.map(|c| self.condition(c, "for")).transpose()?;
        let step = step.map(|s| self.expr(s)).transpose()?;
        let body = self.in_loop(|v| v.sub_statement(body));
        let lp = Stmt::Loop {
            kind: LoopKind::HeadTested,
            cond,
            step,
            body,
        };
        if out.is_empty() {
            return Ok(vec![lp]);
        }
        out.push(lp);
        Ok(vec![Stmt::Block(out)])
    }

    fn condition(&mut self, expr: &ast::Expr, construct: &str) -> Checked<Expr> {
        let cond = self.expr(expr)?;
        if cond.ty != Type::BOOL {
            return fail(
                expr.span,
                format!("'{}' : boolean expression expected, found '{}'", construct, cond.ty),
            );
        }
        Ok(cond)
    }

    fn return_statement(&mut self, value: Option<&ast::Expr>, span: Span) -> Checked<Stmt> {
        let Some(return_type) = self.function.as_ref().map(|c| c.return_type.clone()) else {
            return fail(span, "'return' : not inside a function");
        };
        match value {
            None if !return_type.is_void() => {
                fail(span, "'return' : non-void function must return a value")
            }
            None => Ok(Stmt::Return(None)),
            Some(_) if return_type.is_void() => {
                fail(span, "'return' : void function cannot return a value")
            }
            Some(expr) => {
                let value = self.expr(expr)?;
                let value = self.coerce(value, &return_type, expr.span, "return")?;
                Ok(Stmt::Return(Some(value)))
            }
        }
    }

    fn local_declaration(&mut self, decl: &Declaration) -> Checked<Vec<Stmt>> {
        let q = &decl.qualifiers;
        let is_const = match q.storage {
            None => false,
            Some(StorageQualifier::Const) => true,
            Some(other) => {
                return fail(
                    decl.span,
                    format!("'{}' : qualifier not allowed on local variables", storage_name(other)),
                )
            }
        };
        if !q.layout.is_empty() || q.interpolation.is_some() || q.invariant {
            return fail(decl.span, "'layout' : qualifiers not allowed on local variables");
        }

        let mut out = Vec::new();
        for d in &decl.declarators {
            match self.local_declarator(decl, d, is_const) {
                Ok(Some(stmt)) => out.push(stmt),
                Ok(None) => {}
                Err(e) => self.report(e),
            }
        }
        Ok(out)
    }

    fn local_declarator(
        &mut self,
        decl: &Declaration,
        d: &Declarator,
        is_const: bool,
    ) -> Checked<Option<Stmt>> {
        let ty = self.resolve_type(&decl.ty, &d.array_sizes)?;
        if ty.is_void() {
            return fail(d.span, format!("'{}' : illegal use of type 'void'", d.name));
        }
        if ty.cumulative().0.is_sampler() {
            return fail(d.span, format!("'{}' : sampler types must be uniform", ty.base_name()));
        }
        self.check_new_name(&d.name, d.span)?;

        let init = if is_const {
            let value = self.const_initializer(&d.name, &ty, d)?;
            if let Some(folded) = consteval::eval(&value) {
                self.scopes.declare(&d.name, Symbol::Constant(folded));
                return Ok(None);
            }
            Some(value)
        } else {
            match &d.init {
                Some(init) => {
                    let value = self.expr(init)?;
                    Some(self.coerce(value, &ty, init.span, "=")?)
                }
                None => None,
            }
        };

        let Some(ctx) = self.function.as_mut() else {
            return fail(d.span, "local declaration outside of a function");
        };
        let index = ctx.locals.len() as u32;
        ctx.locals.push(Local {
            name: d.name.clone(),
            ty: ty.clone(),
            read_only: is_const,
        });
        self.scopes.declare(
            &d.name,
            Symbol::Variable {
                var: VarRef::Local(index),
                ty,
            },
        );
        Ok(Some(Stmt::Declare { local: index, init }))
    }

    // === Выражения ===

    fn expr(&mut self, e: &ast::Expr) -> Checked<Expr> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.expr_inner(e))
    }

    fn expr_inner(&mut self, e: &ast::Expr) -> Checked<Expr> {
        let span = e.span;
        match &e.kind {
            ast::ExprKind::IntLit(bits) => Ok(Expr::constant(ConstValue::Int(*bits as i32))),
            ast::ExprKind::UintLit(v) => Ok(Expr::constant(ConstValue::Uint(*v))),
            ast::ExprKind::FloatLit(v) => Ok(Expr::constant(ConstValue::Float(*v))),
            ast::ExprKind::BoolLit(v) => Ok(Expr::constant(ConstValue::Bool(*v))),
            ast::ExprKind::Ident(name) => self.identifier(name, span),
            ast::ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                self.binary(*op, lhs, rhs, span)
            }
            ast::ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                let ok = match op {
                    UnaryOp::Neg => operand.ty.is_numeric(),
                    UnaryOp::Not => operand.ty == Type::BOOL,
                    UnaryOp::BitNot => operand.ty.is_integer(),
                };
                if !ok {
                    return fail(
                        span,
                        format!(
                            "'{}' : wrong operand type: no operation '{}' exists that takes an operand of type '{}'",
                            op.symbol(),
                            op.symbol(),
                            operand.ty
                        ),
                    );
                }
                let ty = operand.ty.clone();
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                ))
            }
            ast::ExprKind::Assign { op, target, value } => {
                let target = self.expr(target)?;
                self.check_lvalue(&target, span, "assign")?;
                let value = self.expr(value)?;
                let value = match op {
                    None => self.coerce(value, &target.ty, span, "assign")?,
                    Some(op) => {
                        let value = if target.ty.scalar_kind() == Some(ScalarKind::Float) {
                            convert_to_float(value)
                        } else {
                            value
                        };
                        if binary_type(*op, &target.ty, &value.ty).as_ref() != Some(&target.ty) {
                            return fail(
                                span,
                                format!(
                                    "'{}=' : cannot convert from '{}' to '{}'",
                                    op.symbol(),
                                    value.ty,
                                    target.ty
                                ),
                            );
                        }
                        value
                    }
                };
                let ty = target.ty.clone();
                Ok(Expr::new(
                    ExprKind::Assign {
                        op: *op,
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                    ty,
                ))
            }
            ast::ExprKind::IncDec {
                increment,
                prefix,
                operand,
            } => {
                let target = self.expr(operand)?;
                let symbol = if *increment { "++" } else { "--" };
                self.check_lvalue(&target, span, symbol)?;
                if !target.ty.is_numeric() {
                    return fail(
                        span,
                        format!("'{}' : wrong operand type '{}'", symbol, target.ty),
                    );
                }
                let ty = target.ty.clone();
                Ok(Expr::new(
                    ExprKind::IncDec {
                        increment: *increment,
                        prefix: *prefix,
                        target: Box::new(target),
                    },
                    ty,
                ))
            }
            ast::ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.condition(cond, "?:")?;
                let (then_expr, else_expr) =
                    unify(self.expr(then_expr)?, self.expr(else_expr)?);
                if then_expr.ty != else_expr.ty || then_expr.ty.is_void() {
                    return fail(
                        span,
                        format!(
                            "'?:' : wrong operand types: '{}' and '{}'",
                            then_expr.ty, else_expr.ty
                        ),
                    );
                }
                let ty = then_expr.ty.clone();
                Ok(Expr::new(
                    ExprKind::Select {
                        cond: Box::new(cond),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                    },
                    ty,
                ))
            }
            ast::ExprKind::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Checked<Vec<_>>>()?;
                if let Some(ty) = Type::from_name(name) {
                    return construct(ty, args, span);
                }
                if let Some((func, dim)) = BuiltinFn::lookup(name) {
                    return self.builtin_call(name, func, dim, args, span);
                }
                self.user_call(name, args, span)
            }
            ast::ExprKind::Field { base, name } => {
                let base = self.expr(base)?;
                swizzle(base, name, span)
            }
            ast::ExprKind::Index { base, index } => {
                let base = self.expr(base)?;
                let index = self.expr(index)?;
                if !matches!(index.ty, Type::Scalar(ScalarKind::Int | ScalarKind::Uint)) {
                    return fail(span, "'[' : integer expression required for indexing");
                }
                let (Some(element), Some(bound)) = (base.ty.element(), base.ty.index_bound())
                else {
                    return fail(
                        span,
                        format!("'[' : left of '[' is not of type array, matrix, or vector: '{}'", base.ty),
                    );
                };
                if let Some(value) = consteval::eval(&index).and_then(ConstValue::as_integer) {
                    if value < 0 || value >= i64::from(bound) {
                        return fail(span, format!("'[' : index out of range '{}'", value));
                    }
                }
                Ok(Expr::new(
                    ExprKind::Index {
                        base: Box::new(base),
                        index: Box::new(index),
                    },
                    element,
                ))
            }
        }
    }

    fn identifier(&mut self, name: &str, span: Span) -> Checked<Expr> {
        match self.scopes.lookup(name) {
            Some(Symbol::Constant(value)) => return Ok(Expr::constant(*value)),
            Some(Symbol::Variable { var, ty }) => {
                return Ok(Expr::new(ExprKind::Var(var.clone()), ty.clone()))
            }
            None => {}
        }
        let Some(builtin) = BuiltinVar::lookup(name, self.stage) else {
            return fail(span, format!("'{}' : undeclared identifier", name));
        };
        if self.program.global(name).is_none() {
            let mut var = GlobalVar::builtin(builtin);
            var.line = self.line(span);
            self.program.globals.push(var);
        }
        Ok(Expr::new(
            ExprKind::Var(VarRef::Global(name.to_string())),
            builtin.ty(),
        ))
    }

    fn binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr, span: Span) -> Checked<Expr> {
        let (lhs, rhs) = if op.is_integer_only() || op.is_logical() {
            (lhs, rhs)
        } else {
            unify(lhs, rhs)
        };
        let Some(ty) = binary_type(op, &lhs.ty, &rhs.ty) else {
            return fail(
                span,
                format!(
                    "'{}' : wrong operand types: no operation '{}' exists that takes a left-hand operand of type '{}' and a right operand of type '{}' (or there is no acceptable conversion)",
                    op.symbol(),
                    op.symbol(),
                    lhs.ty,
                    rhs.ty
                ),
            );
        };
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        ))
    }

    fn builtin_call(
        &mut self,
        name: &str,
        func: BuiltinFn,
        dim: Option<SamplerDim>,
        args: Vec<Expr>,
        span: Span,
    ) -> Checked<Expr> {
        if func.fragment_only() && self.stage != Stage::Fragment {
            return fail(span, format!("'{}' : only supported in fragment shaders", name));
        }
        if let Some(dim) = dim {
            let legacy_ok = matches!(
                args.first().map(|a| &a.ty),
                Some(Type::Sampler(SamplerType { dim: d, kind: ScalarKind::Float, .. })) if *d == dim
            );
            if !legacy_ok {
                return fail(span, format!("'{}' : no matching overloaded function found", name));
            }
        }

        let types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
        match func.resolve(&types) {
            Ok(ty) => Ok(Expr::new(ExprKind::Builtin { func, args }, ty)),
            Err(message) => {
                if !args.iter().any(|a| a.ty.is_integer()) {
                    return fail(span, message);
                }
                let converted: Vec<Expr> = args.into_iter().map(convert_to_float).collect();
                let types: Vec<Type> = converted.iter().map(|a| a.ty.clone()).collect();
                match func.resolve(&types) {
                    Ok(ty) => Ok(Expr::new(
                        ExprKind::Builtin {
                            func,
                            args: converted,
                        },
                        ty,
                    )),
                    Err(_) => fail(span, message),
                }
            }
        }
    }

    fn user_call(&mut self, name: &str, args: Vec<Expr>, span: Span) -> Checked<Expr> {
        let candidates: Vec<&Signature> =
            self.signatures.iter().filter(|s| s.name == name).collect();
        if candidates.is_empty() {
            return fail(span, format!("'{}' : no matching overloaded function found", name));
        }

        let exact = candidates.iter().find(|s| {
            s.params.len() == args.len() && s.params.iter().zip(&args).all(|((t, _), a)| *t == a.ty)
        });
        let sig = match exact {
            Some(sig) => (*sig).clone(),
            None => {
                let convertible: Vec<&&Signature> = candidates
                    .iter()
                    .filter(|s| {
                        s.params.len() == args.len()
                            && s.params.iter().zip(&args).all(|((t, q), a)| {
                                *t == a.ty
                                    || (*q == ParamQualifier::In && implicitly_converts(&a.ty, t))
                            })
                    })
                    .collect();
                match convertible.as_slice() {
                    [sig] => (**sig).clone(),
                    [] => {
                        let list: Vec<String> = args.iter().map(|a| a.ty.to_string()).collect();
                        return fail(
                            span,
                            format!(
                                "'{}' : no matching overloaded function found for ({})",
                                name,
                                list.join(", ")
                            ),
                        );
                    }
                    _ => return fail(span, format!("'{}' : ambiguous function call", name)),
                }
            }
        };

        let mut checked = Vec::with_capacity(args.len());
        for (arg, (ty, qualifier)) in args.into_iter().zip(&sig.params) {
            if *qualifier != ParamQualifier::In {
                self.check_lvalue(&arg, span, qualifier_name(*qualifier))?;
                checked.push(arg);
            } else {
                checked.push(self.coerce(arg, ty, span, name)?);
            }
        }
        Ok(Expr::new(
            ExprKind::Call {
                function: sig.mangled,
                args: checked,
            },
            sig.return_type,
        ))
    }

    // === Запись ===

    fn var_name_and_kind(&self, var: &VarRef) -> (String, VariableKind) {
        match var {
            VarRef::Global(name) => {
                let kind = match self.program.global(name) {
                    Some(g) if g.storage == Storage::Uniform => VariableKind::Uniform,
                    Some(g) if g.storage == Storage::Input => VariableKind::Input,
                    Some(g) if g.read_only => VariableKind::Const,
                    _ => VariableKind::Plain,
                };
                (name.clone(), kind)
            }
            VarRef::Local(i) => {
                let local = self
                    .function
                    .as_ref()
                    .and_then(|ctx| ctx.locals.get(*i as usize));
                match local {
                    Some(l) if l.read_only => (l.name.clone(), VariableKind::Const),
                    Some(l) => (l.name.clone(), VariableKind::Plain),
                    None => (String::new(), VariableKind::Plain),
                }
            }
            VarRef::Param(i) => {
                let param = self
                    .function
                    .as_ref()
                    .and_then(|ctx| ctx.params.get(*i as usize));
                match param {
                    Some(p) if p.read_only => (p.name.clone(), VariableKind::Const),
                    Some(p) => (p.name.clone(), VariableKind::Plain),
                    None => (String::new(), VariableKind::Plain),
                }
            }
        }
    }

    fn check_lvalue(&self, target: &Expr, span: Span, op: &str) -> Checked<()> {
        match &target.kind {
            ExprKind::Var(var) => {
                let (name, kind) = self.var_name_and_kind(var);
                if kind.is_read_only() {
                    return fail(
                        span,
                        format!("'{}' : l-value required \"{}\" ({})", op, name, kind.write_error()),
                    );
                }
                Ok(())
            }
            ExprKind::Swizzle { base, components } => {
                let mut seen = [false; 4];
                for &c in components {
                    let slot = &mut seen[usize::from(c & 3)];
                    if *slot {
                        return fail(
                            span,
                            format!("'{}' : vector swizzle selectors not unique for l-value", op),
                        );
                    }
                    *slot = true;
                }
                self.check_lvalue(base, span, op)
            }
            ExprKind::Index { base, .. } => self.check_lvalue(base, span, op),
            _ => fail(span, format!("'{}' : l-value required", op)),
        }
    }

    fn coerce(&self, value: Expr, to: &Type, span: Span, op: &str) -> Checked<Expr> {
        if value.ty == *to {
            return Ok(value);
        }
        if implicitly_converts(&value.ty, to) {
            return Ok(convert_to_float(value));
        }
        fail(
            span,
            format!("'{}' : cannot convert from '{}' to '{}'", op, value.ty, to),
        )
    }

    // === Лимиты ===

    fn check_resource_limits(&mut self) {
        let limits = self.limits;
        let mut uniform_components = 0u32;
        let mut samplers = 0u32;
        let mut inputs = 0u32;
        let mut outputs = 0u32;
        let mut findings = Vec::new();

        for g in &self.program.globals {
            if g.builtin.is_some() {
                continue;
            }
            let (base, count) = g.ty.cumulative();
            match g.storage {
                Storage::Uniform if base.is_sampler() => {
                    samplers = samplers.saturating_add(count);
                    if samplers > limits.max_texture_image_units {
                        findings.push((
                            g.line,
                            format!(
                                "too many samplers: {} (max {})",
                                samplers, limits.max_texture_image_units
                            ),
                        ));
                    }
                }
                Storage::Uniform => {
                    uniform_components =
                        uniform_components.saturating_add(base.components().saturating_mul(count));
                    if uniform_components > limits.max_uniform_components {
                        findings.push((
                            g.line,
                            format!(
                                "too many uniform components: {} (max {})",
                                uniform_components, limits.max_uniform_components
                            ),
                        ));
                    }
                }
                Storage::Input => {
                    inputs = inputs.saturating_add(g.ty.location_slots());
                    if limits.max_input_locations > 0 && inputs > limits.max_input_locations {
                        findings.push((
                            g.line,
                            format!(
                                "too many {} inputs: {} locations (max {})",
                                self.stage, inputs, limits.max_input_locations
                            ),
                        ));
                    }
                }
                Storage::Output => {
                    outputs = outputs.saturating_add(g.ty.location_slots());
                    if limits.max_output_locations > 0 && outputs > limits.max_output_locations {
                        findings.push((
                            g.line,
                            format!(
                                "too many {} outputs: {} locations (max {})",
                                self.stage, outputs, limits.max_output_locations
                            ),
                        ));
                    }
                }
                Storage::Private => {}
            }
        }

        // Одно сообщение на каждый превышенный лимит.
        let mut reported: Vec<String> = Vec::new();
        for (line, message) in findings {
            let key: String = message.split(':').next().unwrap_or_default().to_string();
            if reported.contains(&key) {
                continue;
            }
            reported.push(key);
            self.log
                .report(Diagnostic::error(self.unit.file.clone(), line, message));
        }
    }
}

// === Правила типов ===

fn storage_name(q: StorageQualifier) -> &'static str {
    match q {
        StorageQualifier::Const => "const",
        StorageQualifier::Uniform => "uniform",
        StorageQualifier::In => "in",
        StorageQualifier::Out => "out",
        StorageQualifier::InOut => "inout",
        StorageQualifier::Attribute => "attribute",
        StorageQualifier::Varying => "varying",
    }
}

fn qualifier_name(q: ParamQualifier) -> &'static str {
    match q {
        ParamQualifier::In => "in",
        ParamQualifier::Out => "out",
        ParamQualifier::InOut => "inout",
    }
}

/// Неявное преобразование: целый скаляр/вектор -> float того же размера.
fn implicitly_converts(from: &Type, to: &Type) -> bool {
    from.is_integer() && to.is_float_gen() && from.vector_size() == to.vector_size()
}

/// Преобразовать целое значение во float; литералы сворачиваются сразу.
fn convert_to_float(value: Expr) -> Expr {
    if !value.ty.is_integer() {
        return value;
    }
    if let Some(c) = value.as_const() {
        return Expr::constant(c.cast(ScalarKind::Float));
    }
    match value.ty.with_kind(ScalarKind::Float) {
        Some(ty) => Expr::new(ExprKind::Construct(vec![value]), ty),
        None => value,
    }
}

/// Привести операнды к общему виду, если один из них float.
fn unify(lhs: Expr, rhs: Expr) -> (Expr, Expr) {
    let is_float = |t: &Type| t.scalar_kind() == Some(ScalarKind::Float);
    if is_float(&lhs.ty) && rhs.ty.is_integer() {
        (lhs, convert_to_float(rhs))
    } else if lhs.ty.is_integer() && is_float(&rhs.ty) {
        (convert_to_float(lhs), rhs)
    } else {
        (lhs, rhs)
    }
}

/// Тип результата бинарной операции над уже приведёнными операндами.
pub fn binary_type(op: BinaryOp, l: &Type, r: &Type) -> Option<Type> {
    use BinaryOp::*;
    match op {
        LogicalAnd | LogicalOr | LogicalXor => {
            (*l == Type::BOOL && *r == Type::BOOL).then_some(Type::BOOL)
        }
        Eq | Ne => {
            let opaque = l.cumulative().0.is_sampler() || l.is_void();
            (l == r && !opaque).then_some(Type::BOOL)
        }
        Lt | Le | Gt | Ge => (l == r && l.is_scalar() && l.is_numeric()).then_some(Type::BOOL),
        Shl | Shr => {
            let shape_ok = r.is_scalar() || r.vector_size() == l.vector_size();
            (l.is_integer() && r.is_integer() && shape_ok).then(|| l.clone())
        }
        Mod | BitAnd | BitOr | BitXor => {
            if !l.is_integer() || !r.is_integer() || l.scalar_kind() != r.scalar_kind() {
                return None;
            }
            if l == r || r.is_scalar() {
                Some(l.clone())
            } else if l.is_scalar() {
                Some(r.clone())
            } else {
                None
            }
        }
        Add | Sub | Mul | Div => {
            if !l.is_numeric() || !r.is_numeric() || l.scalar_kind() != r.scalar_kind() {
                return None;
            }
            if op == Mul {
                match (l, r) {
                    (
                        Type::Matrix {
                            columns: c1,
                            rows: r1,
                        },
                        Type::Matrix {
                            columns: c2,
                            rows: r2,
                        },
                    ) => {
                        return (c1 == r2).then_some(Type::Matrix {
                            columns: *c2,
                            rows: *r1,
                        })
                    }
                    (Type::Matrix { columns, rows }, Type::Vector(_, n)) => {
                        return (n == columns).then(|| Type::vec(*rows))
                    }
                    (Type::Vector(_, n), Type::Matrix { columns, rows }) => {
                        return (n == rows).then(|| Type::vec(*columns))
                    }
                    _ => {}
                }
            }
            if l == r {
                Some(l.clone())
            } else if l.is_scalar() {
                Some(r.clone())
            } else if r.is_scalar() {
                Some(l.clone())
            } else {
                None
            }
        }
    }
}

/// Проверить аргументы конструктора типа `ty`.
fn construct(ty: Type, args: Vec<Expr>, span: Span) -> Checked<Expr> {
    if ty.is_void() || ty.is_sampler() {
        return fail(span, format!("'{}' : cannot construct this type", ty));
    }
    if args.is_empty() {
        return fail(span, format!("'{}' : constructor does not have any arguments", ty));
    }
    if let Some(bad) = args.iter().find(|a| a.ty.components() == 0) {
        return fail(
            span,
            format!("'{}' : cannot convert a '{}' in a constructor", ty, bad.ty),
        );
    }

    match &ty {
        Type::Scalar(_) => {
            if args.len() > 1 {
                return fail(span, format!("'{}' : too many arguments", ty));
            }
        }
        Type::Vector(_, n) => {
            let single_scalar = args.len() == 1 && args[0].ty.is_scalar();
            if !single_scalar {
                components_fit(&ty, &args, u32::from(*n), false, span)?;
            }
        }
        Type::Matrix { columns, rows } => {
            let single = args.len() == 1 && (args[0].ty.is_scalar() || args[0].ty.is_matrix());
            if !single {
                if args.iter().any(|a| a.ty.is_matrix()) {
                    return fail(
                        span,
                        format!("'{}' : matrix constructed from matrix can only have one argument", ty),
                    );
                }
                components_fit(&ty, &args, u32::from(*columns) * u32::from(*rows), true, span)?;
            }
        }
        _ => return fail(span, format!("'{}' : cannot construct this type", ty)),
    }
    Ok(Expr::new(ExprKind::Construct(args), ty))
}

fn components_fit(ty: &Type, args: &[Expr], needed: u32, exact: bool, span: Span) -> Checked<()> {
    let mut total = 0u32;
    for arg in args {
        if total >= needed {
            return fail(span, format!("'{}' : too many arguments", ty));
        }
        total += arg.ty.components();
    }
    if total < needed {
        return fail(
            span,
            format!("'{}' : not enough data provided for construction", ty),
        );
    }
    if exact && total > needed {
        return fail(span, format!("'{}' : too many arguments", ty));
    }
    Ok(())
}

const SWIZZLE_SETS: [&[u8; 4]; 3] = [b"xyzw", b"rgba", b"stpq"];

/// Разобрать выборку компонентов вектора.
fn swizzle(base: Expr, field: &str, span: Span) -> Checked<Expr> {
    let Type::Vector(kind, size) = base.ty else {
        return fail(
            span,
            format!(
                "'{}' : field selection requires structure or vector on left hand side",
                field
            ),
        );
    };
    let bytes = field.as_bytes();
    let set = bytes
        .first()
        .and_then(|c| SWIZZLE_SETS.iter().find(|set| set.contains(c)));
    let Some(set) = set else {
        return fail(span, format!("'{}' : illegal vector field selection", field));
    };
    if bytes.len() > 4 {
        return fail(span, format!("'{}' : illegal vector field selection", field));
    }

    let mut components = Vec::with_capacity(bytes.len());
    for c in bytes {
        let Some(index) = set.iter().position(|s| s == c) else {
            return fail(span, format!("'{}' : illegal vector field selection", field));
        };
        if index >= usize::from(size) {
            return fail(span, format!("'{}' : vector field selection out of range", field));
        }
        components.push(index as u8);
    }

    let ty = Type::scalar_or_vector(kind, components.len() as u8);
    Ok(Expr::new(
        ExprKind::Swizzle {
            base: Box::new(base),
            components,
        },
        ty,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShaderError;
    use crate::includer::MemoryIncluder;

    fn check(stage: Stage, src: &str) -> ShaderResult<ParsedProgram> {
        let unit = SourceUnit::new(stage, "test.glsl", src);
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        parse_program(&unit, &mut includer, &mut log)
    }

    fn error_of(stage: Stage, src: &str) -> String {
        match check(stage, src) {
            Err(ShaderError::Parse(e)) => e.to_string(),
            Err(other) => panic!("unexpected error kind: {}", other),
            Ok(_) => panic!("expected a validation error for:\n{}", src),
        }
    }

    #[test]
    fn test_uniforms_in_declaration_order() {
        let parsed = check(
            Stage::Fragment,
            "uniform vec4 u_tint; uniform sampler2D s_albedo; void main(){}",
        )
        .unwrap();
        let names: Vec<&str> = parsed.program.uniforms().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["u_tint", "s_albedo"]);
        assert!(parsed.program.entry_point().is_some());
    }

    #[test]
    fn test_undeclared_identifier_reports_line() {
        let err = error_of(Stage::Fragment, "void main() {\n  float a = 1.0;\n  a = b;\n}\n");
        assert_eq!(err, "ERROR: test.glsl:3: 'b' : undeclared identifier");
    }

    #[test]
    fn test_redefinition() {
        let err = error_of(Stage::Vertex, "uniform float x;\nfloat x;\nvoid main(){}");
        assert!(err.contains("'x' : redefinition"), "{}", err);
    }

    #[test]
    fn test_write_to_uniform_is_error() {
        let err = error_of(Stage::Fragment, "uniform vec4 u;\nvoid main(){ u = vec4(1.0); }");
        assert!(err.contains("can't modify a uniform"), "{}", err);
    }

    #[test]
    fn test_duplicate_swizzle_lvalue() {
        let err = error_of(Stage::Fragment, "void main(){ vec4 v; v.xx = vec2(1.0); }");
        assert!(err.contains("not unique for l-value"), "{}", err);
    }

    #[test]
    fn test_break_outside_loop() {
        let err = error_of(Stage::Fragment, "void main(){ break; }");
        assert!(err.contains("'break'"), "{}", err);
        assert!(check(Stage::Fragment, "void main(){ for (int i = 0; i < 4; i++) { if (i == 2) break; } }").is_ok());
    }

    #[test]
    fn test_discard_only_in_fragment() {
        let err = error_of(Stage::Vertex, "void main(){ discard; }");
        assert!(err.contains("not supported in this stage: vertex"), "{}", err);
        assert!(check(Stage::Fragment, "void main(){ discard; }").is_ok());
    }

    #[test]
    fn test_derivative_only_in_fragment() {
        let err = error_of(Stage::Vertex, "void main(){ float d = dFdx(1.0); }");
        assert!(err.contains("only supported in fragment shaders"), "{}", err);
    }

    #[test]
    fn test_main_signature() {
        let err = error_of(Stage::Fragment, "int main(){ return 0; }");
        assert!(err.contains("cannot return a value"), "{}", err);
        let err = error_of(Stage::Fragment, "void main(float x){}");
        assert!(err.contains("cannot take any parameter"), "{}", err);
    }

    #[test]
    fn test_array_size_must_be_positive_constant() {
        let err = error_of(Stage::Fragment, "uniform vec4 a[0];\nvoid main(){}");
        assert!(err.contains("array size"), "{}", err);
        let err = error_of(Stage::Fragment, "uniform int n;\nuniform vec4 a[n];\nvoid main(){}");
        assert!(err.contains("array size"), "{}", err);

        let parsed = check(
            Stage::Fragment,
            "const int N = 2 * 3;\nuniform vec4 a[N][2];\nvoid main(){}",
        )
        .unwrap();
        let a = parsed.program.global("a").unwrap();
        assert_eq!(a.ty.cumulative().1, 12);
    }

    #[test]
    fn test_constructor_arity() {
        let err = error_of(Stage::Fragment, "void main(){ vec4 v = vec4(1.0, 2.0); }");
        assert!(err.contains("not enough data"), "{}", err);
        let err = error_of(Stage::Fragment, "void main(){ vec2 v = vec2(1.0, 2.0, 3.0); }");
        assert!(err.contains("too many arguments"), "{}", err);
        assert!(check(Stage::Fragment, "void main(){ vec4 v = vec4(vec3(1.0), 1.0); mat3 m = mat3(1.0); }").is_ok());
    }

    #[test]
    fn test_implicit_int_to_float() {
        let parsed = check(
            Stage::Fragment,
            "float f(float x) { return x * 2; }\nvoid main(){ float a = 1; a += 2; float b = f(3); }",
        )
        .unwrap();
        assert!(parsed.program.function("f(float)").is_some());
    }

    #[test]
    fn test_overload_resolution() {
        let src = "float f(float x) { return x; }\nint f(int x) { return x; }\nvoid main(){ float a = f(1.0); int b = f(2); }";
        let parsed = check(Stage::Fragment, src).unwrap();
        let main = parsed.program.entry_point().unwrap();
        let callees = Program::callees(main);
        assert_eq!(callees, ["f(float)", "f(int)"]);

        let err = error_of(Stage::Fragment, "void g(vec2 v) {}\nvoid main(){ g(1.0); }");
        assert!(err.contains("no matching overloaded function"), "{}", err);
    }

    #[test]
    fn test_out_argument_requires_lvalue() {
        let err = error_of(
            Stage::Fragment,
            "void g(out float v) { v = 1.0; }\nvoid main(){ g(2.0); }",
        );
        assert!(err.contains("'out' : l-value required"), "{}", err);
    }

    #[test]
    fn test_invalid_swizzle() {
        let err = error_of(Stage::Fragment, "void main(){ vec2 v; float z = v.z; }");
        assert!(err.contains("out of range"), "{}", err);
        let err = error_of(Stage::Fragment, "void main(){ vec4 v; vec2 z = v.xg; }");
        assert!(err.contains("illegal vector field selection"), "{}", err);
    }

    #[test]
    fn test_matrix_vector_multiply_types() {
        assert_eq!(
            binary_type(BinaryOp::Mul, &Type::mat(4), &Type::vec(4)),
            Some(Type::vec(4))
        );
        assert_eq!(
            binary_type(BinaryOp::Mul, &Type::vec(3), &Type::mat(3)),
            Some(Type::vec(3))
        );
        assert_eq!(binary_type(BinaryOp::Mul, &Type::mat(4), &Type::vec(3)), None);
        assert_eq!(
            binary_type(BinaryOp::Add, &Type::FLOAT, &Type::vec(2)),
            Some(Type::vec(2))
        );
        assert_eq!(binary_type(BinaryOp::BitAnd, &Type::FLOAT, &Type::FLOAT), None);
    }

    #[test]
    fn test_builtin_variables_registered() {
        let parsed = check(
            Stage::Vertex,
            "attribute vec4 a_position;\nvoid main(){ gl_Position = a_position; }",
        )
        .unwrap();
        let position = parsed.program.global("gl_Position").unwrap();
        assert_eq!(position.builtin, Some(BuiltinVar::Position));
        assert_eq!(position.storage, Storage::Output);
        let input = parsed.program.global("a_position").unwrap();
        assert_eq!(input.storage, Storage::Input);
    }

    #[test]
    fn test_builtin_from_other_stage_is_undeclared() {
        let err = error_of(Stage::Vertex, "void main(){ gl_FragColor = vec4(1.0); }");
        assert!(err.contains("'gl_FragColor' : undeclared identifier"), "{}", err);
    }

    #[test]
    fn test_shader_input_is_read_only() {
        let err = error_of(Stage::Fragment, "varying vec2 v_uv;\nvoid main(){ v_uv = vec2(0.0); }");
        assert!(err.contains("can't modify shader input"), "{}", err);
    }

    #[test]
    fn test_compute_local_size() {
        let parsed = check(
            Stage::Compute,
            "#version 310 es\nlayout(local_size_x = 8, local_size_y = 4) in;\nvoid main(){}",
        )
        .unwrap();
        assert_eq!(parsed.program.local_size, Some([8, 4, 1]));

        let err = error_of(Stage::Fragment, "layout(local_size_x = 8) in;\nvoid main(){}");
        assert!(err.contains("only valid in compute shaders"), "{}", err);

        let parsed = check(Stage::Compute, "void main(){}").unwrap();
        assert_eq!(parsed.program.local_size, Some([1, 1, 1]));
    }

    #[test]
    fn test_too_many_samplers() {
        let err = error_of(Stage::Fragment, "uniform sampler2D s[64];\nvoid main(){}");
        assert!(err.contains("too many samplers"), "{}", err);
    }

    #[test]
    fn test_all_errors_are_logged() {
        let unit = SourceUnit::new(
            Stage::Fragment,
            "multi.frag",
            "void main() {\n  a = 1.0;\n  b = 2.0;\n}\n",
        );
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        let result = parse_program(&unit, &mut includer, &mut log);
        assert!(result.is_err());
        let errors: Vec<u32> = log
            .entries()
            .iter()
            .filter(|d| d.severity.is_error())
            .map(|d| d.line)
            .collect();
        assert_eq!(errors, [2, 3]);
    }

    #[test]
    fn test_const_folding_and_layout() {
        let parsed = check(
            Stage::Fragment,
            "#version 300 es\nconst float K = 0.5 * 4.0;\nlayout(location = 2) out vec4 o_color;\nvoid main(){ o_color = vec4(K); }",
        )
        .unwrap();
        let out = parsed.program.global("o_color").unwrap();
        assert_eq!(out.location, Some(2));
        assert!(parsed.program.global("K").is_none());
    }

    #[test]
    fn test_deprecated_qualifier_warns() {
        let unit = SourceUnit::new(
            Stage::Vertex,
            "old.vert",
            "#version 330\nattribute vec4 a;\nvoid main(){ gl_Position = a; }",
        );
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        let parsed = parse_program(&unit, &mut includer, &mut log).unwrap();
        assert!(!parsed.log.has_errors());
        assert!(log.entries().iter().any(|d| d.message.contains("deprecated")));
    }
}
