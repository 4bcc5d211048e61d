//! Понижение скомпонованной программы в байткод.
//!
//! Трансляция прямая, без оптимизаций: каждая переменная получает
//! `Variable`, каждое чтение: `Load`, каждая запись: `Store`.
//! Структура управления сохраняется (`If`/`Loop`), чтобы эмиттер мог
//! восстановить исходную форму. Готовый модуль проверяется валидатором;
//! невалидный модуль наружу не выходит.

use std::collections::{HashMap, HashSet};

use crate::bytecode::{Decoration, Header, Instruction, Module, Opcode, ParamMode, StorageClass};
use crate::error::{ShaderError, ShaderResult};
use crate::ir::{Expr, ExprKind, Function, GlobalVar, LoopKind, Program, Stmt, Storage, VarRef};
use crate::linker::LinkedProgram;
use crate::ops::{BinaryOp, UnaryOp};
use crate::optimizer::validate;
use crate::parser::ast::{Interpolation, ParamQualifier};
use crate::types::{ConstValue, ScalarKind, Type};

type Lowered<T> = Result<T, String>;

/// Понизить программу в модуль байткода.
pub fn lower(linked: &LinkedProgram) -> ShaderResult<Module> {
    let program = &linked.program;
    let module = Lowering::new(program)
        .run()
        .map_err(ShaderError::Lowering)?;

    if let Some(finding) = validate::validate(&module).first() {
        return Err(ShaderError::Lowering(format!(
            "produced invalid bytecode: {}",
            finding
        )));
    }

    log::debug!(
        "lowered {} ({}) to {} words",
        program.file,
        program.stage,
        module.len()
    );
    Ok(module)
}

/// Адресуемое место записи.
#[derive(Debug, Clone)]
enum Place {
    Pointer {
        ptr: u32,
        ty: Type,
        storage: StorageClass,
    },
    /// Запись через swizzle: покомпонентно.
    Swizzled {
        ptr: u32,
        base: Type,
        storage: StorageClass,
        components: Vec<u8>,
    },
}

/// Состояние текущей функции.
#[derive(Default)]
struct Frame<'a> {
    function: Option<&'a Function>,
    params: Vec<u32>,
    locals: Vec<Option<u32>>,
}

struct Lowering<'a> {
    program: &'a Program,
    next_id: u32,

    names: Vec<Instruction>,
    decorations: Vec<Instruction>,
    /// Типы, константы и глобальные переменные.
    declarations: Vec<Instruction>,
    code: Vec<Instruction>,

    types: HashMap<Type, u32>,
    pointers: HashMap<(StorageClass, u32), u32>,
    signatures: HashMap<Vec<u32>, u32>,
    constants: HashMap<(ScalarKind, u32), u32>,
    globals: HashMap<String, (u32, StorageClass)>,
    functions: HashMap<String, u32>,

    frame: Frame<'a>,
}

impl<'a> Lowering<'a> {
    fn new(program: &'a Program) -> Self {
        Self {
            program,
            next_id: 1,
            names: Vec::new(),
            decorations: Vec::new(),
            declarations: Vec::new(),
            code: Vec::new(),
            types: HashMap::new(),
            pointers: HashMap::new(),
            signatures: HashMap::new(),
            constants: HashMap::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
            frame: Frame::default(),
        }
    }

    fn run(mut self) -> Lowered<Module> {
        let program = self.program;
        let Some(entry) = program.entry_point() else {
            return Err("program has no entry point".to_string());
        };

        let order = function_order(program, entry);
        for function in &order {
            let id = self.fresh();
            self.functions.insert(function.mangled.clone(), id);
            self.name(id, &function.name);
        }
        for global in &program.globals {
            self.global(global);
        }
        for &function in &order {
            self.function(function)?;
        }

        let entry_id = self.function_id(&entry.mangled)?;
        let mut out = vec![
            Instruction::new(Opcode::Source, vec![program.version, program.es as u32]),
            Instruction::new(Opcode::EntryPoint, vec![entry_id]),
        ];
        if let Some([x, y, z]) = program.local_size {
            out.push(Instruction::new(Opcode::LocalSize, vec![x, y, z]));
        }
        out.append(&mut self.names);
        out.append(&mut self.decorations);
        out.append(&mut self.declarations);
        out.append(&mut self.code);

        let header = Header::new(program.stage, self.next_id);
        Module::assemble(&header, &out).map_err(|e| e.to_string())
    }

    fn fresh(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn name(&mut self, target: u32, text: &str) {
        if !text.is_empty() {
            self.names.push(Instruction::name(target, text));
        }
    }

    fn decorate(&mut self, target: u32, decoration: Decoration, value: u32) {
        self.decorations.push(Instruction::new(
            Opcode::Decorate,
            vec![target, decoration as u32, value],
        ));
    }

    fn function_id(&self, mangled: &str) -> Lowered<u32> {
        self.functions
            .get(mangled)
            .copied()
            .ok_or_else(|| format!("no definition for function '{}'", mangled))
    }

    // === Типы и константы ===

    fn type_id(&mut self, ty: &Type) -> u32 {
        if let Some(id) = self.types.get(ty) {
            return *id;
        }
        let (opcode, operands) = match ty {
            Type::Void => (Opcode::TypeVoid, vec![]),
            Type::Scalar(ScalarKind::Bool) => (Opcode::TypeBool, vec![]),
            Type::Scalar(ScalarKind::Int) => (Opcode::TypeInt, vec![1]),
            Type::Scalar(ScalarKind::Uint) => (Opcode::TypeInt, vec![0]),
            Type::Scalar(ScalarKind::Float) => (Opcode::TypeFloat, vec![]),
            Type::Vector(kind, size) => {
                let component = self.type_id(&Type::Scalar(*kind));
                (Opcode::TypeVector, vec![component, *size as u32])
            }
            Type::Matrix { columns, rows } => {
                let column = self.type_id(&Type::vec(*rows));
                (Opcode::TypeMatrix, vec![column, *columns as u32])
            }
            Type::Sampler(sampler) => (
                Opcode::TypeSampler,
                vec![
                    sampler.dim.code(),
                    sampler.shadow as u32,
                    sampler.kind.code(),
                ],
            ),
            Type::Array(element, length) => {
                let element = self.type_id(element);
                (Opcode::TypeArray, vec![element, *length])
            }
        };
        let id = self.fresh();
        let mut words = vec![id];
        words.extend(operands);
        self.declarations.push(Instruction::new(opcode, words));
        self.types.insert(ty.clone(), id);
        id
    }

    fn pointer_type(&mut self, storage: StorageClass, pointee: u32) -> u32 {
        if let Some(id) = self.pointers.get(&(storage, pointee)) {
            return *id;
        }
        let id = self.fresh();
        self.declarations.push(Instruction::new(
            Opcode::TypePointer,
            vec![id, storage as u32, pointee],
        ));
        self.pointers.insert((storage, pointee), id);
        id
    }

    fn function_type(&mut self, signature: Vec<u32>) -> u32 {
        if let Some(id) = self.signatures.get(&signature) {
            return *id;
        }
        let id = self.fresh();
        let mut words = vec![id];
        words.extend(&signature);
        self.declarations
            .push(Instruction::new(Opcode::TypeFunction, words));
        self.signatures.insert(signature, id);
        id
    }

    fn constant(&mut self, value: ConstValue) -> u32 {
        let key = (value.kind(), value.to_bits());
        if let Some(id) = self.constants.get(&key) {
            return *id;
        }
        let ty = self.type_id(&value.ty());
        let id = self.fresh();
        self.declarations.push(Instruction::new(
            Opcode::Constant,
            vec![ty, id, value.to_bits()],
        ));
        self.constants.insert(key, id);
        id
    }

    // === Глобальные переменные ===

    fn global(&mut self, global: &GlobalVar) {
        let storage = storage_class(global.storage);
        let ty = self.type_id(&global.ty);
        let ptr = self.pointer_type(storage, ty);
        let id = self.fresh();
        self.declarations.push(Instruction::new(
            Opcode::Variable,
            vec![ptr, id, storage as u32],
        ));
        self.name(id, &global.name);

        if let Some(location) = global.location {
            self.decorate(id, Decoration::Location, location);
        }
        if let Some(binding) = global.binding {
            self.decorate(id, Decoration::Binding, binding);
        }
        if let Some(builtin) = global.builtin {
            self.decorate(id, Decoration::BuiltIn, builtin.code());
        }
        if let Some(interpolation) = global.interpolation {
            self.decorate(id, Decoration::Interpolation, interpolation_code(interpolation));
        }
        if global.invariant {
            self.decorate(id, Decoration::Invariant, 1);
        }
        self.globals.insert(global.name.clone(), (id, storage));
    }

    /// Инициализаторы глобальных переменных: в начале `main`.
    fn global_initializers(&mut self) -> Lowered<()> {
        let program = self.program;
        for global in program.globals.iter().filter(|g| g.builtin.is_none()) {
            let Some(init) = &global.init else {
                continue;
            };
            let (ptr, storage) = self.variable(&VarRef::Global(global.name.clone()))?;
            let value = self.expr(init)?;
            let place = Place::Pointer {
                ptr,
                ty: global.ty.clone(),
                storage,
            };
            self.store(&place, value)?;
        }
        Ok(())
    }

    // === Функции ===

    fn function(&mut self, function: &'a Function) -> Lowered<()> {
        let Some(body) = &function.body else {
            return Ok(());
        };
        let id = self.function_id(&function.mangled)?;
        let return_type = self.type_id(&function.return_type);

        let mut param_types = Vec::with_capacity(function.params.len());
        for param in &function.params {
            let ty = self.type_id(&param.ty);
            param_types.push(self.pointer_type(StorageClass::Function, ty));
        }
        let mut signature = vec![return_type];
        signature.extend(&param_types);
        let function_type = self.function_type(signature);

        self.code.push(Instruction::new(
            Opcode::Function,
            vec![return_type, id, function_type],
        ));

        self.frame = Frame {
            function: Some(function),
            params: Vec::with_capacity(function.params.len()),
            locals: vec![None; function.locals.len()],
        };
        for (param, ptr_type) in function.params.iter().zip(param_types) {
            let param_id = self.fresh();
            let mode = match param.qualifier {
                ParamQualifier::In if param.read_only => ParamMode::ConstIn,
                ParamQualifier::In => ParamMode::In,
                ParamQualifier::Out => ParamMode::Out,
                ParamQualifier::InOut => ParamMode::InOut,
            };
            self.code.push(Instruction::new(
                Opcode::FunctionParameter,
                vec![ptr_type, param_id, mode as u32],
            ));
            self.name(param_id, &param.name);
            self.frame.params.push(param_id);
        }

        if function.is_entry_point() {
            self.global_initializers()?;
        }
        self.block(body)?;

        let terminated = self
            .code
            .last()
            .map_or(false, |inst| inst.opcode.is_terminator());
        if !terminated && function.return_type.is_void() {
            self.code.push(Instruction::new(Opcode::Return, vec![]));
        }
        self.code.push(Instruction::new(Opcode::FunctionEnd, vec![]));
        self.frame = Frame::default();
        Ok(())
    }

    fn variable(&self, var: &VarRef) -> Lowered<(u32, StorageClass)> {
        match var {
            VarRef::Global(name) => self
                .globals
                .get(name)
                .copied()
                .ok_or_else(|| format!("'{}' : unknown global variable", name)),
            VarRef::Local(index) => self
                .frame
                .locals
                .get(*index as usize)
                .copied()
                .flatten()
                .map(|id| (id, StorageClass::Function))
                .ok_or_else(|| format!("local #{} used before its declaration", index)),
            VarRef::Param(index) => self
                .frame
                .params
                .get(*index as usize)
                .map(|id| (*id, StorageClass::Function))
                .ok_or_else(|| format!("unknown parameter #{}", index)),
        }
    }

    /// Безымянная локальная переменная.
    fn temporary(&mut self, ty: &Type) -> u32 {
        let ty = self.type_id(ty);
        let ptr = self.pointer_type(StorageClass::Function, ty);
        let id = self.fresh();
        self.code.push(Instruction::new(
            Opcode::Variable,
            vec![ptr, id, StorageClass::Function as u32],
        ));
        id
    }

    // === Операторы ===

    fn block(&mut self, stmts: &[Stmt]) -> Lowered<()> {
        for stmt in stmts {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Stmt) -> Lowered<()> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.statement_inner(stmt))
    }

    fn statement_inner(&mut self, stmt: &Stmt) -> Lowered<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.expr(expr)?;
            }
            Stmt::Declare { local, init } => self.declare(*local, init.as_ref())?,
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.expr(cond)?;
                self.emit(Opcode::If, vec![cond]);
                self.block(then_branch)?;
                if !else_branch.is_empty() {
                    self.emit(Opcode::Else, vec![]);
                    self.block(else_branch)?;
                }
                self.emit(Opcode::EndIf, vec![]);
            }
            Stmt::Loop {
                kind: LoopKind::HeadTested,
                cond,
                step,
                body,
            } => {
                self.emit(Opcode::Loop, vec![0]);
                if let Some(cond) = cond {
                    let cond = self.expr(cond)?;
                    self.emit(Opcode::LoopCondition, vec![cond]);
                }
                self.block(body)?;
                self.emit(Opcode::LoopContinue, vec![]);
                if let Some(step) = step {
                    self.expr(step)?;
                }
                self.emit(Opcode::EndLoop, vec![]);
            }
            Stmt::Loop {
                kind: LoopKind::TailTested,
                cond,
                body,
                ..
            } => {
                let Some(cond) = cond else {
                    return Err("do-while loop without a condition".to_string());
                };
                self.emit(Opcode::Loop, vec![1]);
                self.block(body)?;
                self.emit(Opcode::LoopContinue, vec![]);
                let cond = self.expr(cond)?;
                self.emit(Opcode::LoopCondition, vec![cond]);
                self.emit(Opcode::EndLoop, vec![]);
            }
            Stmt::Break => self.emit(Opcode::Break, vec![]),
            Stmt::Continue => self.emit(Opcode::Continue, vec![]),
            Stmt::Return(None) => self.emit(Opcode::Return, vec![]),
            Stmt::Return(Some(value)) => {
                let value = self.expr(value)?;
                self.emit(Opcode::ReturnValue, vec![value]);
            }
            Stmt::Discard => self.emit(Opcode::Kill, vec![]),
            Stmt::Block(stmts) => self.block(stmts)?,
        }
        Ok(())
    }

    fn declare(&mut self, local: u32, init: Option<&Expr>) -> Lowered<()> {
        let Some(decl) = self
            .frame
            .function
            .and_then(|f| f.locals.get(local as usize))
        else {
            return Err(format!("unknown local #{}", local));
        };
        let ty = self.type_id(&decl.ty);
        let ptr = self.pointer_type(StorageClass::Function, ty);
        let id = self.fresh();
        self.code.push(Instruction::new(
            Opcode::Variable,
            vec![ptr, id, StorageClass::Function as u32],
        ));
        self.name(id, &decl.name);
        if let Some(slot) = self.frame.locals.get_mut(local as usize) {
            *slot = Some(id);
        }

        if let Some(init) = init {
            let value = self.expr(init)?;
            self.emit(Opcode::Store, vec![id, value]);
        }
        Ok(())
    }

    fn emit(&mut self, opcode: Opcode, operands: Vec<u32>) {
        self.code.push(Instruction::new(opcode, operands));
    }

    /// Инструкция с результатом типа `ty`; возвращает новый идентификатор.
    fn value(&mut self, opcode: Opcode, ty: &Type, operands: Vec<u32>) -> u32 {
        let ty = self.type_id(ty);
        let id = self.fresh();
        let mut words = vec![ty, id];
        words.extend(operands);
        self.code.push(Instruction::new(opcode, words));
        id
    }

    // === Выражения ===

    fn expr(&mut self, expr: &Expr) -> Lowered<u32> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.expr_inner(expr))
    }

    fn exprs(&mut self, exprs: &[Expr]) -> Lowered<Vec<u32>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn expr_inner(&mut self, expr: &Expr) -> Lowered<u32> {
        match &expr.kind {
            ExprKind::Const(value) => Ok(self.constant(*value)),
            ExprKind::Var(_) => {
                let place = self.place(expr)?;
                self.load(&place)
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, &expr.ty),
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                Ok(self.value(Opcode::Unary, &expr.ty, vec![op.code(), operand]))
            }
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value),
            ExprKind::IncDec {
                increment,
                prefix,
                target,
            } => self.inc_dec(*increment, *prefix, target),
            ExprKind::Select {
                cond,
                then_expr,
                else_expr,
            } => self.select(cond, then_expr, else_expr, &expr.ty),
            ExprKind::Construct(args) => {
                let args = self.exprs(args)?;
                Ok(self.value(Opcode::Construct, &expr.ty, args))
            }
            ExprKind::Call { function, args } => self.call(function, args, &expr.ty),
            ExprKind::Builtin { func, args } => {
                let mut operands = vec![func.code()];
                operands.extend(self.exprs(args)?);
                Ok(self.value(Opcode::Builtin, &expr.ty, operands))
            }
            ExprKind::Swizzle { base, components } => {
                let base = self.expr(base)?;
                let mut operands = vec![base];
                operands.extend(components.iter().map(|c| *c as u32));
                Ok(self.value(Opcode::Swizzle, &expr.ty, operands))
            }
            ExprKind::Index { base, index } => {
                if is_pointer_chain(expr) {
                    let place = self.place(expr)?;
                    self.load(&place)
                } else {
                    let base = self.expr(base)?;
                    let index = self.expr(index)?;
                    Ok(self.value(Opcode::Extract, &expr.ty, vec![base, index]))
                }
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, ty: &Type) -> Lowered<u32> {
        let short_circuit = matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr);
        if !(short_circuit && rhs.has_side_effects()) {
            let lhs = self.expr(lhs)?;
            let rhs = self.expr(rhs)?;
            return Ok(self.value(Opcode::Binary, ty, vec![op.code(), lhs, rhs]));
        }

        // Правая часть вычисляется только когда результат ещё не известен.
        let tmp = self.temporary(&Type::BOOL);
        let lhs = self.expr(lhs)?;
        self.emit(Opcode::Store, vec![tmp, lhs]);
        let cond = if op == BinaryOp::LogicalAnd {
            lhs
        } else {
            self.value(Opcode::Unary, &Type::BOOL, vec![UnaryOp::Not.code(), lhs])
        };
        self.emit(Opcode::If, vec![cond]);
        let rhs = self.expr(rhs)?;
        self.emit(Opcode::Store, vec![tmp, rhs]);
        self.emit(Opcode::EndIf, vec![]);
        Ok(self.value(Opcode::Load, &Type::BOOL, vec![tmp]))
    }

    fn select(&mut self, cond: &Expr, then_expr: &Expr, else_expr: &Expr, ty: &Type) -> Lowered<u32> {
        if !then_expr.has_side_effects() && !else_expr.has_side_effects() {
            let cond = self.expr(cond)?;
            let a = self.expr(then_expr)?;
            let b = self.expr(else_expr)?;
            return Ok(self.value(Opcode::Select, ty, vec![cond, a, b]));
        }

        let tmp = self.temporary(ty);
        let cond = self.expr(cond)?;
        self.emit(Opcode::If, vec![cond]);
        let a = self.expr(then_expr)?;
        self.emit(Opcode::Store, vec![tmp, a]);
        self.emit(Opcode::Else, vec![]);
        let b = self.expr(else_expr)?;
        self.emit(Opcode::Store, vec![tmp, b]);
        self.emit(Opcode::EndIf, vec![]);
        Ok(self.value(Opcode::Load, ty, vec![tmp]))
    }

    fn assign(&mut self, op: Option<BinaryOp>, target: &Expr, value: &Expr) -> Lowered<u32> {
        let place = self.place(target)?;
        let mut value = self.expr(value)?;
        if let Some(op) = op {
            let current = self.load(&place)?;
            value = self.value(Opcode::Binary, &target.ty, vec![op.code(), current, value]);
        }
        self.store(&place, value)?;
        Ok(value)
    }

    fn inc_dec(&mut self, increment: bool, prefix: bool, target: &Expr) -> Lowered<u32> {
        let Some(kind) = target.ty.scalar_kind() else {
            return Err(format!("cannot increment a value of type '{}'", target.ty));
        };
        let place = self.place(target)?;
        let old = self.load(&place)?;
        let one = self.constant(ConstValue::Int(1).cast(kind));
        let op = if increment { BinaryOp::Add } else { BinaryOp::Sub };
        let new = self.value(Opcode::Binary, &target.ty, vec![op.code(), old, one]);
        self.store(&place, new)?;
        Ok(if prefix { new } else { old })
    }

    fn call(&mut self, mangled: &str, args: &[Expr], ty: &Type) -> Lowered<u32> {
        let program = self.program;
        let Some(callee) = program.function(mangled) else {
            return Err(format!("call to undeclared function '{}'", mangled));
        };
        let mut operands = vec![self.function_id(mangled)?];
        let mut write_back = Vec::new();

        for (param, arg) in callee.params.iter().zip(args) {
            if param.qualifier == ParamQualifier::In {
                operands.push(self.expr(arg)?);
                continue;
            }
            match self.place(arg)? {
                Place::Pointer { ptr, .. } => operands.push(ptr),
                place @ Place::Swizzled { .. } => {
                    // Swizzle нельзя передать по указателю: через временную.
                    let tmp = self.temporary(&arg.ty);
                    if param.qualifier == ParamQualifier::InOut {
                        let current = self.load(&place)?;
                        self.emit(Opcode::Store, vec![tmp, current]);
                    }
                    operands.push(tmp);
                    write_back.push((place, tmp, arg.ty.clone()));
                }
            }
        }

        let result = self.value(Opcode::FunctionCall, ty, operands);
        for (place, tmp, ty) in write_back {
            let value = self.value(Opcode::Load, &ty, vec![tmp]);
            self.store(&place, value)?;
        }
        Ok(result)
    }

    // === Места записи ===

    fn place(&mut self, expr: &Expr) -> Lowered<Place> {
        match &expr.kind {
            ExprKind::Var(var) => {
                let (ptr, storage) = self.variable(var)?;
                Ok(Place::Pointer {
                    ptr,
                    ty: expr.ty.clone(),
                    storage,
                })
            }
            ExprKind::Index { base, index } => match self.place(base)? {
                Place::Pointer { ptr, storage, .. } => {
                    let index = self.expr(index)?;
                    let ptr = self.access_chain(storage, &expr.ty, ptr, index);
                    Ok(Place::Pointer {
                        ptr,
                        ty: expr.ty.clone(),
                        storage,
                    })
                }
                Place::Swizzled {
                    ptr,
                    storage,
                    components,
                    ..
                } => {
                    let component = index
                        .as_const()
                        .and_then(ConstValue::as_integer)
                        .and_then(|i| usize::try_from(i).ok())
                        .and_then(|i| components.get(i).copied())
                        .ok_or("dynamic index into a swizzled l-value")?;
                    let index = self.constant(ConstValue::Int(component as i32));
                    let ptr = self.access_chain(storage, &expr.ty, ptr, index);
                    Ok(Place::Pointer {
                        ptr,
                        ty: expr.ty.clone(),
                        storage,
                    })
                }
            },
            ExprKind::Swizzle { base, components } => match self.place(base)? {
                Place::Pointer { ptr, ty, storage } => Ok(Place::Swizzled {
                    ptr,
                    base: ty,
                    storage,
                    components: components.clone(),
                }),
                Place::Swizzled {
                    ptr,
                    base,
                    storage,
                    components: outer,
                } => {
                    let components = components
                        .iter()
                        .map(|c| outer.get(*c as usize).copied())
                        .collect::<Option<Vec<u8>>>()
                        .ok_or("swizzle component out of range")?;
                    Ok(Place::Swizzled {
                        ptr,
                        base,
                        storage,
                        components,
                    })
                }
            },
            _ => Err(format!("expression of type '{}' is not an l-value", expr.ty)),
        }
    }

    fn access_chain(&mut self, storage: StorageClass, ty: &Type, base: u32, index: u32) -> u32 {
        let ty = self.type_id(ty);
        let ptr_type = self.pointer_type(storage, ty);
        let id = self.fresh();
        self.code.push(Instruction::new(
            Opcode::AccessChain,
            vec![ptr_type, id, base, index],
        ));
        id
    }

    fn load(&mut self, place: &Place) -> Lowered<u32> {
        match place {
            Place::Pointer { ptr, ty, .. } => Ok(self.value(Opcode::Load, ty, vec![*ptr])),
            Place::Swizzled {
                ptr,
                base,
                components,
                ..
            } => {
                let Some(kind) = base.scalar_kind() else {
                    return Err(format!("cannot swizzle a value of type '{}'", base));
                };
                let whole = self.value(Opcode::Load, base, vec![*ptr]);
                let ty = Type::scalar_or_vector(kind, components.len() as u8);
                let mut operands = vec![whole];
                operands.extend(components.iter().map(|c| *c as u32));
                Ok(self.value(Opcode::Swizzle, &ty, operands))
            }
        }
    }

    fn store(&mut self, place: &Place, value: u32) -> Lowered<()> {
        match place {
            Place::Pointer { ptr, .. } => {
                self.emit(Opcode::Store, vec![*ptr, value]);
                Ok(())
            }
            Place::Swizzled {
                ptr,
                base,
                storage,
                components,
            } => {
                let Some(kind) = base.scalar_kind() else {
                    return Err(format!("cannot swizzle a value of type '{}'", base));
                };
                let scalar = Type::Scalar(kind);
                for (i, component) in components.iter().enumerate() {
                    let element = if components.len() == 1 {
                        value
                    } else {
                        let index = self.constant(ConstValue::Int(i as i32));
                        self.value(Opcode::Extract, &scalar, vec![value, index])
                    };
                    let index = self.constant(ConstValue::Int(*component as i32));
                    let target = self.access_chain(*storage, &scalar, *ptr, index);
                    self.emit(Opcode::Store, vec![target, element]);
                }
                Ok(())
            }
        }
    }
}

// === Вспомогательные функции ===

/// Порядок функций: вызываемые раньше вызывающих, сначала дерево `main`.
fn function_order<'a>(program: &'a Program, entry: &'a Function) -> Vec<&'a Function> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let roots = std::iter::once(entry).chain(
        program
            .functions
            .iter()
            .filter(|f| f.body.is_some() && f.mangled != entry.mangled),
    );
    for root in roots {
        visit_function(program, root, &mut visited, &mut order);
    }
    order
}

fn visit_function<'a>(
    program: &'a Program,
    function: &'a Function,
    visited: &mut HashSet<&'a str>,
    order: &mut Vec<&'a Function>,
) {
    if !visited.insert(function.mangled.as_str()) {
        return;
    }
    for callee in Program::callees(function) {
        if let Some(callee) = program
            .functions
            .iter()
            .find(|f| f.mangled == callee && f.body.is_some())
        {
            visit_function(program, callee, visited, order);
        }
    }
    order.push(function);
}

/// Цепочка индексов от переменной без swizzle.
fn is_pointer_chain(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Var(_) => true,
        ExprKind::Index { base, .. } => is_pointer_chain(base),
        _ => false,
    }
}

fn storage_class(storage: Storage) -> StorageClass {
    match storage {
        Storage::Uniform => StorageClass::Uniform,
        Storage::Input => StorageClass::Input,
        Storage::Output => StorageClass::Output,
        Storage::Private => StorageClass::Private,
    }
}

fn interpolation_code(interpolation: Interpolation) -> u32 {
    match interpolation {
        Interpolation::Flat => 0,
        Interpolation::Smooth => 1,
        Interpolation::NoPerspective => 2,
        Interpolation::Centroid => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticLog;
    use crate::includer::MemoryIncluder;
    use crate::linker::link;
    use crate::parser::SourceUnit;
    use crate::reflect::reflect;
    use crate::sema::parse_program;
    use crate::stage::Stage;

    fn lower_source(stage: Stage, src: &str) -> Vec<Instruction> {
        let unit = SourceUnit::new(stage, "lower.glsl", src);
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        let parsed = parse_program(&unit, &mut includer, &mut log).unwrap();
        let linked = link(vec![parsed], &mut log).unwrap();
        let (_, linked) = reflect(linked).unwrap();
        lower(&linked).unwrap().instructions().unwrap()
    }

    fn id_of(instructions: &[Instruction], name: &str) -> u32 {
        instructions
            .iter()
            .find(|i| i.string().as_deref() == Some(name))
            .map(|i| i.operands[0])
            .unwrap()
    }

    fn count(instructions: &[Instruction], opcode: Opcode) -> usize {
        instructions.iter().filter(|i| i.opcode == opcode).count()
    }

    #[test]
    fn test_uniform_locations_are_register_indices() {
        let code = lower_source(
            Stage::Fragment,
            "uniform vec4 u_tint; uniform sampler2D s_albedo; void main(){}",
        );
        let albedo = id_of(&code, "s_albedo");
        let location = code
            .iter()
            .find(|i| {
                i.opcode == Opcode::Decorate
                    && i.operands[0] == albedo
                    && i.operands[1] == Decoration::Location as u32
            })
            .map(|i| i.operands[2]);
        assert_eq!(location, Some(1));
        assert_eq!(code[0].opcode, Opcode::Source);
        assert_eq!(code[1].opcode, Opcode::EntryPoint);
    }

    #[test]
    fn test_callees_come_first() {
        let code = lower_source(
            Stage::Fragment,
            "float twice(float x){ return x * 2.0; }\nvoid main(){ gl_FragColor = vec4(twice(1.0)); }",
        );
        let first = code.iter().find(|i| i.opcode == Opcode::Function).unwrap();
        assert_eq!(first.result(), Some(id_of(&code, "twice")));
        assert_eq!(count(&code, Opcode::FunctionEnd), 2);
        assert_eq!(count(&code, Opcode::FunctionCall), 1);
    }

    #[test]
    fn test_swizzle_store_is_per_component() {
        let code = lower_source(
            Stage::Fragment,
            "void main(){ vec4 c = vec4(0.0); c.xz = vec2(1.0, 2.0); gl_FragColor = c; }",
        );
        assert_eq!(count(&code, Opcode::AccessChain), 2);
        assert_eq!(count(&code, Opcode::Extract), 2);
    }

    #[test]
    fn test_do_while_layout() {
        let code = lower_source(
            Stage::Fragment,
            "void main(){ int i = 0; do { i++; } while (i < 4); }",
        );
        let ops: Vec<Opcode> = code.iter().map(|i| i.opcode).collect();
        let start = ops.iter().position(|op| *op == Opcode::Loop).unwrap();
        assert_eq!(code[start].operands, [1]);
        let cont = ops.iter().position(|op| *op == Opcode::LoopContinue).unwrap();
        let cond = ops.iter().position(|op| *op == Opcode::LoopCondition).unwrap();
        let end = ops.iter().position(|op| *op == Opcode::EndLoop).unwrap();
        assert!(start < cont && cont < cond && cond < end);
    }

    #[test]
    fn test_global_initializer_runs_in_main() {
        let code = lower_source(
            Stage::Fragment,
            "float g = 2.0;\nvoid main(){ gl_FragColor = vec4(g); }",
        );
        let g = id_of(&code, "g");
        let main = code.iter().position(|i| i.opcode == Opcode::Function).unwrap();
        let first_store = code[main..]
            .iter()
            .find(|i| i.opcode == Opcode::Store)
            .unwrap();
        assert_eq!(first_store.operands[0], g);
    }

    #[test]
    fn test_short_circuit_with_side_effects() {
        let code = lower_source(
            Stage::Fragment,
            "float n;\nbool bump(){ n += 1.0; return true; }\nvoid main(){ bool b = n > 0.0 && bump(); if (b) discard; }",
        );
        assert_eq!(count(&code, Opcode::If), 2);
        assert_eq!(count(&code, Opcode::Kill), 1);
    }

    #[test]
    fn test_void_function_gets_return() {
        let code = lower_source(Stage::Vertex, "void main(){ gl_Position = vec4(0.0); }");
        let end = code
            .iter()
            .position(|i| i.opcode == Opcode::FunctionEnd)
            .unwrap();
        assert_eq!(code[end - 1].opcode, Opcode::Return);
    }
}
