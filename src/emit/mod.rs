//! Генерация исходного текста из байткода.
//!
//! ```text
//! Module -> таблицы (типы, константы, имена, декорации)
//!        -> объявления глобальных переменных
//!        -> дерево управления каждой функции -> строки
//! ```
//!
//! Чистые значения с одним использованием встраиваются в выражение
//! потребителя; значения с несколькими использованиями и результаты
//! вызовов получают временные переменные. Перед записью, вызовом и
//! границей блока все отложенные выражения материализуются, поэтому
//! порядок чтений и записей совпадает с байткодом.

pub mod expr;
pub mod target;

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::builtins::{BuiltinFn, BuiltinVar};
use crate::bytecode::{Decoration, Instruction, Module, Opcode, ParamMode, StorageClass};
use crate::error::{ShaderError, ShaderResult};
use crate::ops::{BinaryOp, UnaryOp};
use crate::stage::Stage;
use crate::types::{ConstValue, SamplerDim, SamplerType, ScalarKind, Type};

use expr::{ExprText, POSTFIX};
pub use target::Target;

type Emitted<T> = Result<T, String>;

/// Сгенерировать текст для версии `version` (`es`: встраиваемый профиль).
pub fn emit(module: &Module, version: u32, es: bool) -> ShaderResult<String> {
    let target = Target::new(version, es).map_err(ShaderError::Emission)?;
    let text = Emitter::new(module, target)
        .and_then(Emitter::run)
        .map_err(ShaderError::Emission)?;
    if text.trim().is_empty() {
        return Err(ShaderError::Emission("emitted text is empty".to_string()));
    }
    log::debug!("emitted {} bytes of GLSL {}", text.len(), target);
    Ok(text)
}

// === Таблицы модуля ===

/// Функция модуля: диапазон инструкций и сигнатура.
struct FunctionInfo {
    id: u32,
    name: String,
    return_type: u32,
    params: Vec<(u32, u32, ParamMode)>,
    /// Тело без `Function`, параметров и `FunctionEnd`.
    body: std::ops::Range<usize>,
}

struct Emitter {
    target: Target,
    stage: Stage,
    code: Vec<Instruction>,
    entry: u32,
    local_size: Option<[u32; 3]>,

    types: HashMap<u32, Type>,
    pointers: HashMap<u32, u32>,
    constants: HashMap<u32, ConstValue>,
    composites: HashMap<u32, (u32, Vec<u32>)>,
    debug_names: HashMap<u32, String>,
    decorations: HashMap<u32, Vec<(Decoration, u32)>>,
    value_types: HashMap<u32, u32>,
    globals: Vec<(u32, StorageClass)>,
    functions: Vec<FunctionInfo>,

    /// Текст глобальных переменных и имена функций.
    global_text: HashMap<u32, ExprText>,
    function_names: HashMap<u32, String>,
    used_names: HashSet<String>,
}

impl Emitter {
    fn new(module: &Module, target: Target) -> Emitted<Self> {
        let header = module.header().map_err(|e| e.to_string())?;
        let code = module.instructions().map_err(|e| e.to_string())?;
        target.check_stage(header.stage)?;

        let mut emitter = Self {
            target,
            stage: header.stage,
            code: Vec::new(),
            entry: 0,
            local_size: None,
            types: HashMap::new(),
            pointers: HashMap::new(),
            constants: HashMap::new(),
            composites: HashMap::new(),
            debug_names: HashMap::new(),
            decorations: HashMap::new(),
            value_types: HashMap::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            global_text: HashMap::new(),
            function_names: HashMap::new(),
            used_names: HashSet::new(),
        };
        emitter.scan(&code)?;
        emitter.code = code;
        Ok(emitter)
    }

    fn scan(&mut self, code: &[Instruction]) -> Emitted<()> {
        let mut entry = None;
        let mut current: Option<FunctionInfo> = None;

        for (index, inst) in code.iter().enumerate() {
            let ops = &inst.operands;
            if let (Some(ty), Some(id)) = (inst.result_type(), inst.result()) {
                self.value_types.insert(id, ty);
            }
            match inst.opcode {
                Opcode::EntryPoint => entry = Some(ops[0]),
                Opcode::LocalSize => self.local_size = Some([ops[0], ops[1], ops[2]]),
                Opcode::Name => {
                    if let Some(text) = inst.string() {
                        self.debug_names.entry(ops[0]).or_insert(text);
                    }
                }
                Opcode::Decorate => {
                    if let Some(decoration) = Decoration::from_u32(ops[1]) {
                        self.decorations
                            .entry(ops[0])
                            .or_default()
                            .push((decoration, ops[2]));
                    }
                }
                opcode if opcode.is_type() && opcode != Opcode::TypeFunction => {
                    self.declare_type(inst)?;
                }
                Opcode::Constant => {
                    let kind = self
                        .ty(ops[0])?
                        .scalar_kind()
                        .ok_or_else(|| format!("constant %{} is not a scalar", ops[1]))?;
                    self.constants
                        .insert(ops[1], ConstValue::from_bits(kind, ops[2]));
                }
                Opcode::ConstantComposite => {
                    self.composites.insert(ops[1], (ops[0], ops[2..].to_vec()));
                }
                Opcode::Variable if current.is_none() => {
                    let storage = StorageClass::from_u32(ops[2])
                        .ok_or_else(|| format!("bad storage class {}", ops[2]))?;
                    self.globals.push((ops[1], storage));
                }
                Opcode::Function => {
                    current = Some(FunctionInfo {
                        id: ops[1],
                        name: String::new(),
                        return_type: ops[0],
                        params: Vec::new(),
                        body: index + 1..index + 1,
                    });
                }
                Opcode::FunctionParameter => {
                    let function = current
                        .as_mut()
                        .ok_or("parameter outside of a function")?;
                    let mode = ParamMode::from_u32(ops[2])
                        .ok_or_else(|| format!("bad parameter mode {}", ops[2]))?;
                    function.params.push((ops[0], ops[1], mode));
                    function.body = index + 1..index + 1;
                }
                Opcode::FunctionEnd => {
                    let mut function = current.take().ok_or("stray FunctionEnd")?;
                    function.body.end = index;
                    self.functions.push(function);
                }
                _ => {}
            }
        }

        self.entry = entry.ok_or("module has no entry point")?;
        for ty in self.types.values() {
            self.target.check_type(ty)?;
        }
        Ok(())
    }

    fn declare_type(&mut self, inst: &Instruction) -> Emitted<()> {
        let ops = &inst.operands;
        let ty = match inst.opcode {
            Opcode::TypeVoid => Type::Void,
            Opcode::TypeBool => Type::BOOL,
            Opcode::TypeInt if ops[1] != 0 => Type::INT,
            Opcode::TypeInt => Type::UINT,
            Opcode::TypeFloat => Type::FLOAT,
            Opcode::TypeVector => {
                let kind = self
                    .ty(ops[1])?
                    .scalar_kind()
                    .ok_or("vector of a non-scalar type")?;
                Type::Vector(kind, ops[2] as u8)
            }
            Opcode::TypeMatrix => {
                let rows = self
                    .ty(ops[1])?
                    .vector_size()
                    .ok_or("matrix column is not a vector")?;
                Type::Matrix {
                    columns: ops[2] as u8,
                    rows,
                }
            }
            Opcode::TypeSampler => Type::Sampler(SamplerType {
                dim: SamplerDim::from_code(ops[1]).ok_or("bad sampler dimension")?,
                shadow: ops[2] != 0,
                kind: ScalarKind::from_code(ops[3]).ok_or("bad sampler kind")?,
            }),
            Opcode::TypeArray => Type::Array(Box::new(self.ty(ops[1])?.clone()), ops[2]),
            Opcode::TypePointer => {
                self.pointers.insert(ops[0], ops[2]);
                return Ok(());
            }
            _ => return Ok(()),
        };
        self.types.insert(ops[0], ty);
        Ok(())
    }

    fn ty(&self, id: u32) -> Emitted<&Type> {
        self.types
            .get(&id)
            .ok_or_else(|| format!("%{} is not a type", id))
    }

    /// Тип значения `id`.
    fn value_type(&self, id: u32) -> Emitted<&Type> {
        let ty = self
            .value_types
            .get(&id)
            .ok_or_else(|| format!("%{} has no type", id))?;
        self.ty(*ty)
    }

    /// Тип, на который указывает указатель `id`.
    fn pointee(&self, id: u32) -> Emitted<&Type> {
        let ty = self
            .value_types
            .get(&id)
            .and_then(|ptr| self.pointers.get(ptr))
            .ok_or_else(|| format!("%{} is not a pointer", id))?;
        self.ty(*ty)
    }

    fn decoration(&self, id: u32, kind: Decoration) -> Option<u32> {
        self.decorations
            .get(&id)?
            .iter()
            .find(|(d, _)| *d == kind)
            .map(|(_, v)| *v)
    }

    // === Сборка текста ===

    fn run(mut self) -> Emitted<String> {
        let globals = self.declare_globals()?;
        self.name_functions();

        let mut bodies = Vec::new();
        let mut extensions = BTreeSet::new();
        for function in &self.functions {
            let mut emitter = FunctionEmitter::new(&self);
            bodies.push(emitter.function(function)?);
            extensions.append(&mut emitter.extensions);
        }

        let mut out = self.target.version_line();
        out.push('\n');
        for extension in &extensions {
            out.push_str(&format!("#extension {} : enable\n", extension));
        }
        for line in self.precision_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        if let Some([x, y, z]) = self.local_size {
            out.push_str(&format!(
                "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;\n",
                x, y, z
            ));
        }
        if !globals.is_empty() {
            out.push('\n');
            for line in globals {
                out.push_str(&line);
                out.push('\n');
            }
        }
        for body in bodies {
            out.push('\n');
            out.push_str(&body);
        }
        Ok(out)
    }

    fn precision_lines(&self) -> Vec<String> {
        if !self.target.es {
            return Vec::new();
        }
        let float = if self.stage == Stage::Fragment {
            "mediump"
        } else {
            "highp"
        };
        let mut lines = vec![
            format!("precision {} float;", float),
            "precision highp int;".to_string(),
        ];
        let samplers: BTreeSet<String> = self
            .types
            .values()
            .filter_map(|ty| match ty {
                Type::Sampler(s) if s.dim != SamplerDim::D2 || s.shadow || s.kind != ScalarKind::Float => {
                    Some(s.name())
                }
                _ => None,
            })
            .filter(|name| name != "samplerCube")
            .collect();
        lines.extend(samplers.into_iter().map(|s| format!("precision highp {};", s)));
        lines
    }

    /// Уникальное имя: отладочное, `name_<id>` или `_<id>`.
    fn unique(used: &mut HashSet<String>, id: u32, debug: Option<&str>) -> String {
        let valid = |name: &str| {
            !name.is_empty()
                && !Target::is_reserved(name)
                && !used.contains(name)
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        };
        let name = match debug {
            Some(debug) if valid(debug) => debug.to_string(),
            Some(debug) if valid(&format!("{}_{}", debug, id)) => format!("{}_{}", debug, id),
            _ => format!("_{}", id),
        };
        used.insert(name.clone());
        name
    }

    fn name_functions(&mut self) {
        for function in &mut self.functions {
            let name = if function.id == self.entry {
                self.used_names.insert("main".to_string());
                "main".to_string()
            } else {
                let debug = self.debug_names.get(&function.id).map(String::as_str);
                Self::unique(&mut self.used_names, function.id, debug)
            };
            function.name = name.clone();
            self.function_names.insert(function.id, name);
        }
    }

    fn declare_globals(&mut self) -> Emitted<Vec<String>> {
        let legacy_fragment = self.target.is_legacy() && self.stage == Stage::Fragment;
        let user_outputs = self
            .globals
            .iter()
            .filter(|(id, storage)| {
                *storage == StorageClass::Output && self.decoration(*id, Decoration::BuiltIn).is_none()
            })
            .count();
        let uses_frag_color = self.globals.iter().any(|(id, _)| {
            self.decoration(*id, Decoration::BuiltIn) == Some(BuiltinVar::FragColor.code())
        });

        let mut lines = Vec::new();
        for (id, storage) in self.globals.clone() {
            let ty = self.pointee(id)?.clone();
            let location = self.decoration(id, Decoration::Location);

            if let Some(code) = self.decoration(id, Decoration::BuiltIn) {
                let var = BuiltinVar::from_code(code)
                    .ok_or_else(|| format!("unknown builtin variable {}", code))?;
                self.target.check_builtin_var(var)?;
                let text = if var == BuiltinVar::FragColor && !self.target.is_legacy() {
                    let name = Self::unique(&mut self.used_names, id, Some("fragColor"));
                    let layout = if self.target.has_attribute_locations() {
                        "layout(location = 0) "
                    } else {
                        ""
                    };
                    lines.push(format!("{}out vec4 {};", layout, name));
                    name
                } else {
                    var.name().to_string()
                };
                if self.decoration(id, Decoration::Invariant).is_some() {
                    lines.push(format!("invariant {};", text));
                }
                self.global_text.insert(id, ExprText::primary(text));
                continue;
            }

            if legacy_fragment && storage == StorageClass::Output {
                if ty != Type::vec(4) {
                    return Err(format!(
                        "fragment output of type '{}' cannot be expressed in {}",
                        ty, self.target
                    ));
                }
                let text = if user_outputs == 1 && !uses_frag_color && location.unwrap_or(0) == 0 {
                    ExprText::primary("gl_FragColor")
                } else {
                    ExprText::new(format!("gl_FragData[{}]", location.unwrap_or(0)), POSTFIX)
                };
                self.global_text.insert(id, text);
                continue;
            }

            let debug = self.debug_names.get(&id).cloned();
            let name = Self::unique(&mut self.used_names, id, debug.as_deref());
            let declaration = format!("{} {}{}", ty.base_name(), name, ty.array_suffix());
            let line = match storage {
                StorageClass::Uniform => {
                    let mut layout = Vec::new();
                    if let (true, Some(location)) = (self.target.has_uniform_locations(), location) {
                        layout.push(format!("location = {}", location));
                    }
                    if let (true, Some(binding)) = (
                        self.target.has_binding(),
                        self.decoration(id, Decoration::Binding),
                    ) {
                        layout.push(format!("binding = {}", binding));
                    }
                    format!("{}uniform {};", layout_prefix(&layout), declaration)
                }
                StorageClass::Input | StorageClass::Output => {
                    self.interface_declaration(id, storage, &declaration, location)?
                }
                StorageClass::Private => format!("{};", declaration),
                StorageClass::Function => {
                    return Err(format!("global %{} has function storage", id));
                }
            };
            lines.push(line);
            self.global_text.insert(id, ExprText::primary(name));
        }
        Ok(lines)
    }

    fn interface_declaration(
        &self,
        id: u32,
        storage: StorageClass,
        declaration: &str,
        location: Option<u32>,
    ) -> Emitted<String> {
        let input = storage == StorageClass::Input;
        let qualifier = match (self.target.is_legacy(), self.stage, input) {
            (true, Stage::Vertex, true) => "attribute",
            (true, _, _) => "varying",
            (false, _, true) => "in",
            (false, _, false) => "out",
        };
        let attribute = (self.stage == Stage::Vertex && input)
            || (self.stage == Stage::Fragment && !input);
        let has_location = if attribute {
            self.target.has_attribute_locations()
        } else {
            self.target.has_varying_locations()
        };
        let layout = match (has_location, location) {
            (true, Some(location)) => vec![format!("location = {}", location)],
            _ => Vec::new(),
        };

        let mut prefix = String::new();
        if self.decoration(id, Decoration::Invariant).is_some() {
            prefix.push_str("invariant ");
        }
        if let Some(code) = self.decoration(id, Decoration::Interpolation) {
            let keyword = match code {
                0 => "flat",
                1 => "smooth",
                2 => "noperspective",
                3 => "centroid",
                _ => return Err(format!("unknown interpolation qualifier code {}", code)),
            };
            let available = self.target.has_interpolation_qualifiers()
                && !(keyword == "noperspective" && self.target.es);
            if available {
                prefix.push_str(keyword);
                prefix.push(' ');
            } else if keyword != "smooth" {
                return Err(format!(
                    "interpolation qualifier '{}' is not available in {}",
                    keyword, self.target
                ));
            }
        }
        Ok(format!(
            "{}{}{} {};",
            layout_prefix(&layout),
            prefix,
            qualifier,
            declaration
        ))
    }
}

fn layout_prefix(entries: &[String]) -> String {
    if entries.is_empty() {
        String::new()
    } else {
        format!("layout({}) ", entries.join(", "))
    }
}

// === Дерево управления ===

/// Структурный узел тела функции.
enum Node<'a> {
    Inst(&'a Instruction),
    If {
        cond: u32,
        then_branch: Vec<Node<'a>>,
        else_branch: Vec<Node<'a>>,
    },
    Loop {
        tail_tested: bool,
        header: Vec<Node<'a>>,
        cond: Option<u32>,
        body: Vec<Node<'a>>,
        continuing: Vec<Node<'a>>,
        tail_cond: Option<u32>,
    },
}

struct TreeBuilder<'a> {
    code: &'a [Instruction],
    pos: usize,
}

impl<'a> TreeBuilder<'a> {
    fn peek(&self) -> Option<Opcode> {
        self.code.get(self.pos).map(|i| i.opcode)
    }

    fn expect(&mut self, opcode: Opcode) -> Emitted<&'a Instruction> {
        match self.code.get(self.pos) {
            Some(inst) if inst.opcode == opcode => {
                self.pos += 1;
                Ok(inst)
            }
            Some(inst) => Err(format!("expected {}, found {}", opcode.name(), inst.opcode.name())),
            None => Err(format!("expected {}, found end of function", opcode.name())),
        }
    }

    fn block(&mut self) -> Emitted<Vec<Node<'a>>> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.block_inner())
    }

    fn block_inner(&mut self) -> Emitted<Vec<Node<'a>>> {
        let mut nodes = Vec::new();
        while let Some(opcode) = self.peek() {
            match opcode {
                Opcode::Else
                | Opcode::EndIf
                | Opcode::LoopCondition
                | Opcode::LoopContinue
                | Opcode::EndLoop => break,
                Opcode::If => {
                    let cond = self.expect(Opcode::If)?.operands[0];
                    let then_branch = self.block()?;
                    let else_branch = if self.peek() == Some(Opcode::Else) {
                        self.pos += 1;
                        self.block()?
                    } else {
                        Vec::new()
                    };
                    self.expect(Opcode::EndIf)?;
                    nodes.push(Node::If {
                        cond,
                        then_branch,
                        else_branch,
                    });
                }
                Opcode::Loop => {
                    let tail_tested = self.expect(Opcode::Loop)?.operands[0] != 0;
                    let first = self.block()?;
                    let (header, cond, body) = if self.peek() == Some(Opcode::LoopCondition) {
                        let cond = self.expect(Opcode::LoopCondition)?.operands[0];
                        (first, Some(cond), self.block()?)
                    } else {
                        (Vec::new(), None, first)
                    };
                    self.expect(Opcode::LoopContinue)?;
                    let continuing = self.block()?;
                    let tail_cond = if self.peek() == Some(Opcode::LoopCondition) {
                        Some(self.expect(Opcode::LoopCondition)?.operands[0])
                    } else {
                        None
                    };
                    self.expect(Opcode::EndLoop)?;
                    nodes.push(Node::Loop {
                        tail_tested,
                        header,
                        cond,
                        body,
                        continuing,
                        tail_cond,
                    });
                }
                _ => {
                    nodes.push(Node::Inst(&self.code[self.pos]));
                    self.pos += 1;
                }
            }
        }
        Ok(nodes)
    }
}

/// Число ссылок на `id` внутри узлов (без типов результата).
fn count_references(nodes: &[Node<'_>], id: u32) -> usize {
    nodes
        .iter()
        .map(|node| match node {
            Node::Inst(inst) => {
                let skip = usize::from(inst.result_type().is_some());
                inst.references().into_iter().skip(skip).filter(|r| *r == id).count()
            }
            Node::If {
                cond,
                then_branch,
                else_branch,
            } => {
                usize::from(*cond == id)
                    + count_references(then_branch, id)
                    + count_references(else_branch, id)
            }
            Node::Loop {
                header,
                cond,
                body,
                continuing,
                tail_cond,
                ..
            } => {
                usize::from(*cond == Some(id))
                    + usize::from(*tail_cond == Some(id))
                    + count_references(header, id)
                    + count_references(body, id)
                    + count_references(continuing, id)
            }
        })
        .sum()
}

// === Тело функции ===

/// Строка вывода; `expr`: оператор-выражение, пригодный для шага `for`.
#[derive(Debug, Clone)]
struct Line {
    depth: usize,
    text: String,
    expr: bool,
}

impl Line {
    fn new(depth: usize, text: impl Into<String>) -> Self {
        Self {
            depth,
            text: text.into(),
            expr: false,
        }
    }

    fn expr(depth: usize, text: impl Into<String>) -> Self {
        Self {
            depth,
            text: text.into(),
            expr: true,
        }
    }
}

struct Pending {
    id: u32,
    text: ExprText,
    call: bool,
}

struct FunctionEmitter<'m> {
    module: &'m Emitter,
    used: HashSet<String>,
    /// Имена переменных, временных значений и тексты указателей.
    text: HashMap<u32, ExprText>,
    pending: Vec<Pending>,
    uses: HashMap<u32, usize>,
    /// Последнее объявление без инициализатора: (строка, переменная).
    last_decl: Option<(usize, u32)>,
    /// Последнее объявление с инициализатором: (строка, переменная).
    last_init: Option<(usize, u32)>,
    extensions: BTreeSet<&'static str>,
}

impl<'m> FunctionEmitter<'m> {
    fn new(module: &'m Emitter) -> Self {
        Self {
            module,
            used: module.used_names.clone(),
            text: HashMap::new(),
            pending: Vec::new(),
            uses: HashMap::new(),
            last_decl: None,
            last_init: None,
            extensions: BTreeSet::new(),
        }
    }

    fn function(&mut self, function: &FunctionInfo) -> Emitted<String> {
        let module = self.module;
        let body = &module.code[function.body.clone()];
        for inst in body {
            let skip = usize::from(inst.result_type().is_some());
            for id in inst.references().into_iter().skip(skip) {
                *self.uses.entry(id).or_insert(0) += 1;
            }
        }

        let mut params = Vec::new();
        for (ptr_type, id, mode) in &function.params {
            let ty = module
                .pointers
                .get(ptr_type)
                .ok_or_else(|| format!("parameter %{} is not a pointer", id))
                .and_then(|ty| module.ty(*ty))?;
            let debug = module.debug_names.get(id).map(String::as_str);
            let name = Emitter::unique(&mut self.used, *id, debug);
            let qualifier = match mode {
                ParamMode::In => "",
                ParamMode::Out => "out ",
                ParamMode::InOut => "inout ",
                ParamMode::ConstIn => "const ",
            };
            params.push(format!(
                "{}{} {}{}",
                qualifier,
                ty.base_name(),
                name,
                ty.array_suffix()
            ));
            self.text.insert(*id, ExprText::primary(name));
        }

        let mut builder = TreeBuilder { code: body, pos: 0 };
        let nodes = builder.block()?;
        if builder.pos != body.len() {
            return Err(format!(
                "unbalanced control flow in function '{}'",
                function.name
            ));
        }

        let mut lines = Vec::new();
        self.block(&nodes, &mut lines, 1)?;

        let return_type = module.ty(function.return_type)?;
        let mut out = format!(
            "{} {}({})\n{{\n",
            return_type,
            function.name,
            params.join(", ")
        );
        for line in lines {
            out.push_str(&"    ".repeat(line.depth));
            out.push_str(&line.text);
            out.push('\n');
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn uses(&self, id: u32) -> usize {
        self.uses.get(&id).copied().unwrap_or(0)
    }

    // === Значения ===

    /// Текст операнда; отложенное значение при этом забирается.
    fn operand(&mut self, id: u32) -> Emitted<ExprText> {
        let module = self.module;
        if let Some(value) = module.constants.get(&id) {
            return Ok(expr::literal(*value));
        }
        if let Some((ty, parts)) = module.composites.get(&id) {
            let name = module.ty(*ty)?.to_string();
            let parts = parts
                .iter()
                .map(|p| self.operand(*p))
                .collect::<Emitted<Vec<_>>>()?;
            return Ok(expr::call(&name, &parts));
        }
        if let Some(index) = self.pending.iter().position(|p| p.id == id) {
            return Ok(self.pending.remove(index).text);
        }
        if let Some(text) = self.text.get(&id).or_else(|| module.global_text.get(&id)) {
            return Ok(text.clone());
        }
        Err(format!("%{} is used before it is defined", id))
    }

    fn declaration(&self, ty: &Type, name: &str) -> String {
        format!("{} {}{}", ty.base_name(), name, ty.array_suffix())
    }

    /// Вывести временную переменную для значения `id`.
    fn temporary(&mut self, id: u32, text: ExprText, lines: &mut Vec<Line>, depth: usize) -> Emitted<()> {
        let ty = self.module.value_type(id)?.clone();
        let name = Emitter::unique(&mut self.used, id, None);
        lines.push(Line::new(
            depth,
            format!("{} = {};", self.declaration(&ty, &name), text.text),
        ));
        self.text.insert(id, ExprText::primary(name));
        Ok(())
    }

    /// Материализовать все отложенные значения по порядку.
    fn materialize(&mut self, lines: &mut Vec<Line>, depth: usize) -> Emitted<()> {
        for pending in std::mem::take(&mut self.pending) {
            self.temporary(pending.id, pending.text, lines, depth)?;
        }
        Ok(())
    }

    /// Значение с результатом: отложить, сохранить во временную или отбросить.
    fn value(&mut self, id: u32, text: ExprText, lines: &mut Vec<Line>, depth: usize) -> Emitted<()> {
        match self.uses(id) {
            0 => Ok(()),
            1 => {
                self.pending.push(Pending {
                    id,
                    text,
                    call: false,
                });
                Ok(())
            }
            _ => self.temporary(id, text, lines, depth),
        }
    }

    // === Блоки ===

    fn block(&mut self, nodes: &[Node<'_>], lines: &mut Vec<Line>, depth: usize) -> Emitted<()> {
        self.nodes(nodes, lines, depth)?;
        self.materialize(lines, depth)
    }

    fn nodes(&mut self, nodes: &[Node<'_>], lines: &mut Vec<Line>, depth: usize) -> Emitted<()> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || {
            self.last_decl = None;
            self.last_init = None;
            for node in nodes {
                match node {
                    Node::Inst(inst) => self.instruction(inst, lines, depth)?,
                    Node::If {
                        cond,
                        then_branch,
                        else_branch,
                    } => {
                        let cond = self.operand(*cond)?;
                        self.materialize(lines, depth)?;
                        lines.push(Line::new(depth, format!("if ({})", cond.text)));
                        lines.push(Line::new(depth, "{"));
                        self.block(then_branch, lines, depth + 1)?;
                        if !else_branch.is_empty() {
                            lines.push(Line::new(depth, "}"));
                            lines.push(Line::new(depth, "else"));
                            lines.push(Line::new(depth, "{"));
                            self.block(else_branch, lines, depth + 1)?;
                        }
                        lines.push(Line::new(depth, "}"));
                        self.last_decl = None;
                        self.last_init = None;
                    }
                    Node::Loop { .. } => {
                        self.materialize(lines, depth)?;
                        let init = self.loop_init(node, lines);
                        self.emit_loop(node, init, lines, depth)?;
                        self.last_decl = None;
                        self.last_init = None;
                    }
                }
            }
            Ok(())
        })
    }

    /// Объявление счётчика прямо перед циклом переносится в `for`,
    /// если переменная не используется после цикла.
    fn loop_init(&mut self, node: &Node<'_>, lines: &mut Vec<Line>) -> Option<Line> {
        let (line, var) = self.last_init.take()?;
        let Node::Loop { tail_tested: false, .. } = node else {
            return None;
        };
        if line + 1 != lines.len() || self.uses(var) != 1 + count_references(std::slice::from_ref(node), var) {
            return None;
        }
        lines.pop()
    }

    fn emit_loop(
        &mut self,
        node: &Node<'_>,
        init: Option<Line>,
        lines: &mut Vec<Line>,
        depth: usize,
    ) -> Emitted<()> {
        let Node::Loop {
            tail_tested,
            header,
            cond,
            body,
            continuing,
            tail_cond,
        } = node
        else {
            return Err("expected a loop".to_string());
        };
        let inner = depth + 1;

        let mut header_lines = Vec::new();
        self.nodes(header, &mut header_lines, inner)?;
        let cond = cond.map(|c| self.operand(c)).transpose()?;
        let mut body_lines = Vec::new();
        self.materialize(&mut body_lines, inner)?;
        self.block(body, &mut body_lines, inner)?;

        let mut continue_lines = Vec::new();
        self.nodes(continuing, &mut continue_lines, inner)?;
        let tail = tail_cond.map(|c| self.operand(c)).transpose()?;
        self.materialize(&mut continue_lines, inner)?;

        let simple_step = continue_lines.iter().all(|l| l.expr && l.depth == inner);
        if !tail_tested && header_lines.is_empty() && simple_step {
            let cond_text = cond.as_ref().map_or(String::new(), |c| c.text.clone());
            let head = match &init {
                None if continue_lines.is_empty() && cond.is_some() => {
                    format!("while ({})", cond_text)
                }
                _ => {
                    let init_text = init.as_ref().map_or("", |l| l.text.trim_end_matches(';'));
                    let steps: Vec<&str> = continue_lines
                        .iter()
                        .map(|l| l.text.trim_end_matches(';'))
                        .collect();
                    format!("for ({}; {}; {})", init_text, cond_text, steps.join(", "))
                        .replace("; ; )", ";;)")
                        .replace("; )", ";)")
                }
            };
            lines.push(Line::new(depth, head));
            lines.push(Line::new(depth, "{"));
            lines.extend(body_lines);
            lines.push(Line::new(depth, "}"));
            return Ok(());
        }
        lines.extend(init);
        if *tail_tested && continue_lines.is_empty() {
            let tail = tail.ok_or("do-while loop without a condition")?;
            lines.push(Line::new(depth, "do"));
            lines.push(Line::new(depth, "{"));
            lines.extend(body_lines);
            lines.push(Line::new(depth, format!("}} while ({});", tail.text)));
            return Ok(());
        }

        // Общий случай: блок продолжения в начале следующей итерации.
        let flag = if continue_lines.is_empty() && tail.is_none() {
            None
        } else {
            let flag = self.flag_name();
            lines.push(Line::new(depth, format!("bool {} = false;", flag)));
            Some(flag)
        };
        lines.push(Line::new(depth, "for (;;)"));
        lines.push(Line::new(depth, "{"));
        if let Some(flag) = flag {
            lines.push(Line::new(inner, format!("if ({})", flag)));
            lines.push(Line::new(inner, "{"));
            lines.extend(continue_lines.into_iter().map(|mut l| {
                l.depth += 1;
                l
            }));
            if let Some(tail) = &tail {
                let exit = expr::unary(UnaryOp::Not, tail);
                lines.push(Line::new(inner + 1, format!("if ({}) break;", exit.text)));
            }
            lines.push(Line::new(inner, "}"));
            lines.push(Line::expr(inner, format!("{} = true;", flag)));
        }
        lines.extend(header_lines);
        if let Some(cond) = &cond {
            let exit = expr::unary(UnaryOp::Not, cond);
            lines.push(Line::new(inner, format!("if ({}) break;", exit.text)));
        }
        lines.extend(body_lines);
        lines.push(Line::new(depth, "}"));
        Ok(())
    }

    fn flag_name(&mut self) -> String {
        let mut n = 0;
        loop {
            let name = format!("_lf{}", n);
            if self.used.insert(name.clone()) {
                return name;
            }
            n += 1;
        }
    }

    // === Инструкции ===

    fn instruction(&mut self, inst: &Instruction, lines: &mut Vec<Line>, depth: usize) -> Emitted<()> {
        let module = self.module;
        let ops = &inst.operands;
        match inst.opcode {
            Opcode::Nop => {}
            Opcode::Variable => {
                let ty = module.pointee(ops[1])?.clone();
                let debug = module.debug_names.get(&ops[1]).map(String::as_str);
                let name = Emitter::unique(&mut self.used, ops[1], debug);
                lines.push(Line::new(depth, format!("{};", self.declaration(&ty, &name))));
                self.text.insert(ops[1], ExprText::primary(name));
                self.last_decl = Some((lines.len() - 1, ops[1]));
            }
            Opcode::Store => {
                let target = self.operand(ops[0])?;
                let value = self.operand(ops[1])?;
                self.materialize(lines, depth)?;
                match self.last_decl.take() {
                    Some((line, var)) if var == ops[0] && line + 1 == lines.len() => {
                        let ty = module.pointee(var)?;
                        lines[line].text =
                            format!("{} = {};", self.declaration(ty, &target.text), value.text);
                        self.last_init = Some((line, var));
                    }
                    _ => lines.push(Line::expr(
                        depth,
                        format!("{} = {};", target.text, value.text),
                    )),
                }
            }
            Opcode::AccessChain => {
                let text = self.access_chain(ops[2], &ops[3..], lines, depth)?;
                self.text.insert(ops[1], text);
            }
            Opcode::Load => {
                let text = self.operand(ops[2])?;
                self.value(ops[1], text, lines, depth)?;
            }
            Opcode::Binary => {
                let op = BinaryOp::from_code(ops[2]).ok_or("bad binary operator")?;
                if op.is_integer_only() && self.module.target.is_legacy() {
                    return Err(format!(
                        "operator '{}' is not available in {}",
                        op.symbol(),
                        self.module.target
                    ));
                }
                let lhs = self.operand(ops[3])?;
                let rhs = self.operand(ops[4])?;
                self.value(ops[1], expr::binary(op, &lhs, &rhs), lines, depth)?;
            }
            Opcode::Unary => {
                let op = UnaryOp::from_code(ops[2]).ok_or("bad unary operator")?;
                if op == UnaryOp::BitNot && self.module.target.is_legacy() {
                    return Err(format!("operator '~' is not available in {}", self.module.target));
                }
                let operand = self.operand(ops[3])?;
                self.value(ops[1], expr::unary(op, &operand), lines, depth)?;
            }
            Opcode::Construct => {
                let ty = module.ty(ops[0])?;
                if ty.is_array() && module.target.is_legacy() && module.target.es {
                    return Err(format!("array constructors are not available in {}", module.target));
                }
                let name = ty.to_string();
                let args = self.operands(&ops[2..])?;
                self.value(ops[1], expr::call(&name, &args), lines, depth)?;
            }
            Opcode::Swizzle => {
                let base_type = module.value_type(ops[2])?.clone();
                let base = self.operand(ops[2])?;
                let text = if base_type.is_scalar() {
                    if ops.len() == 4 {
                        base
                    } else {
                        expr::call(&module.ty(ops[0])?.to_string(), &[base])
                    }
                } else {
                    let suffix = expr::swizzle_suffix(&ops[3..]).ok_or("bad swizzle component")?;
                    expr::postfix(&base, &suffix)
                };
                self.value(ops[1], text, lines, depth)?;
            }
            Opcode::Extract => {
                let composite = module.value_type(ops[2])?.clone();
                let base = self.operand(ops[2])?;
                let text = self.index_suffix(&composite, ops[3])?;
                self.value(ops[1], expr::postfix(&base, &text), lines, depth)?;
            }
            Opcode::Select => {
                let cond = self.operand(ops[2])?;
                let a = self.operand(ops[3])?;
                let b = self.operand(ops[4])?;
                self.value(ops[1], expr::ternary(&cond, &a, &b), lines, depth)?;
            }
            Opcode::Builtin => {
                let func = BuiltinFn::from_code(ops[2]).ok_or("bad builtin function")?;
                let sampler = match ops.get(3).map(|a| module.value_type(*a)) {
                    Some(Ok(Type::Sampler(s))) => Some(*s),
                    _ => None,
                };
                let (name, suffix) = module.target.builtin_name(func, sampler, module.stage)?;
                if let Some(extension) = module.target.builtin_extension(func, module.stage) {
                    self.extensions.insert(extension);
                }
                let args = self.operands(&ops[3..])?;
                let mut text = expr::call(&name, &args);
                if !suffix.is_empty() {
                    text = expr::postfix(&text, suffix);
                }
                self.value(ops[1], text, lines, depth)?;
            }
            Opcode::FunctionCall => {
                let name = module
                    .function_names
                    .get(&ops[2])
                    .ok_or_else(|| format!("call to unknown function %{}", ops[2]))?
                    .clone();
                let args = self.operands(&ops[3..])?;
                self.materialize(lines, depth)?;
                let text = expr::call(&name, &args);
                match self.uses(ops[1]) {
                    0 => lines.push(Line::expr(depth, format!("{};", text.text))),
                    1 => self.pending.push(Pending {
                        id: ops[1],
                        text,
                        call: true,
                    }),
                    _ => self.temporary(ops[1], text, lines, depth)?,
                }
            }
            Opcode::Return => {
                self.materialize(lines, depth)?;
                lines.push(Line::new(depth, "return;"));
            }
            Opcode::ReturnValue => {
                let value = self.operand(ops[0])?;
                self.materialize(lines, depth)?;
                lines.push(Line::new(depth, format!("return {};", value.text)));
            }
            Opcode::Kill => {
                self.materialize(lines, depth)?;
                lines.push(Line::new(depth, "discard;"));
            }
            Opcode::Break | Opcode::Continue => {
                self.materialize(lines, depth)?;
                let keyword = if inst.opcode == Opcode::Break {
                    "break;"
                } else {
                    "continue;"
                };
                lines.push(Line::new(depth, keyword));
            }
            other => {
                return Err(format!("unexpected {} inside a function", other.name()));
            }
        }
        Ok(())
    }

    fn operands(&mut self, ids: &[u32]) -> Emitted<Vec<ExprText>> {
        ids.iter().map(|id| self.operand(*id)).collect()
    }

    /// `.x` для константного индекса вектора, иначе `[i]`.
    fn index_suffix(&mut self, composite: &Type, index: u32) -> Emitted<String> {
        let constant = self.module.constants.get(&index).and_then(|c| c.as_integer());
        if let (true, Some(i)) = (composite.is_vector(), constant) {
            return expr::swizzle_suffix(&[i as u32]).ok_or_else(|| "bad vector index".to_string());
        }
        let index = self.operand(index)?;
        Ok(format!("[{}]", index.text))
    }

    fn access_chain(
        &mut self,
        base: u32,
        indices: &[u32],
        lines: &mut Vec<Line>,
        depth: usize,
    ) -> Emitted<ExprText> {
        let mut ty = self.module.pointee(base)?.clone();
        let mut text = self.operand(base)?;
        for index in indices {
            // указатель используется позже, индекс должен быть зафиксирован
            if let Some(position) = self.pending.iter().position(|p| p.id == *index) {
                if self.pending[..=position].iter().any(|p| p.call) {
                    self.materialize(lines, depth)?;
                } else {
                    let pending = self.pending.remove(position);
                    self.temporary(pending.id, pending.text, lines, depth)?;
                }
            }
            let suffix = self.index_suffix(&ty, *index)?;
            text = expr::postfix(&text, &suffix);
            ty = ty
                .element()
                .ok_or_else(|| format!("cannot index a value of type '{}'", ty))?;
        }
        Ok(text)
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

    fn module(stage: Stage, src: &str, optimize: bool) -> Module {
        let unit = SourceUnit::new(stage, "emit.glsl", src);
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        let parsed = parse_program(&unit, &mut includer, &mut log).unwrap();
        let linked = link(vec![parsed], &mut log).unwrap();
        let (_, linked) = reflect(linked).unwrap();
        let module = crate::lower::lower(&linked).unwrap();
        crate::optimizer::optimize(module, optimize, "emit.glsl", &mut log).unwrap()
    }

    fn emit_source(stage: Stage, src: &str, version: u32, es: bool) -> String {
        emit(&module(stage, src, false), version, es).unwrap()
    }

    const FRAGMENT: &str = "#version 300 es
        uniform vec4 u_tint;
        uniform sampler2D s_albedo;
        in vec2 v_uv;
        out vec4 o_color;
        void main() {
            o_color = texture(s_albedo, v_uv) * u_tint;
        }";

    #[test]
    fn test_modern_fragment() {
        let text = emit_source(Stage::Fragment, FRAGMENT, 310, true);
        assert!(text.starts_with("#version 310 es\n"));
        assert!(text.contains("precision mediump float;"));
        assert!(text.contains("layout(location = 0) uniform vec4 u_tint;"));
        assert!(text.contains("layout(location = 1) uniform sampler2D s_albedo;"));
        assert!(text.contains("layout(location = 0) in vec2 v_uv;"));
        assert!(text.contains("layout(location = 0) out vec4 o_color;"));
        assert!(text.contains("o_color = texture(s_albedo, v_uv) * u_tint;"));
    }

    #[test]
    fn test_legacy_fragment() {
        let text = emit_source(Stage::Fragment, FRAGMENT, 100, true);
        assert!(text.starts_with("#version 100\n"));
        assert!(text.contains("uniform vec4 u_tint;"));
        assert!(text.contains("varying vec2 v_uv;"));
        assert!(text.contains("gl_FragColor = texture2D(s_albedo, v_uv) * u_tint;"));
        assert!(!text.contains("o_color"));
        assert!(!text.contains("layout"));
    }

    #[test]
    fn test_lod_lookup_in_legacy_fragment() {
        let src = "#version 300 es
            uniform sampler2D s_env;
            in vec2 v_uv;
            out vec4 o_color;
            void main() {
                o_color = textureLod(s_env, v_uv, 2.0);
            }";
        let es100 = emit_source(Stage::Fragment, src, 100, true);
        assert!(es100.contains("#extension GL_EXT_shader_texture_lod : enable"), "{}", es100);
        assert!(es100.contains("gl_FragColor = texture2DLodEXT(s_env, v_uv, 2.0);"), "{}", es100);

        let gl120 = emit_source(Stage::Fragment, src, 120, false);
        assert!(gl120.contains("#extension GL_ARB_shader_texture_lod : enable"), "{}", gl120);
        assert!(gl120.contains("gl_FragColor = texture2DLod(s_env, v_uv, 2.0);"), "{}", gl120);
    }

    #[test]
    fn test_lod_lookup_in_legacy_vertex_is_core() {
        let src = "#version 300 es
            uniform sampler2D s_height;
            in vec2 a_uv;
            void main() {
                gl_Position = textureLod(s_height, a_uv, 0.0);
            }";
        for (version, es) in [(100, true), (120, false)] {
            let text = emit_source(Stage::Vertex, src, version, es);
            assert!(!text.contains("#extension"), "{}", text);
            assert!(text.contains("texture2DLod(s_height, a_uv, 0.0)"), "{}", text);
        }
    }

    #[test]
    fn test_unsupported_interpolation_names_the_qualifier() {
        let src = "#version 300 es
            flat in vec4 v_color;
            out vec4 o_color;
            void main() { o_color = v_color; }";
        let module = module(Stage::Fragment, src, false);
        match emit(&module, 100, true) {
            Err(ShaderError::Emission(message)) => {
                assert!(message.contains("'flat'"), "{}", message);
                assert!(message.contains("100 es"), "{}", message);
            }
            other => panic!("expected an emission error, got {:?}", other),
        }
        let text = emit(&module, 300, true).unwrap();
        assert!(text.contains("flat in vec4 v_color;"), "{}", text);
    }

    #[test]
    fn test_legacy_vertex_attributes() {
        let src = "#version 300 es
            in vec3 a_position;
            out vec2 v_uv;
            uniform mat4 u_mvp;
            void main() {
                v_uv = a_position.xy;
                gl_Position = u_mvp * vec4(a_position, 1.0);
            }";
        let text = emit_source(Stage::Vertex, src, 120, false);
        assert!(text.contains("attribute vec3 a_position;"));
        assert!(text.contains("varying vec2 v_uv;"));
        assert!(text.contains("gl_Position = u_mvp * vec4(a_position, 1.0);"));
        assert!(!text.contains("precision"));
    }

    #[test]
    fn test_loops_are_rebuilt() {
        let src = "#version 300 es
            uniform vec4 u_arr[4];
            out vec4 o_color;
            void main() {
                vec4 sum = vec4(0.0);
                for (int i = 0; i < 4; i++) {
                    sum += u_arr[i];
                }
                int n = 0;
                do { n++; } while (n < 3);
                o_color = sum * float(n);
            }";
        let text = emit_source(Stage::Fragment, src, 300, true);
        assert!(text.contains("for (int i = 0; i < 4; i = i + 1)"), "{}", text);
        assert!(text.contains("int n = 0;"), "{}", text);
        assert!(text.contains("} while (n < 3);"), "{}", text);
    }

    #[test]
    fn test_helper_functions_come_first() {
        let src = "#version 300 es
            out vec4 o_color;
            vec4 shade(vec4 c) { return c * 0.5; }
            void main() { o_color = shade(vec4(1.0)); }";
        let text = emit_source(Stage::Fragment, src, 300, true);
        let helper = text.find("vec4 shade(vec4 c)").unwrap();
        let main = text.find("void main()").unwrap();
        assert!(helper < main);
        assert!(text.contains("o_color = shade(vec4(1.0));"));
    }

    #[test]
    fn test_optimized_output_drops_local_names() {
        let src = "#version 300 es
            uniform vec4 u_tint;
            out vec4 o_color;
            void main() {
                vec4 scaled = u_tint * 2.0;
                o_color = scaled + scaled;
            }";
        let text = emit(&module(Stage::Fragment, src, true), 330, false).unwrap();
        assert!(text.starts_with("#version 330\n"));
        assert!(text.contains("layout(location = 0) out vec4 o_color;"));
        assert!(!text.contains("scaled"), "{}", text);
        assert!(text.contains("u_tint * 2.0"), "{}", text);
    }

    #[test]
    fn test_legacy_rejects_bit_operations() {
        let src = "#version 300 es
            uniform int u_mask;
            out vec4 o_color;
            void main() { o_color = vec4(float(u_mask & 3)); }";
        let module = module(Stage::Fragment, src, false);
        assert!(matches!(emit(&module, 100, true), Err(ShaderError::Emission(_))));
        assert!(emit(&module, 300, true).is_ok());
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let module = module(Stage::Fragment, FRAGMENT, true);
        assert!(matches!(emit(&module, 333, false), Err(ShaderError::Emission(_))));
    }
}
