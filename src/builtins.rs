//! Встроенные функции и переменные шейдерного языка.
//!
//! Таблицы неизменяемы; правила вывода типа результата записаны
//! прямо в [`BuiltinFn::resolve`].

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::stage::Stage;
use crate::types::{SamplerDim, ScalarKind, Type};

// === Встроенные функции ===

static FUNCTION_INDEX: OnceLock<HashMap<&'static str, BuiltinFn>> = OnceLock::new();

/// Индекс функций по имени; строится один раз на процесс.
pub fn function_index() -> &'static HashMap<&'static str, BuiltinFn> {
    FUNCTION_INDEX.get_or_init(|| FUNCTIONS.iter().map(|(func, name)| (*name, *func)).collect())
}

/// Встроенная функция.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFn {
    Radians,
    Degrees,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Pow,
    Exp,
    Log,
    Exp2,
    Log2,
    Sqrt,
    InverseSqrt,
    Abs,
    Sign,
    Floor,
    Ceil,
    Trunc,
    Round,
    Fract,
    Mod,
    Min,
    Max,
    Clamp,
    Mix,
    Step,
    SmoothStep,
    Length,
    Distance,
    Dot,
    Cross,
    Normalize,
    Reflect,
    Refract,
    FaceForward,
    MatrixCompMult,
    Transpose,
    Determinant,
    Inverse,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Equal,
    NotEqual,
    Any,
    All,
    Not,
    DFdx,
    DFdy,
    Fwidth,
    Texture,
    TextureLod,
    TextureProj,
    TexelFetch,
    TextureSize,
}

use BuiltinFn as B;

/// Таблица `(функция, имя)`: порядок задаёт код в байткоде.
const FUNCTIONS: &[(BuiltinFn, &str)] = &[
    (B::Radians, "radians"),
    (B::Degrees, "degrees"),
    (B::Sin, "sin"),
    (B::Cos, "cos"),
    (B::Tan, "tan"),
    (B::Asin, "asin"),
    (B::Acos, "acos"),
    (B::Atan, "atan"),
    (B::Pow, "pow"),
    (B::Exp, "exp"),
    (B::Log, "log"),
    (B::Exp2, "exp2"),
    (B::Log2, "log2"),
    (B::Sqrt, "sqrt"),
    (B::InverseSqrt, "inversesqrt"),
    (B::Abs, "abs"),
    (B::Sign, "sign"),
    (B::Floor, "floor"),
    (B::Ceil, "ceil"),
    (B::Trunc, "trunc"),
    (B::Round, "round"),
    (B::Fract, "fract"),
    (B::Mod, "mod"),
    (B::Min, "min"),
    (B::Max, "max"),
    (B::Clamp, "clamp"),
    (B::Mix, "mix"),
    (B::Step, "step"),
    (B::SmoothStep, "smoothstep"),
    (B::Length, "length"),
    (B::Distance, "distance"),
    (B::Dot, "dot"),
    (B::Cross, "cross"),
    (B::Normalize, "normalize"),
    (B::Reflect, "reflect"),
    (B::Refract, "refract"),
    (B::FaceForward, "faceforward"),
    (B::MatrixCompMult, "matrixCompMult"),
    (B::Transpose, "transpose"),
    (B::Determinant, "determinant"),
    (B::Inverse, "inverse"),
    (B::LessThan, "lessThan"),
    (B::LessThanEqual, "lessThanEqual"),
    (B::GreaterThan, "greaterThan"),
    (B::GreaterThanEqual, "greaterThanEqual"),
    (B::Equal, "equal"),
    (B::NotEqual, "notEqual"),
    (B::Any, "any"),
    (B::All, "all"),
    (B::Not, "not"),
    (B::DFdx, "dFdx"),
    (B::DFdy, "dFdy"),
    (B::Fwidth, "fwidth"),
    (B::Texture, "texture"),
    (B::TextureLod, "textureLod"),
    (B::TextureProj, "textureProj"),
    (B::TexelFetch, "texelFetch"),
    (B::TextureSize, "textureSize"),
];

/// Устаревшие имена выборок с фиксированной размерностью сэмплера.
const LEGACY_TEXTURE_NAMES: &[(&str, BuiltinFn, SamplerDim)] = &[
    ("texture2D", B::Texture, SamplerDim::D2),
    ("texture2DLod", B::TextureLod, SamplerDim::D2),
    ("texture2DProj", B::TextureProj, SamplerDim::D2),
    ("textureCube", B::Texture, SamplerDim::Cube),
    ("textureCubeLod", B::TextureLod, SamplerDim::Cube),
    ("texture3D", B::Texture, SamplerDim::D3),
    ("texture3DLod", B::TextureLod, SamplerDim::D3),
    ("texture3DProj", B::TextureProj, SamplerDim::D3),
];

impl BuiltinFn {
    /// Найти встроенную функцию по имени в исходнике.
    ///
    /// Для устаревших имён (`texture2D`, ...) возвращает требуемую
    /// размерность сэмплера.
    pub fn lookup(name: &str) -> Option<(BuiltinFn, Option<SamplerDim>)> {
        if let Some((_, func, dim)) = LEGACY_TEXTURE_NAMES.iter().find(|(n, ..)| *n == name) {
            return Some((*func, Some(*dim)));
        }
        function_index().get(name).map(|func| (*func, None))
    }

    pub fn name(self) -> &'static str {
        FUNCTIONS
            .iter()
            .find(|(func, _)| *func == self)
            .map(|(_, n)| *n)
            .unwrap_or("<builtin>")
    }

    pub fn code(self) -> u32 {
        FUNCTIONS
            .iter()
            .position(|(func, _)| *func == self)
            .unwrap_or(0) as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        FUNCTIONS.get(code as usize).map(|(func, _)| *func)
    }

    /// Только во фрагментной стадии.
    pub fn fragment_only(self) -> bool {
        matches!(self, B::DFdx | B::DFdy | B::Fwidth)
    }

    /// Функции выборки текстур.
    pub fn is_texture(self) -> bool {
        matches!(
            self,
            B::Texture | B::TextureLod | B::TextureProj | B::TexelFetch | B::TextureSize
        )
    }

    /// Вывести тип результата по типам аргументов.
    pub fn resolve(self, args: &[Type]) -> Result<Type, String> {
        let fail = || {
            let list: Vec<String> = args.iter().map(|t| t.to_string()).collect();
            format!(
                "'{}' : no matching overloaded function found for ({})",
                self.name(),
                list.join(", ")
            )
        };
        let arity = |n: usize| -> Result<(), String> {
            if args.len() == n {
                Ok(())
            } else {
                Err(fail())
            }
        };
        let float_gen = |t: &Type| t.is_float_gen();
        let numeric_gen = |t: &Type| t.is_scalar_or_vector() && t.is_numeric();
        let scalar_of = |t: &Type, of: &Type| {
            t.is_scalar() && t.scalar_kind() == of.scalar_kind()
        };

        match self {
            B::Radians
            | B::Degrees
            | B::Sin
            | B::Cos
            | B::Tan
            | B::Asin
            | B::Acos
            | B::Exp
            | B::Log
            | B::Exp2
            | B::Log2
            | B::Sqrt
            | B::InverseSqrt
            | B::Floor
            | B::Ceil
            | B::Trunc
            | B::Round
            | B::Fract
            | B::Normalize
            | B::DFdx
            | B::DFdy
            | B::Fwidth => {
                arity(1)?;
                if float_gen(&args[0]) {
                    Ok(args[0].clone())
                } else {
                    Err(fail())
                }
            }
            B::Abs | B::Sign => {
                arity(1)?;
                let ok = float_gen(&args[0])
                    || (args[0].is_scalar_or_vector()
                        && args[0].scalar_kind() == Some(ScalarKind::Int));
                if ok {
                    Ok(args[0].clone())
                } else {
                    Err(fail())
                }
            }
            B::Atan => match args {
                [y] if float_gen(y) => Ok(y.clone()),
                [y, x] if float_gen(y) && y == x => Ok(y.clone()),
                _ => Err(fail()),
            },
            B::Pow | B::Reflect => match args {
                [a, b] if float_gen(a) && a == b => Ok(a.clone()),
                _ => Err(fail()),
            },
            B::Mod => match args {
                [x, y] if float_gen(x) && (x == y || *y == Type::FLOAT) => Ok(x.clone()),
                _ => Err(fail()),
            },
            B::Min | B::Max => match args {
                [x, y] if numeric_gen(x) && (x == y || scalar_of(y, x)) => Ok(x.clone()),
                _ => Err(fail()),
            },
            B::Clamp => match args {
                [x, lo, hi]
                    if numeric_gen(x)
                        && ((x == lo && x == hi) || (scalar_of(lo, x) && scalar_of(hi, x))) =>
                {
                    Ok(x.clone())
                }
                _ => Err(fail()),
            },
            B::Mix => match args {
                [x, y, a] if float_gen(x) && x == y && (a == x || *a == Type::FLOAT) => {
                    Ok(x.clone())
                }
                _ => Err(fail()),
            },
            B::Step => match args {
                [edge, x] if float_gen(x) && (edge == x || *edge == Type::FLOAT) => Ok(x.clone()),
                _ => Err(fail()),
            },
            B::SmoothStep => match args {
                [e0, e1, x]
                    if float_gen(x)
                        && ((e0 == x && e1 == x)
                            || (*e0 == Type::FLOAT && *e1 == Type::FLOAT)) =>
                {
                    Ok(x.clone())
                }
                _ => Err(fail()),
            },
            B::Length => match args {
                [x] if float_gen(x) => Ok(Type::FLOAT),
                _ => Err(fail()),
            },
            B::Distance | B::Dot => match args {
                [a, b] if float_gen(a) && a == b => Ok(Type::FLOAT),
                _ => Err(fail()),
            },
            B::Cross => match args {
                [a, b] if *a == Type::vec(3) && *b == Type::vec(3) => Ok(Type::vec(3)),
                _ => Err(fail()),
            },
            B::Refract => match args {
                [i, n, eta] if float_gen(i) && i == n && *eta == Type::FLOAT => Ok(i.clone()),
                _ => Err(fail()),
            },
            B::FaceForward => match args {
                [n, i, r] if float_gen(n) && n == i && n == r => Ok(n.clone()),
                _ => Err(fail()),
            },
            B::MatrixCompMult => match args {
                [a, b] if a.is_matrix() && a == b => Ok(a.clone()),
                _ => Err(fail()),
            },
            B::Transpose => match args {
                [Type::Matrix { columns, rows }] => Ok(Type::Matrix {
                    columns: *rows,
                    rows: *columns,
                }),
                _ => Err(fail()),
            },
            B::Determinant => match args {
                [Type::Matrix { columns, rows }] if columns == rows => Ok(Type::FLOAT),
                _ => Err(fail()),
            },
            B::Inverse => match args {
                [m @ Type::Matrix { columns, rows }] if columns == rows => Ok(m.clone()),
                _ => Err(fail()),
            },
            B::LessThan | B::LessThanEqual | B::GreaterThan | B::GreaterThanEqual => {
                match args {
                    [a, b] if a.is_vector() && a.is_numeric() && a == b => {
                        Ok(a.with_kind(ScalarKind::Bool).ok_or_else(fail)?)
                    }
                    _ => Err(fail()),
                }
            }
            B::Equal | B::NotEqual => match args {
                [a, b] if a.is_vector() && a == b => {
                    Ok(a.with_kind(ScalarKind::Bool).ok_or_else(fail)?)
                }
                _ => Err(fail()),
            },
            B::Any | B::All => match args {
                [Type::Vector(ScalarKind::Bool, _)] => Ok(Type::BOOL),
                _ => Err(fail()),
            },
            B::Not => match args {
                [v @ Type::Vector(ScalarKind::Bool, _)] => Ok(v.clone()),
                _ => Err(fail()),
            },
            B::Texture => match args {
                [Type::Sampler(s), coord] if *coord == Type::vec(s.coord_size()) => {
                    Ok(s.sample_type())
                }
                [Type::Sampler(s), coord, bias]
                    if !s.shadow
                        && *coord == Type::vec(s.coord_size())
                        && *bias == Type::FLOAT =>
                {
                    Ok(s.sample_type())
                }
                _ => Err(fail()),
            },
            B::TextureLod => match args {
                [Type::Sampler(s), coord, lod]
                    if !s.shadow && *coord == Type::vec(s.coord_size()) && *lod == Type::FLOAT =>
                {
                    Ok(s.sample_type())
                }
                _ => Err(fail()),
            },
            B::TextureProj => match args {
                [Type::Sampler(s), coord] if !s.shadow => {
                    let ok = match s.dim {
                        SamplerDim::D2 => *coord == Type::vec(3) || *coord == Type::vec(4),
                        SamplerDim::D3 => *coord == Type::vec(4),
                        _ => false,
                    };
                    if ok {
                        Ok(s.sample_type())
                    } else {
                        Err(fail())
                    }
                }
                _ => Err(fail()),
            },
            B::TexelFetch => match args {
                [Type::Sampler(s), coord, lod]
                    if !s.shadow
                        && s.dim != SamplerDim::Cube
                        && *coord == Type::scalar_or_vector(ScalarKind::Int, s.texel_size())
                        && *lod == Type::INT =>
                {
                    Ok(Type::Vector(s.kind, 4))
                }
                _ => Err(fail()),
            },
            B::TextureSize => match args {
                [Type::Sampler(s), lod] if *lod == Type::INT => {
                    Ok(Type::Vector(ScalarKind::Int, s.texel_size()))
                }
                _ => Err(fail()),
            },
        }
    }
}

// === Встроенные переменные ===

/// Встроенная переменная стадии.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinVar {
    Position,
    PointSize,
    VertexId,
    InstanceId,
    FragCoord,
    FrontFacing,
    PointCoord,
    FragColor,
    FragDepth,
    GlobalInvocationId,
    LocalInvocationId,
    WorkGroupId,
    NumWorkGroups,
    LocalInvocationIndex,
}

/// `(переменная, имя, стадия, выход?)`
const VARIABLES: &[(BuiltinVar, &str, Stage, bool)] = &[
    (BuiltinVar::Position, "gl_Position", Stage::Vertex, true),
    (BuiltinVar::PointSize, "gl_PointSize", Stage::Vertex, true),
    (BuiltinVar::VertexId, "gl_VertexID", Stage::Vertex, false),
    (BuiltinVar::InstanceId, "gl_InstanceID", Stage::Vertex, false),
    (BuiltinVar::FragCoord, "gl_FragCoord", Stage::Fragment, false),
    (BuiltinVar::FrontFacing, "gl_FrontFacing", Stage::Fragment, false),
    (BuiltinVar::PointCoord, "gl_PointCoord", Stage::Fragment, false),
    (BuiltinVar::FragColor, "gl_FragColor", Stage::Fragment, true),
    (BuiltinVar::FragDepth, "gl_FragDepth", Stage::Fragment, true),
    (BuiltinVar::GlobalInvocationId, "gl_GlobalInvocationID", Stage::Compute, false),
    (BuiltinVar::LocalInvocationId, "gl_LocalInvocationID", Stage::Compute, false),
    (BuiltinVar::WorkGroupId, "gl_WorkGroupID", Stage::Compute, false),
    (BuiltinVar::NumWorkGroups, "gl_NumWorkGroups", Stage::Compute, false),
    (BuiltinVar::LocalInvocationIndex, "gl_LocalInvocationIndex", Stage::Compute, false),
];

impl BuiltinVar {
    /// Найти переменную по имени, доступную в стадии.
    pub fn lookup(name: &str, stage: Stage) -> Option<BuiltinVar> {
        VARIABLES
            .iter()
            .find(|(_, n, s, _)| *n == name && *s == stage)
            .map(|(var, ..)| *var)
    }

    fn entry(self) -> (BuiltinVar, &'static str, Stage, bool) {
        VARIABLES
            .iter()
            .copied()
            .find(|(var, ..)| *var == self)
            .unwrap_or((self, "gl_Position", Stage::Vertex, true))
    }

    pub fn name(self) -> &'static str {
        self.entry().1
    }

    pub fn stage(self) -> Stage {
        self.entry().2
    }

    pub fn is_output(self) -> bool {
        self.entry().3
    }

    pub fn ty(self) -> Type {
        let uvec3 = Type::Vector(ScalarKind::Uint, 3);
        match self {
            BuiltinVar::Position | BuiltinVar::FragCoord | BuiltinVar::FragColor => Type::vec(4),
            BuiltinVar::PointSize | BuiltinVar::FragDepth => Type::FLOAT,
            BuiltinVar::VertexId | BuiltinVar::InstanceId => Type::INT,
            BuiltinVar::FrontFacing => Type::BOOL,
            BuiltinVar::PointCoord => Type::vec(2),
            BuiltinVar::GlobalInvocationId
            | BuiltinVar::LocalInvocationId
            | BuiltinVar::WorkGroupId
            | BuiltinVar::NumWorkGroups => uvec3,
            BuiltinVar::LocalInvocationIndex => Type::UINT,
        }
    }

    pub fn code(self) -> u32 {
        VARIABLES
            .iter()
            .position(|(var, ..)| *var == self)
            .unwrap_or(0) as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        VARIABLES.get(code as usize).map(|(var, ..)| *var)
    }
}
