//! Система типов шейдерного языка.
//!
//! Общая для парсера, валидатора, байткода и эмиттера.

use std::fmt;

// === Скаляры и сэмплеры ===

/// Вид скалярного компонента.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Uint => "uint",
            ScalarKind::Float => "float",
        }
    }

    /// Префикс векторного типа (`bvec`, `ivec`, `uvec`, `vec`).
    pub fn vector_prefix(self) -> &'static str {
        match self {
            ScalarKind::Bool => "b",
            ScalarKind::Int => "i",
            ScalarKind::Uint => "u",
            ScalarKind::Float => "",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::Uint)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, ScalarKind::Bool)
    }

    pub fn code(self) -> u32 {
        match self {
            ScalarKind::Bool => 0,
            ScalarKind::Int => 1,
            ScalarKind::Uint => 2,
            ScalarKind::Float => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ScalarKind::Bool),
            1 => Some(ScalarKind::Int),
            2 => Some(ScalarKind::Uint),
            3 => Some(ScalarKind::Float),
            _ => None,
        }
    }
}

/// Размерность текстуры сэмплера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerDim {
    D2,
    D3,
    Cube,
    D2Array,
}

impl SamplerDim {
    pub fn code(self) -> u32 {
        match self {
            SamplerDim::D2 => 0,
            SamplerDim::D3 => 1,
            SamplerDim::Cube => 2,
            SamplerDim::D2Array => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(SamplerDim::D2),
            1 => Some(SamplerDim::D3),
            2 => Some(SamplerDim::Cube),
            3 => Some(SamplerDim::D2Array),
            _ => None,
        }
    }
}

/// Тип сэмплера: размерность, сравнение глубины, вид выборки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerType {
    pub dim: SamplerDim,
    pub shadow: bool,
    pub kind: ScalarKind,
}

impl SamplerType {
    pub const fn new(dim: SamplerDim) -> Self {
        Self {
            dim,
            shadow: false,
            kind: ScalarKind::Float,
        }
    }

    /// Размер координаты для `texture()`.
    pub fn coord_size(self) -> u8 {
        match (self.dim, self.shadow) {
            (SamplerDim::D2, false) => 2,
            (SamplerDim::D2, true) => 3,
            (SamplerDim::D3, _) | (SamplerDim::Cube, _) | (SamplerDim::D2Array, _) => 3,
        }
    }

    /// Размер целочисленной координаты для `texelFetch()` / `textureSize()`.
    pub fn texel_size(self) -> u8 {
        match self.dim {
            SamplerDim::D2 | SamplerDim::Cube => 2,
            SamplerDim::D3 | SamplerDim::D2Array => 3,
        }
    }

    /// Тип результата выборки.
    pub fn sample_type(self) -> Type {
        if self.shadow {
            Type::FLOAT
        } else {
            Type::Vector(self.kind, 4)
        }
    }

    pub fn name(self) -> String {
        let dim = match self.dim {
            SamplerDim::D2 => "2D",
            SamplerDim::D3 => "3D",
            SamplerDim::Cube => "Cube",
            SamplerDim::D2Array => "2DArray",
        };
        let shadow = if self.shadow { "Shadow" } else { "" };
        format!("{}sampler{}{}", self.kind.vector_prefix(), dim, shadow)
    }
}

// === Типы ===

/// Тип значения.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Scalar(ScalarKind),
    Vector(ScalarKind, u8),
    /// Матрица float: столбцы × строки.
    Matrix { columns: u8, rows: u8 },
    Sampler(SamplerType),
    Array(Box<Type>, u32),
}

impl Type {
    pub const BOOL: Type = Type::Scalar(ScalarKind::Bool);
    pub const INT: Type = Type::Scalar(ScalarKind::Int);
    pub const UINT: Type = Type::Scalar(ScalarKind::Uint);
    pub const FLOAT: Type = Type::Scalar(ScalarKind::Float);

    pub fn vec(size: u8) -> Type {
        Type::Vector(ScalarKind::Float, size)
    }

    pub fn mat(size: u8) -> Type {
        Type::Matrix {
            columns: size,
            rows: size,
        }
    }

    /// Скаляр (size == 1) или вектор заданного вида.
    pub fn scalar_or_vector(kind: ScalarKind, size: u8) -> Type {
        if size == 1 {
            Type::Scalar(kind)
        } else {
            Type::Vector(kind, size)
        }
    }

    /// Найти тип по имени ключевого слова.
    pub fn from_name(name: &str) -> Option<Type> {
        let ty = match name {
            "void" => Type::Void,
            "bool" => Type::BOOL,
            "int" => Type::INT,
            "uint" => Type::UINT,
            "float" => Type::FLOAT,
            "sampler2D" => Type::Sampler(SamplerType::new(SamplerDim::D2)),
            "sampler3D" => Type::Sampler(SamplerType::new(SamplerDim::D3)),
            "samplerCube" => Type::Sampler(SamplerType::new(SamplerDim::Cube)),
            "sampler2DArray" => Type::Sampler(SamplerType::new(SamplerDim::D2Array)),
            "sampler2DShadow" => Type::Sampler(SamplerType {
                shadow: true,
                ..SamplerType::new(SamplerDim::D2)
            }),
            "isampler2D" => Type::Sampler(SamplerType {
                kind: ScalarKind::Int,
                ..SamplerType::new(SamplerDim::D2)
            }),
            "usampler2D" => Type::Sampler(SamplerType {
                kind: ScalarKind::Uint,
                ..SamplerType::new(SamplerDim::D2)
            }),
            _ => return Self::parse_composite(name),
        };
        Some(ty)
    }

    fn parse_composite(name: &str) -> Option<Type> {
        let digit = |s: &str| -> Option<u8> {
            match s {
                "2" => Some(2),
                "3" => Some(3),
                "4" => Some(4),
                _ => None,
            }
        };

        if let Some(rest) = name.strip_prefix("mat") {
            return match rest.split_once('x') {
                Some((c, r)) => Some(Type::Matrix {
                    columns: digit(c)?,
                    rows: digit(r)?,
                }),
                None => Some(Type::mat(digit(rest)?)),
            };
        }

        let (kind, rest) = if let Some(rest) = name.strip_prefix("bvec") {
            (ScalarKind::Bool, rest)
        } else if let Some(rest) = name.strip_prefix("ivec") {
            (ScalarKind::Int, rest)
        } else if let Some(rest) = name.strip_prefix("uvec") {
            (ScalarKind::Uint, rest)
        } else if let Some(rest) = name.strip_prefix("vec") {
            (ScalarKind::Float, rest)
        } else {
            return None;
        };
        Some(Type::Vector(kind, digit(rest)?))
    }

    // === Классификация ===

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector(..))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Type::Matrix { .. })
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self, Type::Sampler(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(..))
    }

    /// Скаляр или вектор.
    pub fn is_scalar_or_vector(&self) -> bool {
        matches!(self, Type::Scalar(_) | Type::Vector(..))
    }

    /// Вид скалярного компонента (матрицы: float).
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Type::Scalar(k) | Type::Vector(k, _) => Some(*k),
            Type::Matrix { .. } => Some(ScalarKind::Float),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.scalar_kind().map(ScalarKind::is_numeric).unwrap_or(false)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Scalar(k) | Type::Vector(k, _) if k.is_integer())
    }

    /// `float` или `vecN`.
    pub fn is_float_gen(&self) -> bool {
        matches!(
            self,
            Type::Scalar(ScalarKind::Float) | Type::Vector(ScalarKind::Float, _)
        )
    }

    pub fn is_bool_gen(&self) -> bool {
        matches!(
            self,
            Type::Scalar(ScalarKind::Bool) | Type::Vector(ScalarKind::Bool, _)
        )
    }

    /// Число скалярных компонентов (0 для непрозрачных и массивов).
    pub fn components(&self) -> u32 {
        match self {
            Type::Scalar(_) => 1,
            Type::Vector(_, n) => *n as u32,
            Type::Matrix { columns, rows } => (*columns as u32) * (*rows as u32),
            _ => 0,
        }
    }

    /// Размер вектора (1 для скаляра).
    pub fn vector_size(&self) -> Option<u8> {
        match self {
            Type::Scalar(_) => Some(1),
            Type::Vector(_, n) => Some(*n),
            _ => None,
        }
    }

    /// Тот же размер, другой вид компонента.
    pub fn with_kind(&self, kind: ScalarKind) -> Option<Type> {
        match self {
            Type::Scalar(_) => Some(Type::Scalar(kind)),
            Type::Vector(_, n) => Some(Type::Vector(kind, *n)),
            Type::Matrix { .. } if kind == ScalarKind::Float => Some(self.clone()),
            _ => None,
        }
    }

    /// Тип элемента при индексации.
    pub fn element(&self) -> Option<Type> {
        match self {
            Type::Array(elem, _) => Some((**elem).clone()),
            Type::Vector(k, _) => Some(Type::Scalar(*k)),
            Type::Matrix { rows, .. } => Some(Type::vec(*rows)),
            _ => None,
        }
    }

    /// Число элементов при индексации.
    pub fn index_bound(&self) -> Option<u32> {
        match self {
            Type::Array(_, n) => Some(*n),
            Type::Vector(_, n) => Some(*n as u32),
            Type::Matrix { columns, .. } => Some(*columns as u32),
            _ => None,
        }
    }

    /// Базовый тип и суммарное число элементов для массивов.
    pub fn cumulative(&self) -> (&Type, u32) {
        match self {
            Type::Array(elem, n) => {
                let (base, inner) = elem.cumulative();
                (base, n.saturating_mul(inner))
            }
            other => (other, 1),
        }
    }

    /// Число слотов интерфейсных location, занимаемых переменной.
    pub fn location_slots(&self) -> u32 {
        match self {
            Type::Matrix { columns, .. } => *columns as u32,
            Type::Array(elem, n) => n.saturating_mul(elem.location_slots()),
            _ => 1,
        }
    }

    /// Размерности массива от внешней к внутренней.
    pub fn array_dims(&self) -> Vec<u32> {
        let mut dims = Vec::new();
        let mut current = self;
        while let Type::Array(elem, n) = current {
            dims.push(*n);
            current = elem;
        }
        dims
    }

    /// Строка размерностей массива: `[2][3]`.
    pub fn array_suffix(&self) -> String {
        self.array_dims()
            .iter()
            .map(|n| format!("[{}]", n))
            .collect()
    }

    /// Имя типа без размерностей массива.
    pub fn base_name(&self) -> String {
        match self {
            Type::Void => "void".to_string(),
            Type::Scalar(k) => k.name().to_string(),
            Type::Vector(k, n) => format!("{}vec{}", k.vector_prefix(), n),
            Type::Matrix { columns, rows } if columns == rows => format!("mat{}", columns),
            Type::Matrix { columns, rows } => format!("mat{}x{}", columns, rows),
            Type::Sampler(s) => s.name(),
            Type::Array(..) => self.cumulative().0.base_name(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base_name(), self.array_suffix())
    }
}

// === Константы ===

/// Скалярное константное значение.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
}

impl ConstValue {
    pub fn kind(self) -> ScalarKind {
        match self {
            ConstValue::Bool(_) => ScalarKind::Bool,
            ConstValue::Int(_) => ScalarKind::Int,
            ConstValue::Uint(_) => ScalarKind::Uint,
            ConstValue::Float(_) => ScalarKind::Float,
        }
    }

    pub fn ty(self) -> Type {
        Type::Scalar(self.kind())
    }

    /// Битовое представление в слове байткода.
    pub fn to_bits(self) -> u32 {
        match self {
            ConstValue::Bool(b) => b as u32,
            ConstValue::Int(v) => v as u32,
            ConstValue::Uint(v) => v,
            ConstValue::Float(v) => v.to_bits(),
        }
    }

    pub fn from_bits(kind: ScalarKind, bits: u32) -> Self {
        match kind {
            ScalarKind::Bool => ConstValue::Bool(bits != 0),
            ScalarKind::Int => ConstValue::Int(bits as i32),
            ScalarKind::Uint => ConstValue::Uint(bits),
            ScalarKind::Float => ConstValue::Float(f32::from_bits(bits)),
        }
    }

    /// Преобразование вида по правилам конструкторов.
    pub fn cast(self, kind: ScalarKind) -> Self {
        match (self, kind) {
            (v, k) if v.kind() == k => v,
            (ConstValue::Bool(b), ScalarKind::Int) => ConstValue::Int(b as i32),
            (ConstValue::Bool(b), ScalarKind::Uint) => ConstValue::Uint(b as u32),
            (ConstValue::Bool(b), ScalarKind::Float) => ConstValue::Float(b as u32 as f32),
            (ConstValue::Int(v), ScalarKind::Bool) => ConstValue::Bool(v != 0),
            (ConstValue::Int(v), ScalarKind::Uint) => ConstValue::Uint(v as u32),
            (ConstValue::Int(v), ScalarKind::Float) => ConstValue::Float(v as f32),
            (ConstValue::Uint(v), ScalarKind::Bool) => ConstValue::Bool(v != 0),
            (ConstValue::Uint(v), ScalarKind::Int) => ConstValue::Int(v as i32),
            (ConstValue::Uint(v), ScalarKind::Float) => ConstValue::Float(v as f32),
            (ConstValue::Float(v), ScalarKind::Bool) => ConstValue::Bool(v != 0.0),
            (ConstValue::Float(v), ScalarKind::Int) => ConstValue::Int(v as i32),
            (ConstValue::Float(v), ScalarKind::Uint) => ConstValue::Uint(v as u32),
            (v, _) => v,
        }
    }

    /// Целое значение (для размеров массивов и индексов).
    pub fn as_integer(self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(v as i64),
            ConstValue::Uint(v) => Some(v as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Type::from_name("vec4"), Some(Type::vec(4)));
        assert_eq!(
            Type::from_name("ivec3"),
            Some(Type::Vector(ScalarKind::Int, 3))
        );
        assert_eq!(Type::from_name("mat3"), Some(Type::mat(3)));
        assert_eq!(
            Type::from_name("mat2x3"),
            Some(Type::Matrix {
                columns: 2,
                rows: 3
            })
        );
        assert_eq!(Type::from_name("vec5"), None);
        assert_eq!(Type::from_name("main"), None);
        assert_eq!(
            Type::from_name("sampler2DShadow").unwrap().to_string(),
            "sampler2DShadow"
        );
        assert_eq!(Type::from_name("usampler2D").unwrap().to_string(), "usampler2D");
    }

    #[test]
    fn test_array_cumulative() {
        let ty = Type::Array(Box::new(Type::Array(Box::new(Type::FLOAT), 3)), 2);
        let (base, count) = ty.cumulative();
        assert_eq!(base, &Type::FLOAT);
        assert_eq!(count, 6);
        assert_eq!(ty.to_string(), "float[2][3]");
        assert_eq!(Type::Array(Box::new(Type::mat(4)), 2).location_slots(), 8);
    }

    #[test]
    fn test_const_cast() {
        assert_eq!(ConstValue::Int(3).cast(ScalarKind::Float), ConstValue::Float(3.0));
        assert_eq!(ConstValue::Float(2.7).cast(ScalarKind::Int), ConstValue::Int(2));
        assert_eq!(ConstValue::Uint(0).cast(ScalarKind::Bool), ConstValue::Bool(false));
        let bits = ConstValue::Float(-1.5).to_bits();
        assert_eq!(
            ConstValue::from_bits(ScalarKind::Float, bits),
            ConstValue::Float(-1.5)
        );
    }
}
