//! Рефлексия uniform-переменных скомпонованной программы.
//!
//! Таблица строится в порядке объявления uniform; каждая переменная
//! получает непрерывный диапазон регистров, начиная с 0. Индекс регистра
//! записывается обратно в программу как её location, поэтому рефлексия
//! выполняется строго до понижения в байткод.

use serde::{Deserialize, Serialize};

use crate::error::{ShaderError, ShaderResult};
use crate::ir::Storage;
use crate::linker::LinkedProgram;
use crate::types::{SamplerDim, SamplerType, ScalarKind, Type};

/// Категория uniform в артефакте.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniformType {
    Sampler,
    Vec4,
    Mat3,
    Mat4,
    /// Тип вне четырёх категорий; регистры всё равно резервируются.
    Unknown,
}

impl UniformType {
    pub fn classify(ty: &Type) -> Self {
        match ty {
            Type::Sampler(_) => UniformType::Sampler,
            Type::Vector(ScalarKind::Float, 4) => UniformType::Vec4,
            Type::Matrix {
                columns: 3,
                rows: 3,
            } => UniformType::Mat3,
            Type::Matrix {
                columns: 4,
                rows: 4,
            } => UniformType::Mat4,
            _ => UniformType::Unknown,
        }
    }

    /// Порядковый номер в бинарном формате.
    pub fn code(self) -> u8 {
        match self {
            UniformType::Sampler => 0,
            UniformType::Vec4 => 1,
            UniformType::Mat3 => 2,
            UniformType::Mat4 => 3,
            UniformType::Unknown => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(UniformType::Sampler),
            1 => Some(UniformType::Vec4),
            2 => Some(UniformType::Mat3),
            3 => Some(UniformType::Mat4),
            4 => Some(UniformType::Unknown),
            _ => None,
        }
    }
}

/// Тип компонента, возвращаемого выборкой из текстуры.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureComponent {
    Float = 0,
    Int = 1,
    Uint = 2,
    Depth = 3,
}

impl TextureComponent {
    pub fn of(sampler: SamplerType) -> Self {
        if sampler.shadow {
            return TextureComponent::Depth;
        }
        match sampler.kind {
            ScalarKind::Int => TextureComponent::Int,
            ScalarKind::Uint => TextureComponent::Uint,
            _ => TextureComponent::Float,
        }
    }
}

/// Размерность текстуры в кодировке загрузчика.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureDimension {
    D2 = 1,
    D2Array = 2,
    Cube = 3,
    D3 = 5,
}

impl From<SamplerDim> for TextureDimension {
    fn from(dim: SamplerDim) -> Self {
        match dim {
            SamplerDim::D2 => TextureDimension::D2,
            SamplerDim::D2Array => TextureDimension::D2Array,
            SamplerDim::Cube => TextureDimension::Cube,
            SamplerDim::D3 => TextureDimension::D3,
        }
    }
}

/// Описание одной uniform-переменной.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: UniformType,
    pub count: u32,
    pub reg_index: u32,
    pub reg_count: u32,
    /// Для сэмплеров: [`TextureComponent`], иначе 0.
    pub tex_component: u32,
    /// Для сэмплеров: [`TextureDimension`], иначе 0.
    pub tex_dimension: u32,
}

/// Упорядоченная таблица uniform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformTable {
    uniforms: Vec<UniformDescriptor>,
}

impl UniformTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(uniforms: Vec<UniformDescriptor>) -> Self {
        Self { uniforms }
    }

    pub fn push(&mut self, descriptor: UniformDescriptor) {
        self.uniforms.push(descriptor);
    }

    pub fn len(&self) -> usize {
        self.uniforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniformDescriptor> {
        self.uniforms.iter()
    }

    pub fn descriptors(&self) -> &[UniformDescriptor] {
        &self.uniforms
    }

    pub fn get(&self, name: &str) -> Option<&UniformDescriptor> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    /// Следующий свободный регистр.
    pub fn register_count(&self) -> u32 {
        self.uniforms
            .last()
            .map_or(0, |u| u.reg_index.saturating_add(u.reg_count))
    }

    /// Регистры идут подряд с нуля, `reg_count == count`.
    pub fn is_contiguous(&self) -> bool {
        let mut cursor = 0u32;
        for u in &self.uniforms {
            if u.reg_index != cursor || u.reg_count != u.count {
                return false;
            }
            cursor = match cursor.checked_add(u.reg_count) {
                Some(next) => next,
                None => return false,
            };
        }
        true
    }

    /// JSON-дамп таблицы (для отладки и инструментов).
    pub fn to_json(&self) -> ShaderResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ShaderError::Reflection(e.to_string()))
    }
}

/// Построить таблицу uniform и вернуть программу с обновлёнными location.
pub fn reflect(linked: LinkedProgram) -> ShaderResult<(UniformTable, LinkedProgram)> {
    let LinkedProgram { mut program, log } = linked;
    let mut table = UniformTable::new();
    let mut cursor = 0u32;

    for global in program
        .globals
        .iter_mut()
        .filter(|g| g.storage == Storage::Uniform)
    {
        let (base, count) = global.ty.cumulative();
        if count == 0 {
            return Err(ShaderError::Reflection(format!(
                "'{}' : malformed array type '{}'",
                global.name, global.ty
            )));
        }

        let ty = UniformType::classify(base);
        let (tex_component, tex_dimension) = match base {
            Type::Sampler(sampler) => (
                TextureComponent::of(*sampler) as u32,
                TextureDimension::from(sampler.dim) as u32,
            ),
            _ => (0, 0),
        };
        if ty == UniformType::Unknown {
            log::debug!(
                "uniform '{}' of type '{}' has no register category",
                global.name,
                global.ty
            );
        }

        let reg_index = cursor;
        cursor = cursor.checked_add(count).ok_or_else(|| {
            ShaderError::Reflection(format!("'{}' : register index overflow", global.name))
        })?;
        global.location = Some(reg_index);

        log::trace!(
            "{}, {:?}, {}, {}, {}",
            global.name,
            ty,
            count,
            reg_index,
            count
        );
        table.push(UniformDescriptor {
            name: global.name.clone(),
            ty,
            count,
            reg_index,
            reg_count: count,
            tex_component,
            tex_dimension,
        });
    }

    log::debug!(
        "reflected {} uniforms using {} registers",
        table.len(),
        table.register_count()
    );
    Ok((table, LinkedProgram { program, log }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticLog;
    use crate::includer::MemoryIncluder;
    use crate::linker::link;
    use crate::parser::SourceUnit;
    use crate::sema::parse_program;
    use crate::stage::Stage;

    fn reflect_source(stage: Stage, src: &str) -> (UniformTable, LinkedProgram) {
        let unit = SourceUnit::new(stage, "reflect.glsl", src);
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        let parsed = parse_program(&unit, &mut includer, &mut log).unwrap();
        let linked = link(vec![parsed], &mut log).unwrap();
        reflect(linked).unwrap()
    }

    #[test]
    fn test_tint_and_albedo() {
        let (table, _) = reflect_source(
            Stage::Fragment,
            "uniform vec4 u_tint; uniform sampler2D s_albedo; void main(){}",
        );
        assert_eq!(table.len(), 2);
        let tint = &table.descriptors()[0];
        assert_eq!(tint.name, "u_tint");
        assert_eq!(tint.ty, UniformType::Vec4);
        assert_eq!((tint.count, tint.reg_index, tint.reg_count), (1, 0, 1));
        let albedo = &table.descriptors()[1];
        assert_eq!(albedo.name, "s_albedo");
        assert_eq!(albedo.ty, UniformType::Sampler);
        assert_eq!((albedo.count, albedo.reg_index, albedo.reg_count), (1, 1, 1));
        assert_eq!(albedo.tex_component, 0);
        assert_eq!(albedo.tex_dimension, 1);
    }

    #[test]
    fn test_array_reserves_registers() {
        let (table, _) = reflect_source(
            Stage::Vertex,
            "uniform vec4 u_arr[4];\nuniform mat4 u_mvp;\nvoid main(){ gl_Position = u_mvp * u_arr[0]; }",
        );
        let arr = table.get("u_arr").unwrap();
        assert_eq!((arr.count, arr.reg_index, arr.reg_count), (4, 0, 4));
        let mvp = table.get("u_mvp").unwrap();
        assert_eq!(mvp.ty, UniformType::Mat4);
        assert_eq!(mvp.reg_index, 4);
        assert!(table.is_contiguous());
    }

    #[test]
    fn test_unknown_type_keeps_continuity() {
        let (table, linked) = reflect_source(
            Stage::Fragment,
            "uniform float u_time;\nuniform vec2 u_offsets[3][2];\nuniform mat3 u_normal;\nvoid main(){}",
        );
        let types: Vec<UniformType> = table.iter().map(|u| u.ty).collect();
        assert_eq!(
            types,
            [UniformType::Unknown, UniformType::Unknown, UniformType::Mat3]
        );
        assert_eq!(table.get("u_offsets").unwrap().count, 6);
        assert_eq!(table.get("u_normal").unwrap().reg_index, 7);
        assert_eq!(linked.program.global("u_normal").unwrap().location, Some(7));
    }

    #[test]
    fn test_sampler_texture_info() {
        let (table, _) = reflect_source(
            Stage::Fragment,
            "#version 300 es\nuniform highp sampler2DShadow s_shadow;\nuniform highp isampler2D s_ids;\nuniform samplerCube s_env;\nuniform highp sampler3D s_volume;\nuniform highp sampler2DArray s_layers;\nvoid main(){}",
        );
        let info = |name: &str| {
            let u = table.get(name).unwrap();
            (u.tex_component, u.tex_dimension)
        };
        assert_eq!(info("s_shadow"), (3, 1));
        assert_eq!(info("s_ids"), (1, 1));
        assert_eq!(info("s_env"), (0, 3));
        assert_eq!(info("s_volume"), (0, 5));
        assert_eq!(info("s_layers"), (0, 2));
    }

    #[test]
    fn test_json_dump_uses_wire_names() {
        let (table, _) = reflect_source(Stage::Fragment, "uniform vec4 u_tint; void main(){}");
        let json = table.to_json().unwrap();
        assert!(json.contains("\"regIndex\": 0"));
        assert!(json.contains("\"type\": \"Vec4\""));
    }

    #[test]
    fn test_is_contiguous_detects_gaps() {
        let descriptor = |name: &str, reg_index| UniformDescriptor {
            name: name.to_string(),
            ty: UniformType::Vec4,
            count: 1,
            reg_index,
            reg_count: 1,
            tex_component: 0,
            tex_dimension: 0,
        };
        let table = UniformTable::from_descriptors(vec![descriptor("a", 0), descriptor("b", 2)]);
        assert!(!table.is_contiguous());
        assert_eq!(table.register_count(), 3);
    }
}
