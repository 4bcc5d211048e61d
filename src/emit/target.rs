//! Целевой диалект: версия, профиль и зависящие от них правила.

use std::fmt;

use crate::builtins::{BuiltinFn, BuiltinVar};
use crate::stage::Stage;
use crate::types::{SamplerDim, SamplerType, ScalarKind, Type};

const DESKTOP_VERSIONS: &[u32] = &[110, 120, 130, 140, 150, 330, 400, 410, 420, 430, 440, 450, 460];
const ES_VERSIONS: &[u32] = &[100, 300, 310, 320];

/// Имена, которые нельзя выдавать пользовательским идентификаторам.
const RESERVED: &[&str] = &[
    "attribute", "const", "uniform", "varying", "buffer", "shared", "coherent", "volatile",
    "restrict", "readonly", "writeonly", "layout", "centroid", "flat", "smooth",
    "noperspective", "patch", "sample", "break", "continue", "do", "for", "while", "switch",
    "case", "default", "if", "else", "subroutine", "in", "out", "inout", "float", "double",
    "int", "void", "bool", "true", "false", "invariant", "precise", "discard", "return",
    "mat2", "mat3", "mat4", "vec2", "vec3", "vec4", "ivec2", "ivec3", "ivec4", "bvec2",
    "bvec3", "bvec4", "uint", "uvec2", "uvec3", "uvec4", "lowp", "mediump", "highp",
    "precision", "sampler2D", "sampler3D", "samplerCube", "sampler2DShadow",
    "sampler2DArray", "isampler2D", "usampler2D", "struct", "main", "input", "output",
    "texture", "asm", "class", "union", "enum", "typedef", "template", "this", "goto",
    "inline", "noinline", "public", "static", "extern", "external", "interface", "long",
    "short", "half", "fixed", "unsigned", "superp", "filter", "sizeof", "cast",
    "namespace", "using", "active", "common", "partition",
];

/// Версия и профиль выходного текста.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub version: u32,
    pub es: bool,
}

impl Target {
    /// Проверить, что версия существует в выбранном профиле.
    pub fn new(version: u32, es: bool) -> Result<Self, String> {
        let known = if es { ES_VERSIONS } else { DESKTOP_VERSIONS };
        if known.contains(&version) {
            Ok(Self { version, es })
        } else {
            Err(format!("unsupported target version {}", Self { version, es }))
        }
    }

    fn at_least(self, desktop: u32, es: u32) -> bool {
        self.version >= if self.es { es } else { desktop }
    }

    /// `attribute`/`varying`, `gl_FragColor`, `texture2D`.
    pub fn is_legacy(self) -> bool {
        !self.at_least(130, 300)
    }

    /// `layout(location)` на входах вершин и выходах фрагментов.
    pub fn has_attribute_locations(self) -> bool {
        self.at_least(330, 300)
    }

    /// `layout(location)` на всех интерфейсных переменных.
    pub fn has_varying_locations(self) -> bool {
        self.at_least(410, 310)
    }

    pub fn has_uniform_locations(self) -> bool {
        self.at_least(430, 310)
    }

    pub fn has_binding(self) -> bool {
        self.at_least(420, 310)
    }

    pub fn supports_compute(self) -> bool {
        self.at_least(430, 310)
    }

    pub fn has_interpolation_qualifiers(self) -> bool {
        !self.is_legacy()
    }

    /// `#version N[ es]`.
    pub fn version_line(self) -> String {
        if self.es && self.version >= 300 {
            format!("#version {} es", self.version)
        } else {
            format!("#version {}", self.version)
        }
    }

    pub fn is_reserved(name: &str) -> bool {
        name.starts_with("gl_") || name.contains("__") || RESERVED.contains(&name)
    }

    /// Проверить, что тип выразим в целевом диалекте.
    pub fn check_type(self, ty: &Type) -> Result<(), String> {
        if !self.is_legacy() {
            return Ok(());
        }
        match ty.cumulative().0 {
            Type::Scalar(ScalarKind::Uint) | Type::Vector(ScalarKind::Uint, _) => {
                Err(format!("'{}' requires GLSL 130 or ESSL 300", ty))
            }
            Type::Matrix { columns, rows } if columns != rows => {
                Err(format!("'{}' is not available in {}", ty, self))
            }
            Type::Sampler(sampler) => self.check_sampler(*sampler),
            _ => Ok(()),
        }
    }

    fn check_sampler(self, sampler: SamplerType) -> Result<(), String> {
        if sampler.kind != ScalarKind::Float {
            return Err(format!("'{}' is not available in {}", sampler.name(), self));
        }
        match sampler.dim {
            SamplerDim::D2Array => Err(format!("'sampler2DArray' is not available in {}", self)),
            SamplerDim::D3 if self.es => {
                Err(format!("'sampler3D' is not available in {}", self))
            }
            _ if sampler.shadow && self.es => {
                Err(format!("'{}' is not available in {}", sampler.name(), self))
            }
            _ => Ok(()),
        }
    }

    /// Встроенные переменные, отсутствующие в устаревших версиях.
    pub fn check_builtin_var(self, var: BuiltinVar) -> Result<(), String> {
        let unavailable = match var {
            BuiltinVar::VertexId | BuiltinVar::InstanceId => self.is_legacy(),
            BuiltinVar::FragDepth => self.es && self.version < 300,
            _ => false,
        };
        if unavailable {
            Err(format!("'{}' is not available in {}", var.name(), self))
        } else {
            Ok(())
        }
    }

    /// Имя встроенной функции в целевом диалекте.
    ///
    /// Для выборок из текстур в устаревших версиях имя зависит от
    /// сэмплера и стадии; второй элемент: суффикс выражения (`.r` у
    /// `shadow2D`).
    pub fn builtin_name(
        self,
        func: BuiltinFn,
        sampler: Option<SamplerType>,
        stage: Stage,
    ) -> Result<(String, &'static str), String> {
        let unavailable = || format!("'{}' is not available in {}", func.name(), self);
        if !self.is_legacy() {
            return Ok((func.name().to_string(), ""));
        }
        match func {
            BuiltinFn::TexelFetch
            | BuiltinFn::TextureSize
            | BuiltinFn::Trunc
            | BuiltinFn::Round
            | BuiltinFn::Inverse
            | BuiltinFn::Determinant => Err(unavailable()),
            BuiltinFn::Transpose if self.es || self.version < 120 => Err(unavailable()),
            BuiltinFn::Texture | BuiltinFn::TextureLod | BuiltinFn::TextureProj => {
                let sampler = sampler.ok_or_else(unavailable)?;
                self.check_sampler(sampler)?;
                let base = match (sampler.dim, sampler.shadow) {
                    (SamplerDim::D2, false) => "texture2D",
                    (SamplerDim::D2, true) => "shadow2D",
                    (SamplerDim::Cube, false) => "textureCube",
                    (SamplerDim::D3, false) => "texture3D",
                    _ => return Err(unavailable()),
                };
                let suffix = match func {
                    // во фрагментной стадии ES 100 выборки с lod есть только в расширении
                    BuiltinFn::TextureLod if self.es && stage == Stage::Fragment => "LodEXT",
                    BuiltinFn::TextureLod => "Lod",
                    BuiltinFn::TextureProj => "Proj",
                    _ => "",
                };
                if func == BuiltinFn::TextureProj && sampler.dim == SamplerDim::Cube {
                    return Err(unavailable());
                }
                // shadow2D возвращает vec4, значение сравнения в .r
                let swizzle = if sampler.shadow { ".r" } else { "" };
                Ok((format!("{}{}", base, suffix), swizzle))
            }
            _ => Ok((func.name().to_string(), "")),
        }
    }

    /// `#extension`, нужные для функции в стадии `stage`.
    ///
    /// В вершинной стадии выборки с lod входят в ядро языка.
    pub fn builtin_extension(self, func: BuiltinFn, stage: Stage) -> Option<&'static str> {
        if self.es && self.version == 100 && func.fragment_only() {
            return Some("GL_OES_standard_derivatives");
        }
        let fragment_lod = func == BuiltinFn::TextureLod && stage == Stage::Fragment;
        if !fragment_lod || !self.is_legacy() {
            return None;
        }
        if self.es {
            Some("GL_EXT_shader_texture_lod")
        } else {
            Some("GL_ARB_shader_texture_lod")
        }
    }

    /// Проверка стадии целиком.
    pub fn check_stage(self, stage: Stage) -> Result<(), String> {
        if stage == Stage::Compute && !self.supports_compute() {
            return Err(format!("compute shaders require GLSL 430 or ESSL 310, not {}", self));
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.es {
            write!(f, "{} es", self.version)
        } else {
            write!(f, "{}", self.version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_versions() {
        assert!(Target::new(300, true).is_ok());
        assert!(Target::new(330, false).is_ok());
        assert!(Target::new(300, false).is_err());
        assert!(Target::new(450, true).is_err());
    }

    #[test]
    fn test_feature_thresholds() {
        let es100 = Target::new(100, true).unwrap();
        let es300 = Target::new(300, true).unwrap();
        let gl330 = Target::new(330, false).unwrap();
        let gl430 = Target::new(430, false).unwrap();
        assert!(es100.is_legacy());
        assert!(!es300.is_legacy());
        assert!(es300.has_attribute_locations());
        assert!(!es300.has_varying_locations());
        assert!(!gl330.has_uniform_locations());
        assert!(gl430.has_uniform_locations());
        assert!(es100.check_stage(Stage::Compute).is_err());
        assert!(gl430.check_stage(Stage::Compute).is_ok());
        assert_eq!(es300.version_line(), "#version 300 es");
        assert_eq!(es100.version_line(), "#version 100");
    }

    #[test]
    fn test_legacy_texture_names() {
        let gl120 = Target::new(120, false).unwrap();
        let cube = SamplerType::new(SamplerDim::Cube);
        let shadow = SamplerType {
            shadow: true,
            ..SamplerType::new(SamplerDim::D2)
        };
        assert_eq!(
            gl120.builtin_name(BuiltinFn::TextureLod, Some(cube), Stage::Vertex).unwrap(),
            ("textureCubeLod".to_string(), "")
        );
        assert_eq!(
            gl120.builtin_name(BuiltinFn::Texture, Some(shadow), Stage::Fragment).unwrap(),
            ("shadow2D".to_string(), ".r")
        );
        assert!(gl120.builtin_name(BuiltinFn::TexelFetch, None, Stage::Fragment).is_err());
        let es100 = Target::new(100, true).unwrap();
        assert!(es100.builtin_name(BuiltinFn::Texture, Some(shadow), Stage::Fragment).is_err());
        assert_eq!(
            es100.builtin_extension(BuiltinFn::DFdx, Stage::Fragment),
            Some("GL_OES_standard_derivatives")
        );
    }

    #[test]
    fn test_lod_lookups_per_stage() {
        let es100 = Target::new(100, true).unwrap();
        let gl120 = Target::new(120, false).unwrap();
        let es300 = Target::new(300, true).unwrap();
        let flat = Some(SamplerType::new(SamplerDim::D2));
        let cube = Some(SamplerType::new(SamplerDim::Cube));

        assert_eq!(
            es100.builtin_name(BuiltinFn::TextureLod, flat, Stage::Fragment).unwrap(),
            ("texture2DLodEXT".to_string(), "")
        );
        assert_eq!(
            es100.builtin_name(BuiltinFn::TextureLod, cube, Stage::Fragment).unwrap(),
            ("textureCubeLodEXT".to_string(), "")
        );
        assert_eq!(
            es100.builtin_extension(BuiltinFn::TextureLod, Stage::Fragment),
            Some("GL_EXT_shader_texture_lod")
        );
        assert_eq!(
            es100.builtin_name(BuiltinFn::TextureLod, flat, Stage::Vertex).unwrap(),
            ("texture2DLod".to_string(), "")
        );
        assert_eq!(es100.builtin_extension(BuiltinFn::TextureLod, Stage::Vertex), None);

        assert_eq!(
            gl120.builtin_name(BuiltinFn::TextureLod, flat, Stage::Fragment).unwrap(),
            ("texture2DLod".to_string(), "")
        );
        assert_eq!(
            gl120.builtin_extension(BuiltinFn::TextureLod, Stage::Fragment),
            Some("GL_ARB_shader_texture_lod")
        );
        assert_eq!(gl120.builtin_extension(BuiltinFn::TextureLod, Stage::Vertex), None);

        assert_eq!(
            es300.builtin_name(BuiltinFn::TextureLod, flat, Stage::Fragment).unwrap(),
            ("textureLod".to_string(), "")
        );
        assert_eq!(es300.builtin_extension(BuiltinFn::TextureLod, Stage::Fragment), None);
    }

    #[test]
    fn test_legacy_types() {
        let es100 = Target::new(100, true).unwrap();
        assert!(es100.check_type(&Type::UINT).is_err());
        assert!(es100
            .check_type(&Type::Sampler(SamplerType::new(SamplerDim::D2Array)))
            .is_err());
        assert!(es100.check_type(&Type::Array(Box::new(Type::vec(4)), 4)).is_ok());
        assert!(Target::is_reserved("gl_Foo"));
        assert!(Target::is_reserved("input"));
        assert!(!Target::is_reserved("u_tint"));
    }
}
