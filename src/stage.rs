//! Стадии шейдерного конвейера.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ShaderError, ShaderResult};
use crate::limits::{StageLimits, DEFAULT_RESOURCE_LIMITS};

/// Стадия конвейера, компилируемая независимо.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Vertex,
    Fragment,
    Compute,
}

impl Stage {
    /// Разобрать букву типа шейдера (`v`, `f`, `c`).
    pub fn from_letter(letter: char) -> ShaderResult<Self> {
        match letter {
            'v' => Ok(Stage::Vertex),
            'f' => Ok(Stage::Fragment),
            'c' => Ok(Stage::Compute),
            other => Err(ShaderError::InvalidOptions(format!(
                "Unsupported shader type: {}",
                other
            ))),
        }
    }

    pub fn letter(self) -> char {
        match self {
            Stage::Vertex => 'v',
            Stage::Fragment => 'f',
            Stage::Compute => 'c',
        }
    }

    /// Числовой код стадии в заголовке байткода.
    pub fn code(self) -> u32 {
        match self {
            Stage::Vertex => 0,
            Stage::Fragment => 1,
            Stage::Compute => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Stage::Vertex),
            1 => Some(Stage::Fragment),
            2 => Some(Stage::Compute),
            _ => None,
        }
    }

    /// Лимиты ресурсов, выбранные по стадии.
    pub fn limits(self) -> StageLimits {
        DEFAULT_RESOURCE_LIMITS.for_stage(self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
            Stage::Compute => "compute",
        };
        f.write_str(name)
    }
}
