//! Переносимый байткод: последовательность 32-битных слов.
//!
//! # Формат
//!
//! ```text
//! Заголовок (5 слов):
//!   magic      0x5853_4C47
//!   version    0x0001_0000
//!   generator  0
//!   bound      максимальный идентификатор + 1
//!   stage      0 vertex, 1 fragment, 2 compute
//! Инструкции:
//!   word 0     word_count << 16 | opcode
//!   word 1..   операнды
//! ```
//!
//! Порядок секций: `Source`, `EntryPoint`, `LocalSize`, имена, декорации,
//! типы/константы/глобальные переменные, функции (вызываемые раньше
//! вызывающих).

pub mod instruction;
pub mod opcode;

pub use instruction::Instruction;
pub use opcode::{Decoration, Opcode, ParamMode, StorageClass};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::stage::Stage;

pub const MAGIC: u32 = 0x5853_4C47;
pub const VERSION: u32 = 0x0001_0000;
pub const GENERATOR: u32 = 0;
pub const HEADER_WORDS: usize = 5;

/// Ошибки декодирования байткода.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BytecodeError {
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported bytecode version {0:#010x}")]
    UnsupportedVersion(u32),

    #[error("module header is truncated")]
    TruncatedHeader,

    #[error("unknown stage code {0}")]
    UnknownStage(u32),

    #[error("truncated instruction at word {offset}")]
    Truncated { offset: usize },

    #[error("zero word count at word {offset}")]
    ZeroWordCount { offset: usize },

    #[error("unknown opcode {opcode} at word {offset}")]
    UnknownOpcode { opcode: u16, offset: usize },

    #[error("{opcode} at word {offset} is missing operands")]
    MissingOperands { opcode: &'static str, offset: usize },

    #[error("{opcode} is too long ({words} words)")]
    TooLong { opcode: &'static str, words: usize },

    #[error("invalid string literal")]
    InvalidString,

    #[error("byte length {0} is not a multiple of 4")]
    Misaligned(usize),
}

/// Заголовок модуля.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub stage: Stage,
}

impl Header {
    pub fn new(stage: Stage, bound: u32) -> Self {
        Self {
            version: VERSION,
            generator: GENERATOR,
            bound,
            stage,
        }
    }

    fn words(&self) -> [u32; HEADER_WORDS] {
        [MAGIC, self.version, self.generator, self.bound, self.stage.code()]
    }
}

/// Модуль байткода.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    words: Vec<u32>,
}

impl Module {
    /// Пустой модуль: признак неудачного понижения.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Собрать модуль из заголовка и инструкций.
    pub fn assemble(header: &Header, instructions: &[Instruction]) -> Result<Self, BytecodeError> {
        let mut words = header.words().to_vec();
        for inst in instructions {
            inst.encode(&mut words)?;
        }
        Ok(Self { words })
    }

    /// Принять слова, проверив заголовок.
    pub fn from_words(words: Vec<u32>) -> Result<Self, BytecodeError> {
        let module = Self { words };
        module.header()?;
        Ok(module)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Длина в словах.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn header(&self) -> Result<Header, BytecodeError> {
        let Some(h) = self.words.get(..HEADER_WORDS) else {
            return Err(BytecodeError::TruncatedHeader);
        };
        if h[0] != MAGIC {
            return Err(BytecodeError::BadMagic(h[0]));
        }
        if h[1] >> 16 != VERSION >> 16 {
            return Err(BytecodeError::UnsupportedVersion(h[1]));
        }
        let stage = Stage::from_code(h[4]).ok_or(BytecodeError::UnknownStage(h[4]))?;
        Ok(Header {
            version: h[1],
            generator: h[2],
            bound: h[3],
            stage,
        })
    }

    /// Декодировать все инструкции после заголовка.
    pub fn instructions(&self) -> Result<Vec<Instruction>, BytecodeError> {
        self.header()?;
        let mut out = Vec::new();
        let mut offset = HEADER_WORDS;
        while offset < self.words.len() {
            let (inst, len) = Instruction::decode(&self.words, offset)?;
            out.push(inst);
            offset += len;
        }
        Ok(out)
    }

    /// Слова в little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.words.len() * 4];
        LittleEndian::write_u32_into(&self.words, &mut bytes);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BytecodeError> {
        if bytes.len() % 4 != 0 {
            return Err(BytecodeError::Misaligned(bytes.len()));
        }
        let mut words = vec![0u32; bytes.len() / 4];
        LittleEndian::read_u32_into(bytes, &mut words);
        Self::from_words(words)
    }

    /// Текстовый листинг модуля.
    pub fn disassemble(&self) -> Result<String, BytecodeError> {
        let header = self.header()?;
        let mut out = format!(
            "; version {}.{}, bound {}, stage {}\n",
            header.version >> 16,
            (header.version >> 8) & 0xFF,
            header.bound,
            header.stage
        );
        for inst in self.instructions()? {
            out.push_str(&inst.to_string());
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Module {
        let instructions = vec![
            Instruction::new(Opcode::TypeFloat, vec![1]),
            Instruction::new(Opcode::Constant, vec![1, 2, 1.5f32.to_bits()]),
            Instruction::name(2, "k"),
        ];
        Module::assemble(&Header::new(Stage::Fragment, 3), &instructions).unwrap()
    }

    #[test]
    fn test_header_fields() {
        let module = sample();
        assert_eq!(&module.words()[..5], &[MAGIC, VERSION, 0, 3, 1]);
        let header = module.header().unwrap();
        assert_eq!(header.stage, Stage::Fragment);
        assert_eq!(module.instructions().unwrap().len(), 3);
    }

    #[test]
    fn test_bytes_are_little_endian() {
        let module = sample();
        let bytes = module.to_bytes();
        assert_eq!(&bytes[..4], &[0x47, 0x4C, 0x53, 0x58]);
        assert_eq!(Module::from_bytes(&bytes).unwrap(), module);
        assert_eq!(
            Module::from_bytes(&bytes[..7]),
            Err(BytecodeError::Misaligned(7))
        );
    }

    #[test]
    fn test_rejects_bad_header() {
        assert_eq!(
            Module::from_words(vec![1, 2, 3]),
            Err(BytecodeError::TruncatedHeader)
        );
        assert_eq!(
            Module::from_words(vec![0xDEAD_BEEF, VERSION, 0, 1, 0]),
            Err(BytecodeError::BadMagic(0xDEAD_BEEF))
        );
        assert!(Module::empty().header().is_err());
    }

    #[test]
    fn test_disassemble() {
        let text = sample().disassemble().unwrap();
        assert!(text.contains("%2 = Constant %1"));
        assert!(text.contains("Name %2 \"k\""));
    }
}
