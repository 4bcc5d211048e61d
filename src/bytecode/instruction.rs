//! Инструкция байткода: кодирование, декодирование, операнды-идентификаторы.

use std::fmt;

use super::opcode::Opcode;
use super::BytecodeError;

/// Одна декодированная инструкция.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<u32>) -> Self {
        Self { opcode, operands }
    }

    /// `Name target "text"`.
    pub fn name(target: u32, text: &str) -> Self {
        let mut operands = vec![target];
        operands.extend(encode_string(text));
        Self::new(Opcode::Name, operands)
    }

    pub fn word_count(&self) -> usize {
        self.operands.len() + 1
    }

    /// Дописать слова инструкции в `out`.
    pub fn encode(&self, out: &mut Vec<u32>) -> Result<(), BytecodeError> {
        let count = u16::try_from(self.word_count()).map_err(|_| BytecodeError::TooLong {
            opcode: self.opcode.name(),
            words: self.word_count(),
        })?;
        out.push(u32::from(count) << 16 | self.opcode as u32);
        out.extend_from_slice(&self.operands);
        Ok(())
    }

    /// Прочитать инструкцию по смещению `offset`; вернуть её и длину в словах.
    pub fn decode(words: &[u32], offset: usize) -> Result<(Self, usize), BytecodeError> {
        let first = *words.get(offset).ok_or(BytecodeError::Truncated { offset })?;
        let count = (first >> 16) as usize;
        let code = (first & 0xFFFF) as u16;
        if count == 0 {
            return Err(BytecodeError::ZeroWordCount { offset });
        }
        let opcode =
            Opcode::from_u16(code).ok_or(BytecodeError::UnknownOpcode { opcode: code, offset })?;
        let end = offset + count;
        let operands = words
            .get(offset + 1..end)
            .ok_or(BytecodeError::Truncated { offset })?
            .to_vec();
        if operands.len() < opcode.min_operands() {
            return Err(BytecodeError::MissingOperands {
                opcode: opcode.name(),
                offset,
            });
        }
        Ok((Self { opcode, operands }, count))
    }

    // === Операнды ===

    pub fn result_type(&self) -> Option<u32> {
        if self.opcode.has_result_type() {
            self.operands.first().copied()
        } else {
            None
        }
    }

    fn result_index(&self) -> Option<usize> {
        if self.opcode.has_result_type() {
            Some(1)
        } else if self.opcode.is_type() {
            Some(0)
        } else {
            None
        }
    }

    /// Идентификатор, определяемый инструкцией.
    pub fn result(&self) -> Option<u32> {
        self.result_index().and_then(|i| self.operands.get(i).copied())
    }

    /// Позиции операндов, ссылающихся на другие идентификаторы
    /// (включая `result_type`, но не результат).
    pub fn reference_positions(&self) -> Vec<usize> {
        use Opcode::*;
        let len = self.operands.len();
        let tail = |from: usize| (from..len).collect::<Vec<_>>();
        match self.opcode {
            Nop | LocalSize | Source | Else | EndIf | Loop | LoopContinue | EndLoop | Break
            | Continue | Return | Kill | FunctionEnd | TypeVoid | TypeBool | TypeInt
            | TypeFloat | TypeSampler => Vec::new(),
            Name | EntryPoint | Decorate | If | LoopCondition | ReturnValue => vec![0],
            TypeVector | TypeMatrix | TypeArray => vec![1],
            TypeFunction => tail(1),
            TypePointer => vec![2],
            Constant | Variable | FunctionParameter => vec![0],
            Function | Load | Swizzle => vec![0, 2],
            Store => vec![0, 1],
            Unary => vec![0, 3],
            Binary => vec![0, 3, 4],
            Extract => vec![0, 2, 3],
            Select => vec![0, 2, 3, 4],
            ConstantComposite | Construct | AccessChain | FunctionCall => {
                let mut positions = vec![0];
                positions.extend(tail(2));
                positions
            }
            Builtin => {
                let mut positions = vec![0];
                positions.extend(tail(3));
                positions
            }
        }
    }

    /// Идентификаторы, на которые ссылается инструкция.
    pub fn references(&self) -> Vec<u32> {
        self.reference_positions()
            .into_iter()
            .filter_map(|i| self.operands.get(i).copied())
            .collect()
    }

    /// Переписать результат и все ссылки.
    pub fn remap_ids(&mut self, map: &mut dyn FnMut(u32) -> u32) {
        let mut positions = self.reference_positions();
        positions.extend(self.result_index());
        for i in positions {
            if let Some(id) = self.operands.get_mut(i) {
                *id = map(*id);
            }
        }
    }

    /// Строка инструкции `Name`.
    pub fn string(&self) -> Option<String> {
        match self.opcode {
            Opcode::Name => decode_string(self.operands.get(1..)?).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(text) = self.string() {
            let target = self.operands.first().copied().unwrap_or(0);
            return write!(f, "Name %{} \"{}\"", target, text);
        }
        let result = self.result_index();
        if let Some(id) = self.result() {
            write!(f, "%{} = ", id)?;
        }
        write!(f, "{}", self.opcode.name())?;
        let references = self.reference_positions();
        for (i, operand) in self.operands.iter().enumerate() {
            if Some(i) == result {
                continue;
            }
            if references.contains(&i) {
                write!(f, " %{}", operand)?;
            } else {
                write!(f, " {}", operand)?;
            }
        }
        Ok(())
    }
}

// === Строки ===

/// UTF-8 с завершающим нулём, дополненная нулями до границы слова.
pub fn encode_string(text: &str) -> Vec<u32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn decode_string(words: &[u32]) -> Result<String, BytecodeError> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    let end = bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or(BytecodeError::InvalidString)?;
    bytes.truncate(end);
    String::from_utf8(bytes).map_err(|_| BytecodeError::InvalidString)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_padding() {
        assert_eq!(encode_string("abc").len(), 1);
        assert_eq!(encode_string("abcd").len(), 2);
        assert_eq!(decode_string(&encode_string("u_tint")).unwrap(), "u_tint");
        assert!(decode_string(&[0x6161_6161]).is_err());
    }

    #[test]
    fn test_encode_decode_word_layout() {
        let inst = Instruction::new(Opcode::Load, vec![3, 7, 5]);
        let mut words = Vec::new();
        inst.encode(&mut words).unwrap();
        assert_eq!(words[0], (4 << 16) | 40);
        let (decoded, len) = Instruction::decode(&words, 0).unwrap();
        assert_eq!(len, 4);
        assert_eq!(decoded, inst);
        assert_eq!(decoded.result(), Some(7));
        assert_eq!(decoded.references(), [3, 5]);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            Instruction::decode(&[(4 << 16) | 40, 1], 0),
            Err(BytecodeError::Truncated { .. })
        ));
        assert!(matches!(
            Instruction::decode(&[(1 << 16) | 999], 0),
            Err(BytecodeError::UnknownOpcode { opcode: 999, .. })
        ));
        assert!(matches!(
            Instruction::decode(&[(1 << 16) | 43], 0),
            Err(BytecodeError::MissingOperands { .. })
        ));
    }

    #[test]
    fn test_remap_ids_skips_literals() {
        let mut inst = Instruction::new(Opcode::Binary, vec![2, 9, 0, 4, 5]);
        inst.remap_ids(&mut |id| id + 100);
        assert_eq!(inst.operands, [102, 109, 0, 104, 105]);
        assert_eq!(inst.to_string(), "%109 = Binary %102 0 %104 %105");
    }
}
