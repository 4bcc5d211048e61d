//! Коды операций и перечисления-операнды байткода.

/// Код операции (младшие 16 бит первого слова инструкции).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Nop = 0,
    /// `target, string`: отладочное имя.
    Name = 1,
    /// `function`: точка входа.
    EntryPoint = 2,
    /// `x, y, z`: размер рабочей группы.
    LocalSize = 3,
    /// `target, decoration, value`.
    Decorate = 4,
    /// `version, es`: версия исходного языка.
    Source = 5,

    // === Типы: первый операнд: результат ===
    TypeVoid = 10,
    TypeBool = 11,
    /// `result, signed`.
    TypeInt = 12,
    TypeFloat = 13,
    /// `result, component, count`.
    TypeVector = 14,
    /// `result, column, columns`.
    TypeMatrix = 15,
    /// `result, dim, shadow, kind`.
    TypeSampler = 16,
    /// `result, element, length`.
    TypeArray = 17,
    /// `result, return, params...`.
    TypeFunction = 18,
    /// `result, storage, pointee`.
    TypePointer = 19,

    // === Значения: `result_type, result, ...` ===
    /// `bits`: скалярная константа.
    Constant = 20,
    /// `constituents...`.
    ConstantComposite = 21,
    /// `storage`: результат имеет тип указателя.
    Variable = 22,

    // === Функции ===
    /// `result_type, result, function_type`.
    Function = 30,
    /// `result_type, result, qualifier`: параметр как указатель.
    FunctionParameter = 31,
    FunctionEnd = 32,

    // === Вычисления ===
    /// `result_type, result, pointer`.
    Load = 40,
    /// `pointer, value`.
    Store = 41,
    /// `result_type, result, base, indices...`.
    AccessChain = 42,
    /// `result_type, result, op, lhs, rhs`.
    Binary = 43,
    /// `result_type, result, op, operand`.
    Unary = 44,
    /// `result_type, result, constituents...`.
    Construct = 45,
    /// `result_type, result, vector, components...` (литералы).
    Swizzle = 46,
    /// `result_type, result, composite, index`: элемент значения.
    Extract = 47,
    /// `result_type, result, cond, a, b`.
    Select = 48,
    /// `result_type, result, builtin, args...`.
    Builtin = 49,
    /// `result_type, result, function, args...`.
    FunctionCall = 50,

    // === Структурное управление ===
    /// `cond`.
    If = 60,
    Else = 61,
    EndIf = 62,
    /// `kind`: 0 проверка в начале, 1 в конце.
    Loop = 63,
    /// `cond`: условие продолжения цикла.
    LoopCondition = 64,
    /// Начало блока продолжения (шаг `for`, условие `do-while`).
    LoopContinue = 65,
    EndLoop = 66,
    Break = 67,
    Continue = 68,
    Return = 69,
    /// `value`.
    ReturnValue = 70,
    /// `discard`.
    Kill = 71,
}

const ALL: &[Opcode] = &[
    Opcode::Nop,
    Opcode::Name,
    Opcode::EntryPoint,
    Opcode::LocalSize,
    Opcode::Decorate,
    Opcode::Source,
    Opcode::TypeVoid,
    Opcode::TypeBool,
    Opcode::TypeInt,
    Opcode::TypeFloat,
    Opcode::TypeVector,
    Opcode::TypeMatrix,
    Opcode::TypeSampler,
    Opcode::TypeArray,
    Opcode::TypeFunction,
    Opcode::TypePointer,
    Opcode::Constant,
    Opcode::ConstantComposite,
    Opcode::Variable,
    Opcode::Function,
    Opcode::FunctionParameter,
    Opcode::FunctionEnd,
    Opcode::Load,
    Opcode::Store,
    Opcode::AccessChain,
    Opcode::Binary,
    Opcode::Unary,
    Opcode::Construct,
    Opcode::Swizzle,
    Opcode::Extract,
    Opcode::Select,
    Opcode::Builtin,
    Opcode::FunctionCall,
    Opcode::If,
    Opcode::Else,
    Opcode::EndIf,
    Opcode::Loop,
    Opcode::LoopCondition,
    Opcode::LoopContinue,
    Opcode::EndLoop,
    Opcode::Break,
    Opcode::Continue,
    Opcode::Return,
    Opcode::ReturnValue,
    Opcode::Kill,
];

impl Opcode {
    pub fn from_u16(code: u16) -> Option<Self> {
        ALL.iter().copied().find(|op| *op as u16 == code)
    }

    pub fn is_type(self) -> bool {
        (10..=19).contains(&(self as u16))
    }

    /// Есть ли у инструкции операнд `result_type`.
    pub fn has_result_type(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Constant
                | ConstantComposite
                | Variable
                | Function
                | FunctionParameter
                | Load
                | AccessChain
                | Binary
                | Unary
                | Construct
                | Swizzle
                | Extract
                | Select
                | Builtin
                | FunctionCall
        )
    }

    /// Определяет ли инструкция новый идентификатор.
    pub fn has_result(self) -> bool {
        self.is_type() || self.has_result_type()
    }

    /// Завершает ли инструкция выполнение текущего блока.
    pub fn is_terminator(self) -> bool {
        use Opcode::*;
        matches!(self, Break | Continue | Return | ReturnValue | Kill)
    }

    /// Чистое вычисление без побочных эффектов.
    pub fn is_pure(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Load | AccessChain | Binary | Unary | Construct | Swizzle | Extract | Select | Builtin
        )
    }

    /// Минимальное число операндов.
    pub fn min_operands(self) -> usize {
        use Opcode::*;
        match self {
            Nop | FunctionEnd | Else | EndIf | LoopContinue | EndLoop | Break | Continue
            | Return | Kill => 0,
            EntryPoint | If | Loop | LoopCondition | ReturnValue | TypeVoid | TypeBool
            | TypeFloat => 1,
            Name | Store | TypeInt => 2,
            LocalSize | Decorate | TypeVector | TypeMatrix | TypeArray | TypePointer
            | Variable | Function | FunctionParameter | Load => 3,
            Source => 2,
            TypeSampler => 4,
            TypeFunction => 2,
            Constant => 3,
            ConstantComposite | Construct => 2,
            AccessChain | Swizzle | Builtin | FunctionCall => 3,
            Binary | Select => 5,
            Unary | Extract => 4,
        }
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "Nop",
            Name => "Name",
            EntryPoint => "EntryPoint",
            LocalSize => "LocalSize",
            Decorate => "Decorate",
            Source => "Source",
            TypeVoid => "TypeVoid",
            TypeBool => "TypeBool",
            TypeInt => "TypeInt",
            TypeFloat => "TypeFloat",
            TypeVector => "TypeVector",
            TypeMatrix => "TypeMatrix",
            TypeSampler => "TypeSampler",
            TypeArray => "TypeArray",
            TypeFunction => "TypeFunction",
            TypePointer => "TypePointer",
            Constant => "Constant",
            ConstantComposite => "ConstantComposite",
            Variable => "Variable",
            Function => "Function",
            FunctionParameter => "FunctionParameter",
            FunctionEnd => "FunctionEnd",
            Load => "Load",
            Store => "Store",
            AccessChain => "AccessChain",
            Binary => "Binary",
            Unary => "Unary",
            Construct => "Construct",
            Swizzle => "Swizzle",
            Extract => "Extract",
            Select => "Select",
            Builtin => "Builtin",
            FunctionCall => "FunctionCall",
            If => "If",
            Else => "Else",
            EndIf => "EndIf",
            Loop => "Loop",
            LoopCondition => "LoopCondition",
            LoopContinue => "LoopContinue",
            EndLoop => "EndLoop",
            Break => "Break",
            Continue => "Continue",
            Return => "Return",
            ReturnValue => "ReturnValue",
            Kill => "Kill",
        }
    }
}

/// Класс хранения переменной или указателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StorageClass {
    Uniform = 0,
    Input = 1,
    Output = 2,
    Private = 3,
    /// Локальная переменная или параметр функции.
    Function = 4,
}

impl StorageClass {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(StorageClass::Uniform),
            1 => Some(StorageClass::Input),
            2 => Some(StorageClass::Output),
            3 => Some(StorageClass::Private),
            4 => Some(StorageClass::Function),
            _ => None,
        }
    }
}

/// Вид декорации.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Decoration {
    Location = 0,
    Binding = 1,
    /// Значение: код [`crate::builtins::BuiltinVar`].
    BuiltIn = 2,
    /// Значение: 0 flat, 1 smooth, 2 noperspective, 3 centroid.
    Interpolation = 3,
    Invariant = 4,
}

impl Decoration {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(Decoration::Location),
            1 => Some(Decoration::Binding),
            2 => Some(Decoration::BuiltIn),
            3 => Some(Decoration::Interpolation),
            4 => Some(Decoration::Invariant),
            _ => None,
        }
    }
}

/// Квалификатор параметра функции.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ParamMode {
    In = 0,
    Out = 1,
    InOut = 2,
    /// `const in`.
    ConstIn = 3,
}

impl ParamMode {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(ParamMode::In),
            1 => Some(ParamMode::Out),
            2 => Some(ParamMode::InOut),
            3 => Some(ParamMode::ConstIn),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_codes_are_unique() {
        for (i, a) in ALL.iter().enumerate() {
            assert_eq!(Opcode::from_u16(*a as u16), Some(*a));
            for b in &ALL[i + 1..] {
                assert_ne!(*a as u16, *b as u16);
            }
        }
        assert_eq!(Opcode::from_u16(9), None);
    }

    #[test]
    fn test_result_classification() {
        assert!(Opcode::TypeVector.has_result());
        assert!(!Opcode::TypeVector.has_result_type());
        assert!(Opcode::Load.has_result_type());
        assert!(!Opcode::Store.has_result());
        assert!(Opcode::Kill.is_terminator());
        assert!(!Opcode::FunctionCall.is_pure());
    }
}
