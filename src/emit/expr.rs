//! Текст выражений с учётом приоритета операторов.

use crate::ops::{BinaryOp, UnaryOp};
use crate::types::ConstValue;

/// Первичное выражение: имя, литерал, вызов, скобки.
pub const PRIMARY: u8 = 0;
/// Индекс и выбор компонент.
pub const POSTFIX: u8 = 1;
pub const UNARY: u8 = 2;
pub const TERNARY: u8 = 15;
/// Присваивание: только на уровне оператора.
pub const ASSIGNMENT: u8 = 16;

/// Готовый текст выражения и его приоритет (меньше: связывает сильнее).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprText {
    pub text: String,
    pub prec: u8,
}

impl ExprText {
    pub fn new(text: impl Into<String>, prec: u8) -> Self {
        Self {
            text: text.into(),
            prec,
        }
    }

    pub fn primary(text: impl Into<String>) -> Self {
        Self::new(text, PRIMARY)
    }

    /// Текст в скобках, если выражение связывает слабее `prec`.
    pub fn wrap(&self, prec: u8) -> String {
        if self.prec > prec {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }

    /// Текст в скобках, если выражение связывает не сильнее `prec`.
    pub fn wrap_strict(&self, prec: u8) -> String {
        if self.prec >= prec {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }
}

pub fn literal(value: ConstValue) -> ExprText {
    let text = match value {
        ConstValue::Bool(b) => b.to_string(),
        ConstValue::Int(v) => v.to_string(),
        ConstValue::Uint(v) => format!("{}u", v),
        ConstValue::Float(v) if v.is_nan() => return ExprText::primary("(0.0 / 0.0)"),
        ConstValue::Float(v) if v.is_infinite() => {
            let text = if v > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" };
            return ExprText::primary(text);
        }
        ConstValue::Float(v) => format!("{:?}", v),
    };
    // отрицательный литерал ведёт себя как унарный минус
    let prec = if text.starts_with('-') { UNARY } else { PRIMARY };
    ExprText::new(text, prec)
}

pub fn binary(op: BinaryOp, lhs: &ExprText, rhs: &ExprText) -> ExprText {
    let prec = op.precedence();
    ExprText::new(
        format!("{} {} {}", lhs.wrap(prec), op.symbol(), rhs.wrap_strict(prec)),
        prec,
    )
}

pub fn unary(op: UnaryOp, operand: &ExprText) -> ExprText {
    let inner = operand.wrap(UNARY);
    // `- -x` не должно превратиться в `--x`
    let inner = if inner.starts_with(op.symbol()) {
        format!("({})", inner)
    } else {
        inner
    };
    ExprText::new(format!("{}{}", op.symbol(), inner), UNARY)
}

pub fn call(name: &str, args: &[ExprText]) -> ExprText {
    let args: Vec<&str> = args.iter().map(|a| a.text.as_str()).collect();
    ExprText::primary(format!("{}({})", name, args.join(", ")))
}

/// `base.xyz`, `base[i]`.
pub fn postfix(base: &ExprText, suffix: &str) -> ExprText {
    ExprText::new(format!("{}{}", base.wrap(POSTFIX), suffix), POSTFIX)
}

pub fn ternary(cond: &ExprText, a: &ExprText, b: &ExprText) -> ExprText {
    ExprText::new(
        format!(
            "{} ? {} : {}",
            cond.wrap_strict(TERNARY),
            a.wrap(TERNARY),
            b.wrap(TERNARY)
        ),
        TERNARY,
    )
}

/// Буквы компонент вектора.
pub fn swizzle_suffix(components: &[u32]) -> Option<String> {
    let mut out = String::from(".");
    for c in components {
        out.push(*['x', 'y', 'z', 'w'].get(*c as usize)?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> ExprText {
        ExprText::primary(text)
    }

    #[test]
    fn test_parentheses_follow_precedence() {
        let sum = binary(BinaryOp::Add, &name("a"), &name("b"));
        let product = binary(BinaryOp::Mul, &sum, &name("c"));
        assert_eq!(product.text, "(a + b) * c");

        let left = binary(BinaryOp::Sub, &sum, &name("c"));
        assert_eq!(left.text, "a + b - c");
        let right = binary(BinaryOp::Sub, &name("c"), &sum);
        assert_eq!(right.text, "c - (a + b)");
    }

    #[test]
    fn test_unary_and_postfix() {
        let neg = unary(UnaryOp::Neg, &literal(ConstValue::Float(-1.5)));
        assert_eq!(neg.text, "-(-1.5)");
        let sum = binary(BinaryOp::Add, &name("a"), &name("b"));
        assert_eq!(postfix(&sum, ".xy").text, "(a + b).xy");
        assert_eq!(unary(UnaryOp::Not, &sum).text, "!(a + b)");
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(ConstValue::Float(1.0)).text, "1.0");
        assert_eq!(literal(ConstValue::Float(0.25)).text, "0.25");
        assert_eq!(literal(ConstValue::Uint(3)).text, "3u");
        assert_eq!(literal(ConstValue::Bool(true)).text, "true");
        assert_eq!(literal(ConstValue::Float(f32::INFINITY)).text, "(1.0 / 0.0)");
    }

    #[test]
    fn test_ternary_and_swizzle() {
        let cond = binary(BinaryOp::Lt, &name("a"), &name("b"));
        let pick = ternary(&cond, &name("x"), &name("y"));
        assert_eq!(pick.text, "a < b ? x : y");
        assert_eq!(swizzle_suffix(&[0, 1, 3]).as_deref(), Some(".xyw"));
        assert_eq!(swizzle_suffix(&[4]), None);
    }
}
