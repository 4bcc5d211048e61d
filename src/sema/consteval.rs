//! Вычисление константных скалярных выражений.
//!
//! Используется валидатором (размеры массивов, `layout`, свёртка `const`)
//! и проходом `fold-constants` оптимизатора.

use crate::ir::{Expr, ExprKind};
use crate::ops::{BinaryOp, UnaryOp};
use crate::types::{ConstValue, ScalarKind, Type};

/// Бинарная операция над скалярными константами одного вида.
///
/// `None`: операция не определена (деление на ноль, сдвиг за
/// разрядность, несовместимые виды).
pub fn binary(op: BinaryOp, lhs: ConstValue, rhs: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;

    if op.is_comparison() {
        let result = match (lhs, rhs) {
            (Int(a), Int(b)) => compare(op, a, b),
            (Uint(a), Uint(b)) => compare(op, a, b),
            (Float(a), Float(b)) => compare(op, a, b),
            (Bool(a), Bool(b)) if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => {
                (a == b) == (op == BinaryOp::Eq)
            }
            _ => return None,
        };
        return Some(Bool(result));
    }

    let value = match (lhs, rhs) {
        (Bool(a), Bool(b)) => Bool(match op {
            BinaryOp::LogicalAnd => a && b,
            BinaryOp::LogicalOr => a || b,
            BinaryOp::LogicalXor => a != b,
            _ => return None,
        }),
        (Int(a), Int(b)) => Int(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a.checked_div(b)?,
            BinaryOp::Mod => a.checked_rem(b)?,
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::Shl => a.checked_shl(u32::try_from(b).ok()?)?,
            BinaryOp::Shr => a.checked_shr(u32::try_from(b).ok()?)?,
            _ => return None,
        }),
        (Uint(a), Uint(b)) => Uint(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a.checked_div(b)?,
            BinaryOp::Mod => a.checked_rem(b)?,
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::Shl => a.checked_shl(b)?,
            BinaryOp::Shr => a.checked_shr(b)?,
            _ => return None,
        }),
        // Сдвиг на величину другого целого вида.
        (Int(a), Uint(b)) if matches!(op, BinaryOp::Shl | BinaryOp::Shr) => {
            return binary(op, Int(a), Int(i32::try_from(b).ok()?))
        }
        (Uint(a), Int(b)) if matches!(op, BinaryOp::Shl | BinaryOp::Shr) => {
            return binary(op, Uint(a), Uint(u32::try_from(b).ok()?))
        }
        (Float(a), Float(b)) => Float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div if b != 0.0 => a / b,
            _ => return None,
        }),
        _ => return None,
    };
    Some(value)
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        _ => a != b,
    }
}

/// Унарная операция над скалярной константой.
pub fn unary(op: UnaryOp, value: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;
    match (op, value) {
        (UnaryOp::Neg, Int(v)) => Some(Int(v.wrapping_neg())),
        (UnaryOp::Neg, Uint(v)) => Some(Uint(v.wrapping_neg())),
        (UnaryOp::Neg, Float(v)) => Some(Float(-v)),
        (UnaryOp::Not, Bool(v)) => Some(Bool(!v)),
        (UnaryOp::BitNot, Int(v)) => Some(Int(!v)),
        (UnaryOp::BitNot, Uint(v)) => Some(Uint(!v)),
        _ => None,
    }
}

/// Вычислить выражение скалярного типа, если оно константно.
pub fn eval(expr: &Expr) -> Option<ConstValue> {
    if !expr.ty.is_scalar() {
        return None;
    }
    match &expr.kind {
        ExprKind::Const(value) => Some(*value),
        ExprKind::Unary { op, operand } => unary(*op, eval(operand)?),
        ExprKind::Binary { op, lhs, rhs } => binary(*op, eval(lhs)?, eval(rhs)?),
        ExprKind::Select {
            cond,
            then_expr,
            else_expr,
        } => match eval(cond)? {
            ConstValue::Bool(true) => eval(then_expr),
            ConstValue::Bool(false) => eval(else_expr),
            _ => None,
        },
        ExprKind::Construct(args) => {
            let kind = expr.ty.scalar_kind()?;
            match args.as_slice() {
                [arg] if arg.ty.is_scalar() => Some(eval(arg)?.cast(kind)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Является ли выражение константным (скаляр, вектор или матрица).
///
/// Разрешены литералы, конструкторы, операторы и чистые встроенные
/// функции над константами.
pub fn is_constant(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Const(_) => true,
        ExprKind::Unary { operand, .. } => is_constant(operand),
        ExprKind::Binary { lhs, rhs, .. } => is_constant(lhs) && is_constant(rhs),
        ExprKind::Select {
            cond,
            then_expr,
            else_expr,
        } => is_constant(cond) && is_constant(then_expr) && is_constant(else_expr),
        ExprKind::Construct(args) => args.iter().all(is_constant),
        ExprKind::Builtin { func, args } => !func.is_texture() && args.iter().all(is_constant),
        ExprKind::Swizzle { base, .. } => is_constant(base),
        ExprKind::Index { base, index } => is_constant(base) && is_constant(index),
        ExprKind::Var(_) | ExprKind::Assign { .. } | ExprKind::IncDec { .. } | ExprKind::Call { .. } => {
            false
        }
    }
}

/// Положительный целый размер (массив, `local_size`).
pub fn positive_size(expr: &Expr) -> Option<u32> {
    if !matches!(expr.ty, Type::Scalar(ScalarKind::Int) | Type::Scalar(ScalarKind::Uint)) {
        return None;
    }
    let value = eval(expr)?.as_integer()?;
    u32::try_from(value).ok().filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i32) -> Expr {
        Expr::constant(ConstValue::Int(v))
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(
            binary(BinaryOp::Add, ConstValue::Int(i32::MAX), ConstValue::Int(1)),
            Some(ConstValue::Int(i32::MIN))
        );
        assert_eq!(binary(BinaryOp::Div, ConstValue::Int(7), ConstValue::Int(0)), None);
        assert_eq!(
            binary(BinaryOp::Shl, ConstValue::Uint(1), ConstValue::Int(4)),
            Some(ConstValue::Uint(16))
        );
        assert_eq!(
            binary(BinaryOp::Lt, ConstValue::Float(1.0), ConstValue::Float(2.0)),
            Some(ConstValue::Bool(true))
        );
        assert_eq!(binary(BinaryOp::Add, ConstValue::Int(1), ConstValue::Float(2.0)), None);
    }

    #[test]
    fn test_eval_nested() {
        let expr = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Mul,
                lhs: Box::new(int(3)),
                rhs: Box::new(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(int(2)),
                    },
                    Type::INT,
                )),
            },
            Type::INT,
        );
        assert_eq!(eval(&expr), Some(ConstValue::Int(-6)));
        assert_eq!(positive_size(&expr), None);
        assert_eq!(positive_size(&int(4)), Some(4));
    }

    #[test]
    fn test_construct_cast() {
        let expr = Expr::new(ExprKind::Construct(vec![int(3)]), Type::FLOAT);
        assert_eq!(eval(&expr), Some(ConstValue::Float(3.0)));
        assert!(is_constant(&expr));
    }
}
