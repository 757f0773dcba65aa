use std::collections::HashMap;
use std::sync::RwLock;
use std::thread;
use std::time::Duration;

use super::ast::{BinOp, Builtin, Expr, Unit, Value, ValueType};
use crate::control::TaskFailure;
use crate::output::Output;

pub type Vars = RwLock<HashMap<String, Value>>;

/// Static type of `expr`, given the types of declared names.
pub fn type_of(expr: &Expr, lookup: &dyn Fn(&str) -> Option<ValueType>) -> Result<ValueType, String> {
    match expr {
        Expr::Int(_) => Ok(ValueType::Int),
        Expr::Str(_) => Ok(ValueType::Str),
        Expr::Var(name) => lookup(name).ok_or_else(|| format!("cannot find symbol: variable {name}")),
        Expr::Neg(inner) => match type_of(inner, lookup)? {
            ValueType::Int => Ok(ValueType::Int),
            other => Err(format!("bad operand type {other} for unary operator '-'")),
        },
        Expr::Binary { op, lhs, rhs } => {
            let (left, right) = (type_of(lhs, lookup)?, type_of(rhs, lookup)?);
            match (op, left, right) {
                (_, ValueType::Void, _) | (_, _, ValueType::Void) => Err("'void' type not allowed here".into()),
                (BinOp::Add, ValueType::Str, _) | (BinOp::Add, _, ValueType::Str) => Ok(ValueType::Str),
                (_, ValueType::Int, ValueType::Int) => Ok(ValueType::Int),
                (op, left, right) => Err(format!(
                    "bad operand types for binary operator '{}': {left} and {right}",
                    op.symbol()
                )),
            }
        }
        Expr::Call { func, args } => {
            for arg in args {
                type_of(arg, lookup)?;
            }
            match (func, args.first().map(|arg| type_of(arg, lookup)).transpose()?) {
                (Builtin::Sleep, Some(ValueType::Int)) => Ok(ValueType::Void),
                (Builtin::Sleep, other) => Err(format!(
                    "incompatible types: {} cannot be converted to int",
                    other.unwrap_or(ValueType::Void)
                )),
                (Builtin::Fail, _) => Ok(ValueType::Void),
                (Builtin::Print, Some(ValueType::Void)) => Err("'void' type not allowed here".into()),
                (Builtin::Print, _) => Ok(ValueType::Void),
            }
        }
    }
}

/// Checks that a value of type `found` may be stored where `expected` is declared.
pub fn assignable(expected: ValueType, found: ValueType) -> Result<(), String> {
    if found == ValueType::Void {
        return Err("'void' type not allowed here".into());
    }
    if expected != found {
        return Err(format!("incompatible types: {found} cannot be converted to {expected}"));
    }
    Ok(())
}

pub fn eval_expr(expr: &Expr, vars: &Vars, output: &Output) -> Result<Value, TaskFailure> {
    match expr {
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Var(name) => vars
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| TaskFailure::Unresolved { names: vec![name.clone()] }),
        Expr::Neg(inner) => match eval_expr(inner, vars, output)? {
            Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
            other => Err(type_failure(&other)),
        },
        Expr::Binary { op, lhs, rhs } => {
            let left = eval_expr(lhs, vars, output)?;
            let right = eval_expr(rhs, vars, output)?;
            binary(*op, left, right)
        }
        Expr::Call { func: Builtin::Sleep, args } => {
            let millis = match args.first().map(|arg| eval_expr(arg, vars, output)).transpose()? {
                Some(Value::Int(n)) => n.max(0) as u64,
                _ => 0,
            };
            thread::sleep(Duration::from_millis(millis));
            Ok(Value::Void)
        }
        Expr::Call { func: Builtin::Fail, args } => {
            let message = match args.first().map(|arg| eval_expr(arg, vars, output)).transpose()? {
                Some(value) => value.to_string(),
                None => String::new(),
            };
            Err(TaskFailure::thrown("Failure", message))
        }
        Expr::Call { func: Builtin::Print, args } => {
            let mut line = match args.first().map(|arg| eval_expr(arg, vars, output)).transpose()? {
                Some(value) => value.to_string(),
                None => String::new(),
            };
            line.push('\n');
            output.write(&line);
            Ok(Value::Void)
        }
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, TaskFailure> {
    match (op, left, right) {
        (BinOp::Add, Value::Str(l), r) => Ok(Value::Str(format!("{l}{r}"))),
        (BinOp::Add, l, Value::Str(r)) => Ok(Value::Str(format!("{l}{r}"))),
        (op, Value::Int(l), Value::Int(r)) => {
            let result = match op {
                BinOp::Add => l.checked_add(r),
                BinOp::Sub => l.checked_sub(r),
                BinOp::Mul => l.checked_mul(r),
                BinOp::Div | BinOp::Rem if r == 0 => {
                    return Err(TaskFailure::thrown("ArithmeticError", "/ by zero"));
                }
                BinOp::Div => l.checked_div(r),
                BinOp::Rem => l.checked_rem(r),
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        (_, Value::Null, _) | (_, _, Value::Null) => Err(TaskFailure::thrown("NullPointerException", "null operand")),
        (_, other, _) => Err(type_failure(&other)),
    }
}

fn overflow() -> TaskFailure {
    TaskFailure::thrown("ArithmeticError", "integer overflow")
}

fn type_failure(value: &Value) -> TaskFailure {
    TaskFailure::thrown("ClassCastException", format!("unexpected operand {value:?}"))
}

/// Runs one unit against the session variables and renders its value.
pub fn execute(unit: &Unit, declared: Option<ValueType>, vars: &Vars, output: &Output) -> Result<String, TaskFailure> {
    match unit {
        Unit::Declare { name, init, .. } => {
            let value = match init {
                Some(expr) => eval_expr(expr, vars, output)?,
                None => Value::default_for(declared.unwrap_or(ValueType::Int)),
            };
            let rendered = value.to_string();
            vars.write().unwrap().insert(name.clone(), value);
            Ok(rendered)
        }
        Unit::Assign { name, value } => {
            let value = eval_expr(value, vars, output)?;
            let rendered = value.to_string();
            vars.write().unwrap().insert(name.clone(), value);
            Ok(rendered)
        }
        Unit::Eval(expr) => Ok(eval_expr(expr, vars, output)?.to_string()),
    }
}
