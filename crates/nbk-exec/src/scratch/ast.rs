use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeName {
    Int,
    Long,
    Var,
    String,
}

impl TypeName {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "int" => Some(TypeName::Int),
            "long" => Some(TypeName::Long),
            "var" => Some(TypeName::Var),
            "String" => Some(TypeName::String),
            _ => None,
        }
    }

    /// Static type a declaration of this kind holds; `var` infers from its initializer.
    pub fn value_type(self) -> Option<ValueType> {
        match self {
            TypeName::Int | TypeName::Long => Some(ValueType::Int),
            TypeName::String => Some(ValueType::Str),
            TypeName::Var => None,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeName::Int => "int",
            TypeName::Long => "long",
            TypeName::Var => "var",
            TypeName::String => "String",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Int,
    Str,
    Void,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Int => "int",
            ValueType::Str => "String",
            ValueType::Void => "void",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub fn symbol(self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Sub => '-',
            BinOp::Mul => '*',
            BinOp::Div => '/',
            BinOp::Rem => '%',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Builtin {
    Sleep,
    Fail,
    Print,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sleep" => Some(Builtin::Sleep),
            "fail" => Some(Builtin::Fail),
            "print" => Some(Builtin::Print),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Int(i64),
    Str(String),
    Var(String),
    Neg(Box<Expr>),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { func: Builtin, args: Vec<Expr> },
}

impl Expr {
    /// Variable names referenced anywhere in the expression, first occurrence order.
    pub fn references(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references(&self, names: &mut Vec<String>) {
        match self {
            Expr::Var(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_references(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_references(names);
                rhs.collect_references(names);
            }
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_references(names)),
            Expr::Int(_) | Expr::Str(_) => {}
        }
    }
}

/// One compiled statement. This is what gets serialized into the unit store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Unit {
    Declare {
        ty: TypeName,
        name: String,
        init: Option<Expr>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Eval(Expr),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Str(String),
    Null,
    Void,
}

impl Value {
    pub fn default_for(ty: ValueType) -> Self {
        match ty {
            ValueType::Int => Value::Int(0),
            ValueType::Str => Value::Null,
            ValueType::Void => Value::Void,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Null => f.write_str("null"),
            Value::Void => Ok(()),
        }
    }
}
