//! Parsed expression tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a variable reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableKind {
    /// `#{...}`: a data element, optionally qualified by program stage
    DataItem,
    /// `A{...}`: a tracked entity attribute
    Attribute,
    /// `C{...}`: a constant
    Constant,
    /// `V{...}`: a built-in program variable such as `current_date`
    ProgramVariable,
    /// A bare identifier
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableRef {
    pub kind: VariableKind,
    pub name: String,
}

impl VariableRef {
    /// The reference as written in expression text.
    pub fn token(&self) -> String {
        match self.kind {
            VariableKind::DataItem => format!("#{{{}}}", self.name),
            VariableKind::Attribute => format!("A{{{}}}", self.name),
            VariableKind::Constant => format!("C{{{}}}", self.name),
            VariableKind::ProgramVariable => format!("V{{{}}}", self.name),
            VariableKind::Plain => self.name.clone(),
        }
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Built-in functions. Names are accepted with or without the `d2:` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    DaysBetween,
    WeeksBetween,
    Condition,
    HasValue,
    Count,
    Ceil,
    Floor,
    Round,
    Concatenate,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Function> {
        let bare = name.strip_prefix("d2:").unwrap_or(name);
        Some(match bare {
            "daysBetween" => Function::DaysBetween,
            "weeksBetween" => Function::WeeksBetween,
            "condition" | "if" => Function::Condition,
            "hasValue" => Function::HasValue,
            "count" => Function::Count,
            "ceil" => Function::Ceil,
            "floor" => Function::Floor,
            "round" => Function::Round,
            "concatenate" => Function::Concatenate,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::DaysBetween => "daysBetween",
            Function::WeeksBetween => "weeksBetween",
            Function::Condition => "condition",
            Function::HasValue => "hasValue",
            Function::Count => "count",
            Function::Ceil => "ceil",
            Function::Floor => "floor",
            Function::Round => "round",
            Function::Concatenate => "concatenate",
        }
    }
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "node")]
pub enum Expr {
    Number { value: f64 },
    Text { value: String },
    Bool { value: bool },
    Null,
    Variable(VariableRef),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Call { function: Function, args: Vec<Expr> },
}

impl Expr {
    /// Every variable referenced by this node and its descendants.
    pub fn variables(&self) -> Vec<&VariableRef> {
        let mut found = Vec::new();
        self.collect_variables(&mut found);
        found
    }

    fn collect_variables<'a>(&'a self, found: &mut Vec<&'a VariableRef>) {
        match self {
            Expr::Variable(var) => {
                if !found.contains(&var) {
                    found.push(var);
                }
            }
            Expr::Unary { operand, .. } => operand.collect_variables(found),
            Expr::Binary { left, right, .. } => {
                left.collect_variables(found);
                right.collect_variables(found);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_variables(found)),
            Expr::Number { .. } | Expr::Text { .. } | Expr::Bool { .. } | Expr::Null => {}
        }
    }
}
