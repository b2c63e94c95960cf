//! Graph nodes and the closed sets of callables they can invoke

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QuantizerError;

/// Unique identifier for a node in the graph arena
pub type NodeId = usize;

/// Free functions a traced graph can call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Function {
    Relu,
    Relu6,
    Add,
    Mul,
    Cat,
    Flatten,
}

impl Function {
    /// Fully qualified name, e.g. `torch.nn.functional.relu`
    pub fn qualified_name(&self) -> &'static str {
        match self {
            Function::Relu => "torch.nn.functional.relu",
            Function::Relu6 => "torch.nn.functional.relu6",
            Function::Add => "torch.add",
            Function::Mul => "torch.mul",
            Function::Cat => "torch.cat",
            Function::Flatten => "torch.flatten",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qualified_name())
    }
}

impl FromStr for Function {
    type Err = QuantizerError;

    /// Accepts bare or qualified names; the module prefix is ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit('.').next().unwrap_or(s) {
            "relu" => Ok(Function::Relu),
            "relu6" => Ok(Function::Relu6),
            "add" => Ok(Function::Add),
            "mul" => Ok(Function::Mul),
            "cat" => Ok(Function::Cat),
            "flatten" => Ok(Function::Flatten),
            _ => Err(QuantizerError::InvalidConfig(format!("unknown function: {s}"))),
        }
    }
}

impl TryFrom<String> for Function {
    type Error = QuantizerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Function> for String {
    fn from(function: Function) -> Self {
        function.to_string()
    }
}

/// Primitive operators (`a + b`, `a * b`, `a - b`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Add,
    Sub,
    Mul,
}

impl Operator {
    pub fn qualified_name(&self) -> &'static str {
        match self {
            Operator::Add => "operator.add",
            Operator::Sub => "operator.sub",
            Operator::Mul => "operator.mul",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qualified_name())
    }
}

impl FromStr for Operator {
    type Err = QuantizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit('.').next().unwrap_or(s) {
            "add" | "iadd" => Ok(Operator::Add),
            "sub" | "isub" => Ok(Operator::Sub),
            "mul" | "imul" => Ok(Operator::Mul),
            _ => Err(QuantizerError::InvalidConfig(format!("unknown operator: {s}"))),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = QuantizerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.to_string()
    }
}

/// What a node does
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeOp {
    /// Graph input
    Placeholder,
    /// Call the submodule at a dotted path
    CallModule(String),
    /// Call a free function
    CallFunction(Function),
    /// Call a tensor method by name on the first argument
    CallMethod(String),
    /// Apply a primitive operator
    CallOperator(Operator),
    /// Graph result
    Output,
}

impl NodeOp {
    /// Base used when naming new nodes
    pub(crate) fn name_hint(&self) -> String {
        match self {
            NodeOp::Placeholder => "x".to_string(),
            NodeOp::CallModule(target) => target.replace('.', "_"),
            NodeOp::CallFunction(function) => function
                .qualified_name()
                .rsplit('.')
                .next()
                .unwrap_or("function")
                .to_string(),
            NodeOp::CallMethod(method) => method.clone(),
            NodeOp::CallOperator(op) => op
                .qualified_name()
                .rsplit('.')
                .next()
                .unwrap_or("op")
                .to_string(),
            NodeOp::Output => "output".to_string(),
        }
    }
}

impl fmt::Display for NodeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOp::Placeholder => f.write_str("placeholder"),
            NodeOp::CallModule(target) => write!(f, "call_module[{target}]"),
            NodeOp::CallFunction(function) => write!(f, "call_function[{function}]"),
            NodeOp::CallMethod(method) => write!(f, "call_method[{method}]"),
            NodeOp::CallOperator(op) => write!(f, "call_function[{op}]"),
            NodeOp::Output => f.write_str("output"),
        }
    }
}

/// A node in the traced graph
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Unique node identifier
    pub id: NodeId,
    /// Unique, human-readable name
    pub name: String,
    pub op: NodeOp,
    /// Input node IDs in call order
    pub args: Vec<NodeId>,
    /// Whether this node has been erased
    removed: bool,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, op: NodeOp, args: Vec<NodeId>) -> Self {
        Self {
            id,
            name,
            op,
            args,
            removed: false,
        }
    }

    /// Check if this node has been erased from the graph
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn mark_removed(&mut self) {
        self.removed = true;
    }

    /// Submodule path for module calls
    pub fn target(&self) -> Option<&str> {
        match &self.op {
            NodeOp::CallModule(target) => Some(target),
            _ => None,
        }
    }
}
