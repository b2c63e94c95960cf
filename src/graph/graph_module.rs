//! A graph paired with the module tree its module calls resolve against

use std::collections::HashMap;

use log::debug;

use super::graph::Graph;
use super::node::{Function, NodeId, NodeOp, Operator};
use crate::error::{QuantizerError, Result};
use crate::nn::functional::{broadcast_binary, cat, flatten, relu, relu6};
use crate::nn::Module;
use crate::Tensor;

/// Executable traced model
#[derive(Clone, Debug, PartialEq)]
pub struct GraphModule {
    pub graph: Graph,
    /// Container whose submodules `call_module` targets address
    pub root: Module,
}

impl GraphModule {
    pub fn new(root: Module, graph: Graph) -> Self {
        Self { graph, root }
    }

    /// Module called by a `call_module` node
    pub fn module_for(&self, id: NodeId) -> Option<&Module> {
        self.graph
            .node(id)
            .target()
            .and_then(|target| self.root.get_submodule(target))
    }

    /// Whether `id` calls a fake-quantize submodule
    pub fn is_fake_quant_node(&self, id: NodeId) -> bool {
        !self.graph.node(id).is_removed()
            && matches!(self.module_for(id), Some(Module::FakeQuantize(_)))
    }

    /// Live fake-quantize nodes in program order
    pub fn fake_quant_nodes(&self) -> Vec<NodeId> {
        self.graph
            .nodes()
            .map(|node| node.id)
            .filter(|&id| self.is_fake_quant_node(id))
            .collect()
    }

    /// Whether any live node calls the submodule at `target`
    pub fn is_target_referenced(&self, target: &str) -> bool {
        self.graph.nodes().any(|node| node.target() == Some(target))
    }

    /// Drop the submodule at `target` unless a live node still calls it
    pub fn delete_submodule_if_unused(&mut self, target: &str) -> bool {
        if self.is_target_referenced(target) {
            return false;
        }
        self.root.remove_submodule(target).is_some()
    }

    /// Remove a fake-quantize node, rewiring its users to its input.
    ///
    /// The fake-quantize submodule goes too once nothing calls it.
    pub fn remove_fake_quant_node(&mut self, id: NodeId) -> Result<()> {
        if !self.is_fake_quant_node(id) {
            return Err(QuantizerError::Graph(format!(
                "'{}' is not a fake-quantize node",
                self.graph.node(id).name
            )));
        }
        let node = self.graph.node(id).clone();
        let input = node.args.first().copied().ok_or_else(|| {
            QuantizerError::Graph(format!("fake-quantize node '{}' has no input", node.name))
        })?;
        self.graph.replace_all_uses_with(id, input);
        self.graph.erase_node(id)?;
        if let Some(target) = node.target() {
            self.delete_submodule_if_unused(target);
        }
        debug!("Removed fake quant node {}", node.name);
        Ok(())
    }

    /// Interpret the graph. Inputs bind to placeholders in program order.
    pub fn forward(&mut self, inputs: &[Tensor]) -> Result<Tensor> {
        let placeholders: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|node| node.op == NodeOp::Placeholder)
            .map(|node| node.id)
            .collect();
        if placeholders.len() != inputs.len() {
            return Err(QuantizerError::ShapeMismatch {
                expected: format!("{} graph inputs", placeholders.len()),
                actual: format!("{}", inputs.len()),
            });
        }

        let mut env: HashMap<NodeId, Tensor> = placeholders
            .into_iter()
            .zip(inputs.iter().cloned())
            .collect();

        for id in self.graph.topological_order() {
            let node = self.graph.node(id);
            let args = node
                .args
                .iter()
                .map(|arg| {
                    env.get(arg).ok_or_else(|| {
                        QuantizerError::Graph(format!("'{}' reads an unevaluated value", node.name))
                    })
                })
                .collect::<Result<Vec<&Tensor>>>()?;

            let value = match &node.op {
                NodeOp::Placeholder => continue,
                NodeOp::Output => return unary(&args, &node.name).cloned(),
                NodeOp::CallModule(target) => {
                    let input = unary(&args, target)?.clone();
                    let module = self.root.get_submodule_mut(target).ok_or_else(|| {
                        QuantizerError::Graph(format!("no submodule at '{target}'"))
                    })?;
                    module.forward(&input)?
                }
                NodeOp::CallFunction(function) => call_function(*function, &args)?,
                NodeOp::CallMethod(method) => call_method(method, &args)?,
                NodeOp::CallOperator(op) => call_operator(*op, &args)?,
            };
            env.insert(id, value);
        }

        Err(QuantizerError::Graph("graph has no output node".to_string()))
    }
}

fn unary<'a>(args: &[&'a Tensor], name: &str) -> Result<&'a Tensor> {
    args.first()
        .copied()
        .ok_or_else(|| QuantizerError::Graph(format!("{name} takes 1 argument, got 0")))
}

fn binary(args: &[&Tensor], name: &str) -> Result<(Tensor, Tensor)> {
    match args {
        [a, b] => Ok(((*a).clone(), (*b).clone())),
        _ => Err(QuantizerError::Graph(format!(
            "{name} takes 2 arguments, got {}",
            args.len()
        ))),
    }
}

fn call_function(function: Function, args: &[&Tensor]) -> Result<Tensor> {
    match function {
        Function::Relu => Ok(relu(unary(args, "relu")?)),
        Function::Relu6 => Ok(relu6(unary(args, "relu6")?)),
        Function::Flatten => flatten(unary(args, "flatten")?),
        Function::Cat => cat(args),
        Function::Add => {
            let (a, b) = binary(args, "add")?;
            broadcast_binary(&a, &b, |x, y| x + y)
        }
        Function::Mul => {
            let (a, b) = binary(args, "mul")?;
            broadcast_binary(&a, &b, |x, y| x * y)
        }
    }
}

fn call_method(method: &str, args: &[&Tensor]) -> Result<Tensor> {
    match method {
        "relu" => Ok(relu(unary(args, method)?)),
        "flatten" => flatten(unary(args, method)?),
        "contiguous" | "clone" | "detach" => unary(args, method).cloned(),
        "add" => {
            let (a, b) = binary(args, method)?;
            broadcast_binary(&a, &b, |x, y| x + y)
        }
        "mul" => {
            let (a, b) = binary(args, method)?;
            broadcast_binary(&a, &b, |x, y| x * y)
        }
        _ => Err(QuantizerError::Graph(format!("unsupported method: {method}"))),
    }
}

fn call_operator(op: Operator, args: &[&Tensor]) -> Result<Tensor> {
    let (a, b) = binary(args, op.qualified_name())?;
    match op {
        Operator::Add => broadcast_binary(&a, &b, |x, y| x + y),
        Operator::Sub => broadcast_binary(&a, &b, |x, y| x - y),
        Operator::Mul => broadcast_binary(&a, &b, |x, y| x * y),
    }
}
