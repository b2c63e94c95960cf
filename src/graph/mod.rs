//! Traced computation graphs
//!
//! A [`Graph`] records module, function, method and primitive-operator calls
//! in program order. A [`GraphModule`] pairs it with the module tree its
//! `call_module` nodes resolve against and can interpret it.

mod graph;
mod graph_module;
mod node;


pub use graph::Graph;
pub use graph_module::GraphModule;
pub use node::{Function, Node, NodeId, NodeOp, Operator};
