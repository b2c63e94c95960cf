//! Default tracer for nested sequential containers

use std::collections::HashMap;

use log::debug;

use super::{Scope, Tracer};
use crate::error::{QuantizerError, Result};
use crate::graph::{Graph, GraphModule, NodeId};
use crate::nn::Module;

/// Traces nested [`Sequential`](crate::nn::Sequential) containers into a
/// linear chain of `call_module` nodes, one per leaf module.
#[derive(Clone, Debug, Default)]
pub struct CustomTracer {
    skipped_module_names: Vec<String>,
    node_name_to_scope: HashMap<String, Scope>,
}

impl CustomTracer {
    /// `skipped_module_names` are containers kept as one opaque call
    pub fn new(skipped_module_names: Vec<String>) -> Self {
        Self {
            skipped_module_names,
            node_name_to_scope: HashMap::new(),
        }
    }

    fn trace_children(
        &mut self,
        graph: &mut Graph,
        module: &Module,
        prefix: &str,
        mut value: NodeId,
    ) -> Result<NodeId> {
        for (name, child) in module.children() {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            let is_container = matches!(child, Module::Sequential(_));
            if is_container && !self.skipped_module_names.contains(&path) {
                value = self.trace_children(graph, child, &path, value)?;
                continue;
            }
            value = graph.call_module(&path, vec![value])?;
            let node_name = graph.node(value).name.clone();
            self.node_name_to_scope
                .insert(node_name, Scope::new(path, child.kind()));
        }
        Ok(value)
    }
}

impl Tracer for CustomTracer {
    fn trace(&mut self, root: &Module) -> Result<GraphModule> {
        if !matches!(root, Module::Sequential(_)) {
            return Err(QuantizerError::Graph(format!(
                "cannot trace a bare {} module, wrap it in a Sequential",
                root.kind()
            )));
        }
        self.node_name_to_scope.clear();

        let mut graph = Graph::new();
        let input = graph.placeholder("x")?;
        let last = self.trace_children(&mut graph, root, "", input)?;
        graph.output(last)?;
        debug!("Traced {} nodes", graph.active_node_count());

        Ok(GraphModule::new(root.clone(), graph))
    }

    fn node_name_to_scope(&self) -> &HashMap<String, Scope> {
        &self.node_name_to_scope
    }
}
