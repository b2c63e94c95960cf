//! Traced computation graph
//!
//! Nodes live in an arena indexed by [`NodeId`] and are never physically
//! removed; erasing a node only marks it. A separate sequence keeps the
//! program order that tracing produced, so nodes inserted later can be
//! placed right after the node they observe.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::node::{Function, Node, NodeId, NodeOp, Operator};
use crate::error::{QuantizerError, Result};

/// Graph of module, function, method and operator calls
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    /// All nodes ever created
    nodes: Vec<Node>,
    /// Program order of live and erased nodes
    sequence: Vec<NodeId>,
    /// Names ever handed out; erased names are not reused
    names: HashSet<String>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    fn unique_name(&mut self, hint: &str) -> String {
        let mut name = hint.to_string();
        let mut counter = 1;
        while self.names.contains(&name) {
            name = format!("{hint}_{counter}");
            counter += 1;
        }
        self.names.insert(name.clone());
        name
    }

    fn check_args(&self, args: &[NodeId]) -> Result<()> {
        for &arg in args {
            match self.nodes.get(arg) {
                Some(node) if !node.is_removed() => {}
                _ => {
                    return Err(QuantizerError::Graph(format!(
                        "argument {arg} is not a live node"
                    )))
                }
            }
        }
        Ok(())
    }

    fn push_node(&mut self, op: NodeOp, args: Vec<NodeId>, hint: &str) -> Result<NodeId> {
        self.check_args(&args)?;
        let id = self.nodes.len();
        let name = self.unique_name(hint);
        self.nodes.push(Node::new(id, name, op, args));
        Ok(id)
    }

    /// Append a node at the end of the program
    pub fn create_node(&mut self, op: NodeOp, args: Vec<NodeId>) -> Result<NodeId> {
        let hint = op.name_hint();
        let id = self.push_node(op, args, &hint)?;
        self.sequence.push(id);
        Ok(id)
    }

    /// Insert a node directly after `anchor` in program order
    pub fn insert_after(&mut self, anchor: NodeId, op: NodeOp, args: Vec<NodeId>) -> Result<NodeId> {
        let position = self
            .sequence
            .iter()
            .position(|&id| id == anchor)
            .ok_or_else(|| QuantizerError::Graph(format!("unknown anchor node {anchor}")))?;
        let hint = op.name_hint();
        let id = self.push_node(op, args, &hint)?;
        self.sequence.insert(position + 1, id);
        Ok(id)
    }

    /// Add a graph input
    pub fn placeholder(&mut self, name: &str) -> Result<NodeId> {
        let id = self.push_node(NodeOp::Placeholder, Vec::new(), name)?;
        self.sequence.push(id);
        Ok(id)
    }

    pub fn call_module(&mut self, target: &str, args: Vec<NodeId>) -> Result<NodeId> {
        self.create_node(NodeOp::CallModule(target.to_string()), args)
    }

    pub fn call_function(&mut self, function: Function, args: Vec<NodeId>) -> Result<NodeId> {
        self.create_node(NodeOp::CallFunction(function), args)
    }

    pub fn call_method(&mut self, method: &str, args: Vec<NodeId>) -> Result<NodeId> {
        self.create_node(NodeOp::CallMethod(method.to_string()), args)
    }

    pub fn call_operator(&mut self, op: Operator, args: Vec<NodeId>) -> Result<NodeId> {
        self.create_node(NodeOp::CallOperator(op), args)
    }

    /// Mark `value` as the graph result
    pub fn output(&mut self, value: NodeId) -> Result<NodeId> {
        self.create_node(NodeOp::Output, vec![value])
    }

    /// Get a node by ID
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Get a mutable reference to a node by ID
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Look up a live node by name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes()
            .find(|node| node.name == name)
            .map(|node| node.id)
    }

    /// Live nodes in program order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.sequence
            .iter()
            .map(|&id| &self.nodes[id])
            .filter(|node| !node.is_removed())
    }

    /// Count live nodes
    pub fn active_node_count(&self) -> usize {
        self.nodes().count()
    }

    /// The output node, if any
    pub fn output_node(&self) -> Option<NodeId> {
        self.nodes()
            .find(|node| node.op == NodeOp::Output)
            .map(|node| node.id)
    }

    /// Live nodes that take `id` as an argument, in program order
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes()
            .filter(|node| node.args.contains(&id))
            .map(|node| node.id)
            .collect()
    }

    /// Compute topological order of live nodes; ties follow program order
    pub fn topological_order(&self) -> Vec<NodeId> {
        let rank: HashMap<NodeId, usize> = self
            .nodes()
            .enumerate()
            .map(|(rank, node)| (node.id, rank))
            .collect();
        let (in_degree, adjacency) = self.build_graph_maps();
        Self::kahns_algorithm(in_degree, &adjacency, &rank)
    }

    /// Build in-degree counts and adjacency lists for live nodes
    fn build_graph_maps(&self) -> (HashMap<NodeId, usize>, HashMap<NodeId, Vec<NodeId>>) {
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for node in self.nodes() {
            in_degree.entry(node.id).or_insert(0);
            for &input_id in &node.args {
                if !self.nodes[input_id].is_removed() {
                    adjacency.entry(input_id).or_default().push(node.id);
                    *in_degree.entry(node.id).or_insert(0) += 1;
                }
            }
        }

        (in_degree, adjacency)
    }

    /// Run Kahn's algorithm, always emitting the earliest ready node
    fn kahns_algorithm(
        mut in_degree: HashMap<NodeId, usize>,
        adjacency: &HashMap<NodeId, Vec<NodeId>>,
        rank: &HashMap<NodeId, usize>,
    ) -> Vec<NodeId> {
        let by_rank_desc = |a: &NodeId, b: &NodeId| rank.get(b).cmp(&rank.get(a));
        let mut queue: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        queue.sort_unstable_by(by_rank_desc);

        let mut order = Vec::new();
        let empty = Vec::new();
        while let Some(id) = queue.pop() {
            order.push(id);
            for &neighbor in adjacency.get(&id).unwrap_or(&empty) {
                let Some(deg) = in_degree.get_mut(&neighbor) else {
                    continue;
                };
                *deg -= 1;
                if *deg == 0 {
                    queue.push(neighbor);
                    queue.sort_unstable_by(by_rank_desc);
                }
            }
        }

        order
    }

    /// Rewire every user of `old_id` to read `new_id` instead.
    ///
    /// `new_id` itself is left alone so a node inserted after `old_id`
    /// can keep reading it. Returns the number of rewired users.
    pub fn replace_all_uses_with(&mut self, old_id: NodeId, new_id: NodeId) -> usize {
        let mut rewired = 0;
        for node in self.nodes.iter_mut() {
            if node.is_removed() || node.id == new_id || !node.args.contains(&old_id) {
                continue;
            }
            for input_id in &mut node.args {
                if *input_id == old_id {
                    *input_id = new_id;
                }
            }
            rewired += 1;
        }
        rewired
    }

    /// Rewire a single edge `old_id → user` to `new_id → user`
    pub fn replace_input_with(&mut self, user: NodeId, old_id: NodeId, new_id: NodeId) {
        for input_id in &mut self.nodes[user].args {
            if *input_id == old_id {
                *input_id = new_id;
            }
        }
    }

    /// Erase a node that nobody uses any more
    pub fn erase_node(&mut self, id: NodeId) -> Result<()> {
        if !matches!(self.nodes.get(id), Some(node) if !node.is_removed()) {
            return Err(QuantizerError::Graph(format!("node {id} is not live")));
        }
        let users = self.users(id);
        if !users.is_empty() {
            return Err(QuantizerError::Graph(format!(
                "cannot erase '{}' which still has {} user(s)",
                self.nodes[id].name,
                users.len()
            )));
        }
        self.nodes[id].mark_removed();
        Ok(())
    }

    /// Check structural well-formedness: live arguments, definition before
    /// use in program order, and exactly one output node last.
    pub fn lint(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut outputs = 0;
        for node in self.nodes() {
            if outputs > 0 {
                return Err(QuantizerError::Graph(format!(
                    "node '{}' follows the output node",
                    node.name
                )));
            }
            for &arg in &node.args {
                if !seen.contains(&arg) {
                    return Err(QuantizerError::Graph(format!(
                        "node '{}' uses {arg} before it is defined",
                        node.name
                    )));
                }
            }
            match node.op {
                NodeOp::Placeholder if !node.args.is_empty() => {
                    return Err(QuantizerError::Graph(format!(
                        "placeholder '{}' has arguments",
                        node.name
                    )))
                }
                NodeOp::Output => outputs += 1,
                NodeOp::CallModule(_)
                | NodeOp::CallFunction(_)
                | NodeOp::CallMethod(_)
                | NodeOp::CallOperator(_)
                    if node.args.is_empty() =>
                {
                    return Err(QuantizerError::Graph(format!(
                        "call '{}' has no arguments",
                        node.name
                    )))
                }
                _ => {}
            }
            seen.insert(node.id);
        }
        if outputs != 1 {
            return Err(QuantizerError::Graph(format!(
                "expected one output node, found {outputs}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph():")?;
        for node in self.nodes() {
            let args: Vec<String> = node
                .args
                .iter()
                .map(|&arg| format!("%{}", self.nodes[arg].name))
                .collect();
            writeln!(f, "    %{} : {}({})", node.name, node.op, args.join(", "))?;
        }
        Ok(())
    }
}
