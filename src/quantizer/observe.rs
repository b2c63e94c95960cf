//! Observer insertion: QAT module swap plus activation fake-quants

use std::collections::HashMap;

use log::{debug, info};

use crate::backend::{BackendConfig, ObservationType};
use crate::error::{QuantizerError, Result};
use crate::graph::{GraphModule, NodeId, NodeOp};
use crate::nn::{Module, ModuleKind, QatKind, QatModule};
use crate::quant::{QConfig, QConfigMapping};
use crate::tracer::Scope;

/// Prefix of inserted activation fake-quant submodules
pub const ACTIVATION_POST_PROCESS_PREFIX: &str = "activation_post_process_";

/// Everything observer insertion reads
pub(crate) struct ObserverContext<'a> {
    pub mapping: &'a QConfigMapping,
    pub backend_config: &'a BackendConfig,
    pub node_name_to_scope: &'a HashMap<String, Scope>,
    /// Un-traced model, consulted for the kind of a node's scope
    pub model: &'a Module,
}

impl ObserverContext<'_> {
    /// Module kind a non-module node runs under
    fn scope_kind(&self, node_name: &str) -> Option<ModuleKind> {
        let scope = self.node_name_to_scope.get(node_name)?;
        let kind = self
            .model
            .get_submodule(&scope.module_path)
            .map(Module::kind)
            .unwrap_or(scope.module_kind);
        Some(kind)
    }

    /// QConfig for a node; `None` disables observation
    fn qconfig_for(&self, gm: &GraphModule, id: NodeId) -> Option<QConfig> {
        let node = gm.graph.node(id);
        let kind = match node.op {
            NodeOp::CallModule(_) => gm.module_for(id).map(Module::kind),
            _ => self.scope_kind(&node.name),
        };
        match kind {
            Some(kind) => self.mapping.qconfig_for(kind).cloned(),
            None => self.mapping.global().cloned(),
        }
    }
}

fn next_fake_quant_name(root: &Module) -> String {
    (0..)
        .map(|n| format!("{ACTIVATION_POST_PROCESS_PREFIX}{n}"))
        .find(|name| root.get_submodule(name).is_none())
        .unwrap_or_else(|| ACTIVATION_POST_PROCESS_PREFIX.to_string())
}

/// Add a fake-quant node reading `producer`, backed by the submodule at
/// `target` or by a fresh one built from `qconfig`
fn insert_fake_quant(
    gm: &mut GraphModule,
    producer: NodeId,
    target: Option<String>,
    qconfig: &QConfig,
) -> Result<NodeId> {
    let target = match target {
        Some(target) => target,
        None => {
            let name = next_fake_quant_name(&gm.root);
            let fq = Module::FakeQuantize(qconfig.activation.build());
            gm.root.set_submodule(&name, fq)?;
            name
        }
    };
    let fq_node = gm
        .graph
        .insert_after(producer, NodeOp::CallModule(target.clone()), vec![producer])?;
    debug!("Inserted {target} after {}", gm.graph.node(producer).name);
    Ok(fq_node)
}

/// Replace a float conv/linear/fused module with its QAT counterpart
fn swap_qat_module(gm: &mut GraphModule, target: &str, qconfig: &QConfig) -> Result<()> {
    let mut module = gm
        .root
        .get_submodule(target)
        .cloned()
        .ok_or_else(|| QuantizerError::Graph(format!("no submodule at '{target}'")))?;
    module.set_qconfig(Some(qconfig));
    let qat = QatModule::from_float(module)?;
    gm.root.set_submodule(target, Module::Qat(qat))?;
    Ok(())
}

/// Observe the inputs of `id`, reusing a fake-quant already attached to a
/// producer. Returns the fake-quant targets feeding `id`.
fn observe_inputs(gm: &mut GraphModule, id: NodeId, qconfig: &QConfig) -> Result<Vec<String>> {
    let mut targets = Vec::new();
    for arg in gm.graph.node(id).args.clone() {
        if gm.is_fake_quant_node(arg) {
            targets.extend(gm.graph.node(arg).target().map(str::to_string));
            continue;
        }
        let existing = gm
            .graph
            .users(arg)
            .into_iter()
            .find(|&user| gm.is_fake_quant_node(user));
        let fq_node = match existing {
            Some(fq_node) => fq_node,
            None => insert_fake_quant(gm, arg, None, qconfig)?,
        };
        gm.graph.replace_input_with(id, arg, fq_node);
        targets.extend(gm.graph.node(fq_node).target().map(str::to_string));
    }
    Ok(targets)
}

/// Insert fake-quants at every quantizable boundary.
///
/// Nodes are visited in topological order. A node is quantizable when the
/// backend has an observation rule for it and the mapping yields a qconfig.
/// Each unobserved input edge gets one fake-quant, and the output gets one
/// fake-quant that all users are rewired through. Ops that cannot change
/// the value range reuse their input fake-quant module for the output.
/// Conv, linear and fused modules are swapped for QAT modules.
///
/// Returns the number of inserted fake-quant nodes.
pub(crate) fn insert_observers(gm: &mut GraphModule, ctx: &ObserverContext<'_>) -> Result<usize> {
    let before = gm.fake_quant_nodes().len();

    for id in gm.graph.topological_order() {
        if gm.graph.node(id).is_removed() || gm.is_fake_quant_node(id) {
            continue;
        }
        let module_kind = match &gm.graph.node(id).op {
            NodeOp::CallModule(target) => Some(
                gm.module_for(id)
                    .map(Module::kind)
                    .ok_or_else(|| QuantizerError::Graph(format!("no submodule at '{target}'")))?,
            ),
            _ => None,
        };
        let op = gm.graph.node(id).op.clone();
        let Some(observation) = ctx.backend_config.observation_type(&op, module_kind) else {
            continue;
        };
        let Some(qconfig) = ctx.qconfig_for(gm, id) else {
            debug!("No qconfig for {}, not observed", gm.graph.node(id).name);
            continue;
        };

        if let (NodeOp::CallModule(target), Some(kind)) = (&op, module_kind) {
            if QatKind::from_float(kind).is_some() {
                swap_qat_module(gm, target, &qconfig)?;
            }
        }

        let input_targets = observe_inputs(gm, id, &qconfig)?;
        let shared = match observation {
            ObservationType::OutputShareObserverWithInput => input_targets.into_iter().next(),
            ObservationType::OutputUseDifferentObserverAsInput => None,
        };
        let fq_node = insert_fake_quant(gm, id, shared, &qconfig)?;
        gm.graph.replace_all_uses_with(id, fq_node);
    }

    let inserted = gm.fake_quant_nodes().len() - before;
    info!("Inserted {inserted} fake quant nodes");
    Ok(inserted)
}
