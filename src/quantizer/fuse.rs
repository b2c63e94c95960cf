//! Fusion of `layer → batch norm → ReLU` chains into trainable fused modules

use std::collections::HashSet;

use log::{debug, info};

use crate::backend::{BackendConfig, FusionRule};
use crate::error::{QuantizerError, Result};
use crate::graph::{GraphModule, NodeId, NodeOp};
use crate::nn::{FusedModule, Layer, Module, ModuleKind};

/// Kind of the module a node calls, if it is a module call
fn called_kind(gm: &GraphModule, id: NodeId) -> Option<ModuleKind> {
    gm.module_for(id).map(Module::kind)
}

/// Single live user of `id` that reads only `id`
fn sole_user(gm: &GraphModule, id: NodeId) -> Option<NodeId> {
    match gm.graph.users(id).as_slice() {
        [user] if gm.graph.node(*user).args == [id] => Some(*user),
        _ => None,
    }
}

fn is_relu_node(gm: &GraphModule, backend_config: &BackendConfig, id: NodeId) -> bool {
    match &gm.graph.node(id).op {
        NodeOp::CallModule(_) => called_kind(gm, id).is_some_and(|kind| kind.is_relu()),
        op => backend_config.is_fusable_relu(op),
    }
}

/// Nodes matched by `rule` starting at `head`, or `None`
fn match_rule(
    gm: &GraphModule,
    backend_config: &BackendConfig,
    rule: &FusionRule,
    head: NodeId,
    consumed: &HashSet<NodeId>,
) -> Option<Vec<NodeId>> {
    let mut chain = vec![head];
    let mut tail = head;
    if let Some(bn_kind) = rule.bn {
        let bn = sole_user(gm, tail).filter(|id| !consumed.contains(id))?;
        if called_kind(gm, bn) != Some(bn_kind) {
            return None;
        }
        chain.push(bn);
        tail = bn;
    }
    if rule.relu {
        let relu = sole_user(gm, tail).filter(|id| !consumed.contains(id))?;
        if !is_relu_node(gm, backend_config, relu) {
            return None;
        }
        chain.push(relu);
    }
    Some(chain)
}

fn submodule(gm: &GraphModule, target: &str) -> Result<Module> {
    gm.root
        .get_submodule(target)
        .cloned()
        .ok_or_else(|| QuantizerError::Graph(format!("no submodule at '{target}'")))
}

fn fuse_chain(gm: &mut GraphModule, rule: &FusionRule, chain: &[NodeId]) -> Result<()> {
    let head = chain[0];
    let target = gm
        .graph
        .node(head)
        .target()
        .map(str::to_string)
        .ok_or_else(|| QuantizerError::Graph("fusion head is not a module call".to_string()))?;

    let layer = Layer::from_module(submodule(gm, &target)?).ok_or_else(|| {
        QuantizerError::Graph(format!("'{target}' is not a conv or linear layer"))
    })?;
    let bn = match rule.bn {
        Some(_) => match gm.graph.node(chain[1]).target() {
            Some(bn_target) => match submodule(gm, bn_target)? {
                Module::BatchNorm(bn) => Some(bn),
                other => {
                    return Err(QuantizerError::Graph(format!(
                        "expected batch norm at '{bn_target}', found {}",
                        other.kind()
                    )))
                }
            },
            None => None,
        },
        None => None,
    };
    let fused = FusedModule::new(rule.fused, layer, bn)?;
    gm.root.set_submodule(&target, Module::Fused(fused))?;

    if let Some(&tail) = chain.last() {
        if tail != head {
            gm.graph.replace_all_uses_with(tail, head);
        }
    }
    for &id in chain[1..].iter().rev() {
        let absorbed = gm.graph.node(id).target().map(str::to_string);
        gm.graph.erase_node(id)?;
        if let Some(absorbed) = absorbed {
            gm.delete_submodule_if_unused(&absorbed);
        }
    }
    debug!("Fused {} chain at '{target}'", rule.fused.name());
    Ok(())
}

/// Fuse every chain a backend fusion rule matches, longest rule first.
///
/// Nodes are visited in topological order and each node joins at most one
/// chain. Intermediate nodes must feed only the next node of the chain.
/// Returns the number of fused chains.
pub fn fuse_fx(gm: &mut GraphModule, backend_config: &BackendConfig) -> Result<usize> {
    let mut consumed: HashSet<NodeId> = HashSet::new();
    let mut fused = 0;

    for head in gm.graph.topological_order() {
        if consumed.contains(&head) || gm.graph.node(head).is_removed() {
            continue;
        }
        let Some(kind) = called_kind(gm, head) else {
            continue;
        };
        let matched = backend_config
            .fusion_rules()
            .iter()
            .filter(|rule| rule.layer == kind)
            .find_map(|rule| {
                match_rule(gm, backend_config, rule, head, &consumed).map(|chain| (*rule, chain))
            });
        let Some((rule, chain)) = matched else {
            continue;
        };
        fuse_chain(gm, &rule, &chain)?;
        consumed.extend(chain);
        fused += 1;
    }

    info!("Fused {fused} module chains");
    Ok(fused)
}
