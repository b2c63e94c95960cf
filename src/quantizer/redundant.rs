//! Deletion of fake-quants adjacent to calls that do not need them
//!
//! Each function removes fake-quant nodes next to calls of one kind:
//! `before` removes a fake-quant that feeds a matching call and rewires its
//! users to its input, `after` removes fake-quants fed by a matching call
//! and rewires their users to the call. Entries that match nothing are
//! ignored, and running a pass twice deletes nothing the second time.

use log::debug;

use crate::error::Result;
use crate::graph::{Function, GraphModule, NodeId, NodeOp, Operator};
use crate::nn::ModuleKind;

/// Calls a pass looks for
#[derive(Clone, Copy, Debug)]
enum CallPattern<'a> {
    Modules(&'a [ModuleKind]),
    Functions(&'a [Function]),
    Methods(&'a [String]),
    Operators(&'a [Operator]),
}

impl CallPattern<'_> {
    fn is_empty(&self) -> bool {
        match self {
            CallPattern::Modules(kinds) => kinds.is_empty(),
            CallPattern::Functions(functions) => functions.is_empty(),
            CallPattern::Methods(methods) => methods.is_empty(),
            CallPattern::Operators(ops) => ops.is_empty(),
        }
    }

    fn matches(&self, gm: &GraphModule, id: NodeId) -> bool {
        let node = gm.graph.node(id);
        if node.is_removed() {
            return false;
        }
        match (self, &node.op) {
            (CallPattern::Modules(kinds), NodeOp::CallModule(_)) => gm
                .module_for(id)
                .is_some_and(|module| kinds.contains(&module.kind())),
            (CallPattern::Functions(functions), NodeOp::CallFunction(function)) => {
                functions.contains(function)
            }
            (CallPattern::Methods(methods), NodeOp::CallMethod(method)) => {
                methods.contains(method)
            }
            (CallPattern::Operators(ops), NodeOp::CallOperator(op)) => ops.contains(op),
            _ => false,
        }
    }
}

fn del_fakequant_before(gm: &mut GraphModule, pattern: CallPattern<'_>) -> Result<usize> {
    if pattern.is_empty() {
        return Ok(0);
    }
    let mut deleted = 0;
    for id in gm.graph.topological_order() {
        if !pattern.matches(gm, id) {
            continue;
        }
        for arg in gm.graph.node(id).args.clone() {
            if gm.is_fake_quant_node(arg) {
                gm.remove_fake_quant_node(arg)?;
                deleted += 1;
            }
        }
    }
    debug!("Deleted {deleted} fake quant nodes before {pattern:?}");
    Ok(deleted)
}

fn del_fakequant_after(gm: &mut GraphModule, pattern: CallPattern<'_>) -> Result<usize> {
    if pattern.is_empty() {
        return Ok(0);
    }
    let mut deleted = 0;
    for id in gm.graph.topological_order() {
        if !pattern.matches(gm, id) {
            continue;
        }
        for user in gm.graph.users(id) {
            if gm.is_fake_quant_node(user) {
                gm.remove_fake_quant_node(user)?;
                deleted += 1;
            }
        }
    }
    debug!("Deleted {deleted} fake quant nodes after {pattern:?}");
    Ok(deleted)
}

/// Delete fake-quants feeding calls of the given module kinds
pub fn del_fakequant_before_module(gm: &mut GraphModule, kinds: &[ModuleKind]) -> Result<usize> {
    del_fakequant_before(gm, CallPattern::Modules(kinds))
}

/// Delete fake-quants fed by calls of the given module kinds
pub fn del_fakequant_after_module(gm: &mut GraphModule, kinds: &[ModuleKind]) -> Result<usize> {
    del_fakequant_after(gm, CallPattern::Modules(kinds))
}

/// Delete fake-quants feeding calls of the given functions
pub fn del_fakequant_before_function(
    gm: &mut GraphModule,
    functions: &[Function],
) -> Result<usize> {
    del_fakequant_before(gm, CallPattern::Functions(functions))
}

/// Delete fake-quants fed by calls of the given functions
pub fn del_fakequant_after_function(
    gm: &mut GraphModule,
    functions: &[Function],
) -> Result<usize> {
    del_fakequant_after(gm, CallPattern::Functions(functions))
}

/// Delete fake-quants feeding calls of the given tensor methods
pub fn del_fakequant_before_method(gm: &mut GraphModule, methods: &[String]) -> Result<usize> {
    del_fakequant_before(gm, CallPattern::Methods(methods))
}

/// Delete fake-quants fed by calls of the given tensor methods
pub fn del_fakequant_after_method(gm: &mut GraphModule, methods: &[String]) -> Result<usize> {
    del_fakequant_after(gm, CallPattern::Methods(methods))
}

/// Delete fake-quants feeding the given primitive operators
pub fn del_fakequant_before_op(gm: &mut GraphModule, ops: &[Operator]) -> Result<usize> {
    del_fakequant_before(gm, CallPattern::Operators(ops))
}

/// Delete fake-quants fed by the given primitive operators
pub fn del_fakequant_after_op(gm: &mut GraphModule, ops: &[Operator]) -> Result<usize> {
    del_fakequant_after(gm, CallPattern::Operators(ops))
}
