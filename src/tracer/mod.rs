//! Tracers turn a module tree into a [`GraphModule`](crate::graph::GraphModule)
//! and remember which module scope each node came from.

mod config;
mod custom;


use std::collections::HashMap;
use std::fmt;

use crate::error::Result;
use crate::graph::GraphModule;
use crate::nn::{Module, ModuleKind};

pub use config::TracerConfig;
pub use custom::CustomTracer;

/// Module scope a traced node originated from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    /// Dotted path of the module, `""` for the root
    pub module_path: String,
    pub module_kind: ModuleKind,
}

impl Scope {
    pub fn new(module_path: impl Into<String>, module_kind: ModuleKind) -> Self {
        Self {
            module_path: module_path.into(),
            module_kind,
        }
    }
}

/// Graph tracer
pub trait Tracer: fmt::Debug {
    /// Trace `root` into a runnable graph module
    fn trace(&mut self, root: &Module) -> Result<GraphModule>;

    /// Node name → originating scope, for the most recent trace
    fn node_name_to_scope(&self) -> &HashMap<String, Scope>;
}
