//! Global-to-module qconfig mapping

use std::collections::HashMap;

use super::handler::QConfig;
use crate::nn::{ModuleKind, QatKind};

/// Maps module kinds to a qconfig, falling back to a global default.
///
/// An explicit `None` entry disables observation for that kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QConfigMapping {
    global: Option<QConfig>,
    object_types: HashMap<ModuleKind, Option<QConfig>>,
}

impl QConfigMapping {
    /// Empty mapping: nothing is observed
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style global default
    pub fn set_global(mut self, qconfig: QConfig) -> Self {
        self.global = Some(qconfig);
        self
    }

    /// Override the qconfig for one module kind (`None` = no observer)
    pub fn set_object_type(&mut self, kind: ModuleKind, qconfig: Option<QConfig>) -> &mut Self {
        self.object_types.insert(kind, qconfig);
        self
    }

    /// Global default
    pub fn global(&self) -> Option<&QConfig> {
        self.global.as_ref()
    }

    /// Kinds with an explicit override
    pub fn object_types(&self) -> impl Iterator<Item = (&ModuleKind, Option<&QConfig>)> {
        self.object_types.iter().map(|(k, q)| (k, q.as_ref()))
    }

    /// Resolve the qconfig for a module kind.
    ///
    /// Fused and QAT kinds also honor an override registered for their
    /// leading conv/linear kind, so excluding `Conv2d` excludes `ConvBn2d`.
    pub fn qconfig_for(&self, kind: ModuleKind) -> Option<&QConfig> {
        let layer_kind = match kind {
            ModuleKind::Fused(fused) => Some(fused.layer_kind()),
            ModuleKind::Qat(qat) => Some(QatKind::layer_kind(&qat)),
            _ => None,
        };
        let explicit = self
            .object_types
            .get(&kind)
            .or_else(|| layer_kind.and_then(|k| self.object_types.get(&k)));
        match explicit {
            Some(qconfig) => qconfig.as_ref(),
            None => self.global.as_ref(),
        }
    }
}
