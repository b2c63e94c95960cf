//! Module tree: a closed set of leaf modules plus ordered containers
//! addressed by dotted paths (`backbone.0.conv`).

use super::batch_norm::BatchNorm;
use super::conv::Conv;
use super::functional::{flatten, relu, relu6};
use super::fused::FusedModule;
use super::kind::ModuleKind;
use super::linear::Linear;
use super::qat::QatModule;
use crate::error::{QuantizerError, Result};
use crate::quant::{FakeQuantize, QConfig};
use crate::Tensor;

/// A node of the module tree
#[derive(Clone, Debug, PartialEq)]
pub enum Module {
    Conv(Conv),
    Linear(Linear),
    BatchNorm(BatchNorm),
    ReLU,
    ReLU6,
    Identity,
    Flatten,
    Fused(FusedModule),
    Qat(QatModule),
    FakeQuantize(FakeQuantize),
    Sequential(Sequential),
}

impl Module {
    /// Type identity of this module
    pub fn kind(&self) -> ModuleKind {
        match self {
            Module::Conv(conv) => ModuleKind::Conv(conv.dim),
            Module::Linear(_) => ModuleKind::Linear,
            Module::BatchNorm(bn) => ModuleKind::BatchNorm(bn.dim),
            Module::ReLU => ModuleKind::ReLU,
            Module::ReLU6 => ModuleKind::ReLU6,
            Module::Identity => ModuleKind::Identity,
            Module::Flatten => ModuleKind::Flatten,
            Module::Fused(fused) => ModuleKind::Fused(fused.kind),
            Module::Qat(qat) => ModuleKind::Qat(qat.kind),
            Module::FakeQuantize(_) => ModuleKind::FakeQuantize,
            Module::Sequential(_) => ModuleKind::Sequential,
        }
    }

    /// Forward pass
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        match self {
            Module::Conv(conv) => conv.forward(input),
            Module::Linear(linear) => linear.forward(input),
            Module::BatchNorm(bn) => bn.forward(input),
            Module::ReLU => Ok(relu(input)),
            Module::ReLU6 => Ok(relu6(input)),
            Module::Identity => Ok(input.clone()),
            Module::Flatten => flatten(input),
            Module::Fused(fused) => fused.forward(input),
            Module::Qat(qat) => qat.forward(input),
            Module::FakeQuantize(fq) => Ok(fq.forward(input)),
            Module::Sequential(seq) => seq.forward(input),
        }
    }

    /// Switch every batch norm in the tree between training and eval mode
    pub fn train(&mut self, training: bool) {
        match self {
            Module::BatchNorm(bn) => bn.training = training,
            Module::Fused(FusedModule { bn: Some(bn), .. })
            | Module::Qat(QatModule { bn: Some(bn), .. }) => bn.training = training,
            Module::Sequential(seq) => {
                for (_, child) in seq.iter_mut() {
                    child.train(training);
                }
            }
            _ => {}
        }
    }

    /// Direct children (empty for leaves)
    pub fn children(&self) -> &[(String, Module)] {
        match self {
            Module::Sequential(seq) => &seq.children,
            _ => &[],
        }
    }

    /// Look up a descendant by dotted path; the empty path is `self`
    pub fn get_submodule(&self, path: &str) -> Option<&Module> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |module, name| match module {
            Module::Sequential(seq) => seq.get(name),
            _ => None,
        })
    }

    /// Mutable lookup by dotted path
    pub fn get_submodule_mut(&mut self, path: &str) -> Option<&mut Module> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |module, name| match module {
            Module::Sequential(seq) => seq.get_mut(name),
            _ => None,
        })
    }

    /// Insert or replace the module at `path`, returning the previous one.
    ///
    /// The parent container must already exist.
    pub fn set_submodule(&mut self, path: &str, module: Module) -> Result<Option<Module>> {
        let (parent_path, name) = path.rsplit_once('.').unwrap_or(("", path));
        match self.get_submodule_mut(parent_path) {
            Some(Module::Sequential(seq)) => Ok(seq.insert(name, module)),
            _ => Err(QuantizerError::Graph(format!(
                "no container at '{parent_path}' to hold '{path}'"
            ))),
        }
    }

    /// Remove and return the module at `path`
    pub fn remove_submodule(&mut self, path: &str) -> Option<Module> {
        let (parent_path, name) = path.rsplit_once('.').unwrap_or(("", path));
        match self.get_submodule_mut(parent_path) {
            Some(Module::Sequential(seq)) => seq.remove(name),
            _ => None,
        }
    }

    /// All modules in depth-first pre-order with their dotted paths; the root is `""`
    pub fn named_modules(&self) -> Vec<(String, &Module)> {
        let mut out = Vec::new();
        let mut stack = vec![(String::new(), self)];
        while let Some((path, module)) = stack.pop() {
            for (name, child) in module.children().iter().rev() {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}.{name}")
                };
                stack.push((child_path, child));
            }
            out.push((path, module));
        }
        out
    }

    /// Visit every fake-quant in the tree, including QAT weight fake-quants
    pub fn for_each_fake_quant_mut(&mut self, f: &mut dyn FnMut(&mut FakeQuantize)) {
        match self {
            Module::FakeQuantize(fq) => f(fq),
            Module::Qat(qat) => f(&mut qat.weight_fake_quant),
            Module::Sequential(seq) => {
                for (_, child) in seq.iter_mut() {
                    child.for_each_fake_quant_mut(f);
                }
            }
            _ => {}
        }
    }

    /// Attach `qconfig` to this module and every submodule that can carry one
    pub fn set_qconfig(&mut self, qconfig: Option<&QConfig>) {
        match self {
            Module::Conv(conv) => conv.qconfig = qconfig.cloned(),
            Module::Linear(linear) => linear.qconfig = qconfig.cloned(),
            Module::BatchNorm(bn) => bn.qconfig = qconfig.cloned(),
            Module::Fused(fused) => {
                fused.layer.set_qconfig(qconfig.cloned());
                if let Some(bn) = fused.bn.as_mut() {
                    bn.qconfig = qconfig.cloned();
                }
            }
            Module::Qat(qat) => {
                if let Some(qconfig) = qconfig {
                    qat.qconfig = qconfig.clone();
                }
            }
            Module::Sequential(seq) => {
                for (_, child) in seq.iter_mut() {
                    child.set_qconfig(qconfig);
                }
            }
            Module::ReLU
            | Module::ReLU6
            | Module::Identity
            | Module::Flatten
            | Module::FakeQuantize(_) => {}
        }
    }
}

/// Turn fake quantization on for every fake-quant in the tree
pub fn enable_fake_quant(module: &mut Module) {
    module.for_each_fake_quant_mut(&mut |fq: &mut FakeQuantize| fq.enable_fake_quant(true));
}

/// Turn fake quantization off for every fake-quant in the tree
pub fn disable_fake_quant(module: &mut Module) {
    module.for_each_fake_quant_mut(&mut |fq: &mut FakeQuantize| fq.enable_fake_quant(false));
}

/// Turn statistics collection on for every fake-quant in the tree
pub fn enable_observer(module: &mut Module) {
    module.for_each_fake_quant_mut(&mut |fq: &mut FakeQuantize| fq.enable_observer(true));
}

/// Turn statistics collection off for every fake-quant in the tree
pub fn disable_observer(module: &mut Module) {
    module.for_each_fake_quant_mut(&mut |fq: &mut FakeQuantize| fq.enable_observer(false));
}

/// Ordered container of named children
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sequential {
    children: Vec<(String, Module)>,
}

impl Sequential {
    /// Empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append
    pub fn with(mut self, name: impl Into<String>, module: Module) -> Self {
        self.insert(&name.into(), module);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    /// Replace in place if `name` exists, otherwise append
    pub fn insert(&mut self, name: &str, module: Module) -> Option<Module> {
        match self.get_mut(name) {
            Some(slot) => Some(std::mem::replace(slot, module)),
            None => {
                self.children.push((name.to_string(), module));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Module> {
        let index = self.children.iter().position(|(n, _)| n == name)?;
        Some(self.children.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Module)> {
        self.children.iter().map(|(n, m)| (n, m))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Module)> {
        self.children.iter_mut().map(|(n, m)| (&*n, m))
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Run children in order
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (_, child) in self.children.iter_mut() {
            x = child.forward(&x)?;
        }
        Ok(x)
    }
}

impl From<Sequential> for Module {
    fn from(seq: Sequential) -> Self {
        Module::Sequential(seq)
    }
}
