//! Folding trained QAT modules back into deployable modules

use log::{debug, info};

use crate::error::Result;
use crate::nn::{enable_fake_quant, Module, QatModule};
use crate::quant::QConfig;

/// Deployment replacement for one trained QAT module.
///
/// The weight fake-quant is applied once and written back, then batch norm
/// is folded into the layer. With `keep_fake_quant` the folded float module
/// becomes a batch-norm-free QAT module again and its weight fake-quant is
/// run once more to observe the folded weight.
fn convert_qat_module(
    qat: &mut QatModule,
    qconfig: &QConfig,
    keep_fake_quant: bool,
) -> Result<Module> {
    qat.apply_weight_fake_quant();
    let mut float = qat.to_float()?;
    if !keep_fake_quant {
        return Ok(float);
    }

    float.set_qconfig(Some(qconfig));
    // The folded weight has not been through the weight fake-quant yet
    let mut merged = QatModule::from_float_as(float, qat.kind.merge_bn())?;
    merged.observe_weight();
    Ok(Module::Qat(merged))
}

/// Replace every QAT module under `root` with its deployment counterpart.
///
/// Fake quantization is re-enabled tree-wide first. Containers are walked
/// with an explicit worklist and replacements are applied after the walk.
/// Returns the number of converted modules. Running this twice on the same
/// tree folds twice and must be avoided by the caller.
pub fn post_process_weight_fakequant(
    root: &mut Module,
    qconfig: &QConfig,
    keep_fake_quant: bool,
) -> Result<usize> {
    enable_fake_quant(root);

    let mut worklist: Vec<String> = root
        .children()
        .iter()
        .map(|(name, _)| name.clone())
        .collect();
    let mut replacements: Vec<(String, Module)> = Vec::new();

    while let Some(path) = worklist.pop() {
        match root.get_submodule_mut(&path) {
            Some(Module::Qat(qat)) => {
                let replacement = convert_qat_module(qat, qconfig, keep_fake_quant)?;
                debug!(
                    "Converted qat.{} at '{path}' into {}",
                    qat.kind.name(),
                    replacement.kind()
                );
                replacements.push((path, replacement));
            }
            Some(Module::Sequential(seq)) => {
                worklist.extend(seq.iter().map(|(name, _)| format!("{path}.{name}")));
            }
            _ => {}
        }
    }

    let converted = replacements.len();
    for (path, replacement) in replacements {
        root.set_submodule(&path, replacement)?;
    }
    info!("Post-processed {converted} QAT modules (keep_fake_quant={keep_fake_quant})");
    Ok(converted)
}
