//! Tests for layers, fused/QAT modules and the module tree.

use super::*;
use crate::quant::{GlobalQConfig, QConfig, QConfigHandler, QSchemeConfig, TypeSpec};
use crate::Tensor;
use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2, Array, ArrayD, IxDyn};
use proptest::prelude::*;

fn qconfig() -> QConfig {
    let raw = GlobalQConfig {
        w_observer: TypeSpec::new("PerChannelMinMaxObserver"),
        a_observer: TypeSpec::new("MinMaxObserver"),
        w_fake_quant: TypeSpec::new("FakeQuantize"),
        a_fake_quant: TypeSpec::new("FakeQuantize"),
        w_qscheme: QSchemeConfig {
            is_symmetric_range: true,
            ..QSchemeConfig::default()
        },
        a_qscheme: QSchemeConfig::default(),
    };
    QConfigHandler::new(&raw).unwrap().convert()
}

fn ramp(shape: &[usize]) -> Tensor {
    let n: usize = shape.iter().product();
    ArrayD::from_shape_vec(
        IxDyn(shape),
        (0..n).map(|i| (i as f32 * 0.37).sin()).collect(),
    )
    .unwrap()
}

fn conv2d(in_channels: usize, out_channels: usize) -> Conv {
    let weight = ramp(&[out_channels, in_channels, 3, 3]);
    let bias = Array::linspace(-0.5, 0.5, out_channels);
    Conv::from_weight(weight, Some(bias), 1).unwrap()
}

fn bn2d(channels: usize) -> BatchNorm {
    BatchNorm::new(ConvDim::D2, channels).with_stats(
        Array::linspace(0.5, 2.0, channels),
        Array::linspace(-1.0, 1.0, channels),
        Array::linspace(-0.2, 0.3, channels),
        Array::linspace(0.5, 1.5, channels),
    )
}

// ========================================================================
// Layers
// ========================================================================

#[test]
fn test_conv1d_matches_hand_computation() {
    let weight = ArrayD::from_shape_vec(IxDyn(&[1, 1, 3]), vec![1.0, 2.0, 3.0]).unwrap();
    let conv = Conv::from_weight(weight, Some(arr1(&[0.5])), 1).unwrap();
    let x = ArrayD::from_shape_vec(IxDyn(&[1, 1, 3]), vec![1.0, 1.0, 1.0]).unwrap();

    let y = conv.forward(&x).unwrap();

    assert_eq!(y.shape(), &[1, 1, 3]);
    // padded input [0, 1, 1, 1, 0]
    assert_abs_diff_eq!(y[[0, 0, 0]], 5.0 + 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(y[[0, 0, 1]], 6.0 + 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(y[[0, 0, 2]], 3.0 + 0.5, epsilon = 1e-6);
}

#[test]
fn test_conv2d_output_shape() {
    let conv = conv2d(3, 4);
    let y = conv.forward(&ramp(&[2, 3, 5, 5])).unwrap();
    assert_eq!(y.shape(), &[2, 4, 5, 5]);
}

#[test]
fn test_conv_rejects_channel_mismatch() {
    let conv = conv2d(3, 4);
    assert!(conv.forward(&ramp(&[1, 2, 5, 5])).is_err());
}

#[test]
fn test_conv_dim_follows_weight_rank() {
    let conv = Conv::from_weight(ramp(&[2, 1, 3, 3, 3]), None, 0).unwrap();
    assert_eq!(conv.dim, ConvDim::D3);
    assert!(Conv::from_weight(ramp(&[2, 1]), None, 0).is_err());
}

#[test]
fn test_linear_forward() {
    let linear = Linear::from_weight(
        arr2(&[[1.0, 2.0], [0.0, -1.0]]).into_dyn(),
        Some(arr1(&[0.5, 1.0])),
    )
    .unwrap();
    let y = linear.forward(&arr2(&[[1.0, 1.0]]).into_dyn()).unwrap();
    assert_abs_diff_eq!(y[[0, 0]], 3.5, epsilon = 1e-6);
    assert_abs_diff_eq!(y[[0, 1]], 0.0, epsilon = 1e-6);
}

#[test]
fn test_batch_norm_eval_uses_running_stats() {
    let mut bn = BatchNorm::new(ConvDim::D1, 2).with_stats(
        arr1(&[2.0, 1.0]),
        arr1(&[1.0, 0.0]),
        arr1(&[0.0, 1.0]),
        arr1(&[1.0, 4.0]),
    );
    bn.eps = 0.0;
    let y = bn.forward(&arr2(&[[1.0, 3.0]]).into_dyn()).unwrap();
    assert_abs_diff_eq!(y[[0, 0]], 3.0, epsilon = 1e-6);
    assert_abs_diff_eq!(y[[0, 1]], 1.0, epsilon = 1e-6);
}

#[test]
fn test_batch_norm_training_updates_running_stats() {
    let mut bn = BatchNorm::new(ConvDim::D1, 1);
    bn.training = true;
    let y = bn.forward(&arr2(&[[1.0], [3.0]]).into_dyn()).unwrap();

    assert_abs_diff_eq!(y[[0, 0]], -1.0, epsilon = 1e-3);
    assert_abs_diff_eq!(y[[1, 0]], 1.0, epsilon = 1e-3);
    assert_abs_diff_eq!(bn.running_mean[0], 0.2, epsilon = 1e-6);
    // unbiased variance 2.0
    assert_abs_diff_eq!(bn.running_var[0], 0.9 + 0.2, epsilon = 1e-6);
}

// ========================================================================
// Folding
// ========================================================================

#[test]
fn test_fold_known_statistics() {
    let conv = Conv::from_weight(ramp(&[1, 1, 3, 3]), None, 1).unwrap();
    let mut bn = BatchNorm::new(ConvDim::D2, 1).with_stats(
        arr1(&[2.0]),
        arr1(&[1.0]),
        arr1(&[0.0]),
        arr1(&[1.0]),
    );
    let (w, b) = fuse_bn_weights(&conv.weight, None, &bn).unwrap();
    let scale = 2.0 / (1.0f32 + bn.eps).sqrt();

    for (folded, original) in w.iter().zip(conv.weight.iter()) {
        assert_abs_diff_eq!(*folded, original * scale, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(b[0], 1.0, epsilon = 1e-6);

    let x = ramp(&[1, 1, 4, 4]);
    let reference = bn.forward(&conv.forward(&x).unwrap()).unwrap();
    let folded = Conv::from_weight(w, Some(b), 1).unwrap().forward(&x).unwrap();
    for (a, r) in folded.iter().zip(reference.iter()) {
        assert_abs_diff_eq!(*a, *r, epsilon = 1e-5);
    }
}

#[test]
fn test_fold_rejects_channel_mismatch() {
    let conv = conv2d(2, 3);
    assert!(fuse_bn_weights(&conv.weight, conv.bias.as_ref(), &bn2d(4)).is_err());
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(50))]

    /// Folded conv reproduces conv → batch norm in eval mode
    #[test]
    fn prop_fold_matches_eval_batch_norm(
        gamma in prop::collection::vec(0.1f32..3.0, 2),
        beta in prop::collection::vec(-1.0f32..1.0, 2),
        mean in prop::collection::vec(-1.0f32..1.0, 2),
        var in prop::collection::vec(0.1f32..2.0, 2),
    ) {
        let conv = conv2d(1, 2);
        let mut bn = BatchNorm::new(ConvDim::D2, 2)
            .with_stats(arr1(&gamma), arr1(&beta), arr1(&mean), arr1(&var));
        let layer = Layer::Conv(conv.clone());
        let folded = layer.fold_bn(&bn).unwrap();

        let x = ramp(&[1, 1, 4, 4]);
        let reference = bn.forward(&conv.forward(&x).unwrap()).unwrap();
        let actual = folded.forward_with_weight(&x, folded.weight()).unwrap();
        for (a, r) in actual.iter().zip(reference.iter()) {
            prop_assert!((a - r).abs() <= 1e-4 * (1.0 + r.abs()));
        }
    }
}

// ========================================================================
// Kinds
// ========================================================================

#[test]
fn test_merge_bn_collapses_batch_norm_kinds() {
    let d = ConvDim::D2;
    assert_eq!(QatKind::ConvBnReLU(d).merge_bn(), QatKind::ConvReLU(d));
    assert_eq!(QatKind::ConvBn(d).merge_bn(), QatKind::Conv(d));
    assert_eq!(QatKind::LinearBn1d.merge_bn(), QatKind::Linear);
    assert_eq!(QatKind::LinearReLU.merge_bn(), QatKind::LinearReLU);
    assert_eq!(QatKind::Conv(d).merge_bn(), QatKind::Conv(d));
}

#[test]
fn test_module_kind_parse_and_display() {
    let cases = [
        ("torch.nn.Conv2d", ModuleKind::Conv(ConvDim::D2)),
        ("torch.nn.ReLU6", ModuleKind::ReLU6),
        ("BatchNorm1d", ModuleKind::BatchNorm(ConvDim::D1)),
        (
            "torch.nn.intrinsic.ConvBnReLU3d",
            ModuleKind::Fused(FusedKind::ConvBnReLU(ConvDim::D3)),
        ),
        (
            "torch.nn.intrinsic.qat.ConvBn2d",
            ModuleKind::Qat(QatKind::ConvBn(ConvDim::D2)),
        ),
        ("torch.nn.qat.Linear", ModuleKind::Qat(QatKind::Linear)),
    ];
    for (name, kind) in cases {
        assert_eq!(name.parse::<ModuleKind>().unwrap(), kind, "{name}");
        assert_eq!(kind.to_string().parse::<ModuleKind>().unwrap(), kind);
    }
    assert!("torch.nn.Conv4d".parse::<ModuleKind>().is_err());
    assert!("torch.nn.GELU".parse::<ModuleKind>().is_err());
}

#[test]
fn test_module_kind_serde_uses_names() {
    let kinds: Vec<ModuleKind> = serde_yaml::from_str("[torch.nn.Identity, ReLU6]").unwrap();
    assert_eq!(kinds, vec![ModuleKind::Identity, ModuleKind::ReLU6]);
    let json = serde_json::to_string(&ModuleKind::Fused(FusedKind::LinearReLU)).unwrap();
    assert_eq!(json, "\"intrinsic.LinearReLU\"");
}

// ========================================================================
// Fused and QAT modules
// ========================================================================

#[test]
fn test_fused_module_validates_parts() {
    let layer = Layer::Conv(conv2d(1, 2));
    assert!(FusedModule::new(FusedKind::ConvBn(ConvDim::D2), layer.clone(), None).is_err());
    assert!(FusedModule::new(
        FusedKind::ConvBn(ConvDim::D2),
        layer.clone(),
        Some(BatchNorm::new(ConvDim::D1, 2))
    )
    .is_err());
    assert!(FusedModule::new(FusedKind::LinearReLU, layer.clone(), None).is_err());
    assert!(FusedModule::new(FusedKind::ConvReLU(ConvDim::D2), layer, None).is_ok());
}

#[test]
fn test_fused_forward_applies_relu() {
    let mut fused =
        FusedModule::new(FusedKind::ConvBnReLU(ConvDim::D2), Layer::Conv(conv2d(1, 2)), Some(bn2d(2)))
            .unwrap();
    let y = fused.forward(&ramp(&[1, 1, 4, 4])).unwrap();
    assert!(y.iter().all(|&v| v >= 0.0));
}

#[test]
fn test_qat_from_float_requires_qconfig() {
    let module = Module::Conv(conv2d(1, 2));
    assert!(QatModule::from_float(module.clone()).is_err());

    let mut module = module;
    module.set_qconfig(Some(&qconfig()));
    let qat = QatModule::from_float(module).unwrap();
    assert_eq!(qat.kind, QatKind::Conv(ConvDim::D2));
    assert!(qat.bn.is_none());
}

#[test]
fn test_qat_from_float_as_rejects_mismatched_kind() {
    let mut module = Module::Conv(conv2d(1, 2));
    module.set_qconfig(Some(&qconfig()));
    let err = QatModule::from_float_as(module, QatKind::ConvReLU(ConvDim::D2));
    assert!(err.is_err());
}

#[test]
fn test_qat_to_float_folds_batch_norm() {
    let mut fused = Module::Fused(
        FusedModule::new(FusedKind::ConvBnReLU(ConvDim::D2), Layer::Conv(conv2d(1, 2)), Some(bn2d(2)))
            .unwrap(),
    );
    fused.set_qconfig(Some(&qconfig()));
    let qat = QatModule::from_float(fused).unwrap();
    assert_eq!(qat.kind, QatKind::ConvBnReLU(ConvDim::D2));

    let float = qat.to_float().unwrap();
    assert_eq!(float.kind(), ModuleKind::Fused(FusedKind::ConvReLU(ConvDim::D2)));
    let Module::Fused(folded) = float else {
        panic!("expected fused module");
    };
    assert!(folded.bn.is_none());
    assert!(folded.layer.qconfig().is_none());
}

#[test]
fn test_qat_forward_matches_fused_forward_up_to_weight_quantization() {
    let fused =
        FusedModule::new(FusedKind::ConvBn(ConvDim::D2), Layer::Conv(conv2d(1, 2)), Some(bn2d(2)))
            .unwrap();
    let mut float = Module::Fused(fused);
    let x = ramp(&[1, 1, 4, 4]);
    let reference = float.forward(&x).unwrap();

    float.set_qconfig(Some(&qconfig()));
    let mut qat = QatModule::from_float(float).unwrap();
    qat.weight_fake_quant.enable_fake_quant(false);
    let actual = qat.forward(&x).unwrap();
    for (a, r) in actual.iter().zip(reference.iter()) {
        assert_abs_diff_eq!(*a, *r, epsilon = 1e-6);
    }
}

#[test]
fn test_apply_weight_fake_quant_is_idempotent() {
    let mut module = Module::Linear(Linear::from_weight(ramp(&[3, 4]), None).unwrap());
    module.set_qconfig(Some(&qconfig()));
    let mut qat = QatModule::from_float(module).unwrap();

    qat.apply_weight_fake_quant();
    let once = qat.weight().clone();
    qat.apply_weight_fake_quant();
    for (a, b) in qat.weight().iter().zip(once.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

// ========================================================================
// Module tree
// ========================================================================

fn tree() -> Module {
    Sequential::new()
        .with("stem", Module::Conv(conv2d(1, 2)))
        .with(
            "block",
            Sequential::new()
                .with("bn", Module::BatchNorm(bn2d(2)))
                .with("act", Module::ReLU)
                .into(),
        )
        .into()
}

#[test]
fn test_submodule_paths() {
    let mut root = tree();
    assert_eq!(
        root.get_submodule("block.act").map(Module::kind),
        Some(ModuleKind::ReLU)
    );
    assert!(root.get_submodule("block.missing").is_none());
    assert!(root.get_submodule("stem.weight").is_none());

    let previous = root.set_submodule("block.act", Module::ReLU6).unwrap();
    assert_eq!(previous, Some(Module::ReLU));
    assert!(root.set_submodule("nowhere.act", Module::ReLU).is_err());
    assert_eq!(root.remove_submodule("block.bn").map(|m| m.kind()), Some(ModuleKind::BatchNorm(ConvDim::D2)));
}

#[test]
fn test_named_modules_preorder() {
    let root = tree();
    let paths: Vec<String> = root.named_modules().into_iter().map(|(p, _)| p).collect();
    assert_eq!(paths, vec!["", "stem", "block", "block.bn", "block.act"]);
}

#[test]
fn test_sequential_forward_runs_in_order() {
    let mut root = tree();
    let y = root.forward(&ramp(&[1, 1, 4, 4])).unwrap();
    assert_eq!(y.shape(), &[1, 2, 4, 4]);
    assert!(y.iter().all(|&v| v >= 0.0));
}

#[test]
fn test_fake_quant_switches_reach_qat_weights() {
    let mut conv = Module::Conv(conv2d(1, 2));
    conv.set_qconfig(Some(&qconfig()));
    let mut root: Module = Sequential::new()
        .with("fq", Module::FakeQuantize(qconfig().activation.build()))
        .with("conv", Module::Qat(QatModule::from_float(conv).unwrap()))
        .into();

    disable_fake_quant(&mut root);
    disable_observer(&mut root);
    let mut states = Vec::new();
    root.for_each_fake_quant_mut(&mut |fq: &mut crate::quant::FakeQuantize| {
        states.push((fq.is_fake_quant_enabled(), fq.is_observer_enabled()));
    });
    assert_eq!(states, vec![(false, false), (false, false)]);

    enable_fake_quant(&mut root);
    enable_observer(&mut root);
    states.clear();
    root.for_each_fake_quant_mut(&mut |fq: &mut crate::quant::FakeQuantize| {
        states.push((fq.is_fake_quant_enabled(), fq.is_observer_enabled()));
    });
    assert_eq!(states, vec![(true, true), (true, true)]);
}
