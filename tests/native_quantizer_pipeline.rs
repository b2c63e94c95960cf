//! End-to-end QAT pipeline: config file → trace → prepare → train → deploy

use std::io::Write;

use native_quantizer::nn::{
    disable_observer, BatchNorm, Conv, ConvDim, FusedKind, Linear, QatKind,
};
use native_quantizer::{load_config, GraphModule, Module, ModuleKind, NativeQuantizer, Sequential};
use native_quantizer::Tensor;
use ndarray::{Array, ArrayD, IxDyn};

const CONFIG: &str = r#"
global_qconfig:
  w_observer: {type: mmrazor.PerChannelMinMaxObserver}
  a_observer: {type: mmrazor.MinMaxObserver}
  w_fake_quant: {type: mmrazor.FakeQuantize}
  a_fake_quant: {type: mmrazor.FakeQuantize}
  w_qscheme: {qdtype: qint8, bit: 8, is_symmetry: true, is_symmetric_range: true}
  a_qscheme: {qdtype: quint8, bit: 8, is_symmetry: true}
tracer:
  type: mmrazor.CustomTracer
"#;

fn ramp(shape: &[usize], phase: f32) -> Tensor {
    let n: usize = shape.iter().product();
    ArrayD::from_shape_vec(
        IxDyn(shape),
        (0..n).map(|i| (i as f32 * 0.37 + phase).sin()).collect(),
    )
    .unwrap()
}

/// backbone: conv → bn → relu, head: flatten → fc
fn model() -> Module {
    let conv = Conv::from_weight(ramp(&[4, 3, 3, 3], 0.0), Some(Array::zeros(4)), 1).unwrap();
    let bn = BatchNorm::new(ConvDim::D2, 4).with_stats(
        Array::linspace(0.5, 2.0, 4),
        Array::linspace(-0.5, 0.5, 4),
        Array::linspace(-0.1, 0.1, 4),
        Array::linspace(0.8, 1.2, 4),
    );
    let fc = Linear::from_weight(ramp(&[10, 64], 1.0), Some(Array::zeros(10))).unwrap();

    Sequential::new()
        .with(
            "backbone",
            Sequential::new()
                .with("conv", Module::Conv(conv))
                .with("bn", Module::BatchNorm(bn))
                .with("relu", Module::ReLU)
                .into(),
        )
        .with(
            "head",
            Sequential::new()
                .with("flatten", Module::Flatten)
                .with("fc", Module::Linear(fc))
                .into(),
        )
        .into()
}

fn quantizer() -> NativeQuantizer {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = load_config(file.path()).unwrap();
    NativeQuantizer::new(config).unwrap()
}

fn calibrated(quantizer: &mut NativeQuantizer, model: &Module) -> GraphModule {
    let traced = quantizer.trace(model).unwrap();
    let mut prepared = quantizer.prepare(model, traced).unwrap();
    for step in 0..4 {
        prepared.forward(&[ramp(&[2, 3, 4, 4], step as f32)]).unwrap();
    }
    disable_observer(&mut prepared.root);
    prepared
}

/// Scale of the fake quant feeding the graph output
fn output_scale(gm: &GraphModule) -> f32 {
    let output = gm.graph.output_node().unwrap();
    let last = gm.graph.node(output).args[0];
    match gm.module_for(last) {
        Some(Module::FakeQuantize(fq)) => fq.scale(),
        other => panic!("output is not fake quantized: {other:?}"),
    }
}

#[test]
fn test_prepare_then_deploy_preserves_outputs() {
    let mut quantizer = quantizer();
    let model = model();
    let mut gm = calibrated(&mut quantizer, &model);

    assert_eq!(
        gm.root.get_submodule("backbone.conv").map(Module::kind),
        Some(ModuleKind::Qat(QatKind::ConvBnReLU(ConvDim::D2)))
    );
    assert!(gm.root.get_submodule("backbone.bn").is_none());
    assert!(gm.root.get_submodule("backbone.relu").is_none());

    let x = ramp(&[2, 3, 4, 4], 0.5);
    let expected = gm.forward(&[x.clone()]).unwrap();
    let tolerance = 2.0 * output_scale(&gm) + 1e-4;

    let converted = quantizer.post_process_weight_fakequant(&mut gm, false).unwrap();
    assert_eq!(converted, 2);
    assert_eq!(
        gm.root.get_submodule("backbone.conv").map(Module::kind),
        Some(ModuleKind::Fused(FusedKind::ConvReLU(ConvDim::D2)))
    );
    assert_eq!(
        gm.root.get_submodule("head.fc").map(Module::kind),
        Some(ModuleKind::Linear)
    );

    let actual = gm.forward(&[x]).unwrap();
    assert_eq!(actual.shape(), expected.shape());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert!((a - e).abs() <= tolerance, "{a} vs {e} (tolerance {tolerance})");
    }
}

#[test]
fn test_keep_fake_quant_deploys_merged_qat_modules() {
    let mut quantizer = quantizer();
    let model = model();
    let mut gm = calibrated(&mut quantizer, &model);

    quantizer.post_process_weight_fakequant(&mut gm, true).unwrap();

    let Some(Module::Qat(conv)) = gm.root.get_submodule("backbone.conv") else {
        panic!("backbone.conv lost its fake quant");
    };
    assert_eq!(conv.kind, QatKind::ConvReLU(ConvDim::D2));
    assert!(conv.bn.is_none());
    assert_eq!(
        gm.root.get_submodule("head.fc").map(Module::kind),
        Some(ModuleKind::Qat(QatKind::Linear))
    );

    let y = gm.forward(&[ramp(&[1, 3, 4, 4], 0.0)]).unwrap();
    assert_eq!(y.shape(), &[1, 10]);
    assert!(y.iter().all(|v| v.is_finite()));
}

#[test]
fn test_skipped_container_stays_float() {
    let yaml = format!("{CONFIG}  skipped_module_names: [head]\n");
    let config = native_quantizer::QuantizerConfig::from_yaml_str(&yaml).unwrap();
    let mut quantizer = NativeQuantizer::new(config).unwrap();
    let model = model();

    let traced = quantizer.trace(&model).unwrap();
    let mut gm = quantizer.prepare(&model, traced).unwrap();

    assert_eq!(
        gm.root.get_submodule("head.fc").map(Module::kind),
        Some(ModuleKind::Linear)
    );
    // graph input and backbone output
    assert_eq!(gm.fake_quant_nodes().len(), 2);
    assert_eq!(gm.forward(&[ramp(&[1, 3, 4, 4], 0.0)]).unwrap().shape(), &[1, 10]);
}
