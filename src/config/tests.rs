//! Tests for quantizer config loading.

use super::*;
use crate::error::QuantizerError;
use crate::graph::{Function, Operator};
use crate::nn::ModuleKind;
use std::io::Write;

const YAML: &str = r#"
global_qconfig:
  w_observer: {type: mmrazor.PerChannelMinMaxObserver}
  a_observer: {type: mmrazor.MovingAverageMinMaxObserver}
  w_fake_quant: {type: mmrazor.FakeQuantize}
  a_fake_quant: {type: mmrazor.FakeQuantize}
  w_qscheme: {qdtype: qint8, bit: 8, is_symmetry: true, is_symmetric_range: true}
  a_qscheme: {qdtype: quint8, bit: 8, is_symmetry: true, averaging_constant: 0.1}
no_observer_modules: [torch.nn.ReLU6]
extra_redundant_fakequants:
  extra_module_prev_wo_fakequant: [torch.nn.Identity]
  extra_function_next_wo_fakequant: [torch.nn.functional.relu]
  extra_method_prev_wo_fakequant: [flatten]
  extra_op_next_wo_fakequant: [operator.add]
"#;

#[test]
fn test_from_yaml_str() {
    let config = QuantizerConfig::from_yaml_str(YAML).unwrap();
    assert_eq!(config.no_observer_modules, vec![ModuleKind::ReLU6]);
    assert_eq!(config.tracer.type_name, "CustomTracer");

    let extra = &config.extra_redundant_fakequants;
    assert_eq!(extra.extra_module_prev_wo_fakequant, vec![ModuleKind::Identity]);
    assert_eq!(extra.extra_function_next_wo_fakequant, vec![Function::Relu]);
    assert_eq!(extra.extra_method_prev_wo_fakequant, vec!["flatten".to_string()]);
    assert_eq!(extra.extra_op_next_wo_fakequant, vec![Operator::Add]);
    assert!(extra.extra_module_next_wo_fakequant.is_empty());
    assert!(!extra.is_empty());
}

#[test]
fn test_extra_lists_default_to_empty() {
    let minimal = YAML.split("no_observer_modules").next().unwrap();
    let config = QuantizerConfig::from_yaml_str(minimal).unwrap();
    assert!(config.extra_redundant_fakequants.is_empty());
    assert!(config.no_observer_modules.is_empty());
}

#[test]
fn test_unknown_extra_key_rejected() {
    let yaml = YAML.replace("extra_op_next_wo_fakequant", "extra_op_after_fakequant");
    let err = QuantizerConfig::from_yaml_str(&yaml).unwrap_err();
    assert!(matches!(err, QuantizerError::Yaml(_)));
}

#[test]
fn test_unknown_module_kind_rejected() {
    let yaml = YAML.replace("torch.nn.ReLU6", "torch.nn.Hardswish");
    assert!(QuantizerConfig::from_yaml_str(&yaml).is_err());
}

#[test]
fn test_yaml_json_agree() {
    let config = QuantizerConfig::from_yaml_str(YAML).unwrap();
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(QuantizerConfig::from_json_str(&json).unwrap(), config);

    let yaml = config.to_yaml_string().unwrap();
    assert_eq!(QuantizerConfig::from_yaml_str(&yaml).unwrap(), config);
}

#[test]
fn test_load_config_by_extension() {
    let config = QuantizerConfig::from_yaml_str(YAML).unwrap();

    let mut yaml_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    yaml_file.write_all(YAML.as_bytes()).unwrap();
    assert_eq!(load_config(yaml_file.path()).unwrap(), config);

    let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    json_file
        .write_all(serde_json::to_string(&config).unwrap().as_bytes())
        .unwrap();
    assert_eq!(load_config(json_file.path()).unwrap(), config);
}

#[test]
fn test_load_missing_file() {
    let err = load_config("/nonexistent/quantizer.yaml").unwrap_err();
    assert!(matches!(err, QuantizerError::InvalidConfig(_)));
    assert!(err.to_string().contains("/nonexistent/quantizer.yaml"));
}
