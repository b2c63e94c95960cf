//! Backend rule tables: which chains fuse and how outputs are observed

mod config;


pub use config::{BackendConfig, BackendConfigs, FusionRule, ObservationType};
