#![cfg(feature = "serde")]
use mzfeatures::config::{DetectorKind, FeatureFinderConfig, LowPassKind};
use mzfeatures::FeatureFinder;

mod common;

#[test]
fn test_config_from_json() {
    let mut config = FeatureFinderConfig::builder()
        .bins_per_dalton(48.0)
        .max_charge(4)
        .low_pass(LowPassKind::Wavelet)
        .detector(DetectorKind::GrossEdges)
        .build()
        .unwrap();
    config.cluster.distance_tolerance = Some(0.05);

    let text = serde_json::to_string_pretty(&config).unwrap();
    let loaded: FeatureFinderConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(config, loaded);
    assert!(FeatureFinder::new(loaded).is_ok());

    let mut value = serde_json::to_value(&config).unwrap();
    value["window"]["margin"] = serde_json::json!(1000);
    let broken: FeatureFinderConfig = serde_json::from_value(value).unwrap();
    assert!(FeatureFinder::new(broken).is_err());
}

#[test]
fn test_features_to_json() {
    let run = common::peptide_run();
    let features = FeatureFinder::default().find_features(&run).unwrap();
    let charged: Vec<_> = features.iter().filter(|f| f.charge > 0).collect();
    let value = serde_json::to_value(&charged).unwrap();
    let first = &value[0];
    assert_eq!(first["charge"], 2);
    assert!(first["comprised"].as_array().unwrap().len() >= 3);
    assert_eq!(
        value.as_array().unwrap().len(),
        charged.len()
    );
}
