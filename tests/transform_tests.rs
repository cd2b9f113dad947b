mod common;

use common::synthetic_dataset;
use mmcore::prelude::*;
use ndarray::array;

fn close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

#[test]
fn adstock_carries_over_an_impulse() {
    let out = geometric_adstock(&array![10.0, 0.0, 0.0].view(), 0.5);
    assert_eq!(out, array![10.0, 5.0, 2.5]);
}

#[test]
fn adstock_without_decay_is_identity() {
    let x = array![3.0, 1.0, 4.0, 1.0, 5.0];
    assert_eq!(geometric_adstock(&x.view(), 0.0), x);
}

#[test]
fn hill_is_half_at_kappa() {
    let out = hill_saturation(&array![100.0, 0.0].view(), 1.0, 100.0);
    assert!(close(out[0], 0.5, 1e-12));
    assert!(out[1] > 0.0 && out[1] < 1e-10);
}

#[test]
fn dataset_features_follow_dataset_order() {
    let dataset = synthetic_dataset(1, 60);
    let forward = vec![
        TransformParams::new("spend_tv", 0.5, 1.0).with_kappa(200.0),
        TransformParams::new("spend_search", 0.1, 1.0).with_kappa(45.0),
    ];
    let reversed: Vec<TransformParams> = forward.iter().rev().cloned().collect();

    let a = transform_dataset(&dataset, &forward).unwrap();
    let b = transform_dataset(&dataset, &reversed).unwrap();
    assert_eq!(a.channels().names(), &["spend_tv".to_string(), "spend_search".to_string()]);
    assert_eq!(a.matrix(), b.matrix());
    assert!(a.matrix().iter().all(|v| (0.0..1.0).contains(v)));
    assert_eq!(
        a.column_names(),
        vec![
            "spend_tv",
            "spend_tv_adstock",
            "spend_tv_saturated",
            "spend_search",
            "spend_search_adstock",
            "spend_search_saturated"
        ]
    );

    let tv = a.transform("spend_tv").unwrap();
    assert_eq!(tv.saturation.kappa(), 200.0);
    assert_eq!(tv.adstock.alpha(), 0.5);
}

#[test]
fn kappa_defaults_to_mean_adstocked_spend() {
    let dataset = synthetic_dataset(2, 40);
    let params = vec![
        TransformParams::new("spend_tv", 0.5, 1.0),
        TransformParams::new("spend_search", 0.0, 1.0),
    ];
    let features = transform_dataset(&dataset, &params).unwrap();
    let search_mean = dataset.channel("spend_search").unwrap().mean();
    let kappa = features.transform("spend_search").unwrap().saturation.kappa();
    assert!(close(kappa, search_mean, 1e-9));
}

#[test]
fn parameters_for_unknown_channel_rejected() {
    let dataset = synthetic_dataset(3, 20);
    let params = vec![
        TransformParams::new("spend_tv", 0.5, 1.0),
        TransformParams::new("spend_search", 0.1, 1.0),
        TransformParams::new("spend_radio", 0.1, 1.0),
    ];
    let err = transform_dataset(&dataset, &params).unwrap_err();
    assert!(matches!(err, MmmError::Configuration(_)));
}

#[test]
fn missing_parameters_rejected() {
    let dataset = synthetic_dataset(3, 20);
    let params = vec![TransformParams::new("spend_tv", 0.5, 1.0)];
    assert!(matches!(
        transform_dataset(&dataset, &params),
        Err(MmmError::Configuration(_))
    ));
}

#[test]
fn decay_outside_unit_interval_rejected() {
    let dataset = synthetic_dataset(4, 20);
    let params = vec![
        TransformParams::new("spend_tv", 1.0, 1.0),
        TransformParams::new("spend_search", 0.1, 1.0),
    ];
    assert!(matches!(
        transform_dataset(&dataset, &params),
        Err(MmmError::Configuration(_))
    ));
}
