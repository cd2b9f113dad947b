mod common;

use common::{confounded_problem, confounded_with_effects};
use mmcore::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn evidence(point_estimate: f64, standard_error: f64) -> ExperimentEvidence {
    ExperimentEvidence {
        channel: "spend_tiktok".to_string(),
        point_estimate,
        standard_error,
        description: "geo holdout".to_string(),
        granularity: Granularity::Daily,
    }
}

fn engine() -> InferenceEngine {
    InferenceEngine::from_settings(&InferenceSettings::default())
}

#[test]
fn experiment_anchors_confounded_channel() {
    let (features, sales) = confounded_problem(17, 150);
    let spec = ModelSpec::default_for(&features, &sales, 10.0).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let calibrated = calibrate(
        &engine(),
        &spec,
        &features,
        &sales,
        &evidence(3.5, 0.2),
        Granularity::Daily,
        &mut rng,
    )
    .unwrap();

    let tiktok = calibrated.coefficient("spend_tiktok").unwrap().mean();
    assert!((tiktok - 3.5).abs() < 0.6, "calibrated mean {}", tiktok);
    assert_eq!(calibrated.calibrated_channel(), Some("spend_tiktok"));
    // the untouched channel keeps its non-negative prior
    assert!(calibrated.coefficient("spend_facebook").unwrap().samples().iter().all(|b| *b >= 0.0));
    assert_eq!(
        spec.prior("spend_tiktok").unwrap(),
        &CoefficientPrior::HalfNormal { scale: 10.0 }
    );
}

#[test]
fn experiment_overrides_a_misattributed_fit() {
    // the regression credits tiktok with about 1.0, the experiment says 3.5
    let (features, sales) = confounded_with_effects(17, 300, 3.5, 1.0);
    let spec = ModelSpec::default_for(&features, &sales, 10.0).unwrap();
    let engine = engine();

    let plain = engine
        .run(&spec, &features, &sales, &mut StdRng::seed_from_u64(42))
        .unwrap();
    let plain_mean = plain.coefficient("spend_tiktok").unwrap().mean();
    assert!(plain_mean < 2.5, "uncalibrated mean {}", plain_mean);

    let calibrated = calibrate(
        &engine,
        &spec,
        &features,
        &sales,
        &evidence(3.5, 0.2),
        Granularity::Daily,
        &mut StdRng::seed_from_u64(42),
    )
    .unwrap();
    let calibrated_mean = calibrated.coefficient("spend_tiktok").unwrap().mean();
    assert!((calibrated_mean - 3.5).abs() < 2.5 * 0.2, "calibrated mean {}", calibrated_mean);
    assert!(calibrated_mean - plain_mean > 1.0);
}

#[test]
fn spread_shrinks_with_the_standard_error() {
    let (features, sales) = confounded_with_effects(17, 300, 3.5, 1.0);
    let spec = ModelSpec::default_for(&features, &sales, 10.0).unwrap();
    let engine = engine();

    let calibrated_coef = |standard_error: f64| {
        let estimate = calibrate(
            &engine,
            &spec,
            &features,
            &sales,
            &evidence(3.5, standard_error),
            Granularity::Daily,
            &mut StdRng::seed_from_u64(5),
        )
        .unwrap();
        let coef = estimate.coefficient("spend_tiktok").unwrap();
        (coef.mean(), coef.sd())
    };
    let (_, wide) = calibrated_coef(0.2);
    let (_, narrow) = calibrated_coef(0.01);
    let (mean, tightest) = calibrated_coef(0.001);
    assert!(narrow < wide, "sd {} vs {}", narrow, wide);
    assert!(tightest < narrow, "sd {} vs {}", tightest, narrow);
    assert!((mean - 3.5).abs() < 0.01, "mean {}", mean);
}

#[test]
fn tighter_experiments_pull_harder() {
    let (features, sales) = confounded_problem(23, 150);
    let spec = ModelSpec::default_for(&features, &sales, 10.0).unwrap();
    let engine = engine();

    let loose = calibrate(
        &engine,
        &spec,
        &features,
        &sales,
        &evidence(2.0, 1.0),
        Granularity::Daily,
        &mut StdRng::seed_from_u64(5),
    )
    .unwrap();
    let tight = calibrate(
        &engine,
        &spec,
        &features,
        &sales,
        &evidence(2.0, 0.005),
        Granularity::Daily,
        &mut StdRng::seed_from_u64(5),
    )
    .unwrap();

    let tight_coef = tight.coefficient("spend_tiktok").unwrap();
    let loose_coef = loose.coefficient("spend_tiktok").unwrap();
    assert!((tight_coef.mean() - 2.0).abs() < 0.05, "tight mean {}", tight_coef.mean());
    assert!(tight_coef.sd() < loose_coef.sd());
}

#[test]
fn feature_column_name_resolves_to_channel() {
    let (features, sales) = confounded_problem(3, 60);
    let spec = ModelSpec::default_for(&features, &sales, 10.0).unwrap();
    let mut e = evidence(3.5, 0.2);
    e.channel = "spend_tiktok_saturated".to_string();
    let settings = InferenceSettings {
        advi: Advi {
            iterations: 200,
            draws: 200,
            ..Advi::default()
        },
        ..InferenceSettings::default()
    };
    let calibrated = calibrate(
        &InferenceEngine::from_settings(&settings),
        &spec,
        &features,
        &sales,
        &e,
        Granularity::Daily,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();
    assert_eq!(calibrated.calibrated_channel(), Some("spend_tiktok"));
}

#[test]
fn unknown_channel_rejected() {
    let (features, sales) = confounded_problem(1, 30);
    let spec = ModelSpec::default_for(&features, &sales, 10.0).unwrap();
    let mut e = evidence(3.5, 0.2);
    e.channel = "spend_radio".to_string();
    let err = calibrate(
        &engine(),
        &spec,
        &features,
        &sales,
        &e,
        Granularity::Daily,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap_err();
    assert!(matches!(err, MmmError::Configuration(_)));
}

#[test]
fn granularity_mismatch_rejected() {
    let (features, sales) = confounded_problem(1, 30);
    let spec = ModelSpec::default_for(&features, &sales, 10.0).unwrap();
    let mut e = evidence(3.5, 0.2);
    e.granularity = Granularity::Weekly;
    let err = calibrate(
        &engine(),
        &spec,
        &features,
        &sales,
        &e,
        Granularity::Daily,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap_err();
    assert!(matches!(err, MmmError::Configuration(_)));
}

#[test]
fn evidence_read_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experiment.json");
    std::fs::write(
        &path,
        r#"{"channel": "spend_tiktok", "experiment_roas": 3.5, "std_error": 0.2,
            "description": "TikTok geo test", "granularity": "daily"}"#,
    )
    .unwrap();
    let e = read_evidence(&path).unwrap();
    assert_eq!(e, {
        let mut expected = evidence(3.5, 0.2);
        expected.description = "TikTok geo test".to_string();
        expected
    });
}
