use scene_dataset::normalizer::{normalize, Normalizer};
use scene_dataset::FeatureMatrix;

#[test]
fn statistics_match_closed_form() {
    // Two bands, frames split across two files.
    let a = FeatureMatrix::new(2, 2, 0.02, vec![1.0, 2.0, 10.0, 10.0]).unwrap();
    let b = FeatureMatrix::new(2, 2, 0.02, vec![3.0, 4.0, 10.0, 10.0]).unwrap();
    let mut normalizer = Normalizer::new();
    normalizer.accumulate(&a).unwrap();
    normalizer.accumulate(&b).unwrap();
    assert_eq!(normalizer.frames(), 4);

    let norm = normalizer.finalize().unwrap();
    assert!((norm.mean[0] - 2.5).abs() < 1e-6);
    // Sample std of 1,2,3,4.
    assert!((norm.std[0] - 1.290_994_4).abs() < 1e-5);
    assert!((norm.mean[1] - 10.0).abs() < 1e-6);
    // Constant band keeps unit scale.
    assert_eq!(norm.std[1], 1.0);

    let mut x = a.clone();
    normalize(&norm, &mut x).unwrap();
    assert!((x.data[0] - (1.0 - 2.5) / 1.290_994_4).abs() < 1e-5);
    assert_eq!(x.data[2], 0.0);
}

#[test]
fn band_count_mismatch_is_rejected() {
    let mut normalizer = Normalizer::new();
    normalizer
        .accumulate(&FeatureMatrix::new(2, 1, 0.02, vec![0.0, 0.0]).unwrap())
        .unwrap();
    assert!(normalizer
        .accumulate(&FeatureMatrix::new(3, 1, 0.02, vec![0.0; 3]).unwrap())
        .is_err());
}

#[test]
fn single_frame_cannot_be_finalized() {
    let mut normalizer = Normalizer::new();
    normalizer
        .accumulate(&FeatureMatrix::new(1, 1, 0.02, vec![1.0]).unwrap())
        .unwrap();
    assert!(normalizer.finalize().is_err());
}

#[test]
fn corrupt_feature_file_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("x.smf");
    let m = FeatureMatrix::new(2, 3, 0.02, vec![0.5; 6]).unwrap();
    m.save(&path).unwrap();
    assert_eq!(FeatureMatrix::load(&path).unwrap(), m);

    std::fs::write(&path, b"JUNKJUNKJUNKJUNKJUNK").unwrap();
    assert!(FeatureMatrix::load(&path).is_err());
}
