use data_contracts::{ContractError, EpochRecord, MetaEntry, NormFactors, Phase, PhaseMetrics};

fn entry(filename: &str, label: &str) -> MetaEntry {
    MetaEntry {
        filename: filename.into(),
        scene_label: label.into(),
        identifier: None,
        source_label: None,
    }
}

#[test]
fn non_wav_filename_rejected() {
    let err = entry("audio/park-1.flac", "park").validate().unwrap_err();
    assert!(matches!(err, ContractError::NotWav(_)));
}

#[test]
fn empty_label_rejected() {
    let err = entry("audio/park-1.wav", " ").validate().unwrap_err();
    assert!(matches!(err, ContractError::EmptyLabel(_)));
}

#[test]
fn group_key_falls_back_to_filename() {
    let mut meta = entry("audio/park-1.wav", "park");
    assert_eq!(meta.group_key(), "audio/park-1.wav");
    meta.identifier = Some("helsinki-7".into());
    assert_eq!(meta.group_key(), "helsinki-7");
}

#[test]
fn norm_factors_need_positive_std() {
    let norm = NormFactors {
        mean: vec![0.0, 1.0],
        std: vec![1.0, 0.0],
        frames: 10,
    };
    let err = norm.validate().unwrap_err();
    assert!(matches!(err, ContractError::NormValue { index: 1, .. }));

    let mismatched = NormFactors {
        mean: vec![0.0],
        std: vec![1.0, 1.0],
        frames: 10,
    };
    assert!(matches!(
        mismatched.validate().unwrap_err(),
        ContractError::NormShape { mean: 1, std: 2 }
    ));
}

#[test]
fn epoch_record_fills_phase_columns() {
    let mut record = EpochRecord::new(3);
    record.set(
        Phase::Val,
        PhaseMetrics {
            loss: 0.5,
            accuracy_1: 70.0,
            accuracy_5: 95.0,
        },
    );
    assert_eq!(record.val_loss, 0.5);
    assert_eq!(record.val_accuracy_1, 70.0);
    assert_eq!(record.val_accuracy_5, 95.0);
    assert_eq!(record.train_loss, 0.0);

    let json = serde_json::to_string(&record).unwrap();
    assert!(json.contains("\"epoch\":3"));
}
