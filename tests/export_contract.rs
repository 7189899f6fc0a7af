//! Serving-contract scenarios: signature stability and inference round trips.

use deepfm::config::DeepFmConfig;
use deepfm::dataset::{BatchStream, SyntheticStream};
use deepfm::export::{ServingSignature, SIGNATURE_INPUTS};
use deepfm::predictor::Predictor;
use deepfm::trainer::Trainer;
use tempfile::tempdir;

fn config(dir: &std::path::Path) -> DeepFmConfig {
    DeepFmConfig::new(3, 2, 10, 4)
        .with_hidden_units(vec![8, 4])
        .with_embedding_size(4)
        .with_batch_size(32)
        .with_learning_rate(0.01)
        .with_print_interval(50)
        .with_checkpoint_dir(dir.join("ckpt"))
        .with_export_dir(dir.join("export"))
}

#[test]
fn exported_signature_exposes_exactly_the_documented_names() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    let mut trainer = Trainer::new(&config).unwrap();
    let mut train = SyntheticStream::new(&config, 40, 3);
    let mut val = SyntheticStream::new(&config, 2, 4);
    let report = trainer.fit(&mut train, &mut val).unwrap();
    let export = report.export_path.unwrap();

    // Read the signature straight off disk: this file is the durable
    // contract external serving reads.
    let json = std::fs::read_to_string(export.join("signature.json")).unwrap();
    let signature: ServingSignature = serde_json::from_str(&json).unwrap();

    let mut inputs: Vec<&str> = signature.inputs.keys().map(|s| s.as_str()).collect();
    inputs.sort_unstable();
    let mut expected = SIGNATURE_INPUTS.to_vec();
    expected.sort_unstable();
    assert_eq!(inputs, expected);

    let outputs: Vec<&str> = signature.outputs.keys().map(|s| s.as_str()).collect();
    assert_eq!(outputs, ["score"]);
}

#[test]
fn trained_export_scores_a_held_out_stream() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    let mut trainer = Trainer::new(&config).unwrap();
    let mut train = SyntheticStream::new(&config, 100, 3);
    let mut val = SyntheticStream::new(&config, 5, 4);
    let report = trainer.fit(&mut train, &mut val).unwrap();

    let predictor = Predictor::load(&report.export_path.unwrap()).unwrap();
    // Same generating distribution as training, so the export should score
    // well above chance.
    let mut held_out = SyntheticStream::new(&config, 10, 5);
    let predict = predictor.run(&mut held_out).unwrap();

    assert_eq!(predict.batches, 10);
    assert_eq!(predict.examples, 320);
    let auc = predict.auc.expect("held-out stream has both classes");
    assert!(auc > 0.55, "served AUC {} not above chance", auc);
}

#[test]
fn export_matches_in_process_model_scores() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    let mut trainer = Trainer::new(&config).unwrap();
    let mut train = SyntheticStream::new(&config, 30, 3);
    let mut val = SyntheticStream::new(&config, 2, 4);
    let report = trainer.fit(&mut train, &mut val).unwrap();

    let predictor = Predictor::load(&report.export_path.unwrap()).unwrap();
    let mut stream = SyntheticStream::new(&config, 1, 11);
    let batch = stream.next_batch().unwrap();

    let served = predictor.model().score(&batch).unwrap();
    let direct = trainer.model().score_batch(&batch).unwrap();
    assert_eq!(served, direct);
}

#[test]
fn tampered_bundle_fails_to_load() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    let mut trainer = Trainer::new(&config).unwrap();
    let mut train = SyntheticStream::new(&config, 5, 3);
    let mut val = SyntheticStream::new(&config, 1, 4);
    let report = trainer.fit(&mut train, &mut val).unwrap();
    let export = report.export_path.unwrap();

    std::fs::write(export.join("model_spec.json"), "{}").unwrap();
    assert!(Predictor::load(&export).is_err());
}
