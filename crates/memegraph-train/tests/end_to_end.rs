//! Full training runs on tiny synthetic data, CPU only.

use memegraph_train::{
    CheckpointOutcome, DeviceInfo, GnnTrainer, MemeDataset, ModelDims, OptimizerKind, TrainerConfig,
    TrainerKind, VgaeTrainer,
};

const IMAGE: [usize; 3] = [3, 4, 4];

fn tiny_config(dir: &std::path::Path) -> TrainerConfig {
    TrainerConfig::default()
        .with_epochs(2)
        .with_batch_size(4)
        .with_learning_rate(0.01)
        .with_checkpoint_dir(dir)
        .with_dims(ModelDims {
            image_channels: 3,
            image_embedding: 8,
            text_embedding: 8,
            projection: 6,
            vocab_size: 30,
            gnn_hidden: 5,
            vgae_hidden: 5,
            vgae_latent: 3,
            num_classes: 2,
        })
}

#[test]
fn gnn_fit_writes_best_checkpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let train = MemeDataset::synthetic(12, IMAGE, 30, 1).unwrap();
    let dev = MemeDataset::synthetic(8, IMAGE, 30, 2).unwrap();
    let device = DeviceInfo::cpu();

    let mut trainer = GnnTrainer::from_config(tiny_config(tmp.path()), device.clone()).unwrap();
    let report = trainer
        .fit(
            &mut train.loader(4, Some(0), &device.device),
            Some(&mut dev.loader(4, None, &device.device)),
        )
        .unwrap();

    assert_eq!(report.train.len(), 2);
    assert_eq!(report.eval.len(), 2);
    assert!(report.losses().iter().all(|l| l.is_finite()));
    assert_eq!(trainer.optimizer().steps(), 6);

    // The first evaluation always beats -inf.
    let first = report.checkpoints[0].saved_path().unwrap();
    assert!(first.starts_with(tmp.path().join("mmgnn")));
    for name in ["image_encoder", "text_encoder", "image_projection", "text_projection", "graph", "adam"] {
        assert!(first.join(format!("{name}.safetensors")).exists(), "missing {name}");
    }
    let metrics: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(first.join("metrics.json")).unwrap()).unwrap();
    assert!(metrics.get("accuracy").is_some());

    let accuracy = report.eval[0].get("accuracy").unwrap();
    assert!(trainer.checkpoint_policy().best() >= accuracy);
}

#[test]
fn vgae_fit_reports_link_prediction() {
    let tmp = tempfile::tempdir().unwrap();
    let train = MemeDataset::synthetic(8, IMAGE, 30, 3).unwrap();
    let dev = MemeDataset::synthetic(8, IMAGE, 30, 4).unwrap();
    let device = DeviceInfo::cpu();

    let config = tiny_config(tmp.path())
        .with_trainer(TrainerKind::Vgae)
        .with_model_name("vgae")
        .with_optimizer(OptimizerKind::AdamW)
        .with_epochs(1);
    let mut trainer = VgaeTrainer::from_config(config, device.clone()).unwrap();
    let report = trainer
        .fit(
            &mut train.loader(4, Some(0), &device.device),
            Some(&mut dev.loader(4, None, &device.device)),
        )
        .unwrap();

    let eval = &report.eval[0];
    let keys: Vec<_> = eval.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["auc", "avg_precision"]);
    let auc = eval.get("auc").unwrap();
    assert!((0.0..=1.0).contains(&auc));

    match &report.checkpoints[0] {
        CheckpointOutcome::Saved(path) => {
            assert_eq!(path.file_name().unwrap().to_string_lossy(), eval.tag());
            assert!(path.join("adamw.safetensors").exists());
        }
        other => panic!("expected a saved checkpoint, got {other:?}"),
    }
}

#[test]
fn resume_restores_weights() {
    let tmp = tempfile::tempdir().unwrap();
    let train = MemeDataset::synthetic(8, IMAGE, 30, 5).unwrap();
    let dev = MemeDataset::synthetic(4, IMAGE, 30, 6).unwrap();
    let device = DeviceInfo::cpu();
    let config = tiny_config(tmp.path()).with_epochs(1);

    let mut trained = GnnTrainer::from_config(config.clone(), device.clone()).unwrap();
    let report = trained
        .fit(
            &mut train.loader(4, Some(0), &device.device),
            Some(&mut dev.loader(4, None, &device.device)),
        )
        .unwrap();
    let dir = report.saved().next().unwrap().to_path_buf();

    let mut resumed = GnnTrainer::from_config(config.with_seed(99), device).unwrap();
    resumed.resume(&dir).unwrap();
    assert_eq!(resumed.optimizer().steps(), trained.optimizer().steps());

    let a = trained.models().graph.vars().unwrap();
    let b = resumed.models().graph.vars().unwrap();
    assert_eq!(a.len(), b.len());
    for ((name_a, va), (name_b, vb)) in a.iter().zip(&b) {
        assert_eq!(name_a, name_b);
        let va = va.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let vb = vb.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(va, vb, "{name_a} differs after resume");
    }
}
