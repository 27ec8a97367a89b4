mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use detr_batch::common::InferenceDevice;
use detr_batch::detection_runners::image_ops::PreprocessConfig;
use detr_batch::pipeline::{InferenceContext, Pipeline, PipelineState};
use detr_batch::result_writer::{ResultRecord, ResultWriter};
use detr_batch::{InferError, Palette};

use common::{three_class_model, write_garbage, write_png, ScriptedModel};

fn context(threshold: f32, output_dir: &Path) -> InferenceContext {
    InferenceContext::new(threshold, PreprocessConfig::new(800, 800), InferenceDevice::CPU, output_dir)
}

fn read_record(path: &Path) -> ResultRecord {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

fn artifacts(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn single_image_boxes_are_in_source_coordinates() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let image = input.path().join("street.png");
    write_png(&image, 640, 480);

    let model = three_class_model().expecting_input(800, 800);
    let calls = model.calls.clone();
    let mut pipeline = Pipeline::with_model(model, context(0.5, output.path()));
    let summary = pipeline.run_batch(&[image], &AtomicBool::new(false)).unwrap();

    assert_eq!(summary.processed, 1);
    assert!(summary.skipped.is_empty());
    assert_eq!(calls.get(), 1);
    assert_eq!(artifacts(output.path()), vec!["street.png.json"]);

    let record = read_record(&output.path().join("street.png.json"));
    assert_eq!(record.image, "street.png");
    assert_eq!((record.width, record.height), (640, 480));
    assert_eq!(record.detections.len(), 1);

    let det = &record.detections[0];
    assert_eq!(det.class_id, 1);
    assert_eq!(det.label, "dog");
    assert!(det.confidence >= 0.5 && det.confidence <= 1.0);
    let b = det.bbox;
    for (got, want) in [(b.x1, 240.), (b.y1, 180.), (b.x2, 400.), (b.y2, 300.)] {
        assert!((got - want).abs() < 1e-2, "{:?}", b);
    }
}

#[test]
fn corrupt_image_is_skipped_and_the_rest_are_written() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = ["a.png", "b.jpg", "c.png"].iter().map(|n| input.path().join(n)).collect();
    write_png(&paths[0], 320, 240);
    write_garbage(&paths[1]);
    write_png(&paths[2], 100, 300);

    let mut pipeline = Pipeline::with_model(three_class_model(), context(0.3, output.path()));
    let summary = pipeline.run_batch(&paths, &AtomicBool::new(false)).unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].image, paths[1]);
    assert!(!summary.cancelled);
    assert_eq!(summary.timings.n(), 2);
    assert_eq!(artifacts(output.path()), vec!["a.png.json", "c.png.json"]);
    assert_eq!(pipeline.state(), PipelineState::Done);

    // both the dog and the weak cat clear 0.3
    let record = read_record(&output.path().join("a.png.json"));
    assert_eq!(record.detections.iter().map(|d| d.class_id).collect::<Vec<_>>(), vec![1, 0]);
}

#[test]
fn rerun_produces_identical_output() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let image = input.path().join("frame.png");
    write_png(&image, 333, 217);

    let run = || {
        let mut pipeline = Pipeline::with_model(three_class_model(), context(0.3, output.path()));
        let record = pipeline.run_inference(&image).unwrap();
        pipeline.finish();
        fs::read(record).unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn visualization_uses_the_seeded_palette() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let image = input.path().join("frame.png");
    write_png(&image, 640, 480);

    let writer = ResultWriter::new(output.path()).with_visualization(Palette::seeded(42, 3));
    let ctx = context(0.5, output.path()).with_writer(writer);
    let mut pipeline = Pipeline::with_model(three_class_model(), ctx);
    pipeline.run_inference(&image).unwrap();

    assert_eq!(artifacts(output.path()), vec!["frame.png.json", "frame_png.png"]);
    let vis = image::open(output.path().join("frame_png.png")).unwrap().to_rgb8();
    // top edge of the dog box at (240, 180)
    assert_eq!(*vis.get_pixel(300, 180), Palette::seeded(42, 3).get_class_colour(1));
}

#[test]
fn cancellation_is_checked_before_each_image() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let image = input.path().join("a.png");
    write_png(&image, 64, 64);

    let model = three_class_model();
    let calls = model.calls.clone();
    let mut pipeline = Pipeline::with_model(model, context(0.5, output.path()));
    let summary = pipeline.run_batch(&[image], &AtomicBool::new(true)).unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.processed, 0);
    assert_eq!(calls.get(), 0);
    assert!(artifacts(output.path()).is_empty());
}

#[test]
fn unwritable_output_skips_without_aborting() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let missing = output.path().join("not-created");
    let paths: Vec<PathBuf> = ["a.png", "b.png"].iter().map(|n| input.path().join(n)).collect();
    for p in &paths {
        write_png(p, 50, 40);
    }

    let mut pipeline = Pipeline::with_model(three_class_model(), context(0.5, &missing));
    let summary = pipeline.run_batch(&paths, &AtomicBool::new(false)).unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped.len(), 2);
    assert!(summary.skipped[0].reason.contains("failed to write"));
}

#[test]
fn forward_failure_halts_the_batch() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = ["a.png", "b.png"].iter().map(|n| input.path().join(n)).collect();
    for p in &paths {
        write_png(p, 50, 40);
    }

    let model = three_class_model().failing();
    let calls = model.calls.clone();
    let mut pipeline = Pipeline::with_model(model, context(0.5, output.path()));
    let err = pipeline.run_batch(&paths, &AtomicBool::new(false)).unwrap_err();
    assert!(matches!(err, InferError::Runtime(_)));
    assert!(err.is_fatal());
    assert_eq!(calls.get(), 1);
    assert!(artifacts(output.path()).is_empty());
}

#[test]
fn model_is_loaded_exactly_once() {
    let output = tempfile::tempdir().unwrap();
    let mut pipeline: Pipeline<ScriptedModel> = Pipeline::new(context(0.5, output.path()));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert!(pipeline.run_batch(&[], &AtomicBool::new(false)).is_err());

    pipeline.load(|| Ok(three_class_model())).unwrap();
    assert_eq!(pipeline.state(), PipelineState::ModelLoaded);
    assert!(pipeline.load(|| Ok(three_class_model())).is_err());

    let summary = pipeline.run_batch(&[], &AtomicBool::new(false)).unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(pipeline.state(), PipelineState::Done);
    pipeline.finish();
}

#[test]
fn failed_load_leaves_the_pipeline_idle() {
    let output = tempfile::tempdir().unwrap();
    let mut pipeline: Pipeline<ScriptedModel> = Pipeline::new(context(0.5, output.path()));
    let err = pipeline
        .load(|| {
            Err(InferError::CheckpointNotFound {
                dir: output.path().to_path_buf(),
                pattern: "*best.onnx".to_string(),
            })
        })
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[test]
fn failed_visualization_skips_the_image_without_a_record() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let image = input.path().join("frame.png");
    write_png(&image, 64, 48);
    fs::create_dir(output.path().join("frame_png.png")).unwrap();

    let writer = ResultWriter::new(output.path()).with_visualization(Palette::seeded(42, 3));
    let ctx = context(0.5, output.path()).with_writer(writer);
    let mut pipeline = Pipeline::with_model(three_class_model(), ctx);
    let summary = pipeline.run_batch(&[image.clone()], &AtomicBool::new(false)).unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].image, image);
    assert_eq!(artifacts(output.path()), vec!["frame_png.png"]);
}

#[test]
fn skipped_image_is_a_state_of_its_own() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let (bad, good) = (input.path().join("a.jpg"), input.path().join("b.png"));
    write_garbage(&bad);
    write_png(&good, 32, 32);

    let mut pipeline = Pipeline::with_model(three_class_model(), context(0.5, output.path()));
    let skip = pipeline.process_image(0, &bad).unwrap().unwrap();
    assert_eq!(skip.image, bad);
    assert_eq!(pipeline.state(), PipelineState::Skipped(0));

    assert!(pipeline.process_image(1, &good).unwrap().is_none());
    assert_eq!(pipeline.state(), PipelineState::Processing(1));
    assert_eq!(artifacts(output.path()), vec!["b.png.json"]);
}

#[test]
fn loaded_model_reports_the_device_it_runs_on() {
    let output = tempfile::tempdir().unwrap();
    let ctx = InferenceContext::new(0.5, PreprocessConfig::new(800, 800), InferenceDevice::CUDA(0), output.path());
    let mut pipeline: Pipeline<ScriptedModel> = Pipeline::new(ctx);
    assert_eq!(pipeline.device(), InferenceDevice::CUDA(0));

    // accelerator unavailable, the session fell back to CPU
    pipeline.load(|| Ok(three_class_model().on_device(InferenceDevice::CPU))).unwrap();
    assert_eq!(pipeline.device(), InferenceDevice::CPU);
    assert_eq!(pipeline.context().device, InferenceDevice::CUDA(0));
}
