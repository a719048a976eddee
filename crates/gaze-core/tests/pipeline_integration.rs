//! End-to-end pipeline and search tests over photos, with stub ML
//! executors. Photos exercise the full stage machinery without requiring
//! ffmpeg or model files.

use gaze_core::cancel::CancellationToken;
use gaze_core::catalog::{Catalog, MediaStatus, Stage};
use gaze_core::error::Result;
use gaze_core::events::EventBus;
use gaze_core::ml::{
    normalize, DetectedFace, Detection, FaceAnalyzer, ImageEmbedder, MlToolkit, ObjectDetector,
};
use gaze_core::paths::DataPaths;
use gaze_core::pipeline::IndexingPipeline;
use gaze_core::scanner::Scanner;
use gaze_core::search::{SearchMode, SearchPlanner, SearchRequest};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const DIM: usize = 512;

/// Embeds every image as a fixed "beach" vector; text queries containing
/// "beach" embed nearby, everything else lands orthogonal.
struct StubEmbedder;

fn beach_vector() -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[0] = 1.0;
    v[1] = 0.1;
    normalize(&mut v);
    v
}

fn unrelated_vector() -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[100] = 1.0;
    v
}

impl ImageEmbedder for StubEmbedder {
    fn embed_image(&self, _image_path: &Path) -> Result<Vec<f32>> {
        Ok(beach_vector())
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains("beach") || text.contains("car") {
            Ok(beach_vector())
        } else {
            Ok(unrelated_vector())
        }
    }
}

/// Always sees one car.
struct StubDetector;

impl ObjectDetector for StubDetector {
    fn detect(&self, _image_path: &Path, _min_confidence: f32) -> Result<Vec<Detection>> {
        Ok(vec![Detection {
            label: "car".into(),
            confidence: 0.8,
            bbox: Some((10.0, 10.0, 50.0, 40.0)),
        }])
    }
}

/// Always sees one face with a fixed embedding.
struct StubFaces;

impl FaceAnalyzer for StubFaces {
    fn detect_faces(
        &self,
        _image_path: &Path,
        _min_face_side_px: u32,
        _det_threshold: f32,
    ) -> Result<Vec<DetectedFace>> {
        let mut embedding = vec![0.0f32; DIM];
        embedding[7] = 1.0;
        Ok(vec![DetectedFace {
            bbox: (20.0, 20.0, 60.0, 60.0),
            confidence: 0.95,
            embedding,
            age: None,
            gender: None,
        }])
    }
}

struct Harness {
    _temp: TempDir,
    _media_dir: TempDir,
    catalog: Catalog,
    paths: DataPaths,
    pipeline: IndexingPipeline,
    planner: SearchPlanner,
    library_id: String,
    media_id: String,
}

fn toolkit() -> MlToolkit {
    MlToolkit {
        embedder: Some(Arc::new(StubEmbedder)),
        detector: Some(Arc::new(StubDetector)),
        faces: Some(Arc::new(StubFaces)),
        transcriber: None,
    }
}

/// Scan a library containing one generated photo and return everything
/// needed to drive the pipeline by hand.
async fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let media_dir = TempDir::new().unwrap();

    let photo_path = media_dir.path().join("IMG_1.png");
    image::RgbImage::from_pixel(1920, 1080, image::Rgb([30, 60, 200]))
        .save(&photo_path)
        .unwrap();

    let catalog = Catalog::open_in_memory().unwrap();
    let paths = DataPaths::new(temp.path()).unwrap();
    let events = EventBus::new();

    let library_id = "lib1".to_string();
    catalog
        .create_library(&library_id, &media_dir.path().to_string_lossy(), None, true)
        .unwrap();
    let scanner = Scanner::new(catalog.clone(), events.clone());
    let stats = scanner.scan(&library_id).await.unwrap();
    assert_eq!(stats.files_new, 1);

    let media_id = catalog
        .media_by_path(&library_id)
        .unwrap()
        .values()
        .next()
        .unwrap()
        .0
        .clone();

    let toolkit = toolkit();
    let pipeline = IndexingPipeline::new(
        catalog.clone(),
        paths.clone(),
        toolkit.clone(),
        events.clone(),
    );
    let planner = SearchPlanner::new(catalog.clone(), paths.clone(), toolkit);

    Harness {
        _temp: temp,
        _media_dir: media_dir,
        catalog,
        paths,
        pipeline,
        planner,
        library_id,
        media_id,
    }
}

#[tokio::test]
async fn photo_deep_pipeline_end_to_end() {
    let h = harness().await;

    let outcome = h
        .pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;
    assert_eq!(outcome, gaze_core::pipeline::PipelineOutcome::Done);

    let item = h.catalog.get_media(&h.media_id).unwrap().unwrap();
    assert_eq!(item.status, MediaStatus::Done);
    assert_eq!(item.progress, 1.0);
    assert!(item.indexed_at_ms.is_some());

    // Exactly one frame at timestamp 0 with extracted colors.
    let frames = h.catalog.list_frames(&h.media_id).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].timestamp_ms, 0);
    assert_eq!(frames[0].frame_index, 0);
    assert!(frames[0].colors.as_deref().unwrap().contains("blue"));

    // One grid thumbnail beside the frame, never counted as a frame.
    let thumb_dir = h.paths.media_thumbnails_dir(&h.media_id);
    assert!(thumb_dir.join("frame_000001.jpg").exists());
    assert!(thumb_dir.join("frame_000001_grid.jpg").exists());

    // Shard of exactly one vector, ordinal 0 maps to the frame.
    let shard = gaze_core::search::shards::read_shard(&h.paths.shard_path(&h.media_id)).unwrap();
    assert_eq!(shard.len(), 1);

    // Detections and faces were persisted.
    assert_eq!(h.catalog.list_detections(&h.media_id).unwrap().len(), 1);
    let faces = h
        .catalog
        .list_faces(&gaze_core::catalog::FaceFilter {
            media_id: Some(h.media_id.clone()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(faces.len(), 1);
    assert!(faces[0].crop_path.is_some());
    assert!(Path::new(faces[0].crop_path.as_deref().unwrap()).exists());
}

#[tokio::test]
async fn rerun_does_not_duplicate_rows() {
    let h = harness().await;

    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;
    // Simulate crash repair requeueing and rerunning the whole item; the
    // stage marker survives, so the rerun resumes past completed work.
    h.catalog.requeue_media(&h.media_id).unwrap();
    {
        let item = h.catalog.get_media(&h.media_id).unwrap().unwrap();
        assert_eq!(item.last_completed_stage, Some(Stage::DetectingFaces));
    }
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    assert_eq!(h.catalog.list_frames(&h.media_id).unwrap().len(), 1);
    assert_eq!(h.catalog.list_detections(&h.media_id).unwrap().len(), 1);
    assert_eq!(
        h.catalog.media_status(&h.media_id).unwrap().unwrap(),
        MediaStatus::Done
    );
}

#[tokio::test]
async fn resume_restarts_when_frames_missing() {
    let h = harness().await;

    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    // Wipe the artifacts but leave the stale stage marker, as a user
    // wipe-derived would.
    std::fs::remove_dir_all(h.paths.media_thumbnails_dir(&h.media_id)).unwrap();
    h.catalog.requeue_media(&h.media_id).unwrap();
    h.catalog
        .set_last_completed_stage(&h.media_id, Stage::ExtractingFrames)
        .unwrap();

    let outcome = h
        .pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;
    assert_eq!(outcome, gaze_core::pipeline::PipelineOutcome::Done);
    assert!(h
        .paths
        .media_thumbnails_dir(&h.media_id)
        .join("frame_000001.jpg")
        .exists());
}

#[tokio::test]
async fn cancelled_token_converges_on_cancelled() {
    let h = harness().await;

    let token = CancellationToken::new();
    token.cancel();
    let outcome = h.pipeline.run_primary(&h.media_id, token).await;
    assert_eq!(outcome, gaze_core::pipeline::PipelineOutcome::Cancelled);
    assert_eq!(
        h.catalog.media_status(&h.media_id).unwrap().unwrap(),
        MediaStatus::Cancelled
    );
}

#[tokio::test]
async fn missing_source_fails_with_file_not_found() {
    let h = harness().await;

    let source = h.catalog.get_media(&h.media_id).unwrap().unwrap().path;
    std::fs::remove_file(&source).unwrap();

    let outcome = h
        .pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;
    assert_eq!(outcome, gaze_core::pipeline::PipelineOutcome::Failed);

    let item = h.catalog.get_media(&h.media_id).unwrap().unwrap();
    assert_eq!(item.status, MediaStatus::Failed);
    assert_eq!(item.error_code.as_deref(), Some("FILE_NOT_FOUND"));
}

#[tokio::test]
async fn visual_search_finds_indexed_photo() {
    let h = harness().await;
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    let response = h
        .planner
        .search(&SearchRequest {
            query: "beach".into(),
            mode: SearchMode::Visual,
            labels: None,
            person_ids: None,
            library_id: Some(h.library_id.clone()),
            limit: 10,
            offset: 0,
        })
        .unwrap();

    assert_eq!(response.results.len(), 1);
    let hit = &response.results[0];
    assert_eq!(hit.video_id, h.media_id);
    assert_eq!(hit.timestamp_ms, 0);
    assert!(hit.score >= 0.18);
    assert!(hit.thumbnail_path.is_some());
}

#[tokio::test]
async fn object_query_fuses_detection_and_clip() {
    let h = harness().await;
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    let response = h
        .planner
        .search(&SearchRequest {
            query: "car".into(),
            mode: SearchMode::Visual,
            labels: None,
            person_ids: None,
            library_id: None,
            limit: 10,
            offset: 0,
        })
        .unwrap();

    // Detection score 0.5 + 0.5*0.8 = 0.9; CLIP agrees at the same moment so
    // fusion lifts it to min(1.0, max(clip, det) + 0.1) = 1.0, and the pure
    // CLIP hit is suppressed.
    assert_eq!(response.results.len(), 1);
    let hit = &response.results[0];
    assert!(hit.score > 0.95, "expected fused score, got {}", hit.score);
    assert_eq!(hit.labels.as_deref(), Some(&["car".to_string()][..]));
}

#[tokio::test]
async fn unrelated_query_returns_nothing() {
    let h = harness().await;
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    let response = h
        .planner
        .search(&SearchRequest {
            query: "zzz unrelated".into(),
            mode: SearchMode::Visual,
            labels: None,
            person_ids: None,
            library_id: None,
            limit: 10,
            offset: 0,
        })
        .unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn label_only_search_uses_detection_path() {
    let h = harness().await;
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    let response = h
        .planner
        .search(&SearchRequest {
            query: "".into(),
            mode: SearchMode::Visual,
            labels: Some(vec!["car".into()]),
            person_ids: None,
            library_id: None,
            limit: 10,
            offset: 0,
        })
        .unwrap();

    assert_eq!(response.total, 1);
    assert_eq!(response.results[0].score, 1.0);
}

#[tokio::test]
async fn label_only_search_ignores_person_ids() {
    let h = harness().await;
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    // Labels plus a blank query take the detection-only path even when
    // person_ids is non-empty.
    let response = h
        .planner
        .search(&SearchRequest {
            query: "".into(),
            mode: SearchMode::Visual,
            labels: Some(vec!["car".into()]),
            person_ids: Some(vec!["some-person".into()]),
            library_id: None,
            limit: 10,
            offset: 0,
        })
        .unwrap();

    assert_eq!(response.total, 1);
    assert_eq!(response.results[0].score, 1.0);
    assert_eq!(
        response.results[0].labels.as_deref(),
        Some(&["car".to_string()][..])
    );
}

#[tokio::test]
async fn wipe_then_reindex_restores_counts() {
    let h = harness().await;
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    let frames_before = h.catalog.list_frames(&h.media_id).unwrap().len();
    let detections_before = h.catalog.list_detections(&h.media_id).unwrap().len();

    h.catalog.wipe_derived().unwrap();
    h.paths.remove_media_artifacts(&h.media_id);
    assert!(h.catalog.list_frames(&h.media_id).unwrap().is_empty());

    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;
    assert_eq!(h.catalog.list_frames(&h.media_id).unwrap().len(), frames_before);
    assert_eq!(
        h.catalog.list_detections(&h.media_id).unwrap().len(),
        detections_before
    );
}

#[tokio::test]
async fn auto_recognition_assigns_known_person() {
    let h = harness().await;

    // First index run produces one unassigned face.
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;
    let faces = h
        .catalog
        .list_faces(&gaze_core::catalog::FaceFilter {
            media_id: Some(h.media_id.clone()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert!(faces[0].person_id.is_none());

    // Name that face, then re-run the face stage via a full re-index.
    let alice = h.catalog.create_person("Alice").unwrap();
    h.catalog
        .set_face_person(
            &faces[0].face_id,
            Some(&alice),
            gaze_core::catalog::AssignmentSource::Manual,
            1.0,
        )
        .unwrap();

    // Rewind the stage marker so DETECTING_FACES re-runs.
    h.catalog.requeue_media(&h.media_id).unwrap();
    h.catalog
        .set_last_completed_stage(&h.media_id, Stage::Detecting)
        .unwrap();
    h.pipeline
        .run_primary(&h.media_id, CancellationToken::new())
        .await;

    let faces = h
        .catalog
        .list_faces(&gaze_core::catalog::FaceFilter {
            media_id: Some(h.media_id.clone()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(faces[0].person_id.as_deref(), Some(alice.as_str()));
    assert_eq!(
        faces[0].assignment_source,
        Some(gaze_core::catalog::AssignmentSource::Auto)
    );
    assert_eq!(h.catalog.get_person(&alice).unwrap().unwrap().face_count, 1);
}
