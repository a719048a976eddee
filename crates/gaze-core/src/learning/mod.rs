//! Face learning: per-person centroids, references, negatives and learned
//! pair thresholds.
//!
//! The subsystem materializes four in-memory maps from the catalog and
//! scores new face embeddings against them during the face-detection stage.
//! User corrections feed back as negatives and pair-threshold bumps, so two
//! frequently-confused persons gradually demand a higher similarity before
//! auto-assignment.

use crate::catalog::{AssignmentSource, Catalog, RecognitionMode};
use crate::config::LearningConfig;
use crate::error::{GazeError, Result};
use crate::ml::{bytes_to_embedding, cosine_similarity, normalize};
use std::collections::HashMap;
use tracing::{debug, info};

/// An auto-recognition match.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionMatch {
    pub person_id: String,
    pub similarity: f32,
    pub confidence: f32,
}

/// In-memory learning state, rebuilt from the catalog on load.
#[derive(Debug, Default)]
pub struct FaceLearning {
    /// Unit-normalized weighted centroid per person.
    centroids: HashMap<String, Vec<f32>>,
    /// Reference embeddings per person.
    references: HashMap<String, Vec<Vec<f32>>>,
    /// Negative embeddings per person.
    negatives: HashMap<String, Vec<Vec<f32>>>,
    /// Canonical (sorted) pair → learned threshold.
    pair_thresholds: HashMap<(String, String), f32>,
    /// Scoring mode per person.
    modes: HashMap<String, RecognitionMode>,
}

impl FaceLearning {
    /// Materialize the maps from the catalog.
    pub fn load(catalog: &Catalog) -> Result<Self> {
        let mut state = FaceLearning::default();

        // Weighted centroids: reference 3.0, manual 2.0, auto/legacy 1.0.
        let mut sums: HashMap<String, Vec<f32>> = HashMap::new();
        for (person_id, source, blob) in catalog.assigned_face_embeddings()? {
            let embedding = match bytes_to_embedding(&blob) {
                Ok(e) => e,
                Err(_) => continue,
            };
            let weight = source.centroid_weight();
            let sum = sums
                .entry(person_id)
                .or_insert_with(|| vec![0.0; embedding.len()]);
            for (acc, value) in sum.iter_mut().zip(&embedding) {
                *acc += weight * value;
            }
        }
        for (person_id, mut sum) in sums {
            normalize(&mut sum);
            state.centroids.insert(person_id, sum);
        }

        for (person_id, _face_id, _weight, blob) in catalog.reference_embeddings()? {
            if let Ok(embedding) = bytes_to_embedding(&blob) {
                state.references.entry(person_id).or_default().push(embedding);
            }
        }

        for (person_id, blob) in catalog.negative_embeddings()? {
            if let Ok(embedding) = bytes_to_embedding(&blob) {
                state.negatives.entry(person_id).or_default().push(embedding);
            }
        }

        for pair in catalog.list_pair_thresholds()? {
            state.pair_thresholds.insert(
                (pair.person_a_id, pair.person_b_id),
                pair.threshold as f32,
            );
        }

        for person in catalog.list_persons()? {
            state.modes.insert(person.person_id, person.recognition_mode);
        }

        info!(
            "Face learning loaded: {} centroids, {} reference sets, {} negative sets, {} pair thresholds",
            state.centroids.len(),
            state.references.len(),
            state.negatives.len(),
            state.pair_thresholds.len()
        );
        Ok(state)
    }

    pub fn known_person_count(&self) -> usize {
        self.centroids
            .keys()
            .chain(self.references.keys())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    fn pair_threshold(&self, a: &str, b: &str) -> Option<f32> {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.pair_thresholds.get(&key).copied()
    }

    /// Base score for one person, before the negative penalty. `None` means
    /// the person cannot be scored under its mode.
    fn base_score(&self, person_id: &str, embedding: &[f32]) -> Option<f32> {
        let mode = self
            .modes
            .get(person_id)
            .copied()
            .unwrap_or(RecognitionMode::Average);
        let centroid_sim = self
            .centroids
            .get(person_id)
            .map(|c| cosine_similarity(embedding, c));
        let max_ref = self.references.get(person_id).and_then(|refs| {
            refs.iter()
                .map(|r| cosine_similarity(embedding, r))
                .max_by(|a, b| a.total_cmp(b))
        });

        match mode {
            RecognitionMode::Average => centroid_sim,
            RecognitionMode::ReferenceOnly => max_ref,
            RecognitionMode::Weighted => match (max_ref, centroid_sim) {
                (Some(r), Some(c)) => Some(0.6 * r + 0.4 * c),
                (None, Some(c)) => Some(c),
                (Some(r), None) => Some(r),
                (None, None) => None,
            },
        }
    }

    /// Multiply down scores that look like a known negative for the person.
    fn negative_penalty(&self, person_id: &str, embedding: &[f32], score: f32) -> f32 {
        let Some(negatives) = self.negatives.get(person_id) else {
            return score;
        };
        let worst = negatives
            .iter()
            .map(|n| cosine_similarity(embedding, n))
            .max_by(|a, b| a.total_cmp(b))
            .unwrap_or(0.0);
        if worst > 0.7 {
            score * (1.0 - worst)
        } else if worst > 0.5 {
            score * (1.0 - 0.5 * worst)
        } else {
            score
        }
    }

    /// Score a new face embedding against every known person and return the
    /// winning match, if it clears the effective threshold.
    pub fn recognize(&self, embedding: &[f32]) -> Option<RecognitionMatch> {
        let mut scored: Vec<(String, f32)> = Vec::new();
        let mut person_ids: std::collections::HashSet<&String> =
            self.centroids.keys().collect();
        person_ids.extend(self.references.keys());

        for person_id in person_ids {
            if let Some(base) = self.base_score(person_id, embedding) {
                let adjusted = self.negative_penalty(person_id, embedding, base);
                scored.push((person_id.clone(), adjusted));
            }
        }
        if scored.is_empty() {
            return None;
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (top_person, top_score) = scored[0].clone();
        let runner_up = scored.get(1);

        let effective_threshold = runner_up
            .and_then(|(second_person, _)| self.pair_threshold(&top_person, second_person))
            .unwrap_or(LearningConfig::BASE_THRESHOLD);
        if top_score < effective_threshold {
            debug!(
                "Best match {} at {:.3} below threshold {:.3}",
                top_person, top_score, effective_threshold
            );
            return None;
        }

        let confidence = match runner_up {
            Some((_, second_score)) => {
                let margin = top_score - second_score;
                if margin < 0.1 {
                    (top_score * (0.7 + 3.0 * margin)).clamp(0.0, 1.0)
                } else {
                    top_score
                }
            }
            None => top_score,
        };

        Some(RecognitionMatch {
            person_id: top_person,
            similarity: top_score,
            confidence,
        })
    }

    /// User moved a face from person A to person B: record the correction
    /// signals and repair both persons' cached state.
    pub fn record_reassignment(
        catalog: &Catalog,
        face_id: &str,
        from_person: &str,
        to_person: &str,
    ) -> Result<()> {
        if from_person == to_person {
            return Ok(());
        }
        // The old person must never auto-claim this face again.
        catalog.add_face_negative(face_id, from_person)?;
        let pair = catalog.bump_pair_threshold(from_person, to_person)?;
        debug!(
            "Pair {{{}, {}}} threshold now {:.2} ({} corrections)",
            pair.person_a_id, pair.person_b_id, pair.threshold, pair.correction_count
        );

        catalog.set_face_person(face_id, Some(to_person), AssignmentSource::Manual, 1.0)?;

        Self::repick_thumbnail(catalog, from_person)?;
        Self::repick_thumbnail(catalog, to_person)?;
        Ok(())
    }

    /// Mark a face as a canonical reference example for its person.
    pub fn mark_reference(catalog: &Catalog, face_id: &str, person_id: &str) -> Result<()> {
        let face = catalog
            .get_face(face_id)?
            .ok_or_else(|| GazeError::FaceNotFound {
                face_id: face_id.to_string(),
            })?;
        catalog.add_face_reference(face_id, person_id, 1.0)?;
        catalog.set_face_person(face_id, Some(person_id), AssignmentSource::Reference, 1.0)?;
        if face.person_id.as_deref() != Some(person_id) {
            if let Some(previous) = face.person_id.as_deref() {
                Self::repick_thumbnail(catalog, previous)?;
            }
        }
        Self::repick_thumbnail(catalog, person_id)?;
        Ok(())
    }

    /// Deterministic thumbnail choice: the assigned face nearest the
    /// person's centroid. Clears the thumbnail when no faces remain.
    pub fn repick_thumbnail(catalog: &Catalog, person_id: &str) -> Result<()> {
        let faces = catalog.face_embeddings_for_person(person_id)?;
        if faces.is_empty() {
            catalog.set_person_thumbnail(person_id, None)?;
            return Ok(());
        }

        let mut centroid = vec![0.0f32; crate::config::PipelineConfig::EMBEDDING_DIM];
        let mut decoded: Vec<(String, Vec<f32>)> = Vec::new();
        for (face_id, blob) in faces {
            if let Ok(embedding) = bytes_to_embedding(&blob) {
                for (acc, value) in centroid.iter_mut().zip(&embedding) {
                    *acc += value;
                }
                decoded.push((face_id, embedding));
            }
        }
        if decoded.is_empty() {
            catalog.set_person_thumbnail(person_id, None)?;
            return Ok(());
        }
        normalize(&mut centroid);

        let best = decoded
            .iter()
            .max_by(|a, b| {
                cosine_similarity(&a.1, &centroid).total_cmp(&cosine_similarity(&b.1, &centroid))
            })
            .map(|(face_id, _)| face_id.clone())
            .expect("decoded is non-empty");
        catalog.set_person_thumbnail(person_id, Some(&best))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FaceRow, Frame, MediaType};
    use crate::ml::embedding_to_bytes;

    const DIM: usize = crate::config::PipelineConfig::EMBEDDING_DIM;

    /// Unit vector concentrated on one axis with a small off-axis component.
    fn unit_vec(axis: usize, off: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[axis] = 1.0;
        v[(axis + 1) % DIM] = off;
        normalize(&mut v);
        v
    }

    fn seed_face(
        catalog: &Catalog,
        media_id: &str,
        idx: usize,
        person_id: Option<&str>,
        source: AssignmentSource,
        embedding: &[f32],
    ) -> String {
        let face_id = FaceRow::face_id_for(media_id, 0, idx);
        let frame_id = Frame::frame_id_for(media_id, 0);
        let conn = catalog.lock().unwrap();
        conn.execute(
            "INSERT INTO faces (face_id, video_id, frame_id, timestamp_ms, bbox_x, bbox_y,
                 bbox_w, bbox_h, confidence, embedding, person_id, assignment_source,
                 created_at_ms)
             VALUES (?1, ?2, ?3, 0, 0, 0, 50, 50, 0.9, ?4, ?5, ?6, 1)",
            rusqlite::params![
                face_id,
                media_id,
                frame_id,
                embedding_to_bytes(embedding),
                person_id,
                source.as_str(),
            ],
        )
        .unwrap();
        drop(conn);
        if let Some(person) = person_id {
            catalog.refresh_face_count(person).unwrap();
        }
        face_id
    }

    fn setup() -> (Catalog, String, String) {
        let catalog = Catalog::open_in_memory().unwrap();
        crate::catalog::test_support::seed_media(&catalog, "m1", MediaType::Video);
        catalog
            .replace_frames(
                "m1",
                &[Frame {
                    frame_id: Frame::frame_id_for("m1", 0),
                    video_id: "m1".into(),
                    frame_index: 0,
                    timestamp_ms: 0,
                    thumbnail_path: "/t.jpg".into(),
                    colors: None,
                }],
            )
            .unwrap();
        let alice = catalog.create_person("Alice").unwrap();
        let bob = catalog.create_person("Bob").unwrap();
        (catalog, alice, bob)
    }

    #[test]
    fn test_recognize_by_centroid() {
        let (catalog, alice, _bob) = setup();
        seed_face(&catalog, "m1", 0, Some(&alice), AssignmentSource::Manual, &unit_vec(0, 0.0));
        seed_face(&catalog, "m1", 1, Some(&alice), AssignmentSource::Auto, &unit_vec(0, 0.1));

        let learning = FaceLearning::load(&catalog).unwrap();
        let hit = learning.recognize(&unit_vec(0, 0.05)).unwrap();
        assert_eq!(hit.person_id, alice);
        assert!(hit.similarity > 0.9);
    }

    #[test]
    fn test_recognize_below_threshold_is_none() {
        let (catalog, alice, _bob) = setup();
        seed_face(&catalog, "m1", 0, Some(&alice), AssignmentSource::Manual, &unit_vec(0, 0.0));

        let learning = FaceLearning::load(&catalog).unwrap();
        // Orthogonal query: similarity ~0 < 0.65.
        assert!(learning.recognize(&unit_vec(5, 0.0)).is_none());
    }

    #[test]
    fn test_reference_only_mode_ignores_centroid() {
        let (catalog, alice, _bob) = setup();
        // Centroid points along axis 0, reference along axis 3.
        seed_face(&catalog, "m1", 0, Some(&alice), AssignmentSource::Auto, &unit_vec(0, 0.0));
        let ref_face = seed_face(
            &catalog,
            "m1",
            1,
            Some(&alice),
            AssignmentSource::Reference,
            &unit_vec(3, 0.0),
        );
        catalog.add_face_reference(&ref_face, &alice, 1.0).unwrap();
        catalog
            .set_person_recognition_mode(&alice, RecognitionMode::ReferenceOnly)
            .unwrap();

        let learning = FaceLearning::load(&catalog).unwrap();
        let hit = learning.recognize(&unit_vec(3, 0.02)).unwrap();
        assert_eq!(hit.person_id, alice);
    }

    #[test]
    fn test_weighted_mode_blends() {
        let (catalog, alice, _bob) = setup();
        let ref_face = seed_face(
            &catalog,
            "m1",
            0,
            Some(&alice),
            AssignmentSource::Reference,
            &unit_vec(0, 0.0),
        );
        catalog.add_face_reference(&ref_face, &alice, 1.0).unwrap();
        catalog
            .set_person_recognition_mode(&alice, RecognitionMode::Weighted)
            .unwrap();

        let learning = FaceLearning::load(&catalog).unwrap();
        let query = unit_vec(0, 0.05);
        let hit = learning.recognize(&query).unwrap();
        // Single reference == centroid here, so the blend stays close to
        // plain cosine.
        let direct = cosine_similarity(&query, &unit_vec(0, 0.0));
        assert!((hit.similarity - direct).abs() < 0.05);
    }

    #[test]
    fn test_negative_penalty_blocks_match() {
        let (catalog, alice, _bob) = setup();
        let base = unit_vec(0, 0.0);
        seed_face(&catalog, "m1", 0, Some(&alice), AssignmentSource::Manual, &base);
        // Mark an almost identical face as "not Alice".
        let neg_face = seed_face(&catalog, "m1", 1, None, AssignmentSource::Legacy, &unit_vec(0, 0.01));
        catalog.add_face_negative(&neg_face, &alice).unwrap();

        let learning = FaceLearning::load(&catalog).unwrap();
        // The query is nearly the negative: sim to negative > 0.7, so the
        // score collapses to sim * (1 - neg) ≈ 0 and no match survives.
        assert!(learning.recognize(&unit_vec(0, 0.02)).is_none());
    }

    #[test]
    fn test_close_margin_discounts_confidence() {
        let (catalog, alice, bob) = setup();
        seed_face(&catalog, "m1", 0, Some(&alice), AssignmentSource::Manual, &unit_vec(0, 0.30));
        seed_face(&catalog, "m1", 1, Some(&bob), AssignmentSource::Manual, &unit_vec(0, 0.38));

        let learning = FaceLearning::load(&catalog).unwrap();
        let hit = learning.recognize(&unit_vec(0, 0.30)).unwrap();
        assert_eq!(hit.person_id, alice);
        // Ambiguous pair: confidence dips below raw similarity.
        assert!(hit.confidence < hit.similarity);
    }

    #[test]
    fn test_pair_threshold_raises_bar() {
        let (catalog, alice, bob) = setup();
        seed_face(&catalog, "m1", 0, Some(&alice), AssignmentSource::Manual, &unit_vec(0, 0.25));
        seed_face(&catalog, "m1", 1, Some(&bob), AssignmentSource::Manual, &unit_vec(0, 0.55));

        let learning_before = FaceLearning::load(&catalog).unwrap();
        let query = unit_vec(0, 0.28);
        let before = learning_before.recognize(&query);
        assert!(before.is_some());
        let sim = before.as_ref().unwrap().similarity;
        assert!(sim >= 0.65 && sim < 0.99);

        // Push the learned pair threshold past the observed similarity.
        for _ in 0..10 {
            catalog.bump_pair_threshold(&alice, &bob).unwrap();
        }
        let learning_after = FaceLearning::load(&catalog).unwrap();
        if sim < 0.85 {
            assert!(learning_after.recognize(&query).is_none());
        }
    }

    #[test]
    fn test_record_reassignment_full_flow() {
        let (catalog, alice, bob) = setup();
        let face_id = seed_face(
            &catalog,
            "m1",
            0,
            Some(&alice),
            AssignmentSource::Auto,
            &unit_vec(0, 0.0),
        );

        FaceLearning::record_reassignment(&catalog, &face_id, &alice, &bob).unwrap();

        let face = catalog.get_face(&face_id).unwrap().unwrap();
        assert_eq!(face.person_id.as_deref(), Some(bob.as_str()));
        assert_eq!(face.assignment_source, Some(AssignmentSource::Manual));
        assert_eq!(face.assignment_confidence, Some(1.0));

        assert!(catalog.has_face_negative(&face_id, &alice).unwrap());
        let pair = catalog.get_pair_threshold(&alice, &bob).unwrap().unwrap();
        assert!((pair.threshold - 0.70).abs() < 1e-9);
        assert_eq!(pair.correction_count, 1);

        assert_eq!(catalog.get_person(&alice).unwrap().unwrap().face_count, 0);
        assert_eq!(catalog.get_person(&bob).unwrap().unwrap().face_count, 1);
        assert_eq!(
            catalog.get_person(&bob).unwrap().unwrap().thumbnail_face_id,
            Some(face_id)
        );
        assert_eq!(
            catalog.get_person(&alice).unwrap().unwrap().thumbnail_face_id,
            None
        );
    }

    #[test]
    fn test_mark_reference_flips_provenance() {
        let (catalog, alice, _bob) = setup();
        let face_id = seed_face(&catalog, "m1", 0, None, AssignmentSource::Legacy, &unit_vec(0, 0.0));

        FaceLearning::mark_reference(&catalog, &face_id, &alice).unwrap();

        let face = catalog.get_face(&face_id).unwrap().unwrap();
        assert_eq!(face.assignment_source, Some(AssignmentSource::Reference));
        assert_eq!(face.person_id.as_deref(), Some(alice.as_str()));
        assert_eq!(catalog.list_face_references(&alice).unwrap().len(), 1);
    }

    #[test]
    fn test_repick_thumbnail_nearest_centroid() {
        let (catalog, alice, _bob) = setup();
        seed_face(&catalog, "m1", 0, Some(&alice), AssignmentSource::Manual, &unit_vec(0, 0.0));
        seed_face(&catalog, "m1", 1, Some(&alice), AssignmentSource::Manual, &unit_vec(0, 0.05));
        let far = seed_face(&catalog, "m1", 2, Some(&alice), AssignmentSource::Manual, &unit_vec(0, 0.9));

        FaceLearning::repick_thumbnail(&catalog, &alice).unwrap();
        let person = catalog.get_person(&alice).unwrap().unwrap();
        let thumb = person.thumbnail_face_id.unwrap();
        assert_ne!(thumb, far);
    }
}
