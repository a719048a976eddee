//! The search planner: query classification plus multi-source fusion.
//!
//! A query is classified (object term, color term, person set, free text)
//! and fanned out to the transcript FTS index, per-item vector shards and
//! detection lookups. The branches fuse into one ranked result set: object
//! detections anchor scores, CLIP hits confirm or are penalized, colors
//! nudge, persons filter or enrich.

pub mod captions;
pub mod shards;

use crate::catalog::Catalog;
use crate::config::SearchConfig;
use crate::error::Result;
use crate::media::colors::extract_color_from_query;
use crate::ml::labels::canonical_category;
use crate::ml::MlToolkit;
use crate::paths::DataPaths;
use serde::{Deserialize, Serialize};
use shards::ShardCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Transcript,
    Visual,
    Both,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Both
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub person_ids: Option<Vec<String>>,
    #[serde(default)]
    pub library_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PersonMatch {
    pub person_id: String,
    pub name: String,
    pub face_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Transcript,
    Visual,
    Both,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub video_id: String,
    pub timestamp_ms: i64,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persons: Option<Vec<PersonMatch>>,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub query_time_ms: u64,
}

/// Bucket a timestamp into its person window.
fn window_of(timestamp_ms: i64) -> i64 {
    (timestamp_ms / SearchConfig::PERSON_WINDOW_MS) * SearchConfig::PERSON_WINDOW_MS
}

/// `video_id → window_start → [(person_id, name)]`.
type PersonWindowMap = HashMap<String, HashMap<i64, Vec<(String, String)>>>;

fn build_person_windows(rows: Vec<(String, i64, String, String)>) -> PersonWindowMap {
    let mut map: PersonWindowMap = HashMap::new();
    for (video_id, timestamp_ms, person_id, name) in rows {
        map.entry(video_id)
            .or_default()
            .entry(window_of(timestamp_ms))
            .or_default()
            .push((person_id, name));
    }
    map
}

/// Count persons appearing in a window or its two neighbors.
fn persons_near(
    map: &PersonWindowMap,
    video_id: &str,
    timestamp_ms: i64,
    restrict_to: Option<&[String]>,
) -> Vec<PersonMatch> {
    let Some(windows) = map.get(video_id) else {
        return Vec::new();
    };
    let window = window_of(timestamp_ms);
    let mut counts: HashMap<String, (String, i64)> = HashMap::new();
    for w in [
        window - SearchConfig::PERSON_WINDOW_MS,
        window,
        window + SearchConfig::PERSON_WINDOW_MS,
    ] {
        if let Some(entries) = windows.get(&w) {
            for (person_id, name) in entries {
                if let Some(allowed) = restrict_to {
                    if !allowed.contains(person_id) {
                        continue;
                    }
                }
                counts
                    .entry(person_id.clone())
                    .and_modify(|(_, n)| *n += 1)
                    .or_insert_with(|| (name.clone(), 1));
            }
        }
    }
    let mut matches: Vec<PersonMatch> = counts
        .into_iter()
        .map(|(person_id, (name, face_count))| PersonMatch {
            person_id,
            name,
            face_count,
        })
        .collect();
    matches.sort_by(|a, b| a.person_id.cmp(&b.person_id));
    matches
}

/// The multi-source search planner.
pub struct SearchPlanner {
    catalog: Catalog,
    paths: DataPaths,
    toolkit: MlToolkit,
    shard_cache: Arc<ShardCache>,
}

impl SearchPlanner {
    pub fn new(catalog: Catalog, paths: DataPaths, toolkit: MlToolkit) -> Self {
        Self {
            catalog,
            paths,
            toolkit,
            shard_cache: Arc::new(ShardCache::new(SearchConfig::DEFAULT_SHARD_CACHE_MAX)),
        }
    }

    pub fn shard_cache(&self) -> &Arc<ShardCache> {
        &self.shard_cache
    }

    /// Execute one search request.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();

        // Keep the shard LRU in step with the setting.
        if let Ok(settings) = self.catalog.settings_view() {
            self.shard_cache.set_capacity(settings.faiss_cache_max);
        }

        let query_blank = request.query.trim().is_empty();
        let label_only = request
            .labels
            .as_ref()
            .map(|l| !l.is_empty())
            .unwrap_or(false)
            && query_blank;

        let (results, total) = if label_only {
            self.label_only_search(request)?
        } else {
            self.full_search(request)?
        };

        Ok(SearchResponse {
            results,
            total,
            query_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Dedicated detection-only path for `labels` with a blank query.
    fn label_only_search(
        &self,
        request: &SearchRequest,
    ) -> Result<(Vec<SearchResult>, usize)> {
        let labels = request.labels.clone().unwrap_or_default();
        let (moments, total) = self.catalog.label_moments(
            &labels,
            request.library_id.as_deref(),
            request.limit,
            request.offset,
        )?;
        let results = moments
            .into_iter()
            .map(|m| SearchResult {
                video_id: m.video_id,
                timestamp_ms: m.timestamp_ms,
                score: m.label_hits as f32 / labels.len().max(1) as f32,
                transcript_snippet: None,
                thumbnail_path: m.thumbnail_path,
                labels: Some(m.labels),
                persons: None,
                match_type: MatchType::Visual,
            })
            .collect();
        Ok((results, total))
    }

    fn full_search(&self, request: &SearchRequest) -> Result<(Vec<SearchResult>, usize)> {
        let mut results: Vec<SearchResult> = Vec::new();

        // Transcript branch.
        if matches!(request.mode, SearchMode::Transcript | SearchMode::Both)
            && !request.query.trim().is_empty()
        {
            for hit in self.catalog.search_transcripts(
                &request.query,
                request.library_id.as_deref(),
                request.limit,
            )? {
                results.push(SearchResult {
                    video_id: hit.video_id,
                    timestamp_ms: hit.start_ms,
                    score: 1.0 / (1.0 + hit.rank.abs() as f32),
                    transcript_snippet: Some(hit.snippet),
                    thumbnail_path: None,
                    labels: None,
                    persons: None,
                    match_type: MatchType::Transcript,
                });
            }
        }

        // Visual branch.
        if matches!(request.mode, SearchMode::Visual | SearchMode::Both) {
            self.visual_branch(request, &mut results)?;
        }

        // Label filter over whatever survived.
        if let Some(labels) = request.labels.as_ref().filter(|l| !l.is_empty()) {
            let mut filtered = Vec::with_capacity(results.len());
            for mut result in results {
                let matching = self.catalog.matching_labels_near(
                    &result.video_id,
                    result.timestamp_ms,
                    SearchConfig::LABEL_WINDOW_MS,
                    labels,
                )?;
                if !matching.is_empty() {
                    result.score += (0.05 * matching.len() as f32).min(0.15);
                    result.labels = Some(matching);
                    filtered.push(result);
                }
            }
            results = filtered;
        }

        // Person branch: standalone query or filter.
        let person_filtered = if let Some(person_ids) =
            request.person_ids.as_ref().filter(|p| !p.is_empty())
        {
            let windows = build_person_windows(self.catalog.person_face_moments(person_ids)?);
            if request.query.trim().is_empty() {
                results = self.person_only_results(person_ids, &windows)?;
            } else {
                let mut filtered = Vec::with_capacity(results.len());
                for mut result in results {
                    let matches = persons_near(
                        &windows,
                        &result.video_id,
                        result.timestamp_ms,
                        Some(person_ids.as_slice()),
                    );
                    if !matches.is_empty() {
                        result.score += (0.1 * matches.len() as f32).min(0.2);
                        result.persons = Some(matches);
                        filtered.push(result);
                    }
                }
                results = filtered;
            }
            true
        } else {
            false
        };

        // Both-mode merge: collapse duplicate (video, timestamp) pairs.
        if request.mode == SearchMode::Both {
            let mut merged: HashMap<(String, i64), SearchResult> = HashMap::new();
            for result in results {
                let key = (result.video_id.clone(), result.timestamp_ms);
                match merged.get_mut(&key) {
                    Some(existing) => {
                        existing.match_type = MatchType::Both;
                        existing.score = existing.score.max(result.score);
                        if existing.transcript_snippet.is_none() {
                            existing.transcript_snippet = result.transcript_snippet;
                        }
                        if existing.thumbnail_path.is_none() {
                            existing.thumbnail_path = result.thumbnail_path;
                        }
                    }
                    None => {
                        merged.insert(key, result);
                    }
                }
            }
            results = merged.into_values().collect();
        }

        // Person enrichment for everything the person branch did not already
        // annotate.
        if !person_filtered && !results.is_empty() {
            let video_ids: Vec<String> = {
                let mut ids: Vec<String> =
                    results.iter().map(|r| r.video_id.clone()).collect();
                ids.sort();
                ids.dedup();
                ids
            };
            let windows =
                build_person_windows(self.catalog.assigned_face_moments_for_videos(&video_ids)?);
            for result in &mut results {
                let matches =
                    persons_near(&windows, &result.video_id, result.timestamp_ms, None);
                if !matches.is_empty() {
                    result.persons = Some(matches);
                }
            }
        }

        // Final ordering and pagination.
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        let total = results.len();
        let results = results
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        Ok((results, total))
    }

    /// Detection pass + CLIP shard pass with fusion.
    fn visual_branch(
        &self,
        request: &SearchRequest,
        results: &mut Vec<SearchResult>,
    ) -> Result<()> {
        let detected_category = canonical_category(&request.query);
        let query_color = extract_color_from_query(&request.query);
        if let Some(color) = query_color {
            debug!("Query contains color '{color}'");
        }

        // Detection pass: label-anchored moments, cached for fusion.
        let mut detection_results: HashMap<(String, i64), SearchResult> = HashMap::new();
        if let Some(category) = detected_category {
            debug!("Query matched category '{category}', using detection-first search");
            for moment in self.catalog.detection_moments(
                category,
                request.library_id.as_deref(),
                request.limit * 2,
            )? {
                detection_results.insert(
                    (moment.video_id.clone(), moment.timestamp_ms),
                    SearchResult {
                        video_id: moment.video_id,
                        timestamp_ms: moment.timestamp_ms,
                        score: 0.5 + 0.5 * moment.max_confidence as f32,
                        transcript_snippet: None,
                        thumbnail_path: moment.thumbnail_path,
                        labels: Some(moment.labels),
                        persons: None,
                        match_type: MatchType::Visual,
                    },
                );
            }
        }

        // Embedding pass over per-item shards.
        if !request.query.trim().is_empty() {
            if let Some(embedder) = self.toolkit.embedder.clone() {
                match embedder.embed_text(&request.query) {
                    Ok(query_embedding) => {
                        self.clip_pass(
                            request,
                            &query_embedding,
                            detected_category.is_some(),
                            query_color,
                            &mut detection_results,
                            results,
                        )?;
                    }
                    Err(e) => warn!("Text embedding failed; skipping CLIP pass: {e}"),
                }
            } else {
                debug!("No embedder loaded; skipping CLIP pass");
            }
        }

        // Detection entries (fused or not) join the result set last.
        results.extend(detection_results.into_values());
        Ok(())
    }

    fn clip_pass(
        &self,
        request: &SearchRequest,
        query_embedding: &[f32],
        object_query: bool,
        query_color: Option<&'static str>,
        detection_results: &mut HashMap<(String, i64), SearchResult>,
        results: &mut Vec<SearchResult>,
    ) -> Result<()> {
        let floor = if object_query {
            SearchConfig::OBJECT_QUERY_SIMILARITY_FLOOR
        } else {
            SearchConfig::VISUAL_SIMILARITY_FLOOR
        };
        let k = SearchConfig::SHARD_TOP_K.min(request.limit.max(1));

        for video_id in self
            .catalog
            .list_done_media_ids(request.library_id.as_deref())?
        {
            let shard_path = self.paths.shard_path(&video_id);
            if !shard_path.exists() {
                continue;
            }
            let shard = match self.shard_cache.get(&shard_path) {
                Ok(shard) => shard,
                Err(e) => {
                    warn!("Failed to open shard for {video_id}: {e}");
                    continue;
                }
            };

            let hits = shard.search(query_embedding, k);
            if hits.is_empty() {
                continue;
            }
            let indices: Vec<i64> = hits.iter().map(|(ordinal, _)| *ordinal as i64).collect();
            let frame_map = self.catalog.frames_by_index(&video_id, &indices)?;

            for (ordinal, raw_similarity) in hits {
                let Some(frame) = frame_map.get(&(ordinal as i64)) else {
                    continue;
                };
                let mut similarity = raw_similarity;
                if similarity < floor {
                    continue;
                }

                // Color adjustment.
                let frame_colors: Vec<&str> = frame
                    .colors
                    .as_deref()
                    .map(|c| c.split(',').collect())
                    .unwrap_or_default();
                let color_match = query_color
                    .map(|color| frame_colors.contains(&color))
                    .unwrap_or(false);
                if query_color.is_some() {
                    if color_match {
                        similarity = (similarity + 0.15).min(1.0);
                    } else {
                        similarity *= 0.7;
                    }
                }

                let key = (video_id.clone(), frame.timestamp_ms);
                if let Some(det) = detection_results.get_mut(&key) {
                    // Fusion: detection + CLIP agree on this moment.
                    let mut boosted = similarity.max(det.score) + 0.1;
                    if color_match {
                        boosted += 0.1;
                    }
                    det.score = boosted.min(1.0);
                    // The pure-CLIP result at this key is suppressed.
                    continue;
                }

                if object_query {
                    // CLIP thinks so but the detector never saw one.
                    similarity *= 0.6;
                }
                results.push(SearchResult {
                    video_id: video_id.clone(),
                    timestamp_ms: frame.timestamp_ms,
                    score: similarity,
                    transcript_snippet: None,
                    thumbnail_path: Some(frame.thumbnail_path.clone()),
                    labels: None,
                    persons: None,
                    match_type: MatchType::Visual,
                });
            }
        }
        Ok(())
    }

    /// Blank-query person search: one result per (video, window).
    fn person_only_results(
        &self,
        person_ids: &[String],
        windows: &PersonWindowMap,
    ) -> Result<Vec<SearchResult>> {
        let mut results = Vec::new();
        for (video_id, window_map) in windows {
            for (window_start, entries) in window_map {
                let thumbnail = self.catalog.first_frame_in_window(
                    video_id,
                    *window_start,
                    *window_start + SearchConfig::PERSON_WINDOW_MS,
                )?;

                let mut counts: HashMap<String, (String, i64)> = HashMap::new();
                for (person_id, name) in entries {
                    counts
                        .entry(person_id.clone())
                        .and_modify(|(_, n)| *n += 1)
                        .or_insert_with(|| (name.clone(), 1));
                }
                let matched = entries
                    .iter()
                    .map(|(person_id, _)| person_id)
                    .filter(|id| person_ids.contains(id))
                    .collect::<std::collections::HashSet<_>>()
                    .len();

                let mut persons: Vec<PersonMatch> = counts
                    .into_iter()
                    .map(|(person_id, (name, face_count))| PersonMatch {
                        person_id,
                        name,
                        face_count,
                    })
                    .collect();
                persons.sort_by(|a, b| a.person_id.cmp(&b.person_id));

                results.push(SearchResult {
                    video_id: video_id.clone(),
                    timestamp_ms: *window_start,
                    score: matched as f32 / person_ids.len().max(1) as f32,
                    transcript_snippet: None,
                    thumbnail_path: thumbnail,
                    labels: None,
                    persons: Some(persons),
                    match_type: MatchType::Visual,
                });
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_of() {
        assert_eq!(window_of(0), 0);
        assert_eq!(window_of(4_999), 0);
        assert_eq!(window_of(5_000), 5_000);
        assert_eq!(window_of(12_345), 10_000);
    }

    #[test]
    fn test_persons_near_looks_at_neighbors() {
        let map = build_person_windows(vec![
            ("v1".into(), 1_000, "p1".into(), "Alice".into()),
            ("v1".into(), 6_000, "p2".into(), "Bob".into()),
            ("v1".into(), 20_000, "p3".into(), "Cara".into()),
        ]);

        // Timestamp 4s: own window has Alice, neighbor (5s..10s) has Bob.
        let near = persons_near(&map, "v1", 4_000, None);
        assert_eq!(near.len(), 2);

        // Restriction drops Bob.
        let restricted = persons_near(&map, "v1", 4_000, Some(&["p1".to_string()]));
        assert_eq!(restricted.len(), 1);
        assert_eq!(restricted[0].name, "Alice");

        // Far window sees only Cara.
        let far = persons_near(&map, "v1", 21_000, None);
        assert_eq!(far.len(), 1);
        assert_eq!(far[0].name, "Cara");
    }

    #[test]
    fn test_persons_near_counts_faces() {
        let map = build_person_windows(vec![
            ("v1".into(), 1_000, "p1".into(), "Alice".into()),
            ("v1".into(), 2_000, "p1".into(), "Alice".into()),
            ("v1".into(), 3_000, "p1".into(), "Alice".into()),
        ]);
        let near = persons_near(&map, "v1", 2_000, None);
        assert_eq!(near[0].face_count, 3);
    }
}
