//! Transcript rows and the FTS5 mirror.
//!
//! Segments live twice: in `transcript_segments` for ordered retrieval and
//! caption export, and in the `transcript_fts` virtual table for ranked
//! phrase search. Both are replaced together when a transcription run
//! persists.

use super::{Catalog, TranscriptSegment};
use crate::error::Result;
use rusqlite::params;

/// A ranked FTS hit with its highlight snippet.
#[derive(Debug, Clone)]
pub struct TranscriptHit {
    pub video_id: String,
    pub start_ms: i64,
    pub snippet: String,
    /// Raw BM25 rank (negative; closer to zero is better).
    pub rank: f64,
}

/// Escape a user query for an FTS5 exact-phrase match. Embedded double
/// quotes are doubled so they cannot break out of the phrase.
pub(crate) fn phrase_query(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

impl Catalog {
    /// Replace all transcript rows (base table and FTS mirror) for an item.
    pub fn replace_transcript(&self, media_id: &str, segments: &[TranscriptSegment]) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute_batch("BEGIN")?;
            let result = (|| {
                conn.execute(
                    "DELETE FROM transcript_segments WHERE video_id = ?1",
                    params![media_id],
                )?;
                conn.execute(
                    "DELETE FROM transcript_fts WHERE video_id = ?1",
                    params![media_id],
                )?;
                for seg in segments {
                    conn.execute(
                        "INSERT INTO transcript_segments (video_id, start_ms, end_ms, text, confidence)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![seg.video_id, seg.start_ms, seg.end_ms, seg.text, seg.confidence],
                    )?;
                    conn.execute(
                        "INSERT INTO transcript_fts (video_id, start_ms, end_ms, text)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![seg.video_id, seg.start_ms, seg.end_ms, seg.text],
                    )?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => conn.execute_batch("COMMIT"),
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })?;
        Ok(())
    }

    /// Segments of an item in ascending start order (caption export).
    pub fn list_transcript(&self, media_id: &str) -> Result<Vec<TranscriptSegment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT video_id, start_ms, end_ms, text, confidence
             FROM transcript_segments WHERE video_id = ?1 ORDER BY start_ms",
        )?;
        let segments = stmt
            .query_map([media_id], |row| {
                Ok(TranscriptSegment {
                    video_id: row.get(0)?,
                    start_ms: row.get(1)?,
                    end_ms: row.get(2)?,
                    text: row.get(3)?,
                    confidence: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(segments)
    }

    /// Exact-phrase FTS search ranked by BM25, optionally restricted to a
    /// library. Snippets highlight the matched text column with `<mark>`
    /// bounded to ~20 tokens of context.
    pub fn search_transcripts(
        &self,
        query: &str,
        library_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TranscriptHit>> {
        let conn = self.lock()?;
        let fts_query = phrase_query(query);

        let mut hits = Vec::new();
        if let Some(library) = library_id {
            // FTS5 needs the table name (not an alias) for MATCH and snippet().
            let mut stmt = conn.prepare(
                "SELECT transcript_fts.video_id,
                        transcript_fts.start_ms,
                        snippet(transcript_fts, 3, '<mark>', '</mark>', '...', 20),
                        bm25(transcript_fts)
                 FROM transcript_fts
                 INNER JOIN media ON media.media_id = transcript_fts.video_id
                 WHERE transcript_fts MATCH ?1 AND media.library_id = ?2
                 ORDER BY bm25(transcript_fts)
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![fts_query, library, limit as i64], |row| {
                Ok(TranscriptHit {
                    video_id: row.get(0)?,
                    start_ms: row.get(1)?,
                    snippet: row.get(2)?,
                    rank: row.get(3)?,
                })
            })?;
            for row in rows {
                hits.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT video_id, start_ms,
                        snippet(transcript_fts, 3, '<mark>', '</mark>', '...', 20),
                        bm25(transcript_fts)
                 FROM transcript_fts
                 WHERE transcript_fts MATCH ?1
                 ORDER BY bm25(transcript_fts)
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![fts_query, limit as i64], |row| {
                Ok(TranscriptHit {
                    video_id: row.get(0)?,
                    start_ms: row.get(1)?,
                    snippet: row.get(2)?,
                    rank: row.get(3)?,
                })
            })?;
            for row in rows {
                hits.push(row?);
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::seed_media;
    use super::*;
    use crate::catalog::{Catalog, MediaType};

    fn seg(media_id: &str, start_ms: i64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            video_id: media_id.to_string(),
            start_ms,
            end_ms: start_ms + 1500,
            text: text.to_string(),
            confidence: Some(0.9),
        }
    }

    #[test]
    fn test_phrase_query_escapes_quotes() {
        assert_eq!(phrase_query("hello world"), "\"hello world\"");
        assert_eq!(phrase_query("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_replace_and_search() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);

        catalog
            .replace_transcript(
                "m1",
                &[
                    seg("m1", 0, "welcome to the beach trip"),
                    seg("m1", 2000, "the water was cold"),
                ],
            )
            .unwrap();

        let hits = catalog.search_transcripts("beach trip", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].video_id, "m1");
        assert_eq!(hits[0].start_ms, 0);
        assert!(hits[0].snippet.contains("<mark>"));

        // Phrase semantics: out-of-order words do not match.
        assert!(catalog
            .search_transcripts("trip beach", None, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_replace_clears_previous_rows() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);

        catalog
            .replace_transcript("m1", &[seg("m1", 0, "old words")])
            .unwrap();
        catalog
            .replace_transcript("m1", &[seg("m1", 0, "new words")])
            .unwrap();

        assert!(catalog.search_transcripts("old words", None, 10).unwrap().is_empty());
        assert_eq!(catalog.list_transcript("m1").unwrap().len(), 1);
    }

    #[test]
    fn test_library_filter() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lib1 = seed_media(&catalog, "m1", MediaType::Video);
        seed_media(&catalog, "m2", MediaType::Video);

        catalog
            .replace_transcript("m1", &[seg("m1", 0, "shared phrase")])
            .unwrap();
        catalog
            .replace_transcript("m2", &[seg("m2", 0, "shared phrase")])
            .unwrap();

        let all = catalog.search_transcripts("shared phrase", None, 10).unwrap();
        assert_eq!(all.len(), 2);

        let filtered = catalog
            .search_transcripts("shared phrase", Some(&lib1), 10)
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].video_id, "m1");
    }

    #[test]
    fn test_embedded_quotes_do_not_break_match() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        catalog
            .replace_transcript("m1", &[seg("m1", 0, "ordinary words")])
            .unwrap();

        // Must not error out even with hostile quoting.
        let hits = catalog
            .search_transcripts("ordinary\" OR \"x", None, 10)
            .unwrap();
        assert!(hits.is_empty());
    }
}
