//! Caption export: SRT and WebVTT from transcript segments.

use crate::catalog::Catalog;
use crate::error::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionFormat {
    Srt,
    Vtt,
}

/// `HH:MM:SS,mmm` (SRT).
fn format_timestamp_srt(ms: i64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// `HH:MM:SS.mmm` (WebVTT).
fn format_timestamp_vtt(ms: i64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// Export an item's transcript in the requested caption format. An item
/// with no transcript yields an empty string.
pub fn export_captions(
    catalog: &Catalog,
    media_id: &str,
    format: CaptionFormat,
) -> Result<String> {
    let segments = catalog.list_transcript(media_id)?;
    if segments.is_empty() {
        return Ok(String::new());
    }

    let mut lines: Vec<String> = Vec::new();
    match format {
        CaptionFormat::Vtt => {
            lines.push("WEBVTT".to_string());
            lines.push(String::new());
            for segment in &segments {
                lines.push(format!(
                    "{} --> {}",
                    format_timestamp_vtt(segment.start_ms),
                    format_timestamp_vtt(segment.end_ms)
                ));
                lines.push(segment.text.clone());
                lines.push(String::new());
            }
        }
        CaptionFormat::Srt => {
            for (index, segment) in segments.iter().enumerate() {
                lines.push((index + 1).to_string());
                lines.push(format!(
                    "{} --> {}",
                    format_timestamp_srt(segment.start_ms),
                    format_timestamp_srt(segment.end_ms)
                ));
                lines.push(segment.text.clone());
                lines.push(String::new());
            }
        }
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MediaType, TranscriptSegment};

    #[test]
    fn test_srt_timestamp() {
        assert_eq!(format_timestamp_srt(0), "00:00:00,000");
        assert_eq!(format_timestamp_srt(3_723_456), "01:02:03,456");
    }

    #[test]
    fn test_vtt_timestamp() {
        assert_eq!(format_timestamp_vtt(61_250), "00:01:01.250");
    }

    #[test]
    fn test_export_both_formats() {
        let catalog = Catalog::open_in_memory().unwrap();
        crate::catalog::test_support::seed_media(&catalog, "m1", MediaType::Video);
        catalog
            .replace_transcript(
                "m1",
                &[
                    TranscriptSegment {
                        video_id: "m1".into(),
                        start_ms: 0,
                        end_ms: 1_500,
                        text: "hello".into(),
                        confidence: None,
                    },
                    TranscriptSegment {
                        video_id: "m1".into(),
                        start_ms: 1_500,
                        end_ms: 3_000,
                        text: "world".into(),
                        confidence: None,
                    },
                ],
            )
            .unwrap();

        let srt = export_captions(&catalog, "m1", CaptionFormat::Srt).unwrap();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nhello"));
        assert!(srt.contains("\n2\n"));

        let vtt = export_captions(&catalog, "m1", CaptionFormat::Vtt).unwrap();
        assert!(vtt.starts_with("WEBVTT\n"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:01.500"));
    }

    #[test]
    fn test_export_empty_transcript() {
        let catalog = Catalog::open_in_memory().unwrap();
        crate::catalog::test_support::seed_media(&catalog, "m1", MediaType::Video);
        assert_eq!(
            export_captions(&catalog, "m1", CaptionFormat::Srt).unwrap(),
            ""
        );
    }
}
