//! # Log Reassembly
//!
//! Turns the chunk buffer of a finished transfer into an ordered record set.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Reassembly Pipeline                                │
//! │                                                                         │
//! │  buffered chunks (arrival order)                                       │
//! │       │                                                                 │
//! │       ▼  1. stable sort by seq (ties keep arrival order)               │
//! │       ▼  2. concatenate data, normalize \r\n and \r to \n              │
//! │       ▼  3. split lines; drop blanks and header copies                 │
//! │       ▼  4. keep 8-field lines, parse; failures are counted            │
//! │       ▼                                                                 │
//! │  Reassembly { records, rejected_lines }                                │
//! │                                                                         │
//! │  Chunk boundaries are arbitrary: a record may be split across chunks,  │
//! │  which is why lines are only cut after concatenation.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Duplicate `seq` values are not collapsed. A re-delivered chunk contributes
//! its text twice, and whatever lines that produces go through the same
//! filter as everything else.

use tracing::debug;

use crate::schema;
use crate::types::{BufferedChunk, Record};

/// Output of [`reassemble`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reassembly {
    /// Records in log order.
    pub records: Vec<Record>,
    /// Non-blank, non-header lines that were dropped.
    pub rejected_lines: usize,
}

/// Orders the buffered chunks by `seq` and parses the resulting text.
///
/// The slice is sorted in place.
pub fn reassemble(chunks: &mut [BufferedChunk]) -> Reassembly {
    chunks.sort_by_key(|c| c.seq);

    let total_len = chunks.iter().map(|c| c.data.len()).sum();
    let mut blob = String::with_capacity(total_len);
    for chunk in chunks.iter() {
        blob.push_str(&chunk.data);
    }

    parse_log_text(&blob)
}

/// Parses a reassembled log blob.
pub fn parse_log_text(text: &str) -> Reassembly {
    let normalized = normalize_line_endings(text);
    let mut out = Reassembly::default();

    for line in normalized.split('\n') {
        if line.trim().is_empty() || schema::is_header(line) {
            continue;
        }

        if !schema::has_record_arity(line) {
            debug!(fields = line.split(',').count(), "Dropping line with wrong arity");
            out.rejected_lines += 1;
            continue;
        }

        match schema::parse_line(line) {
            Ok(record) => out.records.push(record),
            Err(e) => {
                debug!(error = %e, "Dropping unparseable line");
                out.rejected_lines += 1;
            }
        }
    }

    out
}

/// Converts `\r\n` and lone `\r` to `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: i64, data: &str) -> BufferedChunk {
        BufferedChunk {
            seq,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_filters_header_and_wrong_arity() {
        let text = "ts,lat,lon,alt,drop_id,speed_mps,sats,fix_ok\n1,2,3\n100.0,19.4,-99.1,50.0,3,5.2,8,1\n";
        let out = parse_log_text(text);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].drop_id, 3);
        assert_eq!(out.rejected_lines, 1);
    }

    #[test]
    fn test_reorders_by_seq() {
        let mut shuffled = vec![
            chunk(2, "3,5.2,8,1\n"),
            chunk(0, "ts,lat,lon,alt,drop_id,speed_mps,sats,fix_ok\n100.0,"),
            chunk(1, "19.4,-99.1,50.0,"),
        ];
        let mut ordered = vec![
            chunk(0, "ts,lat,lon,alt,drop_id,speed_mps,sats,fix_ok\n100.0,"),
            chunk(1, "19.4,-99.1,50.0,"),
            chunk(2, "3,5.2,8,1\n"),
        ];

        let a = reassemble(&mut shuffled);
        let b = reassemble(&mut ordered);
        assert_eq!(a, b);
        assert_eq!(a.records.len(), 1);
        assert_eq!(a.rejected_lines, 0);
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let mut chunks = vec![chunk(0, "100.0,1.0,1.0,0,1,0,0,0\n"), chunk(0, "200.0,2.0,2.0,0,2,0,0,0\n")];
        let out = reassemble(&mut chunks);
        assert_eq!(out.records[0].drop_id, 1);
        assert_eq!(out.records[1].drop_id, 2);
    }

    #[test]
    fn test_duplicate_seq_is_not_collapsed() {
        let mut chunks = vec![
            chunk(0, "100.0,1.0,1.0,0,1,0,0,0\n"),
            chunk(0, "100.0,1.0,1.0,0,1,0,0,0\n"),
        ];
        let out = reassemble(&mut chunks);
        assert_eq!(out.records.len(), 2);
    }

    #[test]
    fn test_line_endings_normalized() {
        let out = parse_log_text("100.0,1.0,1.0,0,1,0,0,0\r\n200.0,2.0,2.0,0,2,0,0,0\r300.0,3.0,3.0,0,3,0,0,1");
        assert_eq!(out.records.len(), 3);
        assert!(out.records[2].fix_ok);
    }

    #[test]
    fn test_unparseable_fields_counted() {
        let out = parse_log_text("100.0,x,1.0,0,1,0,0,0\n\n   \n200.0,2.0,2.0,0,2,0,0,0\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.rejected_lines, 1);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(parse_log_text(""), Reassembly::default());
    }
}
