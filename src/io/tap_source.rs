//! AFC tap reader (JSON Lines)
//!
//! One tap per line. Lines that fail to parse are skipped and counted; the
//! rest of the file is still read.

use crate::domain::types::TapEvent;
use anyhow::Context;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

/// Taps read from one source
#[derive(Debug, Default)]
pub struct TapBatch {
    pub taps: Vec<TapEvent>,
    /// Lines that were not valid taps
    pub skipped: usize,
}

pub fn read_taps<R: BufRead>(reader: R) -> anyhow::Result<TapBatch> {
    let mut batch = TapBatch::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read tap line {}", line_no + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<TapEvent>(trimmed) {
            Ok(tap) => batch.taps.push(tap),
            Err(e) => {
                batch.skipped += 1;
                warn!(line = line_no + 1, error = %e, "tap_line_skipped");
            }
        }
    }

    Ok(batch)
}

pub fn load_taps<P: AsRef<Path>>(path: P) -> anyhow::Result<TapBatch> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open tap file {}", path.display()))?;
    let batch = read_taps(BufReader::new(file))?;

    info!(
        file = %path.display(),
        taps = batch.taps.len(),
        skipped = batch.skipped,
        "taps_loaded"
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CardId, StopId};
    use std::io::Cursor;

    #[test]
    fn test_read_taps_skips_bad_lines() {
        let input = concat!(
            r#"{"card_id":"c1","timestamp":"2019-10-07T08:00:00","stop_id":"S1"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"card_id":"c2","timestamp":"2019-10-07 08:05:30","stop_id":"Praça de Espanha","vehicle_id":"1234"}"#,
            "\n",
            r#"{"card_id":"c3","stop_id":"S1"}"#,
            "\n",
        );
        let batch = read_taps(Cursor::new(input)).unwrap();

        assert_eq!(batch.taps.len(), 2);
        assert_eq!(batch.skipped, 2);
        assert_eq!(batch.taps[0].card_id, CardId::from("c1"));
        assert_eq!(batch.taps[1].stop_id, StopId::from("Praça de Espanha"));
        assert_eq!(batch.taps[1].vehicle_id.as_deref(), Some("1234"));
        assert_eq!(batch.taps[1].timestamp.to_string(), "2019-10-07 08:05:30");
    }

    #[test]
    fn test_load_taps_missing_file() {
        assert!(load_taps("/nonexistent/taps.jsonl").is_err());
    }
}
