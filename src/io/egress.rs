//! OD-X egress - writes inferred journeys and the OD matrix to files
//!
//! Journeys are written in JSONL format (one JSON object per line), the
//! matrix as a single pretty-printed JSON document.

use crate::domain::journey::Journey;
use crate::domain::od_matrix::OdMatrix;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Egress writer for journeys
pub struct Egress {
    file_path: String,
    append: bool,
}

/// Create parent directories if they don't exist
fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

impl Egress {
    /// Writer that truncates the file on each batch unless `append` is set
    pub fn new(file_path: &str, append: bool) -> Self {
        info!(file_path = %file_path, append = append, "egress_initialized");
        Self { file_path: file_path.to_string(), append }
    }

    fn open(&self) -> std::io::Result<File> {
        let path = Path::new(&self.file_path);
        ensure_parent(path)?;
        let mut options = OpenOptions::new();
        options.create(true);
        if self.append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        options.open(path)
    }

    /// Write journeys in the given order, returns the number written
    pub fn write_journeys(&self, journeys: &[Journey]) -> std::io::Result<usize> {
        let mut writer = BufWriter::new(self.open()?);

        for journey in journeys {
            writeln!(writer, "{}", journey.to_json())?;
            debug!(
                jid = %journey.jid,
                card_id = %journey.card_id,
                legs = journey.legs.len(),
                destination_source = %journey.destination_source.as_str(),
                "journey_egressed"
            );
        }
        writer.flush()?;

        info!(file = %self.file_path, journeys = journeys.len(), "journeys_written");
        Ok(journeys.len())
    }
}

/// Write the aggregated OD matrix, replacing any previous file
pub fn write_matrix(path: &str, matrix: &OdMatrix) -> std::io::Result<()> {
    let file_path = Path::new(path);
    ensure_parent(file_path)?;

    let mut writer = BufWriter::new(File::create(file_path)?);
    serde_json::to_writer_pretty(&mut writer, &matrix.to_json_value())?;
    writeln!(writer)?;
    writer.flush()?;

    info!(
        file = %path,
        pairs = matrix.len(),
        unknown_destination = matrix.unknown_destination(),
        "od_matrix_written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::leg::Leg;
    use crate::domain::types::{CardId, TapEvent};
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    fn journey(card: &str, ordinal: u32) -> Journey {
        let date = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();
        let tap = TapEvent::new(card, date.and_hms_opt(8, ordinal, 0).unwrap(), "S1");
        let leg = Leg::unmatched(&tap, date, &[]);
        Journey::new(CardId::from(card), date, ordinal, vec![leg], &[], 0.2).unwrap()
    }

    #[test]
    fn test_write_journeys() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("odx.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap(), false);

        let journeys: Vec<Journey> = (0..3).map(|i| journey("c1", i)).collect();
        assert_eq!(egress.write_journeys(&journeys).unwrap(), 3);

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(content.ends_with('\n'));

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["jid"], journeys[0].jid);
        assert_eq!(parsed["destination"], serde_json::Value::Null);
    }

    #[test]
    fn test_truncate_mode_is_idempotent() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("odx.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap(), false);
        let journeys = vec![journey("c1", 0), journey("c2", 0)];

        egress.write_journeys(&journeys).unwrap();
        let first = fs::read(&file_path).unwrap();
        egress.write_journeys(&journeys).unwrap();
        let second = fs::read(&file_path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_append_mode() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("odx.jsonl");
        fs::write(&file_path, "{\"existing\":\"data\"}\n").unwrap();

        let egress = Egress::new(file_path.to_str().unwrap(), true);
        egress.write_journeys(&[journey("c1", 0)]).unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("existing"));
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir");
        let journeys_path = nested.join("odx.jsonl");
        let matrix_path = nested.join("od.json");

        Egress::new(journeys_path.to_str().unwrap(), false)
            .write_journeys(&[journey("c1", 0)])
            .unwrap();
        write_matrix(matrix_path.to_str().unwrap(), &OdMatrix::new()).unwrap();

        assert!(journeys_path.exists());
        let matrix: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&matrix_path).unwrap()).unwrap();
        assert_eq!(matrix["pairs"], serde_json::json!([]));
    }
}
