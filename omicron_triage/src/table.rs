//! Persisting a merged trigger table as CSV.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{EventRecord, Query, TriageError, TriggerTable};

const OUTPUT_SUBDIR: &str = "Omicron";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub sha256: String,
}

pub fn table_path(output_dir: &Path, query: &Query) -> PathBuf {
    output_dir
        .join(OUTPUT_SUBDIR)
        .join(format!("table-{}.csv", query.tag()))
}

pub fn plot_path(output_dir: &Path, query: &Query) -> PathBuf {
    output_dir
        .join(OUTPUT_SUBDIR)
        .join(format!("plot-{}.png", query.tag()))
}

/// Writes the header and one row per trigger, creating parent directories.
/// The file is only touched once the full contents have been serialised.
pub fn write_table(table: &TriggerTable, path: &Path) -> Result<TableSummary, TriageError> {
    let bytes = encode_table(table).map_err(|e| TriageError::io(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TriageError::io(parent, e))?;
    }
    fs::write(path, &bytes).map_err(|e| TriageError::io(path, e))?;

    let summary = TableSummary {
        path: path.to_path_buf(),
        rows: table.len(),
        sha256: format!("{:x}", Sha256::digest(&bytes)),
    };
    debug!(
        path = %path.display(),
        rows = summary.rows,
        sha256 = %summary.sha256,
        "Wrote trigger table"
    );
    Ok(summary)
}

fn encode_table(table: &TriggerTable) -> Result<Vec<u8>, std::io::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EventRecord::COLUMNS)?;
    for record in table.records() {
        // Display for f64 is plain decimal regardless of magnitude
        writer.write_record(record.values().iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::HEADER;
    use crate::archive::Fragment;
    use crate::merge::merge;
    use crate::merge::tests::record;
    use tempfile::TempDir;

    fn table(records: Vec<EventRecord>) -> TriggerTable {
        let query = Query::new("H1", "CH", 0.0, 1e12, 0.0).unwrap();
        let fragment = Fragment {
            path: PathBuf::from("H1-CH_OMICRON-0-100.csv"),
            range_min: 0,
            range_max: 100,
        };
        merge(&query, vec![(fragment, records)]).0
    }

    #[test]
    fn test_empty_table_is_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let summary = write_table(&TriggerTable::default(), &path).unwrap();
        assert_eq!(summary.rows, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{}\n", HEADER));
        assert_eq!(
            summary.sha256,
            "a0a1af85057321c24168246f7ed39a2ae237a9d8e9d013485eb6f58fadf2759d"
        );
    }

    #[test]
    fn test_rows_are_plain_decimal() {
        let mut rec = record(1439800926.25, 7.5);
        rec.amplitude = 1.5e-22;
        rec.frequency = 1e21;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        write_table(&table(vec![rec]), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("1439800926.25,1000000000000000000000,1439800925.75,"));
        assert!(row.contains(",0.00000000000000000000015,"));
        assert!(!row.contains('e'));
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let t = table(vec![record(10.0, 6.0), record(20.0, 30.0)]);
        let first = write_table(&t, &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, "stale contents longer than the table\n".repeat(20)).unwrap();
        let second = write_table(&t, &path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sha256.len(), 64);
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_output_paths() {
        let query = Query::new("H1", "LSC_REFL_A_LF_OUT_DQ", 100.0, 200.0, 5.0).unwrap();
        assert_eq!(
            table_path(Path::new("/tmp/run"), &query),
            PathBuf::from("/tmp/run/Omicron/table-LSC_REFL_A_LF_OUT_DQ-snr_5d0-start_100-end_200.csv")
        );
        assert_eq!(
            plot_path(Path::new("."), &query),
            PathBuf::from("./Omicron/plot-LSC_REFL_A_LF_OUT_DQ-snr_5d0-start_100-end_200.png")
        );
    }
}
