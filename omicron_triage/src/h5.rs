//! Reader for the HDF5 fragments Omicron writes: a one-dimensional compound
//! dataset named `triggers` with one member per trigger column.

use std::path::Path;

use crate::{EventRecord, TriageError};

pub(crate) const DATASET: &str = "triggers";

#[cfg(feature = "hdf5")]
pub(crate) use self::enabled::read_triggers;

#[cfg(not(feature = "hdf5"))]
pub(crate) fn read_triggers(path: &Path) -> Result<Vec<EventRecord>, TriageError> {
    Err(TriageError::fragment(
        path,
        format!(
            "reading the HDF5 '{}' table needs the `hdf5` feature",
            DATASET
        ),
    ))
}

#[cfg(feature = "hdf5")]
mod enabled {
    use super::*;

    /// Compound members are matched by name, so extra members in the file
    /// are skipped and single-precision members are widened.
    #[derive(hdf5::H5Type, Clone, Copy, Debug)]
    #[repr(C)]
    pub(crate) struct TriggerRow {
        pub time: f64,
        pub frequency: f64,
        pub tstart: f64,
        pub tend: f64,
        pub fstart: f64,
        pub fend: f64,
        pub snr: f64,
        pub q: f64,
        pub amplitude: f64,
        pub phase: f64,
    }

    impl From<TriggerRow> for EventRecord {
        fn from(row: TriggerRow) -> Self {
            EventRecord {
                time: row.time,
                frequency: row.frequency,
                tstart: row.tstart,
                tend: row.tend,
                fstart: row.fstart,
                fend: row.fend,
                snr: row.snr,
                q: row.q,
                amplitude: row.amplitude,
                phase: row.phase,
            }
        }
    }

    pub(crate) fn read_triggers(path: &Path) -> Result<Vec<EventRecord>, TriageError> {
        let file = hdf5::File::open(path).map_err(|e| TriageError::fragment(path, e))?;
        let dataset = file
            .dataset(DATASET)
            .map_err(|e| TriageError::fragment(path, format!("dataset '{}': {}", DATASET, e)))?;
        let rows = dataset
            .read_raw::<TriggerRow>()
            .map_err(|e| TriageError::fragment(path, e))?;
        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

}
