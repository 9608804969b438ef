//! Locate, filter and merge archived Omicron glitch triggers for a channel and
//! time window.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod archive;
mod h5;
pub mod merge;
pub mod table;
pub mod tiers;

pub use archive::{load, load_all, locate, DirectoryArchive, Fragment, TriggerArchive};
pub use merge::{merge, MergeStats, TriggerTable};
pub use table::{plot_path, table_path, write_table, TableSummary};
pub use tiers::{derive_tiers, elapsed_label, quality_axis, select, time_ticks, Tier};

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("failed to read fragment {}: {reason}", path.display())]
    FragmentRead { path: PathBuf, reason: String },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TriageError {
    pub(crate) fn fragment(path: &Path, reason: impl ToString) -> Self {
        TriageError::FragmentRead {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        TriageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One Omicron trigger. Field order is the on-disk column order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
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

impl EventRecord {
    pub const COLUMNS: [&'static str; 10] = [
        "time",
        "frequency",
        "tstart",
        "tend",
        "fstart",
        "fend",
        "snr",
        "q",
        "amplitude",
        "phase",
    ];

    pub fn values(&self) -> [f64; 10] {
        [
            self.time,
            self.frequency,
            self.tstart,
            self.tend,
            self.fstart,
            self.fend,
            self.snr,
            self.q,
            self.amplitude,
            self.phase,
        ]
    }

    /// Checks that every field is finite and the time extent is ordered.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in Self::COLUMNS.iter().zip(self.values()) {
            if !value.is_finite() {
                return Err(format!("field '{}' is not finite ({})", name, value));
            }
        }
        if self.tstart > self.tend {
            return Err(format!(
                "tstart {} is after tend {}",
                self.tstart, self.tend
            ));
        }
        Ok(())
    }
}

/// A validated trigger query. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    ifo: String,
    channel: String,
    window_start: f64,
    window_end: f64,
    min_snr: f64,
}

impl Query {
    pub fn new(
        ifo: impl Into<String>,
        channel: impl Into<String>,
        window_start: f64,
        window_end: f64,
        min_snr: f64,
    ) -> Result<Self, TriageError> {
        let ifo = ifo.into();
        let channel = channel.into();
        if ifo.trim().is_empty() {
            return Err(TriageError::InvalidQuery("ifo must not be empty".into()));
        }
        if channel.trim().is_empty() {
            return Err(TriageError::InvalidQuery(
                "channel must not be empty".into(),
            ));
        }
        if !window_start.is_finite() || !window_end.is_finite() {
            return Err(TriageError::InvalidQuery(format!(
                "window bounds must be finite ({}, {})",
                window_start, window_end
            )));
        }
        if window_start >= window_end {
            return Err(TriageError::InvalidQuery(format!(
                "window start {} must be before end {}",
                window_start, window_end
            )));
        }
        if !min_snr.is_finite() || min_snr < 0.0 {
            return Err(TriageError::InvalidQuery(format!(
                "minimum SNR must be a non-negative number, got {}",
                min_snr
            )));
        }
        Ok(Self {
            ifo,
            channel,
            window_start,
            window_end,
            min_snr,
        })
    }

    pub fn ifo(&self) -> &str {
        &self.ifo
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn window_start(&self) -> f64 {
        self.window_start
    }

    pub fn window_end(&self) -> f64 {
        self.window_end
    }

    pub fn min_snr(&self) -> f64 {
        self.min_snr
    }

    pub fn duration(&self) -> f64 {
        self.window_end - self.window_start
    }

    /// Whether a trigger's full extent lies in `[start, end)` with enough SNR.
    pub fn accepts(&self, record: &EventRecord) -> bool {
        record.tstart >= self.window_start
            && record.tend < self.window_end
            && record.snr >= self.min_snr
    }

    /// Output naming stem, e.g. `LSC_REFL_A_LF_OUT_DQ-snr_5d0-start_100-end_200`.
    pub fn tag(&self) -> String {
        format!(
            "{}-snr_{}-start_{}-end_{}",
            self.channel,
            format!("{:?}", self.min_snr).replace('.', "d"),
            self.window_start,
            self.window_end
        )
    }
}

/// Non-query knobs for rendering. Every field falls back to its default when
/// absent from a JSON config file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub tier_offsets: Vec<f64>,
    pub tier_colors: Vec<[u8; 3]>,
    pub snr_floor: f64,
    pub fallback_exponent: i32,
    pub tick_count: usize,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            tier_offsets: vec![0.0, 8.0, 16.0, 32.0],
            tier_colors: vec![[0, 128, 0], [255, 0, 255], [0, 0, 255], [255, 0, 0]],
            snr_floor: 4.0,
            fallback_exponent: 4,
            tick_count: 9,
            image_width: 1920,
            image_height: 1440,
        }
    }
}

impl Params {
    pub fn from_json_str(text: &str) -> Result<Self, TriageError> {
        let params: Params =
            serde_json::from_str(text).map_err(|e| TriageError::InvalidConfig(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn load(path: &Path) -> Result<Self, TriageError> {
        let text = fs::read_to_string(path).map_err(|e| TriageError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), TriageError> {
        if self.tier_offsets.is_empty() {
            return Err(TriageError::InvalidConfig(
                "tier_offsets must not be empty".into(),
            ));
        }
        if self.tier_colors.is_empty() {
            return Err(TriageError::InvalidConfig(
                "tier_colors must not be empty".into(),
            ));
        }
        if self
            .tier_offsets
            .iter()
            .any(|offset| !offset.is_finite() || *offset < 0.0)
        {
            return Err(TriageError::InvalidConfig(
                "tier_offsets must be finite and non-negative".into(),
            ));
        }
        if !(self.snr_floor.is_finite() && self.snr_floor > 0.0) {
            return Err(TriageError::InvalidConfig(format!(
                "snr_floor must be positive, got {}",
                self.snr_floor
            )));
        }
        if self.tick_count < 2 {
            return Err(TriageError::InvalidConfig(
                "tick_count must be at least 2".into(),
            ));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(TriageError::InvalidConfig(
                "image dimensions must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Locate, load and merge the triggers for one query. Any unreadable
/// fragment aborts the whole build.
pub fn build_table<A: TriggerArchive + ?Sized>(
    archive: &A,
    query: &Query,
) -> Result<(TriggerTable, MergeStats), TriageError> {
    let fragments = locate(archive, query)?;
    let loaded = load_all(archive, fragments)?;
    Ok(merge(query, loaded))
}
