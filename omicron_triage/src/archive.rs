//! Discovery and loading of time-partitioned trigger fragments.

use std::path::{Path, PathBuf};
use std::time::Instant;

use glob::{glob, Pattern};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{h5, EventRecord, Query, TriageError};

/// One archived trigger file covering `[range_min, range_max)` seconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub path: PathBuf,
    pub range_min: i64,
    pub range_max: i64,
}

impl Fragment {
    /// Parses `...-{start}-{duration}.{ext}` from the file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let stem = path.file_stem()?.to_str()?;
        let mut parts = stem.rsplitn(3, '-');
        let duration: i64 = parts.next()?.parse().ok()?;
        let range_min: i64 = parts.next()?.parse().ok()?;
        // The prefix (ifo + channel) must be present for the name to be a fragment.
        parts.next().filter(|prefix| !prefix.is_empty())?;
        let range_max = range_min.checked_add(duration)?;
        Some(Self {
            path,
            range_min,
            range_max,
        })
    }

    /// Upper bound is compared inclusively, lower bound exclusively.
    pub fn overlaps(&self, window_start: f64, window_end: f64) -> bool {
        self.range_max as f64 >= window_start && (self.range_min as f64) < window_end
    }
}

/// Where fragments come from. Implementations must return fragments in a
/// deterministic order; that order is the merge tie-break.
pub trait TriggerArchive: Sync {
    fn enumerate(&self, ifo: &str, channel: &str) -> Result<Vec<Fragment>, TriageError>;
    fn read(&self, fragment: &Fragment) -> Result<Vec<EventRecord>, TriageError>;
}

/// File kinds Omicron leaves in the archive.
const FRAGMENT_EXTENSIONS: [&str; 2] = ["h5", "csv"];

/// The detchar trigger tree:
/// `{root}/{ifo}/{channel}_OMICRON/*/{ifo}-{channel}_OMICRON-{start}-{duration}.{h5,csv}`.
#[derive(Clone, Debug)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pattern(&self, ifo: &str, channel: &str, extension: &str) -> String {
        let root = Pattern::escape(&self.root.to_string_lossy());
        let ifo = Pattern::escape(ifo);
        let channel = Pattern::escape(channel);
        format!(
            "{root}/{ifo}/{channel}_OMICRON/*/{ifo}-{channel}_OMICRON-*.{ext}",
            root = root.trim_end_matches('/'),
            ifo = ifo,
            channel = channel,
            ext = extension
        )
    }
}

impl TriggerArchive for DirectoryArchive {
    /// A missing root or channel directory yields no fragments. Any directory
    /// that exists but cannot be listed is an error.
    fn enumerate(&self, ifo: &str, channel: &str) -> Result<Vec<Fragment>, TriageError> {
        let mut fragments = Vec::new();
        for extension in FRAGMENT_EXTENSIONS {
            let pattern = self.pattern(ifo, channel, extension);
            let entries = glob(&pattern)
                .map_err(|e| TriageError::InvalidQuery(format!("bad archive pattern: {}", e)))?;
            for entry in entries {
                let path = entry.map_err(|e| TriageError::fragment(e.path(), e.error()))?;
                match Fragment::from_path(&path) {
                    Some(fragment) => fragments.push(fragment),
                    None => warn!(path = %path.display(), "Skipping file without a time range"),
                }
            }
        }
        fragments.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(fragments)
    }

    fn read(&self, fragment: &Fragment) -> Result<Vec<EventRecord>, TriageError> {
        let path = &fragment.path;
        let records = match path.extension().and_then(|e| e.to_str()) {
            Some("h5") => h5::read_triggers(path)?,
            _ => read_csv(path)?,
        };
        for (row, record) in records.iter().enumerate() {
            record.validate().map_err(|reason| {
                TriageError::fragment(path, format!("row {}: {}", row + 1, reason))
            })?;
        }
        Ok(records)
    }
}

fn read_csv(path: &Path) -> Result<Vec<EventRecord>, TriageError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| TriageError::fragment(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| TriageError::fragment(path, e))?
        .clone();
    if let Some(missing) = EventRecord::COLUMNS
        .iter()
        .find(|column| !headers.iter().any(|h| h == **column))
    {
        return Err(TriageError::fragment(
            path,
            format!("missing column '{}'", missing),
        ));
    }

    reader
        .deserialize::<EventRecord>()
        .map(|result| result.map_err(|e| TriageError::fragment(path, e)))
        .collect()
}

/// Fragments of the query's channel whose span overlaps the window, in
/// discovery order.
pub fn locate<A: TriggerArchive + ?Sized>(
    archive: &A,
    query: &Query,
) -> Result<Vec<Fragment>, TriageError> {
    let all = archive.enumerate(query.ifo(), query.channel())?;
    let total = all.len();
    let selected: Vec<Fragment> = all
        .into_iter()
        .filter(|f| f.overlaps(query.window_start(), query.window_end()))
        .collect();
    debug!(
        total,
        selected = selected.len(),
        channel = query.channel(),
        "Located fragments"
    );
    Ok(selected)
}

pub fn load<A: TriggerArchive + ?Sized>(
    archive: &A,
    fragment: &Fragment,
) -> Result<Vec<EventRecord>, TriageError> {
    let records = archive.read(fragment)?;
    debug!(path = %fragment.path.display(), records = records.len(), "Loaded fragment");
    Ok(records)
}

/// Loads fragments in parallel and returns them in the order given.
pub fn load_all<A: TriggerArchive + ?Sized>(
    archive: &A,
    fragments: Vec<Fragment>,
) -> Result<Vec<(Fragment, Vec<EventRecord>)>, TriageError> {
    let t_load = Instant::now();
    let indexed: Vec<(usize, Fragment)> = fragments.into_iter().enumerate().collect();

    let mut loaded: Vec<(usize, Fragment, Vec<EventRecord>)> = indexed
        .into_par_iter()
        .map(
            |(idx, fragment)| -> Result<(usize, Fragment, Vec<EventRecord>), TriageError> {
                let records = load(archive, &fragment)?;
                Ok((idx, fragment, records))
            },
        )
        .collect::<Result<Vec<_>, TriageError>>()?;

    // Restore locator order
    loaded.sort_by_key(|(idx, _, _)| *idx);
    debug!(
        fragments = loaded.len(),
        "Load stage: {:.1} ms",
        t_load.elapsed().as_secs_f64() * 1000.0
    );
    Ok(loaded
        .into_iter()
        .map(|(_, fragment, records)| (fragment, records))
        .collect())
}
