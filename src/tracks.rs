//! Per-read annotation tracks
//!
//! A track file holds one line per entry, keyed by read id. The segment
//! quality track carries `ceil(L/W)` values per read; interval tracks carry
//! half-open `[begin, end)` intervals. Track `name` for database `reads.fasta`
//! lives in `reads.<name>.track`.

use crate::read_db::ReadDb;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

pub const TRACK_Q: &str = "q";
pub const TRACK_DUST: &str = "dust";

/// Path of track `name` next to the database
pub fn track_path(db_path: &str, name: &str) -> String {
    Path::new(db_path)
        .with_extension(format!("{}.track", name))
        .to_string_lossy()
        .into_owned()
}

fn open_track(path: &str) -> io::Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("Failed to open track '{}': {}", path, e)))?;
    Ok(BufReader::new(file))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Per-segment quality values for every read; 0 is the "no data" sentinel
pub struct QualityTrack {
    per_read: Vec<Vec<u16>>,
}

impl QualityTrack {
    /// Load and validate: every read needs exactly `ceil(L/W)` values.
    pub fn load(path: &str, db: &ReadDb, twidth: i32) -> io::Result<Self> {
        let reader = open_track(path)?;
        let mut per_read: Vec<Option<Vec<u16>>> = vec![None; db.len()];

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (id, values) = line
                .split_once('\t')
                .ok_or_else(|| invalid(format!("'{}': expected 'read<TAB>values': '{}'", path, line)))?;
            let id: usize = id
                .parse()
                .map_err(|e| invalid(format!("'{}': invalid read id '{}': {}", path, id, e)))?;
            if id >= db.len() {
                return Err(invalid(format!(
                    "'{}': read {} beyond database size {}",
                    path,
                    id,
                    db.len()
                )));
            }
            let parsed: Result<Vec<u16>, _> = values.split(',').map(|v| v.trim().parse()).collect();
            let parsed = parsed
                .map_err(|e| invalid(format!("'{}': invalid quality value for read {}: {}", path, id, e)))?;
            per_read[id] = Some(parsed);
        }

        let mut out = Vec::with_capacity(db.len());
        for id in 0..db.len() {
            let expected = (db.read_len(id as i32) + twidth - 1) / twidth;
            let values = per_read[id].take().unwrap_or_default();
            if values.len() as i32 != expected {
                return Err(invalid(format!(
                    "read {} expected {} quality segments, found {}",
                    id,
                    expected,
                    values.len()
                )));
            }
            out.push(values);
        }

        Ok(QualityTrack { per_read: out })
    }

    #[cfg(test)]
    pub(crate) fn from_values(per_read: Vec<Vec<u16>>) -> Self {
        QualityTrack { per_read }
    }

    pub fn segments(&self, id: i32) -> &[u16] {
        &self.per_read[id as usize]
    }
}

/// Half-open intervals per read, in file order
pub struct IntervalTrack {
    name: String,
    per_read: FxHashMap<i32, Vec<(i32, i32)>>,
}

impl IntervalTrack {
    /// Load intervals; with `check_bounds` every interval must lie inside its
    /// read and not be inverted.
    pub fn load(path: &str, name: &str, db: &ReadDb, check_bounds: bool) -> io::Result<Self> {
        let reader = open_track(path)?;
        let mut per_read: FxHashMap<i32, Vec<(i32, i32)>> = FxHashMap::default();

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 3 {
                return Err(invalid(format!(
                    "'{}': expected 'read<TAB>begin<TAB>end': '{}'",
                    path, line
                )));
            }
            let id: i32 = fields[0]
                .parse()
                .map_err(|e| invalid(format!("'{}': invalid read id '{}': {}", path, fields[0], e)))?;
            let b: i32 = fields[1]
                .parse()
                .map_err(|e| invalid(format!("'{}': invalid begin '{}': {}", path, fields[1], e)))?;
            let e: i32 = fields[2]
                .parse()
                .map_err(|e| invalid(format!("'{}': invalid end '{}': {}", path, fields[2], e)))?;
            if id < 0 || id as usize >= db.len() {
                return Err(invalid(format!(
                    "'{}': read {} beyond database size {}",
                    path,
                    id,
                    db.len()
                )));
            }
            if check_bounds {
                let len = db.read_len(id);
                if b < 0 || b > len || b > e || e > len {
                    return Err(invalid(format!(
                        "{} interval {}..{} outside read length {}",
                        name, b, e, len
                    )));
                }
            }
            per_read.entry(id).or_default().push((b, e));
        }

        Ok(IntervalTrack {
            name: name.to_string(),
            per_read,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_intervals(name: &str, per_read: Vec<(i32, Vec<(i32, i32)>)>) -> Self {
        IntervalTrack {
            name: name.to_string(),
            per_read: per_read.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intervals(&self, id: i32) -> &[(i32, i32)] {
        self.per_read.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The tracks one repair pass consumes
pub struct TrackSet {
    pub q: QualityTrack,
    pub dust: IntervalTrack,
    pub trim: Option<IntervalTrack>,
    pub user: Vec<IntervalTrack>,
}

impl TrackSet {
    pub fn load(
        db_path: &str,
        db: &ReadDb,
        twidth: i32,
        trim_name: Option<&str>,
        user_names: &[String],
    ) -> io::Result<Self> {
        let q = QualityTrack::load(&track_path(db_path, TRACK_Q), db, twidth)?;
        let dust = IntervalTrack::load(&track_path(db_path, TRACK_DUST), TRACK_DUST, db, true)?;
        let trim = match trim_name {
            Some(name) => Some(IntervalTrack::load(&track_path(db_path, name), name, db, true)?),
            None => None,
        };
        let mut user = Vec::with_capacity(user_names.len());
        for name in user_names {
            user.push(IntervalTrack::load(&track_path(db_path, name), name, db, false)?);
        }
        Ok(TrackSet { q, dust, trim, user })
    }

    /// Trim window of a read: its first trim interval, the whole read when no
    /// trim track is in play, empty when the track has no entry for it.
    pub fn trim_window(&self, id: i32, read_len: i32) -> (i32, i32) {
        match &self.trim {
            Some(track) => track.intervals(id).first().copied().unwrap_or((0, 0)),
            None => (0, read_len),
        }
    }
}
