//! Daily-init persistence
//!
//! Two-line whitespace-separated text file per strategy id:
//!
//! ```text
//! StrategyID 2day avgPx m_origbaseName1 m_origbaseName2 ytd1 ytd2
//! 92201 0 96.671581 ag2603 ag2605 83 -83
//! ```
//!
//! A row belongs to the strategy whose id is in its first column. The other
//! values are looked up by header name, so files with reordered or extra
//! columns still load.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::core::LegId;

pub const HEADER: [&str; 7] = [
    "StrategyID",
    "2day",
    "avgPx",
    "m_origbaseName1",
    "m_origbaseName2",
    "ytd1",
    "ytd2",
];

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed daily-init file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("no row for strategy {strategy_id} in {path}")]
    NotFound { strategy_id: i32, path: PathBuf },

    #[error("{leg} alias mismatch: configured {expected:?}, file has {found:?}")]
    AliasMismatch {
        leg: LegId,
        expected: String,
        found: String,
    },
}

/// Durable snapshot of one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyInitRecord {
    pub strategy_id: i32,
    /// `2day`: intraday position, always written as 0
    pub intraday_position: i64,
    /// `avgPx`: spread origin
    pub avg_px: f64,
    pub leg1_alias: String,
    pub leg2_alias: String,
    /// `ytd1` / `ytd2`: prior-day positions
    pub leg1_ytd: i64,
    pub leg2_ytd: i64,
}

impl DailyInitRecord {
    /// Record for a save: current total positions become tomorrow's ytd.
    pub fn from_positions(
        strategy_id: i32,
        avg_px: f64,
        aliases: [&str; 2],
        positions: [i64; 2],
    ) -> Self {
        Self {
            strategy_id,
            intraday_position: 0,
            avg_px,
            leg1_alias: aliases[0].to_string(),
            leg2_alias: aliases[1].to_string(),
            leg1_ytd: positions[0],
            leg2_ytd: positions[1],
        }
    }

    /// Opening positions per leg. The intraday column belongs to leg 1.
    pub fn opening_positions(&self) -> [i64; 2] {
        [self.leg1_ytd + self.intraday_position, self.leg2_ytd]
    }

    pub fn alias(&self, leg: LegId) -> &str {
        match leg {
            LegId::First => &self.leg1_alias,
            LegId::Second => &self.leg2_alias,
        }
    }

    /// Fail unless the file was written for the same pair of aliases.
    pub fn check_aliases(&self, expected: [&str; 2]) -> Result<(), PersistenceError> {
        for leg in LegId::BOTH {
            let found = self.alias(leg);
            if found != expected[leg.index()] {
                return Err(PersistenceError::AliasMismatch {
                    leg,
                    expected: expected[leg.index()].to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Render the two-line artifact. Intraday is folded into `ytd1`.
    pub fn render(&self) -> String {
        format!(
            "{}\n{} 0 {:.6} {} {} {} {}\n",
            HEADER.join(" "),
            self.strategy_id,
            self.avg_px,
            self.leg1_alias,
            self.leg2_alias,
            self.leg1_ytd + self.intraday_position,
            self.leg2_ytd,
        )
    }
}

/// `<dir>/daily_init.<id>`
pub fn daily_init_path(dir: &Path, strategy_id: i32) -> PathBuf {
    dir.join(format!("daily_init.{}", strategy_id))
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write via a temp file and rename so a crash never leaves half a file.
pub fn save(path: &Path, record: &DailyInitRecord) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    fs::write(&tmp_path, record.render()).map_err(io_err(&tmp_path))?;
    fs::rename(&tmp_path, path).map_err(io_err(path))?;
    info!(
        path = %path.display(),
        id = record.strategy_id,
        avg_px = record.avg_px,
        ytd1 = record.leg1_ytd + record.intraday_position,
        ytd2 = record.leg2_ytd,
        "💾 daily init saved"
    );
    Ok(())
}

pub fn load(path: &Path, strategy_id: i32) -> Result<DailyInitRecord, PersistenceError> {
    let content = fs::read_to_string(path).map_err(io_err(path))?;
    let record = parse(&content, strategy_id, path)?;
    info!(
        path = %path.display(),
        id = strategy_id,
        avg_px = record.avg_px,
        ytd1 = record.leg1_ytd,
        ytd2 = record.leg2_ytd,
        "📂 daily init loaded"
    );
    Ok(record)
}

fn parse(
    content: &str,
    strategy_id: i32,
    path: &Path,
) -> Result<DailyInitRecord, PersistenceError> {
    let malformed = |reason: String| PersistenceError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| malformed("empty file".into()))?;
    let columns: HashMap<&str, usize> = header
        .split_whitespace()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();
    let mut index = [0usize; 7];
    for (slot, name) in index.iter_mut().zip(HEADER) {
        *slot = *columns
            .get(name)
            .ok_or_else(|| malformed(format!("missing column {}", name)))?;
    }

    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Rows are keyed by their first column whatever the header says.
        let Some(first) = fields.first() else {
            continue;
        };
        if first.parse::<i32>().ok() != Some(strategy_id) {
            debug!(row = %line, "skipping daily init row for another strategy");
            continue;
        }
        let field = |col: usize, name: &'static str| {
            fields
                .get(col)
                .copied()
                .ok_or_else(|| malformed(format!("row is missing {}", name)))
        };
        let num = |col: usize, name: &'static str| -> Result<i64, PersistenceError> {
            let raw = field(col, name)?;
            raw.parse()
                .map_err(|_| malformed(format!("{} = {:?} is not an integer", name, raw)))
        };
        let raw_avg = field(index[2], HEADER[2])?;
        let avg_px: f64 = raw_avg
            .parse()
            .map_err(|_| malformed(format!("avgPx = {:?} is not a number", raw_avg)))?;

        return Ok(DailyInitRecord {
            strategy_id,
            intraday_position: num(index[1], HEADER[1])?,
            avg_px,
            leg1_alias: field(index[3], HEADER[3])?.to_string(),
            leg2_alias: field(index[4], HEADER[4])?.to_string(),
            leg1_ytd: num(index[5], HEADER[5])?,
            leg2_ytd: num(index[6], HEADER[6])?,
        });
    }

    Err(PersistenceError::NotFound {
        strategy_id,
        path: path.to_path_buf(),
    })
}
