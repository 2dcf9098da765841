// 📅 Competence Period - which quarter a figure belongs to
// ANS publishes one statement file per quarter under a year directory
// (e.g. `2023/1T2023.csv`). The period of every row comes from that
// partition layout, never from any date column inside the file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A year/quarter bucket. Ordering is chronological (year first).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Period {
    pub year: i32,
    pub quarter: u8,
}

impl Period {
    pub fn new(year: i32, quarter: u8) -> Self {
        Period { year, quarter }
    }

    /// Derive the period from a partitioned statement path.
    ///
    /// The quarter is the leading `1T`..`4T` marker of the file stem. The
    /// year is the parent directory name when that is a 4-digit number,
    /// otherwise the 4-digit run inside the stem itself (`1T2023`).
    pub fn from_partition(path: &Path) -> Option<Period> {
        let stem = path.file_stem()?.to_str()?;
        let quarter = quarter_marker(stem)?;

        let year_from_dir = path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .and_then(four_digit_year);

        let year = match year_from_dir {
            Some(year) => year,
            None => year_in_stem(stem)?,
        };

        Some(Period { year, quarter })
    }

    /// Canonical label in the ANS file-naming convention, e.g. `1T2023`.
    pub fn label(&self) -> String {
        format!("{}T{}", self.quarter, self.year)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.quarter, self.year)
    }
}

/// Leading `NT`/`Nt` marker of a file stem, N in 1..=4.
fn quarter_marker(stem: &str) -> Option<u8> {
    let mut chars = stem.chars();
    let quarter = chars.next()?.to_digit(10)? as u8;
    let marker = chars.next()?;
    if (1..=4).contains(&quarter) && (marker == 'T' || marker == 't') {
        Some(quarter)
    } else {
        None
    }
}

fn four_digit_year(name: &str) -> Option<i32> {
    if name.len() == 4 && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

/// First run of exactly four consecutive digits in the stem.
fn year_in_stem(stem: &str) -> Option<i32> {
    let bytes = stem.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                return stem[start..i].parse().ok();
            }
        } else {
            i += 1;
        }
    }
    None
}
