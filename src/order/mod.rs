//! Frame ordering resolver.
//!
//! Turns an unordered set of image paths into the deterministic sequence the assembler encodes.
//! Pure apart from the existence checks of the explicit strategy.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::Context as _;
use chrono::NaiveDate;
use regex::Regex;

use crate::foundation::error::{DatelapseError, DatelapseResult};

/// Raster formats the assembler accepts, lowercase, without the dot.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "bmp"];

static SEPARATED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})([-_.])(\d{2})([-_.])(\d{2})").expect("date regex compiles")
});
static COMPACT_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{4})(\d{2})(\d{2})(?:\D|$)").expect("compact date regex compiles")
});

/// How to order frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStrategy {
    /// `Date` when every file name carries a date, otherwise `Natural`.
    #[default]
    Auto,
    Date,
    Natural,
    /// Caller-supplied order, used verbatim.
    Explicit,
}

impl FromStr for OrderStrategy {
    type Err = DatelapseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "date" => Ok(Self::Date),
            "natural" => Ok(Self::Natural),
            "explicit" => Ok(Self::Explicit),
            other => Err(DatelapseError::config(format!(
                "unsupported order strategy '{other}' (expected auto, date, natural or explicit)"
            ))),
        }
    }
}

impl fmt::Display for OrderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Date => "date",
            Self::Natural => "natural",
            Self::Explicit => "explicit",
        })
    }
}

/// One candidate frame file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FrameRef {
    pub path: PathBuf,
    pub date: Option<NaiveDate>,
    pub file_name: String,
}

impl FrameRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let date = detect_date(&file_name);
        Self {
            path,
            date,
            file_name,
        }
    }

    fn stem(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(i) if i > 0 => &self.file_name[..i],
            _ => &self.file_name,
        }
    }
}

/// Resolved frame order.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct OrderedSequence {
    pub frames: Vec<FrameRef>,
    /// Strategy actually applied (`Auto` is resolved to `Date` or `Natural`).
    pub strategy: OrderStrategy,
    /// Inputs dropped for having an unsupported extension.
    pub excluded: Vec<PathBuf>,
}

impl OrderedSequence {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.frames.iter().map(|f| f.path.as_path())
    }
}

/// Whether `path` has one of [`SUPPORTED_EXTENSIONS`] (case-insensitive).
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// First valid calendar date in a file name: `YYYY-MM-DD` (also `_` or `.` separated) or a
/// standalone `YYYYMMDD` run.
pub fn detect_date(name: &str) -> Option<NaiveDate> {
    let ymd = |y: &str, m: &str, d: &str| {
        NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
    };
    for caps in SEPARATED_DATE.captures_iter(name) {
        if caps[2] != caps[4] {
            continue;
        }
        if let Some(date) = ymd(&caps[1], &caps[3], &caps[5]) {
            return Some(date);
        }
    }
    COMPACT_DATE
        .captures_iter(name)
        .find_map(|caps| ymd(&caps[1], &caps[2], &caps[3]))
}

/// Natural comparison: digit runs by value, other runs case-folded, so `2` < `10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ra = Runs::new(a);
    let mut rb = Runs::new(b);
    loop {
        match (ra.next(), rb.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.is_digits, y.is_digits) {
                    (true, true) => cmp_digit_runs(x.text, y.text),
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => x.text.to_lowercase().cmp(&y.text.to_lowercase()),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

struct Run<'a> {
    text: &'a str,
    is_digits: bool,
}

struct Runs<'a> {
    rest: &'a str,
}

impl<'a> Runs<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Runs<'a> {
    type Item = Run<'a>;

    fn next(&mut self) -> Option<Run<'a>> {
        let first = self.rest.chars().next()?;
        let is_digits = first.is_ascii_digit();
        let end = self
            .rest
            .find(|c: char| c.is_ascii_digit() != is_digits)
            .unwrap_or(self.rest.len());
        let (text, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(Run { text, is_digits })
    }
}

/// Order `files` under `strategy`.
///
/// `explicit` is required for [`OrderStrategy::Explicit`] and ignored otherwise. Files with an
/// unsupported extension are left out and listed in [`OrderedSequence::excluded`].
pub fn order(
    files: &[PathBuf],
    strategy: OrderStrategy,
    explicit: Option<&[PathBuf]>,
) -> DatelapseResult<OrderedSequence> {
    if strategy == OrderStrategy::Explicit {
        let list = explicit.ok_or_else(|| {
            DatelapseError::config("explicit ordering requires an explicit path list")
        })?;
        return order_explicit(list);
    }

    let (supported, excluded): (Vec<&PathBuf>, Vec<&PathBuf>) =
        files.iter().partition(|p| is_supported(p));
    let excluded: Vec<PathBuf> = excluded.into_iter().cloned().collect();
    if !excluded.is_empty() {
        tracing::warn!(count = excluded.len(), "excluding files with unsupported extensions");
    }
    let mut frames: Vec<FrameRef> = supported.into_iter().map(FrameRef::new).collect();

    let resolved = match strategy {
        OrderStrategy::Auto if frames.iter().all(|f| f.date.is_some()) => OrderStrategy::Date,
        OrderStrategy::Auto => OrderStrategy::Natural,
        other => other,
    };

    match resolved {
        OrderStrategy::Date => {
            if let Some(bad) = frames.iter().find(|f| f.date.is_none()) {
                return Err(DatelapseError::ordering(format!(
                    "no date found in file name '{}'",
                    bad.file_name
                )));
            }
            frames.sort_by(|a, b| {
                a.date
                    .cmp(&b.date)
                    .then_with(|| natural_cmp(&a.file_name, &b.file_name))
                    .then_with(|| a.path.cmp(&b.path))
            });
        }
        _ => frames.sort_by(|a, b| {
            natural_cmp(a.stem(), b.stem())
                .then_with(|| a.file_name.cmp(&b.file_name))
                .then_with(|| a.path.cmp(&b.path))
        }),
    }

    tracing::debug!(strategy = %resolved, frames = frames.len(), "ordered frames");
    Ok(OrderedSequence {
        frames,
        strategy: resolved,
        excluded,
    })
}

fn order_explicit(list: &[PathBuf]) -> DatelapseResult<OrderedSequence> {
    let mut frames = Vec::with_capacity(list.len());
    for path in list {
        if !is_supported(path) {
            return Err(DatelapseError::ordering(format!(
                "'{}' does not have a supported image extension",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(DatelapseError::ordering(format!(
                "explicit frame '{}' does not exist",
                path.display()
            )));
        }
        frames.push(FrameRef::new(path.clone()));
    }
    Ok(OrderedSequence {
        frames,
        strategy: OrderStrategy::Explicit,
        excluded: Vec::new(),
    })
}

/// Regular files directly inside `dir`, in file-name order.
pub fn scan_dir(dir: &Path) -> DatelapseResult<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read frames dir '{}'", dir.display()))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("list '{}'", dir.display()))?;
        let path = entry.path();
        if path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
#[path = "../../tests/unit/order/order.rs"]
mod tests;
