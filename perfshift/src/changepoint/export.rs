//! Serialized and tabular views of a [`ChangePointSet`].
//!
//! The JSON export writes a copy sorted most-impactful first, so the live set
//! keeps its order. The summary table has one row per revision in series
//! order with a zero-filled counter per change point type.

use serde::Serialize;
use std::io::Write;

use super::kind::ChangePointType;
use super::set::ChangePointSet;
use crate::error::{ErrorContext, Result};
use crate::series::SeriesSet;

const CSV_SEPARATOR: char = ';';

/// Writes the set as a JSON array of `{revision, type, tests}` records,
/// most affected tests first, indented with four spaces.
pub fn write_json<W: Write>(set: &ChangePointSet, writer: W) -> Result<()> {
    let sorted = set.sorted_by_impact();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
    sorted.serialize(&mut serializer)?;
    Ok(())
}

/// Renders [`write_json`] output into a string.
pub fn to_json_string(set: &ChangePointSet) -> Result<String> {
    let mut buffer = Vec::new();
    write_json(set, &mut buffer)?;
    String::from_utf8(buffer).context("change point JSON is not valid UTF-8")
}

/// Affected-test counts per change point type for one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSummary {
    pub revision: String,
    /// Indexed by [`ChangePointType::index`].
    pub counts: Vec<usize>,
}

impl RevisionSummary {
    fn empty(revision: &str) -> Self {
        Self {
            revision: revision.to_string(),
            counts: vec![0; ChangePointType::all().len()],
        }
    }

    /// Count for a single type.
    pub fn count(&self, change_type: ChangePointType) -> usize {
        self.counts.get(change_type.index()).copied().unwrap_or(0)
    }

    /// Sum over every type.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Builds one summary row per revision. Revisions without detections get
/// all-zero rows; detections at revisions missing from `revisions` are
/// appended after them in set order.
pub fn summarize(set: &ChangePointSet, revisions: &[String]) -> Vec<RevisionSummary> {
    let mut rows: Vec<RevisionSummary> = revisions
        .iter()
        .map(|r| RevisionSummary::empty(r))
        .collect();

    for cp in set.all() {
        let row = match rows.iter().position(|row| row.revision == cp.revision()) {
            Some(index) => &mut rows[index],
            None => {
                rows.push(RevisionSummary::empty(cp.revision()));
                let last = rows.len() - 1;
                &mut rows[last]
            }
        };
        row.counts[cp.change_type().index()] += cp.test_count();
    }

    rows
}

/// Writes the summary as `;`-separated rows with a header line.
pub fn write_summary_csv<W: Write>(rows: &[RevisionSummary], mut writer: W) -> Result<()> {
    let mut header = vec!["revision".to_string()];
    header.extend(ChangePointType::all().iter().map(ChangePointType::label));
    writeln!(writer, "{}", header.join(&CSV_SEPARATOR.to_string()))?;

    for row in rows {
        let mut fields = vec![row.revision.clone()];
        fields.extend(row.counts.iter().map(usize::to_string));
        writeln!(writer, "{}", fields.join(&CSV_SEPARATOR.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Reference revision order for a set: the revision list of its longest
/// series.
pub fn revision_order(set: &SeriesSet) -> Vec<String> {
    set.iter()
        .map(|series| series.revisions())
        .reduce(|longest, revisions| {
            if revisions.len() > longest.len() {
                revisions
            } else {
                longest
            }
        })
        .map(<[String]>::to_vec)
        .unwrap_or_default()
}
