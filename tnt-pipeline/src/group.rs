//! The group level: all per-scan statistics tables in one table.
//!
//! Every `*_stats.tsv` below the output folder contributes one cell per
//! `(label name, statistic)` to the row of its scan. Columns are named
//! `<desc>_<name>_<stat>` and appear in the order they are first seen,
//! scanning files in path order. Cells a scan has no value for are `n/a`.

use crate::bids::{BidsFilename, EntityDescriptor};
use crate::errors::PipelineError;
use crate::naming::OutputResolver;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Placeholder of a missing cell.
pub const MISSING: &str = "n/a";

const ENTITY_COLUMNS: [&str; 5] = ["subject", "session", "acquisition", "reconstruction", "run"];

/// Directories of the output folder never searched for tables.
const SKIPPED_DIRS: [&str; 2] = ["group", "logs"];

/// One row of a statistics table: a label name and its statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRow {
    /// Label name.
    pub name: String,
    /// `(statistic, value)` in column order.
    pub values: Vec<(String, String)>,
}

/// Parses a per-scan statistics table. The `name` column is required; the
/// `index` column is ignored; every other column is a statistic.
pub fn parse_stats_table(text: &str, path: &Path) -> Result<Vec<StatsRow>, PipelineError> {
    let malformed = |reason: String| PipelineError::MalformedStatsTable {
        path: path.to_path_buf(),
        reason,
    };
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r')).filter(|l| !l.is_empty());
    let header: Vec<&str> = lines.next().ok_or_else(|| malformed("empty table".into()))?.split('\t').collect();
    let name_col = header
        .iter()
        .position(|c| *c == "name")
        .ok_or_else(|| malformed("no name column".into()))?;
    let stat_cols: Vec<(usize, &str)> = header
        .iter()
        .enumerate()
        .filter(|(i, c)| *i != name_col && **c != "index")
        .map(|(i, c)| (i, *c))
        .collect();

    lines
        .enumerate()
        .map(|(n, line)| {
            let cells: Vec<&str> = line.split('\t').collect();
            if cells.len() != header.len() {
                return Err(malformed(format!(
                    "line {} has {} cells, expected {}",
                    n + 2,
                    cells.len(),
                    header.len()
                )));
            }
            Ok(StatsRow {
                name: cells[name_col].to_string(),
                values: stat_cols
                    .iter()
                    .map(|(i, stat)| ((*stat).to_string(), cells[*i].to_string()))
                    .collect(),
            })
        })
        .collect()
}

/// Finds every statistics table below `root`, sorted by path.
pub fn find_stats_tables(root: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            if path.is_dir() {
                if !(dir == root && SKIPPED_DIRS.contains(&name.as_str())) {
                    stack.push(path);
                }
            } else if BidsFilename::parse(&name).is_some_and(|f| f.suffix == "stats" && f.extension == "tsv") {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Statistics of every scan, one row per scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupTable {
    columns: Vec<String>,
    known: HashSet<String>,
    rows: BTreeMap<EntityDescriptor, HashMap<String, String>>,
}

impl GroupTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the rows of one statistics table of `entities`. `desc`, when
    /// present, prefixes the column names.
    pub fn add(&mut self, entities: &EntityDescriptor, desc: Option<&str>, rows: &[StatsRow]) {
        let cells = self.rows.entry(entities.clone()).or_default();
        for row in rows {
            for (stat, value) in &row.values {
                let column = match desc {
                    Some(desc) => format!("{desc}_{}_{stat}", row.name),
                    None => format!("{}_{stat}", row.name),
                };
                if self.known.insert(column.clone()) {
                    self.columns.push(column.clone());
                }
                if cells.insert(column.clone(), value.clone()).is_some() {
                    warn!(scan = %entities, column = %column, "Duplicate statistic, keeping the last value");
                }
            }
        }
    }

    /// Statistic columns in first-seen order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of scans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no scan was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell of `entities` in `column`.
    #[must_use]
    pub fn get(&self, entities: &EntityDescriptor, column: &str) -> Option<&str> {
        self.rows.get(entities)?.get(column).map(String::as_str)
    }

    /// Tab separated form, rows sorted by entities.
    #[must_use]
    pub fn to_tsv(&self) -> String {
        let mut out = ENTITY_COLUMNS
            .iter()
            .copied()
            .chain(self.columns.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\t");
        out.push('\n');
        for (entities, cells) in &self.rows {
            let keys = [
                Some(entities.subject.as_str()),
                entities.session.as_deref(),
                entities.acquisition.as_deref(),
                entities.reconstruction.as_deref(),
                entities.run.as_deref(),
            ];
            let line: Vec<&str> = keys
                .into_iter()
                .map(|k| k.unwrap_or(MISSING))
                .chain(self.columns.iter().map(|c| cells.get(c).map_or(MISSING, String::as_str)))
                .collect();
            out.push_str(&line.join("\t"));
            out.push('\n');
        }
        out
    }
}

/// Reads every statistics table below `output`.
pub fn collect_group_table(output: &Path) -> Result<GroupTable, PipelineError> {
    let mut table = GroupTable::new();
    for path in find_stats_tables(output)? {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let Some(parsed) = BidsFilename::parse(&name) else {
            continue;
        };
        let Some(entities) = parsed.entities() else {
            warn!(path = %path.display(), "Statistics table without subject, skipping");
            continue;
        };
        let rows = parse_stats_table(&std::fs::read_to_string(&path)?, &path)?;
        debug!(path = %path.display(), rows = rows.len(), "Read statistics table");
        table.add(&entities, parsed.get("desc"), &rows);
    }
    Ok(table)
}

/// Writes the group table of `output` to `<output>/group/group.tsv`.
pub fn run_group(output: &Path) -> Result<PathBuf, PipelineError> {
    let table = collect_group_table(output)?;
    if table.is_empty() {
        return Err(PipelineError::InvalidOption(format!(
            "no statistics tables found below {}",
            output.display()
        )));
    }
    let dest = OutputResolver::new(output).group_table();
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dest, table.to_tsv())?;
    info!(scans = table.len(), columns = table.columns().len(), dest = %dest.display(), "Wrote group table");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_parse_stats_table() {
        let rows = parse_stats_table(
            "index\tname\tvolume\tmean\n1\tGM\t4\t15\n3\tCSF\t0\tn/a\n",
            Path::new("t.tsv"),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "CSF");
        assert_eq!(
            rows[1].values,
            vec![("volume".to_string(), "0".to_string()), ("mean".to_string(), "n/a".to_string())]
        );
        assert!(parse_stats_table("index\tvolume\n1\t2\n", Path::new("t.tsv")).is_err());
        assert!(matches!(
            parse_stats_table("name\tvolume\nGM\n", Path::new("t.tsv")),
            Err(PipelineError::MalformedStatsTable { ref reason, .. }) if reason.contains("line 2")
        ));
    }

    #[test]
    fn test_group_table() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path();
        write(out, "sub-1/anat/sub-1_desc-brain_stats.tsv", "index\tname\tvolume\tmean\n1\tbrain\t10\t2.5\n");
        write(out, "sub-1/anat/sub-1_desc-ICV_stats.tsv", "index\tname\tvolume\n1\tICV\t12\n");
        write(out, "sub-2/ses-a/anat/sub-2_ses-a_desc-brain_stats.tsv", "index\tname\tvolume\tmean\n1\tbrain\t11\t3\n");
        write(out, "sub-2/ses-a/anat/sub-2_ses-a_desc-brain_mask.nii.gz", "not a table");
        write(out, "group/old_stats.tsv", "broken");
        write(out, "logs/sub-1/crash.txt", "crash");

        let dest = run_group(out).unwrap();
        assert_eq!(dest, out.join("group").join("group.tsv"));
        assert_eq!(
            std::fs::read_to_string(dest).unwrap(),
            "subject\tsession\tacquisition\treconstruction\trun\tICV_ICV_volume\tbrain_brain_volume\tbrain_brain_mean\n\
             1\tn/a\tn/a\tn/a\tn/a\t12\t10\t2.5\n\
             2\ta\tn/a\tn/a\tn/a\tn/a\t11\t3\n"
        );
    }

    #[test]
    fn test_empty_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_group(dir.path()).is_err());
        assert!(!dir.path().join("group").exists());
    }
}
