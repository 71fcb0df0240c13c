//! Reading a crawled year back as one flat list.
//!
//! Records come out depth-first in page order: each entry is followed by its
//! whole subtree before the next sibling, the same order the walker visits
//! them in.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::error::{HarvesterError, Result};
use crate::types::{DivisionNode, Level};
use crate::writer::{find_level_file, read_records};

/// Load every record of the year stored in `year_dir`.
pub fn load_year(year_dir: &Path) -> Result<Vec<DivisionNode>> {
    let index = year_dir.join(Level::Province.file_name());
    if !index.is_file() {
        return Err(HarvesterError::filesystem(
            &index,
            std::io::Error::new(std::io::ErrorKind::NotFound, "year has not been crawled"),
        ));
    }

    let mut records = Vec::new();
    collect(year_dir, &mut records)?;
    Ok(records)
}

fn collect(dir: &Path, records: &mut Vec<DivisionNode>) -> Result<()> {
    let Some((_, path)) = find_level_file(dir) else {
        return Ok(());
    };

    for node in read_records(&path)? {
        let child_dir = dir.join(&node.code);
        records.push(node);
        if child_dir.is_dir() {
            collect(&child_dir, records)?;
        }
    }
    Ok(())
}

/// Write records as JSON Lines.
pub fn write_jsonl<W: Write>(records: &[DivisionNode], mut out: W) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut out, record).map_err(std::io::Error::other)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Number of records per level.
pub fn count_by_level(records: &[DivisionNode]) -> BTreeMap<Level, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.level).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::write_level;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_load_year_is_depth_first() {
        let dir = tempdir().unwrap();
        let year = dir.path();

        write_level(
            year,
            Level::Province,
            &[
                DivisionNode::new("110000", "北京市", Level::Province),
                DivisionNode::new("120000", "天津市", Level::Province),
            ],
        )
        .unwrap();
        write_level(
            &year.join("110000"),
            Level::City,
            &[DivisionNode::new("110100", "市辖区", Level::City).with_parent_code("110000")],
        )
        .unwrap();
        write_level(
            &year.join("120000"),
            Level::City,
            &[DivisionNode::new("120100", "市辖区", Level::City).with_parent_code("120000")],
        )
        .unwrap();

        let codes: Vec<String> = load_year(year).unwrap().into_iter().map(|n| n.code).collect();
        assert_eq!(codes, vec!["110000", "110100", "120000", "120100"]);
    }

    #[test]
    fn test_load_year_requires_index() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_year(dir.path()),
            Err(HarvesterError::Filesystem { .. })
        ));
    }

    #[test]
    fn test_write_jsonl_and_counts() {
        let records = vec![
            DivisionNode::new("110000", "北京市", Level::Province),
            DivisionNode::new("110100", "市辖区", Level::City).with_parent_code("110000"),
            DivisionNode::new("120100", "市辖区", Level::City).with_parent_code("120000"),
        ];

        let mut out = Vec::new();
        write_jsonl(&records, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 3);

        let counts = count_by_level(&records);
        assert_eq!(counts.get(&Level::Province), Some(&1));
        assert_eq!(counts.get(&Level::City), Some(&2));
        assert_eq!(counts.get(&Level::Village), None);
    }
}
