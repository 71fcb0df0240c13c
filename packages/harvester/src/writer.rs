//! Level files: one JSON Lines file per crawled page.
//!
//! The entries listed on a page are written, as they are discovered, to a
//! hidden temp file next to their final location. Committing syncs the file
//! and renames it into place, so a level file is either complete or absent.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{HarvesterError, Result};
use crate::types::{DivisionNode, Level};

/// Streaming writer for the entries of one page.
///
/// Dropping the writer without calling [`LevelWriter::commit`] removes the
/// temp file and leaves any previous level file untouched.
pub struct LevelWriter {
    file: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
    level: Level,
    count: usize,
}

impl LevelWriter {
    /// Start writing the `level` entries of the page whose output lives in `dir`.
    ///
    /// Creates `dir` and any missing parents.
    pub fn create(dir: &Path, level: Level) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| HarvesterError::filesystem(dir, e))?;

        let final_path = dir.join(level.file_name());
        let temp_path = dir.join(format!(".{}.tmp", level.file_name()));
        let file = File::create(&temp_path).map_err(|e| HarvesterError::filesystem(&temp_path, e))?;

        Ok(Self {
            file: Some(BufWriter::new(file)),
            temp_path,
            final_path,
            level,
            count: 0,
        })
    }

    /// Append one record.
    pub fn write(&mut self, node: &DivisionNode) -> Result<()> {
        debug_assert_eq!(node.level, self.level, "record level must match the file");

        let mut line = serde_json::to_vec(node).map_err(|e| {
            HarvesterError::filesystem(&self.temp_path, std::io::Error::other(e))
        })?;
        line.push(b'\n');

        let Some(file) = self.file.as_mut() else {
            return Err(HarvesterError::filesystem(
                &self.temp_path,
                std::io::Error::other("level writer already finished"),
            ));
        };
        file.write_all(&line)
            .map_err(|e| HarvesterError::filesystem(&self.temp_path, e))?;
        self.count += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Flush, sync and move the file into place. Returns the final path.
    pub fn commit(mut self) -> Result<PathBuf> {
        if let Some(writer) = self.file.take() {
            let file = writer
                .into_inner()
                .map_err(|e| HarvesterError::filesystem(&self.temp_path, e.into_error()))?;
            file.sync_all()
                .map_err(|e| HarvesterError::filesystem(&self.temp_path, e))?;
        }

        // On Windows, rename fails if the destination already exists
        #[cfg(target_os = "windows")]
        if self.final_path.exists() {
            fs::remove_file(&self.final_path)
                .map_err(|e| HarvesterError::filesystem(&self.final_path, e))?;
        }

        fs::rename(&self.temp_path, &self.final_path)
            .map_err(|e| HarvesterError::filesystem(&self.final_path, e))?;
        Ok(self.final_path.clone())
    }
}

impl Drop for LevelWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                tracing::warn!(path = %self.temp_path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

/// Write a whole page of records at once.
#[cfg(test)]
pub(crate) fn write_level(dir: &Path, level: Level, nodes: &[DivisionNode]) -> Result<PathBuf> {
    let mut writer = LevelWriter::create(dir, level)?;
    for node in nodes {
        writer.write(node)?;
    }
    writer.commit()
}

/// Read back a level file.
pub fn read_records(path: &Path) -> Result<Vec<DivisionNode>> {
    let file = File::open(path).map_err(|e| HarvesterError::filesystem(path, e))?;
    let mut records = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| HarvesterError::filesystem(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| HarvesterError::InvalidRecord {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Find the level file in `dir`, if the page for that directory was crawled.
pub fn find_level_file(dir: &Path) -> Option<(Level, PathBuf)> {
    Level::ALL
        .iter()
        .map(|level| (*level, dir.join(level.file_name())))
        .find(|(_, path)| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn cities() -> Vec<DivisionNode> {
        vec![
            DivisionNode::new("130100", "石家庄市", Level::City).with_parent_code("130000"),
            DivisionNode::new("130200", "唐山市", Level::City).with_parent_code("130000"),
        ]
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("2020").join("130000");

        let path = write_level(&nested, Level::City, &cities()).unwrap();

        assert_eq!(path, nested.join("city.jsonl"));
        assert_eq!(read_records(&path).unwrap(), cities());
        assert!(!nested.join(".city.jsonl.tmp").exists());
    }

    #[test]
    fn test_record_format_is_stable() {
        let dir = tempdir().unwrap();
        let village = DivisionNode::new("110101001001", "多福巷社区居委会", Level::Village)
            .with_parent_code("110101001")
            .with_category("111");

        let path = write_level(dir.path(), Level::Village, &[village]).unwrap();

        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "{\"code\":\"110101001001\",\"name\":\"多福巷社区居委会\",\"level\":\"village\",\"parent_code\":\"110101001\",\"category\":\"111\"}\n"
        );
    }

    #[test]
    fn test_uncommitted_writer_leaves_no_file() {
        let dir = tempdir().unwrap();
        {
            let mut writer = LevelWriter::create(dir.path(), Level::City).unwrap();
            writer.write(&cities()[0]).unwrap();
            assert_eq!(writer.count(), 1);
        }

        assert!(!dir.path().join("city.jsonl").exists());
        assert!(!dir.path().join(".city.jsonl.tmp").exists());
    }

    #[test]
    fn test_rewrite_replaces_previous_file() {
        let dir = tempdir().unwrap();
        write_level(dir.path(), Level::City, &cities()).unwrap();
        let path = write_level(dir.path(), Level::City, &cities()[..1]).unwrap();

        assert_eq!(read_records(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_read_invalid_record_reports_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("city.jsonl");
        fs::write(&path, "{\"code\":\"130100\",\"name\":\"石家庄市\",\"level\":\"city\"}\nnot json\n").unwrap();

        let err = read_records(&path).unwrap_err();
        assert!(matches!(err, HarvesterError::InvalidRecord { line: 2, .. }));
    }

    #[test]
    fn test_find_level_file() {
        let dir = tempdir().unwrap();
        assert!(find_level_file(dir.path()).is_none());

        write_level(dir.path(), Level::Township, &[]).unwrap();
        let (level, path) = find_level_file(dir.path()).unwrap();
        assert_eq!(level, Level::Township);
        assert_eq!(path, dir.path().join("township.jsonl"));
    }
}
