//! In-memory list of entered lines, with plain-text file persistence.
//!
//! The file format is one entry per line, oldest first.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    entries: Vec<String>,
    /// Entries before this index are already present in the history file.
    persisted: usize,
}

impl History {
    /// Records a line; blank lines are ignored.
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if !line.trim().is_empty() {
            self.entries.push(line);
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last `limit` entries with their 1-based numbers; all of them when
    /// `limit` is `None` or zero.
    pub fn tail(&self, limit: Option<usize>) -> impl Iterator<Item = (usize, &str)> {
        let skip = match limit {
            Some(n) if n > 0 => self.entries.len().saturating_sub(n),
            _ => 0,
        };
        self.entries
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, line)| (i + 1, line.as_str()))
    }

    /// Appends the entries stored in `path`; returns how many were read.
    pub fn read_from(&mut self, path: &Path) -> io::Result<usize> {
        let contents = fs::read_to_string(path)?;
        let before = self.entries.len();
        for line in contents.lines() {
            self.push(line);
        }
        self.persisted = self.entries.len();
        Ok(self.entries.len() - before)
    }

    /// Replaces the contents of `path` with the whole history.
    pub fn write_to(&mut self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(fs::File::create(path)?);
        for line in &self.entries {
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
        self.persisted = self.entries.len();
        Ok(())
    }

    /// Appends the entries added since the last read, write or append;
    /// returns how many were written.
    pub fn append_to(&mut self, path: &Path) -> io::Result<usize> {
        let fresh = &self.entries[self.persisted.min(self.entries.len())..];
        if fresh.is_empty() {
            return Ok(0);
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut out = BufWriter::new(file);
        for line in fresh {
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
        let written = fresh.len();
        self.persisted = self.entries.len();
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of(lines: &[&str]) -> History {
        let mut history = History::default();
        for line in lines {
            history.push(*line);
        }
        history
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let history = history_of(&["ls", "", "   ", "pwd"]);
        assert_eq!(history.entries(), &["ls".to_string(), "pwd".to_string()]);
    }

    #[test]
    fn test_tail_numbers_entries() {
        let history = history_of(&["a", "b", "c"]);
        let all: Vec<_> = history.tail(None).collect();
        assert_eq!(all, vec![(1, "a"), (2, "b"), (3, "c")]);
        let last: Vec<_> = history.tail(Some(2)).collect();
        assert_eq!(last, vec![(2, "b"), (3, "c")]);
        assert_eq!(history.tail(Some(10)).count(), 3);
        assert_eq!(history.tail(Some(0)).count(), 3);
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let mut history = history_of(&["echo one", "echo two"]);
        history.write_to(&path).unwrap();

        let mut loaded = History::default();
        assert_eq!(loaded.read_from(&path).unwrap(), 2);
        assert_eq!(loaded.entries(), history.entries());
    }

    #[test]
    fn test_append_writes_only_new_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let mut history = history_of(&["first"]);
        assert_eq!(history.append_to(&path).unwrap(), 1);
        assert_eq!(history.append_to(&path).unwrap(), 0);

        history.push("second");
        assert_eq!(history.append_to(&path).unwrap(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = History::default();
        assert!(history.read_from(&dir.path().join("absent")).is_err());
        assert!(history.is_empty());
    }
}
