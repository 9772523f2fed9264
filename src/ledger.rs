use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error_handling::{Result, SpiderError};
use crate::period::Period;

/// A repository that has been cloned and pruned, one line in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: u64,
    pub name: String,
    pub clone_url: String,
}

impl LedgerEntry {
    fn to_line(&self) -> String {
        format!("{} {} {}", self.id, self.name, self.clone_url)
    }
}

/// Append-only line file. Every append is flushed and synced before returning.
#[derive(Debug)]
struct LineWriter {
    path: PathBuf,
    file: File,
}

impl LineWriter {
    /// Opens `path` for appending, creating it (and its parent) on first use,
    /// and returns the existing non-empty lines with their 1-based numbers.
    fn open(path: &Path) -> Result<(Self, Vec<(usize, String)>)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).read(true).open(path)?;

        let mut lines = Vec::new();
        for (idx, line) in BufReader::new(File::open(path)?).lines().enumerate() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push((idx + 1, line));
            }
        }

        Ok((Self { path: path.to_path_buf(), file }, lines))
    }

    fn append(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn malformed(&self, line: usize, content: &str) -> SpiderError {
        SpiderError::Ledger { path: self.path.clone(), line, content: content.to_string() }
    }
}

/// Record of successfully cloned repositories for one target year
/// (`cloned_repo.<year>.txt`, one `id name url` line per repository).
///
/// Lines are not validated beyond arity and a numeric id; the file is only
/// ever written by this type, so a malformed line aborts loading.
#[derive(Debug)]
pub struct ProgressLedger {
    writer: LineWriter,
    ids: HashSet<u64>,
}

impl ProgressLedger {
    pub fn file_name(year: i32) -> String {
        format!("cloned_repo.{}.txt", year)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (writer, lines) = LineWriter::open(path.as_ref())?;
        let mut ids = HashSet::with_capacity(lines.len());

        for (number, line) in &lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [id, _name, _url] = fields.as_slice() else {
                return Err(writer.malformed(*number, line));
            };
            let id: u64 = id.parse().map_err(|_| writer.malformed(*number, line))?;
            ids.insert(id);
        }

        info!("Loaded {} cloned repositories from {}", ids.len(), path.as_ref().display());
        Ok(Self { writer, ids })
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn append(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.writer.append(&entry.to_line())?;
        self.ids.insert(entry.id);
        debug!("Recorded {} ({}) in {}", entry.name, entry.id, self.writer.path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Months whose pagination ran to completion (`cloned_year_month.txt`).
#[derive(Debug)]
pub struct PeriodLedger {
    writer: LineWriter,
    done: HashSet<Period>,
}

impl PeriodLedger {
    pub const FILE_NAME: &'static str = "cloned_year_month.txt";

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (writer, lines) = LineWriter::open(path.as_ref())?;
        let mut done = HashSet::new();

        for (number, line) in &lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [year, month] = fields.as_slice() else {
                return Err(writer.malformed(*number, line));
            };
            let period = match (year.parse(), month.parse()) {
                (Ok(year), Ok(month)) => Period::new(year, month)
                    .map_err(|_| writer.malformed(*number, line))?,
                _ => return Err(writer.malformed(*number, line)),
            };
            done.insert(period);
        }

        Ok(Self { writer, done })
    }

    pub fn is_complete(&self, period: &Period) -> bool {
        self.done.contains(period)
    }

    pub fn mark_complete(&mut self, period: Period) -> Result<()> {
        self.writer.append(&period.to_string())?;
        self.done.insert(period);
        Ok(())
    }
}

/// Repositories already handled by the dataset pass (`finished_repo.txt`).
/// Keyed by the first token of each line; the rest of the line is free-form.
#[derive(Debug)]
pub struct FinishedLedger {
    writer: LineWriter,
    keys: HashSet<String>,
}

impl FinishedLedger {
    pub const FILE_NAME: &'static str = "finished_repo.txt";

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (writer, lines) = LineWriter::open(path.as_ref())?;
        let keys = lines
            .iter()
            .filter_map(|(_, line)| line.split_whitespace().next().map(str::to_string))
            .collect();
        Ok(Self { writer, keys })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn append(&mut self, key: &str, detail: &str) -> Result<()> {
        self.writer.append(&format!("{} {}", key, detail))?;
        self.keys.insert(key.to_string());
        Ok(())
    }
}
