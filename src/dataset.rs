use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error_handling::{Result, SpiderError};
use crate::ledger::FinishedLedger;

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Reuse an existing dataset directory; a fresh timestamped one otherwise.
    pub name: Option<String>,
    pub repo_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub extension: String,
}

/// One row of `files.csv`.
#[derive(Debug, Clone, Serialize)]
struct FileRecord {
    repository: String,
    file_path: String,
    bytes: usize,
    lines: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DatasetStats {
    pub repositories: usize,
    pub skipped: usize,
    pub files: usize,
    pub unreadable: usize,
}

pub struct DatasetGenerator {
    config: DatasetConfig,
    output: PathBuf,
    finished: FinishedLedger,
    records: csv::Writer<File>,
}

impl DatasetGenerator {
    pub const RECORDS_FILE: &'static str = "files.csv";

    pub fn new(config: DatasetConfig) -> Result<Self> {
        if !config.repo_dir.is_dir() {
            return Err(SpiderError::Config(format!(
                "Repo dir not found: {}",
                config.repo_dir.display()
            )));
        }

        let name = config
            .name
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d_%H%M%S").to_string());
        let output = config.dataset_dir.join(name);
        fs::create_dir_all(&output)?;

        let finished = FinishedLedger::open(output.join(FinishedLedger::FILE_NAME))?;

        let records_path = output.join(Self::RECORDS_FILE);
        // An empty file (a run that found nothing) still needs the header.
        let resumed = fs::metadata(&records_path).map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(&records_path)?;
        let records = csv::WriterBuilder::new().has_headers(!resumed).from_writer(file);

        info!("Writing dataset to {}", output.display());
        Ok(Self { config, output, finished, records })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    pub fn run(&mut self) -> Result<DatasetStats> {
        let mut stats = DatasetStats::default();

        for (key, repo_path) in repository_dirs(&self.config.repo_dir) {
            if self.finished.contains(&key) {
                info!("Repo {} is generated, skip.", key);
                stats.skipped += 1;
                continue;
            }

            let files = source_files(&repo_path, &self.config.extension);
            let mut processed = 0;
            for file in &files {
                match self.read_source_file(&key, &repo_path, file) {
                    Ok(record) => {
                        self.records.serialize(&record)?;
                        processed += 1;
                    }
                    Err(e) => {
                        warn!("Failed to read {}: {}", file.display(), e);
                        stats.unreadable += 1;
                    }
                }
            }
            self.records.flush()?;
            self.finished.append(&key, &processed.to_string())?;

            info!("Generated {} ({} {} files)", key, processed, self.config.extension);
            stats.repositories += 1;
            stats.files += processed;
        }

        Ok(stats)
    }

    fn read_source_file(&self, key: &str, repo_root: &Path, path: &Path) -> Result<FileRecord> {
        info!("Reading source file: {}", path.display());
        let content = fs::read(path)?;
        let text = String::from_utf8_lossy(&content);

        let relative = path.strip_prefix(repo_root).unwrap_or(path);
        Ok(FileRecord {
            repository: key.to_string(),
            file_path: relative.to_string_lossy().replace('\\', "/"),
            bytes: content.len(),
            lines: text.lines().count(),
        })
    }
}

/// Repository checkouts at `repos/<year>/<month>/<repo>`, keyed `year/month/repo`.
fn repository_dirs(repo_root: &Path) -> Vec<(String, PathBuf)> {
    WalkDir::new(repo_root)
        .min_depth(3)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| {
            let key = e
                .path()
                .strip_prefix(repo_root)
                .unwrap_or(e.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, e.into_path())
        })
        .collect()
}

fn source_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().ends_with(extension))
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn config(dir: &TempDir, name: &str) -> DatasetConfig {
        DatasetConfig {
            name: Some(name.to_string()),
            repo_dir: dir.path().join("repos"),
            dataset_dir: dir.path().join("dataset"),
            extension: ".java".to_string(),
        }
    }

    #[test]
    fn missing_repo_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(DatasetGenerator::new(config(&dir, "d")), Err(SpiderError::Config(_))));
    }

    #[test]
    fn records_target_files_per_repository() {
        let dir = TempDir::new().unwrap();
        let repos = dir.path().join("repos");
        touch(&repos, "2019/1/guava/src/Lists.java", "class Lists {\n}\n");
        touch(&repos, "2019/1/guava/pom.xml", "<project/>");
        touch(&repos, "2019/2/okhttp/Call.java", "interface Call {}");

        let mut generator = DatasetGenerator::new(config(&dir, "first")).unwrap();
        let stats = generator.run().unwrap();

        assert_eq!(stats, DatasetStats { repositories: 2, skipped: 0, files: 2, unreadable: 0 });
        let out = generator.output_dir().to_path_buf();
        let csv = fs::read_to_string(out.join(DatasetGenerator::RECORDS_FILE)).unwrap();
        assert_eq!(
            csv,
            "repository,file_path,bytes,lines\n\
             2019/1/guava,src/Lists.java,16,2\n\
             2019/2/okhttp,Call.java,17,1\n"
        );
        let finished = fs::read_to_string(out.join(FinishedLedger::FILE_NAME)).unwrap();
        assert_eq!(finished, "2019/1/guava 1\n2019/2/okhttp 1\n");
    }

    #[test]
    fn resumed_dataset_skips_finished_repositories() {
        let dir = TempDir::new().unwrap();
        let repos = dir.path().join("repos");
        touch(&repos, "2019/1/guava/Lists.java", "class Lists {}");

        DatasetGenerator::new(config(&dir, "resume")).unwrap().run().unwrap();
        touch(&repos, "2019/3/jsoup/Jsoup.java", "class Jsoup {}");

        let mut generator = DatasetGenerator::new(config(&dir, "resume")).unwrap();
        let stats = generator.run().unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.repositories, 1);
        let csv = fs::read_to_string(generator.output_dir().join(DatasetGenerator::RECORDS_FILE)).unwrap();
        assert_eq!(csv.matches("repository,file_path").count(), 1);
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn unnamed_dataset_gets_timestamp_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("repos")).unwrap();
        let mut cfg = config(&dir, "unused");
        cfg.name = None;

        let generator = DatasetGenerator::new(cfg).unwrap();
        let name = generator.output_dir().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), "20190101_120000".len());
        assert!(generator.output_dir().join(FinishedLedger::FILE_NAME).exists());
    }

    #[test]
    fn header_written_after_an_empty_first_run() {
        let dir = TempDir::new().unwrap();
        let repos = dir.path().join("repos");
        fs::create_dir_all(&repos).unwrap();

        let stats = DatasetGenerator::new(config(&dir, "late")).unwrap().run().unwrap();
        assert_eq!(stats.files, 0);

        touch(&repos, "2019/1/guava/A.java", "class A {}");
        let mut generator = DatasetGenerator::new(config(&dir, "late")).unwrap();
        generator.run().unwrap();

        let csv = fs::read_to_string(generator.output_dir().join(DatasetGenerator::RECORDS_FILE)).unwrap();
        assert_eq!(csv, "repository,file_path,bytes,lines\n2019/1/guava,A.java,10,1\n");
    }
}
