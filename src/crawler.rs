use std::fs;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::cloner::{CloneExecutor, CloneOutcome, GitRunner};
use crate::error_handling::Result;
use crate::github::{search_url, GitHubClient, RepositoryCandidate};
use crate::ledger::{LedgerEntry, PeriodLedger, ProgressLedger};
use crate::period::{months, Period};
use crate::prune::prune_tree;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub years: Vec<i32>,
    pub language: String,
    pub extension: String,
    pub min_stars: u64,
    pub per_page: u32,
    pub max_retries: u32,
    pub repo_dir: PathBuf,
    pub out_dir: PathBuf,
    pub api_base: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            years: vec![2019],
            language: "java".to_string(),
            extension: ".java".to_string(),
            min_stars: 100,
            per_page: 100,
            max_retries: 5,
            repo_dir: PathBuf::from("repos"),
            out_dir: PathBuf::from("out"),
            api_base: "https://api.github.com".to_string(),
        }
    }
}

impl CrawlConfig {
    /// `repos/<year>/<month>`
    pub fn month_dir(&self, period: &Period) -> PathBuf {
        self.repo_dir.join(period.year.to_string()).join(period.month.to_string())
    }
}

/// Result of the tree check for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    AlreadyCloned,
    NoTargetFiles,
    Qualifies,
    /// The service had no tree to inspect; cloned anyway.
    QualifiesWithoutTree,
}

impl Verdict {
    pub fn is_qualified(self) -> bool {
        matches!(self, Verdict::Qualifies | Verdict::QualifiesWithoutTree)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    pub periods: usize,
    pub pages: usize,
    pub candidates: usize,
    pub already_cloned: usize,
    pub disqualified: usize,
    pub cloned: usize,
    pub failed: usize,
    pub short_circuited: bool,
}

impl AddAssign for CrawlStats {
    fn add_assign(&mut self, other: Self) {
        self.periods += other.periods;
        self.pages += other.pages;
        self.candidates += other.candidates;
        self.already_cloned += other.already_cloned;
        self.disqualified += other.disqualified;
        self.cloned += other.cloned;
        self.failed += other.failed;
        self.short_circuited |= other.short_circuited;
    }
}

/// State shared by every step of a crawl run.
pub struct Crawler<R> {
    config: CrawlConfig,
    github: GitHubClient,
    periods: PeriodLedger,
    executor: CloneExecutor<R>,
}

impl<R: GitRunner> Crawler<R> {
    pub fn new(config: CrawlConfig, github: GitHubClient, runner: R) -> Result<Self> {
        fs::create_dir_all(&config.repo_dir)?;
        fs::create_dir_all(&config.out_dir)?;
        let periods = PeriodLedger::open(config.out_dir.join(PeriodLedger::FILE_NAME))?;
        let executor = CloneExecutor::new(runner, config.max_retries);
        Ok(Self { config, github, periods, executor })
    }

    pub async fn run(&mut self) -> Result<CrawlStats> {
        let mut total = CrawlStats::default();
        for year in self.config.years.clone() {
            total += self.crawl_year(year).await?;
        }
        Ok(total)
    }

    /// Walks the twelve months of `year`, skipping months already marked complete.
    pub async fn crawl_year(&mut self, year: i32) -> Result<CrawlStats> {
        let ledger_path = self.config.out_dir.join(ProgressLedger::file_name(year));
        let mut ledger = ProgressLedger::open(&ledger_path)?;
        let mut total = CrawlStats::default();

        for period in months(year) {
            if self.periods.is_complete(&period) {
                info!("Period {}-{:02} already crawled, skipping", period.year, period.month);
                continue;
            }
            fs::create_dir_all(self.config.month_dir(&period))?;

            let stats = self.crawl_period(&mut ledger, period).await?;
            self.periods.mark_complete(period)?;
            info!(
                "Finished {}-{:02}: {} pages, {} cloned, {} failed",
                period.year, period.month, stats.pages, stats.cloned, stats.failed
            );
            total += stats;
        }

        info!("Year {} done; {} repositories recorded in {}", year, ledger.len(), ledger_path.display());
        Ok(total)
    }

    /// Pages through the month's search results, most starred first. The first
    /// item under the star threshold (or a fork) ends the whole period: the sort
    /// order means nothing after it can qualify.
    pub async fn crawl_period(&self, ledger: &mut ProgressLedger, period: Period) -> Result<CrawlStats> {
        let month_dir = self.config.month_dir(&period);
        let mut stats = CrawlStats { periods: 1, ..Default::default() };
        let mut url = Some(search_url(
            &self.config.api_base,
            &self.config.language,
            &period,
            self.config.per_page,
        )?);

        while let Some(current) = url.take() {
            let page = self.github.fetch_search_page(&current).await?;
            stats.pages += 1;

            for candidate in &page.items {
                if candidate.stargazers_count < self.config.min_stars || candidate.fork {
                    info!(
                        "{} (stars: {}, fork: {}) is below the cut; stopping {}-{:02}",
                        candidate.full_name, candidate.stargazers_count, candidate.fork,
                        period.year, period.month
                    );
                    stats.short_circuited = true;
                    break;
                }
                stats.candidates += 1;
                self.handle_candidate(ledger, candidate, &month_dir, &mut stats).await?;
            }

            if stats.short_circuited {
                break;
            }
            url = page.next;
        }

        Ok(stats)
    }

    /// Ledger membership first, so recorded repositories never cost a tree request.
    pub async fn qualifies(&self, ledger: &ProgressLedger, candidate: &RepositoryCandidate) -> Result<Verdict> {
        if ledger.contains(candidate.id) {
            return Ok(Verdict::AlreadyCloned);
        }

        let Some(nodes) = self.github.fetch_tree(candidate).await? else {
            return Ok(Verdict::QualifiesWithoutTree);
        };
        let found = nodes
            .iter()
            .any(|node| node.is_file() && node.path.ends_with(&self.config.extension));
        Ok(if found { Verdict::Qualifies } else { Verdict::NoTargetFiles })
    }

    async fn handle_candidate(
        &self,
        ledger: &mut ProgressLedger,
        candidate: &RepositoryCandidate,
        month_dir: &Path,
        stats: &mut CrawlStats,
    ) -> Result<()> {
        info!(
            "repo: {} stars: {} clone url: {} description: {}",
            candidate.full_name,
            candidate.stargazers_count,
            candidate.clone_url,
            candidate.description.as_deref().unwrap_or("-")
        );

        let verdict = match self.qualifies(ledger, candidate).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Skipping {} ({}): tree check failed: {}", candidate.full_name, candidate.id, e);
                stats.failed += 1;
                return Ok(());
            }
        };
        match verdict {
            Verdict::AlreadyCloned => {
                info!("{} ({}) is already cloned, skip", candidate.full_name, candidate.id);
                stats.already_cloned += 1;
            }
            Verdict::NoTargetFiles => {
                info!("{} contains no {} file", candidate.full_name, self.config.extension);
                stats.disqualified += 1;
            }
            Verdict::QualifiesWithoutTree => {
                info!("No tree listing for {}; cloning anyway", candidate.full_name);
            }
            Verdict::Qualifies => {}
        }
        if !verdict.is_qualified() {
            return Ok(());
        }

        let dest = clone_destination(month_dir, candidate);
        let outcome = self
            .executor
            .clone_repository(&candidate.clone_url, candidate.id, &candidate.full_name, &dest)
            .await;
        if !matches!(outcome, CloneOutcome::Cloned { .. }) {
            stats.failed += 1;
            return Ok(());
        }

        ledger.append(&LedgerEntry {
            id: candidate.id,
            name: candidate.full_name.clone(),
            clone_url: candidate.clone_url.clone(),
        })?;
        let pruned = prune_tree(&dest, &self.config.extension);
        if pruned.failures > 0 {
            warn!("{} files could not be pruned from {}", pruned.failures, dest.display());
        }
        info!(
            "Kept {} {} files of {} ({} removed)",
            pruned.kept, self.config.extension, candidate.full_name, pruned.removed_files
        );
        stats.cloned += 1;
        Ok(())
    }
}

/// `<month_dir>/<name>`, or `<month_dir>/<owner>_<name>` when a pruned
/// checkout of another repository with the same short name already lives there.
///
/// A directory that still has `.git` was never pruned, so it is a leftover of an
/// interrupted clone: pruning always removes `.git`, and the ledger entry is
/// written before pruning, so a recorded repository never reaches this point.
/// Leftovers keep the short name and are cleared by the clone executor.
fn clone_destination(month_dir: &Path, candidate: &RepositoryCandidate) -> PathBuf {
    let short = month_dir.join(&candidate.name);
    if !short.exists() || short.join(".git").exists() {
        return short;
    }
    month_dir.join(candidate.full_name.replace(['/', '\\'], "_"))
}
