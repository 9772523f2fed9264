mod cloner;
mod crawler;
mod dataset;
mod error_handling;
mod github;
mod ledger;
mod logging;
mod period;
mod prune;

use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use cloner::GitCli;
use crawler::{CrawlConfig, Crawler};
use dataset::{DatasetConfig, DatasetGenerator};
use error_handling::{ErrorReporter, Result, SpiderError};
use logging::{init_logging, run_log_path, LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(author, version, about = "Repository spider - clones popular GitHub repositories and keeps only their source files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search GitHub month by month, clone qualifying repositories and prune them
    Crawl(CrawlArgs),
    /// Walk the pruned repositories and build a dataset from their source files
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Creation years to crawl, one month at a time
    #[arg(long, value_delimiter = ',', default_value = "2019")]
    years: Vec<i32>,

    /// Language qualifier for the repository search
    #[arg(long, default_value = "java")]
    language: String,

    /// Only files whose name ends with this suffix are kept
    #[arg(short, long, default_value = ".java")]
    extension: String,

    /// Minimum stars; the first result below this ends the month
    #[arg(long, default_value_t = 100)]
    min_stars: u64,

    /// Search results per page
    #[arg(long, default_value_t = 100)]
    per_page: u32,

    /// Clone retries after the first failed attempt
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// File holding the GitHub token on its first line
    #[arg(long, default_value = "auth.token")]
    token_file: PathBuf,

    /// Root of the cloned repositories
    #[arg(long, default_value = "repos")]
    repo_dir: PathBuf,

    /// Directory for the progress ledgers
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    /// Directory for per-run log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// GitHub REST API base URL
    #[arg(long, default_value = "https://api.github.com")]
    api_base: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Existing dataset name to resume; a timestamp is used when omitted
    #[arg(short, long)]
    name: Option<String>,

    /// Root of the cloned repositories
    #[arg(long, default_value = "repos")]
    repo_dir: PathBuf,

    /// Root of the generated datasets
    #[arg(long, default_value = "dataset")]
    dataset_dir: PathBuf,

    /// Only files whose name ends with this suffix are read
    #[arg(short, long, default_value = ".java")]
    extension: String,

    /// Directory for per-run log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(log_dir: &Path, tool: &str, verbose: bool) -> Result<()> {
    let level = if verbose { LogLevel::Debug } else { LogLevel::Info };
    let config = LogConfig::new()
        .level(level)
        .console(true)
        .file(run_log_path(log_dir, tool));
    init_logging(&config)
}

fn read_token(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|e| {
        SpiderError::Config(format!("Failed to read token file {}: {}", path.display(), e))
    })?;
    let token = content.lines().next().unwrap_or_default().trim().to_string();
    if token.is_empty() {
        return Err(SpiderError::Config(format!("Token file {} is empty", path.display())));
    }
    Ok(token)
}

async fn crawl(args: CrawlArgs) -> Result<()> {
    setup_logging(&args.log_dir, "spider", args.verbose)?;
    let token = read_token(&args.token_file)?;

    let config = CrawlConfig {
        years: args.years,
        language: args.language,
        extension: args.extension,
        min_stars: args.min_stars,
        per_page: args.per_page,
        max_retries: args.max_retries,
        repo_dir: args.repo_dir,
        out_dir: args.out_dir,
        api_base: args.api_base,
    };
    info!("Configuration: {:?}", config);
    ErrorReporter::report_info(&format!(
        "Crawling {} repositories created in {:?} (min stars {}, keeping *{})",
        config.language, config.years, config.min_stars, config.extension
    ));

    let github = github::GitHubClient::new(token)?;
    let mut crawler = Crawler::new(config, github, GitCli::default())?;
    let stats = crawler.run().await?;

    ErrorReporter::report_success(&format!(
        "Crawl complete: {} months, {} pages, {} candidates, {} cloned, {} already cloned, {} without target files, {} failed",
        stats.periods,
        stats.pages,
        stats.candidates,
        stats.cloned,
        stats.already_cloned,
        stats.disqualified,
        stats.failed
    ));
    Ok(())
}

fn generate(args: GenerateArgs) -> Result<()> {
    setup_logging(&args.log_dir, "generator", args.verbose)?;

    let mut generator = DatasetGenerator::new(DatasetConfig {
        name: args.name,
        repo_dir: args.repo_dir,
        dataset_dir: args.dataset_dir,
        extension: args.extension,
    })?;
    let stats = generator.run()?;

    if stats.unreadable > 0 {
        ErrorReporter::report_warning(&format!("{} files could not be read", stats.unreadable));
    }
    ErrorReporter::report_success(&format!(
        "Dataset {} complete: {} repositories generated, {} skipped, {} files",
        generator.output_dir().display(),
        stats.repositories,
        stats.skipped,
        stats.files
    ));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Crawl(args) => crawl(args).await,
        Command::Generate(args) => generate(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ErrorReporter::report_error(&e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn crawl_defaults() {
        let cli = Cli::parse_from(["repo-spider", "crawl"]);
        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert_eq!(args.years, vec![2019]);
        assert_eq!(args.extension, ".java");
        assert_eq!(args.min_stars, 100);
        assert_eq!(args.max_retries, 5);
        assert_eq!(args.token_file, PathBuf::from("auth.token"));
    }

    #[test]
    fn years_accept_a_list() {
        let cli = Cli::parse_from(["repo-spider", "crawl", "--years", "2018,2019"]);
        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert_eq!(args.years, vec![2018, 2019]);
    }

    #[test]
    fn token_is_first_line_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.token");
        fs::write(&path, "ghp_abc123\nignored\n").unwrap();
        assert_eq!(read_token(&path).unwrap(), "ghp_abc123");
    }

    #[test]
    fn empty_or_missing_token_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.token");
        assert!(matches!(read_token(&path), Err(SpiderError::Config(_))));
        fs::write(&path, "\n").unwrap();
        assert!(matches!(read_token(&path), Err(SpiderError::Config(_))));
    }
}
