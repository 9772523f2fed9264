use async_trait::async_trait;
use std::fs;
use std::path::Path;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::error_handling::{Result, SpiderError};
use crate::prune::remove_tree;

/// Runs a version-control clone of `url` into `dest`.
///
/// `Ok(code)` means the client ran to completion with that exit code;
/// `Err` means the clone failed and may be retried.
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run_clone(&self, url: &str, dest: &Path) -> Result<i32>;
}

/// `git clone <url> <name>` executed from the destination's parent directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self { program: "git".to_string() }
    }
}

#[async_trait]
impl GitRunner for GitCli {
    async fn run_clone(&self, url: &str, dest: &Path) -> Result<i32> {
        let (Some(parent), Some(name)) = (dest.parent(), dest.file_name()) else {
            return Err(SpiderError::Clone(format!("Invalid clone destination {:?}", dest)));
        };
        fs::create_dir_all(parent)?;

        let output = Command::new(&self.program)
            .arg("clone")
            .arg(url)
            .arg(name)
            .current_dir(parent)
            .output()
            .await
            .map_err(|e| SpiderError::Clone(format!("Failed to execute git clone: {}", e)))?;

        // git reports every failure (128 fatal, 129 usage, ...) with a non-zero exit.
        match output.status.code() {
            Some(0) => Ok(0),
            Some(code) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(SpiderError::Clone(format!("git clone exited with {}: {}", code, stderr.trim())))
            }
            None => Err(SpiderError::Clone("git clone terminated by signal".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneOutcome {
    Cloned { attempts: u32 },
    /// Every attempt failed; the partial directory has been removed.
    Abandoned { attempts: u32 },
    /// The client finished with an exit code other than 0.
    Anomalous { code: i32 },
}

pub struct CloneExecutor<R> {
    runner: R,
    max_retries: u32,
}

impl<R: GitRunner> CloneExecutor<R> {
    pub fn new(runner: R, max_retries: u32) -> Self {
        Self { runner, max_retries }
    }

    pub async fn clone_repository(&self, url: &str, id: u64, full_name: &str, dest: &Path) -> CloneOutcome {
        if dest.exists() {
            info!("Removing leftover directory {} before cloning {}", dest.display(), full_name);
            remove_tree(dest);
        }

        let total = self.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.runner.run_clone(url, dest).await {
                Ok(0) => {
                    info!("Cloned {} ({}) into {}", full_name, id, dest.display());
                    return CloneOutcome::Cloned { attempts: attempt };
                }
                Ok(code) => {
                    error!(
                        "Unrecognized exit code {} cloning {} ({}); abandoning without retry",
                        code, full_name, id
                    );
                    remove_tree(dest);
                    return CloneOutcome::Anomalous { code };
                }
                Err(e) => {
                    remove_tree(dest);
                    if attempt < total {
                        warn!(
                            "Clone attempt {}/{} of {} ({}) failed: {}; retrying",
                            attempt, total, full_name, id, e
                        );
                    } else {
                        error!(
                            "Clone of {} ({}) failed after {} attempts: {}",
                            full_name, id, attempt, e
                        );
                        return CloneOutcome::Abandoned { attempts: attempt };
                    }
                }
            }
        }
    }
}
