//! Page download engine.
//!
//! Fetches every task into one destination directory and reports
//! `(ok, skipped, failed)`. Per-task failures never abort siblings; the
//! caller decides what to do with a non-zero `failed` count once everything
//! has finished.
//!
//! ## Write protocol
//!
//! Each attempt streams the body into a uniquely named temp file *inside the
//! destination directory* and renames it over the final path only after the
//! last chunk is flushed. The temp file is deleted on every other exit,
//! including cancellation (the in-flight future is dropped and the temp path
//! with it), so the final path is either absent or complete.
//!
//! ## Concurrency
//!
//! With `workers == 1` tasks run strictly in manifest order. Otherwise up to
//! `workers` tasks are in flight via `buffer_unordered`; completions arrive in
//! any order. Retries for one task are always sequential.

use crate::config::DownloadConfig;
use crate::error::{FlipError, TaskFailure};
use crate::output::{DownloadStats, DownloadTask, TaskOutcome};
use crate::pipeline::retry::{is_retryable_status, parse_retry_after, retry_delay};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a single attempt did not produce the file.
#[derive(Debug)]
enum AttemptError {
    /// Worth another attempt; carries the server's delay hint if any.
    Transient {
        reason: String,
        hint: Option<Duration>,
    },
    Permanent(TaskFailure),
}

/// Download every task into `dest_dir`.
///
/// # Errors
/// * [`FlipError::OutputWriteFailed`] if `dest_dir` cannot be created.
/// * [`FlipError::Cancelled`] if `cancel` fired; every in-flight task has
///   been torn down by the time this returns.
pub async fn download_all(
    client: &Client,
    tasks: &[DownloadTask],
    dest_dir: &Path,
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<DownloadStats, FlipError> {
    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|source| FlipError::OutputWriteFailed {
            path: dest_dir.to_path_buf(),
            source,
        })?;
    let root = tokio::fs::canonicalize(dest_dir)
        .await
        .map_err(|source| FlipError::OutputWriteFailed {
            path: dest_dir.to_path_buf(),
            source,
        })?;

    let engine = Engine {
        client,
        root,
        config,
        cancel,
    };

    let start = Instant::now();
    let workers = config.workers.max(1);
    info!(
        "Downloading {} pages with {} worker(s) into {}",
        tasks.len(),
        workers,
        dest_dir.display()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_download_start(tasks.len());
    }

    let mut stats = DownloadStats::default();
    if workers == 1 {
        for task in tasks {
            let outcome = engine.run_task(task).await;
            engine.report(task, &outcome, &mut stats);
        }
    } else {
        let engine = &engine;
        let mut in_flight = stream::iter(tasks)
            .map(move |task| async move { (task, engine.run_task(task).await) })
            .buffer_unordered(workers);
        while let Some((task, outcome)) = in_flight.next().await {
            engine.report(task, &outcome, &mut stats);
        }
    }

    if cancel.is_cancelled() {
        warn!(
            "Download cancelled after {} of {} tasks settled",
            stats.ok + stats.skipped,
            tasks.len()
        );
        return Err(FlipError::Cancelled);
    }

    info!(
        "Download finished in {}ms: {} ok, {} skipped, {} failed",
        start.elapsed().as_millis(),
        stats.ok,
        stats.skipped,
        stats.failed
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_download_complete(&stats);
    }
    Ok(stats)
}

struct Engine<'a> {
    client: &'a Client,
    /// Canonical destination directory.
    root: PathBuf,
    config: &'a DownloadConfig,
    cancel: &'a CancellationToken,
}

impl Engine<'_> {
    fn report(&self, task: &DownloadTask, outcome: &TaskOutcome, stats: &mut DownloadStats) {
        stats.record(outcome);
        let label = task.label();
        match outcome {
            TaskOutcome::Failed(TaskFailure::Cancelled) => debug!("{}: cancelled", label),
            TaskOutcome::Failed(f) => warn!("{}: {}", label, f),
            other => debug!("{}: {}", label, other.label()),
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_task_complete(&label, outcome, stats);
        }
    }

    async fn run_task(&self, task: &DownloadTask) -> TaskOutcome {
        let (Some(url), Some(name)) = (task.url.as_deref(), task.out_name.as_deref()) else {
            return TaskOutcome::Failed(TaskFailure::NoFilename);
        };
        if self.cancel.is_cancelled() {
            return TaskOutcome::Failed(TaskFailure::Cancelled);
        }

        let Some(dest) = safe_join(&self.root, name).await else {
            return TaskOutcome::Failed(TaskFailure::UnsafePath);
        };

        if !self.config.overwrite && tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return TaskOutcome::Skipped;
        }

        self.fetch_with_retry(url, name, &dest).await
    }

    async fn fetch_with_retry(&self, url: &str, name: &str, dest: &Path) -> TaskOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return TaskOutcome::Failed(TaskFailure::Cancelled);
                }
                r = self.fetch_once(url, name, dest) => r,
            };

            let (reason, hint) = match result {
                Ok(bytes) => {
                    debug!("{}: {} bytes on attempt {}", name, bytes, attempt);
                    return TaskOutcome::Ok;
                }
                Err(AttemptError::Permanent(f)) => return TaskOutcome::Failed(f),
                Err(AttemptError::Transient { reason, hint }) => (reason, hint),
            };

            if attempt >= max_attempts {
                return TaskOutcome::Failed(TaskFailure::RetriesExhausted {
                    attempts: attempt,
                    last: reason,
                });
            }

            let delay = retry_delay(
                attempt,
                hint,
                self.config.retry_backoff_ms,
                self.config.max_backoff_ms,
                self.config.jitter_ms,
            );
            warn!(
                "{}: {} (attempt {}/{}), retrying in {}ms",
                name,
                reason,
                attempt,
                max_attempts,
                delay.as_millis()
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return TaskOutcome::Failed(TaskFailure::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One request → temp file → rename. Returns the byte count.
    async fn fetch_once(&self, url: &str, name: &str, dest: &Path) -> Result<u64, AttemptError> {
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            if is_retryable_status(code) {
                let hint = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, Utc::now()));
                return Err(AttemptError::Transient {
                    reason: format!("HTTP {code}"),
                    hint,
                });
            }
            return Err(AttemptError::Permanent(TaskFailure::Http { status: code }));
        }

        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".part")
            .tempfile_in(&self.root)
            .map_err(io_failure)?;
        let (std_file, tmp_path) = tmp.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(classify)?;
            file.write_all(&chunk).await.map_err(io_failure)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_failure)?;
        drop(file);

        tmp_path.persist(dest).map_err(|e| io_failure(e.error))?;
        Ok(written)
    }
}

/// Connection, timeout and body errors are transient; request construction
/// and redirect-policy errors are not.
fn classify(e: reqwest::Error) -> AttemptError {
    if e.is_builder() || e.is_redirect() {
        AttemptError::Permanent(TaskFailure::Network {
            reason: e.to_string(),
        })
    } else {
        let reason = if e.is_timeout() {
            "timeout".to_string()
        } else {
            e.to_string()
        };
        AttemptError::Transient { reason, hint: None }
    }
}

fn io_failure(e: std::io::Error) -> AttemptError {
    AttemptError::Permanent(TaskFailure::Io {
        reason: e.to_string(),
    })
}

/// Join `name` onto the canonical `root`, refusing anything that could land
/// outside it.
///
/// `name` must be a single normal path component. If the target already
/// exists as a symlink, it must resolve inside `root`.
pub async fn safe_join(root: &Path, name: &str) -> Option<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return None,
    }

    let candidate = root.join(name);
    if candidate.parent() != Some(root) {
        return None;
    }

    if let Ok(meta) = tokio::fs::symlink_metadata(&candidate).await {
        if meta.file_type().is_symlink() {
            let resolved = tokio::fs::canonicalize(&candidate).await.ok()?;
            if !resolved.starts_with(root) {
                return None;
            }
        }
    }

    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn safe_join_accepts_plain_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(
            safe_join(&root, "001_a.jpg").await,
            Some(root.join("001_a.jpg"))
        );
    }

    #[tokio::test]
    async fn safe_join_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        for name in ["..", ".", "", "../x.jpg", "a/b.jpg", "/etc/passwd"] {
            assert_eq!(safe_join(&root, name).await, None, "{name:?}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn safe_join_rejects_escaping_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let target = outside.path().join("victim.jpg");
        std::fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, root.join("001_a.jpg")).unwrap();

        assert_eq!(safe_join(&root, "001_a.jpg").await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn safe_join_allows_internal_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("real.jpg"), b"x").unwrap();
        std::os::unix::fs::symlink(root.join("real.jpg"), root.join("001_a.jpg")).unwrap();

        assert!(safe_join(&root, "001_a.jpg").await.is_some());
    }

    #[tokio::test]
    async fn placeholder_task_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig::default();
        let cancel = CancellationToken::new();
        let client = Client::new();
        let tasks = vec![DownloadTask {
            index: 0,
            url: None,
            out_name: None,
        }];

        let stats = download_all(&client, &tasks, dir.path(), &config, &cancel)
            .await
            .unwrap();
        assert_eq!(
            stats,
            DownloadStats {
                ok: 0,
                skipped: 0,
                failed: 1
            }
        );
    }
}
