//! 仓库克隆缓存
//!
//! 以 (url, branch) 的哈希为键缓存本地浅克隆。同一键的并发请求只触发一次克隆，
//! 克隆本身通过准入队列限流。条目按最后访问时间过期，由后台任务清理。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::admission::{AdmissionQueue, QueueError};
use super::doc_generator::types::DocGenConfig;
use crate::utils::ttl_cache::{ExpiryPolicy, TtlCache};

/// 克隆错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloneError {
    #[error("无效的仓库地址: {0}")]
    InvalidUrl(String),

    #[error("仓库不存在: {0}")]
    RepositoryNotFound(String),

    #[error("无权访问仓库: {0}")]
    PermissionDenied(String),

    #[error("分支不存在: {0}")]
    BranchNotFound(String),

    #[error("git 操作超时 ({0:?})")]
    Timeout(Duration),

    #[error("git 执行失败: {0}")]
    GitFailed(String),

    #[error("文件系统错误: {0}")]
    Io(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl CloneError {
    /// 超时、网络等错误可以重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloneError::Timeout(_) | CloneError::GitFailed(_) | CloneError::Io(_)
        )
    }
}

/// 根据 git 的 stderr 判断错误类别
pub fn classify_git_error(stderr: &str, branch: Option<&str>) -> CloneError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if (lower.contains("remote branch") && lower.contains("not found"))
        || lower.contains("could not find remote branch")
        || lower.contains("couldn't find remote ref")
    {
        return CloneError::BranchNotFound(branch.unwrap_or("HEAD").to_string());
    }

    if lower.contains("repository not found")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("does not exist")
        || lower.contains("returned error: 404")
    {
        return CloneError::RepositoryNotFound(message);
    }

    if lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("returned error: 403")
    {
        return CloneError::PermissionDenied(message);
    }

    CloneError::GitFailed(message)
}

/// 缓存键：sha256(url#branch)
pub fn cache_key(url: &str, branch: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    hasher.update(b"#");
    hasher.update(branch.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// 一个已克隆的工作副本
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCheckout {
    pub key: String,
    pub local_path: PathBuf,
    pub url: String,
    /// 实际检出的分支
    pub branch: String,
    /// 请求的分支（回退时与 `branch` 不同）
    pub requested_branch: Option<String>,
    pub created_at: DateTime<Local>,
}

/// 克隆参数
#[derive(Debug, Clone)]
pub struct CloneSettings {
    pub workspace_dir: PathBuf,
    pub timeout: Duration,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub ttl: Duration,
    pub max_entries: usize,
    pub git_binary: String,
}

impl CloneSettings {
    pub fn from_config(config: &DocGenConfig) -> Self {
        Self {
            workspace_dir: config.workspace_dir.clone(),
            timeout: config.clone_timeout(),
            attempts: config.clone_attempts.max(1),
            retry_delay: Duration::from_millis(config.clone_retry_delay_ms),
            ttl: config.repo_cache_ttl(),
            max_entries: config.cache_max_entries,
            git_binary: "git".to_string(),
        }
    }

    fn target_dir(&self, key: &str) -> PathBuf {
        self.workspace_dir.join(&key[..16])
    }
}

type Waiter = oneshot::Sender<Result<RepoCheckout, CloneError>>;

struct CacheState {
    entries: TtlCache<String, RepoCheckout>,
    in_flight: HashMap<String, Vec<Waiter>>,
}

/// 克隆缓存统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCacheStats {
    pub cached: usize,
    pub in_flight: usize,
    pub clones_started: u64,
}

/// 克隆缓存（可廉价 clone，内部共享状态）
#[derive(Clone)]
pub struct RepoCache {
    state: Arc<Mutex<CacheState>>,
    settings: Arc<CloneSettings>,
    queue: Arc<AdmissionQueue>,
    clones_started: Arc<AtomicU64>,
}

impl RepoCache {
    pub fn new(settings: CloneSettings, queue: Arc<AdmissionQueue>) -> Self {
        let entries = TtlCache::new(settings.ttl, settings.max_entries, ExpiryPolicy::SinceAccess);
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries,
                in_flight: HashMap::new(),
            })),
            settings: Arc::new(settings),
            queue,
            clones_started: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 获取仓库的本地工作副本
    ///
    /// 命中时刷新访问时间；同一键已有克隆在进行时等待其结果。
    pub async fn acquire(
        &self,
        url: &str,
        branch: Option<&str>,
        priority: i32,
    ) -> Result<RepoCheckout, CloneError> {
        let url = validate_url(url)?;
        let branch = branch.map(str::trim).filter(|b| !b.is_empty()).map(str::to_string);
        let key = cache_key(&url, branch.as_deref());

        let (tx, rx) = oneshot::channel();
        let is_leader = {
            let mut state = self.state.lock();
            if let Some(hit) = state.entries.get(&key) {
                debug!("Repo cache hit: url={}, branch={}", url, hit.branch);
                return Ok(hit);
            }
            match state.in_flight.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    state.in_flight.insert(key.clone(), vec![tx]);
                    true
                }
            }
        };

        if is_leader {
            self.spawn_clone(key, url, branch, priority);
        } else {
            debug!("Repo clone already in flight, waiting: url={}", url);
        }

        rx.await
            .map_err(|_| CloneError::Queue(QueueError::Aborted(self.queue.name())))?
    }

    /// 克隆任务独立运行，发起请求的调用方被取消也不影响其他等待者
    fn spawn_clone(&self, key: String, url: String, branch: Option<String>, priority: i32) {
        let cache = self.clone();
        tokio::spawn(async move {
            cache.clones_started.fetch_add(1, Ordering::Relaxed);
            let job = clone_with_retry(cache.settings.clone(), key.clone(), url.clone(), branch.clone());
            let result = match cache.queue.submit(job, priority).await {
                Ok(Ok(checkout)) => Ok(cache.store(checkout)),
                Ok(Err(CloneError::BranchNotFound(missing))) if branch.is_some() => {
                    cache.fall_back(&url, missing, priority).await
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(CloneError::Queue(e)),
            };
            cache.finish(&key, result);
        });
    }

    /// 请求的分支不存在时改取默认分支
    ///
    /// 默认分支的副本走普通的 `acquire`，与该分支的缓存条目和在途克隆共用同一目录。
    async fn fall_back(
        &self,
        url: &str,
        missing: String,
        priority: i32,
    ) -> Result<RepoCheckout, CloneError> {
        let default_branch = resolve_default_branch(&self.settings, url).await?;
        warn!(
            "Branch {} not found in {}, falling back to {}",
            missing,
            url,
            default_branch.as_deref().unwrap_or("<default>")
        );

        let mut checkout = self.acquire(url, default_branch.as_deref(), priority).await?;
        checkout.requested_branch = Some(missing);
        Ok(checkout)
    }

    /// 写入缓存，容量淘汰的目录在后台删除
    fn store(&self, checkout: RepoCheckout) -> RepoCheckout {
        let evicted = self
            .state
            .lock()
            .entries
            .set(checkout.key.clone(), checkout.clone());
        if let Some((_, old)) = evicted {
            spawn_remove_dir(old.local_path);
        }
        checkout
    }

    /// 通知所有等待者并结束在途状态
    fn finish(&self, key: &str, result: Result<RepoCheckout, CloneError>) {
        let waiters = self.state.lock().in_flight.remove(key).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// 清除过期条目，目录在后台删除
    pub fn sweep_expired(&self) -> usize {
        let expired = self.state.lock().entries.sweep();
        let count = expired.len();
        for (_, checkout) in expired {
            debug!("Repo cache entry expired: {}", checkout.url);
            spawn_remove_dir(checkout.local_path);
        }
        count
    }

    /// 删除所有缓存的工作副本（关闭时调用）
    pub async fn cleanup_all(&self) -> usize {
        let drained = self.state.lock().entries.drain();
        let count = drained.len();
        for (_, checkout) in drained {
            remove_dir_best_effort(&checkout.local_path).await;
        }
        info!("Repo cache cleaned up: {} working copies removed", count);
        count
    }

    pub fn stats(&self) -> RepoCacheStats {
        let state = self.state.lock();
        RepoCacheStats {
            cached: state.entries.len(),
            in_flight: state.in_flight.len(),
            clones_started: self.clones_started.load(Ordering::Relaxed),
        }
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }
}

fn validate_url(url: &str) -> Result<String, CloneError> {
    let url = url.trim();
    if url.is_empty() || url.starts_with('-') || url.chars().any(char::is_whitespace) {
        return Err(CloneError::InvalidUrl(url.to_string()));
    }
    Ok(url.to_string())
}

fn spawn_remove_dir(path: PathBuf) {
    tokio::spawn(async move {
        remove_dir_best_effort(&path).await;
    });
}

async fn remove_dir_best_effort(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("Removed working copy {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove working copy {}: {}", path.display(), e),
    }
}

/// 执行 git 命令，返回 stdout
async fn run_git(
    settings: &CloneSettings,
    args: &[&str],
    cwd: Option<&Path>,
    branch: Option<&str>,
) -> Result<String, CloneError> {
    let mut command = Command::new(&settings.git_binary);
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = tokio::time::timeout(settings.timeout, command.output())
        .await
        .map_err(|_| CloneError::Timeout(settings.timeout))?
        .map_err(|e| CloneError::Io(format!("failed to run git: {}", e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(classify_git_error(&String::from_utf8_lossy(&output.stderr), branch))
    }
}

/// 通过 `ls-remote --symref` 读取远端 HEAD 指向的分支
async fn resolve_default_branch(
    settings: &CloneSettings,
    url: &str,
) -> Result<Option<String>, CloneError> {
    let output = run_git(settings, &["ls-remote", "--symref", "--", url, "HEAD"], None, None).await?;
    Ok(parse_symref_head(&output))
}

/// 解析 `ref: refs/heads/<name>\tHEAD` 行
fn parse_symref_head(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (target, name) = line.strip_prefix("ref:")?.split_once('\t')?;
        if name.trim() != "HEAD" {
            return None;
        }
        target.trim().strip_prefix("refs/heads/").map(str::to_string)
    })
}

/// 单次浅克隆，返回实际检出的分支名
async fn clone_once(
    settings: &CloneSettings,
    url: &str,
    branch: Option<&str>,
    target: &Path,
) -> Result<String, CloneError> {
    match tokio::fs::remove_dir_all(target).await {
        Ok(()) => debug!("Removed stale dir {}", target.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(CloneError::Io(format!("{}: {}", target.display(), e))),
    }
    tokio::fs::create_dir_all(&settings.workspace_dir)
        .await
        .map_err(|e| CloneError::Io(format!("{}: {}", settings.workspace_dir.display(), e)))?;

    let target_str = target.to_string_lossy().into_owned();
    let mut args = vec!["clone", "--depth", "1", "--single-branch"];
    if let Some(branch) = branch {
        args.extend(["--branch", branch]);
    }
    args.extend(["--", url, target_str.as_str()]);

    run_git(settings, &args, None, branch).await?;
    run_git(settings, &["rev-parse", "--abbrev-ref", "HEAD"], Some(target), branch).await
}

/// 克隆任务：暂时性错误按固定间隔重试，其余错误（包括分支不存在）直接返回
async fn clone_with_retry(
    settings: Arc<CloneSettings>,
    key: String,
    url: String,
    requested_branch: Option<String>,
) -> Result<RepoCheckout, CloneError> {
    let target = settings.target_dir(&key);
    let mut attempt = 0;

    loop {
        attempt += 1;
        info!(
            "Cloning {} (branch={}, attempt {}/{})",
            url,
            requested_branch.as_deref().unwrap_or("<default>"),
            attempt,
            settings.attempts
        );

        match clone_once(&settings, &url, requested_branch.as_deref(), &target).await {
            Ok(resolved) => {
                return Ok(RepoCheckout {
                    key,
                    local_path: target,
                    url,
                    branch: resolved,
                    requested_branch,
                    created_at: Local::now(),
                });
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= settings.attempts => {
                warn!("Clone of {} failed after {} attempts: {}", url, attempt, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Clone of {} failed: {}. Retrying in {:?}", url, e, settings.retry_delay);
                tokio::time::sleep(settings.retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?} failed: {}", args, String::from_utf8_lossy(&status.stderr));
    }

    /// 创建只有 main 分支的本地源仓库，返回 file:// 地址
    fn make_origin(root: &Path) -> String {
        let origin = root.join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "-q"]);
        git(&origin, &["checkout", "-q", "-b", "main"]);
        git(&origin, &["config", "user.email", "test@example.com"]);
        git(&origin, &["config", "user.name", "Test"]);
        std::fs::write(origin.join("a.js"), "function f(){}\n").unwrap();
        git(&origin, &["add", "."]);
        git(&origin, &["commit", "-q", "-m", "init"]);
        format!("file://{}", origin.display())
    }

    fn settings(root: &Path) -> CloneSettings {
        CloneSettings {
            workspace_dir: root.join("workspace"),
            timeout: Duration::from_secs(30),
            attempts: 2,
            retry_delay: Duration::from_millis(10),
            ttl: Duration::from_secs(60),
            max_entries: 10,
            git_binary: "git".to_string(),
        }
    }

    #[test]
    fn test_cache_key_depends_on_branch() {
        let a = cache_key("https://github.com/o/r", Some("main"));
        let b = cache_key("https://github.com/o/r", Some("dev"));
        assert_ne!(a, b);
        assert_eq!(a, cache_key(" https://github.com/o/r ", Some("main")));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_classify_git_error() {
        assert_eq!(
            classify_git_error("fatal: Remote branch nope not found in upstream origin", Some("nope")),
            CloneError::BranchNotFound("nope".to_string())
        );
        assert!(matches!(
            classify_git_error("remote: Repository not found.\nfatal: repository 'x' not found", None),
            CloneError::RepositoryNotFound(_)
        ));
        assert!(matches!(
            classify_git_error("git@github.com: Permission denied (publickey).", None),
            CloneError::PermissionDenied(_)
        ));
        let other = classify_git_error("fatal: unable to access: Could not resolve host", None);
        assert!(matches!(other, CloneError::GitFailed(_)));
        assert!(other.is_transient());
    }

    #[test]
    fn test_terminal_errors_are_not_transient() {
        assert!(!CloneError::RepositoryNotFound(String::new()).is_transient());
        assert!(!CloneError::PermissionDenied(String::new()).is_transient());
        assert!(CloneError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let temp = TempDir::new().unwrap();
        let cache = RepoCache::new(settings(temp.path()), Arc::new(AdmissionQueue::new("clones", 1)));
        let err = cache.acquire("--upload-pack=evil", None, 0).await.unwrap_err();
        assert!(matches!(err, CloneError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_clone_and_cache_hit() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let url = make_origin(temp.path());
        let cache = RepoCache::new(settings(temp.path()), Arc::new(AdmissionQueue::new("clones", 1)));

        let first = cache.acquire(&url, Some("main"), 0).await.unwrap();
        assert_eq!(first.branch, "main");
        assert!(first.local_path.join("a.js").exists());

        let second = cache.acquire(&url, Some("main"), 0).await.unwrap();
        assert_eq!(second.local_path, first.local_path);
        assert_eq!(cache.stats().clones_started, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_clone() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let url = make_origin(temp.path());
        let cache = RepoCache::new(settings(temp.path()), Arc::new(AdmissionQueue::new("clones", 2)));

        let (a, b, c) = tokio::join!(
            cache.acquire(&url, Some("main"), 0),
            cache.acquire(&url, Some("main"), 0),
            cache.acquire(&url, Some("main"), 0),
        );
        let a = a.unwrap();
        assert_eq!(b.unwrap().local_path, a.local_path);
        assert_eq!(c.unwrap().local_path, a.local_path);
        assert_eq!(cache.stats().clones_started, 1);
    }

    #[tokio::test]
    async fn test_missing_branch_falls_back_to_default() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let url = make_origin(temp.path());
        let cache = RepoCache::new(settings(temp.path()), Arc::new(AdmissionQueue::new("clones", 1)));

        let checkout = cache.acquire(&url, Some("does-not-exist"), 0).await.unwrap();
        assert_eq!(checkout.branch, "main");
        assert_eq!(checkout.requested_branch.as_deref(), Some("does-not-exist"));
        assert_eq!(checkout.key, cache_key(&url, Some("main")));
        assert!(checkout.local_path.join("a.js").exists());

        // 以实际分支缓存：失败的一次加默认分支的一次
        let again = cache.acquire(&url, Some("main"), 0).await.unwrap();
        assert_eq!(again.local_path, checkout.local_path);
        assert_eq!(cache.stats().clones_started, 2);
    }

    #[tokio::test]
    async fn test_fallback_shares_concurrent_default_branch_clone() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let url = make_origin(temp.path());
        let cache = RepoCache::new(settings(temp.path()), Arc::new(AdmissionQueue::new("clones", 2)));

        let (fallback, direct) = tokio::join!(
            cache.acquire(&url, Some("nope"), 0),
            cache.acquire(&url, Some("main"), 0),
        );
        let fallback = fallback.unwrap();
        let direct = direct.unwrap();

        assert_eq!(fallback.local_path, direct.local_path);
        assert_eq!(fallback.requested_branch.as_deref(), Some("nope"));
        assert!(direct.local_path.join("a.js").exists());
        assert_eq!(cache.stats().clones_started, 2);
        assert_eq!(cache.stats().cached, 1);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[test]
    fn test_parse_symref_head() {
        let output = "ref: refs/heads/trunk\tHEAD\n3f2a9c0d\tHEAD";
        assert_eq!(parse_symref_head(output), Some("trunk".to_string()));
        assert_eq!(parse_symref_head("3f2a9c0d\tHEAD"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_clone_times_out_after_all_attempts() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let counter = temp.path().join("invocations");
        let script = temp.path().join("slow-git");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho call >> '{}'\nexec sleep 5\n", counter.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut cfg = settings(temp.path());
        cfg.timeout = Duration::from_millis(200);
        cfg.attempts = 3;
        cfg.git_binary = script.to_string_lossy().into_owned();
        let cache = RepoCache::new(cfg, Arc::new(AdmissionQueue::new("clones", 1)));

        let err = cache
            .acquire("https://example.invalid/o/r.git", None, 0)
            .await
            .unwrap_err();

        assert_eq!(err, CloneError::Timeout(Duration::from_millis(200)));
        let invocations = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(invocations.lines().count(), 3);
        assert_eq!(cache.stats().cached, 0);
    }

    #[tokio::test]
    async fn test_missing_repository_fails_without_retry() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let url = format!("file://{}", temp.path().join("nothing-here").display());
        let cache = RepoCache::new(settings(temp.path()), Arc::new(AdmissionQueue::new("clones", 1)));

        let err = cache.acquire(&url, None, 0).await.unwrap_err();
        assert!(matches!(err, CloneError::RepositoryNotFound(_)), "got {:?}", err);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_sweep_and_cleanup_remove_directories() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let url = make_origin(temp.path());
        let mut cfg = settings(temp.path());
        cfg.ttl = Duration::from_millis(50);
        let cache = RepoCache::new(cfg, Arc::new(AdmissionQueue::new("clones", 1)));

        let checkout = cache.acquire(&url, None, 0).await.unwrap();
        assert!(checkout.local_path.exists());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.sweep_expired(), 1);
        for _ in 0..100 {
            if !checkout.local_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!checkout.local_path.exists());

        let again = cache.acquire(&url, None, 0).await.unwrap();
        assert_eq!(cache.cleanup_all().await, 1);
        assert!(!again.local_path.exists());
    }
}
