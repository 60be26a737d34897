//! 准入队列
//!
//! 按优先级排队、限制同时执行数量的通用执行器。克隆和整仓处理各用一个实例。
//!
//! 结构：一个调度任务独占优先级堆，固定数量的 worker 循环向它领取任务。
//! worker 数量就是并发上限，`active` 不可能超过它。

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = BoxFuture<'static, ()>;

/// 队列错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("准入队列 {0} 已关闭")]
    Closed(&'static str),

    /// 任务在执行中被中止（panic 或运行时关闭）
    #[error("准入队列 {0} 中的任务被中止")]
    Aborted(&'static str),
}

/// 队列状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub name: &'static str,
    pub active: usize,
    pub pending: usize,
    pub max_concurrent: usize,
}

/// 堆中的等待任务：优先级高者先出，同优先级按提交顺序
struct Queued {
    priority: i32,
    seq: u64,
    job: Job,
}

impl Queued {
    fn rank(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    pending: AtomicUsize,
}

/// 准入队列
pub struct AdmissionQueue {
    name: &'static str,
    max_concurrent: usize,
    submit_tx: mpsc::UnboundedSender<Queued>,
    next_seq: AtomicU64,
    counters: Arc<Counters>,
}

impl AdmissionQueue {
    /// 创建队列并启动调度任务和 worker（需要在 tokio 运行时内调用）
    pub fn new(name: &'static str, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let counters = Arc::new(Counters::default());
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        for worker_id in 0..max_concurrent {
            tokio::spawn(worker_loop(name, worker_id, ready_tx.clone(), counters.clone()));
        }
        drop(ready_tx);

        tokio::spawn(dispatch_loop(name, submit_rx, ready_rx, counters.clone()));

        debug!("Admission queue {} started with {} workers", name, max_concurrent);

        Self {
            name,
            max_concurrent,
            submit_tx,
            next_seq: AtomicU64::new(0),
            counters,
        }
    }

    /// 提交操作并等待其结果
    ///
    /// 操作在获得执行名额之前不会被 poll。
    pub async fn submit<T, F>(&self, operation: F, priority: i32) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = async move {
            let output = operation.await;
            let _ = result_tx.send(output);
        }
        .boxed();

        let queued = Queued {
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            job,
        };

        self.submit_tx
            .send(queued)
            .map_err(|_| QueueError::Closed(self.name))?;

        result_rx.await.map_err(|_| QueueError::Aborted(self.name))
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            name: self.name,
            active: self.counters.active.load(Ordering::SeqCst),
            pending: self.counters.pending.load(Ordering::SeqCst),
            max_concurrent: self.max_concurrent,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 调度任务：唯一持有等待堆的地方
async fn dispatch_loop(
    name: &'static str,
    mut submit_rx: mpsc::UnboundedReceiver<Queued>,
    mut ready_rx: mpsc::UnboundedReceiver<oneshot::Sender<Job>>,
    counters: Arc<Counters>,
) {
    let mut backlog: BinaryHeap<Queued> = BinaryHeap::new();
    let mut idle: VecDeque<oneshot::Sender<Job>> = VecDeque::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            biased;

            submitted = submit_rx.recv(), if accepting => match submitted {
                Some(queued) => backlog.push(queued),
                None => accepting = false,
            },
            ready = ready_rx.recv() => match ready {
                Some(worker) => idle.push_back(worker),
                None => break,
            },
            else => break,
        }

        while !backlog.is_empty() && !idle.is_empty() {
            let (Some(worker), Some(next)) = (idle.pop_front(), backlog.pop()) else {
                break;
            };
            if let Err(job) = worker.send(next.job) {
                // worker 已退出，放回堆里
                backlog.push(Queued {
                    priority: next.priority,
                    seq: next.seq,
                    job,
                });
            }
        }

        counters.pending.store(backlog.len(), Ordering::SeqCst);

        if !accepting && backlog.is_empty() {
            break;
        }
    }

    debug!("Admission queue {} dispatcher stopped", name);
}

/// worker 循环：报告空闲，领取任务，执行，重复
async fn worker_loop(
    name: &'static str,
    worker_id: usize,
    ready_tx: mpsc::UnboundedSender<oneshot::Sender<Job>>,
    counters: Arc<Counters>,
) {
    loop {
        let (job_tx, job_rx) = oneshot::channel();
        if ready_tx.send(job_tx).is_err() {
            break;
        }
        let Ok(job) = job_rx.await else {
            break;
        };

        counters.active.fetch_add(1, Ordering::SeqCst);
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!("Admission queue {} worker {}: task panicked", name, worker_id);
        }
        counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}
