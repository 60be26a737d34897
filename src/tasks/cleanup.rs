//! 缓存清理任务

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::services::DocGenService;

/// 启动定期清理任务
///
/// 每隔 `interval` 清理一次所有缓存中的过期条目。返回的句柄可在关闭时 `abort()`。
pub fn spawn_cleanup_task(service: Arc<DocGenService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting cache cleanup task, interval={:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let report = service.sweep_caches();
            if report.total() > 0 {
                info!(
                    "Cache cleanup: repos={}, results={}, prompts={}, completions={}",
                    report.repos, report.results, report.prompts, report.completions
                );
            } else {
                debug!("Cache cleanup: nothing expired");
            }
        }
    })
}
