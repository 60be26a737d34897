//! 后台任务
//!
//! - 缓存清理：定期清除过期的克隆目录、生成结果和 Prompt 缓存

mod cleanup;

pub use cleanup::spawn_cleanup_task;
