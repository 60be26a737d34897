//! 仓库文档生成服务
//!
//! 克隆仓库或接收内联文件，扫描过滤后分块提交给远程语言模型，生成 Markdown 文档。

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod services;
pub mod state;
pub mod tasks;
pub mod utils;

pub use api::create_api_routes;
pub use services::DocGenService;
pub use state::{create_shared_state, AppState};
pub use tasks::spawn_cleanup_task;
