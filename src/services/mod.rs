//! 服务层模块

pub mod admission;
pub mod call_scheduler;
pub mod doc_generator;
pub mod repo_cache;

pub use admission::AdmissionQueue;
pub use call_scheduler::CallScheduler;
pub use doc_generator::DocGenService;
pub use repo_cache::RepoCache;
