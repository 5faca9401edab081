//! In-process asynchronous job execution engine.
//!
//! An [`Engine`] supervises [`Job`]s: async callables (or generators)
//! admitted to run once their [`Condition`] is satisfied and a backend
//! resource slot is free, with automatic dependency resolution between
//! jobs joined by a shared [`JobFuture`]. See `SPEC_FULL.md` in the
//! repository root for the full module-by-module contract.

pub mod backend;
pub mod condition;
pub mod engine;
pub mod error;
pub mod job;
pub mod launcher;
pub mod manager;
pub mod persistence;
pub mod store;

pub use backend::sentinel::{cron_job, sentinel_job, SentinelSpec};
pub use backend::subprocess::{subprocess_job, SubprocessSpec};
pub use backend::webapp::{webapp_job, WebappSpec};
pub use backend::{Backend, BackendKind};
pub use condition::{Condition, EngineSnapshot, JoinMode, TimepointField};
pub use engine::{CacheType, Engine, EngineSetting};
pub use engine_logging::{init_logging, LogConfig};
pub use error::{EngineError, Result};
pub use job::{Job, JobArg, JobBody, JobFn, JobFuture, JobOutput, JobSpec, Status};
pub use launcher::{get_default_engine, set_default_engine, Launcher};
pub use manager::Jobs;
