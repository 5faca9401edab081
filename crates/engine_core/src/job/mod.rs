//! The job subsystem: lifecycle status, futures, generators, pre-run
//! decorators, and the `Job` state machine itself (spec §4.2).

pub mod core;
pub mod decorators;
pub mod future;
pub mod generator;
pub mod status;

pub use core::{FnJob, Job, JobArg, JobBody, JobFn, JobGenFn, JobSpec};
pub use future::{
    sync_done_callback, sync_error_callback, BoxFuture, DoneCallback, ErrorCallback, JobFuture,
    JobOutput,
};
pub use generator::{GeneratorHandle, GeneratorStep, JobGenerator};
pub use status::Status;
