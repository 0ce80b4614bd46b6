pub mod config;
pub mod directive;
pub mod job;
pub mod mq;
pub mod storage;

pub use directive::{
    DirectiveDefaults, DirectiveError, DirectiveKey, DirectiveValue, Directives, ExecutionMode,
};
pub use job::{AssetJob, DerivativeSelection, JobOperation, JobQueue};
