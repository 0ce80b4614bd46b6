pub mod attacher;
pub mod config;
pub mod database;
pub mod derivatives;
pub mod entity;
pub mod error;
pub mod guard;
pub mod jobs;
pub mod outcome;
pub mod promotion;
pub mod source;
pub mod state;

pub use attacher::{Attacher, Attachment, Disposal, NewFile};
pub use derivatives::{
    AttachOutcome, DerivativeGenerator, DerivativeReport, DerivativeRun, DerivativeStore,
    GeneratedFile, GeneratorRegistry, NewDerivative, SourceFile, builtin_registry,
};
pub use error::{EngineError, Result};
pub use jobs::{JobReport, JobRunner};
pub use outcome::AbortReason;
pub use promotion::{
    AfterHook, AroundHook, BeforeHook, Continuation, HookContext, HookOutcome, LifecycleHooks,
    PromotionMachine, PromotionOutcome, PromotionState, Transition,
};
pub use state::Engine;
