//! airbrx cloud abstraction
//!
//! Resource client traits for the four AWS services the deployer drives,
//! the typed descriptors handed to them, and the bookkeeping shared by
//! every provider (actions, run-state snapshots).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   airbrx CLI                     │
//! │          (deploy / status / teardown)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                  airbrx-core                     │
//! │        phases · reconcilers · teardown           │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 airbrx-cloud                     │
//! │  ObjectStorage · RoleStore · FunctionHost · Cdn  │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ airbrx-cloud- │ │    memory     │
//! │      aws      │ │  (dry-run)    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod error;
pub mod memory;
pub mod provider;
pub mod resource;
pub mod state;

// Re-exports
pub use action::{Action, ActionSummary, ActionType, ApplyResult, ResourceKind};
pub use error::{CloudError, Result};
pub use memory::{InjectedFailure, MemoryProvider};
pub use provider::{
    AuthStatus, Cdn, CloudProvider, FunctionHost, ObjectStorage, RoleStore, WaitConfig,
};
pub use resource::{
    BucketSpec, DistributionInfo, DistributionSpec, FunctionInfo, FunctionSpec, FunctionState,
    ObjectVersion, OriginAccessControlInfo, OriginAccessControlSpec, OriginKind,
    PublicAccessBlock, ResourceTag, RoleInfo, RoleSpec,
};
pub use state::{RunOutcome, RunState, StateLock, StateManager};
