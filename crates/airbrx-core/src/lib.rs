//! airbrx deployment core
//!
//! Provisions, inspects and tears down the airbrx topology through the
//! resource clients of `airbrx-cloud`:
//!
//! - [`pipeline`]: phases of steps with declared artifact dependencies
//! - [`deploy`]: the nine deployment phases
//! - [`reconcile`]: create-if-absent / update-if-present per resource family
//! - [`teardown`]: best-effort removal in reverse order
//! - [`status`]: read-only inspection

pub mod deploy;
pub mod environment;
pub mod error;
pub mod health;
pub mod naming;
pub mod pipeline;
pub mod policy;
pub mod reconcile;
pub mod registry;
pub mod seed;
pub mod source;
pub mod status;
pub mod teardown;

pub use deploy::{DeployContext, Deployer, deployment_phases};
pub use environment::{EnvironmentBuilder, EnvironmentDocument};
pub use error::{DeployError, Result};
pub use health::{HealthProbe, HealthReport, HealthVerdict, HttpProbe};
pub use naming::{Component, ResourceNames};
pub use pipeline::{
    DeploymentResult, Orchestrator, Phase, PhaseReport, Pipeline, ProgressObserver, Step,
    StepOutput,
};
pub use policy::PolicySet;
pub use registry::{ArtifactKey, ArtifactRecord, ArtifactRegistry};
pub use source::{ArtifactSource, DirectorySource, GitSource};
pub use status::{StatusReport, inspect};
pub use teardown::{Teardown, TeardownReport};
