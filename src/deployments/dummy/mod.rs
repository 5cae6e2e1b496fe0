//! Sample deployment (`project: dummy`)
//!
//! Jobs with their results, value overrides and hyper parameters, exposed to
//! the configured consumer `dummy`.

pub mod entities;

pub use entities::{HyperParameter, HyperParameterForJob, Job, JobResult, ValueOverride};

use crate::core::auth::Access;
use crate::core::error::ConfigError;
use crate::core::module::Module;
use crate::core::store::DataStore;
use crate::relations::Relation;
use crate::server::entity_registry::{EntityExposure, Registrar};
use crate::storage::in_memory::InMemoryStore;
use std::sync::Arc;

/// Consumer the sample rules are granted to
pub const DUMMY_CONSUMER: &str = "dummy";

pub struct DummyModule {
    jobs: Arc<dyn DataStore<Job>>,
    results: Arc<dyn DataStore<JobResult>>,
    parameters: Arc<dyn DataStore<HyperParameter>>,
    assignments: Arc<dyn DataStore<HyperParameterForJob>>,
    overrides: Arc<dyn DataStore<ValueOverride>>,
}

impl DummyModule {
    /// A module backed by fresh in-memory stores
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(InMemoryStore::<Job>::new()),
            results: Arc::new(InMemoryStore::<JobResult>::new()),
            parameters: Arc::new(InMemoryStore::<HyperParameter>::new()),
            assignments: Arc::new(InMemoryStore::<HyperParameterForJob>::new()),
            overrides: Arc::new(InMemoryStore::<ValueOverride>::new()),
        }
    }

    pub fn jobs(&self) -> Arc<dyn DataStore<Job>> {
        Arc::clone(&self.jobs)
    }
}

impl Default for DummyModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for DummyModule {
    fn name(&self) -> &str {
        "dummy"
    }

    fn register(&self, registrar: &mut Registrar<'_>) -> Result<(), ConfigError> {
        let key = registrar.consumer_key(DUMMY_CONSUMER)?;

        let job_results = Relation::<Job, JobResult>::on("job_id")?;
        let job_overrides = Relation::<Job, ValueOverride>::on("job_id")?;
        let job_parameters = Relation::<Job, HyperParameterForJob>::on("job_id")?;
        let parameter_jobs = Relation::<HyperParameter, HyperParameterForJob>::on("hyper_parameter_id")?;

        registrar
            .expose(
                EntityExposure::new(Arc::clone(&self.jobs))
                    .grant(key.as_str(), Access::INSERT_READ)
                    .expand_children(job_results, Arc::clone(&self.results))
                    .expand_children(job_overrides, Arc::clone(&self.overrides))
                    .expand_children(job_parameters, Arc::clone(&self.assignments)),
            )?
            .expose(
                EntityExposure::new(Arc::clone(&self.results))
                    .grant(key.as_str(), Access::READ)
                    .expand_parent(job_results, Arc::clone(&self.jobs)),
            )?
            .expose(
                EntityExposure::new(Arc::clone(&self.overrides))
                    .grant(key.as_str(), Access::FULL)
                    .expand_parent(job_overrides, Arc::clone(&self.jobs)),
            )?
            .expose(
                EntityExposure::new(Arc::clone(&self.parameters))
                    .grant(key.as_str(), Access::FULL)
                    .expand_children(parameter_jobs, Arc::clone(&self.assignments)),
            )?
            .expose(
                EntityExposure::new(Arc::clone(&self.assignments))
                    .grant(key.as_str(), Access::READ)
                    .expand_parent(job_parameters, Arc::clone(&self.jobs))
                    .expand_parent(parameter_jobs, Arc::clone(&self.parameters)),
            )?;

        Ok(())
    }
}
