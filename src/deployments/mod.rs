//! Deployments selectable by `project` in the configuration

pub mod dummy;

use crate::core::error::ConfigError;
use crate::core::module::Module;

/// Look up the module registered under `project`
pub fn module_for(project: &str) -> Result<Box<dyn Module>, ConfigError> {
    match project {
        "dummy" => Ok(Box::new(dummy::DummyModule::new())),
        other => Err(ConfigError::UnknownProject {
            project: other.to_string(),
        }),
    }
}
