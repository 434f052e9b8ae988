//! Process-wide injector configuration
//!
//! The agent image and collector endpoint are read once at startup and handed
//! to the [`PatchEngine`](crate::injector::PatchEngine) as an explicit value.

use crate::{Error, Result};

/// Default SkyWalking agent image copied into pods by the init container
pub const DEFAULT_AGENT_IMAGE: &str =
    "registry.cn-hangzhou.aliyuncs.com/linkedcare/skywalking-agent:v2-jmx";

/// Configuration consumed by the patch engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectorConfig {
    /// Image of the init container that ships the agent jars
    pub agent_image: String,
    /// SkyWalking OAP address passed as `collector.backend_service`
    /// (e.g. `skywalking-oap.sre.svc.cluster.local:11800`)
    pub collector_backend: String,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            agent_image: DEFAULT_AGENT_IMAGE.to_string(),
            collector_backend: String::new(),
        }
    }
}

impl InjectorConfig {
    /// Create a configuration for the given image and collector
    pub fn new(agent_image: impl Into<String>, collector_backend: impl Into<String>) -> Self {
        Self {
            agent_image: agent_image.into(),
            collector_backend: collector_backend.into(),
        }
    }

    /// Reject configurations that would produce unusable pods
    ///
    /// An empty collector is accepted: the agent then starts without a
    /// backend, which matches running with `SKYWORKING_SERVER` unset.
    pub fn validate(&self) -> Result<()> {
        if self.agent_image.trim().is_empty() {
            return Err(Error::config("agent image must not be empty"));
        }
        if self.collector_backend.chars().any(char::is_whitespace) {
            return Err(Error::config(format!(
                "collector backend '{}' must not contain whitespace",
                self.collector_backend
            )));
        }
        Ok(())
    }
}
