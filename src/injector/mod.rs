//! Pod mutation engine
//!
//! Decides from a Pod's annotations and labels whether to inject the
//! SkyWalking agent and JMX exporter, and synthesizes the JSON patch that does
//! it. The engine is synchronous and performs no I/O; the only state it holds
//! is the immutable [`InjectorConfig`].
//!
//! Patch order is part of the contract:
//! 1. `/spec/initContainers`
//! 2. `/spec/volumes`
//! 3. `/spec/containers/{i}/volumeMounts`, `/spec/containers/{i}/env` for each
//!    non-`istio-proxy` container, ascending `i`
//! 4. `/metadata/labels`

mod decision;
mod patch;
mod probes;

pub use decision::{resolve_service_name, InjectionDecision, InstrumentationFlags};
pub use patch::{
    add_agent_volume, add_container_instrumentation, add_init_container, add_jvm_label,
    agent_arguments, agent_init_container, AGENT_ARGS_ENV, AGENT_MOUNT_PATH, AGENT_VOLUME_NAME,
    INIT_CONTAINER_NAME, JVM_LABEL,
};
pub use probes::{ignore_path_arg, ProbeRewriteMap, IGNORE_PATH_PROPERTY};

use json_patch::PatchOperation;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::AdmissionRequest;
use kube::core::{DynamicObject, GroupVersionResource};
use tracing::{debug, warn};

use crate::config::InjectorConfig;
use crate::{Error, Result};

/// Annotation that opts a pod into agent injection
pub const INJECTION_ANNOTATION: &str = "linkedcare.io/skyworking-injection";

/// Annotation that opts a pod into the `jvm=prometheus` label and, when set to
/// `"false"`, drops the JMX exporter from the agent arguments
pub const JVM_ENABLED_ANNOTATION: &str = "linkedcare.io/jvm-enabled";

/// Annotation that, when `"false"`, drops the SkyWalking javaagent
pub const SKYWORKING_ENABLED_ANNOTATION: &str = "linkedcare.io/skyworking-enabled";

/// Annotation overriding the SkyWalking service name
pub const SERVICE_ANNOTATION: &str = "linkedcare.io/skyworking-service";

/// Reserved sidecar name: never instrumented, source of probe rewrites
pub const ISTIO_PROXY_CONTAINER: &str = "istio-proxy";

/// Env var on `istio-proxy` holding the JSON prober map
pub const ISTIO_PROBERS_ENV: &str = "ISTIO_KUBE_APP_PROBERS";

/// True when the request targets core/v1 pods
pub fn is_pod_resource(resource: &GroupVersionResource) -> bool {
    resource.group.is_empty() && resource.version == "v1" && resource.resource == "pods"
}

/// Decode the object embedded in an admission request as a Pod
pub fn decode_pod(object: Option<&DynamicObject>) -> Result<Pod> {
    let object = object.ok_or_else(|| Error::decode("admission request carries no object"))?;
    let value = serde_json::to_value(object)
        .map_err(|e| Error::decode(format!("could not read pod object: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| Error::decode(format!("could not deserialize pod object: {e}")))
}

/// The mutated copy of a pod together with the operations that produce it
///
/// Applying `operations` to the original pod yields `pod`.
#[derive(Clone, Debug)]
pub struct InjectionPlan {
    /// The pod after every mutation
    pub pod: Pod,
    /// Ordered `add` operations
    pub operations: Vec<PatchOperation>,
}

/// Computes the JSON patch for incoming pods
#[derive(Clone, Debug)]
pub struct PatchEngine {
    config: InjectorConfig,
}

impl PatchEngine {
    /// Create an engine with the given configuration
    pub fn new(config: InjectorConfig) -> Self {
        Self { config }
    }

    /// The configuration this engine was built with
    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    /// Compute the patch for an admission request
    ///
    /// Requests for anything other than pods pass through with no operations.
    /// A pod that cannot be decoded is an error.
    pub fn compute_patches(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Vec<PatchOperation>> {
        if !is_pod_resource(&request.resource) {
            warn!(
                uid = %request.uid,
                group = %request.resource.group,
                version = %request.resource.version,
                resource = %request.resource.resource,
                "Expected resource to be v1 pods, allowing unchanged"
            );
            return Ok(Vec::new());
        }

        let pod = decode_pod(request.object.as_ref())?;
        Ok(self.plan(&pod)?.operations)
    }

    /// Mutate a copy of `pod` and record the operations
    ///
    /// A pod without a `spec` gets no sidecar operations, since there is no
    /// `/spec` for them to land in.
    pub fn plan(&self, pod: &Pod) -> Result<InjectionPlan> {
        let decision = InjectionDecision::from_pod(pod);
        let mut mutated = pod.clone();
        let mut operations = Vec::new();

        if decision.is_noop() {
            debug!(pod = ?pod.metadata.name, "Pod not annotated for injection");
            return Ok(InjectionPlan {
                pod: mutated,
                operations,
            });
        }

        if decision.inject_sidecar {
            match mutated.spec.as_mut() {
                Some(spec) => {
                    operations.push(add_init_container(spec, &self.config.agent_image)?);
                    operations.push(add_agent_volume(spec)?);
                    operations.extend(add_container_instrumentation(
                        &mut mutated,
                        &self.config.collector_backend,
                    )?);
                }
                None => warn!(
                    pod = ?pod.metadata.name,
                    "Pod has no spec, skipping agent injection"
                ),
            }
        }

        if decision.inject_jvm_label {
            operations.push(add_jvm_label(&mut mutated)?);
        }

        debug!(
            pod = ?pod.metadata.name,
            inject_sidecar = decision.inject_sidecar,
            inject_jvm_label = decision.inject_jvm_label,
            operations = operations.len(),
            "Computed pod patch"
        );

        Ok(InjectionPlan {
            pod: mutated,
            operations,
        })
    }
}
