//! JSON patch synthesis
//!
//! Each function mutates the working copy of the pod and returns an `add`
//! operation carrying the whole resulting array or map, so consumers that
//! expect full-array replacement keep working.

use std::collections::BTreeMap;

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, Pod, PodSpec, ResourceRequirements, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;

use super::decision::{resolve_service_name, InstrumentationFlags};
use super::probes::{ignore_path_arg, ProbeRewriteMap};
use super::ISTIO_PROXY_CONTAINER;
use crate::Result;

/// Name of the emptyDir volume shared by the init container and the app
pub const AGENT_VOLUME_NAME: &str = "skyworking-agent";

/// Where the agent volume is mounted in every container
pub const AGENT_MOUNT_PATH: &str = "/skyworking";

/// Name of the init container that copies the agent into the volume
pub const INIT_CONTAINER_NAME: &str = "sky-working-init";

/// Env var carrying the JVM arguments; the application's entrypoint is
/// expected to splice it into its `java` command line
pub const AGENT_ARGS_ENV: &str = "SKYWORKING_ARGES";

/// Label added for Prometheus JVM scraping
pub const JVM_LABEL: (&str, &str) = ("jvm", "prometheus");

const AGENT_SOURCE_DIR: &str = "/usr/local/agent";
const SKYWALKING_AGENT_JAR: &str = "/skyworking/agent/skywalking-agent.jar";
const JMX_EXPORTER_ARG: &str = " -javaagent:/skyworking/agent/jmx/jmx_prometheus_javaagent-0.13.0.jar=65533:/skyworking/agent/jmx/config.yaml";

fn add_operation<T: Serialize + ?Sized>(path: PointerBuf, value: &T) -> Result<PatchOperation> {
    Ok(PatchOperation::Add(AddOperation {
        path,
        value: serde_json::to_value(value)?,
    }))
}

fn agent_volume_mount() -> VolumeMount {
    VolumeMount {
        name: AGENT_VOLUME_NAME.to_string(),
        mount_path: AGENT_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

/// Build the init container that copies the agent into the shared volume
pub fn agent_init_container(image: &str) -> Container {
    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        resources: Some(ResourceRequirements {
            requests: Some(quantities("10m", "20Mi")),
            limits: Some(quantities("30m", "50Mi")),
            ..Default::default()
        }),
        volume_mounts: Some(vec![agent_volume_mount()]),
        command: Some(
            ["cp", "-rf", AGENT_SOURCE_DIR, AGENT_MOUNT_PATH]
                .map(String::from)
                .to_vec(),
        ),
        ..Default::default()
    }
}

/// Append the agent init container and patch `/spec/initContainers`
pub fn add_init_container(spec: &mut PodSpec, image: &str) -> Result<PatchOperation> {
    let init_containers = spec.init_containers.get_or_insert_with(Vec::new);
    init_containers.push(agent_init_container(image));

    add_operation(
        PointerBuf::from_tokens(["spec", "initContainers"]),
        &*init_containers,
    )
}

/// Append the agent emptyDir volume and patch `/spec/volumes`
pub fn add_agent_volume(spec: &mut PodSpec) -> Result<PatchOperation> {
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    volumes.push(Volume {
        name: AGENT_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    });

    add_operation(PointerBuf::from_tokens(["spec", "volumes"]), &*volumes)
}

/// Set `jvm=prometheus` and patch `/metadata/labels`
///
/// The label map is created when the pod has none.
pub fn add_jvm_label(pod: &mut Pod) -> Result<PatchOperation> {
    let labels = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
    let (key, value) = JVM_LABEL;
    labels.insert(key.to_string(), value.to_string());

    add_operation(PointerBuf::from_tokens(["metadata", "labels"]), &*labels)
}

/// Compose the value of `SKYWORKING_ARGES`
///
/// The SkyWalking part is `<ignore-path> -javaagent:...`; with no ignore
/// path it keeps its leading space. Both agents disabled yields an empty
/// string.
pub fn agent_arguments(
    ignore_path: &str,
    service_name: &str,
    collector_backend: &str,
    flags: InstrumentationFlags,
) -> String {
    let mut args = String::new();
    if flags.skyworking_enabled {
        args.push_str(&format!(
            "{ignore_path} -javaagent:{SKYWALKING_AGENT_JAR}=agent.service_name={service_name},collector.backend_service={collector_backend}"
        ));
    }
    if flags.jvm_enabled {
        args.push_str(JMX_EXPORTER_ARG);
    }
    args
}

/// Instrument every application container of the pod
///
/// For each container other than `istio-proxy`, in spec order, appends the
/// agent volume mount and the `SKYWORKING_ARGES` env var, then emits the
/// `volumeMounts` patch followed by the `env` patch. Paths use the
/// container's original index.
pub fn add_container_instrumentation(
    pod: &mut Pod,
    collector_backend: &str,
) -> Result<Vec<PatchOperation>> {
    let service_name = resolve_service_name(pod);
    let flags = InstrumentationFlags::from_pod(pod);
    let rewrites = ProbeRewriteMap::from_pod(pod);

    let Some(spec) = pod.spec.as_mut() else {
        return Ok(Vec::new());
    };

    let mut ops = Vec::with_capacity(spec.containers.len() * 2);
    for (index, container) in spec.containers.iter_mut().enumerate() {
        if container.name == ISTIO_PROXY_CONTAINER {
            continue;
        }

        let ignore_path = ignore_path_arg(container, &rewrites);
        let args = agent_arguments(&ignore_path, &service_name, collector_backend, flags);

        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        mounts.push(agent_volume_mount());
        let index = index.to_string();
        ops.push(add_operation(
            PointerBuf::from_tokens(["spec", "containers", index.as_str(), "volumeMounts"]),
            &*mounts,
        )?);

        let env = container.env.get_or_insert_with(Vec::new);
        env.push(EnvVar {
            name: AGENT_ARGS_ENV.to_string(),
            value: Some(args),
            value_from: None,
        });
        ops.push(add_operation(
            PointerBuf::from_tokens(["spec", "containers", index.as_str(), "env"]),
            &*env,
        )?);
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::test_pods::{container_with_probes, istio_proxy, PodBuilder};
    use serde_json::json;

    fn add_parts(op: &PatchOperation) -> (String, serde_json::Value) {
        match op {
            PatchOperation::Add(a) => (a.path.to_string(), a.value.clone()),
            other => panic!("expected add operation, got {other:?}"),
        }
    }

    const BOTH: InstrumentationFlags = InstrumentationFlags {
        skyworking_enabled: true,
        jvm_enabled: true,
    };

    // =========================================================================
    // Agent Arguments
    // =========================================================================

    #[test]
    fn arguments_with_both_agents() {
        let args = agent_arguments(
            "-Dskywalking.trace.ignore_path=/h",
            "orders",
            "oap:11800",
            BOTH,
        );
        assert_eq!(
            args,
            "-Dskywalking.trace.ignore_path=/h -javaagent:/skyworking/agent/skywalking-agent.jar=agent.service_name=orders,collector.backend_service=oap:11800 -javaagent:/skyworking/agent/jmx/jmx_prometheus_javaagent-0.13.0.jar=65533:/skyworking/agent/jmx/config.yaml"
        );
    }

    #[test]
    fn arguments_without_ignore_path_have_no_ignore_flag() {
        let args = agent_arguments("", "orders", "oap:11800", BOTH);
        assert!(!args.contains("ignore_path"));
        assert!(args.starts_with(" -javaagent:/skyworking/agent/skywalking-agent.jar"));
    }

    #[test]
    fn arguments_jvm_only_skip_service_name() {
        let flags = InstrumentationFlags {
            skyworking_enabled: false,
            jvm_enabled: true,
        };
        let args = agent_arguments("-Dskywalking.trace.ignore_path=/h", "orders", "oap", flags);
        assert_eq!(args, JMX_EXPORTER_ARG);
        assert!(!args.contains("orders"));
    }

    #[test]
    fn arguments_both_disabled_are_empty() {
        let flags = InstrumentationFlags {
            skyworking_enabled: false,
            jvm_enabled: false,
        };
        assert_eq!(agent_arguments("x", "orders", "oap", flags), "");
    }

    // =========================================================================
    // Structural Patches
    // =========================================================================

    #[test]
    fn init_container_appended_after_existing() {
        let mut pod = PodBuilder::new()
            .container(container_with_probes("app", None, None))
            .init_container("migrate")
            .build();

        let spec = pod.spec.as_mut().unwrap();
        let (path, value) = add_parts(&add_init_container(spec, "agent:v1").unwrap());
        assert_eq!(path, "/spec/initContainers");
        let init = value.as_array().unwrap();
        assert_eq!(init.len(), 2);
        assert_eq!(init[0]["name"], "migrate");
        assert_eq!(
            init[1],
            json!({
                "name": "sky-working-init",
                "image": "agent:v1",
                "imagePullPolicy": "Always",
                "command": ["cp", "-rf", "/usr/local/agent", "/skyworking"],
                "resources": {
                    "requests": {"cpu": "10m", "memory": "20Mi"},
                    "limits": {"cpu": "30m", "memory": "50Mi"}
                },
                "volumeMounts": [{"name": "skyworking-agent", "mountPath": "/skyworking"}]
            })
        );
    }

    #[test]
    fn volume_patch_carries_whole_array() {
        let mut pod = PodBuilder::new()
            .container(container_with_probes("app", None, None))
            .volume("config")
            .build();

        let spec = pod.spec.as_mut().unwrap();
        let (path, value) = add_parts(&add_agent_volume(spec).unwrap());
        assert_eq!(path, "/spec/volumes");
        assert_eq!(
            value,
            json!([
                {"name": "config", "emptyDir": {}},
                {"name": "skyworking-agent", "emptyDir": {}}
            ])
        );
    }

    #[test]
    fn jvm_label_keeps_existing_labels() {
        let mut pod = PodBuilder::new().label("app", "orders").build();
        let (path, value) = add_parts(&add_jvm_label(&mut pod).unwrap());
        assert_eq!(path, "/metadata/labels");
        assert_eq!(value, json!({"app": "orders", "jvm": "prometheus"}));
    }

    /// Story: a pod without any labels gets a fresh label map instead of a crash
    #[test]
    fn story_jvm_label_allocates_missing_map() {
        let mut pod = PodBuilder::new().build();
        assert!(pod.metadata.labels.is_none());

        let (_, value) = add_parts(&add_jvm_label(&mut pod).unwrap());
        assert_eq!(value, json!({"jvm": "prometheus"}));
        assert_eq!(
            pod.metadata.labels.unwrap().get("jvm").map(String::as_str),
            Some("prometheus")
        );
    }

    // =========================================================================
    // Container Patches
    // =========================================================================

    #[test]
    fn container_patches_skip_istio_without_renumbering() {
        let mut pod = PodBuilder::new()
            .container(container_with_probes("web", None, None))
            .container(istio_proxy("{}"))
            .container(container_with_probes("app", None, None))
            .build();

        let ops = add_container_instrumentation(&mut pod, "oap").unwrap();
        let paths: Vec<String> = ops.iter().map(|op| add_parts(op).0).collect();
        assert_eq!(
            paths,
            vec![
                "/spec/containers/0/volumeMounts",
                "/spec/containers/0/env",
                "/spec/containers/2/volumeMounts",
                "/spec/containers/2/env",
            ]
        );
    }

    #[test]
    fn container_env_appended_after_existing() {
        let mut app = container_with_probes("app", Some("/live"), Some("/ready"));
        app.env = Some(vec![EnvVar {
            name: "JAVA_OPTS".to_string(),
            value: Some("-Xmx512m".to_string()),
            value_from: None,
        }]);
        let mut pod = PodBuilder::new().label("app", "orders").container(app).build();

        let ops = add_container_instrumentation(&mut pod, "oap:11800").unwrap();
        assert_eq!(ops.len(), 2);

        let (_, mounts) = add_parts(&ops[0]);
        assert_eq!(
            mounts,
            json!([{"name": "skyworking-agent", "mountPath": "/skyworking"}])
        );

        let (_, env) = add_parts(&ops[1]);
        let env = env.as_array().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0]["name"], "JAVA_OPTS");
        assert_eq!(env[1]["name"], AGENT_ARGS_ENV);
        let value = env[1]["value"].as_str().unwrap();
        assert!(value.starts_with("-Dskywalking.trace.ignore_path=/live,/ready -javaagent:"));
        assert!(value.contains("agent.service_name=orders,collector.backend_service=oap:11800"));
    }

    #[test]
    fn istio_proxy_is_left_untouched() {
        let mut pod = PodBuilder::new()
            .container(container_with_probes("app", None, None))
            .container(istio_proxy("{}"))
            .build();
        let before = pod.spec.as_ref().unwrap().containers[1].clone();

        add_container_instrumentation(&mut pod, "oap").unwrap();
        assert_eq!(pod.spec.as_ref().unwrap().containers[1], before);
    }
}
