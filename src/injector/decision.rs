//! Annotation and label inspection
//!
//! Everything the engine decides about a pod comes from its metadata. Missing
//! labels and annotations are ordinary absent values, never errors.

use k8s_openapi::api::core::v1::Pod;

use super::{
    INJECTION_ANNOTATION, JVM_ENABLED_ANNOTATION, SERVICE_ANNOTATION,
    SKYWORKING_ENABLED_ANNOTATION,
};

/// Look up an annotation value on a pod
pub(crate) fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

fn label<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

/// Which top-level mutations a pod opted into
///
/// Both are opt-in: only the exact value `"true"` enables them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InjectionDecision {
    /// Add the init container, agent volume and per-container arguments
    pub inject_sidecar: bool,
    /// Add the `jvm=prometheus` label
    pub inject_jvm_label: bool,
}

impl InjectionDecision {
    /// Read the decision from the pod's annotations
    pub fn from_pod(pod: &Pod) -> Self {
        Self {
            inject_sidecar: annotation(pod, INJECTION_ANNOTATION) == Some("true"),
            inject_jvm_label: annotation(pod, JVM_ENABLED_ANNOTATION) == Some("true"),
        }
    }

    /// True when the pod is left untouched
    pub fn is_noop(&self) -> bool {
        !self.inject_sidecar && !self.inject_jvm_label
    }
}

/// Which javaagents end up in `SKYWORKING_ARGES`
///
/// Both default to enabled and only the literal `"false"` turns one off, so a
/// typo in the annotation keeps instrumentation on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstrumentationFlags {
    /// Emit the SkyWalking javaagent (and ignore-path) arguments
    pub skyworking_enabled: bool,
    /// Emit the JMX exporter javaagent argument
    pub jvm_enabled: bool,
}

impl Default for InstrumentationFlags {
    fn default() -> Self {
        Self {
            skyworking_enabled: true,
            jvm_enabled: true,
        }
    }
}

impl InstrumentationFlags {
    /// Read the flags from the pod's annotations
    pub fn from_pod(pod: &Pod) -> Self {
        Self {
            skyworking_enabled: annotation(pod, SKYWORKING_ENABLED_ANNOTATION) != Some("false"),
            jvm_enabled: annotation(pod, JVM_ENABLED_ANNOTATION) != Some("false"),
        }
    }
}

/// Resolve the SkyWalking service name for a pod
///
/// Sources are applied in order `run` label, `app` label, then the
/// `linkedcare.io/skyworking-service` annotation; each present source
/// overrides the previous one. No source yields an empty name.
pub fn resolve_service_name(pod: &Pod) -> String {
    [
        label(pod, "run"),
        label(pod, "app"),
        annotation(pod, SERVICE_ANNOTATION),
    ]
    .into_iter()
    .flatten()
    .last()
    .unwrap_or_default()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::test_pods::{pod_with_metadata, PodBuilder};

    // =========================================================================
    // Injection Decision
    // =========================================================================

    #[test]
    fn no_annotations_means_no_injection() {
        let pod = PodBuilder::new().build();
        let decision = InjectionDecision::from_pod(&pod);
        assert_eq!(decision, InjectionDecision::default());
        assert!(decision.is_noop());
    }

    #[test]
    fn injection_requires_exact_true() {
        for value in ["True", "yes", "1", "", " true"] {
            let pod = PodBuilder::new()
                .annotation(INJECTION_ANNOTATION, value)
                .build();
            assert!(
                !InjectionDecision::from_pod(&pod).inject_sidecar,
                "value {value:?} must not enable injection"
            );
        }

        let pod = PodBuilder::new()
            .annotation(INJECTION_ANNOTATION, "true")
            .build();
        assert!(InjectionDecision::from_pod(&pod).inject_sidecar);
    }

    #[test]
    fn sidecar_and_label_are_independent() {
        let pod = PodBuilder::new()
            .annotation(JVM_ENABLED_ANNOTATION, "true")
            .build();
        let decision = InjectionDecision::from_pod(&pod);
        assert!(!decision.inject_sidecar);
        assert!(decision.inject_jvm_label);

        let pod = PodBuilder::new()
            .annotation(INJECTION_ANNOTATION, "true")
            .annotation(JVM_ENABLED_ANNOTATION, "true")
            .build();
        let decision = InjectionDecision::from_pod(&pod);
        assert!(decision.inject_sidecar && decision.inject_jvm_label);
    }

    // =========================================================================
    // Instrumentation Flags
    // =========================================================================

    #[test]
    fn flags_default_to_enabled() {
        let pod = PodBuilder::new().build();
        assert_eq!(
            InstrumentationFlags::from_pod(&pod),
            InstrumentationFlags::default()
        );
    }

    #[test]
    fn only_literal_false_disables() {
        let pod = PodBuilder::new()
            .annotation(SKYWORKING_ENABLED_ANNOTATION, "false")
            .annotation(JVM_ENABLED_ANNOTATION, "false")
            .build();
        let flags = InstrumentationFlags::from_pod(&pod);
        assert!(!flags.skyworking_enabled);
        assert!(!flags.jvm_enabled);
    }

    /// Story: a malformed annotation keeps instrumentation on
    #[test]
    fn story_malformed_flags_fail_open() {
        let pod = PodBuilder::new()
            .annotation(SKYWORKING_ENABLED_ANNOTATION, "FALSE")
            .annotation(JVM_ENABLED_ANNOTATION, "no")
            .build();
        let flags = InstrumentationFlags::from_pod(&pod);
        assert!(flags.skyworking_enabled);
        assert!(flags.jvm_enabled);
    }

    // =========================================================================
    // Service Name
    // =========================================================================

    #[test]
    fn service_name_empty_without_sources() {
        let pod = PodBuilder::new().build();
        assert_eq!(resolve_service_name(&pod), "");
    }

    #[test]
    fn app_label_overrides_run_label() {
        let pod = pod_with_metadata(&[("run", "a"), ("app", "b")], &[]);
        assert_eq!(resolve_service_name(&pod), "b");
    }

    #[test]
    fn run_label_alone_is_used() {
        let pod = pod_with_metadata(&[("run", "a")], &[]);
        assert_eq!(resolve_service_name(&pod), "a");
    }

    #[test]
    fn annotation_overrides_labels() {
        let pod = pod_with_metadata(&[("run", "a"), ("app", "b")], &[(SERVICE_ANNOTATION, "c")]);
        assert_eq!(resolve_service_name(&pod), "c");

        let pod = pod_with_metadata(&[], &[(SERVICE_ANNOTATION, "c")]);
        assert_eq!(resolve_service_name(&pod), "c");
    }

    #[test]
    fn empty_annotation_still_overrides() {
        // Presence wins, not non-emptiness
        let pod = pod_with_metadata(&[("app", "b")], &[(SERVICE_ANNOTATION, "")]);
        assert_eq!(resolve_service_name(&pod), "");
    }
}
