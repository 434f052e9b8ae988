//! Health-probe paths excluded from tracing
//!
//! When Istio rewrites application probes so the kubelet hits the sidecar
//! instead of the app, it records the mapping in `ISTIO_KUBE_APP_PROBERS` on
//! the `istio-proxy` container. The agent must ignore the paths the app
//! actually receives, so original paths are translated through that mapping.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod, Probe};
use serde::Deserialize;
use tracing::warn;

use super::{ISTIO_PROBERS_ENV, ISTIO_PROXY_CONTAINER};

/// JVM system property the SkyWalking agent reads ignored paths from
pub const IGNORE_PATH_PROPERTY: &str = "-Dskywalking.trace.ignore_path";

/// One entry of Istio's prober map; only the rewritten path matters here
#[derive(Debug, Deserialize)]
struct AppProber {
    #[serde(rename = "httpGet", default)]
    http_get: Option<ProberHttpGet>,
}

#[derive(Debug, Deserialize)]
struct ProberHttpGet {
    #[serde(default)]
    path: Option<String>,
}

/// Original probe path to the path the application receives after Istio's
/// probe rewrite
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeRewriteMap(BTreeMap<String, String>);

impl ProbeRewriteMap {
    /// Extract the rewrite map from the pod's `istio-proxy` container
    ///
    /// A missing container or variable yields an empty map. A value that is
    /// not valid JSON is logged and also yields an empty map.
    pub fn from_pod(pod: &Pod) -> Self {
        let raw = pod
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .find(|c| c.name == ISTIO_PROXY_CONTAINER)
            .and_then(|c| c.env.as_ref())
            .and_then(|env| env.iter().find(|e| e.name == ISTIO_PROBERS_ENV))
            .map(|e| e.value.as_deref().unwrap_or_default());

        let Some(raw) = raw else {
            return Self::default();
        };

        match Self::parse(raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    error = %e,
                    env = ISTIO_PROBERS_ENV,
                    pod = ?pod.metadata.name,
                    "Failed to decode Istio prober map, probe paths will not be rewritten"
                );
                Self::default()
            }
        }
    }

    /// Parse the JSON value of `ISTIO_KUBE_APP_PROBERS`
    ///
    /// Entries without `httpGet` (TCP or gRPC probers) are skipped. An
    /// `httpGet` without a `path` rewrites to the empty path, which drops
    /// that probe from the ignore list.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let probers: BTreeMap<String, AppProber> = serde_json::from_str(raw)?;
        Ok(Self(
            probers
                .into_iter()
                .filter_map(|(original, prober)| {
                    prober
                        .http_get
                        .map(|h| (original, h.path.unwrap_or_default()))
                })
                .collect(),
        ))
    }

    /// Translate a probe path, returning it unchanged when unmapped
    pub fn rewrite<'a>(&'a self, path: &'a str) -> &'a str {
        self.0.get(path).map(String::as_str).unwrap_or(path)
    }

    /// Number of rewritten paths
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no path is rewritten
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for ProbeRewriteMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn http_probe_path(probe: Option<&Probe>) -> &str {
    probe
        .and_then(|p| p.http_get.as_ref())
        .and_then(|h| h.path.as_deref())
        .unwrap_or_default()
}

/// Build the `-Dskywalking.trace.ignore_path=...` fragment for a container
///
/// Liveness comes before readiness, identical paths collapse into one, and a
/// container with no HTTP probes gets an empty string.
pub fn ignore_path_arg(container: &Container, rewrites: &ProbeRewriteMap) -> String {
    let rewrite = |path: &str| -> String {
        if path.is_empty() {
            String::new()
        } else {
            rewrites.rewrite(path).to_string()
        }
    };

    let liveness = rewrite(http_probe_path(container.liveness_probe.as_ref()));
    let readiness = rewrite(http_probe_path(container.readiness_probe.as_ref()));

    let paths = match (liveness.is_empty(), readiness.is_empty()) {
        (true, true) => return String::new(),
        (false, true) => liveness,
        (true, false) => readiness,
        (false, false) if liveness == readiness => liveness,
        (false, false) => format!("{liveness},{readiness}"),
    };

    format!("{IGNORE_PATH_PROPERTY}={paths}")
}
