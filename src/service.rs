//! Conversion of Kubernetes `Service` objects into [`HostState`].
//!
//! Every watch event carries the complete service, so each conversion
//! builds a fresh state from scratch.  Item order is fixed (load balancer
//! ingresses in upstream order, then the cluster address) because
//! [`HostState::differs`] compares items by position.

use k8s_openapi::api::core::v1::Service;

use crate::statefile::{HostInfo, HostState, Target};

/// Cluster IP value used by headless services.
const HEADLESS_CLUSTER_IP: &str = "None";

/// Converts a service to a host state.
///
/// The base name is taken from the `name_label` label when it is set and
/// non-empty, otherwise the service's own name is used.
pub fn to_host_state(svc: &Service, name_label: &str) -> HostState {
    let svc_name = svc.metadata.name.as_deref().unwrap_or_default();
    let namespace = svc.metadata.namespace.as_deref().unwrap_or_default();

    let name = svc
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(name_label))
        .map(String::as_str)
        .filter(|n| !n.is_empty())
        // name label not found, fall back to object name
        .unwrap_or(svc_name);

    let ingress = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default();

    let mut items: Vec<HostInfo> = ingress
        .iter()
        .enumerate()
        .map(|(i, ig)| HostInfo {
            name: if i == 0 {
                name.to_string()
            } else {
                format!("{name}-{i}")
            },
            ipv4_address: ig.ip.clone().unwrap_or_default(),
            target: Target::External,
        })
        .collect();

    let cluster_ip = svc
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != HEADLESS_CLUSTER_IP);
    if let Some(ip) = cluster_ip {
        items.push(HostInfo {
            name: format!("{name}-cluster"),
            ipv4_address: ip.to_string(),
            target: Target::Internal,
        });
    }

    HostState {
        reference: format!("k8s: {namespace} service/{svc_name}"),
        items,
    }
}

/// Converts `svc` and reports whether the result differs from `prev`.
pub fn updated(prev: &HostState, svc: &Service, name_label: &str) -> (HostState, bool) {
    let next = to_host_state(svc, name_label);
    let changed = prev.differs(&next);
    (next, changed)
}
