//! Messages passed from the supervisor to the update loop.

use k8s_openapi::api::core::v1::Service;

/// One item on the update channel.
///
/// Shutdown is an explicit variant rather than an empty payload, so the
/// loop can never mistake a legitimate object for the stop marker.
#[derive(Debug, Clone)]
pub enum Update {
    /// The full current state of the watched service.
    Service(Box<Service>),
    /// No more updates follow; the loop returns without further writes.
    Shutdown,
}
