use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use k8s_openapi::api::core::v1::Service;

pub mod k8s;
pub use self::k8s::KubeSource;

/// One item read from a service subscription.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// The full current state of a watched service.
    Service(Box<Service>),
    /// Something that is not a service (a watch error, a transport
    /// failure). The supervisor treats it as a reason to stop.
    Unexpected(String),
}

/// A live subscription. Dropping it releases the watch.
pub type SourceStream = BoxStream<'static, SourceEvent>;

#[async_trait]
pub trait ServiceSource {
    /// Establish the watch. Errors here happen before any event is read.
    async fn subscribe(&self) -> Result<SourceStream>;
}
