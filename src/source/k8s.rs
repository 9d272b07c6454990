use super::{ServiceSource, SourceEvent, SourceStream};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use log::{debug, info};

pub struct KubeSource {
    client: Client,
    namespace: String,
    selector: Option<String>,
}

impl KubeSource {
    pub fn new(client: Client, namespace: String, selector: Option<String>) -> Self {
        Self {
            client,
            namespace,
            selector,
        }
    }

    /// Connect to the cluster.
    ///
    /// In-cluster configuration is tried first, then `KUBECONFIG` and
    /// `~/.kube/config`.
    pub async fn connect() -> Result<Client> {
        Client::try_default()
            .await
            .context("failed to create kubernetes client")
    }

    fn api(&self) -> Api<Service> {
        if self.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.namespace)
        }
    }
}

/// Label selector matching services labelled `key=value`.
///
/// An empty key selects every service.
pub fn label_selector(key: &str, value: &str) -> Option<String> {
    if key.is_empty() {
        None
    } else {
        Some(format!("{key}={value}"))
    }
}

#[async_trait]
impl ServiceSource for KubeSource {
    async fn subscribe(&self) -> Result<SourceStream> {
        let mut params = WatchParams::default();
        if let Some(selector) = &self.selector {
            params = params.labels(selector);
        }

        info!(
            "Watching services in namespace {:?} with selector {:?}",
            self.namespace, self.selector
        );
        let stream = self
            .api()
            .watch(&params, "0")
            .await
            .context("failed to create watch")?;

        Ok(stream
            .filter_map(|item| async move { to_source_event(item) })
            .boxed())
    }
}

fn to_source_event(item: kube::Result<WatchEvent<Service>>) -> Option<SourceEvent> {
    match item {
        Ok(WatchEvent::Added(svc))
        | Ok(WatchEvent::Modified(svc))
        | Ok(WatchEvent::Deleted(svc)) => Some(SourceEvent::Service(Box::new(svc))),
        Ok(WatchEvent::Bookmark(bm)) => {
            debug!("Skipping watch bookmark at {}", bm.metadata.resource_version);
            None
        }
        Ok(WatchEvent::Error(status)) => Some(SourceEvent::Unexpected(format!(
            "watch error {}: {}",
            status.code, status.message
        ))),
        Err(e) => Some(SourceEvent::Unexpected(format!("watch stream error: {e}"))),
    }
}
