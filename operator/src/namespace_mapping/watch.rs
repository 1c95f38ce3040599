//! Continuous-mode watch channel (spec.md §5 "watch channel", §4.1
//! Continuous mode): a debounced trigger so bursts of upstream changes
//! collapse into a single re-sync instead of one per event.

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    Client,
    runtime::{watcher, WatchStreamExt},
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default quiet period a burst of watch events must settle for before a
/// trigger fires (spec.md §5: events "collapse" rather than fan out 1:1).
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Spawns one watcher per builtin kind this mapping is configured to
/// react to, all funneling debounced triggers into a single channel the
/// reconciler drains. The task is tied to `cancel`; dropping the returned
/// receiver does not stop it -- callers must cancel the token.
pub fn spawn(
    client: Client,
    namespace: String,
    watch_resources: Vec<String>,
    cancel: CancellationToken,
) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);

    let kinds = if watch_resources.is_empty() {
        vec![
            "configmap".to_string(),
            "secret".to_string(),
            "deployment".to_string(),
            "service".to_string(),
            "ingress".to_string(),
        ]
    } else {
        watch_resources
    };

    for kind in kinds {
        let client = client.clone();
        let namespace = namespace.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            watch_kind(client, namespace, &kind, tx, cancel).await;
        });
    }

    rx
}

async fn watch_kind(client: Client, namespace: String, kind: &str, tx: mpsc::Sender<()>, cancel: CancellationToken) {
    macro_rules! run {
        ($ty:ty) => {{
            let api: kube::Api<$ty> = kube::Api::namespaced(client, &namespace);
            let stream = watcher(api, watcher::Config::default()).default_backoff();
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = stream.next() => {
                        match event {
                            Some(Ok(_)) => debounced_notify(&tx).await,
                            Some(Err(_)) => continue,
                            None => break,
                        }
                    }
                }
            }
        }};
    }

    match crate::pipeline::kinds::resolve_builtin(kind) {
        Some(crate::pipeline::kinds::Kind::ConfigMap) => run!(ConfigMap),
        Some(crate::pipeline::kinds::Kind::Secret) => run!(Secret),
        Some(crate::pipeline::kinds::Kind::Deployment) => run!(Deployment),
        Some(crate::pipeline::kinds::Kind::Service) => run!(Service),
        Some(crate::pipeline::kinds::Kind::Ingress) => run!(Ingress),
        _ => {}
    }
}

/// Coalesces a burst of events into one trigger: waits out `DEBOUNCE`
/// after the first event of a burst before signalling, swallowing any
/// further events that arrive in the meantime.
async fn debounced_notify(tx: &mpsc::Sender<()>) {
    tokio::time::sleep(DEBOUNCE).await;
    let _ = tx.try_send(());
}
