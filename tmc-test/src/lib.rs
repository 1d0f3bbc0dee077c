//! In-memory [`DynamicResourceClient`] and fixtures for exercising
//! `tmc-runtime` without a real cluster, mirroring the role `kube-test`
//! plays for `kube-runtime`: tests never see a real network (§9).

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tmc_core::client::WatchEvent;
use tmc_core::{ClientError, DynamicResourceClient, Gvr, Object, PropagationPolicy};
use tokio::sync::broadcast;

/// One recorded call against a [`MockClient`], for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    /// `get(gvr, namespace, name)`.
    Get(Gvr, String, String),
    /// `list(gvr, namespace)`.
    List(Gvr, String),
    /// `create(gvr, namespace, name)`.
    Create(Gvr, String, String),
    /// `update(gvr, namespace, name)`.
    Update(Gvr, String, String),
    /// `update_status(gvr, namespace, name)`.
    UpdateStatus(Gvr, String, String),
    /// `delete(gvr, namespace, name)`.
    Delete(Gvr, String, String),
    /// `watch(gvr, namespace)`.
    Watch(Gvr, String),
}

fn obj_key(gvr: &Gvr, namespace: &str, name: &str) -> String {
    format!("{gvr}|{namespace}/{name}")
}

/// A canned outcome queued for the next matching call, consumed in FIFO order.
enum Canned {
    Error(ClientError),
}

/// Capacity of the broadcast channel backing [`MockClient::watch`]; ample
/// for tests, which never pile up more than a handful of mutations
/// between a subscribe and a drain.
const WATCH_CHANNEL_CAPACITY: usize = 256;

/// An in-memory, thread-safe implementation of [`DynamicResourceClient`]
/// backed by a plain map, with a call log and a per-key queue of canned
/// errors (used to simulate conflict sequences like scenario S3).
pub struct MockClient {
    objects: Mutex<std::collections::HashMap<String, Object>>,
    calls: Mutex<Vec<RecordedCall>>,
    canned: Mutex<std::collections::HashMap<String, VecDeque<Canned>>>,
    watch_tx: broadcast::Sender<(Gvr, String, WatchEvent)>,
}

impl Default for MockClient {
    fn default() -> Self {
        let (watch_tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        MockClient {
            objects: Mutex::new(std::collections::HashMap::new()),
            calls: Mutex::new(Vec::new()),
            canned: Mutex::new(std::collections::HashMap::new()),
            watch_tx,
        }
    }
}

impl MockClient {
    /// An empty mock client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object directly into the store, bypassing `create`.
    pub fn seed(&self, gvr: &Gvr, namespace: &str, name: &str, obj: Object) {
        self.objects.lock().insert(obj_key(gvr, namespace, name), obj);
    }

    /// Returns a clone of the object currently stored at this key, if any.
    pub fn get_stored(&self, gvr: &Gvr, namespace: &str, name: &str) -> Option<Object> {
        self.objects.lock().get(&obj_key(gvr, namespace, name)).cloned()
    }

    /// Queues a [`ClientError`] to be returned on the next call to `update`
    /// for this key, before falling through to normal behavior.
    pub fn queue_update_error(&self, gvr: &Gvr, namespace: &str, name: &str, err: ClientError) {
        self.canned
            .lock()
            .entry(obj_key(gvr, namespace, name))
            .or_default()
            .push_back(Canned::Error(err));
    }

    /// A snapshot of every recorded call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Count of calls matching a predicate, e.g. counting `Update` attempts.
    pub fn count_matching(&self, pred: impl Fn(&RecordedCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl DynamicResourceClient for MockClient {
    async fn get(&self, gvr: &Gvr, namespace: &str, name: &str) -> Result<Object, ClientError> {
        self.calls.lock().push(RecordedCall::Get(gvr.clone(), namespace.to_string(), name.to_string()));
        self.objects
            .lock()
            .get(&obj_key(gvr, namespace, name))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{gvr} {namespace}/{name}")))
    }

    async fn list(&self, gvr: &Gvr, namespace: &str) -> Result<Vec<Object>, ClientError> {
        self.calls.lock().push(RecordedCall::List(gvr.clone(), namespace.to_string()));
        let prefix = format!("{gvr}|{namespace}/");
        Ok(self.objects.lock().iter().filter(|(k, _)| k.starts_with(&prefix)).map(|(_, v)| v.clone()).collect())
    }

    async fn create(&self, gvr: &Gvr, namespace: &str, obj: Object) -> Result<Object, ClientError> {
        let name = obj.name().unwrap_or_default().to_string();
        self.calls.lock().push(RecordedCall::Create(gvr.clone(), namespace.to_string(), name.clone()));
        let key = obj_key(gvr, namespace, &name);
        let mut objects = self.objects.lock();
        if objects.contains_key(&key) {
            return Err(ClientError::Conflict(format!("{key} already exists")));
        }
        objects.insert(key, obj.clone());
        drop(objects);
        let _ = self.watch_tx.send((gvr.clone(), namespace.to_string(), WatchEvent::Applied(obj.clone())));
        Ok(obj)
    }

    async fn update(&self, gvr: &Gvr, namespace: &str, obj: Object) -> Result<Object, ClientError> {
        let name = obj.name().unwrap_or_default().to_string();
        self.calls.lock().push(RecordedCall::Update(gvr.clone(), namespace.to_string(), name.clone()));
        let key = obj_key(gvr, namespace, &name);
        if let Some(canned) = self.canned.lock().get_mut(&key).and_then(VecDeque::pop_front) {
            let Canned::Error(err) = canned;
            return Err(err);
        }
        let mut objects = self.objects.lock();
        if !objects.contains_key(&key) {
            return Err(ClientError::NotFound(key));
        }
        objects.insert(key, obj.clone());
        drop(objects);
        let _ = self.watch_tx.send((gvr.clone(), namespace.to_string(), WatchEvent::Applied(obj.clone())));
        Ok(obj)
    }

    async fn update_status(&self, gvr: &Gvr, namespace: &str, obj: Object) -> Result<Object, ClientError> {
        let name = obj.name().unwrap_or_default().to_string();
        self.calls.lock().push(RecordedCall::UpdateStatus(gvr.clone(), namespace.to_string(), name.clone()));
        let key = obj_key(gvr, namespace, &name);
        let mut objects = self.objects.lock();
        if !objects.contains_key(&key) {
            return Err(ClientError::NotFound(key));
        }
        objects.insert(key, obj.clone());
        drop(objects);
        let _ = self.watch_tx.send((gvr.clone(), namespace.to_string(), WatchEvent::Applied(obj.clone())));
        Ok(obj)
    }

    async fn delete(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
        _propagation: PropagationPolicy,
    ) -> Result<(), ClientError> {
        self.calls.lock().push(RecordedCall::Delete(gvr.clone(), namespace.to_string(), name.to_string()));
        let key = obj_key(gvr, namespace, name);
        let mut objects = self.objects.lock();
        let removed = objects.remove(&key);
        drop(objects);
        match removed {
            Some(obj) => {
                let _ = self.watch_tx.send((gvr.clone(), namespace.to_string(), WatchEvent::Deleted(obj)));
                Ok(())
            }
            None => Err(ClientError::NotFound(key)),
        }
    }

    async fn watch(&self, gvr: &Gvr, namespace: &str) -> Result<BoxStream<'static, Result<WatchEvent, ClientError>>, ClientError> {
        self.calls.lock().push(RecordedCall::Watch(gvr.clone(), namespace.to_string()));
        let prefix = format!("{gvr}|{namespace}/");
        let initial: Vec<Object> = self.objects.lock().iter().filter(|(k, _)| k.starts_with(&prefix)).map(|(_, v)| v.clone()).collect();
        let rx = self.watch_tx.subscribe();
        let gvr = gvr.clone();
        let namespace = namespace.to_string();

        let restart = futures::stream::once(async move { Ok(WatchEvent::Restarted(initial)) });
        let tail = futures::stream::unfold(rx, move |mut rx| {
            let gvr = gvr.clone();
            let namespace = namespace.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok((event_gvr, event_ns, event)) if event_gvr == gvr && event_ns == namespace => {
                            return Some((Ok(event), rx));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(Box::pin(restart.chain(tail)))
    }
}

/// Builds a minimal `Deployment`-shaped [`Object`] fixture.
pub fn deployment_fixture(namespace: &str, name: &str, replicas: i64) -> Object {
    Object::from_json(serde_json::json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"replicas": replicas},
        "status": {}
    }))
    .expect("fixture is a JSON object")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get() {
        let client = MockClient::new();
        let gvr = Gvr::new("apps", "v1", "deployments");
        let obj = deployment_fixture("default", "web", 3);
        client.create(&gvr, "default", obj.clone()).await.unwrap();
        let fetched = client.get(&gvr, "default", "web").await.unwrap();
        assert_eq!(fetched.name(), Some("web"));
    }

    #[tokio::test]
    async fn update_not_found() {
        let client = MockClient::new();
        let gvr = Gvr::new("apps", "v1", "deployments");
        let obj = deployment_fixture("default", "web", 3);
        let err = client.update(&gvr, "default", obj).await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn watch_yields_restart_then_applied() {
        let client = MockClient::new();
        let gvr = Gvr::new("apps", "v1", "deployments");
        let obj = deployment_fixture("default", "web", 3);
        client.create(&gvr, "default", obj.clone()).await.unwrap();

        let mut stream = client.watch(&gvr, "default").await.unwrap();
        match stream.next().await.unwrap().unwrap() {
            WatchEvent::Restarted(objs) => assert_eq!(objs.len(), 1),
            other => panic!("expected Restarted, got {other:?}"),
        }

        let mut updated = obj.clone();
        updated.set_nested(&["spec", "replicas"], serde_json::json!(5));
        client.update(&gvr, "default", updated).await.unwrap();

        match stream.next().await.unwrap().unwrap() {
            WatchEvent::Applied(applied) => assert_eq!(applied.nested_i64(&["spec", "replicas"]), Some(5)),
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn queued_conflict_then_success() {
        let client = MockClient::new();
        let gvr = Gvr::new("apps", "v1", "deployments");
        let obj = deployment_fixture("default", "web", 3);
        client.create(&gvr, "default", obj.clone()).await.unwrap();
        client.queue_update_error(&gvr, "default", "web", ClientError::Conflict("stale".into()));
        let err = client.update(&gvr, "default", obj.clone()).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict(_)));
        let ok = client.update(&gvr, "default", obj).await;
        assert!(ok.is_ok());
    }
}
