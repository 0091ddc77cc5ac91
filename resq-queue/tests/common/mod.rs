#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resq_api::ApiError;
use resq_core::{AppState, EventType, NetworkState, QueuedEvent};
use resq_queue::{
    BackgroundTask, BackgroundTaskRegistry, BackgroundTaskResult, Collaborators,
    LifecycleController, ManualNetworkMonitor, MemoryStorage, MonitorError, NetworkMonitor,
    ProcessorConfig, QueueProcessor, QueueStore, RegistryError, SubmitError, Submitter,
    Submitters,
};
use tokio::sync::{Notify, watch};

/// Submitter whose results are scripted per call.
#[derive(Clone, Default)]
pub struct ScriptedSubmitter {
    state: Arc<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    results: Mutex<VecDeque<Result<(), String>>>,
    payloads: Mutex<Vec<serde_json::Value>>,
    calls: AtomicUsize,
    /// 1-based call number that blocks until `release` is notified.
    block_on_call: Mutex<Option<usize>>,
    started: Notify,
    release: Notify,
}

impl ScriptedSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results for the next calls, in order. Calls past the script succeed.
    pub fn script(self, results: impl IntoIterator<Item = Result<(), &'static str>>) -> Self {
        self.state
            .results
            .lock()
            .unwrap()
            .extend(results.into_iter().map(|r| r.map_err(str::to_owned)));
        self
    }

    pub fn always_fail(self, message: &'static str) -> Self {
        self.script(std::iter::repeat_n(Err(message), 64))
    }

    pub fn block_on_call(self, call: usize) -> Self {
        *self.state.block_on_call.lock().unwrap() = Some(call);
        self
    }

    pub async fn wait_started(&self) {
        self.state.started.notified().await;
    }

    pub fn release(&self) {
        self.state.release.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.state.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Submitter for ScriptedSubmitter {
    async fn submit(&self, event: &QueuedEvent) -> Result<(), SubmitError> {
        let call = self.state.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.payloads.lock().unwrap().push(event.data.clone());

        let blocks = *self.state.block_on_call.lock().unwrap() == Some(call);
        if blocks {
            self.state.started.notify_one();
            self.state.release.notified().await;
        }

        let result = self.state.results.lock().unwrap().pop_front();
        match result {
            Some(Err(message)) => Err(SubmitError::Api(ApiError::Status {
                status: 503,
                body: message,
            })),
            Some(Ok(())) | None => Ok(()),
        }
    }
}

/// Manual monitor that counts how often it is queried.
pub struct CountingMonitor {
    inner: ManualNetworkMonitor,
    fetches: AtomicUsize,
    subscriptions: AtomicUsize,
}

impl CountingMonitor {
    pub fn new(online: bool) -> Self {
        let inner = if online {
            ManualNetworkMonitor::online()
        } else {
            ManualNetworkMonitor::offline()
        };
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
        }
    }

    pub fn go_online(&self) {
        self.inner.go_online();
    }

    pub fn go_offline(&self) {
        self.inner.go_offline();
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkMonitor for CountingMonitor {
    async fn fetch_state(&self) -> Result<NetworkState, MonitorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_state().await
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe()
    }
}

/// Monitor whose connectivity query always fails.
pub struct FailingMonitor {
    tx: watch::Sender<NetworkState>,
}

impl FailingMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(NetworkState::online());
        Self { tx }
    }
}

#[async_trait]
impl NetworkMonitor for FailingMonitor {
    async fn fetch_state(&self) -> Result<NetworkState, MonitorError> {
        Err(MonitorError::Unavailable("radio busy".into()))
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

/// Registry that stores tasks without scheduling them.
#[derive(Default)]
pub struct FakeRegistry {
    tasks: Mutex<HashMap<String, BackgroundTask>>,
    registrations: AtomicUsize,
    /// Held registrations wait on this before storing the task.
    gate: Mutex<Option<Arc<Notify>>>,
    registering: Notify,
}

impl FakeRegistry {
    /// Make the next `register` call wait until the returned gate is notified.
    pub fn hold_next_registration(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub async fn wait_registering(&self) {
        self.registering.notified().await;
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(name)
    }

    pub async fn run(&self, name: &str) -> Option<BackgroundTaskResult> {
        let task = self.tasks.lock().unwrap().get(name).cloned()?;
        Some(task().await)
    }
}

#[async_trait]
impl BackgroundTaskRegistry for FakeRegistry {
    async fn is_registered(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.contains(name))
    }

    async fn register(&self, name: &str, task: BackgroundTask) -> Result<(), RegistryError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.registering.notify_one();
            gate.notified().await;
        }

        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_owned()));
        }
        tasks.insert(name.to_owned(), task);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        match self.tasks.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotRegistered(name.to_owned())),
        }
    }
}

pub struct Harness {
    pub storage: MemoryStorage,
    pub processor: QueueProcessor<MemoryStorage>,
    pub network: Arc<CountingMonitor>,
    pub lifecycle: Arc<LifecycleController>,
    pub registry: Arc<FakeRegistry>,
    pub submitter: ScriptedSubmitter,
}

impl Harness {
    pub fn store(&self) -> &QueueStore<MemoryStorage> {
        self.processor.store()
    }
}

pub async fn harness(online: bool, submitter: ScriptedSubmitter) -> Harness {
    harness_with(online, submitter, ProcessorConfig::default(), MemoryStorage::default()).await
}

pub async fn harness_with(
    online: bool,
    submitter: ScriptedSubmitter,
    config: ProcessorConfig,
    storage: MemoryStorage,
) -> Harness {
    let network = Arc::new(CountingMonitor::new(online));
    let lifecycle = Arc::new(LifecycleController::new(AppState::Active));
    let registry = Arc::new(FakeRegistry::default());

    let store = QueueStore::open(storage.clone()).await.unwrap();
    let processor = QueueProcessor::new(
        store,
        Collaborators {
            network: network.clone(),
            lifecycle: lifecycle.clone(),
            registry: registry.clone(),
        },
        Submitters::new().with(EventType::PersonnelStatus, submitter.clone()),
        config,
    );

    Harness {
        storage,
        processor,
        network,
        lifecycle,
        registry,
        submitter,
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
