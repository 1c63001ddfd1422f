#![allow(dead_code)]

use async_trait::async_trait;
use headless_core::{AgentPreferences, Notification, NotificationSubject, Phase};
use headlessd::{
    BroadcastBus, ConfigError, ConfigStore, LaunchSpec, LifecycleController, NotificationBus,
    PortAllocator, PortError, RestartPolicy, ServiceError, ServiceProcess,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Ordered record of collaborator calls and published notifications.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

/// Lets a test hold a collaborator call open until it says go.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

pub struct MemoryStore {
    preferences: Mutex<AgentPreferences>,
    pub fail_load: AtomicBool,
}

impl MemoryStore {
    pub fn new(preferences: AgentPreferences) -> Self {
        Self {
            preferences: Mutex::new(preferences),
            fail_load: AtomicBool::new(false),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<AgentPreferences, ConfigError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(ConfigError::Read {
                path: "memory".into(),
                source: std::io::Error::other("store offline"),
            });
        }
        Ok(self.preferences.lock().clone())
    }

    fn save(&self, preferences: &AgentPreferences) -> Result<(), ConfigError> {
        *self.preferences.lock() = preferences.clone();
        Ok(())
    }
}

/// Allocator handing out scripted results; falls back to the preferred port.
pub struct FakePorts {
    journal: Journal,
    script: Mutex<VecDeque<Result<u16, PortError>>>,
    pub gate: Mutex<Option<Arc<Gate>>>,
    pub requested: Mutex<Vec<u16>>,
}

impl FakePorts {
    pub fn script(&self, result: Result<u16, PortError>) {
        self.script.lock().push_back(result);
    }
}

#[async_trait]
impl PortAllocator for FakePorts {
    async fn allocate(&self, preferred: u16) -> Result<u16, PortError> {
        self.journal.push(format!("allocate:{preferred}"));
        self.requested.lock().push(preferred);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.script.lock().pop_front().unwrap_or(Ok(preferred))
    }
}

pub struct FakeProcess {
    journal: Journal,
    pub fail_launch: AtomicBool,
    pub fail_terminate: AtomicBool,
    pub launch_gate: Mutex<Option<Arc<Gate>>>,
    pub terminate_gate: Mutex<Option<Arc<Gate>>>,
    pub launches: Mutex<Vec<LaunchSpec>>,
    pub running: AtomicBool,
}

#[async_trait]
impl ServiceProcess for FakeProcess {
    async fn launch(&self, spec: &LaunchSpec) -> Result<(), ServiceError> {
        self.journal.push(format!("launch:{}", spec.port));
        self.launches.lock().push(spec.clone());
        let gate = self.launch_gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(ServiceError::ExitedDuringStartup("exit status: 1".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&self) -> Result<(), ServiceError> {
        self.journal.push("terminate");
        let gate = self.terminate_gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(ServiceError::Terminate(std::io::Error::other(
                "process refused to exit",
            )));
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every notification and forwards it to a broadcast bus.
pub struct RecordingBus {
    journal: Journal,
    pub broadcast: Arc<BroadcastBus>,
    pub published: Mutex<Vec<Notification>>,
}

impl NotificationBus for RecordingBus {
    fn publish(&self, notification: Notification) {
        self.journal.push(format!("notify:{}", notification.subject));
        self.published.lock().push(notification.clone());
        self.broadcast.publish(notification);
    }
}

impl RecordingBus {
    pub fn subjects(&self) -> Vec<(NotificationSubject, Option<bool>)> {
        self.published
            .lock()
            .iter()
            .map(|n| (n.subject, n.status))
            .collect()
    }
}

pub struct Harness {
    pub controller: Arc<LifecycleController>,
    pub store: Arc<MemoryStore>,
    pub ports: Arc<FakePorts>,
    pub process: Arc<FakeProcess>,
    pub bus: Arc<RecordingBus>,
    pub journal: Journal,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(RestartPolicy::default())
    }

    pub fn with_policy(policy: RestartPolicy) -> Self {
        let journal = Journal::default();

        let mut preferences = AgentPreferences::new("/tmp/headless-agent");
        preferences.base_url = "https://api.example.com".to_string();
        preferences.global_id = "test-global-id".to_string();

        let store = Arc::new(MemoryStore::new(preferences));
        let ports = Arc::new(FakePorts {
            journal: journal.clone(),
            script: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            requested: Mutex::new(Vec::new()),
        });
        let process = Arc::new(FakeProcess {
            journal: journal.clone(),
            fail_launch: AtomicBool::new(false),
            fail_terminate: AtomicBool::new(false),
            launch_gate: Mutex::new(None),
            terminate_gate: Mutex::new(None),
            launches: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        });
        let bus = Arc::new(RecordingBus {
            journal: journal.clone(),
            broadcast: Arc::new(BroadcastBus::new()),
            published: Mutex::new(Vec::new()),
        });

        let controller = LifecycleController::new(
            store.clone(),
            ports.clone(),
            process.clone(),
            bus.clone(),
        )
        .with_restart_policy(policy);

        Self {
            controller: Arc::new(controller),
            store,
            ports,
            process,
            bus,
            journal,
        }
    }

    pub fn gate_launch(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.process.launch_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn gate_terminate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.process.terminate_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn phase(&self) -> Phase {
        self.controller.phase()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
