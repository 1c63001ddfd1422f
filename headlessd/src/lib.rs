//! headlessd - lifecycle daemon for the local headless agent
//!
//! The daemon owns a single agent process. Observers drive it over a
//! JSON-lines Unix socket (`start`, `stop`, `restart`, `getHeadlessConfig`)
//! and can subscribe to `starting`/`started`/`stopping`/`stopped`
//! notifications. All transitions go through [`controller::LifecycleController`].

pub mod bus;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod defaults;
pub mod dispatch;
pub mod logging;
pub mod paths;
pub mod ports;
pub mod process;
pub mod socket;

pub use bus::{BroadcastBus, NotificationBus};
pub use config::{ConfigError, ConfigStore, JsonFileStore};
pub use controller::{
    LifecycleController, LifecycleState, RestartPolicy, TransitionError, TransitionRequest,
};
pub use dispatch::CommandDispatcher;
pub use ports::{LocalPortAllocator, PortAllocator, PortError};
pub use process::{CommandProcess, LaunchSpec, ServiceError, ServiceProcess};
