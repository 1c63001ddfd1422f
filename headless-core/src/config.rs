//! Lifecycle phase, persisted agent preferences and the projected service
//! configuration reported to observers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::ErrorDetail;

/// Name the managed service announces itself with.
pub const SERVICE_NAME: &str = "agents-headless";

/// Keys owned by typed fields of [`ServiceConfig`]; never kept as passthrough
/// extras, so a projection carries each of them exactly once.
pub const RESERVED_KEYS: &[&str] = &[
    "agent_home",
    "base_url",
    "global_id",
    "preferred_port",
    "log_path",
    "port",
    "phase",
    "running",
    "starting",
    "stopping",
    "last_error",
];

/// Lifecycle phase of the managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
    StartFailed,
    StopFailed,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Stopped,
        Phase::Starting,
        Phase::Running,
        Phase::Stopping,
        Phase::StartFailed,
        Phase::StopFailed,
    ];

    /// A transition is in flight in this phase.
    pub fn is_transitioning(self) -> bool {
        matches!(self, Phase::Starting | Phase::Stopping)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Phase::StartFailed | Phase::StopFailed)
    }

    /// The bound port is meaningful in this phase.
    pub fn holds_port(self) -> bool {
        matches!(self, Phase::Running | Phase::Stopping)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Stopped => write!(f, "stopped"),
            Phase::Starting => write!(f, "starting"),
            Phase::Running => write!(f, "running"),
            Phase::Stopping => write!(f, "stopping"),
            Phase::StartFailed => write!(f, "start_failed"),
            Phase::StopFailed => write!(f, "stop_failed"),
        }
    }
}

/// Preferences persisted for the headless agent.
///
/// Keys this crate does not know about are kept in `extra` so that a round
/// trip through the daemon never drops fields written by other tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPreferences {
    /// Home directory of the agent; served as its static root.
    pub agent_home: PathBuf,
    /// Base URL of the upstream the agent reports to.
    #[serde(default)]
    pub base_url: String,
    /// Stable identity of this installation.
    #[serde(default)]
    pub global_id: String,
    /// Port to try first when starting the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_port: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentPreferences {
    pub fn new(agent_home: impl Into<PathBuf>) -> Self {
        Self {
            agent_home: agent_home.into(),
            base_url: String::new(),
            global_id: String::new(),
            preferred_port: None,
            extra: Map::new(),
        }
    }

    /// Directory the agent writes its logs into.
    pub fn log_path(&self) -> PathBuf {
        self.agent_home.join("log")
    }

    /// Drop passthrough keys that would shadow a typed field.
    pub fn strip_reserved(&mut self) {
        self.extra
            .retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
    }

    /// Merge a partial update into these preferences.
    ///
    /// Reserved keys in the patch's extras are ignored.
    pub fn apply(&mut self, patch: PreferencesPatch) {
        if let Some(home) = patch.agent_home {
            self.agent_home = home;
        }
        if let Some(base_url) = patch.base_url {
            self.base_url = base_url;
        }
        if let Some(global_id) = patch.global_id {
            self.global_id = global_id;
        }
        if let Some(port) = patch.preferred_port {
            self.preferred_port = Some(port);
        }
        for (key, value) in patch.extra {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }
}

/// Partial preferences update sent with `updateHeadlessConfig`.
///
/// Absent fields are left untouched; a `null` extra key removes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferencesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_home: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_port: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Service configuration as reported to observers: stored preferences merged
/// with the live lifecycle state at the moment of projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub preferences: AgentPreferences,
    pub log_path: PathBuf,
    pub port: u16,
    pub phase: Phase,
    pub running: bool,
    pub starting: bool,
    pub stopping: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorDetail>,
}

impl ServiceConfig {
    /// Project preferences and lifecycle state into a status record.
    ///
    /// The three flags are derived from `phase`, so at most one of them is
    /// ever set. Reserved extras are dropped so runtime fields are never
    /// emitted twice.
    pub fn project(
        mut preferences: AgentPreferences,
        phase: Phase,
        port: u16,
        last_error: Option<ErrorDetail>,
    ) -> Self {
        preferences.strip_reserved();
        Self {
            log_path: preferences.log_path(),
            preferences,
            port,
            phase,
            running: phase == Phase::Running,
            starting: phase == Phase::Starting,
            stopping: phase == Phase::Stopping,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs() -> AgentPreferences {
        let mut prefs = AgentPreferences::new("/home/me/.headlessd/agent");
        prefs.base_url = "https://example.com".to_string();
        prefs.global_id = "abc123".to_string();
        prefs
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Running.to_string(), "running");
        assert_eq!(Phase::StartFailed.to_string(), "start_failed");
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&Phase::StopFailed).unwrap();
        assert_eq!(json, r#""stop_failed""#);
    }

    #[test]
    fn projection_flags_are_mutually_exclusive() {
        for phase in Phase::ALL {
            let config = ServiceConfig::project(prefs(), phase, 8090, None);
            let set = [config.running, config.starting, config.stopping]
                .iter()
                .filter(|flag| **flag)
                .count();
            assert!(set <= 1, "{phase}: more than one flag set");
            assert_eq!(config.running, phase == Phase::Running);
        }
    }

    #[test]
    fn projection_includes_log_path_under_agent_home() {
        let config = ServiceConfig::project(prefs(), Phase::Stopped, 8090, None);
        assert_eq!(
            config.log_path,
            PathBuf::from("/home/me/.headlessd/agent/log")
        );
    }

    #[test]
    fn service_config_flattens_preferences_and_extras() {
        let mut prefs = prefs();
        prefs
            .extra
            .insert("theme".to_string(), Value::String("dark".to_string()));
        let config = ServiceConfig::project(prefs, Phase::Running, 8091, None);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["base_url"], "https://example.com");
        assert_eq!(json["theme"], "dark");
        assert_eq!(json["port"], 8091);
        assert_eq!(json["phase"], "running");
        assert!(json.get("last_error").is_none());

        let parsed: ServiceConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn apply_patch_updates_only_present_fields() {
        let mut prefs = prefs();
        prefs
            .extra
            .insert("keep".to_string(), Value::Bool(true));
        prefs
            .extra
            .insert("drop".to_string(), Value::Bool(true));

        let patch: PreferencesPatch = serde_json::from_value(serde_json::json!({
            "base_url": "https://other.example.com",
            "preferred_port": 9000,
            "drop": null,
            "added": 1
        }))
        .unwrap();
        prefs.apply(patch);

        assert_eq!(prefs.base_url, "https://other.example.com");
        assert_eq!(prefs.global_id, "abc123");
        assert_eq!(prefs.preferred_port, Some(9000));
        assert!(prefs.extra.contains_key("keep"));
        assert!(!prefs.extra.contains_key("drop"));
        assert_eq!(prefs.extra["added"], 1);
    }

    #[test]
    fn reserved_extras_never_shadow_runtime_fields() {
        let mut prefs = prefs();
        let patch: PreferencesPatch = serde_json::from_value(serde_json::json!({
            "running": true,
            "port": 1,
            "theme": "dark"
        }))
        .unwrap();
        prefs.apply(patch);
        assert!(!prefs.extra.contains_key("running"));
        assert!(!prefs.extra.contains_key("port"));

        // Extras that bypassed `apply` (e.g. a hand-edited file) are dropped too.
        prefs.extra.insert("phase".to_string(), Value::from("running"));
        prefs.extra.insert("stopping".to_string(), Value::Bool(true));
        let config = ServiceConfig::project(prefs, Phase::Stopped, 8090, None);

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json.matches("\"port\"").count(), 1, "{json}");
        assert_eq!(json.matches("\"phase\"").count(), 1, "{json}");
        let parsed: ServiceConfig = serde_json::from_str(&json).unwrap();
        assert!(!parsed.running);
        assert!(!parsed.stopping);
        assert_eq!(parsed.port, 8090);
        assert_eq!(parsed.preferences.extra["theme"], "dark");
    }
}
