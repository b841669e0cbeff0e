use crate::backend::TaskBackend;
use crate::config::ExecutorConfig;
use crate::context::ExecutionSnapshot;
use crate::engine::{ExecutionPreferences, WorkflowExecutor};
use conductor_bus::{BusConfig, CommunicationBus, CommunicationMetrics};
use conductor_core::{ApprovalChannel, ConductorError, ConductorResult, HookChain};
use conductor_hierarchy::{HierarchyConfig, HierarchyManager, HierarchyStatus, WorkflowProgress};
use conductor_planner::{PlannerConfig, TaskDecomposer};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Log output settings, applied by the binary that installs the subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: default_log_level(),
        }
    }
}

/// Top-level configuration, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConductorConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> ConductorResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Config(format!(
                "Failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml(&content).map_err(|e| {
            ConductorError::Config(format!("Failed to parse config '{}': {e}", path.display()))
        })?;
        info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> ConductorResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConductorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConductorResult<()> {
        self.planner.validate()?;
        self.bus.validate()?;
        self.hierarchy.validate()?;
        self.executor.validate()
    }
}

/// Explicit registry holding one instance of every component.
///
/// Built once at startup and passed by reference; background loops only run
/// between [`Conductor::start`] and [`Conductor::stop`].
pub struct Conductor {
    config: ConductorConfig,
    bus: Arc<CommunicationBus>,
    hierarchy: Arc<HierarchyManager>,
    decomposer: Arc<TaskDecomposer>,
    executor: WorkflowExecutor,
}

impl Conductor {
    pub fn new(config: ConductorConfig, backend: Arc<dyn TaskBackend>) -> ConductorResult<Self> {
        Self::with_hooks(config, backend, HookChain::new(), None)
    }

    /// Build with notification/escalation hooks and an optional approval channel.
    pub fn with_hooks(
        config: ConductorConfig,
        backend: Arc<dyn TaskBackend>,
        hooks: HookChain,
        approval: Option<Arc<dyn ApprovalChannel>>,
    ) -> ConductorResult<Self> {
        config.validate()?;
        let bus = Arc::new(CommunicationBus::new(config.bus.clone())?);
        let hierarchy = Arc::new(HierarchyManager::new(
            config.hierarchy.clone(),
            Arc::clone(&bus),
            hooks.clone(),
        )?);
        let decomposer = Arc::new(TaskDecomposer::new(config.planner.clone())?);
        let executor = WorkflowExecutor::new(
            config.executor.clone(),
            Arc::clone(&decomposer),
            Arc::clone(&hierarchy),
            backend,
            hooks,
            approval,
        )?;
        Ok(Self {
            config,
            bus,
            hierarchy,
            decomposer,
            executor,
        })
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<CommunicationBus> {
        &self.bus
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyManager> {
        &self.hierarchy
    }

    pub fn decomposer(&self) -> &Arc<TaskDecomposer> {
        &self.decomposer
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// Start the delivery, cleanup, health and retention loops.
    pub fn start(&self) {
        self.bus.start();
        self.hierarchy.start();
        self.executor.start();
        info!("Conductor started");
    }

    /// Cancel running executions and stop every background loop.
    pub async fn stop(&self) {
        self.executor.stop().await;
        self.hierarchy.stop();
        self.bus.stop();
        info!("Conductor stopped");
    }

    pub async fn execute(
        &self,
        request: &str,
        prefs: ExecutionPreferences,
    ) -> ConductorResult<String> {
        self.executor.execute(request, prefs).await
    }

    pub async fn execution_status(&self, execution_id: &str) -> ConductorResult<ExecutionSnapshot> {
        self.executor.status(execution_id).await
    }

    /// Hierarchy-side progress of the workflow behind an execution.
    pub async fn workflow_progress(&self, execution_id: &str) -> ConductorResult<WorkflowProgress> {
        let workflow_id = self.executor.status(execution_id).await?.workflow_id;
        self.hierarchy.workflow_progress(&workflow_id).await
    }

    pub async fn hierarchy_status(&self) -> HierarchyStatus {
        self.hierarchy.hierarchy_status().await
    }

    pub fn communication_metrics(&self) -> CommunicationMetrics {
        self.bus.communication_metrics()
    }
}
