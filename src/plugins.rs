//! Fault-isolated plugin loading.
//!
//! Plugins contribute commands to the registry at boot. Each plugin is
//! activated independently: an error or panic during one plugin's setup is
//! caught, classified, and logged, and loading continues with the next
//! plugin. A plugin failure is never fatal to the process.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use async_trait::async_trait;

use crate::cooldown::CooldownSpec;
use crate::faults::Fault;
use crate::logbuf::LogSink;
use crate::platform::PlatformTransport;
use crate::router::{CommandContext, CommandHandler, CommandRegistry, CommandSpec};

/// An extension unit that registers commands at boot.
pub trait Plugin: Send + Sync {
    /// Stable plugin name, used in load logs.
    fn name(&self) -> &'static str;

    /// Register this plugin's commands.
    fn setup(&self, registry: &mut CommandRegistry) -> anyhow::Result<()>;

    /// Release any resources at shutdown. Best-effort.
    fn teardown(&self) {}
}

/// Outcome of one plugin's activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Activated; `commands` were registered.
    Loaded {
        /// Number of commands the plugin registered.
        commands: usize,
    },
    /// Activation failed; the failure was contained.
    Failed {
        /// Failure kind (`setup error` or `panic`).
        kind: String,
        /// Full failure detail.
        detail: String,
    },
}

/// Per-plugin load record. Produced once at boot; only its log side effect
/// persists.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// Plugin name.
    pub name: String,
    /// What happened.
    pub outcome: LoadOutcome,
}

impl LoadResult {
    /// Whether the plugin activated.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Loaded { .. })
    }
}

/// Activates a fixed set of plugins, isolating each failure.
pub struct PluginLoader {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginLoader {
    /// Build a loader over the given plugins.
    #[must_use]
    pub fn new(plugins: Vec<Box<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    /// The built-in plugin set.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![Box::new(MiscPlugin)])
    }

    /// Activate every plugin independently. Never aborts on a single
    /// plugin's failure; every outcome is logged and returned.
    pub fn load_all(&self, registry: &mut CommandRegistry, logs: &LogSink) -> Vec<LoadResult> {
        let mut results = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            let before = registry.len();
            let outcome = match catch_unwind(AssertUnwindSafe(|| plugin.setup(registry))) {
                Ok(Ok(())) => {
                    logs.append(format!("Loaded {}", plugin.name()));
                    LoadOutcome::Loaded {
                        commands: registry.len() - before,
                    }
                }
                Ok(Err(err)) => {
                    let detail = format!("{err:#}");
                    logs.append(format!(
                        "Failed to load {} [setup error: {detail}]",
                        plugin.name()
                    ));
                    LoadOutcome::Failed {
                        kind: "setup error".to_owned(),
                        detail,
                    }
                }
                Err(panic) => {
                    let detail = panic_detail(panic.as_ref());
                    logs.append(format!(
                        "Failed to load {} [panic: {detail}]",
                        plugin.name()
                    ));
                    LoadOutcome::Failed {
                        kind: "panic".to_owned(),
                        detail,
                    }
                }
            };
            results.push(LoadResult {
                name: plugin.name().to_owned(),
                outcome,
            });
        }
        results
    }

    /// Tear every plugin down, ignoring individual failures.
    pub fn unload_all(&self, logs: &LogSink) {
        for plugin in &self.plugins {
            if catch_unwind(AssertUnwindSafe(|| plugin.teardown())).is_err() {
                logs.append(format!("Plugin {} teardown panicked", plugin.name()));
            }
        }
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

/// Built-in miscellaneous commands.
pub struct MiscPlugin;

impl Plugin for MiscPlugin {
    fn name(&self) -> &'static str {
        "misc"
    }

    fn setup(&self, registry: &mut CommandRegistry) -> anyhow::Result<()> {
        registry.register(
            CommandSpec::new(
                "ping",
                "Check my connection time to the platform.",
                Arc::new(PingCommand),
            )
            .with_cooldown(CooldownSpec::default()),
        )
    }
}

struct PingCommand;

#[async_trait]
impl CommandHandler for PingCommand {
    async fn invoke(
        &self,
        _ctx: &CommandContext,
        platform: &dyn PlatformTransport,
    ) -> Result<Option<String>, Fault> {
        let millis = platform.latency().as_millis();
        Ok(Some(format!(":ping_pong: {millis}ms")))
    }
}
