//! Lifecycle controller: ordered boot, event consumption, guarded shutdown.
//!
//! Boot runs strictly in order — plugins, store, schema, cache hydration,
//! platform connection — and any step's failure (other than an individual
//! plugin's) is fatal. Inbound platform events are then consumed one at a
//! time from a single queue, so shared state needs no locking discipline
//! beyond the mutexes it already carries. Shutdown is triggered by the
//! caller's shutdown future and runs best-effort: each step is guarded so
//! one failure never blocks the rest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::blacklist::{BlacklistCache, BlacklistStore};
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::faults::FaultPipeline;
use crate::logbuf::LogSink;
use crate::platform::{PlatformEvent, PlatformTransport};
use crate::plugins::PluginLoader;
use crate::router::{CommandRegistry, CommandRouter, ReadinessGate};

/// State assembled by the boot sequence.
struct BootState {
    /// `Some` until the shutdown sequence closes the store.
    store: Option<BlacklistStore>,
    cache: Arc<Mutex<BlacklistCache>>,
    router: CommandRouter,
    pipeline: FaultPipeline,
    gate: Arc<ReadinessGate>,
}

/// Drives the process from boot through shutdown.
pub struct Lifecycle {
    config: WardenConfig,
    transport: Arc<dyn PlatformTransport>,
    loader: PluginLoader,
    logs: Arc<LogSink>,
}

impl Lifecycle {
    /// Create a lifecycle with the built-in plugin set.
    #[must_use]
    pub fn new(config: WardenConfig, transport: Arc<dyn PlatformTransport>) -> Self {
        Self::with_plugins(config, transport, PluginLoader::builtin())
    }

    /// Create a lifecycle with a custom plugin set.
    #[must_use]
    pub fn with_plugins(
        config: WardenConfig,
        transport: Arc<dyn PlatformTransport>,
        loader: PluginLoader,
    ) -> Self {
        let logs = Arc::new(LogSink::new(config.log_capacity));
        Self {
            config,
            transport,
            loader,
            logs,
        }
    }

    /// Handle to the process log ring.
    #[must_use]
    pub fn logs(&self) -> Arc<LogSink> {
        Arc::clone(&self.logs)
    }

    /// Run until the shutdown future resolves, then run the shutdown
    /// sequence to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if any fatal boot step fails; the process never
    /// reaches readiness in that case.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        let mut state = self.boot()?;

        let (event_tx, mut event_rx) =
            mpsc::channel::<PlatformEvent>(self.config.event_queue_size.max(8));

        let mut workers = JoinSet::new();
        {
            let transport = Arc::clone(&self.transport);
            workers.spawn(async move {
                let mut backoff_secs = 2u64;
                loop {
                    match transport.run(event_tx.clone()).await {
                        Ok(()) => break,
                        Err(err) => {
                            let fault = PlatformEvent::Fault {
                                source: format!("{} connection", transport.id()),
                                detail: format!("{err:?}"),
                            };
                            if event_tx.send(fault).await.is_err() {
                                break;
                            }
                            tracing::warn!(
                                "transport {} failed: {err}; retrying in {backoff_secs}s",
                                transport.id()
                            );
                            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                            backoff_secs = backoff_secs.saturating_mul(2).min(60);
                        }
                    }
                }
            });
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                maybe_event = event_rx.recv() => match maybe_event {
                    Some(event) => self.handle_event(&state, event).await,
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }

        // Shutdown runs while the transport task is still alive: the
        // disconnect step needs the live gateway loop to deliver its close
        // request. Only afterwards is the worker reaped.
        self.run_shutdown(&mut state).await;

        let graceful = tokio::time::timeout(Duration::from_secs(5), async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if graceful.is_err() {
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
        Ok(())
    }

    /// Boot sequence. Strict order; every error here is fatal.
    fn boot(&self) -> Result<BootState> {
        self.logs.append("Initialized.");

        let mut registry = CommandRegistry::default();
        self.loader.load_all(&mut registry, &self.logs);
        self.logs
            .append("Plugins prepared, beginning store preparations.");

        let store = BlacklistStore::open(&self.config.database.path)?;
        self.logs.append("Connected to the store.");
        store.ensure_layout()?;
        let cache = BlacklistCache::hydrate(&store, &self.logs)?;
        self.logs
            .append("Store initialized. Beginning platform connection.");

        let gate = Arc::new(ReadinessGate::new());
        let cache = Arc::new(Mutex::new(cache));
        let router = CommandRouter::new(
            registry,
            Arc::clone(&gate),
            Arc::clone(&cache),
            self.config.prefixes.clone(),
            Arc::clone(&self.logs),
        );
        if let Some(self_id) = self.transport.self_principal() {
            router.set_mention(self_id);
        }
        let pipeline = FaultPipeline::new(self.config.operator_channel_id, Arc::clone(&self.logs));

        Ok(BootState {
            store: Some(store),
            cache,
            router,
            pipeline,
            gate,
        })
    }

    /// Consume one platform event.
    async fn handle_event(&self, state: &BootState, event: PlatformEvent) {
        match event {
            PlatformEvent::Connected => {
                self.logs.append("Successfully connected. Finalizing.");
            }
            PlatformEvent::Ready { active_principals } => {
                let removed = state
                    .cache
                    .lock()
                    .map(|mut cache| cache.reconcile(&active_principals))
                    .unwrap_or(0);
                if removed > 0 {
                    tracing::debug!("reconciliation dropped {removed} stale blacklist entries");
                }
                state.gate.mark_ready();
                self.logs.append("Setup complete. Now listening to commands.");
                if let Err(err) = self.transport.announce_ready().await {
                    tracing::warn!("failed to announce readiness: {err}");
                }
            }
            PlatformEvent::Message(message) => {
                state
                    .router
                    .handle_message(&message, self.transport.as_ref(), &state.pipeline)
                    .await;
            }
            PlatformEvent::Fault { source, detail } => {
                state
                    .pipeline
                    .on_event_fault(self.transport.as_ref(), &source, &detail)
                    .await;
            }
        }
    }

    /// Shutdown sequence. Every step is guarded; failures are logged and
    /// never block later steps.
    async fn run_shutdown(&self, state: &mut BootState) {
        self.logs.append("Flushing to store.");
        if let Some(store) = state.store.as_ref() {
            let flush_result = state
                .cache
                .lock()
                .map_err(|_| WardenError::Storage("blacklist cache lock poisoned".to_owned()))
                .and_then(|cache| cache.flush(store));
            if let Err(err) = flush_result {
                // The flush is the only durability point for in-run cache
                // changes; the operator must hear about a failure.
                tracing::error!("blacklist flush failed: {err}");
                self.logs.append(format!("Flush failed: {err}"));
                let warning = format!("Blacklist flush failed during shutdown: {err}");
                if let Err(send_err) = self
                    .transport
                    .send_message(self.config.operator_channel_id, &warning)
                    .await
                {
                    tracing::warn!("failed to warn operator about flush failure: {send_err}");
                }
            }
        }

        // Dropping the store closes its connection.
        drop(state.store.take());

        self.logs.append("Shutting down...");
        self.loader.unload_all(&self.logs);

        if let Err(err) = self.transport.disconnect().await {
            tracing::warn!("transport disconnect failed: {err}");
        }
    }
}
