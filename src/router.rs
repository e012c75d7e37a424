//! Readiness gate and command router.
//!
//! The router resolves the accepted command prefixes from the readiness
//! gate: while the process is still booting every resolution returns a
//! sentinel no real message can start with, so nothing dispatches. Once
//! ready, mention and literal prefixes are accepted. Every candidate
//! invocation then passes the pre-dispatch checks (group context, blacklist)
//! and the command's cooldown before reaching its handler; any rejection
//! flows into the fault pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;

use crate::blacklist::{BlacklistCache, PrincipalId};
use crate::cooldown::{CommandCooldowns, CooldownError, CooldownSpec};
use crate::faults::{DispatchInfo, Fault, FaultPipeline};
use crate::logbuf::LogSink;
use crate::platform::{InboundMessage, PlatformTransport};

/// Prefix returned while booting. Control characters guarantee no inbound
/// message can match it.
pub const BOOT_SENTINEL: &str = "\u{1}\u{1}not-ready\u{1}\u{1}";

/// Boot-completion flag. Transitions false→true exactly once per process
/// lifetime; there is no way back.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    ready: AtomicBool,
}

impl ReadinessGate {
    /// Create a gate in the `BOOTING` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip to `READY`. Idempotent.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Whether boot has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Context handed to a command handler.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Invoking principal.
    pub principal: PrincipalId,
    /// Channel to reply into.
    pub channel_id: u64,
    /// Group context identifier.
    pub guild_id: Option<u64>,
    /// Full raw invocation text.
    pub invocation: String,
    /// Whitespace-split arguments after the command name.
    pub args: Vec<String>,
}

/// Command handler contract. Returning `Some(text)` sends a reply.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute the command.
    async fn invoke(
        &self,
        ctx: &CommandContext,
        platform: &dyn PlatformTransport,
    ) -> Result<Option<String>, Fault>;
}

/// A registered command.
#[derive(Clone)]
pub struct CommandSpec {
    /// Command name (matched case-insensitively).
    pub name: &'static str,
    /// One-line help text.
    pub help: &'static str,
    /// Optional cooldown parameters.
    pub cooldown: Option<CooldownSpec>,
    /// Handler invoked after all checks pass.
    pub handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    /// Create a spec with no cooldown.
    pub fn new(name: &'static str, help: &'static str, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            name,
            help,
            cooldown: None,
            handler,
        }
    }

    /// Attach a cooldown.
    #[must_use]
    pub fn with_cooldown(mut self, spec: CooldownSpec) -> Self {
        self.cooldown = Some(spec);
        self
    }
}

/// Commands keyed by lowercased name. Populated by plugins at boot.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// Register a command. Duplicate names are a plugin bug.
    pub fn register(&mut self, spec: CommandSpec) -> anyhow::Result<()> {
        let key = spec.name.to_lowercase();
        if self.commands.contains_key(&key) {
            anyhow::bail!("command `{}` is already registered", spec.name);
        }
        self.commands.insert(key, spec);
        Ok(())
    }

    /// Look up a command by name, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(&name.to_lowercase())
    }

    /// Registered command names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.commands.values().map(|spec| spec.name).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Readiness-gated command dispatcher.
pub struct CommandRouter {
    registry: CommandRegistry,
    gate: Arc<ReadinessGate>,
    cache: Arc<Mutex<BlacklistCache>>,
    cooldowns: Mutex<CommandCooldowns>,
    /// Literal prefixes from configuration.
    prefixes: Vec<String>,
    /// Mention prefixes, set once the daemon's own principal is known.
    mention: OnceLock<[String; 2]>,
    logs: Arc<LogSink>,
}

impl CommandRouter {
    /// Build a router over a populated registry.
    #[must_use]
    pub fn new(
        registry: CommandRegistry,
        gate: Arc<ReadinessGate>,
        cache: Arc<Mutex<BlacklistCache>>,
        prefixes: Vec<String>,
        logs: Arc<LogSink>,
    ) -> Self {
        let mut cooldowns = CommandCooldowns::default();
        for name in registry.names() {
            if let Some(spec) = registry.get(name)
                && let Some(cooldown) = spec.cooldown
            {
                cooldowns.register(name, cooldown);
            }
        }
        Self {
            registry,
            gate,
            cache,
            cooldowns: Mutex::new(cooldowns),
            prefixes,
            mention: OnceLock::new(),
            logs,
        }
    }

    /// Install mention prefixes for the daemon's own principal. One-shot.
    pub fn set_mention(&self, self_id: PrincipalId) {
        let _ = self
            .mention
            .set([format!("<@{self_id}> "), format!("<@!{self_id}> ")]);
    }

    /// The prefixes currently accepted.
    ///
    /// While booting this is only [`BOOT_SENTINEL`], so no input string can
    /// resolve as a command.
    #[must_use]
    pub fn resolve_prefixes(&self) -> Vec<String> {
        if !self.gate.is_ready() {
            return vec![BOOT_SENTINEL.to_owned()];
        }
        let mut prefixes = Vec::new();
        if let Some(mention) = self.mention.get() {
            prefixes.extend(mention.iter().cloned());
        }
        prefixes.extend(self.prefixes.iter().cloned());
        prefixes
    }

    /// Strip the first accepted prefix off `text`, if any.
    #[must_use]
    pub fn strip_prefix<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.resolve_prefixes()
            .into_iter()
            .find_map(|prefix| text.strip_prefix(prefix.as_str()))
    }

    /// Pre-dispatch checks, short-circuiting in order: qualifying group
    /// context first, then the blacklist.
    fn pre_dispatch(&self, message: &InboundMessage) -> Result<(), Fault> {
        if message.guild_id.is_none() {
            return Err(Fault::ContextNotAllowed);
        }
        let cache = self
            .cache
            .lock()
            .map_err(|_| Fault::Internal {
                detail: "blacklist cache lock poisoned".to_owned(),
            })?;
        if let Some(reason) = cache.reason(message.principal) {
            return Err(Fault::Blacklisted {
                reason: reason.to_owned(),
            });
        }
        Ok(())
    }

    /// Reset the cooldown bucket for `command`. No-op for unknown names.
    pub fn reset_cooldown(&self, command: &str) {
        if let Ok(mut cooldowns) = self.cooldowns.lock() {
            cooldowns.reset(command);
        }
    }

    /// Render help: the command overview for an empty topic, otherwise the
    /// named command's help line.
    #[must_use]
    pub fn help_text(&self, topic: &str) -> String {
        if topic.is_empty() || topic == "help" {
            let mut lines = vec!["Commands:".to_owned()];
            for name in self.registry.names() {
                if let Some(spec) = self.registry.get(name) {
                    lines.push(format!("  {} — {}", spec.name, spec.help));
                }
            }
            lines.push("  help — Show this overview, or `help <command>`.".to_owned());
            return lines.join("\n");
        }
        match self.registry.get(topic) {
            Some(spec) => format!("{}: {}", spec.name, spec.help),
            None => format!("No command named `{topic}`."),
        }
    }

    /// Route one inbound message. Non-commands are ignored; every fault on
    /// the way to (or inside) a handler goes through the pipeline.
    pub async fn handle_message(
        &self,
        message: &InboundMessage,
        platform: &dyn PlatformTransport,
        pipeline: &FaultPipeline,
    ) {
        let Some(rest) = self.strip_prefix(&message.text) else {
            return;
        };
        let mut parts = rest.split_whitespace();
        let Some(raw_name) = parts.next() else {
            return;
        };
        let name = raw_name.to_lowercase();
        let args: Vec<String> = parts.map(str::to_owned).collect();

        let info = DispatchInfo {
            principal: message.principal,
            channel_id: message.channel_id,
            invocation: &message.text,
            command: &name,
        };

        if let Err(fault) = self.pre_dispatch(message) {
            pipeline
                .on_dispatch_fault(platform, self, &info, fault)
                .await;
            return;
        }

        // `help` is a router builtin; it reads the registry directly.
        if name == "help" {
            let topic = args.first().map(String::as_str).unwrap_or("");
            let text = self.help_text(topic);
            if let Err(err) = platform.send_message(message.channel_id, &text).await {
                tracing::warn!("failed to send help: {err}");
            }
            return;
        }

        let Some(spec) = self.registry.get(&name) else {
            self.logs
                .append(format!("Ignored unrecognized command `{name}`"));
            return;
        };

        if let Err(CooldownError::NotElapsed { retry_after_secs }) = self
            .cooldowns
            .lock()
            .map(|mut cooldowns| cooldowns.try_acquire(&name))
            .unwrap_or(Ok(()))
        {
            pipeline
                .on_dispatch_fault(platform, self, &info, Fault::Cooldown { retry_after_secs })
                .await;
            return;
        }

        let ctx = CommandContext {
            principal: message.principal,
            channel_id: message.channel_id,
            guild_id: message.guild_id,
            invocation: message.text.clone(),
            args,
        };

        match spec.handler.invoke(&ctx, platform).await {
            Ok(Some(reply)) => {
                if let Err(err) = platform.send_message(message.channel_id, &reply).await {
                    tracing::warn!("failed to send command reply: {err}");
                }
            }
            Ok(None) => {}
            Err(fault) => {
                pipeline
                    .on_dispatch_fault(platform, self, &info, fault)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    use crate::platform::PlatformEvent;

    /// Transport that records outbound messages.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(u64, String)>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(u64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlatformTransport for RecordingTransport {
        fn id(&self) -> &'static str {
            "recording"
        }

        async fn run(&self, _event_tx: mpsc::Sender<PlatformEvent>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send_message(&self, channel_id: u64, text: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((channel_id, text.to_owned()));
            Ok(())
        }
    }

    /// Handler that counts invocations and echoes a fixed reply.
    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandHandler for CountingHandler {
        async fn invoke(
            &self,
            _ctx: &CommandContext,
            _platform: &dyn PlatformTransport,
        ) -> Result<Option<String>, Fault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("done".to_owned()))
        }
    }

    /// Handler that always raises an unclassified fault.
    struct FailingHandler;

    #[async_trait]
    impl CommandHandler for FailingHandler {
        async fn invoke(
            &self,
            _ctx: &CommandContext,
            _platform: &dyn PlatformTransport,
        ) -> Result<Option<String>, Fault> {
            Err(Fault::Internal {
                detail: "synthetic failure".to_owned(),
            })
        }
    }

    /// Handler that rejects its arguments as malformed.
    struct UsageHandler;

    #[async_trait]
    impl CommandHandler for UsageHandler {
        async fn invoke(
            &self,
            _ctx: &CommandContext,
            _platform: &dyn PlatformTransport,
        ) -> Result<Option<String>, Fault> {
            Err(Fault::Usage {
                detail: "expected a principal id".to_owned(),
            })
        }
    }

    struct Fixture {
        router: CommandRouter,
        pipeline: FaultPipeline,
        transport: RecordingTransport,
        calls: Arc<AtomicUsize>,
    }

    const OPERATOR_CHANNEL: u64 = 999;

    fn fixture(ready: bool, cache: BlacklistCache) -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CommandRegistry::default();
        registry
            .register(
                CommandSpec::new(
                    "probe",
                    "Test command.",
                    Arc::new(CountingHandler {
                        calls: Arc::clone(&calls),
                    }),
                )
                .with_cooldown(CooldownSpec {
                    uses: 1,
                    per_secs: 60,
                }),
            )
            .unwrap();
        registry
            .register(CommandSpec::new(
                "explode",
                "Always fails.",
                Arc::new(FailingHandler),
            ))
            .unwrap();
        registry
            .register(CommandSpec::new(
                "parse",
                "Needs a principal id argument.",
                Arc::new(UsageHandler),
            ))
            .unwrap();

        let gate = Arc::new(ReadinessGate::new());
        if ready {
            gate.mark_ready();
        }
        let logs = Arc::new(LogSink::new(64));
        let router = CommandRouter::new(
            registry,
            gate,
            Arc::new(Mutex::new(cache)),
            vec!["!".to_owned()],
            Arc::clone(&logs),
        );
        let pipeline = FaultPipeline::new(OPERATOR_CHANNEL, logs);
        Fixture {
            router,
            pipeline,
            transport: RecordingTransport::default(),
            calls,
        }
    }

    fn group_message(principal: PrincipalId, text: &str) -> InboundMessage {
        InboundMessage {
            principal,
            channel_id: 10,
            guild_id: Some(1),
            text: text.to_owned(),
        }
    }

    #[test]
    fn gate_is_monotonic() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());
        gate.mark_ready();
        gate.mark_ready();
        assert!(gate.is_ready());
    }

    #[test]
    fn booting_prefixes_match_nothing() {
        let fx = fixture(false, BlacklistCache::default());
        assert_eq!(fx.router.resolve_prefixes(), vec![BOOT_SENTINEL.to_owned()]);
        for text in ["!probe", "probe", "<@1> probe", "", "help"] {
            assert!(fx.router.strip_prefix(text).is_none(), "matched {text:?}");
        }
    }

    #[test]
    fn ready_prefixes_include_mention_and_literals() {
        let fx = fixture(true, BlacklistCache::default());
        fx.router.set_mention(555);
        let prefixes = fx.router.resolve_prefixes();
        assert_eq!(
            prefixes,
            vec!["<@555> ".to_owned(), "<@!555> ".to_owned(), "!".to_owned()]
        );
        assert_eq!(fx.router.strip_prefix("<@555> probe"), Some("probe"));
        assert_eq!(fx.router.strip_prefix("!probe"), Some("probe"));
    }

    #[tokio::test]
    async fn unlisted_principal_reaches_handler() {
        let fx = fixture(true, BlacklistCache::default());
        fx.router
            .handle_message(&group_message(42, "!probe"), &fx.transport, &fx.pipeline)
            .await;

        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.transport.sent(), vec![(10, "done".to_owned())]);
    }

    #[tokio::test]
    async fn blacklisted_principal_is_rejected_with_stored_reason() {
        let mut cache = BlacklistCache::default();
        cache.insert(42, "spamming invites");
        let fx = fixture(true, cache);

        fx.router
            .handle_message(&group_message(42, "!probe"), &fx.transport, &fx.pipeline)
            .await;

        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.transport.sent(), vec![(10, "spamming invites".to_owned())]);
    }

    #[tokio::test]
    async fn private_context_is_rejected_before_handler() {
        let fx = fixture(true, BlacklistCache::default());
        let message = InboundMessage {
            principal: 42,
            channel_id: 10,
            guild_id: None,
            text: "!probe".to_owned(),
        };

        fx.router
            .handle_message(&message, &fx.transport, &fx.pipeline)
            .await;

        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            fx.transport.sent(),
            vec![(10, "You aren't allowed to do that.".to_owned())]
        );
    }

    #[tokio::test]
    async fn cooldown_rejection_then_reset_allows_retry() {
        let fx = fixture(true, BlacklistCache::default());
        let message = group_message(42, "!probe");

        fx.router
            .handle_message(&message, &fx.transport, &fx.pipeline)
            .await;
        fx.router
            .handle_message(&message, &fx.transport, &fx.pipeline)
            .await;

        // Second attempt hit the cooldown; the pipeline reset the bucket as
        // a side effect, so a third attempt goes through again.
        let sent = fx.transport.sent();
        assert!(sent[1].1.starts_with("Command is on cool down."));

        fx.router
            .handle_message(&message, &fx.transport, &fx.pipeline)
            .await;
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn internal_fault_sends_generic_message_and_one_report() {
        let fx = fixture(true, BlacklistCache::default());
        fx.router
            .handle_message(&group_message(42, "!explode"), &fx.transport, &fx.pipeline)
            .await;

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            (10, "An error occurred while performing this command.".to_owned())
        );
        assert_eq!(sent[1].0, OPERATOR_CHANNEL);
        assert!(sent[1].1.contains("[Error Occurred]"));
        assert!(sent[1].1.contains("synthetic failure"));
    }

    #[tokio::test]
    async fn usage_fault_redirects_to_scoped_help() {
        let fx = fixture(true, BlacklistCache::default());
        fx.router
            .handle_message(
                &group_message(42, "!parse garbage"),
                &fx.transport,
                &fx.pipeline,
            )
            .await;

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1, "usage faults never produce an operator report");
        assert_eq!(sent[0], (10, fx.router.help_text("parse")));
        assert_eq!(sent[0].1, "parse: Needs a principal id argument.");
        assert!(!sent[0].1.contains("expected a principal id"));
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let fx = fixture(true, BlacklistCache::default());
        fx.router
            .handle_message(&group_message(42, "!frobnicate"), &fx.transport, &fx.pipeline)
            .await;

        assert!(fx.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn non_command_text_is_ignored() {
        let fx = fixture(true, BlacklistCache::default());
        fx.router
            .handle_message(
                &group_message(42, "just chatting about probes"),
                &fx.transport,
                &fx.pipeline,
            )
            .await;

        assert!(fx.transport.sent().is_empty());
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn command_names_match_case_insensitively() {
        let fx = fixture(true, BlacklistCache::default());
        fx.router
            .handle_message(&group_message(42, "!PrObE"), &fx.transport, &fx.pipeline)
            .await;

        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn help_lists_registered_commands() {
        let fx = fixture(true, BlacklistCache::default());
        fx.router
            .handle_message(&group_message(42, "!help"), &fx.transport, &fx.pipeline)
            .await;

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("probe — Test command."));
        assert!(sent[0].1.contains("help — Show this overview"));
    }

    #[test]
    fn help_text_for_unknown_topic() {
        let fx = fixture(true, BlacklistCache::default());
        assert_eq!(fx.router.help_text("nope"), "No command named `nope`.");
    }
}
