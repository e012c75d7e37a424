//! Dispatch-fault taxonomy and classification pipeline.
//!
//! Every fault raised during command dispatch is one variant of [`Fault`],
//! so classification is an exhaustive match rather than a dynamic type
//! chain. The pipeline picks the user-facing response, decides whether the
//! operator channel gets a structured report, resets the command's cooldown
//! (a failed attempt never consumes cooldown), and appends a log record.
//!
//! Invokers never see raw internal detail — only templated messages.
//! Operators receive full detail for unclassified faults and for faults
//! raised outside dispatch.

use std::sync::Arc;

use chrono::Utc;

use crate::blacklist::PrincipalId;
use crate::logbuf::LogSink;
use crate::platform::PlatformTransport;
use crate::router::CommandRouter;

/// A fault raised during command dispatch. Closed taxonomy; classification
/// priority is the variant order here, first match wins.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Fault {
    /// The command's cooldown has not elapsed.
    #[error("Command is on cool down. Try again in {retry_after_secs}s.")]
    Cooldown {
        /// Remaining wait in seconds.
        retry_after_secs: u64,
    },

    /// The invoking principal is blacklisted. The user-facing message is
    /// the stored reason text, verbatim.
    #[error("{reason}")]
    Blacklisted {
        /// Stored block reason.
        reason: String,
    },

    /// The invocation came from a non-qualifying (private) context.
    #[error("You aren't allowed to do that.")]
    ContextNotAllowed,

    /// A permission, ownership, or generic pre-check rejected the
    /// invocation.
    #[error("You aren't allowed to do that.")]
    PermissionDenied,

    /// Malformed invocation; the user is redirected to the command's help.
    #[error("malformed invocation: {detail}")]
    Usage {
        /// What was malformed (not shown to the user).
        detail: String,
    },

    /// Anything else. The only variant that produces an operator report.
    #[error("An error occurred while performing this command.")]
    Internal {
        /// Full fault detail, operator-only.
        detail: String,
    },
}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        Fault::Internal {
            detail: format!("{err:?}"),
        }
    }
}

/// Invocation context a fault is tagged with.
#[derive(Debug, Clone)]
pub struct DispatchInfo<'a> {
    /// Invoking principal.
    pub principal: PrincipalId,
    /// Channel the invocation arrived in.
    pub channel_id: u64,
    /// Raw invocation text.
    pub invocation: &'a str,
    /// Qualified name of the attempted command (empty if unresolved).
    pub command: &'a str,
}

/// Classifies faults and delivers the resulting messages.
pub struct FaultPipeline {
    operator_channel_id: u64,
    logs: Arc<LogSink>,
}

impl FaultPipeline {
    /// Create a pipeline reporting to the given operator channel.
    #[must_use]
    pub fn new(operator_channel_id: u64, logs: Arc<LogSink>) -> Self {
        Self {
            operator_channel_id,
            logs,
        }
    }

    /// Handle a fault raised during command dispatch.
    pub async fn on_dispatch_fault(
        &self,
        platform: &dyn PlatformTransport,
        router: &CommandRouter,
        info: &DispatchInfo<'_>,
        fault: Fault,
    ) {
        // Unconditional side effects come first so a report-send failure can
        // never swallow them.
        router.reset_cooldown(info.command);
        self.logs
            .append(format!("{}: {}", info.principal, info.invocation));

        let user_message = match &fault {
            Fault::Cooldown { retry_after_secs } => {
                self.logs.append(format!(
                    "{}: Command on cool down. Retry {retry_after_secs}s",
                    info.principal
                ));
                fault.to_string()
            }
            Fault::Blacklisted { .. }
            | Fault::ContextNotAllowed
            | Fault::PermissionDenied
            | Fault::Internal { .. } => fault.to_string(),
            // Redirect to help scoped to the attempted command; this does
            // not count as a fresh top-level error.
            Fault::Usage { .. } => router.help_text(info.command),
        };

        if let Err(err) = platform.send_message(info.channel_id, &user_message).await {
            tracing::warn!("failed to send fault response: {err}");
        }

        if let Fault::Internal { detail } = &fault {
            let report = render_dispatch_report(info, detail);
            if let Err(err) = platform
                .send_message(self.operator_channel_id, &report)
                .await
            {
                tracing::warn!("failed to send operator report: {err}");
            }
        }
    }

    /// Handle a fault raised outside command dispatch (platform event
    /// handlers). Always logs and always reports; there is no user to
    /// notify.
    pub async fn on_event_fault(
        &self,
        platform: &dyn PlatformTransport,
        source: &str,
        detail: &str,
    ) {
        let summary = detail
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or(detail);
        self.logs.append(format!("Error in {source}: {summary}"));

        let report = format!("Error in {source}:```\n{detail}\n```");
        if let Err(err) = platform
            .send_message(self.operator_channel_id, &report)
            .await
        {
            tracing::warn!("failed to send operator report: {err}");
        }
    }
}

/// Render the structured operator report for an unclassified dispatch fault.
fn render_dispatch_report(info: &DispatchInfo<'_>, detail: &str) -> String {
    format!(
        "```ini\n\
         [Error Occurred]\n\
         Time: {}\n\
         Invoker: {}\n\
         Channel: {}\n\
         Invocation: {}\n\n\
         [Exception]\n\
         {}\n\
         ```",
        Utc::now().format("%m/%d:%y @ %H:%M:%S"),
        info.principal,
        info.channel_id,
        info.invocation,
        detail
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn info<'a>(invocation: &'a str, command: &'a str) -> DispatchInfo<'a> {
        DispatchInfo {
            principal: 42,
            channel_id: 7,
            invocation,
            command,
        }
    }

    #[test]
    fn cooldown_message_includes_wait_time() {
        let fault = Fault::Cooldown {
            retry_after_secs: 12,
        };
        assert_eq!(
            fault.to_string(),
            "Command is on cool down. Try again in 12s."
        );
    }

    #[test]
    fn blacklisted_message_is_the_stored_reason() {
        let fault = Fault::Blacklisted {
            reason: "spamming invites".to_owned(),
        };
        assert_eq!(fault.to_string(), "spamming invites");
    }

    #[test]
    fn permission_and_context_share_the_generic_denial() {
        assert_eq!(
            Fault::ContextNotAllowed.to_string(),
            Fault::PermissionDenied.to_string()
        );
    }

    #[test]
    fn internal_message_never_leaks_detail() {
        let fault = Fault::Internal {
            detail: "thread panicked at src/secret.rs:7".to_owned(),
        };
        assert!(!fault.to_string().contains("secret"));
    }

    #[test]
    fn anyhow_errors_become_internal_faults() {
        let fault: Fault = anyhow::anyhow!("boom").into();
        match fault {
            Fault::Internal { detail } => assert!(detail.contains("boom")),
            other => unreachable!("expected internal fault, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_report_carries_all_context_fields() {
        let report = render_dispatch_report(&info("!ping now", "ping"), "stack detail here");
        assert!(report.starts_with("```ini\n[Error Occurred]"));
        assert!(report.contains("Invoker: 42"));
        assert!(report.contains("Channel: 7"));
        assert!(report.contains("Invocation: !ping now"));
        assert!(report.contains("[Exception]\nstack detail here"));
        assert!(report.contains("Time: "));
    }
}
