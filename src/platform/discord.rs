//! Discord transport using the official gateway websocket + REST API.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::blacklist::PrincipalId;
use crate::config::WardenConfig;
use crate::platform::{InboundMessage, PlatformEvent, PlatformTransport};

/// Activity shown from identify until readiness is announced.
const BOOT_ACTIVITY: &str = "Booting...";

/// Control messages for the gateway writer.
enum GatewayCommand {
    /// Update presence (status + watched activity).
    Presence {
        status: &'static str,
        activity: String,
    },
    /// Close the websocket and end the run loop cleanly.
    Close,
}

/// Shared state between the transport handle and its running gateway task.
#[derive(Default)]
struct GatewayShared {
    /// Round-trip time measured from heartbeat to heartbeat ACK.
    latency: Mutex<Duration>,
    /// Sender installed while a gateway connection is live.
    command_tx: Mutex<Option<mpsc::UnboundedSender<GatewayCommand>>>,
}

/// Discord transport.
pub struct DiscordTransport {
    bot_token: String,
    self_id: Option<PrincipalId>,
    ready_activity: String,
    client: reqwest::Client,
    shared: GatewayShared,
}

impl DiscordTransport {
    /// Build a transport from configuration.
    #[must_use]
    pub fn new(config: &WardenConfig) -> Self {
        let self_id = Self::bot_user_id_from_token(&config.token);
        Self {
            bot_token: config.token.clone(),
            self_id,
            ready_activity: config.ready_activity.clone(),
            client: reqwest::Client::new(),
            shared: GatewayShared::default(),
        }
    }

    /// The bot user id is the base64url-encoded first token segment.
    fn bot_user_id_from_token(token: &str) -> Option<PrincipalId> {
        let first = token.split('.').next()?;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(first)
            .ok()?;
        String::from_utf8(decoded).ok()?.parse().ok()
    }

    fn send_command(&self, command: GatewayCommand) -> anyhow::Result<()> {
        let guard = self
            .shared
            .command_tx
            .lock()
            .map_err(|_| anyhow::anyhow!("gateway command lock poisoned"))?;
        let Some(tx) = guard.as_ref() else {
            anyhow::bail!("gateway is not connected");
        };
        tx.send(command)
            .map_err(|_| anyhow::anyhow!("gateway command channel closed"))
    }

    fn record_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.shared.latency.lock() {
            *slot = latency;
        }
    }

    /// Identify payload: intents, client properties, and the idle boot
    /// presence held until readiness is announced.
    fn identify_payload(&self) -> serde_json::Value {
        json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                // GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | MESSAGE_CONTENT
                "intents": 33283,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "warden",
                    "device": "warden"
                },
                "presence": {
                    "since": serde_json::Value::Null,
                    "activities": [{"name": BOOT_ACTIVITY, "type": 0}],
                    "status": "online",
                    "afk": false
                }
            }
        })
    }
}

#[async_trait]
impl PlatformTransport for DiscordTransport {
    fn id(&self) -> &'static str {
        "discord"
    }

    fn self_principal(&self) -> Option<PrincipalId> {
        self.self_id
    }

    fn latency(&self) -> Duration {
        self.shared
            .latency
            .lock()
            .map(|slot| *slot)
            .unwrap_or(Duration::ZERO)
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> anyhow::Result<()> {
        let url = format!("https://discord.com/api/v10/channels/{channel_id}/messages");
        let body = json!({ "content": text });
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("discord send failed ({status}): {body}");
        }
        Ok(())
    }

    async fn announce_ready(&self) -> anyhow::Result<()> {
        self.send_command(GatewayCommand::Presence {
            status: "online",
            activity: self.ready_activity.clone(),
        })
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.send_command(GatewayCommand::Close)
    }

    async fn run(&self, event_tx: mpsc::Sender<PlatformEvent>) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("discord bot token is empty");
        }

        let gateway_resp: serde_json::Value = self
            .client
            .get("https://discord.com/api/v10/gateway/bot")
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await?
            .json()
            .await?;

        let gateway_url = gateway_resp
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("wss://gateway.discord.gg");
        let ws_url = format!("{gateway_url}/?v=10&encoding=json");

        let (stream, _) = tokio_tungstenite::connect_async(&ws_url).await?;
        let (mut write, mut read) = stream.split();

        let hello = read
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("no hello"))??;
        let hello_text = match hello {
            Message::Text(text) => text.to_string(),
            _ => anyhow::bail!("unexpected discord hello payload"),
        };
        let hello_json: serde_json::Value = serde_json::from_str(&hello_text)?;
        let heartbeat_interval_ms = hello_json
            .get("d")
            .and_then(|v| v.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(41_250);

        let identify = self.identify_payload();
        write.send(Message::Text(identify.to_string())).await?;

        let (hb_tx, mut hb_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(heartbeat_interval_ms));
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<GatewayCommand>();
        if let Ok(mut slot) = self.shared.command_tx.lock() {
            *slot = Some(command_tx);
        }

        // Sync tracking: READY lists the guilds the session belongs to; the
        // platform is fully synced once every one of them has delivered its
        // GUILD_CREATE.
        let mut pending_guilds: HashSet<String> = HashSet::new();
        let mut known_principals: HashSet<PrincipalId> = HashSet::new();
        let mut connected_sent = false;
        let mut ready_sent = false;
        let mut last_heartbeat: Option<Instant> = None;

        let result: anyhow::Result<()> = loop {
            tokio::select! {
                _ = hb_rx.recv() => {
                    let heartbeat = json!({"op": 1, "d": serde_json::Value::Null});
                    last_heartbeat = Some(Instant::now());
                    if write.send(Message::Text(heartbeat.to_string())).await.is_err() {
                        break Err(anyhow::anyhow!("discord heartbeat failed"));
                    }
                }
                maybe_command = command_rx.recv() => {
                    match maybe_command {
                        Some(GatewayCommand::Presence { status, activity }) => {
                            let presence = json!({
                                "op": 3,
                                "d": {
                                    "since": serde_json::Value::Null,
                                    "activities": [{"name": activity, "type": 3}],
                                    "status": status,
                                    "afk": false
                                }
                            });
                            if write.send(Message::Text(presence.to_string())).await.is_err() {
                                break Err(anyhow::anyhow!("discord presence update failed"));
                            }
                        }
                        Some(GatewayCommand::Close) | None => {
                            let _ = write.close().await;
                            break Ok(());
                        }
                    }
                }
                maybe_msg = read.next() => {
                    let raw = match maybe_msg {
                        Some(Ok(Message::Text(text))) => text.to_string(),
                        Some(Ok(Message::Close(_))) | None => {
                            break Err(anyhow::anyhow!("discord websocket closed"));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => break Err(anyhow::anyhow!("discord websocket error: {err}")),
                    };

                    let payload: serde_json::Value = match serde_json::from_str(&raw) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    // Heartbeat ACK carries our latency measurement.
                    if payload.get("op").and_then(serde_json::Value::as_u64) == Some(11) {
                        if let Some(sent) = last_heartbeat.take() {
                            self.record_latency(sent.elapsed());
                        }
                        continue;
                    }

                    let event_name = payload
                        .get("t")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default();
                    let Some(data) = payload.get("d") else {
                        continue;
                    };

                    match event_name {
                        "READY" => {
                            if let Some(guilds) = data.get("guilds").and_then(serde_json::Value::as_array) {
                                for guild in guilds {
                                    if let Some(id) = guild.get("id").and_then(serde_json::Value::as_str) {
                                        pending_guilds.insert(id.to_owned());
                                    }
                                }
                            }
                            if !connected_sent {
                                connected_sent = true;
                                if event_tx.send(PlatformEvent::Connected).await.is_err() {
                                    break Err(anyhow::anyhow!("discord event channel closed"));
                                }
                            }
                            // A session with no guilds is synced immediately.
                            if pending_guilds.is_empty() && !ready_sent {
                                ready_sent = true;
                                let event = PlatformEvent::Ready {
                                    active_principals: known_principals.clone(),
                                };
                                if event_tx.send(event).await.is_err() {
                                    break Err(anyhow::anyhow!("discord event channel closed"));
                                }
                            }
                        }
                        "GUILD_CREATE" => {
                            if let Some(id) = data.get("id").and_then(serde_json::Value::as_str) {
                                pending_guilds.remove(id);
                            }
                            if let Some(members) = data.get("members").and_then(serde_json::Value::as_array) {
                                for member in members {
                                    let id = member
                                        .get("user")
                                        .and_then(|u| u.get("id"))
                                        .and_then(serde_json::Value::as_str)
                                        .and_then(|s| s.parse::<PrincipalId>().ok());
                                    if let Some(id) = id {
                                        known_principals.insert(id);
                                    }
                                }
                            }
                            if pending_guilds.is_empty() && !ready_sent {
                                ready_sent = true;
                                let event = PlatformEvent::Ready {
                                    active_principals: known_principals.clone(),
                                };
                                if event_tx.send(event).await.is_err() {
                                    break Err(anyhow::anyhow!("discord event channel closed"));
                                }
                            }
                        }
                        "MESSAGE_CREATE" => {
                            let author_id = data
                                .get("author")
                                .and_then(|a| a.get("id"))
                                .and_then(serde_json::Value::as_str)
                                .and_then(|s| s.parse::<PrincipalId>().ok());
                            let Some(author_id) = author_id else {
                                continue;
                            };
                            if Some(author_id) == self.self_id {
                                continue;
                            }

                            let author_is_bot = data
                                .get("author")
                                .and_then(|a| a.get("bot"))
                                .and_then(serde_json::Value::as_bool)
                                .unwrap_or(false);
                            if author_is_bot {
                                continue;
                            }

                            let channel_id = data
                                .get("channel_id")
                                .and_then(serde_json::Value::as_str)
                                .and_then(|s| s.parse::<u64>().ok());
                            let Some(channel_id) = channel_id else {
                                continue;
                            };

                            let guild_id = data
                                .get("guild_id")
                                .and_then(serde_json::Value::as_str)
                                .and_then(|s| s.parse::<u64>().ok());

                            let content = data
                                .get("content")
                                .and_then(serde_json::Value::as_str)
                                .unwrap_or_default()
                                .trim();
                            if content.is_empty() {
                                continue;
                            }

                            let inbound = InboundMessage {
                                principal: author_id,
                                channel_id,
                                guild_id,
                                text: content.to_owned(),
                            };
                            if event_tx.send(PlatformEvent::Message(inbound)).await.is_err() {
                                break Err(anyhow::anyhow!("discord event channel closed"));
                            }
                        }
                        _ => {}
                    }
                }
            }
        };

        if let Ok(mut slot) = self.shared.command_tx.lock() {
            *slot = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use base64::Engine as _;

    fn token_for(user_id: &str) -> String {
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(user_id);
        format!("{encoded}.X.Y")
    }

    #[test]
    fn bot_user_id_decodes_from_token() {
        let token = token_for("514593990704889856");
        assert_eq!(
            DiscordTransport::bot_user_id_from_token(&token),
            Some(514_593_990_704_889_856)
        );
    }

    #[test]
    fn malformed_token_yields_no_id() {
        assert_eq!(DiscordTransport::bot_user_id_from_token(""), None);
        assert_eq!(
            DiscordTransport::bot_user_id_from_token("!!!not-base64.X.Y"),
            None
        );
        // Decodes, but is not a numeric id.
        let token = token_for("not-a-number");
        assert_eq!(DiscordTransport::bot_user_id_from_token(&token), None);
    }

    #[tokio::test]
    async fn commands_fail_cleanly_when_not_connected() {
        let config = WardenConfig {
            token: token_for("42"),
            ..WardenConfig::default()
        };
        let transport = DiscordTransport::new(&config);

        assert!(transport.announce_ready().await.is_err());
        assert!(transport.disconnect().await.is_err());
    }

    #[test]
    fn identify_carries_the_boot_presence() {
        let config = WardenConfig {
            token: token_for("42"),
            ..WardenConfig::default()
        };
        let transport = DiscordTransport::new(&config);

        let payload = transport.identify_payload();
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["intents"], 33283);
        assert_eq!(
            payload["d"]["presence"]["activities"][0]["name"],
            BOOT_ACTIVITY
        );
        assert_eq!(payload["d"]["presence"]["status"], "online");
    }

    #[test]
    fn latency_defaults_to_zero() {
        let config = WardenConfig::default();
        let transport = DiscordTransport::new(&config);
        assert_eq!(transport.latency(), Duration::ZERO);
    }
}
