use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use vertex_types::Channel;

use super::error::TransportError;
use crate::config::Config;

/// One channel's outbound transport. Implementations own their own
/// timeout handling; the engine wraps calls in a deadline as well.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<(), TransportError>;
}

/// POSTs messages to a channel gateway (SMTP bridge, SMS provider,
/// push service, chat relay) as plain JSON.
pub struct HttpGatewayTransport {
    channel: Channel,
    url: String,
    http: reqwest::Client,
}

impl HttpGatewayTransport {
    pub fn new(channel: Channel, url: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { channel, url, http }
    }
}

#[async_trait]
impl ChannelTransport for HttpGatewayTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({
                "channel": self.channel.to_string(),
                "recipient": recipient,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Failed(e.to_string())
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Failed(format!(
                "gateway returned {}",
                response.status()
            )))
        }
    }
}

/// Fallback transport for channels with no gateway configured: logs the
/// message and reports success. Keeps local deployments functional.
pub struct LogTransport {
    channel: Channel,
}

#[async_trait]
impl ChannelTransport for LogTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<(), TransportError> {
        tracing::info!(
            "[{}] to={} subject={:?} body={}",
            self.channel,
            recipient,
            subject,
            body
        );
        Ok(())
    }
}

struct ChannelState {
    transport: Arc<dyn ChannelTransport>,
    // wall-clock of the last admitted send, for the per-channel pace
    last_send: Mutex<Option<Instant>>,
}

/// Transport lookup plus per-channel pacing. Urgent traffic skips the
/// pace entirely.
pub struct ChannelTransports {
    channels: HashMap<Channel, ChannelState>,
    min_send_interval: Duration,
    send_timeout: Duration,
}

impl ChannelTransports {
    pub fn from_config(config: &Config) -> Self {
        let send_timeout = Duration::from_secs(config.notifications.send_timeout_secs);
        let mut channels = HashMap::new();

        for channel in [
            Channel::Email,
            Channel::Sms,
            Channel::Push,
            Channel::Chat,
            Channel::Custom,
        ] {
            let transport: Arc<dyn ChannelTransport> = match config
                .notifications
                .gateways
                .get(&channel.to_string())
            {
                Some(url) => Arc::new(HttpGatewayTransport::new(
                    channel,
                    url.clone(),
                    send_timeout,
                )),
                None => Arc::new(LogTransport { channel }),
            };
            channels.insert(
                channel,
                ChannelState {
                    transport,
                    last_send: Mutex::new(None),
                },
            );
        }

        Self {
            channels,
            min_send_interval: Duration::from_millis(config.notifications.min_send_interval_ms),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn transport(&self, channel: Channel) -> Arc<dyn ChannelTransport> {
        self.channels
            .get(&channel)
            .map(|state| state.transport.clone())
            // every channel is populated in from_config, but a custom
            // build could miss one; fail soft by logging
            .unwrap_or_else(|| Arc::new(LogTransport { channel }))
    }

    /// How long a non-urgent send should wait to respect the channel
    /// pace. Also reserves the slot.
    pub fn pace_delay(&self, channel: Channel, urgent: bool) -> Duration {
        if urgent || self.min_send_interval.is_zero() {
            return Duration::ZERO;
        }

        let Some(state) = self.channels.get(&channel) else {
            return Duration::ZERO;
        };

        let mut last_send = state.last_send.lock().unwrap();
        let now = Instant::now();
        match *last_send {
            Some(last) => {
                let elapsed = now.duration_since(last);
                if elapsed >= self.min_send_interval {
                    *last_send = Some(now);
                    Duration::ZERO
                } else {
                    let wait = self.min_send_interval - elapsed;
                    *last_send = Some(now + wait);
                    wait
                }
            }
            None => {
                *last_send = Some(now);
                Duration::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pace_delay_spaces_out_sends() {
        let mut config = Config::default();
        config.notifications.min_send_interval_ms = 50;
        let transports = ChannelTransports::from_config(&config);

        assert_eq!(transports.pace_delay(Channel::Email, false), Duration::ZERO);
        let second = transports.pace_delay(Channel::Email, false);
        assert!(second > Duration::ZERO && second <= Duration::from_millis(50));

        // urgent bypasses the pace
        assert_eq!(transports.pace_delay(Channel::Email, true), Duration::ZERO);

        // other channels are unaffected
        assert_eq!(transports.pace_delay(Channel::Sms, false), Duration::ZERO);
    }
}
