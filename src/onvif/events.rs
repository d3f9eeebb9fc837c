//! Pull-point event subscriptions and the polling task behind them.

use super::soap::{self, Credentials};
use super::transport::SoapTransport;
use super::xml;
use crate::error::{ControlError, Result};
use crate::protocol::lifecycle::EventDispatcher;
use crate::protocol::{CameraEvent, ProtocolStats, matches_event_type};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_backoff: Duration,
    /// Server-side wait passed in `PullMessages`.
    pub pull_timeout: Duration,
    pub message_limit: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            pull_timeout: Duration::from_secs(1),
            message_limit: 10,
        }
    }
}

impl PollSettings {
    /// Delay before the next poll: the base interval, doubled per consecutive
    /// failure and capped at `max_backoff`.
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive_failures.min(16));
        self.interval
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.interval))
    }
}

pub const CREATE_PULL_POINT_SUBSCRIPTION: &str =
    "<tev:CreatePullPointSubscription/>";

pub const UNSUBSCRIBE: &str = "<wsnt:Unsubscribe/>";

pub fn pull_messages(settings: &PollSettings) -> String {
    format!(
        "<tev:PullMessages><tev:Timeout>PT{}S</tev:Timeout><tev:MessageLimit>{}</tev:MessageLimit></tev:PullMessages>",
        settings.pull_timeout.as_secs().max(1),
        settings.message_limit
    )
}

pub fn parse_subscription_address(response: &str) -> Result<String> {
    xml::elements(response, "SubscriptionReference")
        .into_iter()
        .next()
        .and_then(|reference| reference.text("Address"))
        .ok_or_else(|| {
            ControlError::Protocol("pull-point subscription has no reference address".to_string())
        })
}

/// Drop the `tns:` / `tns1:` style prefix from a topic.
pub fn strip_topic_namespace(topic: &str) -> &str {
    match topic.trim().split_once(':') {
        Some((prefix, rest))
            if prefix
                .strip_prefix("tns")
                .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit())) =>
        {
            rest
        }
        _ => topic.trim(),
    }
}

/// Events carried by a PullMessages response, filtered by requested type.
pub fn parse_notifications(response: &str, source: &str, types: &[String]) -> Vec<CameraEvent> {
    xml::elements(response, "NotificationMessage")
        .into_iter()
        .filter_map(|message| {
            let topic = message.text("Topic")?;
            let event_type = strip_topic_namespace(&topic);
            if !matches_event_type(types, event_type) {
                return None;
            }

            let mut event = CameraEvent::new(event_type, source);
            if let Some(timestamp) = xml::opening_tags(message.inner, "Message")
                .into_iter()
                .find_map(|tag| xml::attribute(tag, "UtcTime"))
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            {
                event.timestamp = timestamp.with_timezone(&Utc);
            }
            for item in xml::opening_tags(message.inner, "SimpleItem") {
                if let (Some(name), Some(value)) =
                    (xml::attribute(item, "Name"), xml::attribute(item, "Value"))
                {
                    event.data.insert(name, Value::String(value));
                }
            }
            Some(event)
        })
        .collect()
}

/// Adapter-side state of one pull-point subscription.
pub struct SubscriptionRecord {
    pub address: String,
    pub types: Vec<String>,
    pub last_poll: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub cancel: CancellationToken,
    pub task: Option<JoinHandle<()>>,
}

impl SubscriptionRecord {
    pub fn new(address: String, types: Vec<String>) -> Self {
        Self {
            address,
            types,
            last_poll: None,
            consecutive_failures: 0,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Cancel the poll task. An in-flight poll is abandoned.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub type SubscriptionMap = Arc<Mutex<HashMap<String, SubscriptionRecord>>>;

/// Polling loop for one subscription.
pub struct PullPointPoller {
    pub subscription_id: String,
    pub address: String,
    pub types: Vec<String>,
    pub source: String,
    pub transport: Arc<dyn SoapTransport>,
    pub credentials: Option<Credentials>,
    pub settings: PollSettings,
    pub subscriptions: SubscriptionMap,
    pub dispatcher: EventDispatcher,
    pub stats: Arc<ProtocolStats>,
    pub cancel: CancellationToken,
}

impl PullPointPoller {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.subscriptions.lock().contains_key(&self.subscription_id)
    }

    /// One PullMessages round trip. Returns the number of events dispatched.
    pub async fn poll_once(&self) -> Result<usize> {
        let envelope = soap::envelope(self.credentials.as_ref(), &pull_messages(&self.settings));
        let response = self.transport.call(&self.address, envelope).await?;

        // The subscription may have been removed while the request was out.
        if !self.is_live() {
            debug!("Dropping events for retired subscription {}", self.subscription_id);
            return Ok(0);
        }

        let events = parse_notifications(&response, &self.source, &self.types);
        for event in &events {
            self.dispatcher.dispatch(event);
            ProtocolStats::record(&self.stats.events_dispatched);
        }
        Ok(events.len())
    }

    /// Update the record and return the next delay, or `None` once the
    /// subscription is gone.
    fn record_outcome(&self, outcome: Result<usize>) -> Option<Duration> {
        let mut subscriptions = self.subscriptions.lock();
        let record = subscriptions.get_mut(&self.subscription_id)?;
        record.last_poll = Some(Utc::now());

        match outcome {
            Ok(count) => {
                if count > 0 {
                    debug!("{} events from {}", count, self.subscription_id);
                }
                record.consecutive_failures = 0;
            }
            Err(e) => {
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                ProtocolStats::record(&self.stats.poll_failures);
                warn!(
                    "Poll of {} failed ({} in a row): {}",
                    self.subscription_id, record.consecutive_failures, e
                );
            }
        }
        Some(self.settings.next_delay(record.consecutive_failures))
    }

    pub async fn run(self) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.poll_once() => self.record_outcome(outcome),
            };
            let Some(delay) = next else {
                break;
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Poll loop for {} stopped", self.subscription_id);
    }
}
