//! Topic-filter routing shared by the transport implementations.
//!
//! A [`RouteTable`] maps each subscribed filter to its QoS and the channels
//! of every [`super::Subscription`] opened on it. Filters use the MQTT
//! wildcards `+` (one level) and `#` (all remaining levels).

use std::collections::HashMap;

use tokio::sync::mpsc;

use super::{QoS, TelemetryMessage};

#[derive(Debug)]
struct Route {
    qos: QoS,
    senders: Vec<mpsc::Sender<TelemetryMessage>>,
}

/// Filter → subscriber channels.
#[derive(Debug, Default)]
pub(crate) struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    /// Opens a channel on `filter` and returns its receiving end. Closed
    /// channels on the same filter are pruned.
    pub(crate) fn add(
        &mut self,
        filter: &str,
        qos: QoS,
        buffer: usize,
    ) -> mpsc::Receiver<TelemetryMessage> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let route = self.routes.entry(filter.to_string()).or_insert(Route {
            qos,
            senders: Vec::new(),
        });
        route.qos = qos;
        route.senders.retain(|existing| !existing.is_closed());
        route.senders.push(tx);
        rx
    }

    /// Drops every channel on `filter`. Returns `false` if it had none.
    pub(crate) fn remove(&mut self, filter: &str) -> bool {
        self.routes.remove(filter).is_some()
    }

    /// Channels whose filter matches the concrete `topic`.
    pub(crate) fn targets(&self, topic: &str) -> Vec<mpsc::Sender<TelemetryMessage>> {
        self.routes
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .flat_map(|(_, route)| route.senders.iter().cloned())
            .collect()
    }

    /// Every subscribed filter with its QoS.
    pub(crate) fn filters(&self) -> Vec<(String, QoS)> {
        self.routes
            .iter()
            .map(|(filter, route)| (filter.clone(), route.qos))
            .collect()
    }

    /// Number of channels whose receiver is still alive.
    pub(crate) fn live_count(&self) -> usize {
        self.routes
            .values()
            .flat_map(|route| route.senders.iter())
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

/// Returns `true` if `filter` is a well-formed subscription filter.
pub(crate) fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len().saturating_sub(1);
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == last,
        "+" => true,
        other => !other.contains(['+', '#']),
    })
}

/// Returns `true` if `topic` can be published to (non-empty, no wildcards).
pub(crate) fn valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#'])
}

/// Returns `true` if a concrete `topic` matches an MQTT-style `filter`.
pub(crate) fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
