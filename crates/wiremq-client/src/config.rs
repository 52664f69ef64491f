//! Session and operation configuration builders.

use bytes::Bytes;

use wiremq_core::packet::{Connect, Publish, QoS, Subscribe, Unsubscribe, Will};

/// Session engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Depth of the outgoing write queue. Callers suspend at enqueue when it
    /// is full.
    pub write_queue_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            write_queue_depth: 16,
        }
    }
}

impl ClientConfig {
    /// Set the write queue depth.
    pub fn write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth;
        self
    }
}

/// Parameters of the CONNECT packet.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub clean_session: bool,
    /// Keep-alive interval in seconds (0 = disabled). The engine does not
    /// auto-ping; honoring the interval via [`crate::Client::ping`] is the
    /// caller's responsibility.
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            clean_session: true,
            keep_alive: 60,
            username: None,
            password: None,
            will: None,
        }
    }
}

impl ConnectOptions {
    /// Create options with the given client identifier.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Set the clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set the keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set username and password.
    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the Last Will and Testament message.
    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub(crate) fn into_packet(self) -> Connect {
        Connect {
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            client_id: self.client_id,
            will: self.will,
            username: self.username,
            password: self.password,
        }
    }
}

/// Parameters of an outgoing PUBLISH.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Pre-set packet identifier; 0 means "let the engine assign one".
    /// Must stay 0 for QoS 0 publishes.
    pub packet_id: u16,
}

impl PublishOptions {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            packet_id: 0,
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn packet_id(mut self, id: u16) -> Self {
        self.packet_id = id;
        self
    }

    pub(crate) fn into_packet(self, packet_id: Option<u16>) -> Publish {
        Publish {
            dup: false,
            qos: self.qos,
            retain: self.retain,
            topic: self.topic,
            packet_id,
            payload: self.payload,
        }
    }
}

/// Parameters of an outgoing SUBSCRIBE.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub filters: Vec<(String, QoS)>,
    /// Pre-set packet identifier; 0 means "let the engine assign one".
    pub packet_id: u16,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic filter with its requested maximum QoS.
    pub fn filter(mut self, topic: impl Into<String>, qos: QoS) -> Self {
        self.filters.push((topic.into(), qos));
        self
    }

    pub fn packet_id(mut self, id: u16) -> Self {
        self.packet_id = id;
        self
    }

    pub(crate) fn into_packet(self, packet_id: u16) -> Subscribe {
        Subscribe {
            packet_id,
            topics: self.filters,
        }
    }
}

/// Parameters of an outgoing UNSUBSCRIBE.
#[derive(Debug, Clone, Default)]
pub struct UnsubscribeOptions {
    pub filters: Vec<String>,
    /// Pre-set packet identifier; 0 means "let the engine assign one".
    pub packet_id: u16,
}

impl UnsubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic filter to remove.
    pub fn filter(mut self, topic: impl Into<String>) -> Self {
        self.filters.push(topic.into());
        self
    }

    pub fn packet_id(mut self, id: u16) -> Self {
        self.packet_id = id;
        self
    }

    pub(crate) fn into_packet(self, packet_id: u16) -> Unsubscribe {
        Unsubscribe {
            packet_id,
            topics: self.filters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_options_build_the_packet() {
        let connect = ConnectOptions::new("sensor-1")
            .clean_session(false)
            .keep_alive(30)
            .credentials("admin", "secret")
            .will(Will::new("status/sensor-1", "gone").qos(QoS::AtLeastOnce))
            .into_packet();

        assert_eq!(connect.client_id, "sensor-1");
        assert!(!connect.clean_session);
        assert_eq!(connect.keep_alive, 30);
        assert_eq!(connect.username.as_deref(), Some("admin"));
        assert_eq!(connect.password.as_deref(), Some(&b"secret"[..]));
        assert_eq!(connect.will.unwrap().qos, QoS::AtLeastOnce);
    }

    #[test]
    fn publish_options_default_to_qos0() {
        let options = PublishOptions::new("a/b", "hi");
        assert_eq!(options.qos, QoS::AtMostOnce);
        assert_eq!(options.packet_id, 0);
        assert!(!options.retain);
    }
}
