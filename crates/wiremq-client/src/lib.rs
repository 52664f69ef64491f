//! wiremq-client - a concurrent MQTT 3.1.1 session engine.
//!
//! The [`Client`] multiplexes any number of caller tasks over one MQTT
//! session on a byte stream the caller already opened (TCP, TLS, or an
//! in-memory duplex, anything `AsyncRead + AsyncWrite`). Writes are serialized
//! through a single writer task, incoming packets are demultiplexed by a single
//! reader task, and acknowledgements are correlated back to callers by packet
//! identifier.
//!
//! ```ignore
//! let stream = TcpStream::connect("localhost:1883").await?;
//! let client = Client::new(stream, |publish| {
//!     println!("{}: {:?}", publish.topic, publish.payload);
//! });
//!
//! let cancel = CancellationToken::new();
//! client.connect(ConnectOptions::new("sensor-1"), &cancel).await?;
//! client
//!     .subscribe(
//!         SubscribeOptions::new().filter("commands/#", QoS::AtLeastOnce),
//!         &cancel,
//!     )
//!     .await?;
//! client
//!     .publish(
//!         PublishOptions::new("metrics/temp", "21.5").qos(QoS::AtLeastOnce),
//!         &cancel,
//!     )
//!     .await?;
//! ```
//!
//! The engine does not dial, reconnect, or keep the connection alive on its
//! own: a connection drop is terminal for the session, and honoring the
//! keep-alive interval via [`Client::ping`] is the caller's responsibility.

mod config;
mod error;
mod latch;
mod packet_id;
mod session;

pub use config::{
    ClientConfig, ConnectOptions, PublishOptions, SubscribeOptions, UnsubscribeOptions,
};
pub use error::{ClientError, Result};
pub use session::{Client, PublishHandler};

// Re-export the cancellation handle and the packet types callers touch.
pub use tokio_util::sync::CancellationToken;
pub use wiremq_core::packet::{Connack, ConnectCode, Publish, QoS, Suback, Will};
