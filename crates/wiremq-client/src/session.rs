//! The concurrent MQTT session engine.
//!
//! One [`Client`] drives a single MQTT 3.1.1 session over a bidirectional
//! byte stream the caller opened. Two background tasks own the stream
//! halves: the reader decodes packets and routes acknowledgements to the
//! callers waiting on them, the writer drains a bounded queue and puts each
//! packet on the wire in a single write. Callers never touch the stream;
//! every operation goes through the queue and a response rendezvous.
//!
//! Acknowledgements that carry a packet identifier resolve through a table
//! keyed by that identifier, so any number of QoS 1/2 publishes, subscribes
//! and unsubscribes may be in flight at once. An acknowledgement nobody is
//! waiting for (typically one whose caller cancelled) is logged and dropped;
//! the reader never blocks on a missing consumer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use wiremq_core::codec::{FrameDecoder, FrameEncoder};
use wiremq_core::packet::{Connack, ConnectCode, Packet, Publish, QoS, Suback};
use wiremq_core::ProtocolError;

use crate::config::{
    ClientConfig, ConnectOptions, PublishOptions, SubscribeOptions, UnsubscribeOptions,
};
use crate::error::{ClientError, Result};
use crate::latch::Latch;
use crate::packet_id::PacketIds;

/// Handler invoked from the reader task for every inbound PUBLISH.
///
/// The handler runs on the reader task; blocking it stalls the session.
pub type PublishHandler = dyn Fn(Publish) + Send + Sync;

/// An acknowledgement routed to the caller that owns its packet identifier.
#[derive(Debug)]
enum Ack {
    Puback,
    Pubrec,
    Pubcomp,
    Suback(Suback),
    Unsuback,
}

impl Ack {
    fn name(&self) -> &'static str {
        match self {
            Ack::Puback => "PUBACK",
            Ack::Pubrec => "PUBREC",
            Ack::Pubcomp => "PUBCOMP",
            Ack::Suback(_) => "SUBACK",
            Ack::Unsuback => "UNSUBACK",
        }
    }
}

/// A queued outgoing packet. `written` is signalled once the packet is on
/// the wire and dropped unsignalled when the write fails.
struct Outgoing {
    packet: Packet,
    written: oneshot::Sender<()>,
}

/// Response routing state shared between callers and the reader.
///
/// Registrations carry a token so a caller cleaning up after a failure can
/// tell its own leftover registration from a successor's.
#[derive(Default)]
struct Pending {
    /// Waiters keyed by packet identifier.
    acks: HashMap<u16, (u64, oneshot::Sender<Ack>)>,
    /// At most one CONNECT in flight.
    connack: Option<(u64, oneshot::Sender<Connack>)>,
    /// Ping waiters; responses are uncorrelated, so the oldest wakes first.
    pingresp: VecDeque<(u64, oneshot::Sender<()>)>,
    /// Inbound QoS 2 identifiers delivered but not yet released by PUBREL.
    inbound_qos2: HashSet<u16>,
    next_token: u64,
}

impl Pending {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

struct Shared {
    outgoing: mpsc::Sender<Outgoing>,
    pending: Mutex<Pending>,
    packet_ids: PacketIds,
    done: Latch,
    shutdown: CancellationToken,
}

/// A handle to one MQTT session. Cheap to clone; all clones drive the same
/// session.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Start a session over `stream` with the default configuration.
    ///
    /// Must be called within a tokio runtime; the reader and writer tasks
    /// are spawned immediately.
    pub fn new<S, H>(stream: S, handler: H) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: Fn(Publish) + Send + Sync + 'static,
    {
        Self::with_config(stream, handler, ClientConfig::default())
    }

    /// Start a session over `stream`.
    pub fn with_config<S, H>(stream: S, handler: H, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: Fn(Publish) + Send + Sync + 'static,
    {
        let (read_half, write_half) = io::split(stream);
        let (outgoing, queue) = mpsc::channel(config.write_queue_depth.max(1));
        let shared = Arc::new(Shared {
            outgoing,
            pending: Mutex::new(Pending::default()),
            packet_ids: PacketIds::new(),
            done: Latch::new(),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(read_loop(
            FrameDecoder::new(read_half),
            Arc::clone(&shared),
            Box::new(handler),
        ));
        tokio::spawn(write_loop(
            FrameEncoder::new(write_half),
            queue,
            Arc::clone(&shared),
        ));

        Self { shared }
    }

    /// Send CONNECT and await the broker's CONNACK.
    ///
    /// Fails with [`ClientError::ConnectionRefused`] when the broker answers
    /// with a non-zero return code.
    pub async fn connect(
        &self,
        options: ConnectOptions,
        cancel: &CancellationToken,
    ) -> Result<Connack> {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.connack.is_some() {
                return Err(ClientError::InvalidArgument("connect already in flight"));
            }
            let token = pending.token();
            pending.connack = Some((token, tx));
            token
        };

        let result = async {
            self.send(Packet::Connect(options.into_packet()), cancel)
                .await?;
            self.wait_response(rx, cancel).await
        }
        .await;

        if result.is_err() {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.connack.as_ref().is_some_and(|(t, _)| *t == token) {
                pending.connack = None;
            }
        }

        let connack = result?;
        if connack.code != ConnectCode::Accepted {
            return Err(ClientError::ConnectionRefused(connack.code));
        }
        Ok(connack)
    }

    /// Publish a message at the requested QoS level.
    ///
    /// QoS 0 returns once the packet is written; QoS 1 after PUBACK; QoS 2
    /// after the full PUBREC/PUBREL/PUBCOMP exchange.
    pub async fn publish(
        &self,
        options: PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if options.qos == QoS::AtMostOnce {
            if options.packet_id != 0 {
                return Err(ClientError::InvalidArgument(
                    "non-zero packet id for a QoS 0 publish",
                ));
            }
            return self
                .send(Packet::Publish(options.into_packet(None)), cancel)
                .await;
        }

        let qos = options.qos;
        let packet_id = self.assign_id(options.packet_id);
        let publish = Packet::Publish(options.into_packet(Some(packet_id)));

        if qos == QoS::AtLeastOnce {
            match self.exchange(packet_id, publish, cancel).await? {
                Ack::Puback => Ok(()),
                ack => Err(unexpected_ack("PUBACK", ack)),
            }
        } else {
            match self.exchange(packet_id, publish, cancel).await? {
                Ack::Pubrec => {}
                ack => return Err(unexpected_ack("PUBREC", ack)),
            }
            match self
                .exchange(packet_id, Packet::Pubrel { packet_id }, cancel)
                .await?
            {
                Ack::Pubcomp => Ok(()),
                ack => Err(unexpected_ack("PUBCOMP", ack)),
            }
        }
    }

    /// Subscribe to one or more topic filters and await the SUBACK.
    ///
    /// The returned [`Suback`] carries one return code per filter, in order.
    pub async fn subscribe(
        &self,
        options: SubscribeOptions,
        cancel: &CancellationToken,
    ) -> Result<Suback> {
        if options.filters.is_empty() {
            return Err(ClientError::InvalidArgument("subscribe with no topic filters"));
        }
        let packet_id = self.assign_id(options.packet_id);
        let subscribe = Packet::Subscribe(options.into_packet(packet_id));
        match self.exchange(packet_id, subscribe, cancel).await? {
            Ack::Suback(suback) => Ok(suback),
            ack => Err(unexpected_ack("SUBACK", ack)),
        }
    }

    /// Unsubscribe from one or more topic filters and await the UNSUBACK.
    pub async fn unsubscribe(
        &self,
        options: UnsubscribeOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if options.filters.is_empty() {
            return Err(ClientError::InvalidArgument(
                "unsubscribe with no topic filters",
            ));
        }
        let packet_id = self.assign_id(options.packet_id);
        let unsubscribe = Packet::Unsubscribe(options.into_packet(packet_id));
        match self.exchange(packet_id, unsubscribe, cancel).await? {
            Ack::Unsuback => Ok(()),
            ack => Err(unexpected_ack("UNSUBACK", ack)),
        }
    }

    /// Send PINGREQ and await a PINGRESP.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut pending = self.shared.pending.lock().unwrap();
            let token = pending.token();
            pending.pingresp.push_back((token, tx));
            token
        };

        let result = async {
            self.send(Packet::Pingreq, cancel).await?;
            self.wait_response(rx, cancel).await
        }
        .await;

        if result.is_err() {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.pingresp.retain(|(t, _)| *t != token);
        }
        result
    }

    /// Queue DISCONNECT; returns as soon as it is written.
    pub async fn disconnect(&self, cancel: &CancellationToken) -> Result<()> {
        self.send(Packet::Disconnect, cancel).await
    }

    /// Close the session. Idempotent.
    ///
    /// Both tasks shut down and the termination latch is set; in-flight and
    /// future operations fail with [`ClientError::Terminated`].
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }

    fn assign_id(&self, preset: u16) -> u16 {
        if preset == 0 {
            self.shared.packet_ids.next()
        } else {
            preset
        }
    }

    /// Register a waiter for `packet_id`, queue `packet`, and await the
    /// acknowledgement. Registration happens before the packet can reach the
    /// wire so the response cannot slip past the waiter.
    async fn exchange(
        &self,
        packet_id: u16,
        packet: Packet,
        cancel: &CancellationToken,
    ) -> Result<Ack> {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.acks.contains_key(&packet_id) {
                return Err(ClientError::InvalidArgument("packet id already in flight"));
            }
            let token = pending.token();
            pending.acks.insert(packet_id, (token, tx));
            token
        };

        let result = async {
            self.send(packet, cancel).await?;
            self.wait_response(rx, cancel).await
        }
        .await;

        if result.is_err() {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.acks.get(&packet_id).is_some_and(|(t, _)| *t == token) {
                pending.acks.remove(&packet_id);
            }
        }
        result
    }

    /// Queue one packet and wait until the writer has put it on the wire.
    async fn send(&self, packet: Packet, cancel: &CancellationToken) -> Result<()> {
        let (written, written_rx) = oneshot::channel();
        let item = Outgoing { packet, written };

        tokio::select! {
            permit = self.shared.outgoing.reserve() => match permit {
                Ok(permit) => permit.send(item),
                // The queue only closes after the writer is gone, and the
                // writer never leaves without the latch being set.
                Err(_) => return Err(ClientError::Terminated(self.shared.done.wait().await)),
            },
            err = self.shared.done.wait() => return Err(ClientError::Terminated(err)),
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        }

        self.wait_response(written_rx, cancel).await
    }

    /// Race a response against the termination latch and the caller's
    /// cancellation.
    async fn wait_response<T>(
        &self,
        rx: oneshot::Receiver<T>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        tokio::select! {
            response = rx => match response {
                Ok(value) => Ok(value),
                Err(_) => Err(ClientError::Terminated(self.shared.done.wait().await)),
            },
            err = self.shared.done.wait() => Err(ClientError::Terminated(err)),
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
        }
    }
}

fn unexpected_ack(want: &'static str, ack: Ack) -> ClientError {
    ClientError::UnexpectedAck {
        want,
        got: ack.name(),
    }
}

async fn read_loop<R>(mut decoder: FrameDecoder<R>, shared: Arc<Shared>, handler: Box<PublishHandler>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let packet = tokio::select! {
            decoded = decoder.decode() => match decoded {
                Ok(packet) => packet,
                Err(err) => {
                    shared.done.set(err.into());
                    break;
                }
            },
            _ = shared.shutdown.cancelled() => {
                shared.done.set(ClientError::Closed);
                break;
            }
        };
        debug!("< {packet}");

        match packet {
            Packet::Connack(connack) => {
                let waiter = shared.pending.lock().unwrap().connack.take();
                match waiter {
                    Some((_, tx)) => {
                        if tx.send(connack).is_err() {
                            debug!("CONNACK for a cancelled caller");
                        }
                    }
                    None => warn!("unexpected: {}", Packet::Connack(connack)),
                }
            }
            Packet::Pingresp => {
                let waiter = shared.pending.lock().unwrap().pingresp.pop_front();
                match waiter {
                    Some((_, tx)) => {
                        let _ = tx.send(());
                    }
                    None => warn!("unexpected: PINGRESP"),
                }
            }
            Packet::Puback { packet_id } => route_ack(&shared, packet_id, Ack::Puback),
            Packet::Pubrec { packet_id } => route_ack(&shared, packet_id, Ack::Pubrec),
            Packet::Pubcomp { packet_id } => route_ack(&shared, packet_id, Ack::Pubcomp),
            Packet::Suback(suback) => {
                let packet_id = suback.packet_id;
                route_ack(&shared, packet_id, Ack::Suback(suback));
            }
            Packet::Unsuback { packet_id } => route_ack(&shared, packet_id, Ack::Unsuback),
            Packet::Publish(publish) => {
                handle_publish(&shared, handler.as_ref(), publish).await;
            }
            Packet::Pubrel { packet_id } => {
                shared.pending.lock().unwrap().inbound_qos2.remove(&packet_id);
                queue_reply(&shared, Packet::Pubcomp { packet_id }).await;
            }
            packet @ (Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::Pingreq
            | Packet::Disconnect) => {
                shared.done.set(ClientError::Protocol(ProtocolError::MalformedPacket(
                    format!("unexpected {packet} from the broker"),
                )));
                break;
            }
        }
    }
}

/// Deliver an inbound publish and queue the acknowledgement its QoS calls
/// for. A duplicate QoS 2 publish whose identifier is still unreleased is
/// re-acknowledged but not re-delivered.
async fn handle_publish(shared: &Shared, handler: &PublishHandler, publish: Publish) {
    match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, _) | (_, None) => handler(publish),
        (QoS::AtLeastOnce, Some(packet_id)) => {
            handler(publish);
            queue_reply(shared, Packet::Puback { packet_id }).await;
        }
        (QoS::ExactlyOnce, Some(packet_id)) => {
            let fresh = shared.pending.lock().unwrap().inbound_qos2.insert(packet_id);
            if fresh {
                handler(publish);
            }
            queue_reply(shared, Packet::Pubrec { packet_id }).await;
        }
    }
}

/// Queue a protocol reply without waiting for the write to finish.
async fn queue_reply(shared: &Shared, packet: Packet) {
    let (written, _) = oneshot::channel();
    if shared
        .outgoing
        .send(Outgoing { packet, written })
        .await
        .is_err()
    {
        debug!("write queue closed, dropped reply");
    }
}

fn route_ack(shared: &Shared, packet_id: u16, ack: Ack) {
    let waiter = shared.pending.lock().unwrap().acks.remove(&packet_id);
    match waiter {
        Some((_, tx)) => {
            if let Err(ack) = tx.send(ack) {
                debug!("{} (m{packet_id}) for a cancelled caller", ack.name());
            }
        }
        None => warn!("unexpected: {} (m{packet_id})", ack.name()),
    }
}

async fn write_loop<W>(mut encoder: FrameEncoder<W>, mut queue: mpsc::Receiver<Outgoing>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let item = tokio::select! {
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
            _ = shared.shutdown.cancelled() => break,
            _ = shared.done.wait() => break,
        };

        match encoder.encode(&item.packet).await {
            Ok(()) => {
                debug!("> {}", item.packet);
                let _ = item.written.send(());
            }
            Err(err) => {
                shared.done.set(err.into());
                break;
            }
        }
    }

    // Half-close so a peer blocked on read observes end-of-stream.
    if let Err(err) = encoder.shutdown().await {
        debug!("write shutdown failed: {err}");
    }
}
