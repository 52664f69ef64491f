//! MQTT 3.1.1 packet types and their body codecs.
//!
//! Each packet kind knows how to encode its body onto a [`BodyEncoder`] and
//! decode itself from a [`BodyReader`]; the fixed header and remaining length
//! that bracket the body belong to the framed codec in [`crate::codec`].

use std::fmt;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::{ProtocolError, Result};
use crate::wire::{BodyEncoder, BodyReader};

/// Protocol name carried in every CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// SUBACK return code marking a rejected topic filter.
pub const SUBACK_FAILURE: u8 = 0x80;

// CONNECT flag byte layout. Bit 0 is reserved and must be zero.
const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;
const CONNECT_FLAG_WILL: u8 = 0x04;
const CONNECT_FLAG_WILL_QOS_SHIFT: u8 = 3;
const CONNECT_FLAG_WILL_RETAIN: u8 = 0x20;
const CONNECT_FLAG_PASSWORD: u8 = 0x40;
const CONNECT_FLAG_USERNAME: u8 = 0x80;

// PUBLISH fixed-header flag bits.
const PUBLISH_FLAG_RETAIN: u8 = 0x01;
const PUBLISH_FLAG_DUP: u8 = 0x08;
const PUBLISH_QOS_SHIFT: u8 = 1;

/// Fixed-header low nibble required on SUBSCRIBE, UNSUBSCRIBE and PUBREL.
const RESERVED_FLAGS: u8 = 0x02;

/// MQTT control packet types (the high nibble of the fixed header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT spec names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::InvalidQos(value)),
        }
    }
}

/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernamePassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectCode::Accepted),
            1 => Ok(ConnectCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectCode::IdentifierRejected),
            3 => Ok(ConnectCode::ServerUnavailable),
            4 => Ok(ConnectCode::BadUsernamePassword),
            5 => Ok(ConnectCode::NotAuthorized),
            _ => Err(ProtocolError::InvalidReturnCode(value)),
        }
    }
}

impl fmt::Display for ConnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectCode::Accepted => "accepted",
            ConnectCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectCode::IdentifierRejected => "identifier rejected",
            ConnectCode::ServerUnavailable => "server unavailable",
            ConnectCode::BadUsernamePassword => "bad user name or password",
            ConnectCode::NotAuthorized => "not authorized",
        };
        write!(f, "{} ({})", s, *self as u8)
    }
}

/// Will message published by the broker on abnormal disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl Will {
    /// Create a will with QoS 0 and no retain.
    pub fn new(topic: impl Into<String>, message: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
            qos: QoS::AtMostOnce,
            retain: false,
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
}

/// CONNECT packet data. Protocol name and level are fixed to MQTT 3.1.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl Connect {
    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_session {
            flags |= CONNECT_FLAG_CLEAN_SESSION;
        }
        if let Some(will) = &self.will {
            flags |= CONNECT_FLAG_WILL;
            flags |= (will.qos as u8) << CONNECT_FLAG_WILL_QOS_SHIFT;
            if will.retain {
                flags |= CONNECT_FLAG_WILL_RETAIN;
            }
        }
        if self.password.is_some() {
            flags |= CONNECT_FLAG_PASSWORD;
        }
        if self.username.is_some() {
            flags |= CONNECT_FLAG_USERNAME;
        }
        flags
    }
}

/// CONNACK packet data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connack {
    pub session_present: bool,
    pub code: ConnectCode,
}

/// PUBLISH packet data.
///
/// `packet_id` is `Some` exactly when `qos` is greater than
/// [`QoS::AtMostOnce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// SUBSCRIBE packet data: an ordered, non-empty list of
/// (topic filter, requested maximum QoS) pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<(String, QoS)>,
}

/// SUBACK packet data: one return code per subscribed filter, same order.
/// 0x00..=0x02 is the granted QoS, [`SUBACK_FAILURE`] a rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suback {
    pub packet_id: u16,
    pub return_codes: Vec<u8>,
}

/// UNSUBSCRIBE packet data: a non-empty list of topic filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// An MQTT control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback { packet_id: u16 },
    Pubrec { packet_id: u16 },
    Pubrel { packet_id: u16 },
    Pubcomp { packet_id: u16 },
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback { packet_id: u16 },
    Pingreq,
    Pingresp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback { .. } => PacketType::Puback,
            Packet::Pubrec { .. } => PacketType::Pubrec,
            Packet::Pubrel { .. } => PacketType::Pubrel,
            Packet::Pubcomp { .. } => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback { .. } => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// The fixed header byte: packet type in the high nibble, kind-specific
    /// flag bits in the low nibble.
    pub fn fixed_header(&self) -> u8 {
        let kind = (self.packet_type() as u8) << 4;
        match self {
            Packet::Publish(p) => {
                let mut flags = (p.qos as u8) << PUBLISH_QOS_SHIFT;
                if p.dup {
                    flags |= PUBLISH_FLAG_DUP;
                }
                if p.retain {
                    flags |= PUBLISH_FLAG_RETAIN;
                }
                kind | flags
            }
            Packet::Pubrel { .. } | Packet::Subscribe(_) | Packet::Unsubscribe(_) => {
                kind | RESERVED_FLAGS
            }
            _ => kind,
        }
    }

    /// Encode the packet body. The framed encoder brackets it with the fixed
    /// header and remaining length.
    pub fn encode_body(&self, enc: &mut BodyEncoder<'_>) -> Result<()> {
        match self {
            Packet::Connect(p) => {
                enc.string(PROTOCOL_NAME)?;
                enc.bits(PROTOCOL_LEVEL);
                enc.bits(p.connect_flags());
                enc.integer(p.keep_alive);
                enc.string(&p.client_id)?;
                if let Some(will) = &p.will {
                    enc.string(&will.topic)?;
                    enc.bytes(&will.message)?;
                }
                if let Some(username) = &p.username {
                    enc.string(username)?;
                }
                if let Some(password) = &p.password {
                    enc.bytes(password)?;
                }
            }
            Packet::Connack(p) => {
                enc.bits(p.session_present as u8);
                enc.bits(p.code as u8);
            }
            Packet::Publish(p) => {
                enc.string(&p.topic)?;
                if p.qos > QoS::AtMostOnce {
                    let packet_id = p.packet_id.ok_or_else(|| {
                        ProtocolError::MalformedPacket("PUBLISH with QoS > 0 needs a packet id".into())
                    })?;
                    enc.integer(packet_id);
                }
                enc.payload(&p.payload);
            }
            Packet::Puback { packet_id }
            | Packet::Pubrec { packet_id }
            | Packet::Pubrel { packet_id }
            | Packet::Pubcomp { packet_id }
            | Packet::Unsuback { packet_id } => {
                enc.integer(*packet_id);
            }
            Packet::Subscribe(p) => {
                if p.topics.is_empty() {
                    return Err(
                        ProtocolError::MalformedPacket("SUBSCRIBE with no topic filters".into())
                            .into(),
                    );
                }
                enc.integer(p.packet_id);
                for (topic, qos) in &p.topics {
                    enc.string(topic)?;
                    enc.bits(*qos as u8);
                }
            }
            Packet::Suback(p) => {
                enc.integer(p.packet_id);
                enc.payload(&p.return_codes);
            }
            Packet::Unsubscribe(p) => {
                if p.topics.is_empty() {
                    return Err(ProtocolError::MalformedPacket(
                        "UNSUBSCRIBE with no topic filters".into(),
                    )
                    .into());
                }
                enc.integer(p.packet_id);
                for topic in &p.topics {
                    enc.string(topic)?;
                }
            }
            Packet::Pingreq | Packet::Pingresp | Packet::Disconnect => {}
        }
        Ok(())
    }

    /// Decode a packet body. `header` is the fixed header byte, already
    /// validated to carry a known packet type.
    pub(crate) async fn decode_body<R: AsyncRead + Unpin>(
        header: u8,
        body: &mut BodyReader<'_, R>,
    ) -> Result<Packet> {
        match PacketType::try_from(header >> 4)? {
            PacketType::Connect => decode_connect(body).await,
            PacketType::Connack => {
                let flags = body.bits().await?;
                let code = ConnectCode::try_from(body.bits().await?)?;
                Ok(Packet::Connack(Connack {
                    session_present: flags & 0x01 != 0,
                    code,
                }))
            }
            PacketType::Publish => decode_publish(header & 0x0F, body).await,
            PacketType::Puback => Ok(Packet::Puback {
                packet_id: body.integer().await?,
            }),
            PacketType::Pubrec => Ok(Packet::Pubrec {
                packet_id: body.integer().await?,
            }),
            PacketType::Pubrel => Ok(Packet::Pubrel {
                packet_id: body.integer().await?,
            }),
            PacketType::Pubcomp => Ok(Packet::Pubcomp {
                packet_id: body.integer().await?,
            }),
            PacketType::Subscribe => decode_subscribe(body).await,
            PacketType::Suback => {
                let packet_id = body.integer().await?;
                let return_codes = body.payload().await?.to_vec();
                Ok(Packet::Suback(Suback {
                    packet_id,
                    return_codes,
                }))
            }
            PacketType::Unsubscribe => decode_unsubscribe(body).await,
            PacketType::Unsuback => Ok(Packet::Unsuback {
                packet_id: body.integer().await?,
            }),
            PacketType::Pingreq => Ok(Packet::Pingreq),
            PacketType::Pingresp => Ok(Packet::Pingresp),
            PacketType::Disconnect => Ok(Packet::Disconnect),
        }
    }
}

async fn decode_connect<R: AsyncRead + Unpin>(body: &mut BodyReader<'_, R>) -> Result<Packet> {
    let protocol_name = body.string().await?;
    if protocol_name != PROTOCOL_NAME {
        return Err(ProtocolError::InvalidProtocolName(protocol_name).into());
    }
    let protocol_level = body.bits().await?;
    if protocol_level != PROTOCOL_LEVEL {
        return Err(ProtocolError::UnsupportedProtocolLevel(protocol_level).into());
    }

    let flags = body.bits().await?;
    // MQTT-3.1.2-3: the reserved bit must be zero.
    if flags & 0x01 != 0 {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }
    let clean_session = flags & CONNECT_FLAG_CLEAN_SESSION != 0;
    let will_flag = flags & CONNECT_FLAG_WILL != 0;
    let will_qos = QoS::try_from((flags >> CONNECT_FLAG_WILL_QOS_SHIFT) & 0x03)?;
    let will_retain = flags & CONNECT_FLAG_WILL_RETAIN != 0;
    let password_flag = flags & CONNECT_FLAG_PASSWORD != 0;
    let username_flag = flags & CONNECT_FLAG_USERNAME != 0;

    // MQTT-3.1.2-11/-13/-15: will QoS and retain require the will flag.
    if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }
    // MQTT-3.1.2-22: a password requires a username.
    if password_flag && !username_flag {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }

    let keep_alive = body.integer().await?;
    let client_id = body.string().await?;

    let will = if will_flag {
        let topic = body.string().await?;
        let message = body.bytes().await?;
        Some(Will {
            topic,
            message,
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };
    let username = if username_flag {
        Some(body.string().await?)
    } else {
        None
    };
    let password = if password_flag {
        Some(body.bytes().await?)
    } else {
        None
    };

    Ok(Packet::Connect(Connect {
        clean_session,
        keep_alive,
        client_id,
        will,
        username,
        password,
    }))
}

async fn decode_publish<R: AsyncRead + Unpin>(
    flags: u8,
    body: &mut BodyReader<'_, R>,
) -> Result<Packet> {
    let dup = flags & PUBLISH_FLAG_DUP != 0;
    let retain = flags & PUBLISH_FLAG_RETAIN != 0;
    let qos = QoS::try_from((flags >> PUBLISH_QOS_SHIFT) & 0x03)?;

    let topic = body.string().await?;
    let packet_id = if qos > QoS::AtMostOnce {
        Some(body.integer().await?)
    } else {
        None
    };
    let payload = body.payload().await?;

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload,
    }))
}

async fn decode_subscribe<R: AsyncRead + Unpin>(body: &mut BodyReader<'_, R>) -> Result<Packet> {
    let packet_id = body.integer().await?;
    let mut topics = Vec::new();
    while body.remaining() > 0 {
        let topic = body.string().await?;
        if topic.is_empty() {
            return Err(ProtocolError::MalformedPacket("empty topic filter".into()).into());
        }
        let qos = QoS::try_from(body.bits().await?)?;
        topics.push((topic, qos));
    }
    if topics.is_empty() {
        return Err(ProtocolError::MalformedPacket("SUBSCRIBE with no topic filters".into()).into());
    }
    Ok(Packet::Subscribe(Subscribe { packet_id, topics }))
}

async fn decode_unsubscribe<R: AsyncRead + Unpin>(body: &mut BodyReader<'_, R>) -> Result<Packet> {
    let packet_id = body.integer().await?;
    let mut topics = Vec::new();
    while body.remaining() > 0 {
        let topic = body.string().await?;
        if topic.is_empty() {
            return Err(ProtocolError::MalformedPacket("empty topic filter".into()).into());
        }
        topics.push(topic);
    }
    if topics.is_empty() {
        return Err(
            ProtocolError::MalformedPacket("UNSUBSCRIBE with no topic filters".into()).into(),
        );
    }
    Ok(Packet::Unsubscribe(Unsubscribe { packet_id, topics }))
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Connect(p) => write!(
                f,
                "CONNECT (c{}, k{}, i{:?})",
                p.clean_session as u8, p.keep_alive, p.client_id
            ),
            Packet::Connack(p) => {
                write!(f, "CONNACK (c{}, s{})", p.code as u8, p.session_present as u8)
            }
            Packet::Publish(p) => write!(
                f,
                "PUBLISH (d{}, r{}, q{}, m{}, {:?}, {} bytes)",
                p.dup as u8,
                p.retain as u8,
                p.qos as u8,
                p.packet_id.unwrap_or(0),
                p.topic,
                p.payload.len()
            ),
            Packet::Puback { packet_id } => write!(f, "PUBACK (m{packet_id})"),
            Packet::Pubrec { packet_id } => write!(f, "PUBREC (m{packet_id})"),
            Packet::Pubrel { packet_id } => write!(f, "PUBREL (m{packet_id})"),
            Packet::Pubcomp { packet_id } => write!(f, "PUBCOMP (m{packet_id})"),
            Packet::Subscribe(p) => {
                write!(f, "SUBSCRIBE (m{}, (", p.packet_id)?;
                for (i, (topic, qos)) in p.topics.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} q{}", topic, *qos as u8)?;
                }
                write!(f, "))")
            }
            Packet::Suback(p) => {
                write!(f, "SUBACK (m{}, (", p.packet_id)?;
                for (i, code) in p.return_codes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "c{code}")?;
                }
                write!(f, "))")
            }
            Packet::Unsubscribe(p) => {
                write!(f, "UNSUBSCRIBE (m{}, ({}))", p.packet_id, p.topics.join(", "))
            }
            Packet::Unsuback { packet_id } => write!(f, "UNSUBACK (m{packet_id})"),
            Packet::Pingreq => write!(f, "PINGREQ"),
            Packet::Pingresp => write!(f, "PINGRESP"),
            Packet::Disconnect => write!(f, "DISCONNECT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_header_packs_kind_and_flags() {
        assert_eq!(Packet::Pingreq.fixed_header(), 0xC0);
        assert_eq!(Packet::Pingresp.fixed_header(), 0xD0);
        assert_eq!(Packet::Disconnect.fixed_header(), 0xE0);
        assert_eq!(Packet::Pubrel { packet_id: 1 }.fixed_header(), 0x62);

        let publish = Packet::Publish(Publish {
            dup: true,
            qos: QoS::ExactlyOnce,
            retain: true,
            topic: "t".into(),
            packet_id: Some(1),
            payload: Bytes::new(),
        });
        assert_eq!(publish.fixed_header(), 0x30 | 0x08 | 0x04 | 0x01);
    }

    #[test]
    fn connect_flags_pack_the_flag_byte() {
        let mut connect = Connect {
            clean_session: true,
            keep_alive: 60,
            client_id: "a".into(),
            will: None,
            username: None,
            password: None,
        };
        assert_eq!(connect.connect_flags(), 0x02);

        connect.will = Some(Will::new("w", "bye").qos(QoS::AtLeastOnce).retain(true));
        connect.username = Some("u".into());
        connect.password = Some(b"p".to_vec());
        assert_eq!(connect.connect_flags(), 0x02 | 0x04 | 0x08 | 0x20 | 0x40 | 0x80);
    }

    #[test]
    fn qos_three_is_invalid() {
        assert!(matches!(
            QoS::try_from(3),
            Err(ProtocolError::InvalidQos(3))
        ));
    }

    #[test]
    fn display_is_compact() {
        let suback = Packet::Suback(Suback {
            packet_id: 1,
            return_codes: vec![0x01, 0x80],
        });
        assert_eq!(suback.to_string(), "SUBACK (m1, (c1, c128))");
        assert_eq!(Packet::Pingreq.to_string(), "PINGREQ");
    }
}
