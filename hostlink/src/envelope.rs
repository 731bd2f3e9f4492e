//! Wire types for messages exchanged over the shared channel.
//!
//! The channel itself is untyped: every party sees every message as a raw
//! JSON value. `Envelope` is this crate's view of such a value, discriminated
//! by the `channel-role` string tag. Decoding is defensive by design: unknown
//! role tags become [`ChannelRole::Other`] and are classified as unsolicited
//! traffic, never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque token linking a request envelope to its eventual reply envelope.
///
/// Generated by [`RequestIdFactory`] on the requesting side and echoed back
/// verbatim by the replying side. Unique among concurrently pending requests
/// of one transport instance; carries no other meaning.
///
/// [`RequestIdFactory`]: crate::correlation::RequestIdFactory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a correlation id from an existing token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role tag distinguishing the logical message kinds multiplexed over the
/// shared channel.
///
/// Serialized as the `channel-role` string on the wire. Any tag this crate
/// does not recognize (including a missing tag) decodes to `Other`, which the
/// transport treats as unsolicited traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRole {
    /// A request broadcast by an embedded application instance.
    OutboundRequest,
    /// A reply correlating to a previously broadcast request.
    Reply,
    /// Any other traffic on the channel; the tag is kept verbatim.
    Other(String),
}

impl ChannelRole {
    const OUTBOUND_REQUEST: &'static str = "outbound-request";
    const REPLY: &'static str = "reply";

    /// The wire tag for this role.
    pub fn as_str(&self) -> &str {
        match self {
            ChannelRole::OutboundRequest => Self::OUTBOUND_REQUEST,
            ChannelRole::Reply => Self::REPLY,
            ChannelRole::Other(tag) => tag,
        }
    }
}

impl Default for ChannelRole {
    fn default() -> Self {
        ChannelRole::Other(String::new())
    }
}

impl From<String> for ChannelRole {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            Self::OUTBOUND_REQUEST => ChannelRole::OutboundRequest,
            Self::REPLY => ChannelRole::Reply,
            _ => ChannelRole::Other(tag),
        }
    }
}

impl Serialize for ChannelRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChannelRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(String::deserialize(deserializer)?.into())
    }
}

/// One message unit exchanged over the channel.
///
/// All fields are optional on the wire; the transport never assumes a
/// well-formed peer. Fields this crate does not know about are preserved in
/// [`extra`](Envelope::extra) so unsolicited envelopes reach the application
/// handler intact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Role tag discriminating this message kind.
    #[serde(rename = "channel-role", default)]
    pub role: ChannelRole,

    /// Token pairing a request with its reply. Absent on unsolicited events.
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<CorrelationId>,

    /// Opaque identifier of the embedded instance. Learned lazily from the
    /// first inbound envelope that carries one; never authenticated.
    #[serde(
        rename = "peerIdentity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub peer_identity: Option<String>,

    /// Application-defined operation name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Uninterpreted request payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Reply payload, set by [`Envelope::reply_to`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,

    /// Fields present on the wire that this crate does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Envelope {
    /// Build a request envelope for broadcast.
    ///
    /// `peer_identity` is stamped on the envelope when the transport has
    /// already learned it; the very first requests of an instance go out
    /// without one.
    pub fn request(
        action: &str,
        data: Value,
        correlation_id: CorrelationId,
        peer_identity: Option<String>,
    ) -> Self {
        Self {
            role: ChannelRole::OutboundRequest,
            correlation_id: Some(correlation_id),
            peer_identity,
            action: Some(action.to_owned()),
            data: Some(data),
            response: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Build a reply to a previously received request envelope.
    ///
    /// The reply echoes the original envelope (correlation id, peer identity,
    /// action and any unknown fields) with `data` attached as the response
    /// payload and the role retagged as [`ChannelRole::Reply`].
    pub fn reply_to(original: &Envelope, data: Value) -> Self {
        let mut reply = original.clone();
        reply.role = ChannelRole::Reply;
        reply.response = Some(data);
        reply
    }

    /// Decode a raw channel message into an envelope.
    ///
    /// Never fails: a message that is not even a JSON object is wrapped into
    /// a role-less envelope carrying the raw value as its payload, so it
    /// still flows through classification as unsolicited traffic.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::debug!(%error, "malformed channel message, treating as unsolicited");
                Envelope {
                    data: Some(value),
                    ..Envelope::default()
                }
            }
        }
    }

    /// Encode this envelope as a raw channel message.
    ///
    /// Built by hand rather than through serde so that encoding is infallible;
    /// known fields win over colliding entries in `extra`.
    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert(
            "channel-role".to_owned(),
            Value::String(self.role.as_str().to_owned()),
        );
        if let Some(id) = &self.correlation_id {
            map.insert(
                "correlationId".to_owned(),
                Value::String(id.as_str().to_owned()),
            );
        }
        if let Some(peer) = &self.peer_identity {
            map.insert("peerIdentity".to_owned(), Value::String(peer.clone()));
        }
        if let Some(action) = &self.action {
            map.insert("action".to_owned(), Value::String(action.clone()));
        }
        if let Some(data) = &self.data {
            map.insert("data".to_owned(), data.clone());
        }
        if let Some(response) = &self.response {
            map.insert("response".to_owned(), response.clone());
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_round_trip() {
        for (role, tag) in [
            (ChannelRole::OutboundRequest, "outbound-request"),
            (ChannelRole::Reply, "reply"),
            (ChannelRole::Other("toWidget".to_owned()), "toWidget"),
        ] {
            assert_eq!(role.as_str(), tag);
            assert_eq!(ChannelRole::from(tag.to_owned()), role);
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let envelope = Envelope::request(
            "ping",
            json!({"n": 1}),
            CorrelationId::new("req-1-0"),
            Some("widget-1".to_owned()),
        );

        let wire = envelope.to_value();
        assert_eq!(wire["channel-role"], "outbound-request");
        assert_eq!(wire["correlationId"], "req-1-0");
        assert_eq!(wire["peerIdentity"], "widget-1");
        assert_eq!(wire["action"], "ping");
        assert_eq!(wire["data"], json!({"n": 1}));
        assert!(wire.get("response").is_none());
    }

    #[test]
    fn test_reply_echoes_original() {
        let request = Envelope::from_value(json!({
            "channel-role": "outbound-request",
            "correlationId": "req-7-3",
            "peerIdentity": "widget-1",
            "action": "upload",
            "data": {"file": "blob"},
            "visibility": "public",
        }));

        let reply = Envelope::reply_to(&request, json!({"ok": true}));

        assert_eq!(reply.role, ChannelRole::Reply);
        assert_eq!(reply.correlation_id, Some(CorrelationId::new("req-7-3")));
        assert_eq!(reply.peer_identity.as_deref(), Some("widget-1"));
        assert_eq!(reply.action.as_deref(), Some("upload"));
        assert_eq!(reply.response, Some(json!({"ok": true})));
        // Unknown fields survive the round trip.
        assert_eq!(reply.to_value()["visibility"], "public");
    }

    #[test]
    fn test_unknown_role_decodes_as_other() {
        let envelope = Envelope::from_value(json!({
            "channel-role": "toWidget",
            "correlationId": "host-55",
        }));

        assert_eq!(envelope.role, ChannelRole::Other("toWidget".to_owned()));
        assert_eq!(envelope.correlation_id, Some(CorrelationId::new("host-55")));
    }

    #[test]
    fn test_missing_role_decodes_as_other() {
        let envelope = Envelope::from_value(json!({"action": "capabilities"}));
        assert!(matches!(envelope.role, ChannelRole::Other(_)));
        assert_eq!(envelope.action.as_deref(), Some("capabilities"));
    }

    #[test]
    fn test_non_object_message_is_wrapped() {
        let envelope = Envelope::from_value(json!("not an envelope"));
        assert!(matches!(envelope.role, ChannelRole::Other(_)));
        assert_eq!(envelope.data, Some(json!("not an envelope")));
    }
}
