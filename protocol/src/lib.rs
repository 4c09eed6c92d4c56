/*!
Helper crate that declares the identifiers and signaling messages shared by
every participant of a study-mesh video session. The broadcast-channel
service relaying these messages only needs [`mesh::SignalMessage`] to be
serializable; the encoding on the wire is the transport's concern.
*/

#![warn(missing_docs)]

use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod mesh;

/// Unique identifier of one mesh session, supplied externally and used only
/// to derive the broadcast-channel topic and to route messages.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a `String` into a `SessionId`
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    /// Return reference to the underlying string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for SessionId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of one participant, supplied externally and immutable
/// for the lifetime of its coordinator. Ordered so that two peers racing to
/// offer each other can break the tie deterministically.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a `String` into a `PeerId`
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    /// Return reference to the underlying string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for PeerId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proposed ICE candidate of one peer, passed to the other peer without
/// modifications.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IceCandidate {
    /// The candidate-attribute line, verbatim.
    pub candidate: String,
    /// Identification tag of the media description this candidate belongs to.
    pub sdp_mid: Option<String>,
    /// Index of the media description this candidate belongs to.
    pub sdp_m_line_index: Option<u16>,
}

/// Name of the broadcast-channel topic on which all participants of
/// `session_id` rendezvous.
#[must_use]
pub fn signaling_topic(session_id: &SessionId) -> String {
    format!("webrtc-{session_id}")
}
