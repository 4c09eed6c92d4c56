/*!
Signaling messages exchanged between participants of a mesh session over the
session's broadcast channel.

Presence messages (`PeerJoined`, `PeerLeft`) are broadcast to every
participant; negotiation messages (`Offer`, `Answer`, `IceCandidate`) carry
an explicit recipient and must be ignored by everyone else. Every message
names its session so a misrouted message can be dropped.
*/

use serde::{Deserialize, Serialize};

use crate::{IceCandidate, PeerId, SessionId};

/// One unit of signaling traffic. Messages are transient: each one is
/// consumed once by its recipients and discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignalMessage {
    /// Broadcast by a participant right after its channel subscription is
    /// confirmed; prompts everyone already present to open a connection
    /// towards the newcomer.
    PeerJoined {
        /// Session the sender joined.
        session: SessionId,
        /// The newly joined participant.
        from: PeerId,
    },

    /// SDP offer sent by the initiating side of one peer pair.
    Offer {
        /// Session the offer belongs to.
        session: SessionId,
        /// The offering participant.
        from: PeerId,
        /// The participant the offer is addressed to.
        to: PeerId,
        /// The SDP payload, passed through without modifications.
        sdp: String,
    },

    /// SDP answer sent back by the responding side of one peer pair.
    Answer {
        /// Session the answer belongs to.
        session: SessionId,
        /// The answering participant.
        from: PeerId,
        /// The participant that sent the matching offer.
        to: PeerId,
        /// The SDP payload, passed through without modifications.
        sdp: String,
    },

    /// Trickle ICE candidate for one peer pair; may arrive before or after
    /// the answer and must be tolerated in either order.
    IceCandidate {
        /// Session the candidate belongs to.
        session: SessionId,
        /// The participant that gathered the candidate.
        from: PeerId,
        /// The participant the candidate is addressed to.
        to: PeerId,
        /// The candidate itself, passed through without modifications.
        candidate: IceCandidate,
    },

    /// Broadcast by a participant that is leaving the session so remote
    /// peers can drop its connection without waiting for a transport
    /// timeout.
    PeerLeft {
        /// Session the sender left.
        session: SessionId,
        /// The leaving participant.
        from: PeerId,
    },
}

impl SignalMessage {
    /// Session this message is routed within.
    #[must_use]
    pub const fn session(&self) -> &SessionId {
        match self {
            Self::PeerJoined { session, .. }
            | Self::Offer { session, .. }
            | Self::Answer { session, .. }
            | Self::IceCandidate { session, .. }
            | Self::PeerLeft { session, .. } => session,
        }
    }

    /// Participant that sent this message.
    #[must_use]
    pub const fn sender(&self) -> &PeerId {
        match self {
            Self::PeerJoined { from, .. }
            | Self::Offer { from, .. }
            | Self::Answer { from, .. }
            | Self::IceCandidate { from, .. }
            | Self::PeerLeft { from, .. } => from,
        }
    }

    /// Participant this message is addressed to, or `None` for messages
    /// broadcast to the whole session.
    #[must_use]
    pub const fn recipient(&self) -> Option<&PeerId> {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::IceCandidate { to, .. } => {
                Some(to)
            }
            Self::PeerJoined { .. } | Self::PeerLeft { .. } => None,
        }
    }
}
