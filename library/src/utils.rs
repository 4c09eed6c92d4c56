use study_mesh_protocol::SessionId;
use uuid::Uuid;

use crate::constants::STUN_SERVER;

/// Specifies what kind of peer transports to create.
#[derive(Debug, Clone)]
pub enum ConnectionType {
    /// Within local network
    Local,
    /// Setup with STUN server, WAN capabilities but can fail
    Stun {
        /// STUN server url
        urls: String,
    },
    /// Setup with STUN and TURN servers, will fallback to TURN if needed, most stable connection
    StunAndTurn {
        /// STUN server url
        stun_urls: String,
        /// TURN server url
        turn_urls: String,
        /// TURN server username
        username: String,
        /// TURN server credential
        credential: String,
    },
}

impl Default for ConnectionType {
    fn default() -> Self {
        Self::Stun {
            urls: STUN_SERVER.to_owned(),
        }
    }
}

/// Returns a random session id a consumer can use to start a fresh call.
#[must_use]
pub fn get_random_session_id() -> SessionId {
    SessionId::new(Uuid::new_v4().to_string())
}
