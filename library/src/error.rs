use study_mesh_protocol::PeerId;
use thiserror::Error;

/// Failures the coordinator can run into. Only [`Error::MediaAcquisition`]
/// and [`Error::IllegalState`] ever reach the caller; everything else is
/// absorbed at the site that observed it so one peer's trouble cannot take
/// down the rest of the mesh.
#[derive(Debug, Error)]
pub enum Error {
    /// Camera/microphone access was denied or no device is available.
    /// Fatal to `initialize`; the caller may present a retry path and
    /// invoke `initialize` again.
    #[error("failed to acquire local media: {source}")]
    MediaAcquisition {
        /// What the capture platform reported.
        source: anyhow::Error,
    },

    /// The broadcast channel could not be opened or its subscription
    /// reported an error status. Local media keeps working but no peers
    /// will be discovered.
    #[error("signaling channel unavailable: {source}")]
    SignalingChannel {
        /// What the channel service reported.
        source: anyhow::Error,
    },

    /// Offer/answer/candidate exchange with a single peer failed. Scoped to
    /// that peer's connection.
    #[error("negotiation with peer {peer} failed: {source}")]
    Negotiation {
        /// The peer whose connection the failure is scoped to.
        peer: PeerId,
        /// The underlying transport error.
        source: anyhow::Error,
    },

    /// A signaling message could not be published. Signaling is best
    /// effort, so this is only ever logged.
    #[error("failed to publish signaling message: {source}")]
    SendFailure {
        /// What the channel reported at the send site.
        source: anyhow::Error,
    },

    /// The requested operation is not valid in the coordinator's current
    /// lifecycle state, e.g. a second `initialize`.
    #[error("cannot {operation} while the coordinator is {state}")]
    IllegalState {
        /// The rejected operation.
        operation: &'static str,
        /// The lifecycle state that rejected it.
        state: &'static str,
    },
}

/// Convenience alias for results with the crate-wide [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
