use study_mesh_protocol::PeerId;

use crate::platform::TransportState;

/// Consumer-facing events of one mesh session.
///
/// The coordinator delivers every event to exactly one observer, the one
/// registered through `initialize`; fan-out to multiple listeners is the
/// consumer's concern. Callbacks run on the host's single-threaded event
/// loop and should return quickly.
pub trait MeshEvents<S> {
    /// A remote peer's stream became available (or was replaced). The new
    /// stream supersedes any stream previously reported for `peer`, so
    /// handling this twice for the same peer must replace, not duplicate,
    /// whatever the consumer keeps.
    fn on_remote_stream(&self, peer: &PeerId, stream: S);

    /// A remote peer left the session and its connection was discarded.
    fn on_peer_left(&self, peer: &PeerId);

    /// A peer transport changed state. A `Failed` state is surfaced here
    /// and nothing else happens: the coordinator never retries negotiation
    /// on its own, the consumer decides whether to prompt for a retry.
    fn on_connection_state(&self, peer: &PeerId, state: TransportState);
}
