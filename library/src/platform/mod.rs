/*!
Abstractions over the two collaborators the coordinator depends on: the media
capture platform and the broadcast channel service. Each trait exposes only
the capability surface the mesh actually needs, so a host can supply its own
implementation (the browser one lives in [`web`], native test doubles live
with the test suite).
*/

use std::future::Future;

use study_mesh_protocol::mesh::SignalMessage;
use study_mesh_protocol::IceCandidate;

#[cfg(target_arch = "wasm32")]
pub mod web;

/// One captured audio or video track.
pub trait MediaTrack: Clone + 'static {
    /// Whether the track currently produces live samples.
    fn enabled(&self) -> bool;

    /// Flip the live flag. A disabled track renders silence/black frames on
    /// the existing transports, no renegotiation happens.
    fn set_enabled(&self, enabled: bool);

    /// Permanently stop capturing on this track.
    fn stop(&self);
}

/// A captured media stream, enumerable by track kind.
pub trait MediaStream: Clone + 'static {
    /// Track handle type of this stream.
    type Track: MediaTrack;

    /// The stream's audio tracks.
    fn audio_tracks(&self) -> Vec<Self::Track>;

    /// The stream's video tracks.
    fn video_tracks(&self) -> Vec<Self::Track>;
}

/// A render target capable of displaying a captured stream, e.g. a video
/// element.
pub trait MediaSink<S> {
    /// Attach the stream to this sink.
    fn attach(&self, stream: &S);
}

/// Coarse state of one peer transport, mirroring the ICE connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Freshly created, no negotiation yet.
    New,
    /// Candidate pairs are being probed.
    Connecting,
    /// Media is flowing.
    Connected,
    /// Connectivity was lost, the transport may still recover on its own.
    Disconnected,
    /// All candidate pairs failed; the transport will not recover without
    /// renegotiation.
    Failed,
    /// Shut down.
    Closed,
}

/// One directly negotiated transport towards a single remote peer.
pub trait PeerTransport: Clone + 'static {
    /// Stream handle type carried by this transport.
    type Stream: MediaStream;

    /// Mirror the local capture onto this transport as outbound tracks.
    fn attach_outbound(&self, stream: &Self::Stream);

    /// Generate an offer and apply it as the local description.
    ///
    /// # Errors
    /// Fails if the transport rejects offer generation or the description.
    async fn create_offer(&self) -> anyhow::Result<String>;

    /// Apply a remote offer, then generate an answer and apply it as the
    /// local description.
    ///
    /// # Errors
    /// Fails if either description is rejected by the transport.
    async fn create_answer(&self, remote_offer: &str) -> anyhow::Result<String>;

    /// Apply the remote answer that completes negotiation.
    ///
    /// # Errors
    /// Fails if the transport rejects the description.
    async fn accept_answer(&self, remote_answer: &str) -> anyhow::Result<()>;

    /// Feed one trickle candidate gathered by the remote side. A remote
    /// description must have been applied first.
    ///
    /// # Errors
    /// Fails if the candidate is malformed or arrives before any remote
    /// description.
    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> anyhow::Result<()>;

    /// Observe locally gathered trickle candidates.
    fn on_local_candidate(&self, callback: Box<dyn Fn(IceCandidate)>);

    /// Observe the remote stream once media starts flowing. May fire again
    /// for the same transport if the remote side replaces its stream.
    fn on_remote_stream(&self, callback: Box<dyn Fn(Self::Stream)>);

    /// Observe transport state transitions.
    fn on_state_change(&self, callback: Box<dyn Fn(TransportState)>);

    /// Current transport state.
    fn state(&self) -> TransportState;

    /// Tear the transport down. Safe to call more than once.
    fn close(&self);
}

/// One handle on the session's broadcast topic.
pub trait SignalingChannel: Clone + 'static {
    /// Register the single inbound-message callback. Expected to be set
    /// before [`SignalingChannel::subscribe`] so no message is missed.
    fn on_message(&self, callback: Box<dyn Fn(SignalMessage)>);

    /// Resolve once the service confirms the subscription.
    ///
    /// # Errors
    /// Fails with the reported status if the subscription is rejected.
    async fn subscribe(&self) -> anyhow::Result<()>;

    /// Publish one message to every subscriber of the topic, the sender
    /// included. Best effort; the serialization used on the wire is the
    /// transport's concern.
    ///
    /// # Errors
    /// Fails if the channel is no longer open or refuses the message.
    fn send(&self, message: &SignalMessage) -> anyhow::Result<()>;

    /// Drop the subscription and release the channel. Safe to call more
    /// than once.
    fn unsubscribe(&self);
}

/// Factory for everything the coordinator needs from its host environment.
pub trait Platform: Clone + 'static {
    /// Media stream handle type.
    type Stream: MediaStream;
    /// Render target type for the local stream.
    type Sink: MediaSink<Self::Stream>;
    /// Peer transport type.
    type Transport: PeerTransport<Stream = Self::Stream>;
    /// Broadcast channel handle type.
    type Channel: SignalingChannel;

    /// Request camera/microphone capture from the platform.
    ///
    /// # Errors
    /// Fails if the user denies access or no device is available.
    async fn acquire_user_media(&self, video: bool, audio: bool) -> anyhow::Result<Self::Stream>;

    /// Open a channel on the given broadcast topic. Opening does not
    /// subscribe yet.
    ///
    /// # Errors
    /// Fails if the channel service cannot be reached at all.
    fn open_channel(&self, topic: &str) -> anyhow::Result<Self::Channel>;

    /// Create a fresh, unconnected peer transport.
    ///
    /// # Errors
    /// Fails if the transport cannot be constructed, e.g. bad ICE
    /// configuration.
    fn create_transport(&self) -> anyhow::Result<Self::Transport>;

    /// Schedule a task on the host's single-threaded event loop.
    fn spawn_local(&self, task: impl Future<Output = ()> + 'static);
}
