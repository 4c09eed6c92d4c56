/*!
Library module implementing the mesh topology of a study-room call: every
participant holds one direct connection to every other participant, and each
participant's [`MeshCoordinator`] negotiates those connections over the
session's broadcast channel.

A coordinator is constructed idle, acquires all of its resources in
[`MeshCoordinator::initialize`] and releases them in
[`MeshCoordinator::cleanup`]. In between it reacts to inbound signaling
messages on its own; the consumer only ever hears about results through the
[`MeshEvents`] observer.

# Example

```ignore
use study_mesh::mesh::MeshCoordinator;
use study_mesh::platform::web::WebPlatform;
use study_mesh::{ConnectionType, PeerId, SessionId};

let platform = WebPlatform::new("wss://channels.example.com", ConnectionType::default());
let coordinator = MeshCoordinator::new(
    platform,
    SessionId::new("physics-study-group".to_string()),
    PeerId::new("u1".to_string()),
);

// `video_element` renders the local camera, `events` receives remote
// streams and membership changes.
let local_stream = coordinator.initialize(&video_element, events).await?;

// later, when leaving the call:
coordinator.cleanup();
```
*/

mod events;
mod handlers;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, error};
use study_mesh_protocol::mesh::SignalMessage;
use study_mesh_protocol::{signaling_topic, IceCandidate, PeerId, SessionId};

pub use events::MeshEvents;

use crate::error::{Error, Result};
use crate::platform::{
    MediaSink, MediaStream, MediaTrack, PeerTransport, Platform, SignalingChannel,
};

/// Coordinator lifecycle. Every handler checks this on entry and re-checks
/// it after each suspension point, since `cleanup` may run while an
/// asynchronous negotiation step is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Constructed, `initialize` not called yet.
    Idle,
    /// Media and channel are live, signaling is processed.
    Active,
    /// `cleanup` is running; inbound signaling and new offers are
    /// suppressed.
    ShuttingDown,
    /// `cleanup` finished; all resources are released.
    Closed,
}

impl Lifecycle {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        }
    }
}

/// Which side of one peer pair ran the offer half of negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerRole {
    Initiator,
    Responder,
}

/// Negotiation phase of one tracked connection. An untracked peer is
/// implicitly absent; a closed connection leaves the map entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerPhase {
    Negotiating,
    Connected,
    Failed,
}

/// One tracked connection towards a remote peer. Owned exclusively by the
/// coordinator; at most one link exists per peer id at any time.
struct PeerLink<P: Platform> {
    /// Distinguishes this link from any later link to the same peer, so a
    /// continuation resumed after the link was replaced cannot touch the
    /// replacement.
    seq: u64,
    transport: P::Transport,
    role: PeerRole,
    phase: PeerPhase,
    /// Set once a remote description has been applied; until then inbound
    /// trickle candidates are buffered on `pending_candidates`.
    remote_ready: bool,
    pending_candidates: Vec<IceCandidate>,
    remote_stream: Option<P::Stream>,
}

/// Read-only snapshot of the coordinator's tracked connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Number of remote peers with a tracked connection.
    pub tracked_peers: usize,
    /// Connections still in offer/answer/candidate exchange.
    pub negotiating: usize,
    /// Connections with media flowing.
    pub connected: usize,
    /// Connections whose transport reported failure and now await a
    /// consumer decision.
    pub failed: usize,
}

struct Inner<P: Platform> {
    platform: P,
    session_id: SessionId,
    local_id: PeerId,
    lifecycle: Lifecycle,
    channel: Option<P::Channel>,
    local_stream: Option<P::Stream>,
    links: HashMap<PeerId, PeerLink<P>>,
    /// Trickle candidates that arrived before any link existed for their
    /// peer, applied as soon as that link has a remote description.
    early_candidates: HashMap<PeerId, Vec<IceCandidate>>,
    events: Option<Rc<dyn MeshEvents<P::Stream>>>,
    next_link_seq: u64,
}

/// Coordinates the peer connections of one participant in one mesh session.
///
/// This type is a pointer to the underlying resource and can be cloned
/// freely; all clones drive the same session.
pub struct MeshCoordinator<P: Platform> {
    inner: Rc<RefCell<Inner<P>>>,
}

impl<P: Platform> Clone for MeshCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Platform> MeshCoordinator<P> {
    /// Creates an idle coordinator for `session_id`, identifying itself to
    /// other participants as `local_id`. Performs no I/O; all resource
    /// acquisition happens in [`MeshCoordinator::initialize`].
    #[must_use]
    pub fn new(platform: P, session_id: SessionId, local_id: PeerId) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                platform,
                session_id,
                local_id,
                lifecycle: Lifecycle::Idle,
                channel: None,
                local_stream: None,
                links: HashMap::new(),
                early_candidates: HashMap::new(),
                events: None,
                next_link_seq: 0,
            })),
        }
    }

    /// The session this coordinator participates in.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.inner.borrow().session_id.clone()
    }

    /// The local participant's identity.
    #[must_use]
    pub fn local_id(&self) -> PeerId {
        self.inner.borrow().local_id.clone()
    }

    /// Starts the session: acquires camera and microphone, attaches the
    /// captured stream to `sink`, joins the session's broadcast channel
    /// and, once the subscription is confirmed, announces the local
    /// participant to everyone already present. Returns the local capture
    /// handle.
    ///
    /// A failing channel subscription is logged and tolerated: local media
    /// keeps working, peers just will not be discovered.
    ///
    /// # Errors
    /// [`Error::MediaAcquisition`] if camera/microphone access is denied or
    /// unavailable; the coordinator returns to idle so the caller may retry.
    /// [`Error::IllegalState`] if the coordinator was already initialized
    /// or cleaned up.
    pub async fn initialize(
        &self,
        sink: &P::Sink,
        events: impl MeshEvents<P::Stream> + 'static,
    ) -> Result<P::Stream> {
        let platform = {
            let mut inner = self.inner.borrow_mut();
            if inner.lifecycle != Lifecycle::Idle {
                return Err(Error::IllegalState {
                    operation: "initialize",
                    state: inner.lifecycle.as_str(),
                });
            }
            inner.lifecycle = Lifecycle::Active;
            inner.events = Some(Rc::new(events));
            inner.platform.clone()
        };

        let stream = match platform.acquire_user_media(true, true).await {
            Ok(stream) => stream,
            Err(source) => {
                let mut inner = self.inner.borrow_mut();
                // back to idle so the caller may retry after the user fixes
                // permissions or plugs a device in
                inner.lifecycle = Lifecycle::Idle;
                inner.events = None;
                return Err(Error::MediaAcquisition { source });
            }
        };
        // cleanup may have run while the permission prompt was pending
        let state = self.inner.borrow().lifecycle;
        if state != Lifecycle::Active {
            stop_all_tracks(&stream);
            return Err(Error::IllegalState {
                operation: "initialize",
                state: state.as_str(),
            });
        }

        sink.attach(&stream);
        self.inner.borrow_mut().local_stream = Some(stream.clone());

        let topic = signaling_topic(&self.inner.borrow().session_id);
        let channel = match platform.open_channel(&topic) {
            Ok(channel) => channel,
            Err(source) => {
                error!("{}", Error::SignalingChannel { source });
                return Ok(stream);
            }
        };
        {
            let this = self.clone();
            let spawner = platform.clone();
            channel.on_message(Box::new(move |message| {
                let this = this.clone();
                spawner.spawn_local(async move { this.handle_signal(message).await });
            }));
        }
        self.inner.borrow_mut().channel = Some(channel.clone());

        match channel.subscribe().await {
            Ok(()) => {
                debug!("subscribed to {topic}");
                let announcement = {
                    let inner = self.inner.borrow();
                    (inner.lifecycle == Lifecycle::Active).then(|| SignalMessage::PeerJoined {
                        session: inner.session_id.clone(),
                        from: inner.local_id.clone(),
                    })
                };
                if let Some(message) = announcement {
                    self.send_signal(message);
                }
            }
            Err(source) => {
                // degraded but not fatal: nobody will find us, media still works
                error!("{}", Error::SignalingChannel { source });
            }
        }

        Ok(stream)
    }

    /// Flips the enabled flag of every local audio track and returns
    /// whether audio is now muted. Local-only: no signaling message is
    /// sent, remote peers simply receive silence. Returns `false` if no
    /// local stream is present.
    pub fn toggle_mute(&self) -> bool {
        self.toggle_local_tracks(true)
    }

    /// Flips the enabled flag of every local video track and returns
    /// whether video is now hidden. Local-only, like
    /// [`MeshCoordinator::toggle_mute`].
    pub fn toggle_video(&self) -> bool {
        self.toggle_local_tracks(false)
    }

    fn toggle_local_tracks(&self, audio: bool) -> bool {
        let stream = self.inner.borrow().local_stream.clone();
        let Some(stream) = stream else {
            return false;
        };
        let tracks = if audio {
            stream.audio_tracks()
        } else {
            stream.video_tracks()
        };
        let Some(first) = tracks.first() else {
            return false;
        };
        let enabled = !first.enabled();
        for track in &tracks {
            track.set_enabled(enabled);
        }
        !enabled
    }

    /// Snapshot of the currently tracked connections. Read-only.
    #[must_use]
    pub fn connection_stats(&self) -> ConnectionStats {
        let inner = self.inner.borrow();
        let mut stats = ConnectionStats {
            tracked_peers: inner.links.len(),
            ..ConnectionStats::default()
        };
        for link in inner.links.values() {
            match link.phase {
                PeerPhase::Negotiating => stats.negotiating += 1,
                PeerPhase::Connected => stats.connected += 1,
                PeerPhase::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Leaves the session and releases every resource: broadcasts a
    /// farewell so remote peers can drop the connection promptly, closes
    /// every tracked transport, stops the local capture and releases the
    /// channel. Idempotent; a second call is a no-op. Each step runs even
    /// if an earlier one fails.
    pub fn cleanup(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            match inner.lifecycle {
                Lifecycle::ShuttingDown | Lifecycle::Closed => {
                    debug!("cleanup already ran, nothing to do");
                    return;
                }
                Lifecycle::Idle | Lifecycle::Active => inner.lifecycle = Lifecycle::ShuttingDown,
            }
        }

        let farewell = {
            let inner = self.inner.borrow();
            SignalMessage::PeerLeft {
                session: inner.session_id.clone(),
                from: inner.local_id.clone(),
            }
        };
        self.send_signal(farewell);

        let links = std::mem::take(&mut self.inner.borrow_mut().links);
        for (peer, link) in links {
            debug!("closing connection to {peer}");
            link.transport.close();
        }
        self.inner.borrow_mut().early_candidates.clear();

        let stream = self.inner.borrow_mut().local_stream.take();
        if let Some(stream) = stream {
            stop_all_tracks(&stream);
        }

        let channel = self.inner.borrow_mut().channel.take();
        if let Some(channel) = channel {
            channel.unsubscribe();
        }

        let mut inner = self.inner.borrow_mut();
        inner.events = None;
        inner.lifecycle = Lifecycle::Closed;
    }
}

fn stop_all_tracks<S: MediaStream>(stream: &S) {
    for track in stream.audio_tracks() {
        track.stop();
    }
    for track in stream.video_tracks() {
        track.stop();
    }
}
