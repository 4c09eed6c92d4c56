//! In-memory doubles for the two platform collaborators, plus a
//! deterministic task queue standing in for the host event loop. Everything
//! here is single threaded on purpose, like the real host.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use anyhow::anyhow;
use study_mesh::mesh::{MeshCoordinator, MeshEvents};
use study_mesh::platform::{
    MediaSink, MediaStream, MediaTrack, PeerTransport, Platform, SignalingChannel, TransportState,
};
use study_mesh::{IceCandidate, PeerId, SessionId};
use study_mesh_protocol::mesh::SignalMessage;

type LocalTask = Pin<Box<dyn Future<Output = ()>>>;

// ---------------------------------------------------------------------------
// media

#[derive(Debug)]
struct TrackState {
    enabled: Cell<bool>,
    stopped: Cell<bool>,
}

/// One fake capture track with the enable/stop surface of the real thing.
#[derive(Debug, Clone)]
pub struct FakeTrack {
    state: Rc<TrackState>,
}

impl FakeTrack {
    fn live() -> Self {
        Self {
            state: Rc::new(TrackState {
                enabled: Cell::new(true),
                stopped: Cell::new(false),
            }),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.get()
    }
}

impl MediaTrack for FakeTrack {
    fn enabled(&self) -> bool {
        self.state.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.state.enabled.set(enabled);
    }

    fn stop(&self) {
        self.state.stopped.set(true);
    }
}

/// A fake capture stream with one audio and one video track.
#[derive(Debug, Clone)]
pub struct FakeStream {
    audio: Rc<Vec<FakeTrack>>,
    video: Rc<Vec<FakeTrack>>,
}

impl FakeStream {
    pub fn capture() -> Self {
        Self {
            audio: Rc::new(vec![FakeTrack::live()]),
            video: Rc::new(vec![FakeTrack::live()]),
        }
    }

    /// A remote stream carries decoded tracks; for the tests it just needs
    /// to be a distinct handle.
    pub fn remote() -> Self {
        Self::capture()
    }

    pub fn audio_track(&self) -> FakeTrack {
        self.audio[0].clone()
    }

    pub fn video_track(&self) -> FakeTrack {
        self.video[0].clone()
    }

    pub fn all_tracks_stopped(&self) -> bool {
        self.audio
            .iter()
            .chain(self.video.iter())
            .all(FakeTrack::is_stopped)
    }

    pub fn same_stream(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.audio, &other.audio)
    }
}

impl MediaStream for FakeStream {
    type Track = FakeTrack;

    fn audio_tracks(&self) -> Vec<FakeTrack> {
        self.audio.as_ref().clone()
    }

    fn video_tracks(&self) -> Vec<FakeTrack> {
        self.video.as_ref().clone()
    }
}

/// Stand-in for the local video element.
#[derive(Debug, Clone, Default)]
pub struct FakeSink {
    attached: Rc<RefCell<Option<FakeStream>>>,
}

impl FakeSink {
    pub fn attached_stream(&self) -> Option<FakeStream> {
        self.attached.borrow().clone()
    }
}

impl MediaSink<FakeStream> for FakeSink {
    fn attach(&self, stream: &FakeStream) {
        *self.attached.borrow_mut() = Some(stream.clone());
    }
}

// ---------------------------------------------------------------------------
// transports

struct TransportCallbacks {
    candidate: RefCell<Option<Box<dyn Fn(IceCandidate)>>>,
    stream: RefCell<Option<Box<dyn Fn(FakeStream)>>>,
    state: RefCell<Option<Box<dyn Fn(TransportState)>>>,
}

struct TransportInner {
    id: u32,
    state: Cell<TransportState>,
    closed: Cell<bool>,
    fail_offer: Cell<bool>,
    outbound: RefCell<Vec<FakeStream>>,
    remote_description: RefCell<Option<String>>,
    remote_candidates: RefCell<Vec<IceCandidate>>,
    callbacks: TransportCallbacks,
}

/// A scriptable peer transport: negotiation is bookkeeping, and the test
/// decides when candidates are gathered, streams arrive or the state moves.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Rc<TransportInner>,
}

impl FakeTransport {
    fn new(id: u32) -> Self {
        Self {
            inner: Rc::new(TransportInner {
                id,
                state: Cell::new(TransportState::New),
                closed: Cell::new(false),
                fail_offer: Cell::new(false),
                outbound: RefCell::new(Vec::new()),
                remote_description: RefCell::new(None),
                remote_candidates: RefCell::new(Vec::new()),
                callbacks: TransportCallbacks {
                    candidate: RefCell::new(None),
                    stream: RefCell::new(None),
                    state: RefCell::new(None),
                },
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    pub fn outbound_streams(&self) -> usize {
        self.inner.outbound.borrow().len()
    }

    pub fn remote_description(&self) -> Option<String> {
        self.inner.remote_description.borrow().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.inner.remote_candidates.borrow().clone()
    }

    /// Emit one locally gathered trickle candidate.
    pub fn gather_candidate(&self, candidate: IceCandidate) {
        if let Some(callback) = &*self.inner.callbacks.candidate.borrow() {
            callback(candidate);
        }
    }

    /// Announce an inbound remote stream.
    pub fn receive_remote_stream(&self, stream: FakeStream) {
        if let Some(callback) = &*self.inner.callbacks.stream.borrow() {
            callback(stream);
        }
    }

    /// Move the transport to `state` and notify the observer.
    pub fn move_to_state(&self, state: TransportState) {
        self.inner.state.set(state);
        if let Some(callback) = &*self.inner.callbacks.state.borrow() {
            callback(state);
        }
    }
}

impl PeerTransport for FakeTransport {
    type Stream = FakeStream;

    fn attach_outbound(&self, stream: &FakeStream) {
        self.inner.outbound.borrow_mut().push(stream.clone());
    }

    async fn create_offer(&self) -> anyhow::Result<String> {
        if self.inner.fail_offer.get() {
            return Err(anyhow!("offer generation refused"));
        }
        Ok(format!("offer-{}", self.inner.id))
    }

    async fn create_answer(&self, remote_offer: &str) -> anyhow::Result<String> {
        *self.inner.remote_description.borrow_mut() = Some(remote_offer.to_owned());
        Ok(format!("answer-{}", self.inner.id))
    }

    async fn accept_answer(&self, remote_answer: &str) -> anyhow::Result<()> {
        *self.inner.remote_description.borrow_mut() = Some(remote_answer.to_owned());
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> anyhow::Result<()> {
        if self.inner.remote_description.borrow().is_none() {
            return Err(anyhow!("candidate before any remote description"));
        }
        self.inner
            .remote_candidates
            .borrow_mut()
            .push(candidate.clone());
        Ok(())
    }

    fn on_local_candidate(&self, callback: Box<dyn Fn(IceCandidate)>) {
        *self.inner.callbacks.candidate.borrow_mut() = Some(callback);
    }

    fn on_remote_stream(&self, callback: Box<dyn Fn(FakeStream)>) {
        *self.inner.callbacks.stream.borrow_mut() = Some(callback);
    }

    fn on_state_change(&self, callback: Box<dyn Fn(TransportState)>) {
        *self.inner.callbacks.state.borrow_mut() = Some(callback);
    }

    fn state(&self) -> TransportState {
        self.inner.state.get()
    }

    fn close(&self) {
        self.inner.closed.set(true);
        self.inner.state.set(TransportState::Closed);
    }
}

// ---------------------------------------------------------------------------
// broadcast channel

#[derive(Default)]
struct HubState {
    channels: Vec<FakeChannel>,
    sent: Vec<SignalMessage>,
}

/// Process-local broadcast service: every message published on a topic is
/// delivered to every subscribed channel of that topic, the sender included.
#[derive(Clone, Default)]
pub struct Hub {
    state: Rc<RefCell<HubState>>,
}

impl Hub {
    /// Open a raw channel on `topic`, useful for injecting crafted traffic.
    pub fn open(&self, topic: &str) -> FakeChannel {
        let channel = FakeChannel {
            inner: Rc::new(ChannelInner {
                topic: topic.to_owned(),
                subscribed: Cell::new(false),
                closed: Cell::new(false),
                fail_subscribe: Cell::new(false),
                callback: RefCell::new(None),
            }),
            hub: self.clone(),
        };
        self.state.borrow_mut().channels.push(channel.clone());
        channel
    }

    /// Every message ever published, in order.
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.state.borrow().sent.clone()
    }

    pub fn sent_matching(&self, predicate: impl Fn(&SignalMessage) -> bool) -> usize {
        self.state
            .borrow()
            .sent
            .iter()
            .filter(|message| predicate(message))
            .count()
    }

    fn publish(&self, topic: &str, message: &SignalMessage) {
        let listeners: Vec<FakeChannel> = {
            let mut state = self.state.borrow_mut();
            state.sent.push(message.clone());
            state
                .channels
                .iter()
                .filter(|channel| {
                    channel.inner.topic == topic && channel.inner.subscribed.get()
                })
                .cloned()
                .collect()
        };
        for listener in listeners {
            listener.deliver(message.clone());
        }
    }
}

struct ChannelInner {
    topic: String,
    subscribed: Cell<bool>,
    closed: Cell<bool>,
    fail_subscribe: Cell<bool>,
    callback: RefCell<Option<Box<dyn Fn(SignalMessage)>>>,
}

/// One handle on a [`Hub`] topic.
#[derive(Clone)]
pub struct FakeChannel {
    inner: Rc<ChannelInner>,
    hub: Hub,
}

impl FakeChannel {
    fn deliver(&self, message: SignalMessage) {
        if let Some(callback) = &*self.inner.callback.borrow() {
            callback(message);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Publish without being subscribed; the injector side of a test.
    pub fn inject(&self, message: &SignalMessage) {
        self.hub.publish(&self.inner.topic, message);
    }
}

impl SignalingChannel for FakeChannel {
    fn on_message(&self, callback: Box<dyn Fn(SignalMessage)>) {
        *self.inner.callback.borrow_mut() = Some(callback);
    }

    async fn subscribe(&self) -> anyhow::Result<()> {
        if self.inner.fail_subscribe.get() {
            return Err(anyhow!("subscription reported CHANNEL_ERROR"));
        }
        self.inner.subscribed.set(true);
        Ok(())
    }

    fn send(&self, message: &SignalMessage) -> anyhow::Result<()> {
        if self.inner.closed.get() {
            return Err(anyhow!("channel is closed"));
        }
        self.hub.publish(&self.inner.topic, message);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.inner.subscribed.set(false);
        self.inner.closed.set(true);
    }
}

// ---------------------------------------------------------------------------
// platform

struct PlatformState {
    hub: Hub,
    tasks: RefCell<VecDeque<LocalTask>>,
    transports: RefCell<Vec<FakeTransport>>,
    capture: FakeStream,
    fail_media: Cell<bool>,
    fail_subscribe: Cell<bool>,
    fail_next_offer: Cell<bool>,
    next_transport_id: Cell<u32>,
}

/// Fake host environment bound to one shared [`Hub`].
#[derive(Clone)]
pub struct FakePlatform {
    state: Rc<PlatformState>,
}

impl FakePlatform {
    pub fn new(hub: &Hub) -> Self {
        Self {
            state: Rc::new(PlatformState {
                hub: hub.clone(),
                tasks: RefCell::new(VecDeque::new()),
                transports: RefCell::new(Vec::new()),
                capture: FakeStream::capture(),
                fail_media: Cell::new(false),
                fail_subscribe: Cell::new(false),
                fail_next_offer: Cell::new(false),
                next_transport_id: Cell::new(0),
            }),
        }
    }

    /// The stream `acquire_user_media` hands out.
    pub fn capture_stream(&self) -> FakeStream {
        self.state.capture.clone()
    }

    /// Every transport created so far, in creation order.
    pub fn transports(&self) -> Vec<FakeTransport> {
        self.state.transports.borrow().clone()
    }

    pub fn deny_media(&self, deny: bool) {
        self.state.fail_media.set(deny);
    }

    pub fn break_subscription(&self) {
        self.state.fail_subscribe.set(true);
    }

    /// Make the next created transport refuse to generate an offer.
    pub fn fail_next_offer(&self) {
        self.state.fail_next_offer.set(true);
    }

    fn next_task(&self) -> Option<LocalTask> {
        self.state.tasks.borrow_mut().pop_front()
    }
}

impl Platform for FakePlatform {
    type Stream = FakeStream;
    type Sink = FakeSink;
    type Transport = FakeTransport;
    type Channel = FakeChannel;

    async fn acquire_user_media(&self, _video: bool, _audio: bool) -> anyhow::Result<FakeStream> {
        if self.state.fail_media.get() {
            return Err(anyhow!("NotAllowedError: permission denied"));
        }
        Ok(self.state.capture.clone())
    }

    fn open_channel(&self, topic: &str) -> anyhow::Result<FakeChannel> {
        let channel = self.state.hub.open(topic);
        channel
            .inner
            .fail_subscribe
            .set(self.state.fail_subscribe.get());
        Ok(channel)
    }

    fn create_transport(&self) -> anyhow::Result<FakeTransport> {
        let id = self.state.next_transport_id.get();
        self.state.next_transport_id.set(id + 1);
        let transport = FakeTransport::new(id);
        if self.state.fail_next_offer.replace(false) {
            transport.inner.fail_offer.set(true);
        }
        self.state.transports.borrow_mut().push(transport.clone());
        Ok(transport)
    }

    fn spawn_local(&self, task: impl Future<Output = ()> + 'static) {
        self.state.tasks.borrow_mut().push_back(Box::pin(task));
    }
}

/// Run every queued task on every given platform until all queues are
/// drained, i.e. until the mesh settles. Tasks may enqueue follow-up tasks
/// on any platform while running.
pub async fn settle(platforms: &[&FakePlatform]) {
    loop {
        let mut progressed = false;
        for platform in platforms {
            while let Some(task) = platform.next_task() {
                task.await;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// observer

#[derive(Default)]
struct EventLog {
    remote_streams: RefCell<Vec<(PeerId, FakeStream)>>,
    departed: RefCell<Vec<PeerId>>,
    states: RefCell<Vec<(PeerId, TransportState)>>,
}

/// Observer that records everything the coordinator reports.
#[derive(Clone, Default)]
pub struct RecordingEvents {
    log: Rc<EventLog>,
}

impl RecordingEvents {
    pub fn remote_streams(&self) -> Vec<(PeerId, FakeStream)> {
        self.log.remote_streams.borrow().clone()
    }

    pub fn departed(&self) -> Vec<PeerId> {
        self.log.departed.borrow().clone()
    }

    pub fn states(&self) -> Vec<(PeerId, TransportState)> {
        self.log.states.borrow().clone()
    }
}

impl MeshEvents<FakeStream> for RecordingEvents {
    fn on_remote_stream(&self, peer: &PeerId, stream: FakeStream) {
        self.log
            .remote_streams
            .borrow_mut()
            .push((peer.clone(), stream));
    }

    fn on_peer_left(&self, peer: &PeerId) {
        self.log.departed.borrow_mut().push(peer.clone());
    }

    fn on_connection_state(&self, peer: &PeerId, state: TransportState) {
        self.log.states.borrow_mut().push((peer.clone(), state));
    }
}

// ---------------------------------------------------------------------------
// participant bundle

/// One fully initialized participant: coordinator plus its doubles.
pub struct Participant {
    pub coordinator: MeshCoordinator<FakePlatform>,
    pub platform: FakePlatform,
    pub sink: FakeSink,
    pub events: RecordingEvents,
    pub local_stream: FakeStream,
}

/// Create a coordinator for `user` and drive `initialize` to completion.
pub async fn join(hub: &Hub, session: &str, user: &str) -> Participant {
    let platform = FakePlatform::new(hub);
    let coordinator = MeshCoordinator::new(
        platform.clone(),
        SessionId::new(session.to_owned()),
        PeerId::new(user.to_owned()),
    );
    let sink = FakeSink::default();
    let events = RecordingEvents::default();
    let local_stream = coordinator
        .initialize(&sink, events.clone())
        .await
        .expect("initialize failed");
    Participant {
        coordinator,
        platform,
        sink,
        events,
        local_stream,
    }
}

pub fn peer(name: &str) -> PeerId {
    PeerId::new(name.to_owned())
}

pub fn session(name: &str) -> SessionId {
    SessionId::new(name.to_owned())
}

pub fn candidate(tag: &str) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{tag} 1 udp 2122260223 192.0.2.1 54400 typ host"),
        sdp_mid: Some("0".to_owned()),
        sdp_m_line_index: Some(0),
    }
}
