/*!
Browser implementation of the platform traits: `getUserMedia` for capture,
[`web_sys::RtcPeerConnection`] for peer transports and a `WebSocket` per
broadcast topic for signaling, with `SignalMessage`s encoded as JSON text
frames.
*/

use anyhow::anyhow;
use js_sys::{Array, Object, Reflect};
use log::{debug, error};
use study_mesh_protocol::mesh::SignalMessage;
use study_mesh_protocol::IceCandidate;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    HtmlVideoElement, MediaStream, MediaStreamConstraints, MediaStreamTrack, MessageEvent,
    RtcConfiguration, RtcIceCandidate, RtcIceCandidateInit, RtcIceConnectionState,
    RtcPeerConnection, RtcPeerConnectionIceEvent, RtcSdpType, RtcSessionDescriptionInit,
    RtcTrackEvent, WebSocket,
};

use crate::platform::{
    MediaSink, MediaStream as MediaStreamApi, MediaTrack, PeerTransport, Platform,
    SignalingChannel, TransportState,
};
use crate::ConnectionType;

pub(crate) fn set_panic_hook() {
    // When the `console_error_panic_hook` feature is enabled, we can call the
    // `set_panic_hook` function at least once during initialization, and then
    // we will get better error messages if our code ever panics.
    //
    // For more details see
    // https://github.com/rustwasm/console_error_panic_hook#readme
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn js_error(context: &str, value: &JsValue) -> anyhow::Error {
    anyhow!("{context}: {value:?}")
}

/// Host bindings for running a mesh session inside a browser tab.
#[derive(Debug, Clone)]
pub struct WebPlatform {
    channel_service_url: String,
    connection_type: ConnectionType,
}

impl WebPlatform {
    /// Creates a platform handle. `channel_service_url` is the base address
    /// of the broadcast-channel service; the topic name is appended as a
    /// path segment when a channel is opened.
    #[must_use]
    pub fn new(channel_service_url: &str, connection_type: ConnectionType) -> Self {
        set_panic_hook();
        Self {
            channel_service_url: channel_service_url.trim_end_matches('/').to_owned(),
            connection_type,
        }
    }
}

impl Platform for WebPlatform {
    type Stream = MediaStream;
    type Sink = HtmlVideoElement;
    type Transport = RtcTransport;
    type Channel = WsChannel;

    async fn acquire_user_media(&self, video: bool, audio: bool) -> anyhow::Result<MediaStream> {
        let window = web_sys::window().ok_or_else(|| anyhow!("no window available"))?;
        let devices = window
            .navigator()
            .media_devices()
            .map_err(|err| js_error("media devices unavailable", &err))?;

        let mut constraints = MediaStreamConstraints::new();
        constraints.video(&JsValue::from_bool(video));
        constraints.audio(&JsValue::from_bool(audio));

        let request = devices
            .get_user_media_with_constraints(&constraints)
            .map_err(|err| js_error("user media request rejected", &err))?;
        let stream = JsFuture::from(request)
            .await
            .map_err(|err| js_error("user media permission denied or unavailable", &err))?;
        stream
            .dyn_into::<MediaStream>()
            .map_err(|err| js_error("user media returned an unexpected object", &err))
    }

    fn open_channel(&self, topic: &str) -> anyhow::Result<WsChannel> {
        WsChannel::open(&format!("{}/{topic}", self.channel_service_url))
    }

    fn create_transport(&self) -> anyhow::Result<RtcTransport> {
        RtcTransport::new(&self.connection_type)
    }

    fn spawn_local(&self, task: impl std::future::Future<Output = ()> + 'static) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

impl MediaTrack for MediaStreamTrack {
    fn enabled(&self) -> bool {
        MediaStreamTrack::enabled(self)
    }

    fn set_enabled(&self, enabled: bool) {
        MediaStreamTrack::set_enabled(self, enabled);
    }

    fn stop(&self) {
        MediaStreamTrack::stop(self);
    }
}

fn tracks_of(array: &Array) -> Vec<MediaStreamTrack> {
    array
        .iter()
        .filter_map(|track| track.dyn_into::<MediaStreamTrack>().ok())
        .collect()
}

impl MediaStreamApi for MediaStream {
    type Track = MediaStreamTrack;

    fn audio_tracks(&self) -> Vec<MediaStreamTrack> {
        tracks_of(&self.get_audio_tracks())
    }

    fn video_tracks(&self) -> Vec<MediaStreamTrack> {
        tracks_of(&self.get_video_tracks())
    }
}

impl MediaSink<MediaStream> for HtmlVideoElement {
    fn attach(&self, stream: &MediaStream) {
        self.set_src_object(Some(stream));
    }
}

/// One `RtcPeerConnection` towards a single remote peer.
#[derive(Debug, Clone)]
pub struct RtcTransport {
    connection: RtcPeerConnection,
}

impl RtcTransport {
    fn new(connection_type: &ConnectionType) -> anyhow::Result<Self> {
        let connection = match connection_type {
            ConnectionType::Local => RtcPeerConnection::new(),
            ConnectionType::Stun { urls } => {
                connection_with_ice_servers(&[ice_server_entry(urls, None)?])
            }
            ConnectionType::StunAndTurn {
                stun_urls,
                turn_urls,
                username,
                credential,
            } => connection_with_ice_servers(&[
                ice_server_entry(stun_urls, None)?,
                ice_server_entry(turn_urls, Some((username, credential)))?,
            ]),
        }
        .map_err(|err| js_error("failed to create peer connection", &err))?;
        Ok(Self { connection })
    }
}

fn ice_server_entry(
    urls: &str,
    turn_credentials: Option<(&str, &str)>,
) -> anyhow::Result<Object> {
    let entry = Object::new();
    Reflect::set(&entry, &"urls".into(), &urls.into())
        .map_err(|err| js_error("failed to build ICE server entry", &err))?;
    if let Some((username, credential)) = turn_credentials {
        Reflect::set(&entry, &"username".into(), &username.into())
            .map_err(|err| js_error("failed to build ICE server entry", &err))?;
        Reflect::set(&entry, &"credential".into(), &credential.into())
            .map_err(|err| js_error("failed to build ICE server entry", &err))?;
    }
    Ok(entry)
}

fn connection_with_ice_servers(entries: &[Object]) -> Result<RtcPeerConnection, JsValue> {
    let ice_servers = Array::new();
    for entry in entries {
        ice_servers.push(entry);
    }
    let mut rtc_configuration = RtcConfiguration::new();
    rtc_configuration.ice_servers(&ice_servers);
    RtcPeerConnection::new_with_configuration(&rtc_configuration)
}

const fn map_ice_state(state: RtcIceConnectionState) -> TransportState {
    match state {
        RtcIceConnectionState::Checking => TransportState::Connecting,
        RtcIceConnectionState::Connected | RtcIceConnectionState::Completed => {
            TransportState::Connected
        }
        RtcIceConnectionState::Disconnected => TransportState::Disconnected,
        RtcIceConnectionState::Failed => TransportState::Failed,
        RtcIceConnectionState::Closed => TransportState::Closed,
        _ => TransportState::New,
    }
}

impl PeerTransport for RtcTransport {
    type Stream = MediaStream;

    fn attach_outbound(&self, stream: &MediaStream) {
        for track in tracks_of(&stream.get_tracks()) {
            self.connection.add_track(&track, stream, &Array::new());
        }
    }

    async fn create_offer(&self) -> anyhow::Result<String> {
        let offer = JsFuture::from(self.connection.create_offer())
            .await
            .map_err(|err| js_error("failed to create an SDP offer", &err))?;
        let offer = Reflect::get(&offer, &JsValue::from_str("sdp"))
            .map_err(|err| js_error("offer carries no SDP", &err))?
            .as_string()
            .ok_or_else(|| anyhow!("offer SDP is not a string"))?;

        let mut local_session_description = RtcSessionDescriptionInit::new(RtcSdpType::Offer);
        local_session_description.sdp(&offer);
        JsFuture::from(
            self.connection
                .set_local_description(&local_session_description),
        )
        .await
        .map_err(|err| js_error("failed to set local description", &err))?;

        Ok(offer)
    }

    async fn create_answer(&self, remote_offer: &str) -> anyhow::Result<String> {
        let mut remote_session_description = RtcSessionDescriptionInit::new(RtcSdpType::Offer);
        remote_session_description.sdp(remote_offer);
        JsFuture::from(
            self.connection
                .set_remote_description(&remote_session_description),
        )
        .await
        .map_err(|err| js_error("failed to set remote description", &err))?;

        let answer = JsFuture::from(self.connection.create_answer())
            .await
            .map_err(|err| js_error("failed to create an SDP answer", &err))?;
        let answer = Reflect::get(&answer, &JsValue::from_str("sdp"))
            .map_err(|err| js_error("answer carries no SDP", &err))?
            .as_string()
            .ok_or_else(|| anyhow!("answer SDP is not a string"))?;

        let mut local_session_description = RtcSessionDescriptionInit::new(RtcSdpType::Answer);
        local_session_description.sdp(&answer);
        JsFuture::from(
            self.connection
                .set_local_description(&local_session_description),
        )
        .await
        .map_err(|err| js_error("failed to set local description", &err))?;

        Ok(answer)
    }

    async fn accept_answer(&self, remote_answer: &str) -> anyhow::Result<()> {
        let mut remote_session_description = RtcSessionDescriptionInit::new(RtcSdpType::Answer);
        remote_session_description.sdp(remote_answer);
        JsFuture::from(
            self.connection
                .set_remote_description(&remote_session_description),
        )
        .await
        .map_err(|err| js_error("failed to set remote description", &err))?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> anyhow::Result<()> {
        let mut init = RtcIceCandidateInit::new("");
        init.candidate(&candidate.candidate);
        init.sdp_m_line_index(candidate.sdp_m_line_index);
        init.sdp_mid(candidate.sdp_mid.as_deref());
        let rtc_candidate = RtcIceCandidate::new(&init)
            .map_err(|err| js_error("failed to create RTC ICE candidate", &err))?;
        JsFuture::from(
            self.connection
                .add_ice_candidate_with_opt_rtc_ice_candidate(Some(&rtc_candidate)),
        )
        .await
        .map_err(|err| js_error("failed to add ICE candidate", &err))?;
        debug!("added ice candidate {candidate:?}");
        Ok(())
    }

    fn on_local_candidate(&self, callback: Box<dyn Fn(IceCandidate)>) {
        let on_ice_candidate = Closure::wrap(Box::new(move |ev: RtcPeerConnectionIceEvent| {
            if let Some(candidate) = ev.candidate() {
                callback(IceCandidate {
                    candidate: candidate.candidate(),
                    sdp_mid: candidate.sdp_mid(),
                    sdp_m_line_index: candidate.sdp_m_line_index(),
                });
            }
        }) as Box<dyn FnMut(RtcPeerConnectionIceEvent)>);
        self.connection
            .set_onicecandidate(Some(on_ice_candidate.as_ref().unchecked_ref()));
        on_ice_candidate.forget();
    }

    fn on_remote_stream(&self, callback: Box<dyn Fn(MediaStream)>) {
        let on_track = Closure::wrap(Box::new(move |ev: RtcTrackEvent| {
            match ev.streams().get(0).dyn_into::<MediaStream>() {
                Ok(stream) => callback(stream),
                Err(other) => error!("track event carried no stream: {other:?}"),
            }
        }) as Box<dyn FnMut(RtcTrackEvent)>);
        self.connection
            .set_ontrack(Some(on_track.as_ref().unchecked_ref()));
        on_track.forget();
    }

    fn on_state_change(&self, callback: Box<dyn Fn(TransportState)>) {
        let connection = self.connection.clone();
        let on_state_change = Closure::wrap(Box::new(move || {
            callback(map_ice_state(connection.ice_connection_state()));
        }) as Box<dyn FnMut()>);
        self.connection
            .set_oniceconnectionstatechange(Some(on_state_change.as_ref().unchecked_ref()));
        on_state_change.forget();
    }

    fn state(&self) -> TransportState {
        map_ice_state(self.connection.ice_connection_state())
    }

    fn close(&self) {
        self.connection.close();
    }
}

/// One `WebSocket` subscription to a broadcast topic.
#[derive(Debug, Clone)]
pub struct WsChannel {
    socket: WebSocket,
}

impl WsChannel {
    fn open(url: &str) -> anyhow::Result<Self> {
        let socket =
            WebSocket::new(url).map_err(|err| js_error("failed to open broadcast channel", &err))?;
        Ok(Self { socket })
    }
}

impl SignalingChannel for WsChannel {
    fn on_message(&self, callback: Box<dyn Fn(SignalMessage)>) {
        let on_message = Closure::wrap(Box::new(move |ev: MessageEvent| {
            let Some(text) = ev.data().as_string() else {
                return;
            };
            match serde_json::from_str(&text) {
                Ok(message) => callback(message),
                Err(err) => error!("failed to deserialize inbound signal: {err}"),
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        self.socket
            .set_onmessage(Some(on_message.as_ref().unchecked_ref()));
        on_message.forget();
    }

    async fn subscribe(&self) -> anyhow::Result<()> {
        if self.socket.ready_state() == WebSocket::OPEN {
            return Ok(());
        }
        let socket = self.socket.clone();
        let subscription = js_sys::Promise::new(&mut |resolve, reject| {
            let on_open = Closure::wrap(Box::new(move |_: JsValue| {
                let _ = resolve.call0(&JsValue::NULL);
            }) as Box<dyn FnMut(JsValue)>);
            socket.set_onopen(Some(on_open.as_ref().unchecked_ref()));
            on_open.forget();

            let on_error = Closure::wrap(Box::new(move |status: JsValue| {
                let _ = reject.call1(&JsValue::NULL, &status);
            }) as Box<dyn FnMut(JsValue)>);
            socket.set_onerror(Some(on_error.as_ref().unchecked_ref()));
            on_error.forget();
        });
        JsFuture::from(subscription)
            .await
            .map(|_| ())
            .map_err(|err| js_error("channel subscription reported an error status", &err))
    }

    fn send(&self, message: &SignalMessage) -> anyhow::Result<()> {
        if self.socket.ready_state() != WebSocket::OPEN {
            return Err(anyhow!("channel is not open"));
        }
        let text = serde_json::to_string(message)?;
        self.socket
            .send_with_str(&text)
            .map_err(|err| js_error("failed to send message across the channel", &err))
    }

    fn unsubscribe(&self) {
        self.socket.set_onmessage(None);
        if let Err(err) = self.socket.close() {
            debug!("channel was already closed: {err:?}");
        }
    }
}
