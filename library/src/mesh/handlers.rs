//! Inbound signaling: the per-peer state machine driven by messages from
//! the session's broadcast channel.

use log::{debug, warn};
use study_mesh_protocol::mesh::SignalMessage;
use study_mesh_protocol::{IceCandidate, PeerId, SessionId};

use super::{Lifecycle, MeshCoordinator, PeerLink, PeerPhase, PeerRole};
use crate::error::Error;
use crate::platform::{PeerTransport, Platform, SignalingChannel, TransportState};

impl<P: Platform> MeshCoordinator<P> {
    /// Consumes one inbound signaling message. Messages sent by the local
    /// participant, addressed to somebody else or routed for another
    /// session are dropped; handler failures are logged and stay scoped to
    /// the one peer that caused them.
    pub(crate) async fn handle_signal(&self, message: SignalMessage) {
        {
            let inner = self.inner.borrow();
            if inner.lifecycle != Lifecycle::Active {
                debug!(
                    "dropping inbound signal while {}",
                    inner.lifecycle.as_str()
                );
                return;
            }
            if message.session() != &inner.session_id {
                return;
            }
            // no self-signaling: the channel echoes our own broadcasts
            if message.sender() == &inner.local_id {
                return;
            }
            if message.recipient().is_some_and(|to| to != &inner.local_id) {
                return;
            }
        }

        let peer = message.sender().clone();
        let outcome = match message {
            SignalMessage::PeerJoined { from, .. } => self.peer_joined(from).await,
            SignalMessage::Offer { from, sdp, .. } => self.remote_offer(from, sdp).await,
            SignalMessage::Answer { from, sdp, .. } => self.remote_answer(from, sdp).await,
            SignalMessage::IceCandidate {
                from, candidate, ..
            } => self.remote_candidate(from, candidate).await,
            SignalMessage::PeerLeft { from, .. } => {
                self.peer_left(&from);
                Ok(())
            }
        };
        if let Err(err) = outcome {
            // isolated: other peers and the coordinator itself keep going
            warn!("dropping signaling exchange with {peer}: {err}");
        }
    }

    /// A peer announced itself: open a connection towards it and offer.
    async fn peer_joined(&self, peer: PeerId) -> crate::Result<()> {
        let stale = {
            let mut inner = self.inner.borrow_mut();
            match inner.links.get(&peer).map(|link| link.phase) {
                Some(phase) if phase != PeerPhase::Failed => {
                    debug!("{peer} announced itself again, connection already tracked");
                    return Ok(());
                }
                // a failed link is replaced by this externally triggered
                // renegotiation
                Some(_) => inner.links.remove(&peer).map(|link| link.transport),
                None => None,
            }
        };
        if let Some(transport) = stale {
            debug!("replacing failed connection to {peer}");
            transport.close();
        }

        debug!("{peer} joined the session, offering a connection");
        let (transport, seq) = self.open_link(&peer, PeerRole::Initiator)?;
        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(source) => {
                self.abandon_link(&peer, seq);
                return Err(Error::Negotiation { peer, source });
            }
        };
        if !self.link_still_active(&peer, seq) {
            return Ok(());
        }
        let (session, from) = self.routing_ids();
        self.send_signal(SignalMessage::Offer {
            session,
            from,
            to: peer,
            sdp: offer,
        });
        Ok(())
    }

    /// A peer offered us a connection: answer it, unless we already hold
    /// one towards that peer.
    async fn remote_offer(&self, peer: PeerId, sdp: String) -> crate::Result<()> {
        let displaced = {
            let mut inner = self.inner.borrow_mut();
            let local_id = inner.local_id.clone();
            match inner.links.get(&peer).map(|link| (link.role, link.phase)) {
                None => None,
                // both sides offered at once; the lexicographically smaller
                // id keeps the initiator role and the other side yields
                Some((PeerRole::Initiator, PeerPhase::Negotiating)) if peer < local_id => {
                    inner.links.remove(&peer).map(|link| link.transport)
                }
                Some((_, PeerPhase::Failed)) => {
                    inner.links.remove(&peer).map(|link| link.transport)
                }
                Some(_) => {
                    debug!("ignoring unexpected offer from {peer}, connection already tracked");
                    return Ok(());
                }
            }
        };
        if let Some(transport) = displaced {
            debug!("yielding initiator role to {peer}");
            transport.close();
        }

        debug!("{peer} offered a connection, answering");
        let (transport, seq) = self.open_link(&peer, PeerRole::Responder)?;
        let answer = match transport.create_answer(&sdp).await {
            Ok(answer) => answer,
            Err(source) => {
                self.abandon_link(&peer, seq);
                return Err(Error::Negotiation { peer, source });
            }
        };
        if !self.link_still_active(&peer, seq) {
            return Ok(());
        }
        let (session, from) = self.routing_ids();
        self.send_signal(SignalMessage::Answer {
            session,
            from,
            to: peer.clone(),
            sdp: answer,
        });
        self.remote_description_applied(&peer, seq).await;
        Ok(())
    }

    /// The peer we offered a connection to accepted it.
    async fn remote_answer(&self, peer: PeerId, sdp: String) -> crate::Result<()> {
        let accepting = {
            let inner = self.inner.borrow();
            match inner.links.get(&peer) {
                Some(link)
                    if link.role == PeerRole::Initiator
                        && link.phase == PeerPhase::Negotiating
                        && !link.remote_ready =>
                {
                    Some((link.transport.clone(), link.seq))
                }
                _ => None,
            }
        };
        let Some((transport, seq)) = accepting else {
            // each peer answers at most once per session; duplicates are
            // dropped instead of recreating state
            debug!("ignoring unexpected answer from {peer}");
            return Ok(());
        };
        if let Err(source) = transport.accept_answer(&sdp).await {
            return Err(Error::Negotiation { peer, source });
        }
        self.remote_description_applied(&peer, seq).await;
        Ok(())
    }

    /// A trickle candidate arrived. Candidates may legitimately precede the
    /// connection or its answer; they are buffered until a remote
    /// description is in place.
    async fn remote_candidate(&self, peer: PeerId, candidate: IceCandidate) -> crate::Result<()> {
        let transport = {
            let mut inner = self.inner.borrow_mut();
            match inner.links.get_mut(&peer) {
                Some(link) if link.remote_ready => link.transport.clone(),
                Some(link) => {
                    link.pending_candidates.push(candidate);
                    return Ok(());
                }
                None => {
                    inner.early_candidates.entry(peer).or_default().push(candidate);
                    return Ok(());
                }
            }
        };
        transport
            .add_remote_candidate(&candidate)
            .await
            .map_err(|source| Error::Negotiation { peer, source })
    }

    /// A peer said goodbye: drop its connection right away instead of
    /// waiting for the transport to notice.
    fn peer_left(&self, peer: &PeerId) {
        let (link, events) = {
            let mut inner = self.inner.borrow_mut();
            inner.early_candidates.remove(peer);
            (inner.links.remove(peer), inner.events.clone())
        };
        let Some(link) = link else {
            debug!("{peer} left but no connection was tracked");
            return;
        };
        debug!("{peer} left the session");
        link.transport.close();
        if let Some(events) = events {
            events.on_peer_left(peer);
        }
    }

    /// Creates a transport for `peer`, wires its callbacks, mirrors the
    /// local capture onto it and tracks it. The link is inserted before any
    /// asynchronous negotiation step so that re-entrant messages for the
    /// same peer observe it and back off.
    fn open_link(&self, peer: &PeerId, role: PeerRole) -> crate::Result<(P::Transport, u64)> {
        let (platform, local_stream, seq) = {
            let mut inner = self.inner.borrow_mut();
            let seq = inner.next_link_seq;
            inner.next_link_seq += 1;
            (inner.platform.clone(), inner.local_stream.clone(), seq)
        };
        let transport = platform.create_transport().map_err(|source| Error::Negotiation {
            peer: peer.clone(),
            source,
        })?;
        self.wire_transport(peer, seq, &transport);
        if let Some(stream) = local_stream.as_ref() {
            transport.attach_outbound(stream);
        }
        self.inner.borrow_mut().links.insert(
            peer.clone(),
            PeerLink {
                seq,
                transport: transport.clone(),
                role,
                phase: PeerPhase::Negotiating,
                remote_ready: false,
                pending_candidates: Vec::new(),
                remote_stream: None,
            },
        );
        Ok((transport, seq))
    }

    /// Registers the transport-level observers for one link. Every callback
    /// re-checks the lifecycle and that the link it was created for is
    /// still the tracked one, since the coordinator may have been cleaned
    /// up or the link replaced while the transport was still live.
    fn wire_transport(&self, peer: &PeerId, seq: u64, transport: &P::Transport) {
        {
            let this = self.clone();
            let peer = peer.clone();
            transport.on_local_candidate(Box::new(move |candidate| {
                let routing = {
                    let inner = this.inner.borrow();
                    if inner.lifecycle != Lifecycle::Active {
                        return;
                    }
                    match inner.links.get(&peer) {
                        Some(link) if link.seq == seq => {
                            (inner.session_id.clone(), inner.local_id.clone())
                        }
                        _ => return,
                    }
                };
                let (session, from) = routing;
                this.send_signal(SignalMessage::IceCandidate {
                    session,
                    from,
                    to: peer.clone(),
                    candidate,
                });
            }));
        }
        {
            let this = self.clone();
            let peer = peer.clone();
            transport.on_remote_stream(Box::new(move |stream| {
                let events = {
                    let mut inner = this.inner.borrow_mut();
                    if inner.lifecycle != Lifecycle::Active {
                        return;
                    }
                    let Some(link) = inner.links.get_mut(&peer) else {
                        return;
                    };
                    if link.seq != seq {
                        return;
                    }
                    // a replaced stream overwrites the previous association
                    link.remote_stream = Some(stream.clone());
                    inner.events.clone()
                };
                if let Some(events) = events {
                    events.on_remote_stream(&peer, stream);
                }
            }));
        }
        {
            let this = self.clone();
            let peer = peer.clone();
            transport.on_state_change(Box::new(move |state| {
                let events = {
                    let mut inner = this.inner.borrow_mut();
                    if inner.lifecycle != Lifecycle::Active {
                        return;
                    }
                    let Some(link) = inner.links.get_mut(&peer) else {
                        return;
                    };
                    if link.seq != seq {
                        return;
                    }
                    match state {
                        TransportState::Connected => link.phase = PeerPhase::Connected,
                        // kept tracked: the consumer decides whether to
                        // prompt for a retry
                        TransportState::Failed => link.phase = PeerPhase::Failed,
                        _ => {}
                    }
                    inner.events.clone()
                };
                if let Some(events) = events {
                    events.on_connection_state(&peer, state);
                }
            }));
        }
    }

    /// Marks the link's remote description as applied and feeds it every
    /// candidate buffered so far, in arrival order.
    async fn remote_description_applied(&self, peer: &PeerId, seq: u64) {
        let flushing = {
            let mut inner = self.inner.borrow_mut();
            let mut buffered = inner.early_candidates.remove(peer).unwrap_or_default();
            match inner.links.get_mut(peer) {
                Some(link) if link.seq == seq => {
                    link.remote_ready = true;
                    buffered.append(&mut link.pending_candidates);
                    Some((link.transport.clone(), buffered))
                }
                _ => None,
            }
        };
        let Some((transport, buffered)) = flushing else {
            return;
        };
        for candidate in buffered {
            if let Err(source) = transport.add_remote_candidate(&candidate).await {
                // one bad candidate only costs one path, keep applying the rest
                warn!(
                    "{}",
                    Error::Negotiation {
                        peer: peer.clone(),
                        source
                    }
                );
            }
        }
    }

    /// Drops the link created by this handler after a failed negotiation
    /// step, unless it was already replaced.
    fn abandon_link(&self, peer: &PeerId, seq: u64) {
        let link = {
            let mut inner = self.inner.borrow_mut();
            let ours = inner.links.get(peer).is_some_and(|link| link.seq == seq);
            if ours {
                inner.links.remove(peer)
            } else {
                None
            }
        };
        if let Some(link) = link {
            link.transport.close();
        }
    }

    fn link_still_active(&self, peer: &PeerId, seq: u64) -> bool {
        let inner = self.inner.borrow();
        inner.lifecycle == Lifecycle::Active
            && inner
                .links
                .get(peer)
                .is_some_and(|link| link.seq == seq)
    }

    fn routing_ids(&self) -> (SessionId, PeerId) {
        let inner = self.inner.borrow();
        (inner.session_id.clone(), inner.local_id.clone())
    }

    /// Publishes one signaling message, best effort: failures are logged
    /// and never propagate, the mesh tolerates lost messages.
    pub(crate) fn send_signal(&self, message: SignalMessage) {
        let channel = self.inner.borrow().channel.clone();
        let Some(channel) = channel else {
            debug!("dropping outbound signal, no channel is open");
            return;
        };
        if let Err(source) = channel.send(&message) {
            warn!("{}", Error::SendFailure { source });
        }
    }
}
