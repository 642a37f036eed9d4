use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use lifeline_proto::{RemoteEvent, Role, Signal, SignalPayload};

use crate::config::SupportConfig;
use crate::signaling::{SignalingClient, SignalingError};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] webrtc::Error),
    #[error("signaling transport failed: {0}")]
    Signaling(#[from] SignalingError),
    #[error("malformed control payload: {0}")]
    SignalParse(#[from] serde_json::Error),
}

/// Aggregate connection state reported to the UI layer.
///
/// `Failed` and `Disconnected` are terminal for this manager; the
/// caller discards it and builds a fresh one to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Failed,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Collapse the transport's connection state into the four states the
/// UI cares about. `None` means "no transition worth reporting".
pub(crate) fn map_connection_state(state: RTCPeerConnectionState) -> Option<ConnectionStatus> {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => {
            Some(ConnectionStatus::Connecting)
        }
        RTCPeerConnectionState::Connected => Some(ConnectionStatus::Connected),
        RTCPeerConnectionState::Failed => Some(ConnectionStatus::Failed),
        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
            Some(ConnectionStatus::Disconnected)
        }
        RTCPeerConnectionState::Unspecified => None,
    }
}

/// Decode one data-channel frame into a control event. Corrupt frames
/// are the caller's problem to log and drop; one bad message must never
/// take the channel down.
pub fn parse_remote_event(data: &[u8]) -> Result<RemoteEvent, PeerError> {
    Ok(serde_json::from_slice(data)?)
}

type StatusHandler = Box<dyn Fn(ConnectionStatus) + Send + Sync>;
type TrackHandler = Box<dyn Fn(Arc<TrackRemote>) + Send + Sync>;

/// Owns one WebRTC peer connection bound to a signaling client and a
/// fixed role.
///
/// The viewer proactively opens the ordered `control` data channel; the
/// host receives it passively via the remote-channel callback. ICE
/// candidates discovered locally are forwarded through the relay as
/// they trickle in, and candidates arriving before the remote
/// description are queued by the transport, so no cross-ordering with
/// offer/answer is required.
pub struct PeerConnectionManager {
    role: Role,
    signaling: Arc<SignalingClient>,
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
    status_handler: Arc<StdMutex<Option<StatusHandler>>>,
    track_handler: Arc<StdMutex<Option<TrackHandler>>>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<RemoteEvent>>>,
}

impl PeerConnectionManager {
    /// Build the transport, register all listeners, and (viewer side)
    /// open the control channel.
    pub async fn initialize(
        role: Role,
        signaling: Arc<SignalingClient>,
        config: &SupportConfig,
    ) -> Result<Self, PeerError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        let status_handler: Arc<StdMutex<Option<StatusHandler>>> = Arc::new(StdMutex::new(None));
        let track_handler: Arc<StdMutex<Option<TrackHandler>>> = Arc::new(StdMutex::new(None));
        let data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>> = Arc::new(RwLock::new(None));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let status_for_state = status_handler.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let status_handler = status_for_state.clone();
            Box::pin(async move {
                debug!(?state, "peer connection state changed");
                if let Some(status) = map_connection_state(state) {
                    if let Some(handler) = status_handler.lock().expect("status lock").as_ref() {
                        handler(status);
                    }
                }
            })
        }));

        // Trickle every locally discovered candidate through the relay.
        let signaling_for_ice = signaling.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let signaling = signaling_for_ice.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(err) => {
                        warn!(%err, "failed to serialize local ICE candidate");
                        return;
                    }
                };
                let payload = SignalPayload::IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                };
                if let Err(err) = signaling.send_signal(payload).await {
                    warn!(%err, "failed to relay ICE candidate");
                }
            })
        }));

        let track_for_remote = track_handler.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let track_handler = track_for_remote.clone();
            Box::pin(async move {
                debug!(kind = %track.kind(), "remote track arrived");
                if let Some(handler) = track_handler.lock().expect("track lock").as_ref() {
                    handler(track);
                }
            })
        }));

        match role {
            Role::Viewer => {
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc
                    .create_data_channel(&config.data_channel_label, Some(init))
                    .await?;
                wire_data_channel(dc.clone(), events_tx);
                *data_channel.write().await = Some(dc);
            }
            Role::Host => {
                let slot = data_channel.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let slot = slot.clone();
                    let events_tx = events_tx.clone();
                    Box::pin(async move {
                        debug!(label = %dc.label(), "remote data channel arrived");
                        wire_data_channel(dc.clone(), events_tx);
                        *slot.write().await = Some(dc);
                    })
                }));
            }
        }

        Ok(Self {
            role,
            signaling,
            pc,
            data_channel,
            senders: Mutex::new(Vec::new()),
            status_handler,
            track_handler,
            events_rx: StdMutex::new(Some(events_rx)),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Register the connection-state observer.
    pub fn set_status_handler<F>(&self, handler: F)
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        *self.status_handler.lock().expect("status lock") = Some(Box::new(handler));
    }

    /// Register the remote-track observer (viewer side: the host's
    /// screen stream).
    pub fn set_track_handler<F>(&self, handler: F)
    where
        F: Fn(Arc<TrackRemote>) + Send + Sync + 'static,
    {
        *self.track_handler.lock().expect("track lock") = Some(Box::new(handler));
    }

    /// Take the stream of control events received over the data
    /// channel. Yields once; later calls return None.
    pub fn remote_events(&self) -> Option<mpsc::UnboundedReceiver<RemoteEvent>> {
        self.events_rx.lock().expect("events lock").take()
    }

    /// Attach a local media track (the host's screen capture) to the
    /// transport.
    pub async fn add_local_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), PeerError> {
        let sender = self.pc.add_track(track).await?;
        self.senders.lock().await.push(sender);
        Ok(())
    }

    /// Create the session offer, install it locally, and relay it.
    pub async fn create_offer(&self) -> Result<(), PeerError> {
        let offer = self.pc.create_offer(None).await.map_err(log_negotiation)?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(log_negotiation)?;
        self.signaling.send_signal(SignalPayload::Offer { sdp }).await?;
        Ok(())
    }

    /// Create the answering description, install it locally, and relay
    /// it.
    pub async fn create_answer(&self) -> Result<(), PeerError> {
        let answer = self.pc.create_answer(None).await.map_err(log_negotiation)?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(log_negotiation)?;
        self.signaling
            .send_signal(SignalPayload::Answer { sdp })
            .await?;
        Ok(())
    }

    /// Apply one signal from the opposite role. Failures are logged and
    /// returned, never retried here: a stale description would corrupt
    /// later negotiation state, so the caller decides whether to
    /// restart.
    pub async fn handle_signal(&self, signal: Signal) -> Result<(), PeerError> {
        match signal.payload {
            SignalPayload::Offer { sdp } => {
                let offer = RTCSessionDescription::offer(sdp).map_err(log_negotiation)?;
                self.pc
                    .set_remote_description(offer)
                    .await
                    .map_err(log_negotiation)?;
                self.create_answer().await
            }
            SignalPayload::Answer { sdp } => {
                let answer = RTCSessionDescription::answer(sdp).map_err(log_negotiation)?;
                self.pc
                    .set_remote_description(answer)
                    .await
                    .map_err(log_negotiation)?;
                Ok(())
            }
            SignalPayload::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                let init = RTCIceCandidateInit {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                    username_fragment: None,
                };
                self.pc
                    .add_ice_candidate(init)
                    .await
                    .map_err(log_negotiation)?;
                Ok(())
            }
        }
    }

    /// Ship one control event over the data channel. Returns false when
    /// the channel is absent or not yet open: a dropped control message
    /// is not fatal to the session, so this never errors.
    pub async fn send_remote_event(&self, event: &RemoteEvent) -> bool {
        let guard = self.data_channel.read().await;
        let Some(dc) = guard.as_ref() else {
            return false;
        };
        if dc.ready_state() != RTCDataChannelState::Open {
            return false;
        }
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "failed to encode control event");
                return false;
            }
        };
        dc.send(&Bytes::from(payload)).await.is_ok()
    }

    /// Release everything this manager owns: local media senders, the
    /// data channel, the transport, and the registered handlers. This
    /// is the only path that frees capture handles — every exit path
    /// must come through here.
    pub async fn close(&self) {
        for sender in self.senders.lock().await.drain(..) {
            if let Err(err) = sender.stop().await {
                warn!(%err, "failed to stop local track sender");
            }
        }
        if let Some(dc) = self.data_channel.write().await.take() {
            if let Err(err) = dc.close().await {
                warn!(%err, "failed to close data channel");
            }
        }
        if let Err(err) = self.pc.close().await {
            warn!(%err, "failed to close peer connection");
        }
        *self.status_handler.lock().expect("status lock") = None;
        *self.track_handler.lock().expect("track lock") = None;
    }
}

fn log_negotiation(err: webrtc::Error) -> webrtc::Error {
    error!(%err, "negotiation step failed");
    err
}

/// Install message plumbing on a data channel, whichever side created
/// it. Corrupt JSON is logged and dropped; the channel stays up.
fn wire_data_channel(dc: Arc<RTCDataChannel>, events_tx: mpsc::UnboundedSender<RemoteEvent>) {
    dc.on_open(Box::new(|| {
        Box::pin(async move {
            debug!("control channel open");
        })
    }));
    dc.on_close(Box::new(|| {
        Box::pin(async move {
            debug!("control channel closed");
        })
    }));
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events_tx = events_tx.clone();
        Box::pin(async move {
            match parse_remote_event(&msg.data) {
                Ok(event) => {
                    let _ = events_tx.send(event);
                }
                Err(err) => {
                    warn!(%err, "discarding malformed control message");
                }
            }
        })
    }));
}
