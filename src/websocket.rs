//! # WebSocket Audio Gateway
//!
//! Each client connects to `/ws` and gets one [`GatewaySocket`] actor, which owns that
//! client's [`Session`]. The actor never touches the transcription engine: on commit it
//! submits a job to the shared inference worker and goes straight back to reading frames.
//!
//! ## Data flow:
//! 1. **Binary messages** are appended to the session buffer; fragmented messages are
//!    joined first and count against the buffer cap while they are still arriving
//! 2. **`{"type":"commit"}`** drains and decodes the buffer and queues a job
//! 3. **Results** come back on the session's completion channel, registered as an actor
//!    stream, and are written as `{"type":"final","text":...}` when non-empty
//!
//! ## Connection lifecycle:
//! - Upgrades beyond `max_concurrent_sessions` are refused with 503
//! - The server pings every `heartbeat_interval_secs`; clients silent for
//!   `client_timeout_secs` are dropped
//! - A buffer overflow closes the connection with code 1009 (message too big)
//! - Closing cancels delivery of pending results, never an engine call already running

use crate::audio::session::{Session, SessionState};
use crate::error::GatewayError;
use crate::protocol::{self, ControlMessage, FrameAssembler, Inbound, ServerMessage};
use crate::state::{AppState, SessionSlot};
use crate::transcription::job::CompletionSender;
use crate::transcription::{JobOutcome, TranscriptionJob};

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Actor serving one WebSocket connection.
pub struct GatewaySocket {
    session: Session,
    assembler: FrameAssembler,
    state: AppState,
    results_tx: CompletionSender,
    /// Taken in `started` and registered as a stream on the actor context
    results_rx: Option<mpsc::UnboundedReceiver<JobOutcome>>,
    last_heartbeat: Instant,
    _slot: SessionSlot,
}

impl GatewaySocket {
    pub fn new(state: AppState, slot: SessionSlot) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            session: Session::new(state.config.session.max_buffered_bytes),
            assembler: FrameAssembler::new(state.config.session.max_frame_bytes),
            state,
            results_tx,
            results_rx: Some(results_rx),
            last_heartbeat: Instant::now(),
            _slot: slot,
        }
    }

    fn on_audio(&mut self, bytes: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        match self.session.append_audio(bytes) {
            Ok(()) => {}
            Err(err @ GatewayError::BufferOverflow { .. }) => self.close_for_overflow(err, ctx),
            Err(err) => {
                debug!(session_id = %self.session.id(), "Dropping audio frame: {}", err);
            }
        }
    }

    /// Returns the joined message once the last fragment is in.
    fn on_fragment(
        &mut self,
        item: Item,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Option<ws::Message> {
        if self.session.state() == SessionState::Closed {
            return None;
        }

        match self.assembler.push(item) {
            Ok(Some(message)) => Some(message),
            Ok(None) => {
                let limit = self.state.config.session.max_buffered_bytes;
                let attempted =
                    self.session.buffered_bytes() + self.assembler.pending_audio_bytes();
                if attempted > limit {
                    self.close_for_overflow(GatewayError::BufferOverflow { limit, attempted }, ctx);
                }
                None
            }
            Err(err @ GatewayError::BufferOverflow { .. }) => {
                self.close_for_overflow(err, ctx);
                None
            }
            Err(err) => {
                debug!(session_id = %self.session.id(), "Dropping fragmented message: {}", err);
                None
            }
        }
    }

    fn close_for_overflow(&mut self, err: GatewayError, ctx: &mut ws::WebsocketContext<Self>) {
        warn!(session_id = %self.session.id(), "{}; closing session", err);
        self.state.record_overflow();
        self.session.close();
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Size,
            description: Some("audio buffer limit exceeded".to_string()),
        }));
        ctx.stop();
    }

    fn on_commit(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let buffered_seconds = self.session.buffered_seconds();
        let samples = match self.session.commit() {
            Ok(samples) => samples,
            Err(err @ GatewayError::MalformedAudio { .. }) => {
                warn!(session_id = %self.session.id(), "{}; commit ignored", err);
                self.state.record_malformed_commit();
                return;
            }
            Err(err) => {
                debug!(session_id = %self.session.id(), "Commit ignored: {}", err);
                return;
            }
        };

        let job = TranscriptionJob::new(
            self.session.id(),
            samples,
            self.state.config.transcription.language.as_str(),
            self.results_tx.clone(),
        );

        match self.state.inference.submit(job) {
            Ok(seq) => {
                debug!(
                    session_id = %self.session.id(),
                    seq,
                    in_flight = self.session.in_flight(),
                    "Committed {:.2} seconds of audio",
                    buffered_seconds
                );
            }
            Err(err) => {
                error!(session_id = %self.session.id(), "Cannot queue transcription: {}", err);
                self.session.abandon_commit();
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some(err.to_string()),
                }));
                ctx.stop();
            }
        }
    }

    fn on_transport(&mut self, frame: ws::Message, ctx: &mut ws::WebsocketContext<Self>) {
        match frame {
            ws::Message::Ping(data) => {
                ctx.pong(&data);
            }
            ws::Message::Pong(_) => {}
            ws::Message::Close(reason) => {
                debug!(session_id = %self.session.id(), "Client closed connection: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            // Continuations are joined before classification.
            ws::Message::Continuation(_)
            | ws::Message::Nop
            | ws::Message::Text(_)
            | ws::Message::Binary(_) => {}
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = Duration::from_secs(self.state.config.session.heartbeat_interval_secs);
        let timeout = Duration::from_secs(self.state.config.session.client_timeout_secs);

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(session_id = %act.session.id(), "Client heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for GatewaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.id(), "Session opened");
        self.start_heartbeat(ctx);

        if let Some(results) = self.results_rx.take() {
            ctx.add_stream(UnboundedReceiverStream::new(results));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let pending = self.session.in_flight();
        let last_state = self.session.state();
        let discarded_bytes = self.session.buffered_bytes();
        self.session.close();

        let stats = self.session.stats();
        info!(
            session_id = %self.session.id(),
            state = ?last_state,
            bytes_received = stats.bytes_received,
            discarded_bytes,
            commits = stats.commits,
            malformed_commits = stats.malformed_commits,
            finals_sent = stats.finals_sent,
            pending_results = pending,
            duration_secs = self.session.age_seconds(),
            "Session closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for GatewaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let frame = match msg {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %self.session.id(), "WebSocket protocol error: {}", err);
                ctx.stop();
                return;
            }
        };
        self.last_heartbeat = Instant::now();

        let frame = match frame {
            ws::Message::Continuation(item) => match self.on_fragment(item, ctx) {
                Some(message) => message,
                None => return,
            },
            frame => frame,
        };

        match protocol::demultiplex(frame) {
            Inbound::Audio(bytes) => self.on_audio(&bytes, ctx),
            Inbound::Control(ControlMessage::Commit) => self.on_commit(ctx),
            Inbound::Malformed(err) => {
                debug!(session_id = %self.session.id(), "Ignoring text frame: {}", err);
            }
            Inbound::Transport(frame) => self.on_transport(frame, ctx),
        }
    }
}

/// Results from the inference worker, in submission order.
impl StreamHandler<JobOutcome> for GatewaySocket {
    fn handle(&mut self, outcome: JobOutcome, ctx: &mut Self::Context) {
        debug!(
            session_id = %outcome.session_id,
            seq = outcome.seq,
            disposition = ?outcome.disposition,
            inference_ms = outcome.inference_ms,
            "Result ready"
        );

        let Some(text) = self.session.complete(outcome.text) else {
            return;
        };

        match protocol::encode(&ServerMessage::Final { text }) {
            Ok(json) => {
                ctx.text(json);
                self.state.record_final_sent();
            }
            Err(err) => error!(session_id = %self.session.id(), "Failed to encode result: {}", err),
        }
    }

    // The actor holds a sender, so this stream only ends when the actor does.
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

/// Upgrade `GET /ws` to a WebSocket session.
pub async fn gateway_socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let slot = state.try_acquire_session().map_err(|err| {
        warn!(peer = ?req.peer_addr(), "Refusing WebSocket upgrade: {}", err);
        err
    })?;

    debug!(peer = ?req.peer_addr(), "WebSocket upgrade accepted");
    let socket = GatewaySocket::new(state.get_ref().clone(), slot);

    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(state.config.session.max_frame_bytes)
        .start()
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(gateway_socket));
}
