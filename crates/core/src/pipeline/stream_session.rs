use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesOrdered, Stream, StreamExt};

use crate::pipeline::frame_dispatcher::{DetectionOutcome, FrameDispatcher};
use crate::pipeline::protocol::{ClientEvent, ServerMessage, StreamRequest};
use crate::pipeline::result_publisher::ResultPublisher;
use crate::shared::constants::{MALFORMED_REQUEST_MESSAGE, PROCESSING_ERROR_MESSAGE};
use crate::stream::decoder_process::{
    DecoderEvent, DecoderEventReceiver, DecoderEventSender, DecoderHandle, DecoderLauncher,
    Generation, ProcessEvent,
};
use crate::stream::diagnostics;
use crate::stream::frame_demuxer::FrameDemuxer;
use crate::stream::throttle::{Throttle, ThrottleConfig};

#[derive(Debug)]
pub enum SessionState {
    Idle,
    Streaming(DecoderHandle),
    Closed,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Streaming(_) => "streaming",
            SessionState::Closed => "closed",
        }
    }
}

type InFlight = FuturesOrdered<BoxFuture<'static, DetectionOutcome>>;

/// Owns one client connection's decoder, frame pipeline and notifications.
///
/// Everything a session touches is driven from [`run`](Self::run), one event
/// at a time; only the throttle counters are shared with dispatch tasks.
pub struct StreamSession {
    id: u64,
    state: SessionState,
    generation: Generation,
    frame_counter: u64,
    /// Dispatches of the current generation whose outcome is not yet handled.
    current_in_flight: usize,
    /// The decoder exited; `stream_ended` waits for `current_in_flight` to drain.
    end_pending: bool,
    demuxer: FrameDemuxer,
    throttle: Arc<Throttle>,
    launcher: Arc<dyn DecoderLauncher>,
    dispatcher: FrameDispatcher,
    publisher: ResultPublisher,
    events_tx: DecoderEventSender,
    events_rx: DecoderEventReceiver,
}

impl StreamSession {
    pub fn new(
        id: u64,
        launcher: Arc<dyn DecoderLauncher>,
        dispatcher: FrameDispatcher,
        throttle: ThrottleConfig,
        publisher: ResultPublisher,
    ) -> Self {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            id,
            state: SessionState::Idle,
            generation: 0,
            frame_counter: 0,
            current_in_flight: 0,
            end_pending: false,
            demuxer: FrameDemuxer::new(),
            throttle: Throttle::new(throttle),
            launcher,
            dispatcher,
            publisher,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drives the session until the client goes away.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = ClientEvent> + Unpin,
    {
        log::info!("[session {}] opened", self.id);
        let mut in_flight: InFlight = FuturesOrdered::new();

        loop {
            tokio::select! {
                event = inbound.next() => match event {
                    Some(ClientEvent::Text(text)) => self.on_text(&text),
                    Some(ClientEvent::Error(reason)) => {
                        log::warn!("[session {}] connection error: {reason}", self.id);
                        break;
                    }
                    Some(ClientEvent::Closed) | None => break,
                },
                Some(event) = self.events_rx.recv() => self.on_decoder_event(event, &mut in_flight),
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => self.on_outcome(outcome),
            }
        }

        self.close();
        if !in_flight.is_empty() {
            log::debug!(
                "[session {}] discarding {} in-flight frame(s)",
                self.id,
                in_flight.len()
            );
        }
    }

    fn on_text(&mut self, text: &str) {
        match StreamRequest::parse(text) {
            Ok(request) => self.start_stream(&request.video_url),
            Err(e) => {
                log::warn!("[session {}] malformed request: {e}", self.id);
                self.publisher.publish(ServerMessage::error(MALFORMED_REQUEST_MESSAGE));
            }
        }
    }

    /// Replaces any running decoder with one reading `source`.
    fn start_stream(&mut self, source: &str) {
        self.stop_decoder();
        if self.end_pending {
            self.publish_stream_ended();
        }
        self.generation += 1;
        self.current_in_flight = 0;
        self.demuxer.clear();

        match self
            .launcher
            .launch(source, self.generation, self.events_tx.clone())
        {
            Ok(handle) => {
                log::info!(
                    "[session {}] streaming {source} (generation {})",
                    self.id,
                    self.generation
                );
                self.state = SessionState::Streaming(handle);
            }
            Err(e) => {
                log::error!("[session {}] {e}", self.id);
                self.state = SessionState::Idle;
                self.publisher.publish(ServerMessage::error(PROCESSING_ERROR_MESSAGE));
            }
        }
    }

    fn stop_decoder(&mut self) {
        if let SessionState::Streaming(mut handle) =
            std::mem::replace(&mut self.state, SessionState::Idle)
        {
            handle.kill();
        }
    }

    fn close(&mut self) {
        self.stop_decoder();
        self.state = SessionState::Closed;
        log::info!("[session {}] closed", self.id);
    }

    fn on_decoder_event(&mut self, event: DecoderEvent, in_flight: &mut InFlight) {
        let DecoderEvent { generation, event } = event;
        if let ProcessEvent::Diagnostic(line) = &event {
            diagnostics::log_line(generation, line);
            return;
        }

        let current =
            generation == self.generation && matches!(self.state, SessionState::Streaming(_));
        if !current {
            log::debug!(
                "[session {}] discarding {} from generation {generation} while {} at generation {}",
                self.id,
                event_name(&event),
                self.state.name(),
                self.generation
            );
            return;
        }

        match event {
            ProcessEvent::Output(chunk) => self.on_output(&chunk, in_flight),
            ProcessEvent::Fault(reason) => {
                log::error!("[session {}] decoder fault: {reason}", self.id);
                self.publisher.publish(ServerMessage::error(PROCESSING_ERROR_MESSAGE));
            }
            ProcessEvent::Exited(report) => {
                log::info!("[session {}] stream ended: {report}", self.id);
                self.state = SessionState::Idle;
                self.demuxer.clear();
                if self.current_in_flight == 0 {
                    self.publish_stream_ended();
                } else {
                    log::debug!(
                        "[session {}] holding stream_ended for {} in-flight frame(s)",
                        self.id,
                        self.current_in_flight
                    );
                    self.end_pending = true;
                }
            }
            ProcessEvent::Diagnostic(_) => {}
        }
    }

    fn on_output(&mut self, chunk: &[u8], in_flight: &mut InFlight) {
        for frame in self.demuxer.extract(chunk) {
            self.frame_counter += 1;
            let sequence = self.frame_counter;

            let Some(permit) = self.throttle.try_admit() else {
                log::debug!(
                    "[session {}] dropping frame {sequence}: {} in flight",
                    self.id,
                    self.throttle.in_flight()
                );
                continue;
            };

            self.current_in_flight += 1;
            let dispatcher = self.dispatcher.clone();
            let generation = self.generation;
            in_flight.push_back(Box::pin(async move {
                let outcome = dispatcher.dispatch(frame, sequence, generation).await;
                drop(permit);
                outcome
            }));
        }
    }

    fn on_outcome(&mut self, outcome: DetectionOutcome) {
        if outcome.generation != self.generation {
            log::debug!(
                "[session {}] discarding frame {} from superseded generation {}",
                self.id,
                outcome.sequence,
                outcome.generation
            );
            return;
        }
        self.current_in_flight = self.current_in_flight.saturating_sub(1);
        if let Some(message) = outcome.into_message() {
            self.publisher.publish(message);
        }
        if self.end_pending && self.current_in_flight == 0 {
            self.publish_stream_ended();
        }
    }

    fn publish_stream_ended(&mut self) {
        self.end_pending = false;
        self.publisher.publish(ServerMessage::StreamEnded);
    }
}

fn event_name(event: &ProcessEvent) -> &'static str {
    match event {
        ProcessEvent::Output(_) => "output",
        ProcessEvent::Diagnostic(_) => "diagnostic",
        ProcessEvent::Fault(_) => "fault",
        ProcessEvent::Exited(_) => "exit",
    }
}
