//! Recording lifecycle state machine
//!
//! [`Recorder`] owns the transport, the capture loop and the media
//! collaborators. It never blocks and never spawns: every input is a method
//! call that runs to completion, and asynchronous inputs arrive through the
//! channels in [`RecorderInputs`]. [`crate::RecorderDriver`] wires both
//! halves to a tokio task.

use crate::config::RecorderConfig;
use crate::event::{EventBus, EventStream, RecorderEvent};
use crate::progress::{ProgressAggregator, ProgressState};
use crate::session::{RecorderState, ReplaySources, Session};
use camstream_core::{
    Clock, Connector, MonotonicClock, RecorderError, RecorderResult, Transport, TransportEvent,
    TransportEventReceiver, TransportSignal, WebSocketConnector,
};
use camstream_media::{
    AcquireRequest, CapabilityChecker, CaptureLoop, CaptureSurface, FrameEncoder, MediaError,
    MediaEvent, MediaEventReceiver, MediaEventSender, MediaSource, RawFrameEncoder,
    StaticCapabilities, TickOutcome,
};
use camstream_protocol::{dispatch, ClientCommand, CommandHandler, PreviewArgs, StopArgs};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Receivers the recorder's asynchronous inputs arrive on
#[derive(Debug)]
pub struct RecorderInputs {
    /// Connection events
    pub transport_events: TransportEventReceiver,
    /// Media source events
    pub media_events: MediaEventReceiver,
}

/// Fluent builder for a [`Recorder`]
pub struct RecorderBuilder {
    config: RecorderConfig,
    source: Option<Box<dyn MediaSource>>,
    encoder: Option<Box<dyn FrameEncoder>>,
    capabilities: Option<Box<dyn CapabilityChecker>>,
    clock: Option<Arc<dyn Clock>>,
    connector: Option<Box<dyn Connector>>,
}

impl RecorderBuilder {
    pub(crate) fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            source: None,
            encoder: None,
            capabilities: None,
            clock: None,
            connector: None,
        }
    }

    /// Capture device (required)
    pub fn media_source(mut self, source: impl MediaSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Frame encoder, raw RGBA by default
    pub fn encoder(mut self, encoder: impl FrameEncoder + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    /// Capability checker, everything supported by default
    pub fn capabilities(mut self, capabilities: impl CapabilityChecker + 'static) -> Self {
        self.capabilities = Some(Box::new(capabilities));
        self
    }

    /// Time source, monotonic by default
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Connection factory, WebSocket by default
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Build the recorder and the receivers of its inputs
    pub fn build(self) -> RecorderResult<(Recorder, RecorderInputs)> {
        self.config.validate()?;

        let source = self.source.ok_or_else(|| RecorderError::InvalidConfiguration {
            message: "A media source is required".to_string(),
        })?;
        let capture = CaptureLoop::new(self.config.video.fps)?;

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();

        let connector = self
            .connector
            .unwrap_or_else(|| Box::new(WebSocketConnector::new()));
        let transport = Transport::new(self.config.transport_config(), connector, transport_tx);

        let recorder = Recorder {
            session: Session::new(),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            transport,
            source,
            encoder: self
                .encoder
                .unwrap_or_else(|| Box::new(RawFrameEncoder::new())),
            capabilities: self
                .capabilities
                .unwrap_or_else(|| Box::new(StaticCapabilities::supported())),
            media_events: media_tx,
            capture,
            surface: None,
            progress: ProgressAggregator::new(),
            events: EventBus::new(),
            replay: ReplaySources::default(),
            live_view_visible: false,
            built: false,
            unloaded: false,
            user_media_deadline: None,
            user_media_retry_at: None,
            config: self.config,
        };

        info!(
            session = %recorder.session.id(),
            fps = recorder.config.video.fps,
            width = recorder.config.video.width,
            height = recorder.config.video.height,
            audio = recorder.config.audio.enabled,
            "Recorder created"
        );

        Ok((
            recorder,
            RecorderInputs {
                transport_events: transport_rx,
                media_events: media_rx,
            },
        ))
    }

    /// Build the recorder and run it on the current tokio runtime
    pub fn spawn(
        self,
    ) -> RecorderResult<(
        crate::RecorderHandle,
        tokio::task::JoinHandle<RecorderResult<()>>,
    )> {
        let (recorder, inputs) = self.build()?;
        Ok(crate::RecorderDriver::new(recorder, inputs).spawn())
    }
}

/// The recording lifecycle controller
pub struct Recorder {
    config: RecorderConfig,
    session: Session,
    clock: Arc<dyn Clock>,
    transport: Transport,
    source: Box<dyn MediaSource>,
    encoder: Box<dyn FrameEncoder>,
    capabilities: Box<dyn CapabilityChecker>,
    media_events: MediaEventSender,
    capture: CaptureLoop,
    surface: Option<CaptureSurface>,
    progress: ProgressAggregator,
    events: EventBus,
    replay: ReplaySources,
    live_view_visible: bool,
    built: bool,
    unloaded: bool,
    user_media_deadline: Option<f64>,
    user_media_retry_at: Option<f64>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("session", &self.session.id())
            .field("state", &self.session.state())
            .field("transport", &self.transport)
            .field("capturing", &self.capture.is_active())
            .field("unloaded", &self.unloaded)
            .finish()
    }
}

impl Recorder {
    /// Start building a recorder
    pub fn builder(config: RecorderConfig) -> RecorderBuilder {
        RecorderBuilder::new(config)
    }

    /// Listen to every event, errors included
    pub fn subscribe(&mut self) -> EventStream {
        self.events.subscribe()
    }

    /// Listen to every event except errors
    pub fn subscribe_lifecycle(&mut self) -> EventStream {
        self.events.subscribe_lifecycle()
    }

    /// Check capabilities and open the connection
    ///
    /// Capability failures are returned and nothing is opened.
    pub fn build(&mut self) -> RecorderResult<()> {
        if self.unloaded {
            return Err(RecorderError::Unloaded);
        }
        debug!("Recorder: build()");

        self.capabilities
            .check_recording_capabilities()
            .and_then(|_| self.capabilities.check_buffer_types())
            .map_err(|e| RecorderError::Capability {
                reason: e.to_string(),
            })?;

        self.built = true;
        self.transport.connect();
        Ok(())
    }

    /// Start capturing frames
    ///
    /// Fails without changing state while the device is not acquired.
    pub fn record(&mut self) -> RecorderResult<()> {
        if self.unloaded {
            return Err(RecorderError::Unloaded);
        }
        if !self.source.is_ready() {
            warn!("Cannot record before the device is ready");
            return Err(MediaError::CaptureNotActive.into());
        }
        debug!("Recorder: record()");

        self.emit(RecorderEvent::Recording);

        let now = self.clock.now_ms();
        self.surface = Some(self.source.create_capture_surface());
        self.session.begin_recording();
        self.capture.start(now);

        if let Err(e) = self.source.record_audio() {
            self.emit_error(e.into());
        }
        Ok(())
    }

    /// Pause capture
    pub fn pause(&mut self) {
        if self.unloaded {
            return;
        }
        debug!("Recorder: pause()");

        self.source.pause();
        self.capture.pause();
        if self.session.state == RecorderState::Recording {
            self.session.state = RecorderState::Paused;
        }
        self.emit(RecorderEvent::Paused);
    }

    /// Resume capture without counting the paused time
    pub fn resume(&mut self) {
        if self.unloaded {
            return;
        }
        debug!("Recorder: resume()");

        self.emit(RecorderEvent::Resuming);

        let now = self.clock.now_ms();
        self.capture.resume(now);
        self.source.resume();
        if self.session.state == RecorderState::Paused {
            self.session.state = RecorderState::Recording;
        }
    }

    /// Stop recording and send the summary
    pub fn stop(&mut self, limit_reached: bool) -> RecorderResult<()> {
        if self.unloaded {
            return Err(RecorderError::Unloaded);
        }
        debug!(limit_reached, "Recorder: stop()");

        self.emit(RecorderEvent::Stopping { limit_reached });
        self.reset();

        self.session.stop_time = Some(self.clock.now_ms());

        let stats = &self.session.stats;
        let avg_fps = stats.average_fps();
        let mut args = StopArgs {
            frames_count: stats.frames_count,
            video_type: self.config.video.video_type,
            avg_fps,
            samples_count: None,
            sample_rate: None,
        };
        if self.config.audio.enabled {
            args.samples_count = Some(stats.samples_count);
            args.sample_rate = self.source.audio_sample_rate();
        }

        info!(
            frames = args.frames_count,
            avg_fps,
            bytes = stats.bytes_sum,
            "Recording stopped"
        );

        self.session.avg_fps = Some(avg_fps);
        self.session.state = RecorderState::Stopping;
        self.write_command(ClientCommand::Stop(args))
    }

    /// Discard the recording and go back to the live view
    pub fn back(&mut self) -> RecorderResult<()> {
        if self.unloaded {
            return Err(RecorderError::Unloaded);
        }
        debug!("Recorder: back()");

        self.live_view_visible = true;
        self.reset();
        self.session.state = RecorderState::Ready;
        self.write_command(ClientCommand::Back {})
    }

    /// Tear everything down; absorbing
    pub fn unload(&mut self, cause: Option<&str>) {
        if self.unloaded {
            return;
        }
        info!(cause = cause.unwrap_or("none"), "Recorder: unload()");

        self.events.clear();
        self.reset();

        self.user_media_deadline = None;
        self.user_media_retry_at = None;

        if self.session.submitting {
            // The server disconnects by itself once the submit is done.
            self.transport.release_to_server();
        } else {
            // Free the server's temporary files right away.
            self.transport.end();
        }

        self.unloaded = true;
        self.session.state = RecorderState::Unloaded;
    }

    /// Release capture resources and clear transient results
    ///
    /// Does nothing when there is nothing to release.
    pub fn reset(&mut self) {
        if !self.needs_reset() {
            debug!("Recorder: nothing to reset");
            return;
        }
        debug!("Recorder: reset()");

        self.emit(RecorderEvent::Resetting);

        self.capture.stop();
        self.replay.clear();
        self.source.stop();
        self.surface = None;

        self.session.clear_results();
        self.progress.reset();

        if self.session.state == RecorderState::Previewing {
            self.session.state = RecorderState::Idle;
        }
    }

    fn needs_reset(&self) -> bool {
        self.capture.is_active()
            || self.surface.is_some()
            || self.source.is_ready()
            || self.session.key.is_some()
            || self.session.avg_fps.is_some()
            || !self.progress.is_empty()
            || !self.replay.is_empty()
            || self.session.state == RecorderState::Previewing
    }

    /// Whether the recording is complete and cleaned up
    pub fn validate(&self) -> bool {
        self.transport.is_connected()
            && self.session.stats.frames_count > 0
            && self.surface.is_none()
    }

    /// Whether frames are being captured right now
    pub fn is_recording(&self) -> bool {
        self.capture.is_active()
            && !self.capture.is_paused()
            && !self.source.is_paused()
            && !self.session.notifying
    }

    /// Whether the capture ticker must run
    pub fn is_capturing(&self) -> bool {
        self.capture.is_active()
    }

    /// Mark the surrounding form as submitting
    pub fn set_submitting(&mut self, submitting: bool) {
        debug!(submitting, "Submit state changed");
        self.session.submitting = submitting;
    }

    /// Mark a blocking overlay as shown
    pub fn set_notifying(&mut self, notifying: bool) {
        self.session.notifying = notifying;
    }

    /// Hide the live view
    pub fn hide(&mut self) {
        self.live_view_visible = false;
    }

    /// Run one scheduler tick; `None` when the frame failed
    pub fn tick(&mut self) -> Option<TickOutcome> {
        if self.unloaded {
            return Some(TickOutcome::Inactive);
        }
        let surface = match self.surface.as_mut() {
            Some(surface) => surface,
            None => return Some(TickOutcome::Inactive),
        };

        let now = self.clock.now_ms();
        let result = self.capture.tick(
            now,
            self.source.as_mut(),
            self.encoder.as_mut(),
            surface,
            &mut self.session.stats,
            &mut self.transport,
        );

        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "Frame capture failed");
                self.emit_error(e.into());
                None
            }
        }
    }

    /// Apply a connection event
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> RecorderResult<()> {
        if self.unloaded {
            return Ok(());
        }

        let now = self.clock.now_ms();
        let replay_shown = self.session.state == RecorderState::Previewing;

        for signal in self.transport.handle_event(event, now, replay_shown) {
            match signal {
                TransportSignal::Connected => self.emit(RecorderEvent::Connected),
                TransportSignal::Reconnected => self.emit(RecorderEvent::Reconnected),
                TransportSignal::Ended => self.emit(RecorderEvent::Ended),
                TransportSignal::Data(text) => {
                    if let Err(e) = dispatch(&text, self) {
                        warn!(error = %e, "Dropping malformed control frame");
                        self.emit_error(e);
                    }
                }
                TransportSignal::Error(e) => self.emit_error(e),
                TransportSignal::Fatal(e) => {
                    // Listeners are detached by unload, so report first.
                    self.emit_error(e.clone());
                    self.unload(Some(&e.to_string()));
                    break;
                }
            }
        }
        Ok(())
    }

    /// Apply a media source event
    ///
    /// A device denial with no error listener attached is returned as a
    /// fatal [`RecorderError::DeviceAccess`].
    pub fn handle_media_event(&mut self, event: MediaEvent) -> RecorderResult<()> {
        if self.unloaded {
            return Ok(());
        }

        match event {
            MediaEvent::Ready => self.on_user_media_ready(),
            MediaEvent::AudioSample(sample) => {
                if !self.capture.is_active() {
                    debug!("Dropping audio sample outside a recording");
                    return Ok(());
                }
                self.session.stats.samples_count += 1;
                self.transport.write_binary(sample.to_buffer());
            }
            MediaEvent::Denied(e) => {
                self.user_media_deadline = None;
                let reason = e.to_string();

                if self.events.has_error_listener() {
                    self.emit_error(RecorderError::DeviceAccess {
                        reason,
                        handled: true,
                    });
                    let retry_at = self.clock.now_ms() + self.user_media_timeout_ms();
                    debug!(retry_at, "Retrying device access later");
                    self.user_media_retry_at = Some(retry_at);
                } else {
                    error!(%reason, "Device access denied and nobody listens for errors");
                    return Err(RecorderError::DeviceAccess {
                        reason,
                        handled: false,
                    });
                }
            }
            MediaEvent::Error(e) => self.emit_error(e.into()),
        }
        Ok(())
    }

    /// Fire due timers
    pub fn poll_timers(&mut self) {
        if self.unloaded {
            return;
        }
        let now = self.clock.now_ms();

        if matches!(self.user_media_deadline, Some(at) if at <= now) {
            self.user_media_deadline = None;
            if !self.source.is_ready() {
                self.emit_error(RecorderError::NoDeviceAccess {
                    timeout_ms: self.config.timeouts.user_media.as_millis() as u64,
                });
            }
        }

        if matches!(self.user_media_retry_at, Some(at) if at <= now) {
            self.user_media_retry_at = None;
            self.load_user_media();
        }

        if self.transport.poll(now) {
            debug!("Reconnect attempt started");
        }
    }

    /// Earliest pending timer, in clock milliseconds
    pub fn next_deadline(&self) -> Option<f64> {
        [
            self.user_media_deadline,
            self.user_media_retry_at,
            self.transport.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .reduce(f64::min)
    }

    /// Current clock time in milliseconds
    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    fn user_media_timeout_ms(&self) -> f64 {
        self.config.timeouts.user_media.as_secs_f64() * 1000.0
    }

    fn load_user_media(&mut self) {
        if self.source.is_ready()
            && matches!(
                self.session.state,
                RecorderState::Ready
                    | RecorderState::Recording
                    | RecorderState::Paused
                    | RecorderState::Stopping
            )
        {
            debug!(state = %self.session.state, "Device already acquired");
            return;
        }
        debug!("Recorder: loadUserMedia()");

        self.user_media_deadline = Some(self.clock.now_ms() + self.user_media_timeout_ms());
        self.user_media_retry_at = None;
        if !matches!(self.session.state, RecorderState::Previewing) {
            self.session.state = RecorderState::AwaitingMedia;
        }

        let request = AcquireRequest {
            audio: self.config.audio.enabled,
            width: self.config.video.width,
            height: self.config.video.height,
            sample_rate: self.config.audio.sample_rate,
        };
        if let Err(e) = self.source.start(request, self.media_events.clone()) {
            warn!(error = %e, "Device access request failed");
            self.emit_error(e.into());
        }
    }

    fn on_user_media_ready(&mut self) {
        debug!("Recorder: onUserMediaReady()");

        self.user_media_deadline = None;
        self.session.stats.frames_count = 0;
        self.session.stats.samples_count = 0;
        self.session.submitting = false;
        self.live_view_visible = true;

        if matches!(
            self.session.state,
            RecorderState::Idle | RecorderState::AwaitingMedia
        ) {
            self.session.state = RecorderState::Ready;
        }
        self.emit(RecorderEvent::Ready);
    }

    fn write_command(&mut self, command: ClientCommand) -> RecorderResult<()> {
        let frame = command.to_frame()?;
        match self.transport.send_command(command.name(), frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                if !matches!(e, RecorderError::Unloaded) {
                    self.emit_error(e.clone());
                }
                Err(e)
            }
        }
    }

    fn emit(&mut self, event: RecorderEvent) {
        self.events.emit(event);
    }

    fn emit_error(&mut self, error: RecorderError) {
        self.events.emit(RecorderEvent::Error { error });
    }

    /// Lifecycle state
    pub fn state(&self) -> RecorderState {
        self.session.state
    }

    /// Session data
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Key assigned at preview
    pub fn key(&self) -> Option<&str> {
        self.session.key()
    }

    /// Average frame rate computed at stop
    pub fn avg_fps(&self) -> Option<f64> {
        self.session.avg_fps
    }

    /// Sample rate of the captured audio
    pub fn audio_sample_rate(&self) -> Option<u32> {
        self.source.audio_sample_rate()
    }

    /// Whether device access was granted
    pub fn is_ready(&self) -> bool {
        self.source.is_ready()
    }

    /// Whether the source is paused
    pub fn is_paused(&self) -> bool {
        self.source.is_paused()
    }

    /// Whether [`Recorder::unload`] ran
    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    /// Whether [`Recorder::build`] succeeded
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Whether the live view is shown
    pub fn is_live_view_visible(&self) -> bool {
        self.live_view_visible
    }

    /// Whether a capture surface is allocated
    pub fn has_capture_surface(&self) -> bool {
        self.surface.is_some()
    }

    /// Playback locators of the last preview
    pub fn replay_sources(&self) -> &ReplaySources {
        &self.replay
    }

    /// Latest server-confirmed progress
    pub fn progress(&self) -> ProgressState {
        self.progress.state()
    }

    /// The transport
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Configuration
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }
}

impl CommandHandler for Recorder {
    fn on_ready(&mut self) {
        self.load_user_media();
    }

    fn on_preview(&mut self, preview: PreviewArgs) {
        if !self.session.assign_key(preview.key.clone()) {
            warn!(
                key = %preview.key,
                kept = ?self.session.key(),
                "Preview received twice, keeping the first key"
            );
        }

        let suffix = self.config.locator_suffix();
        if let Some(mp4) = preview.mp4 {
            self.replay.mp4 = Some(format!("{}{}", mp4, suffix));
        }
        if let Some(webm) = preview.webm {
            self.replay.webm = Some(format!("{}{}", webm, suffix));
        }

        self.hide();
        self.session.state = RecorderState::Previewing;

        let key = self.session.key().unwrap_or(preview.key.as_str()).to_string();
        self.emit(RecorderEvent::Preview {
            key,
            sources: self.replay.clone(),
        });

        let waiting_ms = self
            .session
            .stop_time
            .map(|stopped| self.clock.now_ms() - stopped);
        debug!(
            bytes = self.session.stats.bytes_sum,
            waiting_ms = ?waiting_ms,
            "Recording transferred"
        );
    }

    fn on_server_error(&mut self, error: RecorderError) {
        self.emit_error(error);
    }

    fn on_confirm_frame(&mut self, frame: u64) {
        let state = self
            .progress
            .confirm_frame(frame, self.session.stats.frames_count);
        self.emit(RecorderEvent::Progress(state));
    }

    fn on_confirm_sample(&mut self, sample: u64) {
        let state = self
            .progress
            .confirm_sample(sample, self.session.stats.samples_count);
        self.emit(RecorderEvent::Progress(state));
    }

    fn on_begin_audio_encoding(&mut self) {
        self.emit(RecorderEvent::BeginAudioEncoding);
    }

    fn on_begin_video_encoding(&mut self) {
        self.emit(RecorderEvent::BeginVideoEncoding);
    }

    fn on_unknown_command(&mut self, error: RecorderError) {
        self.emit_error(error);
    }
}
