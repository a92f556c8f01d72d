//! Recorder lifecycle tests
//!
//! The recorder is driven by hand: connection events are injected through
//! the loopback connector, time comes from a manual clock and every queued
//! input is pumped synchronously.

use camstream::*;
use tokio_test::{assert_err, assert_ok};

const FPS: f64 = 30.0;

struct Harness {
    recorder: Recorder,
    inputs: RecorderInputs,
    connector: LoopbackConnector,
    clock: ManualClock,
    source: SyntheticSource,
}

fn test_config() -> RecorderConfig {
    RecorderConfig {
        site_name: "test-site".to_string(),
        video: VideoSettings {
            fps: FPS,
            width: 8,
            height: 4,
            video_type: VideoType::Webm,
        },
        ..RecorderConfig::default()
    }
}

fn harness_with(config: RecorderConfig, capabilities: StaticCapabilities) -> Harness {
    let connector = LoopbackConnector::new();
    let clock = ManualClock::new();
    let source = SyntheticSource::new(config.video.width, config.video.height);

    let (recorder, inputs) = Recorder::builder(config)
        .media_source(source.clone())
        .clock(clock.clone())
        .connector(connector.clone())
        .capabilities(capabilities)
        .build()
        .unwrap();

    Harness {
        recorder,
        inputs,
        connector,
        clock,
        source,
    }
}

fn harness() -> Harness {
    harness_with(test_config(), StaticCapabilities::supported())
}

fn types(events: &[RecorderEvent]) -> Vec<&'static str> {
    events.iter().map(RecorderEvent::event_type).collect()
}

impl Harness {
    /// Deliver every queued input
    fn pump(&mut self) -> RecorderResult<()> {
        loop {
            let mut progressed = false;
            while let Ok(event) = self.inputs.transport_events.try_recv() {
                self.recorder.handle_transport_event(event)?;
                progressed = true;
            }
            while let Ok(event) = self.inputs.media_events.try_recv() {
                self.recorder.handle_media_event(event)?;
                progressed = true;
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn server_says(&self, connection: usize, command: ServerCommand) {
        assert!(self
            .connector
            .inject(connection, TransportEventKind::Text(command.to_frame())));
    }

    fn open(&self, connection: usize) {
        assert!(self.connector.inject(connection, TransportEventKind::Opened));
    }

    /// Build, connect and complete the media handshake
    fn start(&mut self) -> EventStream {
        let events = self.recorder.subscribe();
        assert_ok!(self.recorder.build());
        self.open(0);
        self.server_says(0, ServerCommand::Ready);
        assert_ok!(self.pump());
        assert_eq!(self.recorder.state(), RecorderState::Ready);
        events
    }

    fn tick_at(&mut self, now: f64) -> Option<TickOutcome> {
        self.clock.set(now);
        self.recorder.tick()
    }

    /// Feed `count` ticks at `start + k * wanted`, as a steady scheduler would
    fn record_frames(&mut self, start: f64, count: usize) {
        let wanted = 1000.0 / FPS;
        for k in 1..=count {
            let now = start + k as f64 * wanted;
            assert!(matches!(
                self.tick_at(now),
                Some(TickOutcome::Captured { .. })
            ));
        }
    }

    fn stop_command(&self, connection: usize) -> StopArgs {
        let commands = self.connector.drain_commands(connection);
        let stop = commands
            .iter()
            .filter_map(|frame| ClientCommand::from_frame(frame).ok())
            .find_map(|command| match command {
                ClientCommand::Stop(args) => Some(args),
                _ => None,
            });
        stop.expect("no stop command was sent")
    }
}

#[test]
fn test_build_fails_without_capabilities() {
    let mut h = harness_with(
        test_config(),
        StaticCapabilities::without_recording("no capture api"),
    );
    assert!(matches!(
        h.recorder.build(),
        Err(RecorderError::Capability { .. })
    ));
    assert_eq!(h.connector.opened(), 0);

    let mut h = harness_with(
        test_config(),
        StaticCapabilities::without_buffers("no binary buffers"),
    );
    assert_err!(h.recorder.build());
    assert_eq!(h.connector.opened(), 0);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let mut config = test_config();
    config.video.height = 0;
    let result = Recorder::builder(config)
        .media_source(SyntheticSource::new(8, 4))
        .connector(LoopbackConnector::new())
        .build();
    assert!(matches!(
        result,
        Err(RecorderError::InvalidConfiguration { .. })
    ));

    let result = Recorder::builder(test_config())
        .connector(LoopbackConnector::new())
        .build();
    assert!(result.is_err());
}

#[test]
fn test_ready_handshake() {
    let mut h = harness();
    let mut events = h.start();

    assert_eq!(types(&events.drain()), vec!["connected", "ready"]);
    assert_eq!(h.source.start_attempts(), 1);
    assert!(h.recorder.is_ready());
    assert!(h.recorder.is_live_view_visible());
    assert!(h.recorder.transport().is_connected());

    let request = h.connector.request(0).unwrap();
    assert_eq!(
        request.url,
        "ws://localhost:8890/?x-camstream-site-name=test-site"
    );
}

#[test]
fn test_progress_fires_before_error_in_arrival_order() {
    let mut h = harness();
    let mut events = h.start();
    assert_ok!(h.recorder.record());
    h.record_frames(0.0, 2);
    events.drain();

    h.server_says(0, ServerCommand::ConfirmFrame { frame: 1 });
    h.server_says(0, ServerCommand::ConfirmFrame { frame: 2 });
    h.server_says(
        0,
        ServerCommand::Error {
            err: Some("disk full".to_string()),
        },
    );
    assert_ok!(h.pump());

    let received = events.drain();
    assert_eq!(types(&received), vec!["progress", "progress", "error"]);

    match &received[0] {
        RecorderEvent::Progress(state) => {
            assert_eq!(state.frame.map(|p| p.to_string()), Some("50.00%".to_string()));
            assert_eq!(state.sample, None);
        }
        other => panic!("expected progress, got {:?}", other),
    }
    match &received[2] {
        RecorderEvent::Error { error } => assert_eq!(
            error,
            &RecorderError::Server {
                explanation: "disk full".to_string()
            }
        ),
        other => panic!("expected error, got {:?}", other),
    }
}

#[test]
fn test_end_to_end_recording() {
    let mut h = harness();
    let mut events = h.start();

    assert_ok!(h.recorder.record());
    assert!(h.recorder.is_recording());
    h.record_frames(0.0, 150);

    assert_ok!(h.recorder.stop(false));

    let outbound = h.connector.drain_outbound(0);
    let frames = outbound
        .iter()
        .filter(|payload| matches!(payload, Outbound::Binary(_)))
        .count();
    assert_eq!(frames, 150);
    assert!(matches!(outbound.last(), Some(Outbound::Text(_))));

    let stop = match outbound.last() {
        Some(Outbound::Text(frame)) => match ClientCommand::from_frame(frame).unwrap() {
            ClientCommand::Stop(args) => args,
            other => panic!("expected stop, got {:?}", other),
        },
        other => panic!("expected a control frame, got {:?}", other),
    };
    assert_eq!(stop.frames_count, 150);
    assert_eq!(stop.video_type, VideoType::Webm);
    assert!((stop.avg_fps - FPS).abs() < 1e-6);
    assert_eq!(stop.samples_count, None);
    assert_eq!(stop.sample_rate, None);

    let received = types(&events.drain());
    assert_eq!(
        received,
        vec!["connected", "ready", "recording", "stopping", "resetting"]
    );

    assert_eq!(h.recorder.state(), RecorderState::Stopping);
    assert!((h.recorder.avg_fps().unwrap() - FPS).abs() < 1e-6);
    assert!(!h.recorder.has_capture_surface());
    assert!(h.recorder.validate());
    assert_eq!(h.source.stop_calls(), 1);
}

#[test]
fn test_record_before_device_ready_is_rejected() {
    let mut h = harness();
    let mut events = h.recorder.subscribe();
    assert_ok!(h.recorder.build());
    h.open(0);
    assert_ok!(h.pump());
    events.drain();
    let state = h.recorder.state();

    assert!(matches!(
        h.recorder.record(),
        Err(RecorderError::Media { .. })
    ));
    assert_eq!(h.recorder.state(), state);
    assert!(!h.recorder.has_capture_surface());
    assert!(events.drain().is_empty());

    // No frame attempts, so no error per tick.
    assert_eq!(h.tick_at(100.0), Some(TickOutcome::Inactive));
    assert!(events.drain().is_empty());
}

#[test]
fn test_stop_without_frames_reports_zero_fps() {
    let mut h = harness();
    let _events = h.start();
    assert_ok!(h.recorder.record());
    assert_ok!(h.recorder.stop(true));

    let stop = h.stop_command(0);
    assert_eq!(stop.frames_count, 0);
    assert_eq!(stop.avg_fps, 0.0);
    assert_eq!(h.recorder.avg_fps(), Some(0.0));
    assert!(!h.recorder.validate());
}

#[test]
fn test_stopping_carries_limit_flag() {
    let mut h = harness();
    let mut events = h.start();
    assert_ok!(h.recorder.record());
    events.drain();

    assert_ok!(h.recorder.stop(true));
    assert_eq!(
        events.drain().first(),
        Some(&RecorderEvent::Stopping {
            limit_reached: true
        })
    );
}

#[test]
fn test_reconnect_flushes_pending_stop_first() {
    let mut h = harness();
    let mut events = h.start();
    assert_ok!(h.recorder.record());
    h.record_frames(0.0, 5);
    h.connector.drain_outbound(0);

    h.clock.set(1000.0);
    assert!(h.connector.inject(0, TransportEventKind::Ended));
    assert_ok!(h.pump());
    assert!(!h.recorder.transport().is_connected());

    // Frames captured while disconnected are dropped.
    for now in [1100.0, 1200.0, 1300.0] {
        assert!(matches!(
            h.tick_at(now),
            Some(TickOutcome::Captured {
                delivered: false,
                ..
            })
        ));
    }
    assert_eq!(h.recorder.transport().stats().buffers_dropped, 3);

    assert_eq!(h.recorder.next_deadline(), Some(3000.0));
    h.clock.set(2999.0);
    h.recorder.poll_timers();
    assert_eq!(h.connector.opened(), 1);

    h.clock.set(3000.0);
    h.recorder.poll_timers();
    assert_eq!(h.connector.opened(), 2);
    assert_eq!(h.recorder.next_deadline(), None);

    // Connecting: the command waits, no second stream is opened.
    assert_ok!(h.recorder.stop(false));
    assert_eq!(h.connector.opened(), 2);
    assert!(h.recorder.transport().has_pending_command());

    events.drain();
    h.open(1);
    assert_ok!(h.pump());
    assert_eq!(types(&events.drain()), vec!["connected", "reconnected"]);

    let outbound = h.connector.drain_outbound(1);
    assert_eq!(outbound.len(), 1);
    match &outbound[0] {
        Outbound::Text(frame) => match ClientCommand::from_frame(frame).unwrap() {
            ClientCommand::Stop(args) => assert_eq!(args.frames_count, 8),
            other => panic!("expected stop, got {:?}", other),
        },
        other => panic!("expected the stop command first, got {:?}", other),
    }
    assert!(h.connector.drain_outbound(0).is_empty());
}

#[test]
fn test_second_command_rejected_while_one_is_pending() {
    let mut h = harness();
    let mut events = h.start();

    assert!(h.connector.inject(0, TransportEventKind::Ended));
    assert_ok!(h.pump());
    events.drain();

    assert_ok!(h.recorder.stop(false));
    assert_eq!(h.connector.opened(), 2);

    let result = h.recorder.back();
    assert!(matches!(
        result,
        Err(RecorderError::PendingCommandRejected { .. })
    ));
    assert!(events
        .drain()
        .iter()
        .any(|event| matches!(event, RecorderEvent::Error { error: RecorderError::PendingCommandRejected { .. } })));

    h.open(1);
    assert_ok!(h.pump());
    let commands = h.connector.drain_commands(1);
    assert_eq!(commands.len(), 1);
    assert!(commands[0].contains("\"stop\""));
}

#[test]
fn test_preview_and_no_reconnect_while_shown() {
    let mut h = harness();
    let mut events = h.start();
    assert_ok!(h.recorder.record());
    h.record_frames(0.0, 3);
    assert_ok!(h.recorder.stop(false));
    h.clock.set(5000.0);
    events.drain();

    h.server_says(
        0,
        ServerCommand::Preview(PreviewArgs {
            key: "abc123".to_string(),
            mp4: Some("https://media.example/abc123.mp4?".to_string()),
            webm: Some("https://media.example/abc123.webm?".to_string()),
        }),
    );
    assert_ok!(h.pump());

    let received = events.drain();
    match received.as_slice() {
        [RecorderEvent::Preview { key, sources }] => {
            assert_eq!(key, "abc123");
            assert_eq!(
                sources.webm.as_deref(),
                Some("https://media.example/abc123.webm?x-camstream-site-name/test-site")
            );
            assert_eq!(
                sources.mp4.as_deref(),
                Some("https://media.example/abc123.mp4?x-camstream-site-name/test-site")
            );
        }
        other => panic!("expected a single preview, got {:?}", other),
    }
    assert_eq!(h.recorder.state(), RecorderState::Previewing);
    assert_eq!(h.recorder.key(), Some("abc123"));
    assert!(!h.recorder.is_live_view_visible());

    assert!(h.connector.inject(0, TransportEventKind::Ended));
    assert_ok!(h.pump());
    assert_eq!(types(&events.drain()), vec!["ended"]);
    assert_eq!(h.recorder.next_deadline(), None);

    h.clock.set(60_000.0);
    h.recorder.poll_timers();
    assert_eq!(h.connector.opened(), 1);
}

#[test]
fn test_second_preview_keeps_first_key() {
    let mut h = harness();
    let _events = h.start();

    h.server_says(
        0,
        ServerCommand::Preview(PreviewArgs {
            key: "first".to_string(),
            mp4: None,
            webm: None,
        }),
    );
    h.server_says(
        0,
        ServerCommand::Preview(PreviewArgs {
            key: "second".to_string(),
            mp4: None,
            webm: None,
        }),
    );
    assert_ok!(h.pump());
    assert_eq!(h.recorder.key(), Some("first"));
}

#[test]
fn test_reset_is_idempotent() {
    let mut h = harness();
    let mut events = h.start();
    assert_ok!(h.recorder.record());
    h.record_frames(0.0, 2);
    h.server_says(
        0,
        ServerCommand::Preview(PreviewArgs {
            key: "k".to_string(),
            mp4: None,
            webm: Some("w".to_string()),
        }),
    );
    h.server_says(0, ServerCommand::ConfirmFrame { frame: 1 });
    assert_ok!(h.pump());
    events.drain();

    h.recorder.reset();
    assert_eq!(types(&events.drain()), vec!["resetting"]);
    assert_eq!(h.recorder.key(), None);
    assert_eq!(h.recorder.avg_fps(), None);
    assert!(!h.recorder.has_capture_surface());
    assert!(h.recorder.replay_sources().is_empty());
    assert_eq!(h.recorder.progress(), ProgressState::default());
    assert!(!h.recorder.is_capturing());
    assert_eq!(h.recorder.state(), RecorderState::Idle);

    h.recorder.reset();
    assert!(events.drain().is_empty());
    assert_eq!(h.recorder.key(), None);
    assert_eq!(h.source.stop_calls(), 1);
}

#[test]
fn test_denial_with_error_listener_retries() {
    let mut h = harness();
    h.source.deny_next(1);
    let mut events = h.recorder.subscribe();
    assert_ok!(h.recorder.build());
    h.open(0);
    h.server_says(0, ServerCommand::Ready);
    assert_ok!(h.pump());

    let received = events.drain();
    assert!(received.iter().any(|event| matches!(
        event,
        RecorderEvent::Error {
            error: RecorderError::DeviceAccess { handled: true, .. }
        }
    )));
    assert_eq!(h.recorder.state(), RecorderState::AwaitingMedia);
    assert_eq!(h.recorder.next_deadline(), Some(20_000.0));

    h.clock.set(20_000.0);
    h.recorder.poll_timers();
    assert_eq!(h.source.start_attempts(), 2);
    assert_ok!(h.pump());

    assert_eq!(types(&events.drain()), vec!["ready"]);
    assert_eq!(h.recorder.state(), RecorderState::Ready);
}

#[test]
fn test_denial_without_error_listener_is_fatal() {
    let mut h = harness();
    h.source.deny_next(1);
    let _lifecycle = h.recorder.subscribe_lifecycle();
    assert_ok!(h.recorder.build());
    h.open(0);
    h.server_says(0, ServerCommand::Ready);

    let result = h.pump();
    match result {
        Err(error) => {
            assert!(matches!(
                error,
                RecorderError::DeviceAccess { handled: false, .. }
            ));
            assert!(error.is_fatal());
        }
        Ok(()) => panic!("denial without an error listener must fail"),
    }
    assert_eq!(h.source.start_attempts(), 1);
}

#[test]
fn test_device_access_timeout() {
    let mut h = harness();
    h.source.never_respond(true);
    let mut events = h.recorder.subscribe();
    assert_ok!(h.recorder.build());
    h.open(0);
    h.server_says(0, ServerCommand::Ready);
    assert_ok!(h.pump());
    events.drain();

    h.clock.set(19_999.0);
    h.recorder.poll_timers();
    assert!(events.drain().is_empty());

    h.clock.set(20_000.0);
    h.recorder.poll_timers();
    assert_eq!(
        events.drain(),
        vec![RecorderEvent::Error {
            error: RecorderError::NoDeviceAccess { timeout_ms: 20_000 }
        }]
    );
    assert_eq!(h.recorder.next_deadline(), None);
}

#[test]
fn test_synchronous_start_failure_is_an_event() {
    let mut h = harness();
    h.source.fail_start(Some("camera busy".to_string()));
    let mut events = h.recorder.subscribe();
    assert_ok!(h.recorder.build());
    h.open(0);
    h.server_says(0, ServerCommand::Ready);
    assert_ok!(h.pump());

    assert_eq!(types(&events.drain()), vec!["connected", "error"]);
}

#[test]
fn test_unload_while_submitting_leaves_connection_to_server() {
    let mut h = harness();
    let _events = h.start();
    h.recorder.set_submitting(true);

    h.recorder.unload(Some("page left"));

    assert!(h.recorder.is_unloaded());
    assert_eq!(h.recorder.state(), RecorderState::Unloaded);
    assert!(!h
        .connector
        .drain_outbound(0)
        .iter()
        .any(|payload| payload == &Outbound::Close));
    assert_eq!(h.recorder.record(), Err(RecorderError::Unloaded));
}

#[test]
fn test_unload_closes_connection_and_detaches_listeners() {
    let mut h = harness();
    let mut events = h.start();
    events.drain();

    h.recorder.unload(None);

    assert_eq!(h.connector.drain_outbound(0), vec![Outbound::Close]);
    assert!(events.drain().is_empty());
    assert!(events.try_next().is_err());
    assert_eq!(h.recorder.stop(false), Err(RecorderError::Unloaded));

    // Inputs after unload are ignored.
    h.server_says(0, ServerCommand::Ready);
    assert_ok!(h.pump());
    assert_eq!(h.source.start_attempts(), 1);
}

#[test]
fn test_destroyed_stream_unloads() {
    let mut h = harness();
    let mut events = h.start();
    events.drain();

    assert!(h.connector.inject(
        0,
        TransportEventKind::Error {
            reason: "connection refused".to_string(),
            destroyed: true,
        }
    ));
    assert_ok!(h.pump());

    let received = events.drain();
    assert!(matches!(
        received.as_slice(),
        [RecorderEvent::Error {
            error: RecorderError::UnableToConnect { .. }
        }]
    ));
    assert!(h.recorder.is_unloaded());
    assert_eq!(h.connector.drain_outbound(0), vec![Outbound::Close]);
}

#[test]
fn test_malformed_and_unknown_commands_are_not_fatal() {
    let mut h = harness();
    let mut events = h.start();
    events.drain();

    assert!(h
        .connector
        .inject(0, TransportEventKind::Text("{not json".to_string())));
    h.server_says(0, ServerCommand::Unknown("dance".to_string()));
    h.server_says(0, ServerCommand::BeginVideoEncoding);
    assert_ok!(h.pump());

    let received = events.drain();
    assert_eq!(types(&received), vec!["error", "error", "beginVideoEncoding"]);
    assert!(matches!(
        received[0],
        RecorderEvent::Error {
            error: RecorderError::Protocol { .. }
        }
    ));
    assert!(matches!(
        &received[1],
        RecorderEvent::Error {
            error: RecorderError::UnknownCommand { command }
        } if command == "dance"
    ));
    assert!(h.recorder.transport().is_connected());
}

#[test]
fn test_pause_does_not_count_paused_time() {
    let mut h = harness();
    let mut events = h.start();
    assert_ok!(h.recorder.record());
    events.drain();

    h.recorder.pause();
    assert_eq!(h.recorder.state(), RecorderState::Paused);
    assert!(h.recorder.is_paused());
    assert!(!h.recorder.is_recording());
    assert_eq!(h.tick_at(500.0), Some(TickOutcome::Paused));

    h.clock.set(1000.0);
    h.recorder.resume();
    assert_eq!(h.recorder.state(), RecorderState::Recording);
    assert!(matches!(
        h.tick_at(1010.0),
        Some(TickOutcome::Skipped { .. })
    ));
    assert!(matches!(
        h.tick_at(1040.0),
        Some(TickOutcome::Captured { interval, .. }) if interval == 40.0
    ));
    assert_eq!(types(&events.drain()), vec!["paused", "resuming"]);

    assert!(h.recorder.is_recording());
    h.recorder.set_notifying(true);
    assert!(!h.recorder.is_recording());
}

#[test]
fn test_audio_samples_are_counted_and_reported() {
    let mut config = test_config();
    config.audio.enabled = true;
    config.audio.sample_rate = 48_000;
    let mut h = harness_with(config, StaticCapabilities::supported());
    let _events = h.start();
    assert_ok!(h.recorder.record());
    h.connector.drain_outbound(0);

    assert!(h.source.push_audio(&[0.25; 256]));
    assert!(h.source.push_audio(&[0.5; 256]));
    assert_ok!(h.pump());

    let outbound = h.connector.drain_outbound(0);
    assert_eq!(outbound.len(), 2);
    assert!(matches!(&outbound[0], Outbound::Binary(data) if data.len() == 1024));
    assert_eq!(h.recorder.session().stats().samples_count, 2);

    assert_ok!(h.recorder.stop(false));
    let stop = h.stop_command(0);
    assert_eq!(stop.samples_count, Some(2));
    assert_eq!(stop.sample_rate, Some(48_000));
}

#[test]
fn test_back_returns_to_live_view() {
    let mut h = harness();
    let _events = h.start();
    assert_ok!(h.recorder.record());
    h.record_frames(0.0, 2);
    assert_ok!(h.recorder.stop(false));
    h.recorder.hide();
    h.connector.drain_outbound(0);

    assert_ok!(h.recorder.back());

    assert_eq!(h.recorder.state(), RecorderState::Ready);
    assert!(h.recorder.is_live_view_visible());
    let commands = h.connector.drain_commands(0);
    assert_eq!(commands.len(), 1);
    assert_eq!(
        ClientCommand::from_frame(&commands[0]).unwrap(),
        ClientCommand::Back {}
    );
}

#[test]
fn test_media_ready_clears_submit_flag() {
    let mut h = harness();
    h.recorder.set_submitting(true);
    let _events = h.start();
    assert!(!h.recorder.session().is_submitting());
}
