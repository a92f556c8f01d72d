//! Async driver running a [`Recorder`] on one tokio task
//!
//! The task owns the recorder and multiplexes its inputs with
//! `tokio::select!`: control requests from [`RecorderHandle`]s, connection
//! events, media events, the capture ticker and the recorder's next timer.
//! Only one input is handled at a time, so the recorder needs no locking.

use crate::event::EventStream;
use crate::progress::ProgressState;
use crate::recorder::{Recorder, RecorderInputs};
use crate::session::{RecorderState, ReplaySources};
use camstream_core::{RecorderError, RecorderResult};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Request {
    Build(Reply<RecorderResult<()>>),
    Record(Reply<RecorderResult<()>>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop {
        limit_reached: bool,
        reply: Reply<RecorderResult<()>>,
    },
    Back(Reply<RecorderResult<()>>),
    Reset(Reply<()>),
    Unload {
        cause: Option<String>,
        reply: Reply<()>,
    },
    Subscribe {
        errors: bool,
        reply: Reply<EventStream>,
    },
    SetSubmitting(bool),
    SetNotifying(bool),
    Validate(Reply<bool>),
    Snapshot(Reply<RecorderSnapshot>),
}

/// Point-in-time view of a recorder
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSnapshot {
    /// Lifecycle state
    pub state: RecorderState,
    /// Key assigned at preview
    pub key: Option<String>,
    /// Average frame rate computed at stop
    pub avg_fps: Option<f64>,
    /// Frames captured in the current recording
    pub frames_count: u64,
    /// Audio samples captured in the current recording
    pub samples_count: u64,
    /// Frame bytes produced in the current recording
    pub bytes_sum: u64,
    /// Whether the connection is usable
    pub connected: bool,
    /// Whether frames are being captured
    pub recording: bool,
    /// Playback locators of the last preview
    pub replay: ReplaySources,
    /// Latest server-confirmed progress
    pub progress: ProgressState,
}

impl RecorderSnapshot {
    fn of(recorder: &Recorder) -> Self {
        let stats = recorder.session().stats();
        Self {
            state: recorder.state(),
            key: recorder.key().map(str::to_string),
            avg_fps: recorder.avg_fps(),
            frames_count: stats.frames_count,
            samples_count: stats.samples_count,
            bytes_sum: stats.bytes_sum,
            connected: recorder.transport().is_connected(),
            recording: recorder.is_recording(),
            replay: recorder.replay_sources().clone(),
            progress: recorder.progress(),
        }
    }
}

/// Task owning a recorder
#[derive(Debug)]
pub struct RecorderDriver {
    recorder: Recorder,
    inputs: RecorderInputs,
    requests: mpsc::UnboundedReceiver<Request>,
    handle: RecorderHandle,
}

impl RecorderDriver {
    /// Wrap a recorder and its inputs
    pub fn new(recorder: Recorder, inputs: RecorderInputs) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        Self {
            recorder,
            inputs,
            requests: requests_rx,
            handle: RecorderHandle {
                requests: requests_tx,
            },
        }
    }

    /// Handle controlling this driver
    pub fn handle(&self) -> RecorderHandle {
        self.handle.clone()
    }

    /// Run on the current tokio runtime
    pub fn spawn(self) -> (RecorderHandle, JoinHandle<RecorderResult<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Run until the recorder is unloaded or every handle is dropped
    ///
    /// Ends with an error when a device denial reaches no error listener.
    pub async fn run(self) -> RecorderResult<()> {
        let RecorderDriver {
            mut recorder,
            mut inputs,
            mut requests,
            handle,
        } = self;
        // Dropping our own sender lets the request channel close with the last handle.
        drop(handle);

        let mut ticker = tokio::time::interval(recorder.config().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(session = %recorder.session().id(), "Recorder driver started");

        loop {
            if recorder.is_unloaded() {
                info!("Recorder driver stopped");
                return Ok(());
            }

            let capturing = recorder.is_capturing();
            let deadline = recorder.next_deadline();
            let wait = deadline
                .map(|at| Duration::from_secs_f64(((at - recorder.now_ms()) / 1000.0).max(0.0)))
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => handle_request(&mut recorder, request),
                    None => {
                        debug!("All handles dropped");
                        recorder.unload(Some("all handles dropped"));
                    }
                },
                Some(event) = inputs.transport_events.recv() => {
                    recorder.handle_transport_event(event)?;
                }
                Some(event) = inputs.media_events.recv() => {
                    if let Err(e) = recorder.handle_media_event(event) {
                        error!(error = %e, "Recorder driver failed");
                        recorder.unload(Some(&e.to_string()));
                        return Err(e);
                    }
                }
                _ = ticker.tick(), if capturing => {
                    recorder.tick();
                }
                _ = tokio::time::sleep(wait), if deadline.is_some() => {
                    recorder.poll_timers();
                }
            }
        }
    }
}

fn handle_request(recorder: &mut Recorder, request: Request) {
    // A dropped reply receiver only means the caller stopped waiting.
    match request {
        Request::Build(reply) => {
            let _ = reply.send(recorder.build());
        }
        Request::Record(reply) => {
            let _ = reply.send(recorder.record());
        }
        Request::Pause(reply) => {
            recorder.pause();
            let _ = reply.send(());
        }
        Request::Resume(reply) => {
            recorder.resume();
            let _ = reply.send(());
        }
        Request::Stop {
            limit_reached,
            reply,
        } => {
            let _ = reply.send(recorder.stop(limit_reached));
        }
        Request::Back(reply) => {
            let _ = reply.send(recorder.back());
        }
        Request::Reset(reply) => {
            recorder.reset();
            let _ = reply.send(());
        }
        Request::Unload { cause, reply } => {
            recorder.unload(cause.as_deref());
            let _ = reply.send(());
        }
        Request::Subscribe { errors, reply } => {
            let stream = if errors {
                recorder.subscribe()
            } else {
                recorder.subscribe_lifecycle()
            };
            let _ = reply.send(stream);
        }
        Request::SetSubmitting(submitting) => recorder.set_submitting(submitting),
        Request::SetNotifying(notifying) => recorder.set_notifying(notifying),
        Request::Validate(reply) => {
            let _ = reply.send(recorder.validate());
        }
        Request::Snapshot(reply) => {
            let _ = reply.send(RecorderSnapshot::of(recorder));
        }
    }
}

/// Cloneable control handle of a running recorder
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    requests: mpsc::UnboundedSender<Request>,
}

impl RecorderHandle {
    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> RecorderResult<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .map_err(|_| RecorderError::DriverStopped)?;
        response.await.map_err(|_| RecorderError::DriverStopped)
    }

    fn send(&self, request: Request) -> RecorderResult<()> {
        self.requests
            .send(request)
            .map_err(|_| RecorderError::DriverStopped)
    }

    /// See [`Recorder::build`]
    pub async fn build(&self) -> RecorderResult<()> {
        self.call(Request::Build).await?
    }

    /// See [`Recorder::record`]
    pub async fn record(&self) -> RecorderResult<()> {
        self.call(Request::Record).await?
    }

    /// See [`Recorder::pause`]
    pub async fn pause(&self) -> RecorderResult<()> {
        self.call(Request::Pause).await
    }

    /// See [`Recorder::resume`]
    pub async fn resume(&self) -> RecorderResult<()> {
        self.call(Request::Resume).await
    }

    /// See [`Recorder::stop`]
    pub async fn stop(&self, limit_reached: bool) -> RecorderResult<()> {
        self.call(|reply| Request::Stop {
            limit_reached,
            reply,
        })
        .await?
    }

    /// See [`Recorder::back`]
    pub async fn back(&self) -> RecorderResult<()> {
        self.call(Request::Back).await?
    }

    /// See [`Recorder::reset`]
    pub async fn reset(&self) -> RecorderResult<()> {
        self.call(Request::Reset).await
    }

    /// See [`Recorder::unload`]; the driver stops afterwards
    pub async fn unload(&self, cause: Option<&str>) -> RecorderResult<()> {
        let cause = cause.map(str::to_string);
        self.call(|reply| Request::Unload { cause, reply }).await
    }

    /// Listen to every event, errors included
    pub async fn subscribe(&self) -> RecorderResult<EventStream> {
        self.call(|reply| Request::Subscribe {
            errors: true,
            reply,
        })
        .await
    }

    /// Listen to every event except errors
    pub async fn subscribe_lifecycle(&self) -> RecorderResult<EventStream> {
        self.call(|reply| Request::Subscribe {
            errors: false,
            reply,
        })
        .await
    }

    /// See [`Recorder::set_submitting`]
    pub fn set_submitting(&self, submitting: bool) -> RecorderResult<()> {
        self.send(Request::SetSubmitting(submitting))
    }

    /// See [`Recorder::set_notifying`]
    pub fn set_notifying(&self, notifying: bool) -> RecorderResult<()> {
        self.send(Request::SetNotifying(notifying))
    }

    /// See [`Recorder::validate`]
    pub async fn validate(&self) -> RecorderResult<bool> {
        self.call(Request::Validate).await
    }

    /// Current recorder state
    pub async fn snapshot(&self) -> RecorderResult<RecorderSnapshot> {
        self.call(Request::Snapshot).await
    }

    /// Whether the driver is gone
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}
