//! Record a few seconds of synthetic video and audio
//!
//! Needs a recording server; the socket URL is the first argument
//! (defaults to `ws://localhost:8890`). Set `CAMSTREAM_DEBUG` for debug logs.
//!
//! ```text
//! CAMSTREAM_DEBUG=1 cargo run --example record_demo -- ws://localhost:8890
//! ```

use anyhow::{Context, Result};
use camstream::{init_logging, Recorder, RecorderConfig, RecorderEvent, SyntheticSource};
use std::time::Duration;

const RECORDING_LENGTH: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = RecorderConfig::default();
    if let Some(url) = std::env::args().nth(1) {
        config.socket_url = url;
    }
    config.debug_logging = std::env::var_os("CAMSTREAM_DEBUG").is_some();
    init_logging(config.debug_logging);

    config.audio.enabled = true;
    config.site_name = "record-demo".to_string();

    println!("🎬 Recording demo against {}", config.socket_url);

    let source = SyntheticSource::new(config.video.width, config.video.height);
    let (recorder, driver) = Recorder::builder(config)
        .media_source(source.clone())
        .spawn()
        .context("failed to create the recorder")?;

    let mut events = recorder.subscribe().await?;
    recorder.build().await.context("capability check failed")?;

    let mut audio_feed = None;
    let stop_timer = tokio::time::sleep(RECORDING_LENGTH);
    tokio::pin!(stop_timer);
    let mut recording = false;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    println!("⚠️  Event stream closed");
                    break;
                };
                match event {
                    RecorderEvent::Ready if !recording => {
                        println!("📷 Device ready, recording for {:?}", RECORDING_LENGTH);
                        recorder.record().await?;
                        audio_feed = Some(source.spawn_audio_feed(Duration::from_millis(20), 882));
                        stop_timer
                            .as_mut()
                            .reset(tokio::time::Instant::now() + RECORDING_LENGTH);
                        recording = true;
                    }
                    RecorderEvent::Progress(progress) => {
                        if let Some(frame) = progress.frame {
                            println!("   📊 Frames confirmed: {}", frame);
                        }
                    }
                    RecorderEvent::Preview { key, sources } => {
                        println!("✅ Recording {} available", key);
                        if let Some(webm) = sources.webm {
                            println!("   WebM: {}", webm);
                        }
                        if let Some(mp4) = sources.mp4 {
                            println!("   MP4: {}", mp4);
                        }
                        break;
                    }
                    RecorderEvent::Error { error } => {
                        println!("❌ {}", error);
                        if error.is_fatal() {
                            break;
                        }
                    }
                    other => println!("   {}", other.event_type()),
                }
            }
            _ = &mut stop_timer, if recording => {
                println!("⏹️  Stopping");
                let snapshot = recorder.snapshot().await?;
                println!(
                    "   {} frames, {} samples, {} bytes",
                    snapshot.frames_count, snapshot.samples_count, snapshot.bytes_sum
                );
                recorder.stop(false).await?;
                recording = false;
            }
        }
    }

    if let Some(feed) = audio_feed {
        feed.abort();
    }
    if !recorder.is_closed() {
        recorder.unload(None).await?;
    }
    driver.await.context("recorder task panicked")??;

    println!("👋 Done");
    Ok(())
}
