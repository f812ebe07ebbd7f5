//! Audio Device Adapters
//!
//! `CpalMicrophone` and `CpalSpeaker` connect the core's media seams to the
//! default cpal devices. cpal streams are not `Send`, so each one lives on
//! its own thread and is dropped there when the paired stop sender fires.
//! Samples cross into async code through `ringbuf` queues.

use crate::audio_utils::{
    ChunkedResampler, FRAME_DURATION_MS, PCMU_FRAME_SAMPLES, PCMU_SAMPLE_RATE, decode_pcmu,
    downmix_to_mono, encode_pcmu, frame_len,
};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};
use std::sync::{Arc, Mutex, PoisonError, mpsc as std_mpsc};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tutor_core::{
    MediaAcquisitionError,
    media::{LocalAudio, MediaCapture, PlaybackSink, RemoteAudio, pcmu_track},
};
use webrtc::media::Sample as MediaSample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

// Roughly one second of device audio.
const CAPTURE_BUFFER: usize = 48_000 * 2;
const PLAYBACK_BUFFER: usize = 48_000 * 2;

type ReadySender = oneshot::Sender<anyhow::Result<StreamConfig>>;

/// Captures the default input device as a PCMU track.
pub struct CpalMicrophone {
    stream_id: String,
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new("tutor-mic")
    }
}

impl CpalMicrophone {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

#[async_trait]
impl MediaCapture for CpalMicrophone {
    async fn acquire(&self) -> Result<LocalAudio, MediaAcquisitionError> {
        let (producer, consumer) = HeapRb::<f32>::new(CAPTURE_BUFFER).split();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("tutor-capture".to_string())
            .spawn(move || run_device(ready_tx, stop_rx, || open_input(producer)))
            .map_err(|e| MediaAcquisitionError::new(e.to_string()))?;

        let config = ready_rx
            .await
            .map_err(|_| MediaAcquisitionError::new("capture thread exited"))?
            .map_err(|e| MediaAcquisitionError::new(format!("{:#}", e)))?;
        info!(
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "Microphone capture started"
        );

        let track = pcmu_track(&self.stream_id);
        let pump = tokio::spawn(pump_microphone(consumer, config, Arc::clone(&track)));

        Ok(LocalAudio::new(track).with_release(move || {
            pump.abort();
            let _ = stop_tx.send(());
            info!("Microphone released");
        }))
    }
}

/// Plays the remote track on the default output device.
#[derive(Default)]
pub struct CpalSpeaker {
    active: Mutex<Option<ActivePlayback>>,
}

struct ActivePlayback {
    reader: JoinHandle<()>,
    stop: std_mpsc::Sender<()>,
}

impl PlaybackSink for CpalSpeaker {
    fn attach(&self, remote: RemoteAudio) {
        self.detach();

        let (producer, consumer) = HeapRb::<f32>::new(PLAYBACK_BUFFER).split();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let spawned = std::thread::Builder::new()
            .name("tutor-playback".to_string())
            .spawn(move || run_device(ready_tx, stop_rx, || open_output(consumer)));
        if let Err(e) = spawned {
            error!(error = %e, "Failed to start the playback thread");
            return;
        }

        let reader = tokio::spawn(async move {
            if let Err(e) = play_remote(remote, producer, ready_rx).await {
                warn!(error = %format!("{:#}", e), "Remote audio playback ended");
            }
        });

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = Some(ActivePlayback {
            reader,
            stop: stop_tx,
        });
    }

    fn detach(&self) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(playback) = previous {
            playback.reader.abort();
            let _ = playback.stop.send(());
            debug!("Playback detached");
        }
    }
}

/// Owns one cpal stream for its whole life on the current thread.
fn run_device<F>(ready: ReadySender, stop: std_mpsc::Receiver<()>, open: F)
where
    F: FnOnce() -> anyhow::Result<(Stream, StreamConfig)>,
{
    let stream = match open() {
        Ok((stream, config)) => {
            let _ = ready.send(Ok(config));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    // Returns on an explicit stop or when the sender is dropped.
    let _ = stop.recv();
    drop(stream);
    debug!("Audio stream closed");
}

fn open_input(producer: HeapProd<f32>) -> anyhow::Result<(Stream, StreamConfig)> {
    let device = cpal::default_host()
        .default_input_device()
        .context("No audio input device found")?;
    let supported = device
        .default_input_config()
        .context("Failed to query the input device config")?;
    let config: StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, producer)?,
        SampleFormat::I16 => build_input::<i16>(&device, &config, producer)?,
        SampleFormat::U16 => build_input::<u16>(&device, &config, producer)?,
        other => anyhow::bail!("Unsupported input sample format: {:?}", other),
    };
    stream.play().context("Failed to start the input stream")?;
    Ok((stream, config))
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
) -> anyhow::Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                // Drop samples when the pump falls behind.
                let _ = producer.try_push(sample.to_sample::<f32>());
            }
        },
        |err| error!(error = %err, "Audio capture error"),
        None,
    )?;
    Ok(stream)
}

fn open_output(consumer: HeapCons<f32>) -> anyhow::Result<(Stream, StreamConfig)> {
    let device = cpal::default_host()
        .default_output_device()
        .context("No audio output device found")?;
    let supported = device
        .default_output_config()
        .context("Failed to query the output device config")?;
    let config: StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, consumer)?,
        SampleFormat::I16 => build_output::<i16>(&device, &config, consumer)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, consumer)?,
        other => anyhow::bail!("Unsupported output sample format: {:?}", other),
    };
    stream.play().context("Failed to start the output stream")?;
    Ok((stream, config))
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
) -> anyhow::Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for slot in data.iter_mut() {
                *slot = T::from_sample(consumer.try_pop().unwrap_or(0.0));
            }
        },
        |err| error!(error = %err, "Audio playback error"),
        None,
    )?;
    Ok(stream)
}

/// Drains captured audio every 20 ms and writes PCMU frames to the track.
async fn pump_microphone(
    consumer: HeapCons<f32>,
    config: StreamConfig,
    track: Arc<TrackLocalStaticSample>,
) {
    if let Err(e) = pump_frames(consumer, config, track).await {
        warn!(error = %format!("{:#}", e), "Microphone pump stopped");
    }
}

async fn pump_frames(
    mut consumer: HeapCons<f32>,
    config: StreamConfig,
    track: Arc<TrackLocalStaticSample>,
) -> anyhow::Result<()> {
    let channels = (config.channels as usize).max(1);
    let device_frame = frame_len(config.sample_rate.0);
    let mut resampler =
        ChunkedResampler::new(config.sample_rate.0 as f64, PCMU_SAMPLE_RATE, device_frame)?;
    let mut scratch = vec![0.0f32; device_frame * channels * 4];
    let mut encoded: Vec<f32> = Vec::with_capacity(PCMU_FRAME_SAMPLES * 2);
    let frame_duration = Duration::from_millis(FRAME_DURATION_MS);
    let mut ticker = tokio::time::interval(frame_duration);

    loop {
        ticker.tick().await;

        let available = consumer.occupied_len().min(scratch.len());
        let whole_frames = available - available % channels;
        let read = consumer.pop_slice(&mut scratch[..whole_frames]);
        let mono = downmix_to_mono(&scratch[..read], channels);
        encoded.extend(resampler.push(&mono)?);

        while encoded.len() >= PCMU_FRAME_SAMPLES {
            let frame: Vec<f32> = encoded.drain(..PCMU_FRAME_SAMPLES).collect();
            track
                .write_sample(&MediaSample {
                    data: Bytes::from(encode_pcmu(&frame)),
                    duration: frame_duration,
                    ..Default::default()
                })
                .await
                .context("Failed to write a microphone frame")?;
        }
    }
}

/// Decodes inbound RTP packets and feeds the output device.
async fn play_remote(
    remote: RemoteAudio,
    mut producer: HeapProd<f32>,
    ready: oneshot::Receiver<anyhow::Result<StreamConfig>>,
) -> anyhow::Result<()> {
    let config = ready
        .await
        .context("Playback thread exited before opening the device")??;
    let channels = (config.channels as usize).max(1);
    let mut resampler = ChunkedResampler::new(
        PCMU_SAMPLE_RATE,
        config.sample_rate.0 as f64,
        PCMU_FRAME_SAMPLES,
    )?;
    info!(
        ssrc = remote.track.ssrc(),
        sample_rate = config.sample_rate.0,
        channels,
        "Playing remote audio"
    );

    loop {
        let (packet, _) = remote
            .track
            .read_rtp()
            .await
            .context("Remote track closed")?;
        for sample in resampler.push(&decode_pcmu(&packet.payload))? {
            for _ in 0..channels {
                let _ = producer.try_push(sample);
            }
        }
    }
}
