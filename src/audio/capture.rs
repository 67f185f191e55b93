//! Live microphone capture using CPAL (Cross-Platform Audio Library).
//!
//! Captures at the device's native configuration and hands back the raw
//! interleaved samples; downmixing and resampling happen in the codec, the
//! same as for uploaded files.

use crate::audio::buffer::CaptureBuffer;
use crate::error::{AsrError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Device name patterns to filter out (not useful for voice input).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

/// What to record.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    /// Input device name; `None` uses the host default.
    pub device: Option<String>,
    pub seconds: f64,
    /// Capture rate to request from the device; `None` keeps its native rate.
    pub sample_rate: Option<u32>,
}

impl CaptureRequest {
    pub fn new(seconds: f64) -> Self {
        Self {
            device: None,
            seconds,
            sample_rate: None,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.seconds.is_finite() || self.seconds <= 0.0 {
            return Err(AsrError::invalid_parameter(
                "seconds",
                format!("recording length must be positive, got {}", self.seconds),
            ));
        }
        if self.sample_rate == Some(0) {
            return Err(AsrError::invalid_parameter(
                "sample_rate",
                "capture rate must be positive",
            ));
        }
        Ok(())
    }
}

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// List input devices usable for voice capture.
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().map_err(|e| AsrError::AudioCapture {
        message: format!("Failed to enumerate input devices: {e}"),
    })?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .collect())
}

fn find_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            let mut devices = host.input_devices().map_err(|e| AsrError::AudioCapture {
                message: format!("Failed to enumerate input devices: {e}"),
            })?;
            devices
                .find(|dev| dev.name().is_ok_and(|n| n == name))
                .ok_or_else(|| AsrError::AudioDeviceNotFound {
                    device: name.to_string(),
                })
        }
        None => host
            .default_input_device()
            .ok_or_else(|| AsrError::AudioDeviceNotFound {
                device: "default".to_string(),
            }),
    }
}

/// Record from an input device, blocking the calling thread for the
/// requested duration.
pub fn record(request: &CaptureRequest) -> Result<CaptureBuffer> {
    request.validate()?;
    let device = find_device(request.device.as_deref())?;

    let config = device
        .default_input_config()
        .map_err(|e| AsrError::AudioCapture {
            message: format!("Failed to query default input config: {e}"),
        })?;
    let channels = config.channels();
    let sample_format = config.sample_format();
    let mut stream_config: cpal::StreamConfig = config.into();
    if let Some(rate) = request.sample_rate {
        stream_config.sample_rate = rate;
    }
    let sample_rate = stream_config.sample_rate;

    let buffer: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));
    let err_callback = |err| {
        tracing::warn!(error = %err, "Audio stream error");
    };

    let sink = Arc::clone(&buffer);
    let stream = match sample_format {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend(
                        data.iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    );
                }
            },
            err_callback,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend(data.iter().map(|&s| (s as i32 - 32768) as i16));
                }
            },
            err_callback,
            None,
        ),
        fmt => {
            return Err(AsrError::AudioCapture {
                message: format!("Unsupported native sample format: {fmt:?}"),
            });
        }
    }
    .map_err(|e| AsrError::AudioCapture {
        message: format!("Failed to build input stream: {e}"),
    })?;

    tracing::debug!(
        sample_rate,
        channels,
        seconds = request.seconds,
        "Recording from input device"
    );

    stream.play().map_err(|e| AsrError::AudioCapture {
        message: format!("Failed to start audio stream: {e}"),
    })?;
    std::thread::sleep(Duration::from_secs_f64(request.seconds));
    stream.pause().map_err(|e| AsrError::AudioCapture {
        message: format!("Failed to stop audio stream: {e}"),
    })?;
    drop(stream);

    let mut samples = buffer
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .map_err(|e| AsrError::AudioCapture {
            message: format!("Failed to lock audio buffer: {e}"),
        })?;

    // Callbacks deliver whole periods; trim the tail to the requested length.
    let wanted = (request.seconds * sample_rate as f64).round() as usize * channels as usize;
    samples.truncate(wanted);

    Ok(CaptureBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Record on tokio's blocking pool.
pub async fn record_async(request: CaptureRequest) -> Result<CaptureBuffer> {
    tokio::task::spawn_blocking(move || record(&request))
        .await
        .map_err(|e| AsrError::AudioCapture {
            message: format!("Recording task panicked: {e}"),
        })?
}
