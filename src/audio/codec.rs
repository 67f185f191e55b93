//! Audio normalisation: arbitrary input → mono 16-bit PCM at the pipeline rate.
//!
//! WAV goes through `hound`; every other container is probed and decoded
//! with `symphonia`. Both paths end in the same downmix + resample step, so
//! the output only depends on the decoded samples, never on the container.

use crate::audio::buffer::{AudioBuffer, AudioInput, CaptureBuffer};
use crate::defaults::{MAX_SOURCE_SAMPLE_RATE, MIN_SOURCE_SAMPLE_RATE, SAMPLE_RATE};
use crate::error::{AsrError, InvalidInputKind, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decodes and normalises audio to the pipeline's canonical format.
#[derive(Debug, Clone, Copy)]
pub struct AudioCodec {
    target_rate: u32,
}

impl Default for AudioCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCodec {
    pub fn new() -> Self {
        Self::with_target_rate(SAMPLE_RATE)
    }

    pub fn with_target_rate(target_rate: u32) -> Self {
        Self { target_rate }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Decode any supported input into an [`AudioBuffer`].
    ///
    /// # Errors
    /// `InvalidInput` with kind `Empty` for zero-length input or a stream that
    /// yields no samples, `Malformed` for unparsable bytes, `UnsupportedCodec`
    /// for containers we recognise but cannot decode, and
    /// `UnsupportedSampleRate` for rates outside 8–192 kHz.
    pub fn decode(&self, input: &AudioInput) -> Result<AudioBuffer> {
        let buffer = match input {
            AudioInput::Encoded { bytes, format_hint } => {
                self.decode_encoded(bytes, format_hint.as_deref())?
            }
            AudioInput::Capture(capture) => self.decode_capture(capture)?,
        };

        tracing::debug!(
            samples = buffer.len(),
            duration_secs = buffer.duration_secs(),
            sample_rate = buffer.sample_rate(),
            "Audio normalised to mono PCM"
        );

        Ok(buffer)
    }

    fn decode_encoded(&self, bytes: &[u8], hint: Option<&str>) -> Result<AudioBuffer> {
        if bytes.is_empty() {
            return Err(AsrError::invalid_input(
                InvalidInputKind::Empty,
                "input contains no bytes",
            ));
        }

        let (samples, channels, rate) = if is_wav(bytes, hint) {
            read_wav(bytes)?
        } else {
            read_with_symphonia(bytes, hint)?
        };

        self.normalize(&samples, channels, rate)
    }

    fn decode_capture(&self, capture: &CaptureBuffer) -> Result<AudioBuffer> {
        if capture.samples.is_empty() {
            return Err(AsrError::invalid_input(
                InvalidInputKind::Empty,
                "capture buffer contains no samples",
            ));
        }
        self.normalize(
            &capture.samples,
            capture.channels as usize,
            capture.sample_rate,
        )
    }

    fn normalize(&self, interleaved: &[i16], channels: usize, source_rate: u32) -> Result<AudioBuffer> {
        if channels == 0 {
            return Err(AsrError::invalid_input(
                InvalidInputKind::Malformed,
                "audio reports zero channels",
            ));
        }
        if !(MIN_SOURCE_SAMPLE_RATE..=MAX_SOURCE_SAMPLE_RATE).contains(&source_rate) {
            return Err(AsrError::invalid_input(
                InvalidInputKind::UnsupportedSampleRate,
                format!(
                    "{source_rate} Hz is outside {MIN_SOURCE_SAMPLE_RATE}-{MAX_SOURCE_SAMPLE_RATE} Hz"
                ),
            ));
        }

        let mono = downmix(interleaved, channels);
        let samples = resample(&mono, source_rate, self.target_rate);
        AudioBuffer::new(samples, self.target_rate)
    }
}

/// Encode canonical samples as a 16-bit mono WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_write_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wav_write_error)?;
    }
    writer.finalize().map_err(wav_write_error)?;
    Ok(cursor.into_inner())
}

fn wav_write_error(e: hound::Error) -> AsrError {
    AsrError::Io(std::io::Error::other(format!("Failed to encode WAV: {e}")))
}

fn is_wav(bytes: &[u8], hint: Option<&str>) -> bool {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return true;
    }
    matches!(
        hint.map(|h| h.trim().to_ascii_lowercase()).as_deref(),
        Some("wav" | "wave" | "audio/wav" | "audio/x-wav" | "audio/wave")
    )
}

fn read_wav(bytes: &[u8]) -> Result<(Vec<i16>, usize, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(wav_read_error)?;
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, bits) if bits <= 16 => reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_read_error)?,
        (hound::SampleFormat::Int, bits) => {
            let shift = u32::from(bits) - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(wav_read_error)?
        }
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .map(|s| s.map(f32_to_i16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_read_error)?,
    };

    if samples.is_empty() {
        return Err(AsrError::invalid_input(
            InvalidInputKind::Empty,
            "WAV file contains no samples",
        ));
    }

    Ok((samples, spec.channels as usize, spec.sample_rate))
}

fn wav_read_error(e: hound::Error) -> AsrError {
    let kind = match e {
        hound::Error::Unsupported => InvalidInputKind::UnsupportedCodec,
        _ => InvalidInputKind::Malformed,
    };
    AsrError::invalid_input(kind, format!("Failed to parse WAV file: {e}"))
}

fn read_with_symphonia(bytes: &[u8], hint_str: Option<&str>) -> Result<(Vec<i16>, usize, u32)> {
    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(h) = hint_str.map(str::trim).filter(|h| !h.is_empty()) {
        if h.contains('/') {
            hint.mime_type(h);
        } else {
            hint.with_extension(h.trim_start_matches('.'));
        }
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| symphonia_error("probe", e))?;
    let mut format = probed.format;

    let track = format.default_track().ok_or_else(|| {
        AsrError::invalid_input(InvalidInputKind::Malformed, "no audio track found")
    })?;
    if track.codec_params.codec == CODEC_TYPE_NULL {
        return Err(AsrError::invalid_input(
            InvalidInputKind::UnsupportedCodec,
            "track has no decodable codec",
        ));
    }
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| symphonia_error("codec", e))?;

    let mut rate = codec_params.sample_rate;
    let mut channels = codec_params.channels.map(|c| c.count());
    let mut samples: Vec<i16> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(symphonia_error("packet", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(error = %e, "Skipping corrupt audio frame");
                continue;
            }
            Err(e) => return Err(symphonia_error("decode", e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }
        rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count());

        let mut sample_buf = SampleBuffer::<i16>::new(frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(AsrError::invalid_input(
            InvalidInputKind::Empty,
            "no audio samples decoded",
        ));
    }

    let rate = rate.ok_or_else(|| {
        AsrError::invalid_input(InvalidInputKind::Malformed, "unknown sample rate")
    })?;
    Ok((samples, channels.unwrap_or(1), rate))
}

fn symphonia_error(stage: &str, e: SymphoniaError) -> AsrError {
    let kind = match e {
        SymphoniaError::Unsupported(_) => InvalidInputKind::UnsupportedCodec,
        _ => InvalidInputKind::Malformed,
    };
    AsrError::invalid_input(kind, format!("{stage}: {e}"))
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Average interleaved frames down to a single channel.
pub(crate) fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resampler.
///
/// Pure f64 arithmetic with no state between calls: identical input always
/// produces bit-identical output.
pub(crate) fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(last);
            let fraction = source_pos - source_idx as f64;

            if source_idx >= last {
                samples[last]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction).round() as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn decode_bytes(bytes: Vec<u8>) -> Result<AudioBuffer> {
        AudioCodec::new().decode(&AudioInput::encoded(bytes))
    }

    #[test]
    fn wav_16khz_mono_matches_exactly() {
        let input_samples = vec![100i16, 200, 300, 400, 500];
        let buffer = decode_bytes(make_wav_data(16000, 1, &input_samples)).unwrap();

        assert_eq!(buffer.samples(), input_samples.as_slice());
        assert_eq!(buffer.sample_rate(), 16000);
        assert_eq!(buffer.channels(), 1);
    }

    #[test]
    fn wav_stereo_downmixes_by_averaging() {
        // Stereo pairs: (100, 200), (300, 400), (500, 600)
        let stereo = vec![100i16, 200, 300, 400, 500, 600];
        let buffer = decode_bytes(make_wav_data(16000, 2, &stereo)).unwrap();

        assert_eq!(buffer.samples(), &[150i16, 350, 550]);
    }

    #[test]
    fn downmix_averages_any_channel_count() {
        let quad = vec![4i16, 8, 12, 16, -4, -8, -12, -16];
        assert_eq!(downmix(&quad, 4), vec![10, -10]);
    }

    #[test]
    fn wav_48khz_resamples_to_16khz() {
        let input_samples = vec![0i16; 48000];
        let buffer = decode_bytes(make_wav_data(48000, 1, &input_samples)).unwrap();

        assert_eq!(buffer.len(), 16000);
        assert_eq!(buffer.sample_rate(), 16000);
    }

    #[test]
    fn wav_44100hz_resamples_and_preserves_level() {
        let input_samples = vec![1000i16; 44100];
        let buffer = decode_bytes(make_wav_data(44100, 1, &input_samples)).unwrap();

        assert!(buffer.len() >= 15900 && buffer.len() <= 16100);
        assert!(buffer.samples().iter().all(|&s| s == 1000));
    }

    #[test]
    fn resampling_is_bit_identical_across_runs() {
        let input: Vec<i16> = (0..22050).map(|i| ((i * 37) % 2000 - 1000) as i16).collect();
        let wav = make_wav_data(22050, 1, &input);

        let first = decode_bytes(wav.clone()).unwrap();
        let second = decode_bytes(wav).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn decode_does_not_mutate_input() {
        let wav = make_wav_data(48000, 2, &[1i16, 2, 3, 4, 5, 6]);
        let input = AudioInput::encoded(wav.clone());
        AudioCodec::new().decode(&input).unwrap();

        match input {
            AudioInput::Encoded { bytes, .. } => assert_eq!(bytes, wav),
            AudioInput::Capture(_) => unreachable!(),
        }
    }

    #[test]
    fn zero_bytes_is_empty_input() {
        let err = decode_bytes(Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            AsrError::InvalidInput {
                kind: InvalidInputKind::Empty,
                ..
            }
        ));
    }

    #[test]
    fn wav_without_samples_is_empty_input() {
        let err = decode_bytes(make_wav_data(16000, 1, &[])).unwrap_err();
        assert!(matches!(
            err,
            AsrError::InvalidInput {
                kind: InvalidInputKind::Empty,
                ..
            }
        ));
    }

    #[test]
    fn garbage_bytes_are_rejected_as_invalid_input() {
        let err = decode_bytes(b"definitely not an audio file at all".to_vec()).unwrap_err();
        match err {
            AsrError::InvalidInput { kind, .. } => assert!(matches!(
                kind,
                InvalidInputKind::Malformed | InvalidInputKind::UnsupportedCodec
            )),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_sample_rate_is_rejected() {
        let err = decode_bytes(make_wav_data(4000, 1, &[1i16; 400])).unwrap_err();
        assert!(matches!(
            err,
            AsrError::InvalidInput {
                kind: InvalidInputKind::UnsupportedSampleRate,
                ..
            }
        ));
    }

    #[test]
    fn capture_buffer_is_normalised() {
        let capture = CaptureBuffer {
            samples: [100i16, 300].repeat(24000),
            sample_rate: 48000,
            channels: 2,
        };
        let buffer = AudioCodec::new().decode(&capture.into()).unwrap();

        // 24000 stereo frames at 48 kHz -> 0.5 s -> 8000 samples at 16 kHz
        assert_eq!(buffer.len(), 8000);
        assert!(buffer.samples().iter().all(|&s| s == 200));
    }

    #[test]
    fn empty_capture_is_rejected() {
        let err = AudioCodec::new()
            .decode(&CaptureBuffer::mono(Vec::new(), 16000).into())
            .unwrap_err();
        assert!(matches!(
            err,
            AsrError::InvalidInput {
                kind: InvalidInputKind::Empty,
                ..
            }
        ));
    }

    #[test]
    fn normalisation_is_idempotent_through_wav_encoding() {
        let input: Vec<i16> = (0..44100).map(|i| ((i % 200) * 50 - 5000) as i16).collect();
        let first = decode_bytes(make_wav_data(44100, 2, &input)).unwrap();

        let reencoded = encode_wav(first.samples(), first.sample_rate()).unwrap();
        let second = decode_bytes(reencoded).unwrap();

        assert_eq!(second.sample_rate(), first.sample_rate());
        assert_eq!(second.channels(), first.channels());
        assert_eq!(second.samples(), first.samples());
    }

    #[test]
    fn float_wav_is_converted_to_i16() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [0.0f32, 0.5, -0.5, 1.0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let buffer = decode_bytes(cursor.into_inner()).unwrap();
        assert_eq!(buffer.samples(), &[0, 16384, -16384, i16::MAX]);
    }

    #[test]
    fn wav_hint_detection() {
        assert!(is_wav(b"", Some("audio/wav")));
        assert!(is_wav(b"", Some(" WAV ")));
        assert!(!is_wav(b"", Some("mp3")));
        assert!(!is_wav(b"", None));
    }
}
