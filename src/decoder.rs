//! Audio decoder implementation using Symphonia.
//!
//! Decodes whatever the default Symphonia registry can probe (AAC, MP4, FLAC,
//! MP3, Ogg Vorbis, WAV) into interleaved `f32` samples for
//! `rodio`. The file extension of the item is passed as a probe hint.
//!
//! Corrupt packets are skipped, up to a few in a row. Anything worse ends the
//! stream early and raises the failure flag, so that the output can tell a
//! broken stream from one that played to its end.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rodio::source::SeekError;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{
    audio_file::{AudioFile, BUFFER_LEN},
    error::{Error, Result},
};

/// Sample type handed to the output.
pub type SampleFormat = f32;

/// Sample rate assumed when the codec does not tell.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Channel count assumed when the codec does not tell.
pub const DEFAULT_CHANNELS: u16 = 2;

/// Maximum number of consecutive corrupted packets to skip before giving up.
const MAX_RETRIES: usize = 3;

pub struct Decoder {
    demuxer: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,

    /// Reused between packets.
    buffer: Option<SampleBuffer<SampleFormat>>,
    position: usize,

    channels: u16,
    sample_rate: u32,
    total_duration: Option<Duration>,
    total_samples: Option<usize>,

    failed: Arc<AtomicBool>,
}

impl Decoder {
    /// Probes `file` and sets up a decoder for its default track.
    ///
    /// Blocks on reads from `file`, which for remote items may wait on the
    /// network.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * the format is not recognised
    /// * there is no default track
    /// * no codec is available for the track
    pub fn new(file: AudioFile, extension: Option<&str>) -> Result<Self> {
        // Twice the buffer length to allow for Symphonia's read-ahead behavior,
        // and 64 kB minimum that Symphonia asserts for its ring buffer.
        let buffer_len = usize::max(64 * 1024, BUFFER_LEN * 2);
        let stream =
            MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions { buffer_len });

        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }

        let demuxer = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )?
            .format;
        let default_track = demuxer
            .default_track()
            .ok_or_else(|| Error::not_found("default track not found"))?;

        let decoder = symphonia::default::get_codecs()
            .make(&default_track.codec_params, &DecoderOptions::default())?;

        // The decoder may know more than the container did.
        let codec_params = decoder.codec_params();
        let sample_rate = codec_params.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        let channels = codec_params.channels.map_or(DEFAULT_CHANNELS, |channels| {
            u16::try_from(channels.count()).unwrap_or(u16::MAX)
        });

        let total_duration = codec_params
            .time_base
            .zip(codec_params.n_frames)
            .map(|(time_base, frames)| time_base.calc_time(frames).into());
        let total_samples = codec_params.n_frames.and_then(|frames| {
            frames
                .checked_mul(channels.into())
                .and_then(|samples| usize::try_from(samples).ok())
        });

        Ok(Self {
            demuxer,
            decoder,

            buffer: None,
            position: 0,

            channels,
            sample_rate,
            total_duration,
            total_samples,

            failed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that is raised when decoding stops on an error rather than at
    /// the end of the stream.
    #[must_use]
    pub fn failure_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failed)
    }

    fn fail(failed: &AtomicBool, e: &dyn std::fmt::Display) {
        error!("decoding stopped: {e}");
        failed.store(true, Ordering::Release);
    }
}

impl rodio::Source for Decoder {
    #[inline]
    fn current_frame_len(&self) -> Option<usize> {
        self.buffer.as_ref().map(SampleBuffer::len)
    }

    #[inline]
    fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    fn total_duration(&self) -> Option<Duration> {
        self.total_duration
    }

    fn try_seek(&mut self, pos: Duration) -> std::result::Result<(), SeekError> {
        self.demuxer
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    // `track_id: None` implies the default track
                    track_id: None,
                    time: pos.into(),
                },
            )
            .map_err(|e| SeekError::Other(Box::new(e)))?;

        // Seeking is a demuxer operation, so the decoder cannot reliably
        // know when a seek took place. Reset it to avoid audio glitches.
        self.decoder.reset();
        self.position = self.buffer.as_ref().map_or(0, SampleBuffer::len);

        Ok(())
    }
}

impl Iterator for Decoder {
    type Item = SampleFormat;

    fn next(&mut self) -> Option<Self::Item> {
        if self
            .buffer
            .as_ref()
            .is_none_or(|buffer| self.position >= buffer.len())
        {
            let mut skipped = 0;
            loop {
                if skipped > MAX_RETRIES {
                    Self::fail(&self.failed, &"skipped too many packets");
                    return None;
                }

                match self.demuxer.next_packet() {
                    Ok(packet) => {
                        let decoded = match self.decoder.decode(&packet) {
                            Ok(decoded) => decoded,
                            Err(SymphoniaError::DecodeError(e)) => {
                                warn!("skipping malformed packet: {e}");
                                skipped += 1;
                                continue;
                            }
                            Err(e) => {
                                Self::fail(&self.failed, &e);
                                return None;
                            }
                        };
                        let buffer = match self.buffer.as_mut() {
                            Some(buffer) => buffer,
                            None => {
                                // The first packet is always the largest, so
                                // allocate the buffer once and reuse it.
                                self.buffer.insert(SampleBuffer::new(
                                    decoded.capacity() as u64,
                                    *decoded.spec(),
                                ))
                            }
                        };
                        buffer.copy_interleaved_ref(decoded);
                        self.position = 0;
                        break;
                    }

                    Err(SymphoniaError::IoError(e))
                        if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        // Not an error, just the end of the stream.
                        return None;
                    }
                    Err(SymphoniaError::DecodeError(e)) => {
                        warn!("skipping malformed packet: {e}");
                        skipped += 1;
                    }
                    Err(SymphoniaError::ResetRequired) => {
                        self.decoder.reset();
                    }
                    Err(e) => {
                        Self::fail(&self.failed, &e);
                        return None;
                    }
                }
            }
        }

        let sample = *self
            .buffer
            .as_ref()
            .and_then(|buffer| buffer.samples().get(self.position))?;
        self.position = self.position.checked_add(1)?;

        Some(sample)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.total_samples)
    }
}
