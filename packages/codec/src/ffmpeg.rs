//! Send video files through `ffmpeg` over CLI.
//!
//! Decoding asks ffmpeg for raw `rgb24` frames on stdout. Encoding feeds raw
//! `rgb24` frames on stdin and lets ffmpeg write the container. Either way the
//! whole file is handled in one ffmpeg process.

use std::io::Write as _;
use std::path::Path;

use ffmpeg_sidecar::{
    command::FfmpegCommand,
    event::{FfmpegEvent, LogLevel},
    iter::FfmpegIterator,
};
use image::RgbImage;

use crate::frame::{frame_timestamp_us, uniform_dimensions};
use crate::{
    Codec, CodecError, DecodedVideo, EncoderConfig, VideoDecoder, VideoEncoder, VideoFrame,
    VideoMetadata,
};

/// Video backend driving the `ffmpeg` binary found on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCodec {
    _private: (),
}

impl FfmpegCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an `ffmpeg` binary can be found.
    #[must_use]
    pub fn is_available() -> bool {
        ffmpeg_sidecar::command::ffmpeg_is_installed()
    }
}

/// Drain ffmpeg's log events, returning the error lines.
fn collect_errors(events: FfmpegIterator, path: &Path) -> Vec<String> {
    let mut errors = Vec::new();
    for event in events {
        match event {
            FfmpegEvent::Log(LogLevel::Warning, msg) => {
                tracing::warn!("ffmpeg ({}): {msg}", path.display());
            }
            FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) | FfmpegEvent::Error(msg) => {
                errors.push(msg);
            }
            FfmpegEvent::Progress(p) => {
                tracing::trace!("ffmpeg progress: frame {} at {}", p.frame, p.time);
            }
            _ => {}
        }
    }
    errors
}

impl VideoDecoder for FfmpegCodec {
    fn decode(&self, path: &Path) -> Result<DecodedVideo, CodecError> {
        let input = path.to_string_lossy();
        let mut child = FfmpegCommand::new()
            .hide_banner()
            .input(&*input)
            .rawvideo() // rgb24 on stdout
            .spawn()
            .map_err(CodecError::FailedToStartFfmpeg)?;

        let events = child
            .iter()
            .map_err(|err| CodecError::ffmpeg(path, err.to_string()))?;

        let mut fps: Option<f64> = None;
        let mut frames = Vec::new();
        let mut errors = Vec::new();

        for event in events {
            match event {
                FfmpegEvent::ParsedInputStream(stream) => {
                    if let Some(video) = stream.video_data() {
                        if fps.is_none() {
                            fps = Some(f64::from(video.fps));
                            tracing::debug!(
                                "{}: {}x{} {} at {} fps",
                                path.display(),
                                video.width,
                                video.height,
                                video.pix_fmt,
                                video.fps
                            );
                        }
                    }
                }
                FfmpegEvent::OutputFrame(frame) => {
                    if frame.pix_fmt != "rgb24" {
                        return Err(CodecError::UnsupportedPixelFormat(frame.pix_fmt));
                    }
                    let index = frames.len() as u64;
                    let timestamp_us = frame_timestamp_us(index, fps.unwrap_or(0.0));
                    frames.push(VideoFrame::from_rgb(
                        frame.width,
                        frame.height,
                        frame.data,
                        index,
                        timestamp_us,
                    )?);
                }
                FfmpegEvent::Log(LogLevel::Warning, msg) => {
                    if !msg.contains("No accelerated colorspace conversion found") {
                        tracing::warn!("ffmpeg ({}): {msg}", path.display());
                    }
                }
                FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg)
                | FfmpegEvent::Error(msg) => errors.push(msg),
                _ => {}
            }
        }

        let status = child.wait().map_err(|err| CodecError::io(path, err))?;
        if !status.success() {
            return Err(if errors.is_empty() {
                CodecError::FfmpegExit {
                    path: path.to_path_buf(),
                    status: status.to_string(),
                }
            } else {
                CodecError::ffmpeg(path, errors.join("; "))
            });
        }
        for msg in &errors {
            tracing::warn!("ffmpeg ({}): {msg}", path.display());
        }

        let (width, height) = frames
            .first()
            .map(|frame| (frame.width(), frame.height()))
            .ok_or_else(|| CodecError::EmptyVideo(path.to_path_buf()))?;

        Ok(DecodedVideo {
            metadata: VideoMetadata {
                width,
                height,
                fps: fps.unwrap_or(0.0),
                frame_count: frames.len(),
            },
            frames,
        })
    }
}

impl VideoEncoder for FfmpegCodec {
    fn encode(
        &self,
        path: &Path,
        frames: &[RgbImage],
        config: &EncoderConfig,
    ) -> Result<(), CodecError> {
        let (width, height) = uniform_dimensions(frames)?;
        if config.framerate == 0 {
            return Err(CodecError::invalid_param("framerate must be positive"));
        }

        let output = path.to_string_lossy();
        let mut command = FfmpegCommand::new();
        // Everything about the input has to go before `input`.
        command
            .hide_banner()
            .format("rawvideo")
            .pix_fmt("rgb24")
            .size(width, height)
            .rate(config.framerate as f32)
            .input("-")
            .codec_video(config.codec.ffmpeg_encoder())
            .pix_fmt(config.pixel_format.ffmpeg_name());
        if matches!(config.codec, Codec::H264 | Codec::Hevc) {
            command.args(["-preset", config.preset.x26x_name()]);
        }
        if let Some(crf) = config.crf {
            command.args(["-crf".to_owned(), crf.to_string()]);
        }
        command.overwrite().output(&*output);

        let mut child = command.spawn().map_err(CodecError::FailedToStartFfmpeg)?;
        let mut stdin = child
            .take_stdin()
            .ok_or_else(|| CodecError::ffmpeg(path, "ffmpeg stdin not available"))?;
        let events = child
            .iter()
            .map_err(|err| CodecError::ffmpeg(path, err.to_string()))?;

        let log_path = path.to_path_buf();
        let log_reader = std::thread::Builder::new()
            .name("ffmpeg-encode-log".to_owned())
            .spawn(move || collect_errors(events, &log_path))
            .map_err(|err| CodecError::io(path, err))?;

        let mut write_error = None;
        for frame in frames {
            if let Err(err) = stdin.write_all(frame.as_raw()) {
                write_error = Some(err);
                break;
            }
        }
        drop(stdin); // EOF lets ffmpeg finish the container

        let errors = log_reader
            .join()
            .map_err(|_| CodecError::ffmpeg(path, "ffmpeg log reader panicked"))?;
        let status = child.wait().map_err(|err| CodecError::io(path, err))?;

        if !status.success() || write_error.is_some() {
            if !errors.is_empty() {
                return Err(CodecError::ffmpeg(path, errors.join("; ")));
            }
            if let Some(err) = write_error {
                return Err(CodecError::io(path, err));
            }
            return Err(CodecError::FfmpegExit {
                path: path.to_path_buf(),
                status: status.to_string(),
            });
        }

        tracing::debug!(
            "encoded {} frames ({}x{}) to {} at {} fps",
            frames.len(),
            width,
            height,
            path.display(),
            config.framerate
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    // Needs an ffmpeg binary; skipped silently when it is missing.
    #[test]
    fn test_roundtrip_with_ffmpeg() {
        if !FfmpegCodec::is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let frames = (0..12u8)
            .map(|i| RgbImage::from_pixel(64, 48, Rgb([i * 20, 128, 255 - i * 20])))
            .collect::<Vec<_>>();

        let codec = FfmpegCodec::new();
        codec
            .encode(&path, &frames, &EncoderConfig::new(30))
            .unwrap();
        let video = codec.decode(&path).unwrap();

        assert_eq!(video.metadata.frame_count, 12);
        assert_eq!((video.metadata.width, video.metadata.height), (64, 48));
        assert!((video.metadata.fps - 30.0).abs() < 0.5);
    }

    #[test]
    fn test_encode_rejects_empty() {
        let codec = FfmpegCodec::new();
        let err = codec
            .encode(Path::new("unused.mp4"), &[], &EncoderConfig::default())
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidParam(_)));
    }
}
