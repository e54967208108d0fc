use super::VideoReader;
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::ffi;
use opencv::{core, prelude::*};
use std::path::Path;

/// Video reader backed by FFmpeg via ffmpeg-next. CPU decoding only.
pub struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Lazily created on first frame (source format is only known then).
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    width: u32,
    height: u32,
    source_fps: f64,
    /// Stream time base in seconds per tick, for mapping decoded timestamps
    /// back to frame indices.
    time_base: f64,
    /// Whether we've sent EOF to the decoder.
    eof_sent: bool,
    /// Frame decoded while skipping forward after a seek, held for the next
    /// `read_frame`.
    pending: Option<ffmpeg_next::util::frame::Video>,
}

// SAFETY: FfmpegReader is only ever used from one thread at a time. The raw
// pointers inside ffmpeg-next types are not shared across threads.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn new(path: &str) -> Result<Self> {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;

        let source = Path::new(path);
        if !source.exists() {
            return Err(anyhow!("Video file not found: {}", path));
        }

        let input_ctx = ffmpeg_next::format::input(&source).context("Failed to open video file")?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow!("No video stream found in {}", path))?;

        let video_stream_index = video_stream.index();

        let tb = video_stream.time_base();
        let time_base = if tb.denominator() > 0 {
            tb.numerator() as f64 / tb.denominator() as f64
        } else {
            0.0
        };

        let rational_fps = video_stream.avg_frame_rate();
        let source_fps = if rational_fps.denominator() > 0 {
            rational_fps.numerator() as f64 / rational_fps.denominator() as f64
        } else {
            0.0
        };

        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
                .context("Failed to create decoder context")?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .context("Failed to open video decoder")?;

        let width = decoder.width();
        let height = decoder.height();

        tracing::debug!(
            "FfmpegReader: opened {}, fps={:.2}, {}x{}",
            path,
            source_fps,
            width,
            height
        );

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            scaler: None, // created lazily on first frame
            width,
            height,
            source_fps,
            time_base,
            eof_sent: false,
            pending: None,
        })
    }

    /// Frame index of a decoded frame, from its best-effort timestamp. `None`
    /// when the frame carries no timestamp.
    fn decoded_frame_index(&self, frame: &ffmpeg_next::util::frame::Video) -> Option<u64> {
        frame
            .timestamp()
            .map(|ts| frame_index(ts, self.time_base, self.source_fps))
    }

    /// Core receive/feed loop. `Ok(false)` means end of stream.
    fn decode_next(&mut self, target: &mut ffmpeg_next::util::frame::Video) -> Result<bool> {
        loop {
            // 1. Try to receive a decoded frame
            match self.decoder.receive_frame(target) {
                Ok(()) => return Ok(true),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Ok(false);
                    }
                    // Continue to feeding packets
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(false),
                Err(e) => return Err(anyhow!("Decoder error: {}", e)),
            }

            // 2. Feed packets until we find a video packet OR reach EOF
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            let mut found_packet = false;
            while packet.read(&mut self.input_ctx).is_ok() {
                if packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&packet)
                        .context("Failed to send packet to decoder")?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                // EOF reached in input file; notify decoder to flush
                self.decoder
                    .send_eof()
                    .context("Failed to send EOF to decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn get_or_create_scaler(
        &mut self,
        src_format: ffmpeg_next::format::Pixel,
    ) -> Result<&mut ffmpeg_next::software::scaling::Context> {
        if self.scaler.is_none() {
            let scaler = ffmpeg_next::software::scaling::Context::get(
                src_format,
                self.width,
                self.height,
                ffmpeg_next::format::Pixel::BGR24,
                self.width,
                self.height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .context("Failed to create scaler")?;
            self.scaler = Some(scaler);
        }
        Ok(self.scaler.as_mut().unwrap())
    }
}

/// Map a stream timestamp to the frame index it lands on.
fn frame_index(timestamp: i64, time_base: f64, fps: f64) -> u64 {
    let seconds = timestamp as f64 * time_base;
    (seconds * fps).round().max(0.0) as u64
}

/// Convert a BGR24 ffmpeg frame to an OpenCV Mat. This performs a deep copy so
/// the Mat owns its data after the source frame is dropped.
fn bgr_frame_to_mat(frame: &ffmpeg_next::util::frame::Video) -> Result<core::Mat> {
    let width = frame.width() as i32;
    let height = frame.height() as i32;
    let data = frame.data(0);
    let stride = frame.stride(0);

    let mut mat = unsafe { core::Mat::new_rows_cols(height, width, core::CV_8UC3)? };

    for y in 0..height as usize {
        let src_offset = y * stride;
        let src_row = &data[src_offset..src_offset + (width as usize * 3)];
        let dst_ptr = mat.ptr_mut(y as i32)?;
        unsafe {
            std::ptr::copy_nonoverlapping(src_row.as_ptr(), dst_ptr, width as usize * 3);
        }
    }

    Ok(mat)
}

impl VideoReader for FfmpegReader {
    fn source_fps(&self) -> f64 {
        self.source_fps
    }

    fn seek_to_frame(&mut self, frame_num: u64) -> Result<()> {
        if self.source_fps <= 0.0 {
            return Err(anyhow!("Cannot seek without a usable frame rate"));
        }

        let time_secs = frame_num as f64 / self.source_fps;
        let timestamp = (time_secs * ffi::AV_TIME_BASE as f64) as i64;
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .context("Failed to seek")?;
        self.decoder.flush();
        self.eof_sent = false;
        self.scaler = None; // reset scaler on seek (format might change)
        self.pending = None;

        // The container seek lands on the keyframe at or before the target,
        // which can be a whole GOP earlier. Decode and discard until the
        // target frame comes out, then hold it for the next read_frame.
        loop {
            let mut raw = ffmpeg_next::util::frame::Video::empty();
            if !self.decode_next(&mut raw)? {
                // Target lies past the end of the stream; read_frame reports
                // the end.
                return Ok(());
            }
            match self.decoded_frame_index(&raw) {
                Some(index) if index < frame_num => continue,
                _ => {
                    self.pending = Some(raw);
                    return Ok(());
                }
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<core::Mat>> {
        let raw = match self.pending.take() {
            Some(raw) => raw,
            None => {
                let mut raw = ffmpeg_next::util::frame::Video::empty();
                if !self.decode_next(&mut raw)? {
                    return Ok(None);
                }
                raw
            }
        };

        let src_format = raw.format();
        let scaler = self.get_or_create_scaler(src_format)?;
        let mut bgr = ffmpeg_next::util::frame::Video::empty();
        scaler.run(&raw, &mut bgr).context("Scaler failed")?;

        Ok(Some(bgr_frame_to_mat(&bgr)?))
    }
}
