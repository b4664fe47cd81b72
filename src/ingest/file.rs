//! Local video file source using FFmpeg.
//!
//! Frames are decoded in-memory and converted to RGB24. Reaching the end of
//! the file is a read failure; the pipeline's reopen step rewinds to the start.

use ffmpeg_next as ffmpeg;

use super::{FrameSource, SourceConfig, SourceError, SourceStats};
use crate::frame::Frame;

pub struct FileSource {
    config: SourceConfig,
    state: Option<DecoderState>,
    frame_count: u64,
    read_failures: u64,
    width: u32,
    height: u32,
}

struct DecoderState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
}

impl FileSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            config,
            state: None,
            frame_count: 0,
            read_failures: 0,
        }
    }

    fn start_decoder(&self) -> anyhow::Result<DecoderState> {
        use anyhow::Context;

        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&self.config.uri)
            .with_context(|| format!("open '{}' with ffmpeg", self.config.uri))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        Ok(DecoderState {
            input,
            stream_index,
            decoder,
        })
    }

    fn decode_next(&mut self) -> anyhow::Result<Frame> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("{} is not open", self.config.uri))?;
        let (pixels, width, height) = decode_rgb(state)?;
        self.width = width;
        self.height = height;
        self.frame_count += 1;
        Frame::new(pixels, width, height, self.frame_count)
    }
}

fn decode_rgb(state: &mut DecoderState) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    use anyhow::Context;

    let mut decoded = ffmpeg::frame::Video::empty();
    let mut rgb = ffmpeg::frame::Video::empty();

    loop {
        if state.decoder.receive_frame(&mut decoded).is_ok() {
            let mut converter = decoded
                .converter(ffmpeg::util::format::pixel::Pixel::RGB24)
                .context("create ffmpeg scaler")?;
            converter
                .run(&decoded, &mut rgb)
                .context("scale frame to RGB")?;
            return frame_to_pixels(&rgb);
        }

        let Some((stream, packet)) = state.input.packets().next() else {
            anyhow::bail!("end of file");
        };
        if stream.index() != state.stream_index {
            continue;
        }
        state
            .decoder
            .send_packet(&packet)
            .context("send packet to ffmpeg decoder")?;
    }
}

impl FrameSource for FileSource {
    fn open(&mut self) -> Result<(), SourceError> {
        if self.state.is_some() {
            return Ok(());
        }
        let state = self
            .start_decoder()
            .map_err(|e| SourceError::DeviceUnavailable(format!("{:#}", e)))?;
        self.state = Some(state);
        log::info!("FileSource: opened {} (ffmpeg)", self.config.uri);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        self.decode_next().map_err(|e| {
            self.read_failures += 1;
            SourceError::ReadFailure(format!("{:#}", e))
        })
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("FileSource: closed {}", self.config.uri);
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            uri: self.config.uri.clone(),
            frames_captured: self.frame_count,
            read_failures: self.read_failures,
            width: self.width,
            height: self.height,
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    use anyhow::Context;

    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
