//! RTSP frame source backed by GStreamer.
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! appsink` configured for
//! raw RGB output. The source reports a clean EOS as end-of-stream and
//! everything else (bus errors, stalls, decode failures) as errors; the
//! capture loop decides how to recover.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceOptions};

pub struct RtspSource {
    description: String,
    options: SourceOptions,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    reached_eos: bool,
}

impl RtspSource {
    pub fn open(url: &str, options: SourceOptions) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse_launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        log::info!("rtsp source connected: {}", url);

        Ok(Self {
            description: url.to_string(),
            options,
            pipeline,
            appsink,
            reached_eos: false,
        })
    }

    /// How long to wait for a sample before declaring the stream stalled.
    /// Four frame intervals at the target rate, floored at 500ms.
    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.options.target_fps == 0 {
            500
        } else {
            (1000 / self.options.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    /// Drain pending bus messages; errors become read failures, EOS flags a
    /// clean end of stream.
    fn poll_bus(&mut self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(Duration::from_millis(0)) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.reached_eos = true;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl FrameSource for RtspSource {
    fn describe(&self) -> &str {
        &self.description
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.poll_bus()?;
        if self.reached_eos {
            return Ok(None);
        }

        let timeout = self.frame_timeout();
        let Some(sample) = self
            .appsink
            .try_pull_sample(timeout)
            .context("pull RTSP sample")?
        else {
            // No sample within the timeout: either the stream ended while we
            // were waiting, or it stalled.
            self.poll_bus()?;
            if self.reached_eos {
                return Ok(None);
            }
            return Err(anyhow!("RTSP stream stalled: {}", self.description));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Ok(Some(Frame::from_rgb8(pixels, width, height)?))
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to tear down RTSP pipeline: {}", e);
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride(0) as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    // Strided buffer: copy row by row.
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
