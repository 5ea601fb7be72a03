// scanlight-device/src/gst_gateway.rs
// GStreamer-backed gateway: v4l2src → videoconvert → GRAY8 appsink.

use gst::prelude::*;
use tracing::{debug, warn};

use crate::{
    ConstraintSet, ConstraintValue, DeviceError, DeviceGateway, DeviceItem, FrameSample, Result,
    StreamInfo,
};

// How long acquire waits for the first frame before declaring the
// device unusable, and how long capture waits per pull.
const FIRST_FRAME_TIMEOUT_S: u64 = 5;
const PULL_TIMEOUT_MS: u64 = 500;

struct LiveStream {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    info: StreamInfo,
}

/// [`DeviceGateway`] over the host GStreamer stack.
///
/// Permission on this backend is recorded as a flag after a successful
/// probe open; there is no OS-level prompt to re-query, so
/// `check_permission` reports whether a probe has succeeded.
pub struct GstGateway {
    granted: bool,
    live: Option<LiveStream>,
}

impl GstGateway {
    pub fn new() -> Self {
        Self {
            granted: false,
            live: None,
        }
    }

    fn open_pipeline(device_id: &str) -> Result<LiveStream> {
        let acq = |reason: String| DeviceError::AcquisitionFailed {
            device: device_id.to_owned(),
            reason,
        };

        gst::init().map_err(|e| acq(e.to_string()))?;

        let pipe_str = format!(
            "v4l2src name=src device={id} ! videoconvert ! video/x-raw,format=GRAY8 \
            ! queue leaky=2 max-size-buffers=4 ! appsink name=sink emit-signals=false sync=false",
            id = device_id
        );

        let pipeline = gst::parse::launch(&pipe_str)
            .map_err(|e| acq(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| acq("parsed element is not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| acq("appsink element not found".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| acq("appsink downcast failed".into()))?;

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(acq(e.to_string()));
        }

        // Geometry is only known once the first frame arrives.
        let first = appsink.try_pull_sample(gst::ClockTime::from_seconds(FIRST_FRAME_TIMEOUT_S));
        let Some(sample) = first else {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(acq("timed out waiting for first frame".into()));
        };

        let info = match sample_geometry(&sample) {
            Ok(info) => info,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(acq(e.to_string()));
            }
        };

        debug!(device = device_id, width = info.width, height = info.height, "stream attached");
        Ok(LiveStream {
            pipeline,
            appsink,
            info,
        })
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.live.as_ref().map(|l| l.info)
    }
}

impl Default for GstGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceGateway for GstGateway {
    fn check_permission(&self) -> impl std::future::Future<Output = Result<bool>> + Send {
        let granted = self.granted;
        async move { Ok(granted) }
    }

    fn request_permission(&mut self) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            gst::init().map_err(|e| DeviceError::PermissionDenied(e.to_string()))?;

            // Open the default device on the same source element acquire
            // uses, just long enough to prove access, then tear it down.
            let probe = gst::parse::launch("v4l2src num-buffers=1 ! fakesink")
                .map_err(|e| DeviceError::PermissionDenied(e.to_string()))?;

            if let Err(e) = probe.set_state(gst::State::Playing) {
                let _ = probe.set_state(gst::State::Null);
                return Err(DeviceError::PermissionDenied(e.to_string()));
            }
            let (outcome, _, _) = probe.state(gst::ClockTime::from_seconds(FIRST_FRAME_TIMEOUT_S));
            let _ = probe.set_state(gst::State::Null);
            outcome.map_err(|e| DeviceError::PermissionDenied(e.to_string()))?;

            self.granted = true;
            debug!("capture permission granted");
            Ok(())
        }
    }

    fn acquire(&mut self, device_id: &str) -> impl std::future::Future<Output = Result<StreamInfo>> + Send {
        let device_id = device_id.to_owned();
        async move {
            // One live stream per gateway.
            self.release();
            let live = Self::open_pipeline(&device_id)?;
            let info = live.info;
            self.live = Some(live);
            Ok(info)
        }
    }

    fn release(&mut self) {
        if let Some(live) = self.live.take() {
            let _ = live.pipeline.set_state(gst::State::Null);
            debug!("stream released");
        }
    }

    fn enumerate(&mut self) -> impl std::future::Future<Output = Result<Vec<DeviceItem>>> + Send {
        let granted = self.granted;
        async move {
            gst::init().map_err(|e| DeviceError::Monitor(e.to_string()))?;
            if !granted {
                debug!("enumerating before permission probe; labels may be empty");
            }

            let monitor = gst::DeviceMonitor::new();
            monitor.add_filter(Some("Video/Source"), None);
            monitor
                .start()
                .map_err(|e| DeviceError::Monitor(e.to_string()))?;
            let devices = monitor.devices();
            monitor.stop();

            let items: Vec<DeviceItem> = devices
                .iter()
                .map(|dev| {
                    let label = dev.display_name().to_string();
                    let id = dev
                        .properties()
                        .and_then(|props| props.get::<String>("device.path").ok())
                        .unwrap_or_else(|| label.clone());
                    DeviceItem { id, label }
                })
                .collect();

            if items.is_empty() {
                return Err(DeviceError::NoDevicesFound);
            }
            Ok(items)
        }
    }

    fn capture(&mut self) -> Result<FrameSample> {
        let live = self.live.as_ref().ok_or(DeviceError::SurfaceMissing)?;
        let sample = live
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
            .ok_or_else(|| DeviceError::PullSample("timed out waiting for frame".into()))?;
        sample_to_frame(sample)
    }

    fn apply_constraints(&mut self, set: &ConstraintSet) -> Result<()> {
        let live = self.live.as_ref().ok_or(DeviceError::NoActiveStream)?;
        let src = live
            .pipeline
            .by_name("src")
            .ok_or(DeviceError::SurfaceMissing)?;

        for (name, value) in set.iter() {
            let Some(pspec) = src.find_property(name) else {
                warn!(constraint = %name, "constraint not supported by source; skipping");
                continue;
            };
            let value: gst::glib::Value = match value {
                ConstraintValue::Bool(b) => b.to_value(),
                ConstraintValue::Int(i) => (*i as i32).to_value(),
                ConstraintValue::Float(f) => f.to_value(),
                ConstraintValue::Text(s) => s.to_value(),
            };
            if value.type_() != pspec.value_type() {
                warn!(constraint = %name, "constraint value type mismatch; skipping");
                continue;
            }
            src.set_property_from_value(name, &value);
            debug!(constraint = %name, "constraint applied");
        }
        Ok(())
    }

    fn query_capability(&self, name: &str) -> Result<bool> {
        let live = self.live.as_ref().ok_or(DeviceError::NoActiveStream)?;
        let src = live
            .pipeline
            .by_name("src")
            .ok_or(DeviceError::SurfaceMissing)?;
        Ok(src.find_property(name).is_some())
    }

    fn has_stream(&self) -> bool {
        self.live.is_some()
    }
}

impl Drop for GstGateway {
    fn drop(&mut self) {
        self.release();
    }
}

fn sample_geometry(sample: &gst::Sample) -> Result<StreamInfo> {
    let caps = sample.caps().ok_or(DeviceError::MissingCaps)?;
    let s = caps.structure(0).ok_or(DeviceError::MissingStructure)?;
    let width = s
        .get::<i32>("width")
        .map_err(|e| DeviceError::FieldError(e.to_string()))? as u32;
    let height = s
        .get::<i32>("height")
        .map_err(|e| DeviceError::FieldError(e.to_string()))? as u32;
    Ok(StreamInfo { width, height })
}

/// Convert a `gst::Sample` into our [`FrameSample`] luma wrapper.
fn sample_to_frame(sample: gst::Sample) -> Result<FrameSample> {
    let info = sample_geometry(&sample)?;
    let buffer = sample.buffer().ok_or(DeviceError::MissingBuffer)?;

    let map = buffer
        .map_readable()
        .map_err(|e| DeviceError::BufferMap(e.to_string()))?;
    let expected = (info.width as usize) * (info.height as usize);
    if map.size() < expected {
        return Err(DeviceError::BufferMap(format!(
            "short luma buffer: {} < {}",
            map.size(),
            expected
        )));
    }
    let pixels = map.as_slice()[..expected].to_vec();
    drop(map);

    Ok(FrameSample {
        pixels,
        width: info.width,
        height: info.height,
    })
}

// ---------------------------------------------------------------------------
// Integration test (cargo test -- --nocapture) – skipped on CI without camera
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn acquire_and_capture_one() {
        let mut gw = GstGateway::new();
        gw.request_permission().await.expect("probe");
        let devices = gw.enumerate().await.expect("devices");
        let info = gw.acquire(&devices[0].id).await.expect("acquire");
        let frame = gw.capture().expect("frame");
        assert_eq!(frame.width, info.width);
        assert_eq!(frame.pixels.len(), (info.width * info.height) as usize);
        gw.release();
        assert!(!gw.has_stream());
    }
}
