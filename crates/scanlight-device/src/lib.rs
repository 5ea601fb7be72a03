// scanlight-device/src/lib.rs
// ============================================================
// Device acquisition layer for scanlight
// Owns the physical capture device: permission probing,
// per-device stream acquisition, frame pulls and mutable
// device constraints (torch etc.).
// ------------------------------------------------------------
// Public API:
//   * DeviceGateway – capability trait, substitutable in tests
//   * GstGateway    – GStreamer/v4l2 backed implementation
// ============================================================

//! scanlight – device layer
//!
//! Everything that touches the host camera goes through the
//! [`DeviceGateway`] trait so the engine never calls platform APIs
//! directly and tests can substitute a deterministic fake.  The
//! bundled [`GstGateway`] drives a `v4l2src → videoconvert → appsink`
//! pipeline and delivers frames as [`FrameSample`] luma buffers.
//!
//! A gateway owns at most one live stream at a time; every successful
//! `acquire` is balanced by exactly one `release`.

use std::collections::BTreeMap;
use std::future::Future;

use thiserror::Error;

mod gst_gateway;
pub use gst_gateway::GstGateway;

/// Constraint name for the camera illuminator.
pub const TORCH: &str = "torch";

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("failed to open device `{device}`: {reason}")]
    AcquisitionFailed { device: String, reason: String },
    #[error("no capture devices found")]
    NoDevicesFound,
    #[error("no active stream")]
    NoActiveStream,
    #[error("capture surface missing")]
    SurfaceMissing,
    #[error("device monitor failed: {0}")]
    Monitor(String),
    #[error("failed to pull sample: {0}")]
    PullSample(String),
    #[error("sample has no buffer")]
    MissingBuffer,
    #[error("sample has no caps")]
    MissingCaps,
    #[error("caps missing struct")]
    MissingStructure,
    #[error("failed to read caps field: {0}")]
    FieldError(String),
    #[error("buffer map failed: {0}")]
    BufferMap(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// A single captured still image, 8-bit luma, packed rows.
/// Created per attempt and consumed immediately by the decoder.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Negotiated output geometry of a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
}

/// One enumerable capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceItem {
    pub id: String,
    pub label: String,
}

/// A single mutable device-level setting.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Named device constraints, applied to the live stream as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    entries: BTreeMap<String, ConstraintValue>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: ConstraintValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) {
        self.set(name, ConstraintValue::Bool(value));
    }

    pub fn get(&self, name: &str) -> Option<&ConstraintValue> {
        self.entries.get(name)
    }

    /// Overlays `other` on top of this set, replacing duplicate names.
    pub fn merge(&mut self, other: &ConstraintSet) {
        for (name, value) in other.iter() {
            self.entries.insert(name.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConstraintValue)> {
        self.entries.iter()
    }
}

/// Capability boundary around the host camera stack.
///
/// Async methods are the acquisition handshake (permission prompts and
/// device opens suspend); frame pulls and constraint pushes on an
/// already-live stream are synchronous.
pub trait DeviceGateway: Send + 'static {
    /// Whether capture permission has been granted.  Never prompts.
    fn check_permission(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Prompts for permission by opening a short-lived probe stream.
    /// The probe is released before this returns, granted or not.
    fn request_permission(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Opens the given device and negotiates an output stream.
    fn acquire(&mut self, device_id: &str) -> impl Future<Output = Result<StreamInfo>> + Send;

    /// Stops every track of the live stream.  Idempotent.
    fn release(&mut self);

    /// Lists available capture devices.  Labels are only readable once
    /// permission has been granted; callers must tolerate empty labels.
    fn enumerate(&mut self) -> impl Future<Output = Result<Vec<DeviceItem>>> + Send;

    /// Pulls one frame from the live stream.
    /// Fails with [`DeviceError::SurfaceMissing`] when no stream is live,
    /// which is an invariant breach rather than a recoverable condition.
    fn capture(&mut self) -> Result<FrameSample>;

    /// Pushes the full constraint set to the live stream.
    fn apply_constraints(&mut self, set: &ConstraintSet) -> Result<()>;

    /// Whether the live stream advertises the named capability.
    fn query_capability(&self, name: &str) -> Result<bool>;

    fn has_stream(&self) -> bool;
}
