// scanlight-decode/src/lib.rs
// ============================================================
// Decode boundary for scanlight
// The engine never sees the decode algorithm's own input or
// output shapes – only the Decoder trait and the three-way
// ScanOutcome produced by DecodeBridge.
// ============================================================

//! scanlight – decode layer
//!
//! This crate provides the backend-agnostic [`Decoder`] trait plus a
//! concrete **[`QrDecoder`]** built on `rqrr`.  Swapping in another
//! symbology engine is a matter of implementing the trait – the outer
//! API stays identical.
//!
//! [`DecodeBridge`] normalizes a decoder call into [`ScanOutcome`]:
//! one-or-more matches, zero matches, or a per-frame failure.  The
//! bridge itself never returns an error; per-frame failures are data.

use std::future::Future;

use thiserror::Error;
use tracing::debug;

pub use scanlight_device::FrameSample;

mod qr;
pub use qr::QrDecoder;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("decode task failed: {0}")]
    Task(String),
    #[error("malformed frame: {0}")]
    BadFrame(String),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Symbologies a decoder may be asked to restrict matching to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    Qr,
    MicroQr,
    DataMatrix,
    Aztec,
    Pdf417,
    Code128,
    Ean13,
}

/// Per-session decode settings.  An empty format list means "any".
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    pub formats: Vec<Symbology>,
}

impl DecodeOptions {
    pub fn allows(&self, symbology: Symbology) -> bool {
        self.formats.is_empty() || self.formats.contains(&symbology)
    }
}

/// A corner of a decoded symbol, in frame-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: f32,
    pub y: f32,
}

/// One decoded symbol: payload plus its quadrilateral region.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedItem {
    pub payload: String,
    pub corners: [Corner; 4],
}

/// Three-way result of one decode attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Results(Vec<DecodedItem>),
    Empty,
    Failure(String),
}

/// External decode capability.
///
/// Implementations receive one [`FrameSample`] per attempt and return
/// every symbol found.  No retry logic belongs here; a failed attempt
/// is reported and the next frame tried.
pub trait Decoder: Send + 'static {
    fn decode(
        &mut self,
        sample: &FrameSample,
        options: &DecodeOptions,
    ) -> impl Future<Output = Result<Vec<DecodedItem>>> + Send;
}

/// Adapter between the sampling loop and the [`Decoder`] capability.
pub struct DecodeBridge<D: Decoder> {
    decoder: D,
    options: DecodeOptions,
}

impl<D: Decoder> DecodeBridge<D> {
    pub fn new(decoder: D, options: DecodeOptions) -> Self {
        Self { decoder, options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Runs one decode attempt and folds the result into a [`ScanOutcome`].
    pub async fn decode(&mut self, sample: &FrameSample) -> ScanOutcome {
        match self.decoder.decode(sample, &self.options).await {
            Ok(items) if items.is_empty() => ScanOutcome::Empty,
            Ok(items) => {
                debug!(count = items.len(), "decode attempt matched");
                ScanOutcome::Results(items)
            }
            Err(e) => {
                debug!(error = %e, "decode attempt failed");
                ScanOutcome::Failure(e.to_string())
            }
        }
    }
}

/// Builds a one-shot [`FrameSample`] from a loaded image, for static
/// scans that bypass the camera loop.
pub fn sample_from_image(image: &image::DynamicImage) -> FrameSample {
    let luma = image.to_luma8();
    FrameSample {
        width: luma.width(),
        height: luma.height(),
        pixels: luma.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<Result<Vec<DecodedItem>>>);

    impl Decoder for Scripted {
        fn decode(
            &mut self,
            _sample: &FrameSample,
            _options: &DecodeOptions,
        ) -> impl Future<Output = Result<Vec<DecodedItem>>> + Send {
            let next = if self.0.is_empty() {
                Ok(Vec::new())
            } else {
                self.0.remove(0)
            };
            async move { next }
        }
    }

    fn blank_sample() -> FrameSample {
        FrameSample {
            pixels: vec![0u8; 16],
            width: 4,
            height: 4,
        }
    }

    fn item() -> DecodedItem {
        DecodedItem {
            payload: "hello".into(),
            corners: [
                Corner { x: 0.0, y: 0.0 },
                Corner { x: 10.0, y: 0.0 },
                Corner { x: 10.0, y: 10.0 },
                Corner { x: 0.0, y: 10.0 },
            ],
        }
    }

    #[tokio::test]
    async fn bridge_normalizes_matches() {
        let mut bridge = DecodeBridge::new(Scripted(vec![Ok(vec![item()])]), DecodeOptions::default());
        let outcome = bridge.decode(&blank_sample()).await;
        assert_eq!(outcome, ScanOutcome::Results(vec![item()]));
    }

    #[tokio::test]
    async fn bridge_normalizes_empty() {
        let mut bridge = DecodeBridge::new(Scripted(vec![Ok(Vec::new())]), DecodeOptions::default());
        assert_eq!(bridge.decode(&blank_sample()).await, ScanOutcome::Empty);
    }

    #[tokio::test]
    async fn bridge_normalizes_failure() {
        let mut bridge = DecodeBridge::new(
            Scripted(vec![Err(DecodeError::Task("boom".into()))]),
            DecodeOptions::default(),
        );
        match bridge.decode(&blank_sample()).await {
            ScanOutcome::Failure(reason) => assert!(reason.contains("boom")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn options_filtering() {
        let any = DecodeOptions::default();
        assert!(any.allows(Symbology::Qr));
        assert!(any.allows(Symbology::Code128));

        let qr_only = DecodeOptions {
            formats: vec![Symbology::Qr],
        };
        assert!(qr_only.allows(Symbology::Qr));
        assert!(!qr_only.allows(Symbology::Code128));
    }
}
