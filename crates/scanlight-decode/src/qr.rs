// scanlight-decode/src/qr.rs
// rqrr-backed QR decoder.  Detection is CPU-bound, so each attempt
// runs on the blocking pool rather than the scan loop's thread.

use std::future::Future;

use tracing::debug;

use crate::{Corner, DecodeError, DecodeOptions, DecodedItem, FrameSample, Result, Symbology};

/// QR symbol decoder over 8-bit luma frames.
#[derive(Debug, Default)]
pub struct QrDecoder;

impl QrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl crate::Decoder for QrDecoder {
    fn decode(
        &mut self,
        sample: &FrameSample,
        options: &DecodeOptions,
    ) -> impl Future<Output = Result<Vec<DecodedItem>>> + Send {
        let allowed = options.allows(Symbology::Qr);
        let width = sample.width;
        let height = sample.height;
        let pixels = sample.pixels.clone();

        async move {
            if !allowed {
                return Ok(Vec::new());
            }
            let expected = width as usize * height as usize;
            if pixels.len() < expected {
                return Err(DecodeError::BadFrame(format!(
                    "luma buffer too short: {} < {}",
                    pixels.len(),
                    expected
                )));
            }
            tokio::task::spawn_blocking(move || decode_luma(&pixels, width, height))
                .await
                .map_err(|e| DecodeError::Task(e.to_string()))
        }
    }
}

fn decode_luma(pixels: &[u8], width: u32, height: u32) -> Vec<DecodedItem> {
    let w = width as usize;
    let h = height as usize;
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| pixels[y * w + x]);
    let grids = prepared.detect_grids();

    let mut items = Vec::with_capacity(grids.len());
    for grid in grids {
        let corners = grid.bounds.map(|p| Corner {
            x: p.x as f32,
            y: p.y as f32,
        });
        match grid.decode() {
            Ok((_meta, payload)) => {
                debug!(payload = %payload, "decoded qr symbol");
                items.push(DecodedItem { payload, corners });
            }
            Err(e) => {
                // A located grid that fails content decode is dropped;
                // the surrounding attempt still counts as performed.
                debug!(error = %e, "grid located but content decode failed");
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Decoder;

    #[test]
    fn blank_frame_has_no_symbols() {
        let pixels = vec![255u8; 64 * 64];
        assert!(decode_luma(&pixels, 64, 64).is_empty());
    }

    #[tokio::test]
    async fn format_restriction_skips_work() {
        let mut dec = QrDecoder::new();
        let sample = FrameSample {
            pixels: vec![0u8; 16],
            width: 4,
            height: 4,
        };
        let opts = DecodeOptions {
            formats: vec![Symbology::Code128],
        };
        let items = dec.decode(&sample, &opts).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn short_buffer_is_rejected() {
        let mut dec = QrDecoder::new();
        let sample = FrameSample {
            pixels: vec![0u8; 3],
            width: 4,
            height: 4,
        };
        let err = dec
            .decode(&sample, &DecodeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::BadFrame(_)));
    }
}
