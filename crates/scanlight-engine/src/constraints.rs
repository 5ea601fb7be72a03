// scanlight-engine/src/constraints.rs
// Mutable device settings for the live stream.  The set only commits
// after the gateway accepts it, so a failed apply leaves no trace.

use scanlight_device::{ConstraintSet, DeviceGateway, Result, TORCH};
use tracing::debug;

/// Owns the session's constraint set and the derived torch flag.
#[derive(Debug, Default)]
pub struct ConstraintController {
    set: ConstraintSet,
    torch_enabled: bool,
}

impl ConstraintController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `incoming` into the active set and pushes the result to
    /// the live stream.  Fails with `NoActiveStream` when nothing is live.
    pub fn apply<G: DeviceGateway>(&mut self, gateway: &mut G, incoming: &ConstraintSet) -> Result<()> {
        let mut candidate = self.set.clone();
        candidate.merge(incoming);
        gateway.apply_constraints(&candidate)?;

        if let Some(scanlight_device::ConstraintValue::Bool(on)) = incoming.get(TORCH) {
            self.torch_enabled = *on;
        }
        self.set = candidate;
        Ok(())
    }

    /// Flips the torch flag, derives the constraint entry and applies it.
    /// Returns the new flag value.  On failure the flag and the set are
    /// unchanged.
    pub fn toggle_torch<G: DeviceGateway>(&mut self, gateway: &mut G) -> Result<bool> {
        let next = !self.torch_enabled;
        let mut candidate = self.set.clone();
        candidate.set_bool(TORCH, next);
        gateway.apply_constraints(&candidate)?;

        self.set = candidate;
        self.torch_enabled = next;
        debug!(enabled = next, "torch toggled");
        Ok(next)
    }

    pub fn torch_enabled(&self) -> bool {
        self.torch_enabled
    }

    pub fn set(&self) -> &ConstraintSet {
        &self.set
    }

    /// Drops session-scoped state when the stream goes away.
    pub fn reset(&mut self) {
        self.set = ConstraintSet::new();
        self.torch_enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlight_device::{
        ConstraintValue, DeviceError, DeviceItem, FrameSample, StreamInfo,
    };
    use std::future::Future;

    /// Gateway stub: only constraint pushes matter here.
    struct StubGateway {
        live: bool,
        applied: Vec<ConstraintSet>,
    }

    impl DeviceGateway for StubGateway {
        fn check_permission(&self) -> impl Future<Output = Result<bool>> + Send {
            async { Ok(true) }
        }
        fn request_permission(&mut self) -> impl Future<Output = Result<()>> + Send {
            async { Ok(()) }
        }
        fn acquire(&mut self, _device_id: &str) -> impl Future<Output = Result<StreamInfo>> + Send {
            async {
                Ok(StreamInfo {
                    width: 0,
                    height: 0,
                })
            }
        }
        fn release(&mut self) {}
        fn enumerate(&mut self) -> impl Future<Output = Result<Vec<DeviceItem>>> + Send {
            async { Ok(Vec::new()) }
        }
        fn capture(&mut self) -> Result<FrameSample> {
            Err(DeviceError::SurfaceMissing)
        }
        fn apply_constraints(&mut self, set: &ConstraintSet) -> Result<()> {
            if !self.live {
                return Err(DeviceError::NoActiveStream);
            }
            self.applied.push(set.clone());
            Ok(())
        }
        fn query_capability(&self, _name: &str) -> Result<bool> {
            Ok(self.live)
        }
        fn has_stream(&self) -> bool {
            self.live
        }
    }

    #[test]
    fn toggle_without_stream_leaves_set_unchanged() {
        let mut gw = StubGateway {
            live: false,
            applied: Vec::new(),
        };
        let mut ctrl = ConstraintController::new();

        let err = ctrl.toggle_torch(&mut gw).unwrap_err();
        assert!(matches!(err, DeviceError::NoActiveStream));
        assert!(!ctrl.torch_enabled());
        assert!(ctrl.set().is_empty());
    }

    #[test]
    fn toggle_flips_and_derives_entry() {
        let mut gw = StubGateway {
            live: true,
            applied: Vec::new(),
        };
        let mut ctrl = ConstraintController::new();

        assert!(ctrl.toggle_torch(&mut gw).unwrap());
        assert!(ctrl.torch_enabled());
        assert_eq!(ctrl.set().get(TORCH), Some(&ConstraintValue::Bool(true)));

        assert!(!ctrl.toggle_torch(&mut gw).unwrap());
        assert!(!ctrl.torch_enabled());
        assert_eq!(gw.applied.len(), 2);
    }

    #[test]
    fn apply_merges_and_tracks_torch() {
        let mut gw = StubGateway {
            live: true,
            applied: Vec::new(),
        };
        let mut ctrl = ConstraintController::new();

        let mut first = ConstraintSet::new();
        first.set("brightness", ConstraintValue::Int(5));
        ctrl.apply(&mut gw, &first).unwrap();

        let mut second = ConstraintSet::new();
        second.set_bool(TORCH, true);
        ctrl.apply(&mut gw, &second).unwrap();

        assert!(ctrl.torch_enabled());
        assert_eq!(ctrl.set().len(), 2);
        // The push carried the merged set, not just the delta.
        assert_eq!(gw.applied[1].len(), 2);
    }
}
