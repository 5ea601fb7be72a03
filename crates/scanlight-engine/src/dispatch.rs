// scanlight-engine/src/dispatch.rs
// Outcome routing: every performed decode attempt produces exactly one
// dispatch to every sink, in registration order.  Throttled no-op ticks
// dispatch nothing.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use scanlight_decode::{Corner, ScanOutcome};
use tracing::{debug, info, warn};

/// Subscriber to decode outcomes.  Invoked synchronously, in
/// registration order, once per performed attempt.  `Empty` is
/// delivered explicitly so transient feedback can be retracted.
pub trait OutcomeSink: Send {
    fn on_outcome(&mut self, outcome: &ScanOutcome);
}

impl<F> OutcomeSink for F
where
    F: FnMut(&ScanOutcome) + Send,
{
    fn on_outcome(&mut self, outcome: &ScanOutcome) {
        self(outcome)
    }
}

/// Routes outcomes to zero or more sinks.
pub struct ResultDispatcher {
    sinks: Vec<Box<dyn OutcomeSink>>,
    showing: bool,
}

impl ResultDispatcher {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            showing: false,
        }
    }

    pub fn subscribe(&mut self, sink: Box<dyn OutcomeSink>) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&mut self, outcome: &ScanOutcome) {
        for sink in &mut self.sinks {
            sink.on_outcome(outcome);
        }
        self.showing = matches!(outcome, ScanOutcome::Results(_));
    }

    /// Retracts presented feedback on session teardown.  Suppressed when
    /// nothing is showing, so sinks never see a redundant clear.
    pub fn clear(&mut self) {
        if self.showing {
            self.dispatch(&ScanOutcome::Empty);
        }
    }
}

impl Default for ResultDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracing sink.  Logs hit and clear edges rather than every tick, so a
/// stream of empty attempts stays quiet.
pub struct LogSink {
    showing: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self { showing: false }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeSink for LogSink {
    fn on_outcome(&mut self, outcome: &ScanOutcome) {
        match outcome {
            ScanOutcome::Results(items) => {
                if !self.showing {
                    if let Some(first) = items.first() {
                        info!(count = items.len(), first = %first.payload, "scan hit");
                    }
                }
                self.showing = true;
            }
            ScanOutcome::Empty => {
                if self.showing {
                    debug!("scan feedback cleared");
                }
                self.showing = false;
            }
            ScanOutcome::Failure(reason) => {
                warn!(%reason, "scan attempt failed");
            }
        }
    }
}

/// Presentation-facing overlay model: which regions to highlight and
/// for how long the hit flash lasts.  Pure state – the presentation
/// layer polls it; nothing here touches a display.
#[derive(Debug)]
pub struct FeedbackState {
    hold: Duration,
    regions: Vec<[Corner; 4]>,
    lit_until: Option<Instant>,
}

impl FeedbackState {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            regions: Vec::new(),
            lit_until: None,
        }
    }

    fn observe(&mut self, outcome: &ScanOutcome, now: Instant) {
        match outcome {
            ScanOutcome::Results(items) => {
                self.regions = items.iter().map(|i| i.corners).collect();
                self.lit_until = Some(now + self.hold);
            }
            ScanOutcome::Empty => {
                self.regions.clear();
                self.lit_until = None;
            }
            // Failures keep whatever was showing; the next Empty retracts it.
            ScanOutcome::Failure(_) => {}
        }
    }

    pub fn regions(&self) -> &[[Corner; 4]] {
        &self.regions
    }

    /// Whether the hit flash is still within its hold window.
    pub fn is_lit(&self, now: Instant) -> bool {
        self.lit_until.is_some_and(|until| now < until)
    }
}

/// Sink adapter sharing a [`FeedbackState`] with the presentation layer.
pub struct FeedbackSink {
    state: Arc<Mutex<FeedbackState>>,
}

impl FeedbackSink {
    pub fn new(hold: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(FeedbackState::new(hold))),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<FeedbackState>> {
        Arc::clone(&self.state)
    }
}

impl OutcomeSink for FeedbackSink {
    fn on_outcome(&mut self, outcome: &ScanOutcome) {
        if let Ok(mut state) = self.state.lock() {
            state.observe(outcome, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlight_decode::DecodedItem;

    fn quad() -> [Corner; 4] {
        [
            Corner { x: 0.0, y: 0.0 },
            Corner { x: 10.0, y: 0.0 },
            Corner { x: 10.0, y: 10.0 },
            Corner { x: 0.0, y: 10.0 },
        ]
    }

    fn results() -> ScanOutcome {
        ScanOutcome::Results(vec![DecodedItem {
            payload: "x".into(),
            corners: quad(),
        }])
    }

    #[test]
    fn sinks_run_in_registration_order() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = ResultDispatcher::new();
        let (a, b) = (Arc::clone(&log), Arc::clone(&log));
        dispatcher.subscribe(Box::new(move |_: &ScanOutcome| a.lock().unwrap().push("first")));
        dispatcher.subscribe(Box::new(move |_: &ScanOutcome| b.lock().unwrap().push("second")));

        dispatcher.dispatch(&ScanOutcome::Empty);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn clear_is_suppressed_when_nothing_shown() {
        let seen: Arc<Mutex<Vec<ScanOutcome>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&seen);
        let mut dispatcher = ResultDispatcher::new();
        dispatcher.subscribe(Box::new(move |o: &ScanOutcome| {
            sink_log.lock().unwrap().push(o.clone())
        }));

        dispatcher.clear();
        assert!(seen.lock().unwrap().is_empty());

        dispatcher.dispatch(&results());
        dispatcher.clear();
        let outcomes = seen.lock().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1], ScanOutcome::Empty);
    }

    #[test]
    fn clear_after_empty_is_suppressed() {
        let seen: Arc<Mutex<Vec<ScanOutcome>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&seen);
        let mut dispatcher = ResultDispatcher::new();
        dispatcher.subscribe(Box::new(move |o: &ScanOutcome| {
            sink_log.lock().unwrap().push(o.clone())
        }));

        dispatcher.dispatch(&results());
        dispatcher.dispatch(&ScanOutcome::Empty);
        dispatcher.clear();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn feedback_holds_then_retracts() {
        let now = Instant::now();
        let mut fb = FeedbackState::new(Duration::from_millis(500));

        fb.observe(&results(), now);
        assert_eq!(fb.regions().len(), 1);
        assert!(fb.is_lit(now + Duration::from_millis(499)));
        assert!(!fb.is_lit(now + Duration::from_millis(500)));

        fb.observe(&ScanOutcome::Empty, now);
        assert!(fb.regions().is_empty());
        assert!(!fb.is_lit(now));
    }

    #[test]
    fn feedback_survives_failures() {
        let now = Instant::now();
        let mut fb = FeedbackState::new(Duration::from_millis(500));
        fb.observe(&results(), now);
        fb.observe(&ScanOutcome::Failure("hiccup".into()), now);
        assert_eq!(fb.regions().len(), 1);
    }
}
