//! Bridge between profiling regions and an external profiler.
//!
//! [`RegionLayer`] is a `tracing_subscriber` layer that watches region spans
//! and forwards each enter/exit to a [`Profiler`] as a push/pop pair. Only
//! regions entered while the profiler is capturing are forwarded, and a pop
//! is only ever sent for a region whose push was sent, so the profiler sees a
//! balanced stack even when capture starts or stops mid-run.
//!
//! [`RegionRecorder`] is an in-memory profiler: it checks stack discipline per
//! thread and accumulates inclusive time per label.

use crate::region::{RegionColor, REGION_SPAN_NAME, REGION_TARGET};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// External profiler receiving nested region events.
///
/// Implementations must tolerate being called from several threads; each
/// thread produces its own properly nested push/pop sequence.
pub trait Profiler: Send + Sync {
    /// Start recording regions.
    fn start_capture(&self);

    /// Stop recording regions. Regions already pushed still get their pop.
    fn stop_capture(&self);

    /// Whether newly entered regions should be forwarded.
    fn is_capturing(&self) -> bool;

    /// A region was entered.
    fn push_range(&self, label: &str, color: RegionColor);

    /// The innermost region of the calling thread was exited.
    fn pop_range(&self, label: &str);
}

/// Per-span bookkeeping stored in the registry's span extensions.
struct RegionMeta {
    label: String,
    color: RegionColor,
    pushed: bool,
}

#[derive(Default)]
struct RegionFieldVisitor {
    label: Option<String>,
    color: Option<RegionColor>,
}

impl Visit for RegionFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "label" => self.label = Some(value.to_owned()),
            "color" => self.color = RegionColor::from_name(value),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "label" && self.label.is_none() {
            self.label = Some(format!("{value:?}"));
        }
    }
}

/// Layer forwarding region spans to a [`Profiler`].
pub struct RegionLayer<P: ?Sized> {
    profiler: Arc<P>,
}

impl<P: Profiler + ?Sized> RegionLayer<P> {
    /// Create a layer forwarding to `profiler`.
    pub fn new(profiler: Arc<P>) -> Self {
        Self { profiler }
    }
}

fn is_region(metadata: &tracing::Metadata<'_>) -> bool {
    metadata.target() == REGION_TARGET && metadata.name() == REGION_SPAN_NAME
}

impl<S, P> Layer<S> for RegionLayer<P>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    P: Profiler + ?Sized + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        // Skip the field allocation entirely while nothing is recording.
        if !is_region(attrs.metadata()) || !self.profiler.is_capturing() {
            return;
        }
        let mut visitor = RegionFieldVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(RegionMeta {
                label: visitor.label.unwrap_or_default(),
                color: visitor.color.unwrap_or_default(),
                pushed: false,
            });
        }
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(meta) = extensions.get_mut::<RegionMeta>() {
            if !meta.pushed && self.profiler.is_capturing() {
                self.profiler.push_range(&meta.label, meta.color);
                meta.pushed = true;
            }
        }
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(meta) = extensions.get_mut::<RegionMeta>() {
            if meta.pushed {
                self.profiler.pop_range(&meta.label);
                meta.pushed = false;
            }
        }
    }
}

/// One recorded begin or end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionEvent {
    Begin(String),
    End(String),
}

/// Accumulated statistics for one region label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionStats {
    /// Completed begin/end pairs
    pub count: u64,
    /// Inclusive wall-clock time across all pairs
    pub total: Duration,
}

impl RegionStats {
    /// Mean inclusive time per pair in milliseconds.
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total.as_secs_f64() * 1.0e3 / self.count as f64
    }
}

/// Snapshot of what a [`RegionRecorder`] has seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionSummary {
    pub begins: u64,
    pub ends: u64,
    pub max_depth: usize,
    /// Pops with an empty stack or a label differing from the innermost push
    pub violations: u64,
    /// Regions still open across all threads
    pub open: usize,
    pub regions: BTreeMap<String, RegionStats>,
}

impl RegionSummary {
    /// Every begin matched by exactly one end, in LIFO order.
    pub fn is_balanced(&self) -> bool {
        self.begins == self.ends && self.violations == 0 && self.open == 0
    }

    /// Machine-readable form used by the benchmark's `--json` output.
    pub fn to_json(&self) -> JsonValue {
        let regions: serde_json::Map<String, JsonValue> = self
            .regions
            .iter()
            .map(|(label, stats)| {
                (
                    label.clone(),
                    json!({
                        "count": stats.count,
                        "total_ms": stats.total.as_secs_f64() * 1.0e3,
                        "mean_ms": stats.mean_ms(),
                    }),
                )
            })
            .collect();
        json!({
            "begins": self.begins,
            "ends": self.ends,
            "max_depth": self.max_depth,
            "violations": self.violations,
            "open": self.open,
            "regions": regions,
        })
    }
}

#[derive(Default)]
struct RecorderState {
    stacks: HashMap<ThreadId, Vec<(String, Instant)>>,
    begins: u64,
    ends: u64,
    max_depth: usize,
    violations: u64,
    regions: BTreeMap<String, RegionStats>,
    events: Option<Vec<RegionEvent>>,
}

/// In-memory [`Profiler`] that validates nesting and times regions.
#[derive(Default)]
pub struct RegionRecorder {
    capturing: AtomicBool,
    state: Mutex<RecorderState>,
}

impl RegionRecorder {
    /// Create a recorder. Capture is off until [`Profiler::start_capture`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recorder that also keeps the full begin/end sequence.
    pub fn with_event_log() -> Self {
        let recorder = Self::default();
        recorder.state.lock().events = Some(Vec::new());
        recorder
    }

    /// Create a recorder that is already capturing.
    pub fn capturing() -> Self {
        let recorder = Self::default();
        recorder.start_capture();
        recorder
    }

    /// Snapshot the counters and per-label statistics.
    pub fn summary(&self) -> RegionSummary {
        let state = self.state.lock();
        RegionSummary {
            begins: state.begins,
            ends: state.ends,
            max_depth: state.max_depth,
            violations: state.violations,
            open: state.stacks.values().map(Vec::len).sum(),
            regions: state.regions.clone(),
        }
    }

    /// Recorded begin/end sequence, if the event log is enabled.
    pub fn events(&self) -> Vec<RegionEvent> {
        self.state.lock().events.clone().unwrap_or_default()
    }

    /// Forget everything recorded so far. Capture state is unchanged.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let keep_log = state.events.is_some();
        *state = RecorderState::default();
        if keep_log {
            state.events = Some(Vec::new());
        }
    }
}

impl Profiler for RegionRecorder {
    fn start_capture(&self) {
        self.capturing.store(true, Ordering::Release);
    }

    fn stop_capture(&self) {
        self.capturing.store(false, Ordering::Release);
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    fn push_range(&self, label: &str, _color: RegionColor) {
        let mut state = self.state.lock();
        let stack = state.stacks.entry(thread::current().id()).or_default();
        stack.push((label.to_owned(), Instant::now()));
        let depth = stack.len();
        state.begins += 1;
        state.max_depth = state.max_depth.max(depth);
        if let Some(events) = state.events.as_mut() {
            events.push(RegionEvent::Begin(label.to_owned()));
        }
    }

    fn pop_range(&self, label: &str) {
        let mut state = self.state.lock();
        let popped = state
            .stacks
            .get_mut(&thread::current().id())
            .and_then(|stack| stack.pop());
        state.ends += 1;
        if let Some(events) = state.events.as_mut() {
            events.push(RegionEvent::End(label.to_owned()));
        }
        match popped {
            Some((open_label, started)) if open_label == label => {
                let stats = state.regions.entry(open_label).or_default();
                stats.count += 1;
                stats.total += started.elapsed();
            }
            _ => state.violations += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::ProfilingRegion;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn with_recorder<F: FnOnce()>(recorder: &Arc<RegionRecorder>, f: F) {
        let subscriber = Registry::default().with(RegionLayer::new(Arc::clone(recorder)));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn nested_regions_are_forwarded_in_lifo_order() {
        let recorder = Arc::new(RegionRecorder::with_event_log());
        recorder.start_capture();

        with_recorder(&recorder, || {
            let _outer = ProfilingRegion::begin("outer", RegionColor::SkyBlue);
            {
                let _a = ProfilingRegion::begin("a", RegionColor::DarkCyan);
            }
            {
                let _b = ProfilingRegion::begin("b", RegionColor::DarkCyan);
            }
        });

        assert_eq!(
            recorder.events(),
            vec![
                RegionEvent::Begin("outer".into()),
                RegionEvent::Begin("a".into()),
                RegionEvent::End("a".into()),
                RegionEvent::Begin("b".into()),
                RegionEvent::End("b".into()),
                RegionEvent::End("outer".into()),
            ]
        );
        let summary = recorder.summary();
        assert!(summary.is_balanced());
        assert_eq!(summary.max_depth, 2);
        assert_eq!(summary.regions["outer"].count, 1);
    }

    #[test]
    fn nothing_is_forwarded_before_capture_starts() {
        let recorder = Arc::new(RegionRecorder::new());

        with_recorder(&recorder, || {
            let _region = ProfilingRegion::begin("early", RegionColor::Green);
        });

        assert_eq!(recorder.summary(), RegionSummary::default());
    }

    #[test]
    fn stopping_capture_mid_region_still_pops() {
        let recorder = Arc::new(RegionRecorder::capturing());

        with_recorder(&recorder, || {
            let _region = ProfilingRegion::begin("straddle", RegionColor::Gold);
            recorder.stop_capture();
        });

        let summary = recorder.summary();
        assert_eq!(summary.begins, 1);
        assert!(summary.is_balanced());
    }

    #[test]
    fn early_return_closes_region() {
        fn fallible(fail: bool) -> Result<(), &'static str> {
            let _region = ProfilingRegion::begin("fallible", RegionColor::Crimson);
            if fail {
                return Err("bail");
            }
            Ok(())
        }

        let recorder = Arc::new(RegionRecorder::capturing());
        with_recorder(&recorder, || {
            assert!(fallible(true).is_err());
            assert!(fallible(false).is_ok());
        });

        let summary = recorder.summary();
        assert!(summary.is_balanced());
        assert_eq!(summary.regions["fallible"].count, 2);
    }

    #[test]
    fn mismatched_pop_is_a_violation() {
        let recorder = RegionRecorder::capturing();
        recorder.push_range("a", RegionColor::SkyBlue);
        recorder.pop_range("b");
        recorder.pop_range("a");

        let summary = recorder.summary();
        assert_eq!(summary.violations, 2);
        assert!(!summary.is_balanced());
    }

    #[test]
    fn summary_serializes_per_label_stats() {
        let recorder = RegionRecorder::capturing();
        recorder.push_range("RAP", RegionColor::SkyBlue);
        recorder.pop_range("RAP");

        let json = recorder.summary().to_json();
        assert_eq!(json["begins"], 1);
        assert_eq!(json["regions"]["RAP"]["count"], 1);
    }

    #[test]
    fn reset_keeps_event_log_enabled() {
        let recorder = RegionRecorder::with_event_log();
        recorder.push_range("x", RegionColor::Gray);
        recorder.pop_range("x");
        recorder.reset();
        assert!(recorder.events().is_empty());

        recorder.push_range("y", RegionColor::Gray);
        assert_eq!(recorder.events(), vec![RegionEvent::Begin("y".into())]);
    }
}
