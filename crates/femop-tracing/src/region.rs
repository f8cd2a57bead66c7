//! Nestable profiling regions.
//!
//! A [`ProfilingRegion`] marks the begin of a named code region when it is
//! created and the end when it is dropped. Because the end is tied to `Drop`,
//! regions close in strict LIFO order on every exit path, `?` early returns
//! and unwinding included.
//!
//! ```rust
//! use femop_tracing::{ProfilingRegion, RegionColor};
//!
//! {
//!     let _outer = ProfilingRegion::begin("RAP", RegionColor::SkyBlue);
//!     {
//!         let _inner = ProfilingRegion::begin("Id", RegionColor::DarkCyan);
//!     } // "Id" ends here
//! } // "RAP" ends here
//! ```

use std::time::Instant;

/// Target used by every region span and region event.
pub const REGION_TARGET: &str = "femop::region";

/// Span name used by every region span.
pub const REGION_SPAN_NAME: &str = "region";

/// Display hint forwarded to the external profiler alongside the label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RegionColor {
    /// Composite operator applications
    #[default]
    SkyBlue,
    /// Leaf operator applications
    DarkCyan,
    /// Device priming and other one-off setup work
    Green,
    Gold,
    Orange,
    Crimson,
    Gray,
}

impl RegionColor {
    /// All colors, in declaration order.
    pub const ALL: [RegionColor; 7] = [
        RegionColor::SkyBlue,
        RegionColor::DarkCyan,
        RegionColor::Green,
        RegionColor::Gold,
        RegionColor::Orange,
        RegionColor::Crimson,
        RegionColor::Gray,
    ];

    /// Stable lowercase name, recorded as the `color` span field.
    pub const fn name(self) -> &'static str {
        match self {
            RegionColor::SkyBlue => "sky_blue",
            RegionColor::DarkCyan => "dark_cyan",
            RegionColor::Green => "green",
            RegionColor::Gold => "gold",
            RegionColor::Orange => "orange",
            RegionColor::Crimson => "crimson",
            RegionColor::Gray => "gray",
        }
    }

    /// Inverse of [`RegionColor::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|color| color.name() == name)
    }
}

/// RAII guard for one profiling region.
///
/// Creating the guard enters a `tracing` span named [`REGION_SPAN_NAME`]
/// with `label` and `color` fields; dropping it exits and closes that span.
/// The guard is `!Send`: a region begins and ends on the same thread.
#[must_use = "a region ends as soon as its guard is dropped"]
pub struct ProfilingRegion {
    label: &'static str,
    start_time: Instant,
    _entered: tracing::span::EnteredSpan,
}

impl ProfilingRegion {
    /// Begin a region. The region ends when the returned guard is dropped.
    pub fn begin(label: &'static str, color: RegionColor) -> Self {
        // The span name literal must stay equal to REGION_SPAN_NAME.
        let span = tracing::trace_span!(target: REGION_TARGET, "region", label = label, color = color.name());
        Self {
            label,
            start_time: Instant::now(),
            _entered: span.entered(),
        }
    }

    /// Label this region was opened with.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Microseconds since the region began.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }
}

impl Drop for ProfilingRegion {
    fn drop(&mut self) {
        // Emitted while the span is still entered; `_entered` exits right after.
        tracing::trace!(
            target: REGION_TARGET,
            label = self.label,
            duration_us = self.elapsed_us(),
            "region_complete"
        );
    }
}
