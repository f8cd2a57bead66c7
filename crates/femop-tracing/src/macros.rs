//! Convenience macros for region instrumentation

/// Begin a profiling region, returning its guard.
///
/// The color is given as a bare [`RegionColor`](crate::region::RegionColor)
/// variant name and defaults to `SkyBlue`.
///
/// # Syntax
///
/// ```text
/// region!("label")
/// region!("label", Color)
/// ```
///
/// # Example
///
/// ```rust
/// use femop_tracing::region;
///
/// fn apply() {
///     let _region = region!("Id", DarkCyan);
///     // ... operator body ...
/// } // region ends here
/// # apply();
/// ```
#[macro_export]
macro_rules! region {
    ($label:expr) => {
        $crate::region::ProfilingRegion::begin($label, $crate::region::RegionColor::SkyBlue)
    };
    ($label:expr, $color:ident) => {
        $crate::region::ProfilingRegion::begin($label, $crate::region::RegionColor::$color)
    };
}

/// Execute a block of code with automatic timing.
///
/// Returns a tuple of (result, duration_in_microseconds) and emits a debug
/// event carrying the same duration.
///
/// # Example
///
/// ```rust
/// use femop_tracing::timed_block;
///
/// let (sum, duration_us) = timed_block!("sum_calculation", {
///     (1..=100).sum::<i32>()
/// });
///
/// assert_eq!(sum, 5050);
/// # let _ = duration_us;
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::debug!(
            operation = $name,
            duration_us = duration_us,
            duration_ms = duration_us as f64 / 1000.0,
            "timed_block_complete"
        );
        (result, duration_us)
    }};
}
