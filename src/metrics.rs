use tracing::trace;

// Lightweight metrics helpers that stay safe when no recorder is installed.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "vitrina.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn phase_elapsed(phase: &'static str, elapsed_ms: u128) {
    trace!(
        target = "vitrina.metrics",
        phase = phase,
        elapsed_ms = elapsed_ms as u64,
        "phase_elapsed"
    );
}
