//! Bring-up ordering for a priority-ordered fleet of backends.
//!
//! The edge tries backends in priority order (origin first, then each mirror)
//! and stops at the first healthy one. Convergence on a backend can only be
//! confirmed when every backend ahead of it is down, so a reset walks the
//! fleet from the lowest priority upwards and, the first time it meets a
//! backend that is not serving, stops everything ahead of it.

/// A single step of a fleet reset. Indices are positions in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    /// Backend is already serving; only put its default handler back.
    ResetHandler(usize),
    /// Stop a higher-priority backend so the edge cannot route to it yet.
    Stop(usize),
    /// Start the backend and block until the edge routes requests to it.
    StartAndConfirm(usize),
}

/// Compute the steps that bring every backend up with the edge converged.
///
/// `started` holds the current state of each backend in priority order.
pub fn reset_plan(started: &[bool]) -> Vec<ResetStep> {
    let mut started = started.to_vec();
    let mut steps = Vec::with_capacity(started.len() * 2);
    let mut remaining_stopped = false;

    for index in (0..started.len()).rev() {
        if started[index] {
            steps.push(ResetStep::ResetHandler(index));
            continue;
        }

        if !remaining_stopped {
            for ahead in 0..index {
                if started[ahead] {
                    steps.push(ResetStep::Stop(ahead));
                    started[ahead] = false;
                }
            }
            remaining_stopped = true;
        }

        steps.push(ResetStep::StartAndConfirm(index));
        started[index] = true;
    }

    steps
}
