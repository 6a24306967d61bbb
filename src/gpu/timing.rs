//! Optional per-kernel and transfer timing aggregation
//!
//! Timing is host-side wall clock around submit/wait pairs, so it is only
//! trustworthy when exactly one region is active and the run uses the
//! blocking-wait discipline; timing two overlapping queues, or a busy-poll
//! wait, perturbs the numbers enough to be worthless. The gate encodes
//! those three conditions; when it is closed, no counters exist at all and
//! [`crate::NonbondedGpu::get_timings`] returns `None`.

use crate::config::{KernelOverrides, SyncMode};

/// Accumulated time and call count for one kernel variant class
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KernelTiming {
    /// Accumulated wall time (seconds)
    pub t: f64,
    /// Call count
    pub c: u32,
}

/// Timings for kernels and host↔device transfers
///
/// The kernel table covers the four force-kernel classes: force-only,
/// force+energy, force+prune, force+energy+prune.
#[derive(Debug, Clone, Default)]
pub struct GpuTimings {
    ktime: [[KernelTiming; 2]; 2],
    /// Atom-data host-to-device transfer time (seconds)
    pub nb_h2d_t: f64,
    /// Device-to-host result transfer time (seconds)
    pub nb_d2h_t: f64,
    /// Total nonbonded kernel call count
    pub nb_c: u32,
    /// Pair-list host-to-device transfer time (seconds)
    pub pl_h2d_t: f64,
    /// Pair-list transfer count
    pub pl_h2d_c: u32,
}

impl GpuTimings {
    /// Timing record for one kernel class
    #[must_use]
    pub const fn kernel(&self, energy: bool, prune: bool) -> &KernelTiming {
        &self.ktime[energy as usize][prune as usize]
    }

    pub(crate) fn add_kernel_time(&mut self, energy: bool, prune: bool, seconds: f64) {
        let slot = &mut self.ktime[energy as usize][prune as usize];
        slot.t += seconds;
        slot.c += 1;
        self.nb_c += 1;
    }

    pub(crate) fn add_atom_h2d(&mut self, seconds: f64) {
        self.nb_h2d_t += seconds;
    }

    pub(crate) fn add_d2h(&mut self, seconds: f64) {
        self.nb_d2h_t += seconds;
    }

    pub(crate) fn add_pairlist_h2d(&mut self, seconds: f64) {
        self.pl_h2d_t += seconds;
        self.pl_h2d_c += 1;
    }

    /// Zero all counters without touching queues or buffers
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The three independent conditions gating timing instrumentation
#[derive(Debug, Clone, Copy)]
pub struct TimingGate {
    /// A second, overlapping region is active this run
    pub two_regions: bool,
    /// Completion-wait discipline of the run
    pub sync_mode: SyncMode,
    /// Instrumentation explicitly disabled by configuration
    pub disabled: bool,
}

impl TimingGate {
    /// Derive the gate from the run configuration
    #[must_use]
    pub const fn from_config(two_regions: bool, overrides: &KernelOverrides) -> Self {
        Self {
            two_regions,
            sync_mode: overrides.sync_mode,
            disabled: overrides.disable_timing,
        }
    }

    /// Whether timing may be collected this run
    #[must_use]
    pub fn resolve(&self) -> bool {
        !self.two_regions && self.sync_mode == SyncMode::BlockingWait && !self.disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_requires_all_three_conditions() {
        for two_regions in [false, true] {
            for sync_mode in [SyncMode::BlockingWait, SyncMode::BusyPoll] {
                for disabled in [false, true] {
                    let gate = TimingGate {
                        two_regions,
                        sync_mode,
                        disabled,
                    };
                    let expected =
                        !two_regions && sync_mode == SyncMode::BlockingWait && !disabled;
                    assert_eq!(
                        gate.resolve(),
                        expected,
                        "two_regions={two_regions} sync={sync_mode:?} disabled={disabled}"
                    );
                }
            }
        }
    }

    #[test]
    fn kernel_classes_accumulate_independently() {
        let mut timings = GpuTimings::default();
        timings.add_kernel_time(false, false, 0.5);
        timings.add_kernel_time(false, false, 0.25);
        timings.add_kernel_time(true, true, 1.0);

        assert_eq!(timings.kernel(false, false).c, 2);
        assert!((timings.kernel(false, false).t - 0.75).abs() < 1e-12);
        assert_eq!(timings.kernel(true, true).c, 1);
        assert_eq!(timings.kernel(true, false).c, 0);
        assert_eq!(timings.kernel(false, true).c, 0);
        assert_eq!(timings.nb_c, 3);
    }

    #[test]
    fn transfer_counters_track_time_and_count() {
        let mut timings = GpuTimings::default();
        timings.add_pairlist_h2d(0.1);
        timings.add_pairlist_h2d(0.2);
        timings.add_atom_h2d(0.05);
        timings.add_d2h(0.03);

        assert_eq!(timings.pl_h2d_c, 2);
        assert!((timings.pl_h2d_t - 0.3).abs() < 1e-12);
        assert!((timings.nb_h2d_t - 0.05).abs() < 1e-12);
        assert!((timings.nb_d2h_t - 0.03).abs() < 1e-12);
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut timings = GpuTimings::default();
        timings.add_kernel_time(true, false, 2.0);
        timings.add_pairlist_h2d(0.4);
        timings.reset();

        assert_eq!(timings.nb_c, 0);
        assert_eq!(timings.pl_h2d_c, 0);
        assert!((timings.pl_h2d_t).abs() < f64::EPSILON);
        assert_eq!(timings.kernel(true, false).c, 0);
    }
}
