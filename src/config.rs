//! Run-level settings for the nonbonded GPU layer
//!
//! The original engine steered kernel selection and timing through ambient
//! environment switches consulted scattered through setup. Here they are a
//! single validated struct, resolved once by the caller and passed to
//! [`crate::NonbondedGpu::new`]; nothing in this crate reads process state.

use thiserror::Error;

/// Invalid combinations of run-level settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Both Ewald kernel overrides requested at once
    #[error("Both analytical and tabulated Ewald nonbonded kernels requested")]
    ConflictingEwaldOverrides,
}

/// Host-side completion-wait discipline
///
/// `BusyPoll` exists for platforms where a blocking driver wait carries a
/// large fixed penalty; it perturbs kernel timings, so enabling it disables
/// the timing instrumentation (see [`crate::gpu::TimingGate`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Block in the driver until the submitted work completes
    #[default]
    BlockingWait,
    /// Spin on queue-empty polls instead of blocking
    BusyPoll,
}

/// Benchmarking/development overrides for kernel selection and timing
///
/// Each switch is consulted once at setup or at an explicit load-rebalancing
/// point, never per step.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelOverrides {
    /// Force the analytical Ewald kernel flavor
    pub force_analytical_ewald: bool,

    /// Force the tabulated Ewald kernel flavor
    pub force_tabulated_ewald: bool,

    /// Force twin-cutoff Ewald kernels even with equal cutoffs
    pub force_twin_cutoff: bool,

    /// Disable per-kernel timing instrumentation
    pub disable_timing: bool,

    /// Completion-wait discipline for this run
    pub sync_mode: SyncMode,
}

impl KernelOverrides {
    /// Check mutual exclusion of the Ewald flavor overrides
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConflictingEwaldOverrides`] if both the
    /// analytical and the tabulated override are set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.force_analytical_ewald && self.force_tabulated_ewald {
            return Err(ConfigError::ConflictingEwaldOverrides);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_overrides_are_valid() {
        assert!(KernelOverrides::default().validate().is_ok());
    }

    #[test]
    fn conflicting_ewald_overrides_rejected() {
        let overrides = KernelOverrides {
            force_analytical_ewald: true,
            force_tabulated_ewald: true,
            ..KernelOverrides::default()
        };
        let err = overrides.validate().unwrap_err();
        assert!(err.to_string().contains("analytical and tabulated"));
    }

    #[test]
    fn single_override_is_valid() {
        for (ana, tab) in [(true, false), (false, true), (false, false)] {
            let overrides = KernelOverrides {
                force_analytical_ewald: ana,
                force_tabulated_ewald: tab,
                ..KernelOverrides::default()
            };
            assert!(overrides.validate().is_ok(), "({ana}, {tab})");
        }
    }

    #[test]
    fn conflict_is_independent_of_other_switches() {
        let overrides = KernelOverrides {
            force_analytical_ewald: true,
            force_tabulated_ewald: true,
            force_twin_cutoff: true,
            disable_timing: true,
            sync_mode: SyncMode::BusyPoll,
        };
        assert!(overrides.validate().is_err());
    }
}
