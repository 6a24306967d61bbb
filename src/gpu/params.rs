//! Nonbonded parameters and correction tables
//!
//! Copies cutoff-derived scalars once per parameter change, resolves the
//! requested physics model to a GPU kernel flavor through a closed decision
//! table, and builds the tabulated correction curves (Ewald long-range force
//! table, Lennard-Jones pair-parameter and combination-rule tables) that the
//! force kernels sample. Tables are rebuilt only at explicit safe points
//! (setup, load rebalancing), never mid-dispatch.

use super::alloc::DeviceBuffer;
use super::GpuDevice;
use crate::config::{ConfigError, KernelOverrides};
use anyhow::{ensure, Result};
use thiserror::Error;

/// Ewald force-correction table resolution (samples)
pub const EWALD_TABLE_SIZE: usize = 1536;

/// Electrostatics model requested by the host engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElecType {
    /// Plain cutoff
    Cut,
    /// Reaction field
    ReactionField,
    /// Ewald / PME long-range electrostatics
    #[default]
    Ewald,
    /// User-tabulated interactions; no GPU kernel exists
    User,
}

/// Van-der-Waals model requested by the host engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VdwType {
    /// Plain Lennard-Jones cutoff
    #[default]
    Cut,
    /// LJ-PME long-range dispersion
    Pme,
    /// Buckingham exponential repulsion; no GPU kernel exists
    Buckingham,
}

/// Interaction modifier applied at the van-der-Waals cutoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VdwModifier {
    /// No modification
    None,
    /// Shift the potential to zero at the cutoff
    #[default]
    PotShift,
    /// Smoothly switch the force to zero
    ForceSwitch,
    /// Smoothly switch the potential to zero
    PotSwitch,
    /// Exact cutoff; no GPU kernel exists
    ExactCutoff,
}

/// Combination rule for LJ-PME grid parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LjCombinationRule {
    /// Geometric mean
    #[default]
    Geometric,
    /// Lorentz-Berthelot
    LorentzBerthelot,
}

/// Electrostatics kernel flavor, the closed set the dispatcher indexes over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElecFlavor {
    /// Plain cutoff
    Cut,
    /// Reaction field
    ReactionField,
    /// Analytical Ewald correction, single cutoff
    EwaldAnalytical,
    /// Tabulated Ewald correction, single cutoff
    EwaldTabulated,
    /// Analytical Ewald, twin cutoff
    EwaldAnalyticalTwin,
    /// Tabulated Ewald, twin cutoff
    EwaldTabulatedTwin,
}

/// Number of electrostatics flavors
pub const ELEC_FLAVOR_COUNT: usize = 6;

impl ElecFlavor {
    /// Dense index into the kernel-variant table
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Cut => 0,
            Self::ReactionField => 1,
            Self::EwaldAnalytical => 2,
            Self::EwaldTabulated => 3,
            Self::EwaldAnalyticalTwin => 4,
            Self::EwaldTabulatedTwin => 5,
        }
    }

    /// Whether this flavor samples the Ewald correction table
    #[must_use]
    pub const fn is_tabulated(self) -> bool {
        matches!(self, Self::EwaldTabulated | Self::EwaldTabulatedTwin)
    }

    /// Whether this flavor evaluates the Ewald correction analytically
    #[must_use]
    pub const fn is_analytical_ewald(self) -> bool {
        matches!(self, Self::EwaldAnalytical | Self::EwaldAnalyticalTwin)
    }
}

/// Van-der-Waals kernel flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VdwFlavor {
    /// Potential-shifted cutoff
    Cut,
    /// Force-switched cutoff
    ForceSwitch,
    /// Potential-switched cutoff
    PotentialSwitch,
    /// LJ-PME, geometric combination rule
    EwaldGeometric,
    /// LJ-PME, Lorentz-Berthelot combination rule
    EwaldLorentzBerthelot,
}

/// Number of van-der-Waals flavors
pub const VDW_FLAVOR_COUNT: usize = 5;

impl VdwFlavor {
    /// Dense index into the kernel-variant table
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Cut => 0,
            Self::ForceSwitch => 1,
            Self::PotentialSwitch => 2,
            Self::EwaldGeometric => 3,
            Self::EwaldLorentzBerthelot => 4,
        }
    }
}

/// Fatal configuration inconsistencies detected at setup
///
/// None of these are recoverable: continuing would silently compute wrong
/// physics, so they are reported immediately, never deferred to launch time.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Conflicting run-level overrides
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Requested electrostatics model has no GPU kernel
    #[error("The requested electrostatics type {0:?} is not implemented in the GPU kernels")]
    UnsupportedElecType(ElecType),

    /// Requested van-der-Waals model has no GPU kernel
    #[error("The requested VdW type {0:?} is not implemented in the GPU kernels")]
    UnsupportedVdwType(VdwType),

    /// Requested van-der-Waals modifier has no GPU kernel
    #[error("The requested VdW interaction modifier {0:?} is not implemented in the GPU kernels")]
    UnsupportedVdwModifier(VdwModifier),
}

/// Potential-shift constants at the cutoff
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShiftConsts {
    /// Quadratic coefficient
    pub c2: f32,
    /// Cubic coefficient
    pub c3: f32,
    /// Potential shift
    pub cpot: f32,
}

/// Switching-function coefficients
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SwitchConsts {
    /// Cubic coefficient
    pub c3: f32,
    /// Quartic coefficient
    pub c4: f32,
    /// Quintic coefficient
    pub c5: f32,
}

/// Cutoff-derived scalar bundle handed over by the host engine
#[derive(Debug, Clone)]
pub struct CutoffParams {
    /// Coulomb cutoff (nm)
    pub rcoulomb: f32,
    /// Van-der-Waals cutoff (nm)
    pub rvdw: f32,
    /// Pair-list outer radius (nm)
    pub rlist: f32,
    /// Ewald splitting coefficient for charges
    pub ewald_beta: f32,
    /// Ewald potential shift
    pub sh_ewald: f32,
    /// Electrostatics prefactor (includes relative permittivity)
    pub epsfac: f32,
    /// Reaction-field constant k
    pub k_rf: f32,
    /// Reaction-field constant c
    pub c_rf: f32,
    /// Start of the van-der-Waals switching region (nm)
    pub rvdw_switch: f32,
    /// Dispersion shift constants
    pub dispersion_shift: ShiftConsts,
    /// Repulsion shift constants
    pub repulsion_shift: ShiftConsts,
    /// Potential-switch coefficients
    pub vdw_switch: SwitchConsts,
    /// Ewald splitting coefficient for dispersion (LJ-PME)
    pub ewaldcoeff_lj: f32,
    /// LJ-PME potential shift
    pub sh_lj_ewald: f32,
    /// Requested electrostatics model
    pub elec_type: ElecType,
    /// Requested van-der-Waals model
    pub vdw_type: VdwType,
    /// Requested van-der-Waals modifier
    pub vdw_modifier: VdwModifier,
    /// LJ-PME combination rule
    pub lj_comb_rule: LjCombinationRule,
}

impl Default for CutoffParams {
    fn default() -> Self {
        Self {
            rcoulomb: 1.0,
            rvdw: 1.0,
            rlist: 1.1,
            ewald_beta: 3.12,
            sh_ewald: 1.0e-5,
            epsfac: 138.935_48,
            k_rf: 0.0,
            c_rf: 1.0,
            rvdw_switch: 0.9,
            dispersion_shift: ShiftConsts::default(),
            repulsion_shift: ShiftConsts::default(),
            vdw_switch: SwitchConsts::default(),
            ewaldcoeff_lj: 0.0,
            sh_lj_ewald: 0.0,
            elec_type: ElecType::Ewald,
            vdw_type: VdwType::Cut,
            vdw_modifier: VdwModifier::PotShift,
            lj_comb_rule: LjCombinationRule::Geometric,
        }
    }
}

/// Scalar parameter block as the kernels see it (uniform buffer layout)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct NbParamsGpu {
    pub ewald_beta: f32,
    pub sh_ewald: f32,
    pub epsfac: f32,
    pub two_k_rf: f32,
    pub c_rf: f32,
    pub rvdw_sq: f32,
    pub rcoulomb_sq: f32,
    pub rlist_sq: f32,
    pub rvdw_switch: f32,
    pub sh_lj_ewald: f32,
    pub ewaldcoeff_lj: f32,
    pub coulomb_tab_scale: f32,
    pub disp_shift_c2: f32,
    pub disp_shift_c3: f32,
    pub disp_shift_cpot: f32,
    pub rep_shift_c2: f32,
    pub rep_shift_c3: f32,
    pub rep_shift_cpot: f32,
    pub vdw_switch_c3: f32,
    pub vdw_switch_c4: f32,
    pub vdw_switch_c5: f32,
    pub ntypes: u32,
    pub _pad: [u32; 2],
}

/// Select the Ewald kernel flavor: analytical or tabulated, single or twin
/// cutoff
///
/// Default is analytical; the benchmarking overrides force one or the other
/// and are mutually exclusive. The twin variant is selected when the caller
/// reports differing cutoffs or the override forces it.
///
/// # Errors
///
/// Fatal when both overrides are set.
pub fn pick_ewald_flavor(
    twin_cutoff: bool,
    overrides: &KernelOverrides,
) -> Result<ElecFlavor, SetupError> {
    overrides.validate()?;

    let analytical = !overrides.force_tabulated_ewald;
    tracing::debug!(analytical, "selected Ewald kernel flavor");

    let twin = twin_cutoff || overrides.force_twin_cutoff;
    Ok(match (analytical, twin) {
        (true, false) => ElecFlavor::EwaldAnalytical,
        (false, false) => ElecFlavor::EwaldTabulated,
        (true, true) => ElecFlavor::EwaldAnalyticalTwin,
        (false, true) => ElecFlavor::EwaldTabulatedTwin,
    })
}

/// Resolve the requested physics model to kernel flavors
///
/// # Errors
///
/// Fatal for any request outside the closed set of implemented kernels.
pub fn convert_flavors(
    cutoffs: &CutoffParams,
    overrides: &KernelOverrides,
) -> Result<(ElecFlavor, VdwFlavor), SetupError> {
    let vdw = match cutoffs.vdw_type {
        VdwType::Cut => match cutoffs.vdw_modifier {
            VdwModifier::None | VdwModifier::PotShift => VdwFlavor::Cut,
            VdwModifier::ForceSwitch => VdwFlavor::ForceSwitch,
            VdwModifier::PotSwitch => VdwFlavor::PotentialSwitch,
            VdwModifier::ExactCutoff => {
                return Err(SetupError::UnsupportedVdwModifier(cutoffs.vdw_modifier))
            }
        },
        VdwType::Pme => match cutoffs.lj_comb_rule {
            LjCombinationRule::Geometric => VdwFlavor::EwaldGeometric,
            LjCombinationRule::LorentzBerthelot => VdwFlavor::EwaldLorentzBerthelot,
        },
        VdwType::Buckingham => return Err(SetupError::UnsupportedVdwType(cutoffs.vdw_type)),
    };

    let elec = match cutoffs.elec_type {
        ElecType::Cut => ElecFlavor::Cut,
        ElecType::ReactionField => ElecFlavor::ReactionField,
        // Initially rcoulomb == rvdw, so it's surely not twin cut-off.
        ElecType::Ewald => pick_ewald_flavor(false, overrides)?,
        ElecType::User => return Err(SetupError::UnsupportedElecType(cutoffs.elec_type)),
    };

    Ok((elec, vdw))
}

/// Error function, Abramowitz & Stegun 7.1.26 (|err| <= 1.5e-7)
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Tabulate the Ewald long-range force correction at fixed resolution
///
/// The scale subtracts two samples instead of one so rounding at the far end
/// can never index past the array bound. Sample `i` holds
/// `erf(beta r)/r^2 - 2 beta exp(-beta^2 r^2) / (sqrt(pi) r)` at
/// `r = i / scale`; the singularity at `r = 0` is pinned to zero.
///
/// Deterministic: identical inputs produce bit-identical tables.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn build_ewald_force_table(ewald_beta: f32, rcoulomb: f32) -> (Vec<f32>, f32) {
    let scale = (EWALD_TABLE_SIZE as f64 - 2.0) / f64::from(rcoulomb);
    let beta = f64::from(ewald_beta);
    let two_over_sqrt_pi = 2.0 / std::f64::consts::PI.sqrt();

    let mut table = vec![0.0_f32; EWALD_TABLE_SIZE];
    for (i, slot) in table.iter_mut().enumerate().skip(1) {
        let r = i as f64 / scale;
        let br = beta * r;
        let f = erf(br) / (r * r) - two_over_sqrt_pi * beta * (-br * br).exp() / r;
        *slot = f as f32;
    }

    (table, scale as f32)
}

/// Device-side nonbonded parameters and correction tables
///
/// Read-only from the moment they are built until a rebuild is explicitly
/// triggered by a parameter change at a safe point.
#[derive(Debug)]
pub struct NbParams {
    cutoffs: CutoffParams,
    ntypes: usize,
    elec_flavor: ElecFlavor,
    vdw_flavor: VdwFlavor,

    /// Coulomb long-range force table (dummy single entry for analytical
    /// flavors, which never sample it but still bind it)
    pub(crate) coulomb_tab: DeviceBuffer<f32>,
    coulomb_tab_scale: f32,

    /// LJ pair parameters, `2 * ntypes * ntypes` entries
    pub(crate) nbfp: DeviceBuffer<f32>,
    /// LJ-PME combination-rule parameters, `2 * ntypes` entries (dummy
    /// single entry unless LJ-PME is active)
    pub(crate) nbfp_comb: DeviceBuffer<f32>,

    /// Scalar block consumed by every kernel variant
    pub(crate) uniform: DeviceBuffer<NbParamsGpu>,
}

const STORAGE_RO: wgpu::BufferUsages =
    wgpu::BufferUsages::STORAGE.union(wgpu::BufferUsages::COPY_DST);
const UNIFORM: wgpu::BufferUsages =
    wgpu::BufferUsages::UNIFORM.union(wgpu::BufferUsages::COPY_DST);

impl NbParams {
    /// Build the full parameter set: scalars, kernel flavors, correction
    /// tables
    ///
    /// `nbfp` must hold `2 * ntypes * ntypes` entries (c6/c12 per type
    /// pair), `nbfp_comb` `2 * ntypes` (per-type sigma/epsilon for LJ-PME).
    ///
    /// # Errors
    ///
    /// Fatal on an unsupported model combination, conflicting overrides or
    /// allocation failure.
    pub fn init(
        device: &GpuDevice,
        cutoffs: &CutoffParams,
        ntypes: usize,
        nbfp: &[f32],
        nbfp_comb: &[f32],
        overrides: &KernelOverrides,
    ) -> Result<Self> {
        let (elec_flavor, vdw_flavor) = convert_flavors(cutoffs, overrides)?;
        ensure!(
            nbfp.len() == 2 * ntypes * ntypes,
            "nbfp has {} entries, expected {}",
            nbfp.len(),
            2 * ntypes * ntypes
        );
        if cutoffs.vdw_type == VdwType::Pme {
            ensure!(
                nbfp_comb.len() == 2 * ntypes,
                "nbfp_comb has {} entries, expected {}",
                nbfp_comb.len(),
                2 * ntypes
            );
        }

        let mut params = Self {
            cutoffs: cutoffs.clone(),
            ntypes,
            elec_flavor,
            vdw_flavor,
            coulomb_tab: DeviceBuffer::new("nbparam.coulomb_tab", STORAGE_RO),
            coulomb_tab_scale: 0.0,
            nbfp: DeviceBuffer::new("nbparam.nbfp", STORAGE_RO),
            nbfp_comb: DeviceBuffer::new("nbparam.nbfp_comb", STORAGE_RO),
            uniform: DeviceBuffer::new("nbparam.scalars", UNIFORM),
        };

        params.nbfp.realloc_buffered(device, Some(nbfp), nbfp.len())?;
        if cutoffs.vdw_type == VdwType::Pme {
            params
                .nbfp_comb
                .realloc_buffered(device, Some(nbfp_comb), nbfp_comb.len())?;
        } else {
            // Kernels bind the table unconditionally; give them one slot.
            params.nbfp_comb.realloc_buffered(device, None, 1)?;
        }

        if elec_flavor.is_tabulated() {
            params.build_or_refresh_ewald_table(device)?;
        } else {
            params.coulomb_tab.realloc_buffered(device, None, 1)?;
        }

        params.uniform.realloc_buffered(device, None, 1)?;
        params.upload_uniform(device)?;
        Ok(params)
    }

    /// Copy cutoff-derived scalars; pure value copy, no device interaction
    pub fn set_cutoffs(&mut self, cutoffs: &CutoffParams) {
        self.cutoffs = cutoffs.clone();
    }

    /// Rebuild and re-upload the Ewald force table for the current cutoff
    ///
    /// Called at setup and again only when the Coulomb cutoff changes (load
    /// rebalancing). The table is rebuilt in place, not patched.
    ///
    /// # Errors
    ///
    /// Returns an error when the upload fails.
    pub fn build_or_refresh_ewald_table(&mut self, device: &GpuDevice) -> Result<()> {
        let (table, scale) =
            build_ewald_force_table(self.cutoffs.ewald_beta, self.cutoffs.rcoulomb);
        self.coulomb_tab
            .realloc_buffered(device, Some(&table), table.len())?;
        self.coulomb_tab_scale = scale;
        Ok(())
    }

    /// Re-copy cutoffs, re-pick the Ewald flavor (the cutoffs may now be
    /// twin) and refresh the correction table
    ///
    /// Only meaningful at an explicit rebalancing safe point; never called
    /// with kernels in flight.
    ///
    /// # Errors
    ///
    /// Fatal on conflicting overrides or upload failure.
    pub fn update_for_load_balancing(
        &mut self,
        device: &GpuDevice,
        cutoffs: &CutoffParams,
        overrides: &KernelOverrides,
    ) -> Result<()> {
        self.set_cutoffs(cutoffs);

        if matches!(
            self.elec_flavor,
            ElecFlavor::EwaldAnalytical
                | ElecFlavor::EwaldTabulated
                | ElecFlavor::EwaldAnalyticalTwin
                | ElecFlavor::EwaldTabulatedTwin
        ) {
            let twin = (cutoffs.rcoulomb - cutoffs.rvdw).abs() > f32::EPSILON;
            self.elec_flavor = pick_ewald_flavor(twin, overrides)?;
            if self.elec_flavor.is_tabulated() {
                self.build_or_refresh_ewald_table(device)?;
            }
        }

        self.upload_uniform(device)?;
        Ok(())
    }

    /// Electrostatics kernel flavor in effect
    #[must_use]
    pub const fn elec_flavor(&self) -> ElecFlavor {
        self.elec_flavor
    }

    /// Van-der-Waals kernel flavor in effect
    #[must_use]
    pub const fn vdw_flavor(&self) -> VdwFlavor {
        self.vdw_flavor
    }

    /// Whether the active Ewald kernels are analytical
    #[must_use]
    pub const fn is_ewald_analytical(&self) -> bool {
        self.elec_flavor.is_analytical_ewald()
    }

    /// Current cutoff scalars
    #[must_use]
    pub const fn cutoffs(&self) -> &CutoffParams {
        &self.cutoffs
    }

    fn gpu_scalars(&self) -> NbParamsGpu {
        let c = &self.cutoffs;
        NbParamsGpu {
            ewald_beta: c.ewald_beta,
            sh_ewald: c.sh_ewald,
            epsfac: c.epsfac,
            two_k_rf: 2.0 * c.k_rf,
            c_rf: c.c_rf,
            rvdw_sq: c.rvdw * c.rvdw,
            rcoulomb_sq: c.rcoulomb * c.rcoulomb,
            rlist_sq: c.rlist * c.rlist,
            rvdw_switch: c.rvdw_switch,
            sh_lj_ewald: c.sh_lj_ewald,
            ewaldcoeff_lj: c.ewaldcoeff_lj,
            coulomb_tab_scale: self.coulomb_tab_scale,
            disp_shift_c2: c.dispersion_shift.c2,
            disp_shift_c3: c.dispersion_shift.c3,
            disp_shift_cpot: c.dispersion_shift.cpot,
            rep_shift_c2: c.repulsion_shift.c2,
            rep_shift_c3: c.repulsion_shift.c3,
            rep_shift_cpot: c.repulsion_shift.cpot,
            vdw_switch_c3: c.vdw_switch.c3,
            vdw_switch_c4: c.vdw_switch.c4,
            vdw_switch_c5: c.vdw_switch.c5,
            ntypes: u32::try_from(self.ntypes).unwrap_or(u32::MAX),
            _pad: [0; 2],
        }
    }

    fn upload_uniform(&self, device: &GpuDevice) -> Result<()> {
        self.uniform.upload(device, &[self.gpu_scalars()], 0)?;
        Ok(())
    }

    /// Release all device memory
    pub fn free(&mut self) {
        self.coulomb_tab.free();
        self.nbfp.free();
        self.nbfp_comb.free();
        self.uniform.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewald_flavor_defaults_to_analytical() {
        let overrides = KernelOverrides::default();
        assert_eq!(
            pick_ewald_flavor(false, &overrides).unwrap(),
            ElecFlavor::EwaldAnalytical
        );
        assert_eq!(
            pick_ewald_flavor(true, &overrides).unwrap(),
            ElecFlavor::EwaldAnalyticalTwin
        );
    }

    #[test]
    fn tabulated_override_selects_table_flavors() {
        let overrides = KernelOverrides {
            force_tabulated_ewald: true,
            ..KernelOverrides::default()
        };
        assert_eq!(
            pick_ewald_flavor(false, &overrides).unwrap(),
            ElecFlavor::EwaldTabulated
        );
        assert_eq!(
            pick_ewald_flavor(true, &overrides).unwrap(),
            ElecFlavor::EwaldTabulatedTwin
        );
    }

    #[test]
    fn twin_override_forces_twin_kernels() {
        let overrides = KernelOverrides {
            force_twin_cutoff: true,
            ..KernelOverrides::default()
        };
        assert_eq!(
            pick_ewald_flavor(false, &overrides).unwrap(),
            ElecFlavor::EwaldAnalyticalTwin
        );
    }

    #[test]
    fn conflicting_overrides_are_fatal_regardless_of_twin() {
        let overrides = KernelOverrides {
            force_analytical_ewald: true,
            force_tabulated_ewald: true,
            ..KernelOverrides::default()
        };
        assert!(pick_ewald_flavor(false, &overrides).is_err());
        assert!(pick_ewald_flavor(true, &overrides).is_err());
    }

    #[test]
    fn vdw_decision_table_covers_supported_rows() {
        let overrides = KernelOverrides::default();
        let cases = [
            (VdwType::Cut, VdwModifier::None, VdwFlavor::Cut),
            (VdwType::Cut, VdwModifier::PotShift, VdwFlavor::Cut),
            (VdwType::Cut, VdwModifier::ForceSwitch, VdwFlavor::ForceSwitch),
            (VdwType::Cut, VdwModifier::PotSwitch, VdwFlavor::PotentialSwitch),
        ];
        for (vdw_type, vdw_modifier, expected) in cases {
            let cutoffs = CutoffParams {
                vdw_type,
                vdw_modifier,
                ..CutoffParams::default()
            };
            let (_, vdw) = convert_flavors(&cutoffs, &overrides).unwrap();
            assert_eq!(vdw, expected);
        }
    }

    #[test]
    fn lj_pme_maps_combination_rule() {
        let overrides = KernelOverrides::default();
        for (rule, expected) in [
            (LjCombinationRule::Geometric, VdwFlavor::EwaldGeometric),
            (
                LjCombinationRule::LorentzBerthelot,
                VdwFlavor::EwaldLorentzBerthelot,
            ),
        ] {
            let cutoffs = CutoffParams {
                vdw_type: VdwType::Pme,
                lj_comb_rule: rule,
                ..CutoffParams::default()
            };
            let (_, vdw) = convert_flavors(&cutoffs, &overrides).unwrap();
            assert_eq!(vdw, expected);
        }
    }

    #[test]
    fn unsupported_models_fail_at_setup() {
        let overrides = KernelOverrides::default();

        let cutoffs = CutoffParams {
            vdw_type: VdwType::Buckingham,
            ..CutoffParams::default()
        };
        assert!(matches!(
            convert_flavors(&cutoffs, &overrides),
            Err(SetupError::UnsupportedVdwType(VdwType::Buckingham))
        ));

        let cutoffs = CutoffParams {
            vdw_modifier: VdwModifier::ExactCutoff,
            ..CutoffParams::default()
        };
        assert!(matches!(
            convert_flavors(&cutoffs, &overrides),
            Err(SetupError::UnsupportedVdwModifier(VdwModifier::ExactCutoff))
        ));

        let cutoffs = CutoffParams {
            elec_type: ElecType::User,
            ..CutoffParams::default()
        };
        assert!(matches!(
            convert_flavors(&cutoffs, &overrides),
            Err(SetupError::UnsupportedElecType(ElecType::User))
        ));
    }

    #[test]
    fn elec_decision_table_for_simple_models() {
        let overrides = KernelOverrides::default();
        for (elec_type, expected) in [
            (ElecType::Cut, ElecFlavor::Cut),
            (ElecType::ReactionField, ElecFlavor::ReactionField),
        ] {
            let cutoffs = CutoffParams {
                elec_type,
                ..CutoffParams::default()
            };
            let (elec, _) = convert_flavors(&cutoffs, &overrides).unwrap();
            assert_eq!(elec, expected);
        }
    }

    #[test]
    fn ewald_table_is_deterministic() {
        let (a, scale_a) = build_ewald_force_table(3.12, 1.0);
        let (b, scale_b) = build_ewald_force_table(3.12, 1.0);
        assert_eq!(a, b, "identical inputs must give bit-identical tables");
        assert!((scale_a - scale_b).abs() < f32::EPSILON);
    }

    #[test]
    fn ewald_table_shape() {
        let (table, scale) = build_ewald_force_table(3.12, 1.2);
        assert_eq!(table.len(), EWALD_TABLE_SIZE);
        assert!(table[0].abs() < f32::EPSILON, "r=0 sample is pinned to zero");
        assert!(table.iter().all(|v| v.is_finite()));

        // Two samples of margin: the last valid r maps below the bound.
        #[allow(clippy::cast_precision_loss)]
        let expected_scale = (EWALD_TABLE_SIZE as f32 - 2.0) / 1.2;
        assert!((scale - expected_scale).abs() < 1e-3);
    }

    #[test]
    fn ewald_table_changes_with_cutoff() {
        let (a, _) = build_ewald_force_table(3.12, 1.0);
        let (b, _) = build_ewald_force_table(3.12, 1.5);
        assert_ne!(a, b);
    }

    #[test]
    fn erf_matches_known_values() {
        assert!((erf(0.0)).abs() < 1e-12);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
        assert!((erf(3.0) - 0.999_977_91).abs() < 1e-6);
    }

    #[test]
    fn flavor_indices_are_dense() {
        let elec = [
            ElecFlavor::Cut,
            ElecFlavor::ReactionField,
            ElecFlavor::EwaldAnalytical,
            ElecFlavor::EwaldTabulated,
            ElecFlavor::EwaldAnalyticalTwin,
            ElecFlavor::EwaldTabulatedTwin,
        ];
        let mut seen: Vec<usize> = elec.iter().map(|f| f.index()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..ELEC_FLAVOR_COUNT).collect::<Vec<_>>());

        let vdw = [
            VdwFlavor::Cut,
            VdwFlavor::ForceSwitch,
            VdwFlavor::PotentialSwitch,
            VdwFlavor::EwaldGeometric,
            VdwFlavor::EwaldLorentzBerthelot,
        ];
        let mut seen: Vec<usize> = vdw.iter().map(|f| f.index()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..VDW_FLAVOR_COUNT).collect::<Vec<_>>());
    }
}
