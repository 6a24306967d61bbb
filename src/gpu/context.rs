//! The per-simulation device context
//!
//! Owns the device, one execution stream per active interaction region, the
//! atom data store, both pair-list stores, the parameter tables, the kernel
//! pipeline table and the optional timing record. Every tuning constant and
//! first-use flag lives here as an explicit field; there is no process-wide
//! state.

use super::atoms::{AtomData, HostAtomData};
use super::kernels::KernelTable;
use super::pairlist::{HostPairList, PairList};
use super::params::{CutoffParams, NbParams};
use super::stream::RegionStream;
use super::timing::{GpuTimings, TimingGate};
use super::{GpuDevice, Region};
use crate::config::KernelOverrides;
use anyhow::{anyhow, Result};
use std::time::Instant;

/// Minimum pair-list balancing factor, scaled by the device's compute units
///
/// Heuristic carried over from tuning on wide GPUs: lists shorter than
/// `factor * compute_units` super-clusters leave the device underutilized.
const MIN_PAIRS_BALANCED_FACTOR: u32 = 40;

/// GPU-resident nonbonded working set for one simulation
///
/// Construction decides once whether a second (non-local) region exists;
/// per-step entry points then move data and launch kernels without ever
/// re-deciding run-level questions.
#[derive(Debug)]
pub struct NonbondedGpu {
    pub(crate) device: GpuDevice,
    pub(crate) overrides: KernelOverrides,
    two_regions: bool,

    pub(crate) streams: [Option<RegionStream>; 2],
    pub(crate) plists: [Option<PairList>; 2],
    pub(crate) atdat: Option<AtomData>,
    pub(crate) nbparam: Option<NbParams>,
    pub(crate) kernels: KernelTable,

    /// `Some` only when the timing gate resolved open at construction
    pub(crate) timings: Option<GpuTimings>,

    balance_factor: u32,
}

impl NonbondedGpu {
    /// Build streams, pipelines and empty pair-list stores
    ///
    /// `two_regions` is decided once here, not per step: pass `true` only
    /// when a second, overlapping set of interactions exists this run.
    ///
    /// # Errors
    ///
    /// Fatal on conflicting run-level overrides.
    pub fn new(device: GpuDevice, overrides: &KernelOverrides, two_regions: bool) -> Result<Self> {
        // Conflicting switches are a configuration inconsistency; report
        // them before any device work happens.
        overrides.validate()?;

        let kernels = KernelTable::new(&device);

        let local_stream = RegionStream::new(overrides.sync_mode);
        let nonlocal_stream = two_regions.then(|| RegionStream::new(overrides.sync_mode));

        let local_plist = PairList::new(Region::Local);
        let nonlocal_plist = two_regions.then(|| PairList::new(Region::NonLocal));

        let timings = TimingGate::from_config(two_regions, overrides)
            .resolve()
            .then(GpuTimings::default);

        tracing::debug!(
            two_regions,
            timing = timings.is_some(),
            "initialized nonbonded GPU context"
        );

        Ok(Self {
            device,
            overrides: *overrides,
            two_regions,
            streams: [Some(local_stream), nonlocal_stream],
            plists: [Some(local_plist), nonlocal_plist],
            atdat: None,
            nbparam: None,
            kernels,
            timings,
            balance_factor: MIN_PAIRS_BALANCED_FACTOR,
        })
    }

    /// One-time constant setup: fixed atom-data buffers, parameter tables,
    /// and an initial clear of the energy/shift-force outputs
    ///
    /// # Errors
    ///
    /// Fatal on an unsupported physics-model combination or allocation
    /// failure.
    pub fn init_const(
        &mut self,
        cutoffs: &CutoffParams,
        ntypes: usize,
        nbfp: &[f32],
        nbfp_comb: &[f32],
    ) -> Result<()> {
        self.atdat = Some(AtomData::init_first(&self.device, ntypes)?);
        self.nbparam = Some(NbParams::init(
            &self.device,
            cutoffs,
            ntypes,
            nbfp,
            nbfp_comb,
            &self.overrides,
        )?);

        self.clear_e_fshift_outputs()?;
        Ok(())
    }

    /// Whether a non-local region is active this run
    #[must_use]
    pub const fn two_regions(&self) -> bool {
        self.two_regions
    }

    /// Device owned by this context
    #[must_use]
    pub const fn device(&self) -> &GpuDevice {
        &self.device
    }

    pub(crate) fn stream(&self, region: Region) -> Result<&RegionStream> {
        self.streams[region.index()]
            .as_ref()
            .ok_or_else(|| anyhow!("region {region} has no stream this run"))
    }

    /// Pair-list store of a region
    ///
    /// # Errors
    ///
    /// Returns an error for the non-local region of a single-region run.
    pub fn pair_list(&self, region: Region) -> Result<&PairList> {
        self.plists[region.index()]
            .as_ref()
            .ok_or_else(|| anyhow!("region {region} has no pair list this run"))
    }

    /// Atom data store
    ///
    /// # Errors
    ///
    /// Returns an error before [`NonbondedGpu::init_const`].
    pub fn atom_data(&self) -> Result<&AtomData> {
        self.atdat
            .as_ref()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))
    }

    /// Parameter tables
    ///
    /// # Errors
    ///
    /// Returns an error before [`NonbondedGpu::init_const`].
    pub fn params(&self) -> Result<&NbParams> {
        self.nbparam
            .as_ref()
            .ok_or_else(|| anyhow!("parameters not initialized; call init_const first"))
    }

    /// Upload a fresh pair list for a region
    ///
    /// The three sub-buffers travel on the region's stream, preserving
    /// per-region ordering without any cross-region synchronization. The
    /// list is unconditionally marked as needing pruning.
    ///
    /// # Errors
    ///
    /// Fatal on cluster-size change, allocation failure, or an inactive
    /// region.
    pub fn init_pairlist(&mut self, region: Region, host: &HostPairList) -> Result<()> {
        let stream = *self.stream(region)?;
        let plist = self.plists[region.index()]
            .as_mut()
            .ok_or_else(|| anyhow!("region {region} has no pair list this run"))?;

        if self.timings.is_some() {
            // Drain earlier work so the measurement covers only this copy.
            stream.wait(&self.device);
            let start = Instant::now();
            plist.upload(&self.device, host)?;
            stream.flush(&self.device);
            stream.wait(&self.device);
            if let Some(t) = self.timings.as_mut() {
                t.add_pairlist_h2d(start.elapsed().as_secs_f64());
            }
        } else {
            plist.upload(&self.device, host)?;
        }
        Ok(())
    }

    /// Take over a new step's atom counts and upload the atom-type array
    ///
    /// # Errors
    ///
    /// Fatal on allocation failure or inconsistent host arrays.
    pub fn init_atomdata(&mut self, host: &HostAtomData) -> Result<()> {
        let atdat = self
            .atdat
            .as_mut()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))?;

        if self.timings.is_some() {
            self.device.device().poll(wgpu::Maintain::Wait);
            let start = Instant::now();
            atdat.update_for_step(&self.device, host)?;
            self.device.queue().submit(std::iter::empty());
            self.device.device().poll(wgpu::Maintain::Wait);
            if let Some(t) = self.timings.as_mut() {
                t.add_atom_h2d(start.elapsed().as_secs_f64());
            }
        } else {
            atdat.update_for_step(&self.device, host)?;
        }
        Ok(())
    }

    /// Upload shift vectors unless the box is static and a previous upload
    /// is still valid
    ///
    /// # Errors
    ///
    /// Returns an error on a malformed host table.
    pub fn upload_shift_vectors(&mut self, host: &HostAtomData) -> Result<()> {
        let atdat = self
            .atdat
            .as_mut()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))?;
        atdat.upload_shift_vectors(&self.device, host)
    }

    /// Upload the region's packed positions + charges for this step
    ///
    /// # Errors
    ///
    /// Returns an error on short host arrays or unsized per-atom buffers.
    pub fn copy_xq_to_gpu(&mut self, region: Region, host: &HostAtomData) -> Result<()> {
        let atdat = self
            .atdat
            .as_ref()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))?;

        if self.timings.is_some() {
            self.device.device().poll(wgpu::Maintain::Wait);
            let start = Instant::now();
            atdat.copy_xq_to_gpu(&self.device, host, region)?;
            self.device.queue().submit(std::iter::empty());
            self.device.device().poll(wgpu::Maintain::Wait);
            if let Some(t) = self.timings.as_mut() {
                t.add_atom_h2d(start.elapsed().as_secs_f64());
            }
        } else {
            atdat.copy_xq_to_gpu(&self.device, host, region)?;
        }
        Ok(())
    }

    /// Re-copy cutoffs after load rebalancing and refresh the Ewald table
    ///
    /// Only call at a safe point, never with kernels in flight.
    ///
    /// # Errors
    ///
    /// Fatal on conflicting overrides or upload failure.
    pub fn update_params_for_load_balancing(&mut self, cutoffs: &CutoffParams) -> Result<()> {
        let nbparam = self
            .nbparam
            .as_mut()
            .ok_or_else(|| anyhow!("parameters not initialized; call init_const first"))?;
        nbparam.update_for_load_balancing(&self.device, cutoffs, &self.overrides)
    }

    /// Whether the active Ewald kernels are analytical
    ///
    /// # Errors
    ///
    /// Returns an error before [`NonbondedGpu::init_const`].
    pub fn is_ewald_analytical(&self) -> Result<bool> {
        Ok(self.params()?.is_ewald_analytical())
    }

    /// Timing snapshot, `None` when the gate disabled instrumentation
    #[must_use]
    pub fn get_timings(&self) -> Option<&GpuTimings> {
        self.timings.as_ref()
    }

    /// Zero all timing counters without touching queues or buffers
    pub fn reset_timings(&mut self) {
        if let Some(t) = self.timings.as_mut() {
            t.reset();
        }
    }

    /// Minimum pair-list length worth balancing to on this device
    #[must_use]
    pub fn min_pairs_balanced(&self) -> u32 {
        self.balance_factor * self.device.compute_units()
    }

    /// Block until a region's submitted work has completed
    ///
    /// # Errors
    ///
    /// Returns an error for an inactive region.
    pub fn wait(&self, region: Region) -> Result<()> {
        self.stream(region)?.wait(&self.device);
        Ok(())
    }

    /// Release every device resource; called once at teardown
    pub fn free(&mut self) {
        if let Some(atdat) = self.atdat.as_mut() {
            atdat.free();
        }
        if let Some(nbparam) = self.nbparam.as_mut() {
            nbparam.free();
        }
        for plist in self.plists.iter_mut().flatten() {
            plist.free();
        }
    }
}

impl Drop for NonbondedGpu {
    fn drop(&mut self) {
        self.free();
    }
}
