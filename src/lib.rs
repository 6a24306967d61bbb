//! nonbond-gpu: GPU-resident data lifecycle for short-range nonbonded MD forces
//!
//! # Overview
//!
//! nonbond-gpu owns the device-side working set of a molecular-dynamics
//! engine's short-range nonbonded force kernel: per-atom coordinates, types
//! and force accumulators, the cluster pair list produced by host pair
//! search, and the cutoff/correction tables the kernel consults. It manages
//! growable device memory under a per-step latency budget, overlaps
//! host↔device transfers with kernel execution across two interaction
//! regions (local / non-local), and selects among a closed matrix of
//! precompiled kernel variants per call.
//!
//! # Quick Start
//!
//! ```no_run
//! use nonbond_gpu::{
//!     CutoffParams, GpuDevice, HostAtomData, KernelOverrides, NonbondedGpu, Region,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let device = GpuDevice::new().await?;
//! let overrides = KernelOverrides::default();
//! let cutoffs = CutoffParams::default();
//!
//! // One context per simulation; the second region exists only under
//! // domain decomposition.
//! let mut nb = NonbondedGpu::new(device, &overrides, false)?;
//! let ntypes = 4;
//! let nbfp = vec![0.0_f32; 2 * ntypes * ntypes];
//! let nbfp_comb = vec![0.0_f32; 2 * ntypes];
//! nb.init_const(&cutoffs, ntypes, &nbfp, &nbfp_comb)?;
//!
//! // Per step: upload pair list + coordinates, clear outputs, dispatch.
//! # let pair_list = nonbond_gpu::HostPairList::default();
//! # let atoms = HostAtomData::default();
//! nb.init_pairlist(Region::Local, &pair_list)?;
//! nb.init_atomdata(&atoms)?;
//! nb.copy_xq_to_gpu(Region::Local, &atoms)?;
//! nb.clear_outputs(true)?;
//! nb.dispatch(Region::Local, true)?;
//! let forces = nb.read_forces().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Allocator**: grow-only buffered device allocation (`gpu::alloc`)
//! - **Atom data**: per-atom device state + shift vectors (`gpu::atoms`)
//! - **Pair list**: one store per interaction region (`gpu::pairlist`)
//! - **Parameters**: cutoff scalars + Ewald/LJ correction tables (`gpu::params`)
//! - **Kernels**: variant matrix, specialized WGSL pipelines (`gpu::kernels`)
//! - **Coordinator**: per-region streams, optional timing (`gpu::stream`, `gpu::timing`)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod gpu;

pub use config::{KernelOverrides, SyncMode};
pub use gpu::{
    over_alloc, CutoffParams, DeviceBuffer, ElecFlavor, ElecType, GpuDevice, GpuDeviceError,
    GpuTimings, HostAtomData, HostPairList, LjCombinationRule, NonbondedGpu, Region, VariantKey,
    VdwFlavor, VdwModifier, VdwType, Xq, SHIFT_COUNT,
};

// Error type
pub use anyhow::{Error, Result};
