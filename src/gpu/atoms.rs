//! Device-resident per-atom state
//!
//! Holds the packed position+charge array, the force accumulator, atom-type
//! ids, the periodic shift-vector table and the scalar energy accumulators.
//! Fixed-size buffers are allocated once at setup; per-atom buffers grow
//! through the buffered allocator as the pair search hands over larger
//! systems.

use super::alloc::DeviceBuffer;
use super::{GpuDevice, Region};
use anyhow::{ensure, Context, Result};

/// Number of periodic shift vectors
///
/// One translation per image cell in a 3x3x5 neighbourhood, fixed by the
/// minimum-image convention of the host engine.
pub const SHIFT_COUNT: usize = 45;

/// Packed position + charge, the kernel's input element per atom
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Xq {
    /// x coordinate (nm)
    pub x: f32,
    /// y coordinate (nm)
    pub y: f32,
    /// z coordinate (nm)
    pub z: f32,
    /// partial charge (e)
    pub q: f32,
}

/// Per-step atom state handed over by the host engine
#[derive(Debug, Clone)]
pub struct HostAtomData {
    /// Total atom count this step
    pub natoms: usize,
    /// Prefix of `natoms` owned by this rank
    pub natoms_local: usize,
    /// Packed positions + charges, `natoms` entries
    pub xq: Vec<Xq>,
    /// Atom-type ids, `natoms` entries
    pub atom_types: Vec<i32>,
    /// Periodic shift vectors (xyz + padding)
    pub shift_vec: Vec<[f32; 4]>,
    /// Whether the simulation box changes over time
    pub dynamic_box: bool,
}

impl Default for HostAtomData {
    fn default() -> Self {
        Self {
            natoms: 0,
            natoms_local: 0,
            xq: Vec::new(),
            atom_types: Vec::new(),
            shift_vec: vec![[0.0; 4]; SHIFT_COUNT],
            dynamic_box: false,
        }
    }
}

/// Device-side atom data store
///
/// `natoms` is the logical atom count of the current step; the allocation
/// behind `f`/`xq`/`atom_types` only grows. After a growth event the force
/// accumulator is zero-cleared over the whole new allocation so stale values
/// from a previous, smaller step can never leak into a larger accumulation.
#[derive(Debug)]
pub struct AtomData {
    /// Atom count of the current step
    natoms: usize,
    /// Atoms owned by this rank (prefix of `natoms`)
    natoms_local: usize,
    /// Number of atom types the parameter tables are sized for
    ntypes: usize,

    /// Packed position + charge input
    pub(crate) xq: DeviceBuffer<Xq>,
    /// Force accumulator, 3 floats per atom, flat
    pub(crate) f: DeviceBuffer<f32>,
    /// Atom-type ids
    pub(crate) atom_types: DeviceBuffer<i32>,
    /// Periodic shift vectors
    pub(crate) shift_vec: DeviceBuffer<[f32; 4]>,
    /// Per-shift force accumulator (virial input)
    pub(crate) fshift: DeviceBuffer<[f32; 4]>,
    /// Scalar Lennard-Jones energy accumulator
    pub(crate) e_lj: DeviceBuffer<f32>,
    /// Scalar electrostatic energy accumulator
    pub(crate) e_el: DeviceBuffer<f32>,

    /// Shift vectors are cached across steps while the box is static
    shift_vec_uploaded: bool,
}

const STORAGE_RW: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_DST)
    .union(wgpu::BufferUsages::COPY_SRC);

impl AtomData {
    /// Allocate the fixed-size buffers; per-atom buffers stay uninitialized
    /// until the first pair search fills them
    ///
    /// # Errors
    ///
    /// Returns an error when a fixed-size allocation fails.
    pub fn init_first(device: &GpuDevice, ntypes: usize) -> Result<Self> {
        let mut shift_vec = DeviceBuffer::new("atdat.shift_vec", STORAGE_RW);
        shift_vec.realloc_buffered(device, None, SHIFT_COUNT)?;

        let mut fshift = DeviceBuffer::new("atdat.fshift", STORAGE_RW);
        fshift.realloc_buffered(device, None, SHIFT_COUNT)?;

        let mut e_lj = DeviceBuffer::new("atdat.e_lj", STORAGE_RW);
        e_lj.realloc_buffered(device, None, 1)?;

        let mut e_el = DeviceBuffer::new("atdat.e_el", STORAGE_RW);
        e_el.realloc_buffered(device, None, 1)?;

        Ok(Self {
            natoms: 0,
            natoms_local: 0,
            ntypes,
            xq: DeviceBuffer::new("atdat.xq", STORAGE_RW),
            f: DeviceBuffer::new("atdat.f", STORAGE_RW),
            atom_types: DeviceBuffer::new("atdat.atom_types", STORAGE_RW),
            shift_vec,
            fshift,
            e_lj,
            e_el,
            shift_vec_uploaded: false,
        })
    }

    /// Atom count of the current step
    #[must_use]
    pub const fn natoms(&self) -> usize {
        self.natoms
    }

    /// Atoms owned by this rank
    #[must_use]
    pub const fn natoms_local(&self) -> usize {
        self.natoms_local
    }

    /// Number of atom types
    #[must_use]
    pub const fn ntypes(&self) -> usize {
        self.ntypes
    }

    /// Allocated per-atom capacity, if the per-atom buffers are live
    #[must_use]
    pub fn nalloc(&self) -> Option<usize> {
        self.xq.capacity()
    }

    /// Take over a new step's atom counts, growing the per-atom buffers
    /// when needed, and upload the atom-type array
    ///
    /// Position upload is deliberately left to the dispatch path
    /// ([`AtomData::copy_xq_to_gpu`]): positions change every step and are
    /// uploaded immediately before the kernel that consumes them. Returns
    /// whether a growth event occurred; on growth the force buffer has been
    /// zero-cleared over the whole new allocation.
    ///
    /// # Errors
    ///
    /// Returns an error when the host arrays are shorter than `natoms` or a
    /// device allocation fails.
    pub fn update_for_step(&mut self, device: &GpuDevice, host: &HostAtomData) -> Result<bool> {
        ensure!(
            host.atom_types.len() >= host.natoms,
            "atom-type array ({}) shorter than natoms ({})",
            host.atom_types.len(),
            host.natoms
        );
        ensure!(
            host.natoms_local <= host.natoms,
            "natoms_local ({}) exceeds natoms ({})",
            host.natoms_local,
            host.natoms
        );

        // The three per-atom buffers grow together; over_alloc of the same
        // request keeps them at the same capacity.
        let grew_xq = self.xq.realloc_buffered(device, None, host.natoms)?;
        let grew_f = self.f.realloc_buffered(device, None, 3 * host.natoms)?;
        let grew = grew_xq || grew_f;
        self.atom_types
            .realloc_buffered(device, Some(&host.atom_types), host.natoms)
            .context("uploading atom types")?;

        self.natoms = host.natoms;
        self.natoms_local = host.natoms_local;

        // A grown force accumulator must not expose stale values beyond the
        // old logical size.
        if grew {
            let mut encoder = device
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("atdat clear on grow"),
                });
            self.f.clear_all(&mut encoder)?;
            device.queue().submit(Some(encoder.finish()));
        }

        Ok(grew)
    }

    /// Upload shift vectors, skipping the copy while the box is static and
    /// a previous upload is still valid
    ///
    /// # Errors
    ///
    /// Returns an error when the host table is not `SHIFT_COUNT` entries or
    /// the upload fails.
    pub fn upload_shift_vectors(&mut self, device: &GpuDevice, host: &HostAtomData) -> Result<()> {
        if !host.dynamic_box && self.shift_vec_uploaded {
            return Ok(());
        }
        ensure!(
            host.shift_vec.len() == SHIFT_COUNT,
            "shift-vector table has {} entries, expected {SHIFT_COUNT}",
            host.shift_vec.len()
        );
        self.shift_vec.upload(device, &host.shift_vec, 0)?;
        self.shift_vec_uploaded = true;
        Ok(())
    }

    /// Whether a shift-vector upload would be skipped right now
    #[must_use]
    pub const fn shift_vec_uploaded(&self) -> bool {
        self.shift_vec_uploaded
    }

    /// Upload the region's slice of packed positions + charges
    ///
    /// Local covers `[0, natoms_local)`, non-local `[natoms_local, natoms)`.
    /// Enqueued asynchronously; ordering against the region's subsequent
    /// kernel launch is preserved by the queue.
    ///
    /// # Errors
    ///
    /// Returns an error when the host array is shorter than the region's
    /// range or the per-atom buffers have not been sized yet.
    pub fn copy_xq_to_gpu(
        &self,
        device: &GpuDevice,
        host: &HostAtomData,
        region: Region,
    ) -> Result<()> {
        let (begin, end) = match region {
            Region::Local => (0, self.natoms_local),
            Region::NonLocal => (self.natoms_local, self.natoms),
        };
        if begin == end {
            return Ok(());
        }
        ensure!(
            host.xq.len() >= end,
            "xq array ({}) shorter than region end ({end})",
            host.xq.len()
        );
        self.xq.upload(device, &host.xq[begin..end], begin)?;
        Ok(())
    }

    /// Release all device memory; called exactly once at context teardown
    pub fn free(&mut self) {
        self.xq.free();
        self.f.free();
        self.atom_types.free();
        self.shift_vec.free();
        self.fshift.free();
        self.e_lj.free();
        self.e_el.free();
        self.natoms = 0;
        self.natoms_local = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_atoms(natoms: usize, natoms_local: usize) -> HostAtomData {
        HostAtomData {
            natoms,
            natoms_local,
            xq: vec![Xq::default(); natoms],
            atom_types: vec![0; natoms],
            ..HostAtomData::default()
        }
    }

    #[test]
    fn default_host_atoms_have_full_shift_table() {
        let host = HostAtomData::default();
        assert_eq!(host.shift_vec.len(), SHIFT_COUNT);
        assert_eq!(host.natoms, 0);
    }

    #[tokio::test]
    async fn first_step_grows_once_and_tracks_counts() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping first_step_grows_once_and_tracks_counts: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut atdat = AtomData::init_first(&device, 4).unwrap();
        assert_eq!(atdat.nalloc(), None);

        let grew = atdat
            .update_for_step(&device, &host_atoms(1000, 1000))
            .unwrap();
        assert!(grew, "first step must allocate");
        assert_eq!(atdat.natoms(), 1000);
        assert_eq!(atdat.natoms_local(), 1000);
        assert!(atdat.nalloc().unwrap() >= 1000);
    }

    #[tokio::test]
    async fn shrinking_step_reuses_allocation() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping shrinking_step_reuses_allocation: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut atdat = AtomData::init_first(&device, 4).unwrap();

        atdat
            .update_for_step(&device, &host_atoms(1000, 1000))
            .unwrap();
        let nalloc = atdat.nalloc().unwrap();

        let grew = atdat
            .update_for_step(&device, &host_atoms(500, 500))
            .unwrap();
        assert!(!grew, "shrinking must not reallocate");
        assert_eq!(atdat.natoms(), 500);
        assert_eq!(atdat.nalloc().unwrap(), nalloc);
    }

    #[tokio::test]
    async fn shift_vectors_cached_for_static_box() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping shift_vectors_cached_for_static_box: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut atdat = AtomData::init_first(&device, 2).unwrap();
        let host = host_atoms(8, 8);

        assert!(!atdat.shift_vec_uploaded());
        atdat.upload_shift_vectors(&device, &host).unwrap();
        assert!(atdat.shift_vec_uploaded());

        // Static box: second call is a no-op and the flag stays set.
        atdat.upload_shift_vectors(&device, &host).unwrap();
        assert!(atdat.shift_vec_uploaded());
    }

    #[tokio::test]
    async fn short_type_array_is_rejected() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping short_type_array_is_rejected: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut atdat = AtomData::init_first(&device, 2).unwrap();

        let mut host = host_atoms(10, 10);
        host.atom_types.truncate(5);
        assert!(atdat.update_for_step(&device, &host).is_err());
    }
}
