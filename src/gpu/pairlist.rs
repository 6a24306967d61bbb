//! Device-resident cluster pair list, one store per interaction region
//!
//! The host pair search produces super-cluster interaction records (`sci`),
//! 4-cluster interaction blocks (`cj4`) and exclusion masks (`excl`); this
//! module owns their device copies and the pruning flag. A freshly uploaded
//! list is always considered unpruned — pruning state does not persist
//! across uploads, even when an identical list is re-uploaded.

use super::alloc::DeviceBuffer;
use super::{GpuDevice, Region};
use anyhow::Result;
use thiserror::Error;

/// Super-cluster interaction record
///
/// References a contiguous range of [`Cj4Block`]s and the periodic shift the
/// whole super-cluster interacts under.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SciEntry {
    /// i-super-cluster index
    pub sci: u32,
    /// Shift-vector id for this interaction
    pub shift: u32,
    /// First cj4 block (inclusive)
    pub cj4_start: u32,
    /// Last cj4 block (exclusive)
    pub cj4_end: u32,
}

/// Four j-clusters and their interaction/exclusion bookkeeping
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Cj4Block {
    /// j-cluster indices
    pub cj: [u32; 4],
    /// Interaction masks, one bit per i-cluster/j-cluster pair; pruning
    /// clears bits in place
    pub imask: [u32; 2],
    /// Indices into the exclusion-mask array
    pub excl_ind: [u32; 2],
}

/// Topology exclusion bitmasks for one cluster pair
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ExclMask {
    /// One bitmask word per i-atom/j-atom row
    pub pair: [u32; 32],
}

impl Default for ExclMask {
    fn default() -> Self {
        // All interactions allowed.
        Self { pair: [u32::MAX; 32] }
    }
}

/// Pair list handed over by the host pair search
#[derive(Debug, Clone, Default)]
pub struct HostPairList {
    /// Atoms per cluster; must not change over the run
    pub na_ci: usize,
    /// Super-cluster interaction records
    pub sci: Vec<SciEntry>,
    /// 4-cluster interaction blocks
    pub cj4: Vec<Cj4Block>,
    /// Exclusion masks
    pub excl: Vec<ExclMask>,
}

/// Pair-list consistency errors, all fatal
#[derive(Debug, Error)]
pub enum PairListError {
    /// The pair search changed its cluster size mid-run
    #[error("The number of atoms per cell has changed mid-run (from {was} to {now})")]
    ClusterSizeChanged {
        /// Cluster size fixed at first upload
        was: usize,
        /// Cluster size of the offending upload
        now: usize,
    },
}

/// Device-side pair list for one interaction region
#[derive(Debug)]
pub struct PairList {
    region: Region,
    /// Cluster size, fixed at first upload
    na_c: Option<usize>,
    /// Super-cluster records
    pub(crate) sci: DeviceBuffer<SciEntry>,
    /// 4-cluster blocks; the prune kernel rewrites interaction masks in place
    pub(crate) cj4: DeviceBuffer<Cj4Block>,
    /// Exclusion masks
    pub(crate) excl: DeviceBuffer<ExclMask>,
    /// A freshly uploaded list must be pruned by the next kernel
    needs_pruning: bool,
}

const STORAGE_RW: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_DST)
    .union(wgpu::BufferUsages::COPY_SRC);

impl PairList {
    /// Create an empty store; buffers stay uninitialized until the first
    /// upload
    #[must_use]
    pub fn new(region: Region) -> Self {
        Self {
            region,
            na_c: None,
            sci: DeviceBuffer::new(format!("plist.{region}.sci"), STORAGE_RW),
            cj4: DeviceBuffer::new(format!("plist.{region}.cj4"), STORAGE_RW),
            excl: DeviceBuffer::new(format!("plist.{region}.excl"), STORAGE_RW),
            needs_pruning: false,
        }
    }

    /// Region this store belongs to
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Cluster size, once fixed by the first upload
    #[must_use]
    pub const fn na_c(&self) -> Option<usize> {
        self.na_c
    }

    /// Number of super-cluster records currently on the device
    #[must_use]
    pub const fn nsci(&self) -> usize {
        self.sci.len()
    }

    /// Number of cj4 blocks currently on the device
    #[must_use]
    pub const fn ncj4(&self) -> usize {
        self.cj4.len()
    }

    /// Number of exclusion masks currently on the device
    #[must_use]
    pub const fn nexcl(&self) -> usize {
        self.excl.len()
    }

    /// Whether the next dispatch must prune this list
    #[must_use]
    pub const fn needs_pruning(&self) -> bool {
        self.needs_pruning
    }

    /// Validate the cluster size against the value fixed at first upload
    ///
    /// # Errors
    ///
    /// Returns [`PairListError::ClusterSizeChanged`] when a previously fixed
    /// cluster size disagrees — continuing would silently compute wrong
    /// interactions, so this is fatal.
    pub fn check_cluster_size(&mut self, na_ci: usize) -> Result<(), PairListError> {
        match self.na_c {
            None => {
                self.na_c = Some(na_ci);
                Ok(())
            }
            Some(was) if was == na_ci => Ok(()),
            Some(was) => Err(PairListError::ClusterSizeChanged { was, now: na_ci }),
        }
    }

    /// Upload a fresh list, growing the three sub-buffers independently
    ///
    /// All three copies are enqueued on the shared queue in order, so the
    /// region's subsequent kernel launch observes the complete list. The
    /// list is unconditionally marked as needing pruning.
    ///
    /// # Errors
    ///
    /// Fatal on cluster-size change or allocation failure.
    pub fn upload(&mut self, device: &GpuDevice, host: &HostPairList) -> Result<()> {
        self.check_cluster_size(host.na_ci)?;

        self.sci
            .realloc_buffered(device, Some(&host.sci), host.sci.len())?;
        self.cj4
            .realloc_buffered(device, Some(&host.cj4), host.cj4.len())?;
        self.excl
            .realloc_buffered(device, Some(&host.excl), host.excl.len())?;

        // Pruning state never survives an upload.
        self.needs_pruning = true;

        tracing::debug!(
            region = %self.region,
            nsci = self.sci.len(),
            ncj4 = self.cj4.len(),
            nexcl = self.excl.len(),
            "uploaded pair list"
        );
        Ok(())
    }

    /// Record a dispatch; a pruning variant clears the flag, a no-prune
    /// variant leaves it untouched
    pub(crate) fn on_dispatched(&mut self, pruned: bool) {
        if pruned {
            self.needs_pruning = false;
        }
    }

    /// Release all device memory and reset counts
    pub fn free(&mut self) {
        self.sci.free();
        self.cj4.free();
        self.excl.free();
        self.na_c = None;
        self.needs_pruning = false;
    }
}
