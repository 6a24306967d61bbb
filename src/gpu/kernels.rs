//! Kernel variant selection and pipeline table
//!
//! The force kernel exists in one precompiled variant per
//! (electrostatics flavor × van-der-Waals flavor × energy × prune) key.
//! Variants are specialized from a single WGSL template by prepending a
//! constant block, then cached in a fixed-size table indexed by the dense
//! key — a closed, compile-time-enumerable set, not an open hierarchy.

use super::params::{ElecFlavor, VdwFlavor, ELEC_FLAVOR_COUNT, VDW_FLAVOR_COUNT};
use super::shaders::{SHADER_CLEAR_E_FSHIFT, SHADER_CLEAR_F, SHADER_NONBONDED_TEMPLATE};
use super::GpuDevice;
use anyhow::{anyhow, Result};

/// Threads per force-kernel workgroup (one workgroup per sci record)
pub const FORCE_WORKGROUP_SIZE: u32 = 64;

/// Threads per clear-kernel workgroup
pub const CLEAR_WORKGROUP_SIZE: u32 = 64;

/// Number of distinct force-kernel variants
pub const VARIANT_COUNT: usize = ELEC_FLAVOR_COUNT * VDW_FLAVOR_COUNT * 2 * 2;

/// Selection key for one force-kernel variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantKey {
    /// Electrostatics flavor
    pub elec: ElecFlavor,
    /// Van-der-Waals flavor
    pub vdw: VdwFlavor,
    /// Accumulate energies this step
    pub energy: bool,
    /// Prune the pair list in place this step
    pub prune: bool,
}

impl VariantKey {
    /// Dense index into the pipeline table
    #[must_use]
    pub const fn index(self) -> usize {
        ((self.elec.index() * VDW_FLAVOR_COUNT + self.vdw.index()) * 2 + self.energy as usize) * 2
            + self.prune as usize
    }

    /// Pipeline label for diagnostics
    #[must_use]
    pub fn label(self) -> String {
        format!(
            "nonbonded {:?}/{:?}{}{}",
            self.elec,
            self.vdw,
            if self.energy { " +ener" } else { "" },
            if self.prune { " +prune" } else { "" },
        )
    }
}

/// Specialize the force-kernel template for one variant
///
/// Prepends the flavor/energy/prune constants the template consumes; every
/// flavor branch in the hot loop folds away at shader compile time.
#[must_use]
pub fn specialize_source(key: VariantKey) -> String {
    format!(
        "const EL_FLAVOR: u32 = {}u;\n\
         const VDW_FLAVOR: u32 = {}u;\n\
         const DO_ENERGY: bool = {};\n\
         const DO_PRUNE: bool = {};\n\n{}",
        key.elec.index(),
        key.vdw.index(),
        key.energy,
        key.prune,
        SHADER_NONBONDED_TEMPLATE
    )
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Precompiled pipeline table for all kernel variants plus the auxiliary
/// clear kernels
///
/// Force-kernel variants are built lazily on first use; the clear kernels
/// are built eagerly at init since every step needs them.
#[derive(Debug)]
pub struct KernelTable {
    force_layout: wgpu::BindGroupLayout,
    force_pipeline_layout: wgpu::PipelineLayout,
    pipelines: Vec<Option<wgpu::ComputePipeline>>,

    clear_f_layout: wgpu::BindGroupLayout,
    clear_f_pipeline: wgpu::ComputePipeline,
    /// Uniform carrying the element count for the force clear
    clear_params: wgpu::Buffer,

    clear_e_fshift_layout: wgpu::BindGroupLayout,
    clear_e_fshift_pipeline: wgpu::ComputePipeline,
}

impl KernelTable {
    /// Build layouts and the auxiliary clear pipelines
    #[must_use]
    pub fn new(device: &GpuDevice) -> Self {
        let dev = device.device();

        let force_layout = dev.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("nonbonded force layout"),
            entries: &[
                uniform_entry(0),        // params
                storage_entry(1, true),  // xq
                storage_entry(2, true),  // atom_types
                storage_entry(3, true),  // shift_vec
                storage_entry(4, false), // f
                storage_entry(5, false), // fshift
                storage_entry(6, false), // e_lj
                storage_entry(7, false), // e_el
                storage_entry(8, true),  // sci
                storage_entry(9, false), // cj4 (pruned in place)
                storage_entry(10, true), // excl
                storage_entry(11, true), // nbfp
                storage_entry(12, true), // nbfp_comb
                storage_entry(13, true), // coulomb_tab
            ],
        });

        let force_pipeline_layout = dev.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("nonbonded force pipeline layout"),
            bind_group_layouts: &[&force_layout],
            push_constant_ranges: &[],
        });

        let clear_f_layout = dev.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("clear_f layout"),
            entries: &[uniform_entry(0), storage_entry(1, false)],
        });
        let clear_f_pipeline_layout =
            dev.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("clear_f pipeline layout"),
                bind_group_layouts: &[&clear_f_layout],
                push_constant_ranges: &[],
            });
        let clear_f_module = dev.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("clear_f shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_CLEAR_F.into()),
        });
        let clear_f_pipeline = dev.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("clear_f pipeline"),
            layout: Some(&clear_f_pipeline_layout),
            module: &clear_f_module,
            entry_point: "clear_f",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let clear_params = dev.create_buffer(&wgpu::BufferDescriptor {
            label: Some("clear_f params"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let clear_e_fshift_layout =
            dev.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("clear_e_fshift layout"),
                entries: &[
                    storage_entry(0, false),
                    storage_entry(1, false),
                    storage_entry(2, false),
                ],
            });
        let clear_e_fshift_pipeline_layout =
            dev.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("clear_e_fshift pipeline layout"),
                bind_group_layouts: &[&clear_e_fshift_layout],
                push_constant_ranges: &[],
            });
        let clear_e_fshift_module = dev.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("clear_e_fshift shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_CLEAR_E_FSHIFT.into()),
        });
        let clear_e_fshift_pipeline =
            dev.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("clear_e_fshift pipeline"),
                layout: Some(&clear_e_fshift_pipeline_layout),
                module: &clear_e_fshift_module,
                entry_point: "clear_e_fshift",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        Self {
            force_layout,
            force_pipeline_layout,
            pipelines: (0..VARIANT_COUNT).map(|_| None).collect(),
            clear_f_layout,
            clear_f_pipeline,
            clear_params,
            clear_e_fshift_layout,
            clear_e_fshift_pipeline,
        }
    }

    /// Look up the pipeline for a variant key, building it on first use
    ///
    /// # Errors
    ///
    /// Returns an error when the table slot cannot be filled.
    pub fn get_or_build(
        &mut self,
        device: &GpuDevice,
        key: VariantKey,
    ) -> Result<&wgpu::ComputePipeline> {
        let idx = key.index();
        if self.pipelines[idx].is_none() {
            tracing::debug!(variant = %key.label(), "compiling force-kernel variant");
            let source = specialize_source(key);
            let module = device
                .device()
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&key.label()),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                });
            let pipeline =
                device
                    .device()
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(&key.label()),
                        layout: Some(&self.force_pipeline_layout),
                        module: &module,
                        entry_point: "nonbonded_force",
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        cache: None,
                    });
            self.pipelines[idx] = Some(pipeline);
        }
        self.pipelines[idx]
            .as_ref()
            .ok_or_else(|| anyhow!("kernel variant {idx} missing after build"))
    }

    /// Look up an already-built pipeline without touching the cache
    ///
    /// # Errors
    ///
    /// Returns an error when the variant has not been built yet.
    pub fn pipeline(&self, key: VariantKey) -> Result<&wgpu::ComputePipeline> {
        self.pipelines[key.index()]
            .as_ref()
            .ok_or_else(|| anyhow!("kernel variant {} not built", key.label()))
    }

    /// Bind-group layout shared by all force-kernel variants
    #[must_use]
    pub const fn force_layout(&self) -> &wgpu::BindGroupLayout {
        &self.force_layout
    }

    /// Force-clear pipeline
    #[must_use]
    pub const fn clear_f_pipeline(&self) -> &wgpu::ComputePipeline {
        &self.clear_f_pipeline
    }

    /// Force-clear bind-group layout
    #[must_use]
    pub const fn clear_f_layout(&self) -> &wgpu::BindGroupLayout {
        &self.clear_f_layout
    }

    /// Uniform buffer holding the force-clear element count
    #[must_use]
    pub const fn clear_params(&self) -> &wgpu::Buffer {
        &self.clear_params
    }

    /// Shift-force/energy clear pipeline
    #[must_use]
    pub const fn clear_e_fshift_pipeline(&self) -> &wgpu::ComputePipeline {
        &self.clear_e_fshift_pipeline
    }

    /// Shift-force/energy clear bind-group layout
    #[must_use]
    pub const fn clear_e_fshift_layout(&self) -> &wgpu::BindGroupLayout {
        &self.clear_e_fshift_layout
    }

    /// Number of variants compiled so far
    #[must_use]
    pub fn compiled_count(&self) -> usize {
        self.pipelines.iter().filter(|p| p.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_keys() -> Vec<VariantKey> {
        let elec = [
            ElecFlavor::Cut,
            ElecFlavor::ReactionField,
            ElecFlavor::EwaldAnalytical,
            ElecFlavor::EwaldTabulated,
            ElecFlavor::EwaldAnalyticalTwin,
            ElecFlavor::EwaldTabulatedTwin,
        ];
        let vdw = [
            VdwFlavor::Cut,
            VdwFlavor::ForceSwitch,
            VdwFlavor::PotentialSwitch,
            VdwFlavor::EwaldGeometric,
            VdwFlavor::EwaldLorentzBerthelot,
        ];
        let mut keys = Vec::new();
        for e in elec {
            for v in vdw {
                for energy in [false, true] {
                    for prune in [false, true] {
                        keys.push(VariantKey {
                            elec: e,
                            vdw: v,
                            energy,
                            prune,
                        });
                    }
                }
            }
        }
        keys
    }

    #[test]
    fn variant_index_is_a_bijection() {
        let keys = all_keys();
        assert_eq!(keys.len(), VARIANT_COUNT);

        let mut seen = vec![false; VARIANT_COUNT];
        for key in keys {
            let idx = key.index();
            assert!(idx < VARIANT_COUNT, "{key:?} index {idx} out of range");
            assert!(!seen[idx], "{key:?} collides at {idx}");
            seen[idx] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn specialized_source_carries_variant_constants() {
        for key in all_keys() {
            let source = specialize_source(key);
            assert!(source.contains(&format!("const EL_FLAVOR: u32 = {}u;", key.elec.index())));
            assert!(source.contains(&format!("const VDW_FLAVOR: u32 = {}u;", key.vdw.index())));
            assert!(source.contains(&format!("const DO_ENERGY: bool = {};", key.energy)));
            assert!(source.contains(&format!("const DO_PRUNE: bool = {};", key.prune)));
            assert!(source.contains("fn nonbonded_force"));
        }
    }

    #[test]
    fn workgroup_sizes_match_the_shaders() {
        use super::super::shaders::{SHADER_CLEAR_F, SHADER_NONBONDED_TEMPLATE};
        let force = format!("@workgroup_size({FORCE_WORKGROUP_SIZE})");
        assert!(SHADER_NONBONDED_TEMPLATE.contains(&force));
        let clear = format!("@workgroup_size({CLEAR_WORKGROUP_SIZE})");
        assert!(SHADER_CLEAR_F.contains(&clear));
    }

    #[test]
    fn variant_labels_are_distinct() {
        let labels: std::collections::HashSet<String> =
            all_keys().into_iter().map(VariantKey::label).collect();
        assert_eq!(labels.len(), VARIANT_COUNT);
    }

    #[tokio::test]
    async fn variants_build_lazily() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping variants_build_lazily: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut table = KernelTable::new(&device);
        assert_eq!(table.compiled_count(), 0);

        let key = VariantKey {
            elec: ElecFlavor::EwaldAnalytical,
            vdw: VdwFlavor::Cut,
            energy: false,
            prune: true,
        };
        table.get_or_build(&device, key).unwrap();
        assert_eq!(table.compiled_count(), 1);

        // Second lookup reuses the cached pipeline.
        table.get_or_build(&device, key).unwrap();
        assert_eq!(table.compiled_count(), 1);
    }
}
