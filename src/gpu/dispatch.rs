//! Output clearing, kernel dispatch and result readback
//!
//! Per-step hot path: `clear_outputs` enqueues the lightweight clears,
//! `dispatch` looks up the variant for the resolved selection key, binds the
//! current buffers and launches on the region's stream, and the `read_*`
//! entry points stage results back to the host. Enqueuing never blocks;
//! callers decide where completion is awaited.

use super::atoms::SHIFT_COUNT;
use super::kernels::{VariantKey, CLEAR_WORKGROUP_SIZE};
use super::stream::read_back;
use super::{NonbondedGpu, Region};
use anyhow::{anyhow, Result};
use std::time::Instant;

impl NonbondedGpu {
    /// Clear the force accumulator for the first `natoms` entries, and the
    /// shift-force/energy accumulators only when the step needs the virial
    ///
    /// Skipping the shift/energy clear on steps that don't consume them
    /// avoids extra device round-trips, not just redundant work.
    ///
    /// # Errors
    ///
    /// Returns an error before `init_const` or when buffers are not live.
    pub fn clear_outputs(&self, compute_virial: bool) -> Result<()> {
        let atdat = self
            .atdat
            .as_ref()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))?;
        let natoms_flat = u32::try_from(3 * atdat.natoms())?;

        let mut encoder =
            self.device
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("clear outputs"),
                });

        if natoms_flat > 0 {
            self.device.queue().write_buffer(
                self.kernels.clear_params(),
                0,
                bytemuck::cast_slice(&[natoms_flat, 0, 0, 0]),
            );
            let bind_group = self
                .device
                .device()
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("clear_f bind group"),
                    layout: self.kernels.clear_f_layout(),
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self.kernels.clear_params().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: atdat.f.binding()?,
                        },
                    ],
                });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("clear_f pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(self.kernels.clear_f_pipeline());
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(natoms_flat.div_ceil(CLEAR_WORKGROUP_SIZE), 1, 1);
        }

        if compute_virial {
            let bind_group = Self::e_fshift_bind_group(&self.device, &self.kernels, atdat)?;
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("clear_e_fshift pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(self.kernels.clear_e_fshift_pipeline());
            pass.set_bind_group(0, &bind_group, &[]);
            let shift_floats = u32::try_from(4 * SHIFT_COUNT)?;
            pass.dispatch_workgroups(shift_floats.div_ceil(CLEAR_WORKGROUP_SIZE), 1, 1);
        }

        // Clears ride the local stream, ahead of any dispatch this step.
        self.stream(Region::Local)?.submit(&self.device, encoder);
        Ok(())
    }

    /// Clear only the shift-force and energy accumulators (setup path)
    pub(crate) fn clear_e_fshift_outputs(&self) -> Result<()> {
        let atdat = self
            .atdat
            .as_ref()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))?;

        let bind_group = Self::e_fshift_bind_group(&self.device, &self.kernels, atdat)?;
        let mut encoder =
            self.device
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("init clear e/fshift"),
                });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("clear_e_fshift pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(self.kernels.clear_e_fshift_pipeline());
            pass.set_bind_group(0, &bind_group, &[]);
            let shift_floats = u32::try_from(4 * SHIFT_COUNT)?;
            pass.dispatch_workgroups(shift_floats.div_ceil(CLEAR_WORKGROUP_SIZE), 1, 1);
        }
        self.stream(Region::Local)?.submit(&self.device, encoder);
        Ok(())
    }

    fn e_fshift_bind_group(
        device: &super::GpuDevice,
        kernels: &super::kernels::KernelTable,
        atdat: &super::atoms::AtomData,
    ) -> Result<wgpu::BindGroup> {
        Ok(device
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("clear_e_fshift bind group"),
                layout: kernels.clear_e_fshift_layout(),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: atdat.fshift.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: atdat.e_lj.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: atdat.e_el.binding()?,
                    },
                ],
            }))
    }

    /// Launch the force kernel for a region
    ///
    /// The variant key is resolved from the parameter flavors, the caller's
    /// energy request and the region's pruning flag; the matching pipeline
    /// is taken from the fixed table (built on first use). The kernel
    /// prunes the pair list in place when the flag was set, after which the
    /// flag is cleared; a no-prune dispatch leaves it untouched.
    ///
    /// # Errors
    ///
    /// Fatal on missing setup, inactive region, or dead buffers.
    pub fn dispatch(&mut self, region: Region, with_energy: bool) -> Result<()> {
        let nbparam = self
            .nbparam
            .as_ref()
            .ok_or_else(|| anyhow!("parameters not initialized; call init_const first"))?;
        if self.atdat.is_none() {
            return Err(anyhow!("atom data not initialized; call init_const first"));
        }
        let plist = self.plists[region.index()]
            .as_ref()
            .ok_or_else(|| anyhow!("region {region} has no pair list this run"))?;

        let prune = plist.needs_pruning();
        let key = VariantKey {
            elec: nbparam.elec_flavor(),
            vdw: nbparam.vdw_flavor(),
            energy: with_energy,
            prune,
        };

        let nsci = u32::try_from(plist.nsci())?;
        if nsci == 0 {
            // Nothing to launch; an empty list has nothing left to prune.
            self.plists[region.index()]
                .as_mut()
                .ok_or_else(|| anyhow!("region {region} has no pair list this run"))?
                .on_dispatched(prune);
            return Ok(());
        }

        // Ensure the variant exists, then re-borrow immutably for binding.
        self.kernels.get_or_build(&self.device, key)?;
        let nbparam = self
            .nbparam
            .as_ref()
            .ok_or_else(|| anyhow!("parameters not initialized"))?;
        let atdat = self
            .atdat
            .as_ref()
            .ok_or_else(|| anyhow!("atom data not initialized"))?;
        let plist = self.plists[region.index()]
            .as_ref()
            .ok_or_else(|| anyhow!("region {region} has no pair list"))?;
        let pipeline = self.kernels.pipeline(key)?;

        // Bind groups are rebuilt every call: any buffer may have been
        // reallocated since the previous step.
        let bind_group = self
            .device
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("nonbonded force bind group"),
                layout: self.kernels.force_layout(),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: nbparam.uniform.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: atdat.xq.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: atdat.atom_types.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: atdat.shift_vec.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: atdat.f.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: atdat.fshift.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: atdat.e_lj.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: atdat.e_el.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 8,
                        resource: plist.sci.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 9,
                        resource: plist.cj4.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 10,
                        resource: plist.excl.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 11,
                        resource: nbparam.nbfp.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 12,
                        resource: nbparam.nbfp_comb.binding()?,
                    },
                    wgpu::BindGroupEntry {
                        binding: 13,
                        resource: nbparam.coulomb_tab.binding()?,
                    },
                ],
            });

        let mut encoder =
            self.device
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("nonbonded dispatch"),
                });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("nonbonded force pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            // One 64-thread workgroup per sci record.
            pass.dispatch_workgroups(nsci, 1, 1);
        }

        let stream = *self.stream(region)?;
        if self.timings.is_some() {
            stream.wait(&self.device);
            let start = Instant::now();
            stream.submit(&self.device, encoder);
            stream.wait(&self.device);
            if let Some(t) = self.timings.as_mut() {
                t.add_kernel_time(with_energy, prune, start.elapsed().as_secs_f64());
            }
        } else {
            stream.submit(&self.device, encoder);
        }

        self.plists[region.index()]
            .as_mut()
            .ok_or_else(|| anyhow!("region {region} has no pair list this run"))?
            .on_dispatched(prune);
        Ok(())
    }

    /// Read the force array back to the host (3 floats per atom)
    ///
    /// # Errors
    ///
    /// Returns an error when the readback fails.
    pub async fn read_forces(&mut self) -> Result<Vec<f32>> {
        let atdat = self
            .atdat
            .as_ref()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))?;
        let elems = 3 * atdat.natoms();

        let start = self.timings.is_some().then(Instant::now);
        let out = read_back::<f32>(&self.device, atdat.f.raw()?, elems).await?;
        if let (Some(start), Some(t)) = (start, self.timings.as_mut()) {
            t.add_d2h(start.elapsed().as_secs_f64());
        }
        Ok(out)
    }

    /// Read the scalar (Lennard-Jones, electrostatic) energies back
    ///
    /// # Errors
    ///
    /// Returns an error when the readback fails.
    pub async fn read_energies(&mut self) -> Result<(f32, f32)> {
        let atdat = self
            .atdat
            .as_ref()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))?;

        let start = self.timings.is_some().then(Instant::now);
        let e_lj = read_back::<f32>(&self.device, atdat.e_lj.raw()?, 1).await?;
        let e_el = read_back::<f32>(&self.device, atdat.e_el.raw()?, 1).await?;
        if let (Some(start), Some(t)) = (start, self.timings.as_mut()) {
            t.add_d2h(start.elapsed().as_secs_f64());
        }
        Ok((e_lj[0], e_el[0]))
    }

    /// Read the per-shift force accumulator back (virial input)
    ///
    /// # Errors
    ///
    /// Returns an error when the readback fails.
    pub async fn read_shift_forces(&mut self) -> Result<Vec<[f32; 4]>> {
        let atdat = self
            .atdat
            .as_ref()
            .ok_or_else(|| anyhow!("atom data not initialized; call init_const first"))?;

        let start = self.timings.is_some().then(Instant::now);
        let out = read_back::<[f32; 4]>(&self.device, atdat.fshift.raw()?, SHIFT_COUNT).await?;
        if let (Some(start), Some(t)) = (start, self.timings.as_mut()) {
            t.add_d2h(start.elapsed().as_secs_f64());
        }
        Ok(out)
    }
}
