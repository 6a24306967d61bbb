//! WGSL shader sources for the nonbonded kernels
//!
//! The force kernel is a template: [`crate::gpu::kernels::specialize_source`]
//! prepends a constant block per variant before pipeline creation, so flavor
//! selection happens at shader compile time, never inside the hot loop. The
//! clear kernels are plain sources compiled once at init.

/// Force-kernel template; needs the variant constant block prepended
pub const SHADER_NONBONDED_TEMPLATE: &str = include_str!("shaders/nonbonded.wgsl");

/// Force-accumulator clear kernel
pub const SHADER_CLEAR_F: &str = include_str!("shaders/clear_f.wgsl");

/// Shift-force + energy clear kernel
pub const SHADER_CLEAR_E_FSHIFT: &str = include_str!("shaders/clear_e_fshift.wgsl");
