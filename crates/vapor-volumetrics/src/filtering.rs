//! Separable blur of the lighting buffer.
//!
//! The X pass reads the lighting buffer and writes into the density buffer,
//! which voxelization no longer needs by then. The Y pass reads that result
//! and writes back, so the filtered lighting always ends up in the lighting
//! buffer.

use crate::commands::{BindingSlot, CommandRecorder, DispatchGrid, ResourceId};
use crate::kernel::{FilterKernel, KernelId};
use crate::uniforms::ShaderVariablesVolumetric;

/// `(kernel, input, output)` of both filter dispatches, in issue order.
pub const FILTER_PASSES: [(FilterKernel, ResourceId, ResourceId); 2] = [
    (FilterKernel::X, ResourceId::LightingBuffer, ResourceId::DensityBuffer),
    (FilterKernel::Y, ResourceId::DensityBuffer, ResourceId::LightingBuffer),
];

pub fn record_filtering(
    grid: DispatchGrid,
    constants: &ShaderVariablesVolumetric,
    recorder: &mut dyn CommandRecorder,
) {
    let _span = tracing::debug_span!("volumetric_lighting_filtering").entered();

    recorder.begin_scope("volumetric_lighting_filtering");
    for (filter, input, output) in FILTER_PASSES {
        let kernel = KernelId::Filter(filter);
        recorder.push_constants(kernel, constants);
        recorder.bind_texture(kernel, BindingSlot::VBufferLightingFeedback, input);
        recorder.bind_texture(kernel, BindingSlot::VBufferLightingIntegral, output);
        recorder.dispatch(kernel, grid);
    }
    recorder.end_scope();
}
