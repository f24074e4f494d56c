//! Volumetric lighting integration: marches each V-Buffer column and
//! accumulates in-scattered light, optionally reprojecting last frame's result.

use crate::commands::{BindingSlot, CommandRecorder, DispatchGrid, ResourceId};
use crate::history::HistoryTextures;
use crate::kernel::{KernelId, LightingKernel};
use crate::uniforms::ShaderVariablesVolumetric;

/// Everything the lighting dispatch needs, resolved up front.
#[derive(Clone, Debug)]
pub struct LightingParameters {
    pub kernel: LightingKernel,
    pub grid: DispatchGrid,
    /// Bound only when the kernel reprojects.
    pub history: Option<HistoryTextures>,
    pub filter: bool,
    pub constants: ShaderVariablesVolumetric,
}

impl LightingParameters {
    /// Reprojection needs both history textures. Without them the pass runs
    /// as a cold start and leaves the history untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        grid: DispatchGrid,
        big_tile_prepass: bool,
        reprojection: bool,
        history: Option<HistoryTextures>,
        anisotropy: f32,
        high_quality: bool,
        filter: bool,
        constants: ShaderVariablesVolumetric,
    ) -> Self {
        let history = history.filter(|_| reprojection);
        Self {
            kernel: LightingKernel::select(big_tile_prepass, history.is_some(), anisotropy, high_quality),
            grid,
            history,
            filter,
            constants,
        }
    }

    pub fn reprojects(&self) -> bool {
        self.kernel.reprojection
    }
}

/// Bind inputs and dispatch the lighting kernel.
///
/// Returns `true` when the feedback texture was written, which makes the
/// history valid for the next frame.
pub fn record_lighting(params: &LightingParameters, recorder: &mut dyn CommandRecorder) -> bool {
    let _span = tracing::debug_span!("volumetric_lighting", kernel = %params.kernel).entered();
    let kernel = KernelId::Lighting(params.kernel);

    recorder.begin_scope("volumetric_lighting");

    if params.kernel.tiled_lighting {
        recorder.bind_buffer(kernel, BindingSlot::BigTileLightList, ResourceId::BigTileLightList);
    }
    recorder.bind_texture(kernel, BindingSlot::VBufferDensity, ResourceId::DensityBuffer);
    recorder.bind_texture(kernel, BindingSlot::VBufferLightingIntegral, ResourceId::LightingBuffer);

    let reprojected = match params.history {
        Some(textures) if params.kernel.reprojection => {
            recorder.bind_texture(
                kernel,
                BindingSlot::VBufferLightingHistory,
                ResourceId::History(textures.history),
            );
            recorder.bind_texture(
                kernel,
                BindingSlot::VBufferLightingFeedback,
                ResourceId::History(textures.feedback),
            );
            true
        }
        _ => false,
    };

    recorder.push_constants(kernel, &params.constants);
    recorder.dispatch(kernel, params.grid);

    recorder.end_scope();
    reprojected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandList;
    use crate::history::Texture3DHandle;
    use glam::UVec3;

    fn grid() -> DispatchGrid {
        DispatchGrid::for_resolution(UVec3::new(240, 135, 64), 1)
    }

    fn textures() -> HistoryTextures {
        HistoryTextures {
            history: Texture3DHandle(1),
            feedback: Texture3DHandle(2),
        }
    }

    fn params(reprojection: bool, history: Option<HistoryTextures>) -> LightingParameters {
        LightingParameters::new(
            grid(),
            true,
            reprojection,
            history,
            0.0,
            false,
            false,
            ShaderVariablesVolumetric::default(),
        )
    }

    #[test]
    fn test_reprojection_binds_history_and_feedback() {
        let params = params(true, Some(textures()));
        assert!(params.reprojects());

        let mut list = CommandList::new();
        assert!(record_lighting(&params, &mut list));
        let kernel = KernelId::Lighting(params.kernel);
        let end = list.len();
        assert_eq!(
            list.binding_before(end, kernel, BindingSlot::VBufferLightingHistory),
            Some(ResourceId::History(Texture3DHandle(1)))
        );
        assert_eq!(
            list.binding_before(end, kernel, BindingSlot::VBufferLightingFeedback),
            Some(ResourceId::History(Texture3DHandle(2)))
        );
    }

    #[test]
    fn test_missing_history_is_cold_start() {
        let params = params(true, None);
        assert!(!params.reprojects());
        assert!(!params.kernel.keywords().contains(&"ENABLE_REPROJECTION"));

        let mut list = CommandList::new();
        assert!(!record_lighting(&params, &mut list));
        let kernel = KernelId::Lighting(params.kernel);
        assert_eq!(list.binding_before(list.len(), kernel, BindingSlot::VBufferLightingHistory), None);
    }

    #[test]
    fn test_disabled_reprojection_ignores_textures() {
        let params = params(false, Some(textures()));
        assert!(!params.reprojects());
        assert!(params.history.is_none());
    }

    #[test]
    fn test_tiled_follows_prepass_only() {
        let params = params(false, None);
        assert!(params.kernel.tiled_lighting);
        let mut list = CommandList::new();
        record_lighting(&params, &mut list);
        assert_eq!(
            list.binding_before(list.len(), KernelId::Lighting(params.kernel), BindingSlot::BigTileLightList),
            Some(ResourceId::BigTileLightList)
        );
    }

    #[test]
    fn test_anisotropy_selects_variant() {
        let params = LightingParameters::new(
            grid(),
            false,
            false,
            None,
            0.4,
            true,
            true,
            ShaderVariablesVolumetric::default(),
        );
        assert!(params.kernel.anisotropy);
        assert!(params.kernel.high_quality);
        assert!(params.filter);
    }
}
