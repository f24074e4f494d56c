//! Backend-neutral GPU command stream.
//!
//! The passes never touch a graphics API directly. They record an ordered
//! list of [`Command`]s whose issue order is the only synchronization: every
//! write recorded before a dispatch is visible to it. A backend (see
//! [`crate::gpu`]) replays the list into real command buffers.

use glam::UVec3;

use crate::history::Texture3DHandle;
use crate::kernel::KernelId;
use crate::preset::div_round_up;
use crate::uniforms::{ShaderVariablesGlobalVolumetrics, ShaderVariablesVolumetric};

/// Edge of the X/Y workgroup tile of every volumetric kernel.
pub const GROUP_SIZE_1D: u32 = 8;

/// A GPU resource referenced by the command stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// Shared 3D density/scattering texture written by voxelization.
    DensityBuffer,
    /// Shared 3D in-scattered lighting texture.
    LightingBuffer,
    VolumeBounds,
    VolumeData,
    VolumeMaskAtlas,
    /// Neutral 1×1×1 black 3D texture.
    BlackVolume,
    /// Tiled light list produced by the light-culling prepass.
    BigTileLightList,
    /// Per-camera history or feedback texture.
    History(Texture3DHandle),
}

/// Named kernel input or output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingSlot {
    VBufferDensity,
    VBufferLightingIntegral,
    VBufferLightingHistory,
    VBufferLightingFeedback,
    VolumeBounds,
    VolumeData,
    VolumeMaskAtlas,
    BigTileLightList,
}

/// Renderer-facing global bindings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GlobalSlot {
    /// The lighting texture sampled by opaque and transparent shading.
    VBufferLighting,
}

/// Workgroup counts of one dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGrid {
    /// `ceil(w / 8) × ceil(h / 8) × view_count` for a V-Buffer of the given resolution.
    pub fn for_resolution(resolution: UVec3, view_count: u32) -> Self {
        Self {
            x: div_round_up(resolution.x, GROUP_SIZE_1D),
            y: div_round_up(resolution.y, GROUP_SIZE_1D),
            z: view_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Replace the start of a buffer with `data`.
    UploadBuffer { target: ResourceId, data: Vec<u8> },
    BindBuffer { kernel: KernelId, slot: BindingSlot, buffer: ResourceId },
    BindTexture { kernel: KernelId, slot: BindingSlot, texture: ResourceId },
    /// Snapshot the volumetric constants for the next dispatches of `kernel`.
    PushConstants { kernel: KernelId, constants: Box<ShaderVariablesVolumetric> },
    Dispatch { kernel: KernelId, grid: DispatchGrid },
    SetGlobalTexture { slot: GlobalSlot, texture: ResourceId },
    SetGlobalConstants(ShaderVariablesGlobalVolumetrics),
    BeginScope(&'static str),
    EndScope,
}

/// Sink for recorded commands.
pub trait CommandRecorder {
    fn record(&mut self, command: Command);

    fn upload_buffer(&mut self, target: ResourceId, data: &[u8]) {
        self.record(Command::UploadBuffer {
            target,
            data: data.to_vec(),
        });
    }

    fn bind_buffer(&mut self, kernel: KernelId, slot: BindingSlot, buffer: ResourceId) {
        self.record(Command::BindBuffer { kernel, slot, buffer });
    }

    fn bind_texture(&mut self, kernel: KernelId, slot: BindingSlot, texture: ResourceId) {
        self.record(Command::BindTexture { kernel, slot, texture });
    }

    fn push_constants(&mut self, kernel: KernelId, constants: &ShaderVariablesVolumetric) {
        self.record(Command::PushConstants {
            kernel,
            constants: Box::new(*constants),
        });
    }

    fn dispatch(&mut self, kernel: KernelId, grid: DispatchGrid) {
        self.record(Command::Dispatch { kernel, grid });
    }

    fn set_global_texture(&mut self, slot: GlobalSlot, texture: ResourceId) {
        self.record(Command::SetGlobalTexture { slot, texture });
    }

    fn set_global_constants(&mut self, constants: ShaderVariablesGlobalVolumetrics) {
        self.record(Command::SetGlobalConstants(constants));
    }

    fn begin_scope(&mut self, name: &'static str) {
        self.record(Command::BeginScope(name));
    }

    fn end_scope(&mut self) {
        self.record(Command::EndScope);
    }
}

/// An in-memory, replayable command stream.
#[derive(Clone, Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Kernels dispatched, in issue order.
    pub fn dispatches(&self) -> impl Iterator<Item = (KernelId, DispatchGrid)> + '_ {
        self.commands.iter().filter_map(|command| match command {
            Command::Dispatch { kernel, grid } => Some((*kernel, *grid)),
            _ => None,
        })
    }

    /// The resource most recently bound to `slot` of `kernel` before command `before`.
    pub fn binding_before(&self, before: usize, kernel: KernelId, slot: BindingSlot) -> Option<ResourceId> {
        self.commands[..before.min(self.commands.len())]
            .iter()
            .rev()
            .find_map(|command| match *command {
                Command::BindBuffer { kernel: k, slot: s, buffer } if k == kernel && s == slot => {
                    Some(buffer)
                }
                Command::BindTexture { kernel: k, slot: s, texture } if k == kernel && s == slot => {
                    Some(texture)
                }
                _ => None,
            })
    }
}

impl CommandRecorder for CommandList {
    fn record(&mut self, command: Command) {
        tracing::trace!(?command, "record");
        self.commands.push(command);
    }
}
