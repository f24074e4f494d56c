//! `wgpu` backend: the shared V-Buffer resources, real history textures and
//! the replay of a recorded command stream into compute passes.
//!
//! Kernel shader modules come from the caller. This module only fixes the
//! bind-group contract every kernel family is compiled against:
//!
//! | family       | 0       | 1        | 2         | 3       | 4        | 5        | 6          |
//! |--------------|---------|----------|-----------|---------|----------|----------|------------|
//! | voxelization | uniform | bounds   | data      | atlas   | sampler  | density* | light list |
//! | lighting     | uniform | density  | integral* | history | feedback*| sampler  | light list |
//! | filter       | uniform | input    | output*   |         |          |          |            |
//!
//! `*` marks write-only `rgba16float` storage textures, every other texture is
//! a filterable sampled 3D texture.

use glam::{UVec2, UVec3};
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use crate::collector::{VOLUME_BOUNDS_BUFFER_SIZE, VOLUME_DATA_BUFFER_SIZE};
use crate::commands::{BindingSlot, Command, DispatchGrid, ResourceId};
use crate::error::VolumetricsError;
use crate::history::{HistoryAllocator, Texture3DHandle, VolumeTextureDesc, VolumeTextureFormat};
use crate::kernel::{KernelId, LightingKernel};
use crate::preset::VolumetricPreset;
use crate::uniforms::{ShaderVariablesGlobalVolumetrics, ShaderVariablesVolumetric};

/// Format of every V-Buffer texture.
pub const VOLUME_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Binding of the per-dispatch [`ShaderVariablesVolumetric`] block in every family.
pub const UNIFORM_BINDING: u32 = 0;

/// Entry point shared by all lighting variants, specialized through override constants.
pub const LIGHTING_ENTRY_POINT: &str = "volumetric_lighting";

const LIGHT_LIST_PLACEHOLDER_SIZE: u64 = 16;

const TEXTURE_SLOTS: [BindingSlot; 5] = [
    BindingSlot::VBufferDensity,
    BindingSlot::VBufferLightingIntegral,
    BindingSlot::VBufferLightingHistory,
    BindingSlot::VBufferLightingFeedback,
    BindingSlot::VolumeMaskAtlas,
];

const BUFFER_SLOTS: [BindingSlot; 3] = [
    BindingSlot::VolumeBounds,
    BindingSlot::VolumeData,
    BindingSlot::BigTileLightList,
];

/// Kernels sharing one bind-group layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelFamily {
    Voxelization,
    Lighting,
    Filter,
}

impl KernelFamily {
    pub const ALL: [Self; 3] = [Self::Voxelization, Self::Lighting, Self::Filter];

    pub fn of(kernel: KernelId) -> Self {
        match kernel {
            KernelId::Voxelization(_) => Self::Voxelization,
            KernelId::Lighting(_) => Self::Lighting,
            KernelId::Filter(_) => Self::Filter,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Voxelization => 0,
            Self::Lighting => 1,
            Self::Filter => 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Voxelization => "volume_voxelization",
            Self::Lighting => "volumetric_lighting",
            Self::Filter => "volumetric_lighting_filter",
        }
    }
}

/// Binding index of `slot` in `family`'s bind group, `None` if the family does not read it.
pub fn binding_index(family: KernelFamily, slot: BindingSlot) -> Option<u32> {
    use BindingSlot as S;
    use KernelFamily as F;

    match (family, slot) {
        (F::Voxelization, S::VolumeBounds) => Some(1),
        (F::Voxelization, S::VolumeData) => Some(2),
        (F::Voxelization, S::VolumeMaskAtlas) => Some(3),
        (F::Voxelization, S::VBufferDensity) => Some(5),
        (F::Voxelization, S::BigTileLightList) => Some(6),
        (F::Lighting, S::VBufferDensity) => Some(1),
        (F::Lighting, S::VBufferLightingIntegral) => Some(2),
        (F::Lighting, S::VBufferLightingHistory) => Some(3),
        (F::Lighting, S::VBufferLightingFeedback) => Some(4),
        (F::Lighting, S::BigTileLightList) => Some(6),
        (F::Filter, S::VBufferLightingFeedback) => Some(1),
        (F::Filter, S::VBufferLightingIntegral) => Some(2),
        _ => None,
    }
}

pub fn sampler_binding(family: KernelFamily) -> Option<u32> {
    match family {
        KernelFamily::Voxelization => Some(4),
        KernelFamily::Lighting => Some(5),
        KernelFamily::Filter => None,
    }
}

/// Whether `slot` is written by `family`'s kernels.
pub fn is_storage_slot(family: KernelFamily, slot: BindingSlot) -> bool {
    matches!(
        (family, slot),
        (KernelFamily::Voxelization, BindingSlot::VBufferDensity)
            | (_, BindingSlot::VBufferLightingIntegral)
            | (KernelFamily::Lighting, BindingSlot::VBufferLightingFeedback)
    )
}

/// Bind-group layout entries of `family`, ordered by binding.
pub fn layout_entries(family: KernelFamily) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: UNIFORM_BINDING,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<ShaderVariablesVolumetric>() as u64),
        },
        count: None,
    }];

    for slot in BUFFER_SLOTS {
        if let Some(binding) = binding_index(family, slot) {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
    }

    for slot in TEXTURE_SLOTS {
        let Some(binding) = binding_index(family, slot) else {
            continue;
        };
        let ty = if is_storage_slot(family, slot) {
            wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: VOLUME_TEXTURE_FORMAT,
                view_dimension: wgpu::TextureViewDimension::D3,
            }
        } else {
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D3,
                multisampled: false,
            }
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        });
    }

    if let Some(binding) = sampler_binding(family) {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }

    entries.sort_by_key(|entry| entry.binding);
    entries
}

/// Shader entry point of `kernel`.
pub fn entry_point(kernel: KernelId) -> &'static str {
    match kernel {
        KernelId::Voxelization(k) => k.entry_point(),
        KernelId::Lighting(_) => LIGHTING_ENTRY_POINT,
        KernelId::Filter(k) => k.entry_point(),
    }
}

/// Pipeline-overridable constants selecting a lighting variant.
pub fn lighting_override_constants(kernel: LightingKernel) -> [(&'static str, f64); 4] {
    let flag = |enabled: bool| if enabled { 1.0 } else { 0.0 };
    [
        ("TILED_LIGHTING", flag(kernel.tiled_lighting)),
        ("ENABLE_REPROJECTION", flag(kernel.reprojection)),
        ("ENABLE_ANISOTROPY", flag(kernel.anisotropy)),
        ("HIGH_QUALITY", flag(kernel.high_quality)),
    ]
}

fn texture_format(format: VolumeTextureFormat) -> wgpu::TextureFormat {
    match format {
        VolumeTextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

struct VolumeTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

fn create_volume_texture(
    device: &wgpu::Device,
    label: &str,
    size: UVec3,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> VolumeTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.x.max(1),
            height: size.y.max(1),
            depth_or_array_layers: size.z.max(1),
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(wgpu::TextureViewDimension::D3),
        ..Default::default()
    });
    VolumeTexture { texture, view }
}

fn shared_volume_usage() -> wgpu::TextureUsages {
    wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING
}

fn check_volume_size(size: UVec3, limit: u32) -> Result<(), VolumetricsError> {
    if size.max_element() > limit {
        return Err(VolumetricsError::VBufferTooLarge {
            width: size.x,
            height: size.y,
            depth: size.z,
            limit,
        });
    }
    Ok(())
}

/// GPU resources shared by every camera: the density and lighting textures,
/// the visible-volume buffers, the global constants and the neutral fallbacks.
pub struct GpuVolumetricResources {
    preset: VolumetricPreset,
    size: UVec3,
    density: VolumeTexture,
    lighting: VolumeTexture,
    black_volume: VolumeTexture,
    // Write target for storage slots with nothing bound.
    scratch_volume: VolumeTexture,
    volume_bounds: wgpu::Buffer,
    volume_data: wgpu::Buffer,
    light_list_placeholder: wgpu::Buffer,
    light_list: Option<wgpu::Buffer>,
    volume_atlas: Option<wgpu::TextureView>,
    global_uniforms: wgpu::Buffer,
    sampler: wgpu::Sampler,
    layouts: [wgpu::BindGroupLayout; 3],
    pipeline_layouts: [wgpu::PipelineLayout; 3],
}

impl GpuVolumetricResources {
    /// Allocate the shared V-Buffer for screens up to `max_screen`.
    pub fn new(
        device: &wgpu::Device,
        preset: VolumetricPreset,
        max_screen: UVec2,
    ) -> Result<Self, VolumetricsError> {
        if preset == VolumetricPreset::Off {
            return Err(VolumetricsError::EmptyPreset(preset));
        }
        if max_screen.x == 0 || max_screen.y == 0 {
            return Err(VolumetricsError::InvalidScreenSize {
                width: max_screen.x,
                height: max_screen.y,
            });
        }
        let size = preset.resolution(max_screen.x, max_screen.y);
        check_volume_size(size, device.limits().max_texture_dimension_3d)?;

        let density = create_volume_texture(
            device,
            "VBufferDensity",
            size,
            VOLUME_TEXTURE_FORMAT,
            shared_volume_usage(),
        );
        let lighting = create_volume_texture(
            device,
            "VBufferLighting",
            size,
            VOLUME_TEXTURE_FORMAT,
            shared_volume_usage(),
        );
        let black_volume = create_volume_texture(
            device,
            "BlackVolume",
            UVec3::ONE,
            VOLUME_TEXTURE_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let scratch_volume = create_volume_texture(
            device,
            "VBufferScratch",
            UVec3::ONE,
            VOLUME_TEXTURE_FORMAT,
            wgpu::TextureUsages::STORAGE_BINDING,
        );

        let storage_usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let volume_bounds = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VisibleVolumeBounds"),
            size: VOLUME_BOUNDS_BUFFER_SIZE,
            usage: storage_usage,
            mapped_at_creation: false,
        });
        let volume_data = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VisibleVolumeData"),
            size: VOLUME_DATA_BUFFER_SIZE,
            usage: storage_usage,
            mapped_at_creation: false,
        });
        let light_list_placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("BigTileLightListPlaceholder"),
            size: LIGHT_LIST_PLACEHOLDER_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let global_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ShaderVariablesGlobalVolumetrics"),
            size: std::mem::size_of::<ShaderVariablesGlobalVolumetrics>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("vbuffer-linear-clamp"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let layouts = KernelFamily::ALL.map(|family| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(family.label()),
                entries: &layout_entries(family),
            })
        });
        let pipeline_layouts = KernelFamily::ALL.map(|family| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(family.label()),
                bind_group_layouts: &[&layouts[family.index()]],
                immediate_size: 0,
            })
        });

        tracing::info!(?preset, ?size, "volumetric GPU resources created");

        Ok(Self {
            preset,
            size,
            density,
            lighting,
            black_volume,
            scratch_volume,
            volume_bounds,
            volume_data,
            light_list_placeholder,
            light_list: None,
            volume_atlas: None,
            global_uniforms,
            sampler,
            layouts,
            pipeline_layouts,
        })
    }

    /// Grow the shared textures to cover `screen`. Returns whether they were recreated.
    ///
    /// Recreated textures start out black.
    pub fn ensure_screen_size(
        &mut self,
        device: &wgpu::Device,
        screen: UVec2,
    ) -> Result<bool, VolumetricsError> {
        if screen.x == 0 || screen.y == 0 {
            return Err(VolumetricsError::InvalidScreenSize {
                width: screen.x,
                height: screen.y,
            });
        }
        let required = self.preset.resolution(screen.x, screen.y);
        if required.cmple(self.size).all() {
            return Ok(false);
        }
        let grown = self.size.max(required);
        check_volume_size(grown, device.limits().max_texture_dimension_3d)?;

        tracing::debug!(size = ?grown, "growing shared V-Buffer");
        self.density = create_volume_texture(device, "VBufferDensity", grown, VOLUME_TEXTURE_FORMAT, shared_volume_usage());
        self.lighting = create_volume_texture(device, "VBufferLighting", grown, VOLUME_TEXTURE_FORMAT, shared_volume_usage());
        self.size = grown;
        Ok(true)
    }

    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn global_uniforms(&self) -> &wgpu::Buffer {
        &self.global_uniforms
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Mask atlas sampled by voxelization. `None` binds the black volume.
    pub fn set_volume_atlas(&mut self, atlas: Option<wgpu::TextureView>) {
        self.volume_atlas = atlas;
    }

    /// Light list produced by the big-tile prepass.
    pub fn set_big_tile_light_list(&mut self, light_list: Option<wgpu::Buffer>) {
        self.light_list = light_list;
    }

    pub fn bind_group_layout(&self, family: KernelFamily) -> &wgpu::BindGroupLayout {
        &self.layouts[family.index()]
    }

    pub fn pipeline_layout(&self, family: KernelFamily) -> &wgpu::PipelineLayout {
        &self.pipeline_layouts[family.index()]
    }

    /// View of a texture resource. Missing resources fall back to the black
    /// volume, or to the scratch volume when written through a storage binding.
    pub fn texture_view<'a>(
        &'a self,
        texture: ResourceId,
        history: &'a WgpuHistoryAllocator,
        storage: bool,
    ) -> &'a wgpu::TextureView {
        let fallback = if storage {
            &self.scratch_volume.view
        } else {
            &self.black_volume.view
        };
        match texture {
            ResourceId::DensityBuffer => &self.density.view,
            ResourceId::LightingBuffer => &self.lighting.view,
            ResourceId::BlackVolume if !storage => &self.black_volume.view,
            ResourceId::VolumeMaskAtlas if !storage => self.volume_atlas.as_ref().unwrap_or(fallback),
            ResourceId::History(handle) => history.view(handle).unwrap_or(fallback),
            _ => fallback,
        }
    }

    /// Buffer resource, `None` for textures.
    pub fn buffer(&self, buffer: ResourceId) -> Option<&wgpu::Buffer> {
        match buffer {
            ResourceId::VolumeBounds => Some(&self.volume_bounds),
            ResourceId::VolumeData => Some(&self.volume_data),
            ResourceId::BigTileLightList => Some(self.light_list.as_ref().unwrap_or(&self.light_list_placeholder)),
            _ => None,
        }
    }
}

/// [`HistoryAllocator`] backed by real `wgpu` 3D textures.
pub struct WgpuHistoryAllocator {
    device: wgpu::Device,
    textures: FxHashMap<Texture3DHandle, VolumeTexture>,
    next_handle: u32,
}

impl WgpuHistoryAllocator {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            device: device.clone(),
            textures: FxHashMap::default(),
            next_handle: 0,
        }
    }

    pub fn view(&self, handle: Texture3DHandle) -> Option<&wgpu::TextureView> {
        self.textures.get(&handle).map(|texture| &texture.view)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

impl HistoryAllocator for WgpuHistoryAllocator {
    fn allocate(&mut self, _slot: usize, desc: &VolumeTextureDesc) -> Option<Texture3DHandle> {
        let limit = self.device.limits().max_texture_dimension_3d;
        if desc.size.min_element() == 0 || desc.size.max_element() > limit {
            tracing::warn!(label = %desc.label, size = ?desc.size, limit, "cannot allocate history texture");
            return None;
        }

        let texture = create_volume_texture(
            &self.device,
            &desc.label,
            desc.size,
            texture_format(desc.format),
            shared_volume_usage(),
        );
        let handle = Texture3DHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.textures.insert(handle, texture);
        Some(handle)
    }

    fn release(&mut self, handle: Texture3DHandle) {
        if let Some(texture) = self.textures.remove(&handle) {
            texture.texture.destroy();
        }
    }
}

/// Source of compiled kernels.
pub trait KernelPipelines {
    fn pipeline(&self, kernel: KernelId) -> Option<&wgpu::ComputePipeline>;
}

/// Every kernel variant compiled from one shader module.
pub struct VolumetricKernelPipelines {
    pipelines: FxHashMap<KernelId, wgpu::ComputePipeline>,
}

impl VolumetricKernelPipelines {
    /// Compile all variants from `module`, which must export the entry points
    /// returned by [`entry_point`] and declare the lighting override constants.
    pub fn new(device: &wgpu::Device, resources: &GpuVolumetricResources, module: &wgpu::ShaderModule) -> Self {
        let mut pipelines = FxHashMap::default();
        for kernel in KernelId::all() {
            let label = kernel.to_string();
            let constants = match kernel {
                KernelId::Lighting(lighting) => lighting_override_constants(lighting).to_vec(),
                _ => Vec::new(),
            };
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label.as_str()),
                layout: Some(resources.pipeline_layout(KernelFamily::of(kernel))),
                module,
                entry_point: Some(entry_point(kernel)),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    ..Default::default()
                },
                cache: None,
            });
            pipelines.insert(kernel, pipeline);
        }
        tracing::debug!(count = pipelines.len(), "volumetric kernels compiled");
        Self { pipelines }
    }
}

impl KernelPipelines for VolumetricKernelPipelines {
    fn pipeline(&self, kernel: KernelId) -> Option<&wgpu::ComputePipeline> {
        self.pipelines.get(&kernel)
    }
}

/// Outcome of replaying one command stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub dispatches: u32,
    pub skipped_dispatches: u32,
    pub uploads: u32,
    /// Lighting texture last bound for shading, if any.
    pub shading_texture: Option<ResourceId>,
}

#[derive(Default)]
struct KernelBindings {
    resources: FxHashMap<BindingSlot, ResourceId>,
    constants: Option<wgpu::Buffer>,
}

/// Replay `commands` into `encoder`. Every dispatch gets its own compute pass,
/// so issue order is the only synchronization needed.
pub fn encode_commands(
    device: &wgpu::Device,
    encoder: &mut wgpu::CommandEncoder,
    commands: &[Command],
    resources: &GpuVolumetricResources,
    history: &WgpuHistoryAllocator,
    pipelines: &dyn KernelPipelines,
) -> EncodeStats {
    let mut stats = EncodeStats::default();
    let mut bindings: FxHashMap<KernelId, KernelBindings> = FxHashMap::default();

    for command in commands {
        match command {
            Command::UploadBuffer { target, data } => {
                if upload(device, encoder, resources, *target, data) {
                    stats.uploads += 1;
                }
            }
            Command::BindBuffer { kernel, slot, buffer: resource }
            | Command::BindTexture { kernel, slot, texture: resource } => {
                bindings.entry(*kernel).or_default().resources.insert(*slot, *resource);
            }
            Command::PushConstants { kernel, constants } => {
                let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("ShaderVariablesVolumetric"),
                    contents: constants.as_bytes(),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                bindings.entry(*kernel).or_default().constants = Some(buffer);
            }
            Command::Dispatch { kernel, grid } => {
                let state = bindings.entry(*kernel).or_default();
                if dispatch(device, encoder, resources, history, pipelines, *kernel, *grid, state) {
                    stats.dispatches += 1;
                } else {
                    stats.skipped_dispatches += 1;
                }
            }
            Command::SetGlobalTexture { texture, .. } => stats.shading_texture = Some(*texture),
            Command::SetGlobalConstants(constants) => {
                let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("global-volumetrics-staging"),
                    contents: bytemuck::bytes_of(constants),
                    usage: wgpu::BufferUsages::COPY_SRC,
                });
                encoder.copy_buffer_to_buffer(
                    &staging,
                    0,
                    &resources.global_uniforms,
                    0,
                    std::mem::size_of::<ShaderVariablesGlobalVolumetrics>() as u64,
                );
            }
            Command::BeginScope(name) => encoder.push_debug_group(name),
            Command::EndScope => encoder.pop_debug_group(),
        }
    }

    stats
}

fn upload(
    device: &wgpu::Device,
    encoder: &mut wgpu::CommandEncoder,
    resources: &GpuVolumetricResources,
    target: ResourceId,
    data: &[u8],
) -> bool {
    if data.is_empty() {
        return false;
    }
    let Some(buffer) = resources.buffer(target) else {
        tracing::warn!(?target, "upload to a non-buffer resource ignored");
        return false;
    };
    let size = data.len() as u64;
    if size > buffer.size() {
        tracing::warn!(?target, size, capacity = buffer.size(), "upload larger than buffer ignored");
        return false;
    }

    let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("volumetric-upload-staging"),
        contents: data,
        usage: wgpu::BufferUsages::COPY_SRC,
    });
    encoder.copy_buffer_to_buffer(&staging, 0, buffer, 0, size);
    true
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    device: &wgpu::Device,
    encoder: &mut wgpu::CommandEncoder,
    resources: &GpuVolumetricResources,
    history: &WgpuHistoryAllocator,
    pipelines: &dyn KernelPipelines,
    kernel: KernelId,
    grid: DispatchGrid,
    state: &KernelBindings,
) -> bool {
    if grid.is_empty() {
        return false;
    }
    let Some(pipeline) = pipelines.pipeline(kernel) else {
        tracing::warn!(%kernel, "kernel pipeline unavailable, dispatch skipped");
        return false;
    };
    let Some(constants) = state.constants.as_ref() else {
        tracing::warn!(%kernel, "no constants pushed, dispatch skipped");
        return false;
    };

    let family = KernelFamily::of(kernel);
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: UNIFORM_BINDING,
        resource: constants.as_entire_binding(),
    }];
    for slot in BUFFER_SLOTS {
        let Some(binding) = binding_index(family, slot) else {
            continue;
        };
        let bound = state.resources.get(&slot).copied().unwrap_or(match slot {
            BindingSlot::VolumeBounds => ResourceId::VolumeBounds,
            BindingSlot::VolumeData => ResourceId::VolumeData,
            _ => ResourceId::BigTileLightList,
        });
        let buffer = resources
            .buffer(bound)
            .unwrap_or(&resources.light_list_placeholder);
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
    }
    for slot in TEXTURE_SLOTS {
        let Some(binding) = binding_index(family, slot) else {
            continue;
        };
        let storage = is_storage_slot(family, slot);
        let view = match state.resources.get(&slot) {
            Some(texture) => resources.texture_view(*texture, history, storage),
            None if storage => &resources.scratch_volume.view,
            None => &resources.black_volume.view,
        };
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        });
    }
    if let Some(binding) = sampler_binding(family) {
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::Sampler(&resources.sampler),
        });
    }

    let label = kernel.to_string();
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label.as_str()),
        layout: resources.bind_group_layout(family),
        entries: &entries,
    });

    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label.as_str()),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, &bind_group, &[]);
    pass.dispatch_workgroups(grid.x, grid.y, grid.z);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandList;
    use crate::density_volume::{DensityVolume, DensityVolumeManager, DensityVolumeParameters};
    use crate::history::CameraId;
    use crate::pipeline::{CameraView, FogSettings, FrameInfo, LightCullingInfo, VolumetricPipeline, VolumetricSettings};
    use crate::spherical_harmonics::SphericalHarmonicsL2;
    use glam::{Mat4, Quat, Vec3};
    use rustc_hash::FxHashSet;

    // Empty kernels exporting every entry point and lighting override.
    const STUB_KERNELS: &str = r#"
override TILED_LIGHTING: bool = false;
override ENABLE_REPROJECTION: bool = false;
override ENABLE_ANISOTROPY: bool = false;
override HIGH_QUALITY: bool = false;

@compute @workgroup_size(8, 8, 1) fn voxelize() {}
@compute @workgroup_size(8, 8, 1) fn voxelize_tiled() {}
@compute @workgroup_size(8, 8, 1) fn voxelize_hq() {}
@compute @workgroup_size(8, 8, 1) fn voxelize_tiled_hq() {}

@compute @workgroup_size(8, 8, 1)
fn volumetric_lighting() {
    _ = TILED_LIGHTING;
    _ = ENABLE_REPROJECTION;
    _ = ENABLE_ANISOTROPY;
    _ = HIGH_QUALITY;
}

@compute @workgroup_size(8, 8, 1) fn filter_volumetric_lighting_x() {}
@compute @workgroup_size(8, 8, 1) fn filter_volumetric_lighting_y() {}
"#;

    fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok()?;
            adapter
                .request_device(&wgpu::DeviceDescriptor::default())
                .await
                .ok()
        })
    }

    struct NoKernels;

    impl KernelPipelines for NoKernels {
        fn pipeline(&self, _kernel: KernelId) -> Option<&wgpu::ComputePipeline> {
            None
        }
    }

    fn camera(filter: bool) -> CameraView {
        let fov = 60.0_f32.to_radians();
        CameraView {
            id: CameraId(1),
            name: "GpuCamera".into(),
            position: Vec3::ZERO,
            views: vec![Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)],
            projection: Mat4::perspective_rh(fov, 16.0 / 9.0, 0.1, 1000.0),
            screen_size: UVec2::new(1920, 1080),
            near: 0.1,
            far: 1000.0,
            vertical_fov: fov,
            fog: FogSettings {
                filter,
                ..FogSettings::default()
            },
            ambient_probe: SphericalHarmonicsL2::ambient([0.5, 0.5, 0.5]),
        }
    }

    fn scene() -> DensityVolumeManager {
        let mut volumes = DensityVolumeManager::new();
        for i in 0..3 {
            volumes.add(DensityVolume::new(
                Vec3::new(i as f32 * 2.0, 0.0, -20.0),
                Quat::IDENTITY,
                DensityVolumeParameters::new(Vec3::splat(0.8), 8.0, Vec3::ONE),
            ));
        }
        volumes
    }

    fn record_frame(
        pipeline: &mut VolumetricPipeline,
        camera: &CameraView,
        frame_index: u64,
        volumes: &mut DensityVolumeManager,
        history: &mut WgpuHistoryAllocator,
    ) -> CommandList {
        let mut list = CommandList::new();
        pipeline.render_camera(
            camera,
            &FrameInfo {
                frame_index,
                time: 0.0,
            },
            volumes,
            None,
            &LightCullingInfo::default(),
            history,
            &mut list,
        );
        list
    }

    #[test]
    fn test_resources_cover_screen_and_grow() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut resources =
            GpuVolumetricResources::new(&device, VolumetricPreset::Medium, UVec2::new(1920, 1080)).unwrap();
        assert_eq!(resources.size(), UVec3::new(240, 135, 64));
        assert_eq!(resources.global_uniforms().size(), 80);

        assert!(!resources.ensure_screen_size(&device, UVec2::new(1280, 720)).unwrap());
        assert_eq!(resources.size(), UVec3::new(240, 135, 64));

        assert!(resources.ensure_screen_size(&device, UVec2::new(2560, 1000)).unwrap());
        // grows per axis, never shrinks
        assert_eq!(resources.size(), UVec3::new(320, 135, 64));
    }

    #[test]
    fn test_resources_refuse_oversized_volume() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let limit = device.limits().max_texture_dimension_3d;
        let too_wide = UVec2::new((limit + 1) * 8, 1080);

        let err = GpuVolumetricResources::new(&device, VolumetricPreset::Medium, too_wide).err();
        assert!(matches!(err, Some(VolumetricsError::VBufferTooLarge { .. })), "{err:?}");
        assert!(GpuVolumetricResources::new(&device, VolumetricPreset::Off, UVec2::new(1920, 1080)).is_err());

        let mut resources =
            GpuVolumetricResources::new(&device, VolumetricPreset::Medium, UVec2::new(1920, 1080)).unwrap();
        assert!(resources.ensure_screen_size(&device, too_wide).is_err());
        assert_eq!(resources.size(), UVec3::new(240, 135, 64));
    }

    #[test]
    fn test_unbound_slots_fall_back() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let resources =
            GpuVolumetricResources::new(&device, VolumetricPreset::Medium, UVec2::new(640, 480)).unwrap();
        let history = WgpuHistoryAllocator::new(&device);
        let missing = ResourceId::History(Texture3DHandle(99));

        assert!(std::ptr::eq(
            resources.texture_view(missing, &history, false),
            &resources.black_volume.view
        ));
        assert!(std::ptr::eq(
            resources.texture_view(missing, &history, true),
            &resources.scratch_volume.view
        ));
        assert!(std::ptr::eq(
            resources.texture_view(ResourceId::VolumeMaskAtlas, &history, false),
            &resources.black_volume.view
        ));
        assert!(std::ptr::eq(
            resources.texture_view(ResourceId::BlackVolume, &history, true),
            &resources.scratch_volume.view
        ));
        assert!(std::ptr::eq(
            resources.buffer(ResourceId::BigTileLightList).unwrap(),
            &resources.light_list_placeholder
        ));
        assert!(resources.buffer(ResourceId::DensityBuffer).is_none());
    }

    #[test]
    fn test_history_allocator_tracks_textures() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut history = WgpuHistoryAllocator::new(&device);
        let size = UVec3::new(240, 135, 64);

        let first = history.allocate(0, &VolumeTextureDesc::history("Cam", 0, size)).unwrap();
        let second = history.allocate(1, &VolumeTextureDesc::history("Cam", 1, size)).unwrap();
        assert_ne!(first, second);
        assert_eq!(history.len(), 2);
        assert!(history.view(first).is_some());

        history.release(first);
        assert_eq!(history.len(), 1);
        assert!(history.view(first).is_none());
        // releasing twice is harmless
        history.release(first);
        assert_eq!(history.len(), 1);

        let limit = device.limits().max_texture_dimension_3d;
        let oversized = VolumeTextureDesc::history("Cam", 0, UVec3::new(limit + 1, 1, 1));
        assert!(history.allocate(0, &oversized).is_none());
        assert!(history.allocate(0, &VolumeTextureDesc::history("Cam", 0, UVec3::ZERO)).is_none());
        assert_eq!(history.len(), 1);

        history.release(second);
        assert!(history.is_empty());
    }

    #[test]
    fn test_pipeline_history_lives_in_allocator() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut pipeline = VolumetricPipeline::new(&VolumetricSettings::default()).unwrap();
        let mut history = WgpuHistoryAllocator::new(&device);
        let mut volumes = scene();
        let cam = camera(false);

        record_frame(&mut pipeline, &cam, 0, &mut volumes, &mut history);
        record_frame(&mut pipeline, &cam, 1, &mut volumes, &mut history);
        assert_eq!(history.len(), 2);

        pipeline.remove_camera(cam.id, &mut history);
        assert!(history.is_empty());
    }

    #[test]
    fn test_replay_skips_missing_kernels() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let mut pipeline = VolumetricPipeline::new(&VolumetricSettings::default()).unwrap();
        let resources =
            GpuVolumetricResources::new(&device, VolumetricPreset::Medium, UVec2::new(1920, 1080)).unwrap();
        let mut history = WgpuHistoryAllocator::new(&device);
        let mut volumes = scene();

        let list = record_frame(&mut pipeline, &camera(false), 0, &mut volumes, &mut history);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        let stats = encode_commands(&device, &mut encoder, list.commands(), &resources, &history, &NoKernels);
        queue.submit([encoder.finish()]);

        assert_eq!(
            stats,
            EncodeStats {
                dispatches: 0,
                skipped_dispatches: 2,
                uploads: 2,
                shading_texture: Some(ResourceId::LightingBuffer),
            }
        );
    }

    #[test]
    fn test_replay_runs_one_pass_per_dispatch() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let mut pipeline = VolumetricPipeline::new(&VolumetricSettings::default()).unwrap();
        let resources =
            GpuVolumetricResources::new(&device, VolumetricPreset::Medium, UVec2::new(1920, 1080)).unwrap();
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("volumetric-stub-kernels"),
            source: wgpu::ShaderSource::Wgsl(STUB_KERNELS.into()),
        });
        let kernels = VolumetricKernelPipelines::new(&device, &resources, &module);
        for kernel in KernelId::all() {
            assert!(kernels.pipeline(kernel).is_some(), "{kernel}");
        }

        let mut history = WgpuHistoryAllocator::new(&device);
        let mut volumes = scene();
        let cam = camera(true);
        for frame_index in 0..2 {
            let list = record_frame(&mut pipeline, &cam, frame_index, &mut volumes, &mut history);
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
            let stats = encode_commands(&device, &mut encoder, list.commands(), &resources, &history, &kernels);
            queue.submit([encoder.finish()]);

            // voxelization, lighting, filter x and y
            assert_eq!(stats.dispatches, 4, "frame {frame_index}");
            assert_eq!(stats.skipped_dispatches, 0);
            assert_eq!(stats.uploads, 2);
        }
    }

    #[test]
    fn test_layout_bindings_are_unique_and_dense() {
        for family in KernelFamily::ALL {
            let bindings: Vec<u32> = layout_entries(family).iter().map(|e| e.binding).collect();
            let expected: Vec<u32> = (0..bindings.len() as u32).collect();
            assert_eq!(bindings, expected, "{family:?}");
        }
        assert_eq!(layout_entries(KernelFamily::Voxelization).len(), 7);
        assert_eq!(layout_entries(KernelFamily::Lighting).len(), 7);
        assert_eq!(layout_entries(KernelFamily::Filter).len(), 3);
    }

    #[test]
    fn test_recorded_slots_have_bindings() {
        use BindingSlot as S;
        for slot in [S::VBufferDensity, S::VolumeBounds, S::VolumeData, S::VolumeMaskAtlas, S::BigTileLightList] {
            assert!(binding_index(KernelFamily::Voxelization, slot).is_some(), "{slot:?}");
        }
        for slot in [
            S::VBufferDensity,
            S::VBufferLightingIntegral,
            S::VBufferLightingHistory,
            S::VBufferLightingFeedback,
            S::BigTileLightList,
        ] {
            assert!(binding_index(KernelFamily::Lighting, slot).is_some(), "{slot:?}");
        }
        assert_eq!(binding_index(KernelFamily::Filter, S::VBufferLightingFeedback), Some(1));
        assert_eq!(binding_index(KernelFamily::Filter, S::VBufferLightingIntegral), Some(2));
        assert_eq!(binding_index(KernelFamily::Filter, S::VolumeBounds), None);
    }

    #[test]
    fn test_storage_slots() {
        assert!(is_storage_slot(KernelFamily::Voxelization, BindingSlot::VBufferDensity));
        assert!(!is_storage_slot(KernelFamily::Lighting, BindingSlot::VBufferDensity));
        assert!(is_storage_slot(KernelFamily::Lighting, BindingSlot::VBufferLightingFeedback));
        assert!(!is_storage_slot(KernelFamily::Filter, BindingSlot::VBufferLightingFeedback));
        assert!(is_storage_slot(KernelFamily::Filter, BindingSlot::VBufferLightingIntegral));

        let storage = layout_entries(KernelFamily::Lighting)
            .iter()
            .filter(|e| matches!(e.ty, wgpu::BindingType::StorageTexture { .. }))
            .count();
        assert_eq!(storage, 2);
    }

    #[test]
    fn test_lighting_variants_share_entry_point() {
        let entry_points: FxHashSet<&str> = KernelId::all().map(entry_point).collect();
        // four voxelization, one lighting, two filter
        assert_eq!(entry_points.len(), 7);

        let constants = lighting_override_constants(LightingKernel::from_index(0b0101));
        assert_eq!(constants[0], ("TILED_LIGHTING", 1.0));
        assert_eq!(constants[1], ("ENABLE_REPROJECTION", 0.0));
        assert_eq!(constants[2], ("ENABLE_ANISOTROPY", 1.0));
        assert_eq!(constants[3], ("HIGH_QUALITY", 0.0));
    }

    #[test]
    fn test_volume_size_limit() {
        assert!(check_volume_size(UVec3::new(240, 135, 64), 2048).is_ok());
        let err = check_volume_size(UVec3::new(4096, 10, 64), 2048).unwrap_err();
        assert!(matches!(err, VolumetricsError::VBufferTooLarge { width: 4096, limit: 2048, .. }));
    }
}
