//! Whole-frame sequences through the public pipeline API.

use glam::{Mat4, Quat, UVec2, UVec3, Vec3};
use vapor_volumetrics::{
    BindingSlot, CameraId, CameraView, Command, CommandList, DensityVolume, DensityVolumeManager,
    DensityVolumeParameters, FilterKernel, FogSettings, FrameInfo, GlobalSlot, HistoryAllocator,
    KernelId, LightCullingInfo, MAX_VISIBLE_VOLUME_COUNT, ResourceId, SphericalHarmonicsL2,
    Texture3DHandle, VolumeTextureDesc, VolumetricPipeline, VolumetricPreset, VolumetricSettings,
    VoxelizationKernel,
};

#[derive(Default)]
struct FakeAllocator {
    next: u32,
    live: usize,
    refuse: bool,
    labels: Vec<String>,
}

impl HistoryAllocator for FakeAllocator {
    fn allocate(&mut self, _slot: usize, desc: &VolumeTextureDesc) -> Option<Texture3DHandle> {
        if self.refuse {
            return None;
        }
        self.next += 1;
        self.live += 1;
        self.labels.push(desc.label.clone());
        Some(Texture3DHandle(self.next))
    }

    fn release(&mut self, _handle: Texture3DHandle) {
        self.live -= 1;
    }
}

fn camera(fog: FogSettings) -> CameraView {
    let fov = 60.0_f32.to_radians();
    CameraView {
        id: CameraId(7),
        name: "MainCamera".into(),
        position: Vec3::ZERO,
        views: vec![Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)],
        projection: Mat4::perspective_rh(fov, 16.0 / 9.0, 0.1, 1000.0),
        screen_size: UVec2::new(1920, 1080),
        near: 0.1,
        far: 1000.0,
        vertical_fov: fov,
        fog,
        ambient_probe: SphericalHarmonicsL2::ambient([0.5, 0.5, 0.5]),
    }
}

fn scene(count: usize) -> DensityVolumeManager {
    let mut manager = DensityVolumeManager::new();
    for i in 0..count {
        manager.add(DensityVolume::new(
            Vec3::new(0.0, 0.0, -20.0 - i as f32 * 0.01),
            Quat::IDENTITY,
            DensityVolumeParameters::new(Vec3::splat(0.8), 8.0, Vec3::ONE),
        ));
    }
    manager
}

struct Harness {
    pipeline: VolumetricPipeline,
    allocator: FakeAllocator,
    volumes: DensityVolumeManager,
    lights: LightCullingInfo,
}

impl Harness {
    fn new(settings: VolumetricSettings) -> Self {
        Self {
            pipeline: VolumetricPipeline::new(&settings).expect("volumetrics supported"),
            allocator: FakeAllocator::default(),
            volumes: scene(3),
            lights: LightCullingInfo::default(),
        }
    }

    fn frame(&mut self, camera: &CameraView, frame_index: u64) -> (vapor_volumetrics::CameraFrameReport, CommandList) {
        let mut list = CommandList::new();
        let report = self.pipeline.render_camera(
            camera,
            &FrameInfo {
                frame_index,
                time: frame_index as f32 / 60.0,
            },
            &mut self.volumes,
            None,
            &self.lights,
            &mut self.allocator,
            &mut list,
        );
        (report, list)
    }
}

fn feedback_texture(list: &CommandList, report: &vapor_volumetrics::CameraFrameReport) -> Option<ResourceId> {
    let kernel = KernelId::Lighting(report.lighting_kernel?);
    list.binding_before(list.len(), kernel, BindingSlot::VBufferLightingFeedback)
}

#[test]
fn test_history_becomes_valid_after_first_reprojected_frame() {
    let mut harness = Harness::new(VolumetricSettings::default());
    let cam = camera(FogSettings::default());

    let (first, _) = harness.frame(&cam, 0);
    assert!(first.fog_enabled);
    assert!(!first.history_was_valid);
    assert!(first.reprojected);

    let (second, _) = harness.frame(&cam, 1);
    assert!(second.history_was_valid);
    assert!(second.reprojected);
    assert_eq!(
        harness.allocator.labels,
        vec!["MainCamera_VBufferHistory0".to_string(), "MainCamera_VBufferHistory1".to_string()]
    );
}

#[test]
fn test_disabling_fog_resets_history() {
    let mut harness = Harness::new(VolumetricSettings::default());
    let enabled = camera(FogSettings::default());
    let disabled = camera(FogSettings {
        enabled: false,
        ..FogSettings::default()
    });

    harness.frame(&enabled, 0);
    harness.frame(&enabled, 1);
    assert_eq!(harness.allocator.live, 2);

    let (off, list) = harness.frame(&disabled, 2);
    assert!(!off.fog_enabled);
    assert_eq!(list.dispatches().count(), 0);
    assert!(!harness.pipeline.history().is_initialized(CameraId(7)));
    assert_eq!(harness.allocator.live, 0);

    let (back, _) = harness.frame(&enabled, 3);
    assert!(!back.history_was_valid);
    assert!(back.reprojected);
}

#[test]
fn test_disabled_fog_binds_black_volume_for_shading() {
    let mut harness = Harness::new(VolumetricSettings::default());
    let cam = camera(FogSettings {
        volumetric: false,
        ..FogSettings::default()
    });

    let (report, list) = harness.frame(&cam, 0);
    assert!(!report.fog_enabled);
    assert_eq!(report.voxelization_kernel, None);
    assert_eq!(
        list.commands(),
        &[Command::SetGlobalTexture {
            slot: GlobalSlot::VBufferLighting,
            texture: ResourceId::BlackVolume,
        }]
    );
}

#[test]
fn test_refused_history_runs_cold_start() {
    let mut harness = Harness::new(VolumetricSettings::default());
    harness.allocator.refuse = true;
    let cam = camera(FogSettings::default());

    for frame in 0..3 {
        let (report, _) = harness.frame(&cam, frame);
        assert!(!report.reprojected, "frame {frame}");
        assert!(!report.history_was_valid, "frame {frame}");
        assert_eq!(report.lighting_kernel.map(|k| k.reprojection), Some(false));
    }
}

#[test]
fn test_history_and_feedback_swap_by_parity() {
    let mut harness = Harness::new(VolumetricSettings::default());
    let cam = camera(FogSettings::default());

    let (r0, l0) = harness.frame(&cam, 0);
    let (r1, l1) = harness.frame(&cam, 1);
    let (r2, l2) = harness.frame(&cam, 2);

    let f0 = feedback_texture(&l0, &r0);
    let f1 = feedback_texture(&l1, &r1);
    let f2 = feedback_texture(&l2, &r2);
    assert!(f0.is_some());
    assert_ne!(f0, f1);
    assert_eq!(f0, f2);

    let history1 = l1.binding_before(
        l1.len(),
        KernelId::Lighting(r1.lighting_kernel.expect("lighting ran")),
        BindingSlot::VBufferLightingHistory,
    );
    assert_eq!(history1, f0, "frame 1 reads what frame 0 wrote");
}

#[test]
fn test_pass_order_with_filter() {
    let mut harness = Harness::new(VolumetricSettings::default());
    let cam = camera(FogSettings {
        filter: true,
        ..FogSettings::default()
    });

    let (report, list) = harness.frame(&cam, 0);
    assert!(report.filtered);

    let kernels: Vec<KernelId> = list.dispatches().map(|(kernel, _)| kernel).collect();
    assert_eq!(kernels.len(), 4);
    assert!(matches!(kernels[0], KernelId::Voxelization(_)));
    assert!(matches!(kernels[1], KernelId::Lighting(_)));
    assert_eq!(kernels[2], KernelId::Filter(FilterKernel::X));
    assert_eq!(kernels[3], KernelId::Filter(FilterKernel::Y));

    let last_upload = list
        .commands()
        .iter()
        .rposition(|c| matches!(c, Command::UploadBuffer { .. }))
        .expect("visible volumes uploaded");
    let first_dispatch = list
        .commands()
        .iter()
        .position(|c| matches!(c, Command::Dispatch { .. }))
        .expect("dispatch recorded");
    assert!(last_upload < first_dispatch);
}

#[test]
fn test_without_filter_only_two_passes() {
    let mut harness = Harness::new(VolumetricSettings::default());
    let (report, list) = harness.frame(&camera(FogSettings::default()), 0);
    assert!(!report.filtered);
    assert_eq!(list.dispatches().count(), 2);
}

#[test]
fn test_kernel_selection_follows_lights_and_preset() {
    let mut harness = Harness::new(VolumetricSettings {
        increase_resolution: true,
        ..VolumetricSettings::default()
    });
    assert_eq!(harness.pipeline.preset(), VolumetricPreset::High);
    harness.lights = LightCullingInfo {
        has_lights_to_cull: true,
        big_tile_prepass: true,
    };
    let cam = camera(FogSettings {
        anisotropy: 0.6,
        ..FogSettings::default()
    });

    let (report, _) = harness.frame(&cam, 0);
    assert_eq!(report.voxelization_kernel, Some(VoxelizationKernel::TiledHighQuality));
    let lighting = report.lighting_kernel.expect("lighting ran");
    assert!(lighting.tiled_lighting);
    assert!(lighting.anisotropy);
    assert!(lighting.high_quality);
    assert_eq!(report.resolution, UVec3::new(480, 270, 128));

    harness.lights.has_lights_to_cull = false;
    let (report, _) = harness.frame(&cam, 1);
    assert_eq!(report.voxelization_kernel, Some(VoxelizationKernel::HighQuality));
    assert!(report.lighting_kernel.expect("lighting ran").tiled_lighting);
}

#[test]
fn test_medium_preset_at_1080p() {
    let mut harness = Harness::new(VolumetricSettings::default());
    let (report, list) = harness.frame(&camera(FogSettings::default()), 0);
    assert_eq!(report.resolution, UVec3::new(240, 135, 64));

    let (_, grid) = list.dispatches().next().expect("voxelization dispatched");
    assert_eq!((grid.x, grid.y, grid.z), (30, 17, 1));
}

#[test]
fn test_visible_volumes_capped_in_order() {
    let mut harness = Harness::new(VolumetricSettings::default());
    harness.volumes = scene(600);

    let (report, list) = harness.frame(&camera(FogSettings::default()), 0);
    assert_eq!(report.visible_volumes, MAX_VISIBLE_VOLUME_COUNT);

    let sizes: Vec<(ResourceId, usize)> = list
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::UploadBuffer { target, data } => Some((*target, data.len())),
            _ => None,
        })
        .collect();
    assert_eq!(
        sizes,
        vec![
            (ResourceId::VolumeBounds, MAX_VISIBLE_VOLUME_COUNT * 48),
            (ResourceId::VolumeData, MAX_VISIBLE_VOLUME_COUNT * 80),
        ]
    );
}

#[test]
fn test_stereo_splits_slices_and_dispatches_per_view() {
    let mut harness = Harness::new(VolumetricSettings::default());
    let mut cam = camera(FogSettings::default());
    cam.views = vec![
        Mat4::look_to_rh(Vec3::new(-0.03, 0.0, 0.0), Vec3::NEG_Z, Vec3::Y),
        Mat4::look_to_rh(Vec3::new(0.03, 0.0, 0.0), Vec3::NEG_Z, Vec3::Y),
    ];

    let (_, list) = harness.frame(&cam, 0);
    let globals = list
        .commands()
        .iter()
        .find_map(|c| match c {
            Command::SetGlobalConstants(globals) => Some(*globals),
            _ => None,
        })
        .expect("global constants set");
    assert_eq!(globals.slice_count, 32);
    assert_eq!(globals.rcp_instanced_view_count, 0.5);
    assert!(list.dispatches().all(|(_, grid)| grid.z == 2));
}

#[test]
fn test_removed_camera_releases_history() {
    let mut harness = Harness::new(VolumetricSettings::default());
    harness.frame(&camera(FogSettings::default()), 0);
    assert_eq!(harness.allocator.live, 2);

    harness.pipeline.remove_camera(CameraId(7), &mut harness.allocator);
    assert_eq!(harness.allocator.live, 0);
    assert!(harness.pipeline.history().is_empty());
}

#[test]
fn test_camera_relative_culling_far_from_origin() {
    let offset = Vec3::new(50_000.0, 0.0, 0.0);
    for camera_relative_rendering in [false, true] {
        let mut harness = Harness::new(VolumetricSettings {
            camera_relative_rendering,
            ..VolumetricSettings::default()
        });
        harness.volumes = DensityVolumeManager::new();
        harness.volumes.add(DensityVolume::new(
            offset + Vec3::new(0.0, 0.0, -20.0),
            Quat::IDENTITY,
            DensityVolumeParameters::default(),
        ));

        let mut cam = camera(FogSettings::default());
        cam.position = offset;
        cam.views = vec![Mat4::look_to_rh(offset, Vec3::NEG_Z, Vec3::Y)];

        let (report, _) = harness.frame(&cam, 0);
        assert_eq!(report.visible_volumes, 1, "camera relative {camera_relative_rendering}");
    }
}
