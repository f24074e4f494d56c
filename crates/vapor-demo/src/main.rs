//! Headless volumetric fog driver.
//!
//! Builds a seeded random scene of density volumes, records a number of frames
//! for one or more cameras through the volumetric pipeline and logs what each
//! frame dispatched.

use std::path::PathBuf;

use clap::Parser;
use glam::{Mat4, Quat, UVec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use vapor_config::{CliArgs, Config, FogConfig, default_config_dir};
use vapor_volumetrics::{
    CameraId, CameraView, Command, CommandList, DensityVolume, DensityVolumeManager,
    DensityVolumeParameters, FogSettings, FrameInfo, HistoryAllocator, LightCullingInfo,
    SphericalHarmonicsL2, Texture3DHandle, VolumeAtlasInfo, VolumeTextureDesc, VolumetricPipeline,
    VolumetricSettings,
};

/// Bytes per texel of an `Rgba16Float` history texture.
const HISTORY_TEXEL_BYTES: u64 = 8;

/// Stands in for GPU texture allocation and tracks what would be resident.
#[derive(Default)]
struct TrackingAllocator {
    next: u32,
    resident: Vec<(Texture3DHandle, u64)>,
}

impl TrackingAllocator {
    fn resident_bytes(&self) -> u64 {
        self.resident.iter().map(|(_, bytes)| bytes).sum()
    }
}

impl HistoryAllocator for TrackingAllocator {
    fn allocate(&mut self, _slot: usize, desc: &VolumeTextureDesc) -> Option<Texture3DHandle> {
        let texels = u64::from(desc.size.x) * u64::from(desc.size.y) * u64::from(desc.size.z);
        self.next += 1;
        let handle = Texture3DHandle(self.next);
        self.resident.push((handle, texels * HISTORY_TEXEL_BYTES));
        tracing::debug!(label = %desc.label, size = ?desc.size, "allocated history texture");
        Some(handle)
    }

    fn release(&mut self, handle: Texture3DHandle) {
        self.resident.retain(|(h, _)| *h != handle);
    }
}

fn fog_settings(fog: &FogConfig) -> FogSettings {
    FogSettings {
        enabled: fog.enabled,
        volumetric: fog.volumetric,
        depth_extent: fog.depth_extent,
        slice_distribution_uniformity: fog.slice_distribution_uniformity,
        anisotropy: fog.anisotropy,
        global_light_probe_dimmer: fog.global_light_probe_dimmer,
        filter: fog.filter,
        reprojection: fog.reprojection,
    }
}

fn random_scene(rng: &mut Xoshiro256StarStar, count: u32) -> DensityVolumeManager {
    let mut manager = DensityVolumeManager::new();
    for _ in 0..count {
        let position = Vec3::new(
            rng.gen_range(-120.0..120.0),
            rng.gen_range(-5.0..40.0),
            rng.gen_range(-250.0..60.0),
        );
        let rotation = Quat::from_rotation_y(rng.gen_range(0.0..std::f32::consts::TAU));
        let size = Vec3::new(
            rng.gen_range(2.0..30.0),
            rng.gen_range(2.0..15.0),
            rng.gen_range(2.0..30.0),
        );
        let albedo = Vec3::new(rng.gen_range(0.6..1.0), rng.gen_range(0.6..1.0), rng.gen_range(0.6..1.0));

        let mut parameters = DensityVolumeParameters::new(albedo, rng.gen_range(5.0..80.0), size);
        if rng.gen_bool(0.25) {
            parameters.texture_index = rng.gen_range(0..4);
            parameters.texture_scroll_speed = Vec3::new(rng.gen_range(-0.2..0.2), 0.0, rng.gen_range(-0.2..0.2));
        }
        parameters.distance_fade_start = 150.0;
        parameters.distance_fade_end = 250.0;

        manager.add(DensityVolume::new(position, rotation, parameters));
    }
    manager
}

fn camera(index: u32, config: &Config, time: f32) -> CameraView {
    let vertical_fov = 60.0_f32.to_radians();
    let aspect = config.demo.width as f32 / config.demo.height.max(1) as f32;
    let near = 0.1;
    let far = 1000.0;

    let position = Vec3::new(index as f32 * 15.0, 2.0, 0.0);
    let yaw = 0.2 * (time * 0.5 + index as f32).sin();
    let forward = Quat::from_rotation_y(yaw) * Vec3::NEG_Z;

    CameraView {
        id: CameraId(index),
        name: format!("Camera{index}"),
        position,
        views: vec![Mat4::look_to_rh(position, forward, Vec3::Y)],
        projection: Mat4::perspective_rh(vertical_fov, aspect, near, far),
        screen_size: UVec2::new(config.demo.width, config.demo.height),
        near,
        far,
        vertical_fov,
        fog: fog_settings(&config.fog),
        ambient_probe: SphericalHarmonicsL2::ambient([0.30, 0.35, 0.45]),
    }
}

fn uploaded_bytes(list: &CommandList) -> usize {
    list.commands()
        .iter()
        .map(|command| match command {
            Command::UploadBuffer { data, .. } => data.len(),
            _ => 0,
        })
        .sum()
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    vapor_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let settings = VolumetricSettings {
        support_volumetrics: config.volumetrics.support_volumetrics,
        increase_resolution: config.volumetrics.increase_resolution,
        camera_relative_rendering: config.volumetrics.camera_relative_rendering,
    };
    let Some(mut pipeline) = VolumetricPipeline::new(&settings) else {
        tracing::info!("volumetrics disabled in config, nothing to record");
        return;
    };

    let mut rng = Xoshiro256StarStar::seed_from_u64(config.demo.seed);
    let mut volumes = random_scene(&mut rng, config.demo.volumes);
    let atlas = VolumeAtlasInfo { width: 128, depth: 32 };
    let lights = LightCullingInfo {
        has_lights_to_cull: true,
        big_tile_prepass: true,
    };
    let mut allocator = TrackingAllocator::default();
    let mut list = CommandList::new();

    tracing::info!(
        preset = ?pipeline.preset(),
        volumes = volumes.len(),
        cameras = config.demo.cameras,
        frames = config.demo.frames,
        "starting volumetric frame recording"
    );

    for frame_index in 0..u64::from(config.demo.frames) {
        let frame = FrameInfo {
            frame_index,
            time: frame_index as f32 / 60.0,
        };

        for index in 0..config.demo.cameras {
            list.clear();
            let view = camera(index, &config, frame.time);
            let report = pipeline.render_camera(
                &view,
                &frame,
                &mut volumes,
                Some(&atlas),
                &lights,
                &mut allocator,
                &mut list,
            );

            tracing::info!(
                frame = frame_index,
                camera = %view.id,
                resolution = ?report.resolution,
                visible = report.visible_volumes,
                dispatches = list.dispatches().count(),
                uploaded = uploaded_bytes(&list),
                history_valid = report.history_was_valid,
                reprojected = report.reprojected,
                "frame recorded"
            );
            for (kernel, grid) in list.dispatches() {
                tracing::debug!(%kernel, x = grid.x, y = grid.y, z = grid.z, "dispatch");
            }
        }
    }

    tracing::info!(
        shared_buffer = ?pipeline.shared_buffer_size(),
        resident_history_bytes = allocator.resident_bytes(),
        "recording finished"
    );

    for index in 0..config.demo.cameras {
        pipeline.remove_camera(CameraId(index), &mut allocator);
    }
    debug_assert_eq!(allocator.resident_bytes(), 0);
}
