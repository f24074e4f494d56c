//! Visible density-volume collection: frustum culling and capped list building.

use glam::Vec3;

use crate::density_volume::{DensityVolume, DensityVolumeEngineData};
use crate::frustum::{FRUSTUM_CORNER_COUNT, FRUSTUM_PLANE_COUNT, Frustum, OrientedBBox};

/// Maximum number of density volumes sent to the GPU per frame.
pub const MAX_VISIBLE_VOLUME_COUNT: usize = 512;

/// Size in bytes of the bounds storage buffer.
pub const VOLUME_BOUNDS_BUFFER_SIZE: u64 =
    (MAX_VISIBLE_VOLUME_COUNT * std::mem::size_of::<OrientedBBox>()) as u64;

/// Size in bytes of the engine-data storage buffer.
pub const VOLUME_DATA_BUFFER_SIZE: u64 =
    (MAX_VISIBLE_VOLUME_COUNT * std::mem::size_of::<DensityVolumeEngineData>()) as u64;

/// Bounds and engine data of the visible volumes, index-paired.
///
/// Both sequences are only ever modified together, so `bounds()[i]` and
/// `data()[i]` always describe the same volume.
#[derive(Debug, Default)]
pub struct VisibleVolumeLists {
    bounds: Vec<OrientedBBox>,
    data: Vec<DensityVolumeEngineData>,
}

impl VisibleVolumeLists {
    pub fn new() -> Self {
        Self {
            bounds: Vec::with_capacity(MAX_VISIBLE_VOLUME_COUNT),
            data: Vec::with_capacity(MAX_VISIBLE_VOLUME_COUNT),
        }
    }

    pub fn push(&mut self, bounds: OrientedBBox, data: DensityVolumeEngineData) {
        self.bounds.push(bounds);
        self.data.push(data);
    }

    pub fn clear(&mut self) {
        self.bounds.clear();
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.bounds.len(), self.data.len());
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= MAX_VISIBLE_VOLUME_COUNT
    }

    pub fn bounds(&self) -> &[OrientedBBox] {
        &self.bounds
    }

    pub fn data(&self) -> &[DensityVolumeEngineData] {
        &self.data
    }

    pub fn bounds_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.bounds)
    }

    pub fn data_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

/// Culls density volumes against a camera frustum and keeps the visible set.
///
/// The lists are rebuilt from scratch on every [`collect`](Self::collect)
/// and retained until the next one, so the voxelization and lighting passes
/// of the same camera read a consistent snapshot.
#[derive(Debug, Default)]
pub struct DensityVolumeCollector {
    visible: VisibleVolumeLists,
}

impl DensityVolumeCollector {
    pub fn new() -> Self {
        Self {
            visible: VisibleVolumeLists::new(),
        }
    }

    /// Rebuild the visible lists for one camera.
    ///
    /// Volumes are visited in source order. Once [`MAX_VISIBLE_VOLUME_COUNT`]
    /// volumes are visible the remainder is dropped without error.
    pub fn collect(
        &mut self,
        volumes: &[DensityVolume],
        frustum: &Frustum,
        camera_position: Vec3,
        camera_relative: bool,
    ) -> &VisibleVolumeLists {
        let camera_offset = if camera_relative { camera_position } else { Vec3::ZERO };

        self.visible.clear();

        let mut visited = 0;
        for volume in volumes {
            if self.visible.is_full() {
                break;
            }
            visited += 1;

            let mut obb = OrientedBBox::from_transform(&volume.transform());
            obb.translate_to_relative(camera_offset);

            if obb.overlaps(frustum, FRUSTUM_PLANE_COUNT, FRUSTUM_CORNER_COUNT) {
                self.visible.push(obb, volume.parameters.to_engine_data());
            }
        }

        if visited < volumes.len() {
            tracing::debug!(
                visible = self.visible.len(),
                skipped = volumes.len() - visited,
                "visible density volume cap reached"
            );
        }

        &self.visible
    }

    /// The lists produced by the last [`collect`](Self::collect).
    pub fn visible(&self) -> &VisibleVolumeLists {
        &self.visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density_volume::DensityVolumeParameters;
    use glam::{Mat4, Quat};

    fn camera_frustum(position: Vec3, camera_relative: bool) -> Frustum {
        let eye = if camera_relative { Vec3::ZERO } else { position };
        let view = Mat4::look_to_rh(eye, Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 0.1, 500.0);
        Frustum::from_view_projection(&(proj * view))
    }

    fn volume_at(position: Vec3, mean_free_path: f32) -> DensityVolume {
        DensityVolume::new(
            position,
            Quat::IDENTITY,
            DensityVolumeParameters::new(Vec3::ONE, mean_free_path, Vec3::splat(2.0)),
        )
    }

    #[test]
    fn test_cap_keeps_first_visible_in_order() {
        let volumes: Vec<DensityVolume> = (0..600)
            .map(|i| volume_at(Vec3::new(0.0, 0.0, -20.0), 1.0 + i as f32))
            .collect();
        let frustum = camera_frustum(Vec3::ZERO, false);

        let mut collector = DensityVolumeCollector::new();
        let visible = collector.collect(&volumes, &frustum, Vec3::ZERO, false);

        assert_eq!(visible.len(), MAX_VISIBLE_VOLUME_COUNT);
        assert_eq!(visible.bounds().len(), visible.data().len());
        for (i, data) in visible.data().iter().enumerate() {
            let expected = volumes[i].parameters.to_engine_data();
            assert_eq!(*data, expected, "entry {i} out of order");
        }
    }

    #[test]
    fn test_cap_counts_visible_volumes_only() {
        // Every other volume is behind the camera.
        let volumes: Vec<DensityVolume> = (0..1200)
            .map(|i| {
                let z = if i % 2 == 0 { -20.0 } else { 20.0 };
                volume_at(Vec3::new(0.0, 0.0, z), 1.0 + i as f32)
            })
            .collect();
        let frustum = camera_frustum(Vec3::ZERO, false);

        let mut collector = DensityVolumeCollector::new();
        let visible = collector.collect(&volumes, &frustum, Vec3::ZERO, false);

        assert_eq!(visible.len(), MAX_VISIBLE_VOLUME_COUNT);
        let last = visible.data()[MAX_VISIBLE_VOLUME_COUNT - 1];
        assert_eq!(last, volumes[2 * (MAX_VISIBLE_VOLUME_COUNT - 1)].parameters.to_engine_data());
    }

    #[test]
    fn test_culled_volumes_excluded_and_lists_paired() {
        let volumes = vec![
            volume_at(Vec3::new(0.0, 0.0, -10.0), 1.0),
            volume_at(Vec3::new(0.0, 0.0, -1000.0), 2.0),
            volume_at(Vec3::new(0.0, 0.0, 10.0), 3.0),
            volume_at(Vec3::new(2.0, 1.0, -30.0), 4.0),
        ];
        let frustum = camera_frustum(Vec3::ZERO, false);

        let mut collector = DensityVolumeCollector::new();
        let visible = collector.collect(&volumes, &frustum, Vec3::ZERO, false);

        assert_eq!(visible.len(), 2);
        assert_eq!(visible.bounds().len(), visible.data().len());
        assert_eq!(visible.bounds()[0].center(), Vec3::new(0.0, 0.0, -10.0));
        assert_eq!(visible.bounds()[1].center(), Vec3::new(2.0, 1.0, -30.0));
        assert_eq!(visible.data()[1].extinction, 0.25);
    }

    #[test]
    fn test_camera_relative_offsets_bounds() {
        let camera = Vec3::new(1000.0, 50.0, 0.0);
        let volumes = vec![volume_at(camera + Vec3::new(0.0, 0.0, -10.0), 1.0)];
        let frustum = camera_frustum(camera, true);

        let mut collector = DensityVolumeCollector::new();
        let visible = collector.collect(&volumes, &frustum, camera, true);

        assert_eq!(visible.len(), 1);
        assert_eq!(visible.bounds()[0].center(), Vec3::new(0.0, 0.0, -10.0));
    }

    #[test]
    fn test_collect_clears_previous_frame() {
        let frustum = camera_frustum(Vec3::ZERO, false);
        let mut collector = DensityVolumeCollector::new();
        collector.collect(&[volume_at(Vec3::new(0.0, 0.0, -5.0), 1.0)], &frustum, Vec3::ZERO, false);
        assert_eq!(collector.visible().len(), 1);

        collector.collect(&[], &frustum, Vec3::ZERO, false);
        assert!(collector.visible().is_empty());
        assert!(collector.visible().bounds_bytes().is_empty());
    }

    #[test]
    fn test_byte_views_match_record_sizes() {
        let frustum = camera_frustum(Vec3::ZERO, false);
        let mut collector = DensityVolumeCollector::new();
        let volumes = vec![volume_at(Vec3::new(0.0, 0.0, -5.0), 1.0); 3];
        let visible = collector.collect(&volumes, &frustum, Vec3::ZERO, false);
        assert_eq!(visible.bounds_bytes().len(), 3 * 48);
        assert_eq!(visible.data_bytes().len(), 3 * 80);
    }
}
