//! Per-camera temporal state: V-Buffer parameter pairs and history textures.
//!
//! A camera is either uninitialized (absent from the manager) or initialized
//! (present with a [`CameraHistory`]). It becomes initialized the first frame
//! volumetric fog is enabled for it and returns to uninitialized when fog is
//! disabled or the camera is removed.

use std::fmt;

use glam::{UVec2, UVec3};
use rustc_hash::FxHashMap;

use crate::vbuffer::VBufferParameters;

/// Stable identity of a camera across frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(pub u32);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera{}", self.0)
    }
}

/// Opaque handle to a 3D texture owned by a [`HistoryAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Texture3DHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeTextureFormat {
    Rgba16Float,
}

/// Description of a storage-writable 3D texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeTextureDesc {
    pub label: String,
    pub size: UVec3,
    pub format: VolumeTextureFormat,
}

impl VolumeTextureDesc {
    /// History buffer `slot` (0 or 1) of the named camera.
    pub fn history(camera_name: &str, slot: usize, size: UVec3) -> Self {
        Self {
            label: format!("{camera_name}_VBufferHistory{slot}"),
            size,
            format: VolumeTextureFormat::Rgba16Float,
        }
    }
}

/// Source of per-camera history textures.
pub trait HistoryAllocator {
    /// Create a texture for history slot `slot`, or `None` if it cannot be
    /// created right now. A missing texture disables reprojection for the frame.
    fn allocate(&mut self, slot: usize, desc: &VolumeTextureDesc) -> Option<Texture3DHandle>;

    /// Release a texture previously returned by [`allocate`](Self::allocate).
    fn release(&mut self, handle: Texture3DHandle);
}

/// History and feedback textures bound by one lighting pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryTextures {
    /// Previous frame's lighting, read.
    pub history: Texture3DHandle,
    /// This frame's lighting, written for the next frame.
    pub feedback: Texture3DHandle,
}

/// Temporal state of one initialized camera.
#[derive(Clone, Debug, Default)]
pub struct CameraHistory {
    /// `[current, previous]`.
    params: [VBufferParameters; 2],
    history_is_valid: bool,
    textures: [Option<Texture3DHandle>; 2],
    /// Size the history textures were allocated with.
    buffer_size: UVec3,
}

impl CameraHistory {
    fn seeded(params: VBufferParameters) -> Self {
        Self {
            params: [params, params],
            ..Self::default()
        }
    }

    pub fn current(&self) -> &VBufferParameters {
        &self.params[0]
    }

    pub fn previous(&self) -> &VBufferParameters {
        &self.params[1]
    }

    pub fn history_is_valid(&self) -> bool {
        self.history_is_valid
    }

    /// X/Y size of the history textures, zero until allocated.
    pub fn buffer_size(&self) -> UVec2 {
        self.buffer_size.truncate()
    }

    fn update(&mut self, params: VBufferParameters) {
        if self.params[0].is_uninitialized() {
            self.params[1] = params;
        } else {
            self.params[1] = self.params[0];
        }
        self.params[0] = params;
    }

    fn release_textures(&mut self, allocator: &mut dyn HistoryAllocator) {
        for slot in &mut self.textures {
            if let Some(handle) = slot.take() {
                allocator.release(handle);
            }
        }
        self.buffer_size = UVec3::ZERO;
    }
}

/// Map from camera identity to its temporal state.
#[derive(Debug, Default)]
pub struct HistoryManager {
    cameras: FxHashMap<CameraId, CameraHistory>,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, camera: CameraId) -> Option<&CameraHistory> {
        self.cameras.get(&camera)
    }

    pub fn is_initialized(&self, camera: CameraId) -> bool {
        self.cameras.contains_key(&camera)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Initialize or tear down a camera's state to follow its fog toggle.
    ///
    /// `params` is only evaluated when the camera becomes initialized; both
    /// parameter slots start out identical.
    pub fn reinitialize(
        &mut self,
        camera: CameraId,
        fog_enabled: bool,
        allocator: &mut dyn HistoryAllocator,
        params: impl FnOnce() -> VBufferParameters,
    ) {
        match (fog_enabled, self.cameras.contains_key(&camera)) {
            (true, false) => {
                tracing::debug!(%camera, "initializing volumetric history");
                self.cameras.insert(camera, CameraHistory::seeded(params()));
            }
            (false, true) => self.remove_camera(camera, allocator),
            _ => {}
        }
    }

    /// Push this frame's parameters. Call once per camera per frame.
    ///
    /// Returns `None` for an uninitialized camera.
    pub fn update(&mut self, camera: CameraId, params: VBufferParameters) -> Option<&CameraHistory> {
        let history = self.cameras.get_mut(&camera)?;
        history.update(params);
        Some(history)
    }

    /// Make sure both history textures exist and can hold `viewport`.
    ///
    /// Textures only grow. Reallocation discards their contents, so the
    /// history is invalidated.
    pub fn ensure_textures(
        &mut self,
        camera: CameraId,
        camera_name: &str,
        viewport: UVec3,
        allocator: &mut dyn HistoryAllocator,
    ) {
        let Some(history) = self.cameras.get_mut(&camera) else {
            return;
        };

        if !viewport.cmple(history.buffer_size).all() {
            let grown = history.buffer_size.max(viewport);
            if history.textures.iter().any(Option::is_some) {
                tracing::debug!(%camera, size = ?grown, "growing volumetric history buffers");
                history.release_textures(allocator);
                history.history_is_valid = false;
            }
            history.buffer_size = grown;
        }

        for (slot, texture) in history.textures.iter_mut().enumerate() {
            if texture.is_none() {
                let desc = VolumeTextureDesc::history(camera_name, slot, history.buffer_size);
                *texture = allocator.allocate(slot, &desc);
                if texture.is_none() {
                    tracing::warn!(label = %desc.label, "history buffer unavailable");
                }
            }
        }
    }

    /// History and feedback textures for `frame_index`, swapped by parity.
    ///
    /// `None` when the camera is uninitialized or either texture is missing,
    /// which means no reprojection this frame.
    pub fn textures_for_frame(&self, camera: CameraId, frame_index: u64) -> Option<HistoryTextures> {
        let history = self.cameras.get(&camera)?;
        let feedback_slot = (frame_index % 2) as usize;
        let history_slot = ((frame_index + 1) % 2) as usize;
        Some(HistoryTextures {
            history: history.textures[history_slot]?,
            feedback: history.textures[feedback_slot]?,
        })
    }

    /// Record that a reprojected lighting pass wrote the feedback texture.
    pub fn mark_history_valid(&mut self, camera: CameraId) {
        if let Some(history) = self.cameras.get_mut(&camera) {
            history.history_is_valid = true;
        }
    }

    pub fn history_is_valid(&self, camera: CameraId) -> bool {
        self.cameras
            .get(&camera)
            .is_some_and(CameraHistory::history_is_valid)
    }

    /// Drop a camera's state and release its textures.
    pub fn remove_camera(&mut self, camera: CameraId, allocator: &mut dyn HistoryAllocator) {
        if let Some(mut history) = self.cameras.remove(&camera) {
            tracing::debug!(%camera, "releasing volumetric history");
            history.release_textures(allocator);
        }
    }
}
