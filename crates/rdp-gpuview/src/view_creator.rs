//! Orchestrates the dual-view (main + auxiliary NV12) compute dispatch:
//! descriptor updates, layout transitions, state-buffer clears, the
//! dispatch itself, and the fence wait that hands back a [`RenderState`].
//!
//! Actual Vulkan calls (pipeline creation, descriptor writes, command
//! buffer recording, queue submission) are abstracted behind [`GpuBackend`]
//! so the invocation protocol and bookkeeping are exercised the same way
//! with or without a real device, matching `rdp-encode`'s `HardwareEncoder`
//! seam.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::ViewCreatorError;
use crate::layout::{dispatch_groups, DispatchGroups, SpecializationConstants, StateBufferDims};
use crate::render_state::RenderState;

/// Opaque handle to a dual-view (main + auxiliary) target. Stable for the
/// lifetime of the view creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(pub u32);

/// Opaque handle to a source BGRA image the compute shader samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceImageHandle(pub u64);

/// Whether descriptor sets can be declared update-after-bind and command
/// buffers recorded once, or must be re-recorded per invocation because the
/// descriptors themselves change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorUpdateMode {
    UpdateAfterBind,
    RecordPerInvocation,
}

pub fn descriptor_update_mode(
    supports_sampled_image_update_after_bind: bool,
    supports_storage_image_update_after_bind: bool,
) -> DescriptorUpdateMode {
    if supports_sampled_image_update_after_bind && supports_storage_image_update_after_bind {
        DescriptorUpdateMode::UpdateAfterBind
    } else {
        DescriptorUpdateMode::RecordPerInvocation
    }
}

/// Whether the view creator's two state buffers live in device-local memory
/// (needing an explicit device→host copy before the host can read them) or
/// are already host-visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBufferMemory {
    DeviceLocal,
    HostVisible,
}

/// One source image, plus the previous frame's for damage detection. `None`
/// disables damage detection for this invocation (e.g. the first frame, or
/// an IDR rewrite).
#[derive(Debug, Clone, Copy)]
pub struct ViewSources {
    pub new_image: SourceImageHandle,
    pub old_image: Option<SourceImageHandle>,
}

/// Hardware seam: everything that actually talks to Vulkan.
pub trait GpuBackend: Send {
    /// Updates the four descriptor sets to point at the concrete images and
    /// buffers for this invocation.
    fn update_descriptors(&mut self, view: ViewId, sources: ViewSources) -> Result<(), ViewCreatorError>;

    /// Records and submits the layout-transition command buffer, if any
    /// participating image is not already in its target layout.
    fn transition_layouts(&mut self, view: ViewId) -> Result<(), ViewCreatorError>;

    /// Clears both state buffers to zero via `vkCmdFillBuffer`.
    fn clear_state_buffers(&mut self, view: ViewId, dims: StateBufferDims) -> Result<(), ViewCreatorError>;

    /// Dispatches the compute pipeline selected by `perform_dmg_detection`.
    fn dispatch(&mut self, view: ViewId, groups: DispatchGroups, perform_dmg_detection: bool) -> Result<(), ViewCreatorError>;

    /// Records the state-buffer synchronization command buffer appropriate
    /// for `memory` and submits the whole batch behind one fence.
    fn submit(&mut self, view: ViewId, memory: StateBufferMemory) -> Result<(), ViewCreatorError>;

    /// Polls (does not block past `timeout`) the fence for `view`. Returns
    /// `Ok(true)` once signaled.
    fn poll_fence(&mut self, view: ViewId, timeout: Duration) -> Result<bool, ViewCreatorError>;

    /// Reads back the two host-visible state buffers once the fence has
    /// signaled.
    fn read_state_buffers(&mut self, view: ViewId, dims: StateBufferDims) -> Result<(Vec<u32>, Vec<u32>), ViewCreatorError>;

    /// Reads back the two query-pool timestamps bracketing the dispatch, in
    /// device ticks converted to nanoseconds. Only called when `vk_times`
    /// debugging is enabled.
    fn read_timestamps(&mut self, view: ViewId) -> Result<(u64, u64), ViewCreatorError>;

    fn state_buffer_memory(&self) -> StateBufferMemory;
}

const FENCE_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// GPU dual-view creator for one encode session's surfaces.
pub struct ViewCreator<B: GpuBackend> {
    backend: B,
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
    update_mode: DescriptorUpdateMode,
    debug: rdp_encode::debug::DebugFlags,
    pending: HashSet<ViewId>,
}

impl<B: GpuBackend> ViewCreator<B> {
    pub fn new(
        backend: B,
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        update_mode: DescriptorUpdateMode,
        debug: rdp_encode::debug::DebugFlags,
    ) -> Self {
        Self {
            backend,
            source_width,
            source_height,
            target_width,
            target_height,
            update_mode,
            debug,
            pending: HashSet::new(),
        }
    }

    pub fn update_mode(&self) -> DescriptorUpdateMode {
        self.update_mode
    }

    fn state_dims(&self) -> StateBufferDims {
        StateBufferDims::for_surface(self.source_width, self.source_height)
    }

    /// Runs steps 1-6 of the per-invocation protocol and returns once the
    /// work has been submitted; does not wait for completion.
    pub fn create_view(&mut self, view: ViewId, sources: ViewSources) -> Result<(), ViewCreatorError> {
        if !self.pending.insert(view) {
            return Err(ViewCreatorError::Busy(view));
        }

        let perform_dmg_detection = sources.old_image.is_some();
        // Baked into the chosen compute pipeline; the backend picks the
        // damage-detection-on/off pipeline from `perform_dmg_detection`
        // directly rather than taking the full constant set, since the
        // other five only affect pipeline creation, not per-dispatch state.
        let _spec = SpecializationConstants::new(
            self.source_width,
            self.source_height,
            self.target_width,
            self.target_height,
            perform_dmg_detection,
        );
        let groups = dispatch_groups(self.target_width, self.target_height);
        let dims = self.state_dims();

        let result = (|| -> Result<(), ViewCreatorError> {
            self.backend.update_descriptors(view, sources)?;
            self.backend.transition_layouts(view)?;
            self.backend.clear_state_buffers(view, dims)?;
            self.backend.dispatch(view, groups, perform_dmg_detection)?;
            self.backend.submit(view, self.backend.state_buffer_memory())
        })();

        if result.is_err() {
            self.pending.remove(&view);
        }
        result
    }

    /// Waits on the fence and reads back the state buffers. Fails with
    /// [`ViewCreatorError::NotPending`] if `view` has no in-flight dispatch.
    pub fn finish_view(&mut self, view: ViewId, fence_timeout: Duration) -> Result<RenderState, ViewCreatorError> {
        if !self.pending.contains(&view) {
            return Err(ViewCreatorError::NotPending(view));
        }

        let mut waited = Duration::ZERO;
        loop {
            if self.backend.poll_fence(view, FENCE_POLL_INTERVAL)? {
                break;
            }
            waited += FENCE_POLL_INTERVAL;
            if waited >= fence_timeout {
                return Err(ViewCreatorError::FenceTimeout(fence_timeout));
            }
        }

        if self.debug.vk_times {
            let (start, end) = self.backend.read_timestamps(view)?;
            tracing::debug!(view = view.0, gpu_ns = end.saturating_sub(start), "view dispatch timing");
        }

        let dims = self.state_dims();
        let (damage, chroma_change) = self.backend.read_state_buffers(view, dims)?;
        self.pending.remove(&view);
        Ok(RenderState::from_host_buffers(dims, damage, chroma_change))
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, view: ViewId) -> bool {
        self.pending.contains(&view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockBackend {
        fences_ready: HashMap<ViewId, bool>,
        dmg_detection_used: HashMap<ViewId, bool>,
    }

    impl GpuBackend for MockBackend {
        fn update_descriptors(&mut self, _view: ViewId, _sources: ViewSources) -> Result<(), ViewCreatorError> {
            Ok(())
        }

        fn transition_layouts(&mut self, _view: ViewId) -> Result<(), ViewCreatorError> {
            Ok(())
        }

        fn clear_state_buffers(&mut self, _view: ViewId, _dims: StateBufferDims) -> Result<(), ViewCreatorError> {
            Ok(())
        }

        fn dispatch(&mut self, view: ViewId, _groups: DispatchGroups, perform_dmg_detection: bool) -> Result<(), ViewCreatorError> {
            self.dmg_detection_used.insert(view, perform_dmg_detection);
            Ok(())
        }

        fn submit(&mut self, view: ViewId, _memory: StateBufferMemory) -> Result<(), ViewCreatorError> {
            self.fences_ready.insert(view, true);
            Ok(())
        }

        fn poll_fence(&mut self, view: ViewId, _timeout: Duration) -> Result<bool, ViewCreatorError> {
            Ok(*self.fences_ready.get(&view).unwrap_or(&false))
        }

        fn read_state_buffers(&mut self, _view: ViewId, dims: StateBufferDims) -> Result<(Vec<u32>, Vec<u32>), ViewCreatorError> {
            let n = dims.element_count() as usize;
            Ok((vec![0; n], vec![0; n]))
        }

        fn read_timestamps(&mut self, _view: ViewId) -> Result<(u64, u64), ViewCreatorError> {
            Ok((0, 1_000))
        }

        fn state_buffer_memory(&self) -> StateBufferMemory {
            StateBufferMemory::HostVisible
        }
    }

    fn creator() -> ViewCreator<MockBackend> {
        ViewCreator::new(
            MockBackend::default(),
            1920,
            1080,
            1920,
            1080,
            DescriptorUpdateMode::RecordPerInvocation,
            rdp_encode::debug::DebugFlags::default(),
        )
    }

    #[test]
    fn create_then_finish_round_trip() {
        let mut vc = creator();
        let view = ViewId(0);
        vc.create_view(
            view,
            ViewSources {
                new_image: SourceImageHandle(1),
                old_image: None,
            },
        )
        .unwrap();
        assert!(vc.is_pending(view));

        let state = vc.finish_view(view, Duration::from_millis(10)).unwrap();
        assert_eq!(state.dims, StateBufferDims::for_surface(1920, 1080));
        assert!(!vc.is_pending(view));
    }

    #[test]
    fn second_create_while_pending_fails_busy() {
        let mut vc = creator();
        let view = ViewId(0);
        vc.create_view(
            view,
            ViewSources {
                new_image: SourceImageHandle(1),
                old_image: None,
            },
        )
        .unwrap();

        let err = vc
            .create_view(
                view,
                ViewSources {
                    new_image: SourceImageHandle(1),
                    old_image: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ViewCreatorError::Busy(_)));
    }

    #[test]
    fn finish_without_pending_create_fails_not_pending() {
        let mut vc = creator();
        let err = vc.finish_view(ViewId(7), Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, ViewCreatorError::NotPending(_)));
    }

    #[test]
    fn no_old_image_disables_damage_detection() {
        let mut vc = creator();
        let view = ViewId(2);
        vc.create_view(
            view,
            ViewSources {
                new_image: SourceImageHandle(1),
                old_image: None,
            },
        )
        .unwrap();
        assert_eq!(vc.backend.dmg_detection_used.get(&view), Some(&false));
    }

    #[test]
    fn old_image_present_enables_damage_detection() {
        let mut vc = creator();
        let view = ViewId(3);
        vc.create_view(
            view,
            ViewSources {
                new_image: SourceImageHandle(2),
                old_image: Some(SourceImageHandle(1)),
            },
        )
        .unwrap();
        assert_eq!(vc.backend.dmg_detection_used.get(&view), Some(&true));
    }

    #[test]
    fn descriptor_update_mode_requires_both_update_after_bind_features() {
        assert_eq!(
            descriptor_update_mode(true, true),
            DescriptorUpdateMode::UpdateAfterBind
        );
        assert_eq!(
            descriptor_update_mode(true, false),
            DescriptorUpdateMode::RecordPerInvocation
        );
        assert_eq!(
            descriptor_update_mode(false, false),
            DescriptorUpdateMode::RecordPerInvocation
        );
    }
}
