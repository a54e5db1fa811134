//! Pure sizing/layout math for the dual-view compute dispatch. Kept free of
//! any Vulkan handle so it can be unit-tested without a device.

/// Tile size, in pixels, of one damage/chroma-change bitmap entry.
const STATE_TILE_PIXELS: u32 = 64;
/// Local workgroup size (in each of X/Y) the compute shader is compiled for.
const WORKGROUP_SIZE: u32 = 16;

fn ceil_div(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// The six specialization constants baked into the compute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecializationConstants {
    pub source_width: u32,
    pub source_height: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub perform_dmg_detection: bool,
    pub state_buffer_stride: u32,
}

impl SpecializationConstants {
    pub fn new(
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        perform_dmg_detection: bool,
    ) -> Self {
        Self {
            source_width,
            source_height,
            target_width,
            target_height,
            perform_dmg_detection,
            state_buffer_stride: ceil_div(source_width, STATE_TILE_PIXELS),
        }
    }
}

/// Damage/chroma-change bitmap dimensions in tiles, per §3's `Render state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateBufferDims {
    pub width_tiles: u32,
    pub height_tiles: u32,
}

impl StateBufferDims {
    pub fn for_surface(width: u32, height: u32) -> Self {
        Self {
            width_tiles: ceil_div(width, STATE_TILE_PIXELS),
            height_tiles: ceil_div(height, STATE_TILE_PIXELS),
        }
    }

    /// Element count of each of the two `u32` state arrays.
    pub fn element_count(&self) -> u32 {
        self.width_tiles * self.height_tiles
    }

    pub fn byte_len(&self) -> u64 {
        u64::from(self.element_count()) * 4
    }
}

/// `vkCmdDispatch` group counts for the chosen pipeline. The shader processes
/// one NV12 (2x2 luma) texel block per invocation, so the target's chroma
/// plane dimensions (half width/height) are what's tiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGroups {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

pub fn dispatch_groups(target_width: u32, target_height: u32) -> DispatchGroups {
    DispatchGroups {
        x: ceil_div(ceil_div(target_width, 2), WORKGROUP_SIZE),
        y: ceil_div(ceil_div(target_height, 2), WORKGROUP_SIZE),
        z: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_buffer_dims_round_up_to_tile() {
        let dims = StateBufferDims::for_surface(1920, 1080);
        assert_eq!(dims.width_tiles, 30);
        assert_eq!(dims.height_tiles, 17);
        assert_eq!(dims.element_count(), 30 * 17);
        assert_eq!(dims.byte_len(), 30 * 17 * 4);
    }

    #[test]
    fn state_buffer_dims_exact_multiple_does_not_overcount() {
        let dims = StateBufferDims::for_surface(1280, 1280);
        assert_eq!(dims.width_tiles, 20);
        assert_eq!(dims.height_tiles, 20);
    }

    #[test]
    fn dispatch_groups_1080p() {
        let groups = dispatch_groups(1920, 1080);
        // chroma plane is 960x540, tiled in 16x16 workgroups.
        assert_eq!(groups, DispatchGroups { x: 30, y: 17, z: 1 });
    }

    #[test]
    fn dispatch_groups_exact_multiple() {
        let groups = dispatch_groups(1024, 512);
        assert_eq!(groups, DispatchGroups { x: 32, y: 16, z: 1 });
    }

    #[test]
    fn specialization_constants_carry_dmg_detection_flag() {
        let spec = SpecializationConstants::new(1920, 1080, 1920, 1080, true);
        assert!(spec.perform_dmg_detection);
        assert_eq!(spec.state_buffer_stride, 30);

        let no_dmg = SpecializationConstants::new(1920, 1080, 1920, 1080, false);
        assert!(!no_dmg.perform_dmg_detection);
    }
}
