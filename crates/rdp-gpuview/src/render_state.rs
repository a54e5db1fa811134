//! The per-frame side channel the view creator hands back to the encode
//! session: damage and chroma-change bitmaps at 64x64 tile granularity.

use crate::layout::StateBufferDims;

/// Damage and chroma-change bitmaps produced by one dispatch, read back from
/// the two host-visible state buffers.
#[derive(Debug, Clone)]
pub struct RenderState {
    pub dims: StateBufferDims,
    /// One bit per tile: any pixel changed since the previous frame.
    pub damage: Vec<u32>,
    /// One bit per tile: computed chroma differs from the previous frame.
    pub chroma_change: Vec<u32>,
}

impl RenderState {
    pub fn from_host_buffers(dims: StateBufferDims, damage: Vec<u32>, chroma_change: Vec<u32>) -> Self {
        debug_assert_eq!(damage.len(), dims.element_count() as usize);
        debug_assert_eq!(chroma_change.len(), dims.element_count() as usize);
        Self {
            dims,
            damage,
            chroma_change,
        }
    }

    pub fn is_tile_damaged(&self, x: u32, y: u32) -> bool {
        self.damage[(y * self.dims.width_tiles + x) as usize] != 0
    }

    pub fn is_tile_chroma_changed(&self, x: u32, y: u32) -> bool {
        self.chroma_change[(y * self.dims.width_tiles + x) as usize] != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_lookup_is_row_major() {
        let dims = StateBufferDims {
            width_tiles: 3,
            height_tiles: 2,
        };
        let mut damage = vec![0u32; 6];
        damage[4] = 1; // row 1, col 1
        let state = RenderState::from_host_buffers(dims, damage, vec![0u32; 6]);

        assert!(state.is_tile_damaged(1, 1));
        assert!(!state.is_tile_damaged(0, 1));
        assert!(!state.is_tile_chroma_changed(1, 1));
    }
}
