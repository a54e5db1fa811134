//! GPU dual-view (main + auxiliary NV12) construction for
//! cosmic-ext-rdp-server.
//!
//! - `layout`: pure specialization-constant/dispatch-group/state-buffer
//!   sizing math.
//! - `render_state`: the damage/chroma-change bitmaps handed to the encode
//!   session.
//! - `view_creator`: the dispatch orchestration itself, behind a
//!   [`view_creator::GpuBackend`] seam.

pub mod error;
pub mod layout;
pub mod render_state;
pub mod view_creator;

pub use error::ViewCreatorError;
pub use view_creator::{
    descriptor_update_mode, DescriptorUpdateMode, GpuBackend, SourceImageHandle, StateBufferMemory,
    ViewCreator, ViewId, ViewSources,
};
