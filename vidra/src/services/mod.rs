//! Service layer.

pub mod container;
pub mod video;

pub use container::ServiceContainer;
pub use video::{CreateVideoRequest, VideoService};
