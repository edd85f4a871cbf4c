mod backend;
mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ReplayBackend, StaticBackend};
pub use result::{BoundingBox, Detection, Point};
