pub mod fixed;
pub mod replay;

pub use fixed::StaticBackend;
pub use replay::ReplayBackend;
