//! Detector seam.
//!
//! The inference call itself is an external capability. Everything downstream of
//! this module sees only validated `Detection` values with normalized boxes.

mod backend;
mod backends;
mod registry;

pub use backend::Detector;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{MotionBackend, StubBackend};
pub use registry::{DetectorFactory, DetectorRegistry};
