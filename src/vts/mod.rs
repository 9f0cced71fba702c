pub mod animator;
pub mod api;
pub mod sink;

pub use animator::{BlinkSchedule, IdleAnimator};
pub use api::VtsApi;
pub use sink::{AnimationSink, ParameterWriter, RigParams, VtsWriter};
