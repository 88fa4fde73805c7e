mod engine_event;
mod loopback;
mod media_engine;

pub use engine_event::*;
pub use loopback::*;
pub use media_engine::*;
