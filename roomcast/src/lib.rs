pub use roomcast_core::model::{PeerId, RoomName};

pub mod model {
    pub use roomcast_core::model::*;
}

#[cfg(feature = "server")]
pub mod server {
    pub use roomcast_server::*;
}
