mod media;
mod peer;
mod resource;
mod room;
mod signaling;

pub use media::{
    ConsumerDescriptor, DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters, MediaKind,
    RtpCapabilities, RtpCodecCapability, RtpCodecParameters, RtpParameters, TransportDescriptor,
    TransportDirection,
};
pub use peer::{PeerDetails, PeerId};
pub use resource::{ConsumerId, ProducerId, RouterId, TransportId};
pub use room::RoomName;
pub use signaling::{AckError, AckPayload, ClientRequest, RequestEnvelope, ServerEvent, ServerMessage};
