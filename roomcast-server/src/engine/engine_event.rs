use roomcast_core::{ConsumerId, ProducerId, TransportId};

/// Lifecycle notifications the media engine raises on its own initiative.
///
/// Closures requested through `MediaEngine::close` are not echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// DTLS reached `closed` or the network path failed.
    TransportClosed(TransportId),
    ProducerClosed(ProducerId),
    ConsumerClosed(ConsumerId),
    /// The engine process is gone; nothing it created is usable any more.
    Died(String),
}
