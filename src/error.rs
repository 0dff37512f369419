use thiserror::Error;

/// Errors the rendezvous core distinguishes. HTTP handlers map these to
/// status codes at the boundary; nothing below this layer talks HTTP.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed body, oversize body, undecodable payload, empty answer.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No compatible proxy slot at the instant of the client offer.
    #[error("no proxy available")]
    NoProxyAvailable,

    /// Offer delivered but no answer within budget, or the offer could
    /// not be delivered to a popped slot before its timeout.
    #[error("timed out waiting for answer!")]
    MatchTimeout,

    /// Codec refused a well-formed logical value.
    #[error("internal encode failure: {0}")]
    InternalEncodeFailure(String),

    /// A configured external collaborator (ACME provisioning) is not
    /// part of this build; see DESIGN.md.
    #[error("not built into this broker: {0}")]
    NotBuilt(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
