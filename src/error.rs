/// Failures raised by the promise machinery itself.
///
/// None of these are ever returned from `then`, `resolve` or `reject`. They
/// surface as the rejection reason of the promise they concern, which is why
/// reason types are required to implement `From<Error>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("cannot fulfill a promise with itself")]
    SelfResolution,
    #[error("adoption exceeded {depth} nested hops")]
    AdoptionDepthExceeded { depth: usize },
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidConfig {
        key: &'static str,
        value: String,
        reason: String,
    },
}
