use std::error::Error;

/// A harvested batch of events handed to a [`Transmitter`].
#[derive(Debug)]
pub struct Batch<'a, E> {
    /// Capacity of the reservoir the batch was harvested from.
    pub max_size: usize,
    /// Number of events decided by the reservoir, including rejected ones.
    pub number_of_tries: u64,
    /// The retained events, ordered by descending priority.
    pub events: &'a [E],
}

impl<E> Clone for Batch<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Batch<'_, E> {}

/// An error returned by [`Transmitter::send`].
///
/// The variant decides what happens to the harvested data.
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    /// The collector is temporarily unavailable or rate limiting.
    ///
    /// The batch is resampled into the next harvest.
    #[error("transient transmit failure: {0}")]
    Transient(String),
    /// The collector rejected the batch and will keep rejecting it.
    ///
    /// The batch is dropped.
    #[error("permanent transmit failure: {0}")]
    Permanent(String),
    /// Any other failure of the transport.
    ///
    /// Handled according to the configured unexpected error policy.
    #[error("unexpected transmit failure")]
    Unexpected(#[source] Box<dyn Error + Send + Sync>),
}

impl TransmitError {
    /// Creates an unexpected error from any error type.
    pub fn unexpected<E>(error: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::Unexpected(error.into())
    }

    /// Returns `true` if the data should be kept for another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns `true` if the collector rejected the data for good.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Sends harvested batches to the collector.
///
/// Implementations are called from harvest threads and may block. Timeouts and backoff are up to
/// the implementation, the harvest cycle only reacts to the returned result.
pub trait Transmitter<E>: Send + Sync {
    /// Sends a batch of events on behalf of the given application.
    fn send(&self, app_name: &str, batch: Batch<'_, E>) -> Result<(), TransmitError>;
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_classification() {
        assert!(TransmitError::Transient("503".to_owned()).is_transient());
        assert!(TransmitError::Permanent("413".to_owned()).is_permanent());

        let error = TransmitError::unexpected(io::Error::other("broken pipe"));
        assert!(!error.is_transient());
        assert!(!error.is_permanent());
        assert_eq!(
            error.source().map(|source| source.to_string()),
            Some("broken pipe".to_owned())
        );
    }
}
