//! PushSink trait - real-time push channel output interface

use crate::{ContractError, PushMessage};

/// Push message consumer
///
/// All observer implementations must implement this trait.
#[trait_variant::make(PushSink: Send)]
pub trait LocalPushSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one push message
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, message: &PushMessage) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
