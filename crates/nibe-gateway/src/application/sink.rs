//! Where decoded values go.
//!
//! Every value the engine decodes, whether it answers a `read_coil` call or
//! arrives unsolicited in a telemetry broadcast, is handed to one
//! [`UpdateSink`].  Applications that need fan-out build it behind the sink.

use nibe_core::{CoilData, ProductInfo};
use tokio::sync::mpsc;

/// One observation published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Coil(CoilData),
    ProductInfo(ProductInfo),
}

/// Receiver of engine updates.
///
/// Called synchronously from the receive loop, so implementations must not
/// block.
#[cfg_attr(test, mockall::automock)]
pub trait UpdateSink: Send + Sync {
    fn deliver(&self, update: Update);
}

impl UpdateSink for mpsc::UnboundedSender<Update> {
    fn deliver(&self, update: Update) {
        // A closed channel only means nobody is listening any more.
        let _ = self.send(update);
    }
}
