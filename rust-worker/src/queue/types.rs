//! Delivery type handed from the queue client to the processor.

/// One delivery of a message received from the queue.
///
/// A redelivered message arrives as a fresh value; the receipt handle
/// identifies this delivery only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Broker message id, used for log correlation
    pub id: String,
    /// Raw payload
    pub body: Vec<u8>,
    /// Token required to delete this delivery
    pub receipt_handle: String,
}

impl QueueMessage {
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>, receipt_handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            receipt_handle: receipt_handle.into(),
        }
    }

    /// Lossy preview of the body for log lines.
    pub fn body_preview(&self) -> String {
        String::from_utf8_lossy(&self.body[..self.body.len().min(500)]).into_owned()
    }
}
