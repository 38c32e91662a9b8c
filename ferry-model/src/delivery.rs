use std::fmt;

/// Per-epoch sequence number the broker uses to confirm a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(pub u64);

impl DeliveryTag {
    /// First tag handed out in a fresh connection epoch.
    pub const FIRST: Self = Self(1);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A published payload the broker has not yet acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    pub tag: DeliveryTag,
    pub payload: String,
}
