use std::{error::Error, fmt};

/// The result type of the initializers.
pub type Result<T> = std::result::Result<T, RandErr>;

/// An initializer whose distribution can't be built from it's arguments.
#[derive(Debug)]
pub struct RandErr {
    init: &'static str,
    reason: String,
}

impl RandErr {
    pub(super) fn new(init: &'static str, reason: impl fmt::Display) -> Self {
        Self {
            init,
            reason: reason.to_string(),
        }
    }

    pub(super) fn zero_fan(init: &'static str) -> Self {
        Self::new(init, "the layer has no fan")
    }

    /// The initializer that failed.
    pub fn init(&self) -> &'static str {
        self.init
    }
}

impl fmt::Display for RandErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} initializer: {}", self.init, self.reason)
    }
}

impl Error for RandErr {}
