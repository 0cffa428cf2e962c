use serde::{Deserialize, Serialize};

/// Acknowledgement returned for operations that carry no resource body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub done: bool,
}

impl Operation {
    pub fn done(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: true,
        }
    }
}
