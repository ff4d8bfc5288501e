//! # Client Classes

use serde::{Deserialize, Serialize};

/// one `client-classes` entry: a name and its `test` expression
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientClass {
    pub name: String,
    /// expression in the classification grammar
    pub test: String,
}
