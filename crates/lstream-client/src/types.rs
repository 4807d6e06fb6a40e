//! Shared data types

use std::collections::HashMap;

/// Field values stored for one item
///
/// A `None` value is a field the server explicitly set to null.
pub type ItemData = HashMap<String, Option<String>>;
