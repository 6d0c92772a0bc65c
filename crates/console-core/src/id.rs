//! Random identifiers.
//!
//! Connection ids, entry ids, and process markers are full v4 UUIDs; RPC
//! correlation ids only need to be unique among the requests a single client
//! has in flight, so they are shortened.

use uuid::Uuid;

/// Length of ids returned by [`short_id`].
pub const SHORT_ID_LEN: usize = 8;

/// Returns a random v4 UUID in its hyphenated form.
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

/// Returns a short random id made of lowercase hex digits.
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}
