use rand::Rng;

/// Allocate an id of the shape `<prefix>_<ms-epoch>_<8-hex>`.
///
/// The millisecond timestamp keeps ids roughly sortable by creation time;
/// the random suffix disambiguates ids minted within the same millisecond.
pub fn prefixed_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random();
    format!("{prefix}_{millis}_{suffix:08x}")
}

/// Id for a memory record: `mem_<ms-epoch>_<8-hex>`.
pub fn memory_id() -> String {
    prefixed_id("mem")
}

/// Id for an entity row attached to a memory record.
pub fn entity_id() -> String {
    prefixed_id("ent")
}
