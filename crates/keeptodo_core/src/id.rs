use uuid::Uuid;

/// Time-ordered identifier: millisecond timestamp, a per-process counter that
/// keeps ids distinct within the same millisecond, and random bits.
pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}
