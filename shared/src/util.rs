/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Human-readable order identifier, e.g. `ORD-00001`
pub fn format_order_id(sequence: u64) -> String {
    format!("ORD-{:05}", sequence)
}

/// Human-readable refund identifier, e.g. `REF-000001`
pub fn format_refund_id(sequence: u64) -> String {
    format!("REF-{:06}", sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ids() {
        assert_eq!(format_order_id(1), "ORD-00001");
        assert_eq!(format_order_id(123456), "ORD-123456");
        assert_eq!(format_refund_id(42), "REF-000042");
    }
}
