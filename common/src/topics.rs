pub const TOPIC_DEVICE_PREFIX: &str = "spouty/devices";

/// Retained topic carrying the full JSON document of one device.
pub fn document_topic(device_id: &str) -> String {
    format!("{TOPIC_DEVICE_PREFIX}/{device_id}/document")
}
