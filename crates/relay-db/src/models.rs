//! Database row types and setting keys. Values are stored as JSON text so each
//! key can be decoded (and, when corrupt, discarded) independently.

pub const KEY_ORIGIN: &str = "origin_chat_id";
pub const KEY_DESTINATIONS: &str = "destinations";
pub const KEY_DESTINATION_NAMES: &str = "destination_names";
pub const KEY_ADMINS: &str = "admins";

pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}
