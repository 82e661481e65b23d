use std::collections::{HashMap, HashSet};

use anyhow::Result;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, warn};

use relay_types::settings::{MAX_DESTINATIONS, MAX_DISPLAY_NAME_CHARS, RelaySettings};
use relay_types::{ChatId, Destination, UserId};

use crate::Database;
use crate::models::{KEY_ADMINS, KEY_DESTINATIONS, KEY_DESTINATION_NAMES, KEY_ORIGIN, SettingRow};

impl Database {
    // -- Settings --

    /// Load settings, dropping whatever fails to decode instead of failing the load.
    pub fn load(&self) -> Result<RelaySettings> {
        let rows = self.with_conn(query_settings)?;
        for row in &rows {
            debug!("Setting '{}' last written {}", row.key, row.updated_at);
        }

        let values: HashMap<String, String> =
            rows.into_iter().map(|row| (row.key, row.value)).collect();
        Ok(decode_settings(&values))
    }

    /// Replace every settings key in one transaction.
    pub fn save(&self, settings: &RelaySettings) -> Result<()> {
        let encoded = encode_settings(settings);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for (key, value) in &encoded {
                tx.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                    (*key, value.as_str()),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Whether any settings were ever persisted. False on a fresh database.
    pub fn has_settings(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))?;
            Ok(count > 0)
        })
    }

    /// Write a raw value. Bypasses encoding; lets tests plant corrupt data.
    pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (key, value),
            )?;
            Ok(())
        })
    }
}

fn query_settings(conn: &Connection) -> Result<Vec<SettingRow>> {
    let mut stmt = conn.prepare("SELECT key, value, updated_at FROM settings")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SettingRow {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn encode_settings(settings: &RelaySettings) -> Vec<(&'static str, String)> {
    let ids: Vec<i64> = settings.destinations.iter().map(|d| d.id.0).collect();
    let names: serde_json::Map<String, Value> = settings
        .destinations
        .iter()
        .map(|d| (d.id.0.to_string(), Value::String(d.display_name.clone())))
        .collect();
    let admins: Vec<i64> = settings.admins.iter().map(|a| a.0).collect();

    vec![
        (KEY_ORIGIN, settings.origin.map_or(0, |id| id.0).to_string()),
        (KEY_DESTINATIONS, Value::from(ids).to_string()),
        (KEY_DESTINATION_NAMES, Value::Object(names).to_string()),
        (KEY_ADMINS, Value::from(admins).to_string()),
    ]
}

fn decode_settings(values: &HashMap<String, String>) -> RelaySettings {
    let origin = values.get(KEY_ORIGIN).and_then(|raw| decode_origin(raw));
    let names = values
        .get(KEY_DESTINATION_NAMES)
        .map(|raw| decode_names(raw))
        .unwrap_or_default();

    let mut destination_ids = values
        .get(KEY_DESTINATIONS)
        .map(|raw| decode_id_list(KEY_DESTINATIONS, raw))
        .unwrap_or_default();
    if destination_ids.len() > MAX_DESTINATIONS {
        warn!(
            "Stored destination list has {} entries, keeping the first {}",
            destination_ids.len(),
            MAX_DESTINATIONS
        );
        destination_ids.truncate(MAX_DESTINATIONS);
    }

    let destinations = destination_ids
        .into_iter()
        .map(|id| {
            let name = names.get(&id).cloned().unwrap_or_else(|| id.to_string());
            Destination::new(ChatId(id), name)
        })
        .collect();

    let admins = values
        .get(KEY_ADMINS)
        .map(|raw| decode_id_list(KEY_ADMINS, raw))
        .unwrap_or_default()
        .into_iter()
        .map(UserId)
        .collect();

    RelaySettings {
        origin,
        destinations,
        admins,
    }
}

fn decode_origin(raw: &str) -> Option<ChatId> {
    match serde_json::from_str::<Value>(raw).ok().and_then(|v| v.as_i64()) {
        Some(0) => None,
        Some(id) => Some(ChatId(id)),
        None => {
            warn!("Dropping unreadable origin setting: {}", raw);
            None
        }
    }
}

/// Non-zero integers in first-seen order; anything else is dropped.
fn decode_id_list(key: &str, raw: &str) -> Vec<i64> {
    let items = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        _ => {
            warn!("Dropping unreadable '{}' setting: {}", key, raw);
            return vec![];
        }
    };

    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        match item.as_i64() {
            Some(0) | None => warn!("Dropping invalid '{}' entry: {}", key, item),
            Some(id) => {
                if seen.insert(id) {
                    ids.push(id);
                } else {
                    warn!("Dropping duplicate '{}' entry: {}", key, id);
                }
            }
        }
    }
    ids
}

fn decode_names(raw: &str) -> HashMap<i64, String> {
    let entries = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(entries)) => entries,
        _ => {
            warn!("Dropping unreadable destination names: {}", raw);
            return HashMap::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let id = key.parse::<i64>().ok();
            let name = value.as_str().map(str::trim).filter(|n| !n.is_empty());
            match (id, name) {
                (Some(id), Some(name)) => {
                    Some((id, name.chars().take(MAX_DISPLAY_NAME_CHARS).collect()))
                }
                _ => {
                    warn!("Dropping invalid destination name entry: {} = {}", key, value);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RelaySettings {
        RelaySettings {
            origin: Some(ChatId(555)),
            destinations: vec![
                Destination::new(ChatId(200), "Beta"),
                Destination::new(ChatId(100), "Alpha"),
            ],
            admins: vec![UserId(1), UserId(2)],
        }
    }

    #[test]
    fn fresh_database_is_empty() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.has_settings().unwrap());
        assert_eq!(db.load().unwrap(), RelaySettings::default());
    }

    #[test]
    fn save_then_load_keeps_order_and_names() {
        let db = Database::open_in_memory().unwrap();
        db.save(&sample()).unwrap();
        assert!(db.has_settings().unwrap());
        assert_eq!(db.load().unwrap(), sample());
    }

    #[test]
    fn save_overwrites_previous_copy() {
        let db = Database::open_in_memory().unwrap();
        db.save(&sample()).unwrap();

        let mut next = sample();
        next.origin = None;
        next.destinations.remove(0);
        db.save(&next).unwrap();

        let loaded = db.load().unwrap();
        assert_eq!(loaded.origin, None);
        assert_eq!(loaded.destinations, vec![Destination::new(ChatId(100), "Alpha")]);
    }

    #[test]
    fn corrupt_fields_are_dropped_individually() {
        let db = Database::open_in_memory().unwrap();
        db.save(&sample()).unwrap();
        db.put_raw(KEY_ORIGIN, "\"not a number\"").unwrap();
        db.put_raw(KEY_ADMINS, "{broken").unwrap();

        let loaded = db.load().unwrap();
        assert_eq!(loaded.origin, None);
        assert!(loaded.admins.is_empty());
        // Untouched keys survive
        assert_eq!(loaded.destinations, sample().destinations);
    }

    #[test]
    fn invalid_entries_are_dropped_from_lists() {
        let db = Database::open_in_memory().unwrap();
        db.put_raw(KEY_DESTINATIONS, r#"[100, "x", 0, 100, 300, null]"#).unwrap();
        db.put_raw(KEY_DESTINATION_NAMES, r#"{"100": "Alpha", "abc": "Nope", "300": 7}"#).unwrap();
        db.put_raw(KEY_ADMINS, "[1, -2, 1.5]").unwrap();

        let loaded = db.load().unwrap();
        assert_eq!(
            loaded.destinations,
            vec![
                Destination::new(ChatId(100), "Alpha"),
                Destination::new(ChatId(300), "300"),
            ]
        );
        assert_eq!(loaded.admins, vec![UserId(1), UserId(-2)]);
    }

    #[test]
    fn oversized_lists_and_names_are_clamped() {
        let db = Database::open_in_memory().unwrap();
        let ids: Vec<i64> = (1..=120).collect();
        db.put_raw(KEY_DESTINATIONS, &Value::from(ids).to_string()).unwrap();
        db.put_raw(KEY_DESTINATION_NAMES, &format!(r#"{{"1": "{}"}}"#, "n".repeat(80))).unwrap();

        let loaded = db.load().unwrap();
        assert_eq!(loaded.destinations.len(), MAX_DESTINATIONS);
        assert_eq!(loaded.destinations[0].display_name.chars().count(), MAX_DISPLAY_NAME_CHARS);
    }

    #[test]
    fn zero_origin_means_unset() {
        let db = Database::open_in_memory().unwrap();
        db.put_raw(KEY_ORIGIN, "0").unwrap();
        assert_eq!(db.load().unwrap().origin, None);
    }
}
