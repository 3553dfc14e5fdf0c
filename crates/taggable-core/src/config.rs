//! Tagging configuration.
//!
//! Configuration can be built in code, deserialized with serde, or loaded from
//! environment variables (`TAGGABLE_*` prefixed):
//!
//! ```rust,no_run
//! use taggable_core::TaggableConfig;
//!
//! let config = TaggableConfig::from_env();
//! config.validate().expect("invalid tagging configuration");
//! ```

use std::env;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::{ItemSnapshot, SyncedAttributes};

/// Table layout and attribute syncing for one taggable item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggableConfig {
    /// Tag table name (optionally schema-qualified).
    pub tag_table: String,
    /// Attachment (join) table name (optionally schema-qualified).
    pub attachment_table: String,
    /// Item table name used by the stock item repository.
    pub item_table: String,
    /// Primary key column of the item table.
    pub item_key: String,
    /// Item attributes copied onto every attachment row.
    pub synced_attributes: Vec<String>,
    /// Soft-delete column of the item type, if it has one.
    pub soft_delete_column: Option<String>,
}

impl Default for TaggableConfig {
    fn default() -> Self {
        Self {
            tag_table: defaults::TAG_TABLE.to_string(),
            attachment_table: defaults::ATTACHMENT_TABLE.to_string(),
            item_table: defaults::ITEM_TABLE.to_string(),
            item_key: defaults::ITEM_KEY.to_string(),
            synced_attributes: Vec::new(),
            soft_delete_column: None,
        }
    }
}

impl TaggableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tag table name.
    pub fn tag_table(mut self, table: impl Into<String>) -> Self {
        self.tag_table = table.into();
        self
    }

    /// Set the attachment table name.
    pub fn attachment_table(mut self, table: impl Into<String>) -> Self {
        self.attachment_table = table.into();
        self
    }

    /// Set the item table and its key column.
    pub fn item_table(mut self, table: impl Into<String>, key: impl Into<String>) -> Self {
        self.item_table = table.into();
        self.item_key = key.into();
        self
    }

    /// Add an item attribute to copy onto attachment rows.
    pub fn sync_attribute(mut self, attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        if !self.synced_attributes.contains(&attribute) {
            self.synced_attributes.push(attribute);
        }
        self
    }

    /// Track item soft deletes through the given column.
    ///
    /// The column is also synced onto attachment rows, which is what makes
    /// soft-delete tracking active.
    pub fn soft_deletes(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self = self.sync_attribute(column.clone());
        self.soft_delete_column = Some(column);
        self
    }

    /// Track item soft deletes through the conventional `deleted_at` column.
    pub fn default_soft_deletes(self) -> Self {
        self.soft_deletes(defaults::SOFT_DELETE_COLUMN)
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TAGGABLE_TAG_TABLE` (default: `tags`)
    /// - `TAGGABLE_ATTACHMENT_TABLE` (default: `taggables`)
    /// - `TAGGABLE_ITEM_TABLE` (default: `items`)
    /// - `TAGGABLE_ITEM_KEY` (default: `id`)
    /// - `TAGGABLE_SYNCED_ATTRIBUTES` (comma separated, default: none)
    /// - `TAGGABLE_SOFT_DELETE_COLUMN` (default: none)
    pub fn from_env() -> Self {
        let mut config = Self {
            tag_table: env_or("TAGGABLE_TAG_TABLE", defaults::TAG_TABLE),
            attachment_table: env_or("TAGGABLE_ATTACHMENT_TABLE", defaults::ATTACHMENT_TABLE),
            item_table: env_or("TAGGABLE_ITEM_TABLE", defaults::ITEM_TABLE),
            item_key: env_or("TAGGABLE_ITEM_KEY", defaults::ITEM_KEY),
            synced_attributes: Vec::new(),
            soft_delete_column: None,
        };

        if let Ok(list) = env::var("TAGGABLE_SYNCED_ATTRIBUTES") {
            for attribute in list.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                config = config.sync_attribute(attribute);
            }
        }

        if let Some(column) = env::var("TAGGABLE_SOFT_DELETE_COLUMN")
            .ok()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
        {
            config = config.soft_deletes(column);
        }

        config
    }

    /// Validate every table and column name.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.tag_table)?;
        validate_identifier(&self.attachment_table)?;
        validate_identifier(&self.item_table)?;
        validate_identifier(&self.item_key)?;

        if let Some(column) = &self.soft_delete_column {
            if !self.synced_attributes.contains(column) {
                return Err(Error::Config(format!(
                    "soft delete column '{}' must also be a synced attribute",
                    column
                )));
            }
        }
        Ok(())
    }

    /// Whether soft deletes of items are tracked on attachment rows.
    pub fn tracks_soft_deletes(&self) -> bool {
        match &self.soft_delete_column {
            Some(column) => self.synced_attributes.contains(column),
            None => false,
        }
    }

    /// Extract the synced attributes from an item snapshot.
    ///
    /// Attributes missing from the snapshot are synced as null.
    pub fn synced_from(&self, item: &ItemSnapshot) -> SyncedAttributes {
        self.synced_attributes
            .iter()
            .map(|name| {
                let value = item.attributes.get(name).cloned().unwrap_or(JsonValue::Null);
                (name.clone(), value)
            })
            .collect()
    }

    /// Whether an attachment row with these synced attributes counts toward
    /// its tag's item count.
    pub fn is_live(&self, synced: &SyncedAttributes) -> bool {
        if !self.tracks_soft_deletes() {
            return true;
        }
        match self.soft_delete_column.as_ref().and_then(|c| synced.get(c)) {
            None | Some(JsonValue::Null) => true,
            Some(_) => false,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Validate a (possibly schema-qualified) SQL identifier.
///
/// Table and column names are interpolated into SQL text, so every part must:
/// - not be empty
/// - not exceed 63 characters (PostgreSQL identifier limit)
/// - start with a letter or underscore
/// - contain only ASCII alphanumerics and underscores
///
/// At most one `.` separating a schema from a table is allowed.
///
/// ```
/// use taggable_core::validate_identifier;
///
/// assert!(validate_identifier("tags").is_ok());
/// assert!(validate_identifier("tenant_a.taggables").is_ok());
/// assert!(validate_identifier("tags; DROP TABLE tags").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(Error::InvalidInput(format!(
            "Identifier '{}' has too many qualifiers",
            name
        )));
    }

    for part in parts {
        if part.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Identifier '{}' contains an empty part",
                name
            )));
        }

        if part.len() > defaults::MAX_IDENTIFIER_LEN {
            return Err(Error::InvalidInput(format!(
                "Identifier part exceeds {} character limit: {} characters",
                defaults::MAX_IDENTIFIER_LEN,
                part.len()
            )));
        }

        if let Some(first) = part.chars().next() {
            if !first.is_ascii_alphabetic() && first != '_' {
                return Err(Error::InvalidInput(format!(
                    "Identifier must start with a letter or underscore, found: '{}'",
                    first
                )));
            }
        }

        for ch in part.chars() {
            if !ch.is_ascii_alphanumeric() && ch != '_' {
                return Err(Error::InvalidInput(format!(
                    "Identifier contains invalid character: '{}'. Only alphanumeric and underscore allowed",
                    ch
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    // Environment variables are process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "TAGGABLE_TAG_TABLE",
            "TAGGABLE_ATTACHMENT_TABLE",
            "TAGGABLE_ITEM_TABLE",
            "TAGGABLE_ITEM_KEY",
            "TAGGABLE_SYNCED_ATTRIBUTES",
            "TAGGABLE_SOFT_DELETE_COLUMN",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = TaggableConfig::default();
        assert_eq!(config.tag_table, "tags");
        assert_eq!(config.attachment_table, "taggables");
        assert!(!config.tracks_soft_deletes());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_soft_deletes_adds_synced_attribute() {
        let config = TaggableConfig::new().soft_deletes("deleted_at");
        assert_eq!(config.synced_attributes, vec!["deleted_at".to_string()]);
        assert!(config.tracks_soft_deletes());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_soft_deletes_column() {
        let config = TaggableConfig::new().default_soft_deletes();
        assert_eq!(config.soft_delete_column.as_deref(), Some("deleted_at"));
        assert!(config.tracks_soft_deletes());
    }

    #[test]
    fn test_soft_delete_column_without_sync_is_inactive() {
        let config = TaggableConfig {
            soft_delete_column: Some("deleted_at".to_string()),
            ..Default::default()
        };
        assert!(!config.tracks_soft_deletes());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_synced_from_fills_missing_with_null() {
        let config = TaggableConfig::new()
            .sync_attribute("status")
            .soft_deletes("deleted_at");
        let item = ItemSnapshot::new(1)
            .with_attribute("status", "draft")
            .with_attribute("title", "ignored");

        let synced = config.synced_from(&item);
        assert_eq!(synced.len(), 2);
        assert_eq!(synced["status"], json!("draft"));
        assert_eq!(synced["deleted_at"], JsonValue::Null);
    }

    #[test]
    fn test_is_live() {
        let config = TaggableConfig::new().soft_deletes("deleted_at");

        let mut synced = SyncedAttributes::new();
        assert!(config.is_live(&synced));

        synced.insert("deleted_at".to_string(), JsonValue::Null);
        assert!(config.is_live(&synced));

        synced.insert("deleted_at".to_string(), json!("2026-01-01T00:00:00Z"));
        assert!(!config.is_live(&synced));

        // Without tracking every row is live.
        assert!(TaggableConfig::default().is_live(&synced));
    }

    #[test]
    fn test_sync_attribute_deduplicates() {
        let config = TaggableConfig::new()
            .sync_attribute("status")
            .sync_attribute("status");
        assert_eq!(config.synced_attributes.len(), 1);
    }

    #[test]
    fn test_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        env::set_var("TAGGABLE_TAG_TABLE", "labels");
        env::set_var("TAGGABLE_SYNCED_ATTRIBUTES", "status, visibility,");
        env::set_var("TAGGABLE_SOFT_DELETE_COLUMN", "removed_at");

        let config = TaggableConfig::from_env();
        assert_eq!(config.tag_table, "labels");
        assert_eq!(config.attachment_table, "taggables");
        assert_eq!(
            config.synced_attributes,
            vec![
                "status".to_string(),
                "visibility".to_string(),
                "removed_at".to_string()
            ]
        );
        assert!(config.tracks_soft_deletes());

        clear_env();
    }

    #[test]
    fn test_from_env_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = TaggableConfig::from_env();
        assert_eq!(config, TaggableConfig::default());
    }

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("tags").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("archive_2026.taggables").is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1tags").is_err());
        assert!(validate_identifier("tags-x").is_err());
        assert!(validate_identifier("a.b.c").is_err());
        assert!(validate_identifier("schema.").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_table() {
        let config = TaggableConfig::new().tag_table("tags; DROP TABLE x");
        match config.validate() {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("invalid character")),
            other => panic!("Expected InvalidInput, got {:?}", other),
        }
    }
}
