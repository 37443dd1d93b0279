use serde::{Deserialize, Serialize};

/// Schemaless table row: system keys plus every other property as JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicEntity {
    #[serde(rename = "PartitionKey", default)]
    pub partition_key: String,
    #[serde(rename = "RowKey", default)]
    pub row_key: String,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl DynamicEntity {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        let value = self.get(name)?;
        // Int64 properties arrive as strings under odata=nometadata.
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|text| text.parse().ok()))
    }
}
