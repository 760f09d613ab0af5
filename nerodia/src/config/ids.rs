//! Chat ids appear as numbers or strings in YAML; both become strings.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl From<RawId> for String {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

pub fn id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

pub fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer).map(|id| id.map(String::from))
}

pub fn id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<RawId>::deserialize(deserializer).map(|ids| ids.into_iter().map(String::from).collect())
}
