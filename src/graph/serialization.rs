//! # Graph Serialization Helpers
//!
//! A graph's maps (nodes, initials, subgraphs) are written as lists of
//! `[key, value]` pairs rather than JSON objects, since initials are keyed by
//! port references that are not strings. The [`pairs`] module plugs that
//! representation into serde with `#[serde(with = "pairs")]`.

/// Serde adapter writing a map as a sequence of `[key, value]` pairs.
///
/// # Example
///
/// ```rust
/// use portflow::graph::pairs;
/// use serde::{Deserialize, Serialize};
/// use std::collections::BTreeMap;
///
/// #[derive(Serialize, Deserialize)]
/// struct Table {
///   #[serde(with = "pairs")]
///   rows: BTreeMap<u32, String>,
/// }
///
/// let table = Table { rows: BTreeMap::from([(1, "one".to_string())]) };
/// let json = serde_json::to_string(&table).unwrap();
/// assert_eq!(json, r#"{"rows":[[1,"one"]]}"#);
/// ```
pub mod pairs {
  use serde::{Deserialize, Deserializer, Serialize, Serializer};
  use std::collections::BTreeMap;

  /// Writes `map` as `[[key, value], ...]`, in key order.
  pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
  where
    K: Serialize,
    V: Serialize,
    S: Serializer,
  {
    serializer.collect_seq(map.iter())
  }

  /// Reads `[[key, value], ...]`; a repeated key keeps its last value.
  pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
  where
    K: Deserialize<'de> + Ord,
    V: Deserialize<'de>,
    D: Deserializer<'de>,
  {
    let entries = Vec::<(K, V)>::deserialize(deserializer)?;
    Ok(entries.into_iter().collect())
  }
}
