use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Statistical summary of one uploaded equipment table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_records: u64,
    pub avg_flowrate: Option<f64>,
    pub avg_pressure: Option<f64>,
    pub avg_temperature: Option<f64>,
    #[serde(default)]
    pub type_distribution: TypeDistribution,
}

/// Category label counts, iterated in first-seen order.
///
/// Serialized as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDistribution {
    entries: Vec<(String, u64)>,
}

impl TypeDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `label`, appending it if unseen.
    pub fn increment(&mut self, label: &str) {
        match self.entries.iter_mut().find(|(existing, _)| existing == label) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((label.to_string(), 1)),
        }
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, count)| *count)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.entries.iter().map(|(label, count)| (label.as_str(), *count))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, count)| count).sum()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for TypeDistribution {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut distribution = TypeDistribution::new();
        for (label, count) in iter {
            let label = label.into();
            match distribution.entries.iter_mut().find(|(existing, _)| *existing == label) {
                Some((_, existing)) => *existing += count,
                None => distribution.entries.push((label, count)),
            }
        }
        distribution
    }
}

impl Serialize for TypeDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, count) in &self.entries {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TypeDistribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = TypeDistribution;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of category label to count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, u64)> = Vec::new();
                while let Some((label, count)) = access.next_entry::<String, u64>()? {
                    entries.push((label, count));
                }
                Ok(entries.into_iter().collect())
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_keeps_first_seen_order() {
        let mut distribution = TypeDistribution::new();
        for label in ["Valve", "Pump", "Valve", "Reactor", "Pump", "Valve"] {
            distribution.increment(label);
        }

        let entries: Vec<_> = distribution.iter().collect();
        assert_eq!(entries, vec![("Valve", 3), ("Pump", 2), ("Reactor", 1)]);
        assert_eq!(distribution.total(), 6);
    }

    #[test]
    fn test_json_keeps_key_order() {
        let distribution: TypeDistribution =
            vec![("Valve", 1u64), ("Compressor", 4), ("Pump", 2)].into_iter().collect();

        let json = serde_json::to_string(&distribution).unwrap();
        assert_eq!(json, r#"{"Valve":1,"Compressor":4,"Pump":2}"#);

        let parsed: TypeDistribution = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, distribution);
    }

    #[test]
    fn test_summary_absent_averages_serialize_as_null() {
        let summary = Summary {
            total_records: 2,
            ..Summary::default()
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value["avg_flowrate"].is_null());
        assert_eq!(value["type_distribution"], serde_json::json!({}));
    }
}
