//! Network catalog declared by an environment specification

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Catalog category a network is declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkCategory {
    /// Shared by name across every instance
    Unique,
    /// Realized once per folder instance under a derived name
    Generic,
    /// Infrastructure networks realized on the host before mastering
    Base,
}

impl NetworkCategory {
    pub const ALL: [NetworkCategory; 3] = [
        NetworkCategory::Unique,
        NetworkCategory::Generic,
        NetworkCategory::Base,
    ];

    /// Key used for this category in specification files
    pub fn spec_key(&self) -> &'static str {
        match self {
            NetworkCategory::Unique => "unique-networks",
            NetworkCategory::Generic => "generic-networks",
            NetworkCategory::Base => "base-networks",
        }
    }
}

impl fmt::Display for NetworkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec_key())
    }
}

/// Per-network settings; both fields fall back to engine defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub vlan: Option<u16>,
    pub vswitch: Option<String>,
    pub description: Option<String>,
}

/// `category -> name -> config`, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkCatalog {
    #[serde(
        rename = "unique-networks",
        alias = "unique",
        default,
        deserialize_with = "nullable_entries"
    )]
    pub unique: IndexMap<String, NetworkConfig>,

    #[serde(
        rename = "generic-networks",
        alias = "generic",
        default,
        deserialize_with = "nullable_entries"
    )]
    pub generic: IndexMap<String, NetworkConfig>,

    #[serde(
        rename = "base-networks",
        alias = "base",
        default,
        deserialize_with = "nullable_entries"
    )]
    pub base: IndexMap<String, NetworkConfig>,
}

/// Accept `name:` with no body as a network with default settings
fn nullable_entries<'de, D>(deserializer: D) -> Result<IndexMap<String, NetworkConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<IndexMap<String, Option<NetworkConfig>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, config)| (name, config.unwrap_or_default()))
        .collect())
}

impl NetworkCatalog {
    pub fn entries(&self, category: NetworkCategory) -> &IndexMap<String, NetworkConfig> {
        match category {
            NetworkCategory::Unique => &self.unique,
            NetworkCategory::Generic => &self.generic,
            NetworkCategory::Base => &self.base,
        }
    }

    /// Find the category a network name is declared in
    pub fn category_of(&self, name: &str) -> Option<NetworkCategory> {
        NetworkCategory::ALL
            .into_iter()
            .find(|category| self.entries(*category).contains_key(name))
    }

    pub fn get(&self, category: NetworkCategory, name: &str) -> Option<&NetworkConfig> {
        self.entries(category).get(name)
    }

    /// VLAN tags pinned explicitly anywhere in the catalog
    pub fn declared_vlans(&self) -> impl Iterator<Item = u16> + '_ {
        NetworkCategory::ALL
            .into_iter()
            .flat_map(move |category| self.entries(category).values())
            .filter_map(|config| config.vlan)
    }

    pub fn len(&self) -> usize {
        self.unique.len() + self.generic.len() + self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
unique-networks:
  internet:
    vlan: 10
generic-networks:
  team-lan:
base:
  mgmt:
    vswitch: vSwitch1
"#;

    #[test]
    fn test_parse_catalog_with_aliases_and_empty_bodies() {
        let catalog: NetworkCatalog = serde_yaml::from_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get(NetworkCategory::Unique, "internet").unwrap().vlan, Some(10));
        assert_eq!(
            catalog.get(NetworkCategory::Generic, "team-lan"),
            Some(&NetworkConfig::default())
        );
        assert_eq!(
            catalog.get(NetworkCategory::Base, "mgmt").unwrap().vswitch.as_deref(),
            Some("vSwitch1")
        );
    }

    #[test]
    fn test_category_lookup() {
        let catalog: NetworkCatalog = serde_yaml::from_str(CATALOG).unwrap();
        assert_eq!(catalog.category_of("internet"), Some(NetworkCategory::Unique));
        assert_eq!(catalog.category_of("team-lan"), Some(NetworkCategory::Generic));
        assert_eq!(catalog.category_of("mgmt"), Some(NetworkCategory::Base));
        assert_eq!(catalog.category_of("Team-Lan"), None);
    }

    #[test]
    fn test_declared_vlans() {
        let catalog: NetworkCatalog = serde_yaml::from_str(CATALOG).unwrap();
        assert_eq!(catalog.declared_vlans().collect::<Vec<_>>(), vec![10]);
    }
}
