//! Cache keys for gateway queries.

use sha2::{Digest, Sha256};

use crate::cache::QueryKey;

pub const PEOPLE: &str = "people";
pub const WEAPONS: &str = "weapons";
pub const GALLERY: &str = "gallery";
pub const DAMAGE: &str = "damage";

/// Every namespace holding gateway data (auth tokens live elsewhere).
pub const DATA_NAMESPACES: [&str; 4] = [PEOPLE, WEAPONS, GALLERY, DAMAGE];

/// Query key types for gateway calls.
#[derive(Clone, Debug)]
pub enum GatewayQueryKey {
  /// All people
  People,
  /// All person names
  PeopleNames,
  /// All weapons
  Weapons,
  /// Weapons belonging to one owner
  WeaponsByOwner { owner: String },
  /// All gallery images
  Gallery,
  /// Computed damage for a character
  Damage { name: String },
}

impl QueryKey for GatewayQueryKey {
  fn namespace(&self) -> &'static str {
    match self {
      Self::People | Self::PeopleNames => PEOPLE,
      Self::Weapons | Self::WeaponsByOwner { .. } => WEAPONS,
      Self::Gallery => GALLERY,
      Self::Damage { .. } => DAMAGE,
    }
  }

  fn cache_hash(&self) -> String {
    let input = match self {
      Self::People => "people:all".to_string(),
      Self::PeopleNames => "people:names".to_string(),
      Self::Weapons => "weapons:all".to_string(),
      Self::WeaponsByOwner { owner } => format!("weapons:owner:{}", owner),
      Self::Gallery => "gallery:all".to_string(),
      Self::Damage { name } => format!("damage:{}", name),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::People => "all people".to_string(),
      Self::PeopleNames => "people names".to_string(),
      Self::Weapons => "all weapons".to_string(),
      Self::WeaponsByOwner { owner } => format!("weapons owned by {}", owner),
      Self::Gallery => "gallery images".to_string(),
      Self::Damage { name } => format!("damage for {}", name),
    }
  }
}
