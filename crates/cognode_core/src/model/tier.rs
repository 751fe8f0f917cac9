//! Ten-level hierarchy tiers.
//!
//! # Responsibility
//! - Define the fixed, ordered tier set every node belongs to.
//! - Map tiers to their symbolic names and numeric ordinals.
//!
//! # Invariants
//! - Level 1 is the root-most tier, level 10 the leaf-most.
//! - A node's parent always sits exactly one level above it.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Hierarchy level of a cognitive node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Level 1: top-level knowledge domain.
    Domain,
    /// Level 2.
    Field,
    /// Level 3.
    Discipline,
    /// Level 4.
    Subject,
    /// Level 5.
    Topic,
    /// Level 6.
    Concept,
    /// Level 7.
    Principle,
    /// Level 8.
    Pattern,
    /// Level 9.
    Component,
    /// Level 10: leaf-level element.
    Element,
}

impl Tier {
    /// All tiers, root-most first.
    pub const ALL: [Tier; 10] = [
        Tier::Domain,
        Tier::Field,
        Tier::Discipline,
        Tier::Subject,
        Tier::Topic,
        Tier::Concept,
        Tier::Principle,
        Tier::Pattern,
        Tier::Component,
        Tier::Element,
    ];

    /// Root-most tier.
    pub const ROOT: Tier = Tier::Domain;

    /// Returns the numeric ordinal in `1..=10`.
    pub fn level(self) -> u8 {
        match self {
            Self::Domain => 1,
            Self::Field => 2,
            Self::Discipline => 3,
            Self::Subject => 4,
            Self::Topic => 5,
            Self::Concept => 6,
            Self::Principle => 7,
            Self::Pattern => 8,
            Self::Component => 9,
            Self::Element => 10,
        }
    }

    /// Resolves a tier from its numeric ordinal.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1..=10 => Some(Self::ALL[usize::from(level - 1)]),
            _ => None,
        }
    }

    /// Symbolic name used in persisted records.
    pub fn name(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Field => "field",
            Self::Discipline => "discipline",
            Self::Subject => "subject",
            Self::Topic => "topic",
            Self::Concept => "concept",
            Self::Principle => "principle",
            Self::Pattern => "pattern",
            Self::Component => "component",
            Self::Element => "element",
        }
    }

    /// Parses a symbolic name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tier| tier.name() == normalized.as_str())
    }

    /// Tier a parent of this tier must have. `None` for the root tier.
    pub fn parent_tier(self) -> Option<Self> {
        Self::from_level(self.level().checked_sub(1)?)
    }

    /// Tier of this tier's children. `None` for the leaf tier.
    pub fn child_tier(self) -> Option<Self> {
        Self::from_level(self.level() + 1)
    }

    /// Whether nodes of this tier must not have a parent.
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.level())
    }
}
