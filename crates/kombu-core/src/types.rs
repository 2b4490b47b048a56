//! Type tags and the subtype hierarchy
//!
//! TigerStyle: Type identity is an explicit, stable string attached to every
//! stored value. Nothing is derived from reflection at lookup time.
//!
//! A type that should be stored in the registry implements [`Tagged`]. Types
//! that should show up in queries for another type (e.g. `Dog` in a query
//! for `Animal`) are related through a [`TypeHierarchy`].
//!
//! # Example
//!
//! ```rust
//! use kombu_core::{Tagged, TypeHierarchy, TypeTag};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Animal { name: String }
//! impl Tagged for Animal { const TYPE_TAG: &'static str = "zoo.Animal"; }
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Dog { name: String, good: bool }
//! impl Tagged for Dog { const TYPE_TAG: &'static str = "zoo.Dog"; }
//!
//! let mut hierarchy = TypeHierarchy::new();
//! hierarchy.register::<Dog, Animal>().unwrap();
//! assert!(hierarchy.is_assignable(&TypeTag::of::<Dog>(), &TypeTag::of::<Animal>()));
//! ```

use crate::constants::{TYPE_RELATIONS_COUNT_MAX, TYPE_TAG_LENGTH_BYTES_MAX};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

// =============================================================================
// TypeTag
// =============================================================================

/// Stable, string-valued identity of a stored type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(String);

impl TypeTag {
    /// Create a validated type tag
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();

        if tag.is_empty() {
            return Err(Error::InvalidTypeTag {
                tag,
                reason: "type tag cannot be empty".into(),
            });
        }
        if tag.len() > TYPE_TAG_LENGTH_BYTES_MAX {
            return Err(Error::InvalidTypeTag {
                reason: format!(
                    "{} bytes exceeds limit of {} bytes",
                    tag.len(),
                    TYPE_TAG_LENGTH_BYTES_MAX
                ),
                tag,
            });
        }
        if tag.chars().any(char::is_control) {
            return Err(Error::InvalidTypeTag {
                tag,
                reason: "type tag cannot contain control characters".into(),
            });
        }

        Ok(Self(tag))
    }

    /// Tag of a [`Tagged`] type
    pub fn of<T: Tagged>() -> Self {
        debug_assert!(!T::TYPE_TAG.is_empty(), "TYPE_TAG cannot be empty");
        Self(T::TYPE_TAG.to_string())
    }

    /// The tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TypeTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tagged
// =============================================================================

/// A type that can be stored in and enumerated from the registry
///
/// `Clone` backs the owned copy taken before a value is stored; serde carries
/// the value to and from its payload.
pub trait Tagged: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable tag under which values of this type are indexed
    const TYPE_TAG: &'static str;
}

impl Tagged for String {
    const TYPE_TAG: &'static str = "string";
}

impl Tagged for bool {
    const TYPE_TAG: &'static str = "bool";
}

impl Tagged for i32 {
    const TYPE_TAG: &'static str = "i32";
}

impl Tagged for i64 {
    const TYPE_TAG: &'static str = "i64";
}

impl Tagged for u32 {
    const TYPE_TAG: &'static str = "u32";
}

impl Tagged for u64 {
    const TYPE_TAG: &'static str = "u64";
}

impl Tagged for f64 {
    const TYPE_TAG: &'static str = "f64";
}

// =============================================================================
// TypeHierarchy
// =============================================================================

/// Explicit subtype relation between type tags
///
/// The relation is transitive and acyclic. A value tagged `S` is assignable
/// to `T` when `S == T` or `S` is a (transitive) registered subtype of `T`.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    /// subtype -> direct supertypes
    parents: HashMap<TypeTag, BTreeSet<TypeTag>>,
    /// supertype -> direct subtypes
    children: HashMap<TypeTag, BTreeSet<TypeTag>>,
    /// Number of direct relations registered
    relations_count: usize,
}

impl TypeHierarchy {
    /// Create an empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subtype <: supertype`
    ///
    /// Registering an existing relation again is a no-op.
    pub fn register_subtype(&mut self, subtype: TypeTag, supertype: TypeTag) -> Result<()> {
        if subtype == supertype {
            return Err(Error::InvalidTypeRelation {
                subtype: subtype.to_string(),
                supertype: supertype.to_string(),
                reason: "a type cannot be its own subtype".into(),
            });
        }
        if self.is_assignable(&supertype, &subtype) {
            return Err(Error::InvalidTypeRelation {
                subtype: subtype.to_string(),
                supertype: supertype.to_string(),
                reason: "relation would create a cycle".into(),
            });
        }
        if self.relations_count >= TYPE_RELATIONS_COUNT_MAX {
            return Err(Error::InvalidTypeRelation {
                subtype: subtype.to_string(),
                supertype: supertype.to_string(),
                reason: format!("more than {} relations", TYPE_RELATIONS_COUNT_MAX),
            });
        }

        let inserted = self
            .parents
            .entry(subtype.clone())
            .or_default()
            .insert(supertype.clone());
        self.children.entry(supertype).or_default().insert(subtype);

        if inserted {
            self.relations_count += 1;
        }

        // Postcondition
        debug_assert!(self.relations_count <= TYPE_RELATIONS_COUNT_MAX);
        Ok(())
    }

    /// Register `Sub <: Super` for two [`Tagged`] types
    pub fn register<Sub: Tagged, Super: Tagged>(&mut self) -> Result<()> {
        self.register_subtype(TypeTag::of::<Sub>(), TypeTag::of::<Super>())
    }

    /// Whether a value tagged `actual` may be returned for a `requested` query
    pub fn is_assignable(&self, actual: &TypeTag, requested: &TypeTag) -> bool {
        actual == requested || Self::reachable(&self.parents, actual).contains(requested)
    }

    /// All transitive supertypes of `tag` (excluding `tag`)
    pub fn ancestors(&self, tag: &TypeTag) -> BTreeSet<TypeTag> {
        Self::reachable(&self.parents, tag)
    }

    /// All transitive subtypes of `tag` (excluding `tag`)
    pub fn descendants(&self, tag: &TypeTag) -> BTreeSet<TypeTag> {
        Self::reachable(&self.children, tag)
    }

    /// Number of direct relations registered
    pub fn relations_count(&self) -> usize {
        self.relations_count
    }

    /// Breadth-first walk over `edges` from `start` (bounded iteration, no recursion)
    fn reachable(edges: &HashMap<TypeTag, BTreeSet<TypeTag>>, start: &TypeTag) -> BTreeSet<TypeTag> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&TypeTag> = VecDeque::new();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            if let Some(next) = edges.get(current) {
                for tag in next {
                    if tag != start && seen.insert(tag.clone()) {
                        queue.push_back(tag);
                    }
                }
            }
        }

        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> TypeTag {
        TypeTag::new(s).unwrap()
    }

    #[test]
    fn test_type_tag_validation() {
        assert!(TypeTag::new("com.example.Widget").is_ok());
        assert!(TypeTag::new("Outer$Inner").is_ok());
        assert!(TypeTag::new("").is_err());
        assert!(TypeTag::new("bad\ntag").is_err());
        assert!(TypeTag::new("x".repeat(TYPE_TAG_LENGTH_BYTES_MAX + 1)).is_err());
    }

    #[test]
    fn test_builtin_tags() {
        assert_eq!(TypeTag::of::<String>().as_str(), "string");
        assert_eq!(TypeTag::of::<i64>().as_str(), "i64");
    }

    #[test]
    fn test_assignable_is_reflexive_and_transitive() {
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.register_subtype(tag("Puppy"), tag("Dog")).unwrap();
        hierarchy.register_subtype(tag("Dog"), tag("Animal")).unwrap();

        assert!(hierarchy.is_assignable(&tag("Dog"), &tag("Dog")));
        assert!(hierarchy.is_assignable(&tag("Puppy"), &tag("Animal")));
        assert!(!hierarchy.is_assignable(&tag("Animal"), &tag("Dog")));
        assert!(!hierarchy.is_assignable(&tag("Cat"), &tag("Animal")));
    }

    #[test]
    fn test_descendants_and_ancestors() {
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.register_subtype(tag("Dog"), tag("Animal")).unwrap();
        hierarchy.register_subtype(tag("Cat"), tag("Animal")).unwrap();
        hierarchy.register_subtype(tag("Puppy"), tag("Dog")).unwrap();

        let descendants: Vec<_> = hierarchy
            .descendants(&tag("Animal"))
            .into_iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(descendants, vec!["Cat", "Dog", "Puppy"]);

        let ancestors = hierarchy.ancestors(&tag("Puppy"));
        assert_eq!(ancestors.len(), 2);
        assert!(hierarchy.descendants(&tag("Puppy")).is_empty());
    }

    #[test]
    fn test_rejects_self_and_cycles() {
        let mut hierarchy = TypeHierarchy::new();
        assert!(hierarchy.register_subtype(tag("A"), tag("A")).is_err());

        hierarchy.register_subtype(tag("A"), tag("B")).unwrap();
        hierarchy.register_subtype(tag("B"), tag("C")).unwrap();
        let err = hierarchy.register_subtype(tag("C"), tag("A")).unwrap_err();
        assert!(matches!(err, Error::InvalidTypeRelation { .. }));
    }

    #[test]
    fn test_duplicate_relation_counted_once() {
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.register::<i32, i64>().unwrap();
        hierarchy.register::<i32, i64>().unwrap();
        assert_eq!(hierarchy.relations_count(), 1);
    }
}
