//! Restriction Tags
//!
//! Sorted, de-duplicated tag sets used for offer restrictions and conflict rules.

use std::{cmp::Ordering, ops::BitOr, string::ToString};

use smallvec::SmallVec;

/// A sorted set of free-form restriction tags (e.g. `"new-customers"`, `"app-only"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    tags: SmallVec<[String; 4]>,
}

impl TagSet {
    /// Create a tag set, sorting and removing duplicates.
    #[must_use]
    pub fn new(tags: SmallVec<[String; 4]>) -> Self {
        let mut set = Self { tags };

        set.tags.sort();
        set.tags.dedup();

        set
    }

    /// Create an empty tag set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a tag set from string slices.
    pub fn from_strs(tags: &[&str]) -> Self {
        Self::new(tags.iter().map(ToString::to_string).collect())
    }

    /// Whether the set holds `tag`.
    pub fn contains(&self, tag: &str) -> bool {
        self.tags
            .binary_search_by(|held| held.as_str().cmp(tag))
            .is_ok()
    }

    /// Whether both sets share at least one tag.
    pub fn intersects(&self, other: &Self) -> bool {
        let mut left = self.tags.iter();
        let mut right = other.tags.iter();
        let mut left_tag = left.next();
        let mut right_tag = right.next();

        while let (Some(left_ref), Some(right_ref)) = (left_tag, right_tag) {
            match left_ref.cmp(right_ref) {
                Ordering::Equal => return true,
                Ordering::Less => left_tag = left.next(),
                Ordering::Greater => right_tag = right.next(),
            }
        }

        false
    }

    /// Number of tags in the set.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate over the tags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }
}

impl BitOr for TagSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        let mut merged = SmallVec::with_capacity(self.tags.len().saturating_add(rhs.tags.len()));
        let mut left = self.tags.into_iter().peekable();
        let mut right = rhs.tags.into_iter().peekable();

        while let (Some(left_tag), Some(right_tag)) = (left.peek(), right.peek()) {
            match left_tag.cmp(right_tag) {
                Ordering::Less => merged.extend(left.next()),
                Ordering::Greater => merged.extend(right.next()),
                Ordering::Equal => {
                    merged.extend(left.next());
                    right.next();
                }
            }
        }

        merged.extend(left);
        merged.extend(right);

        Self { tags: merged }
    }
}

impl<'a> FromIterator<&'a str> for TagSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(ToString::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sorts_and_dedups() {
        let tags = TagSet::from_strs(&["web-only", "app-only", "web-only"]);

        assert_eq!(tags.iter().collect::<Vec<_>>(), vec!["app-only", "web-only"]);
    }

    #[test]
    fn contains_uses_sorted_lookup() {
        let tags = TagSet::from_strs(&["members", "clearance"]);

        assert!(tags.contains("members"));
        assert!(!tags.contains("students"));
    }

    #[test]
    fn intersects_detects_shared_tag() {
        let left = TagSet::from_strs(&["a", "c", "e"]);
        let right = TagSet::from_strs(&["b", "e"]);
        let disjoint = TagSet::from_strs(&["x"]);

        assert!(left.intersects(&right));
        assert!(!left.intersects(&disjoint));
        assert!(!TagSet::empty().intersects(&left));
    }

    #[test]
    fn union_merges_without_duplicates() {
        let union = TagSet::from_strs(&["a", "c"]) | TagSet::from_strs(&["b", "c"]);

        assert_eq!(union.len(), 3);
        assert_eq!(union.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
