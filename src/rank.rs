//! Process ranks and message tags.
//!
//! Both are plain integers on the wire. The newtypes keep a rank from being
//! passed where a tag is expected, and give the negative sentinels
//! (`MPI_ANY_SOURCE`, `MPI_ROOT`, `MPI_PROC_NULL`, `MPI_ANY_TAG`) names. The
//! sentinel values are read from the native library, never hardcoded.

use std::fmt;

use crate::constants;

/// Identity of a process within a communicator or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(i32);

impl Rank {
    /// Wrap a raw rank value.
    pub const fn new(rank: i32) -> Self {
        Rank(rank)
    }

    /// The raw rank value.
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Matches a message from any sender (`MPI_ANY_SOURCE`).
    pub fn any_source() -> Self {
        Rank(constants::native().any_source)
    }

    /// Marks the root in an inter-communicator collective (`MPI_ROOT`).
    pub fn root() -> Self {
        Rank(constants::native().root)
    }

    /// A null peer; communication with it completes immediately (`MPI_PROC_NULL`).
    pub fn proc_null() -> Self {
        Rank(constants::native().proc_null)
    }

    /// Whether this is one of the sentinel values rather than a real rank.
    pub fn is_sentinel(self) -> bool {
        let c = constants::native();
        self.0 == c.any_source || self.0 == c.root || self.0 == c.proc_null
    }
}

impl From<i32> for Rank {
    fn from(rank: i32) -> Self {
        Rank(rank)
    }
}

impl From<Rank> for i32 {
    fn from(rank: Rank) -> Self {
        rank.0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message-matching label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(i32);

impl Tag {
    /// Wrap a raw tag value.
    pub const fn new(tag: i32) -> Self {
        Tag(tag)
    }

    /// The raw tag value.
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Matches a message with any tag (`MPI_ANY_TAG`).
    pub fn any() -> Self {
        Tag(constants::native().any_tag)
    }
}

impl From<i32> for Tag {
    fn from(tag: i32) -> Self {
        Tag(tag)
    }
}

impl From<Tag> for i32 {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_round_trip() {
        for raw in [i32::MIN, -3, -2, -1, 0, 1, 17, i32::MAX] {
            assert_eq!(i32::from(Rank::from(raw)), raw);
            assert_eq!(Rank::new(raw).get(), raw);
        }
    }

    #[test]
    fn tag_round_trip() {
        for raw in [i32::MIN, -1, 0, 1, 42, 32_767, i32::MAX] {
            assert_eq!(i32::from(Tag::from(raw)), raw);
            assert_eq!(Tag::new(raw).get(), raw);
        }
    }

    #[test]
    fn sentinels_match_native_table() {
        let c = constants::native();
        assert_eq!(Rank::any_source().get(), c.any_source);
        assert_eq!(Rank::root().get(), c.root);
        assert_eq!(Rank::proc_null().get(), c.proc_null);
        assert_eq!(Tag::any().get(), c.any_tag);
    }

    #[test]
    fn sentinels_are_idempotent() {
        assert_eq!(Rank::any_source(), Rank::any_source());
        assert_eq!(Tag::any(), Tag::any());
    }

    #[test]
    fn sentinel_detection() {
        assert!(Rank::any_source().is_sentinel());
        assert!(Rank::proc_null().is_sentinel());
        assert!(!Rank::new(0).is_sentinel());
        assert!(!Rank::new(5).is_sentinel());
    }

    #[test]
    fn display_shows_raw_value() {
        assert_eq!(Rank::new(3).to_string(), "3");
        assert_eq!(Tag::new(99).to_string(), "99");
    }
}
