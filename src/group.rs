//! Process groups.
//!
//! A [`Group`] is an ordered set of processes, obtained from a communicator
//! with [`Communicator::group`](crate::Communicator::group) and combined with
//! the set operations below. Groups are local objects: none of these calls
//! communicate.
//!
//! A [`Group`] owns its native object and releases it with [`Group::free`]
//! or on drop. The predefined empty and null groups are never freed.

use std::mem;
use std::os::raw::c_int;

use crate::constants;
use crate::error::{Error, Result};
use crate::ffi;
use crate::rank::Rank;

/// Result of comparing two groups or two communicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    /// The very same object (`MPI_IDENT`).
    Identical,
    /// Same members in the same order, different context (`MPI_CONGRUENT`).
    Congruent,
    /// Same members in a different order (`MPI_SIMILAR`).
    Similar,
    /// Anything else (`MPI_UNEQUAL`).
    Unequal,
}

impl Comparison {
    const ALL: [Comparison; ffi::NUM_COMPARISONS] = [
        Comparison::Identical,
        Comparison::Congruent,
        Comparison::Similar,
        Comparison::Unequal,
    ];

    pub(crate) fn from_raw(raw: c_int) -> Result<Self> {
        constants::native()
            .comparisons
            .iter()
            .position(|&c| c == raw)
            .map(|i| Self::ALL[i])
            .ok_or_else(|| Error::Internal(format!("unknown comparison result {raw}")))
    }
}

/// Handle to an MPI group.
#[derive(Debug, PartialEq, Eq)]
pub struct Group {
    raw: ffi::MPI_Group,
}

unsafe impl Send for Group {}
unsafe impl Sync for Group {}

fn raw_ranks(ranks: &[Rank]) -> Vec<c_int> {
    ranks.iter().map(|r| r.get()).collect()
}

impl Group {
    pub(crate) fn from_raw(raw: ffi::MPI_Group) -> Self {
        Group { raw }
    }

    pub(crate) fn as_raw(&self) -> ffi::MPI_Group {
        self.raw
    }

    /// `MPI_GROUP_EMPTY`.
    pub fn empty() -> Self {
        Group::from_raw(constants::native().group_empty)
    }

    /// `MPI_GROUP_NULL`.
    pub fn null() -> Self {
        Group::from_raw(constants::native().group_null)
    }

    /// Whether this is `MPI_GROUP_NULL`.
    pub fn is_null(&self) -> bool {
        self.raw == constants::native().group_null
    }

    /// Number of processes in the group.
    pub fn size(&self) -> Result<i32> {
        let mut size: c_int = 0;
        let ret = unsafe { ffi::MPI_Group_size(self.raw, &mut size) };
        Error::check(ret)?;
        Ok(size)
    }

    /// Rank of the calling process in the group, or `None` if it is not a
    /// member.
    pub fn rank(&self) -> Result<Option<Rank>> {
        let mut rank: c_int = 0;
        let ret = unsafe { ffi::MPI_Group_rank(self.raw, &mut rank) };
        Error::check(ret)?;
        if rank == constants::undefined() {
            Ok(None)
        } else {
            Ok(Some(Rank::new(rank)))
        }
    }

    fn combine(
        &self,
        other: &Group,
        f: unsafe extern "C" fn(ffi::MPI_Group, ffi::MPI_Group, *mut ffi::MPI_Group) -> c_int,
    ) -> Result<Group> {
        let mut raw = constants::native().group_null;
        let ret = unsafe { f(self.raw, other.raw, &mut raw) };
        Error::check(ret)?;
        Ok(Group::from_raw(raw))
    }

    /// Members of `self` followed by the members of `other` not in `self`.
    pub fn union(&self, other: &Group) -> Result<Group> {
        self.combine(other, ffi::MPI_Group_union)
    }

    /// Members of `self` that are also in `other`, in `self`'s order.
    pub fn intersection(&self, other: &Group) -> Result<Group> {
        self.combine(other, ffi::MPI_Group_intersection)
    }

    /// Members of `self` that are not in `other`, in `self`'s order.
    pub fn difference(&self, other: &Group) -> Result<Group> {
        self.combine(other, ffi::MPI_Group_difference)
    }

    /// New group made of the listed members, in the listed order.
    pub fn include(&self, ranks: &[Rank]) -> Result<Group> {
        let n = Error::count(ranks.len())?;
        let ranks = raw_ranks(ranks);
        let mut raw = constants::native().group_null;
        let ret = unsafe { ffi::MPI_Group_incl(self.raw, n, ranks.as_ptr(), &mut raw) };
        Error::check(ret)?;
        Ok(Group::from_raw(raw))
    }

    /// New group without the listed members.
    pub fn exclude(&self, ranks: &[Rank]) -> Result<Group> {
        let n = Error::count(ranks.len())?;
        let ranks = raw_ranks(ranks);
        let mut raw = constants::native().group_null;
        let ret = unsafe { ffi::MPI_Group_excl(self.raw, n, ranks.as_ptr(), &mut raw) };
        Error::check(ret)?;
        Ok(Group::from_raw(raw))
    }

    /// Map ranks in this group to the corresponding ranks in `other`.
    ///
    /// Processes that are not members of `other` map to `None`.
    pub fn translate_ranks(&self, ranks: &[Rank], other: &Group) -> Result<Vec<Option<Rank>>> {
        let n = Error::count(ranks.len())?;
        let ranks = raw_ranks(ranks);
        let mut translated: Vec<c_int> = vec![0; ranks.len()];
        let ret = unsafe {
            ffi::MPI_Group_translate_ranks(
                self.raw,
                n,
                ranks.as_ptr(),
                other.raw,
                translated.as_mut_ptr(),
            )
        };
        Error::check(ret)?;
        let undefined = constants::undefined();
        Ok(translated
            .into_iter()
            .map(|r| (r != undefined).then_some(Rank::new(r)))
            .collect())
    }

    /// Compare membership and order with another group.
    ///
    /// Groups never compare as [`Comparison::Congruent`].
    pub fn compare(&self, other: &Group) -> Result<Comparison> {
        let mut result: c_int = 0;
        let ret = unsafe { ffi::MPI_Group_compare(self.raw, other.raw, &mut result) };
        Error::check(ret)?;
        Comparison::from_raw(result)
    }

    /// Release the group.
    ///
    /// Freeing the predefined empty or null group is a no-op.
    pub fn free(mut self) -> Result<()> {
        self.release()
    }

    fn is_predefined(&self) -> bool {
        let c = constants::native();
        self.raw == c.group_empty || self.raw == c.group_null
    }

    fn release(&mut self) -> Result<()> {
        if self.is_predefined() {
            return Ok(());
        }
        let mut raw = mem::replace(&mut self.raw, constants::native().group_null);
        let ret = unsafe { ffi::MPI_Group_free(&mut raw) };
        Error::check(ret)
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        if self.is_predefined() || crate::Mpi::is_finalized().unwrap_or(true) {
            return;
        }
        if let Err(err) = self.release() {
            log::warn!("failed to free group: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_mapping_uses_native_values() {
        let c = constants::native();
        for (i, expected) in Comparison::ALL.iter().enumerate() {
            assert_eq!(Comparison::from_raw(c.comparisons[i]).unwrap(), *expected);
        }
    }

    #[test]
    fn unknown_comparison_is_internal_error() {
        let c = constants::native();
        let bogus = (i32::MIN..)
            .find(|v| !c.comparisons.contains(v))
            .unwrap();
        assert!(matches!(Comparison::from_raw(bogus), Err(Error::Internal(_))));
    }

    #[test]
    fn empty_and_null_groups_differ() {
        assert_ne!(Group::empty(), Group::null());
        assert!(Group::null().is_null());
        assert!(!Group::empty().is_null());
    }

    #[test]
    fn freeing_empty_group_is_noop() {
        assert!(Group::empty().free().is_ok());
        assert!(Group::null().free().is_ok());
    }

    #[test]
    fn released_group_becomes_null() {
        let mut group = Group::empty();
        group.release().unwrap();
        assert!(!group.is_null());
        let mut null = Group::null();
        null.release().unwrap();
        assert!(null.is_null());
    }

    #[test]
    fn rank_conversion_preserves_order() {
        let ranks = [Rank::new(3), Rank::new(0), Rank::new(2)];
        assert_eq!(raw_ranks(&ranks), vec![3, 0, 2]);
    }
}
