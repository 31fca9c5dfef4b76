pub mod delta;
pub mod meta;
pub mod skeleton;
pub mod tags;

pub use delta::{DeltaError, WayDelta};
pub use meta::MetaRecord;
pub use skeleton::{NodeSnapshot, WaySkeleton};
pub use tags::{TagIndexGlobal, TagIndexLocal};

use std::fmt;

/// A way identifier.
///
/// 64-bit, globally unique. Id 0 is reserved for the empty skeleton and never
/// refers to a real way.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct WayId(u64);

impl WayId {
    /// The reserved zero id of the empty skeleton.
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node identifier.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct NodeId(u64);

impl NodeId {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Seconds since epoch, with `NOW` as the "still current" sentinel.
///
/// `NOW` is the maximum 64-bit value and orders strictly after every real
/// timestamp, so time-sorted collections keep the current entry last.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Sentinel for "current, not yet superseded".
    pub const NOW: Self = Self(u64::MAX);

    /// The zero timestamp, before any real edit.
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(seconds: u64) -> Self {
        Self(seconds)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_now(self) -> bool {
        self.0 == u64::MAX
    }

    /// The next representable instant. Saturates at `NOW`.
    #[inline]
    pub const fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_now() {
            f.write_str("now")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A spatial-index cell identifier for way storage.
///
/// Three reserved values are part of the external contract, bit-exact:
/// `0x00000000` "deleted", `0x000000fe` "no live bucket", `0x000000ff`
/// "unknown, recompute from current node positions".
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Bucket(u32);

impl Bucket {
    /// The way has no geometry; it is deleted.
    pub const DELETED: Self = Self(0);

    /// Placeholder suppressing undelete records for never-placed ways.
    pub const NO_LIVE: Self = Self(0xfe);

    /// The bucket must be recomputed from current node positions.
    pub const UNKNOWN: Self = Self(0xff);

    #[inline]
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    #[inline]
    pub const fn val(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_deleted(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_no_live(self) -> bool {
        self.0 == 0xfe
    }

    #[inline]
    pub const fn is_unknown(self) -> bool {
        self.0 == 0xff
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A materialized point: the node's spatial cell plus the within-cell offset.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Coord {
    /// The spatial cell containing the point.
    pub cell: u32,
    /// The offset of the point within its cell.
    pub offset: u32,
}

impl Coord {
    pub const ZERO: Self = Self { cell: 0, offset: 0 };

    #[inline]
    pub const fn new(cell: u32, offset: u32) -> Self {
        Self { cell, offset }
    }
}

/// A value stamped with the moment it ceased to be current.
///
/// An element is valid during the half-open interval ending at `timestamp`;
/// the current version of an object carries [`Timestamp::NOW`].
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Attic<T> {
    pub elem: T,
    pub timestamp: Timestamp,
}

impl<T> Attic<T> {
    #[inline]
    pub const fn new(elem: T, timestamp: Timestamp) -> Self {
        Self { elem, timestamp }
    }
}
