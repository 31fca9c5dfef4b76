//! Authorship metadata for way versions.

use crate::{Timestamp, WayId};

/// Version, timestamp, changeset and author of one way version.
///
/// Ordered by `(id, timestamp, version)` so per-bucket sets list an id's
/// versions in time order.
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
pub struct MetaRecord {
    pub id: WayId,
    pub timestamp: Timestamp,
    pub version: u32,
    pub changeset: u64,
    pub user_id: u32,
}

impl MetaRecord {
    pub const fn new(
        id: WayId,
        version: u32,
        timestamp: Timestamp,
        changeset: u64,
        user_id: u32,
    ) -> Self {
        Self {
            id,
            timestamp,
            version,
            changeset,
            user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_id_then_time() {
        let a = MetaRecord::new(WayId::new(1), 2, Timestamp::new(100), 5, 9);
        let b = MetaRecord::new(WayId::new(1), 3, Timestamp::new(200), 6, 9);
        let c = MetaRecord::new(WayId::new(2), 1, Timestamp::new(50), 7, 9);
        assert!(a < b);
        assert!(b < c);
    }
}
