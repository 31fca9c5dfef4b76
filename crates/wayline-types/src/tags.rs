//! Tag index keys for the local (per-bucket) and global tag stores.

use crate::Bucket;

/// Key of the local tag store: `(bucket, key, value)`.
///
/// Local tags are partitioned by the spatial bucket of the way that carries
/// them, so bucket migrations rewrite the local entries.
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
pub struct TagIndexLocal {
    pub bucket: Bucket,
    pub key: String,
    pub value: String,
}

impl TagIndexLocal {
    pub fn new(bucket: Bucket, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            bucket,
            key: key.into(),
            value: value.into(),
        }
    }

    /// The global key this local entry projects to.
    pub fn to_global(&self) -> TagIndexGlobal {
        TagIndexGlobal {
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }
}

/// Key of the global tag store: `(key, value)`, bucket-independent.
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
pub struct TagIndexGlobal {
    pub key: String,
    pub value: String,
}

impl TagIndexGlobal {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_projects_to_global() {
        let local = TagIndexLocal::new(Bucket::new(7), "highway", "primary");
        let global = local.to_global();
        assert_eq!(global, TagIndexGlobal::new("highway", "primary"));
    }
}
