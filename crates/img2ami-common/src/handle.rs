//! Typed EC2 resource identifiers
//!
//! EC2 ids have the shape `<prefix>-<hex>` where the hex suffix is either
//! 8 characters (older resources) or 17 characters. Every id img2ami gets
//! back from a creation call is parsed into one of the newtypes below before
//! it is stored or acted on, so a malformed or empty id surfaces as a
//! creation failure instead of a handle to operate on.

use crate::resource_kind::ResourceKind;
use serde::Serialize;
use thiserror::Error;

/// Hex suffix lengths EC2 uses for resource ids
const SUFFIX_LENGTHS: [usize; 2] = [8, 17];

/// An id that does not match the shape EC2 uses for its kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {kind} id: '{id}'")]
pub struct InvalidHandle {
    pub kind: ResourceKind,
    pub id: String,
}

/// Check whether `id` is a well-formed EC2 id of the given kind.
///
/// Valid ids are the kind's prefix, a dash, then exactly 8 or 17
/// lowercase hex characters.
///
/// ```
/// use img2ami_common::{ResourceKind, validate};
///
/// assert!(validate(ResourceKind::Instance, "i-0a1b2c3d"));
/// assert!(!validate(ResourceKind::Instance, "i-XYZ"));
/// assert!(!validate(ResourceKind::Instance, ""));
/// ```
pub fn validate(kind: ResourceKind, id: &str) -> bool {
    let Some(suffix) = id
        .strip_prefix(kind.prefix())
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };

    SUFFIX_LENGTHS.contains(&suffix.len())
        && suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Common behavior of the typed resource ids
pub trait ResourceHandle: Sized {
    /// The kind of resource this id refers to
    const KIND: ResourceKind;

    /// Parse and validate a raw id
    fn parse(id: impl Into<String>) -> Result<Self, InvalidHandle>;

    /// The raw id string
    fn as_str(&self) -> &str;

    /// Resource kind of this handle
    fn kind(&self) -> ResourceKind {
        Self::KIND
    }
}

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl ResourceHandle for $name {
            const KIND: ResourceKind = $kind;

            fn parse(id: impl Into<String>) -> Result<Self, InvalidHandle> {
                let id = id.into();
                if validate(Self::KIND, &id) {
                    Ok(Self(id))
                } else {
                    Err(InvalidHandle {
                        kind: Self::KIND,
                        id,
                    })
                }
            }

            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl $name {
            /// Parse and validate a raw id
            pub fn parse(id: impl Into<String>) -> Result<Self, InvalidHandle> {
                <Self as ResourceHandle>::parse(id)
            }

            /// The raw id string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidHandle;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

resource_id! {
    /// EC2 instance id (`i-…`)
    InstanceId => ResourceKind::Instance
}

resource_id! {
    /// EBS volume id (`vol-…`)
    VolumeId => ResourceKind::Volume
}

resource_id! {
    /// EBS snapshot id (`snap-…`)
    SnapshotId => ResourceKind::Snapshot
}

resource_id! {
    /// Machine image id (`ami-…`)
    ImageId => ResourceKind::Image
}

resource_id! {
    /// VPC subnet id (`subnet-…`)
    SubnetId => ResourceKind::Subnet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_short_and_long_ids() {
        assert!(validate(ResourceKind::Instance, "i-0a1b2c3d"));
        assert!(validate(ResourceKind::Instance, "i-0123456789abcdef0"));
        assert!(validate(ResourceKind::Volume, "vol-049df61146c4d7901"));
        assert!(validate(ResourceKind::Snapshot, "snap-1234abcd"));
        assert!(validate(ResourceKind::Image, "ami-0abcdef1234567890"));
        assert!(validate(ResourceKind::Subnet, "subnet-6e7f829e"));
    }

    #[test]
    fn test_rejects_malformed_ids() {
        let cases = [
            (ResourceKind::Instance, "i-XYZ"),
            (ResourceKind::Instance, ""),
            (ResourceKind::Instance, "i-"),
            (ResourceKind::Instance, "i0a1b2c3d"),
            // uppercase hex
            (ResourceKind::Instance, "i-0A1B2C3D"),
            // wrong lengths on either side of the allowed ones
            (ResourceKind::Instance, "i-0a1b2c3"),
            (ResourceKind::Instance, "i-0a1b2c3d4"),
            (ResourceKind::Instance, "i-0123456789abcdef"),
            (ResourceKind::Instance, "i-0123456789abcdef01"),
            (ResourceKind::Volume, "vol-0a1b2c3g"),
            (ResourceKind::Image, " ami-0a1b2c3d"),
        ];
        for (kind, id) in cases {
            assert!(!validate(kind, id), "{kind} id {id:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_prefix_of_another_kind() {
        assert!(!validate(ResourceKind::Volume, "i-0a1b2c3d"));
        assert!(!validate(ResourceKind::Instance, "vol-0a1b2c3d"));
        assert!(!validate(ResourceKind::Snapshot, "ami-0a1b2c3d"));
        assert!(!validate(ResourceKind::Image, "snap-0a1b2c3d"));
    }

    #[test]
    fn test_parse_typed_handles() {
        let id = InstanceId::parse("i-0a1b2c3d").unwrap();
        assert_eq!(id.as_str(), "i-0a1b2c3d");
        assert_eq!(id.kind(), ResourceKind::Instance);
        assert_eq!(id.to_string(), "i-0a1b2c3d");

        let err = SnapshotId::parse("").unwrap_err();
        assert_eq!(err.kind, ResourceKind::Snapshot);
        assert_eq!(err.to_string(), "malformed snapshot id: ''");

        assert!("vol-0a1b2c3d".parse::<VolumeId>().is_ok());
        assert!("vol-nothex00".parse::<VolumeId>().is_err());
    }

    #[test]
    fn test_handles_serialize_as_plain_strings() {
        let id = ImageId::parse("ami-0a1b2c3d").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ami-0a1b2c3d\"");
    }
}
