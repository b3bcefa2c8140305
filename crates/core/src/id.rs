//! Strongly-typed identifiers.
//!
//! Bundles own their identifiers; every other id here points at a record kept
//! by the warehouse engine (products, units, locations, movements).

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Fresh time-ordered (UUIDv7) identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(
    /// Multi-tenant boundary for event streams and read models.
    TenantId,
    "TenantId"
);
uuid_newtype!(
    /// Identifier of an event stream.
    AggregateId,
    "AggregateId"
);
uuid_newtype!(ProductId, "ProductId");
uuid_newtype!(
    /// Unit of measure.
    UomId,
    "UomId"
);
uuid_newtype!(WarehouseId, "WarehouseId");
uuid_newtype!(LocationId, "LocationId");
uuid_newtype!(
    /// A stock movement document (picking).
    MovementId,
    "MovementId"
);
uuid_newtype!(CompanyId, "CompanyId");
uuid_newtype!(
    /// Warehouse operation type (receipts, deliveries).
    PickingTypeId,
    "PickingTypeId"
);
