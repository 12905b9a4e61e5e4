//! Strongly-typed identifier value objects.
//!
//! Every aggregate the engine touches is keyed by a UUID. The identifiers are
//! distinct types so a `PaymentId` can never be passed where a
//! `SubscriptionId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s.trim())?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a Payment record.
    PaymentId
);

uuid_id!(
    /// Identifier of a UserSubscription record.
    SubscriptionId
);

uuid_id!(
    /// Identifier of a ServiceRequest owned by the workflow module.
    ServiceRequestId
);

uuid_id!(
    /// Identifier of a subscription plan in the service catalog.
    PlanId
);

uuid_id!(
    /// Identifier of a back-office user (customer).
    UserId
);

uuid_id!(
    /// Identifier of a notification delivery record.
    NotificationId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(PaymentId::new(), PaymentId::new());
    }

    #[test]
    fn parses_from_string_and_displays_back() {
        let raw = "5f0c8a52-3b8e-4c55-9d1f-0f9b4b8a6d21";
        let id: SubscriptionId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        let id: UserId = " 5f0c8a52-3b8e-4c55-9d1f-0f9b4b8a6d21 ".parse().unwrap();
        assert_eq!(id.to_string(), "5f0c8a52-3b8e-4c55-9d1f-0f9b4b8a6d21");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<PaymentId>().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let uuid = Uuid::new_v4();
        let id = ServiceRequestId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
