//! Catalogue of the event types services agree on.
//!
//! The bus itself never consults this list; it exists so producers and
//! consumers spell event types the same way. Adding a variant is a
//! backwards-compatible change; renaming or removing one bumps
//! [`CATALOG_VERSION`].

use std::fmt;
use std::str::FromStr;

/// Version of the event type catalogue.
pub const CATALOG_VERSION: u32 = 1;

macro_rules! known_events {
    ($( $variant:ident => $name:literal ),+ $(,)?) => {
        /// A known domain event type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum KnownEvent {
            $( $variant, )+
        }

        impl KnownEvent {
            const ALL: &'static [KnownEvent] = &[ $( KnownEvent::$variant, )+ ];

            /// The wire name used as the event type.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $( KnownEvent::$variant => $name, )+
                }
            }
        }
    };
}

known_events! {
    UserRegistered => "user.registered",
    UserUpdated => "user.updated",
    UserDeleted => "user.deleted",
    BookingCreated => "booking.created",
    BookingUpdated => "booking.updated",
    BookingConfirmed => "booking.confirmed",
    BookingCancelled => "booking.cancelled",
    BookingCompleted => "booking.completed",
    ReviewCreated => "review.created",
    ReviewUpdated => "review.updated",
    ReviewDeleted => "review.deleted",
    ContractCreated => "contract.created",
    ContractSigned => "contract.signed",
    ContractTerminated => "contract.terminated",
    PaymentCompleted => "payment.completed",
    PaymentFailed => "payment.failed",
    PaymentRefunded => "payment.refunded",
    NotificationRequested => "notification.requested",
    NotificationDelivered => "notification.delivered",
}

impl KnownEvent {
    /// Every catalogued event type, in declaration order.
    pub fn all() -> &'static [KnownEvent] {
        Self::ALL
    }

    /// The entity part of the name (`"booking"` for `booking.created`).
    pub fn entity(&self) -> &'static str {
        self.as_str().split('.').next().unwrap_or_default()
    }
}

impl fmt::Display for KnownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for KnownEvent {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Error returned when parsing a name that is not in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for KnownEvent {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|known| known.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}
