//! Newtype domain identifiers.
//!
//! Every named concept that crosses a crate boundary is represented as a
//! distinct newtype wrapping a `String`. This prevents accidentally
//! interchanging, for example, an [`ExchangeName`] with a [`RoutingKey`] even
//! though both are plain strings on the wire.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Bus identifiers
// ---------------------------------------------------------------------------

string_id! {
    /// A named publish/subscribe exchange on the message bus
    /// (e.g. `"exchange/build/normalized"`).
    ExchangeName
}

string_id! {
    /// A routing key or topic pattern scoping which messages on an exchange
    /// a subscriber receives.
    ///
    /// Bindings use AMQP topic patterns (`*` matches one dot-separated word,
    /// `#` matches zero or more); messages carry a concrete key.
    RoutingKey
}

string_id! {
    /// Short identifier selecting one `{exchange, topic}` entry from the
    /// route configuration (e.g. `"talos"`, `"manual_backfill"`).
    ///
    /// Also used as the application label naming the durable queue.
    TopicBase
}

// ---------------------------------------------------------------------------
// CI identifiers
// ---------------------------------------------------------------------------

string_id! {
    /// A CI builder name (e.g. `"Rev7 MacOSX Yosemite 10.10.5 mozilla-inbound pgo talos svgr"`).
    BuilderName
}

string_id! {
    /// A repository revision (changeset hash) a build is scheduled against.
    Revision
}

impl BuilderName {
    /// Returns `true` if the name contains `marker` verbatim.
    pub fn contains(&self, marker: &str) -> bool {
        self.0.contains(marker)
    }
}
