//! Opaque references to host-owned objects.
//!
//! The tracker never looks inside these; it only compares them for equality.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_ref {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a host identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the raw host identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_ref!(
    /// Host reference to the actor a combatant represents.
    ActorRef
);
opaque_ref!(
    /// Host reference to the token a combatant is placed as.
    TokenRef
);
opaque_ref!(
    /// Host reference to the scene an encounter takes place in.
    SceneRef
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refs_compare_by_value() {
        assert_eq!(TokenRef::new("tok-1"), TokenRef::from("tok-1"));
        assert_ne!(TokenRef::new("tok-1"), TokenRef::new("tok-2"));
    }

    #[test]
    fn test_refs_serialize_as_plain_strings() {
        let scene = SceneRef::new("scene-a");
        let json = serde_json::to_value(&scene).unwrap();
        assert_eq!(json, serde_json::json!("scene-a"));

        let back: SceneRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, scene);
        assert_eq!(back.to_string(), "scene-a");
    }
}
