//! Path-derived identifiers.
//!
//! Book and category ids are UUIDv5 values in the URL namespace computed from
//! the absolute path of the folder or file. The same path always yields the
//! same id, so an unchanged book keeps its id across scans and across process
//! restarts. Renaming or moving a book yields a new id.

use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! path_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Derives the id for the given absolute path.
            #[must_use]
            pub fn from_path(path: &Utf8Path) -> Self {
                Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, path.as_str().as_bytes()))
            }

            /// Wraps an existing UUID.
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

path_id!(
    /// Identifier of a [`Book`](crate::Book).
    ///
    /// # Examples
    ///
    /// ```
    /// use shelf_core::BookId;
    /// use camino::Utf8Path;
    ///
    /// let a = BookId::from_path(Utf8Path::new("/library/Comics/Vol 1"));
    /// let b = BookId::from_path(Utf8Path::new("/library/Comics/Vol 1"));
    /// assert_eq!(a, b);
    /// assert_eq!(a.to_string().parse::<BookId>().ok(), Some(a));
    /// ```
    BookId
);

path_id!(
    /// Identifier of a [`Category`](crate::Category).
    CategoryId
);
