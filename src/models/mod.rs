use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::{AppError, AppResult};

pub mod play;
pub mod recommendation;
pub mod track;

pub use play::{PlayRecord, PlayRequest};
pub use recommendation::{Ranked, RankingSource, RecommendationResponse};
pub use track::{TrackFacts, TrackRecord};

/// Declares a positive `i64` identifier owned by an external collaborator
macro_rules! external_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub(crate) i64);

        impl $name {
            /// Validates a raw identifier. Zero and negative values never name a node.
            pub fn new(raw: i64) -> AppResult<Self> {
                if raw <= 0 {
                    return Err(AppError::InvalidReference(format!(
                        "{} id must be positive, got {}",
                        $label, raw
                    )));
                }
                Ok(Self(raw))
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

external_id!(
    /// Listener identifier from the profile service
    UserId,
    "user"
);
external_id!(
    /// Track identifier from the catalog
    TrackId,
    "track"
);
external_id!(
    /// Artist identifier from the catalog
    ArtistId,
    "artist"
);

/// Normalises a catalog genre. Blank genres mean "no genre edge".
pub fn normalize_genre(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
