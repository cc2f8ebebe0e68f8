//! attend-core — Identity checks for the attendance service.
//!
//! Geofence math, face-embedding comparison, image payload decoding,
//! the embedding-extractor seam, and credential hashing. No I/O beyond
//! the optional external extractor process.

pub mod config;
pub mod credential;
pub mod extractor;
pub mod geofence;
pub mod payload;
pub mod record;
pub mod types;

pub use config::{Config, SmtpSettings};
pub use credential::{CredentialHasher, OwnerSecret, PasswordError};
pub use extractor::{CommandExtractor, EmbeddingExtractor, ExtractError};
pub use geofence::{Coordinate, GeoFence, GeoPoint};
pub use record::{AttendanceRecord, AttendanceStatus, LedgerPolicy, UserRecord};
pub use types::{Embedding, EuclideanMatcher, MatchError, MatchResult, Matcher};
