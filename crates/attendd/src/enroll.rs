//! Enrollment: geofence, owner authorization, face capture, then store.
//!
//! Linear and fail-fast. The credential store is written exactly once, as
//! the last fallible step, so every rejection leaves it untouched.

use crate::error::{FlowError, FlowResult};
use crate::service::{take_field, text_field, AttendanceService};
use attend_core::{Coordinate, UserRecord};
use attend_store::{AttendanceLedger, CredentialStore, StoreError};
use chrono::Local;
use serde::Deserialize;

pub const SIGNUP_FIELDS: &[&str] = &[
    "id",
    "password",
    "domain",
    "owner_secret",
    "image",
    "latitude",
    "longitude",
];

/// Signup request body. Every field is optional here so that absence is
/// reported as a rejection rather than a parse failure.
#[derive(Debug, Default, Deserialize)]
pub struct SignupForm {
    #[serde(default, deserialize_with = "text_field")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub owner_secret: Option<String>,
    pub image: Option<String>,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
}

struct Signup {
    id: String,
    password: String,
    domain: String,
    owner_secret: String,
    image: String,
    latitude: Coordinate,
    longitude: Coordinate,
}

impl SignupForm {
    fn validate(self) -> FlowResult<Signup> {
        let mut missing = Vec::new();
        let id = take_field(self.id, "id", &mut missing);
        let password = take_field(self.password, "password", &mut missing);
        let domain = take_field(self.domain, "domain", &mut missing);
        let owner_secret = take_field(self.owner_secret, "owner_secret", &mut missing);
        let image = take_field(self.image, "image", &mut missing);
        let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
            return Err(FlowError::MissingFields(SIGNUP_FIELDS));
        };
        if !missing.is_empty() {
            tracing::debug!(?missing, "signup missing fields");
            return Err(FlowError::MissingFields(SIGNUP_FIELDS));
        }
        Ok(Signup {
            id,
            password,
            domain,
            owner_secret,
            image,
            latitude,
            longitude,
        })
    }
}

impl<C, L> AttendanceService<C, L>
where
    C: CredentialStore + Sync,
    L: AttendanceLedger + Sync,
{
    /// Enroll a new user.
    pub async fn enroll(&self, form: SignupForm) -> FlowResult<()> {
        let req = form.validate()?;
        let cfg = &self.config;

        if !cfg.geofence.within_allowed_area(&req.latitude, &req.longitude) {
            tracing::info!(id = %req.id, "signup outside allowed area");
            return Err(FlowError::OutsideGeofence);
        }

        if !cfg.owner_secret.matches(&req.owner_secret) {
            return Err(FlowError::InvalidOwnerSecret);
        }

        if self.users.exists(&req.id).await.map_err(FlowError::internal)? {
            return Err(FlowError::DuplicateId);
        }

        let embedding = self.capture_embedding(req.image).await?;

        let password_hash = self.hash_password(req.password).await?;
        let record = UserRecord {
            id: req.id,
            password_hash,
            domain: req.domain,
            embedding,
            created_at: Local::now(),
        };

        match self.users.create(&record).await {
            Ok(()) => {}
            // Lost a race with a concurrent signup for the same id.
            Err(StoreError::DuplicateId(_)) => return Err(FlowError::DuplicateId),
            Err(e) => return Err(FlowError::internal(e)),
        }

        tracing::info!(id = %record.id, domain = %record.domain, "user enrolled");
        self.notifier.notify(format!(
            "New account created: {} (domain: {})",
            record.id, record.domain
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{face_image, FACE_A, FACE_B, NO_FACE};
    use crate::notify::testing::{BrokenNotifier, RecordingNotifier};
    use crate::service::testing::*;
    use attend_core::LedgerPolicy;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn signup_form(id: &str, face: [u8; 3], at: (f64, f64)) -> SignupForm {
        SignupForm {
            id: Some(id.to_string()),
            password: Some("p1".to_string()),
            domain: Some("eng".to_string()),
            owner_secret: Some(OWNER_SECRET.to_string()),
            image: Some(face_image(face)),
            latitude: Some(at.0.into()),
            longitude: Some(at.1.into()),
        }
    }

    async fn wait_for_notes(notes: &RecordingNotifier, n: usize) -> Vec<String> {
        for _ in 0..100 {
            let seen = notes.delivered.lock().unwrap().clone();
            if seen.len() >= n {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        notes.delivered.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_enroll_success() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;
        h.service.enroll(signup_form("alice", FACE_A, INSIDE)).await.unwrap();

        let stored = h.service.users().get("alice").await.unwrap().unwrap();
        assert_eq!(stored.domain, "eng");
        assert_eq!(stored.embedding.len(), 128);
        assert_ne!(stored.password_hash, "p1");
        assert!(h.service.config().hasher.verify("p1", &stored.password_hash).unwrap());

        let notes = wait_for_notes(&h.notes, 1).await;
        assert_eq!(notes, vec!["New account created: alice (domain: eng)"]);
    }

    #[tokio::test]
    async fn test_enroll_missing_fields() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;

        let err = h.service.enroll(SignupForm::default()).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingFields(_)));

        let mut form = signup_form("alice", FACE_A, INSIDE);
        form.owner_secret = None;
        let err = h.service.enroll(form).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing fields (required: id, password, domain, owner_secret, image, latitude, longitude)"
        );

        let mut form = signup_form("alice", FACE_A, INSIDE);
        form.longitude = None;
        assert!(matches!(h.service.enroll(form).await, Err(FlowError::MissingFields(_))));

        assert_eq!(h.extract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_enroll_outside_geofence_leaves_store_untouched() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;
        let err = h.service.enroll(signup_form("alice", FACE_A, OUTSIDE)).await.unwrap_err();

        assert!(matches!(err, FlowError::OutsideGeofence));
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert!(!h.service.users().exists("alice").await.unwrap());
        assert_eq!(h.service.users().count().await.unwrap(), 0);
        assert_eq!(h.extract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_enroll_malformed_coordinates() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;
        let mut form = signup_form("alice", FACE_A, INSIDE);
        form.latitude = Some("somewhere".into());
        assert!(matches!(h.service.enroll(form).await, Err(FlowError::OutsideGeofence)));
    }

    #[tokio::test]
    async fn test_enroll_bad_owner_secret() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;
        let mut form = signup_form("alice", FACE_A, INSIDE);
        form.owner_secret = Some("guess".into());

        let err = h.service.enroll(form).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid owner security value");
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(h.service.users().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enroll_twice_rejects_second_regardless_of_fields() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;
        h.service.enroll(signup_form("alice", FACE_A, INSIDE)).await.unwrap();

        let mut second = signup_form("alice", FACE_B, INSIDE);
        second.password = Some("other".into());
        second.domain = Some("ops".into());
        let err = h.service.enroll(second).await.unwrap_err();

        assert_eq!(err.to_string(), "id already exists");
        let stored = h.service.users().get("alice").await.unwrap().unwrap();
        assert_eq!(stored.domain, "eng");
        // The duplicate check runs before any image processing.
        assert_eq!(h.extract_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enroll_no_face() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;
        let err = h.service.enroll(signup_form("alice", NO_FACE, INSIDE)).await.unwrap_err();
        assert_eq!(err.to_string(), "no face detected");
        assert!(!h.service.users().exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_enroll_undecodable_image() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;
        let mut form = signup_form("alice", FACE_A, INSIDE);
        form.image = Some("data:image/png;base64,aGVsbG8=".into());
        let err = h.service.enroll(form).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidImage(_)));
        assert_eq!(h.service.users().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_enrollment() {
        let h = harness_with(
            test_config(LedgerPolicy::AllowDuplicates),
            BrokenNotifier,
            RecordingNotifier::default(),
        )
        .await;
        h.service.enroll(signup_form("alice", FACE_A, INSIDE)).await.unwrap();
        assert!(h.service.users().exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_signups_distinct_ids_all_persist() {
        let h = harness(LedgerPolicy::AllowDuplicates).await;
        let mut tasks = Vec::new();
        for i in 0..6 {
            let service = h.service.clone();
            tasks.push(tokio::spawn(async move {
                service.enroll(signup_form(&format!("user{i}"), FACE_A, INSIDE)).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(h.service.users().count().await.unwrap(), 6);
    }
}
