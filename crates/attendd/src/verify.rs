//! Verification: password, geofence, then face match against the enrolled
//! reference. A recognized login appends one attendance row.

use crate::error::{FlowError, FlowResult};
use crate::service::{take_field, text_field, AttendanceService};
use attend_core::{AttendanceRecord, Coordinate, EuclideanMatcher, Matcher};
use attend_store::{AppendOutcome, AttendanceLedger, CredentialStore};
use chrono::Local;
use serde::Deserialize;

pub const LOGIN_FIELDS: &[&str] = &["id", "password", "image", "latitude", "longitude"];

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default, deserialize_with = "text_field")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub password: Option<String>,
    pub image: Option<String>,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
}

struct Login {
    id: String,
    password: String,
    image: String,
    latitude: Coordinate,
    longitude: Coordinate,
}

impl LoginForm {
    fn validate(self) -> FlowResult<Login> {
        let mut missing = Vec::new();
        let id = take_field(self.id, "id", &mut missing);
        let password = take_field(self.password, "password", &mut missing);
        let image = take_field(self.image, "image", &mut missing);
        let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
            return Err(FlowError::MissingFields(LOGIN_FIELDS));
        };
        if !missing.is_empty() {
            tracing::debug!(?missing, "login missing fields");
            return Err(FlowError::MissingFields(LOGIN_FIELDS));
        }
        Ok(Login {
            id,
            password,
            image,
            latitude,
            longitude,
        })
    }
}

/// Result of a login that passed every precondition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoginOutcome {
    pub recognized: bool,
    pub distance: f32,
    /// Ledger effect; `None` when the face was not recognized.
    pub recorded: Option<AppendOutcome>,
}

impl<C, L> AttendanceService<C, L>
where
    C: CredentialStore + Sync,
    L: AttendanceLedger + Sync,
{
    /// Verify a login attempt and record attendance when the face matches.
    ///
    /// A non-match is a successful call with `recognized == false`, not an
    /// error. Checks run cheapest first, so a wrong password never reaches
    /// the extractor.
    pub async fn verify(&self, form: LoginForm) -> FlowResult<LoginOutcome> {
        let req = form.validate()?;
        let cfg = &self.config;

        let user = self
            .users
            .get(&req.id)
            .await
            .map_err(FlowError::internal)?
            .ok_or(FlowError::UserNotFound)?;

        let password_ok = self
            .verify_password(req.password, user.password_hash.clone())
            .await?;
        if !password_ok {
            return Err(FlowError::InvalidPassword);
        }

        if !cfg.geofence.within_allowed_area(&req.latitude, &req.longitude) {
            tracing::info!(id = %user.id, "login outside allowed area");
            return Err(FlowError::OutsideGeofence);
        }

        let candidate = self.capture_embedding(req.image).await?;
        let result = EuclideanMatcher
            .compare(&candidate, &user.embedding, cfg.threshold)
            .map_err(FlowError::internal)?;

        tracing::info!(
            id = %user.id,
            distance = result.distance,
            threshold = cfg.threshold,
            recognized = result.matched,
            "login: compared"
        );

        if !result.matched {
            return Ok(LoginOutcome {
                recognized: false,
                distance: result.distance,
                recorded: None,
            });
        }

        let row = AttendanceRecord::present_at(Local::now(), &user.id, &user.domain);
        let outcome = self
            .ledger
            .append(&row, cfg.ledger_policy)
            .await
            .map_err(FlowError::internal)?;
        if outcome == AppendOutcome::AlreadyRecorded {
            tracing::debug!(id = %user.id, date = %row.date_string(), "attendance already recorded today");
        }

        Ok(LoginOutcome {
            recognized: true,
            distance: result.distance,
            recorded: Some(outcome),
        })
    }
}
