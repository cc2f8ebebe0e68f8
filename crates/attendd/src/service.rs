//! Shared state for the enrollment and verification flows.

use crate::engine::{EngineError, EngineHandle};
use crate::error::{FlowError, FlowResult};
use crate::notify::NotificationDispatcher;
use attend_core::{Config, CredentialHasher, Embedding, GeoFence, LedgerPolicy, OwnerSecret};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;

/// Immutable flow settings, built once at startup.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub owner_secret: OwnerSecret,
    pub geofence: GeoFence,
    /// Maximum L2 distance for a positive match.
    pub threshold: f32,
    pub ledger_policy: LedgerPolicy,
    /// Include the raw distance in login responses.
    pub expose_distance: bool,
    pub hasher: CredentialHasher,
}

impl FlowConfig {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            owner_secret: OwnerSecret::new(&cfg.owner_secret),
            geofence: cfg.geofence(),
            threshold: cfg.face_threshold,
            ledger_policy: cfg.ledger_policy,
            expose_distance: cfg.expose_distance,
            hasher: CredentialHasher::with_cost(cfg.argon2_memory_kib, cfg.argon2_iterations)?,
        })
    }
}

/// Everything a flow needs: configuration, both stores, the extraction
/// engine and the notification queue. Cheap to share behind an `Arc`.
pub struct AttendanceService<C, L> {
    pub(crate) config: Arc<FlowConfig>,
    pub(crate) users: C,
    pub(crate) ledger: L,
    pub(crate) engine: EngineHandle,
    pub(crate) notifier: NotificationDispatcher,
}

impl<C, L> AttendanceService<C, L> {
    pub fn new(
        config: Arc<FlowConfig>,
        users: C,
        ledger: L,
        engine: EngineHandle,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            config,
            users,
            ledger,
            engine,
            notifier,
        }
    }

    pub fn users(&self) -> &C {
        &self.users
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Decode the image and extract the first face, mapping engine faults
    /// onto flow outcomes.
    pub(crate) async fn capture_embedding(&self, image: String) -> FlowResult<Embedding> {
        match self.engine.extract(image).await {
            Ok(Some(embedding)) => Ok(embedding),
            Ok(None) => Err(FlowError::NoFaceDetected),
            Err(EngineError::Payload(e)) => Err(FlowError::InvalidImage(e.to_string())),
            Err(e) => Err(FlowError::internal(e)),
        }
    }

    /// Argon2 is deliberately slow, so it runs on the blocking pool.
    pub(crate) async fn hash_password(&self, password: String) -> FlowResult<String> {
        let hasher = self.config.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(FlowError::internal)?
            .map_err(FlowError::internal)
    }

    /// `Ok(false)` is a wrong password; a corrupt stored hash is internal.
    pub(crate) async fn verify_password(&self, password: String, stored: String) -> FlowResult<bool> {
        let hasher = self.config.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
            .await
            .map_err(FlowError::internal)?
            .map_err(FlowError::internal)
    }
}

/// Deserialize a text field that clients may also send as a JSON number or
/// boolean. `null` counts as absent; arrays and objects are rejected.
pub(crate) fn text_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

/// Return the field's value, or record it as missing.
pub(crate) fn take_field(
    value: Option<String>,
    name: &'static str,
    missing: &mut Vec<&'static str>,
) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => {
            missing.push(name);
            String::new()
        }
    }
}
