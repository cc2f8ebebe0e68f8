use crate::geofence::{GeoFence, GeoPoint};
use crate::record::LedgerPolicy;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Shipped placeholder; a warning is logged when it is still in use.
pub const DEFAULT_OWNER_SECRET: &str = "owner-secret-change-me";
pub const DEFAULT_ALLOWED_LAT: f64 = 13.009649;
pub const DEFAULT_ALLOWED_LON: f64 = 77.637518;
/// Submission port with STARTTLS.
pub const DEFAULT_SMTP_PORT: u16 = 587;
/// Port that speaks implicit TLS from the first byte.
pub const SMTPS_PORT: u16 = 465;

/// Outbound mail relay for owner notifications.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl SmtpSettings {
    /// Host, user and password are all required; the port defaults to 587.
    fn from_env() -> Option<Self> {
        Some(Self {
            host: env_opt("ATTEND_SMTP_HOST")?,
            port: env_parse("ATTEND_SMTP_PORT", DEFAULT_SMTP_PORT),
            user: env_opt("ATTEND_SMTP_USER")?,
            password: env_opt("ATTEND_SMTP_PASSWORD")?,
        })
    }

    pub fn implicit_tls(&self) -> bool {
        self.port == SMTPS_PORT
    }
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Service configuration, loaded from `ATTEND_*` environment variables once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Value an enrolling user must present to prove the owner authorized them.
    pub owner_secret: String,
    /// Recipient of owner notifications.
    pub owner_email: Option<String>,
    /// Mail relay; `None` unless fully configured.
    pub smtp: Option<SmtpSettings>,
    /// Maximum L2 distance for a positive match.
    pub face_threshold: f32,
    /// Required embedding length; `None` accepts whatever the extractor produces.
    pub embedding_dim: Option<usize>,
    pub allowed_lat: f64,
    pub allowed_lon: f64,
    pub allowed_radius_m: f64,
    pub users_db: PathBuf,
    pub ledger_db: PathBuf,
    /// Append-only notification log.
    pub notify_log: PathBuf,
    pub listen: SocketAddr,
    /// Comma-separated CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
    /// External embedding extractor command line.
    pub extractor_cmd: Option<String>,
    pub extract_timeout_secs: u64,
    pub ledger_policy: LedgerPolicy,
    /// Whether login responses carry the raw match distance.
    pub expose_distance: bool,
    pub max_body_bytes: usize,
    /// Argon2 memory cost (KiB) and iterations.
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ATTEND_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("attend")
            });

        let path_or = |key: &str, file: &str| {
            std::env::var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join(file))
        };

        Self {
            owner_secret: std::env::var("ATTEND_OWNER_SECRET")
                .unwrap_or_else(|_| DEFAULT_OWNER_SECRET.to_string()),
            owner_email: env_opt("ATTEND_OWNER_EMAIL"),
            smtp: SmtpSettings::from_env(),
            face_threshold: env_parse("ATTEND_FACE_THRESHOLD", 0.6),
            embedding_dim: env_opt("ATTEND_EMBEDDING_DIM").and_then(|v| v.parse().ok()),
            allowed_lat: env_parse("ATTEND_ALLOWED_LAT", DEFAULT_ALLOWED_LAT),
            allowed_lon: env_parse("ATTEND_ALLOWED_LON", DEFAULT_ALLOWED_LON),
            allowed_radius_m: env_parse("ATTEND_ALLOWED_RADIUS", 10_000.0),
            users_db: path_or("ATTEND_USERS_DB", "users.db"),
            ledger_db: path_or("ATTEND_LEDGER_DB", "attendance.db"),
            notify_log: path_or("ATTEND_NOTIFY_LOG", "notifications.txt"),
            listen: env_parse("ATTEND_LISTEN", SocketAddr::from(([0, 0, 0, 0], 5000))),
            cors_origins: env_opt("ATTEND_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            extractor_cmd: env_opt("ATTEND_EXTRACTOR_CMD"),
            extract_timeout_secs: env_parse("ATTEND_EXTRACT_TIMEOUT_SECS", 30),
            ledger_policy: env_parse("ATTEND_LEDGER_POLICY", LedgerPolicy::AllowDuplicates),
            expose_distance: std::env::var("ATTEND_EXPOSE_DISTANCE")
                .map(|v| !matches!(v.trim(), "0" | "false" | "no"))
                .unwrap_or(true),
            max_body_bytes: env_parse("ATTEND_MAX_BODY_BYTES", 10 * 1024 * 1024),
            argon2_memory_kib: env_parse("ATTEND_ARGON2_MEMORY_KIB", argon2::Params::DEFAULT_M_COST),
            argon2_iterations: env_parse("ATTEND_ARGON2_ITERATIONS", argon2::Params::DEFAULT_T_COST),
        }
    }

    /// The configured allowed area. An invalid center yields a fence nothing can satisfy.
    pub fn geofence(&self) -> GeoFence {
        match GeoPoint::new(self.allowed_lat, self.allowed_lon) {
            Some(center) => GeoFence::new(center, self.allowed_radius_m),
            None => {
                tracing::error!(
                    lat = self.allowed_lat,
                    lon = self.allowed_lon,
                    "allowed-location center is out of range; every location check will fail"
                );
                GeoFence::new(
                    GeoPoint {
                        latitude: DEFAULT_ALLOWED_LAT,
                        longitude: DEFAULT_ALLOWED_LON,
                    },
                    -1.0,
                )
            }
        }
    }

    pub fn uses_default_owner_secret(&self) -> bool {
        self.owner_secret == DEFAULT_OWNER_SECRET
    }

    /// Relay and recipient, when both are configured.
    pub fn mail_route(&self) -> Option<(&SmtpSettings, &str)> {
        Some((self.smtp.as_ref()?, self.owner_email.as_deref()?))
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
