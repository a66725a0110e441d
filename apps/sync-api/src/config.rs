/// Sync API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret shared with the auth service for verifying handshake tokens.
    pub jwt_secret: String,
    /// Base URL of the platform API (meeting metadata, reports, notifications).
    pub platform_api_url: String,
    /// Service token sent on internal platform API calls.
    pub service_token: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Meetings shorter than this get no report.
    pub report_min_duration_secs: i64,
    /// How long an empty meeting room lingers before cleanup.
    pub meeting_cleanup_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: required_var("JWT_SECRET"),
            platform_api_url: required_var("PLATFORM_API_URL"),
            service_token: required_var("SERVICE_TOKEN"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4003),
            report_min_duration_secs: std::env::var("REPORT_MIN_DURATION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            meeting_cleanup_secs: std::env::var("MEETING_CLEANUP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
