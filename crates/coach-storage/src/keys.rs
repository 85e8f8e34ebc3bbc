//! Storage key constants.

/// Keys under which the session is persisted.
pub struct StorageKeys;

impl StorageKeys {
    /// Bare access token
    pub const ACCESS_TOKEN: &'static str = "token";

    /// Bare refresh token
    pub const REFRESH_TOKEN: &'static str = "refreshToken";

    /// Wrapped session record in the identity provider's own format (JSON)
    pub const WRAPPED_SESSION: &'static str = "supabase.auth.token";

    /// Scratch key used by the availability probe
    pub const PROBE: &'static str = "__storage_probe__";

    /// Every key that holds session material.
    pub const SESSION_KEYS: [&'static str; 3] = [
        Self::ACCESS_TOKEN,
        Self::REFRESH_TOKEN,
        Self::WRAPPED_SESSION,
    ];
}
