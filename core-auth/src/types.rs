use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Logical keys of the persisted credential record.
///
/// The string form is the stable on-disk key name. Every key except
/// [`SelectedRegion`](CredentialKey::SelectedRegion) is a secret and lives in
/// the encrypted partition of the store.
///
/// # Examples
///
/// ```
/// use core_auth::CredentialKey;
///
/// assert_eq!(CredentialKey::AccessToken.as_str(), "accessToken");
/// assert!(CredentialKey::AccessToken.is_secret());
/// assert!(!CredentialKey::SelectedRegion.is_secret());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    CodeVerifier,
    AccessToken,
    RefreshToken,
    SelectedRegion,
    AuthLaunched,
    DirectLoginLaunched,
    DirectLoginLaunchedDone,
    DirectLoginType,
    DirectLoginData,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 9] = [
        CredentialKey::CodeVerifier,
        CredentialKey::AccessToken,
        CredentialKey::RefreshToken,
        CredentialKey::SelectedRegion,
        CredentialKey::AuthLaunched,
        CredentialKey::DirectLoginLaunched,
        CredentialKey::DirectLoginLaunchedDone,
        CredentialKey::DirectLoginType,
        CredentialKey::DirectLoginData,
    ];

    /// Keys making up the persisted launch guard.
    pub const LAUNCH_GUARD: [CredentialKey; 5] = [
        CredentialKey::AuthLaunched,
        CredentialKey::DirectLoginLaunched,
        CredentialKey::DirectLoginLaunchedDone,
        CredentialKey::DirectLoginType,
        CredentialKey::DirectLoginData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::CodeVerifier => "codeVerifier",
            CredentialKey::AccessToken => "accessToken",
            CredentialKey::RefreshToken => "refreshToken",
            CredentialKey::SelectedRegion => "selectedRegion",
            CredentialKey::AuthLaunched => "authLaunched",
            CredentialKey::DirectLoginLaunched => "directLoginLaunched",
            CredentialKey::DirectLoginLaunchedDone => "directLoginLaunchedDone",
            CredentialKey::DirectLoginType => "directLoginType",
            CredentialKey::DirectLoginData => "directLoginData",
        }
    }

    /// Parse a key from its stored name
    ///
    /// ```
    /// use core_auth::CredentialKey;
    ///
    /// assert_eq!(CredentialKey::parse("refreshToken"), Some(CredentialKey::RefreshToken));
    /// assert_eq!(CredentialKey::parse("unknown"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// Whether the value must be encrypted at rest.
    pub fn is_secret(&self) -> bool {
        !matches!(self, CredentialKey::SelectedRegion)
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access/refresh token pair.
///
/// The two tokens are always stored and cleared together.
///
/// # Security
///
/// The `Debug` implementation redacts both tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Token endpoint response.
///
/// Accepts both the OAuth snake_case field names and the camelCase names some
/// identity provider deployments return.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "idToken")]
    pub id_token: Option<String>,
    #[serde(default, alias = "tokenType")]
    pub token_type: Option<String>,
    #[serde(default, alias = "expiresIn")]
    pub expires_in: Option<i64>,
}

impl AuthResponse {
    /// Token pair to persist. A refresh response without a new refresh token
    /// keeps `previous_refresh`.
    ///
    /// ```
    /// use core_auth::AuthResponse;
    ///
    /// let response: AuthResponse = serde_json::from_str(r#"{"access_token":"AT2"}"#).unwrap();
    /// let tokens = response.into_tokens(Some("RT1")).unwrap();
    /// assert_eq!(tokens.refresh_token, "RT1");
    /// ```
    pub fn into_tokens(self, previous_refresh: Option<&str>) -> Option<AuthTokens> {
        let refresh = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))?;
        if self.access_token.is_empty() {
            return None;
        }
        Some(AuthTokens::new(self.access_token, refresh))
    }

    /// Expiry instant derived from `expires_in`, relative to `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| now + chrono::Duration::seconds(secs))
    }
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Profile returned by the "who am I" endpoint.
#[derive(Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub profile_picture_url: Option<String>,
    pub tenant_id: Option<String>,
    pub tenant_ids: Vec<String>,
    pub verified: bool,
    /// Fields this crate does not model, kept for the host.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

/// Authentication phase of the session.
///
/// # State Transitions
///
/// ```text
/// Uninitialized -> Initializing -> Authenticated
///                       |             ^  |
///                       v             |  v
///                     Unauthenticated <--
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthPhase {
    #[default]
    Uninitialized,
    Initializing,
    Unauthenticated,
    Authenticated,
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthPhase::Uninitialized => write!(f, "Uninitialized"),
            AuthPhase::Initializing => write!(f, "Initializing..."),
            AuthPhase::Unauthenticated => write!(f, "Unauthenticated"),
            AuthPhase::Authenticated => write!(f, "Authenticated"),
        }
    }
}

/// Observable view of the session delivered to observers.
///
/// `revision` increases by one for every distinct snapshot, so observers can
/// discard anything older than what they already rendered.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub phase: AuthPhase,
    pub user: Option<User>,
    pub is_loading: bool,
    pub show_loader: bool,
    pub revision: u64,
}

impl SessionSnapshot {
    /// `Uninitialized` counts as initializing: nothing has been decided yet.
    pub fn initializing(&self) -> bool {
        matches!(self.phase, AuthPhase::Uninitialized | AuthPhase::Initializing)
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Authenticated
    }

    /// Equality ignoring the revision counter.
    pub(crate) fn same_state(&self, other: &SessionSnapshot) -> bool {
        self.phase == other.phase
            && self.user == other.user
            && self.is_loading == other.is_loading
            && self.show_loader == other.show_loader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_key_names_round_trip() {
        for key in CredentialKey::ALL {
            assert_eq!(CredentialKey::parse(key.as_str()), Some(key));
        }
    }

    #[test]
    fn test_only_selected_region_is_plaintext() {
        let plaintext: Vec<_> = CredentialKey::ALL
            .iter()
            .filter(|k| !k.is_secret())
            .collect();
        assert_eq!(plaintext, vec![&CredentialKey::SelectedRegion]);
    }

    #[test]
    fn test_auth_response_snake_case() {
        let json = r#"{
            "token_type": "Bearer",
            "access_token": "AT1",
            "refresh_token": "RT1",
            "id_token": "ID1",
            "expires_in": 86400
        }"#;

        let response: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "AT1");
        assert_eq!(response.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(response.expires_in, Some(86400));
    }

    #[test]
    fn test_auth_response_camel_case() {
        let json = r#"{"accessToken": "AT1", "refreshToken": "RT1"}"#;

        let response: AuthResponse = serde_json::from_str(json).unwrap();
        let tokens = response.into_tokens(None).unwrap();
        assert_eq!(tokens, AuthTokens::new("AT1", "RT1"));
    }

    #[test]
    fn test_auth_response_without_any_refresh_token() {
        let response: AuthResponse = serde_json::from_str(r#"{"access_token": "AT1"}"#).unwrap();
        assert!(response.into_tokens(None).is_none());
    }

    #[test]
    fn test_empty_access_token_is_rejected() {
        let response: AuthResponse =
            serde_json::from_str(r#"{"access_token": "", "refresh_token": "RT1"}"#).unwrap();
        assert!(response.into_tokens(None).is_none());
    }

    #[test]
    fn test_expires_at() {
        let response: AuthResponse =
            serde_json::from_str(r#"{"access_token": "AT1", "expires_in": 60}"#).unwrap();
        let now = Utc::now();
        assert_eq!(response.expires_at(now), Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let tokens = AuthTokens::new("AT-secret", "RT-secret");
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains("AT-secret"));
        assert!(!debug.contains("RT-secret"));

        let response: AuthResponse =
            serde_json::from_str(r#"{"access_token": "AT-secret", "refresh_token": "RT-secret"}"#)
                .unwrap();
        let debug = format!("{:?}", response);
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_user_deserialization_keeps_unknown_fields() {
        let json = r#"{
            "id": "user-1",
            "email": "jane@example.com",
            "name": "Jane",
            "profilePictureUrl": "https://cdn.example.com/jane.png",
            "tenantId": "tenant-1",
            "tenantIds": ["tenant-1", "tenant-2"],
            "verified": true,
            "roles": [{"key": "admin"}]
        }"#;

        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.tenant_ids.len(), 2);
        assert!(user.verified);
        assert!(user.extra.contains_key("roles"));
        assert!(!format!("{:?}", user).contains("jane@example.com"));
    }

    #[test]
    fn test_snapshot_flags() {
        let snapshot = SessionSnapshot::default();
        assert!(snapshot.initializing());
        assert!(!snapshot.is_authenticated());

        let authenticated = SessionSnapshot {
            phase: AuthPhase::Authenticated,
            revision: 3,
            ..Default::default()
        };
        assert!(!authenticated.initializing());
        assert!(authenticated.is_authenticated());

        let same = SessionSnapshot {
            revision: 4,
            ..authenticated.clone()
        };
        assert!(same.same_state(&authenticated));
    }
}
