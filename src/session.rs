use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use tracing::{debug, error};

use crate::models::Id;

pub const SESSION_COOKIE: &str = "novella_session";

/// Identity carried by the caller's session. Both fields absent means anonymous.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Option<Id>,
    pub admin_id: Option<Id>,
}

impl Session {
    pub fn user(user_id: Id) -> Self {
        Self { user_id: Some(user_id), admin_id: None }
    }

    pub fn admin(admin_id: Id) -> Self {
        Self { user_id: None, admin_id: Some(admin_id) }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none() && self.admin_id.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uid: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aid: Option<Id>,
    exp: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("invalid session token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("session lifetime overflows the clock")]
    Expiry,
}

/// Signs and verifies the session cookie (HS256).
#[derive(Clone)]
pub struct SessionCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    secure: bool,
}

impl SessionCodec {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            secure: false,
        }
    }

    /// Marks issued cookies `Secure`.
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn encode(&self, session: &Session) -> Result<String, SessionError> {
        let exp = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or(SessionError::Expiry)?
            .timestamp() as usize;
        let claims = Claims { uid: session.user_id, aid: session.admin_id, exp };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn decode(&self, token: &str) -> Result<Session, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(Session { user_id: data.claims.uid, admin_id: data.claims.aid })
    }

    /// Cookie for a login response.
    pub fn issue(&self, session: &Session) -> Result<Cookie<'static>, SessionError> {
        let token = self.encode(session)?;
        Ok(Cookie::build(SESSION_COOKIE, token)
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.ttl.num_seconds()))
            .finish())
    }

    /// Expired cookie that clears the session on logout.
    pub fn clear(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build(SESSION_COOKIE, "")
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .finish();
        cookie.make_removal();
        cookie
    }

    /// Reads the session from a request; any missing or bad cookie is anonymous.
    pub fn read(&self, req: &HttpRequest) -> Session {
        let Some(cookie) = req.cookie(SESSION_COOKIE) else { return Session::default() };
        match self.decode(cookie.value()) {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "ignoring session cookie");
                Session::default()
            }
        }
    }
}

/// Resolves the session using the `SessionCodec` registered as app data.
pub fn session_of(req: &HttpRequest) -> Session {
    match req.app_data::<web::Data<SessionCodec>>() {
        Some(codec) => codec.read(req),
        None => {
            error!("SessionCodec missing from app data; treating request as anonymous");
            Session::default()
        }
    }
}

impl FromRequest for Session {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(session_of(req)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SessionCodec {
        SessionCodec::new(b"unit-test-secret-that-is-32-bytes!", Duration::hours(1))
    }

    #[test]
    fn token_carries_both_identities() {
        let c = codec();
        let s = Session { user_id: Some(5), admin_id: Some(9) };
        assert_eq!(c.decode(&c.encode(&s).unwrap()).unwrap(), s);
        let anon = c.decode(&c.encode(&Session::default()).unwrap()).unwrap();
        assert!(anon.is_anonymous());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = SessionCodec::new(b"another-secret-another-secret-xx", Duration::hours(1));
        let token = other.encode(&Session::user(1)).unwrap();
        assert!(codec().decode(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let stale = SessionCodec::new(b"unit-test-secret-that-is-32-bytes!", Duration::seconds(-60));
        let token = stale.encode(&Session::user(1)).unwrap();
        assert!(codec().decode(&token).is_err());
    }

    #[test]
    fn issued_cookie_is_http_only() {
        let cookie = codec().issue(&Session::user(3)).unwrap();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }
}
