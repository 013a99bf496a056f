//! Access guards: predicates over the caller's [`Session`] that either let a
//! wrapped operation run with the verified identity or short-circuit with a
//! terminal response.
//!
//! A guard can be applied to a plain closure with [`Guard::wrap`] or mounted
//! on an actix-web scope/resource with [`GuardLayer`]. Either way the
//! operation is never invoked once the guard denies.

use std::collections::BTreeMap;
use std::rc::Rc;

use actix_web::body::EitherBody;
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::{header, StatusCode};
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use tracing::debug;

use crate::models::Id;
use crate::session::{session_of, Session};

pub const LOGIN_PATH: &str = "/login";
pub const ADMIN_LOGIN_PATH: &str = "/admin/login";

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    #[error("login required")] LoginRequired,
    #[error("admin login required")] AdminLoginRequired,
    #[error("Bad Request")] BadRequest,
    #[error("Forbidden")] Forbidden,
}

impl ResponseError for Denied {
    fn status_code(&self) -> StatusCode {
        match self {
            Denied::LoginRequired | Denied::AdminLoginRequired => StatusCode::FOUND,
            Denied::BadRequest => StatusCode::BAD_REQUEST,
            Denied::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            Denied::LoginRequired => redirect(LOGIN_PATH),
            Denied::AdminLoginRequired => redirect(ADMIN_LOGIN_PATH),
            Denied::BadRequest | Denied::Forbidden => HttpResponse::build(self.status_code())
                .content_type("text/plain; charset=utf-8")
                .body(self.to_string()),
        }
    }
}

fn redirect(location: &'static str) -> HttpResponse {
    HttpResponse::Found().insert_header((header::LOCATION, location)).finish()
}

/// Keyword arguments a route hands to a guarded operation (path parameters over HTTP).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Kwargs(BTreeMap<String, String>);

impl Kwargs {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn from_request(req: &HttpRequest) -> Self {
        Self(req.match_info().iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }
}

/// Shared capability of the three guards.
pub trait Guard {
    /// What a successful check hands to the operation.
    type Identity;

    fn check(&self, session: &Session, kwargs: &Kwargs) -> Result<Self::Identity, Denied>;

    fn wrap<F>(self, op: F) -> Guarded<Self, F>
    where
        Self: Sized,
    {
        Guarded { guard: self, op }
    }
}

/// Requires `user_id` in the session and passes it on.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireLogin;

impl Guard for RequireLogin {
    type Identity = Id;

    fn check(&self, session: &Session, _: &Kwargs) -> Result<Id, Denied> {
        session.user_id.ok_or(Denied::LoginRequired)
    }
}

/// Requires the session user to be the one named by a keyword argument.
#[derive(Debug, Clone)]
pub struct RequireSelf {
    field: String,
}

impl RequireSelf {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }

    pub fn field(&self) -> &str { &self.field }
}

impl Guard for RequireSelf {
    type Identity = Id;

    fn check(&self, session: &Session, kwargs: &Kwargs) -> Result<Id, Denied> {
        let uid = session.user_id.ok_or(Denied::LoginRequired)?;
        let target = kwargs.get(&self.field).ok_or(Denied::BadRequest)?;
        let target: Id = target.trim().parse().map_err(|_| Denied::BadRequest)?;
        if uid != target {
            debug!(uid, target, field = %self.field, "session user does not own target");
            return Err(Denied::Forbidden);
        }
        Ok(uid)
    }
}

/// Requires an admin marker in the session; injects nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireAdmin;

impl Guard for RequireAdmin {
    type Identity = ();

    fn check(&self, session: &Session, _: &Kwargs) -> Result<(), Denied> {
        session.admin_id.map(|_| ()).ok_or(Denied::AdminLoginRequired)
    }
}

/// An operation behind a guard.
pub struct Guarded<G, F> {
    guard: G,
    op: F,
}

impl<G: Guard, F> Guarded<G, F> {
    /// Checks the guard, then runs the operation with the identity first.
    pub fn call<R>(&self, session: &Session, kwargs: &Kwargs) -> Result<R, Denied>
    where
        F: Fn(G::Identity, &Kwargs) -> R,
    {
        let identity = self.guard.check(session, kwargs)?;
        Ok((self.op)(identity, kwargs))
    }
}

impl<F> Guarded<RequireAdmin, F> {
    /// Admin-guarded operations receive their arguments unchanged.
    pub fn call_admin<R>(&self, session: &Session, kwargs: &Kwargs) -> Result<R, Denied>
    where
        F: Fn(&Kwargs) -> R,
    {
        self.guard.check(session, kwargs)?;
        Ok((self.op)(kwargs))
    }
}

pub fn require_login<F>(op: F) -> Guarded<RequireLogin, F> {
    RequireLogin.wrap(op)
}

pub fn require_self<F>(field: impl Into<String>, op: F) -> Guarded<RequireSelf, F> {
    RequireSelf::new(field).wrap(op)
}

pub fn require_admin<F>(op: F) -> Guarded<RequireAdmin, F> {
    RequireAdmin.wrap(op)
}

// ---------------- actix-web integration ----------------

/// Identity stored in request extensions by a passing guard.
#[derive(Debug, Clone, Copy)]
struct Verified<T>(T);

/// Extractor for the user id verified by `RequireLogin` / `RequireSelf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Id);

impl FromRequest for CurrentUser {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let found = req.extensions().get::<Verified<Id>>().map(|v| CurrentUser(v.0));
        ready(found.ok_or_else(|| Denied::LoginRequired.into()))
    }
}

/// Middleware mounting a [`Guard`] on a scope or resource.
///
/// Path parameters become the keyword arguments, so `RequireSelf` must be
/// mounted where its field is already matched (the resource, or a scope
/// whose own path declares it).
pub struct GuardLayer<G> {
    guard: Rc<G>,
}

impl<G> Clone for GuardLayer<G> {
    fn clone(&self) -> Self {
        Self { guard: self.guard.clone() }
    }
}

impl<G> GuardLayer<G> {
    pub fn new(guard: G) -> Self {
        Self { guard: Rc::new(guard) }
    }
}

impl<S, B, G> Transform<S, ServiceRequest> for GuardLayer<G>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
    G: Guard + 'static,
    G::Identity: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = GuardMiddleware<S, G>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(GuardMiddleware {
            service: Rc::new(service),
            guard: self.guard.clone(),
        }))
    }
}

pub struct GuardMiddleware<S, G> {
    service: Rc<S>,
    guard: Rc<G>,
}

impl<S, B, G> Service<ServiceRequest> for GuardMiddleware<S, G>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
    G: Guard + 'static,
    G::Identity: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let session = session_of(req.request());
        let kwargs = Kwargs::from_request(req.request());
        match self.guard.check(&session, &kwargs) {
            Err(denied) => {
                debug!(path = %req.path(), reason = %denied, "request denied by guard");
                let res = req.into_response(denied.error_response()).map_into_right_body();
                Box::pin(ready(Ok(res)))
            }
            Ok(identity) => {
                req.extensions_mut().insert(Verified(identity));
                let svc = self.service.clone();
                Box::pin(async move { svc.call(req).await.map(|res| res.map_into_left_body()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn require_self_rejects_non_numeric_target() {
        let g = RequireSelf::new("target_id");
        let s = Session::user(5);
        assert_eq!(g.check(&s, &Kwargs::new().with("target_id", "five")), Err(Denied::BadRequest));
        assert_eq!(g.check(&s, &Kwargs::new().with("target_id", " 5 ")), Ok(5));
    }

    #[test]
    fn require_self_checks_login_before_target() {
        let g = RequireSelf::new("target_id");
        assert_eq!(g.check(&Session::default(), &Kwargs::new()), Err(Denied::LoginRequired));
    }

    #[test]
    fn admin_marker_is_not_a_user_identity() {
        let hits = Cell::new(0);
        let op = require_login(|_uid: Id, _: &Kwargs| hits.set(hits.get() + 1));
        assert_eq!(op.call(&Session::admin(1), &Kwargs::new()), Err(Denied::LoginRequired));
        assert_eq!(hits.get(), 0);
        assert_eq!(RequireAdmin.check(&Session::user(1), &Kwargs::new()), Err(Denied::AdminLoginRequired));
    }

    #[test]
    fn denial_responses() {
        let r = Denied::LoginRequired.error_response();
        assert_eq!(r.status(), StatusCode::FOUND);
        assert_eq!(r.headers().get(header::LOCATION).unwrap(), "/login");
        let r = Denied::AdminLoginRequired.error_response();
        assert_eq!(r.headers().get(header::LOCATION).unwrap(), "/admin/login");
        assert_eq!(Denied::BadRequest.error_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(Denied::Forbidden.error_response().status(), StatusCode::FORBIDDEN);
    }
}
