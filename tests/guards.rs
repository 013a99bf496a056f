use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::{http::header, test, web, App, HttpResponse};
use chrono::Duration;
use novella::guards::{require_admin, require_login, require_self};
use novella::models::Id;
use novella::{CurrentUser, Denied, Guard, GuardLayer, Kwargs, RequireAdmin, RequireLogin, RequireSelf, Session, SessionCodec};

const SECRET: &[u8] = b"guards-test-secret-with-32-bytes!!";

fn codec() -> SessionCodec {
    SessionCodec::new(SECRET, Duration::hours(1))
}

// ---------------- plain operations ----------------

#[::core::prelude::v1::test]
fn login_guard_passes_user_id_to_the_operation() {
    let seen = Cell::new(None);
    let op = require_login(|uid: Id, kw: &Kwargs| {
        seen.set(Some(uid));
        kw.get("page").map(str::to_owned)
    });

    let out = op.call(&Session::user(7), &Kwargs::new().with("page", 2)).unwrap();
    assert_eq!(out.as_deref(), Some("2"));
    assert_eq!(seen.get(), Some(7));
}

#[::core::prelude::v1::test]
fn anonymous_caller_never_reaches_the_operation() {
    let hits = Cell::new(0);
    let login = require_login(|_: Id, _: &Kwargs| hits.set(hits.get() + 1));
    let own = require_self("target_id", |_: Id, _: &Kwargs| hits.set(hits.get() + 1));
    let admin = require_admin(|_: &Kwargs| hits.set(hits.get() + 1));
    let kw = Kwargs::new().with("target_id", 1);

    assert_eq!(login.call(&Session::default(), &kw), Err(Denied::LoginRequired));
    assert_eq!(own.call(&Session::default(), &kw), Err(Denied::LoginRequired));
    assert_eq!(admin.call_admin(&Session::default(), &kw), Err(Denied::AdminLoginRequired));
    assert_eq!(hits.get(), 0);
}

#[::core::prelude::v1::test]
fn self_guard_compares_session_user_with_target() {
    let hits = Cell::new(0);
    let op = RequireSelf::new("target_id").wrap(|uid: Id, _: &Kwargs| {
        hits.set(hits.get() + 1);
        uid
    });
    let s = Session::user(5);

    assert_eq!(op.call(&s, &Kwargs::new().with("target_id", 5)), Ok(5));
    assert_eq!(op.call(&s, &Kwargs::new().with("target_id", 6)), Err(Denied::Forbidden));
    assert_eq!(op.call(&s, &Kwargs::new()), Err(Denied::BadRequest));
    assert_eq!(op.call(&s, &Kwargs::new().with("other", 5)), Err(Denied::BadRequest));
    assert_eq!(hits.get(), 1);
}

#[::core::prelude::v1::test]
fn admin_guard_forwards_arguments_unchanged() {
    let got = RefCell::new(None);
    let op = require_admin(|kw: &Kwargs| *got.borrow_mut() = Some(kw.clone()));
    let kw = Kwargs::new().with("novel_id", 3).with("reason", "spam");

    op.call_admin(&Session::admin(1), &kw).unwrap();
    assert_eq!(*got.borrow(), Some(kw.clone()));

    // a user session is not an admin session, even with the same id
    assert_eq!(op.call_admin(&Session::user(1), &kw), Err(Denied::AdminLoginRequired));
}

#[::core::prelude::v1::test]
fn guards_are_stateless_between_calls() {
    let op = RequireLogin.wrap(|uid: Id, _: &Kwargs| uid);
    assert_eq!(op.call(&Session::user(1), &Kwargs::new()), Ok(1));
    assert_eq!(op.call(&Session::default(), &Kwargs::new()), Err(Denied::LoginRequired));
    assert_eq!(op.call(&Session::user(2), &Kwargs::new()), Ok(2));
    assert_eq!(RequireAdmin.check(&Session { user_id: Some(1), admin_id: Some(4) }, &Kwargs::new()), Ok(()));
}

// ---------------- actix-web integration ----------------

async fn whoami(CurrentUser(uid): CurrentUser, hits: web::Data<AtomicUsize>) -> HttpResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    HttpResponse::Ok().body(uid.to_string())
}

async fn dashboard(hits: web::Data<AtomicUsize>) -> HttpResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    HttpResponse::Ok().body("dashboard")
}

macro_rules! guarded_app {
    ($hits:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(codec()))
                .app_data($hits.clone())
                .service(web::resource("/me").wrap(GuardLayer::new(RequireLogin)).route(web::get().to(whoami)))
                .service(
                    web::resource("/users/{user_id}/bookmarks")
                        .wrap(GuardLayer::new(RequireSelf::new("user_id")))
                        .route(web::get().to(whoami)),
                )
                .service(
                    web::scope("/admin")
                        .wrap(GuardLayer::new(RequireAdmin))
                        .route("/dashboard", web::get().to(dashboard)),
                ),
        )
        .await
    };
}

#[actix_web::test]
async fn anonymous_requests_redirect_to_login_pages() {
    let hits = web::Data::new(AtomicUsize::new(0));
    let app = guarded_app!(hits);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/me").to_request()).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/admin/dashboard").to_request()).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/admin/login");

    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn logged_in_user_reaches_handler_with_identity() {
    let hits = web::Data::new(AtomicUsize::new(0));
    let app = guarded_app!(hits);
    let cookie = codec().issue(&Session::user(11)).unwrap();

    let req = test::TestRequest::get().uri("/me").cookie(cookie).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(test::read_body(resp).await, "11");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn self_guard_over_path_parameters() {
    let hits = web::Data::new(AtomicUsize::new(0));
    let app = guarded_app!(hits);
    let cookie = codec().issue(&Session::user(11)).unwrap();

    let req = test::TestRequest::get().uri("/users/11/bookmarks").cookie(cookie.clone()).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/users/12/bookmarks").cookie(cookie.clone()).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    assert_eq!(test::read_body(resp).await, "Forbidden");

    let req = test::TestRequest::get().uri("/users/me/bookmarks").cookie(cookie).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(test::read_body(resp).await, "Bad Request");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn admin_session_opens_admin_scope_but_not_user_routes() {
    let hits = web::Data::new(AtomicUsize::new(0));
    let app = guarded_app!(hits);
    let cookie = codec().issue(&Session::admin(1)).unwrap();

    let req = test::TestRequest::get().uri("/admin/dashboard").cookie(cookie.clone()).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/me").cookie(cookie).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn tampered_cookie_is_treated_as_anonymous() {
    let hits = web::Data::new(AtomicUsize::new(0));
    let app = guarded_app!(hits);
    let foreign = SessionCodec::new(b"some-other-secret-also-32-bytes!!", Duration::hours(1));
    let cookie = foreign.issue(&Session::user(11)).unwrap();

    let req = test::TestRequest::get().uri("/me").cookie(cookie).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn current_user_without_guard_redirects() {
    let hits = web::Data::new(AtomicUsize::new(0));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(codec()))
            .app_data(hits.clone())
            .route("/open", web::get().to(whoami)),
    )
    .await;
    let cookie = codec().issue(&Session::user(3)).unwrap();

    let req = test::TestRequest::get().uri("/open").cookie(cookie).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
