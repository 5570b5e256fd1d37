//! Web router.
//!
//! Each dashboard is its own sub-router behind a role gate. They are
//! merged into one protected router that shares the session stack.
//!
//! Middleware stack (outermost → innermost):
//! 1. Rate limiter → 2. Session + CSRF → 3. Audit logger → 4. Role gate
//!
//! `/login`, `/health` and `/static/app.js` sit outside the session
//! stack. Every response carries the security headers.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::core_state::CoreState;
use crate::models::StaffRole;
use crate::web::endpoints::{
    account, admin, assets, auth, doctor, health, home, lab, nurse, records, search,
};
use crate::web::middleware::{audit, rate, role::require_role, session};
use crate::web::render;
use crate::web::types::WebContext;

const RECORDS: &[StaffRole] = &[StaffRole::RecordsKeeper];
const PATIENT_READ: &[StaffRole] = &[
    StaffRole::RecordsKeeper,
    StaffRole::Doctor,
    StaffRole::Nurse,
    StaffRole::LabScientist,
];
const DOCTOR: &[StaffRole] = &[StaffRole::Doctor];
const NURSE: &[StaffRole] = &[StaffRole::Nurse];
const LAB: &[StaffRole] = &[StaffRole::LabScientist];
/// Admin passes every gate, so its own list is empty.
const ADMIN: &[StaffRole] = &[];

/// Build the application router.
///
/// Middleware reads `Extension<WebContext>` (injected as the outermost
/// layer). Handlers use `State<WebContext>` (provided via `with_state`).
pub fn app_router(core: Arc<CoreState>) -> Router {
    build_router(WebContext::new(core))
}

/// Build the router from a pre-constructed `WebContext`, so tests can
/// reach the session store directly.
#[cfg(test)]
pub(crate) fn app_router_with_ctx(ctx: WebContext) -> Router {
    build_router(ctx)
}

fn gated(routes: Router<WebContext>, ctx: &WebContext, roles: &'static [StaffRole]) -> Router {
    routes
        .with_state(ctx.clone())
        .layer(from_fn_with_state(roles, require_role))
}

fn build_router(ctx: WebContext) -> Router {
    let records = Router::new()
        .route("/records", get(records::dashboard))
        .route(
            "/records/patients",
            get(records::patients).post(records::create_patient),
        )
        .route("/records/patients/new", get(records::new_patient))
        .route(
            "/records/patients/:id/edit",
            get(records::edit_patient).post(records::update_patient),
        )
        .route(
            "/records/appointments",
            get(records::appointments).post(records::schedule),
        )
        .route("/records/appointments/:id/confirm", post(records::confirm))
        .route("/records/appointments/:id/cancel", post(records::cancel));

    let patient_read = Router::new().route("/records/patients/:id", get(records::view_patient));

    let doctor = Router::new()
        .route("/doctor", get(doctor::dashboard))
        .route("/doctor/appointments", get(doctor::appointments))
        .route(
            "/doctor/appointments/:id/complete",
            post(doctor::complete_appointment),
        )
        .route(
            "/doctor/appointments/:id/cancel",
            post(doctor::cancel_appointment),
        )
        .route("/doctor/patients/:id", get(doctor::patient))
        .route(
            "/doctor/patients/:id/test-requests",
            post(doctor::create_test_request),
        )
        .route(
            "/doctor/patients/:id/prescriptions",
            post(doctor::create_prescription),
        )
        .route(
            "/doctor/patients/:id/blood-requests",
            post(doctor::create_blood_request),
        )
        .route("/doctor/test-requests/:id", get(doctor::test_request))
        .route(
            "/doctor/test-requests/:id/cancel",
            post(doctor::cancel_test_request),
        )
        .route(
            "/doctor/prescriptions/:id/status",
            post(doctor::prescription_status),
        )
        .route(
            "/doctor/blood-requests/:id/cancel",
            post(doctor::cancel_blood_request),
        );

    let nurse = Router::new()
        .route("/nurse", get(nurse::dashboard))
        .route("/nurse/patients/:id", get(nurse::patient))
        .route("/nurse/patients/:id/vitals", post(nurse::record_vitals))
        .route("/nurse/prescriptions", get(nurse::prescriptions));

    let lab = Router::new()
        .route("/lab", get(lab::dashboard))
        .route("/lab/test-requests/:id", get(lab::worksheet))
        .route("/lab/test-requests/:id/collect", post(lab::collect))
        .route("/lab/test-requests/:id/results", post(lab::record_results))
        .route("/lab/catalog", get(lab::catalog).post(lab::add_test))
        .route("/lab/catalog/:id/toggle", post(lab::toggle_test))
        .route(
            "/lab/blood-requests/:id/:action",
            post(lab::blood_transition),
        );

    let admin = Router::new()
        .route("/admin", get(admin::dashboard))
        .route("/admin/staff", post(admin::create_staff))
        .route("/admin/staff/:id/active", post(admin::toggle_active))
        .route("/admin/staff/:id/password", post(admin::reset_password));

    // Any signed-in staff member
    let common = Router::new()
        .route("/", get(home::index))
        .route("/account", get(account::show))
        .route("/account/password", post(account::change_password))
        .route("/logout", post(auth::logout))
        .route("/api/patients/search", get(search::patients))
        .with_state(ctx.clone());

    // Layers are applied from bottom (innermost) to top (outermost).
    // Extension must be outermost so all middleware can read WebContext.
    let protected = Router::new()
        .merge(gated(records, &ctx, RECORDS))
        .merge(gated(patient_read, &ctx, PATIENT_READ))
        .merge(gated(doctor, &ctx, DOCTOR))
        .merge(gated(nurse, &ctx, NURSE))
        .merge(gated(lab, &ctx, LAB))
        .merge(gated(admin, &ctx, ADMIN))
        .merge(common)
        .layer(from_fn(audit::log_access))
        .layer(from_fn(session::require_staff))
        .layer(from_fn(rate::limit))
        .layer(Extension(ctx.clone()));

    // Sign-in: rate-limited only, CSRF checked by the handler
    let public = Router::new()
        .route("/login", get(auth::login_form).post(auth::login))
        .with_state(ctx.clone())
        .layer(from_fn(rate::limit))
        .layer(Extension(ctx.clone()));

    let open = Router::new()
        .route("/health", get(health::check))
        .route("/static/app.js", get(assets::app_js))
        .with_state(ctx);

    Router::new()
        .merge(protected)
        .merge(public)
        .merge(open)
        .fallback(not_found)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("same-origin"),
        ))
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Html(render::error_page(
            StatusCode::NOT_FOUND,
            "Not found",
            "There is no page at this address.",
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::response::Response;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::crypto;
    use crate::db::repository as repo;
    use crate::models::{NewStaff, PatientDetails};
    use crate::web::types::StaffIdentity;

    const PASSWORD: &str = "ward-round-42";

    /// WebContext backed by a temp database. The tempdir guard must be
    /// kept alive for the duration of the test.
    fn test_context() -> (WebContext, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database_path: tmp.path().join("clinicdesk.db"),
            ..AppConfig::default()
        };
        (WebContext::new(Arc::new(CoreState::new(config))), tmp)
    }

    fn add_staff(ctx: &WebContext, username: &str, role: StaffRole) -> StaffIdentity {
        let conn = ctx.core.open_db().unwrap();
        let staff = repo::insert_staff(
            &conn,
            &NewStaff {
                username: username.into(),
                full_name: format!("{username} Okafor"),
                role,
                password_hash: crypto::hash_password(PASSWORD).unwrap(),
            },
        )
        .unwrap();
        StaffIdentity {
            staff_id: staff.id,
            username: staff.username,
            full_name: staff.full_name,
            role: staff.role,
        }
    }

    /// Signed-in session for a new staff member: (cookie header, csrf token).
    fn sign_in(ctx: &WebContext, username: &str, role: StaffRole) -> (String, String) {
        let identity = add_staff(ctx, username, role);
        let mut sessions = ctx.sessions.lock().unwrap();
        let id = sessions.login(None, identity);
        let csrf = sessions.touch(&id).unwrap().csrf_token.clone();
        (format!("clinicdesk_session={id}"), csrf)
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(c) = cookie {
            builder = builder.header(header::COOKIE, c);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(c) = cookie {
            builder = builder.header(header::COOKIE, c);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn from_peer(mut req: Request<Body>, ip: [u8; 4]) -> Request<Body> {
        let addr = std::net::SocketAddr::from((ip, 50_000));
        req.extensions_mut().insert(axum::extract::ConnectInfo(addr));
        req
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn location(response: &Response) -> &str {
        response.headers().get(header::LOCATION).unwrap().to_str().unwrap()
    }

    fn set_cookie(response: &Response) -> String {
        response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    fn csrf_from_page(html: &str) -> String {
        let marker = r#"name="csrf_token" value=""#;
        let start = html.find(marker).unwrap() + marker.len();
        let end = html[start..].find('"').unwrap();
        html[start..start + end].to_string()
    }

    /// Open the login form: (anonymous cookie, csrf token).
    async fn open_login(app: &Router) -> (String, String) {
        let response = app.clone().oneshot(get("/login", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = set_cookie(&response);
        let html = body_text(response).await;
        (cookie, csrf_from_page(&html))
    }

    #[tokio::test]
    async fn dashboards_redirect_anonymous_to_login() {
        let (ctx, _tmp) = test_context();
        let app = app_router_with_ctx(ctx);

        for uri in ["/", "/records", "/doctor", "/nurse", "/lab", "/admin"] {
            let response = app.clone().oneshot(get(uri, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
            assert_eq!(location(&response), "/login");
        }
    }

    #[tokio::test]
    async fn health_is_public() {
        let (ctx, _tmp) = test_context();
        let app = app_router_with_ctx(ctx);

        let response = app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["database"], true);
    }

    #[tokio::test]
    async fn serves_app_js() {
        let (ctx, _tmp) = test_context();
        let app = app_router_with_ctx(ctx);

        let response = app.oneshot(get("/static/app.js", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/javascript"));
        assert!(body_text(response).await.contains("data-patient-search"));
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let (ctx, _tmp) = test_context();
        let app = app_router_with_ctx(ctx);

        let response = app.oneshot(get("/login", None)).await.unwrap();
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()["referrer-policy"], "same-origin");
    }

    #[tokio::test]
    async fn unknown_path_is_404_page() {
        let (ctx, _tmp) = test_context();
        let app = app_router_with_ctx(ctx);

        let response = app.oneshot(get("/no/such/page", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("Not found"));
    }

    #[tokio::test]
    async fn login_rotates_session_and_lands_on_dashboard() {
        let (ctx, _tmp) = test_context();
        add_staff(&ctx, "adaeze", StaffRole::Doctor);
        let app = app_router_with_ctx(ctx);

        let (anon_cookie, csrf) = open_login(&app).await;
        let body = format!("username=adaeze&password={PASSWORD}&csrf_token={csrf}");
        let response = app
            .clone()
            .oneshot(post_form("/login", Some(&anon_cookie), &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/doctor");
        let staff_cookie = set_cookie(&response);
        assert_ne!(staff_cookie, anon_cookie);

        let response = app
            .clone()
            .oneshot(get("/doctor", Some(&staff_cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        // The pre-login session id is dead
        let response = app.oneshot(get("/doctor", Some(&anon_cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn login_page_redirects_signed_in_staff() {
        let (ctx, _tmp) = test_context();
        let (cookie, _) = sign_in(&ctx, "chidi", StaffRole::Nurse);
        let app = app_router_with_ctx(ctx);

        let response = app.oneshot(get("/login", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/nurse");
    }

    #[tokio::test]
    async fn wrong_password_rerenders_form() {
        let (ctx, _tmp) = test_context();
        add_staff(&ctx, "bola", StaffRole::Nurse);
        let app = app_router_with_ctx(ctx);

        let (cookie, csrf) = open_login(&app).await;
        let body = format!("username=bola&password=nope-nope-nope&csrf_token={csrf}");
        let response = app
            .oneshot(post_form("/login", Some(&cookie), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let html = body_text(response).await;
        assert!(html.contains("Invalid username or password"));
        assert!(html.contains(r#"value="bola""#));
    }

    #[tokio::test]
    async fn disabled_account_cannot_sign_in() {
        let (ctx, _tmp) = test_context();
        let identity = add_staff(&ctx, "emeka", StaffRole::LabScientist);
        {
            let conn = ctx.core.open_db().unwrap();
            repo::set_staff_active(&conn, &identity.staff_id, false).unwrap();
        }
        let app = app_router_with_ctx(ctx);

        let (cookie, csrf) = open_login(&app).await;
        let body = format!("username=emeka&password={PASSWORD}&csrf_token={csrf}");
        let response = app
            .oneshot(post_form("/login", Some(&cookie), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_username() {
        let (ctx, _tmp) = test_context();
        add_staff(&ctx, "funmi", StaffRole::Doctor);
        let app = app_router_with_ctx(ctx);

        let (cookie, csrf) = open_login(&app).await;
        for _ in 0..5 {
            let body = format!("username=funmi&password=wrong-guess&csrf_token={csrf}");
            let response = app
                .clone()
                .oneshot(post_form("/login", Some(&cookie), &body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        // Even the right password is refused while locked
        let body = format!("username=funmi&password={PASSWORD}&csrf_token={csrf}");
        let response = app
            .oneshot(post_form("/login", Some(&cookie), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(body_text(response).await.contains("Too many failed attempts"));
    }

    #[tokio::test]
    async fn login_without_csrf_token_is_rejected() {
        let (ctx, _tmp) = test_context();
        add_staff(&ctx, "gozie", StaffRole::Doctor);
        let app = app_router_with_ctx(ctx);

        let (cookie, _) = open_login(&app).await;
        let body = format!("username=gozie&password={PASSWORD}");
        let response = app
            .oneshot(post_form("/login", Some(&cookie), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn role_gate_blocks_other_dashboards() {
        let (ctx, _tmp) = test_context();
        let (cookie, _) = sign_in(&ctx, "halima", StaffRole::Nurse);
        let app = app_router_with_ctx(ctx);

        for uri in ["/doctor", "/lab", "/records", "/admin", "/records/patients/new"] {
            let response = app.clone().oneshot(get(uri, Some(&cookie))).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        }
        let response = app.oneshot(get("/nurse", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_passes_every_gate() {
        let (ctx, _tmp) = test_context();
        let (cookie, _) = sign_in(&ctx, "root", StaffRole::Admin);
        let app = app_router_with_ctx(ctx);

        for uri in ["/admin", "/records", "/doctor", "/nurse", "/lab", "/lab/catalog"] {
            let response = app.clone().oneshot(get(uri, Some(&cookie))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn home_sends_staff_to_their_dashboard() {
        let (ctx, _tmp) = test_context();
        let (cookie, _) = sign_in(&ctx, "ify", StaffRole::LabScientist);
        let app = app_router_with_ctx(ctx);

        let response = app.oneshot(get("/", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/lab");
    }

    #[tokio::test]
    async fn clinical_roles_can_read_patient_record() {
        let (ctx, _tmp) = test_context();
        let patient = {
            let conn = ctx.core.open_db().unwrap();
            repo::register_patient(
                &conn,
                &PatientDetails {
                    first_name: "Ada".into(),
                    last_name: "Obi".into(),
                    date_of_birth: "1990-01-01".into(),
                    gender: "female".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap()
        };
        let (cookie, _) = sign_in(&ctx, "jide", StaffRole::Doctor);
        let app = app_router_with_ctx(ctx);

        let uri = format!("/records/patients/{}", patient.id);
        let response = app.clone().oneshot(get(&uri, Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Ada Obi"));

        let edit = format!("/records/patients/{}/edit", patient.id);
        let response = app.oneshot(get(&edit, Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn writes_require_csrf_token() {
        let (ctx, _tmp) = test_context();
        let (cookie, csrf) = sign_in(&ctx, "kemi", StaffRole::RecordsKeeper);
        let app = app_router_with_ctx(ctx.clone());

        let fields = "first_name=Tunde&last_name=Bakare&date_of_birth=1970-05-05&gender=male";
        let response = app
            .clone()
            .oneshot(post_form("/records/patients", Some(&cookie), fields))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(post_form(
                "/records/patients",
                Some(&cookie),
                &format!("{fields}&csrf_token=forged"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(post_form(
                "/records/patients",
                Some(&cookie),
                &format!("{fields}&csrf_token={csrf}"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("/records/patients/"));

        let conn = ctx.core.open_db().unwrap();
        assert_eq!(repo::count_patients(&conn, None).unwrap(), 1);
    }

    #[tokio::test]
    async fn csrf_header_is_accepted() {
        let (ctx, _tmp) = test_context();
        let (cookie, csrf) = sign_in(&ctx, "lola", StaffRole::Nurse);
        let app = app_router_with_ctx(ctx);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/logout")
            .header(header::COOKIE, &cookie)
            .header("X-CSRF-Token", &csrf)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let (ctx, _tmp) = test_context();
        let (cookie, csrf) = sign_in(&ctx, "musa", StaffRole::Doctor);
        let app = app_router_with_ctx(ctx);

        let response = app
            .clone()
            .oneshot(post_form("/logout", Some(&cookie), &format!("csrf_token={csrf}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0"));

        let response = app.oneshot(get("/doctor", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn patient_search_returns_role_links() {
        let (ctx, _tmp) = test_context();
        {
            let conn = ctx.core.open_db().unwrap();
            repo::register_patient(
                &conn,
                &PatientDetails {
                    first_name: "Ngozi".into(),
                    last_name: "Eze".into(),
                    date_of_birth: "1982-07-14".into(),
                    gender: "female".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        }
        let (cookie, _) = sign_in(&ctx, "nneka", StaffRole::Nurse);
        let app = app_router_with_ctx(ctx);

        let response = app
            .oneshot(get("/api/patients/search?q=ngoz", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let hits: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let hits = hits.as_array().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["name"], "Ngozi Eze");
        assert!(hits[0]["url"].as_str().unwrap().starts_with("/nurse/patients/"));
    }

    #[tokio::test]
    async fn disabling_staff_revokes_their_sessions() {
        let (ctx, _tmp) = test_context();
        let (admin_cookie, admin_csrf) = sign_in(&ctx, "root", StaffRole::Admin);
        let (nurse_cookie, _) = sign_in(&ctx, "ope", StaffRole::Nurse);
        let nurse_id = {
            let conn = ctx.core.open_db().unwrap();
            repo::find_staff_by_username(&conn, "ope").unwrap().unwrap().id
        };
        let app = app_router_with_ctx(ctx);

        let response = app
            .clone()
            .oneshot(post_form(
                &format!("/admin/staff/{nurse_id}/active"),
                Some(&admin_cookie),
                &format!("csrf_token={admin_csrf}"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = app.oneshot(get("/nurse", Some(&nurse_cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn flash_message_shows_once() {
        let (ctx, _tmp) = test_context();
        let (cookie, csrf) = sign_in(&ctx, "root", StaffRole::Admin);
        let app = app_router_with_ctx(ctx);

        let body = format!(
            "username=tayo&full_name=Tayo+Ade&role=nurse&password=long-enough-1&csrf_token={csrf}"
        );
        let response = app
            .clone()
            .oneshot(post_form("/admin/staff", Some(&cookie), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let first = body_text(app.clone().oneshot(get("/admin", Some(&cookie))).await.unwrap()).await;
        assert!(first.contains("Created tayo"));
        let second = body_text(app.oneshot(get("/admin", Some(&cookie))).await.unwrap()).await;
        assert!(!second.contains("Created tayo"));
        assert!(second.contains("Tayo Ade"));
    }

    #[tokio::test]
    async fn cookieless_flood_does_not_block_other_visitors() {
        let (ctx, _tmp) = test_context();
        let app = app_router_with_ctx(ctx);

        for _ in 0..120 {
            let response = app
                .clone()
                .oneshot(from_peer(get("/login", None), [10, 0, 0, 9]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .clone()
            .oneshot(from_peer(get("/login", None), [10, 0, 0, 9]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app
            .oneshot(from_peer(get("/login", None), [10, 0, 0, 10]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn made_up_cookies_share_the_peer_budget() {
        let (ctx, _tmp) = test_context();
        let app = app_router_with_ctx(ctx.clone());

        for i in 0..120 {
            let cookie = format!("clinicdesk_session=invented-{i}");
            let response = app
                .clone()
                .oneshot(from_peer(get("/login", Some(&cookie)), [10, 0, 0, 20]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .clone()
            .oneshot(from_peer(
                get("/login", Some("clinicdesk_session=invented-last")),
                [10, 0, 0, 20],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ctx.rate_limiter.lock().unwrap().tracked_clients(), 1);

        // A signed-in session from the same address has its own budget
        let (cookie, _) = sign_in(&ctx, "bisi", StaffRole::Nurse);
        let response = app
            .oneshot(from_peer(get("/nurse", Some(&cookie)), [10, 0, 0, 20]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn nan_vitals_are_not_stored() {
        let (ctx, _tmp) = test_context();
        let patient = {
            let conn = ctx.core.open_db().unwrap();
            repo::register_patient(
                &conn,
                &PatientDetails {
                    first_name: "Ada".into(),
                    last_name: "Obi".into(),
                    date_of_birth: "1990-01-01".into(),
                    gender: "female".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap()
        };
        let (cookie, csrf) = sign_in(&ctx, "ronke", StaffRole::Nurse);
        let app = app_router_with_ctx(ctx.clone());

        let uri = format!("/nurse/patients/{}/vitals", patient.id);
        let response = app
            .clone()
            .oneshot(post_form(
                &uri,
                Some(&cookie),
                &format!("temperature_c=NaN&csrf_token={csrf}"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let conn = ctx.core.open_db().unwrap();
        assert!(repo::list_vitals_for_patient(&conn, &patient.id, 10)
            .unwrap()
            .is_empty());

        let page = format!("/nurse/patients/{}", patient.id);
        let html = body_text(app.oneshot(get(&page, Some(&cookie))).await.unwrap()).await;
        assert!(html.contains("must be between 30 and 45"));
    }
}
