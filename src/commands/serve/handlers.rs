use axum::Form;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{error, info, warn};

use super::AppState;
use super::identity::{IdentityError, UserIdentity};
use super::session::{expired_session_cookie, session_cookie, session_id_from_headers};
use super::views;
use crate::commands::search::{list_sections, search_pages};
use crate::model::PageQuery;

const LOGIN_FAILED: &str = "Login failed: Invalid username or password";
const PROVIDER_DOWN: &str = "Sign-in service is unavailable, please try again later";

#[derive(Debug, Deserialize)]
pub(crate) struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm_password: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchParams {
    query: Option<String>,
    section: Option<String>,
}

struct SignedIn {
    session_id: String,
    user: UserIdentity,
}

/// Resolves the session user against the identity provider; any failure
/// is treated as signed out.
async fn current_user(state: &AppState, headers: &HeaderMap) -> Option<SignedIn> {
    let session_id = session_id_from_headers(headers)?;
    let session = state.sessions.get(&session_id)?;
    let user = session.user?;

    match state
        .identity
        .resolve_identity(&user.id, session.identity_token.as_deref())
        .await
    {
        Ok(Some(user)) => Some(SignedIn { session_id, user }),
        Ok(None) => {
            warn!(user_id = %user.id, "session user no longer exists; signing out");
            state.sessions.sign_out(&session_id);
            None
        }
        Err(err) => {
            warn!(user_id = %user.id, error = %err, "failed to load session user");
            None
        }
    }
}

fn redirect_to_login() -> Response {
    Redirect::to("/login").into_response()
}

pub(crate) async fn index() -> Redirect {
    Redirect::to("/login")
}

pub(crate) async fn login_page(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let messages = session_id_from_headers(&headers)
        .map(|id| state.sessions.take_flashes(&id))
        .unwrap_or_default();
    Html(views::login_page(&messages))
}

pub(crate) async fn login_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    match state.identity.authenticate(&form.username, &form.password).await {
        Ok(auth) => {
            info!(username = %auth.user.username, "user signed in");
            let previous = session_id_from_headers(&headers);
            let session_id = state
                .sessions
                .sign_in(previous.as_deref(), auth.user, auth.token);
            (
                [(header::SET_COOKIE, session_cookie(&session_id))],
                Redirect::to("/dashboard"),
            )
                .into_response()
        }
        Err(err) => {
            warn!(username = %form.username, error = %err, "sign-in failed");
            let message = match err {
                IdentityError::ProviderUnavailable(_) => PROVIDER_DOWN,
                _ => LOGIN_FAILED,
            };
            Html(views::login_page(&[message.to_string()])).into_response()
        }
    }
}

pub(crate) async fn register_page(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Html<String> {
    let messages = session_id_from_headers(&headers)
        .map(|id| state.sessions.take_flashes(&id))
        .unwrap_or_default();
    Html(views::register_page(&messages))
}

pub(crate) async fn register_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<RegisterForm>,
) -> Response {
    if form.password != form.confirm_password {
        return Html(views::register_page(&["Passwords do not match".to_string()]))
            .into_response();
    }

    match state
        .identity
        .create_account(&form.username, &form.password, &form.name)
        .await
    {
        Ok(user) => {
            info!(username = %user.username, "account created");
            let previous = session_id_from_headers(&headers);
            let session_id = state
                .sessions
                .push_flash(previous.as_deref(), "Registration successful! Please login.");
            (
                [(header::SET_COOKIE, session_cookie(&session_id))],
                Redirect::to("/login"),
            )
                .into_response()
        }
        Err(err) => {
            warn!(username = %form.username, error = %err, "registration failed");
            let message = match err {
                IdentityError::DuplicateUsername => "Username already exists".to_string(),
                IdentityError::ProviderUnavailable(_) => PROVIDER_DOWN.to_string(),
                other => format!("Registration failed: {other}"),
            };
            Html(views::register_page(&[message])).into_response()
        }
    }
}

pub(crate) async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id_from_headers(&headers) else {
        return redirect_to_login();
    };

    match state.sessions.get(&session_id).and_then(|session| session.user) {
        Some(user) => info!(username = %user.username, "user signed out"),
        None => return redirect_to_login(),
    }
    state.sessions.sign_out(&session_id);

    (
        [(header::SET_COOKIE, expired_session_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

pub(crate) async fn dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(signed_in) = current_user(&state, &headers).await else {
        return redirect_to_login();
    };

    let sections = match state.with_read_connection(list_sections).await {
        Ok(sections) => sections,
        Err(err) => {
            error!(error = %err, "failed to load sections");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(views::error_page("The page database is unavailable.")),
            )
                .into_response();
        }
    };

    let messages = state.sessions.take_flashes(&signed_in.session_id);
    Html(views::dashboard_page(&signed_in.user, &sections, &messages)).into_response()
}

pub(crate) async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Response {
    if current_user(&state, &headers).await.is_none() {
        return redirect_to_login();
    }

    let query = PageQuery::new(params.query.as_deref(), params.section.as_deref());
    let search_query = query.clone();
    let result = state
        .with_read_connection(move |connection: &Connection| {
            search_pages(connection, &search_query)
        })
        .await;

    match result {
        Ok(hits) => {
            info!(
                query = query.query.as_deref().unwrap_or_default(),
                section = query.section.as_deref().unwrap_or_default(),
                returned = hits.len(),
                "search served"
            );
            Html(views::search_results(&hits)).into_response()
        }
        Err(err) => {
            error!(error = %err, "search failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(views::error_fragment("Search is unavailable right now.")),
            )
                .into_response()
        }
    }
}
