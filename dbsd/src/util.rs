//! Various axum-related utilities.

use axum::{
    async_trait,
    extract::{FromRequestParts, TypedHeader},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dbs_common::{
    db, errors::DisplayCausesAndBacktraceExt, prelude::*, provenance::Provenance,
    rest_api::ErrorRecord,
};
use headers::{authorization::Basic, Authorization};
use std::result;

/// State shared by all our handlers.
#[derive(Clone)]
pub struct AppState {
    /// Our database connections.
    pub pool: db::Pool,
    /// Our dataset writer.
    pub provenance: Arc<Provenance>,
    /// If set, the password every client must send.
    pub password: Option<String>,
}

/// Run `f` on the blocking thread pool, with a connection from our pool.
pub async fn run_blocking<T, F>(state: &AppState, f: F) -> DbsdResult<T>
where
    F: FnOnce(&AppState, Conn<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = state.pool.get().with_context(|| {
            DbsError::new(
                ErrorKind::Transaction,
                "no database connection available",
                "dbsd.pool",
            )
        })?;
        f(&state, conn.conn())
    })
    .await
    .context("database task failed")?;
    Ok(result?)
}

/// The client making a request, identified by their HTTP Basic Auth user
/// name. Recorded as `create_by` and `modify_by`.
#[derive(Clone, Debug)]
pub struct Actor(pub String);

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> result::Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(basic)) =
            TypedHeader::<Authorization<Basic>>::from_request_parts(parts, state)
                .await
                .map_err(|_| unauthorized())?;
        if basic.username().is_empty() {
            return Err(unauthorized());
        }
        if let Some(password) = &state.password {
            if basic.password() != password {
                warn!(user = basic.username(), "rejected bad password");
                return Err(unauthorized());
            }
        }
        Ok(Actor(basic.username().to_owned()))
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"dbs\"")],
        "authentication required",
    )
        .into_response()
}

/// The HTTP status we report for each kind of error.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Decode | ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Transaction => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// An error type for `dbsd`, which knows how to become an HTTP response.
#[derive(Debug)]
pub struct DbsdError(Error);

impl IntoResponse for DbsdError {
    fn into_response(self) -> Response {
        let status = status_for(ErrorKind::of(&self.0));
        if status.is_server_error() {
            error!("{}", self.0.display_causes_and_backtrace());
        } else {
            warn!("{}", self.0.display_causes_without_backtrace());
        }
        (status, Json(ErrorRecord::from_error(&self.0))).into_response()
    }
}

impl From<Error> for DbsdError {
    fn from(err: Error) -> Self {
        DbsdError(err)
    }
}

/// The result type of `dbsd` handlers.
pub type DbsdResult<T> = result::Result<T, DbsdError>;
