//! `dbsd`: the data bookkeeping (provenance) server.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dbs_common::{
    config::Config,
    db, dbs_common_version,
    prelude::*,
    provenance::Provenance,
    query::{self, DatasetInfo},
    rest_api::SEPARATOR_PARAM,
    tracing_support::initialize_tracing,
};
use std::net::SocketAddr;
use structopt::StructOpt;

mod util;

use util::{run_blocking, Actor, AppState, DbsdResult};

/// Command-line options.
#[derive(Debug, StructOpt)]
#[structopt(name = "dbsd", about = "Data bookkeeping (provenance) server.")]
struct Opt {
    /// Path to a YAML or JSON configuration file.
    #[structopt(long = "config", parse(from_os_str))]
    config: PathBuf,

    /// Run any pending database migrations before serving.
    #[structopt(long = "migrate")]
    migrate: bool,
}

/// Parameters naming a single dataset.
#[derive(Debug, Deserialize)]
struct DidParam {
    did: String,
}

/// Return our `dbs_common` version.
async fn version() -> String {
    dbs_common_version().to_string()
}

/// Store a dataset described by a JSON record.
async fn post_dataset(
    State(state): State<AppState>,
    Actor(actor): Actor,
    body: Bytes,
) -> DbsdResult<(StatusCode, Json<Dataset>)> {
    let dataset = run_blocking(&state, move |state, conn| {
        state.provenance.insert_dataset(conn, &body, &actor)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(dataset)))
}

/// Change the site, processing or parent of a dataset.
async fn put_dataset(
    State(state): State<AppState>,
    Actor(actor): Actor,
    body: Bytes,
) -> DbsdResult<Json<Dataset>> {
    let dataset = run_blocking(&state, move |state, conn| {
        state.provenance.update_dataset(conn, &body, &actor)
    })
    .await?;
    Ok(Json(dataset))
}

/// Delete a dataset.
async fn delete_dataset(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Query(param): Query<DidParam>,
) -> DbsdResult<StatusCode> {
    info!(%actor, did = %param.did, "delete requested");
    run_blocking(&state, move |state, conn| {
        state.provenance.delete_dataset(conn, &param.did)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List datasets, optionally restricted to one `did`.
async fn get_datasets(
    State(state): State<AppState>,
    _actor: Actor,
    Query(mut params): Query<HashMap<String, String>>,
) -> DbsdResult<Response> {
    let separator = params.remove(SEPARATOR_PARAM);
    let rows =
        run_blocking(&state, move |_, conn| query::get_datasets(conn, &params)).await?;
    rows_response(&rows, separator.as_deref())
}

/// List the children of a dataset.
async fn get_child(
    State(state): State<AppState>,
    _actor: Actor,
    Query(mut params): Query<HashMap<String, String>>,
) -> DbsdResult<Response> {
    let separator = params.remove(SEPARATOR_PARAM);
    let rows =
        run_blocking(&state, move |_, conn| query::get_children(conn, &params)).await?;
    rows_response(&rows, separator.as_deref())
}

/// Send `rows` as JSON, or as delimited text if we have a `separator`.
fn rows_response(rows: &[DatasetInfo], separator: Option<&str>) -> DbsdResult<Response> {
    let mut body = vec![];
    query::write_rows(&mut body, rows, separator)?;
    let content_type = match separator {
        Some(sep) if !sep.is_empty() => "text/plain; charset=utf-8",
        _ => "application/json",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

/// Build our HTTP routes.
fn router(state: AppState) -> Router {
    Router::new()
        .route("/version", get(version))
        .route(
            "/dataset",
            post(post_dataset).put(put_dataset).delete(delete_dataset),
        )
        .route("/datasets", get(get_datasets))
        .route("/child", get(get_child))
        .with_state(state)
}

/// Serve requests until we're interrupted.
async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "listening");
    axum::Server::try_bind(&addr)
        .with_context(|| format!("could not listen on {}", addr))?
        .serve(router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("cannot listen for ctrl-c: {}", err);
        return;
    }
    info!("shutting down");
}

fn run() -> Result<()> {
    initialize_tracing();
    let opt = Opt::from_args();
    debug!("Args: {:?}", opt);

    let config = Config::load(&opt.config)?;
    if opt.migrate {
        let conn = db::connect(&config.database)?;
        db::run_pending_migrations(conn.conn(), &mut io::stdout())?;
    }

    let state = AppState {
        pool: db::Pool::new(&config.database)?,
        provenance: Arc::new(Provenance::from_config(&config.database)),
        password: config.auth.password.clone(),
    };
    let runtime = tokio::runtime::Runtime::new().context("could not start tokio")?;
    runtime.block_on(serve(state, config.port))
}

dbs_common::quick_main!(run);
