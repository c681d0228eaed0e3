#![forbid(unsafe_code)]

use anyhow::Result;
use log::info;
use poem::error::NotFoundError;
use poem::http::StatusCode;
use poem::listener::{Listener, RustlsCertificate, RustlsConfig};
use poem::middleware::CatchPanic;
use poem::{listener::TcpListener, Endpoint, EndpointExt, IntoResponse, Route};
use poem_openapi::error::ParseParamError;
use poem_openapi::OpenApiService;

// Server Utilities
use crate::greeting::greeting_get::GreetingApi;
use crate::greeting::link_builder::LinkBuilder;
use crate::greeting::version::VersionApi;
use crate::utils::config::{init_greeting_dirs, init_log, init_runtime_context, Config,
                           GreetingDirs, RuntimeCtx, GREETING_ARGS};
use crate::utils::errors::{Errors, HttpResult};

// Modules
mod greeting;
mod utils;

// ***************************************************************************
//                                Constants
// ***************************************************************************
const SERVER_NAME : &str = "GreetingServer"; // for poem logging

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<()> {
    // --------------- Initialize Server --------------
    // Announce ourselves.
    println!("Starting greeting_server!");

    // The data directories have to exist before logging can be configured.
    let dirs = init_greeting_dirs(&GREETING_ARGS)?;
    if GREETING_ARGS.create_dirs_only {
        println!("Data directories are ready under {}.", dirs.root_dir);
        return Ok(());
    }

    let ctx = server_init(dirs)?;

    // --------------- Main Loop Set Up ---------------
    let config = &ctx.parms.config;
    let addr = format!("{}{}", "0.0.0.0:", config.http_port);
    let app = make_app(config);

    // ------------------ Main Loop -------------------
    info!("Listening on {} ({}).", addr, config.scheme());
    if config.tls_enabled {
        let (key_file, cert_file) = ctx.tls_files();
        let listener = TcpListener::bind(addr).rustls(
            RustlsConfig::new().fallback(
                RustlsCertificate::new()
                    .key(std::fs::read(key_file)?)
                    .cert(std::fs::read(cert_file)?),
            ),
        );
        poem::Server::new(listener).name(SERVER_NAME).run(app).await?;
    } else {
        poem::Server::new(TcpListener::bind(addr)).name(SERVER_NAME).run(app).await?;
    }

    Ok(())
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// server_init:
// ---------------------------------------------------------------------------
/** Initialize logging and read the configuration. */
fn server_init(dirs: GreetingDirs) -> Result<RuntimeCtx> {
    init_log(&dirs)?;

    let ctx = init_runtime_context(dirs)?;
    info!("{}", Errors::InputParms(format!("{:#?}", ctx)));

    print_version_info();
    Ok(ctx)
}

// ---------------------------------------------------------------------------
// make_app:
// ---------------------------------------------------------------------------
/** Register the API endpoints and the generated OpenAPI documents.  Errors
 * that escape the endpoints are rendered as JSON HttpResult bodies.
 */
fn make_app(config: &Config) -> impl Endpoint {
    let endpoints = (GreetingApi::new(LinkBuilder::new(config)), VersionApi);
    let api_service =
        OpenApiService::new(endpoints, config.title.as_str(), env!("CARGO_PKG_VERSION"))
            .server(config.default_base_url());

    // Allow the generated openapi specs to be retrieved from the server.
    let spec = api_service.spec_endpoint();
    let spec_yaml = api_service.spec_endpoint_yaml();

    Route::new()
        .at("/spec", spec)
        .at("/spec_yaml", spec_yaml)
        .nest("/", api_service)
        .with(CatchPanic::new())
        .catch_error(|err: ParseParamError| async move {
            json_error(StatusCode::BAD_REQUEST, err.to_string())
        })
        .catch_error(|err: NotFoundError| async move {
            json_error(StatusCode::NOT_FOUND, err.to_string())
        })
}

// ---------------------------------------------------------------------------
// json_error:
// ---------------------------------------------------------------------------
fn json_error(status: StatusCode, msg: String) -> impl IntoResponse {
    let body = HttpResult::new(status.as_u16().to_string(), msg);
    (status, poem::web::Json(body))
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    info!("\n*** Running GREETING_SERVER={}, BRANCH={}, COMMIT={}, DIRTY={}, SRC_TS={}, RUSTC={}.",
          option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
          env!("GIT_BRANCH"),
          env!("GIT_COMMIT_SHORT"),
          env!("GIT_DIRTY"),
          env!("SOURCE_TIMESTAMP"),
          env!("RUSTC_VERSION"));
}
