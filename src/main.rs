use std::sync::Arc;

use actix_web::{middleware::Compress, web, App, HttpResponse, HttpServer, Responder};
use anyhow::Context;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use novella::config::Config;
use novella::openapi::ApiDoc;
use novella::repo::Repo;
use novella::{AppState, SessionCodec};

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable at least one of the `inmem-store` or `postgres-store` features");

async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &Config) -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    let db_url = cfg.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .connect(db_url)
        .await
        .context("failed to connect to Postgres")?;
    let repo = novella::repo::pg::PgRepo::new(pool);
    repo.migrate().await.context("failed to apply migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &Config) -> anyhow::Result<Arc<dyn Repo>> {
    let repo = novella::repo::inmem::InMemRepo::open(cfg.data_dir.clone())
        .context("failed to load in-memory snapshot")?;
    info!(dir = %cfg.data_dir.display(), "Using in-memory repository backend");
    Ok(Arc::new(repo))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::from_env()?;
    info!(bind = %cfg.bind_addr, "Bootstrapping novella server");

    let state = AppState { repo: build_repo(&cfg).await? };
    let codec = web::Data::new(
        SessionCodec::new(cfg.session_secret.as_bytes(), cfg.session_ttl).with_secure_cookies(cfg.secure_cookies),
    );
    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .app_data(codec.clone())
            .app_data(web::Data::new(state.clone()))
            .route("/healthz", web::get().to(healthz))
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(cfg.bind_addr.as_str())
    .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}
