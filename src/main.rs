use std::{process, sync::Arc};

use derivo::{
    application::{
        derivatives::DerivativeService, error::AppError, inflight::InFlight,
        materialize::Materializer, ports::UrlCache,
    },
    cache::{MemoryUrlCache, MemoryUrlCacheConfig},
    config::{self, StorageSettings},
    infra::{
        error::InfraError,
        http::{self, DispatcherState, GuardianState},
        reaper::StorageReaper,
        storage::ConfiguredStorage,
        telemetry,
        transformer::HttpTransformer,
    },
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Reap(_) => run_reap(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let storage = ConfiguredStorage::from_settings(&settings.storage)?;
    let derivatives = build_derivative_service(&settings, &storage)?;

    let reaper_handle = build_reaper(&settings).and_then(StorageReaper::spawn);

    let dispatcher_state = DispatcherState {
        derivatives: derivatives.clone(),
        whitelist: Arc::new(settings.whitelist.clone()),
        files: storage.files(),
    };
    let guardian_state = GuardianState { derivatives };

    let result = serve_http(&settings, dispatcher_state, guardian_state).await;

    if let Some(handle) = reaper_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_reap(settings: config::Settings) -> Result<(), AppError> {
    let Some(reaper) = build_reaper(&settings) else {
        warn!(
            target = "derivo::reap",
            "nothing to reap: storage is not filesystem-backed or image_ttl_seconds <= 0"
        );
        return Ok(());
    };

    let summary = reaper.sweep().await;
    info!(
        target = "derivo::reap",
        scanned = summary.scanned,
        removed = summary.removed,
        failed = summary.failed,
        "Reap completed"
    );
    Ok(())
}

fn build_derivative_service(
    settings: &config::Settings,
    storage: &ConfiguredStorage,
) -> Result<Arc<DerivativeService>, AppError> {
    let transformer = HttpTransformer::new(
        settings.transformer.endpoint.clone(),
        settings.transformer.timeout,
    )
    .map_err(|err| AppError::from(InfraError::HttpClient(err.to_string())))?;

    let cache: Arc<dyn UrlCache> = Arc::new(MemoryUrlCache::new(
        &MemoryUrlCacheConfig::from(&settings.cache),
    ));
    let backend = storage.backend();

    let materializer = Materializer::new(
        settings.presets.clone(),
        Arc::new(transformer),
        backend.clone(),
        cache.clone(),
    );

    info!(
        target = "derivo::serve",
        scheme = backend.scheme(),
        presets = ?settings.presets.names().collect::<Vec<_>>(),
        "derivative pipeline ready"
    );

    Ok(Arc::new(DerivativeService::new(
        materializer,
        backend,
        cache,
        InFlight::new(),
    )))
}

fn build_reaper(settings: &config::Settings) -> Option<StorageReaper> {
    match &settings.storage {
        StorageSettings::Fs(fs) => {
            let reaper = StorageReaper::new(&fs.root, fs.image_ttl_seconds, fs.reap_interval);
            reaper.is_enabled().then_some(reaper)
        }
        StorageSettings::Object(_) => None,
    }
}

async fn serve_http(
    settings: &config::Settings,
    dispatcher_state: DispatcherState,
    guardian_state: GuardianState,
) -> Result<(), AppError> {
    let dispatcher_router = http::build_dispatcher_router(dispatcher_state);
    let guardian_router = http::build_guardian_router(guardian_state);

    let dispatcher_listener = tokio::net::TcpListener::bind(settings.server.dispatcher_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let guardian_listener = tokio::net::TcpListener::bind(settings.server.guardian_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "derivo::serve",
        dispatcher = %settings.server.dispatcher_addr,
        guardian = %settings.server.guardian_addr,
        "listeners bound"
    );

    let dispatcher_server = axum::serve(dispatcher_listener, dispatcher_router.into_make_service());
    let guardian_server = axum::serve(guardian_listener, guardian_router.into_make_service());

    try_join!(dispatcher_server, guardian_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
