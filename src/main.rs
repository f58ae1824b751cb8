use anyhow::Result;
use hostpanel::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let executor = executor::CommandExecutor::new();
    let notifier = Arc::new(notifier::Notifier::from_config(
        &app_config,
        executor.clone(),
    ));
    if app_config.alerts.alert_email.is_none() {
        tracing::info!("alerts.alert_email not set; error notifications are not mailed");
    }

    let cert_repo = Arc::new(cert_repo::CertRepo::connect(&app_config.database.path).await?);
    cert_repo.init().await?;

    let sites = Arc::new(site_repo::SiteRepo::new(&app_config, executor.clone()));
    let certificates = Arc::new(cert_manager::CertificateManager::new(
        &app_config,
        cert_repo,
        sites.clone(),
        executor.clone(),
    ));
    let sampler = Arc::new(health::HealthSampler::new(
        &app_config,
        sysinfo_repo::SysinfoRepo::new(),
        executor.clone(),
        notifier.clone(),
    ));
    let health = sampler.handle();

    let scheduler = Arc::new(scheduler::Scheduler::new(notifier.clone()));
    jobs::register_default_jobs(
        &scheduler,
        &app_config,
        jobs::JobDeps {
            sampler,
            backup: Arc::new(jobs::BackupJob::new(&app_config, executor.clone())),
            certificates: certificates.clone(),
            notifier: notifier.clone(),
        },
    )?;
    // First sample now instead of waiting for the first cron boundary.
    scheduler.trigger(jobs::HEALTH_SAMPLE)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let scheduler_handle = scheduler::spawn(
        scheduler.clone(),
        Duration::from_secs(app_config.schedule.tick_secs),
        shutdown_rx,
    );

    let orchestrator = Arc::new(orchestrator::Orchestrator::new(
        &app_config,
        orchestrator::OrchestratorDeps {
            sites,
            certificates,
            health,
            notifier,
            executor,
        },
    ));
    let app = routes::app(orchestrator, &app_config);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    let _ = scheduler_handle.await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
