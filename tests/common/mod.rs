// Shared test helpers: a config rooted in a temp dir, with `true`/`false`/`sh -c` standing in
// for the web server, ACME client, service manager and database tools.
#![allow(dead_code)]

use hostpanel::cert_manager::CertificateManager;
use hostpanel::cert_repo::CertRepo;
use hostpanel::config::AppConfig;
use hostpanel::executor::{CommandExecutor, CommandTemplate};
use hostpanel::health::HealthSampler;
use hostpanel::notifier::Notifier;
use hostpanel::orchestrator::{Orchestrator, OrchestratorDeps};
use hostpanel::site_repo::SiteRepo;
use hostpanel::sysinfo_repo::SysinfoRepo;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[paths]
main_config = "{root}/nginx.conf"
sites_available = "{root}/sites-available"
sites_enabled = "{root}/sites-enabled"
web_root = "{root}/www"

[commands]
validate = ["true", "{config}"]
reload = ["true"]
acme_obtain = ["true"]
acme_renew = ["true"]
service_probe = ["true"]
ownership = ["true"]
sendmail = ["true"]
database_list = ["printf", "Database\\ninformation_schema\\nmysql\\nshop\\n"]

[timeouts]
validate_secs = 5
reload_secs = 5
certificate_secs = 5
probe_secs = 2
mail_secs = 2

[monitoring]
history_capacity = 4
services = ["nginx", "mysql"]
broadcast_capacity = 32

[backup]
location = "{root}/backups"
retention_days = 7
archives = [{ name = "sites", path = "{root}/www" }]
archive_command = ["sh", "-c", "echo archived > \"$0\"", "{output}"]
database_dump = ["echo", "-- dump"]

[alerts]
acme_email = "ops@example.com"
dedup_window_secs = 300

[database]
path = "{root}/panel.db"
"#;

pub struct TestEnv {
    pub dir: TempDir,
    pub config: AppConfig,
}

impl TestEnv {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

pub fn test_env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let toml = TEST_CONFIG.replace("{root}", dir.path().to_str().unwrap());
    let config = AppConfig::load_from_str(&toml).unwrap();
    TestEnv { dir, config }
}

pub fn argv(args: &[&str]) -> CommandTemplate {
    CommandTemplate::new(args.iter().copied())
}

pub fn notifier(config: &AppConfig) -> Arc<Notifier> {
    Arc::new(Notifier::from_config(config, CommandExecutor::new()))
}

pub fn site_repo(config: &AppConfig) -> Arc<SiteRepo> {
    Arc::new(SiteRepo::new(config, CommandExecutor::new()))
}

pub async fn cert_repo(config: &AppConfig) -> Arc<CertRepo> {
    let repo = CertRepo::connect(&config.database.path).await.unwrap();
    repo.init().await.unwrap();
    Arc::new(repo)
}

pub async fn cert_manager(config: &AppConfig, sites: Arc<SiteRepo>) -> Arc<CertificateManager> {
    Arc::new(CertificateManager::new(
        config,
        cert_repo(config).await,
        sites,
        CommandExecutor::new(),
    ))
}

pub fn sampler(config: &AppConfig, notifier: Arc<Notifier>) -> Arc<HealthSampler> {
    Arc::new(HealthSampler::new(
        config,
        SysinfoRepo::new(),
        CommandExecutor::new(),
        notifier,
    ))
}

pub struct Panel {
    pub orchestrator: Arc<Orchestrator>,
    pub notifier: Arc<Notifier>,
    pub sampler: Arc<HealthSampler>,
    pub sites: Arc<SiteRepo>,
}

pub async fn panel(config: &AppConfig) -> Panel {
    let notifier = notifier(config);
    let sites = site_repo(config);
    let certificates = cert_manager(config, sites.clone()).await;
    let sampler = sampler(config, notifier.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        OrchestratorDeps {
            sites: sites.clone(),
            certificates,
            health: sampler.handle(),
            notifier: notifier.clone(),
            executor: CommandExecutor::new(),
        },
    ));
    Panel {
        orchestrator,
        notifier,
        sampler,
        sites,
    }
}
