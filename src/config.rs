use serde::Deserialize;
use std::path::PathBuf;

use crate::executor::CommandTemplate;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Pre-shared bearer token for /api and /ws. Unset disables the check.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Requests one client may make to /api and /ws per window.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

fn default_rate_limit_max() -> usize {
    100
}

fn default_rate_limit_window_secs() -> u64 {
    15 * 60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Main web-server config, validated as a whole after every marker change.
    pub main_config: PathBuf,
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
    /// Parent of default document roots (`<web_root>/<slug>`).
    pub web_root: PathBuf,
    pub index_file: String,
    pub php_fpm_socket: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            main_config: "/etc/nginx/nginx.conf".into(),
            sites_available: "/etc/nginx/sites-available".into(),
            sites_enabled: "/etc/nginx/sites-enabled".into(),
            web_root: "/var/www".into(),
            index_file: "index.html".into(),
            php_fpm_socket: "/var/run/php/php8.1-fpm.sock".into(),
        }
    }
}

/// argv templates for the external tools. `{placeholder}`s are substituted per argument.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// `{config}` is a complete main config: the live one, or a generated one that
    /// includes the enabled set plus a staged site.
    pub validate: CommandTemplate,
    pub reload: CommandTemplate,
    /// `{domain}`, `{email}`.
    pub acme_obtain: CommandTemplate,
    pub acme_renew: CommandTemplate,
    /// `{service}`. Exit status 0 means running.
    pub service_probe: CommandTemplate,
    /// `{path}`. Run best-effort on new document roots.
    pub ownership: Option<CommandTemplate>,
    /// `{to}`. The full message is written to stdin.
    pub sendmail: CommandTemplate,
    /// One database name per stdout line.
    pub database_list: Option<CommandTemplate>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            validate: CommandTemplate::new(["nginx", "-t", "-q", "-c", "{config}"]),
            reload: CommandTemplate::new(["systemctl", "reload", "nginx"]),
            acme_obtain: CommandTemplate::new([
                "certbot",
                "--nginx",
                "-d",
                "{domain}",
                "--email",
                "{email}",
                "--agree-tos",
                "--non-interactive",
                "--redirect",
            ]),
            acme_renew: CommandTemplate::new(["certbot", "renew", "--quiet", "--no-self-upgrade"]),
            service_probe: CommandTemplate::new(["systemctl", "is-active", "--quiet", "{service}"]),
            ownership: Some(CommandTemplate::new([
                "chown",
                "-R",
                "www-data:www-data",
                "{path}",
            ])),
            sendmail: CommandTemplate::new(["sendmail", "-t"]),
            database_list: Some(CommandTemplate::new([
                "mysql",
                "-N",
                "-e",
                "SHOW DATABASES",
            ])),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub validate_secs: u64,
    pub reload_secs: u64,
    pub certificate_secs: u64,
    pub probe_secs: u64,
    pub mail_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            validate_secs: 30,
            reload_secs: 30,
            certificate_secs: 120,
            probe_secs: 10,
            mail_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Samples kept per metric (288 = 24h at 5-minute ticks).
    pub history_capacity: usize,
    pub cpu_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    pub services: Vec<String>,
    /// Max events buffered for slow push-channel observers.
    pub broadcast_capacity: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            history_capacity: 288,
            cpu_threshold_percent: 90.0,
            memory_threshold_percent: 90.0,
            services: ["nginx", "mysql", "postgresql", "redis", "php8.1-fpm"]
                .into_iter()
                .map(String::from)
                .collect(),
            broadcast_capacity: 64,
        }
    }
}

/// Cron expressions (UTC). Five-field expressions get a leading seconds field.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub health_sample: String,
    pub backup: String,
    pub certificate_renewal: String,
    /// Resolution of the global scheduler clock.
    pub tick_secs: u64,
    /// Wall-clock budget per job run; the run is abandoned after this.
    pub job_budget_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            health_sample: "0 */5 * * * *".into(),
            backup: "0 0 2 * * *".into(),
            certificate_renewal: "0 0 3 * * *".into(),
            tick_secs: 60,
            job_budget_secs: 6 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveSource {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub location: PathBuf,
    pub retention_days: u32,
    pub archives: Vec<ArchiveSource>,
    /// `{output}`, `{source}`.
    pub archive_command: CommandTemplate,
    /// stdout is written to `<location>/database-<timestamp>.sql`.
    pub database_dump: Option<CommandTemplate>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            location: "/var/backups/server-panel".into(),
            retention_days: 30,
            archives: vec![
                ArchiveSource {
                    name: "sites".into(),
                    path: "/var/www".into(),
                },
                ArchiveSource {
                    name: "nginx".into(),
                    path: "/etc/nginx".into(),
                },
            ],
            archive_command: CommandTemplate::new(["tar", "-czf", "{output}", "{source}"]),
            database_dump: Some(CommandTemplate::new(["mysqldump", "--all-databases"])),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Error notifications are mailed here when set.
    pub alert_email: Option<String>,
    pub from_address: String,
    /// Relay parameters, passed to the sendmail relay's environment by the operator.
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    /// ACME contact used when a site is created with `ssl = true`.
    pub acme_email: Option<String>,
    /// Identical (kind, message) pairs inside this window are sent once.
    pub dedup_window_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            alert_email: None,
            from_address: "panel@localhost".into(),
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            acme_email: None,
            dedup_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding certificate records.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/panel.db".into(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.server.api_token.as_deref() != Some(""),
            "server.api_token must be non-empty when set"
        );
        anyhow::ensure!(
            self.server.rate_limit_max > 0,
            "server.rate_limit_max must be > 0, got {}",
            self.server.rate_limit_max
        );
        anyhow::ensure!(
            self.server.rate_limit_window_secs > 0,
            "server.rate_limit_window_secs must be > 0, got {}",
            self.server.rate_limit_window_secs
        );
        anyhow::ensure!(
            !self.paths.sites_available.as_os_str().is_empty(),
            "paths.sites_available must be non-empty"
        );
        anyhow::ensure!(
            !self.paths.sites_enabled.as_os_str().is_empty(),
            "paths.sites_enabled must be non-empty"
        );
        anyhow::ensure!(
            self.paths.sites_available != self.paths.sites_enabled,
            "paths.sites_available and paths.sites_enabled must differ"
        );
        anyhow::ensure!(
            self.paths.web_root.is_absolute(),
            "paths.web_root must be absolute, got {}",
            self.paths.web_root.display()
        );
        anyhow::ensure!(
            self.paths.main_config.is_absolute(),
            "paths.main_config must be absolute, got {}",
            self.paths.main_config.display()
        );
        anyhow::ensure!(
            !self.paths.index_file.is_empty() && !self.paths.index_file.contains('/'),
            "paths.index_file must be a plain file name"
        );

        let required = [
            ("commands.validate", &self.commands.validate),
            ("commands.reload", &self.commands.reload),
            ("commands.acme_obtain", &self.commands.acme_obtain),
            ("commands.acme_renew", &self.commands.acme_renew),
            ("commands.service_probe", &self.commands.service_probe),
            ("commands.sendmail", &self.commands.sendmail),
            ("backup.archive_command", &self.backup.archive_command),
        ];
        for (name, template) in required {
            anyhow::ensure!(!template.is_empty(), "{} must be a non-empty argv", name);
        }
        anyhow::ensure!(
            self.commands
                .validate
                .argv()
                .iter()
                .any(|arg| arg.contains("{config}")),
            "commands.validate must pass {{config}} to the validator"
        );
        let optional = [
            ("commands.ownership", &self.commands.ownership),
            ("commands.database_list", &self.commands.database_list),
            ("backup.database_dump", &self.backup.database_dump),
        ];
        for (name, template) in optional {
            anyhow::ensure!(
                template.as_ref().is_none_or(|t| !t.is_empty()),
                "{} must be a non-empty argv when set",
                name
            );
        }

        let timeouts = [
            ("timeouts.validate_secs", self.timeouts.validate_secs),
            ("timeouts.reload_secs", self.timeouts.reload_secs),
            ("timeouts.certificate_secs", self.timeouts.certificate_secs),
            ("timeouts.probe_secs", self.timeouts.probe_secs),
            ("timeouts.mail_secs", self.timeouts.mail_secs),
        ];
        for (name, secs) in timeouts {
            anyhow::ensure!(secs > 0, "{} must be > 0, got {}", name, secs);
        }

        anyhow::ensure!(
            self.monitoring.history_capacity > 0,
            "monitoring.history_capacity must be > 0, got {}",
            self.monitoring.history_capacity
        );
        for (name, value) in [
            (
                "monitoring.cpu_threshold_percent",
                self.monitoring.cpu_threshold_percent,
            ),
            (
                "monitoring.memory_threshold_percent",
                self.monitoring.memory_threshold_percent,
            ),
        ] {
            anyhow::ensure!(
                value > 0.0 && value <= 100.0,
                "{} must be in (0, 100], got {}",
                name,
                value
            );
        }
        anyhow::ensure!(
            self.monitoring.broadcast_capacity > 0,
            "monitoring.broadcast_capacity must be > 0, got {}",
            self.monitoring.broadcast_capacity
        );

        for (name, expr) in [
            ("schedule.health_sample", &self.schedule.health_sample),
            ("schedule.backup", &self.schedule.backup),
            ("schedule.certificate_renewal", &self.schedule.certificate_renewal),
        ] {
            if let Err(e) = crate::scheduler::parse_schedule(expr) {
                anyhow::bail!("{} is not a valid cron expression: {}", name, e);
            }
        }
        anyhow::ensure!(
            self.schedule.tick_secs > 0,
            "schedule.tick_secs must be > 0, got {}",
            self.schedule.tick_secs
        );
        anyhow::ensure!(
            self.schedule.job_budget_secs > 0,
            "schedule.job_budget_secs must be > 0, got {}",
            self.schedule.job_budget_secs
        );

        anyhow::ensure!(
            !self.backup.location.as_os_str().is_empty(),
            "backup.location must be non-empty"
        );
        anyhow::ensure!(
            self.backup.retention_days > 0,
            "backup.retention_days must be > 0, got {}",
            self.backup.retention_days
        );
        for archive in &self.backup.archives {
            anyhow::ensure!(
                !archive.name.is_empty()
                    && archive
                        .name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "backup.archives name must be [A-Za-z0-9_-]+, got {:?}",
                archive.name
            );
        }

        anyhow::ensure!(
            self.alerts.alert_email.as_deref().is_none_or(|e| e.contains('@')),
            "alerts.alert_email must be an email address"
        );
        anyhow::ensure!(
            self.alerts.dedup_window_secs > 0,
            "alerts.dedup_window_secs must be > 0, got {}",
            self.alerts.dedup_window_secs
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        Ok(())
    }
}
