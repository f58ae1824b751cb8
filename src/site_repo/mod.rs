// Virtual-host files: config under the available dir, activation marker under the enabled dir.
// A new config is validated together with the enabled set before its marker exists. Every
// change that can alter the live config set is validated before the web server reloads,
// and rolled back when validation or reload fails.

mod parse;

pub use parse::{ConfigParse, ParsedConfig, parse_site_config};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::config::AppConfig;
use crate::error::{PanelError, Result};
use crate::executor::{CommandExecutor, CommandTemplate};
use crate::models::{NewSite, Site};
use crate::renderer;

/// Config files that are never listed as managed sites.
const RESERVED_NAMES: &[&str] = &["default"];
const STAGED_SUFFIX: &str = ".pending";

pub struct SiteRepo {
    main_config: PathBuf,
    available: PathBuf,
    enabled: PathBuf,
    index_file: String,
    executor: CommandExecutor,
    validate: CommandTemplate,
    reload: CommandTemplate,
    ownership: Option<CommandTemplate>,
    validate_timeout: Duration,
    reload_timeout: Duration,
    name_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Serializes marker changes with the validate/reload/rollback that follows them.
    /// Readers take it too, so a marker awaiting validation is never reported as enabled.
    apply_lock: Mutex<()>,
}

impl SiteRepo {
    pub fn new(config: &AppConfig, executor: CommandExecutor) -> Self {
        Self {
            main_config: config.paths.main_config.clone(),
            available: config.paths.sites_available.clone(),
            enabled: config.paths.sites_enabled.clone(),
            index_file: config.paths.index_file.clone(),
            executor,
            validate: config.commands.validate.clone(),
            reload: config.commands.reload.clone(),
            ownership: config.commands.ownership.clone(),
            validate_timeout: Duration::from_secs(config.timeouts.validate_secs),
            reload_timeout: Duration::from_secs(config.timeouts.reload_secs),
            name_locks: std::sync::Mutex::new(HashMap::new()),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.available.join(name)
    }

    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.enabled.join(name)
    }

    fn staged_path(&self, name: &str) -> PathBuf {
        self.available.join(format!(".{}{}", name, STAGED_SUFFIX))
    }

    /// Generated main config used to validate a staged site next to the enabled set.
    fn check_config_path(&self, name: &str) -> PathBuf {
        let dir = self.main_config.parent().unwrap_or_else(|| Path::new("/"));
        dir.join(format!(".hostpanel-check-{}.conf", name))
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .name_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Site names are file names inside the available and enabled dirs. Anything `list` can
    /// report is accepted; path separators and hidden names are not.
    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
            return Err(PanelError::Validation(format!("invalid site name {:?}", name)));
        }
        Ok(())
    }

    pub async fn marker_exists(&self, name: &str) -> bool {
        // symlink_metadata: a dangling marker still counts as present.
        tokio::fs::symlink_metadata(self.marker_path(name))
            .await
            .is_ok()
    }

    async fn config_exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.config_path(name)).await?)
    }

    #[instrument(skip(self), fields(repo = "sites", operation = "list"))]
    pub async fn list(&self) -> Result<Vec<Site>> {
        let _apply = self.apply_lock.lock().await;
        let enabled = read_names(&self.enabled).await?;
        let mut sites = Vec::new();
        for name in read_names(&self.available).await? {
            if name.starts_with('.') || RESERVED_NAMES.contains(&name.as_str()) {
                continue;
            }
            let path = self.config_path(&name);
            match tokio::fs::metadata(&path).await {
                Ok(m) if m.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, site = %name, "cannot stat site config");
                }
            }
            let is_enabled = enabled.contains(&name);
            sites.push(self.read_site(name, path, is_enabled).await);
        }
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Site>> {
        Self::check_name(name)?;
        let _apply = self.apply_lock.lock().await;
        if !self.config_exists(name).await? {
            return Ok(None);
        }
        let enabled = self.marker_exists(name).await;
        Ok(Some(
            self.read_site(name.to_string(), self.config_path(name), enabled)
                .await,
        ))
    }

    async fn read_site(&self, name: String, config_path: PathBuf, enabled: bool) -> Site {
        let parsed = match tokio::fs::read_to_string(&config_path).await {
            Ok(text) => parse_site_config(&text),
            Err(e) => ConfigParse::Unparseable {
                reason: format!("cannot read config: {}", e),
            },
        };
        match parsed {
            ConfigParse::Parsed(p) => Site {
                domain: p.server_name,
                document_root: p.document_root,
                php_enabled: p.has_php,
                ssl_enabled: p.has_certificate,
                enabled,
                config_path,
                parse_error: None,
                name,
            },
            ConfigParse::Unparseable { reason } => {
                tracing::debug!(site = %name, reason = %reason, "site config unparseable");
                Site {
                    domain: name.clone(),
                    document_root: None,
                    php_enabled: false,
                    ssl_enabled: false,
                    enabled,
                    config_path,
                    parse_error: Some(reason),
                    name,
                }
            }
        }
    }

    /// Writes `rendered_config` for `site`, validates it together with the enabled set, then
    /// moves it into place and activates it. Either config and marker both end up present,
    /// or neither does.
    #[instrument(skip(self, site, rendered_config, index_page), fields(repo = "sites", operation = "create", site = %site.name))]
    pub async fn create(
        &self,
        site: &NewSite,
        rendered_config: &str,
        index_page: &str,
    ) -> Result<(Site, bool)> {
        renderer::validate_domain(&site.name)
            .map_err(|_| PanelError::Validation(format!("invalid site name {:?}", site.name)))?;
        let lock = self.name_lock(&site.name);
        let _guard = lock.lock().await;

        let config_path = self.config_path(&site.name);
        let marker = self.marker_path(&site.name);
        if self.config_exists(&site.name).await? || self.marker_exists(&site.name).await {
            return Err(PanelError::Conflict(format!(
                "site {} already exists",
                site.name
            )));
        }
        tokio::fs::create_dir_all(&self.available).await?;
        tokio::fs::create_dir_all(&self.enabled).await?;

        let index_created = self.prepare_document_root(site, index_page).await?;
        let index_path = index_created.then(|| site.document_root.join(&self.index_file));

        let _apply = self.apply_lock.lock().await;
        let staged = self.staged_path(&site.name);
        tokio::fs::write(&staged, rendered_config).await?;
        if let Err(e) = self.validate_staged(&site.name, &staged).await {
            let _ = remove_if_exists(&staged).await;
            discard_index(index_path.as_deref()).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&staged, &config_path).await {
            let _ = remove_if_exists(&staged).await;
            discard_index(index_path.as_deref()).await;
            return Err(e.into());
        }
        if let Err(e) = create_marker(&config_path, &marker).await {
            let _ = remove_if_exists(&config_path).await;
            discard_index(index_path.as_deref()).await;
            return Err(e.into());
        }
        if let Err(e) = self.validate_and_reload().await {
            tracing::warn!(error = %e, "new site rejected; rolling back");
            let _ = remove_if_exists(&marker).await;
            let _ = remove_if_exists(&config_path).await;
            discard_index(index_path.as_deref()).await;
            return Err(e);
        }
        drop(_apply);

        tracing::info!(domain = %site.domain, "site created and enabled");
        let site = self
            .read_site(site.name.clone(), config_path, true)
            .await;
        Ok((site, index_created))
    }

    /// Creates the document root and a placeholder index if none exists.
    /// Returns whether the index was written by this call.
    async fn prepare_document_root(&self, site: &NewSite, index_page: &str) -> Result<bool> {
        tokio::fs::create_dir_all(&site.document_root).await?;
        let index_path = site.document_root.join(&self.index_file);
        let created = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&index_path)
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(index_page.as_bytes()).await?;
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(e) => return Err(e.into()),
        };

        if let Some(template) = &self.ownership {
            let path = site.document_root.to_string_lossy();
            match template.render(&[("path", path.as_ref())]) {
                Ok(spec) => {
                    let out = self.executor.run(&spec, Some(self.validate_timeout)).await;
                    if !out.success() {
                        tracing::warn!(
                            error = %PanelError::from_output(&out),
                            "document root ownership fix-up failed"
                        );
                    }
                }
                Err(e) => tracing::warn!(error = %e, "ownership command not rendered"),
            }
        }
        Ok(created)
    }

    /// Creates or removes the activation marker, then validates and reloads. On failure the
    /// marker change is undone so the live config never regresses.
    #[instrument(skip(self), fields(repo = "sites", operation = "set_enabled"))]
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<Site> {
        Self::check_name(name)?;
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let config_path = self.config_path(name);
        if !self.config_exists(name).await? {
            return Err(PanelError::NotFound(format!("site {}", name)));
        }
        let marker = self.marker_path(name);
        let currently = self.marker_exists(name).await;

        if currently != enabled {
            let _apply = self.apply_lock.lock().await;
            if enabled {
                create_marker(&config_path, &marker).await?;
            } else {
                remove_if_exists(&marker).await?;
            }
            if let Err(e) = self.validate_and_reload().await {
                tracing::warn!(error = %e, enabled, "marker change rejected; rolling back");
                let revert = if enabled {
                    remove_if_exists(&marker).await.map(|_| ())
                } else {
                    create_marker(&config_path, &marker).await
                };
                if let Err(re) = revert {
                    tracing::error!(error = %re, site = %name, "failed to roll back marker");
                }
                return Err(e);
            }
            tracing::info!(site = %name, enabled, "site toggled");
        }

        Ok(self.read_site(name.to_string(), config_path, enabled).await)
    }

    /// Removes marker then config. Deleting an absent site is not an error.
    /// Returns whether anything was removed.
    #[instrument(skip(self), fields(repo = "sites", operation = "delete"))]
    pub async fn delete(&self, name: &str) -> Result<bool> {
        Self::check_name(name)?;
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let _apply = self.apply_lock.lock().await;
        let marker_removed = remove_if_exists(&self.marker_path(name)).await?;
        let config_removed = remove_if_exists(&self.config_path(name)).await?;
        let _ = remove_if_exists(&self.staged_path(name)).await;

        if marker_removed {
            self.run_reload().await?;
        }
        if marker_removed || config_removed {
            tracing::info!(site = %name, "site deleted");
        }
        Ok(marker_removed || config_removed)
    }

    /// Validates the live config set and reloads the web server.
    pub async fn reload(&self) -> Result<()> {
        let _apply = self.apply_lock.lock().await;
        self.validate_and_reload().await
    }

    async fn validate_and_reload(&self) -> Result<()> {
        self.run_validate(&self.main_config).await?;
        self.run_reload().await
    }

    /// Validates `staged` as if it were enabled: a generated main config includes the
    /// current enabled set followed by the staged file. Caller holds `apply_lock`.
    async fn validate_staged(&self, name: &str, staged: &Path) -> Result<()> {
        let check = self.check_config_path(name);
        tokio::fs::write(&check, render_check_config(&self.enabled, staged)).await?;
        let result = self.run_validate(&check).await;
        if let Err(e) = remove_if_exists(&check).await {
            tracing::warn!(error = %e, path = %check.display(), "cannot remove check config");
        }
        result
    }

    async fn run_validate(&self, config: &Path) -> Result<()> {
        let path = config.to_string_lossy();
        let spec = self.validate.render(&[("config", path.as_ref())])?;
        self.executor
            .run(&spec, Some(self.validate_timeout))
            .await
            .into_result()
            .map(|_| ())
    }

    async fn run_reload(&self) -> Result<()> {
        let spec = self.reload.render(&[])?;
        self.executor
            .run(&spec, Some(self.reload_timeout))
            .await
            .into_result()
            .map(|_| ())
    }
}

fn render_check_config(enabled_dir: &Path, staged: &Path) -> String {
    format!(
        "# Generated by hostpanel to validate a site before activation.\n\
         events {{}}\n\
         \n\
         http {{\n    include {}/*;\n    include {};\n}}\n",
        enabled_dir.display(),
        staged.display()
    )
}

/// File names in `dir`; a missing dir is empty.
async fn read_names(dir: &Path) -> Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Removes the placeholder index written by a create that did not go through.
async fn discard_index(index_path: Option<&Path>) {
    if let Some(path) = index_path {
        let _ = remove_if_exists(path).await;
    }
}

#[cfg(unix)]
async fn create_marker(config_path: &Path, marker: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(config_path, marker).await
}

#[cfg(not(unix))]
async fn create_marker(_config_path: &Path, marker: &Path) -> std::io::Result<()> {
    tokio::fs::write(marker, b"").await
}
