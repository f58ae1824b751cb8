// Virtual-host config and welcome page rendering. Pure functions, no I/O.

use std::path::Path;

use crate::error::{PanelError, Result};

const MAX_DOMAIN_LEN: usize = 253;

/// Filesystem-safe site name: the domain with everything outside `[A-Za-z0-9.-]` removed.
pub fn site_slug(domain: &str) -> String {
    domain
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect()
}

/// Accepts only domains that are already their own slug and look like a host name.
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(PanelError::Validation("domain is required".into()));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(PanelError::Validation(format!(
            "domain is longer than {} characters",
            MAX_DOMAIN_LEN
        )));
    }
    if site_slug(domain) != domain {
        return Err(PanelError::Validation(format!(
            "domain {:?} contains characters outside [A-Za-z0-9.-]",
            domain
        )));
    }
    if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) || domain.contains("..") {
        return Err(PanelError::Validation(format!(
            "domain {:?} is not a valid host name",
            domain
        )));
    }
    Ok(())
}

/// Document roots are interpolated into the config, so they must be absolute and free of
/// characters that would end a directive or open a block.
pub fn validate_document_root(root: &Path) -> Result<()> {
    let Some(s) = root.to_str() else {
        return Err(PanelError::Validation("document root is not UTF-8".into()));
    };
    if !root.is_absolute() {
        return Err(PanelError::Validation(format!(
            "document root {:?} must be absolute",
            s
        )));
    }
    if s.chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, ';' | '{' | '}' | '"' | '\'' | '$' | '#'))
    {
        return Err(PanelError::Validation(format!(
            "document root {:?} contains forbidden characters",
            s
        )));
    }
    if root
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(PanelError::Validation(format!(
            "document root {:?} must not contain '..'",
            s
        )));
    }
    Ok(())
}

/// Inputs for one virtual-host block.
#[derive(Debug, Clone, Copy)]
pub struct VhostSpec<'a> {
    pub domain: &'a str,
    pub document_root: &'a Path,
    pub php_enabled: bool,
    pub php_fpm_socket: &'a str,
}

/// Renders the server block. Deterministic for the same input.
pub fn render_vhost(spec: &VhostSpec<'_>) -> Result<String> {
    validate_domain(spec.domain)?;
    validate_document_root(spec.document_root)?;
    if spec.php_enabled
        && (spec.php_fpm_socket.is_empty()
            || spec
                .php_fpm_socket
                .chars()
                .any(|c| c.is_whitespace() || c == ';' || c == '{' || c == '}'))
    {
        return Err(PanelError::Validation(
            "php-fpm socket path contains forbidden characters".into(),
        ));
    }

    let root = spec.document_root.display();
    let index = if spec.php_enabled {
        "index.html index.htm index.php"
    } else {
        "index.html index.htm"
    };

    let mut out = format!(
        "server {{
    listen 80;
    listen [::]:80;

    server_name {domain};
    root {root};
    index {index};

    # Security headers
    add_header X-Frame-Options DENY always;
    add_header X-Content-Type-Options nosniff always;
    add_header X-XSS-Protection \"1; mode=block\" always;
    add_header Referrer-Policy \"strict-origin-when-cross-origin\" always;

    location / {{
        try_files $uri $uri/ =404;
    }}
",
        domain = spec.domain,
    );

    if spec.php_enabled {
        out.push_str(&format!(
            "
    location ~ \\.php$ {{
        include snippets/fastcgi-php.conf;
        fastcgi_pass unix:{socket};
    }}
",
            socket = spec.php_fpm_socket,
        ));
    }

    out.push_str(
        "
    location ~ /\\. {
        deny all;
    }

    location ~ /\\.(git|svn|hg) {
        deny all;
    }
}
",
    );
    Ok(out)
}

/// Placeholder page written into a new document root.
pub fn render_index_page(domain: &str, document_root: &Path, php: bool, ssl: bool) -> String {
    let mut badges = String::new();
    if php {
        badges.push_str("<span class=\"badge\">PHP enabled</span>");
    }
    if ssl {
        badges.push_str("<span class=\"badge\">SSL ready</span>");
    }
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Welcome to {domain}!</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 40px; background: #f8f9fa; text-align: center; }}
        .container {{ max-width: 600px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; }}
        .badge {{ display: inline-block; padding: 4px 8px; background: #27ae60; color: white; border-radius: 4px; font-size: 12px; margin: 5px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{domain} is online</h1>
        <p>This site was configured successfully.</p>
        {badges}
        <p><strong>Document root:</strong> <code>{root}</code></p>
        <p>Upload your files to get started.</p>
    </div>
</body>
</html>
"#,
        root = document_root.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_strips_disallowed_characters() {
        assert_eq!(site_slug("exa mple.com/"), "example.com");
        assert_eq!(site_slug("a_b-c.org"), "ab-c.org");
    }

    #[test]
    fn validate_domain_rejects_edge_dots() {
        assert!(validate_domain(".example.com").is_err());
        assert!(validate_domain("example..com").is_err());
        assert!(validate_domain("-x.com").is_err());
        assert!(validate_domain("example.com").is_ok());
    }

    #[test]
    fn document_root_rejects_directive_terminators() {
        assert!(validate_document_root(Path::new("/var/www/a;b")).is_err());
        assert!(validate_document_root(Path::new("var/www/a")).is_err());
        assert!(validate_document_root(Path::new("/var/www/../etc")).is_err());
        assert!(validate_document_root(Path::new("/var/www/a")).is_ok());
    }
}
