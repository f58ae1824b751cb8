// Best-effort metadata extraction from a virtual-host config (files may be hand-edited).

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigParse {
    Parsed(ParsedConfig),
    Unparseable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfig {
    /// First value of the first `server_name` directive.
    pub server_name: String,
    pub document_root: Option<PathBuf>,
    pub has_certificate: bool,
    pub has_php: bool,
}

/// Value of the first `<name> <value>;` directive, comments stripped.
fn directive<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .find_map(|line| {
            let rest = line.strip_prefix(name)?;
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            let value = rest.trim_start();
            let end = value.find(';')?;
            let value = value[..end].trim();
            (!value.is_empty()).then_some(value)
        })
}

pub fn parse_site_config(text: &str) -> ConfigParse {
    let Some(server_names) = directive(text, "server_name") else {
        return ConfigParse::Unparseable {
            reason: "no server_name directive".into(),
        };
    };
    let server_name = server_names
        .split_whitespace()
        .next()
        .unwrap_or(server_names)
        .to_string();

    ConfigParse::Parsed(ParsedConfig {
        server_name,
        document_root: directive(text, "root").map(PathBuf::from),
        has_certificate: directive(text, "ssl_certificate").is_some(),
        has_php: directive(text, "fastcgi_pass").is_some(),
    })
}
