// Alert email delivery through a sendmail-compatible relay (message on stdin).

use std::time::Duration;

use crate::config::AppConfig;
use crate::error::Result;
use crate::executor::{CommandExecutor, CommandTemplate};
use crate::models::Notification;

pub struct Mailer {
    executor: CommandExecutor,
    template: CommandTemplate,
    to: String,
    from: String,
    timeout: Duration,
}

impl Mailer {
    /// `None` when no alert address is configured.
    pub fn from_config(config: &AppConfig, executor: CommandExecutor) -> Option<Self> {
        let to = config.alerts.alert_email.clone()?;
        Some(Self {
            executor,
            template: config.commands.sendmail.clone(),
            to,
            from: config.alerts.from_address.clone(),
            timeout: Duration::from_secs(config.timeouts.mail_secs),
        })
    }

    pub fn recipient(&self) -> &str {
        &self.to
    }

    pub async fn send(&self, notification: &Notification) -> Result<()> {
        let spec = self
            .template
            .render(&[("to", self.to.as_str())])?
            .with_stdin(self.compose(notification));
        self.executor
            .run(&spec, Some(self.timeout))
            .await
            .into_result()
            .map(|_| ())
    }

    pub fn compose(&self, n: &Notification) -> String {
        let details = serde_json::to_string_pretty(&n.details).unwrap_or_default();
        let subject: String = n
            .message
            .chars()
            .filter(|c| !c.is_control())
            .collect();
        format!(
            "To: {to}\r\nFrom: {from}\r\nSubject: Server Alert: {subject}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n\
<h3>Server Alert</h3>\r\n\
<p><strong>Type:</strong> {kind}</p>\r\n\
<p><strong>Message:</strong> {message}</p>\r\n\
<p><strong>Time:</strong> {time}</p>\r\n\
<p><strong>Details:</strong></p><pre>{details}</pre>\r\n",
            to = self.to,
            from = self.from,
            kind = n.kind.as_str(),
            message = escape_html(&n.message),
            time = n.timestamp.to_rfc3339(),
            details = escape_html(&details),
        )
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_escapes_markup() {
        assert_eq!(escape_html("<b>&\"x\"</b>"), "&lt;b&gt;&amp;&quot;x&quot;&lt;/b&gt;");
    }
}
