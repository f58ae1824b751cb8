// argv templates with `{name}` placeholders; no shell is involved, so values stay single arguments.

use serde::{Deserialize, Serialize};

use super::CommandSpec;
use crate::error::{PanelError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(Vec<String>);

impl CommandTemplate {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.first().is_none_or(|p| p.trim().is_empty())
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }

    /// Substitutes every `{key}` in every argument. Unknown placeholders are left as-is.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<CommandSpec> {
        let mut rendered = self.0.iter().map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        });
        let program = rendered
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| PanelError::Validation("command template is empty".into()))?;
        Ok(CommandSpec::new(program, rendered.collect()))
    }
}
