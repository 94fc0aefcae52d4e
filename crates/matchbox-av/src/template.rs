//! Variable substitution for operator-supplied command lines.

use std::collections::HashMap;
use std::path::Path;

/// Variable substitution context for command templates.
///
/// Supports variable substitution in strings using the `{varname}` syntax.
/// Unknown variables are left untouched.
///
/// # Example
///
/// ```
/// use matchbox_av::TemplateContext;
/// use std::path::Path;
///
/// let ctx = TemplateContext::new()
///     .with_clips_dir(Path::new("/clips/USCAFFL"))
///     .with_var("event_code", "USCAFFL");
///
/// assert_eq!(ctx.substitute("{clips_dir}/"), "/clips/USCAFFL/");
/// assert_eq!(ctx.substitute("events/{event_code}"), "events/USCAFFL");
/// ```
#[derive(Debug, Clone)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
}

impl TemplateContext {
    /// Create a new empty template context.
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    /// Set `{clips_dir}` to the artifact directory.
    pub fn with_clips_dir(mut self, dir: &Path) -> Self {
        self.vars
            .insert("clips_dir".to_string(), dir.display().to_string());
        self
    }

    /// Add a custom variable.
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    /// Get a variable value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Substitute variables in a string.
    pub fn substitute(&self, template: &str) -> String {
        let mut result = template.to_string();
        for (key, value) in &self.vars {
            result = result.replace(&format!("{{{}}}", key), value);
        }
        result
    }

    /// Substitute variables in a list of strings.
    pub fn substitute_all(&self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.substitute(t)).collect()
    }
}

impl Default for TemplateContext {
    fn default() -> Self {
        Self::new()
    }
}
