//! Prompt template registry.
//!
//! Callers reference prompts by template id and supply resolved
//! parameters; the registry owns the template text and renders
//! `{placeholder}` slots. Template bodies are registered once at build
//! time — the router never accepts raw prompts from callers.

use std::collections::{BTreeMap, HashMap};

use crate::{MuninnError, Result};

/// Registry of prompt templates, keyed by template id.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template body under an id. Re-registering an id
    /// replaces the previous body.
    pub fn register(&mut self, id: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(id.into(), body.into());
    }

    /// Whether a template id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Render a template with the given parameters.
    ///
    /// `{name}` slots are replaced by the matching parameter; `{{` and
    /// `}}` escape literal braces. Unknown template ids and unresolved
    /// slots are caller errors.
    pub fn render(&self, id: &str, parameters: &BTreeMap<String, String>) -> Result<String> {
        let body = self
            .templates
            .get(id)
            .ok_or_else(|| MuninnError::UnknownTemplate(id.to_string()))?;

        let mut out = String::with_capacity(body.len());
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(k) => key.push(k),
                            None => {
                                return Err(MuninnError::InvalidRequest(format!(
                                    "template {id:?} has an unterminated placeholder"
                                )));
                            }
                        }
                    }
                    match parameters.get(&key) {
                        Some(value) => out.push_str(value),
                        None => {
                            return Err(MuninnError::InvalidRequest(format!(
                                "missing parameter {key:?} for template {id:?}"
                            )));
                        }
                    }
                }
                c => out.push(c),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_placeholders() {
        let mut registry = TemplateRegistry::new();
        registry.register("seo_summary", "Summarize SEO posture of {domain} in {locale}.");
        let rendered = registry
            .render(
                "seo_summary",
                &params(&[("domain", "example.com"), ("locale", "en")]),
            )
            .unwrap();
        assert_eq!(rendered, "Summarize SEO posture of example.com in en.");
    }

    #[test]
    fn unknown_template_is_caller_error() {
        let registry = TemplateRegistry::new();
        let err = registry.render("nope", &params(&[])).unwrap_err();
        assert!(matches!(err, MuninnError::UnknownTemplate(_)));
        assert!(err.is_caller_error());
    }

    #[test]
    fn missing_parameter_is_caller_error() {
        let mut registry = TemplateRegistry::new();
        registry.register("t", "Analyze {domain}.");
        let err = registry.render("t", &params(&[])).unwrap_err();
        assert!(matches!(err, MuninnError::InvalidRequest(_)));
    }

    #[test]
    fn escaped_braces_pass_through() {
        let mut registry = TemplateRegistry::new();
        registry.register("t", "Return JSON {{\"domain\": \"{domain}\"}}");
        let rendered = registry
            .render("t", &params(&[("domain", "example.com")]))
            .unwrap();
        assert_eq!(rendered, "Return JSON {\"domain\": \"example.com\"}");
    }

    #[test]
    fn unterminated_placeholder_rejected() {
        let mut registry = TemplateRegistry::new();
        registry.register("t", "broken {domain");
        assert!(registry.render("t", &params(&[("domain", "x")])).is_err());
    }
}
