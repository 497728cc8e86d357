//! `{{var}}` template rendering

use std::collections::HashMap;

/// Flat substitution context for template rendering
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    vars: HashMap<String, String>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.vars.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// The context as a JSON object, echoed to agent peers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.vars)
    }
}

/// Substitute `{{name}}` placeholders from the context.
///
/// Unresolved placeholders are left intact rather than raising, so a
/// partially-specified template degrades visibly instead of failing the
/// whole render.
pub fn render(input: &str, ctx: &RenderContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match ctx.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(&after[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder, emit verbatim.
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        RenderContext::new()
            .with("registry", "reg.flotilla.dev")
            .with("tag", "1.4.2")
            .with("app_name", "billing")
    }

    #[test]
    fn test_render_substitutes_known_vars() {
        let out = render("docker pull {{registry}}/{{app_name}}:{{tag}}", &ctx());
        assert_eq!(out, "docker pull reg.flotilla.dev/billing:1.4.2");
    }

    #[test]
    fn test_unresolved_placeholder_left_intact() {
        let out = render("run {{image}} --tag {{tag}}", &ctx());
        assert_eq!(out, "run {{image}} --tag 1.4.2");
    }

    #[test]
    fn test_whitespace_inside_braces_tolerated() {
        let out = render("{{ tag }}", &ctx());
        assert_eq!(out, "1.4.2");
    }

    #[test]
    fn test_unterminated_placeholder_verbatim() {
        let out = render("oops {{tag", &ctx());
        assert_eq!(out, "oops {{tag");
    }
}
