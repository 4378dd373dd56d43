//! # Command Templates
//!
//! `{variable}` substitution for agent command lines and helper scripts.
//!
//! - `{name}` substitutes the value of `name`
//! - `{{` and `}}` render literal braces
//!
//! Undefined variables are an error rather than an empty substitution, so a
//! typo in a template is caught before any process is launched.

use std::collections::HashMap;
use thiserror::Error;

/// Variables every agent template may reference
pub const KNOWN_VARIABLES: &[&str] = &["prompt", "model", "script"];

/// Template rendering failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("undefined variable '{name}' at position {position} in template")]
    UndefinedVariable { name: String, position: usize },

    #[error("unmatched '{{' at position {position} in template")]
    UnmatchedBrace { position: usize },

    #[error("empty variable name '{{}}' at position {position} in template")]
    EmptyVariableName { position: usize },
}

/// Render `template`, substituting every `{name}` from `variables`
pub fn render_template(
    template: &str,
    variables: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' => {
                if let Some((_, '{')) = chars.peek() {
                    chars.next();
                    result.push('{');
                    continue;
                }

                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, c)) => name.push(c),
                        None => return Err(TemplateError::UnmatchedBrace { position: pos }),
                    }
                }

                let name = name.trim();
                if name.is_empty() {
                    return Err(TemplateError::EmptyVariableName { position: pos });
                }

                match variables.get(name) {
                    Some(value) => result.push_str(value),
                    None => {
                        return Err(TemplateError::UndefinedVariable {
                            name: name.to_string(),
                            position: pos,
                        })
                    }
                }
            }
            '}' => {
                // `}}` collapses to a single brace; a lone `}` passes through
                if let Some((_, '}')) = chars.peek() {
                    chars.next();
                }
                result.push('}');
            }
            _ => result.push(ch),
        }
    }

    Ok(result)
}

/// Check that `template` only references [`KNOWN_VARIABLES`] and is well formed
pub fn validate_template(template: &str) -> Result<(), TemplateError> {
    let placeholders: HashMap<String, String> = KNOWN_VARIABLES
        .iter()
        .map(|name| (name.to_string(), String::new()))
        .collect();
    render_template(template, &placeholders).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_variables() {
        let rendered = render_template(
            "gemini --model {model} {prompt}",
            &vars(&[("model", "gemini-2.5-pro"), ("prompt", "'hi'")]),
        )
        .unwrap();
        assert_eq!(rendered, "gemini --model gemini-2.5-pro 'hi'");
    }

    #[test]
    fn test_render_escaped_braces() {
        let rendered = render_template("main() {{ run({model}); }}", &vars(&[("model", "m")]))
            .unwrap();
        assert_eq!(rendered, "main() { run(m); }");
    }

    #[test]
    fn test_render_trims_variable_names() {
        let rendered = render_template("{ prompt }", &vars(&[("prompt", "x")])).unwrap();
        assert_eq!(rendered, "x");
    }

    #[test]
    fn test_undefined_variable() {
        let err = render_template("echo {missing}", &HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UndefinedVariable {
                name: "missing".to_string(),
                position: 5
            }
        );
    }

    #[test]
    fn test_unmatched_and_empty() {
        assert_eq!(
            render_template("echo {prompt", &vars(&[("prompt", "x")])).unwrap_err(),
            TemplateError::UnmatchedBrace { position: 5 }
        );
        assert_eq!(
            render_template("echo {}", &HashMap::new()).unwrap_err(),
            TemplateError::EmptyVariableName { position: 5 }
        );
    }

    #[test]
    fn test_validate_template() {
        assert!(validate_template("claude-flow swarm {prompt}").is_ok());
        assert!(validate_template("node {script}").is_ok());
        assert!(validate_template("run {task_id}").is_err());
    }
}
