use std::collections::BTreeMap;

use super::error::RenderError;

/// Renders `{{name}}` placeholders against the bound params. Params
/// listed in `required` must be present; any other unbound placeholder
/// renders as an empty string.
pub fn render(
    template: &str,
    params: &BTreeMap<String, String>,
    required: &[String],
) -> Result<String, RenderError> {
    for name in required {
        if !params.contains_key(name) {
            return Err(RenderError::MissingParam(name.clone()));
        }
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let name = after_open[..end].trim();
                if let Some(value) = params.get(name) {
                    out.push_str(value);
                }
                rest = &after_open[end + 2..];
            }
            None => {
                return Err(RenderError::Malformed(format!(
                    "unclosed placeholder near offset {}",
                    start
                )));
            }
        }
    }
    out.push_str(rest);

    Ok(out)
}

/// The placeholder names a template declares, in order of appearance.
pub fn placeholders(template: &str) -> Result<Vec<String>, RenderError> {
    let mut names = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let name = after_open[..end].trim().to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
                rest = &after_open[end + 2..];
            }
            None => {
                return Err(RenderError::Malformed(format!(
                    "unclosed placeholder near offset {}",
                    start
                )));
            }
        }
    }

    Ok(names)
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
    fn renders_bound_placeholders() {
        let result = render("Hello {{name}}!", &params(&[("name", "Ada")]), &[]).unwrap();
        assert_eq!(result, "Hello Ada!");
    }

    #[test]
    fn unbound_optional_placeholders_render_empty() {
        let result = render("Hi {{name}}{{suffix}}", &params(&[("name", "Ada")]), &[]).unwrap();
        assert_eq!(result, "Hi Ada");
    }

    #[test]
    fn missing_required_param_fails() {
        let err = render(
            "Hello {{name}}",
            &params(&[]),
            &["name".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::MissingParam(name) if name == "name"));
    }

    #[test]
    fn unclosed_placeholder_is_malformed() {
        assert!(matches!(
            render("Hello {{name", &params(&[]), &[]),
            Err(RenderError::Malformed(_))
        ));
    }

    #[test]
    fn whitespace_inside_braces_is_trimmed() {
        let result = render("{{ name }}", &params(&[("name", "Ada")]), &[]).unwrap();
        assert_eq!(result, "Ada");
    }

    #[test]
    fn collects_placeholders() {
        let found = placeholders("{{a}} and {{b}}, {{a}} again").unwrap();
        assert_eq!(found, vec!["a".to_string(), "b".to_string()]);
    }
}
