//! `{placeholder}` substitution for address and query templates.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
});

/// Names of all placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Whether `template` references the placeholder `name`.
pub fn has_placeholder(template: &str, name: &str) -> bool {
    placeholders(template).contains(&name)
}

/// Substitute every `{name}` in `template` with its value from `vars`.
///
/// Variables that the template does not use are ignored. A placeholder
/// without a value is a configuration error.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];
        let value = vars
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                Error::config(format!(
                    "template '{template}' references unknown placeholder '{name}'"
                ))
            })?;

        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_all_occurrences() {
        let out = render(
            "https://api.example/{id}/items?year={id}&x={other}",
            &[("id", "2019"), ("other", "a")],
        )
        .unwrap();
        assert_eq!(out, "https://api.example/2019/items?year=2019&x=a");
    }

    #[test]
    fn test_render_without_placeholders_is_identity() {
        assert_eq!(render("https://static", &[("unused", "x")]).unwrap(), "https://static");
    }

    #[test]
    fn test_render_missing_variable_is_config_error() {
        let err = render("https://api/{missing}", &[]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("{start_date}/{end_date}/{start_date}"),
            vec!["start_date", "end_date", "start_date"]
        );
        assert!(has_placeholder("x?d={end_date}", "end_date"));
        assert!(!has_placeholder("x?d={end_date}", "start_date"));
    }
}
