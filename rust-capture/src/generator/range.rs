//! Integer range expansion.

use super::Target;
use crate::Result;
use crate::domain::template;

/// One target per integer in `[from, to]`, ascending.
///
/// An inverted range yields nothing.
pub fn expand(
    spec_name: &str,
    url_template: &str,
    name: &str,
    from: i64,
    to: i64,
) -> Result<Vec<Target>> {
    if from > to {
        return Ok(Vec::new());
    }

    (from..=to)
        .map(|value| {
            let value = value.to_string();
            let address = template::render(url_template, &[(name, value.as_str())])?;
            let mut target = Target::new(address, format!("{spec_name}_{value}.json"));
            target
                .aux_data
                .insert(name.to_string(), serde_json::Value::String(value));
            Ok(target)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inclusive_ascending() {
        let targets = expand("deputados", "https://api/{id}", "id", 2018, 2020).unwrap();
        let addresses: Vec<&str> = targets.iter().map(|t| t.address.as_str()).collect();
        assert_eq!(addresses, vec!["https://api/2018", "https://api/2019", "https://api/2020"]);
        assert_eq!(targets[2].file_name, "deputados_2020.json");
        assert_eq!(targets[0].aux_data["id"], "2018");
    }

    #[test]
    fn test_inverted_range_is_empty() {
        assert!(expand("s", "https://api/{id}", "id", 5, 4).unwrap().is_empty());
    }

    #[test]
    fn test_single_value() {
        assert_eq!(expand("s", "https://api/{id}", "id", 7, 7).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_placeholder_is_config_error() {
        assert!(expand("s", "https://api/{year}", "id", 1, 2).is_err());
    }
}
