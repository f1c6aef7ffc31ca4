//! Table-name singularisation.
//!
//! `Inflector` handles regular English plurals; an override table catches
//! irregulars it mishandles. Names that do not look like English plurals
//! pass through unchanged, which keeps non-English schemas stable.

use inflector::string::singularize::to_singular;

/// Irregulars the inflection crate gets wrong or that show up often in
/// schemas.
const OVERRIDES: &[(&str, &str)] = &[
    ("people", "person"),
    ("geese", "goose"),
    ("criteria", "criterion"),
    ("statuses", "status"),
    ("addresses", "address"),
    ("analyses", "analysis"),
    ("indices", "index"),
];

/// Singularises a table name to form an entity-name candidate.
///
/// Returns the input unchanged when singularisation would produce an empty
/// string.
#[must_use]
pub fn singularise(table_name: &str) -> String {
    let lower = table_name.to_lowercase();
    if let Some((_, singular)) = OVERRIDES.iter().find(|(plural, _)| *plural == lower) {
        return (*singular).to_string();
    }
    let singular = to_singular(&lower);
    if singular.is_empty() {
        table_name.to_lowercase()
    } else {
        singular
    }
}

/// Title-cases a singularised name into an entity name: `order_item`
/// becomes `Order Item`.
#[must_use]
pub fn entity_name_from_table(table_name: &str) -> String {
    singularise(table_name)
        .split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + chars.as_str()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("users", "user")]
    #[test_case("orders", "order")]
    #[test_case("order_items", "order_item")]
    #[test_case("people", "person")]
    #[test_case("statuses", "status")]
    #[test_case("addresses", "address")]
    #[test_case("criteria", "criterion")]
    fn test_singularise(input: &str, expected: &str) {
        assert_eq!(singularise(input), expected);
    }

    #[test]
    fn test_non_english_name_is_stable() {
        // Not an English plural; must not be mangled into emptiness.
        assert!(!singularise("kunden").is_empty());
    }

    #[test_case("users", "User")]
    #[test_case("order_items", "Order Item")]
    #[test_case("people", "Person")]
    fn test_entity_name(input: &str, expected: &str) {
        assert_eq!(entity_name_from_table(input), expected);
    }
}
