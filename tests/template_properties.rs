//! Property tests for template compilation.

use ontoloom::query::{compile_template, extract_placeholders};
use proptest::prelude::*;

fn identifier() -> impl Strategy<Value = String> {
    "[A-Za-z_][A-Za-z0-9_]{0,10}"
}

proptest! {
    /// Substitute-then-parse: compiling a template yields exactly as many
    /// distinct positional placeholders as there are distinct names, and
    /// no `{{` survives.
    #[test]
    fn distinct_names_map_to_distinct_positionals(
        names in proptest::collection::vec(identifier(), 1..6),
        repeats in proptest::collection::vec(0usize..6, 1..6),
    ) {
        let mut clauses = Vec::new();
        for (i, name) in names.iter().enumerate() {
            clauses.push(format!("c{i} = {{{{{name}}}}}"));
            let extra = repeats.get(i).copied().unwrap_or(0) % 3;
            for j in 0..extra {
                clauses.push(format!("d{i}_{j} = {{{{{name}}}}}"));
            }
        }
        let template = format!("SELECT * FROM t WHERE {}", clauses.join(" AND "));

        let extracted = extract_placeholders(&template).unwrap();
        let compiled = compile_template(&template).unwrap();

        let distinct: std::collections::HashSet<&String> = names.iter().collect();
        prop_assert_eq!(extracted.len(), distinct.len());
        prop_assert_eq!(compiled.binding_order.len(), distinct.len());
        prop_assert!(!compiled.sql.contains("{{"));

        // Each name's occurrence count is preserved by its positional.
        for (index, name) in compiled.binding_order.iter().enumerate() {
            let placeholder = format!("{{{{{name}}}}}");
            let occurrences = template.matches(&placeholder).count();
            let positional = format!("?{}", index + 1);
            let mut found = 0;
            let mut rest = compiled.sql.as_str();
            while let Some(pos) = rest.find(&positional) {
                let after = &rest[pos + positional.len()..];
                // Guard against ?1 matching inside ?10.
                if !after.starts_with(|c: char| c.is_ascii_digit()) {
                    found += 1;
                }
                rest = &rest[pos + positional.len()..];
            }
            prop_assert_eq!(found, occurrences);
        }
    }

    /// Extraction is stable: parsing the same template twice yields the
    /// same names in the same order.
    #[test]
    fn extraction_is_deterministic(names in proptest::collection::vec(identifier(), 1..5)) {
        let clauses: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("c{i} = {{{{{name}}}}}"))
            .collect();
        let template = format!("SELECT 1 WHERE {}", clauses.join(" OR "));
        let first = extract_placeholders(&template).unwrap();
        let second = extract_placeholders(&template).unwrap();
        prop_assert_eq!(first, second);
    }
}
