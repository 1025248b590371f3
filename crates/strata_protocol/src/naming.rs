/// Returns true if the name is already safe to use as a generated
/// identifier: lowercase ascii, digits, underscores, not digit-leading.
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Canonicalize table/column names into identifier-safe form.
///
/// Unsafe names are slugged and suffixed with a short hash to avoid
/// collisions between distinct source names that slug identically.
pub fn safe_identifier(name: &str) -> String {
    if is_safe_identifier(name) {
        return name.to_string();
    }

    let mut slug = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for ch in name.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };

        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
            slug.push('_');
        } else {
            last_was_underscore = false;
            slug.push(mapped);
        }
    }

    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() {
        "column".to_string()
    } else if slug.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", slug)
    } else {
        slug.to_string()
    };
    let hash = blake3::hash(name.as_bytes()).to_hex();
    format!("{}_{}", slug, &hash[..8])
}

/// Column names that collide with keywords in generated binding code.
const RESERVED: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "fn", "for", "if", "impl", "in",
    "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return", "self", "static",
    "struct", "super", "trait", "type", "use", "where", "while",
];

/// Map a schema column name onto the field name used in generated bindings.
///
/// "default" becomes "is_default" (it is a boolean in every schema that has
/// shipped so far); other reserved words get a trailing underscore.
pub fn binding_identifier(name: &str) -> String {
    match name {
        "default" => "is_default".to_string(),
        _ => {
            let safe = safe_identifier(name);
            if RESERVED.contains(&safe.as_str()) {
                format!("{}_", safe)
            } else {
                safe
            }
        }
    }
}
