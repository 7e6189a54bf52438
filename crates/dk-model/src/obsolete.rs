//! Fields and shapes from earlier description formats.
//!
//! Old descriptions are never migrated: anything listed here fails
//! validation with a message naming the field and what replaced it.

use serde_json::{Map, Value as Json};

use crate::schema::CollectionKind;
use crate::validate::SchemaError;

/// Obsolete top-level fields and the replacement to mention.
const OBSOLETE_FIELDS: &[(&str, &str)] = &[
    ("gui", "use 'panels' for frontend configuration"),
    ("self", "the self-referencing handle was removed"),
    (
        "auxfun",
        "auxiliary functions of (t, Y, params) were replaced by an auxfun handle taking (sol, params)",
    ),
];

/// Obsolete keys inside the option records, as (record, key, replacement).
const OBSOLETE_OPTIONS: &[(&str, &str, &str)] = &[(
    "sdeoption",
    "randn",
    "pre-generated noise samples were replaced by 'sdeoption.seed'",
)];

pub fn check_fields(record: &Map<String, Json>) -> Result<(), SchemaError> {
    for (field, replacement) in OBSOLETE_FIELDS {
        if record.contains_key(*field) {
            return Err(SchemaError::Obsolete {
                field: (*field).to_string(),
                replacement: (*replacement).to_string(),
            });
        }
    }

    for (parent, key, replacement) in OBSOLETE_OPTIONS {
        let hit = record
            .get(*parent)
            .and_then(Json::as_object)
            .is_some_and(|opts| opts.contains_key(*key));
        if hit {
            return Err(SchemaError::Obsolete {
                field: format!("{parent}.{key}"),
                replacement: (*replacement).to_string(),
            });
        }
    }

    Ok(())
}

/// Detects the list-of-pairs collection layout (`[["k", 2.0], ...]`).
pub fn check_collection_shape(kind: CollectionKind, items: &[Json]) -> Result<(), SchemaError> {
    let pair_style = items.iter().any(|item| {
        item.as_array()
            .is_some_and(|pair| pair.first().is_some_and(Json::is_string))
    });
    if pair_style {
        return Err(SchemaError::Obsolete {
            field: kind.field().to_string(),
            replacement: "definitions are records of the form {name, value, lim}".to_string(),
        });
    }
    Ok(())
}
