use serde_json::value::Value as JsonValue;

use jsonipc_core::{EngineError, JsonPath, JsonType};

fn array_index(path: &JsonPath, component: &str) -> Result<usize, EngineError> {
    component.parse::<usize>().map_err(|error| {
        EngineError::structural(format!(
            concat!(
                "path '{}' component ({}) ",
                "failed to parse as an array index: {}."
            ),
            path, component, error
        ))
    })
}

fn traverse_error(path: &JsonPath, component: &str, at: &JsonValue) -> EngineError {
    EngineError::structural(format!(
        "path '{}' cannot descend into {} at component ({}).",
        path,
        JsonType::of(at),
        component
    ))
}

/// Look up the sub-tree at `path`.
///
/// A missing member or out-of-range index is `Ok(None)`; descending into a
/// scalar, or indexing an array with a non-number, is a structural error.
pub fn get_sub_tree<'tree>(
    tree: &'tree JsonValue,
    path: &JsonPath,
) -> Result<Option<&'tree JsonValue>, EngineError> {
    let mut cursor: &JsonValue = tree;
    for component in path.iter() {
        match cursor {
            JsonValue::Object(map) => match map.get(component) {
                Some(next) => cursor = next,
                None => return Ok(None),
            },
            JsonValue::Array(arr) => {
                let index = array_index(path, component)?;
                match arr.get(index) {
                    Some(next) => cursor = next,
                    None => return Ok(None),
                }
            }
            JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_) => {
                return Err(traverse_error(path, component, cursor));
            }
        }
    }

    Ok(Some(cursor))
}

pub fn get_sub_tree_mut<'tree>(
    tree: &'tree mut JsonValue,
    path: &JsonPath,
) -> Result<Option<&'tree mut JsonValue>, EngineError> {
    let mut cursor: &mut JsonValue = tree;
    for component in path.iter() {
        match cursor {
            JsonValue::Object(map) => match map.get_mut(component) {
                Some(next) => cursor = next,
                None => return Ok(None),
            },
            JsonValue::Array(arr) => {
                let index = array_index(path, component)?;
                match arr.get_mut(index) {
                    Some(next) => cursor = next,
                    None => return Ok(None),
                }
            }
            scalar @ (JsonValue::Null
            | JsonValue::Bool(_)
            | JsonValue::Number(_)
            | JsonValue::String(_)) => {
                return Err(traverse_error(path, component, scalar));
            }
        }
    }

    Ok(Some(cursor))
}

/// Like [`get_sub_tree_mut`] but a missing target is a structural error.
pub fn require_sub_tree_mut<'tree>(
    tree: &'tree mut JsonValue,
    path: &JsonPath,
) -> Result<&'tree mut JsonValue, EngineError> {
    get_sub_tree_mut(tree, path)?
        .ok_or_else(|| EngineError::structural(format!("path '{}' does not exist.", path)))
}

/// Write `value` at `path`, which must name a member of an existing object or
/// an index of an existing array (one past the end appends).
pub fn set_path(tree: &mut JsonValue, path: &JsonPath, value: JsonValue) -> Result<(), EngineError> {
    let Some(parent_path) = path.parent() else {
        *tree = value;
        return Ok(());
    };
    let last_path_component = path.name();

    let sub_tree = get_sub_tree_mut(tree, &parent_path)?.ok_or_else(|| {
        EngineError::structural(format!(
            "path '{}' has no container at '{}'.",
            path, parent_path
        ))
    })?;

    match sub_tree {
        JsonValue::Object(map) => {
            map.insert(last_path_component.to_string(), value);
        }
        JsonValue::Array(arr) => {
            let index = array_index(path, last_path_component)?;

            // This comparison is more readable than index.cmp(arr.len) matching against
            // Ordering::Less, etc.
            #[allow(clippy::comparison_chain)]
            if index < arr.len() {
                arr[index] = value;
            } else if index == arr.len() {
                arr.push(value);
            } else {
                return Err(EngineError::structural(format!(
                    "path '{}' index ({}) is out of bounds for an array of length {}.",
                    path,
                    index,
                    arr.len()
                )));
            }
        }
        scalar @ (JsonValue::Null
        | JsonValue::Bool(_)
        | JsonValue::Number(_)
        | JsonValue::String(_)) => {
            return Err(EngineError::structural(format!(
                "path '{}' cannot be set inside {}.",
                path,
                JsonType::of(scalar)
            )));
        }
    }

    Ok(())
}

pub fn wrong_type(path: &JsonPath, wanted: JsonType, found: &JsonValue) -> EngineError {
    EngineError::structural(format!(
        "path '{}' holds {}, expected {}.",
        path,
        JsonType::of(found),
        wanted
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonipc_core::json_path;
    use serde_json::json;

    #[test]
    fn get_nested_values() {
        let tree = json!({"a": {"b": [10, 20]}});
        assert_eq!(
            get_sub_tree(&tree, &json_path!(".a.b.1")).unwrap(),
            Some(&json!(20))
        );
        assert_eq!(get_sub_tree(&tree, &json_path!(".")).unwrap(), Some(&tree));
        assert_eq!(get_sub_tree(&tree, &json_path!(".a.c")).unwrap(), None);
        assert_eq!(get_sub_tree(&tree, &json_path!(".a.b.5")).unwrap(), None);
    }

    #[test]
    fn get_through_scalar_is_structural() {
        let tree = json!({"a": 1});
        let err = get_sub_tree(&tree, &json_path!(".a.b")).unwrap_err();
        assert!(err.is_structural());
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn bad_array_index_is_structural() {
        let tree = json!({"a": [1]});
        assert!(get_sub_tree(&tree, &json_path!(".a.x"))
            .unwrap_err()
            .is_structural());
    }

    #[test]
    fn set_replaces_root() {
        let mut tree = json!({"a": 1});
        set_path(&mut tree, &json_path!("."), json!("x")).unwrap();
        assert_eq!(tree, json!("x"));
    }

    #[test]
    fn set_inserts_member() {
        let mut tree = json!({"a": {}});
        set_path(&mut tree, &json_path!(".a.b"), json!(1)).unwrap();
        assert_eq!(tree, json!({"a": {"b": 1}}));
    }

    #[test]
    fn set_requires_container() {
        let mut tree = json!({});
        let err = set_path(&mut tree, &json_path!(".a.b"), json!(1)).unwrap_err();
        assert!(err.to_string().contains("no container"));

        let mut tree = json!({"a": "str"});
        let err = set_path(&mut tree, &json_path!(".a.b"), json!(1)).unwrap_err();
        assert!(err.to_string().contains("cannot be set inside string"));
    }

    #[test]
    fn set_array_bounds() {
        let mut tree = json!([1, 2]);
        set_path(&mut tree, &json_path!(".0"), json!(9)).unwrap();
        set_path(&mut tree, &json_path!(".2"), json!(3)).unwrap();
        assert_eq!(tree, json!([9, 2, 3]));
        assert!(set_path(&mut tree, &json_path!(".7"), json!(0)).is_err());
    }

    #[test]
    fn require_reports_missing_path() {
        let mut tree = json!({});
        let err = require_sub_tree_mut(&mut tree, &json_path!(".nope")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
