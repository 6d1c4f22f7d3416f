use serde_json::Value;

use crate::error::ExecError;

/// Extract a value with the minimal JSON path dialect used on plan edges:
/// `.a.b.c` walks nested objects, `.a[i]` indexes arrays, `.a[*]`
/// flattens one array level.
pub fn extract_json_path(json: &Value, path: &str) -> Result<Value, ExecError> {
    let invalid = |reason: &str| ExecError::InvalidJsonPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = path.strip_prefix('.').unwrap_or(path);
    if trimmed.is_empty() {
        return Ok(json.clone());
    }

    let mut current = json.clone();
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        let (key, index) = match segment.find('[') {
            Some(open) => {
                let close = segment
                    .rfind(']')
                    .ok_or_else(|| invalid("unclosed index bracket"))?;
                (&segment[..open], Some(&segment[open + 1..close]))
            }
            None => (segment, None),
        };

        if !key.is_empty() {
            current = match current.get(key) {
                Some(v) => v.clone(),
                None => {
                    return Err(ExecError::FieldMissing {
                        field: key.to_string(),
                    });
                }
            };
        }

        if let Some(index) = index {
            let array = current
                .as_array()
                .ok_or_else(|| invalid("indexed a non-array"))?;
            if index == "*" {
                // Flatten one level: non-array elements pass through.
                let mut flat = Vec::new();
                for element in array {
                    match element {
                        Value::Array(inner) => flat.extend(inner.iter().cloned()),
                        other => flat.push(other.clone()),
                    }
                }
                current = Value::Array(flat);
            } else {
                let i: usize = index.parse().map_err(|_| invalid("bad array index"))?;
                current = array
                    .get(i)
                    .cloned()
                    .ok_or_else(|| invalid("array index out of range"))?;
            }
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_objects() {
        let v = json!({"a": {"b": {"c": 42}}});
        assert_eq!(extract_json_path(&v, ".a.b.c").unwrap(), json!(42));
    }

    #[test]
    fn test_array_index() {
        let v = json!({"items": [10, 20, 30]});
        assert_eq!(extract_json_path(&v, ".items[1]").unwrap(), json!(20));
    }

    #[test]
    fn test_flatten() {
        let v = json!({"pages": [[1, 2], [3], 4]});
        assert_eq!(
            extract_json_path(&v, ".pages[*]").unwrap(),
            json!([1, 2, 3, 4])
        );
    }

    #[test]
    fn test_missing_field() {
        let v = json!({"a": 1});
        assert!(matches!(
            extract_json_path(&v, ".b").unwrap_err(),
            ExecError::FieldMissing { field } if field == "b"
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        let v = json!({"a": [1]});
        assert!(matches!(
            extract_json_path(&v, ".a[5]").unwrap_err(),
            ExecError::InvalidJsonPath { .. }
        ));
    }

    #[test]
    fn test_empty_path_is_identity() {
        let v = json!({"a": 1});
        assert_eq!(extract_json_path(&v, "").unwrap(), v);
        assert_eq!(extract_json_path(&v, ".").unwrap(), v);
    }
}
