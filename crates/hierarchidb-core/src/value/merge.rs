use crate::value::Value;

/// Merge a patch into a base map, field by field.
///
/// Semantics match the edit surface: a key absent from the patch leaves the
/// base field untouched; a present key overwrites, including explicit `Null`.
/// Non-map patches replace the base wholesale.
pub fn merge_patch(base: &mut Value, patch: &Value) {
    match (base.as_map_mut(), patch.as_map()) {
        (Some(base_map), Some(patch_map)) => {
            for (key, value) in patch_map {
                base_map.insert(key.clone(), value.clone());
            }
        }
        _ => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_keys_are_untouched() {
        let mut base = Value::map();
        base.set("kept", Value::Int(1)).unwrap();
        base.set("replaced", Value::Int(2)).unwrap();

        let mut patch = Value::map();
        patch.set("replaced", Value::Int(3)).unwrap();

        merge_patch(&mut base, &patch);

        assert_eq!(base.get("kept"), Some(&Value::Int(1)));
        assert_eq!(base.get("replaced"), Some(&Value::Int(3)));
    }

    #[test]
    fn explicit_null_is_assigned() {
        let mut base = Value::map();
        base.set("cleared", Value::Int(1)).unwrap();

        let mut patch = Value::map();
        patch.set("cleared", Value::Null).unwrap();

        merge_patch(&mut base, &patch);

        assert_eq!(base.get("cleared"), Some(&Value::Null));
    }

    #[test]
    fn non_map_patch_replaces_wholesale() {
        let mut base = Value::map();
        base.set("x", Value::Int(1)).unwrap();

        merge_patch(&mut base, &Value::from("flat"));

        assert_eq!(base, Value::from("flat"));
    }
}
