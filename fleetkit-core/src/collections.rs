use std::collections::BTreeMap;

/// Copies `base` and overlays `additional` on top of it.
///
/// Keys present in both keep the value from `additional`. The result is always
/// a fresh map, even when both inputs are empty.
pub fn string_map_merge<B, A, K, V>(base: B, additional: A) -> BTreeMap<String, String>
where
    B: IntoIterator<Item = (K, V)>,
    A: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut result: BTreeMap<String, String> = base
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect();

    for (key, value) in additional {
        result.insert(key.into(), value.into());
    }

    result
}

/// Whether `slice` holds an element equal to `value`.
pub fn string_slice_contains<S: AsRef<str>>(slice: &[S], value: &str) -> bool {
    slice.iter().any(|item| item.as_ref() == value)
}
