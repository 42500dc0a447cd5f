//! HTML stripping for user supplied text.
//!
//! The policy is strict and fixed: no tag survives, script and style blocks
//! are removed with their content, every other tag is dropped (its text is
//! kept) and any stray angle bracket is escaped. Apostrophes, double quotes
//! and ampersands are left readable. Types opt in through [`Sanitizable`].

use std::collections::{BTreeMap, HashMap, HashSet};

use ammonia::Builder;

use crate::metadata::Metadata;

fn strict_policy() -> Builder<'static> {
    let mut policy = Builder::empty();
    policy
        .clean_content_tags(HashSet::from(["script", "style"]))
        .strip_comments(true);
    policy
}

/// Applies the strict policy to a single string.
pub fn sanitize(input: &str) -> String {
    if !input.contains(['<', '>', '&']) {
        return input.to_string();
    }

    strict_policy()
        .clean(input)
        .to_string()
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// A value whose user supplied strings can be cleaned in place.
pub trait Sanitizable {
    fn sanitize(&mut self);
}

/// Cleans every string `object` exposes through its [`Sanitizable`] impl.
pub fn sanitize_object<T: Sanitizable + ?Sized>(object: &mut T) {
    object.sanitize();
}

impl Sanitizable for String {
    fn sanitize(&mut self) {
        let cleaned = sanitize(self.as_str());
        if cleaned != *self {
            *self = cleaned;
        }
    }
}

impl<T: Sanitizable> Sanitizable for Option<T> {
    fn sanitize(&mut self) {
        if let Some(value) = self {
            value.sanitize();
        }
    }
}

impl<T: Sanitizable + ?Sized> Sanitizable for Box<T> {
    fn sanitize(&mut self) {
        (**self).sanitize();
    }
}

impl<T: Sanitizable> Sanitizable for Vec<T> {
    fn sanitize(&mut self) {
        self.iter_mut().for_each(Sanitizable::sanitize);
    }
}

impl<T: Sanitizable> Sanitizable for [T] {
    fn sanitize(&mut self) {
        self.iter_mut().for_each(Sanitizable::sanitize);
    }
}

impl<T: Sanitizable, S: std::hash::BuildHasher + Default> Sanitizable for HashMap<String, T, S> {
    fn sanitize(&mut self) {
        *self = sanitize_entries(std::mem::take(self));
    }
}

impl<T: Sanitizable> Sanitizable for BTreeMap<String, T> {
    fn sanitize(&mut self) {
        *self = sanitize_entries(std::mem::take(self));
    }
}

fn sanitize_entries<T, I, C>(entries: I) -> C
where
    T: Sanitizable,
    I: IntoIterator<Item = (String, T)>,
    C: FromIterator<(String, T)>,
{
    entries
        .into_iter()
        .map(|(mut key, mut value)| {
            key.sanitize();
            value.sanitize();
            (key, value)
        })
        .collect()
}

impl Sanitizable for serde_json::Value {
    fn sanitize(&mut self) {
        match self {
            serde_json::Value::String(value) => value.sanitize(),
            serde_json::Value::Array(values) => values.sanitize(),
            serde_json::Value::Object(object) => {
                let entries = std::mem::take(object);
                *object = sanitize_entries(entries);
            }
            serde_json::Value::Null | serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {}
        }
    }
}

impl Sanitizable for Metadata {
    fn sanitize(&mut self) {
        let entries: BTreeMap<String, String> = std::mem::take(self).into();
        *self = Metadata::from(sanitize_entries::<_, _, BTreeMap<_, _>>(entries));
    }
}
