// src/pipeline/global_functions.rs
use regex::Regex;
use starlark::starlark_module;
use starlark::values::{Heap, Value};
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    /// Capture groups of the most recent regex match in the current record
    pub(crate) static LAST_MATCH: RefCell<Vec<Option<String>>> = const { RefCell::new(Vec::new()) };
    static REGEX_CACHE: RefCell<HashMap<String, Regex>> = RefCell::new(HashMap::new());
}

/// Forget the previous record's match; called before each record runs
pub(crate) fn reset_last_match() {
    LAST_MATCH.with(|groups| groups.borrow_mut().clear());
}

fn remember_match(captures: &regex::Captures) {
    let groups = captures
        .iter()
        .map(|group| group.map(|m| m.as_str().to_string()))
        .collect();
    LAST_MATCH.with(|last| *last.borrow_mut() = groups);
}

/// Compile `pattern` with inline flags, reusing earlier compilations
fn cached_regex(pattern: &str, flags: &str) -> anyhow::Result<Regex> {
    let inline: String = flags.chars().filter(|c| "imsx".contains(*c)).collect();
    let source = if inline.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", inline, pattern)
    };

    REGEX_CACHE.with(|cache| {
        if let Some(regex) = cache.borrow().get(&source) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(&source)?;
        cache.borrow_mut().insert(source, regex.clone());
        Ok(regex)
    })
}

#[starlark_module]
pub(crate) fn global_functions(builder: &mut starlark::environment::GlobalsBuilder) {
    /// Match `text` against `pattern`. Without the `g` flag, returns
    /// `[match, group1, ...]`; with it, every full match. `None` when
    /// nothing matches.
    fn re_match<'v>(
        heap: &'v Heap,
        text: String,
        pattern: String,
        flags: Option<String>,
    ) -> anyhow::Result<Value<'v>> {
        let flags = flags.unwrap_or_default();
        let regex = cached_regex(&pattern, &flags)?;

        if flags.contains('g') {
            let mut matches = Vec::new();
            for captures in regex.captures_iter(&text) {
                remember_match(&captures);
                matches.push(heap.alloc(captures.get(0).map_or("", |m| m.as_str())));
            }
            if matches.is_empty() {
                return Ok(Value::new_none());
            }
            return Ok(heap.alloc(matches));
        }

        match regex.captures(&text) {
            Some(captures) => {
                remember_match(&captures);
                let groups: Vec<Value> = captures
                    .iter()
                    .map(|group| match group {
                        Some(m) => heap.alloc(m.as_str()),
                        None => Value::new_none(),
                    })
                    .collect();
                Ok(heap.alloc(groups))
            }
            None => Ok(Value::new_none()),
        }
    }

    /// Group `group` of the last match made in this record, or "".
    fn last_match(group: i32) -> anyhow::Result<String> {
        let text = LAST_MATCH.with(|groups| {
            usize::try_from(group)
                .ok()
                .and_then(|i| groups.borrow().get(i).cloned().flatten())
        });
        Ok(text.unwrap_or_default())
    }

    fn regex_match(pattern: String, text: String) -> anyhow::Result<bool> {
        match cached_regex(&pattern, "") {
            Ok(regex) => match regex.captures(&text) {
                Some(captures) => {
                    remember_match(&captures);
                    Ok(true)
                }
                None => Ok(false),
            },
            Err(_) => Ok(false),
        }
    }

    fn regex_replace(pattern: String, replacement: String, text: String) -> anyhow::Result<String> {
        let regex = cached_regex(&pattern, "")?;
        Ok(regex.replace_all(&text, replacement.as_str()).into_owned())
    }
}
