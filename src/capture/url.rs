use chrono::NaiveDate;
use url::Url;

use crate::foundation::dates::{DateFormat, Timezone};

/// Set `key=value` in the query of `url`.
///
/// The first existing occurrence of `key` is replaced in place and later duplicates are dropped;
/// otherwise the pair is appended. Other parameters keep their order, the fragment is untouched.
pub fn with_query_param(url: &Url, key: &str, value: &str) -> Url {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut replaced = false;
    pairs.retain_mut(|(k, v)| {
        if k != key {
            return true;
        }
        if replaced {
            return false;
        }
        *v = value.to_string();
        replaced = true;
        true
    });
    if !replaced {
        pairs.push((key.to_string(), value.to_string()));
    }

    let mut out = url.clone();
    out.query_pairs_mut().clear().extend_pairs(pairs);
    out
}

/// Inject the date parameter for `date`, rendered with `format` at local midnight in `tz`.
pub fn ensure_date_param(
    url: &Url,
    param: &str,
    date: NaiveDate,
    format: &DateFormat,
    tz: Timezone,
) -> Url {
    with_query_param(url, param, &format.render(date, tz))
}

#[cfg(test)]
#[path = "../../tests/unit/capture/url.rs"]
mod tests;
