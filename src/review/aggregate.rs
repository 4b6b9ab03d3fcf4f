use std::collections::{BTreeMap, HashMap};

use super::types::{Comment, ProducerResult};

/// Producer results in merge order: `declared` first, then results stored
/// under undeclared names in name order.
pub fn ordered<'a>(
    results: &'a HashMap<String, ProducerResult>,
    declared: &[String],
) -> Vec<&'a ProducerResult> {
    let mut undeclared: Vec<&String> = results
        .keys()
        .filter(|name| !declared.contains(name))
        .collect();
    undeclared.sort();

    declared
        .iter()
        .chain(undeclared)
        .filter_map(|name| results.get(name))
        .collect()
}

/// Concatenate producer comment lists in `declared` order.
///
/// The order of `results` (a hash map) never leaks into the output. Comments
/// are not de-duplicated.
pub fn merge(results: &HashMap<String, ProducerResult>, declared: &[String]) -> Vec<Comment> {
    ordered(results, declared)
        .into_iter()
        .flat_map(|result| result.comments.iter().cloned())
        .collect()
}

/// Group comments by file path, keeping their relative order.
pub fn group_by_file<'a, I>(comments: I) -> BTreeMap<&'a str, Vec<&'a Comment>>
where
    I: IntoIterator<Item = &'a Comment>,
{
    let mut grouped: BTreeMap<&str, Vec<&Comment>> = BTreeMap::new();
    for comment in comments {
        grouped.entry(comment.file.as_str()).or_default().push(comment);
    }
    grouped
}

/// Group comments by line; same-line comments keep their relative order.
pub fn group_by_line<'a, I>(comments: I) -> BTreeMap<usize, Vec<&'a Comment>>
where
    I: IntoIterator<Item = &'a Comment>,
{
    let mut grouped: BTreeMap<usize, Vec<&Comment>> = BTreeMap::new();
    for comment in comments {
        grouped.entry(comment.line).or_default().push(comment);
    }
    grouped
}
