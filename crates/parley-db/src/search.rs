/// Build an FTS5 MATCH expression from free text typed by a user.
///
/// Every whitespace-separated term becomes a quoted string (so operators and
/// punctuation in the input are matched literally) and the terms are ANDed.
/// The last term is a prefix query, so "hel" matches "hello" while typing.
/// Returns `None` when the input has no terms.
pub fn fts_query(raw: &str) -> Option<String> {
    let terms: Vec<String> = raw
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();

    let (last, rest) = terms.split_last()?;

    let mut query = rest.join(" ");
    if !query.is_empty() {
        query.push(' ');
    }
    query.push_str(last);
    query.push('*');
    Some(query)
}
