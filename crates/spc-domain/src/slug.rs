/// Build a URL slug the way the site has always derived them from titles.
///
/// Non-ASCII characters are dropped, anything that is not a word character,
/// whitespace or hyphen is removed, and runs of whitespace/hyphens collapse to a
/// single `-`. Leading and trailing separators are trimmed.
#[must_use]
pub fn slugify(title: &str) -> String {
    let filtered: String = title
        .chars()
        .filter(char::is_ascii)
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-' || ch.is_whitespace())
        .collect();
    let lowered = filtered.trim().to_ascii_lowercase();

    let mut slug = String::with_capacity(lowered.len());
    let mut pending_separator = false;
    for ch in lowered.chars() {
        if ch == '-' || ch.is_whitespace() {
            pending_separator = true;
            continue;
        }
        if pending_separator {
            slug.push('-');
            pending_separator = false;
        }
        slug.push(ch);
    }
    if pending_separator {
        slug.push('-');
    }
    slug
}

/// File name used when a snippet's code is written into its repository.
#[must_use]
pub fn snippet_file_name(title: &str) -> String {
    format!("{}.py", slugify(title).replace('-', "_"))
}
