//! Name normalisation helpers shared by the resolver and the orchestrator.
//!
//! Slugs are used both for matching user-supplied page/frame tokens and for
//! building output file suffixes, so the two can never disagree.

use std::cmp::Ordering;
use std::env;
use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::types::ExportFormat;

/// Produce a lowercase, dash-separated, ASCII-only form of `input`.
///
/// Unicode is transliterated, `&` reads as "and", and camelCase boundaries
/// are split before collapsing everything that is not alphanumeric.
pub fn slugify(input: &str) -> String {
    let spaced = input.replace('&', " and ");
    let ascii = deunicode::deunicode(&spaced);
    let split = decamelize(&ascii);

    let mut slug = String::with_capacity(split.len());
    let mut pending_dash = false;
    for ch in split.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn decamelize(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);
    for (index, &ch) in chars.iter().enumerate() {
        if index > 0 && ch.is_ascii_uppercase() {
            let prev = chars[index - 1];
            let next_is_lower = chars
                .get(index + 1)
                .is_some_and(|next| next.is_ascii_lowercase());
            // fooBar, foo2Bar, XMLHttp
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                out.push(' ');
            }
        }
        out.push(ch);
    }
    out
}

/// Compare strings the way a person would sort file names: digit runs by
/// numeric value, everything else case-insensitively.
pub fn natural_cmp(left: &str, right: &str) -> Ordering {
    let mut a = Chunks::new(left);
    let mut b = Chunks::new(right);

    loop {
        match (a.next(), b.next()) {
            (None, None) => return left.cmp(right),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = match (x, y) {
                    (Chunk::Digits(x), Chunk::Digits(y)) => compare_digits(x, y),
                    (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
                    (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
                    (Chunk::Text(x), Chunk::Text(y)) => x
                        .chars()
                        .flat_map(char::to_lowercase)
                        .cmp(y.chars().flat_map(char::to_lowercase)),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn compare_digits(left: &str, right: &str) -> Ordering {
    let left_trimmed = left.trim_start_matches('0');
    let right_trimmed = right.trim_start_matches('0');
    left_trimmed
        .len()
        .cmp(&right_trimmed.len())
        .then_with(|| left_trimmed.cmp(right_trimmed))
        .then_with(|| left.len().cmp(&right.len()))
}

enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(value: &'a str) -> Self {
        Self { rest: value }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, ch)| ch.is_ascii_digit() != digits)
            .map(|(index, _)| index)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(if digits {
            Chunk::Digits(chunk)
        } else {
            Chunk::Text(chunk)
        })
    }
}

/// Drop a trailing `.{format}` so `sketch.svg` does not become `sketch.svg.svg`.
pub fn strip_format_extension(name: &str, format: ExportFormat) -> &str {
    let extension = format!(".{}", format.extension());
    match name.len().checked_sub(extension.len()) {
        Some(cut)
            if cut > 0
                && name.is_char_boundary(cut)
                && name[cut..].eq_ignore_ascii_case(&extension) =>
        {
            &name[..cut]
        }
        _ => name,
    }
}

/// Default base name for a local sketch: its file stem.
pub fn base_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "sketch".to_string())
}

/// Default base name for a remote sketch: the last path segment of its URL.
pub fn base_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .map(str::to_string)
        .or_else(|| url.host_str().map(slugify))
        .unwrap_or_else(|| "sketch".to_string())
}

/// Absolute, normalised destination for one artifact.
pub fn resolve_output_path(
    output_dir: &Path,
    base_name: &str,
    suffix: &str,
    format: ExportFormat,
) -> PathBuf {
    let file_name = format!("{base_name}{suffix}.{}", format.extension());
    let joined = output_dir.join(file_name);
    let expanded = shellexpand::tilde(&joined.to_string_lossy()).into_owned();
    absolutize(Path::new(&expanded))
}

/// Expand `~` and make `path` absolute without touching the filesystem.
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path).into_owned();
    absolutize(Path::new(&expanded))
}

fn absolutize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    lexical_normalize(&absolute)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
