//! Target resolution: turn a document structure plus a selection into an
//! ordered, deduplicated download plan with collision-safe file suffixes.
//!
//! Everything here is pure. Warnings are returned alongside the plan so the
//! caller decides where diagnostics go.

use std::collections::HashSet;
use std::fmt;

use crate::naming::slugify;
use crate::types::{
    Document, DownloadPlanEntry, Frame, PAGE_ID_PREFIX, Page, PageToken, SHAPE_ID_PREFIX,
    Selection,
};

/// Which level of the document a warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Page,
    Frame,
}

impl TargetKind {
    fn label(self) -> &'static str {
        match self {
            TargetKind::Page => "Page",
            TargetKind::Frame => "Frame",
        }
    }

    fn plural(self) -> &'static str {
        match self {
            TargetKind::Page => "pages",
            TargetKind::Frame => "frames",
        }
    }
}

/// Non-fatal findings produced while resolving a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanWarning {
    /// A requested token matched nothing.
    TokenNotFound { kind: TargetKind, token: String },
    /// Every token of one option missed, so the option was dropped.
    SelectionIgnored { kind: TargetKind },
    /// Slugs collide, so ids were appended to the suffixes.
    NameCollision {
        kind: TargetKind,
        page_id: Option<String>,
    },
    /// Distinct targets still mapped to the same suffix after slugging.
    SuffixCollision,
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanWarning::TokenNotFound { kind, token } => {
                write!(f, "{} \"{token}\" not found in sketch", kind.label())
            }
            PlanWarning::SelectionIgnored { kind } => write!(
                f,
                "None of the requested {plural} were found in sketch, ignoring {plural} option",
                plural = kind.plural()
            ),
            PlanWarning::NameCollision { kind, .. } => write!(
                f,
                "{} names are not unique, including {} IDs in the output filenames to avoid collisions",
                kind.label(),
                kind.label().to_ascii_lowercase()
            ),
            PlanWarning::SuffixCollision => f.write_str(
                "Output filenames are not unique, disambiguating suffixes to avoid collisions",
            ),
        }
    }
}

/// Resolver output: the plan plus everything worth telling the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPlan {
    pub entries: Vec<DownloadPlanEntry>,
    pub warnings: Vec<PlanWarning>,
}

/// Resolve `pages` and `frames` against `document`.
pub fn resolve_plan(
    document: &Document,
    pages: &Selection<PageToken>,
    frames: &Selection<String>,
) -> ResolvedPlan {
    let mut warnings = Vec::new();

    let (selected_pages, explicit_pages) = select_pages(document, pages, &mut warnings);
    let page_frames = select_frames(&selected_pages, frames, &mut warnings);

    let page_collision = has_duplicates(selected_pages.iter().map(|page| slugify(&page.name)));
    if explicit_pages && page_collision {
        warnings.push(PlanWarning::NameCollision {
            kind: TargetKind::Page,
            page_id: None,
        });
    }
    let mut entries = build_entries(
        &selected_pages,
        &page_frames,
        explicit_pages,
        page_collision,
        &mut warnings,
    );

    // Slug-id joins can still coincide, e.g. a page slug with another page's
    // page+frame suffix, or ids that themselves contain dashes.
    if has_duplicates(entries.iter().map(|e| &e.suffix)) {
        warnings.push(PlanWarning::SuffixCollision);
        if explicit_pages && !page_collision {
            entries = build_entries(&selected_pages, &page_frames, true, true, &mut Vec::new());
        }
        number_duplicates(&mut entries);
    }

    ResolvedPlan { entries, warnings }
}

fn select_pages<'d>(
    document: &'d Document,
    selection: &Selection<PageToken>,
    warnings: &mut Vec<PlanWarning>,
) -> (Vec<&'d Page>, bool) {
    let first_only = || document.pages.iter().take(1).collect::<Vec<_>>();

    match selection {
        Selection::Default => (first_only(), false),
        Selection::All => (document.pages.iter().collect(), true),
        Selection::Tokens(tokens) => {
            let mut matched: Vec<&Page> = Vec::new();
            for token in tokens {
                match find_page(document, token) {
                    Some(page) => {
                        if !matched.iter().any(|existing| existing.id == page.id) {
                            matched.push(page);
                        }
                    }
                    None => warnings.push(PlanWarning::TokenNotFound {
                        kind: TargetKind::Page,
                        token: token.to_string(),
                    }),
                }
            }

            if matched.is_empty() {
                warnings.push(PlanWarning::SelectionIgnored {
                    kind: TargetKind::Page,
                });
                (first_only(), false)
            } else {
                (matched, true)
            }
        }
    }
}

/// Name, then id, then position. Numeric tokens try all three so a page
/// literally named "2" stays reachable.
fn find_page<'d>(document: &'d Document, token: &PageToken) -> Option<&'d Page> {
    let by_name_or_id = |name: &str| {
        document
            .pages
            .iter()
            .find(|page| name_matches(name, &page.name))
            .or_else(|| {
                document
                    .pages
                    .iter()
                    .find(|page| id_matches(name, page.bare_id(), PAGE_ID_PREFIX))
            })
    };

    match token {
        PageToken::Name(name) => by_name_or_id(name),
        PageToken::Index(index) => {
            by_name_or_id(&index.to_string()).or_else(|| document.pages.get(*index))
        }
    }
}

fn find_frame<'p>(page: &'p Page, token: &str) -> Option<&'p Frame> {
    page.frames
        .iter()
        .find(|frame| name_matches(token, frame.display_name()))
        .or_else(|| {
            page.frames
                .iter()
                .find(|frame| id_matches(token, frame.bare_id(), SHAPE_ID_PREFIX))
        })
}

fn name_matches(token: &str, name: &str) -> bool {
    if token == name {
        return true;
    }
    let slug = slugify(token);
    !slug.is_empty() && slug == slugify(name)
}

fn id_matches(token: &str, bare_id: &str, prefix: &str) -> bool {
    let bare_token = token.strip_prefix(prefix).unwrap_or(token);
    !bare_token.is_empty() && bare_token == bare_id
}

/// Frames to export for each selected page; an empty list means "whole page".
fn select_frames<'d>(
    pages: &[&'d Page],
    selection: &Selection<String>,
    warnings: &mut Vec<PlanWarning>,
) -> Vec<Vec<&'d Frame>> {
    match selection {
        Selection::Default => vec![Vec::new(); pages.len()],
        Selection::All => pages.iter().map(|&page| page.frames.iter().collect()).collect(),
        Selection::Tokens(tokens) => {
            let mut per_page: Vec<Vec<&Frame>> = vec![Vec::new(); pages.len()];
            for token in tokens {
                let mut found = false;
                for (page, selected) in pages.iter().zip(per_page.iter_mut()) {
                    if let Some(frame) = find_frame(*page, token) {
                        found = true;
                        if !selected.iter().any(|existing| existing.id == frame.id) {
                            selected.push(frame);
                        }
                    }
                }
                if !found {
                    warnings.push(PlanWarning::TokenNotFound {
                        kind: TargetKind::Frame,
                        token: token.clone(),
                    });
                }
            }

            if per_page.iter().all(Vec::is_empty) {
                warnings.push(PlanWarning::SelectionIgnored {
                    kind: TargetKind::Frame,
                });
            }
            per_page
        }
    }
}

fn build_entries(
    pages: &[&Page],
    page_frames: &[Vec<&Frame>],
    explicit_pages: bool,
    page_collision: bool,
    warnings: &mut Vec<PlanWarning>,
) -> Vec<DownloadPlanEntry> {
    let mut entries = Vec::new();
    for (page, frames) in pages.iter().zip(page_frames) {
        let page_suffix = if explicit_pages {
            label(&slugify(&page.name), page.bare_id(), page_collision)
        } else {
            String::new()
        };

        if frames.is_empty() {
            entries.push(DownloadPlanEntry::whole_page(
                page.id.clone(),
                dashed(&[page_suffix.as_str()]),
            ));
            continue;
        }

        let frame_collision = has_duplicates(frames.iter().map(|f| slugify(f.display_name())));
        if frame_collision {
            warnings.push(PlanWarning::NameCollision {
                kind: TargetKind::Frame,
                page_id: Some(page.id.clone()),
            });
        }

        for frame in frames {
            let frame_suffix = label(
                &slugify(frame.display_name()),
                frame.bare_id(),
                frame_collision,
            );
            entries.push(DownloadPlanEntry::frame(
                page.id.clone(),
                frame.id.clone(),
                dashed(&[page_suffix.as_str(), frame_suffix.as_str()]),
            ));
        }
    }
    entries
}

/// Suffix part for one page or frame. Falls back to the id when the slug is
/// empty so an enumerated target never produces an empty part.
fn label(slug: &str, bare_id: &str, with_id: bool) -> String {
    if with_id || slug.is_empty() {
        [slug, bare_id]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    } else {
        slug.to_string()
    }
}

fn dashed(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-");
    if joined.is_empty() {
        joined
    } else {
        format!("-{joined}")
    }
}

/// Append a counter to every repeated suffix. A candidate is only taken when
/// no entry already uses it, so the result is unique.
fn number_duplicates(entries: &mut [DownloadPlanEntry]) {
    let mut taken: HashSet<String> = entries.iter().map(|e| e.suffix.clone()).collect();
    let mut seen = HashSet::new();
    for entry in entries.iter_mut() {
        if seen.insert(entry.suffix.clone()) {
            continue;
        }
        let mut counter = 2;
        let unique = loop {
            let candidate = format!("{}-{counter}", entry.suffix);
            if !taken.contains(&candidate) {
                break candidate;
            }
            counter += 1;
        };
        taken.insert(unique.clone());
        seen.insert(unique.clone());
        entry.suffix = unique;
    }
}

fn has_duplicates<T, I>(values: I) -> bool
where
    T: Eq + std::hash::Hash,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    values.into_iter().any(|value| !seen.insert(value))
}
