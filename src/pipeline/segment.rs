//! Block segmentation: split one page of directory text into provider blocks.
//!
//! Printed provider directories come in two shapes:
//!
//! * **Individual** listings start every entry with the provider's name in
//!   `Last, First … MD` form, followed by ID, address, phone and languages.
//! * **Organization** listings print a practice name (`Advocate Medical
//!   Group`) and then the addresses and clinicians that practise there.
//!
//! A block is the contiguous span of lines belonging to one entry. The page
//! headings naming the county and the specialty are read here too, since they
//! apply to every entry on the page.

use crate::pipeline::clean::normalise_page;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How entries are laid out on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DirectoryLayout {
    /// Organization when an organization line precedes the first provider
    /// name, Individual when name lines exist, Organization when only
    /// organization lines exist, else the whole page as one block. (default)
    #[default]
    Auto,
    /// A block starts at each provider name line.
    Individual,
    /// A block starts at each organization line.
    Organization,
}

/// One contiguous span of text describing one directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// 1-indexed position on the page.
    pub index: usize,
    pub text: String,
}

/// A page split into blocks plus its heading metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentedPage {
    pub blocks: Vec<Block>,
    pub county: Option<String>,
    pub specialty: Option<String>,
}

static RE_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)^(?:
            \d+                                  # bare page number
          | -{3,} | _{3,} | —+                   # rules
          | \#*\s*page\s+\d+(?:\s+of\s+\d+)?     # page markers
          | -*\s*page\s+break\s*-*
          | board\s+certified\s+provider.*
          | primary\s+care\s+providers
        )$",
    )
    .unwrap()
});

/// `## Cook County` style heading.
static RE_COUNTY_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^#{1,6}\s*([a-z][a-z .'-]*?)\s+county$").unwrap());

/// All-caps `LOS ANGELES COUNTY` banner without a heading marker.
static RE_COUNTY_BANNER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Z][A-Z .'-]*?)\s+COUNTY$").unwrap());

static RE_SPECIALTY_PCP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^#{2,4}\s*(.*\b(?:PCP|primary care)\b.*)$").unwrap());

static RE_SPECIALTY_H4: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{4}\s*(.+)$").unwrap());

static RE_PROVIDER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z][^,]+, .+\b(?:MD|DO|NP|PA-C|PA|FNP|DNP|APRN|CNM|DPM|DDS|DMD|OD|PhD|PsyD|LCSW|LMFT)$")
        .unwrap()
});

static RE_ORG_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:center|centre|clinic|health\w*|hospital|medical|access|group|practice|partners|associates|network|ltd|inc|llc)\b",
    )
    .unwrap()
});

static RE_SC_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bSC\.?$").unwrap());

static RE_PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\(\d{3}\)|\d{3}[-.])\s*\d{3}[-.]\d{4}").unwrap());

static RE_STREET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\d{1,6}\s.*\b(?:st|ave|blvd|rd|dr|ln|way|pkwy|hwy|ct|pl|street|avenue|road|drive|boulevard|suite|ste)\b",
    )
    .unwrap()
});

/// Split `text` into provider blocks.
///
/// `chunk_words > 0` packs consecutive blocks into one block of at most that
/// many words (a single oversized block is kept whole).
pub fn segment_page(text: &str, layout: DirectoryLayout, chunk_words: usize) -> SegmentedPage {
    let normalised = normalise_page(text);
    if normalised.is_empty() {
        return SegmentedPage::default();
    }

    let county = detect_county(&normalised);
    let specialty = detect_specialty(&normalised);

    let lines: Vec<&str> = normalised
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !is_noise_line(l))
        .filter(|l| !l.starts_with('#'))
        .filter(|l| county.is_none() || county_heading(l) != county)
        .collect();

    let layout = resolve_layout(layout, &lines);
    let spans = match layout {
        DirectoryLayout::Individual => split_individual(&lines),
        DirectoryLayout::Organization => split_organization(&lines),
        DirectoryLayout::Auto => whole_page(&lines),
    };

    let spans = if chunk_words > 0 {
        pack_spans(spans, chunk_words)
    } else {
        spans
    };

    let blocks = spans
        .into_iter()
        .enumerate()
        .map(|(i, text)| Block { index: i + 1, text })
        .collect();

    SegmentedPage {
        blocks,
        county,
        specialty,
    }
}

/// Page furniture that never belongs to an entry.
pub fn is_noise_line(line: &str) -> bool {
    RE_NOISE.is_match(line.trim())
}

/// `Last, First … MD` style name line.
pub fn is_provider_name(line: &str) -> bool {
    RE_PROVIDER_NAME.is_match(line.trim())
}

/// Practice / organization name line.
pub fn is_organization_name(line: &str) -> bool {
    let line = line.trim();
    if is_provider_name(line) || RE_PHONE.is_match(line) || RE_STREET.is_match(line) {
        return false;
    }
    RE_ORG_KEYWORD.is_match(line) || RE_SC_SUFFIX.is_match(line)
}

/// `Auto` picks the layout from whichever start line comes first: a page
/// that opens with an organization is organization-first even when
/// clinicians are listed under it. A page with neither is a single block.
fn resolve_layout(layout: DirectoryLayout, lines: &[&str]) -> DirectoryLayout {
    if layout != DirectoryLayout::Auto {
        return layout;
    }
    let first_name = lines.iter().position(|l| is_provider_name(l));
    let first_org = lines.iter().position(|l| is_organization_name(l));
    match (first_name, first_org) {
        (Some(name), Some(org)) if org < name => DirectoryLayout::Organization,
        (Some(_), _) => DirectoryLayout::Individual,
        (None, Some(_)) => DirectoryLayout::Organization,
        (None, None) => DirectoryLayout::Auto,
    }
}

/// Lines before the first name line stay with the first block.
fn split_individual(lines: &[&str]) -> Vec<String> {
    let mut spans: Vec<Vec<&str>> = Vec::new();
    let mut preamble: Vec<&str> = Vec::new();
    for &line in lines {
        if is_provider_name(line) {
            let mut span = std::mem::take(&mut preamble);
            span.push(line);
            spans.push(span);
        } else if let Some(current) = spans.last_mut() {
            current.push(line);
        } else {
            preamble.push(line);
        }
    }
    if !preamble.is_empty() {
        debug!("No provider name line; {} lines kept as one block", preamble.len());
        spans.push(preamble);
    }
    spans.into_iter().map(|s| s.join("\n")).collect()
}

fn split_organization(lines: &[&str]) -> Vec<String> {
    let mut spans: Vec<Vec<&str>> = Vec::new();
    for &line in lines {
        if is_organization_name(line) || spans.is_empty() {
            spans.push(vec![line]);
        } else if let Some(current) = spans.last_mut() {
            current.push(line);
        }
    }
    spans.into_iter().map(|s| s.join("\n")).collect()
}

fn whole_page(lines: &[&str]) -> Vec<String> {
    if lines.is_empty() {
        Vec::new()
    } else {
        vec![lines.join("\n")]
    }
}

fn pack_spans(spans: Vec<String>, max_words: usize) -> Vec<String> {
    let mut packed = Vec::new();
    let mut current = String::new();
    let mut current_words = 0usize;

    for span in spans {
        let words = span.split_whitespace().count();
        if current_words > 0 && current_words + words > max_words {
            packed.push(std::mem::take(&mut current));
            current_words = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&span);
        current_words += words;
    }
    if !current.is_empty() {
        packed.push(current);
    }
    packed
}

/// County named by a heading or banner line, e.g. `### COOK COUNTY`.
///
/// Body text that merely ends in "County" (`Hospital of Orange County`) is
/// not a heading.
fn county_heading(line: &str) -> Option<String> {
    let line = line.trim();
    RE_COUNTY_HEADING
        .captures(line)
        .or_else(|| RE_COUNTY_BANNER.captures(line))
        .map(|c| format!("{} County", title_case(c[1].trim())))
}

fn detect_county(text: &str) -> Option<String> {
    text.lines().find_map(county_heading)
}

fn detect_specialty(text: &str) -> Option<String> {
    let lines = || text.lines().map(str::trim).filter(|l| county_heading(l).is_none());
    lines()
        .find_map(|l| {
            RE_SPECIALTY_PCP
                .captures(l)
                .map(|c| c[1].trim().to_string())
                .filter(|s| !RE_NOISE.is_match(s))
        })
        .or_else(|| lines().find_map(|l| RE_SPECIALTY_H4.captures(l).map(|c| c[1].trim().to_string())))
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDIVIDUAL_PAGE: &str = "## LOS ANGELES COUNTY\n\
### Primary Care Providers\n\
#### Family Practice PCP\n\
**Board Certified Provider\n\
**Abad, Maria L MD**\n\
PCP# 100234\n\
1200 N State St\n\
Los Angeles, CA 90033\n\
(323) 555-0111\n\
Languages: English; Spanish\n\
**Baker, Tom DO**\n\
PCP# 100777\n\
900 Wilshire Blvd Ste 3\n\
(213) 555-0123\n\
17\n\
---\n";

    const ORGANIZATION_PAGE: &str = "### COOK COUNTY\n\
#### Internal Medicine\n\
**Advocate Medical Group**\n\
1234 W Madison St\n\
Chicago, IL 60607\n\
(312) 555-0200\n\
Jarava, Abelardo MD\n\
PCP# 138567\n\
**7 Hills HealthCare Center**\n\
4501 S Ashland Ave\n\
(773) 555-0199\n";

    #[test]
    fn individual_layout_splits_on_names() {
        let page = segment_page(INDIVIDUAL_PAGE, DirectoryLayout::Auto, 0);
        assert_eq!(page.blocks.len(), 2);
        assert!(page.blocks[0].text.starts_with("Abad, Maria L MD"));
        assert!(page.blocks[0].text.contains("Languages: English; Spanish"));
        assert!(page.blocks[1].text.starts_with("Baker, Tom DO"));
        assert!(!page.blocks[1].text.contains("17"), "page number leaked: {:?}", page.blocks[1]);
        assert_eq!(page.blocks[1].index, 2);
    }

    #[test]
    fn headings_provide_county_and_specialty() {
        let page = segment_page(INDIVIDUAL_PAGE, DirectoryLayout::Auto, 0);
        assert_eq!(page.county.as_deref(), Some("Los Angeles County"));
        assert_eq!(page.specialty.as_deref(), Some("Family Practice PCP"));

        let page = segment_page(ORGANIZATION_PAGE, DirectoryLayout::Organization, 0);
        assert_eq!(page.county.as_deref(), Some("Cook County"));
        assert_eq!(page.specialty.as_deref(), Some("Internal Medicine"));
    }

    #[test]
    fn organization_layout_groups_under_practice() {
        let page = segment_page(ORGANIZATION_PAGE, DirectoryLayout::Organization, 0);
        assert_eq!(page.blocks.len(), 2);
        assert!(page.blocks[0].text.starts_with("Advocate Medical Group"));
        assert!(page.blocks[0].text.contains("Jarava, Abelardo MD"));
        assert!(page.blocks[1].text.starts_with("7 Hills HealthCare Center"));
    }

    #[test]
    fn auto_keeps_organization_first_pages_together() {
        let text = "**Advocate Medical Group**\n\
1234 W Madison St\n\
(312) 555-0200\n\
Jarava, Abelardo MD\n\
PCP# 138567\n\
Lee, Jo MD\n\
PCP# 2\n\
**7 Hills HealthCare Center**\n\
4501 S Ashland Ave\n\
(773) 555-0199\n";
        let page = segment_page(text, DirectoryLayout::Auto, 0);
        assert_eq!(page.blocks.len(), 2);
        let first = &page.blocks[0].text;
        assert!(first.starts_with("Advocate Medical Group"));
        assert!(first.contains("1234 W Madison St"));
        assert!(first.contains("Jarava, Abelardo MD"));
        assert!(first.contains("Lee, Jo MD"));
        let second = &page.blocks[1].text;
        assert!(second.starts_with("7 Hills HealthCare Center"));
        assert!(!second.contains("Lee, Jo MD"));
        assert!(!first.contains("4501 S Ashland Ave"), "next practice's address leaked into the first block");
    }

    #[test]
    fn auto_still_splits_name_first_pages_on_names() {
        let text = "Kim, Ann MD\nUCLA Health Family Medicine\n100 Main St\nLopez, Raul DO\nPCP# 2\n";
        let page = segment_page(text, DirectoryLayout::Auto, 0);
        assert_eq!(page.blocks.len(), 2);
        assert!(page.blocks[0].text.contains("UCLA Health Family Medicine"));
        assert!(page.blocks[1].text.starts_with("Lopez, Raul DO"));
    }

    #[test]
    fn individual_layout_keeps_lines_before_the_first_name() {
        let page = segment_page(ORGANIZATION_PAGE, DirectoryLayout::Individual, 0);
        assert_eq!(page.blocks.len(), 1);
        assert!(page.blocks[0].text.starts_with("Advocate Medical Group"));
        assert!(page.blocks[0].text.contains("Jarava, Abelardo MD"));

        let page = segment_page("Acme Clinic\n(312) 555-0100\n", DirectoryLayout::Individual, 0);
        assert_eq!(page.blocks.len(), 1, "a page without names is not dropped");
    }

    #[test]
    fn body_line_ending_in_county_is_not_a_heading() {
        let text = "Hospital of Orange County\n4501 S Ashland Ave\n(773) 555-0199\nKim, Ann MD\n";
        let page = segment_page(text, DirectoryLayout::Auto, 0);
        assert_eq!(page.county, None);
        assert_eq!(page.blocks.len(), 1);
        assert!(page.blocks[0].text.starts_with("Hospital of Orange County"));
        assert!(page.blocks[0].text.contains("Kim, Ann MD"));
    }

    #[test]
    fn county_banner_without_heading_marker() {
        let page = segment_page("LOS ANGELES COUNTY\nKim, Ann MD\nPCP# 1\n", DirectoryLayout::Auto, 0);
        assert_eq!(page.county.as_deref(), Some("Los Angeles County"));
        assert_eq!(page.blocks.len(), 1);
        assert!(page.blocks[0].text.starts_with("Kim, Ann MD"));
        assert_eq!(county_heading("Cook County Health"), None);
        assert_eq!(county_heading("#### Cook County").as_deref(), Some("Cook County"));
    }

    #[test]
    fn unrecognised_page_is_one_block() {
        let page = segment_page("Some listing\nwithout names\n(555) 555-5555", DirectoryLayout::Auto, 0);
        assert_eq!(page.blocks.len(), 1);
    }

    #[test]
    fn empty_and_noise_only_pages_have_no_blocks() {
        assert!(segment_page("", DirectoryLayout::Auto, 0).blocks.is_empty());
        assert!(segment_page("  \n\n", DirectoryLayout::Auto, 0).blocks.is_empty());
        assert!(segment_page("12\n---\n## Page 12\n", DirectoryLayout::Auto, 0).blocks.is_empty());
    }

    #[test]
    fn chunking_packs_blocks() {
        let page = segment_page(INDIVIDUAL_PAGE, DirectoryLayout::Individual, 1000);
        assert_eq!(page.blocks.len(), 1);
        assert!(page.blocks[0].text.contains("Abad, Maria L MD"));
        assert!(page.blocks[0].text.contains("Baker, Tom DO"));

        let page = segment_page(INDIVIDUAL_PAGE, DirectoryLayout::Individual, 5);
        assert_eq!(page.blocks.len(), 2, "oversized blocks stay separate");
    }

    #[test]
    fn line_classifiers() {
        assert!(is_provider_name("Jarava, Abelardo MD"));
        assert!(is_provider_name("Lee, Jo Ann PA-C"));
        assert!(!is_provider_name("Abelardo J Jarava MD SC"));
        assert!(is_organization_name("Abelardo J Jarava MD SC"));
        assert!(is_organization_name("Access Genesis Center for Health and Empowerment"));
        assert!(!is_organization_name("1234 W Madison St"));
        assert!(!is_organization_name("1200 Medical Center Dr"));
        assert!(is_organization_name("7 Hills HealthCare Center"));
        assert!(!is_organization_name("Oscar Ruiz"));
        assert!(is_noise_line("Page 3 of 40"));
        assert!(is_noise_line("--- PAGE BREAK ---"));
        assert!(!is_noise_line("PCP# 100234"));
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("LOS ANGELES"), "Los Angeles");
        assert_eq!(title_case("cook"), "Cook");
    }
}
