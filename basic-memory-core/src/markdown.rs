//! Markdown entity parsing
//!
//! Turns a file's bytes into a [`ParsedEntity`]. Parsing is resilient by
//! design: a file with no frontmatter, no `## Observations`, or no
//! `## Relations` section is still a valid entity with empty lists. A
//! line that doesn't match the observation/relation bullet pattern is
//! silently skipped rather than treated as an error, so one malformed
//! bullet never fails the whole file.

use crate::types::{Frontmatter, ParsedEntity, ParsedObservation, ParsedRelation};
use chrono::{DateTime, Utc};

/// Parse a file's raw bytes into a [`ParsedEntity`].
///
/// `file_path` is the repository-relative path (used to derive a
/// fallback title and, later, the permalink). Non-UTF8 or non-Markdown
/// files are treated as opaque: no frontmatter, no observations, no
/// relations, `content_type` from a MIME guess based on extension.
pub fn parse_entity(file_path: &str, bytes: &[u8]) -> ParsedEntity {
    if !file_path.ends_with(".md") {
        return ParsedEntity {
            file_path: file_path.to_string(),
            title: stem(file_path),
            entity_type: None,
            content_type: guess_mime(file_path),
            frontmatter: Frontmatter::default(),
            observations: Vec::new(),
            relations: Vec::new(),
        };
    }

    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => {
            return ParsedEntity {
                file_path: file_path.to_string(),
                title: stem(file_path),
                entity_type: None,
                content_type: "application/octet-stream".to_string(),
                frontmatter: Frontmatter::default(),
                observations: Vec::new(),
                relations: Vec::new(),
            }
        }
    };

    let (frontmatter, body) = split_frontmatter(text);
    let title = frontmatter
        .title
        .clone()
        .or_else(|| first_heading(body))
        .unwrap_or_else(|| stem(file_path));

    ParsedEntity {
        file_path: file_path.to_string(),
        title,
        entity_type: frontmatter.entity_type.clone(),
        content_type: "text/markdown".to_string(),
        observations: parse_observations(body),
        relations: parse_relations(body),
        frontmatter,
    }
}

fn stem(file_path: &str) -> String {
    let name = file_path.rsplit('/').next().unwrap_or(file_path);
    match name.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name.to_string(),
    }
}

fn guess_mime(file_path: &str) -> String {
    match file_path.rsplit_once('.') {
        Some((_, "pdf")) => "application/pdf",
        Some((_, "png")) => "image/png",
        Some((_, "jpg")) | Some((_, "jpeg")) => "image/jpeg",
        Some((_, "gif")) => "image/gif",
        Some((_, "txt")) => "text/plain",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Split a restricted YAML-subset frontmatter block (`---\n...\n---\n`)
/// from the body. If the file doesn't start with the delimiter, the
/// entire text is the body and the frontmatter is empty.
fn split_frontmatter(text: &str) -> (Frontmatter, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (Frontmatter::default(), text);
    };
    let Some(end) = rest.find("\n---\n") else {
        return (Frontmatter::default(), text);
    };
    let block = &rest[..end];
    let body = &rest[end + 5..];
    (parse_frontmatter_block(block), body)
}

fn parse_frontmatter_block(block: &str) -> Frontmatter {
    let mut fm = Frontmatter::default();
    let lines: Vec<&str> = block.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();
        if trimmed.is_empty() {
            i += 1;
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            i += 1;
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if value.is_empty() {
            // Nested list form:
            //   tags:
            //     - a
            //     - b
            let mut items = Vec::new();
            let mut j = i + 1;
            while j < lines.len() {
                let item_line = lines[j].trim();
                if let Some(item) = item_line.strip_prefix("- ") {
                    items.push(unquote(item.trim()));
                    j += 1;
                } else {
                    break;
                }
            }
            assign_frontmatter_key(&mut fm, key, FrontmatterValue::List(items));
            i = j;
            continue;
        }

        if value.starts_with('[') && value.ends_with(']') {
            let inner = &value[1..value.len() - 1];
            let items = inner
                .split(',')
                .map(|s| unquote(s.trim()))
                .filter(|s| !s.is_empty())
                .collect();
            assign_frontmatter_key(&mut fm, key, FrontmatterValue::List(items));
        } else {
            assign_frontmatter_key(&mut fm, key, FrontmatterValue::Scalar(unquote(value)));
        }
        i += 1;
    }
    fm
}

enum FrontmatterValue {
    Scalar(String),
    List(Vec<String>),
}

fn assign_frontmatter_key(fm: &mut Frontmatter, key: &str, value: FrontmatterValue) {
    match (key, value) {
        ("title", FrontmatterValue::Scalar(v)) => fm.title = Some(v),
        ("type", FrontmatterValue::Scalar(v)) => fm.entity_type = Some(v),
        ("permalink", FrontmatterValue::Scalar(v)) => fm.permalink = Some(v),
        ("created", FrontmatterValue::Scalar(v)) => fm.created = parse_timestamp(&v),
        ("modified", FrontmatterValue::Scalar(v)) => fm.modified = parse_timestamp(&v),
        ("tags", FrontmatterValue::List(v)) => fm.tags = v,
        ("tags", FrontmatterValue::Scalar(v)) => fm.tags = vec![v],
        (key, FrontmatterValue::Scalar(v)) => fm.extra.push((key.to_string(), v)),
        (key, FrontmatterValue::List(v)) => fm.extra.push((key.to_string(), v.join(", "))),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')) {
        if s.len() >= 2 {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

/// Rewrite (or insert) the `permalink:` key in a file's frontmatter,
/// leaving every other line byte-for-byte untouched. This is the only
/// mutation sync ever performs on a source file, and only happens when
/// the allocated permalink (after collision resolution) differs from
/// what's already on disk.
pub fn rewrite_permalink(text: &str, new_permalink: &str) -> String {
    let Some(rest) = text.strip_prefix("---\n") else {
        return format!("---\npermalink: {}\n---\n\n{}", new_permalink, text);
    };
    let Some(end) = rest.find("\n---\n") else {
        return format!("---\npermalink: {}\n---\n\n{}", new_permalink, text);
    };
    let block = &rest[..end];
    let body = &rest[end + 5..];

    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for line in block.lines() {
        let trimmed = line.trim();
        if let Some((key, _)) = trimmed.split_once(':') {
            if key.trim() == "permalink" {
                lines.push(format!("permalink: {}", new_permalink));
                replaced = true;
                continue;
            }
        }
        lines.push(line.to_string());
    }
    if !replaced {
        lines.push(format!("permalink: {}", new_permalink));
    }

    format!("---\n{}\n---\n{}", lines.join("\n"), body)
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .find_map(|l| l.trim().strip_prefix("# ").map(|t| t.trim().to_string()))
}

fn section_lines<'a>(body: &'a str, heading: &str) -> Vec<&'a str> {
    let mut in_section = false;
    let mut out = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed == heading {
            in_section = true;
            continue;
        }
        if in_section {
            if trimmed.starts_with("## ") {
                break;
            }
            out.push(line);
        }
    }
    out
}

/// `- [category] text`
fn parse_observations(body: &str) -> Vec<ParsedObservation> {
    section_lines(body, "## Observations")
        .into_iter()
        .filter_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed.strip_prefix("- ")?;
            let rest = rest.trim_start();
            let rest = rest.strip_prefix('[')?;
            let (category, after) = rest.split_once(']')?;
            let category = category.trim();
            if category.is_empty() {
                return None;
            }
            let content = after.trim();
            Some(ParsedObservation {
                category: category.to_string(),
                content: content.to_string(),
            })
        })
        .collect()
}

/// `- relation_type [[target]]` with optional `|alias` and `# comment`
fn parse_relations(body: &str) -> Vec<ParsedRelation> {
    section_lines(body, "## Relations")
        .into_iter()
        .filter_map(parse_relation_line)
        .collect()
}

fn parse_relation_line(line: &str) -> Option<ParsedRelation> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix("- ")?;
    let (before_brackets, after_open) = rest.split_once("[[")?;
    let relation_type = before_brackets.trim();
    if relation_type.is_empty() {
        return None;
    }
    let (inside, after_close) = after_open.split_once("]]")?;

    let target = match inside.split_once('|') {
        Some((actual, _alias)) => actual.trim(),
        None => inside.trim(),
    };
    if target.is_empty() {
        return None;
    }

    let context = after_close
        .trim()
        .strip_prefix('#')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Some(ParsedRelation {
        relation_type: relation_type.to_string(),
        target: target.to_string(),
        context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_file_no_frontmatter() {
        let parsed = parse_entity("notes/a.md", b"# Hello\nJust prose.");
        assert_eq!(parsed.title, "Hello");
        assert!(parsed.observations.is_empty());
        assert!(parsed.relations.is_empty());
    }

    #[test]
    fn test_parse_frontmatter_scalars_and_list() {
        let content = b"---\ntitle: My Note\ntype: knowledge\npermalink: custom/path\ntags: [a, b, c]\n---\n# My Note\n";
        let parsed = parse_entity("notes/a.md", content);
        assert_eq!(parsed.title, "My Note");
        assert_eq!(parsed.entity_type.as_deref(), Some("knowledge"));
        assert_eq!(parsed.frontmatter.permalink.as_deref(), Some("custom/path"));
        assert_eq!(parsed.frontmatter.tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_frontmatter_nested_list() {
        let content = b"---\ntags:\n  - a\n  - b\n---\n# Title\n";
        let parsed = parse_entity("notes/a.md", content);
        assert_eq!(parsed.frontmatter.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_observations() {
        let content = b"# T\n## Observations\n- [design] Uses sqlite\n- [a space category] Fine\n- plain text with no brackets\n";
        let parsed = parse_entity("a.md", content);
        assert_eq!(parsed.observations.len(), 2);
        assert_eq!(parsed.observations[0].category, "design");
        assert_eq!(parsed.observations[0].content, "Uses sqlite");
        assert_eq!(parsed.observations[1].category, "a space category");
        assert_eq!(parsed.observations[1].content, "Fine");
    }

    #[test]
    fn test_parse_relations_with_alias_and_comment() {
        let content =
            b"# T\n## Relations\n- depends_on [[target-doc|Target]] # needed for X\n- depends_on [[target-doc]]\n";
        let parsed = parse_entity("a.md", content);
        assert_eq!(parsed.relations.len(), 2);
        assert_eq!(parsed.relations[0].target, "target-doc");
        assert_eq!(parsed.relations[0].context.as_deref(), Some("needed for X"));
        assert_eq!(parsed.relations[1].context, None);
    }

    #[test]
    fn test_sections_stop_at_next_heading() {
        let content = b"# T\n## Observations\n- [a] one\n## Relations\n- rel [[x]]\n## Notes\n- [a] two\n";
        let parsed = parse_entity("a.md", content);
        assert_eq!(parsed.observations.len(), 1);
        assert_eq!(parsed.relations.len(), 1);
    }

    #[test]
    fn test_rewrite_permalink_replaces_existing_key() {
        let content = "---\ntitle: Two\npermalink: one\ntags: [a]\n---\n# Two\n";
        let rewritten = rewrite_permalink(content, "two");
        assert_eq!(
            rewritten,
            "---\ntitle: Two\npermalink: two\ntags: [a]\n---\n# Two\n"
        );
    }

    #[test]
    fn test_rewrite_permalink_inserts_when_absent() {
        let content = "---\ntitle: Two\n---\n# Two\n";
        let rewritten = rewrite_permalink(content, "two");
        assert_eq!(rewritten, "---\ntitle: Two\npermalink: two\n---\n# Two\n");
    }

    #[test]
    fn test_rewrite_permalink_adds_frontmatter_when_absent() {
        let content = "# Two\nJust prose.\n";
        let rewritten = rewrite_permalink(content, "two");
        assert_eq!(rewritten, "---\npermalink: two\n---\n\n# Two\nJust prose.\n");
    }

    #[test]
    fn test_non_markdown_file_is_opaque() {
        let parsed = parse_entity("docs/file.pdf", b"%PDF-1.4 ...");
        assert_eq!(parsed.content_type, "application/pdf");
        assert_eq!(parsed.title, "file");
        assert!(parsed.observations.is_empty());
    }
}
