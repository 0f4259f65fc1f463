use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use thiserror::Error;

use crate::storage::CandidateItem;

/// SEC-003: Maximum element nesting depth accepted in a feed document.
const MAX_XML_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
}

/// Fields collected for the `<item>` currently being read.
#[derive(Default)]
struct ItemBuilder {
    title: String,
    link: String,
    enclosure: String,
}

impl ItemBuilder {
    /// Emit up to two candidates: one for the enclosure, one for the permalink.
    fn finish(self, out: &mut Vec<CandidateItem>, seen: &mut HashSet<CandidateItem>) {
        for raw in [self.enclosure, self.link] {
            let Some(link) = normalize_http_link(&raw) else {
                continue;
            };
            let item = CandidateItem::new(self.title.clone(), link);
            if seen.insert(item.clone()) {
                out.push(item);
            }
        }
    }
}

/// Which text field of the current item we are inside of.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
}

/// Parse an RSS 2.0 document into deduplicated candidate items.
///
/// Every `<item>` under `<channel>` contributes a candidate for its
/// `<enclosure url="...">` and another for its `<link>`, each only when the
/// URL is http(s), in its normalized form. Both share the item's title. A missing title or link is an
/// empty string rather than an error; an item without any usable URL simply
/// contributes nothing. Duplicates (same title and link) are collapsed and
/// the remaining items keep document order.
///
/// # Errors
///
/// Returns [`ParseError`] when the document is not well-formed XML. Callers
/// treat that as an empty feed.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<CandidateItem>, ParseError> {
    // SEC-002: quick-xml never expands <!ENTITY> declarations, unknown
    // entities fail to unescape and degrade to an empty field below.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut buf = Vec::new();

    // Element names from the root down to the current element
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                let parent = path.last().map(Vec::as_slice);

                if name == b"item" && parent == Some(b"channel".as_slice()) {
                    current = Some(ItemBuilder::default());
                } else if let Some(item) = current.as_mut() {
                    if parent == Some(b"item".as_slice()) {
                        field = start_item_child(&e, &reader, item);
                    }
                }

                path.push(name);
                if path.len() > MAX_XML_DEPTH {
                    return Err(ParseError::MaxDepthExceeded(MAX_XML_DEPTH));
                }
            }
            Event::Empty(e) => {
                if let Some(item) = current.as_mut() {
                    if path.last().map(Vec::as_slice) == Some(b"item".as_slice()) {
                        start_item_child(&e, &reader, item);
                    }
                }
            }
            Event::Text(e) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = e.unescape().unwrap_or_default();
                    append_field(item, f, &text);
                }
            }
            Event::CData(e) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let raw = e.into_inner();
                    append_field(item, f, String::from_utf8_lossy(&raw).trim());
                }
            }
            Event::End(e) => {
                path.pop();
                field = None;
                let parent = path.last().map(Vec::as_slice);
                if e.name().as_ref() == b"item" && parent == Some(b"channel".as_slice()) {
                    if let Some(item) = current.take() {
                        item.finish(&mut items, &mut seen);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

/// Handle a direct child of `<item>`; returns the text field it opens, if any.
fn start_item_child(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    item: &mut ItemBuilder,
) -> Option<Field> {
    match e.name().as_ref() {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        b"enclosure" => {
            if item.enclosure.is_empty() {
                item.enclosure = enclosure_url(e, reader).unwrap_or_default();
            }
            None
        }
        _ => None,
    }
}

fn enclosure_url(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<String> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed enclosure attribute");
                continue;
            }
        };
        if attr.key.as_ref() == b"url" {
            return attr
                .decode_and_unescape_value(reader.decoder())
                .ok()
                .map(|v| v.trim().to_string());
        }
    }
    None
}

fn append_field(item: &mut ItemBuilder, field: Field, text: &str) {
    let target = match field {
        Field::Title => &mut item.title,
        Field::Link => &mut item.link,
    };
    target.push_str(text);
}

/// The serialized form of an http(s) link, or `None` for anything else.
///
/// URL parsing drops embedded tabs and line breaks, so the returned string is
/// always safe to store as one ledger line.
fn normalize_http_link(link: &str) -> Option<String> {
    let url = url::Url::parse(link).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url.into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Tracker</title><link>https://tracker.example/</link>{items}</channel></rss>"#
        )
    }

    #[test]
    fn test_enclosure_and_link_yield_two_candidates() {
        let xml = rss(r#"<item>
            <title>Ep 1</title>
            <link>http://a/y</link>
            <enclosure url="http://a/x.torrent" type="application/x-bittorrent" length="1"/>
        </item>"#);

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(
            items,
            vec![
                CandidateItem::new("Ep 1", "http://a/x.torrent"),
                CandidateItem::new("Ep 1", "http://a/y"),
            ]
        );
    }

    #[test]
    fn test_non_http_enclosure_ignored() {
        let xml = rss(r#"<item>
            <title>Ep 1</title>
            <link>http://a/y</link>
            <enclosure url="ftp://a/x.torrent"/>
        </item>"#);

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(items, vec![CandidateItem::new("Ep 1", "http://a/y")]);
    }

    #[test]
    fn test_identical_enclosure_and_link_collapse() {
        let xml = rss(r#"<item>
            <title>Ep 1</title>
            <link>https://a/x.torrent</link>
            <enclosure url="https://a/x.torrent"/>
        </item>"#);

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(items, vec![CandidateItem::new("Ep 1", "https://a/x.torrent")]);
    }

    #[test]
    fn test_duplicate_items_deduplicated() {
        let item = "<item><title>Same</title><link>http://a/1</link></item>";
        let xml = rss(&format!("{item}{item}"));

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(items, vec![CandidateItem::new("Same", "http://a/1")]);
    }

    #[test]
    fn test_same_link_different_titles_both_kept() {
        let xml = rss(
            "<item><title>A</title><link>http://a/1</link></item>\
             <item><title>B</title><link>http://a/1</link></item>",
        );

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_line_breaks_inside_links_removed() {
        let xml = rss(
            "<item><title>Broken</title>\
             <enclosure url=\"http://a/e&#10;p.torrent\"/>\
             <link>http://a/x\n.torrent</link></item>",
        );

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(
            items,
            vec![
                CandidateItem::new("Broken", "http://a/ep.torrent"),
                CandidateItem::new("Broken", "http://a/x.torrent"),
            ]
        );
        assert!(items.iter().all(|i| !i.link.contains(['\n', '\r'])));
    }

    #[test]
    fn test_single_item_document() {
        let xml = rss("<item><title>Only</title><link>http://a/only</link></item>");

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(items, vec![CandidateItem::new("Only", "http://a/only")]);
    }

    #[test]
    fn test_missing_title_is_empty_string() {
        let xml = rss("<item><link>http://a/1</link></item>");

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(items, vec![CandidateItem::new("", "http://a/1")]);
    }

    #[test]
    fn test_item_without_urls_contributes_nothing() {
        let xml = rss("<item><title>No links</title><link>not a url</link></item>");

        assert!(parse_feed(xml.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_channel_link_not_treated_as_item() {
        let xml = rss("");

        assert!(parse_feed(xml.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_cdata_and_entities_in_title() {
        let xml = rss(
            "<item><title><![CDATA[Show & Tell S01E01]]></title>\
             <link>http://a/1?x=1&amp;y=2</link></item>",
        );

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(
            items,
            vec![CandidateItem::new("Show & Tell S01E01", "http://a/1?x=1&y=2")]
        );
    }

    #[test]
    fn test_nested_title_elements_ignored() {
        let xml = rss(
            r#"<item>
                <title>Outer</title>
                <media:group><title>Inner</title></media:group>
                <link>http://a/1</link>
            </item>"#,
        );

        let items = parse_feed(xml.as_bytes()).unwrap();

        assert_eq!(items, vec![CandidateItem::new("Outer", "http://a/1")]);
    }

    #[test]
    fn test_malformed_document_is_error() {
        assert!(parse_feed(b"<rss><channel><item></channel>").is_err());
    }

    #[test]
    fn test_not_xml_yields_nothing_or_error() {
        let items = parse_feed(b"this is plain text").unwrap_or_default();
        assert!(items.is_empty());
    }

    #[test]
    fn test_deeply_nested_document_rejected() {
        let xml = format!("{}{}", "<a>".repeat(100), "</a>".repeat(100));
        assert!(matches!(
            parse_feed(xml.as_bytes()),
            Err(ParseError::MaxDepthExceeded(_))
        ));
    }
}
