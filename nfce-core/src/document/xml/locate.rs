//! Byte-offset element location over raw XML text.
//!
//! Used where the surrounding bytes must be preserved exactly, e.g. after
//! signing, so nothing here re-serializes the document.
use quick_xml::{Reader, events::Event};
use std::ops::Range;

/// Byte ranges of one element in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ElementSpan {
    /// Qualified name as written, prefix included.
    pub name: String,
    /// From `<` of the start tag to past `>` of the end tag.
    pub outer: Range<usize>,
    /// Content between the tags; empty for self-closing elements.
    pub inner: Range<usize>,
    pub self_closing: bool,
}

/// First element whose local name is `local` inside `within`.
pub(crate) fn first_element(
    xml: &str,
    local: &str,
    within: Range<usize>,
) -> Result<Option<ElementSpan>, quick_xml::Error> {
    Ok(scan(xml, local, within, true)?.into_iter().next())
}

/// Every top-most element whose local name is `local` inside `within`.
pub(crate) fn all_elements(
    xml: &str,
    local: &str,
    within: Range<usize>,
) -> Result<Vec<ElementSpan>, quick_xml::Error> {
    scan(xml, local, within, false)
}

fn scan(
    xml: &str,
    local: &str,
    within: Range<usize>,
    first_only: bool,
) -> Result<Vec<ElementSpan>, quick_xml::Error> {
    let base = within.start;
    let mut reader = Reader::from_str(&xml[within]);
    let mut spans = Vec::new();
    // (name, tag start, content start, nesting of same-named children)
    let mut open: Option<(String, usize, usize, usize)> = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(tag) if tag.local_name().as_ref() == local.as_bytes() => match open.as_mut() {
                Some((_, _, _, nested)) => *nested += 1,
                None => {
                    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                    open = Some((name, before, reader.buffer_position() as usize, 0));
                }
            },
            Event::End(tag) if tag.local_name().as_ref() == local.as_bytes() => match open.take() {
                Some((name, start, content, 0)) => {
                    let end = reader.buffer_position() as usize;
                    spans.push(ElementSpan {
                        name,
                        outer: base + start..base + end,
                        inner: base + content..base + before,
                        self_closing: false,
                    });
                    if first_only {
                        break;
                    }
                }
                Some((name, start, content, nested)) => {
                    open = Some((name, start, content, nested - 1));
                }
                None => {}
            },
            Event::Empty(tag) if open.is_none() && tag.local_name().as_ref() == local.as_bytes() => {
                let end = reader.buffer_position() as usize;
                spans.push(ElementSpan {
                    name: String::from_utf8_lossy(tag.name().as_ref()).into_owned(),
                    outer: base + before..base + end,
                    inner: base + end..base + end,
                    self_closing: true,
                });
                if first_only {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(spans)
}
