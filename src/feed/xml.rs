//! Namespace-resolved element tree for feed documents.
//!
//! Feeds are small enough to hold in memory, and the extraction rules look
//! at the same nodes through several fallback chains, so the document is
//! read once into a tree of [`Element`]s keyed by (namespace URI, local name).

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

/// Namespace URIs understood by the extractor.
pub mod ns {
    /// Elements without a namespace (RSS 0.9x / 2.0), and RSS 1.0 after folding.
    pub const NONE: &str = "";
    pub const ATOM: &str = "http://www.w3.org/2005/Atom";
    pub const ITUNES: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";
    pub const PODCAST: &str = "https://podcastindex.org/namespace/1.0";
    pub const MEDIA: &str = "http://search.yahoo.com/mrss/";
    pub const CONTENT: &str = "http://purl.org/rss/1.0/modules/content/";
    pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
}

/// Namespaces read as if they were another one.
const NAMESPACE_ALIASES: &[(&str, &str)] = &[
    ("http://purl.org/rss/1.0/", ns::NONE),
    ("http://my.netscape.com/rdf/simple/0.9/", ns::NONE),
    ("http://purl.org/atom/ns#", ns::ATOM),
    ("http://podcastindex.org/namespace/1.0", ns::PODCAST),
    ("https://github.com/Podcastindex-org/podcast-namespace/blob/main/docs/1.0.md", ns::PODCAST),
];

/// SEC-003: Maximum element nesting accepted from a feed.
const MAX_DEPTH: usize = 64;

// ============================================================================
// Issues
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        })
    }
}

/// One problem reported while reading the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlIssue {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for XmlIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.code, self.message)
    }
}

impl XmlIssue {
    fn new(severity: Severity, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Tree
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlAttribute {
    pub ns: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub ns: String,
    pub name: String,
    pub attrs: Vec<XmlAttribute>,
    /// Concatenated character data (text and CDATA) directly inside this element.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn is(&self, ns: &str, name: &str) -> bool {
        self.ns == ns && self.name == name
    }

    pub fn child(&self, ns: &str, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(ns, name))
    }

    pub fn children<'a>(
        &'a self,
        ns: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(ns, name))
    }

    /// Value of an unqualified attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.ns.is_empty() && a.name == name)
            .map(|a| a.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// Trimmed direct text, `None` when empty.
    pub fn text(&self) -> Option<&str> {
        Some(self.text.trim()).filter(|t| !t.is_empty())
    }

    /// Trimmed direct text of the first matching child.
    pub fn child_text(&self, ns: &str, name: &str) -> Option<&str> {
        self.children
            .iter()
            .filter(|c| c.is(ns, name))
            .find_map(Element::text)
    }

    /// Text content including descendants, for bodies such as Atom
    /// `type="xhtml"` content that arrive as element trees.
    pub fn deep_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(own) = self.text() {
            parts.push(own.to_string());
        }
        parts.extend(
            self.children
                .iter()
                .map(Element::deep_text)
                .filter(|inner| !inner.is_empty()),
        );
        parts.join(" ")
    }
}

/// A parsed document and any non-fatal issues found while reading it.
#[derive(Debug)]
pub struct Document {
    pub root: Element,
    pub warnings: Vec<XmlIssue>,
}

/// Reads `bytes` into an element tree.
///
/// Returns every issue collected when the document is not well-formed. An
/// issue list returned as `Err` always contains at least one `Error` or
/// `Fatal` entry.
pub fn parse_document(bytes: &[u8]) -> Result<Document, Vec<XmlIssue>> {
    // SEC-002: quick-xml never expands <!ENTITY> declarations; unknown
    // entities surface as unescape errors and are kept as raw text.
    let mut reader = NsReader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut issues: Vec<XmlIssue> = Vec::new();

    loop {
        let result = reader
            .read_resolved_event_into(&mut buf)
            .map(|(resolved, event)| (namespace_of(&resolved), event));
        let (namespace, event) = match result {
            Ok(resolved) => resolved,
            Err(e) => {
                issues.push(XmlIssue::new(
                    Severity::Fatal,
                    "malformed",
                    format!("{e} (at byte {})", reader.buffer_position()),
                ));
                return Err(issues);
            }
        };

        match event {
            Event::Start(start) => {
                if stack.len() >= MAX_DEPTH {
                    issues.push(XmlIssue::new(
                        Severity::Fatal,
                        "max_depth",
                        format!("Nesting exceeds {MAX_DEPTH} levels"),
                    ));
                    return Err(issues);
                }
                let element = open_element(&reader, &start, namespace, &mut issues);
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&reader, &start, namespace, &mut issues);
                close_element(element, &mut stack, &mut root);
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    close_element(element, &mut stack, &mut root);
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    match text.unescape() {
                        Ok(unescaped) => current.text.push_str(&unescaped),
                        Err(e) => {
                            issues.push(XmlIssue::new(
                                Severity::Warning,
                                "entity",
                                format!("{e} in <{}>", current.name),
                            ));
                            current.text.push_str(&String::from_utf8_lossy(&text));
                        }
                    }
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        issues.push(XmlIssue::new(
            Severity::Fatal,
            "premature_end",
            format!(
                "Premature end of data: {} element(s) left open, innermost <{}>",
                stack.len(),
                open.name
            ),
        ));
        return Err(issues);
    }

    match root {
        Some(root) => Ok(Document {
            root,
            warnings: issues,
        }),
        None => {
            issues.push(XmlIssue::new(
                Severity::Error,
                "no_root",
                "Document has no root element",
            ));
            Err(issues)
        }
    }
}

fn namespace_of(resolved: &ResolveResult<'_>) -> String {
    match resolved {
        ResolveResult::Bound(namespace) => {
            canonical_namespace(&String::from_utf8_lossy(namespace.as_ref()))
        }
        _ => String::new(),
    }
}

fn canonical_namespace(uri: &str) -> String {
    NAMESPACE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == uri)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| uri.to_string())
}

fn open_element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    namespace: String,
    issues: &mut Vec<XmlIssue>,
) -> Element {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();

    for attr_result in start.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                issues.push(XmlIssue::new(
                    Severity::Warning,
                    "attribute",
                    format!("{e} in <{name}>"),
                ));
                continue;
            }
        };
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }

        let (resolved, local) = reader.resolve_attribute(attr.key);
        let attr_ns = namespace_of(&resolved);
        let attr_name = String::from_utf8_lossy(local.as_ref()).into_owned();
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(value) => value.into_owned(),
            Err(e) => {
                issues.push(XmlIssue::new(
                    Severity::Warning,
                    "entity",
                    format!("{e} in <{name} {attr_name}>"),
                ));
                String::from_utf8_lossy(&attr.value).into_owned()
            }
        };
        attrs.push(XmlAttribute {
            ns: attr_ns,
            name: attr_name,
            value,
        });
    }

    Element {
        ns: namespace,
        name,
        attrs,
        text: String::new(),
        children: Vec::new(),
    }
}

fn close_element(element: Element, stack: &mut [Element], root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}
