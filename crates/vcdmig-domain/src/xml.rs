use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::DomainError;

/// A parsed XML element.
///
/// vCloud payloads never mix text and child elements, so an element carries
/// either a text value or children (the parser accepts both and keeps them).
/// Names are kept qualified (`vmext:MoRef`); lookups compare local names so
/// callers never have to care which prefix a document chose.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name:       String,
    pub attributes: Vec<(String, String)>,
    pub children:   Vec<Element>,
    pub text:       Option<String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Element name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    /// Namespace prefix of this element, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(p, _)| p)
    }

    /// Build a child name carrying the same prefix as `self`.
    pub fn sibling_name(&self, local_name: &str) -> String {
        match self.prefix() {
            Some(p) => format!("{p}:{local_name}"),
            None => local_name.to_string(),
        }
    }

    // ── Attributes ────────────────────────────────────────────────────────────

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(idx).1)
    }

    // ── Text ──────────────────────────────────────────────────────────────────

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    pub fn child_text(&self, local_name: &str) -> Option<&str> {
        self.child(local_name).and_then(|c| c.text())
    }

    /// Set the text of the first child named `local_name`, appending a new
    /// child when none exists.
    pub fn set_child_text(&mut self, local_name: &str, text: impl Into<String>) {
        let text = text.into();
        if let Some(child) = self.child_mut(local_name) {
            child.set_text(text);
            return;
        }
        let name = self.sibling_name(local_name);
        self.children.push(Element::new(name).with_text(text));
    }

    /// `true` when the child's text is `"true"` (case-insensitive).
    pub fn child_flag(&self, local_name: &str) -> Option<bool> {
        self.child_text(local_name)
            .map(|t| t.trim().eq_ignore_ascii_case("true"))
    }

    // ── Children ──────────────────────────────────────────────────────────────

    pub fn child(&self, local_name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local_name)
    }

    pub fn child_mut(&mut self, local_name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.local_name() == local_name)
    }

    pub fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.local_name() == local_name)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> {
        self.children
            .iter_mut()
            .filter(move |c| c.local_name() == local_name)
    }

    /// Follow a path of local names from this element.
    pub fn find(&self, path: &[&str]) -> Option<&Element> {
        let mut cur = self;
        for seg in path {
            cur = cur.child(seg)?;
        }
        Some(cur)
    }

    pub fn find_mut(&mut self, path: &[&str]) -> Option<&mut Element> {
        let mut cur = self;
        for seg in path {
            cur = cur.child_mut(seg)?;
        }
        Some(cur)
    }

    /// Remove every direct child named `local_name`; returns how many went.
    pub fn remove_children(&mut self, local_name: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|c| c.local_name() != local_name);
        before - self.children.len()
    }

    pub fn retain_children(&mut self, f: impl FnMut(&Element) -> bool) {
        self.children.retain(f);
    }

    /// Insert `child` before the first existing child whose local name is in
    /// `before`, or append it. vCloud schemas are `xs:sequence`s, so element
    /// order matters on write.
    pub fn insert_before(&mut self, child: Element, before: &[&str]) {
        let idx = self
            .children
            .iter()
            .position(|c| before.contains(&c.local_name()))
            .unwrap_or(self.children.len());
        self.children.insert(idx, child);
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Element)) {
        f(self);
        for c in &self.children {
            c.walk(f);
        }
    }

    /// Pre-order traversal with mutable access.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        f(self);
        for c in &mut self.children {
            c.walk_mut(f);
        }
    }

    /// Every descendant (excluding `self`) named `local_name`, in document order.
    pub fn descendants_named<'a>(&'a self, local_name: &str) -> Vec<&'a Element> {
        let mut out = Vec::new();
        for c in &self.children {
            c.walk(&mut |e| {
                if e.local_name() == local_name {
                    out.push(e);
                }
            });
        }
        out
    }

    /// Remove every descendant named `local_name`, at any depth.
    pub fn prune(&mut self, local_name: &str) -> usize {
        let mut removed = self.remove_children(local_name);
        for c in &mut self.children {
            removed += c.prune(local_name);
        }
        removed
    }

    // ── Parsing / serialisation ───────────────────────────────────────────────

    pub fn parse(xml: &str) -> Result<Element, DomainError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => stack.push(Self::from_start(&e)?),
                Ok(Event::Empty(e)) => {
                    let el = Self::from_start(&e)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Ok(Event::End(_)) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| DomainError::Xml("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, el)?;
                }
                Ok(Event::Text(t)) => {
                    if let Some(top) = stack.last_mut() {
                        let s = t.unescape().map_err(|e| DomainError::Xml(e.to_string()))?;
                        top.text.get_or_insert_with(String::new).push_str(&s);
                    }
                }
                Ok(Event::CData(c)) => {
                    if let Some(top) = stack.last_mut() {
                        let s = String::from_utf8_lossy(&c.into_inner()).into_owned();
                        top.text.get_or_insert_with(String::new).push_str(&s);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(DomainError::Xml(format!(
                        "at byte {}: {}",
                        reader.error_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(DomainError::Xml("unexpected end of document".into()));
        }
        root.ok_or_else(|| DomainError::Xml("document has no root element".into()))
    }

    fn from_start(e: &BytesStart<'_>) -> Result<Element, DomainError> {
        let mut el = Element::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
        for attr in e.attributes() {
            let attr = attr.map_err(|err| DomainError::Xml(err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| DomainError::Xml(err.to_string()))?
                .into_owned();
            el.attributes.push((key, value));
        }
        Ok(el)
    }

    /// Serialise with an XML declaration and two-space indentation.
    pub fn to_xml(&self) -> Result<String, DomainError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| DomainError::Xml(e.to_string()))?;
        self.write_into(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| DomainError::Xml(e.to_string()))
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), DomainError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (k, v) in &self.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if self.children.is_empty() && self.text.is_none() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| DomainError::Xml(e.to_string()));
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| DomainError::Xml(e.to_string()))?;
        if let Some(t) = &self.text {
            writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(|e| DomainError::Xml(e.to_string()))?;
        }
        for c in &self.children {
            c.write_into(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(|e| DomainError::Xml(e.to_string()))
    }
}

fn local(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, l)) => l,
        None => name,
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    el: Element,
) -> Result<(), DomainError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
        return Ok(());
    }
    if root.is_some() {
        return Err(DomainError::Xml("document has more than one root element".into()));
    }
    *root = Some(el);
    Ok(())
}
