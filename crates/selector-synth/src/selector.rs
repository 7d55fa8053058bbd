//! The CSS subset the synthesizer emits, with a renderer, a parser and a matcher.
//!
//! Supported: type selectors, `*`, `#id`, `.class`, `[attr]`, `[attr="value"]`,
//! `:nth-of-type(n)`, and the descendant and child combinators.

use std::fmt::{self, Write as _};
use std::iter;

use thiserror::Error;

use crate::dom::{DomView, NodeId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorParseError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected `{found}` at offset {offset}")]
    Unexpected { found: char, offset: usize },
    #[error("unexpected end of selector")]
    UnexpectedEnd,
    #[error("unsupported pseudo-class `:{0}`")]
    UnsupportedPseudo(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttrMatch {
    pub name: String,
    pub value: Option<String>,
}

impl AttrMatch {
    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// One compound selector such as `button.primary[name="go"]:nth-of-type(2)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrMatch>,
    pub nth_of_type: Option<usize>,
}

impl Compound {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push(AttrMatch::equals(name, value));
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_nth_of_type(mut self, index: usize) -> Self {
        self.nth_of_type = Some(index);
        self
    }

    pub fn matches<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> bool {
        if let Some(tag) = &self.tag {
            if dom.tag(node) != tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if dom.attr(node, "id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let present = dom.classes(node);
            if !self.classes.iter().all(|class| present.contains(&class.as_str())) {
                return false;
            }
        }
        let attrs_match = self.attrs.iter().all(|attr| match &attr.value {
            Some(expected) => dom.attr(node, &attr.name) == Some(expected.as_str()),
            None => dom.attr(node, &attr.name).is_some(),
        });
        if !attrs_match {
            return false;
        }
        match self.nth_of_type {
            Some(index) => nth_of_type(dom, node) == index,
            None => true,
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bare = self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.nth_of_type.is_none();
        match &self.tag {
            Some(tag) => f.write_str(&escape_ident(tag))?,
            None if bare => f.write_char('*')?,
            None => {}
        }
        if let Some(id) = &self.id {
            write!(f, "#{}", escape_ident(id))?;
        }
        for class in &self.classes {
            write!(f, ".{}", escape_ident(class))?;
        }
        for attr in &self.attrs {
            match &attr.value {
                Some(value) => write!(
                    f,
                    "[{}=\"{}\"]",
                    escape_ident(&attr.name),
                    escape_string(value)
                )?,
                None => write!(f, "[{}]", escape_ident(&attr.name))?,
            }
        }
        if let Some(index) = self.nth_of_type {
            write!(f, ":nth-of-type({index})")?;
        }
        Ok(())
    }
}

/// A chain of compounds read left to right, as written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    parts: Vec<(Combinator, Compound)>,
}

impl Selector {
    pub fn new(first: Compound) -> Self {
        Self {
            parts: vec![(Combinator::Descendant, first)],
        }
    }

    /// Build `a > b > c` from compounds ordered outermost first.
    pub fn child_chain(compounds: impl IntoIterator<Item = Compound>) -> Option<Self> {
        let mut compounds = compounds.into_iter();
        let mut selector = Self::new(compounds.next()?);
        for compound in compounds {
            selector = selector.child(compound);
        }
        Some(selector)
    }

    pub fn child(mut self, compound: Compound) -> Self {
        self.parts.push((Combinator::Child, compound));
        self
    }

    pub fn descendant(mut self, compound: Compound) -> Self {
        self.parts.push((Combinator::Descendant, compound));
        self
    }

    /// Prefix the chain with `outer` joined by `combinator`.
    pub fn within(self, outer: Compound, combinator: Combinator) -> Self {
        let mut parts = Vec::with_capacity(self.parts.len() + 1);
        parts.push((Combinator::Descendant, outer));
        let mut rest = self.parts.into_iter();
        if let Some((_, first)) = rest.next() {
            parts.push((combinator, first));
        }
        parts.extend(rest);
        Self { parts }
    }

    pub fn parts(&self) -> impl Iterator<Item = (Combinator, &Compound)> {
        self.parts.iter().map(|(combinator, compound)| (*combinator, compound))
    }

    pub fn parse(input: &str) -> Result<Self, SelectorParseError> {
        Parser::new(input).selector()
    }

    pub fn matches<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> bool {
        self.matches_from(dom, node, self.parts.len() - 1)
    }

    fn matches_from<D: DomView + ?Sized>(&self, dom: &D, node: NodeId, index: usize) -> bool {
        let (combinator, compound) = &self.parts[index];
        if !compound.matches(dom, node) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => dom
                .parent(node)
                .is_some_and(|parent| self.matches_from(dom, parent, index - 1)),
            Combinator::Descendant => iter::successors(dom.parent(node), |n| dom.parent(*n))
                .any(|ancestor| self.matches_from(dom, ancestor, index - 1)),
        }
    }

    /// Every matching element, in document order.
    pub fn query_all<D: DomView + ?Sized>(&self, dom: &D) -> Vec<NodeId> {
        dom.elements()
            .into_iter()
            .filter(|node| self.matches(dom, *node))
            .collect()
    }

    /// Whether this selector resolves to `node` and nothing else.
    pub fn selects_only<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> bool {
        let mut hits = dom.elements().into_iter().filter(|n| self.matches(dom, *n));
        hits.next() == Some(node) && hits.next().is_none()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (combinator, compound)) in self.parts.iter().enumerate() {
            if index > 0 {
                f.write_str(match combinator {
                    Combinator::Descendant => " ",
                    Combinator::Child => " > ",
                })?;
            }
            write!(f, "{compound}")?;
        }
        Ok(())
    }
}

/// 1-based position of `node` among its siblings with the same tag.
pub fn nth_of_type<D: DomView + ?Sized>(dom: &D, node: NodeId) -> usize {
    let Some(parent) = dom.parent(node) else {
        return 1;
    };
    let tag = dom.tag(node);
    dom.children(parent)
        .into_iter()
        .filter(|sibling| dom.tag(*sibling) == tag)
        .position(|sibling| sibling == node)
        .map_or(1, |position| position + 1)
}

/// Whether `node` shares its tag with any sibling.
pub fn has_same_type_siblings<D: DomView + ?Sized>(dom: &D, node: NodeId) -> bool {
    let Some(parent) = dom.parent(node) else {
        return false;
    };
    let tag = dom.tag(node);
    dom.children(parent)
        .into_iter()
        .filter(|sibling| dom.tag(*sibling) == tag)
        .nth(1)
        .is_some()
}

/// Escape an identifier the way `CSS.escape` does.
pub fn escape_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let chars: Vec<char> = ident.chars().collect();
    for (index, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if c == '\0' {
            out.push('\u{FFFD}');
        } else if (0x01..=0x1f).contains(&code)
            || code == 0x7f
            || (index == 0 && c.is_ascii_digit())
            || (index == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            let _ = write!(out, "\\{code:x} ");
        } else if index == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push('\u{FFFD}'),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\{:x} ", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn unexpected(&self) -> SelectorParseError {
        match self.peek() {
            Some(found) => SelectorParseError::Unexpected {
                found,
                offset: self.pos,
            },
            None => SelectorParseError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, want: char) -> Result<(), SelectorParseError> {
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn selector(&mut self) -> Result<Selector, SelectorParseError> {
        self.skip_ws();
        if self.peek().is_none() {
            return Err(SelectorParseError::Empty);
        }
        let mut selector = Selector::new(self.compound()?);
        loop {
            let spaced = self.skip_ws();
            match self.peek() {
                None => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    selector = selector.child(self.compound()?);
                }
                Some(_) if spaced => {
                    selector = selector.descendant(self.compound()?);
                }
                Some(_) => return Err(self.unexpected()),
            }
        }
        Ok(selector)
    }

    fn compound(&mut self) -> Result<Compound, SelectorParseError> {
        let mut compound = Compound::default();
        let mut consumed = false;
        match self.peek() {
            Some('*') => {
                self.pos += 1;
                consumed = true;
            }
            Some(c) if starts_ident(c) => {
                compound.tag = Some(self.ident()?.to_ascii_lowercase());
                consumed = true;
            }
            _ => {}
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.attribute()?);
                }
                Some(':') => {
                    self.pos += 1;
                    let name = self.ident()?;
                    if !name.eq_ignore_ascii_case("nth-of-type") {
                        return Err(SelectorParseError::UnsupportedPseudo(name));
                    }
                    self.expect('(')?;
                    self.skip_ws();
                    compound.nth_of_type = Some(self.number()?);
                    self.skip_ws();
                    self.expect(')')?;
                }
                _ => break,
            }
            consumed = true;
        }
        if consumed {
            Ok(compound)
        } else {
            Err(self.unexpected())
        }
    }

    fn attribute(&mut self) -> Result<AttrMatch, SelectorParseError> {
        self.skip_ws();
        let name = self.ident()?;
        self.skip_ws();
        let value = if self.peek() == Some('=') {
            self.pos += 1;
            self.skip_ws();
            let value = match self.peek() {
                Some('"') | Some('\'') => self.string()?,
                _ => self.ident()?,
            };
            self.skip_ws();
            Some(value)
        } else {
            None
        };
        self.expect(']')?;
        Ok(AttrMatch { name, value })
    }

    fn number(&mut self) -> Result<usize, SelectorParseError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits.parse().map_err(|_| self.unexpected())
    }

    fn ident(&mut self) -> Result<String, SelectorParseError> {
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('\\') => {
                    self.pos += 1;
                    out.push(self.escape()?);
                }
                Some(c) if is_ident_char(c) => {
                    self.pos += 1;
                    out.push(c);
                }
                _ => break,
            }
        }
        if out.is_empty() {
            Err(self.unexpected())
        } else {
            Ok(out)
        }
    }

    fn string(&mut self) -> Result<String, SelectorParseError> {
        let quote = self.bump().ok_or(SelectorParseError::UnexpectedEnd)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(SelectorParseError::UnexpectedEnd),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    if self.peek() == Some('\n') {
                        self.pos += 1;
                    } else {
                        out.push(self.escape()?);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    // Called after the backslash.
    fn escape(&mut self) -> Result<char, SelectorParseError> {
        let start = self.pos;
        while self.pos - start < 6 && self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return self.bump().ok_or(SelectorParseError::UnexpectedEnd);
        }
        let hex: String = self.chars[start..self.pos].iter().collect();
        if self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        let decoded = u32::from_str_radix(&hex, 16)
            .ok()
            .filter(|code| *code != 0)
            .and_then(char::from_u32)
            .unwrap_or('\u{FFFD}');
        Ok(decoded)
    }
}

fn starts_ident(c: char) -> bool {
    c == '\\' || c == '-' || c == '_' || c.is_ascii_alphabetic() || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c == '-' || c == '_' || c.is_ascii_alphanumeric() || !c.is_ascii()
}
