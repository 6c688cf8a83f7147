//! Live document model.
//!
//! A [`Document`] is an arena of nodes addressed by [`NodeId`]. Unlike a
//! parsed-once tree, it supports the operations an export needs on a live
//! page: deep cloning, attaching and detaching subtrees, replacing a child
//! in place, image load signalling and `<canvas>` pixel buffers.
//!
//! Renderers never see the arena. [`Document::snapshot`] produces an owned
//! [`DomNode`] tree that can be moved across tasks.

use std::collections::BTreeMap;

use tokio::sync::watch;

use crate::css::{self, Length};
use crate::error::DomError;
use crate::selector::Selector;
use crate::surface::{parse_hex_rgba, Surface, DEFAULT_SURFACE_HEIGHT, DEFAULT_SURFACE_WIDTH};

/// Width used for the initial containing block.
pub const DEFAULT_VIEWPORT_WIDTH: f32 = 1024.0;

// ---------------------------------------------------------------------------
// Identifiers and tags
// ---------------------------------------------------------------------------

/// Handle to a node inside one [`Document`]. Slots are reused after
/// [`Document::destroy`]; the generation keeps a stale handle from reaching
/// whatever node takes the slot next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.index
    }
}

/// The tag name of an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Html,
    Head,
    Body,
    Div,
    P,
    H1,
    H2,
    H3,
    Ul,
    Ol,
    Li,
    Table,
    Tr,
    Td,
    Th,
    Span,
    Img,
    Canvas,
    /// Any other tag, lower-cased.
    Other(String),
}

impl Tag {
    pub fn from_name(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "html" => Tag::Html,
            "head" => Tag::Head,
            "body" => Tag::Body,
            "div" => Tag::Div,
            "p" => Tag::P,
            "h1" => Tag::H1,
            "h2" => Tag::H2,
            "h3" => Tag::H3,
            "ul" => Tag::Ul,
            "ol" => Tag::Ol,
            "li" => Tag::Li,
            "table" => Tag::Table,
            "tr" => Tag::Tr,
            "td" => Tag::Td,
            "th" => Tag::Th,
            "span" => Tag::Span,
            "img" => Tag::Img,
            "canvas" => Tag::Canvas,
            other => Tag::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Tag::Html => "html",
            Tag::Head => "head",
            Tag::Body => "body",
            Tag::Div => "div",
            Tag::P => "p",
            Tag::H1 => "h1",
            Tag::H2 => "h2",
            Tag::H3 => "h3",
            Tag::Ul => "ul",
            Tag::Ol => "ol",
            Tag::Li => "li",
            Tag::Table => "table",
            Tag::Tr => "tr",
            Tag::Td => "td",
            Tag::Th => "th",
            Tag::Span => "span",
            Tag::Img => "img",
            Tag::Canvas => "canvas",
            Tag::Other(name) => name,
        }
    }

    /// Elements that never have children or a closing tag.
    pub fn is_void(&self) -> bool {
        match self {
            Tag::Img => true,
            Tag::Other(name) => matches!(
                name.as_str(),
                "br" | "hr" | "meta" | "link" | "input" | "source" | "wbr" | "col"
            ),
            _ => false,
        }
    }

    /// Elements whose content is raw text we do not keep.
    fn is_raw_text(&self) -> bool {
        matches!(self, Tag::Other(name) if name == "script" || name == "style")
    }
}

// ---------------------------------------------------------------------------
// Image signalling
// ---------------------------------------------------------------------------

/// Load state of an `<img>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    /// No fetch has been started.
    Unrequested,
    Loading,
    Loaded {
        natural_width: u32,
        natural_height: u32,
    },
    Broken,
}

impl ImageState {
    /// Mirrors `HTMLImageElement.complete`: true once a terminal state is
    /// reached, whether the image decoded or not.
    pub fn is_complete(&self) -> bool {
        matches!(self, ImageState::Loaded { .. } | ImageState::Broken)
    }

    pub fn natural_width(&self) -> u32 {
        match self {
            ImageState::Loaded { natural_width, .. } => *natural_width,
            _ => 0,
        }
    }

    pub fn natural_height(&self) -> u32 {
        match self {
            ImageState::Loaded { natural_height, .. } => *natural_height,
            _ => 0,
        }
    }
}

/// A load or error event delivered to an `<img>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageEvent {
    Load {
        natural_width: u32,
        natural_height: u32,
        /// Data URL of the fetched bytes when `src` was not one already.
        resolved_src: Option<String>,
    },
    Error,
}

/// Per-`<img>` state cell. Subscribers are woken on every transition.
#[derive(Debug)]
pub struct ImageSlot {
    state: watch::Sender<ImageState>,
    resolved_src: Option<String>,
}

impl ImageSlot {
    fn new(initial: ImageState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            resolved_src: None,
        }
    }

    pub fn state(&self) -> ImageState {
        self.state.borrow().clone()
    }

    /// A receiver that has already seen the current state, so
    /// `changed()` only fires for transitions after this call.
    pub fn subscribe(&self) -> watch::Receiver<ImageState> {
        self.state.subscribe()
    }

    fn set(&self, next: ImageState) {
        self.state.send_replace(next);
    }

    /// A clone inherits a finished decode (as a browser's image cache
    /// would provide); anything else starts over.
    fn clone_for_copy(&self) -> Self {
        let state = self.state();
        match state {
            ImageState::Loaded { .. } => {
                let mut slot = Self::new(state);
                slot.resolved_src = self.resolved_src.clone();
                slot
            }
            _ => Self::new(ImageState::Unrequested),
        }
    }
}

// ---------------------------------------------------------------------------
// Node storage
// ---------------------------------------------------------------------------

/// An element: tag, attributes and the element-specific state it owns.
#[derive(Debug)]
pub struct Element {
    pub tag: Tag,
    attributes: BTreeMap<String, String>,
    image: Option<ImageSlot>,
    surface: Option<Surface>,
}

impl Element {
    fn new(tag: Tag) -> Self {
        let image = (tag == Tag::Img).then(|| ImageSlot::new(ImageState::Unrequested));
        let surface = (tag == Tag::Canvas)
            .then(|| Surface::new(DEFAULT_SURFACE_WIDTH, DEFAULT_SURFACE_HEIGHT));
        Self {
            tag,
            attributes: BTreeMap::new(),
            image,
            surface,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attribute("class").unwrap_or("").split_whitespace()
    }

    pub fn style_text(&self) -> &str {
        self.attribute("style").unwrap_or("")
    }

    pub fn image(&self) -> Option<&ImageSlot> {
        self.image.as_ref()
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    fn deep_copy(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            attributes: self.attributes.clone(),
            image: self.image.as_ref().map(ImageSlot::clone_for_copy),
            surface: self.surface.clone(),
        }
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Element(Element),
    Text(String),
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// An arena-backed document with an `<html>` root and a `<body>`.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Slot>,
    free: Vec<usize>,
    root: NodeId,
    body: NodeId,
    viewport_width: f32,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty `<html><head></head><body></body></html>` document.
    pub fn new() -> Self {
        let placeholder = NodeId {
            index: 0,
            generation: 0,
        };
        let mut doc = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: placeholder,
            body: placeholder,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
        };
        let root = doc.create_element(Tag::Html);
        let head = doc.create_element(Tag::Head);
        let body = doc.create_element(Tag::Body);
        doc.root = root;
        doc.body = body;
        doc.link(root, head);
        doc.link(root, body);
        doc
    }

    /// Parse HTML into a fresh document. `<html>`/`<body>` are synthesised
    /// when absent; content outside `<body>` (other than `<head>`) lands in
    /// the body.
    pub fn parse(html: &str) -> Self {
        let mut doc = Self::new();
        let holder = doc.create_element(Tag::Div);
        Parser::new(html).parse_nodes(&mut doc, holder);

        let source = doc
            .descendants(holder)
            .into_iter()
            .find(|&id| doc.tag(id) == Some(&Tag::Body));
        match source {
            Some(body_src) => {
                let attrs = doc
                    .element(body_src)
                    .map(|e| e.attributes.clone())
                    .unwrap_or_default();
                if let Some(body) = doc.element_mut(doc.body) {
                    body.attributes = attrs;
                }
                doc.move_children(body_src, doc.body);
            }
            None => {
                let top: Vec<NodeId> = doc.children(holder).to_vec();
                for id in top {
                    if doc.tag(id) == Some(&Tag::Html) {
                        for inner in doc.children(id).to_vec() {
                            if doc.tag(inner) != Some(&Tag::Head) {
                                doc.unlink(inner);
                                doc.link(doc.body, inner);
                            }
                        }
                    } else if doc.tag(id) != Some(&Tag::Head) {
                        doc.unlink(id);
                        doc.link(doc.body, id);
                    }
                }
            }
        }
        doc.destroy(holder);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn viewport_width(&self) -> f32 {
        self.viewport_width
    }

    pub fn set_viewport_width(&mut self, width: f32) {
        self.viewport_width = width;
    }

    /// Number of live nodes (attached or detached).
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .get(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id)? {
            NodeKind::Element(e) => Some(e),
            NodeKind::Text(_) => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(e) => Some(e),
            NodeKind::Text(_) => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&Tag> {
        self.element(id).map(|e| &e.tag)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Whether `id` is connected to the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == self.root {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    /// All nodes below `id` in document (pre-)order, excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev().copied());
        }
        out
    }

    /// Element descendants of `id` whose tag is `tag`.
    pub fn elements_by_tag(&self, id: NodeId, tag: &Tag) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.tag(n) == Some(tag))
            .collect()
    }

    // -- construction -------------------------------------------------------

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            parent: None,
            children: Vec::new(),
            kind,
        };
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.nodes.push(Slot::default());
                self.nodes.len() - 1
            }
        };
        let slot = &mut self.nodes[index];
        slot.node = Some(node);
        NodeId {
            index,
            generation: slot.generation,
        }
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: Tag) -> NodeId {
        self.alloc(NodeKind::Element(Element::new(tag)))
    }

    /// Create a detached `<canvas>` with a surface of the given size.
    pub fn create_canvas(&mut self, width: u32, height: u32) -> NodeId {
        let id = self.create_element(Tag::Canvas);
        if let Some(el) = self.element_mut(id) {
            el.attributes.insert("width".into(), width.to_string());
            el.attributes.insert("height".into(), height.to_string());
            el.surface = Some(Surface::new(width, height));
        }
        id
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Text(text.into()))
    }

    // -- tree mutation ------------------------------------------------------

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(c) = self.node_mut(child) {
            c.parent = Some(parent);
        }
        if let Some(p) = self.node_mut(parent) {
            p.children.push(child);
        }
    }

    fn unlink(&mut self, child: NodeId) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|&c| c != child);
        }
        if let Some(c) = self.node_mut(child) {
            c.parent = None;
        }
    }

    fn move_children(&mut self, from: NodeId, to: NodeId) {
        for child in self.children(from).to_vec() {
            self.unlink(child);
            self.link(to, child);
        }
    }

    fn check_element(&self, id: NodeId) -> Result<(), DomError> {
        match self.kind(id) {
            None => Err(DomError::UnknownNode(id)),
            Some(NodeKind::Text(_)) => Err(DomError::NotAnElement(id)),
            Some(NodeKind::Element(_)) => Ok(()),
        }
    }

    /// Whether `ancestor` is `id` or one of its ancestors.
    fn is_inclusive_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == ancestor {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    /// Append a detached node as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.check_element(parent)?;
        if !self.contains(child) {
            return Err(DomError::UnknownNode(child));
        }
        if self.parent(child).is_some() || child == self.root {
            return Err(DomError::AlreadyAttached(child));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::Cycle { parent, child });
        }
        self.link(parent, child);
        Ok(())
    }

    /// Detach `child` from `parent`. The subtree stays alive.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if !self.contains(parent) {
            return Err(DomError::UnknownNode(parent));
        }
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.unlink(child);
        Ok(())
    }

    /// Put detached `new` at `old`'s exact index under `parent` and detach
    /// `old`.
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        new: NodeId,
        old: NodeId,
    ) -> Result<(), DomError> {
        if !self.contains(new) {
            return Err(DomError::UnknownNode(new));
        }
        if self.parent(new).is_some() {
            return Err(DomError::AlreadyAttached(new));
        }
        if self.is_inclusive_ancestor(new, parent) {
            return Err(DomError::Cycle { parent, child: new });
        }
        let index = self
            .children(parent)
            .iter()
            .position(|&c| c == old)
            .ok_or(DomError::NotAChild { parent, child: old })?;
        if let Some(p) = self.node_mut(parent) {
            p.children[index] = new;
        }
        if let Some(n) = self.node_mut(new) {
            n.parent = Some(parent);
        }
        if let Some(o) = self.node_mut(old) {
            o.parent = None;
        }
        Ok(())
    }

    /// Detach (if needed) and free `id` and its whole subtree. Image
    /// subscribers of freed nodes observe their channel closing, and the
    /// freed slots are reused by later allocations.
    pub fn destroy(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        self.unlink(id);
        let mut doomed = self.descendants(id);
        doomed.push(id);
        for n in doomed {
            if let Some(slot) = self.nodes.get_mut(n.index) {
                if slot.generation == n.generation && slot.node.take().is_some() {
                    slot.generation = slot.generation.wrapping_add(1);
                    self.free.push(n.index);
                }
            }
        }
    }

    /// Detached deep copy of `id`, including canvas pixels. Loaded images
    /// keep their decoded state; other images start over.
    pub fn deep_clone(&mut self, id: NodeId) -> Result<NodeId, DomError> {
        let kind = match self.kind(id).ok_or(DomError::UnknownNode(id))? {
            NodeKind::Element(e) => NodeKind::Element(e.deep_copy()),
            NodeKind::Text(t) => NodeKind::Text(t.clone()),
        };
        let copy = self.alloc(kind);
        for child in self.children(id).to_vec() {
            let c = self.deep_clone(child)?;
            self.link(copy, c);
        }
        Ok(copy)
    }

    // -- attributes and style ------------------------------------------------

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attribute(name)
    }

    /// Set an attribute. Setting `width`/`height` on a `<canvas>` resets
    /// its surface to the new size.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.check_element(id)?;
        let Some(el) = self.element_mut(id) else {
            return Err(DomError::NotAnElement(id));
        };
        let name = name.to_ascii_lowercase();
        el.attributes.insert(name.clone(), value.to_string());
        if el.tag == Tag::Canvas && (name == "width" || name == "height") {
            let (w, h) = canvas_size(&el.attributes);
            el.surface = Some(Surface::new(w, h));
        }
        Ok(())
    }

    pub fn style_text(&self, id: NodeId) -> &str {
        self.element(id).map(Element::style_text).unwrap_or("")
    }

    pub fn set_style_property(
        &mut self,
        id: NodeId,
        property: &str,
        value: &str,
    ) -> Result<(), DomError> {
        let next = css::set_declaration(self.style_text(id), property, value);
        self.set_attribute(id, "style", &next)
    }

    pub fn style_property(&self, id: NodeId, property: &str) -> Option<String> {
        css::get_declaration(self.style_text(id), property)
    }

    /// The element's rendered width in px: explicit inline `width`, then
    /// the `width` attribute, otherwise the containing block's width.
    /// `display: none` elements measure zero.
    pub fn offset_width(&self, id: NodeId) -> f32 {
        if self.element(id).is_none() {
            return 0.0;
        }
        if self.style_property(id, "display").as_deref() == Some("none") {
            return 0.0;
        }
        let container = match self.parent(id) {
            Some(p) if self.element(p).is_some() && p != self.root => self.offset_width(p),
            _ => self.viewport_width,
        };
        let declared = self
            .style_property(id, "width")
            .or_else(|| self.attribute(id, "width").map(str::to_string))
            .and_then(|w| css::parse_length(&w, 16.0))
            .unwrap_or(Length::Auto);
        declared.resolve(container).unwrap_or(container)
    }

    // -- queries --------------------------------------------------------------

    /// First element matching `selector` in document order.
    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>, DomError> {
        let sel = Selector::parse(selector)?;
        Ok(self.descendants(self.root).into_iter().find(|&n| sel.matches(self, n)))
    }

    /// Elements below `scope` matching `selector`, in document order.
    pub fn query_selector_all(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> Result<Vec<NodeId>, DomError> {
        let sel = Selector::parse(selector)?;
        Ok(self
            .descendants(scope)
            .into_iter()
            .filter(|&n| sel.matches(self, n))
            .collect())
    }

    // -- images ---------------------------------------------------------------

    pub fn image_state(&self, id: NodeId) -> Option<ImageState> {
        self.element(id)?.image().map(ImageSlot::state)
    }

    /// Move an `<img>` into `Loading`. Returns false when it is not an
    /// unrequested image.
    pub fn begin_image_load(&mut self, id: NodeId) -> bool {
        match self.element(id).and_then(Element::image) {
            Some(slot) if slot.state() == ImageState::Unrequested => {
                slot.set(ImageState::Loading);
                true
            }
            _ => false,
        }
    }

    /// Deliver a load or error event to an `<img>`. Unknown nodes (e.g. a
    /// clone already torn down) are ignored.
    pub fn dispatch_image_event(&mut self, id: NodeId, event: ImageEvent) {
        let Some(slot) = self.element_mut(id).and_then(|e| e.image.as_mut()) else {
            return;
        };
        match event {
            ImageEvent::Load {
                natural_width,
                natural_height,
                resolved_src,
            } => {
                slot.resolved_src = resolved_src;
                slot.set(ImageState::Loaded {
                    natural_width,
                    natural_height,
                });
            }
            ImageEvent::Error => slot.set(ImageState::Broken),
        }
    }

    // -- surfaces -------------------------------------------------------------

    pub fn surface(&self, id: NodeId) -> Option<&Surface> {
        self.element(id)?.surface()
    }

    pub fn surface_mut(&mut self, id: NodeId) -> Option<&mut Surface> {
        self.element_mut(id)?.surface.as_mut()
    }

    // -- snapshot -------------------------------------------------------------

    /// Owned copy of the subtree for renderers. Images fetched from a
    /// non-data URL carry the fetched bytes as their `src`.
    pub fn snapshot(&self, id: NodeId) -> Option<DomNode> {
        match self.kind(id)? {
            NodeKind::Text(t) => Some(DomNode::Text(t.clone())),
            NodeKind::Element(e) => {
                let mut attributes = e.attributes.clone();
                if let Some(src) = e.image().and_then(|s| s.resolved_src.clone()) {
                    attributes.insert("src".into(), src);
                }
                let children = self
                    .children(id)
                    .iter()
                    .filter_map(|&c| self.snapshot(c))
                    .collect();
                Some(DomNode::Element(ElementNode {
                    tag: e.tag.clone(),
                    attributes,
                    children,
                }))
            }
        }
    }
}

fn canvas_size(attrs: &BTreeMap<String, String>) -> (u32, u32) {
    let dim = |name: &str, default: u32| {
        attrs
            .get(name)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(default)
    };
    (
        dim("width", DEFAULT_SURFACE_WIDTH),
        dim("height", DEFAULT_SURFACE_HEIGHT),
    )
}

// ---------------------------------------------------------------------------
// Owned snapshot tree
// ---------------------------------------------------------------------------

/// A node in an owned, detached copy of a subtree.
#[derive(Debug, Clone, PartialEq)]
pub enum DomNode {
    Element(ElementNode),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub tag: Tag,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<DomNode>,
}

impl ElementNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    pub fn inline_style(&self) -> &str {
        self.attribute("style").unwrap_or("")
    }

    pub fn src(&self) -> Option<&str> {
        self.attribute("src")
    }
}

impl DomNode {
    /// Count elements with `tag` in this subtree, including the root.
    pub fn count_tag(&self, tag: &Tag) -> usize {
        match self {
            DomNode::Text(_) => 0,
            DomNode::Element(e) => {
                usize::from(e.tag == *tag)
                    + e.children.iter().map(|c| c.count_tag(tag)).sum::<usize>()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Tolerant recursive-descent HTML reader writing straight into the arena.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_nodes(&mut self, doc: &mut Document, parent: NodeId) {
        loop {
            self.skip_blank_run();
            if self.eof() || self.starts_with("</") {
                break;
            }
            if self.starts_with("<!--") {
                self.skip_past("-->");
            } else if self.starts_with("<!") || self.starts_with("<?") {
                self.skip_past(">");
            } else if self.starts_with("<") {
                self.parse_element(doc, parent);
            } else {
                let start = self.pos;
                self.pos = self.input[start..]
                    .find('<')
                    .map(|i| start + i)
                    .unwrap_or(self.input.len());
                let text = decode_entities(&self.input[start..self.pos]);
                let node = doc.create_text(text);
                doc.link(parent, node);
            }
        }
    }

    fn parse_element(&mut self, doc: &mut Document, parent: NodeId) {
        self.pos += 1; // '<'
        let name = self.read_name();
        if name.is_empty() {
            // A stray '<' is text.
            let node = doc.create_text("<");
            doc.link(parent, node);
            return;
        }
        let tag = Tag::from_name(&name);
        let mut attributes = BTreeMap::new();
        loop {
            self.skip_whitespace();
            if self.eof() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            let key = self.read_name().to_ascii_lowercase();
            if key.is_empty() {
                // Unparseable attribute character.
                self.pos += self.input[self.pos..].chars().next().map_or(1, char::len_utf8);
                continue;
            }
            self.skip_whitespace();
            let value = if self.starts_with("=") {
                self.pos += 1;
                self.skip_whitespace();
                self.read_attr_value()
            } else {
                String::new()
            };
            attributes.insert(key, value);
        }
        let self_closed = self.starts_with("/>");
        if self_closed {
            self.pos += 2;
        } else if self.starts_with(">") {
            self.pos += 1;
        }

        let id = doc.create_element(tag.clone());
        if tag == Tag::Canvas {
            let (w, h) = canvas_size(&attributes);
            let mut surface = Surface::new(w, h);
            if let Some(rgba) = attributes.get("data-fill").and_then(|c| parse_hex_rgba(c)) {
                surface.fill_rect(0, 0, w, h, rgba);
            }
            if let Some(el) = doc.element_mut(id) {
                el.surface = Some(surface);
            }
        }
        if let Some(el) = doc.element_mut(id) {
            el.attributes = attributes;
        }
        doc.link(parent, id);

        if self_closed || tag.is_void() {
            return;
        }
        if tag.is_raw_text() {
            let close = format!("</{}", tag.name());
            let rest = self.input[self.pos..].to_ascii_lowercase();
            self.pos = rest
                .find(&close)
                .map(|i| self.pos + i)
                .unwrap_or(self.input.len());
        } else {
            self.parse_nodes(doc, id);
        }

        if self.starts_with("</") {
            self.pos += 2;
            self.read_name();
            self.skip_past(">");
        }
    }

    fn read_name(&mut self) -> String {
        let start = self.pos;
        let len = self.input[start..]
            .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_' || c == ':'))
            .unwrap_or(self.input.len() - start);
        self.pos += len;
        self.input[start..self.pos].to_string()
    }

    fn read_attr_value(&mut self) -> String {
        for quote in ['"', '\''] {
            if self.input[self.pos..].starts_with(quote) {
                self.pos += 1;
                let start = self.pos;
                let end = self.input[start..]
                    .find(quote)
                    .map(|i| start + i)
                    .unwrap_or(self.input.len());
                self.pos = (end + 1).min(self.input.len());
                return decode_entities(&self.input[start..end]);
            }
        }
        let start = self.pos;
        let len = self.input[start..]
            .find(|c: char| c.is_whitespace() || c == '>')
            .unwrap_or(self.input.len() - start);
        self.pos += len;
        decode_entities(&self.input[start..self.pos])
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Whitespace-only runs between tags are dropped; whitespace leading
    /// into text is kept.
    fn skip_blank_run(&mut self) {
        let rest = &self.input[self.pos..];
        let trimmed = rest.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('<') {
            self.pos += rest.len() - trimmed.len();
        }
    }

    fn skip_past(&mut self, pat: &str) {
        self.pos = self.input[self.pos..]
            .find(pat)
            .map(|i| self.pos + i + pat.len())
            .unwrap_or(self.input.len());
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{00A0}")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_wraps_fragment_in_body() {
        let doc = Document::parse(r#"<div id="a"><p>Hi</p></div><img src="x.png">"#);
        let body = doc.body();
        assert_eq!(doc.children(body).len(), 2);
        let div = doc.children(body)[0];
        assert_eq!(doc.tag(div), Some(&Tag::Div));
        assert_eq!(doc.attribute(div, "id"), Some("a"));
        assert_eq!(doc.tag(doc.children(body)[1]), Some(&Tag::Img));
        assert!(doc.is_attached(div));
    }

    #[test]
    fn parse_full_document_uses_existing_body() {
        let doc = Document::parse(
            "<!DOCTYPE html><html><head><title>t</title><style>p{}</style></head>\
             <body class=\"main\"><!-- c --><p>One &amp; two</p></body></html>",
        );
        let body = doc.body();
        assert_eq!(doc.attribute(body, "class"), Some("main"));
        let kids = doc.children(body);
        assert_eq!(kids.len(), 1);
        let text = doc.children(kids[0])[0];
        match doc.kind(text) {
            Some(NodeKind::Text(t)) => assert_eq!(t, "One & two"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn canvas_gets_sized_and_filled_surface() {
        let doc = Document::parse(r##"<canvas width="4" height="3" data-fill="#00ff00"></canvas>"##);
        let canvas = doc.children(doc.body())[0];
        let surface = doc.surface(canvas).unwrap();
        assert_eq!((surface.width(), surface.height()), (4, 3));
        assert_eq!(surface.pixels().get_pixel(3, 2).0, [0, 255, 0, 255]);
    }

    #[test]
    fn replace_child_keeps_index() {
        let mut doc = Document::parse("<div><p>a</p><canvas></canvas><p>b</p></div>");
        let div = doc.children(doc.body())[0];
        let canvas = doc.children(div)[1];
        let img = doc.create_element(Tag::Img);
        doc.replace_child(div, img, canvas).unwrap();
        assert_eq!(doc.children(div)[1], img);
        assert_eq!(doc.parent(canvas), None);
        assert_eq!(doc.parent(img), Some(div));
    }

    #[test]
    fn deep_clone_is_detached_and_independent() {
        let mut doc = Document::parse(r#"<div id="src"><span>x</span><canvas width="2" height="2"></canvas></div>"#);
        let src = doc.query_selector("#src").unwrap().unwrap();
        let copy = doc.deep_clone(src).unwrap();
        assert!(!doc.is_attached(copy));
        assert_eq!(doc.children(copy).len(), 2);

        let canvas_copy = doc.children(copy)[1];
        doc.surface_mut(canvas_copy)
            .unwrap()
            .fill_rect(0, 0, 1, 1, [9, 9, 9, 255]);
        let canvas_src = doc.children(src)[1];
        assert_eq!(doc.surface(canvas_src).unwrap().pixels().get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn clone_keeps_loaded_images_only() {
        let mut doc = Document::parse(r#"<div><img src="a.png"><img src="b.png"></div>"#);
        let div = doc.children(doc.body())[0];
        let (a, b) = (doc.children(div)[0], doc.children(div)[1]);
        doc.dispatch_image_event(
            a,
            ImageEvent::Load {
                natural_width: 5,
                natural_height: 6,
                resolved_src: None,
            },
        );
        doc.dispatch_image_event(b, ImageEvent::Error);

        let copy = doc.deep_clone(div).unwrap();
        let kids = doc.children(copy).to_vec();
        assert_eq!(
            doc.image_state(kids[0]),
            Some(ImageState::Loaded {
                natural_width: 5,
                natural_height: 6
            })
        );
        assert_eq!(doc.image_state(kids[1]), Some(ImageState::Unrequested));
    }

    #[test]
    fn destroy_frees_subtree_and_closes_signals() {
        let mut doc = Document::parse("<div><img src='a.png'></div>");
        let div = doc.children(doc.body())[0];
        let img = doc.children(div)[0];
        let rx = doc.element(img).unwrap().image().unwrap().subscribe();
        let before = doc.node_count();
        doc.destroy(div);
        assert_eq!(doc.node_count(), before - 2);
        assert!(doc.children(doc.body()).is_empty());
        assert!(rx.has_changed().is_err());
    }

    #[test]
    fn offset_width_resolution() {
        let mut doc = Document::parse(
            r#"<div id="outer" style="width: 600px"><div id="half" style="width: 50%"></div><p id="auto"></p></div>"#,
        );
        let outer = doc.query_selector("#outer").unwrap().unwrap();
        let half = doc.query_selector("#half").unwrap().unwrap();
        let auto = doc.query_selector("#auto").unwrap().unwrap();
        assert_eq!(doc.offset_width(outer), 600.0);
        assert_eq!(doc.offset_width(half), 300.0);
        assert_eq!(doc.offset_width(auto), 600.0);
        doc.set_style_property(outer, "display", "none").unwrap();
        assert_eq!(doc.offset_width(outer), 0.0);
        assert_eq!(doc.offset_width(doc.body()), DEFAULT_VIEWPORT_WIDTH);
    }

    #[test]
    fn destroyed_slots_are_reused_and_stale_ids_go_dead() {
        let mut doc = Document::parse(r#"<div id="src"><p>a</p><img src="a.png"></div>"#);
        let src = doc.query_selector("#src").unwrap().unwrap();
        let stale = doc.deep_clone(src).unwrap();
        let stale_img = doc.children(stale)[1];
        let slots = doc.nodes.len();
        doc.destroy(stale);

        for _ in 0..50 {
            let copy = doc.deep_clone(src).unwrap();
            doc.append_child(doc.body(), copy).unwrap();
            doc.destroy(copy);
        }
        assert_eq!(doc.nodes.len(), slots);

        assert!(!doc.contains(stale_img));

        // A late event for a torn-down image never reaches the slot's new owner.
        let old = doc.create_element(Tag::Img);
        doc.destroy(old);
        let next = doc.create_element(Tag::Img);
        assert_eq!(next.index(), old.index());
        assert_ne!(next, old);
        doc.dispatch_image_event(old, ImageEvent::Error);
        assert_eq!(doc.image_state(next), Some(ImageState::Unrequested));

        // Destroying a stale id leaves the new occupant alone.
        doc.destroy(old);
        assert!(doc.contains(next));
    }

    #[test]
    fn appending_under_own_descendant_is_rejected() {
        let mut doc = Document::new();
        let outer = doc.create_element(Tag::Div);
        let inner = doc.create_element(Tag::Span);
        doc.append_child(outer, inner).unwrap();

        assert_eq!(
            doc.append_child(outer, outer),
            Err(DomError::Cycle {
                parent: outer,
                child: outer
            })
        );
        assert_eq!(
            doc.append_child(inner, outer),
            Err(DomError::Cycle {
                parent: inner,
                child: outer
            })
        );
        let img = doc.create_element(Tag::Img);
        doc.append_child(inner, img).unwrap();
        assert!(matches!(
            doc.replace_child(img, outer, img),
            Err(DomError::Cycle { .. })
        ));
        assert_eq!(doc.descendants(outer), vec![inner, img]);
        assert_eq!(doc.parent(outer), None);
    }

    #[test]
    fn hostile_attribute_values_parse_without_panicking() {
        let doc = Document::parse(
            r##"<div><canvas data-fill="#aé"></canvas><canvas width="4294967295" height="4294967295" data-fill="#f00"></canvas><canvas width="100000" height="100000"></canvas><canvas width="-3" height="1e9"></canvas></div>"##,
        );
        let div = doc.children(doc.body())[0];
        let canvases = doc.children(div).to_vec();
        assert_eq!(canvases.len(), 4);

        let unfilled = doc.surface(canvases[0]).unwrap();
        assert_eq!((unfilled.width(), unfilled.height()), (300, 150));
        assert_eq!(unfilled.pixels().get_pixel(0, 0).0, [0, 0, 0, 0]);

        for &huge in &canvases[1..3] {
            let s = doc.surface(huge).unwrap();
            assert_eq!((s.width(), s.height()), (0, 0));
        }
        // Unparseable sizes fall back to the defaults.
        let fallback = doc.surface(canvases[3]).unwrap();
        assert_eq!((fallback.width(), fallback.height()), (300, 150));
    }

    #[test]
    fn style_with_data_url_survives_property_updates() {
        let mut doc = Document::parse(
            r#"<div style="background-image: url(data:image/png;base64,AAAA); color: red"></div>"#,
        );
        let div = doc.children(doc.body())[0];
        doc.set_style_property(div, "width", "10px").unwrap();
        assert_eq!(
            doc.style_property(div, "background-image").as_deref(),
            Some("url(data:image/png;base64,AAAA)")
        );
        assert_eq!(doc.style_property(div, "color").as_deref(), Some("red"));
        assert_eq!(doc.style_property(div, "width").as_deref(), Some("10px"));
    }

    #[test]
    fn append_rejects_attached_nodes() {
        let mut doc = Document::parse("<p>x</p>");
        let p = doc.children(doc.body())[0];
        assert_eq!(
            doc.append_child(doc.body(), p),
            Err(DomError::AlreadyAttached(p))
        );
        assert!(matches!(
            doc.remove_child(p, doc.body()),
            Err(DomError::NotAChild { .. })
        ));
    }

    #[test]
    fn snapshot_substitutes_fetched_sources() {
        let mut doc = Document::parse(r#"<img src="remote.png">"#);
        let img = doc.children(doc.body())[0];
        doc.dispatch_image_event(
            img,
            ImageEvent::Load {
                natural_width: 1,
                natural_height: 1,
                resolved_src: Some("data:image/png;base64,AAAA".into()),
            },
        );
        match doc.snapshot(img) {
            Some(DomNode::Element(e)) => assert_eq!(e.src(), Some("data:image/png;base64,AAAA")),
            other => panic!("unexpected snapshot {other:?}"),
        }
    }
}
