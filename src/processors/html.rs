//! HTML adapter
//!
//! The document is parsed with html5ever and immediately copied into a plain
//! node arena so the adapter owns no reference-counted DOM. Units are the
//! text of allowlisted elements whose only child is a non-blank text node.
//! Output is the whole tree pretty-printed as UTF-8.

use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::core::config::DocumentOptions;
use crate::core::errors::{DocumentError, DocumentResult};
use crate::core::orchestrator::{DocumentAdapter, TranslationUnit};
use crate::core::progress::ProgressPlan;

const FORMAT: &str = "html";

/// Elements whose direct text is translated
const TRANSLATABLE: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "span", "div", "li", "td", "th", "a",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Content is written verbatim, neither escaped nor re-indented
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "pre", "textarea"];

/// Deeper levels are rendered at this indentation
const MAX_INDENT: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlNode {
    Document,
    Doctype(String),
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: HtmlNode,
    children: Vec<usize>,
}

/// Index of the text node that receives a translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextNodeId(pub usize);

/// A parsed HTML document held in an arena
#[derive(Debug)]
pub struct HtmlAdapter {
    nodes: Vec<Node>,
    targets: Vec<(usize, usize)>,
}

impl HtmlAdapter {
    fn push(&mut self, data: HtmlNode) -> usize {
        self.nodes.push(Node {
            data,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    /// Copy the DOM below `root` into the arena without recursing
    fn copy_tree(&mut self, root: &Handle) {
        let mut stack: Vec<(Handle, Option<usize>)> = vec![(root.clone(), None)];

        while let Some((handle, parent)) = stack.pop() {
            let data = match &handle.data {
                NodeData::Document => HtmlNode::Document,
                NodeData::Doctype { name, .. } => HtmlNode::Doctype(name.to_string()),
                NodeData::Text { contents } => HtmlNode::Text(contents.borrow().to_string()),
                NodeData::Comment { contents } => HtmlNode::Comment(contents.to_string()),
                NodeData::Element { name, attrs, .. } => HtmlNode::Element {
                    name: name.local.to_string(),
                    attrs: attrs
                        .borrow()
                        .iter()
                        .map(|a| {
                            let key = match &a.name.prefix {
                                Some(prefix) => format!("{}:{}", prefix, a.name.local),
                                None => a.name.local.to_string(),
                            };
                            (key, a.value.to_string())
                        })
                        .collect(),
                },
                NodeData::ProcessingInstruction { .. } => continue,
            };
            let index = self.push(data);
            if let Some(parent) = parent {
                self.nodes[parent].children.push(index);
            }

            // template children live in a separate fragment
            let template = match &handle.data {
                NodeData::Element {
                    template_contents, ..
                } => template_contents.borrow().clone(),
                _ => None,
            };
            let source = template.as_ref().unwrap_or(&handle);

            // reversed so siblings are popped, and appended, in document order
            let children = source.children.borrow();
            stack.extend(children.iter().rev().map(|child| (child.clone(), Some(index))));
        }
    }

    /// Qualifying (element, text node) pairs in document order
    fn find_targets(&self) -> Vec<(usize, usize)> {
        let mut targets = Vec::new();
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if let HtmlNode::Element { name, .. } = &node.data {
                if TRANSLATABLE.contains(&name.as_str()) && node.children.len() == 1 {
                    let child = node.children[0];
                    if let HtmlNode::Text(text) = &self.nodes[child].data {
                        if !text.trim().is_empty() {
                            targets.push((index, child));
                        }
                    }
                }
            }
            stack.extend(node.children.iter().rev());
        }
        targets
    }

    /// Tag names of the elements that will be translated, in order
    pub fn target_tags(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter_map(|&(element, _)| self.element_name(element))
            .collect()
    }

    fn element_name(&self, index: usize) -> Option<&str> {
        match &self.nodes[index].data {
            HtmlNode::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Render the arena with one node per line, one space per level up to
    /// [`MAX_INDENT`]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.nodes.is_empty() {
            return out;
        }

        let mut stack = vec![Step::Enter(0, 0, Layout::Block)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(index, depth, layout) => {
                    self.enter(index, depth, layout, &mut stack, &mut out)
                }
                Step::Exit(index, depth, layout) => self.exit(index, depth, layout, &mut out),
            }
        }
        out
    }

    fn enter(
        &self,
        index: usize,
        depth: usize,
        layout: Layout,
        stack: &mut Vec<Step>,
        out: &mut String,
    ) {
        let node = &self.nodes[index];
        let children = |layout: Layout, depth: usize, stack: &mut Vec<Step>| {
            stack.extend(
                node.children
                    .iter()
                    .rev()
                    .map(|&child| Step::Enter(child, depth, layout)),
            );
        };

        if let Layout::Inline { verbatim } = layout {
            // whitespace-preserving rendering inside `pre`-like elements
            match &node.data {
                HtmlNode::Text(text) if verbatim => out.push_str(text),
                HtmlNode::Text(text) => out.push_str(&escape_text(text)),
                HtmlNode::Comment(text) => out.push_str(&format!("<!--{}-->", text)),
                HtmlNode::Element { name, attrs } => {
                    open_tag(name, attrs, out);
                    if !VOID_ELEMENTS.contains(&name.as_str()) {
                        stack.push(Step::Exit(index, depth, layout));
                        children(layout, depth, stack);
                    }
                }
                HtmlNode::Document | HtmlNode::Doctype(_) => {}
            }
            return;
        }

        let indent = " ".repeat(depth.min(MAX_INDENT));
        match &node.data {
            HtmlNode::Document => children(Layout::Block, depth, stack),
            HtmlNode::Doctype(name) => {
                out.push_str(&format!("{}<!DOCTYPE {}>\n", indent, name));
            }
            HtmlNode::Comment(text) => {
                out.push_str(&format!("{}<!--{}-->\n", indent, text));
            }
            HtmlNode::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push_str(&format!("{}{}\n", indent, escape_text(trimmed)));
                }
            }
            HtmlNode::Element { name, attrs } => {
                out.push_str(&indent);
                open_tag(name, attrs, out);

                if VOID_ELEMENTS.contains(&name.as_str()) {
                    out.push('\n');
                } else if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                    let verbatim = name == "script" || name == "style";
                    stack.push(Step::Exit(index, depth, layout));
                    children(Layout::Inline { verbatim }, depth, stack);
                } else {
                    out.push('\n');
                    stack.push(Step::Exit(index, depth, layout));
                    children(Layout::Block, depth + 1, stack);
                }
            }
        }
    }

    fn exit(&self, index: usize, depth: usize, layout: Layout, out: &mut String) {
        let HtmlNode::Element { name, .. } = &self.nodes[index].data else {
            return;
        };
        match layout {
            Layout::Inline { .. } => out.push_str(&format!("</{}>", name)),
            Layout::Block if RAW_TEXT_ELEMENTS.contains(&name.as_str()) => {
                out.push_str(&format!("</{}>\n", name));
            }
            Layout::Block => {
                let indent = " ".repeat(depth.min(MAX_INDENT));
                out.push_str(&format!("{}</{}>\n", indent, name));
            }
        }
    }
}

/// How a node is laid out by the renderer
#[derive(Debug, Clone, Copy)]
enum Layout {
    /// One node per line, indented by depth
    Block,
    /// Written as-is inside raw text elements
    Inline { verbatim: bool },
}

/// Pending renderer work: open a node, or close an element after its children
#[derive(Debug, Clone, Copy)]
enum Step {
    Enter(usize, usize, Layout),
    Exit(usize, usize, Layout),
}

fn open_tag(name: &str, attrs: &[(String, String)], out: &mut String) {
    out.push('<');
    out.push_str(name);
    for (key, value) in attrs {
        out.push_str(&format!(" {}=\"{}\"", key, escape_attr(value)));
    }
    out.push('>');
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

impl DocumentAdapter for HtmlAdapter {
    type Location = TextNodeId;
    const FORMAT: &'static str = FORMAT;

    fn load(bytes: &[u8], _options: &DocumentOptions) -> DocumentResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DocumentError::load(FORMAT, format!("input is not valid UTF-8: {}", e)))?;

        let dom: RcDom = parse_document(RcDom::default(), ParseOpts::default()).one(text);

        let mut adapter = Self {
            nodes: Vec::new(),
            targets: Vec::new(),
        };
        adapter.copy_tree(&dom.document);
        adapter.targets = adapter.find_targets();
        Ok(adapter)
    }

    fn plan(&self) -> ProgressPlan {
        ProgressPlan::Linear {
            total: self.targets.len(),
        }
    }

    fn units(&self) -> Vec<TranslationUnit<TextNodeId>> {
        self.targets
            .iter()
            .filter_map(|&(_, text)| match &self.nodes[text].data {
                HtmlNode::Text(content) => {
                    Some(TranslationUnit::new(content.trim().to_string(), TextNodeId(text)))
                }
                _ => None,
            })
            .collect()
    }

    fn write_back(&mut self, location: &TextNodeId, text: String) -> DocumentResult<()> {
        match self.nodes.get_mut(location.0) {
            Some(node) if matches!(node.data, HtmlNode::Text(_)) => {
                node.data = HtmlNode::Text(text);
                Ok(())
            }
            _ => Err(DocumentError::serialize(
                FORMAT,
                format!("node {} is not a text node", location.0),
            )),
        }
    }

    fn serialize(self) -> DocumentResult<Vec<u8>> {
        Ok(self.render().into_bytes())
    }

    fn unit_message(&self, _: &TranslationUnit<TextNodeId>, visited: usize, total: usize) -> String {
        format!("Translating element {} of {}...", visited, total)
    }
}
