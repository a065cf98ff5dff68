//! Markup extraction from generative-model output
//!
//! The model answers in prose interleaved with a small tag vocabulary:
//!
//! ```text
//! <cycle id="1" start="00:15.2" end="00:47.8" total_duration="32.6s">
//!   <dig start="00:15.2" end="00:25.1" duration="9.9s" description="Bucket descends"/>
//! </cycle>
//! <summary><total_cycles>12</total_cycles></summary>
//! <evaluation>
//!   <control_precision score="85/100">
//!     <strength timestamp="00:25.3">Smooth coordinated movement</strength>
//!   </control_precision>
//! </evaluation>
//! <overall_performance><score>82</score><grade>B</grade><summary>..</summary></overall_performance>
//! <priority level="high"><recommendation>..</recommendation></priority>
//! ```
//!
//! A hand-rolled scanner turns the text into a lenient element tree. Anything that
//! does not look like a tag stays prose; stray closing tags are dropped. A tag left
//! open inside a closed parent closes empty and its content moves up to the parent,
//! while tags still open at the end of the text keep their content. Extraction never
//! fails: a malformed piece is skipped (logged at debug) and the rest is kept.

use opcycle_common::human_time::{format_timestamp, parse_seconds};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{Cycle, CycleClosure, CycleSource, Phase};

// ============================================================================
// Output types
// ============================================================================

/// One leaf of the `<summary>` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryField {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, String)>,
}

/// A strength or improvement remark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remark {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// One `<evaluation>` category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCategory {
    pub name: String,
    pub score: Option<String>,
    pub strengths: Vec<Remark>,
    pub improvements: Vec<Remark>,
}

/// `<overall_performance>` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallPerformance {
    pub score: String,
    pub grade: String,
    pub summary: String,
}

/// Recommendations grouped by `<priority level=..>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
}

impl Recommendations {
    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.medium.is_empty() && self.low.is_empty()
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }
}

/// Everything recoverable from one markup text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkupDocument {
    pub cycles: Vec<Cycle>,
    pub summary: Vec<SummaryField>,
    pub evaluation: Vec<EvaluationCategory>,
    pub overall_performance: Option<OverallPerformance>,
    pub recommendations: Recommendations,
    pub plain_text: String,
}

// ============================================================================
// Public operations
// ============================================================================

/// Parse the text once and run every extraction over it
pub fn extract(text: &str) -> MarkupDocument {
    let tokens = tokenize(text);
    let plain_text = plain_text_from(&tokens);
    let tree = build_tree(tokens);

    let document = MarkupDocument {
        cycles: cycles_from(&tree),
        summary: summary_from(&tree),
        evaluation: evaluation_from(&tree),
        overall_performance: overall_performance_from(&tree),
        recommendations: recommendations_from(&tree),
        plain_text,
    };

    info!(
        cycles = document.cycles.len(),
        summary_fields = document.summary.len(),
        categories = document.evaluation.len(),
        recommendations = document.recommendations.len(),
        "Markup extraction complete"
    );

    document
}

/// Cycles declared by `<cycle>` tags, in discovery order
pub fn parse_cycles(text: &str) -> Vec<Cycle> {
    cycles_from(&build_tree(tokenize(text)))
}

/// Leaf fields of the `<summary>` block(s)
pub fn parse_summary(text: &str) -> Vec<SummaryField> {
    summary_from(&build_tree(tokenize(text)))
}

/// Categories of the `<evaluation>` block(s)
pub fn parse_evaluation(text: &str) -> Vec<EvaluationCategory> {
    evaluation_from(&build_tree(tokenize(text)))
}

/// The `<overall_performance>` block, if present
pub fn parse_overall_performance(text: &str) -> Option<OverallPerformance> {
    overall_performance_from(&build_tree(tokenize(text)))
}

/// Recommendations grouped by priority
pub fn parse_recommendations(text: &str) -> Recommendations {
    recommendations_from(&build_tree(tokenize(text)))
}

/// Text with every tag removed, inner prose kept, whitespace collapsed
pub fn extract_plain_text(text: &str) -> String {
    plain_text_from(&tokenize(text))
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Open {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close(String),
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':')
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_name(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(b) if is_name_start(b) => self.pos += 1,
            _ => return None,
        }
        while matches!(self.peek(), Some(b) if is_name_char(b)) {
            self.pos += 1;
        }
        Some(&self.src[start..self.pos])
    }

    fn read_attr_value(&mut self) -> Option<&'a str> {
        match self.peek()? {
            quote @ (b'"' | b'\'') => {
                self.pos += 1;
                let start = self.pos;
                let len = self.bytes[start..].iter().position(|&b| b == quote)?;
                self.pos = start + len + 1;
                Some(&self.src[start..start + len])
            }
            _ => {
                let start = self.pos;
                while matches!(self.peek(), Some(b) if !b.is_ascii_whitespace() && b != b'>' && b != b'/')
                {
                    self.pos += 1;
                }
                if self.pos > start {
                    Some(&self.src[start..self.pos])
                } else {
                    None
                }
            }
        }
    }

    /// Try to read a tag starting at `<`. On failure the position is unspecified
    /// and the caller rewinds.
    fn read_tag(&mut self) -> Option<Token> {
        self.pos += 1; // '<'
        match self.peek()? {
            b'/' => {
                self.pos += 1;
                let name = self.read_name()?;
                self.skip_whitespace();
                if self.peek()? != b'>' {
                    return None;
                }
                self.pos += 1;
                Some(Token::Close(name.to_ascii_lowercase()))
            }
            b'!' | b'?' => {
                let rest = &self.src[self.pos..];
                let end = if rest.starts_with("!--") {
                    rest.find("-->").map(|i| i + 3)
                } else {
                    rest.find('>').map(|i| i + 1)
                }?;
                self.pos += end;
                Some(Token::Text(String::new()))
            }
            _ => {
                let name = self.read_name()?.to_ascii_lowercase();
                let mut attrs = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.peek()? {
                        b'>' => {
                            self.pos += 1;
                            return Some(Token::Open {
                                name,
                                attrs,
                                self_closing: false,
                            });
                        }
                        b'/' => {
                            self.pos += 1;
                            if self.peek()? != b'>' {
                                return None;
                            }
                            self.pos += 1;
                            return Some(Token::Open {
                                name,
                                attrs,
                                self_closing: true,
                            });
                        }
                        _ => {
                            let key = self.read_name()?.to_ascii_lowercase();
                            self.skip_whitespace();
                            let value = if self.peek() == Some(b'=') {
                                self.pos += 1;
                                self.skip_whitespace();
                                decode_entities(self.read_attr_value()?)
                            } else {
                                String::new()
                            };
                            attrs.push((key, value));
                        }
                    }
                }
            }
        }
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut scanner = Scanner::new(text);
    let mut tokens = Vec::new();
    let mut text_start = 0;

    while let Some(offset) = text[scanner.pos..].find('<') {
        let tag_start = scanner.pos + offset;
        scanner.pos = tag_start;
        match scanner.read_tag() {
            Some(token) => {
                if tag_start > text_start {
                    tokens.push(Token::Text(decode_entities(&text[text_start..tag_start])));
                }
                if !matches!(&token, Token::Text(t) if t.is_empty()) {
                    tokens.push(token);
                }
                text_start = scanner.pos;
            }
            None => {
                // Not a tag: the '<' stays part of the prose
                scanner.pos = tag_start + 1;
            }
        }
    }

    if text_start < text.len() {
        tokens.push(Token::Text(decode_entities(&text[text_start..])));
    }

    tokens
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn plain_text_from(tokens: &[Token]) -> String {
    let joined = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Text(s) => Some(s.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ");
    collapse_whitespace(&joined)
}

// ============================================================================
// Element tree
// ============================================================================

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.name == name)
    }

    /// Concatenated text content, whitespace collapsed
    fn text(&self) -> String {
        let mut raw = String::new();
        collect_text(&self.children, &mut raw);
        collapse_whitespace(&raw)
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => {
                out.push_str(t);
                out.push(' ');
            }
            Node::Element(e) => collect_text(&e.children, out),
        }
    }
}

fn attach(stack: &mut [Element], root: &mut Vec<Node>, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => root.push(node),
    }
}

fn build_tree(tokens: Vec<Token>) -> Vec<Node> {
    let mut root = Vec::new();
    let mut stack: Vec<Element> = Vec::new();

    for token in tokens {
        match token {
            Token::Text(text) => attach(&mut stack, &mut root, Node::Text(text)),
            Token::Open {
                name,
                attrs,
                self_closing,
            } => {
                let element = Element {
                    name,
                    attrs,
                    children: Vec::new(),
                };
                if self_closing {
                    attach(&mut stack, &mut root, Node::Element(element));
                } else {
                    stack.push(element);
                }
            }
            Token::Close(name) => {
                if !stack.iter().any(|e| e.name == name) {
                    debug!(tag = %name, "Dropping stray closing tag");
                    continue;
                }
                while let Some(element) = stack.pop() {
                    if element.name == name {
                        attach(&mut stack, &mut root, Node::Element(element));
                        break;
                    }
                    // Unterminated tag closes empty, its content belongs to the parent
                    debug!(tag = %element.name, "Closing unterminated tag");
                    let Element {
                        name: open_name,
                        attrs,
                        children,
                    } = element;
                    attach(
                        &mut stack,
                        &mut root,
                        Node::Element(Element {
                            name: open_name,
                            attrs,
                            children: Vec::new(),
                        }),
                    );
                    for child in children {
                        attach(&mut stack, &mut root, child);
                    }
                }
            }
        }
    }

    while let Some(element) = stack.pop() {
        debug!(tag = %element.name, "Closing tag left open at end of text");
        attach(&mut stack, &mut root, Node::Element(element));
    }

    root
}

/// Elements named `name` in document order, not descending into `fence` elements.
/// Matches nested inside a match are included.
fn find_all<'t>(nodes: &'t [Node], name: &str, fence: Option<&str>, out: &mut Vec<&'t Element>) {
    for node in nodes {
        if let Node::Element(e) = node {
            if Some(e.name.as_str()) == fence {
                continue;
            }
            if e.name == name {
                out.push(e);
            }
            find_all(&e.children, name, fence, out);
        }
    }
}

fn elements_named<'t>(tree: &'t [Node], name: &str, fence: Option<&str>) -> Vec<&'t Element> {
    let mut out = Vec::new();
    find_all(tree, name, fence, &mut out);
    out
}

// ============================================================================
// Extraction over the tree
// ============================================================================

fn parse_time_attr(element: &Element, key: &str) -> Option<f64> {
    let raw = element.attr(key)?;
    match parse_seconds(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(tag = %element.name, attr = key, value = raw, "Unparsable time: {}", e);
            None
        }
    }
}

fn phase_from(element: &Element) -> Option<Phase> {
    let start = parse_time_attr(element, "start")?;
    let end = parse_time_attr(element, "end")?;
    let duration = parse_time_attr(element, "duration")?;

    let description = element
        .attr("description")
        .map(str::to_string)
        .or_else(|| Some(element.text()).filter(|t| !t.is_empty()));

    Some(Phase {
        name: element.name.clone(),
        start,
        end,
        duration,
        description,
    })
}

fn cycle_from(element: &Element, sequence_number: usize) -> Cycle {
    let start_time = parse_time_attr(element, "start").unwrap_or(0.0);
    let duration = parse_time_attr(element, "total_duration").unwrap_or(0.0);
    let end_time = start_time + duration;

    let mut phases: Vec<Phase> = Vec::new();
    for child in element.child_elements().filter(|c| c.name != "cycle") {
        match phase_from(child) {
            Some(phase) if phases.iter().any(|p| p.name == phase.name) => {
                debug!(cycle = sequence_number, phase = %phase.name, "Skipping repeated phase");
            }
            Some(phase) => phases.push(phase),
            None => {
                debug!(cycle = sequence_number, tag = %child.name, "Skipping malformed phase tag");
            }
        }
    }

    Cycle {
        sequence_number,
        declared_id: element.attr("id").map(str::to_string),
        start_time,
        end_time,
        duration,
        start_label: element
            .attr("start")
            .map(str::to_string)
            .unwrap_or_else(|| format_timestamp(start_time)),
        end_label: element
            .attr("end")
            .map(str::to_string)
            .unwrap_or_else(|| format_timestamp(end_time)),
        duration_label: element
            .attr("total_duration")
            .unwrap_or("0s")
            .to_string(),
        is_complete: true,
        source: CycleSource::Markup,
        closure: CycleClosure::Declared,
        events: Vec::new(),
        phases,
        observations: Vec::new(),
    }
}

fn cycles_from(tree: &[Node]) -> Vec<Cycle> {
    elements_named(tree, "cycle", None)
        .into_iter()
        .enumerate()
        .map(|(i, element)| cycle_from(element, i + 1))
        .collect()
}

fn summary_from(tree: &[Node]) -> Vec<SummaryField> {
    // <overall_performance> has its own <summary> leaf
    elements_named(tree, "summary", Some("overall_performance"))
        .into_iter()
        .flat_map(|summary| summary.child_elements())
        .map(|leaf| SummaryField {
            name: leaf.name.clone(),
            value: leaf.text(),
            attributes: leaf.attrs.clone(),
        })
        .collect()
}

fn remark_from(element: &Element) -> Remark {
    Remark {
        text: element.text(),
        timestamp: element.attr("timestamp").map(str::to_string),
    }
}

fn evaluation_from(tree: &[Node]) -> Vec<EvaluationCategory> {
    elements_named(tree, "evaluation", None)
        .into_iter()
        .flat_map(|evaluation| evaluation.child_elements())
        .map(|category| EvaluationCategory {
            name: category.name.clone(),
            score: category.attr("score").map(str::to_string),
            strengths: category
                .child_elements()
                .filter(|e| e.name == "strength")
                .map(remark_from)
                .collect(),
            improvements: category
                .child_elements()
                .filter(|e| e.name == "improvement")
                .map(remark_from)
                .collect(),
        })
        .collect()
}

fn overall_performance_from(tree: &[Node]) -> Option<OverallPerformance> {
    let block = elements_named(tree, "overall_performance", None)
        .into_iter()
        .next()?;
    let leaf = |name: &str| block.child(name).map(|e| e.text());

    match (leaf("score"), leaf("grade")) {
        (Some(score), Some(grade)) => Some(OverallPerformance {
            score,
            grade,
            summary: leaf("summary").unwrap_or_default(),
        }),
        _ => {
            debug!("overall_performance block without score/grade");
            None
        }
    }
}

fn recommendations_from(tree: &[Node]) -> Recommendations {
    let mut recommendations = Recommendations::default();

    for priority in elements_named(tree, "priority", None) {
        let bucket = match priority.attr("level").map(str::to_ascii_lowercase).as_deref() {
            Some("high") => &mut recommendations.high,
            Some("medium") => &mut recommendations.medium,
            Some("low") => &mut recommendations.low,
            other => {
                debug!(level = ?other, "Skipping priority block with unknown level");
                continue;
            }
        };
        bucket.extend(
            priority
                .child_elements()
                .filter(|e| e.name == "recommendation")
                .map(|e| e.text())
                .filter(|t| !t.is_empty()),
        );
    }

    recommendations
}
