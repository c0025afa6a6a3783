use std::collections::{BTreeMap, HashMap};

use crate::context::DataContext;
use crate::docx::package::{scannable_part, DocxPackage};
use crate::docx::xml::{parse_xml_part, set_attr, write_xml_part, XmlEvent, XmlPart};
use crate::error::{RenderError, TemplateError};
use crate::tokens::{ANY_TOKEN_RE, LOOP_CLOSE_RE, LOOP_OPEN_RE};

// Guards against pathological marker churn, e.g. substituted values that
// themselves look like loop markers.
const MAX_LOOP_PASSES: usize = 64;

/// Populate a template archive with the given context.
///
/// All-or-nothing: every structural fault found across every scanned part is
/// collected into one `RenderError` and no output is produced on failure.
pub fn render_template(docx: &[u8], ctx: &DataContext) -> Result<Vec<u8>, TemplateError> {
    let pkg = DocxPackage::from_bytes(docx)?;

    let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
    let mut faults: Vec<String> = Vec::new();

    for ent in pkg.entries.iter().filter(|e| scannable_part(&e.name)) {
        let mut part = parse_xml_part(&ent.name, &ent.data).map_err(|e| {
            TemplateError::MalformedArchive(format!("parse {}: {e:#}", ent.name))
        })?;
        match render_part(&mut part, ctx) {
            Ok(()) => {
                let bytes = write_xml_part(&part).map_err(TemplateError::Other)?;
                replacements.insert(ent.name.clone(), bytes);
            }
            Err(mut msgs) => faults.append(&mut msgs),
        }
    }

    if !faults.is_empty() {
        return Err(TemplateError::Render(RenderError::new(faults)));
    }
    pkg.to_bytes_with_replacements(&replacements)
        .map_err(TemplateError::Other)
}

fn render_part(part: &mut XmlPart, ctx: &DataContext) -> Result<(), Vec<String>> {
    coalesce_tokens(&mut part.events);
    expand_loops(&mut part.events, ctx)?;
    substitute_scalars(&mut part.events, ctx);
    finalize_text_runs(&mut part.events);
    Ok(())
}

/// A Text event sitting directly inside a `w:t` element.
#[derive(Clone, Copy)]
struct TextSlot {
    event_idx: usize,
    wt_start_idx: usize,
}

fn text_slots(events: &[XmlEvent]) -> Vec<TextSlot> {
    let mut stack: Vec<(&str, usize)> = Vec::new();
    let mut slots = Vec::new();
    for (idx, ev) in events.iter().enumerate() {
        match ev {
            XmlEvent::Start { name, .. } => stack.push((name.as_str(), idx)),
            XmlEvent::End { .. } => {
                stack.pop();
            }
            XmlEvent::Text { .. } => {
                if let Some(&(name, start_idx)) = stack.last() {
                    if name == "w:t" {
                        slots.push(TextSlot {
                            event_idx: idx,
                            wt_start_idx: start_idx,
                        });
                    }
                }
            }
            _ => {}
        }
    }
    slots
}

fn slot_text<'a>(events: &'a [XmlEvent], slot: &TextSlot) -> &'a str {
    match &events[slot.event_idx] {
        XmlEvent::Text { text } => text.as_str(),
        _ => "",
    }
}

fn set_slot_text(events: &mut [XmlEvent], slot: &TextSlot, new_text: String) {
    if let XmlEvent::Text { text } = &mut events[slot.event_idx] {
        *text = new_text;
    }
}

/// Merge placeholders fragmented across formatting runs.
///
/// The visible text of all `w:t` nodes is concatenated and scanned for
/// `{{ }}` spans; any span crossing a node boundary is rewritten so the whole
/// token lands in the node where it starts, with the consumed characters
/// removed from the following nodes. After this pass every placeholder is
/// wholly contained in a single text node.
fn coalesce_tokens(events: &mut Vec<XmlEvent>) {
    let slots = text_slots(events);
    if slots.is_empty() {
        return;
    }

    let mut full = String::new();
    let mut ranges: Vec<(usize, usize)> = Vec::with_capacity(slots.len());
    for slot in &slots {
        let t = slot_text(events, slot);
        let start = full.len();
        full.push_str(t);
        ranges.push((start, full.len()));
    }

    let matches: Vec<(usize, usize)> = ANY_TOKEN_RE
        .find_iter(&full)
        .map(|m| (m.start(), m.end()))
        .collect();
    let crosses_boundary = matches.iter().any(|&(ms, me)| {
        !ranges.iter().any(|&(a, b)| ms >= a && me <= b)
    });
    if !crosses_boundary {
        return;
    }

    let mut mi = 0usize;
    let mut claimed_until = 0usize;
    let mut new_texts: Vec<String> = Vec::with_capacity(slots.len());
    for &(a, b) in &ranges {
        let mut s = String::new();
        let mut pos = a.max(claimed_until);
        while pos < b {
            while mi < matches.len() && matches[mi].1 <= pos {
                mi += 1;
            }
            match matches.get(mi) {
                Some(&(ms, me)) if ms >= pos && ms < b => {
                    s.push_str(&full[pos..ms]);
                    // The whole token, even where it spills past this node.
                    s.push_str(&full[ms..me]);
                    pos = me;
                    mi += 1;
                }
                _ => {
                    s.push_str(&full[pos..b]);
                    pos = b;
                }
            }
        }
        claimed_until = claimed_until.max(pos);
        new_texts.push(s);
    }

    for (slot, text) in slots.iter().zip(new_texts) {
        set_slot_text(events, slot, text);
    }
}

#[derive(Clone, Debug)]
struct LoopMarker {
    slot_pos: usize,
    start: usize,
    end: usize,
    name: String,
    open: bool,
}

fn scan_markers(events: &[XmlEvent], slots: &[TextSlot]) -> Vec<LoopMarker> {
    let mut markers = Vec::new();
    for (slot_pos, slot) in slots.iter().enumerate() {
        let text = slot_text(events, slot);
        for cap in LOOP_OPEN_RE.captures_iter(text) {
            let m = cap.get(0).expect("whole match");
            markers.push(LoopMarker {
                slot_pos,
                start: m.start(),
                end: m.end(),
                name: cap[1].to_string(),
                open: true,
            });
        }
        for cap in LOOP_CLOSE_RE.captures_iter(text) {
            let m = cap.get(0).expect("whole match");
            markers.push(LoopMarker {
                slot_pos,
                start: m.start(),
                end: m.end(),
                name: cap[1].to_string(),
                open: false,
            });
        }
    }
    markers.sort_by_key(|m| (m.slot_pos, m.start));
    markers
}

/// Validate loop-marker structure. Single-level loops only; every fault is
/// reported, not just the first.
fn check_markers(markers: &[LoopMarker]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut i = 0usize;
    while i < markers.len() {
        let m = &markers[i];
        if !m.open {
            errors.push(format!("Unopened loop {{{{/{}}}}}", m.name));
            i += 1;
            continue;
        }
        match markers.get(i + 1) {
            None => {
                errors.push(format!("Unclosed loop {{{{#{}}}}}", m.name));
                i += 1;
            }
            Some(next) if next.open => {
                errors.push(format!(
                    "Nested loop {{{{#{}}}}} inside {{{{#{}}}}} is not supported",
                    next.name, m.name
                ));
                i += 1;
            }
            Some(next) if next.name != m.name => {
                errors.push(format!(
                    "Loop {{{{#{}}}}} closed by mismatched {{{{/{}}}}}",
                    m.name, next.name
                ));
                i += 2;
            }
            Some(_) => i += 2,
        }
    }
    errors
}

fn expand_loops(events: &mut Vec<XmlEvent>, ctx: &DataContext) -> Result<(), Vec<String>> {
    for _ in 0..MAX_LOOP_PASSES {
        let slots = text_slots(events);
        let markers = scan_markers(events, &slots);
        if markers.is_empty() {
            return Ok(());
        }
        let errors = check_markers(&markers);
        if !errors.is_empty() {
            return Err(errors);
        }
        // Validated: markers come in [open, close] pairs. Expand the first
        // pair and rescan, since expansion shifts every later index.
        let open = markers[0].clone();
        let close = markers[1].clone();
        let rows = ctx.rows(&open.name).unwrap_or(&[]);

        if open.slot_pos == close.slot_pos {
            expand_inline(events, &slots, &open, &close, rows);
        } else {
            expand_block(events, &slots, &open, &close, rows);
        }
    }
    Err(vec!["Loop expansion did not converge".to_string()])
}

/// Open and close markers inside one text node: repeat the enclosed substring
/// per row, substituting that row's own fields.
fn expand_inline(
    events: &mut [XmlEvent],
    slots: &[TextSlot],
    open: &LoopMarker,
    close: &LoopMarker,
    rows: &[BTreeMap<String, String>],
) {
    let slot = &slots[open.slot_pos];
    let text = slot_text(events, slot).to_string();
    let body = &text[open.end..close.start];
    let mut out = String::new();
    out.push_str(&text[..open.start]);
    for row in rows {
        out.push_str(&substitute_row_fields(body, row));
    }
    out.push_str(&text[close.end..]);
    set_slot_text(events, slot, out);
}

/// Markers in different text nodes: the repeat region spans from the start of
/// the block enclosing the open marker to the end of the block enclosing the
/// close marker. The block is the nearest enclosing table row, or failing
/// that the enclosing paragraph, so a loop placed around table-row cells
/// repeats whole rows.
fn expand_block(
    events: &mut Vec<XmlEvent>,
    slots: &[TextSlot],
    open: &LoopMarker,
    close: &LoopMarker,
    rows: &[BTreeMap<String, String>],
) {
    let open_slot = slots[open.slot_pos];
    let close_slot = slots[close.slot_pos];

    let region_start = enclosing_block_start(events, open_slot.event_idx);
    let region_end = matching_end(events, enclosing_block_start(events, close_slot.event_idx))
        .unwrap_or(close_slot.event_idx);

    // Template copy of the region with both markers stripped out.
    let mut template: Vec<XmlEvent> = events[region_start..=region_end].to_vec();
    strip_marker(&mut template, open_slot.event_idx - region_start, open.start, open.end);
    strip_marker(&mut template, close_slot.event_idx - region_start, close.start, close.end);

    let mut expanded: Vec<XmlEvent> = Vec::new();
    for row in rows {
        let mut copy = template.clone();
        for slot in text_slots(&copy) {
            let text = slot_text(&copy, &slot).to_string();
            if text.contains("{{") {
                set_slot_text(&mut copy, &slot, substitute_row_fields(&text, row));
            }
        }
        expanded.extend(copy);
    }

    events.splice(region_start..=region_end, expanded);
}

fn strip_marker(template: &mut [XmlEvent], event_idx: usize, start: usize, end: usize) {
    if let Some(XmlEvent::Text { text }) = template.get_mut(event_idx) {
        let mut t = String::with_capacity(text.len());
        t.push_str(&text[..start]);
        t.push_str(&text[end..]);
        *text = t;
    }
}

/// Replace only tokens present in the row mapping; everything else is left
/// for the top-level scalar pass.
fn substitute_row_fields(text: &str, row: &BTreeMap<String, String>) -> String {
    ANY_TOKEN_RE
        .replace_all(text, |caps: &regex::Captures<'_>| match row.get(&caps[1]) {
            Some(v) => v.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Nearest enclosing `w:tr` start, else `w:p` start, else the text node's own
/// position.
fn enclosing_block_start(events: &[XmlEvent], text_idx: usize) -> usize {
    let mut stack: Vec<(&str, usize)> = Vec::new();
    for (idx, ev) in events.iter().enumerate().take(text_idx + 1) {
        match ev {
            XmlEvent::Start { name, .. } => stack.push((name.as_str(), idx)),
            XmlEvent::End { .. } => {
                stack.pop();
            }
            _ => {}
        }
    }
    stack
        .iter()
        .rev()
        .find(|(name, _)| *name == "w:tr")
        .or_else(|| stack.iter().rev().find(|(name, _)| *name == "w:p"))
        .map(|&(_, idx)| idx)
        .unwrap_or(text_idx)
}

fn matching_end(events: &[XmlEvent], start_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, ev) in events.iter().enumerate().skip(start_idx) {
        match ev {
            XmlEvent::Start { .. } => depth += 1,
            XmlEvent::End { .. } => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Resolve every remaining `{{token}}` by exact key match against the
/// top-level context; a missing key resolves to empty string, never a thrown
/// error and never literal placeholder text in the output.
fn substitute_scalars(events: &mut [XmlEvent], ctx: &DataContext) {
    let slots = text_slots(events);
    for slot in &slots {
        let text = slot_text(events, slot);
        if !text.contains("{{") {
            continue;
        }
        let replaced = ANY_TOKEN_RE
            .replace_all(text, |caps: &regex::Captures<'_>| {
                ctx.get(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned();
        set_slot_text(events, slot, replaced);
    }
}

/// Convert embedded line breaks in substituted values into `w:br` runs and
/// stamp `xml:space="preserve"` where substitution introduced edge spaces.
fn finalize_text_runs(events: &mut Vec<XmlEvent>) {
    let slots = text_slots(events);
    for slot in slots.iter().rev() {
        let text = slot_text(events, slot).replace("\r\n", "\n").replace('\r', "\n");
        if !text.contains('\n') {
            continue;
        }
        let wt_attrs = match &events[slot.wt_start_idx] {
            XmlEvent::Start { attrs, .. } => attrs.clone(),
            _ => Vec::new(),
        };
        let mut repl: Vec<XmlEvent> = Vec::new();
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                repl.push(XmlEvent::End {
                    name: "w:t".to_string(),
                });
                repl.push(XmlEvent::Empty {
                    name: "w:br".to_string(),
                    attrs: Vec::new(),
                });
                repl.push(XmlEvent::Start {
                    name: "w:t".to_string(),
                    attrs: wt_attrs.clone(),
                });
            }
            repl.push(XmlEvent::Text {
                text: line.to_string(),
            });
        }
        events.splice(slot.event_idx..=slot.event_idx, repl);
    }

    let slots = text_slots(events);
    for slot in &slots {
        let text = slot_text(events, slot);
        if text.starts_with(' ') || text.ends_with(' ') {
            set_attr(&mut events[slot.wt_start_idx], "xml:space", "preserve");
        }
    }
}
