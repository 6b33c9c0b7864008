//! C3: DOM utilities executed inside the page, plus the algorithmic parts —
//! common-ancestor discovery, last-similar-sibling discovery, selector
//! generation — implemented and unit-tested in pure Rust against a flat
//! snapshot of element descriptors, turning a JS-side payload into typed
//! Rust values rather than doing the decision logic in JS.

use crate::error::Result;
use crate::session::BrowserSession;
use serde::{Deserialize, Serialize};
use strot_core::text_match;

/// Installed once per page; detects its own absence and is safe to
/// re-inject (idempotent `window.__strotInstalled` guard), per the design
/// notes' plugin/page coupling rule.
pub const INSTALL_JS: &str = r#"
(() => {
  if (!window.__strotInstalled) {
    window.__strotInstalled = true;
  }
  return JSON.stringify("ok");
})()
"#;

/// Enumerates every element in the document into a flat, parent-indexed
/// descriptor list (shadow DOM included, visibility computed via
/// `getBoundingClientRect`). Returns raw geometry/ancestry rather than a
/// pre-decided "interactive" classification, since C3 needs the full tree
/// to compute common ancestors.
pub const SNAPSHOT_JS: &str = r#"
(() => {
  const out = [];
  const indexOf = new Map();

  function describe(el, parentIndex) {
    const rect = el.getBoundingClientRect();
    const idx = out.length;
    indexOf.set(el, idx);
    out.push({
      index: idx,
      tag: el.tagName.toLowerCase(),
      id: el.id || null,
      classes: el.className && typeof el.className === 'string'
        ? el.className.split(/\s+/).filter(Boolean) : [],
      parent_index: parentIndex,
      text: (el.innerText || el.textContent || '').trim().slice(0, 2000),
      rect: { top: rect.top, left: rect.left, width: rect.width, height: rect.height },
    });
    return idx;
  }

  function walk(el, parentIndex) {
    if (!(el instanceof Element)) return;
    const idx = describe(el, parentIndex);
    for (const child of el.children) {
      walk(child, idx);
    }
    if (el.shadowRoot) {
      for (const child of el.shadowRoot.children) {
        walk(child, idx);
      }
    }
  }

  walk(document.body, null);
  return JSON.stringify({
    elements: out,
    viewport_height: window.innerHeight,
    viewport_width: window.innerWidth,
    scroll_y: window.scrollY,
  });
})()
"#;

pub fn scroll_to_next_view_js(direction: Direction) -> String {
    let dy = match direction {
        Direction::Down => "window.innerHeight",
        Direction::Up => "-window.innerHeight",
    };
    format!(
        r#"
(() => {{
  const before = window.scrollY;
  window.scrollBy(0, {dy});
  const moved = Math.abs(window.scrollY - before) > 1;
  return JSON.stringify(moved);
}})()
"#
    )
}

pub fn scroll_to_element_js(selector: &str) -> String {
    let sel = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into());
    format!(
        r#"
(() => {{
  const el = document.querySelector({sel});
  if (!el) return JSON.stringify(false);
  el.scrollIntoView({{ block: 'center' }});
  return JSON.stringify(true);
}})()
"#
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElementDescriptor {
    pub index: usize,
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub parent_index: Option<usize>,
    pub text: String,
    pub rect: Rect,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomSnapshot {
    pub elements: Vec<ElementDescriptor>,
    pub viewport_height: f64,
    pub viewport_width: f64,
    pub scroll_y: f64,
}

impl ElementDescriptor {
    fn is_visible(&self) -> bool {
        self.rect.width > 0.0 && self.rect.height > 0.0
    }

    fn is_below_viewport(&self, viewport_height: f64) -> bool {
        self.rect.top >= viewport_height
    }
}

impl DomSnapshot {
    fn children_of(&self, parent: usize) -> Vec<&ElementDescriptor> {
        self.elements
            .iter()
            .filter(|e| e.parent_index == Some(parent))
            .collect()
    }

    fn ancestors(&self, index: usize) -> Vec<usize> {
        let mut chain = vec![index];
        let mut cur = self.elements.get(index).and_then(|e| e.parent_index);
        while let Some(p) = cur {
            chain.push(p);
            cur = self.elements.get(p).and_then(|e| e.parent_index);
        }
        chain
    }

    /// Resolve each section to the smallest (deepest) visible element whose
    /// visible text contains it, enforcing document order across sections.
    /// Returns the resolved element indices in section order, skipping
    /// unresolved sections, plus the count resolved.
    fn resolve_sections(&self, sections: &[String]) -> Vec<Option<usize>> {
        let mut resolved = Vec::with_capacity(sections.len());
        let mut floor = 0usize; // document order: an element's index as a proxy for position

        for section in sections {
            let candidate = self
                .elements
                .iter()
                .filter(|e| e.is_visible() && e.index >= floor)
                .filter(|e| text_match::match_ratio(&[section.clone()], &e.text) >= text_match::DECISION_THRESHOLD)
                // smallest (deepest / most specific): fewest descendants ~= shortest text
                .min_by_key(|e| e.text.len());

            match candidate {
                Some(el) => {
                    floor = el.index;
                    resolved.push(Some(el.index));
                }
                None => resolved.push(None),
            }
        }
        resolved
    }

    /// `find_common_parent`: resolve sections, then ascend to the lowest
    /// ancestor containing all resolved elements. Succeeds only if at least
    /// `threshold` of sections resolved.
    pub fn find_common_parent(&self, sections: &[String], threshold: f64) -> Option<usize> {
        let resolved = self.resolve_sections(sections);
        let hits: Vec<usize> = resolved.into_iter().flatten().collect();
        if sections.is_empty() {
            return None;
        }
        let ratio = hits.len() as f64 / sections.len() as f64;
        if ratio < threshold {
            return None;
        }

        let mut common: Option<Vec<usize>> = None;
        for idx in hits {
            let chain = self.ancestors(idx);
            common = Some(match common {
                None => chain,
                Some(prev) => prev.into_iter().filter(|a| chain.contains(a)).collect(),
            });
        }
        // lowest ancestor = the one with the greatest depth, i.e. first
        // element of the intersection ordered by original chain depth.
        common.and_then(|set| {
            set.into_iter()
                .min_by_key(|&idx| usize::MAX - self.ancestors(idx).len())
        })
    }

    /// `get_last_visible_child`: among direct children of `parent`, the
    /// last child currently below the viewport. None if fewer than two
    /// children or none qualifies.
    pub fn get_last_visible_child(&self, parent: usize) -> Option<usize> {
        let children = self.children_of(parent);
        if children.len() < 2 {
            return None;
        }
        children
            .iter()
            .filter(|c| c.is_below_viewport(self.viewport_height))
            .max_by(|a, b| a.rect.top.partial_cmp(&b.rect.top).unwrap())
            .map(|c| c.index)
    }

    /// Stable CSS selector generation: prefer `#id`; else the shortest of
    /// {tag, tag.class+, tag:nth-of-type(n)} unique among siblings; ascend
    /// until an id is found or the body is reached.
    pub fn selector_for(&self, index: usize) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(index);
        while let Some(idx) = cur {
            let el = &self.elements[idx];
            if let Some(id) = &el.id {
                if !id.is_empty() {
                    parts.push(format!("#{id}"));
                    break;
                }
            }
            parts.push(self.local_selector(idx));
            cur = el.parent_index;
        }
        parts.reverse();
        parts.join(" > ")
    }

    fn local_selector(&self, index: usize) -> String {
        let el = &self.elements[index];
        if let Some(parent) = el.parent_index {
            let siblings = self.children_of(parent);
            if siblings
                .iter()
                .filter(|s| s.tag == el.tag)
                .count()
                == 1
            {
                return el.tag.clone();
            }
            if !el.classes.is_empty() {
                let with_class = format!("{}.{}", el.tag, el.classes.join("."));
                let unique = siblings
                    .iter()
                    .filter(|s| s.tag == el.tag && s.classes == el.classes)
                    .count()
                    == 1;
                if unique {
                    return with_class;
                }
            }
            let position = siblings
                .iter()
                .filter(|s| s.tag == el.tag)
                .position(|s| s.index == index)
                .unwrap_or(0)
                + 1;
            format!("{}:nth-of-type({})", el.tag, position)
        } else {
            el.tag.clone()
        }
    }
}

/// The plugin, bound to a live session, dispatching the evaluate/click
/// primitives. Generic over `BrowserSession` rather than `eoka::Page`
/// directly so the Analyzer never links against `eoka`.
pub struct Plugin<'a, B: BrowserSession + ?Sized> {
    session: &'a B,
}

impl<'a, B: BrowserSession + ?Sized> Plugin<'a, B> {
    pub fn new(session: &'a B) -> Self {
        Self { session }
    }

    pub async fn snapshot(&self) -> Result<DomSnapshot> {
        let value = self.session.evaluate(SNAPSHOT_JS).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn scroll_to_next_view(&self, direction: Direction) -> Result<bool> {
        let value = self
            .session
            .evaluate(&scroll_to_next_view_js(direction))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn scroll_to_element(&self, selector: &str) -> Result<bool> {
        let value = self.session.evaluate(&scroll_to_element_js(selector)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.session.click(x, y).await
    }

    /// Current viewport dimensions, for de-normalizing a point the vision
    /// LLM reported as a 0..1 fraction of the visible page.
    pub async fn viewport(&self) -> Result<(f64, f64)> {
        let snapshot = self.snapshot().await?;
        Ok((snapshot.viewport_width, snapshot.viewport_height))
    }

    /// `find_common_parent` against a freshly captured snapshot; returns a
    /// stable selector rather than a raw index.
    pub async fn find_common_parent(
        &self,
        sections: &[String],
        threshold: f64,
    ) -> Result<Option<String>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .find_common_parent(sections, threshold)
            .map(|idx| snapshot.selector_for(idx)))
    }

    pub async fn get_last_visible_child(&self, parent_selector: &str) -> Result<Option<String>> {
        let snapshot = self.snapshot().await?;
        let Some(parent_idx) = snapshot
            .elements
            .iter()
            .find(|e| snapshot.selector_for(e.index) == parent_selector)
            .map(|e| e.index)
        else {
            return Ok(None);
        };
        Ok(snapshot
            .get_last_visible_child(parent_idx)
            .map(|idx| snapshot.selector_for(idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(index: usize, tag: &str, parent: Option<usize>, text: &str, top: f64) -> ElementDescriptor {
        ElementDescriptor {
            index,
            tag: tag.to_string(),
            id: None,
            classes: vec![],
            parent_index: parent,
            text: text.to_string(),
            rect: Rect {
                top,
                left: 0.0,
                width: 100.0,
                height: 20.0,
            },
        }
    }

    fn snapshot_with(elements: Vec<ElementDescriptor>) -> DomSnapshot {
        DomSnapshot {
            elements,
            viewport_height: 800.0,
            viewport_width: 1280.0,
            scroll_y: 0.0,
        }
    }

    #[test]
    fn find_common_parent_resolves_to_lowest_shared_ancestor() {
        let snap = snapshot_with(vec![
            el(0, "div", None, "root", 0.0),
            el(1, "div", Some(0), "grid", 0.0),
            el(2, "span", Some(1), "Widget A", 10.0),
            el(3, "span", Some(1), "Widget B", 30.0),
        ]);
        let sections = vec!["Widget A".to_string(), "Widget B".to_string()];
        let parent = snap.find_common_parent(&sections, 0.8);
        assert_eq!(parent, Some(1));
    }

    #[test]
    fn find_common_parent_fails_below_threshold() {
        let snap = snapshot_with(vec![
            el(0, "div", None, "root", 0.0),
            el(1, "span", Some(0), "Widget A", 10.0),
        ]);
        let sections = vec!["Widget A".to_string(), "Nonexistent Text".to_string()];
        assert_eq!(snap.find_common_parent(&sections, 0.8), None);
    }

    #[test]
    fn last_visible_child_requires_at_least_two_children() {
        let snap = snapshot_with(vec![
            el(0, "div", None, "root", 0.0),
            el(1, "span", Some(0), "only child", 900.0),
        ]);
        assert_eq!(snap.get_last_visible_child(0), None);
    }

    #[test]
    fn last_visible_child_picks_lowest_below_viewport() {
        let snap = snapshot_with(vec![
            el(0, "div", None, "root", 0.0),
            el(1, "span", Some(0), "a", 100.0), // above viewport
            el(2, "span", Some(0), "b", 900.0), // below viewport
            el(3, "span", Some(0), "c", 1200.0), // further below
        ]);
        assert_eq!(snap.get_last_visible_child(0), Some(3));
    }

    #[test]
    fn selector_prefers_id() {
        let mut snap = snapshot_with(vec![el(0, "div", None, "root", 0.0)]);
        snap.elements[0].id = Some("app".to_string());
        assert_eq!(snap.selector_for(0), "#app");
    }

    #[test]
    fn selector_falls_back_to_nth_of_type_when_ambiguous() {
        let snap = snapshot_with(vec![
            el(0, "div", None, "root", 0.0),
            el(1, "li", Some(0), "one", 0.0),
            el(2, "li", Some(0), "two", 20.0),
        ]);
        assert_eq!(snap.selector_for(2), "div > li:nth-of-type(2)");
    }
}
