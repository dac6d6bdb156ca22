//! Scripted backend: renders page scripts into a class-tagged node tree and
//! answers the control-surface contract against it.
//!
//! Mutations (lazy batches, pagination, panel reveals) happen synchronously in
//! response to focus and click calls, so waits are evaluated once: a condition
//! that does not hold now can never hold before the deadline, and the wait
//! reports `WaitTimeout` immediately. Tests stay fast, the contract stays
//! honest.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::classes;
use crate::script::{
    BlockScript, GroupScript, HarvestScript, MatchDetailScript, OddsListingScript, OddsRowScript,
    PageScript, SearchResultsScript,
};
use crate::{Backend, BackendError, Boundary, Condition, ContextId, Element};

#[derive(Debug, Clone)]
enum ClickAction {
    /// Remove the element (consent and expand controls are one-shot).
    Dismiss,
    /// Remove the control and attach the pre-rendered panel nodes.
    Reveal(Vec<u64>),
    /// Advance the paged listing.
    NextPage,
}

#[derive(Debug, Clone)]
struct NodeData {
    class: String,
    text: String,
    clickable: bool,
    children: Vec<u64>,
    action: Option<ClickAction>,
}

#[derive(Debug)]
struct LazyState {
    /// Hidden groups above the window, top to bottom.
    above: Vec<u64>,
    /// Hidden groups below the window, top to bottom.
    below: Vec<u64>,
    batch: usize,
}

#[derive(Debug)]
struct PagingState {
    pages: Vec<Vec<u64>>,
    current: usize,
    next_control: u64,
}

#[derive(Debug)]
struct ContextState {
    id: u64,
    roots: Vec<u64>,
    lazy: Option<LazyState>,
    paging: Option<PagingState>,
}

#[derive(Debug)]
struct SimState {
    next_node: u64,
    next_context: u64,
    nodes: HashMap<u64, NodeData>,
    /// Context stack; the last entry is active.
    contexts: Vec<ContextState>,
    closed: bool,
}

impl SimState {
    fn alloc(
        &mut self,
        class: &str,
        text: &str,
        clickable: bool,
        children: Vec<u64>,
        action: Option<ClickAction>,
    ) -> u64 {
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(
            id,
            NodeData {
                class: class.to_string(),
                text: text.to_string(),
                clickable,
                children,
                action,
            },
        );
        id
    }

    fn leaf(&mut self, class: &str, text: &str) -> u64 {
        self.alloc(class, text, false, Vec::new(), None)
    }

    fn active(&self) -> Result<&ContextState, BackendError> {
        self.contexts.last().ok_or(BackendError::NoSuchContext)
    }

    fn active_mut(&mut self) -> Result<&mut ContextState, BackendError> {
        self.contexts.last_mut().ok_or(BackendError::NoSuchContext)
    }

    fn collect(&self, from: &[u64], class: &str, out: &mut Vec<u64>) {
        for id in from {
            if let Some(node) = self.nodes.get(id) {
                if node.class == class {
                    out.push(*id);
                }
                self.collect(&node.children, class, out);
            }
        }
    }

    fn matching(&self, class: &str) -> Result<Vec<u64>, BackendError> {
        let roots = self.active()?.roots.clone();
        let mut out = Vec::new();
        self.collect(&roots, class, &mut out);
        Ok(out)
    }

    fn subtree_text(&self, id: u64, out: &mut Vec<String>) {
        if let Some(node) = self.nodes.get(&id) {
            if !node.text.is_empty() {
                out.push(node.text.clone());
            }
            for child in &node.children {
                self.subtree_text(*child, out);
            }
        }
    }

    fn reachable(&self, from: &[u64], id: u64) -> bool {
        from.iter().any(|root| {
            *root == id
                || self
                    .nodes
                    .get(root)
                    .is_some_and(|n| self.reachable(&n.children, id))
        })
    }

    fn visible(&self, id: u64) -> Result<(), BackendError> {
        let roots = &self.active()?.roots;
        if self.reachable(roots, id) {
            Ok(())
        } else {
            Err(BackendError::StaleElement)
        }
    }

    fn render_group(&mut self, group: &GroupScript) -> u64 {
        let mut children = Vec::new();
        if let Some(label) = &group.round_label {
            children.push(self.leaf(classes::ROUND_LABEL, label));
        }
        for block in &group.blocks {
            children.push(self.render_block(block));
        }
        self.alloc(classes::ROUND_GROUP, "", false, children, None)
    }

    fn render_block(&mut self, block: &BlockScript) -> u64 {
        if block.empty {
            return self.alloc(classes::MATCH_BLOCK, "", false, Vec::new(), None);
        }
        let mut children = Vec::new();
        let marker = if block.finished {
            vec![self.leaf(classes::SCORE_MARKER, "FT")]
        } else {
            Vec::new()
        };
        children.push(self.alloc(classes::RESULT_LINE, "", false, marker, None));
        children.push(self.leaf(classes::DATE_TEXT, &block.date_text));
        children.push(self.team_cell(block.score_home, &block.home));
        if !block.malformed {
            children.push(self.team_cell(block.score_away, &block.away));
        }
        self.alloc(classes::MATCH_BLOCK, "", false, children, None)
    }

    fn team_cell(&mut self, score: Option<u32>, name: &str) -> u64 {
        let text = match score {
            Some(goals) => format!("{goals}\n{name}"),
            None => format!("\u{2013}\n{name}"),
        };
        self.leaf(classes::TEAM_CELL, &text)
    }

    fn render_odds_row(&mut self, row: &OddsRowScript) -> u64 {
        let mut children = Vec::new();
        if let Some(date) = &row.date_text {
            children.push(self.leaf(classes::ODDS_DATE, date));
        }
        children.push(self.leaf(classes::ODDS_HOME, &row.home));
        children.push(self.leaf(classes::ODDS_AWAY, &row.away));
        if let Some(score) = &row.score_text {
            children.push(self.leaf(classes::ODDS_SCORE, score));
        }
        self.alloc(classes::ODDS_ROW, "", false, children, None)
    }

    fn render_search(&mut self, script: &SearchResultsScript) -> ContextParts {
        let mut roots = Vec::new();
        if script.consent_button {
            roots.push(self.alloc(
                classes::CONSENT_BUTTON,
                "Accept all",
                true,
                Vec::new(),
                Some(ClickAction::Dismiss),
            ));
        }
        if let Some(control) = &script.expand_control {
            roots.push(self.alloc(
                classes::EXPAND_CONTROL,
                "Weitere Begegnungen",
                control.clickable,
                Vec::new(),
                Some(ClickAction::Dismiss),
            ));
        }
        for group in &script.groups {
            let id = self.render_group(group);
            roots.push(id);
        }
        let above = script
            .groups_above
            .iter()
            .map(|g| self.render_group(g))
            .collect();
        let below = script
            .groups_below
            .iter()
            .map(|g| self.render_group(g))
            .collect();
        ContextParts {
            roots,
            lazy: Some(LazyState {
                above,
                below,
                batch: script.reveal_batch.max(1),
            }),
            paging: None,
        }
    }

    fn render_match_detail(&mut self, script: &MatchDetailScript) -> ContextParts {
        let mut roots = Vec::new();
        if script.details_control {
            let rows = script
                .stat_rows
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|text| self.leaf(classes::STAT_ROW, text))
                .collect();
            roots.push(self.alloc(
                classes::DETAILS_CONTROL,
                "Mehr zu diesem Spiel",
                true,
                Vec::new(),
                Some(ClickAction::Reveal(rows)),
            ));
        }
        ContextParts {
            roots,
            lazy: None,
            paging: None,
        }
    }

    fn render_odds_listing(&mut self, script: &OddsListingScript) -> ContextParts {
        let pages: Vec<Vec<u64>> = script
            .pages
            .iter()
            .map(|page| page.rows.iter().map(|r| self.render_odds_row(r)).collect())
            .collect();
        let next_control = self.alloc(
            classes::ODDS_NEXT_PAGE,
            "Next",
            true,
            Vec::new(),
            Some(ClickAction::NextPage),
        );
        let mut roots = Vec::new();
        if script.consent_button {
            roots.push(self.alloc(
                classes::CONSENT_BUTTON,
                "I Accept",
                true,
                Vec::new(),
                Some(ClickAction::Dismiss),
            ));
        }
        roots.extend(pages.first().cloned().unwrap_or_default());
        if pages.len() > 1 {
            roots.push(next_control);
        }
        ContextParts {
            roots,
            lazy: None,
            paging: Some(PagingState {
                pages,
                current: 0,
                next_control,
            }),
        }
    }

    fn render_page(&mut self, page: Option<&PageScript>) -> ContextParts {
        match page {
            Some(PageScript::SearchResults(s)) => {
                let s = s.clone();
                self.render_search(&s)
            }
            Some(PageScript::MatchDetail(s)) => {
                let s = s.clone();
                self.render_match_detail(&s)
            }
            Some(PageScript::OddsListing(s)) => {
                let s = s.clone();
                self.render_odds_listing(&s)
            }
            Some(PageScript::OddsDetail(s)) => {
                let quotes = s.quotes.clone();
                let mut rows = Vec::with_capacity(quotes.len());
                for quote in &quotes {
                    let children = vec![
                        self.leaf(classes::ODDS_QUOTE_SOURCE, &quote.source),
                        self.leaf(classes::ODDS_QUOTE_HOME, &quote.home.to_string()),
                        self.leaf(classes::ODDS_QUOTE_DRAW, &quote.draw.to_string()),
                        self.leaf(classes::ODDS_QUOTE_AWAY, &quote.away.to_string()),
                    ];
                    rows.push(self.alloc(classes::ODDS_QUOTE_ROW, "", false, children, None));
                }
                ContextParts {
                    roots: rows,
                    lazy: None,
                    paging: None,
                }
            }
            Some(PageScript::Blank) | None => ContextParts {
                roots: Vec::new(),
                lazy: None,
                paging: None,
            },
        }
    }

    fn reveal_towards(&mut self, id: u64) -> Result<(), BackendError> {
        let groups = self.matching(classes::ROUND_GROUP)?;
        let at_first = groups.first() == Some(&id);
        let at_last = groups.last() == Some(&id);
        if !at_first && !at_last {
            return Ok(());
        }
        let context = self.active_mut()?;
        let Some(lazy) = context.lazy.as_mut() else {
            return Ok(());
        };
        if at_first && !lazy.above.is_empty() {
            let insert_at = context
                .roots
                .iter()
                .position(|r| *r == id)
                .unwrap_or(context.roots.len());
            for _ in 0..lazy.batch {
                match lazy.above.pop() {
                    Some(group) => context.roots.insert(insert_at, group),
                    None => break,
                }
            }
        } else if at_last && !lazy.below.is_empty() {
            for _ in 0..lazy.batch {
                match (!lazy.below.is_empty()).then(|| lazy.below.remove(0)) {
                    Some(group) => context.roots.push(group),
                    None => break,
                }
            }
        }
        Ok(())
    }

    fn advance_page(&mut self) -> Result<(), BackendError> {
        let context = self.active_mut()?;
        let Some(paging) = context.paging.as_mut() else {
            return Err(BackendError::NotInteractable);
        };
        if paging.current + 1 >= paging.pages.len() {
            return Err(BackendError::NotInteractable);
        }
        paging.current += 1;
        let mut roots = paging.pages[paging.current].clone();
        if paging.current + 1 < paging.pages.len() {
            roots.push(paging.next_control);
        }
        context.roots = roots;
        Ok(())
    }
}

struct ContextParts {
    roots: Vec<u64>,
    lazy: Option<LazyState>,
    paging: Option<PagingState>,
}

/// In-memory backend driven by a [`HarvestScript`].
pub struct ScriptedBackend {
    script: HarvestScript,
    state: Mutex<SimState>,
}

impl ScriptedBackend {
    pub fn new(script: HarvestScript) -> Self {
        let state = SimState {
            next_node: 1,
            next_context: 1,
            nodes: HashMap::new(),
            contexts: vec![ContextState {
                id: 0,
                roots: Vec::new(),
                lazy: None,
                paging: None,
            }],
            closed: false,
        };
        Self {
            script,
            state: Mutex::new(state),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(HarvestScript::load(path)?))
    }

    /// Open context count; tests assert the scoped open/close discipline with it.
    pub fn open_contexts(&self) -> usize {
        self.state.lock().expect("backend state poisoned").contexts.len()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, BackendError> {
        let state = self.state.lock().expect("backend state poisoned");
        if state.closed {
            return Err(BackendError::SessionClosed);
        }
        Ok(state)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn navigate(&self, url: &str) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let page = self.script.page(url).cloned();
        let parts = state.render_page(page.as_ref());
        let context = state.active_mut()?;
        context.roots = parts.roots;
        context.lazy = parts.lazy;
        context.paging = parts.paging;
        Ok(())
    }

    async fn find_all(&self, class: &str) -> Result<Vec<Element>, BackendError> {
        let state = self.lock()?;
        Ok(state.matching(class)?.into_iter().map(Element).collect())
    }

    async fn find_within(
        &self,
        parent: &Element,
        class: &str,
    ) -> Result<Vec<Element>, BackendError> {
        let state = self.lock()?;
        state.visible(parent.0)?;
        let children = state
            .nodes
            .get(&parent.0)
            .ok_or(BackendError::StaleElement)?
            .children
            .clone();
        let mut out = Vec::new();
        state.collect(&children, class, &mut out);
        Ok(out.into_iter().map(Element).collect())
    }

    async fn read_text(&self, element: &Element) -> Result<String, BackendError> {
        let state = self.lock()?;
        state.visible(element.0)?;
        let mut parts = Vec::new();
        state.subtree_text(element.0, &mut parts);
        Ok(parts.join("\n"))
    }

    async fn click(&self, element: &Element) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.visible(element.0)?;
        let node = state
            .nodes
            .get(&element.0)
            .ok_or(BackendError::StaleElement)?
            .clone();
        if !node.clickable {
            return Err(BackendError::NotInteractable);
        }
        match node.action {
            Some(ClickAction::Dismiss) => {
                let context = state.active_mut()?;
                context.roots.retain(|r| *r != element.0);
            }
            Some(ClickAction::Reveal(panel)) => {
                let context = state.active_mut()?;
                context.roots.retain(|r| *r != element.0);
                context.roots.extend(panel);
            }
            Some(ClickAction::NextPage) => state.advance_page()?,
            None => {}
        }
        Ok(())
    }

    async fn move_focus_to(&self, element: &Element) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.visible(element.0)?;
        state.reveal_towards(element.0)
    }

    async fn wait_until(
        &self,
        condition: Condition,
        _deadline: Duration,
    ) -> Result<Element, BackendError> {
        let state = self.lock()?;
        let timeout = || BackendError::WaitTimeout {
            condition: condition.to_string(),
        };
        match &condition {
            Condition::PresenceOf(class) => state
                .matching(class)?
                .first()
                .copied()
                .map(Element)
                .ok_or_else(timeout),
            Condition::Clickable(class) => state
                .matching(class)?
                .into_iter()
                .find(|id| state.nodes.get(id).is_some_and(|n| n.clickable))
                .map(Element)
                .ok_or_else(timeout),
            Condition::BoundaryTextDiffers {
                class,
                boundary,
                prior,
            } => {
                let ids = state.matching(class)?;
                let id = match boundary {
                    Boundary::First => ids.first(),
                    Boundary::Last => ids.last(),
                }
                .copied()
                .ok_or_else(timeout)?;
                let mut parts = Vec::new();
                state.subtree_text(id, &mut parts);
                if parts.join("\n") != *prior {
                    Ok(Element(id))
                } else {
                    Err(timeout())
                }
            }
        }
    }

    async fn open_context(&self, url: &str) -> Result<ContextId, BackendError> {
        let mut state = self.lock()?;
        let page = self.script.page(url).cloned();
        let parts = state.render_page(page.as_ref());
        let id = state.next_context;
        state.next_context += 1;
        state.contexts.push(ContextState {
            id,
            roots: parts.roots,
            lazy: parts.lazy,
            paging: parts.paging,
        });
        Ok(ContextId(id))
    }

    async fn close_context(&self, context: ContextId) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let before = state.contexts.len();
        state.contexts.retain(|c| c.id != context.0);
        if state.contexts.len() == before {
            return Err(BackendError::NoSuchContext);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.closed = true;
        Ok(())
    }
}
