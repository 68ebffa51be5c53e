//! In-memory stand-in for the editor page.
//!
//! The "DOM" is a tree keyed by the exact selector strings the sequencer
//! asks for. Every synthetic action is recorded, and reactions let a test
//! make the page respond (a dialog opening after a click, an image
//! disappearing after a confirm).

use async_trait::async_trait;
use base64::Engine;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::config::Decoration;
use crate::page::{ElementInfo, ElementRef, PageError, TargetPage};
use crate::types::ImagePayload;

pub fn sample_png_url() -> String {
    let bytes = [0x89u8, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeNode {
    pub text: String,
    pub classes: Vec<String>,
    pub marked: bool,
    pub children: BTreeMap<String, Vec<FakeNode>>,
}

impl FakeNode {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn with(mut self, selector: &str, nodes: Vec<FakeNode>) -> Self {
        self.children.insert(selector.to_string(), nodes);
        self
    }

    fn info(&self) -> ElementInfo {
        ElementInfo {
            text: self.text.clone(),
            classes: self.classes.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeDom {
    roots: BTreeMap<String, Vec<FakeNode>>,
}

impl FakeDom {
    pub fn set(&mut self, selector: &str, nodes: Vec<FakeNode>) {
        self.roots.insert(selector.to_string(), nodes);
    }

    pub fn remove(&mut self, selector: &str) {
        self.roots.remove(selector);
    }

    pub fn count(&self, selector: &str) -> usize {
        self.roots.get(selector).map_or(0, Vec::len)
    }

    fn resolve(&self, target: &ElementRef) -> Option<&FakeNode> {
        let (first, rest) = target.path().split_first()?;
        let mut node = self.roots.get(&first.selector)?.get(first.index)?;
        for step in rest {
            node = node.children.get(&step.selector)?.get(step.index)?;
        }
        Some(node)
    }

    fn resolve_mut(&mut self, target: &ElementRef) -> Option<&mut FakeNode> {
        let (first, rest) = target.path().split_first()?;
        let mut node = self.roots.get_mut(&first.selector)?.get_mut(first.index)?;
        for step in rest {
            node = node.children.get_mut(&step.selector)?.get_mut(step.index)?;
        }
        Some(node)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PointerClick(ElementRef),
    Click(ElementRef),
    ScrollIntoView(ElementRef),
    SetFiles {
        target: ElementRef,
        name: String,
        mime: String,
    },
    DropFiles {
        target: ElementRef,
        name: String,
        mime: String,
    },
    Decorate(ElementRef),
    PostMessage(String),
}

type Reaction = Box<dyn FnMut(&Action, &mut FakeDom) + Send>;

#[derive(Default)]
struct FakeState {
    dom: FakeDom,
    actions: Vec<Action>,
    reactions: Vec<Reaction>,
    host: String,
    detached: bool,
}

pub struct FakePage {
    state: Mutex<FakeState>,
}

impl FakePage {
    pub fn new(host: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                host: host.to_string(),
                ..FakeState::default()
            }),
        }
    }

    /// The tab now shows a document from `host`; the DOM is left as is.
    pub fn navigate(&self, host: &str) {
        self.state.lock().unwrap().host = host.to_string();
    }

    pub fn set(&self, selector: &str, nodes: Vec<FakeNode>) {
        self.state.lock().unwrap().dom.set(selector, nodes);
    }

    pub fn on(&self, reaction: impl FnMut(&Action, &mut FakeDom) + Send + 'static) {
        self.state.lock().unwrap().reactions.push(Box::new(reaction));
    }

    /// Every later call fails as if the tab had been closed.
    pub fn detach(&self) {
        self.state.lock().unwrap().detached = true;
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn uploads(&self) -> Vec<Action> {
        self.actions()
            .into_iter()
            .filter(|a| matches!(a, Action::SetFiles { .. } | Action::DropFiles { .. }))
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::PostMessage(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    fn check_attached(state: &FakeState) -> Result<(), PageError> {
        if state.detached {
            Err(PageError::Detached("fake tab closed".into()))
        } else {
            Ok(())
        }
    }

    /// Record `action` against `target` and let reactions respond.
    fn perform(&self, target: Option<&ElementRef>, action: Action) -> Result<(), PageError> {
        let mut guard = self.state.lock().unwrap();
        Self::check_attached(&guard)?;
        if let Some(target) = target {
            if guard.dom.resolve(target).is_none() {
                return Err(PageError::ElementMissing(target.to_string()));
            }
        }
        let FakeState {
            dom,
            actions,
            reactions,
            ..
        } = &mut *guard;
        for reaction in reactions.iter_mut() {
            reaction(&action, dom);
        }
        actions.push(action);
        Ok(())
    }
}

#[async_trait]
impl TargetPage for FakePage {
    async fn host(&self) -> Result<String, PageError> {
        let state = self.state.lock().unwrap();
        Self::check_attached(&state)?;
        Ok(state.host.clone())
    }

    async fn query(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementInfo>, PageError> {
        let state = self.state.lock().unwrap();
        Self::check_attached(&state)?;
        let nodes = match scope {
            None => state.dom.roots.get(selector),
            Some(scope) => match state.dom.resolve(scope) {
                Some(node) => node.children.get(selector),
                None => None,
            },
        };
        Ok(nodes
            .map(|nodes| nodes.iter().map(FakeNode::info).collect())
            .unwrap_or_default())
    }

    async fn pointer_click(&self, target: &ElementRef) -> Result<(), PageError> {
        self.perform(Some(target), Action::PointerClick(target.clone()))
    }

    async fn click(&self, target: &ElementRef) -> Result<(), PageError> {
        self.perform(Some(target), Action::Click(target.clone()))
    }

    async fn scroll_into_view(&self, target: &ElementRef) -> Result<(), PageError> {
        self.perform(Some(target), Action::ScrollIntoView(target.clone()))
    }

    async fn set_input_files(
        &self,
        input: &ElementRef,
        file: &ImagePayload,
    ) -> Result<(), PageError> {
        self.perform(
            Some(input),
            Action::SetFiles {
                target: input.clone(),
                name: file.file_name().to_string(),
                mime: file.mime.clone(),
            },
        )
    }

    async fn drop_files(&self, target: &ElementRef, file: &ImagePayload) -> Result<(), PageError> {
        self.perform(
            Some(target),
            Action::DropFiles {
                target: target.clone(),
                name: file.file_name().to_string(),
                mime: file.mime.clone(),
            },
        )
    }

    async fn decorate_once(
        &self,
        target: &ElementRef,
        _decoration: &Decoration,
    ) -> Result<bool, PageError> {
        {
            let mut state = self.state.lock().unwrap();
            Self::check_attached(&state)?;
            let node = state
                .dom
                .resolve_mut(target)
                .ok_or_else(|| PageError::ElementMissing(target.to_string()))?;
            if node.marked {
                return Ok(false);
            }
            node.marked = true;
        }
        self.perform(None, Action::Decorate(target.clone()))?;
        Ok(true)
    }

    async fn post_message(&self, type_tag: &str) -> Result<(), PageError> {
        self.perform(None, Action::PostMessage(type_tag.to_string()))
    }
}
