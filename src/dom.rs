use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use headless_chrome::Tab;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Decoration;
use crate::page::{ElementInfo, ElementRef, PageError, TargetPage};
use crate::types::ImagePayload;

/// Helpers shared by every script evaluated in the editor page.
///
/// `resolve` walks an [`ElementRef`] path from the document. `file` and
/// `transfer` build the `File`/`DataTransfer` pair both upload paths use.
const PRELUDE_JS: &str = r#"
const __mp = {
  resolve(path) {
    let scope = document;
    for (const step of path) {
      const found = scope.querySelectorAll(step.selector)[step.index];
      if (!found) return null;
      scope = found;
    }
    return scope === document ? null : scope;
  },
  file(b64, name, mime) {
    const raw = atob(b64);
    const bytes = new Uint8Array(raw.length);
    for (let i = 0; i < raw.length; i++) bytes[i] = raw.charCodeAt(i);
    return new File([bytes], name, { type: mime });
  },
  transfer(file) {
    const dt = new DataTransfer();
    dt.items.add(file);
    return dt;
  },
};
"#;

/// What every script hands back, JSON-encoded.
#[derive(Debug, Default, Deserialize)]
struct ScriptReply {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    value: Value,
}

/// Wrap `body` (which `return`s a reply object) into a self-contained expression.
fn wrap(body: &str) -> String {
    format!(
        "(() => {{\n{PRELUDE_JS}\nconst reply = (() => {{\n{body}\n}})();\nreturn JSON.stringify(reply ?? {{}});\n}})()"
    )
}

/// JSON literal of `value`, safe to splice into a script.
fn js<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Resolve `target` into `el`, bailing out with `missing` when it is gone.
fn with_element(target: &ElementRef, body: &str) -> String {
    wrap(&format!(
        "const el = __mp.resolve({path});\nif (!el) return {{ missing: true }};\n{body}",
        path = js(target.path())
    ))
}

fn host_script() -> String {
    wrap("return { value: location.hostname };")
}

fn query_script(scope: Option<&ElementRef>, selector: &str) -> String {
    let scope = scope.map(|s| js(s.path())).unwrap_or_else(|| "null".into());
    wrap(&format!(
        r#"const scopePath = {scope};
const root = scopePath === null ? document : __mp.resolve(scopePath);
if (!root) return {{ value: [] }};
return {{ value: Array.from(root.querySelectorAll({selector})).map((el) => ({{
  text: String(el.innerText ?? el.textContent ?? ''),
  classes: Array.from(el.classList ?? []),
}})) }};"#,
        selector = js(selector)
    ))
}

fn pointer_click_script(target: &ElementRef) -> String {
    with_element(
        target,
        r#"const r = el.getBoundingClientRect();
const opts = {
  bubbles: true, cancelable: true, composed: true, view: window,
  clientX: r.left + r.width / 2, clientY: r.top + r.height / 2,
  button: 0, pointerId: 1, pointerType: 'mouse', isPrimary: true,
};
el.dispatchEvent(new PointerEvent('pointerdown', opts));
el.dispatchEvent(new PointerEvent('pointerup', opts));
el.dispatchEvent(new MouseEvent('click', opts));
return {};"#,
    )
}

fn click_script(target: &ElementRef) -> String {
    with_element(target, "el.click();\nreturn {};")
}

fn scroll_script(target: &ElementRef) -> String {
    with_element(
        target,
        "el.scrollIntoView({ behavior: 'instant', block: 'center', inline: 'center' });\nreturn {};",
    )
}

fn file_expr(file: &ImagePayload) -> String {
    format!(
        "__mp.file({}, {}, {})",
        js(&STANDARD.encode(&file.bytes)),
        js(file.file_name()),
        js(&file.mime)
    )
}

fn set_files_script(input: &ElementRef, file: &ImagePayload) -> String {
    with_element(
        input,
        &format!(
            r#"const dt = __mp.transfer({file});
el.files = dt.files;
el.dispatchEvent(new Event('input', {{ bubbles: true }}));
el.dispatchEvent(new Event('change', {{ bubbles: true }}));
return {{}};"#,
            file = file_expr(file)
        ),
    )
}

fn drop_script(target: &ElementRef, file: &ImagePayload) -> String {
    with_element(
        target,
        &format!(
            r#"const dt = __mp.transfer({file});
for (const type of ['dragenter', 'dragover', 'drop']) {{
  el.dispatchEvent(new DragEvent(type, {{ bubbles: true, cancelable: true, dataTransfer: dt }}));
}}
return {{}};"#,
            file = file_expr(file)
        ),
    )
}

fn decorate_script(target: &ElementRef, decoration: &Decoration) -> String {
    with_element(
        target,
        &format!(
            r#"if (el.hasAttribute({marker})) return {{ value: false }};
el.setAttribute({marker}, '1');
el.style.cssText += {css};
el.title = {tooltip};
return {{ value: true }};"#,
            marker = js(&decoration.marker_attribute),
            css = js(&format!(";{}", decoration.css)),
            tooltip = js(&decoration.tooltip)
        ),
    )
}

fn post_message_script(type_tag: &str) -> String {
    wrap(&format!(
        "const frame = window.parent && window.parent !== window ? window.parent : window;\nframe.postMessage({{ type: {tag} }}, '*');\nreturn {{}};",
        tag = js(type_tag)
    ))
}

/// Map a DevTools failure onto the page error taxonomy.
fn classify(error: anyhow::Error) -> PageError {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();
    if lower.contains("no target")
        || lower.contains("closed")
        || lower.contains("detached")
        || lower.contains("connection")
    {
        PageError::Detached(message)
    } else {
        PageError::Script(message)
    }
}

/// The editor, as seen through a DevTools tab.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    /// Evaluate on the blocking pool; `headless_chrome` calls block.
    async fn eval(&self, script: String) -> Result<ScriptReply, PageError> {
        let tab = self.tab.clone();
        let result = tokio::task::spawn_blocking(move || tab.evaluate(&script, false))
            .await
            .map_err(|e| PageError::Script(format!("evaluation task failed: {e}")))?
            .map_err(classify)?;

        let raw = result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| PageError::UnexpectedResult(format!("{:?}", result.value)))?;
        serde_json::from_str(raw).map_err(|e| PageError::UnexpectedResult(format!("{e}: {raw}")))
    }

    async fn act(&self, target: &ElementRef, script: String) -> Result<ScriptReply, PageError> {
        let reply = self.eval(script).await?;
        if reply.missing {
            return Err(PageError::ElementMissing(target.to_string()));
        }
        Ok(reply)
    }
}

#[async_trait]
impl TargetPage for ChromePage {
    async fn host(&self) -> Result<String, PageError> {
        let reply = self.eval(host_script()).await?;
        reply
            .value
            .as_str()
            .map(String::from)
            .ok_or_else(|| PageError::UnexpectedResult(reply.value.to_string()))
    }

    async fn query(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementInfo>, PageError> {
        let reply = self.eval(query_script(scope, selector)).await?;
        serde_json::from_value(reply.value).map_err(|e| PageError::UnexpectedResult(e.to_string()))
    }

    async fn pointer_click(&self, target: &ElementRef) -> Result<(), PageError> {
        self.act(target, pointer_click_script(target)).await.map(drop)
    }

    async fn click(&self, target: &ElementRef) -> Result<(), PageError> {
        self.act(target, click_script(target)).await.map(drop)
    }

    async fn scroll_into_view(&self, target: &ElementRef) -> Result<(), PageError> {
        self.act(target, scroll_script(target)).await.map(drop)
    }

    async fn set_input_files(
        &self,
        input: &ElementRef,
        file: &ImagePayload,
    ) -> Result<(), PageError> {
        self.act(input, set_files_script(input, file)).await.map(drop)
    }

    async fn drop_files(&self, target: &ElementRef, file: &ImagePayload) -> Result<(), PageError> {
        self.act(target, drop_script(target, file)).await.map(drop)
    }

    async fn decorate_once(
        &self,
        target: &ElementRef,
        decoration: &Decoration,
    ) -> Result<bool, PageError> {
        let reply = self.act(target, decorate_script(target, decoration)).await?;
        Ok(reply.value.as_bool().unwrap_or(false))
    }

    async fn post_message(&self, type_tag: &str) -> Result<(), PageError> {
        self.eval(post_message_script(type_tag)).await.map(drop)
    }
}
