//! Seams to the embedded browser
//!
//! [`PageSource`] hands the extraction engine the currently rendered markup;
//! [`BookingPage`] is the small slice of DOM access the autofill engine
//! needs. A real web-view binding implements these by evaluating script in
//! the page. [`SyntheticPage`] is an in-memory implementation backed by
//! `scraper`, used by the CLI for saved pages and by the tests.

use crate::events::InputDescriptor;
use crate::{AssistError, Result};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::future::Future;
use tracing::{debug, info, instrument, warn};

/// Provides snapshots of a page that keeps rendering after load
pub trait PageSource {
    fn snapshot(&mut self) -> impl Future<Output = Result<String>>;
}

/// Position of an input element within the current document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InputHandle(pub usize);

/// Position of a clickable element within the current document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClickHandle(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clickable {
    pub handle: ClickHandle,
    pub text: String,
}

/// Events dispatched after a programmatic value assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    Focus,
    Click,
    Input,
    Change,
    KeyDown(char),
    KeyPress(char),
    KeyUp(char),
    Blur,
}

/// DOM access needed by the autofill engine
pub trait BookingPage {
    fn url(&self) -> &str;

    /// Inputs matching a CSS selector, in document order
    fn query_inputs(&self, selector: &str) -> Vec<InputHandle>;

    /// Visible and enabled
    fn is_interactable(&self, input: InputHandle) -> bool;

    /// Set the value through the element's native property
    fn assign_value(&mut self, input: InputHandle, value: &str);

    fn dispatch(&mut self, input: InputHandle, event: DomEvent);

    fn read_value(&self, input: InputHandle) -> String;

    /// Visible buttons and links with their text
    fn clickables(&self) -> Vec<Clickable>;

    fn click(&mut self, target: ClickHandle);

    fn describe_inputs(&self) -> Vec<InputDescriptor>;

    fn markup(&self) -> String;
}

/// Fetches server-rendered markup over HTTP with a mobile user agent.
///
/// No script runs, so this only sees what the site renders server-side.
pub struct HttpPageSource {
    http_client: Client,
    url: String,
}

impl HttpPageSource {
    pub fn new(url: impl Into<String>, user_agent: &str) -> Result<Self> {
        let http_client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PageSource for HttpPageSource {
    #[instrument(level = "debug", skip(self), fields(url = %self.url))]
    async fn snapshot(&mut self) -> Result<String> {
        let start_time = std::time::Instant::now();
        let response = self.http_client.get(&self.url).send().await?;
        let status = response.status();
        info!(
            status = %status,
            duration_ms = start_time.elapsed().as_millis(),
            "Page request completed"
        );

        if !status.is_success() {
            return Err(AssistError::PageError(format!("{} returned {}", self.url, status)));
        }

        let html = response.text().await?;
        debug!(html_length = html.len(), "Received page markup");
        Ok(html)
    }
}

/// Replays a fixed list of snapshots, then keeps returning the last one
#[derive(Debug, Clone, Default)]
pub struct SnapshotSequence {
    snapshots: Vec<String>,
    served: usize,
}

impl SnapshotSequence {
    pub fn new(snapshots: Vec<String>) -> Self {
        Self { snapshots, served: 0 }
    }

    pub fn served(&self) -> usize {
        self.served
    }
}

impl PageSource for SnapshotSequence {
    async fn snapshot(&mut self) -> Result<String> {
        let index = self.served.min(self.snapshots.len().saturating_sub(1));
        let html = self
            .snapshots
            .get(index)
            .cloned()
            .ok_or_else(|| AssistError::PageError("no snapshots available".to_string()))?;
        self.served += 1;
        Ok(html)
    }
}

#[derive(Debug, Clone)]
struct InputState {
    value: String,
    original: String,
    visible: bool,
    disabled: bool,
    readonly: bool,
    max_len: Option<usize>,
    descriptor: InputDescriptor,
}

#[derive(Debug, Clone)]
struct Transition {
    needle: String,
    url: String,
    html: String,
}

/// In-memory booking page.
///
/// Page-side behaviour it models: `disabled` and hidden inputs are not
/// interactable, `readonly` inputs ignore assignment, and `maxlength`
/// truncates the value when the `input` event fires. Clicking an element
/// whose text contains a registered needle swaps in new markup.
pub struct SyntheticPage {
    url: String,
    document: Html,
    inputs: Vec<InputState>,
    input_selector: Selector,
    clickable_selector: Selector,
    transitions: Vec<Transition>,
    journal: Vec<(InputHandle, DomEvent)>,
    clicked: Vec<String>,
}

const CLICKABLE_SELECTOR: &str = r#"button, a, [role="button"], input[type="button"], input[type="submit"], [class*="btn"], [class*="Btn"]"#;

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AssistError::SelectorError(format!("{}: {:?}", css, e)))
}

impl SyntheticPage {
    pub fn new(url: impl Into<String>, html: &str) -> Result<Self> {
        let mut page = Self {
            url: url.into(),
            document: Html::parse_document(""),
            inputs: Vec::new(),
            input_selector: parse_selector("input")?,
            clickable_selector: parse_selector(CLICKABLE_SELECTOR)?,
            transitions: Vec::new(),
            journal: Vec::new(),
            clicked: Vec::new(),
        };
        page.load(html);
        Ok(page)
    }

    /// Register markup to load when an element whose text contains `needle` is clicked
    pub fn on_click(mut self, needle: &str, url: &str, html: &str) -> Self {
        self.transitions.push(Transition {
            needle: needle.to_string(),
            url: url.to_string(),
            html: html.to_string(),
        });
        self
    }

    /// Texts of everything clicked so far
    pub fn clicked(&self) -> &[String] {
        &self.clicked
    }

    pub fn events_for(&self, input: InputHandle) -> Vec<DomEvent> {
        self.journal
            .iter()
            .filter(|(handle, _)| *handle == input)
            .map(|(_, event)| *event)
            .collect()
    }

    /// Current value of the first input matching `selector`
    pub fn value_of(&self, selector: &str) -> Option<String> {
        self.query_inputs(selector).first().map(|handle| self.read_value(*handle))
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    fn load(&mut self, html: &str) {
        self.document = Html::parse_document(html);
        self.inputs = self
            .document
            .select(&self.input_selector)
            .map(|el| {
                let attr = |name: &str| el.value().attr(name).unwrap_or_default().to_string();
                let value = attr("value");
                InputState {
                    value: value.clone(),
                    original: value,
                    visible: is_rendered(&el),
                    disabled: el.value().attr("disabled").is_some(),
                    readonly: el.value().attr("readonly").is_some(),
                    max_len: el.value().attr("maxlength").and_then(|v| v.trim().parse().ok()),
                    descriptor: InputDescriptor {
                        input_type: attr("type"),
                        name: attr("name"),
                        id: attr("id"),
                        placeholder: attr("placeholder"),
                        visible: is_rendered(&el),
                    },
                }
            })
            .collect();
        self.journal.clear();
        debug!(url = %self.url, inputs = self.inputs.len(), "Synthetic page loaded");
    }

    fn input_position(&self, element: ElementRef<'_>) -> Option<usize> {
        self.document
            .select(&self.input_selector)
            .position(|candidate| candidate == element)
    }

    fn clickable_elements(&self) -> Vec<ElementRef<'_>> {
        self.document
            .select(&self.clickable_selector)
            .filter(is_rendered)
            .collect()
    }
}

/// Hidden inputs, `hidden` attributes and `display:none` on the element or
/// any ancestor all make an element unrendered.
fn is_rendered(element: &ElementRef<'_>) -> bool {
    if element.value().attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return false;
    }
    std::iter::once(*element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .all(|el| {
            if el.value().attr("hidden").is_some() {
                return false;
            }
            let style: String = el
                .value()
                .attr("style")
                .unwrap_or_default()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            !style.contains("display:none") && !style.contains("visibility:hidden")
        })
}

fn element_text(element: &ElementRef<'_>) -> String {
    let text = element.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        element.value().attr("value").unwrap_or_default().trim().to_string()
    } else {
        text
    }
}

impl BookingPage for SyntheticPage {
    fn url(&self) -> &str {
        &self.url
    }

    fn query_inputs(&self, selector: &str) -> Vec<InputHandle> {
        let selector = match parse_selector(selector) {
            Ok(selector) => selector,
            Err(e) => {
                warn!(error = %e, "Skipping unparseable selector");
                return Vec::new();
            }
        };
        self.document
            .select(&selector)
            .filter_map(|el| self.input_position(el))
            .map(InputHandle)
            .collect()
    }

    fn is_interactable(&self, input: InputHandle) -> bool {
        self.inputs
            .get(input.0)
            .is_some_and(|state| state.visible && !state.disabled)
    }

    fn assign_value(&mut self, input: InputHandle, value: &str) {
        if let Some(state) = self.inputs.get_mut(input.0) {
            if state.readonly {
                debug!(input = input.0, "Readonly input ignored assignment");
                return;
            }
            state.value = value.to_string();
        }
    }

    fn dispatch(&mut self, input: InputHandle, event: DomEvent) {
        let Some(state) = self.inputs.get_mut(input.0) else {
            return;
        };
        if event == DomEvent::Input {
            if let Some(max_len) = state.max_len {
                state.value = state.value.chars().take(max_len).collect();
            }
        }
        if state.readonly && event == DomEvent::Change {
            state.value = state.original.clone();
        }
        self.journal.push((input, event));
    }

    fn read_value(&self, input: InputHandle) -> String {
        self.inputs
            .get(input.0)
            .map(|state| state.value.clone())
            .unwrap_or_default()
    }

    fn clickables(&self) -> Vec<Clickable> {
        self.clickable_elements()
            .iter()
            .enumerate()
            .map(|(i, el)| Clickable {
                handle: ClickHandle(i),
                text: element_text(el),
            })
            .collect()
    }

    fn click(&mut self, target: ClickHandle) {
        let Some(text) = self.clickable_elements().get(target.0).map(element_text) else {
            warn!(target = target.0, "Click target no longer present");
            return;
        };
        info!(text = %text, "Clicked element");
        let transition = self
            .transitions
            .iter()
            .find(|t| text.contains(&t.needle))
            .cloned();
        self.clicked.push(text);
        if let Some(transition) = transition {
            self.url = transition.url;
            self.load(&transition.html);
        }
    }

    fn describe_inputs(&self) -> Vec<InputDescriptor> {
        self.inputs.iter().map(|state| state.descriptor.clone()).collect()
    }

    fn markup(&self) -> String {
        self.document.root_element().html()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = r#"
        <html><body>
          <form>
            <input name="passengerName" placeholder="乘客姓名">
            <input type="hidden" name="token" value="abc">
            <div style="display: none"><input name="ghost"></div>
            <input name="locked" disabled>
            <input name="short" maxlength="4">
            <input name="fixed" value="keep" readonly>
            <button class="submit">提交订单</button>
            <a href="/next">添加乘机人</a>
          </form>
        </body></html>
    "#;

    fn page() -> SyntheticPage {
        SyntheticPage::new("https://m.example.com/order", FORM).unwrap()
    }

    #[test]
    fn test_inputs_in_document_order() {
        let page = page();
        assert_eq!(page.input_count(), 6);
        assert_eq!(page.query_inputs("input[name*=\"name\" i]"), vec![InputHandle(0)]);
        assert_eq!(page.query_inputs("input[name=\"short\"]"), vec![InputHandle(4)]);
        assert!(page.query_inputs("input[[").is_empty());
    }

    #[test]
    fn test_interactability() {
        let page = page();
        assert!(page.is_interactable(InputHandle(0)));
        assert!(!page.is_interactable(InputHandle(1)));
        assert!(!page.is_interactable(InputHandle(2)));
        assert!(!page.is_interactable(InputHandle(3)));
        assert!(!page.is_interactable(InputHandle(99)));
    }

    #[test]
    fn test_page_side_constraints() {
        let mut page = page();
        page.assign_value(InputHandle(4), "123456");
        assert_eq!(page.read_value(InputHandle(4)), "123456");
        page.dispatch(InputHandle(4), DomEvent::Input);
        assert_eq!(page.read_value(InputHandle(4)), "1234");

        page.assign_value(InputHandle(5), "changed");
        assert_eq!(page.read_value(InputHandle(5)), "keep");
    }

    #[test]
    fn test_clickables_and_transitions() {
        let mut page = page().on_click("添加乘机人", "https://m.example.com/order/add", "<input name=\"added\">");
        let clickables = page.clickables();
        let texts: Vec<_> = clickables.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["提交订单", "添加乘机人"]);

        page.click(clickables[1].handle);
        assert_eq!(page.url(), "https://m.example.com/order/add");
        assert_eq!(page.input_count(), 1);
        assert_eq!(page.clicked(), ["添加乘机人".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_sequence_repeats_last() {
        let mut source = SnapshotSequence::new(vec!["a".into(), "b".into()]);
        assert_eq!(source.snapshot().await.unwrap(), "a");
        assert_eq!(source.snapshot().await.unwrap(), "b");
        assert_eq!(source.snapshot().await.unwrap(), "b");
        assert_eq!(source.served(), 3);

        let mut empty = SnapshotSequence::default();
        assert!(empty.snapshot().await.is_err());
    }
}
