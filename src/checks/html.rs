// HTML checks: CSS-selector matching and lenient HTML5 validation,
// built on scraper (html5ever).

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::tri_modal;
use crate::errors::CheckError;
use crate::report::Response;
use crate::scope::Scope;

/// Parses the body as lenient HTML5. An empty body cannot be checked.
fn parse_html(resp: &Response) -> Result<Html, CheckError> {
    if resp.body.is_empty() {
        return Err(CheckError::CantCheck {
            cause: "body is empty".to_string(),
        });
    }
    Ok(Html::parse_document(&resp.text()))
}

/// Validates the selector syntax without keeping the compiled form;
/// compiled selectors are rebuilt at evaluation time.
fn check_selector(selector: &str) -> Result<(), CheckError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| CheckError::MalformedCheck(format!("bad CSS selector '{}': {}", selector, e)))
}

fn compile_selector(selector: &str) -> Result<Selector, CheckError> {
    Selector::parse(selector)
        .map_err(|e| CheckError::MalformedCheck(format!("bad CSS selector '{}': {}", selector, e)))
}

/// Collapses runs of whitespace so text comparisons ignore formatting.
fn normalized_text(texts: impl Iterator<Item = impl AsRef<str>>) -> String {
    let mut out = String::new();
    for t in texts {
        for word in t.as_ref().split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out
}

/// The CSS selector matches the body the tri-modal `count` times.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlContains {
    pub selector: String,
    pub count: i32,
}

impl HtmlContains {
    pub(crate) fn prepare(&self) -> Result<(), CheckError> {
        check_selector(&self.selector)
    }

    pub(crate) fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let doc = parse_html(resp)?;
        let sel = compile_selector(&self.selector)?;
        let got = doc.select(&sel).count() as i64;
        tri_modal(got, self.count)
    }

    pub(crate) fn substituted(&self, scope: &Scope) -> HtmlContains {
        HtmlContains {
            selector: scope.replace_in(&self.selector),
            count: self.count,
        }
    }
}

/// The texts of the selected elements match `text` in order.
/// With `complete`, the selection must contain exactly these texts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlContainsText {
    pub selector: String,
    pub text: Vec<String>,
    pub complete: bool,
}

impl HtmlContainsText {
    pub(crate) fn prepare(&self) -> Result<(), CheckError> {
        check_selector(&self.selector)
    }

    pub(crate) fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let doc = parse_html(resp)?;
        let sel = compile_selector(&self.selector)?;
        let found: Vec<String> = doc
            .select(&sel)
            .map(|el| normalized_text(el.text()))
            .collect();

        if found.len() < self.text.len() {
            return Err(CheckError::NotFound);
        }
        for (i, want) in self.text.iter().enumerate() {
            if &found[i] != want {
                return Err(CheckError::Failed(format!(
                    "element {} has text \"{}\", want \"{}\"",
                    i, found[i], want
                )));
            }
        }
        if self.complete && found.len() != self.text.len() {
            return Err(CheckError::WrongCount {
                got: found.len() as i64,
                want: self.text.len() as i64,
            });
        }
        Ok(())
    }

    pub(crate) fn substituted(&self, scope: &Scope) -> HtmlContainsText {
        HtmlContainsText {
            selector: scope.replace_in(&self.selector),
            text: self.text.iter().map(|t| scope.replace_in(t)).collect(),
            complete: self.complete,
        }
    }
}

/// The body parses as HTML5 without parse errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidHtml {}

impl ValidHtml {
    pub(crate) fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let doc = parse_html(resp)?;
        if doc.errors.is_empty() {
            return Ok(());
        }
        let shown: Vec<&str> = doc.errors.iter().take(5).map(|e| e.as_ref()).collect();
        Err(CheckError::Failed(format!(
            "{} parse error(s): {}",
            doc.errors.len(),
            shown.join("; ")
        )))
    }
}
