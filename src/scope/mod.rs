// Module: Scope
// Variable scopes, {{name}} substitution, auto variables and now-expressions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches a `{{name}}` placeholder. Unknown names are left untouched,
/// so a failed substitution is visible in the issued request instead of
/// silently disappearing.
static SUBSTITUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_.:-]+)\}\}").expect("valid substitution regex"));

/// Matches a now-expression: `{{NOW}}`, `{{NOW + 3m}}`, `{{NOW - 2d | "%Y-%m-%d"}}`.
/// Units: s, m, h, d.
static NOW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{NOW(?:\s*([+-])\s*(\d+)([smhd]))?(?:\s*\|\s*"([^"]*)")?\}\}"#)
        .expect("valid now-expression regex")
});

/// Default now-expression format, RFC 1123 in UTC.
pub const DEFAULT_NOW_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Process-wide source for the COUNTER auto variable. Strictly monotonic,
/// one fresh value per scope creation that asks for auto variables.
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Shared random source for the RANDOM auto variable.
static RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

/// Next value of the process-wide counter.
pub fn next_counter() -> u64 {
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A six-digit decimal drawn from the shared random source.
pub fn random_digits() -> String {
    let n: u32 = RNG.lock().expect("random source poisoned").gen_range(0..1_000_000);
    format!("{:06}", n)
}

/// A variable binding environment: name → string value.
///
/// Three nested scopes exist during execution (global, suite, test); each
/// is built from the outer one with [`Scope::merge`]. Resolved
/// now-expressions are kept apart from named variables because their keys
/// are full expression texts, not identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope {
    vars: HashMap<String, String>,
    #[serde(skip)]
    now: HashMap<String, String>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope::default()
    }

    /// Builds a scope from plain variable bindings.
    pub fn from_vars(vars: HashMap<String, String>) -> Scope {
        Scope {
            vars,
            now: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn into_variables(self) -> HashMap<String, String> {
        self.vars
    }

    /// Merges an inner scope beneath this one.
    ///
    /// The result starts as a copy of `outer`. With `auto` set, fresh
    /// COUNTER and RANDOM values are added next. Each inner binding is
    /// stored only if its name is still absent, with the value substituted
    /// against the result built so far. Inner scopes supply defaults;
    /// outer scopes dominate.
    pub fn merge(outer: &Scope, inner: &HashMap<String, String>, auto: bool) -> Scope {
        let mut result = outer.clone();
        if auto {
            result.set("COUNTER", next_counter().to_string());
            result.set("RANDOM", random_digits());
        }
        for (name, value) in inner {
            if !result.vars.contains_key(name) {
                let substituted = result.replace_in(value);
                result.vars.insert(name.clone(), substituted);
            }
        }
        result
    }

    /// Replaces every `{{name}}` in the input with the bound value.
    /// Resolved now-expressions are substituted first (their keys are the
    /// literal expression texts). Unknown names stay as literal text.
    pub fn replace_in(&self, input: &str) -> String {
        let mut text = if self.now.is_empty() {
            input.to_string()
        } else {
            let mut t = input.to_string();
            for (expr, value) in &self.now {
                t = t.replace(expr, value);
            }
            t
        };
        if text.contains("{{") {
            text = SUBSTITUTION_RE
                .replace_all(&text, |caps: &regex::Captures<'_>| {
                    match self.vars.get(&caps[1]) {
                        Some(v) => v.clone(),
                        None => caps[0].to_string(),
                    }
                })
                .into_owned();
        }
        text
    }

    /// Scans the inputs for now-expressions and resolves each distinct one
    /// once against `now`, extending this scope. Call once per test
    /// preparation so all occurrences inside one try agree on the clock.
    pub fn resolve_now<'a, I>(&mut self, inputs: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for input in inputs {
            for caps in NOW_RE.captures_iter(input) {
                let expr = caps.get(0).expect("whole match").as_str();
                if self.now.contains_key(expr) {
                    continue;
                }
                let mut at = now;
                if let (Some(sign), Some(n), Some(unit)) = (caps.get(1), caps.get(2), caps.get(3)) {
                    let n: i64 = n.as_str().parse().unwrap_or(0);
                    let offset = match unit.as_str() {
                        "s" => ChronoDuration::seconds(n),
                        "m" => ChronoDuration::minutes(n),
                        "h" => ChronoDuration::hours(n),
                        _ => ChronoDuration::days(n),
                    };
                    at = if sign.as_str() == "-" { at - offset } else { at + offset };
                }
                let format = caps.get(4).map(|m| m.as_str()).unwrap_or(DEFAULT_NOW_FORMAT);
                self.now
                    .insert(expr.to_string(), at.format(format).to_string());
            }
        }
    }
}
