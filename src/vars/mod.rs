//! Variable substitution for SQL text, sheet names, and output paths.
//!
//! Tokens look like `${name}` or `${name.key}`. A [`Substitutor`] runs a
//! fixed, ordered list of [`Pass`]es over a template; each pass replaces the
//! tokens it can claim and leaves the rest for the next one. The last pass
//! replaces whatever is left, so the output never contains a token.

pub mod dynamic;
pub mod timestamp;

pub use dynamic::{DynamicValue, DynamicVariableResolver, DynamicVariables};

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::{debug, info, trace};

use crate::db::sql_text::{format_number, to_in_clause};

/// Replacement for a leftover token whose root is a dynamic variable.
/// Matches nothing when used inside an IN-list.
pub const NO_MATCH_SENTINEL: &str = "'^-_'";

/// Environment variable that raises token-level tracing to `info`.
pub const DEBUG_ENV: &str = "DEBUG_VARIABLES";

/// One substitution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Database-derived variables, including `${name.key}` access.
    Dynamic,
    /// Zero-argument "now" functions.
    Timestamp,
    /// Global variables overridden by sheet parameters.
    General,
    /// Process environment, only for names no earlier tier knows.
    Environment,
    /// Replaces every remaining token.
    Fallback,
}

impl Pass {
    /// Full pipeline, in precedence order.
    pub const ALL: [Pass; 5] = [
        Pass::Dynamic,
        Pass::Timestamp,
        Pass::General,
        Pass::Environment,
        Pass::Fallback,
    ];

    /// Pipeline for dynamic-variable queries: the dynamic tier is excluded.
    pub const DYNAMIC_QUERY: [Pass; 4] = [
        Pass::Timestamp,
        Pass::General,
        Pass::Environment,
        Pass::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pass::Dynamic => "dynamic",
            Pass::Timestamp => "timestamp",
            Pass::General => "general",
            Pass::Environment => "environment",
            Pass::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^{}]*)\}").expect("valid regex"))
}

/// Splits a token body into its root name and optional dotted key.
fn split_token(inner: &str) -> (&str, Option<&str>) {
    match inner.split_once('.') {
        Some((root, key)) => (root, Some(key)),
        None => (inner, None),
    }
}

/// Runs the substitution passes. Owns the run's dynamic-variable registry.
#[derive(Clone)]
pub struct Substitutor {
    dynamic: DynamicVariables,
    env: EnvLookup,
    clock: Clock,
    verbose: bool,
}

impl fmt::Debug for Substitutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Substitutor")
            .field("dynamic", &self.dynamic)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl Default for Substitutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Substitutor {
    /// Creates a substitutor reading the process environment and clock.
    pub fn new() -> Self {
        Self {
            dynamic: DynamicVariables::new(),
            env: Arc::new(|name| std::env::var(name).ok().filter(|v| !v.is_empty())),
            clock: Arc::new(Utc::now),
            verbose: std::env::var(DEBUG_ENV).is_ok_and(|v| v == "true"),
        }
    }

    /// Replaces the environment lookup.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Replaces the clock used by timestamp functions.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn dynamic(&self) -> &DynamicVariables {
        &self.dynamic
    }

    pub fn dynamic_mut(&mut self) -> &mut DynamicVariables {
        &mut self.dynamic
    }

    /// Runs every pass. `params` override `general` for this call only.
    pub fn substitute(&self, template: &str, general: &Map<String, Value>, params: &Map<String, Value>) -> String {
        self.substitute_passes(&Pass::ALL, template, general, params)
    }

    /// Runs the given passes in order.
    pub fn substitute_passes(
        &self,
        passes: &[Pass],
        template: &str,
        general: &Map<String, Value>,
        params: &Map<String, Value>,
    ) -> String {
        if !token_pattern().is_match(template) {
            return template.to_string();
        }
        self.log(format_args!(
            "Substituting variables in: {}",
            template.chars().take(200).collect::<String>()
        ));

        let vars = MergedVars { general, params };
        let mut text = template.to_string();
        for pass in passes {
            text = match pass {
                Pass::Fallback => self.fallback(text),
                _ => self.apply(*pass, &text, &vars),
            };
        }
        text
    }

    fn apply(&self, pass: Pass, text: &str, vars: &MergedVars<'_>) -> String {
        let now = (pass == Pass::Timestamp).then(|| (self.clock)());
        token_pattern()
            .replace_all(text, |caps: &Captures<'_>| {
                let inner = &caps[1];
                let replacement = match pass {
                    Pass::Dynamic => self.dynamic_value(inner),
                    Pass::Timestamp => now.and_then(|now| timestamp::render(inner, now)),
                    Pass::General => vars.get(inner).map(render_general),
                    Pass::Environment => self.environment_value(inner, vars),
                    Pass::Fallback => None,
                };
                match replacement {
                    Some(value) => {
                        self.log(format_args!("[{pass}] ${{{inner}}} -> {value}"));
                        value
                    }
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn dynamic_value(&self, inner: &str) -> Option<String> {
        let (root, key) = split_token(inner);
        self.dynamic.get(root)?.render(key)
    }

    fn environment_value(&self, inner: &str, vars: &MergedVars<'_>) -> Option<String> {
        if inner.contains('.')
            || self.dynamic.contains(inner)
            || timestamp::is_timestamp_function(inner)
            || vars.contains(inner)
        {
            return None;
        }
        let raw = (self.env)(inner)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => Some(to_in_clause(&items)),
            _ => Some(raw),
        }
    }

    /// Replaces leftover tokens until none remain. Replacing a token can join
    /// surrounding text into a new one, hence the loop.
    fn fallback(&self, mut text: String) -> String {
        while token_pattern().is_match(&text) {
            text = token_pattern()
                .replace_all(&text, |caps: &Captures<'_>| {
                    let inner = &caps[1];
                    let (root, _) = split_token(inner);
                    let replacement = if self.dynamic.contains(root) {
                        NO_MATCH_SENTINEL
                    } else {
                        ""
                    };
                    debug!("Unresolved variable ${{{}}} replaced with {:?}", inner, replacement);
                    replacement
                })
                .into_owned();
        }
        text
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        if self.verbose {
            info!("{}", args);
        } else {
            trace!("{}", args);
        }
    }
}

/// Global variables with per-sheet parameters layered on top.
struct MergedVars<'a> {
    general: &'a Map<String, Value>,
    params: &'a Map<String, Value>,
}

impl MergedVars<'_> {
    fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name).or_else(|| self.general.get(name))
    }

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

fn render_general(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => to_in_clause(items),
        Value::Object(_) => value.to_string(),
    }
}
