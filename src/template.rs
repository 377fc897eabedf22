//! The Templar: variable substitution and conditional evaluation.
//!
//! A thin facade over [`minijinja`] with strict-undefined semantics.
//! Undefined variables raise [`Error::UndefinedVariable`] by default;
//! callers that pass `fail_on_undefined = false` get the literal
//! template text back instead, so unresolvable strings survive until a
//! later pass can resolve them.

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::vars::Variables;

/// Renders templates and evaluates conditional expressions against a
/// variable snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Templar;

impl Templar {
    pub fn new() -> Self {
        Self
    }

    /// Returns true if the string contains template markers.
    pub fn is_template(&self, source: &str) -> bool {
        source.contains("{{") || source.contains("{%")
    }

    /// Renders a template string against `vars`.
    ///
    /// With `fail_on_undefined = false`, an undefined variable yields
    /// the literal source text rather than an error.
    pub fn template_str(
        &self,
        source: &str,
        vars: &Variables,
        fail_on_undefined: bool,
    ) -> Result<String> {
        if !self.is_template(source) {
            return Ok(source.to_string());
        }
        let env = self.environment();
        match env.render_str(source, vars) {
            Ok(rendered) => Ok(rendered),
            Err(e) if e.kind() == ErrorKind::UndefinedError => {
                if fail_on_undefined {
                    Err(Error::UndefinedVariable(describe(&e, source)))
                } else {
                    Ok(source.to_string())
                }
            }
            Err(e) => Err(Error::template_render(source, e.to_string())),
        }
    }

    /// Recursively templates every string inside a JSON value.
    pub fn template_value(
        &self,
        value: &Value,
        vars: &Variables,
        fail_on_undefined: bool,
    ) -> Result<Value> {
        match value {
            Value::String(s) => Ok(Value::String(self.template_str(s, vars, fail_on_undefined)?)),
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| self.template_value(v, vars, fail_on_undefined))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.template_value(v, vars, fail_on_undefined)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Evaluates a bare expression (not wrapped in `{{ }}`) and returns
    /// its value. Used to resolve templated loop sources.
    pub fn eval_expression(&self, expression: &str, vars: &Variables) -> Result<Value> {
        let env = self.environment();
        let expr = strip_markers(expression);
        let compiled = env
            .compile_expression(expr)
            .map_err(|e| Error::template_render(expression, e.to_string()))?;
        match compiled.eval(vars) {
            Ok(value) => serde_json::to_value(value).map_err(Error::from),
            Err(e) if e.kind() == ErrorKind::UndefinedError => {
                Err(Error::UndefinedVariable(describe(&e, expression)))
            }
            Err(e) => Err(Error::template_render(expression, e.to_string())),
        }
    }

    /// Evaluates a conditional expression to a boolean, using Jinja
    /// truthiness. Undefined variables are always an error here:
    /// repeated evaluation against an unchanged snapshot is pure.
    pub fn evaluate_conditional(&self, expression: &str, vars: &Variables) -> Result<bool> {
        match expression.trim().to_lowercase().as_str() {
            "" | "true" | "yes" => return Ok(true),
            "false" | "no" => return Ok(false),
            _ => {}
        }
        let env = self.environment();
        let expr = strip_markers(expression);
        let compiled = env
            .compile_expression(expr)
            .map_err(|e| Error::condition(expression, e.to_string()))?;
        match compiled.eval(vars) {
            Ok(value) => Ok(value.is_true()),
            Err(e) if e.kind() == ErrorKind::UndefinedError => {
                Err(Error::UndefinedVariable(describe(&e, expression)))
            }
            Err(e) => Err(Error::condition(expression, e.to_string())),
        }
    }

    fn environment<'source>(&self) -> Environment<'source> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env
    }
}

/// Conditionals are bare expressions; tolerate a fully-wrapped
/// `{{ expr }}` by stripping the markers.
fn strip_markers(expression: &str) -> &str {
    let trimmed = expression.trim();
    trimmed
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn describe(error: &minijinja::Error, source: &str) -> String {
    format!("{} (in '{}')", error, source)
}
