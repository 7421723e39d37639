//! A small directive template language for rendered fields and documents.
//!
//! Syntax:
//!
//! - `{{ expr }}` writes a value, `{# ... #}` is a comment,
//! - `{% for name in expr %} ... {% endfor %}` loops over a list,
//! - `{% if expr %} ... {% else %} ... {% endif %}` tests truthiness,
//! - a `-` right inside a delimiter (`{%-`, `-%}`) trims adjacent whitespace.
//!
//! Expressions are string and integer literals, dotted paths
//! (`object.name`), calls (`heading(1, object.name)`) and filters
//! (`object | make_href`). Unknown paths evaluate to `null` and render as
//! nothing. Functions and filters beyond the built-ins are supplied by the
//! caller through [`Functions`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::error::ErrorCode;
use crate::source::{ModelObject, ModelSource};

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template file could not be read.
    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template does not parse.
    #[error("syntax error in template {template}: {message}")]
    Syntax { template: String, message: String },

    /// A call names neither a built-in nor a caller function.
    #[error("unknown function or filter {0:?}")]
    UnknownFunction(String),

    /// A function rejected its arguments.
    #[error("{name}() failed: {message}")]
    Function { name: String, message: String },
}

impl TemplateError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::TemplateRenderFailed
    }
}

/// Caller supplied functions and filters.
pub trait Functions {
    /// Evaluate `name(args...)`. `None` means the function is unknown.
    fn call(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, String>>;
}

/// No functions besides the built-in filters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFunctions;

impl Functions for NoFunctions {
    fn call(&mut self, _name: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        None
    }
}

/// Model access from templates.
///
/// - `element(obj_or_uuid)`: the object view, `null` if unknown,
/// - `search(layer, type)`: elements of a type in a layer,
/// - `diagrams()`: every diagram.
pub struct ModelFunctions<'m> {
    model: &'m dyn ModelSource,
}

impl<'m> ModelFunctions<'m> {
    #[must_use]
    pub fn new(model: &'m dyn ModelSource) -> Self {
        Self { model }
    }
}

impl Functions for ModelFunctions<'_> {
    fn call(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        let arg = |idx: usize| args.get(idx).and_then(Value::as_str);
        let result = match name {
            "element" => Ok(args
                .first()
                .and_then(referenced_id)
                .and_then(|uuid| self.model.by_uuid(uuid).ok())
                .map_or(Value::Null, |obj| obj.to_value())),
            "search" => match (arg(0), arg(1)) {
                (Some(layer), Some(type_name)) => Ok(self
                    .model
                    .search(layer, type_name)
                    .into_iter()
                    .map(|e| ModelObject::Element(e).to_value())
                    .collect()),
                _ => Err("expected search(layer, type)".to_string()),
            },
            "diagrams" => Ok(self
                .model
                .diagrams()
                .into_iter()
                .map(|d| ModelObject::Diagram(d).to_value())
                .collect()),
            _ => return None,
        };
        Some(result)
    }
}

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Call { name: String, args: Vec<Expr> },
    Attr { inner: Box<Expr>, segment: String },
    Filter { inner: Box<Expr>, name: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output(Expr),
    For {
        var: String,
        iter: Expr,
        body: Vec<Node>,
    },
    If {
        cond: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Output(String),
    Tag(String),
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    const OPENERS: [(&str, &str); 3] = [("{{", "}}"), ("{%", "%}"), ("{#", "#}")];

    let mut tokens = Vec::new();
    let mut rest = src;
    let mut trim_next = false;
    loop {
        let next = OPENERS
            .iter()
            .filter_map(|(open, close)| rest.find(open).map(|idx| (idx, *open, *close)))
            .min_by_key(|(idx, _, _)| *idx);
        let Some((idx, open, close)) = next else {
            push_text(&mut tokens, rest, trim_next);
            break;
        };
        let body_start = idx + open.len();
        let Some(len) = rest[body_start..].find(close) else {
            return Err(format!("unclosed {open}"));
        };
        let raw = &rest[body_start..body_start + len];

        let trim_prev = raw.starts_with('-');
        push_text(&mut tokens, &rest[..idx], trim_next);
        if trim_prev && let Some(Token::Text(text)) = tokens.last_mut() {
            let trimmed = text.trim_end().len();
            text.truncate(trimmed);
        }
        trim_next = raw.ends_with('-') && raw.len() > 1;

        let body = raw.trim_start_matches('-').trim_end_matches('-').trim().to_string();
        match open {
            "{{" => tokens.push(Token::Output(body)),
            "{%" => tokens.push(Token::Tag(body)),
            _ => {}
        }
        rest = &rest[body_start + len + close.len()..];
    }
    Ok(tokens)
}

fn push_text(tokens: &mut Vec<Token>, text: &str, trim_start: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_string()));
    }
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    /// Parse until one of `ends` (or the end of input when `ends` is empty).
    fn nodes(&mut self, ends: &[&str]) -> Result<(Vec<Node>, Option<String>), String> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Output(expr) => nodes.push(Node::Output(parse_expr(&expr)?)),
                Token::Tag(tag) => {
                    let keyword = tag.split_whitespace().next().unwrap_or_default();
                    if ends.contains(&keyword) {
                        return Ok((nodes, Some(keyword.to_string())));
                    }
                    nodes.push(self.block(&tag, keyword)?);
                }
            }
        }
        if ends.is_empty() {
            Ok((nodes, None))
        } else {
            Err(format!("missing {{% {} %}}", ends[0]))
        }
    }

    fn block(&mut self, tag: &str, keyword: &str) -> Result<Node, String> {
        match keyword {
            "for" => {
                let spec = tag["for".len()..].trim();
                let (var, iter) = spec
                    .split_once(" in ")
                    .ok_or_else(|| format!("expected `for <name> in <expr>`, got {tag:?}"))?;
                let var = var.trim();
                if !is_ident(var) {
                    return Err(format!("invalid loop variable {var:?}"));
                }
                let (body, _) = self.nodes(&["endfor"])?;
                Ok(Node::For {
                    var: var.to_string(),
                    iter: parse_expr(iter)?,
                    body,
                })
            }
            "if" => {
                let cond = parse_expr(tag["if".len()..].trim())?;
                let (body, end) = self.nodes(&["endif", "else"])?;
                let otherwise = if end.as_deref() == Some("else") {
                    self.nodes(&["endif"])?.0
                } else {
                    Vec::new()
                };
                Ok(Node::If {
                    cond,
                    body,
                    otherwise,
                })
            }
            other => Err(format!("unknown tag {other:?}")),
        }
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Ident(String),
    Str(String),
    Int(i64),
    Dot,
    Comma,
    Open,
    Close,
    Pipe,
}

fn lex_expr(src: &str) -> Result<Vec<ExprToken>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '.' => tokens.push(ExprToken::Dot),
            ',' => tokens.push(ExprToken::Comma),
            '(' => tokens.push(ExprToken::Open),
            ')' => tokens.push(ExprToken::Close),
            '|' => tokens.push(ExprToken::Pipe),
            '"' | '\'' => {
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(format!("unterminated string starting at {idx}"));
                }
                tokens.push(ExprToken::Str(value));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut end = idx + c.len_utf8();
                while let Some((next_idx, next)) = chars.peek() {
                    if next.is_ascii_digit() {
                        end = next_idx + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = src[idx..end]
                    .parse()
                    .map_err(|_| format!("invalid number {:?}", &src[idx..end]))?;
                tokens.push(ExprToken::Int(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = idx + 1;
                while let Some((next_idx, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || *next == '_' {
                        end = next_idx + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(ExprToken::Ident(src[idx..end].to_string()));
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }
    Ok(tokens)
}

fn parse_expr(src: &str) -> Result<Expr, String> {
    let tokens = lex_expr(src)?;
    let mut pos = 0;
    let expr = parse_filtered(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("unexpected trailing input in {src:?}"));
    }
    Ok(expr)
}

fn parse_filtered(tokens: &[ExprToken], pos: &mut usize) -> Result<Expr, String> {
    let mut expr = parse_postfix(tokens, pos)?;
    while tokens.get(*pos) == Some(&ExprToken::Pipe) {
        *pos += 1;
        let Some(ExprToken::Ident(name)) = tokens.get(*pos) else {
            return Err("expected a filter name after `|`".to_string());
        };
        *pos += 1;
        expr = Expr::Filter {
            inner: Box::new(expr),
            name: name.clone(),
        };
    }
    Ok(expr)
}

/// A primary followed by `.name` accessors.
fn parse_postfix(tokens: &[ExprToken], pos: &mut usize) -> Result<Expr, String> {
    let mut expr = parse_primary(tokens, pos)?;
    while tokens.get(*pos) == Some(&ExprToken::Dot) {
        let segment = match tokens.get(*pos + 1) {
            Some(ExprToken::Ident(segment)) => segment.clone(),
            Some(ExprToken::Int(idx)) => idx.to_string(),
            _ => return Err("expected a name after `.`".to_string()),
        };
        *pos += 2;
        expr = match expr {
            Expr::Path(mut path) => {
                path.push(segment);
                Expr::Path(path)
            }
            inner => Expr::Attr {
                inner: Box::new(inner),
                segment,
            },
        };
    }
    Ok(expr)
}

fn parse_primary(tokens: &[ExprToken], pos: &mut usize) -> Result<Expr, String> {
    let token = tokens.get(*pos).ok_or("unexpected end of expression")?;
    *pos += 1;
    match token {
        ExprToken::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
        ExprToken::Int(n) => Ok(Expr::Literal(Value::from(*n))),
        ExprToken::Ident(name) if tokens.get(*pos) == Some(&ExprToken::Open) => {
            *pos += 1;
            let mut args = Vec::new();
            if tokens.get(*pos) == Some(&ExprToken::Close) {
                *pos += 1;
                return Ok(Expr::Call {
                    name: name.clone(),
                    args,
                });
            }
            loop {
                args.push(parse_filtered(tokens, pos)?);
                match tokens.get(*pos) {
                    Some(ExprToken::Comma) => *pos += 1,
                    Some(ExprToken::Close) => {
                        *pos += 1;
                        break;
                    }
                    _ => return Err(format!("expected `,` or `)` in call to {name}")),
                }
            }
            Ok(Expr::Call {
                name: name.clone(),
                args,
            })
        }
        ExprToken::Ident(name) => match name.as_str() {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "none" | "None" => Ok(Expr::Literal(Value::Null)),
            _ => Ok(Expr::Path(vec![name.clone()])),
        },
        other => Err(format!("unexpected {other:?}")),
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] for malformed input.
    pub fn parse(name: impl Into<String>, src: &str) -> Result<Self, TemplateError> {
        let name = name.into();
        let syntax = |message: String| TemplateError::Syntax {
            template: name.clone(),
            message,
        };
        let tokens = tokenize(src).map_err(syntax)?;
        let mut parser = Parser {
            tokens: tokens.into_iter(),
        };
        let (nodes, _) = parser.nodes(&[]).map_err(syntax)?;
        Ok(Self { name, nodes })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render with `context` as the outermost scope.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when a function is unknown or fails.
    pub fn render(
        &self,
        context: &BTreeMap<String, Value>,
        functions: &mut dyn Functions,
    ) -> Result<String, TemplateError> {
        let mut renderer = Renderer {
            scopes: vec![context.clone()],
            functions,
        };
        let mut out = String::new();
        renderer.nodes(&self.nodes, &mut out)?;
        Ok(out)
    }
}

struct Renderer<'f> {
    scopes: Vec<BTreeMap<String, Value>>,
    functions: &'f mut dyn Functions,
}

impl Renderer<'_> {
    fn nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => {
                    let value = self.eval(expr)?;
                    out.push_str(&display(&value));
                }
                Node::For { var, iter, body } => {
                    let items = match self.eval(iter)? {
                        Value::Array(items) => items,
                        Value::Null => Vec::new(),
                        other => vec![other],
                    };
                    for item in items {
                        self.scopes.push(BTreeMap::from([(var.clone(), item)]));
                        let rendered = self.nodes(body, out);
                        self.scopes.pop();
                        rendered?;
                    }
                }
                Node::If {
                    cond,
                    body,
                    otherwise,
                } => {
                    if truthy(&self.eval(cond)?) {
                        self.nodes(body, out)?;
                    } else {
                        self.nodes(otherwise, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, path: &[String]) -> Value {
        let Some((head, rest)) = path.split_first() else {
            return Value::Null;
        };
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(head))
            .map_or(Value::Null, |value| descend(value, rest))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, TemplateError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => Ok(self.lookup(path)),
            Expr::Attr { inner, segment } => {
                let value = self.eval(inner)?;
                Ok(descend(&value, std::slice::from_ref(segment)))
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, &args)
            }
            Expr::Filter { inner, name } => {
                let value = self.eval(inner)?;
                match builtin_filter(name, &value) {
                    Some(result) => Ok(result),
                    None => self.call(name, &[value]),
                }
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        match self.functions.call(name, args) {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(TemplateError::Function {
                name: name.to_string(),
                message,
            }),
            None => Err(TemplateError::UnknownFunction(name.to_string())),
        }
    }
}

fn descend(value: &Value, path: &[String]) -> Value {
    let mut current = value;
    for segment in path {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn builtin_filter(name: &str, value: &Value) -> Option<Value> {
    match name {
        "make_href" => Some(Value::String(
            referenced_id(value).map_or_else(|| "#".to_string(), |id| format!("hlink://{id}")),
        )),
        "lower" => Some(Value::String(display(value).to_lowercase())),
        "upper" => Some(Value::String(display(value).to_uppercase())),
        "length" => Some(Value::from(match value {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::String(s) => s.chars().count(),
            _ => 0,
        })),
        _ => None,
    }
}

/// The model element id a template value refers to.
///
/// Accepts element objects (`{"uuid": ...}`), references (`{"ref": ...}`)
/// and plain id strings.
#[must_use]
pub fn referenced_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id),
        Value::Object(map) => map
            .get("uuid")
            .or_else(|| map.get("ref"))
            .and_then(Value::as_str),
        _ => None,
    }
}

/// Text form of a value: strings verbatim, `null` empty, the rest as JSON.
#[must_use]
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Loads templates from disk, parsing each file once.
#[derive(Debug, Default)]
pub struct TemplateStore {
    cache: Mutex<HashMap<PathBuf, Arc<Template>>>,
}

impl TemplateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `folder/name`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Io`] or [`TemplateError::Syntax`].
    pub fn load(&self, folder: &Path, name: &Path) -> Result<Arc<Template>, TemplateError> {
        let path = folder.join(name);
        if let Some(template) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path)
        {
            return Ok(Arc::clone(template));
        }

        let src = fs::read_to_string(&path).map_err(|source| TemplateError::Io {
            path: path.clone(),
            source,
        })?;
        let template = Arc::new(Template::parse(name.display().to_string(), &src)?);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, Arc::clone(&template));
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: Value) -> BTreeMap<String, Value> {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }

    fn render(src: &str, ctx: Value) -> String {
        Template::parse("test", src)
            .expect("template should parse")
            .render(&context(ctx), &mut NoFunctions)
            .expect("template should render")
    }

    struct Upper;

    impl Functions for Upper {
        fn call(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
            match name {
                "shout" => Some(
                    args.first()
                        .map(|v| Value::String(format!("{}!", display(v))))
                        .ok_or_else(|| "shout needs one argument".to_string()),
                ),
                _ => None,
            }
        }
    }

    #[test]
    fn outputs_paths_and_literals() {
        let out = render(
            "<p>{{ object.name }} / {{ 'x' }} / {{ 3 }}{{ missing.path }}</p>",
            json!({"object": {"name": "Door"}}),
        );
        assert_eq!(out, "<p>Door / x / 3</p>");
    }

    #[test]
    fn loops_and_conditions() {
        let out = render(
            "{% for c in children %}{% if c.main %}[{{ c.name }}]{% else %}{{ c.name }}{% endif %}{% endfor %}",
            json!({"children": [{"name": "a", "main": true}, {"name": "b"}]}),
        );
        assert_eq!(out, "[a]b");
    }

    #[test]
    fn whitespace_control_trims_text() {
        let out = render(
            "<ul>\n  {%- for x in xs %}\n  <li>{{ x }}</li>\n  {%- endfor %}\n</ul>",
            json!({"xs": [1, 2]}),
        );
        assert_eq!(out, "<ul>\n  <li>1</li>\n  <li>2</li>\n</ul>");
    }

    #[test]
    fn filters_and_caller_functions() {
        let template = Template::parse(
            "t",
            "{{ object | make_href }} {{ object.parent | make_href }} {{ shout(object.name | upper) }} {{ object.name | shout }}",
        )
        .expect("parses");
        let ctx = context(json!({"object": {"uuid": "u-1", "name": "door", "parent": {"ref": "u-0"}}}));
        let out = template.render(&ctx, &mut Upper).expect("renders");
        assert_eq!(out, "hlink://u-1 hlink://u-0 DOOR! door!");
    }

    #[test]
    fn model_functions_expose_elements() {
        let model = crate::source::SnapshotModel::from_json_str(
            r#"{"elements": [
                {"uuid": "e1", "name": "Door", "type": "Class", "layer": "sa"},
                {"uuid": "e2", "name": "Lock", "type": "Class", "layer": "sa",
                 "attributes": {"owner": {"ref": "e1"}}}
            ]}"#,
        )
        .expect("valid snapshot");
        let template = Template::parse(
            "t",
            "{% for c in search('sa', 'Class') %}{{ c.name }}:{{ element(c.owner).name }};{% endfor %}",
        )
        .expect("parses");
        let out = template
            .render(&BTreeMap::new(), &mut ModelFunctions::new(&model))
            .expect("renders");
        assert_eq!(out, "Door:;Lock:Door;");
    }

    #[test]
    fn unknown_functions_fail() {
        let template = Template::parse("t", "{{ nope(1) }}").expect("parses");
        let err = template
            .render(&BTreeMap::new(), &mut NoFunctions)
            .expect_err("unknown function");
        assert!(matches!(err, TemplateError::UnknownFunction(name) if name == "nope"));
    }

    #[test]
    fn syntax_errors_name_the_template() {
        let err = Template::parse("broken.html.j2", "{% for x in xs %}no end").expect_err("missing endfor");
        assert!(err.to_string().contains("broken.html.j2"));
        assert!(Template::parse("t", "{{ a ").is_err());
        assert!(Template::parse("t", "{% while x %}").is_err());
    }

    #[test]
    fn store_caches_parsed_templates() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        fs::write(dir.path().join("a.j2"), "{{ x }}").expect("write template");
        let store = TemplateStore::new();

        let first = store.load(dir.path(), Path::new("a.j2")).expect("loads");
        fs::write(dir.path().join("a.j2"), "changed").expect("rewrite template");
        let second = store.load(dir.path(), Path::new("a.j2")).expect("loads");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(store.load(dir.path(), Path::new("missing.j2")).is_err());
    }
}
