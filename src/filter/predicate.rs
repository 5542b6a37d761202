use std::fmt;

use super::ast::Literal;
use crate::facts::TrafficFacts;

/// The type a predicate parameter expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A string literal
    Str,
    /// A raw-string regex, or a string compiled as one
    Pattern,
    /// `true` or `false`
    Bool,
    /// An integer
    Int,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::Str => write!(f, "string"),
            ArgKind::Pattern => write!(f, "regex"),
            ArgKind::Bool => write!(f, "boolean"),
            ArgKind::Int => write!(f, "integer"),
        }
    }
}

type Test = fn(&[Literal], &TrafficFacts<'_>) -> bool;

/// One row of the built-in predicate table.
pub struct PredicateDef {
    name: &'static str,
    params: &'static [ArgKind],
    variadic: bool,
    response_only: bool,
    doc: &'static str,
    test: Test,
}

impl PredicateDef {
    /// Returns the predicate name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the declared parameter kinds.
    pub fn params(&self) -> &'static [ArgKind] {
        self.params
    }

    /// Returns true if the last parameter may repeat.
    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Returns true if the predicate only applies to responses.
    pub fn is_response_only(&self) -> bool {
        self.response_only
    }

    /// Returns a one-line description.
    pub fn doc(&self) -> &'static str {
        self.doc
    }

    /// Returns the parameter kind at argument position `index`.
    pub(crate) fn param_at(&self, index: usize) -> Option<ArgKind> {
        match self.params.get(index) {
            Some(kind) => Some(*kind),
            None if self.variadic => self.params.last().copied(),
            None => None,
        }
    }

    pub(crate) fn accepts_count(&self, count: usize) -> bool {
        if self.variadic {
            count >= self.params.len()
        } else {
            count == self.params.len()
        }
    }

    pub(crate) fn test(&self, args: &[Literal], facts: &TrafficFacts<'_>) -> bool {
        (self.test)(args, facts)
    }
}

impl fmt::Debug for PredicateDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .finish()
    }
}

/// Renders the call signature, e.g. `(header-matches string regex)`.
impl fmt::Display for PredicateDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.name)?;
        for kind in self.params {
            write!(f, " {}", kind)?;
        }
        if self.variadic {
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

/// Returns the built-in predicate table, in documentation order.
pub fn predicates() -> &'static [PredicateDef] {
    BUILTINS
}

/// Looks up a predicate by name, ignoring ASCII case.
pub fn lookup(name: &str) -> Option<&'static PredicateDef> {
    BUILTINS.iter().find(|def| def.name.eq_ignore_ascii_case(name))
}

fn strs(args: &[Literal]) -> impl Iterator<Item = &str> {
    args.iter().filter_map(Literal::as_str)
}

fn ints(args: &[Literal]) -> impl Iterator<Item = i64> + '_ {
    args.iter().filter_map(Literal::as_int)
}

fn pattern_matches(arg: Option<&Literal>, text: &str) -> bool {
    arg.and_then(Literal::as_pattern)
        .is_some_and(|p| p.is_match(text))
}

/// Walks a dotted key such as `user.roles.0` through objects and arrays.
fn has_dotted_key(value: &serde_json::Value, key: &str) -> bool {
    let mut current = value;
    for segment in key.split('.') {
        let next = match current {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return false,
        }
    }
    true
}

use ArgKind::{Int, Pattern, Str};

static BUILTINS: &[PredicateDef] = &[
    PredicateDef {
        name: "true",
        params: &[],
        variadic: false,
        response_only: false,
        doc: "Always true.",
        test: |_, _| true,
    },
    PredicateDef {
        name: "in-scope",
        params: &[],
        variadic: false,
        response_only: false,
        doc: "The request URL is in the target scope.",
        test: |_, facts| facts.in_scope(),
    },
    PredicateDef {
        name: "host-matches",
        params: &[Pattern],
        variadic: false,
        response_only: false,
        doc: "The pattern matches somewhere in the request host; anchor with ^ and $ for an exact match.",
        test: |args, facts| facts.host().is_some_and(|h| pattern_matches(args.first(), h)),
    },
    PredicateDef {
        name: "path-contains",
        params: &[Str],
        variadic: false,
        response_only: false,
        doc: "The URL path contains the substring (case-sensitive).",
        test: |args, facts| strs(args).any(|s| facts.path().contains(s)),
    },
    PredicateDef {
        name: "path-matches",
        params: &[Pattern],
        variadic: false,
        response_only: false,
        doc: "The pattern matches somewhere in the URL path.",
        test: |args, facts| pattern_matches(args.first(), facts.path()),
    },
    PredicateDef {
        name: "file-ext-eq",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "The last path segment ends with one of the extensions.",
        test: |args, facts| {
            let file = facts.path().rsplit('/').next().unwrap_or("");
            strs(args).any(|ext| {
                let ext = ext.strip_prefix('.').unwrap_or(ext);
                file.strip_suffix(ext)
                    .is_some_and(|stem| stem.ends_with('.'))
            })
        },
    },
    PredicateDef {
        name: "method-eq",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "The request method is one of the given methods.",
        test: |args, facts| {
            let method = facts.method().as_str();
            strs(args).any(|m| m.eq_ignore_ascii_case(method))
        },
    },
    PredicateDef {
        name: "header-matches",
        params: &[Str, Pattern],
        variadic: false,
        response_only: false,
        doc: "The pattern matches somewhere in some value of the named header.",
        test: |args, facts| match args.first().and_then(Literal::as_str) {
            Some(name) => facts
                .headers()
                .get_all(name)
                .any(|v| pattern_matches(args.get(1), v)),
            None => false,
        },
    },
    PredicateDef {
        name: "has-header",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "Any of the named headers is present.",
        test: |args, facts| strs(args).any(|name| facts.headers().contains(name)),
    },
    PredicateDef {
        name: "has-cookie",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "Any of the named cookies is sent (requests) or set (responses).",
        test: |args, facts| strs(args).any(|name| facts.cookie(name).is_some()),
    },
    PredicateDef {
        name: "has-query-param",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "Any of the named query parameters is present.",
        test: |args, facts| strs(args).any(|name| facts.query_param(name).is_some()),
    },
    PredicateDef {
        name: "has-form-param",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "Any of the named url-encoded form parameters is present in the request body.",
        test: |args, facts| strs(args).any(|name| facts.form_param(name).is_some()),
    },
    PredicateDef {
        name: "query-param-matches",
        params: &[Str, Pattern],
        variadic: false,
        response_only: false,
        doc: "The pattern matches somewhere in the decoded value of the named query parameter; anchor with ^ and $ for an exact match.",
        test: |args, facts| {
            args.first()
                .and_then(Literal::as_str)
                .and_then(|name| facts.query_param(name))
                .is_some_and(|value| pattern_matches(args.get(1), &value))
        },
    },
    PredicateDef {
        name: "has-json-key",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "The body is JSON containing any of the dotted keys.",
        test: |args, facts| match facts.json() {
            Some(json) => strs(args).any(|key| has_dotted_key(json, key)),
            None => false,
        },
    },
    PredicateDef {
        name: "body-contains",
        params: &[Pattern],
        variadic: false,
        response_only: false,
        doc: "The pattern matches somewhere in the body.",
        test: |args, facts| pattern_matches(args.first(), facts.text()),
    },
    PredicateDef {
        name: "body-matches",
        params: &[Pattern],
        variadic: false,
        response_only: false,
        doc: "The pattern matches the entire body.",
        test: |args, facts| {
            args.first()
                .and_then(Literal::as_pattern)
                .is_some_and(|p| p.is_full_match(facts.text()))
        },
    },
    PredicateDef {
        name: "status-code-eq",
        params: &[Int],
        variadic: true,
        response_only: true,
        doc: "The response status is one of the codes.",
        test: |args, facts| {
            facts
                .status()
                .is_some_and(|s| ints(args).any(|code| code == i64::from(s.as_u16())))
        },
    },
    PredicateDef {
        name: "status-code-in",
        params: &[Int, Int],
        variadic: false,
        response_only: true,
        doc: "The response status lies in the inclusive range.",
        test: |args, facts| {
            let mut bounds = ints(args);
            match (facts.status(), bounds.next(), bounds.next()) {
                (Some(s), Some(lo), Some(hi)) => (lo..=hi).contains(&i64::from(s.as_u16())),
                _ => false,
            }
        },
    },
    PredicateDef {
        name: "listener-port-eq",
        params: &[Int],
        variadic: true,
        response_only: false,
        doc: "The request targets one of the ports.",
        test: |args, facts| {
            facts
                .port()
                .is_some_and(|port| ints(args).any(|p| p == i64::from(port)))
        },
    },
    PredicateDef {
        name: "tool-source-eq",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "The message came from one of the named tools.",
        test: |args, facts| {
            let tool = facts.tool_source().name();
            strs(args).any(|name| name.eq_ignore_ascii_case(tool))
        },
    },
    PredicateDef {
        name: "from-proxy",
        params: &[],
        variadic: false,
        response_only: false,
        doc: "The message is live proxy traffic.",
        test: |_, facts| facts.tool_source().is_proxy(),
    },
    PredicateDef {
        name: "has-attachment",
        params: &[Str],
        variadic: true,
        response_only: false,
        doc: "An earlier addon attached any of the keys.",
        test: |args, facts| strs(args).any(|key| facts.has_attachment(key)),
    },
];
