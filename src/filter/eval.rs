use super::ast::{FilterExpression, Literal, Pattern};
use super::predicate::{lookup, ArgKind, PredicateDef};
use crate::error::EvalError;
use crate::facts::TrafficFacts;
use crate::http::EventKind;

/// An expression whose predicates have been resolved and whose arguments
/// have been checked against the predicate signatures.
#[derive(Debug, Clone)]
pub(crate) enum Bound {
    And(Vec<Bound>),
    Or(Vec<Bound>),
    Not(Box<Bound>),
    Predicate {
        def: &'static PredicateDef,
        args: Vec<Literal>,
    },
}

/// Resolves every predicate in `expr`.
pub(crate) fn bind(expr: &FilterExpression) -> Result<Bound, EvalError> {
    match expr {
        FilterExpression::And(children) => Ok(Bound::And(bind_all(children)?)),
        FilterExpression::Or(children) => Ok(Bound::Or(bind_all(children)?)),
        FilterExpression::Not(child) => Ok(Bound::Not(Box::new(bind(child)?))),
        FilterExpression::Predicate { name, args } => {
            let def = lookup(name).ok_or_else(|| EvalError::UnknownPredicate { name: name.clone() })?;
            Ok(Bound::Predicate {
                def,
                args: bind_args(def, args)?,
            })
        }
    }
}

fn bind_all(children: &[FilterExpression]) -> Result<Vec<Bound>, EvalError> {
    children.iter().map(bind).collect()
}

fn bind_args(def: &PredicateDef, args: &[Literal]) -> Result<Vec<Literal>, EvalError> {
    let arity = |message: String| EvalError::PredicateArity {
        name: def.name().to_string(),
        message,
    };

    if !def.accepts_count(args.len()) {
        let expected = if def.is_variadic() {
            format!("at least {}", def.params().len())
        } else {
            def.params().len().to_string()
        };
        return Err(arity(format!(
            "expected {} argument(s), found {}",
            expected,
            args.len()
        )));
    }

    args.iter()
        .enumerate()
        .map(|(i, arg)| {
            let kind = def
                .param_at(i)
                .ok_or_else(|| arity(format!("unexpected argument {}", i + 1)))?;
            match (kind, arg) {
                (ArgKind::Str, Literal::Str(_)) => Ok(arg.clone()),
                (ArgKind::Str, Literal::Regex(p)) => Ok(Literal::Str(p.as_str().to_string())),
                (ArgKind::Pattern, Literal::Regex(_)) => Ok(arg.clone()),
                (ArgKind::Pattern, Literal::Str(s)) => Pattern::new(s)
                    .map(Literal::Regex)
                    .map_err(|e| arity(format!("argument {} is not a valid regex: {}", i + 1, e))),
                (ArgKind::Bool, Literal::Bool(_)) | (ArgKind::Int, Literal::Int(_)) => {
                    Ok(arg.clone())
                }
                (kind, arg) => Err(arity(format!(
                    "argument {} must be {}, found {}",
                    i + 1,
                    kind,
                    arg.kind_name()
                ))),
            }
        })
        .collect()
}

impl Bound {
    /// Evaluates left to right, stopping as soon as the result is known.
    pub(crate) fn eval(&self, facts: &TrafficFacts<'_>) -> Result<bool, EvalError> {
        match self {
            Bound::And(children) => {
                for child in children {
                    if !child.eval(facts)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Bound::Or(children) => {
                for child in children {
                    if child.eval(facts)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Bound::Not(child) => Ok(!child.eval(facts)?),
            Bound::Predicate { def, args } => {
                if def.is_response_only() && facts.kind() == EventKind::Request {
                    return Err(EvalError::InvalidTarget {
                        name: def.name().to_string(),
                        kind: EventKind::Request,
                    });
                }
                Ok(def.test(args, facts))
            }
        }
    }
}

/// Evaluates an expression against a fact view.
///
/// Every predicate in the tree is resolved before evaluation starts, so an
/// unknown name fails even inside a branch that would be short-circuited.
///
/// # Errors
///
/// Returns [`EvalError`] for an unknown predicate, for arguments that do not
/// fit a predicate's signature, or for a response-only predicate applied to a
/// request.
///
/// # Examples
///
/// ```
/// use addon_core::filter::{evaluate, parse};
/// use addon_core::http::Request;
/// use addon_core::{NoScope, TrafficFacts};
/// use http::Method;
///
/// let req = Request::from_url(Method::GET, "https://example.com/api/users").unwrap();
/// let facts = TrafficFacts::of_request(&req, &NoScope);
///
/// let expr = parse(r#"(path-contains "api")"#).unwrap();
/// assert!(evaluate(&expr, &facts).unwrap());
///
/// let unknown = parse("(no-such-predicate)").unwrap();
/// assert!(evaluate(&unknown, &facts).is_err());
/// ```
pub fn evaluate(expr: &FilterExpression, facts: &TrafficFacts<'_>) -> Result<bool, EvalError> {
    bind(expr)?.eval(facts)
}
