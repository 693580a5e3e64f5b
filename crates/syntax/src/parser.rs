//! Parser for sable expressions using chumsky.
//!
//! The grammar is layered by precedence, lowest first:
//! pipe, let, ternary, `??`, or, and, equality, comparison, range, additive,
//! multiplicative, exponent (right associative), unary, postfix, primary.
//!
//! After chumsky has built the tree a finalization pass resolves line and
//! column information, turns calls to comprehension builtins into
//! [`NodeKind::Builtin`] nodes with a closure argument, and rejects pointer
//! expressions (`#`, `#index`, `#acc`) outside closures.

use chumsky::prelude::*;
use chumsky::Stream;
use std::collections::HashSet;

use crate::ast::*;
use crate::builtins::{self, Predicate};
use crate::errors::{parse_error_to_source_error, SourceError};
use crate::lexer::{lex, Kind, Lexeme, Token};
use crate::source::{Location, Source};

/// Parse error type
pub type ParseError = Simple<Lexeme>;

type Span = std::ops::Range<usize>;

/// Identifiers with a fixed meaning.
const RESERVED: &[&str] = &["true", "false", "nil", "let"];

/// Names a pointer may carry after `#`.
const POINTERS: &[&str] = &["", "index", "acc"];

/// Deepest nesting accepted, counted in brackets and in right-recursive
/// constructs (`**`, `?:`, `let`) before parsing and in tree depth after.
pub const MAX_NESTING: usize = 1000;

/// Longest token stream accepted.
pub const MAX_TOKENS: usize = 10_000;

/// Parser configuration.
#[derive(Debug, Clone, Default)]
pub struct ParseConfig {
    /// Builtins that must not be recognized
    pub disabled: HashSet<String>,
    /// Host functions; a host function named like a builtin replaces it
    pub functions: HashSet<String>,
}

impl ParseConfig {
    fn predicate(&self, name: &str) -> Option<&'static Predicate> {
        if self.disabled.contains(name) || self.functions.contains(name) {
            return None;
        }
        builtins::predicate_named(name)
    }
}

fn loc(span: &Span) -> Location {
    Location::span(span.start, span.end)
}

fn operator(value: &'static str) -> impl Parser<Lexeme, Lexeme, Error = ParseError> + Clone {
    just(Lexeme::operator(value))
}

fn bracket(value: &'static str) -> impl Parser<Lexeme, Lexeme, Error = ParseError> + Clone {
    just(Lexeme::bracket(value))
}

fn keyword(value: &'static str) -> impl Parser<Lexeme, Lexeme, Error = ParseError> + Clone {
    just(Lexeme::identifier(value))
}

fn identifier() -> impl Parser<Lexeme, (String, Span), Error = ParseError> + Clone {
    filter_map(|span: Span, lexeme: Lexeme| {
        if lexeme.kind == Kind::Identifier && !RESERVED.contains(&lexeme.value.as_str()) {
            Ok((lexeme.value, span))
        } else {
            Err(Simple::expected_input_found(span, Vec::new(), Some(lexeme)))
        }
    })
}

/// A name after `.` or `?.`; word operators such as `in` are plain names here.
fn property_name() -> impl Parser<Lexeme, (String, Span), Error = ParseError> + Clone {
    filter_map(|span: Span, lexeme: Lexeme| match lexeme.kind {
        Kind::Identifier => Ok((lexeme.value, span)),
        Kind::Operator if lexeme.value.chars().all(|c| c.is_ascii_alphabetic()) => {
            Ok((lexeme.value, span))
        }
        _ => Err(Simple::expected_input_found(span, Vec::new(), Some(lexeme))),
    })
}

fn literal() -> impl Parser<Lexeme, Node, Error = ParseError> + Clone {
    filter_map(|span: Span, lexeme: Lexeme| {
        let location = loc(&span);
        let kind = match lexeme.kind {
            Kind::Number => {
                parse_number(&lexeme.value).map_err(|message| Simple::custom(span, message))?
            }
            Kind::String => NodeKind::String(lexeme.value),
            Kind::Identifier if lexeme.value == "true" => NodeKind::Bool(true),
            Kind::Identifier if lexeme.value == "false" => NodeKind::Bool(false),
            Kind::Identifier if lexeme.value == "nil" => NodeKind::Nil,
            _ => return Err(Simple::expected_input_found(span, Vec::new(), Some(lexeme))),
        };
        Ok(Node::new(kind, location))
    })
}

/// Convert number text as written (underscores, radix prefixes, exponents)
/// into an integer or float literal.
pub fn parse_number(text: &str) -> Result<NodeKind, String> {
    let clean = text.replace('_', "");
    let lower = clean.to_ascii_lowercase();
    let radix = if lower.starts_with("0x") {
        Some(16)
    } else if lower.starts_with("0o") {
        Some(8)
    } else if lower.starts_with("0b") {
        Some(2)
    } else {
        None
    };

    if let Some(radix) = radix {
        let digits = &clean[2..];
        if digits.is_empty() {
            return Err(format!("invalid number literal: {}", text));
        }
        return i64::from_str_radix(digits, radix)
            .map(NodeKind::Integer)
            .map_err(|_| "integer literal is too large".to_string());
    }

    if lower.contains(['.', 'e']) {
        return lower
            .parse::<f64>()
            .map(NodeKind::Float)
            .map_err(|_| format!("invalid float literal: {}", text));
    }

    clean
        .parse::<i64>()
        .map(NodeKind::Integer)
        .map_err(|_| "integer literal is too large".to_string())
}

fn make_binary(op: BinaryOp, left: Node, right: Node) -> Node {
    let location = left.location.merge(right.location);
    Node::new(
        NodeKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        location,
    )
}

#[derive(Debug, Clone)]
enum Postfix {
    /// `.name` or `?.name`
    Field(String, Span, bool),
    /// `[expr]` or `?.[expr]`
    Index(Node, bool),
    /// `[from:to]`
    Slice(Option<Node>, Option<Node>),
    /// `(args)`
    Call(Vec<Node>),
}

impl Postfix {
    fn is_optional(&self) -> bool {
        matches!(self, Postfix::Field(_, _, true) | Postfix::Index(_, true))
    }
}

fn apply_postfix(receiver: Node, (op, span): (Postfix, Span)) -> Node {
    let location = Location::span(receiver.location.from, span.end);
    let kind = match op {
        Postfix::Field(name, name_span, optional) => NodeKind::Member {
            receiver: Box::new(receiver),
            property: Box::new(Node::new(NodeKind::String(name), loc(&name_span))),
            optional,
            method: false,
        },
        Postfix::Index(index, optional) => NodeKind::Member {
            receiver: Box::new(receiver),
            property: Box::new(index),
            optional,
            method: false,
        },
        Postfix::Slice(from, to) => NodeKind::Slice {
            receiver: Box::new(receiver),
            from: from.map(Box::new),
            to: to.map(Box::new),
        },
        Postfix::Call(arguments) => {
            let mut callee = receiver;
            if let NodeKind::Member { method, .. } = &mut callee.kind {
                *method = true;
            }
            NodeKind::Call {
                callee: Box::new(callee),
                arguments,
            }
        }
    };
    Node::new(kind, location)
}

/// The expression grammar.
pub fn expression() -> impl Parser<Lexeme, Node, Error = ParseError> + Clone {
    recursive(|expr| {
        // === Primary ===
        let pointer = operator("#")
            .ignore_then(identifier().or_not())
            .map_with_span(|name, span: Span| {
                let name = name.map(|(name, _)| name).unwrap_or_default();
                Node::new(NodeKind::Pointer(name), loc(&span))
            });

        // `.field` inside a closure is `#.field`
        let shorthand = operator(".")
            .ignore_then(property_name())
            .map_with_span(|(name, name_span), span: Span| {
                let receiver = Node::new(
                    NodeKind::Pointer(String::new()),
                    Location::span(span.start, span.start + 1),
                );
                Node::new(
                    NodeKind::Member {
                        receiver: Box::new(receiver),
                        property: Box::new(Node::new(NodeKind::String(name), loc(&name_span))),
                        optional: false,
                        method: false,
                    },
                    loc(&span),
                )
            });

        let name = identifier().map(|(name, span)| Node::new(NodeKind::Identifier(name), loc(&span)));

        let grouped = expr.clone().delimited_by(bracket("("), bracket(")"));

        let array = expr
            .clone()
            .separated_by(operator(","))
            .allow_trailing()
            .delimited_by(bracket("["), bracket("]"))
            .map_with_span(|items, span: Span| Node::new(NodeKind::Array(items), loc(&span)));

        let key = choice((
            filter_map(|span: Span, lexeme: Lexeme| {
                let location = loc(&span);
                match lexeme.kind {
                    Kind::String | Kind::Identifier => {
                        Ok(Node::new(NodeKind::String(lexeme.value), location))
                    }
                    Kind::Number => parse_number(&lexeme.value)
                        .map(|kind| Node::new(kind, location))
                        .map_err(|message| Simple::custom(span, message)),
                    _ => Err(Simple::expected_input_found(span, Vec::new(), Some(lexeme))),
                }
            }),
            expr.clone().delimited_by(bracket("("), bracket(")")),
        ));

        let pair = key
            .then_ignore(operator(":"))
            .then(expr.clone())
            .map_with_span(|(key, value), span: Span| {
                Node::new(
                    NodeKind::Pair {
                        key: Box::new(key),
                        value: Box::new(value),
                    },
                    loc(&span),
                )
            });

        let map = pair
            .separated_by(operator(","))
            .allow_trailing()
            .delimited_by(bracket("{"), bracket("}"))
            .map_with_span(|pairs, span: Span| Node::new(NodeKind::Map(pairs), loc(&span)));

        let primary = choice((literal(), pointer, shorthand, name, grouped, array, map)).boxed();

        // === Call arguments ===
        // A `{ body }` argument is a closure when its body is a lone expression,
        // otherwise it is a map literal.
        let closure = expr
            .clone()
            .delimited_by(bracket("{"), bracket("}"))
            .map_with_span(|body, span: Span| Node::new(NodeKind::Closure(Box::new(body)), loc(&span)));

        let arguments = closure
            .or(expr.clone())
            .separated_by(operator(","))
            .allow_trailing()
            .delimited_by(bracket("("), bracket(")"))
            .boxed();

        // === Postfix ===
        let index_or_slice = choice((
            expr.clone()
                .or_not()
                .then_ignore(operator(":"))
                .then(expr.clone().or_not())
                .map(|(from, to)| Postfix::Slice(from, to)),
            expr.clone().map(|index| Postfix::Index(index, false)),
        ))
        .delimited_by(bracket("["), bracket("]"));

        let postfix_op = choice((
            operator(".")
                .ignore_then(property_name())
                .map(|(name, span)| Postfix::Field(name, span, false)),
            operator("?.").ignore_then(choice((
                property_name().map(|(name, span)| Postfix::Field(name, span, true)),
                expr.clone()
                    .delimited_by(bracket("["), bracket("]"))
                    .map(|index| Postfix::Index(index, true)),
            ))),
            index_or_slice,
            arguments.clone().map(Postfix::Call),
        ))
        .map_with_span(|op, span: Span| (op, span));

        let postfix = primary
            .then(postfix_op.repeated())
            .map(|(base, ops): (Node, Vec<(Postfix, Span)>)| {
                let chained = ops.iter().any(|(op, _)| op.is_optional());
                let node = ops.into_iter().fold(base, apply_postfix);
                if chained {
                    let location = node.location;
                    Node::new(NodeKind::Chain(Box::new(node)), location)
                } else {
                    node
                }
            })
            .boxed();

        // === Unary: - + ! not ===
        let unary_op = choice((
            operator("-").to(UnaryOp::Neg),
            operator("+").to(UnaryOp::Plus),
            operator("!").to(UnaryOp::Not),
            operator("not").to(UnaryOp::Not),
        ))
        .map_with_span(|op, span: Span| (op, span));

        let unary = unary_op
            .repeated()
            .then(postfix)
            .foldr(|(op, span), operand| {
                let location = Location::span(span.start, operand.location.to);
                Node::new(
                    NodeKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    location,
                )
            })
            .boxed();

        // === ** ^ (right associative) ===
        let exponent = recursive(|exponent| {
            unary
                .clone()
                .then(
                    choice((operator("**"), operator("^")))
                        .ignore_then(exponent)
                        .or_not(),
                )
                .map(|(base, power): (Node, Option<Node>)| match power {
                    Some(power) => make_binary(BinaryOp::Pow, base, power),
                    None => base,
                })
        })
        .boxed();

        // === * / % ===
        let multiplicative = exponent
            .clone()
            .then(
                choice((
                    operator("*").to(BinaryOp::Mul),
                    operator("/").to(BinaryOp::Div),
                    operator("%").to(BinaryOp::Mod),
                ))
                .then(exponent)
                .repeated(),
            )
            .foldl(|left, (op, right)| make_binary(op, left, right))
            .boxed();

        // === + - ===
        let additive = multiplicative
            .clone()
            .then(
                choice((operator("+").to(BinaryOp::Add), operator("-").to(BinaryOp::Sub)))
                    .then(multiplicative)
                    .repeated(),
            )
            .foldl(|left, (op, right)| make_binary(op, left, right))
            .boxed();

        // === .. ===
        let range = additive
            .clone()
            .then(operator("..").ignore_then(additive).or_not())
            .map(|(from, to): (Node, Option<Node>)| match to {
                Some(to) => make_binary(BinaryOp::Range, from, to),
                None => from,
            })
            .boxed();

        // === < <= > >= in, not in, matches, contains, startsWith, endsWith ===
        let comparison = range
            .clone()
            .then(
                choice((
                    operator("<").to(BinaryOp::Lt),
                    operator("<=").to(BinaryOp::Le),
                    operator(">").to(BinaryOp::Gt),
                    operator(">=").to(BinaryOp::Ge),
                    operator("in").to(BinaryOp::In),
                    operator("not in").to(BinaryOp::NotIn),
                    operator("matches").to(BinaryOp::Matches),
                    operator("contains").to(BinaryOp::Contains),
                    operator("startsWith").to(BinaryOp::StartsWith),
                    operator("endsWith").to(BinaryOp::EndsWith),
                ))
                .then(range)
                .repeated(),
            )
            .foldl(|left, (op, right)| make_binary(op, left, right))
            .boxed();

        // === == != ===
        let equality = comparison
            .clone()
            .then(
                choice((operator("==").to(BinaryOp::Eq), operator("!=").to(BinaryOp::Ne)))
                    .then(comparison)
                    .repeated(),
            )
            .foldl(|left, (op, right)| make_binary(op, left, right))
            .boxed();

        // The logic levels also report whether an unparenthesized `&&`/`||`
        // was used, so `??` can reject the mix.
        let and = equality
            .clone()
            .then(
                choice((operator("&&"), operator("and")))
                    .ignore_then(equality)
                    .repeated(),
            )
            .map(|(first, rest): (Node, Vec<Node>)| {
                let logical = !rest.is_empty();
                let node = rest
                    .into_iter()
                    .fold(first, |left, right| make_binary(BinaryOp::And, left, right));
                (node, logical)
            })
            .boxed();

        let or = and
            .clone()
            .then(
                choice((operator("||"), operator("or")))
                    .ignore_then(and)
                    .repeated(),
            )
            .map(|((first, logical), rest): ((Node, bool), Vec<(Node, bool)>)| {
                let logical = logical || !rest.is_empty();
                let node = rest
                    .into_iter()
                    .fold(first, |left, (right, _)| make_binary(BinaryOp::Or, left, right));
                (node, logical)
            })
            .boxed();

        let coalesce = or
            .clone()
            .then(operator("??").ignore_then(or).repeated())
            .try_map(
                |((first, logical), rest): ((Node, bool), Vec<(Node, bool)>), span: Span| {
                    if !rest.is_empty() && (logical || rest.iter().any(|(_, mixed)| *mixed)) {
                        return Err(Simple::custom(
                            span,
                            "operator (??) and (||, &&) cannot be mixed without parentheses",
                        ));
                    }
                    Ok(rest
                        .into_iter()
                        .fold(first, |left, (right, _)| make_binary(BinaryOp::Coalesce, left, right)))
                },
            )
            .boxed();

        // === cond ? a : b, cond ?: b ===
        let ternary = recursive(|ternary| {
            coalesce
                .clone()
                .then(
                    operator("?")
                        .ignore_then(choice((
                            operator(":")
                                .ignore_then(ternary.clone())
                                .map(|otherwise| (None::<Node>, otherwise)),
                            ternary
                                .clone()
                                .then_ignore(operator(":"))
                                .then(ternary.clone())
                                .map(|(then, otherwise)| (Some(then), otherwise)),
                        )))
                        .or_not(),
                )
                .map(|(cond, branches): (Node, Option<(Option<Node>, Node)>)| match branches {
                    None => cond,
                    Some((then, otherwise)) => {
                        let then = then.unwrap_or_else(|| cond.clone());
                        let location = cond.location.merge(otherwise.location);
                        Node::new(
                            NodeKind::Conditional {
                                cond: Box::new(cond),
                                then: Box::new(then),
                                otherwise: Box::new(otherwise),
                            },
                            location,
                        )
                    }
                })
        })
        .boxed();

        // === let name = value; expr ===
        let binding = keyword("let")
            .ignore_then(identifier())
            .then_ignore(operator("="))
            .then(expr.clone())
            .then_ignore(operator(";"))
            .then(expr.clone())
            .map_with_span(|(((name, _), value), body), span: Span| {
                Node::new(
                    NodeKind::VariableDeclarator {
                        name,
                        value: Box::new(value),
                        expr: Box::new(body),
                    },
                    loc(&span),
                )
            });

        let body = binding.or(ternary).boxed();

        // === a | f(args) ===
        let pipe_target = identifier()
            .then(arguments)
            .map_with_span(|((name, name_span), arguments), span: Span| {
                let callee = Node::new(NodeKind::Identifier(name), loc(&name_span));
                (callee, arguments, span)
            });

        body.then(operator("|").ignore_then(pipe_target).repeated())
            .foldl(|input, (callee, mut arguments, span)| {
                let location = input.location.merge(loc(&span));
                arguments.insert(0, input);
                Node::new(
                    NodeKind::Call {
                        callee: Box::new(callee),
                        arguments,
                    },
                    location,
                )
            })
    })
}

// =============================================================================
// Finalization
// =============================================================================

struct Finalizer<'a> {
    config: &'a ParseConfig,
    source: &'a Source,
    closure_depth: usize,
}

impl<'a> Finalizer<'a> {
    fn new(config: &'a ParseConfig, source: &'a Source) -> Self {
        Self {
            config,
            source,
            closure_depth: 0,
        }
    }

    fn error(&self, message: impl Into<String>, location: Location) -> SourceError {
        SourceError::parse(message, location).resolve(self.source)
    }

    fn visit(&mut self, node: &mut Node) -> Result<(), SourceError> {
        self.source.resolve(&mut node.location);
        self.desugar_predicate(node)?;

        match &mut node.kind {
            NodeKind::Pointer(name) => {
                if self.closure_depth == 0 {
                    return Err(self.error(
                        "cannot use pointer accessor outside predicate",
                        node.location,
                    ));
                }
                if !POINTERS.contains(&name.as_str()) {
                    return Err(self.error(format!("unknown pointer #{}", name), node.location));
                }
                Ok(())
            }
            NodeKind::Closure(_) => Err(self.error(
                "closure is only allowed as a predicate argument",
                node.location,
            )),
            NodeKind::Builtin { arguments, .. } => {
                for (index, argument) in arguments.iter_mut().enumerate() {
                    match &mut argument.kind {
                        NodeKind::Closure(body) if index == 1 => {
                            self.source.resolve(&mut argument.location);
                            self.closure_depth += 1;
                            let result = self.visit(body);
                            self.closure_depth -= 1;
                            result?;
                        }
                        _ => self.visit(argument)?,
                    }
                }
                Ok(())
            }
            _ => {
                for child in node.children_mut() {
                    self.visit(child)?;
                }
                Ok(())
            }
        }
    }

    /// `all(xs, # > 0)` -> `Builtin{all, [xs, Closure(# > 0)]}`
    fn desugar_predicate(&mut self, node: &mut Node) -> Result<(), SourceError> {
        let NodeKind::Call { callee, arguments } = &mut node.kind else {
            return Ok(());
        };
        let NodeKind::Identifier(name) = &callee.kind else {
            return Ok(());
        };
        let Some(predicate) = self.config.predicate(name) else {
            return Ok(());
        };

        if arguments.len() < predicate.min_args || arguments.len() > predicate.max_args {
            let expected = if predicate.min_args == predicate.max_args {
                predicate.min_args.to_string()
            } else {
                format!("{} or {}", predicate.min_args, predicate.max_args)
            };
            return Err(self.error(
                format!(
                    "invalid number of arguments to {} (expected {}, got {})",
                    predicate.name,
                    expected,
                    arguments.len()
                ),
                node.location,
            ));
        }

        let mut arguments = std::mem::take(arguments);
        match arguments.get_mut(1) {
            Some(argument) if !matches!(argument.kind, NodeKind::Closure(_)) => {
                let location = argument.location;
                let body = std::mem::replace(argument, Node::new(NodeKind::Nil, location));
                *argument = Node::new(NodeKind::Closure(Box::new(body)), location);
            }
            Some(_) => {}
            None if predicate.name == "count" => {
                let location = arguments[0].location;
                let element = Node::new(NodeKind::Pointer(String::new()), location);
                arguments.push(Node::new(NodeKind::Closure(Box::new(element)), location));
            }
            None => {}
        }

        node.kind = NodeKind::Builtin {
            name: predicate.name.to_string(),
            arguments,
        };
        Ok(())
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Parse with the default configuration.
pub fn parse(source: &str) -> (Option<Tree>, Vec<SourceError>) {
    parse_with(source, &ParseConfig::default())
}

/// Lex and parse. Returns whatever tree could be built plus all errors,
/// ordered by position; the first one is the error to report.
pub fn parse_with(source: &str, config: &ParseConfig) -> (Option<Tree>, Vec<SourceError>) {
    let source = Source::new(source);
    match lex(&source) {
        Ok(tokens) => parse_tokens(&source, tokens, config),
        Err(err) => (None, vec![err]),
    }
}

/// Parse an already lexed token stream.
pub fn parse_tokens(
    source: &Source,
    tokens: Vec<Token>,
    config: &ParseConfig,
) -> (Option<Tree>, Vec<SourceError>) {
    // Out of range literals are rejected before parsing so the error does
    // not compete with grammar alternatives.
    for token in tokens.iter().filter(|token| token.kind == Kind::Number) {
        if let Err(message) = parse_number(&token.value) {
            return (None, vec![SourceError::type_error(message, token.location)]);
        }
    }

    if let Some(err) = check_size(&tokens) {
        return (None, vec![err]);
    }

    let len = source.len();
    let stream = Stream::from_iter(
        len..len + 1,
        tokens
            .into_iter()
            .filter(|token| token.kind != Kind::EOF)
            .map(|token| {
                let span = token.location.from..token.location.to;
                (token.lexeme(), span)
            }),
    );

    let (node, errors) = expression().then_ignore(end()).parse_recovery(stream);

    let mut errors: Vec<SourceError> = errors
        .iter()
        .map(|err| parse_error_to_source_error(err).resolve(source))
        .collect();
    errors.sort_by_key(|err| err.location.from);

    if let Some(location) = node.as_ref().and_then(too_deep) {
        errors.insert(0, nesting_error(location).resolve(source));
        return (None, errors);
    }

    let tree = node.map(|mut node| {
        if let Err(err) = Finalizer::new(config, source).visit(&mut node) {
            errors.push(err);
        }
        Tree {
            node,
            source: source.clone(),
        }
    });

    (tree, errors)
}

fn nesting_error(location: Location) -> SourceError {
    SourceError::parse("expression nesting too deep", location)
}

/// Reject token streams the recursive parser could not handle safely.
fn check_size(tokens: &[Token]) -> Option<SourceError> {
    if tokens.len() > MAX_TOKENS {
        let location = tokens[MAX_TOKENS].location;
        return Some(SourceError::parse("expression too large", location));
    }
    let mut brackets = 0usize;
    let mut recursive = 0usize;
    for token in tokens {
        match (token.kind, token.value.as_str()) {
            (Kind::Bracket, "(" | "[" | "{") => brackets += 1,
            (Kind::Bracket, _) => brackets = brackets.saturating_sub(1),
            (Kind::Operator, "?" | "**" | "^") | (Kind::Identifier, "let") => recursive += 1,
            _ => {}
        }
        if brackets + recursive > MAX_NESTING {
            return Some(nesting_error(token.location));
        }
    }
    None
}

/// Location of the first node found below `MAX_NESTING`, walking without
/// recursion.
fn too_deep(root: &Node) -> Option<Location> {
    let mut stack = vec![(root, 1usize)];
    while let Some((node, depth)) = stack.pop() {
        if depth > MAX_NESTING {
            return Some(node.location);
        }
        stack.extend(node.children().into_iter().map(|child| (child, depth + 1)));
    }
    None
}

/// Parse a single expression, failing on the first error.
pub fn parse_expr(source: &str) -> Result<Tree, SourceError> {
    parse_expr_with(source, &ParseConfig::default())
}

pub fn parse_expr_with(source: &str, config: &ParseConfig) -> Result<Tree, SourceError> {
    let (tree, mut errors) = parse_with(source, config);
    if !errors.is_empty() {
        return Err(errors.remove(0));
    }
    tree.ok_or_else(|| SourceError::parse("empty expression", Location::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1_000"), Ok(NodeKind::Integer(1000)));
        assert_eq!(parse_number("0xFF"), Ok(NodeKind::Integer(255)));
        assert_eq!(parse_number("0o17"), Ok(NodeKind::Integer(15)));
        assert_eq!(parse_number("0b101"), Ok(NodeKind::Integer(5)));
        assert_eq!(parse_number("1e3"), Ok(NodeKind::Float(1000.0)));
        assert_eq!(parse_number(".5"), Ok(NodeKind::Float(0.5)));
        assert!(parse_number("99999999999999999999").is_err());
    }

    #[test]
    fn test_precedence() {
        let tree = parse_expr("1 + 2 * 3").unwrap();
        assert_eq!(tree.node.to_string(), "(1 + (2 * 3))");
    }

    #[test]
    fn test_locations_resolved() {
        let tree = parse_expr("a +\n  b").unwrap();
        let NodeKind::Binary { right, .. } = &tree.node.kind else {
            panic!("expected binary");
        };
        assert_eq!(right.location.line, 2);
        assert_eq!(right.location.column, 2);
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert!(parse_expr(&nested(200)).is_ok());

        let err = parse_expr(&nested(2_000)).unwrap_err();
        assert_eq!(err.message, "expression nesting too deep");
        assert_eq!(err.location.column, MAX_NESTING);

        let powers = vec!["2"; MAX_NESTING + 2].join(" ** ");
        let err = parse_expr(&powers).unwrap_err();
        assert_eq!(err.message, "expression nesting too deep");
    }

    #[test]
    fn test_long_operator_chain() {
        let chain = vec!["1"; MAX_NESTING + 10].join(" + ");
        let err = parse_expr(&chain).unwrap_err();
        assert_eq!(err.message, "expression nesting too deep");

        let err = parse_expr(&vec!["1"; MAX_TOKENS].join(",")).unwrap_err();
        assert_eq!(err.message, "expression too large");
    }
}
