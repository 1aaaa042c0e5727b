//! Parser producing the syntax tree in `ast`.
//!
//! Grammar follows Python's for the supported subset. Operator precedence
//! is resolved with `chumsky`'s pratt parser, and blocks rely on the
//! `Indent` / `Dedent` tokens inserted by the lexer's layout pass. Anything
//! outside the subset is reported as a `ParseError` with the offending
//! token's position.
use std::sync::Arc;

use chumsky::error::{RichPattern, RichReason};
use chumsky::{input::ValueInput, pratt::*, prelude::*};

use crate::error::ParseError;

use super::ast::{
    Alias, BinOp, BoolOp, CmpOp, Constant, Expr, FunctionDef, ImportNames, Param, Stmt, StmtKind,
    UnaryOp,
};
use super::lexer::{tokenize, Keyword, LineIndex, Span, Token};

type Extra<'src> = extra::Err<Rich<'src, Token, Span>>;

/// Parses a whole module.
pub fn parse_module(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let lines = LineIndex::new(source);
    let tokens = tokenize(source, &lines)?;
    let input = tokens
        .as_slice()
        .map(Span::from(source.len()..source.len()), |(token, span)| {
            (token, span)
        });
    let result = module(&lines)
        .parse(input)
        .into_result()
        .map_err(|errors| syntax_error(source, &lines, errors));
    result
}

/// Parses a single expression (used by the `eval` builtin).
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let lines = LineIndex::new(source);
    let tokens = tokenize(source, &lines)?;
    let input = tokens
        .as_slice()
        .map(Span::from(source.len()..source.len()), |(token, span)| {
            (token, span)
        });
    let result = expression_list(expression())
        .then_ignore(just(Token::Newline).or_not())
        .parse(input)
        .into_result()
        .map_err(|errors| syntax_error(source, &lines, errors));
    result
}

fn module<'src, I>(lines: &'src LineIndex) -> impl Parser<'src, I, Vec<Stmt>, Extra<'src>>
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    statement(lines)
        .repeated()
        .collect::<Vec<Vec<Stmt>>>()
        .map(|statements| statements.into_iter().flatten().collect())
}

fn keyword<'src, I>(keyword: Keyword) -> impl Parser<'src, I, Token, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    just(Token::Keyword(keyword))
}

fn name<'src, I>() -> impl Parser<'src, I, String, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    select! { Token::Name(name) => name }.labelled("a name")
}

/// One logical statement. Simple statements joined by `;` come back
/// together, which is why the output is a list.
fn statement<'src, I>(lines: &'src LineIndex) -> impl Parser<'src, I, Vec<Stmt>, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    let line_of = move |span: Span| lines.line(span.start);

    let expr = expression();
    let expr_list = expression_list(expr.clone());
    let comma = just(Token::Comma);

    let dotted_name = name()
        .separated_by(just(Token::Dot))
        .at_least(1)
        .collect::<Vec<_>>()
        .map(|parts| parts.join("."));
    let module_alias = dotted_name
        .clone()
        .then(keyword(Keyword::As).ignore_then(name()).or_not())
        .map(|(name, asname)| Alias { name, asname });
    let name_alias = name()
        .then(keyword(Keyword::As).ignore_then(name()).or_not())
        .map(|(name, asname)| Alias { name, asname });

    let import = keyword(Keyword::Import)
        .ignore_then(
            module_alias
                .separated_by(comma.clone())
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(StmtKind::Import);

    let import_from = keyword(Keyword::From)
        .ignore_then(
            just(Token::Dot)
                .repeated()
                .collect::<Vec<_>>()
                .map(|dots| dots.len()),
        )
        .then(dotted_name.or_not())
        .then_ignore(keyword(Keyword::Import))
        .then(choice((
            just(Token::Star).to(ImportNames::Star),
            name_alias
                .clone()
                .separated_by(comma.clone())
                .at_least(1)
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map(ImportNames::Names),
            name_alias
                .separated_by(comma.clone())
                .at_least(1)
                .collect::<Vec<_>>()
                .map(ImportNames::Names),
        )))
        .validate(|((level, module), names), e, emitter| {
            if level == 0 && module.is_none() {
                emitter.emit(Rich::custom(e.span(), "expected module name"));
            }
            StmtKind::ImportFrom {
                module,
                level,
                names,
            }
        });

    let augmented_operator = select! {
        Token::PlusAssign => BinOp::Add,
        Token::MinusAssign => BinOp::Sub,
        Token::StarAssign => BinOp::Mul,
        Token::SlashAssign => BinOp::Div,
        Token::DoubleSlashAssign => BinOp::FloorDiv,
        Token::PercentAssign => BinOp::Mod,
    };

    let expression_statement = expr_list
        .clone()
        .then(
            choice((
                augmented_operator
                    .then(expr_list.clone())
                    .map(|(op, value)| Tail::Augmented(op, value)),
                just(Token::Assign)
                    .ignore_then(expr_list.clone())
                    .repeated()
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .map(Tail::Assigned),
            ))
            .or_not(),
        )
        .validate(|(first, tail), e, emitter| {
            let kind = match tail {
                None => return StmtKind::Expr(first),
                Some(Tail::Augmented(op, value)) => StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
                Some(Tail::Assigned(mut rest)) => {
                    let value = rest.pop().unwrap_or(Expr::Constant(Constant::None));
                    let targets = std::iter::once(first).chain(rest).collect();
                    StmtKind::Assign { targets, value }
                }
            };
            let targets = match &kind {
                StmtKind::AugAssign { target, .. } => std::slice::from_ref(target),
                StmtKind::Assign { targets, .. } => targets.as_slice(),
                _ => &[],
            };
            if let Some(message) = targets.iter().find_map(|t| ensure_assignable(t).err()) {
                emitter.emit(Rich::custom(e.span(), message));
            }
            kind
        });

    let small_statement = choice((
        keyword(Keyword::Pass).to(StmtKind::Pass),
        keyword(Keyword::Break).to(StmtKind::Break),
        keyword(Keyword::Continue).to(StmtKind::Continue),
        keyword(Keyword::Return)
            .ignore_then(expr_list.clone().or_not())
            .map(StmtKind::Return),
        keyword(Keyword::Raise)
            .ignore_then(expr.clone().or_not())
            .map(StmtKind::Raise),
        keyword(Keyword::Global)
            .ignore_then(name().separated_by(comma).at_least(1).collect::<Vec<_>>())
            .map(StmtKind::Global),
        import,
        import_from,
        expression_statement,
    ))
    .map_with(move |kind, e| Stmt::new(kind, line_of(e.span())));

    let simple_statements = small_statement
        .separated_by(just(Token::Semicolon))
        .at_least(1)
        .allow_trailing()
        .collect::<Vec<_>>()
        .then_ignore(just(Token::Newline).labelled("end of statement"));

    recursive(move |statement| {
        let block = just(Token::Colon).ignore_then(choice((
            just(Token::Newline).ignore_then(
                statement
                    .repeated()
                    .at_least(1)
                    .collect::<Vec<Vec<Stmt>>>()
                    .delimited_by(just(Token::Indent), just(Token::Dedent))
                    .map(|statements| statements.into_iter().flatten().collect()),
            ),
            simple_statements.clone(),
        )));

        let elif_clause = keyword(Keyword::Elif)
            .map_with(move |_, e| line_of(e.span()))
            .then(expr.clone())
            .then(block.clone());
        let if_statement = keyword(Keyword::If)
            .ignore_then(expr.clone())
            .then(block.clone())
            .then(elif_clause.repeated().collect::<Vec<_>>())
            .then(keyword(Keyword::Else).ignore_then(block.clone()).or_not())
            .map(|(((test, body), elifs), orelse)| {
                let orelse = elifs.into_iter().rev().fold(
                    orelse.unwrap_or_default(),
                    |orelse, ((line, test), body)| {
                        vec![Stmt::new(StmtKind::If { test, body, orelse }, line)]
                    },
                );
                StmtKind::If { test, body, orelse }
            });

        let while_statement = keyword(Keyword::While)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(test, body)| StmtKind::While { test, body });

        let for_statement = keyword(Keyword::For)
            .ignore_then(name())
            .then_ignore(keyword(Keyword::In))
            .then(expr_list.clone())
            .then(block.clone())
            .map(|((target, iter), body)| StmtKind::For { target, iter, body });

        let parameter = name()
            .then(just(Token::Assign).ignore_then(expr.clone()).or_not())
            .map(|(name, default)| Param { name, default });
        let function_def = keyword(Keyword::Def)
            .ignore_then(name())
            .then(
                parameter
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(block)
            .map_with(move |((name, params), body), e| {
                let def = FunctionDef {
                    name,
                    params,
                    body,
                    line: line_of(e.span()),
                };
                StmtKind::FunctionDef(Arc::new(def))
            });

        choice((if_statement, while_statement, for_statement, function_def))
            .map_with(move |kind, e| vec![Stmt::new(kind, line_of(e.span()))])
            .or(simple_statements.clone())
    })
}

/// What follows the first expression of an expression statement.
enum Tail {
    Augmented(BinOp, Expr),
    Assigned(Vec<Expr>),
}

enum Argument {
    Positional(Expr),
    Keyword(String, Expr),
}

/// An expression, or a bare tuple `a, b`.
fn expression_list<'src, I, P>(expr: P) -> impl Parser<'src, I, Expr, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
    P: Parser<'src, I, Expr, Extra<'src>> + Clone,
{
    expr.clone()
        .then(
            just(Token::Comma)
                .ignore_then(expr)
                .repeated()
                .collect::<Vec<_>>(),
        )
        .then(just(Token::Comma).or_not())
        .map(|((first, rest), trailing)| {
            if rest.is_empty() && trailing.is_none() {
                first
            } else {
                Expr::Tuple(std::iter::once(first).chain(rest).collect())
            }
        })
}

fn expression<'src, I>() -> impl Parser<'src, I, Expr, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    recursive(|expr| {
        let expr_list = expression_list(expr.clone());
        let comma = just(Token::Comma);

        let constant = select! {
            Token::Int(value) => Constant::Int(value),
            Token::Float(value) => Constant::Float(value),
            Token::Keyword(Keyword::True) => Constant::Bool(true),
            Token::Keyword(Keyword::False) => Constant::Bool(false),
            Token::Keyword(Keyword::None) => Constant::None,
        }
        .map(Expr::Constant);

        // Adjacent literals concatenate: `'a' "b"` is `'ab'`.
        let string = select! { Token::Str(text) => text }
            .repeated()
            .at_least(1)
            .collect::<Vec<String>>()
            .map(|parts| Expr::Constant(Constant::Str(parts.concat())));

        let parenthesized = expr_list
            .clone()
            .or_not()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|inner| inner.unwrap_or(Expr::Tuple(Vec::new())));

        let list = expr
            .clone()
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(Expr::List);

        let dict = expr
            .clone()
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(Expr::Dict);

        let atom = choice((
            name().map(Expr::Name),
            constant,
            string,
            parenthesized,
            list,
            dict,
        ))
        .labelled("an expression");

        let argument = choice((
            name()
                .then_ignore(just(Token::Assign))
                .then(expr.clone())
                .map(|(name, value)| Argument::Keyword(name, value)),
            expr.clone().map(Argument::Positional),
        ));
        let call = argument
            .separated_by(comma)
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .validate(|arguments, e, emitter| {
                split_arguments(arguments).unwrap_or_else(|message| {
                    emitter.emit(Rich::custom(e.span(), message));
                    (Vec::new(), Vec::new())
                })
            });
        let subscript = expr_list
            .clone()
            .delimited_by(just(Token::LBracket), just(Token::RBracket));
        let attribute = just(Token::Dot).ignore_then(name());

        // `**` binds tighter than a unary minus on its left (`-2 ** 2` is
        // `-(2 ** 2)`) but its right operand may itself be unary.
        let arithmetic = atom.pratt((
            infix(
                left(1),
                select! { Token::Plus => BinOp::Add, Token::Minus => BinOp::Sub },
                |lhs, op, rhs, _| binop(lhs, op, rhs),
            ),
            infix(
                left(2),
                select! {
                    Token::Star => BinOp::Mul,
                    Token::Slash => BinOp::Div,
                    Token::DoubleSlash => BinOp::FloorDiv,
                    Token::Percent => BinOp::Mod,
                },
                |lhs, op, rhs, _| binop(lhs, op, rhs),
            ),
            prefix(
                3,
                select! { Token::Minus => UnaryOp::Neg, Token::Plus => UnaryOp::Pos },
                |op, operand, _| unary(op, operand),
            ),
            infix(right(4), just(Token::DoubleStar), |lhs, _, rhs, _| {
                binop(lhs, BinOp::Pow, rhs)
            }),
            postfix(
                5,
                call,
                |func, (args, kwargs): (Vec<Expr>, Vec<(String, Expr)>), _| Expr::Call {
                    func: Box::new(func),
                    args,
                    kwargs,
                },
            ),
            postfix(5, subscript, |value, index, _| Expr::Subscript {
                value: Box::new(value),
                index: Box::new(index),
            }),
            postfix(5, attribute, |value, attr, _| Expr::Attribute {
                value: Box::new(value),
                attr,
            }),
        ));

        let comparison_operator = choice((
            select! {
                Token::EqEq => CmpOp::Eq,
                Token::NotEq => CmpOp::NotEq,
                Token::Lt => CmpOp::Lt,
                Token::LtE => CmpOp::LtE,
                Token::Gt => CmpOp::Gt,
                Token::GtE => CmpOp::GtE,
                Token::Keyword(Keyword::In) => CmpOp::In,
            },
            keyword(Keyword::Not)
                .then(keyword(Keyword::In))
                .to(CmpOp::NotIn),
            keyword(Keyword::Is)
                .then(keyword(Keyword::Not))
                .to(CmpOp::IsNot),
            keyword(Keyword::Is).to(CmpOp::Is),
        ));

        // `a < b <= c` keeps every operator in one node.
        let comparison = arithmetic
            .clone()
            .then(
                comparison_operator
                    .then(arithmetic)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                if ops.is_empty() {
                    left
                } else {
                    Expr::Compare {
                        left: Box::new(left),
                        ops,
                    }
                }
            });

        let or_test = comparison.pratt((
            infix(left(1), keyword(Keyword::Or), |lhs, _, rhs, _| {
                boolop(lhs, BoolOp::Or, rhs)
            }),
            infix(left(2), keyword(Keyword::And), |lhs, _, rhs, _| {
                boolop(lhs, BoolOp::And, rhs)
            }),
            prefix(3, keyword(Keyword::Not), |_, operand, _| {
                unary(UnaryOp::Not, operand)
            }),
        ));

        or_test
            .clone()
            .then(
                keyword(Keyword::If)
                    .ignore_then(or_test)
                    .then_ignore(keyword(Keyword::Else))
                    .then(expr)
                    .or_not(),
            )
            .map(|(body, conditional)| match conditional {
                Some((test, orelse)) => Expr::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                None => body,
            })
    })
}

fn split_arguments(
    arguments: Vec<Argument>,
) -> Result<(Vec<Expr>, Vec<(String, Expr)>), String> {
    let mut args = Vec::new();
    let mut kwargs: Vec<(String, Expr)> = Vec::new();
    for argument in arguments {
        match argument {
            Argument::Positional(value) => {
                if !kwargs.is_empty() {
                    return Err("positional argument follows keyword argument".to_string());
                }
                args.push(value);
            }
            Argument::Keyword(name, value) => {
                if kwargs.iter().any(|(existing, _)| *existing == name) {
                    return Err(format!("keyword argument repeated: {name}"));
                }
                kwargs.push((name, value));
            }
        }
    }
    Ok((args, kwargs))
}

fn binop(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr::BinOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

fn boolop(left: Expr, op: BoolOp, right: Expr) -> Expr {
    Expr::BoolOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::UnaryOp {
        op,
        operand: Box::new(operand),
    }
}

fn ensure_assignable(target: &Expr) -> Result<(), String> {
    match target {
        Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
        Expr::Tuple(_) => Err("tuple unpacking is not supported".to_string()),
        _ => Err("cannot assign to expression".to_string()),
    }
}

fn syntax_error(source: &str, lines: &LineIndex, errors: Vec<Rich<'_, Token, Span>>) -> ParseError {
    let Some(error) = errors.into_iter().min_by_key(|error| error.span().start) else {
        return ParseError::new(1, 1, "invalid syntax");
    };
    let (line, column) = lines.position(source, error.span().start);
    let message = match error.reason() {
        RichReason::Custom(message) => message.clone(),
        _ => {
            let mut expected: Vec<String> = error.expected().map(describe_pattern).collect();
            expected.sort();
            expected.dedup();
            let found = error.found().map_or_else(|| "end of file".to_string(), describe);
            if expected.is_empty() {
                format!("unexpected {found}")
            } else {
                format!("expected {}, found {found}", expected.join(" or "))
            }
        }
    };
    ParseError::new(line, column, message)
}

fn describe_pattern(pattern: &RichPattern<'_, Token>) -> String {
    match pattern {
        RichPattern::Token(token) => describe(token),
        RichPattern::Label(label) => label.to_string(),
        RichPattern::EndOfInput => "end of file".to_string(),
        _ => "something else".to_string(),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Name(name) => format!("name '{name}'"),
        Token::Int(value) => format!("number {value}"),
        Token::Float(value) => format!("number {value}"),
        Token::Str(_) => "string".to_string(),
        Token::Keyword(keyword) => format!("'{}'", keyword.as_str()),
        Token::Newline => "end of line".to_string(),
        Token::Indent => "an indented block".to_string(),
        Token::Dedent => "end of block".to_string(),
        other => format!("'{}'", other.symbol().unwrap_or("?")),
    }
}
