//! Tokenizer for the script language.
//!
//! `lexer` turns source text into raw tokens. `tokenize` then runs the
//! layout pass, which turns leading whitespace into explicit `Indent` /
//! `Dedent` tokens the way Python does: blank and comment-only lines are
//! ignored, and newlines inside brackets do not end a logical line. The
//! layout pass also bounds nesting, so the parser and everything that walks
//! its tree only ever see shallow input.
use chumsky::error::RichReason;
use chumsky::prelude::*;

use crate::error::ParseError;

pub type Span = SimpleSpan;
pub type Spanned = (Token, Span);

/// Deepest bracket or block nesting a unit may use.
pub const MAX_NESTING: usize = 64;

/// Bound on the tree depth one expression may build (see `DepthEstimate`).
pub const MAX_EXPRESSION_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(Keyword),

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,

    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,

    EqEq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,

    Newline,
    Indent,
    Dedent,
}

impl Token {
    pub fn symbol(&self) -> Option<&'static str> {
        let symbol = match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::Semicolon => ";",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::DoubleStar => "**",
            Token::Slash => "/",
            Token::DoubleSlash => "//",
            Token::Percent => "%",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::DoubleSlashAssign => "//=",
            Token::PercentAssign => "%=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtE => "<=",
            Token::Gt => ">",
            Token::GtE => ">=",
            _ => return None,
        };
        Some(symbol)
    }

    fn opens_group(&self) -> bool {
        matches!(self, Token::LParen | Token::LBracket | Token::LBrace)
    }

    fn closes_group(&self) -> bool {
        matches!(self, Token::RParen | Token::RBracket | Token::RBrace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Not,
    And,
    Or,
    Is,
    True,
    False,
    None,
    Pass,
    Break,
    Continue,
    Import,
    From,
    As,
    Global,
    Raise,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("def", Keyword::Def),
    ("return", Keyword::Return),
    ("if", Keyword::If),
    ("elif", Keyword::Elif),
    ("else", Keyword::Else),
    ("while", Keyword::While),
    ("for", Keyword::For),
    ("in", Keyword::In),
    ("not", Keyword::Not),
    ("and", Keyword::And),
    ("or", Keyword::Or),
    ("is", Keyword::Is),
    ("True", Keyword::True),
    ("False", Keyword::False),
    ("None", Keyword::None),
    ("pass", Keyword::Pass),
    ("break", Keyword::Break),
    ("continue", Keyword::Continue),
    ("import", Keyword::Import),
    ("from", Keyword::From),
    ("as", Keyword::As),
    ("global", Keyword::Global),
    ("raise", Keyword::Raise),
];

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        KEYWORDS
            .iter()
            .find(|(text, _)| *text == word)
            .map(|(_, keyword)| *keyword)
    }

    pub fn as_str(self) -> &'static str {
        KEYWORDS
            .iter()
            .find(|(_, keyword)| *keyword == self)
            .map_or("keyword", |(text, _)| *text)
    }
}

/// Reserved words of the full language that this subset does not support.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "class", "try", "except", "finally", "with", "lambda", "yield", "async", "await", "del",
    "nonlocal", "assert",
];

/// Byte offsets of line starts, for turning spans into line/column pairs.
#[derive(Debug)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(index, _)| index + 1))
            .collect();
        Self { starts }
    }

    /// 1-based line holding `offset`.
    pub fn line(&self, offset: usize) -> u32 {
        self.starts.partition_point(|&start| start <= offset) as u32
    }

    fn line_start(&self, offset: usize) -> usize {
        let index = self.starts.partition_point(|&start| start <= offset);
        self.starts.get(index.saturating_sub(1)).copied().unwrap_or(0)
    }

    /// 1-based line and character column of `offset`.
    pub fn position(&self, source: &str, offset: usize) -> (u32, u32) {
        let start = self.line_start(offset);
        let column = source
            .get(start..offset)
            .map_or(0, |prefix| prefix.chars().count());
        (self.line(offset), column as u32 + 1)
    }
}

type LexExtra<'src> = extra::Err<Rich<'src, char>>;

/// Raw tokens, newlines included, with no indentation tokens yet.
pub fn lexer<'src>() -> impl Parser<'src, &'src str, Vec<Spanned>, LexExtra<'src>> {
    let compound = choice((
        just("//=").to(Token::DoubleSlashAssign),
        just("**").to(Token::DoubleStar),
        just("//").to(Token::DoubleSlash),
        just("+=").to(Token::PlusAssign),
        just("-=").to(Token::MinusAssign),
        just("*=").to(Token::StarAssign),
        just("/=").to(Token::SlashAssign),
        just("%=").to(Token::PercentAssign),
        just("==").to(Token::EqEq),
        just("!=").to(Token::NotEq),
        just("<=").to(Token::LtE),
        just(">=").to(Token::GtE),
    ));

    let single = choice((
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('[').to(Token::LBracket),
        just(']').to(Token::RBracket),
        just('{').to(Token::LBrace),
        just('}').to(Token::RBrace),
        just(',').to(Token::Comma),
        just(':').to(Token::Colon),
        just('.').to(Token::Dot),
        just(';').to(Token::Semicolon),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Star),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('=').to(Token::Assign),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
    ));

    let digits = text::digits(10)
        .then(just('_').then(text::digits(10)).repeated())
        .to_slice();
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(digits.clone());

    let hex = just('0')
        .then(one_of("xX"))
        .ignore_then(
            any()
                .filter(|c: &char| c.is_ascii_hexdigit() || *c == '_')
                .repeated()
                .at_least(1)
                .to_slice(),
        )
        .validate(|digits: &str, e, emitter| {
            match i64::from_str_radix(&digits.replace('_', ""), 16) {
                Ok(value) => Token::Int(value),
                Err(_) => {
                    emitter.emit(Rich::custom(
                        e.span(),
                        format!("invalid hexadecimal literal '0x{digits}'"),
                    ));
                    Token::Int(0)
                }
            }
        });

    let float = choice((
        digits
            .clone()
            .then(just('.'))
            .then(digits.clone().or_not())
            .then(exponent.clone().or_not())
            .ignored(),
        just('.')
            .then(digits.clone())
            .then(exponent.clone().or_not())
            .ignored(),
        digits.clone().then(exponent).ignored(),
    ))
    .to_slice()
    .validate(|text: &str, e, emitter| match text.replace('_', "").parse::<f64>() {
        Ok(value) => Token::Float(value),
        Err(_) => {
            emitter.emit(Rich::custom(e.span(), format!("invalid float literal '{text}'")));
            Token::Float(0.0)
        }
    });

    let int = digits.validate(|text: &str, e, emitter| {
        match text.replace('_', "").parse::<i64>() {
            Ok(value) => Token::Int(value),
            Err(_) => {
                emitter.emit(Rich::custom(
                    e.span(),
                    format!("integer literal '{text}' is too large"),
                ));
                Token::Int(0)
            }
        }
    });

    let string = one_of("rRuUbBfF")
        .repeated()
        .at_most(2)
        .to_slice()
        .then(choice((
            quoted("'''", true),
            quoted("\"\"\"", true),
            quoted("'", false),
            quoted("\"", false),
        )))
        .validate(|(prefix, (body, closed)): (&str, (&str, bool)), e, emitter| {
            let prefix = prefix.to_ascii_lowercase();
            if !closed {
                emitter.emit(Rich::custom(e.span(), "unterminated string literal"));
            }
            if !matches!(prefix.as_str(), "" | "r" | "u") {
                emitter.emit(Rich::custom(
                    e.span(),
                    format!("unsupported string prefix '{prefix}'"),
                ));
            }
            if prefix == "r" {
                return Token::Str(body.to_string());
            }
            match unescape(body) {
                Ok(text) => Token::Str(text),
                Err(message) => {
                    emitter.emit(Rich::custom(e.span(), message));
                    Token::Str(String::new())
                }
            }
        });

    let word = any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_alphanumeric() || *c == '_')
                .repeated(),
        )
        .to_slice()
        .validate(|word: &str, e, emitter| {
            if UNSUPPORTED_KEYWORDS.contains(&word) {
                emitter.emit(Rich::custom(
                    e.span(),
                    format!("unsupported syntax '{word}'"),
                ));
            }
            Keyword::from_word(word).map_or_else(|| Token::Name(word.to_string()), Token::Keyword)
        });

    let comment = just('#').then(none_of("\r\n").repeated());
    let continuation = just('\\').then(text::newline());
    let blank = choice((
        one_of(" \t\x0c").ignored(),
        comment.ignored(),
        continuation.ignored(),
    ))
    .repeated();

    let token = choice((
        text::newline().to(Token::Newline),
        string,
        choice((hex, float, int)),
        word,
        compound,
        single,
    ));

    blank.clone().ignore_then(
        token
            .map_with(|token, e| (token, e.span()))
            .then_ignore(blank)
            .repeated()
            .collect::<Vec<_>>(),
    )
}

/// A string body between `delimiter`s, and whether the closing delimiter
/// was found. Escapes are kept verbatim here and decoded by `unescape`.
fn quoted<'src>(
    delimiter: &'static str,
    multiline: bool,
) -> impl Parser<'src, &'src str, (&'src str, bool), LexExtra<'src>> + Clone {
    let escape = just('\\').then(any()).ignored();
    let plain = any()
        .and_is(just(delimiter).not())
        .filter(move |c: &char| *c != '\\' && (multiline || *c != '\n'))
        .ignored();

    just(delimiter)
        .ignore_then(escape.or(plain).repeated().to_slice())
        .then(just(delimiter).or_not().map(|closing| closing.is_some()))
}

fn unescape(body: &str) -> Result<String, String> {
    let mut text = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            None | Some('\n') => {}
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some('0') => text.push('\0'),
            Some('\\') => text.push('\\'),
            Some('\'') => text.push('\''),
            Some('"') => text.push('"'),
            Some('x') => text.push(hex_escape(&mut chars, 2)?),
            Some('u') => text.push(hex_escape(&mut chars, 4)?),
            Some(other) => {
                text.push('\\');
                text.push(other);
            }
        }
    }
    Ok(text)
}

fn hex_escape(chars: &mut std::str::Chars<'_>, count: usize) -> Result<char, String> {
    let mut code = 0u32;
    for _ in 0..count {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| "truncated escape sequence".to_string())?;
        code = code * 16 + digit;
    }
    Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
}

/// Lexes `source` and runs the layout pass over the raw tokens.
pub fn tokenize(source: &str, lines: &LineIndex) -> Result<Vec<Spanned>, ParseError> {
    let raw = lexer()
        .parse(source)
        .into_result()
        .map_err(|errors| lex_error(source, lines, errors))?;
    layout(source, lines, raw)
}

fn lex_error(source: &str, lines: &LineIndex, errors: Vec<Rich<'_, char>>) -> ParseError {
    let Some(error) = errors.into_iter().min_by_key(|error| error.span().start) else {
        return ParseError::new(1, 1, "invalid input");
    };
    let (line, column) = lines.position(source, error.span().start);
    let message = match error.reason() {
        RichReason::Custom(message) => message.clone(),
        _ => match error.found() {
            Some(c) => format!("unexpected character '{c}'"),
            None => "unexpected end of input".to_string(),
        },
    };
    ParseError::new(line, column, message)
}

/// Upper bound on the tree depth the tokens of one logical line can build.
///
/// Every token adds at most one level. A comma or semicolon ends its
/// operand, and a closed bracket group stops counting its contents.
struct DepthEstimate {
    segments: Vec<usize>,
    total: usize,
}

impl DepthEstimate {
    fn new() -> Self {
        Self {
            segments: vec![0],
            total: 0,
        }
    }

    fn push(&mut self, token: &Token) -> usize {
        if matches!(token, Token::Comma | Token::Semicolon) {
            if let Some(segment) = self.segments.last_mut() {
                self.total -= std::mem::take(segment);
            }
        } else if token.closes_group() {
            if self.segments.len() > 1 {
                self.total -= self.segments.pop().unwrap_or(0);
            }
        } else {
            if let Some(segment) = self.segments.last_mut() {
                *segment += 1;
            }
            self.total += 1;
            if token.opens_group() {
                self.segments.push(0);
            }
        }
        self.total
    }
}

fn indentation_width(prefix: &str) -> usize {
    prefix.chars().fold(0, |width, c| match c {
        ' ' => width + 1,
        '\t' => (width / 8 + 1) * 8,
        _ => width,
    })
}

/// Inserts `Indent` / `Dedent`, drops newlines that do not end a logical
/// line and rejects input nested past `MAX_NESTING` or
/// `MAX_EXPRESSION_DEPTH`.
fn layout(source: &str, lines: &LineIndex, raw: Vec<Spanned>) -> Result<Vec<Spanned>, ParseError> {
    let error = |offset: usize, message: &str| {
        let (line, column) = lines.position(source, offset);
        ParseError::new(line, column, message)
    };

    let mut tokens = Vec::with_capacity(raw.len() + 2);
    let mut indents = vec![0usize];
    // Consecutive `elif` clauses at each open block level; every one of
    // them nests the tree one level deeper.
    let mut chains = vec![0usize];
    let mut brackets = 0usize;
    let mut depth = DepthEstimate::new();
    let mut at_line_start = true;

    for (token, span) in raw {
        if token == Token::Newline {
            if brackets == 0 && !at_line_start {
                tokens.push((Token::Newline, span));
                at_line_start = true;
                depth = DepthEstimate::new();
            }
            continue;
        }

        if at_line_start {
            at_line_start = false;
            let line_start = lines.line_start(span.start);
            let width = indentation_width(source.get(line_start..span.start).unwrap_or(""));
            let current = indents.last().copied().unwrap_or(0);
            let here = Span::from(span.start..span.start);
            if width > current {
                indents.push(width);
                chains.push(0);
                tokens.push((Token::Indent, here));
            } else {
                while indents.last().is_some_and(|&top| top > width) {
                    indents.pop();
                    chains.pop();
                    tokens.push((Token::Dedent, here));
                }
                if indents.last() != Some(&width) {
                    return Err(error(
                        span.start,
                        "unindent does not match any outer indentation level",
                    ));
                }
            }
            if let Some(chain) = chains.last_mut() {
                match token {
                    Token::Keyword(Keyword::Elif) => *chain += 1,
                    Token::Keyword(Keyword::Else) => {}
                    _ => *chain = 0,
                }
            }
            if indents.len() + chains.iter().sum::<usize>() > MAX_NESTING {
                return Err(error(span.start, "too many nested blocks"));
            }
        }

        if token.opens_group() {
            brackets += 1;
            if brackets > MAX_NESTING {
                return Err(error(span.start, "too many nested brackets"));
            }
        } else if token.closes_group() {
            brackets = brackets
                .checked_sub(1)
                .ok_or_else(|| error(span.start, "unmatched closing bracket"))?;
        }
        if depth.push(&token) > MAX_EXPRESSION_DEPTH {
            return Err(error(span.start, "expression is too deeply nested"));
        }

        tokens.push((token, span));
    }

    let end = Span::from(source.len()..source.len());
    if !at_line_start {
        tokens.push((Token::Newline, end));
    }
    for _ in 1..indents.len() {
        tokens.push((Token::Dedent, end));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source, &LineIndex::new(source))
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    fn tokenize_err(source: &str) -> ParseError {
        tokenize(source, &LineIndex::new(source)).unwrap_err()
    }

    #[test]
    fn test_raw_lexer_keeps_every_newline() {
        let tokens = lexer().parse("x\n\n  # note\ny").into_result().unwrap();
        let newlines = tokens.iter().filter(|(t, _)| *t == Token::Newline).count();
        assert_eq!(newlines, 3);
        assert_eq!(tokens[0].1, Span::from(0..1));
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![
                Token::Name("x".into()),
                Token::Assign,
                Token::Int(1),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = kinds("def f():\n    return 1\nx = 2\n");
        let indent = tokens.iter().position(|t| *t == Token::Indent).unwrap();
        let dedent = tokens.iter().position(|t| *t == Token::Dedent).unwrap();
        assert!(indent < dedent);
    }

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        let tokens = kinds("x = 1\n\n    # indented comment\n\ny = 2\n");
        assert!(!tokens.contains(&Token::Indent));
        let newlines = tokens.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn test_newlines_inside_brackets_are_joined() {
        let tokens = kinds("x = [\n    1,\n    2,\n]\n");
        let newlines = tokens.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!tokens.contains(&Token::Indent));
    }

    #[test]
    fn test_backslash_continuation() {
        let tokens = kinds("x = 1 + \\\n    2\n");
        assert!(!tokens.contains(&Token::Indent));
        assert_eq!(tokens.iter().filter(|t| **t == Token::Newline).count(), 1);
    }

    #[test]
    fn test_dedents_emitted_at_eof() {
        let tokens = kinds("if x:\n    if y:\n        z = 1");
        let dedents = tokens.iter().filter(|t| **t == Token::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last(), Some(&Token::Dedent));
    }

    #[test]
    fn test_string_escapes_and_triple_quotes() {
        assert_eq!(kinds(r#"s = "a\tb\n""#)[2], Token::Str("a\tb\n".into()));
        assert_eq!(
            kinds("s = '''line one\nline 'two'\n'''")[2],
            Token::Str("line one\nline 'two'\n".into())
        );
        assert_eq!(kinds(r"s = r'\d+'")[2], Token::Str(r"\d+".into()));
        assert_eq!(kinds(r"s = '\x41\u00e9'")[2], Token::Str("Aé".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000")[0], Token::Int(1000));
        assert_eq!(kinds("0.5")[0], Token::Float(0.5));
        assert_eq!(kinds(".25")[0], Token::Float(0.25));
        assert_eq!(kinds("2e3")[0], Token::Float(2000.0));
        assert_eq!(kinds("0xff")[0], Token::Int(255));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let err = tokenize_err("x = 99999999999999999999\n");
        assert!(err.message.contains("too large"));
        assert_eq!((err.line, err.column), (1, 5));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a //= b ** 2 != c")[..6],
            [
                Token::Name("a".into()),
                Token::DoubleSlashAssign,
                Token::Name("b".into()),
                Token::DoubleStar,
                Token::Int(2),
                Token::NotEq,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("from . import x")[..4],
            [
                Token::Keyword(Keyword::From),
                Token::Dot,
                Token::Keyword(Keyword::Import),
                Token::Name("x".into()),
            ]
        );
    }

    #[test]
    fn test_bad_dedent_is_an_error() {
        let err = tokenize_err("if x:\n        a = 1\n    b = 2\n");
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize_err("x = 'abc\n");
        assert_eq!((err.line, err.column), (1, 5));
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize_err("x = 1 $ 2\n");
        assert_eq!(err.line, 1);
        assert!(err.message.contains('$'));
    }

    #[test]
    fn test_unsupported_syntax() {
        let err = tokenize_err("class Foo:\n    pass\n");
        assert!(err.message.contains("class"));
        let err = tokenize_err("x = f'{y}'");
        assert!(err.message.contains("prefix"));
    }

    #[test]
    fn test_positions() {
        let source = "x = 1\ny = foo\n";
        let lines = LineIndex::new(source);
        let tokens = tokenize(source, &lines).unwrap();
        let (_, span) = tokens
            .iter()
            .find(|(t, _)| *t == Token::Name("foo".into()))
            .unwrap();
        assert_eq!(lines.position(source, span.start), (2, 5));
    }

    // ── nesting limits ──────────────────────────────────

    #[test]
    fn test_deep_brackets_are_rejected() {
        let depth = 3000;
        let source = format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        let err = tokenize_err(&source);
        assert_eq!(err.line, 1);
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn test_long_unary_chain_is_rejected() {
        let source = format!("x = {}1\n", "-".repeat(5000));
        assert!(tokenize_err(&source).message.contains("too deeply nested"));
    }

    #[test]
    fn test_long_power_chain_is_rejected() {
        let source = format!("x = 2{}\n", " ** 2".repeat(1000));
        assert!(tokenize_err(&source).message.contains("too deeply nested"));
    }

    #[test]
    fn test_deep_blocks_are_rejected() {
        let mut source = String::new();
        for level in 0..=MAX_NESTING {
            source.push_str(&" ".repeat(level));
            source.push_str("if x:\n");
        }
        source.push_str(&" ".repeat(MAX_NESTING + 1));
        source.push_str("pass\n");
        assert!(tokenize_err(&source).message.contains("nested blocks"));
    }

    #[test]
    fn test_long_elif_chain_is_rejected() {
        let mut source = String::from("if x == 0:\n    pass\n");
        for n in 1..=MAX_NESTING {
            source.push_str(&format!("elif x == {n}:\n    pass\n"));
        }
        assert!(tokenize_err(&source).message.contains("nested blocks"));
    }

    #[test]
    fn test_wide_literals_are_not_nesting() {
        let items = vec!["1"; 5000].join(", ");
        let tokens = kinds(&format!("x = [{items}]\n"));
        assert_eq!(tokens.iter().filter(|t| **t == Token::Int(1)).count(), 5000);
    }
}
