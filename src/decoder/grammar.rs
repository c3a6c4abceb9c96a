//! JSGF grammar subset.
//!
//! Supported:
//!
//! ```text
//! #JSGF V1.0;
//! grammar jenkins;
//! <job> = build | deploy | test;
//! public <command> = [please] (start | stop) the <job> [job];
//! ```
//!
//! Alternatives `|`, groups `( )`, optionals `[ ]`, rule references
//! `<name>`, quoted tokens, and the special rules `<NULL>` / `<VOID>`.
//! Weights `/w/` and tags `{…}` are skipped.  The postfix operators `*` and
//! `+` are approximated as "optional" and "once".
//!
//! A grammar is expanded eagerly into the finite set of sentences its public
//! rules accept.  Expansion is bounded by [`MAX_SENTENCES`] and a rule
//! nesting depth, so recursive rules are rejected rather than looping.

use std::collections::HashMap;
use std::path::Path;

use super::search::normalize;
use super::DecoderError;

/// Upper bound on the number of sentences a grammar may expand to.
pub const MAX_SENTENCES: usize = 10_000;
const MAX_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expansion {
    Word(String),
    Rule(String),
    Sequence(Vec<Expansion>),
    Alternatives(Vec<Expansion>),
    Optional(Box<Expansion>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    RuleRef(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Bar,
    Star,
    Plus,
}

fn syntax(message: impl Into<String>) -> DecoderError {
    DecoderError::Grammar(message.into())
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

fn tokenize(text: &str) -> Result<Vec<Token>, DecoderError> {
    const SPECIAL: &[char] = &['(', ')', '[', ']', '|', '<', '>', '/', '{', '}', '*', '+', '"'];

    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | '|' | '*' | '+' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '|' => Token::Bar,
                    '*' => Token::Star,
                    _ => Token::Plus,
                });
            }
            '<' => {
                chars.next();
                let name: String = chars.by_ref().take_while(|&c| c != '>').collect();
                if name.trim().is_empty() {
                    return Err(syntax("empty rule reference"));
                }
                tokens.push(Token::RuleRef(name.trim().to_owned()));
            }
            '/' | '{' => {
                chars.next();
                let close = if c == '/' { '/' } else { '}' };
                if !chars.by_ref().any(|c| c == close) {
                    return Err(syntax(format!("unterminated '{c}'")));
                }
            }
            '"' => {
                chars.next();
                let mut word = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    word.push(c);
                }
                if !closed {
                    return Err(syntax("unterminated quoted token"));
                }
                tokens.push(Token::Word(word));
            }
            '>' | '}' => return Err(syntax(format!("unexpected '{c}'"))),
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || SPECIAL.contains(&c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), DecoderError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            other => Err(syntax(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn alternatives(&mut self) -> Result<Expansion, DecoderError> {
        let mut options = vec![self.sequence()?];
        while self.peek() == Some(&Token::Bar) {
            self.next();
            options.push(self.sequence()?);
        }
        Ok(if options.len() == 1 {
            options.remove(0)
        } else {
            Expansion::Alternatives(options)
        })
    }

    fn sequence(&mut self) -> Result<Expansion, DecoderError> {
        let mut items = Vec::new();
        while let Some(token) = self.peek() {
            if matches!(token, Token::RParen | Token::RBracket | Token::Bar) {
                break;
            }
            let mut item = self.item()?;
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    item = Expansion::Optional(Box::new(item));
                }
                Some(Token::Plus) => {
                    self.next();
                }
                _ => {}
            }
            items.push(item);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expansion::Sequence(items)
        })
    }

    fn item(&mut self) -> Result<Expansion, DecoderError> {
        match self.next() {
            Some(Token::Word(w)) => Ok(Expansion::Word(w)),
            Some(Token::RuleRef(r)) => Ok(Expansion::Rule(r)),
            Some(Token::LParen) => {
                let inner = self.alternatives()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let inner = self.alternatives()?;
                self.expect(Token::RBracket)?;
                Ok(Expansion::Optional(Box::new(inner)))
            }
            other => Err(syntax(format!("unexpected {other:?}"))),
        }
    }
}

fn parse_expansion(text: &str) -> Result<Expansion, DecoderError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };
    let expansion = parser.alternatives()?;
    if let Some(extra) = parser.peek() {
        return Err(syntax(format!("unexpected {extra:?}")));
    }
    Ok(expansion)
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

/// A parsed grammar and the sentences it accepts.
#[derive(Debug, Clone)]
pub struct Grammar {
    name: Option<String>,
    rules: HashMap<String, Expansion>,
    public: Vec<String>,
    sentences: Vec<String>,
}

impl Grammar {
    /// Parse JSGF text and expand its public rules.
    ///
    /// # Errors
    ///
    /// [`DecoderError::Grammar`] for syntax errors, undefined rules,
    /// recursion, imports, no public rule, or too many sentences.
    pub fn parse(text: &str) -> Result<Self, DecoderError> {
        let mut grammar = Grammar {
            name: None,
            rules: HashMap::new(),
            public: Vec::new(),
            sentences: Vec::new(),
        };

        for statement in strip_comments(text).split(';') {
            let statement = statement.trim();
            if statement.is_empty() || statement.starts_with("#JSGF") {
                continue;
            }
            if let Some(name) = statement.strip_prefix("grammar ") {
                grammar.name = Some(name.trim().to_owned());
                continue;
            }
            if statement.starts_with("import ") {
                return Err(syntax(format!("imports are not supported: {statement}")));
            }

            let (is_public, rule) = match statement.strip_prefix("public ") {
                Some(rest) => (true, rest.trim_start()),
                None => (false, statement),
            };
            let (head, body) = rule
                .split_once('=')
                .ok_or_else(|| syntax(format!("expected a rule definition: {statement}")))?;
            let name = head
                .trim()
                .strip_prefix('<')
                .and_then(|h| h.strip_suffix('>'))
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| syntax(format!("malformed rule name: {}", head.trim())))?;

            grammar
                .rules
                .insert(name.to_owned(), parse_expansion(body)?);
            if is_public {
                grammar.public.push(name.to_owned());
            }
        }

        if grammar.public.is_empty() {
            return Err(syntax("grammar has no public rule"));
        }

        let mut sentences = Vec::new();
        for rule in &grammar.public {
            for words in grammar.expand(&Expansion::Rule(rule.clone()), 0)? {
                let sentence = normalize(&words.join(" "));
                if !sentence.is_empty() && !sentences.contains(&sentence) {
                    sentences.push(sentence);
                }
            }
        }
        grammar.sentences = sentences;
        Ok(grammar)
    }

    /// Read and parse a `.jsgf` file.
    pub fn from_file(path: &Path) -> Result<Self, DecoderError> {
        let text = std::fs::read_to_string(path).map_err(|e| DecoderError::io(path, e))?;
        Self::parse(&text)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn public_rules(&self) -> &[String] {
        &self.public
    }

    /// Accepted sentences, normalised (lowercase, single spaces).
    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    /// `true` when the normalised form of `text` is an accepted sentence.
    pub fn accepts(&self, text: &str) -> bool {
        let text = normalize(text);
        self.sentences.iter().any(|s| *s == text)
    }

    fn expand(&self, expansion: &Expansion, depth: usize) -> Result<Vec<Vec<String>>, DecoderError> {
        if depth > MAX_DEPTH {
            return Err(syntax("rule nesting too deep (recursive rule?)"));
        }
        let expanded = match expansion {
            Expansion::Word(w) => vec![w.split_whitespace().map(str::to_owned).collect()],
            Expansion::Rule(name) => match name.as_str() {
                "NULL" => vec![Vec::new()],
                "VOID" => Vec::new(),
                _ => {
                    let rule = self
                        .rules
                        .get(name)
                        .ok_or_else(|| syntax(format!("undefined rule <{name}>")))?;
                    self.expand(rule, depth + 1)?
                }
            },
            Expansion::Sequence(items) => {
                let mut acc: Vec<Vec<String>> = vec![Vec::new()];
                for item in items {
                    let tails = self.expand(item, depth + 1)?;
                    if acc.len().saturating_mul(tails.len()) > MAX_SENTENCES {
                        return Err(too_many());
                    }
                    acc = acc
                        .iter()
                        .flat_map(|head| {
                            tails.iter().map(move |tail| {
                                let mut words = head.clone();
                                words.extend(tail.iter().cloned());
                                words
                            })
                        })
                        .collect();
                }
                acc
            }
            Expansion::Alternatives(options) => {
                let mut all = Vec::new();
                for option in options {
                    all.extend(self.expand(option, depth + 1)?);
                }
                all
            }
            Expansion::Optional(inner) => {
                let mut all = vec![Vec::new()];
                all.extend(self.expand(inner, depth + 1)?);
                all
            }
        };
        if expanded.len() > MAX_SENTENCES {
            return Err(too_many());
        }
        Ok(expanded)
    }
}

fn too_many() -> DecoderError {
    syntax(format!("grammar expands to more than {MAX_SENTENCES} sentences"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const JENKINS: &str = r#"
        #JSGF V1.0;
        grammar jenkins;

        // jobs we know about
        <job> = build | deploy | test;
        public <command> = [please] (start | stop) the <job> [job];
    "#;

    #[test]
    fn expands_alternatives_and_optionals() {
        let grammar = Grammar::parse(JENKINS).expect("parse");
        assert_eq!(grammar.name(), Some("jenkins"));
        assert_eq!(grammar.public_rules(), ["command".to_owned()]);
        // 2 (please) × 2 (start/stop) × 3 (job) × 2 (job suffix)
        assert_eq!(grammar.sentences().len(), 24);
        assert!(grammar.accepts("start the build"));
        assert!(grammar.accepts("Please STOP the deploy job."));
        assert!(!grammar.accepts("start the release"));
    }

    #[test]
    fn comments_weights_and_tags_are_ignored() {
        let grammar = Grammar::parse(
            "/* header */ public <x> = /5/ open {act} the door | /1/ close it; // done",
        )
        .expect("parse");
        assert!(grammar.accepts("open the door"));
        assert!(grammar.accepts("close it"));
    }

    #[test]
    fn quoted_tokens_and_null() {
        let grammar = Grammar::parse(r#"public <x> = "new york" <NULL> city;"#).expect("parse");
        assert_eq!(grammar.sentences(), ["new york city".to_owned()]);
    }

    #[test]
    fn void_removes_alternative() {
        let grammar = Grammar::parse("public <x> = yes | <VOID> no;").expect("parse");
        assert_eq!(grammar.sentences(), ["yes".to_owned()]);
    }

    #[test]
    fn undefined_rule_is_an_error() {
        let err = Grammar::parse("public <x> = <missing>;").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn recursive_rule_is_rejected() {
        assert!(Grammar::parse("public <x> = go [<x>];").is_err());
    }

    #[test]
    fn grammar_without_public_rule_is_rejected() {
        assert!(Grammar::parse("<x> = hello;").is_err());
    }

    #[test]
    fn unbalanced_groups_are_rejected() {
        assert!(Grammar::parse("public <x> = (a | b;").is_err());
        assert!(Grammar::parse("public <x> = a ];").is_err());
    }

    #[test]
    fn oversized_grammar_is_rejected() {
        let digit = "(zero | one | two | three | four | five | six | seven | eight | nine)";
        let text = format!("public <n> = {digit} {digit} {digit} {digit} {digit};");
        assert!(Grammar::parse(&text).is_err());
    }
}
