//! Textual pipeline descriptions.
//!
//! ```text
//! filesrc name=fsrc location="my file.wav" ! wavparse ! audioconvert ! fakesink
//! ```
//!
//! Nodes are separated by `!` and linked in order.  Each node is a factory
//! name followed by `key=value` properties; `name=` sets the node name.
//! Values may be double-quoted to include spaces or `!`.

use thiserror::Error;

use super::element::{Element, PropertyError};
use super::pipeline::Pipeline;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty pipeline description")]
    Empty,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("no element \"{0}\"")]
    UnknownElement(String),

    #[error("could not set property \"{property}\" on {element}: {source}")]
    Property {
        element: String,
        property: String,
        #[source]
        source: PropertyError,
    },

    #[error("could not add {0} to the pipeline")]
    Add(String),

    #[error("could not link {from} to {to}")]
    Link { from: String, to: String },
}

/// One `factory key=value …` segment.
#[derive(Debug, PartialEq)]
struct NodeSpec {
    factory: String,
    properties: Vec<(String, String)>,
}

/// Split on unquoted `delimiter`, honouring double quotes.
fn split_unquoted(text: &str, delimiter: impl Fn(char) -> bool) -> Result<Vec<String>, ParseError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if !quoted && delimiter(c) => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    if quoted {
        return Err(ParseError::Syntax("unterminated quote".into()));
    }
    parts.push(current);
    Ok(parts)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_segment(segment: &str) -> Result<NodeSpec, ParseError> {
    let mut tokens = split_unquoted(segment, char::is_whitespace)?
        .into_iter()
        .filter(|t| !t.is_empty());

    let factory = tokens
        .next()
        .ok_or_else(|| ParseError::Syntax("missing element between '!'".into()))?;
    if factory.contains('=') {
        return Err(ParseError::Syntax(format!(
            "expected an element name, found \"{factory}\""
        )));
    }

    let properties = tokens
        .map(|token| {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                ParseError::Syntax(format!("expected key=value after {factory}, found \"{token}\""))
            })?;
            if key.is_empty() {
                return Err(ParseError::Syntax(format!("empty property name in \"{token}\"")));
            }
            Ok((key.to_owned(), unquote(value).to_owned()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NodeSpec {
        factory,
        properties,
    })
}

fn parse_description(description: &str) -> Result<Vec<NodeSpec>, ParseError> {
    if description.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    split_unquoted(description, |c| c == '!')?
        .iter()
        .map(|segment| parse_segment(segment))
        .collect()
}

fn build_node(spec: &NodeSpec) -> Result<Element, ParseError> {
    let name = spec
        .properties
        .iter()
        .find(|(k, _)| k == "name")
        .map(|(_, v)| v.as_str());
    let element = match name {
        Some(name) => Element::make_named(&spec.factory, name),
        None => Element::make(&spec.factory),
    };
    if !element.is_valid() {
        return Err(ParseError::UnknownElement(spec.factory.clone()));
    }

    for (key, value) in spec.properties.iter().filter(|(k, _)| k != "name") {
        element
            .set_property(key, value.as_str())
            .map_err(|source| ParseError::Property {
                element: element.name().to_owned(),
                property: key.clone(),
                source,
            })?;
    }
    Ok(element)
}

impl Pipeline {
    /// Build, configure and link a pipeline from a textual description.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for malformed text, unknown factories,
    /// rejected properties, and refused links.
    pub fn parse(description: &str) -> Result<Pipeline, ParseError> {
        let specs = parse_description(description)?;
        let pipeline = Pipeline::new();

        let mut previous: Option<Element> = None;
        for spec in &specs {
            let element = build_node(spec)?;
            if !pipeline.add(&element) {
                return Err(ParseError::Add(element.name().to_owned()));
            }
            if let Some(upstream) = &previous {
                if !upstream.link(&element) {
                    return Err(ParseError::Link {
                        from: upstream.name().to_owned(),
                        to: element.name().to_owned(),
                    });
                }
            }
            previous = Some(element);
        }

        log::debug!("pipeline: parsed \"{description}\" into {}", pipeline.name());
        Ok(pipeline)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
