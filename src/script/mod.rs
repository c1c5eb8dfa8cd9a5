pub mod interpreter;
pub mod session;
pub mod token;

pub use interpreter::{Interpreter, Settings};
pub use session::{Purpose, Session};
pub use token::{ExtractKind, Token};

use crate::prelude::*;

use std::collections::HashMap;

const UNIT_CONVERSIONS: &str = ":unit conversions";
const END_UNIT_CONVERSIONS: &str = ":end unit conversions";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Directive {
    Send(Vec<Token>),
    Receive(Vec<Token>),
    Extract(Vec<ExtractKind>),
}

/// A directive with its absolute line number in the script file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptLine {
    pub number: usize,
    pub directive: Directive,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Block {
    pub name: String,
    pub line: usize,
    pub lines: Vec<ScriptLine>,
}

/// The parsed command script: named blocks of directives.
#[derive(Clone, Debug, Default)]
pub struct Script {
    blocks: HashMap<String, Block>,
}

impl Script {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| crate::file_error_with_source!(err, "error reading script {}", path))?;
        let script: Self = content.parse()?;
        info!("loaded {} command blocks from {}", script.len(), path);
        Ok(script)
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// `:name` or `: name`
fn label(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(':')?;
    rest.split(|c: char| c.is_whitespace() || c == ';')
        .find(|w| !w.is_empty())
}

fn words(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_whitespace() || c == ';')
        .filter(|w| !w.is_empty())
}

/// Words up to and including `$END`; a directive without one is malformed.
fn directive_words<'a>(words: impl Iterator<Item = &'a str>, number: usize) -> Result<Vec<&'a str>, Fault> {
    let mut out = Vec::new();
    for word in words {
        if word == "$END" {
            return Ok(out);
        }
        out.push(word);
    }
    Err(Fault::parse(number, "directive is missing $END"))
}

fn parse_directive(line: &str, number: usize) -> Result<Option<Directive>, Fault> {
    let mut words = words(line);
    let Some(kind) = words.next() else {
        return Ok(None);
    };

    let directive = match kind {
        "S" | "R" => {
            let tokens = directive_words(words, number)?
                .into_iter()
                .map(|w| Token::parse(w, number))
                .collect::<Result<Vec<_>, _>>()?;

            if kind == "S" {
                Directive::Send(tokens)
            } else {
                if tokens.contains(&Token::Crc) {
                    return Err(Fault::parse(number, "$CRC cannot appear in a receive pattern"));
                }
                Directive::Receive(tokens)
            }
        }
        "E" => Directive::Extract(
            directive_words(words, number)?
                .into_iter()
                .map(|w| ExtractKind::parse(w, number))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => return Err(Fault::parse(number, format!("unknown directive '{}'", other))),
    };

    Ok(Some(directive))
}

impl FromStr for Script {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> Result<Self> {
        let mut blocks = HashMap::new();
        let mut current: Option<Block> = None;
        let mut in_unit_conversions = false;

        for (index, raw) in content.lines().enumerate() {
            let number = index + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with(END_UNIT_CONVERSIONS) {
                in_unit_conversions = false;
                continue;
            }
            if in_unit_conversions {
                continue;
            }

            if line.starts_with(':') {
                if let Some(block) = current.take() {
                    insert_block(&mut blocks, block);
                }
                if line.starts_with(UNIT_CONVERSIONS) {
                    in_unit_conversions = true;
                    continue;
                }
                match label(line) {
                    Some(name) => {
                        current = Some(Block {
                            name: name.to_string(),
                            line: number,
                            lines: Vec::new(),
                        })
                    }
                    None => return Err(Fault::parse(number, "empty label").into()),
                }
                continue;
            }

            let Some(directive) = parse_directive(line, number)? else {
                continue;
            };
            match current.as_mut() {
                Some(block) => block.lines.push(ScriptLine { number, directive }),
                None => return Err(Fault::parse(number, "directive outside of a labelled block").into()),
            }
        }

        if let Some(block) = current.take() {
            insert_block(&mut blocks, block);
        }

        Ok(Self { blocks })
    }
}

fn insert_block(blocks: &mut HashMap<String, Block>, block: Block) {
    if blocks.contains_key(&block.name) {
        warn!("line {}: duplicate label {}, first definition wins", block.line, block.name);
        return;
    }
    blocks.insert(block.name.clone(), block);
}
