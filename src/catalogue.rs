//! Command catalogue: the expected response shape of each verified command.
//!
//! A catalogue is declarative TOML. Each `[[block]]` names the anchor that
//! opens it and lists its fields in canonical order:
//!
//! ```toml
//! [[block]]
//! name = "m_state"
//! anchor = "> m_state"
//! closers = ["> m_production"]
//!
//! [[block.field]]
//! token = "Mission State:"
//! kind = "text"
//!
//! [[block.field]]
//! token = "Standby Mode:"
//! kind = "text"
//! terminal = true
//! ```
//!
//! Loading validates the shape and computes which fields are gated: a field
//! whose token is a substring of another token in the same block is only
//! recognised at its exact canonical position. The anchors of the other
//! blocks are added to each block's closers, except where an anchor is one of
//! the block's own fields.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CatalogueError;

/// The APEX glider checks, embedded at build time.
const BUILTIN: &str = include_str!("../catalogue/apex.toml");

/// How a field's value token is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Int,
    Real,
    Text,
}

impl ValueKind {
    /// Parse a value token; `None` if it does not fit the kind.
    pub fn parse(self, token: &str) -> Option<FieldValue> {
        match self {
            ValueKind::Int => token.parse().ok().map(FieldValue::Int),
            ValueKind::Real => token.parse().ok().map(FieldValue::Real),
            ValueKind::Text => Some(FieldValue::Text(token.to_string())),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Int => "int",
            ValueKind::Real => "real",
            ValueKind::Text => "text",
        };
        f.write_str(s)
    }
}

/// A typed value extracted from a response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Real(v) => write!(f, "{}", v),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogueDef {
    #[serde(default, rename = "block")]
    blocks: Vec<BlockDef>,
}

#[derive(Debug, Deserialize)]
struct BlockDef {
    name: String,
    anchor: String,
    #[serde(default)]
    closers: Vec<String>,
    #[serde(default)]
    strict: bool,
    #[serde(default, rename = "field")]
    fields: Vec<FieldDef>,
}

#[derive(Debug, Deserialize)]
struct FieldDef {
    token: String,
    #[serde(default)]
    kind: Option<ValueKind>,
    #[serde(default)]
    terminal: bool,
    #[serde(default)]
    require: Option<String>,
}

/// One expected field of a response block.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub token: String,
    /// Position in the block's canonical order.
    pub ordinal: usize,
    pub kind: Option<ValueKind>,
    /// Seeing this field commits the block.
    pub terminal: bool,
    /// Literal the value token must equal.
    pub require: Option<String>,
    /// Token is a substring of another token in the block.
    pub gated: bool,
}

/// A verified command and its response fields.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSpec {
    pub name: String,
    pub anchor: String,
    /// Anchors of commands that follow this one in a session.
    pub closers: Vec<String>,
    /// Every non-blank unrecognised line fails the block.
    pub strict: bool,
    pub fields: Vec<FieldSpec>,
}

impl BlockSpec {
    fn compile(def: BlockDef) -> Result<Self, CatalogueError> {
        let name = def.name;
        if def.anchor.trim().is_empty() {
            return Err(CatalogueError::EmptyAnchor(name));
        }
        if def.fields.is_empty() {
            return Err(CatalogueError::NoFields(name));
        }

        let mut seen = HashSet::new();
        for (ordinal, field) in def.fields.iter().enumerate() {
            if field.token.is_empty() {
                return Err(CatalogueError::EmptyToken { block: name, ordinal });
            }
            if !seen.insert(field.token.as_str()) {
                return Err(CatalogueError::DuplicateToken {
                    block: name,
                    token: field.token.clone(),
                });
            }
        }

        let terminals = def.fields.iter().filter(|f| f.terminal).count();
        let last_is_terminal = def.fields.last().is_some_and(|f| f.terminal);
        if terminals != 1 || !last_is_terminal {
            return Err(CatalogueError::TerminalPlacement { block: name });
        }

        let tokens: Vec<&str> = def.fields.iter().map(|f| f.token.as_str()).collect();
        let fields = def
            .fields
            .iter()
            .enumerate()
            .map(|(ordinal, f)| FieldSpec {
                token: f.token.clone(),
                ordinal,
                kind: f.kind,
                terminal: f.terminal,
                require: f.require.clone(),
                gated: tokens
                    .iter()
                    .enumerate()
                    .any(|(other, t)| other != ordinal && t.contains(f.token.as_str())),
            })
            .collect();

        Ok(Self {
            name,
            anchor: def.anchor,
            closers: def.closers,
            strict: def.strict,
            fields,
        })
    }

    pub fn field(&self, ordinal: usize) -> Option<&FieldSpec> {
        self.fields.get(ordinal)
    }

    pub fn gated_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.gated)
    }
}

/// A validated set of blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalogue {
    blocks: Vec<BlockSpec>,
}

impl Catalogue {
    pub fn from_toml_str(text: &str) -> Result<Self, CatalogueError> {
        let def: CatalogueDef = toml::from_str(text)?;
        let mut names = HashSet::new();
        let mut blocks = Vec::with_capacity(def.blocks.len());
        for block in def.blocks {
            if !names.insert(block.name.clone()) {
                return Err(CatalogueError::DuplicateBlock(block.name));
            }
            blocks.push(BlockSpec::compile(block)?);
        }

        // The next command in a session closes an open block, so every other
        // block's anchor is a closer unless it is one of this block's fields.
        let anchors: Vec<String> = blocks.iter().map(|b| b.anchor.clone()).collect();
        for block in blocks.iter_mut() {
            for anchor in &anchors {
                let own = *anchor == block.anchor
                    || block.fields.iter().any(|f| f.token.contains(anchor.as_str()))
                    || block.closers.contains(anchor);
                if !own {
                    block.closers.push(anchor.clone());
                }
            }
        }
        Ok(Self { blocks })
    }

    /// The embedded APEX catalogue.
    pub fn builtin() -> Result<Self, CatalogueError> {
        Self::from_toml_str(BUILTIN)
    }

    pub fn blocks(&self) -> &[BlockSpec] {
        &self.blocks
    }

    pub fn block(&self, name: &str) -> Option<&BlockSpec> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Keep only the named blocks, in catalogue order.
    pub fn retain(&mut self, names: &[String]) {
        self.blocks.retain(|b| names.iter().any(|n| *n == b.name));
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
